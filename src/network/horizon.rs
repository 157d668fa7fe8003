//! Horizon HTTP client with timeout, failover and result-code mapping.
//!
//! # Responsibilities
//! - Submit envelopes (`POST /transactions`, form field `tx`)
//! - Query account sequence numbers (`GET /accounts/{id}`)
//! - Query transaction status (`GET /transactions/{hash}`)
//! - Fail over between the configured endpoint and the failover list
//!
//! # Design Decisions
//! - The primary endpoint is read from the current configuration snapshot on
//!   every call, so a configuration change takes effect immediately
//! - Queries fail over on any error; a submission fails over only when the
//!   endpoint could not be reached, since a request that reached horizon may
//!   already have been applied
//! - 504 from horizon is an unknown outcome, reported as a timeout
//! - An unusable primary endpoint is a configuration error, raised before
//!   any request is made

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::builder::SignedEnvelope;
use crate::config::validation::check_http_url;
use crate::config::{ConfigurationStore, NetworkConfig};
use crate::network::client::NetworkClient;
use crate::network::types::{ExternalTxStatus, NetworkError, RejectionReason, SubmitOutcome};

/// Horizon client wrapper with failover support.
#[derive(Clone)]
pub struct HorizonClient {
    http: reqwest::Client,
    config: Arc<ConfigurationStore>,
    failover_urls: Vec<String>,
    timeout_duration: Duration,
}

/// Outcome of one request against one endpoint.
enum Attempt {
    /// The endpoint could not be reached; nothing was sent.
    Unreachable(NetworkError),
    /// The request may have been delivered.
    Failed(NetworkError),
}

impl Attempt {
    fn into_error(self) -> NetworkError {
        match self {
            Attempt::Unreachable(e) | Attempt::Failed(e) => e,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    hash: String,
    ledger: u64,
}

#[derive(Debug, Deserialize)]
struct Problem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    extras: Option<ProblemExtras>,
}

#[derive(Debug, Deserialize)]
struct ProblemExtras {
    result_codes: Option<ResultCodes>,
}

#[derive(Debug, Deserialize)]
struct ResultCodes {
    transaction: String,
    #[serde(default)]
    operations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    sequence: String,
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    successful: bool,
    ledger: u64,
}

impl HorizonClient {
    pub fn new(config: Arc<ConfigurationStore>, network: &NetworkConfig) -> Result<Self, NetworkError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| NetworkError::Transport(format!("failed to build HTTP client: {}", e)))?;

        let mut failover_urls = Vec::new();
        for url in &network.failover_urls {
            match check_http_url(url) {
                Ok(()) => failover_urls.push(url.clone()),
                Err(e) => tracing::warn!(url = %url, error = %e, "Ignoring invalid failover horizon URL"),
            }
        }

        Ok(Self {
            http,
            config,
            failover_urls,
            timeout_duration: Duration::from_secs(network.request_timeout_secs),
        })
    }

    /// Primary endpoint from the current snapshot, then the failovers.
    fn endpoints(&self) -> Result<Vec<String>, NetworkError> {
        let snapshot = self
            .config
            .get()
            .map_err(|e| NetworkError::Configuration(e.to_string()))?;
        check_http_url(&snapshot.external_network_endpoint)
            .map_err(|e| NetworkError::Configuration(format!("external_network_endpoint: {}", e)))?;
        let mut endpoints = vec![snapshot.external_network_endpoint.trim_end_matches('/').to_string()];
        endpoints.extend(self.failover_urls.iter().map(|u| u.trim_end_matches('/').to_string()));
        Ok(endpoints)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(StatusCode, String), Attempt> {
        let timeout_ms = self.timeout_duration.as_millis() as u64;
        let fut = async move {
            let response = request.send().await.map_err(|e| classify(e, timeout_ms))?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| Attempt::Failed(NetworkError::Transport(e.to_string())))?;
            Ok::<_, Attempt>((status, body))
        };
        match tokio::time::timeout(self.timeout_duration, fut).await {
            Ok(result) => result,
            Err(_) => Err(Attempt::Failed(NetworkError::Timeout(timeout_ms))),
        }
    }

    /// GET with failover on any error.
    async fn query(&self, path: &str) -> Result<(StatusCode, String), NetworkError> {
        let mut last_error = None;
        for (i, base) in self.endpoints()?.iter().enumerate() {
            match self.send(self.http.get(format!("{}{}", base, path))).await {
                Ok(response) => return Ok(response),
                Err(attempt) => {
                    let e = attempt.into_error();
                    tracing::warn!(endpoint_idx = i, error = %e, "Horizon query failed, trying next endpoint");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| NetworkError::Transport("no horizon endpoints".to_string())))
    }
}

fn classify(e: reqwest::Error, timeout_ms: u64) -> Attempt {
    if e.is_connect() {
        Attempt::Unreachable(NetworkError::Transport(e.to_string()))
    } else if e.is_timeout() {
        Attempt::Failed(NetworkError::Timeout(timeout_ms))
    } else {
        Attempt::Failed(NetworkError::Transport(e.to_string()))
    }
}

fn parse_submit(status: StatusCode, body: &str, timeout_ms: u64) -> Result<SubmitOutcome, NetworkError> {
    match status {
        StatusCode::OK => {
            let accepted: SubmitResponse =
                serde_json::from_str(body).map_err(|e| NetworkError::Protocol(format!("submit response: {}", e)))?;
            Ok(SubmitOutcome::Accepted {
                hash: accepted.hash,
                ledger: accepted.ledger,
            })
        }
        StatusCode::BAD_REQUEST => {
            let problem: Problem =
                serde_json::from_str(body).map_err(|e| NetworkError::Protocol(format!("problem response: {}", e)))?;
            Ok(match problem.extras.and_then(|x| x.result_codes) {
                Some(codes) => SubmitOutcome::from_result_codes(&codes.transaction, &codes.operations),
                None => SubmitOutcome::Rejected(RejectionReason::Malformed(problem.title)),
            })
        }
        StatusCode::GATEWAY_TIMEOUT => Err(NetworkError::Timeout(timeout_ms)),
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            Err(NetworkError::Transport(format!("horizon returned {}", s)))
        }
        s => Err(NetworkError::Protocol(format!("unexpected submit status {}", s))),
    }
}

fn parse_sequence(account_id: &str, status: StatusCode, body: &str) -> Result<u64, NetworkError> {
    match status {
        StatusCode::OK => {
            let account: AccountResponse =
                serde_json::from_str(body).map_err(|e| NetworkError::Protocol(format!("account response: {}", e)))?;
            account
                .sequence
                .parse()
                .map_err(|_| NetworkError::Protocol(format!("bad sequence '{}'", account.sequence)))
        }
        StatusCode::NOT_FOUND => Err(NetworkError::AccountNotFound(account_id.to_string())),
        s => Err(NetworkError::Transport(format!("horizon returned {}", s))),
    }
}

fn parse_status(status: StatusCode, body: &str) -> Result<ExternalTxStatus, NetworkError> {
    match status {
        StatusCode::OK => {
            let tx: TransactionResponse = serde_json::from_str(body)
                .map_err(|e| NetworkError::Protocol(format!("transaction response: {}", e)))?;
            Ok(if tx.successful {
                ExternalTxStatus::Confirmed { ledger: tx.ledger }
            } else {
                ExternalTxStatus::Failed { ledger: tx.ledger }
            })
        }
        StatusCode::NOT_FOUND => Ok(ExternalTxStatus::NotFound),
        s => Err(NetworkError::Transport(format!("horizon returned {}", s))),
    }
}

#[async_trait]
impl NetworkClient for HorizonClient {
    async fn submit(&self, envelope: &SignedEnvelope) -> Result<SubmitOutcome, NetworkError> {
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("tx", &envelope.xdr)
            .finish();
        let timeout_ms = self.timeout_duration.as_millis() as u64;

        let mut last_error = None;
        for (i, base) in self.endpoints()?.iter().enumerate() {
            let request = self
                .http
                .post(format!("{}/transactions", base))
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(form.clone());
            match self.send(request).await {
                Ok((status, body)) => {
                    let outcome = parse_submit(status, &body, timeout_ms);
                    tracing::debug!(tx_hash = %envelope.hash, endpoint_idx = i, status = %status, "Horizon submit answered");
                    return outcome;
                }
                Err(Attempt::Unreachable(e)) => {
                    tracing::warn!(endpoint_idx = i, error = %e, "Horizon unreachable, trying next endpoint");
                    last_error = Some(e);
                }
                Err(Attempt::Failed(e)) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| NetworkError::Transport("no horizon endpoints".to_string())))
    }

    async fn get_account_sequence(&self, account_id: &str) -> Result<u64, NetworkError> {
        let (status, body) = self.query(&format!("/accounts/{}", account_id)).await?;
        parse_sequence(account_id, status, &body)
    }

    async fn get_transaction_status(&self, hash: &str) -> Result<ExternalTxStatus, NetworkError> {
        let (status, body) = self.query(&format!("/transactions/{}", hash)).await?;
        parse_status(status, &body)
    }
}

impl std::fmt::Debug for HorizonClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HorizonClient")
            .field("failover_urls", &self.failover_urls)
            .field("timeout_secs", &self.timeout_duration.as_secs())
            .finish()
    }
}
