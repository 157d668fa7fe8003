//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use stellar_bridge::builder::{strkey, FundingSigner, TransactionBuilder};
use stellar_bridge::config::{BridgeConfiguration, BridgeSettings, RetryPolicy};
use stellar_bridge::events::{Direction, EventRecorder, LedgerEvent};
use stellar_bridge::lifecycle::Bridge;
use stellar_bridge::linker::DerivedAccountProvisioner;
use stellar_bridge::network::ScriptedNetwork;
use stellar_bridge::store::{BridgeStore, MemoryStore};

pub const FUNDING_SEED: [u8; 32] = [1u8; 32];
pub const ISSUER_KEY: [u8; 32] = [9u8; 32];
pub const START_SEQUENCE: u64 = 100;
pub const WAIT: Duration = Duration::from_secs(5);

pub fn funding_signer() -> Arc<FundingSigner> {
    Arc::new(FundingSigner::from_seed(&FUNDING_SEED))
}

pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay_ms: 1,
        max_delay_ms: 5,
    }
}

/// A valid configuration bridging USD, with fast retries and polling.
pub fn bridge_configuration() -> BridgeConfiguration {
    let mut configuration = BridgeConfiguration::new(funding_signer().account_id(), "https://horizon.example")
        .with_asset("USD", strkey::encode_account_id(&ISSUER_KEY));
    configuration.retry_policy = fast_policy(5);
    configuration.poll_interval_ms = 20;
    configuration.submission_timeout_ms = 1_000;
    configuration
}

pub fn settings(bridge: Option<BridgeConfiguration>) -> BridgeSettings {
    let mut settings = BridgeSettings::default();
    settings.service.authorized_users = vec!["ops".to_string()];
    settings.bridge = bridge;
    settings
}

pub fn deposit(event_id: &str, account: &str, amount: i64) -> LedgerEvent {
    LedgerEvent {
        event_id: event_id.to_string(),
        internal_account_id: account.to_string(),
        amount,
        asset: "USD".to_string(),
        direction: Direction::Deposit,
    }
}

pub fn withdrawal(event_id: &str, account: &str, amount: i64) -> LedgerEvent {
    LedgerEvent {
        direction: Direction::Withdrawal,
        ..deposit(event_id, account, amount)
    }
}

/// A fully wired bridge over a scripted network.
pub struct TestBridge {
    pub bridge: Bridge,
    pub network: Arc<ScriptedNetwork>,
    pub recorder: Arc<EventRecorder>,
}

pub fn test_bridge() -> TestBridge {
    test_bridge_with(
        settings(Some(bridge_configuration())),
        Arc::new(MemoryStore::new()),
        Arc::new(ScriptedNetwork::with_default_sequence(START_SEQUENCE)),
    )
}

pub fn test_bridge_with(
    settings: BridgeSettings,
    store: Arc<dyn BridgeStore>,
    network: Arc<ScriptedNetwork>,
) -> TestBridge {
    let recorder = Arc::new(EventRecorder::new());
    let config = Bridge::open_config(&settings, store.clone(), recorder.clone()).unwrap();
    let bridge = Bridge::assemble(
        &settings,
        store,
        config,
        network.clone(),
        recorder.clone(),
        Arc::new(TransactionBuilder::new(Some(funding_signer()))),
        Arc::new(DerivedAccountProvisioner),
    );
    TestBridge {
        bridge,
        network,
        recorder,
    }
}

/// External account the bridge derives for `internal`.
pub fn external_account(internal: &str) -> String {
    DerivedAccountProvisioner::derive(funding_signer().account_id(), internal)
}

/// One request received by the mock horizon.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Start a programmable mock horizon on an ephemeral port.
///
/// The handler sees every request and returns the status and JSON body.
pub async fn start_mock_horizon<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(MockRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_request(&mut socket).await else {
                            return;
                        };
                        let (status, body) = handler(request).await;
                        let status_text = match status {
                            200 => "200 OK",
                            400 => "400 Bad Request",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            504 => "504 Gateway Timeout",
                            _ => "200 OK",
                        };

                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<MockRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let content_length = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();

    Some(MockRequest { method, path, body })
}
