//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, retry bounds ordered)
//! - Check that required bridge fields are present
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function over the parsed value
//! - Bridge values are opaque here: account ids, the endpoint URL and asset
//!   codes are checked where they are used (build and submit), and a bad
//!   value there is a configuration error that halts processing

use std::fmt;

use crate::config::schema::{BridgeConfiguration, BridgeSettings};

/// A single semantic problem with a configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Join errors for single-line display.
pub fn describe(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validate the process settings, including the optional bridge section.
pub fn validate_settings(settings: &BridgeSettings) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if settings.service.event_queue_capacity == 0 {
        errors.push(ValidationError::new("service.event_queue_capacity", "must be greater than 0"));
    }
    if settings.service.account_queue_capacity == 0 {
        errors.push(ValidationError::new("service.account_queue_capacity", "must be greater than 0"));
    }
    if settings.service.worker_idle_timeout_ms == 0 {
        errors.push(ValidationError::new("service.worker_idle_timeout_ms", "must be greater than 0"));
    }
    if settings.network.request_timeout_secs == 0 {
        errors.push(ValidationError::new("network.request_timeout_secs", "must be greater than 0"));
    }
    for (i, raw) in settings.network.failover_urls.iter().enumerate() {
        if let Err(message) = check_http_url(raw) {
            errors.push(ValidationError::new(format!("network.failover_urls[{}]", i), message));
        }
    }
    if settings.observability.metrics_enabled
        && settings
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }

    if let Some(bridge) = &settings.bridge {
        if let Err(nested) = validate_bridge_configuration(bridge) {
            errors.extend(nested.into_iter().map(|e| ValidationError {
                field: format!("bridge.{}", e.field),
                message: e.message,
            }));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a bridge configuration before it becomes a new version.
pub fn validate_bridge_configuration(config: &BridgeConfiguration) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.funding_account_identity.trim().is_empty() {
        errors.push(ValidationError::new("funding_account_identity", "must not be empty"));
    }
    if config.external_network_endpoint.trim().is_empty() {
        errors.push(ValidationError::new("external_network_endpoint", "must not be empty"));
    }
    if config.network_passphrase.is_empty() {
        errors.push(ValidationError::new("network_passphrase", "must not be empty"));
    }
    if config.poll_interval_ms == 0 {
        errors.push(ValidationError::new("poll_interval_ms", "must be greater than 0"));
    }
    if config.submission_timeout_ms == 0 {
        errors.push(ValidationError::new("submission_timeout_ms", "must be greater than 0"));
    }
    if config.base_fee == 0 {
        errors.push(ValidationError::new("base_fee", "must be greater than 0"));
    }

    let policy = &config.retry_policy;
    if policy.max_attempts == 0 {
        errors.push(ValidationError::new("retry_policy.max_attempts", "must be at least 1"));
    }
    if policy.base_delay_ms > policy.max_delay_ms {
        errors.push(ValidationError::new(
            "retry_policy.base_delay_ms",
            "must not exceed retry_policy.max_delay_ms",
        ));
    }

    for (code, issuer) in &config.assets {
        if code.trim().is_empty() {
            errors.push(ValidationError::new("assets", "asset code must not be empty"));
        }
        if issuer.trim().is_empty() {
            errors.push(ValidationError::new(format!("assets.{}", code), "issuer must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Accept only absolute http(s) URLs.
pub fn check_http_url(raw: &str) -> Result<(), String> {
    let url = url::Url::parse(raw).map_err(|e| format!("invalid URL '{}': {}", raw, e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported scheme '{}'", other)),
    }
}
