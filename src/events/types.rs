//! Inbound ledger events and outbound lifecycle events.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::unix_millis;

/// Direction of an internal balance movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Funds enter the internal account; mirrored as funding → linked account.
    Deposit,
    /// Funds leave the internal account; mirrored as linked → funding account.
    Withdrawal,
}

/// A deposit or withdrawal emitted by the internal ledger.
///
/// Delivery is at-least-once; `event_id` is the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEvent {
    pub event_id: String,
    pub internal_account_id: String,
    /// Amount in the asset's smallest unit.
    pub amount: i64,
    pub asset: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleKind {
    Initialize,
    PutConfig,
    PaymentSettled,
    PaymentFailed,
    ReconciliationRequired,
}

impl LifecycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleKind::Initialize => "INITIALIZE",
            LifecycleKind::PutConfig => "PUT_CONFIG",
            LifecycleKind::PaymentSettled => "PAYMENT_SETTLED",
            LifecycleKind::PaymentFailed => "PAYMENT_FAILED",
            LifecycleKind::ReconciliationRequired => "RECONCILIATION_REQUIRED",
        }
    }
}

impl fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bridge lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    /// Identifier of the entity the event is about: application version,
    /// configuration version, internal event id or external account id.
    pub subject: String,
    /// Unix milliseconds.
    pub emitted_at: u64,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleKind, subject: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            emitted_at: unix_millis(),
        }
    }

    pub fn initialize(app_version: &str) -> Self {
        Self::new(LifecycleKind::Initialize, app_version)
    }

    pub fn put_config(version: u64) -> Self {
        Self::new(LifecycleKind::PutConfig, version.to_string())
    }

    pub fn payment_settled(event_id: &str) -> Self {
        Self::new(LifecycleKind::PaymentSettled, event_id)
    }

    pub fn payment_failed(event_id: &str) -> Self {
        Self::new(LifecycleKind::PaymentFailed, event_id)
    }

    pub fn reconciliation_required(external_account_id: &str) -> Self {
        Self::new(LifecycleKind::ReconciliationRequired, external_account_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_event_wire_format() {
        let event: LedgerEvent = serde_json::from_str(
            r#"{"eventId":"e1","internalAccountId":"A1","amount":100,"asset":"USD","direction":"DEPOSIT"}"#,
        )
        .unwrap();
        assert_eq!(event.event_id, "e1");
        assert_eq!(event.direction, Direction::Deposit);
        assert!(serde_json::to_string(&event).unwrap().contains("\"internalAccountId\":\"A1\""));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(LifecycleKind::PutConfig.to_string(), "PUT_CONFIG");
        assert_eq!(
            serde_json::to_string(&LifecycleKind::PaymentSettled).unwrap(),
            "\"PAYMENT_SETTLED\""
        );
        assert_eq!(LifecycleEvent::put_config(3).subject, "3");
    }
}
