//! Retry budget and classification.
//!
//! # Design Decisions
//! - Only transient network failures and sequence conflicts are retried
//! - Definitive rejections are never retried; resubmitting cannot succeed
//! - The attempt budget counts submissions, including the first

use crate::config::RetryPolicy;
use crate::network::{NetworkError, RejectionReason};

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resubmit the same envelope.
    Resubmit,
    /// Refresh the sequence and rebuild before resubmitting.
    Rebuild,
    /// Stop; the failure is final.
    GiveUp,
}

/// Classify a definitive rejection.
pub fn classify_rejection(reason: &RejectionReason) -> RetryDecision {
    if reason.is_sequence_conflict() {
        RetryDecision::Rebuild
    } else {
        RetryDecision::GiveUp
    }
}

/// Transport failures are retryable. A missing account or an unusable
/// endpoint is not fixed by retrying.
pub fn is_retryable(error: &NetworkError) -> bool {
    !matches!(error, NetworkError::AccountNotFound(_) | NetworkError::Configuration(_))
}

/// Whether another attempt fits in the budget after `attempts` submissions.
pub fn has_budget(policy: &RetryPolicy, attempts: u32) -> bool {
    attempts < policy.max_attempts
}
