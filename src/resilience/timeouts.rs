//! Deadline enforcement for network calls.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - An elapsed deadline becomes `NetworkError::Timeout`, distinct from
//!   transport errors; for a submission both mean "outcome unknown"

use std::future::Future;
use std::time::Duration;

use crate::network::NetworkError;

/// Run `fut` with a deadline.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, NetworkError>
where
    F: Future<Output = Result<T, NetworkError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(NetworkError::Timeout(deadline.as_millis() as u64)),
    }
}
