//! Caller-supplied deadlines for long-running operations
//!
//! A deadline that passes drops the wrapped future. Dropping a future that
//! holds an open `Transaction` rolls the transaction back.

use std::future::Future;
use std::time::Instant;

use crate::{Error, Result};

/// Run `fut` to completion, or fail with `Error::Timeout` once `deadline` passes
pub async fn with_deadline<T, F>(deadline: Option<Instant>, operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        None => fut.await,
        Some(at) => match tokio::time::timeout_at(at.into(), fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("{} exceeded its deadline", operation);
                Err(Error::Timeout { operation })
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_no_deadline_runs_to_completion() {
        let out = with_deadline(None, "op", async { Ok(7) }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn test_elapsed_deadline_times_out() {
        let deadline = Instant::now() + Duration::from_millis(10);
        let result: Result<()> = with_deadline(Some(deadline), "slow_op", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout { operation: "slow_op" })));
    }
}
