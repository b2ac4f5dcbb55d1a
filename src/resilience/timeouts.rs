//! Timeout enforcement.
//!
//! Timeouts surface as [`ProxyError::Timeout`] naming the phase that stalled,
//! so they stay distinct from I/O failures in logs.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProxyError, Result};

/// Run `fut` with a deadline.
///
/// A zero `limit` disables the deadline.
pub async fn deadline<F, T>(phase: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if limit.is_zero() {
        return fut.await;
    }
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProxyError::Timeout(phase)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_deadline_names_phase() {
        let result: Result<()> = deadline("client read", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ProxyError::Timeout("client read"))));
    }

    #[tokio::test]
    async fn zero_limit_waits_forever() {
        let value = deadline("upstream", Duration::ZERO, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
