use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::AdapterPolicy;
use crate::error::{Result, VerifyError};

const BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Run an external call with a per-attempt timeout and bounded retries.
///
/// Every failed attempt is logged; the last error is returned once the
/// attempts run out.
pub async fn call_with_retry<T, F, Fut>(
    service: &'static str,
    policy: AdapterPolicy,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.retries.saturating_add(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        let error = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => VerifyError::upstream(
                service,
                format!("timed out after {}ms", policy.timeout.as_millis()),
            ),
        };

        warn!("{} attempt {}/{} failed: {}", service, attempt, attempts, error);
        last_error = Some(error);

        if attempt < attempts {
            tokio::time::sleep(BACKOFF_STEP * attempt).await;
        }
    }

    Err(last_error.unwrap_or_else(|| VerifyError::upstream(service, "no attempts made")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(retries: u32) -> AdapterPolicy {
        AdapterPolicy {
            timeout: Duration::from_millis(50),
            retries,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = call_with_retry("ocr", policy(2), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(VerifyError::upstream("ocr", "503"))
                } else {
                    Ok("text")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "text");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = call_with_retry("mail", policy(1), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(VerifyError::upstream("mail", "refused"))
            }
        })
        .await;

        assert!(matches!(result, Err(VerifyError::Upstream { service: "mail", .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let result: Result<()> = call_with_retry("blob store", policy(0), || async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(())
        })
        .await;

        match result {
            Err(VerifyError::Upstream { message, .. }) => assert!(message.contains("timed out")),
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
