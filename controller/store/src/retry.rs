use crate::Result;
use std::future::Future;

pub const DEFAULT_CONFLICT_RETRIES: usize = 5;

/// Runs a read-modify-write closure, retrying version conflicts up to
/// `attempts` times. Any other error (and the final conflict) is returned to
/// the caller.
pub async fn retry_on_conflict<T, F, Fut>(attempts: usize, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Err(error) if error.is_conflict() && attempt < attempts => {
                tracing::debug!(%error, attempt, "Retrying conflicting write");
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn conflict() -> StoreError {
        StoreError::Conflict {
            kind: "Cluster",
            name: "c1".to_string(),
            expected: 1,
            found: 2,
        }
    }

    #[tokio::test]
    async fn retries_conflicts_until_success() {
        let calls = AtomicUsize::new(0);
        let value = retry_on_conflict(5, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(conflict())
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_bound() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_on_conflict(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(conflict()) }
        })
        .await;
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_conflicts_fail_fast() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_on_conflict(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::not_found("Cluster", "c1")) }
        })
        .await;
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
