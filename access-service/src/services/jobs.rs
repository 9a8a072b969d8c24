//! Fire-and-forget side effects with a fixed retry policy.

use crate::config::JobsConfig;
use crate::services::metrics::BACKGROUND_JOBS_TOTAL;
use backoff::backoff::Backoff;
use backoff::future::retry;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Constant delay between attempts, bounded number of retries after the
/// first attempt.
#[derive(Debug, Clone)]
pub struct FixedRetry {
    delay: Duration,
    max_retries: u32,
    retries: u32,
}

impl FixedRetry {
    pub fn new(delay: Duration, max_retries: u32) -> Self {
        Self {
            delay,
            max_retries,
            retries: 0,
        }
    }
}

impl Backoff for FixedRetry {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries >= self.max_retries {
            return None;
        }
        self.retries += 1;
        Some(self.delay)
    }

    fn reset(&mut self) {
        self.retries = 0;
    }
}

#[derive(Clone)]
pub struct BackgroundJobs {
    delay: Duration,
    max_retries: u32,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundJobs {
    pub fn new(config: &JobsConfig) -> Self {
        Self::with_policy(
            Duration::from_secs(config.retry_delay_seconds),
            config.max_retries,
        )
    }

    pub fn with_policy(delay: Duration, max_retries: u32) -> Self {
        Self {
            delay,
            max_retries,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Run `task` on the runtime, retrying failures. Never blocks the caller
    /// and never reports back to it.
    pub fn spawn<F, Fut>(&self, job: &'static str, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let policy = FixedRetry::new(self.delay, self.max_retries);

        let handle = tokio::spawn(async move {
            let result = retry(policy, || {
                let attempt = task();
                async move {
                    attempt.await.map_err(|e| {
                        tracing::warn!(job = job, error = %e, "Background job attempt failed");
                        backoff::Error::transient(e)
                    })
                }
            })
            .await;

            match result {
                Ok(()) => {
                    BACKGROUND_JOBS_TOTAL
                        .with_label_values(&[job, "succeeded"])
                        .inc();
                    tracing::debug!(job = job, "Background job completed");
                }
                Err(e) => {
                    BACKGROUND_JOBS_TOTAL.with_label_values(&[job, "failed"]).inc();
                    tracing::error!(job = job, error = %e, "Background job gave up after retries");
                }
            }
        });

        match self.pending.lock() {
            Ok(mut pending) => {
                pending.retain(|h| !h.is_finished());
                pending.push(handle);
            }
            Err(e) => tracing::error!(error = %e, "Background job registry poisoned"),
        }
    }

    /// Wait for every job spawned so far to finish.
    pub async fn drain(&self) {
        let handles: Vec<JoinHandle<()>> = match self.pending.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(e) => {
                tracing::error!(error = %e, "Background job registry poisoned");
                return;
            }
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background job panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_fixed_retry_policy() {
        let mut policy = FixedRetry::new(Duration::from_secs(30), 3);
        assert_eq!(policy.next_backoff(), Some(Duration::from_secs(30)));
        assert_eq!(policy.next_backoff(), Some(Duration::from_secs(30)));
        assert_eq!(policy.next_backoff(), Some(Duration::from_secs(30)));
        assert_eq!(policy.next_backoff(), None);
        policy.reset();
        assert!(policy.next_backoff().is_some());
    }

    #[tokio::test]
    async fn test_failing_job_is_retried_three_times() {
        let jobs = BackgroundJobs::with_policy(Duration::ZERO, 3);
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        jobs.spawn("always_fails", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("smtp down"))
            }
        });
        jobs.drain().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_job_stops_after_success() {
        let jobs = BackgroundJobs::with_policy(Duration::ZERO, 3);
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        jobs.spawn("flaky", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(anyhow::anyhow!("first attempt fails"))
                } else {
                    Ok(())
                }
            }
        });
        jobs.drain().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
