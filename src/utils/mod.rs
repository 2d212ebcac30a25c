use backon::{ConstantBuilder, Retryable};
use std::future::Future;
use std::time::Duration;

/// Generate a unique connection ID
pub fn generate_connection_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let random = rand::random::<u32>();
    format!("conn_{timestamp:x}_{random:x}")
}

/// Format duration in a human-readable way
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs == 0 {
        format!("{millis}ms")
    } else if total_secs < 60 {
        format!("{total_secs}.{millis:03}s")
    } else if total_secs < 3600 {
        let minutes = total_secs / 60;
        let seconds = total_secs % 60;
        format!("{minutes}m {seconds}s")
    } else {
        let hours = total_secs / 3600;
        let minutes = (total_secs % 3600) / 60;
        let seconds = total_secs % 60;
        format!("{hours}h {minutes}m {seconds}s")
    }
}

/// A fixed-delay retry policy for operations that may fail transiently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: usize,
    /// Pause between attempts
    pub delay: Duration,
    /// Randomize each pause between zero and `delay` on top of it
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    fn backoff(&self) -> ConstantBuilder {
        let builder = ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(self.max_attempts.saturating_sub(1));
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// Run `op` until it succeeds or the attempts run out
    ///
    /// `notify` sees every failure that is followed by another attempt,
    /// together with the pause before it.
    pub async fn run<T, E, F, Fut, N>(&self, op: F, notify: N) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        N: FnMut(&E, Duration),
    {
        op.retry(self.backoff()).notify(notify).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(5_042)), "5.042s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "1h 2m 5s");
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let first = generate_connection_id();
        let second = generate_connection_id();
        assert!(first.starts_with("conn_"));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_retry_stops_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let mut notified = 0;
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result: Result<(), String> = policy
            .run(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("refused".to_string())
                },
                |_, _| notified += 1,
            )
            .await;
        assert_eq!(result.unwrap_err(), "refused");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(notified, 2);
    }

    #[tokio::test]
    async fn test_retry_returns_first_success() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1)).with_jitter(true);
        let result: Result<usize, String> = policy
            .run(
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 2 { Err("not yet".to_string()) } else { Ok(n) }
                },
                |_, _| {},
            )
            .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_single_attempt_does_not_retry() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(1, Duration::from_secs(60));
        let result: Result<(), String> = policy
            .run(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("down".to_string())
                },
                |_, _| {},
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
