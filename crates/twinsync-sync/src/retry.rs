//! Error classification and fixed-delay retry
//!
//! Every per-task failure is sorted into an [`ErrorClass`]:
//!
//! - **Benign**: the operation is already satisfied ("already exists",
//!   "not found" on the remote side). Counted as success.
//! - **Transient**: generic I/O or network failure. Retried after a fixed
//!   delay up to a maximum number of tries.
//! - **SourceVanished**: the local source disappeared or is locked
//!   (`ENOENT`, `EPERM`, `EBUSY`). The task is abandoned and the next cycle
//!   rescans from scratch.
//! - **QuotaExceeded**: the remote account is full. Uploads park on the
//!   quota gate and retry once space returns.
//!
//! Classification downcasts to [`RemoteError`] and [`std::io::Error`] first
//! and falls back to matching the error text.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use twinsync_core::config::RetryConfig;
use twinsync_core::ports::RemoteError;

/// `EBUSY` on Linux and the BSDs
const EBUSY: i32 = 16;

/// How a failure should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Benign,
    Transient,
    SourceVanished,
    QuotaExceeded,
}

/// Classifies a port error
pub fn classify(err: &anyhow::Error) -> ErrorClass {
    for cause in err.chain() {
        if let Some(remote) = cause.downcast_ref::<RemoteError>() {
            return match remote {
                RemoteError::NotFound(_) | RemoteError::AlreadyExists(_) => ErrorClass::Benign,
                RemoteError::QuotaExceeded => ErrorClass::QuotaExceeded,
                RemoteError::Unavailable(_) => ErrorClass::Transient,
            };
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.raw_os_error() == Some(EBUSY) {
                return ErrorClass::SourceVanished;
            }
            return match io.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    ErrorClass::SourceVanished
                }
                std::io::ErrorKind::AlreadyExists => ErrorClass::Benign,
                _ => ErrorClass::Transient,
            };
        }
    }
    classify_message(&format!("{err:#}"))
}

fn classify_message(message: &str) -> ErrorClass {
    let msg = message.to_lowercase();

    if msg.contains("quota") || msg.contains("storage full") || msg.contains("no space left") {
        return ErrorClass::QuotaExceeded;
    }

    if msg.contains("permission denied")
        || msg.contains("operation not permitted")
        || msg.contains("resource busy")
        || msg.contains("eperm")
        || msg.contains("ebusy")
    {
        return ErrorClass::SourceVanished;
    }

    if msg.contains("already exists") || msg.contains("does not exist") || msg.contains("not found")
    {
        return ErrorClass::Benign;
    }

    ErrorClass::Transient
}

/// Sleep abstraction so tests can run retries without waiting
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Fixed-delay retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_tries: u32,
    pub delay: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_tries: config.max_tries.max(1),
            delay: Duration::from_millis(config.delay_ms),
        }
    }
}

/// Result of running an operation under a [`RetryPolicy`]
#[derive(Debug)]
pub enum RetryOutcome<T> {
    /// The operation succeeded
    Done(T),
    /// The operation failed with a benign error: nothing left to do
    AlreadySatisfied,
    /// The source vanished or is locked
    Vanished(anyhow::Error),
    /// The remote is out of storage
    QuotaExceeded(anyhow::Error),
    /// Transient failures used up every try
    Exhausted { tries: u32, error: anyhow::Error },
}

/// Runs `f` until it succeeds, fails non-transiently, or runs out of tries
pub async fn run_with_retry<F, Fut, T>(
    policy: RetryPolicy,
    sleeper: &dyn Sleeper,
    operation: &str,
    mut f: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_tries = policy.max_tries.max(1);
    let mut attempt = 1;
    loop {
        let err = match f().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation, attempt, "Operation succeeded after retry");
                }
                return RetryOutcome::Done(value);
            }
            Err(err) => err,
        };

        match classify(&err) {
            ErrorClass::Benign => {
                info!(operation, error = %err, "Operation already satisfied");
                return RetryOutcome::AlreadySatisfied;
            }
            ErrorClass::SourceVanished => return RetryOutcome::Vanished(err),
            ErrorClass::QuotaExceeded => return RetryOutcome::QuotaExceeded(err),
            ErrorClass::Transient if attempt >= max_tries => {
                return RetryOutcome::Exhausted {
                    tries: attempt,
                    error: err,
                };
            }
            ErrorClass::Transient => {
                warn!(
                    operation,
                    attempt,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %err,
                    "Transient error, retrying"
                );
                sleeper.sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}
