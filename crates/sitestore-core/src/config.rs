//! Store configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default timeout applied to every blob store call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of retries for idempotent reads.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first read retry; doubled on each attempt.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Default number of dependent rows rewritten or deleted concurrently.
pub const DEFAULT_FANOUT_CONCURRENCY: usize = 8;

/// Maximum cascade depth to prevent runaway recursion.
pub const DEFAULT_MAX_CASCADE_DEPTH: usize = 100;

/// How far a `cascade` delete policy reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeMode {
    /// Delete direct dependents only; their own dependents are not examined.
    Flat,
    /// Chase dependents of cascaded rows, planning every level before any
    /// mutation.
    Recursive {
        /// Deepest level followed before failing.
        max_depth: usize,
    },
}

impl Default for CascadeMode {
    fn default() -> Self {
        CascadeMode::Flat
    }
}

/// Retry behavior for idempotent blob reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (zero based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Configuration for a [`Database`](crate::Database).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Timeout applied to each blob store call.
    pub request_timeout: Duration,

    /// Retry policy for reads.
    pub retry: RetryPolicy,

    /// Cascade reach on delete.
    pub cascade_mode: CascadeMode,

    /// Concurrent dependent-row operations during delete fan-out.
    pub fanout_concurrency: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
            cascade_mode: CascadeMode::default(),
            fanout_concurrency: DEFAULT_FANOUT_CONCURRENCY,
        }
    }
}

impl StoreConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-call timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the read retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Follow cascades through every level, up to `max_depth`.
    pub fn with_recursive_cascade(mut self, max_depth: usize) -> Self {
        self.cascade_mode = CascadeMode::Recursive { max_depth };
        self
    }

    /// Set the cascade mode.
    pub fn with_cascade_mode(mut self, mode: CascadeMode) -> Self {
        self.cascade_mode = mode;
        self
    }

    /// Set the fan-out concurrency (at least one).
    pub fn with_fanout_concurrency(mut self, concurrency: usize) -> Self {
        self.fanout_concurrency = concurrency.max(1);
        self
    }
}

/// Where documents are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Process-local memory; lost on exit.
    Memory,
    /// Directory on the local filesystem.
    Local(PathBuf),
    /// S3 bucket; credentials and region come from the standard AWS
    /// environment variables.
    S3 {
        /// Bucket name.
        bucket: String,
    },
}

/// Blob backend plus the namespace every key is placed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Storage backend.
    pub backend: Backend,
    /// Optional key prefix isolating this deployment inside the backend.
    pub namespace: Option<String>,
}

impl BackendConfig {
    /// In-memory backend without a namespace.
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory,
            namespace: None,
        }
    }

    /// Local filesystem backend rooted at `path`.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Local(path.into()),
            namespace: None,
        }
    }

    /// S3 backend for `bucket`.
    pub fn s3(bucket: impl Into<String>) -> Self {
        Self {
            backend: Backend::S3 {
                bucket: bucket.into(),
            },
            namespace: None,
        }
    }

    /// Place all keys under `namespace`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}
