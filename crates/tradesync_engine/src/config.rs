//! Configuration for the sync engine.

use crate::context::default_client_info;
use crate::error::{SyncError, SyncResult};
use std::time::Duration;
use tradesync_storage::validate_key;

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Prefix of every storage key the engine writes.
    pub namespace: String,
    /// Retry policy for queued operations.
    pub retry: RetryConfig,
    /// Retry policy for direct delivery in [`crate::SyncEngine::submit`].
    pub submit_retry: RetryConfig,
    /// Timeout of each remote call.
    pub request_timeout: Duration,
    /// Owner recorded on operations when the input does not name one.
    pub default_owner_id: String,
    /// Client identification attached to error contexts.
    pub client_info: String,
}

impl EngineConfig {
    /// Creates a configuration for the given storage namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            retry: RetryConfig::default(),
            submit_retry: RetryConfig::new(1),
            request_timeout: Duration::from_secs(30),
            default_owner_id: String::new(),
            client_info: default_client_info(),
        }
    }

    /// Sets the retry configuration for queued operations.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the retry configuration for direct delivery.
    pub fn with_submit_retry(mut self, retry: RetryConfig) -> Self {
        self.submit_retry = retry;
        self
    }

    /// Sets the per-call timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the default owner id.
    pub fn with_default_owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.default_owner_id = owner_id.into();
        self
    }

    /// Sets the client info.
    pub fn with_client_info(mut self, client_info: impl Into<String>) -> Self {
        self.client_info = client_info.into();
        self
    }

    /// Storage key of the pending-operation document.
    pub fn queue_key(&self) -> String {
        format!("{}.queue", self.namespace)
    }

    /// Storage key of the dead-letter document.
    pub fn dead_letter_key(&self) -> String {
        format!("{}.dead_letters", self.namespace)
    }

    /// Checks that the values are usable.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] for a namespace that is empty or
    /// not usable in a storage key, a zero timeout or an invalid retry
    /// configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.namespace.is_empty() {
            return Err(SyncError::InvalidConfig("namespace is empty".into()));
        }
        for key in [self.queue_key(), self.dead_letter_key()] {
            validate_key(&key).map_err(|_| {
                SyncError::InvalidConfig(format!(
                    "namespace {:?} does not form a valid storage key",
                    self.namespace
                ))
            })?;
        }
        if self.request_timeout.is_zero() {
            return Err(SyncError::InvalidConfig("request timeout is zero".into()));
        }
        self.retry.validate()?;
        self.submit_retry.validate()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("tradesync")
    }
}

/// Configuration for retry behavior.
///
/// `max_retries` counts retries, not invocations: a unit of work is tried
/// at most `max_retries + 1` times.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first failure.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_factor: f64,
    /// Upper bound of a computed delay, before jitter.
    pub max_delay: Duration,
    /// Whether to add random jitter in `[0, delay/2)`.
    pub jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            backoff_factor: 1.0,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the backoff factor.
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Checks that the values are usable.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if the backoff factor is not a
    /// finite number `>= 1.0`, or if `max_delay` is too large to express in
    /// floating-point seconds.
    pub fn validate(&self) -> SyncResult<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(SyncError::InvalidConfig(format!(
                "backoff factor must be >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        if Duration::try_from_secs_f64(self.max_delay.as_secs_f64()).is_err() {
            return Err(SyncError::InvalidConfig(format!(
                "max delay {:?} is out of range",
                self.max_delay
            )));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
