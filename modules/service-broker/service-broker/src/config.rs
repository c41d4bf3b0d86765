//! Service broker module configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Service broker module configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceBrokerConfig {
    // === Async Polling ===
    /// Interval between last-operation polls for a freshly accepted operation.
    #[serde(with = "humantime_serde")]
    pub default_async_poll_interval: Duration,
    /// Upper bound for the poll interval once backoff kicks in.
    #[serde(with = "humantime_serde")]
    pub max_async_poll_interval: Duration,
    /// How long an operation may stay `in progress` before it is failed.
    #[serde(with = "humantime_serde")]
    pub max_async_poll_duration: Duration,
    /// Growth of the poll interval between attempts.
    pub poll_backoff: PollBackoff,

    // === Broker Calls ===
    /// Bound on every unbind, deprovision and last-operation call.
    #[serde(with = "humantime_serde")]
    pub broker_timeout: Duration,
    /// Default for `accepts_incomplete` when the caller does not set it.
    pub accepts_incomplete: bool,
    /// What a batch deletion does after a broker call times out.
    pub on_broker_timeout: TimeoutPolicy,
    pub broker_client: BrokerClientConfig,

    // === Background Jobs ===
    pub orphan_mitigation: OrphanMitigationConfig,
    pub job_runner: JobRunnerConfig,
}

impl Default for ServiceBrokerConfig {
    fn default() -> Self {
        Self {
            default_async_poll_interval: Duration::from_secs(60),
            max_async_poll_interval: Duration::from_secs(24 * 60 * 60),
            max_async_poll_duration: Duration::from_secs(7 * 24 * 60 * 60),
            poll_backoff: PollBackoff::Fixed,
            broker_timeout: Duration::from_secs(60),
            accepts_incomplete: false,
            on_broker_timeout: TimeoutPolicy::Abort,
            broker_client: BrokerClientConfig::default(),
            orphan_mitigation: OrphanMitigationConfig::default(),
            job_runner: JobRunnerConfig::default(),
        }
    }
}

/// Poll interval growth strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum PollBackoff {
    /// Every poll waits the job's poll interval.
    #[default]
    Fixed,
    /// The interval is multiplied by `multiplier` after every poll.
    Exponential { multiplier: u32 },
}

impl PollBackoff {
    /// Delay before poll number `attempt` (0-based), never above `max`.
    #[must_use]
    pub fn delay(self, base: Duration, attempt: u32, max: Duration) -> Duration {
        let delay = match self {
            Self::Fixed => base,
            Self::Exponential { multiplier } => {
                base.saturating_mul(multiplier.max(1).saturating_pow(attempt))
            }
        };
        delay.min(max)
    }
}

/// Behaviour of a batch deletion after a broker timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Stop the batch and return the timeout to the caller.
    #[default]
    Abort,
    /// Record the timeout in the error list and go on with the next instance.
    Continue,
}

/// HTTP broker client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerClientConfig {
    /// Value of the `X-Broker-API-Version` header.
    pub api_version: String,
    /// Idle connections kept per broker host.
    pub pool_max_idle_per_host: usize,
}

impl Default for BrokerClientConfig {
    fn default() -> Self {
        Self {
            api_version: "2.15".to_owned(),
            pool_max_idle_per_host: 10,
        }
    }
}

/// Retried unbinds for bindings whose unbind outcome is unknown.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrphanMitigationConfig {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for OrphanMitigationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobRunnerConfig {
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Maximum jobs taken per tick.
    pub batch_size: usize,
    /// Delay before retrying a job that failed on local storage.
    #[serde(with = "humantime_serde")]
    pub failure_retry_delay: Duration,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            batch_size: 50,
            failure_retry_delay: Duration::from_secs(30),
        }
    }
}
