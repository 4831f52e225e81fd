//! Scheduler configuration.
//!
//! Defaults match the production tuning; every knob can be overridden through
//! `STATIONHUB_*` environment variables.

use std::time::Duration;

use stationhub_core::DisplayTimezone;

const ENV_PREFIX: &str = "STATIONHUB_";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

/// Tuning for every scheduler loop, lease and marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub redis_url: String,
    /// Prefix for every coordination-store key.
    pub key_prefix: String,
    /// TTL of the leadership lease.
    pub lease_ttl: Duration,
    /// How often every instance tries to acquire or renew the lease.
    pub leadership_interval: Duration,
    /// Leader-only queue polling cadence.
    pub processor_interval: Duration,
    /// Max jobs fetched per processor tick.
    pub processor_batch_size: usize,
    /// TTL of a per-job claim lock.
    pub job_lock_ttl: Duration,
    /// TTL of the "processed" marker written after execution.
    pub processed_ttl: Duration,
    pub watchdog_interval: Duration,
    /// How overdue a job must be before the watchdog steps in.
    pub watchdog_grace: Duration,
    pub reconciler_interval: Duration,
    /// How far past a deadline a booking must be before the reconciler acts.
    pub reconcile_lag: Duration,
    pub reconcile_batch_size: usize,
    pub cleanup_interval: Duration,
    /// Jobs older than this are dropped by the cleanup sweep.
    pub stale_after: Duration,
    pub display_timezone: DisplayTimezone,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "stationhub:scheduler".to_string(),
            lease_ttl: Duration::from_secs(30),
            leadership_interval: Duration::from_secs(2),
            processor_interval: Duration::from_secs(15),
            processor_batch_size: 50,
            job_lock_ttl: Duration::from_secs(30),
            processed_ttl: Duration::from_secs(60 * 60),
            watchdog_interval: Duration::from_secs(60),
            watchdog_grace: Duration::from_secs(15),
            reconciler_interval: Duration::from_secs(30),
            reconcile_lag: Duration::from_secs(5 * 60),
            reconcile_batch_size: 100,
            cleanup_interval: Duration::from_secs(60 * 60),
            stale_after: Duration::from_secs(24 * 60 * 60),
            display_timezone: DisplayTimezone::utc(),
        }
    }
}

impl SchedulerConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup (full variable names, e.g.
    /// `STATIONHUB_LEASE_TTL_SECS`).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let d = Self::default();

        let display_timezone = match env.raw("DISPLAY_UTC_OFFSET_MINUTES") {
            Some((key, value)) => value
                .trim()
                .parse::<i32>()
                .ok()
                .and_then(|m| DisplayTimezone::from_offset_minutes(m).ok())
                .ok_or(ConfigError::Invalid { key, value })?,
            None => d.display_timezone,
        };

        let config = Self {
            redis_url: env.string("REDIS_URL").unwrap_or(d.redis_url),
            key_prefix: env.string("KEY_PREFIX").unwrap_or(d.key_prefix),
            lease_ttl: env.secs("LEASE_TTL_SECS", d.lease_ttl)?,
            leadership_interval: env.secs("LEADERSHIP_INTERVAL_SECS", d.leadership_interval)?,
            processor_interval: env.secs("PROCESSOR_INTERVAL_SECS", d.processor_interval)?,
            processor_batch_size: env.count("PROCESSOR_BATCH_SIZE", d.processor_batch_size)?,
            job_lock_ttl: env.secs("JOB_LOCK_TTL_SECS", d.job_lock_ttl)?,
            processed_ttl: env.secs("PROCESSED_TTL_SECS", d.processed_ttl)?,
            watchdog_interval: env.secs("WATCHDOG_INTERVAL_SECS", d.watchdog_interval)?,
            watchdog_grace: env.secs("WATCHDOG_GRACE_SECS", d.watchdog_grace)?,
            reconciler_interval: env.secs("RECONCILER_INTERVAL_SECS", d.reconciler_interval)?,
            reconcile_lag: env.secs("RECONCILE_LAG_SECS", d.reconcile_lag)?,
            reconcile_batch_size: env.count("RECONCILE_BATCH_SIZE", d.reconcile_batch_size)?,
            cleanup_interval: env.secs("CLEANUP_INTERVAL_SECS", d.cleanup_interval)?,
            stale_after: env.secs("STALE_AFTER_SECS", d.stale_after)?,
            display_timezone,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations under which the guarantees cannot hold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lease_ttl <= self.leadership_interval {
            return Err(ConfigError::Inconsistent(
                "lease_ttl must be longer than leadership_interval".to_string(),
            ));
        }
        if self.job_lock_ttl.is_zero() {
            return Err(ConfigError::Inconsistent("job_lock_ttl must be non-zero".to_string()));
        }
        if self.processor_batch_size == 0 || self.reconcile_batch_size == 0 {
            return Err(ConfigError::Inconsistent("batch sizes must be non-zero".to_string()));
        }
        Ok(())
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<(String, String)> {
        let key = format!("{ENV_PREFIX}{name}");
        (self.0)(&key).map(|value| (key, value))
    }

    fn string(&self, name: &str) -> Option<String> {
        self.raw(name)
            .map(|(_, v)| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn secs(&self, name: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.raw(name) {
            Some((key, value)) => value
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::Invalid { key, value }),
            None => Ok(default),
        }
    }

    fn count(&self, name: &str, default: usize) -> Result<usize, ConfigError> {
        match self.raw(name) {
            Some((key, value)) => value
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::Invalid { key, value }),
            None => Ok(default),
        }
    }
}
