//! Pipeline configuration.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Placeholder replaced by the key in a [`FallbackTemplate`].
pub const KEY_PLACEHOLDER: &str = "{key}";

/// Deterministic value used when a lookup finds no state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FallbackTemplate(String);

impl FallbackTemplate {
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        if !pattern.contains(KEY_PLACEHOLDER) {
            return Err(PipelineError::InvalidConfig(format!(
                "fallback template {:?} has no {} placeholder",
                pattern, KEY_PLACEHOLDER
            )));
        }
        Ok(Self(pattern))
    }

    /// Substitute `key` for every placeholder.
    pub fn render(&self, key: &str) -> String {
        self.0.replace(KEY_PLACEHOLDER, key)
    }

    /// Whether `value` is what this template produces for `key`.
    pub fn produced(&self, key: &str, value: &str) -> bool {
        self.render(key) == value
    }

    pub fn pattern(&self) -> &str {
        &self.0
    }
}

impl Default for FallbackTemplate {
    fn default() -> Self {
        Self("enriched-{key}".to_string())
    }
}

/// Backoff schedule for sink retries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), doubling up to the cap.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

/// Pipeline configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Identifier used in logs.
    pub pipeline_id: String,

    /// How far behind the maximum event time the watermark trails.
    pub allowed_lateness: Duration,

    /// How long superseded versions are kept behind the watermark.
    pub retention_window: Duration,

    /// Number of independent shards.
    pub shard_count: usize,

    /// Value emitted when no state exists for a lookup.
    pub fallback_template: FallbackTemplate,

    /// Also emit state updates as output events.
    pub mirror_state_updates: bool,

    /// Click records with this `eventType` are state updates.
    pub state_event_type: String,

    /// Bounded queue size between the feeder and each shard.
    pub shard_queue_capacity: usize,

    /// Bounded size of the dead-letter channel.
    pub dead_letter_capacity: usize,

    /// How long the feeder waits on an idle source before checking for stop.
    pub source_poll_interval: Duration,

    /// Sink retry schedule.
    pub sink_retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            pipeline_id: format!("pipeline_{}", secs),
            allowed_lateness: Duration::from_secs(5),
            retention_window: Duration::from_secs(60),
            shard_count: 4,
            fallback_template: FallbackTemplate::default(),
            mirror_state_updates: false,
            state_event_type: "search".to_string(),
            shard_queue_capacity: 1024,
            dead_letter_capacity: 1024,
            source_poll_interval: Duration::from_millis(100),
            sink_retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn with_allowed_lateness(mut self, lateness: Duration) -> Self {
        self.allowed_lateness = lateness;
        self
    }

    pub fn with_retention_window(mut self, retention: Duration) -> Self {
        self.retention_window = retention;
        self
    }

    pub fn with_shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count;
        self
    }

    pub fn with_fallback_template(mut self, template: FallbackTemplate) -> Self {
        self.fallback_template = template;
        self
    }

    pub fn with_mirror_state_updates(mut self, mirror: bool) -> Self {
        self.mirror_state_updates = mirror;
        self
    }

    pub fn with_sink_retry(mut self, policy: RetryPolicy) -> Self {
        self.sink_retry = policy;
        self
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(PipelineError::InvalidConfig(
                "shard_count must be positive".into(),
            ));
        }
        if self.retention_window < self.allowed_lateness {
            return Err(PipelineError::InvalidConfig(format!(
                "retention_window ({:?}) must be at least allowed_lateness ({:?})",
                self.retention_window, self.allowed_lateness
            )));
        }
        if !self.fallback_template.pattern().contains(KEY_PLACEHOLDER) {
            return Err(PipelineError::InvalidConfig(format!(
                "fallback template must contain {}",
                KEY_PLACEHOLDER
            )));
        }
        if self.shard_queue_capacity == 0 || self.dead_letter_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "queue capacities must be positive".into(),
            ));
        }
        if self.sink_retry.max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "sink_retry.max_attempts must be positive".into(),
            ));
        }
        Ok(())
    }
}
