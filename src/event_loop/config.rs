//! Event loop configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default microtask budget per checkpoint (starvation protection)
pub const DEFAULT_MICROTASK_BUDGET: usize = 10_000;

/// Default timer delay ceiling, 2^31 - 1 ms like browser hosts
pub const DEFAULT_MAX_TIMER_DELAY_MS: u64 = 2_147_483_647;

/// Configuration for [`EventLoop`](super::EventLoop).
///
/// Every field has a default, so a partial JSON document is valid:
///
/// ```
/// use deferred::EventLoopConfig;
///
/// let config = EventLoopConfig::load(r#"{ "microtask_budget": 64 }"#).unwrap();
/// assert_eq!(config.microtask_budget, 64);
/// assert!(config.track_unhandled_rejections);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLoopConfig {
    /// Maximum microtasks run in one checkpoint (0 = unlimited)
    pub microtask_budget: usize,
    /// Whether unhandled rejection reports are recorded for draining
    pub track_unhandled_rejections: bool,
    /// Timer delays above this many milliseconds are clamped to it
    pub max_timer_delay_ms: u64,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            microtask_budget: DEFAULT_MICROTASK_BUDGET,
            track_unhandled_rejections: true,
            max_timer_delay_ms: DEFAULT_MAX_TIMER_DELAY_MS,
        }
    }
}

impl EventLoopConfig {
    /// Load a configuration from a JSON string
    pub fn load(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::config_parse(format!("Failed to parse event loop config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::load(&content)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::config_parse(format!("Failed to serialize event loop config: {}", e)))
    }

    fn validate(&self) -> Result<()> {
        if self.max_timer_delay_ms == 0 {
            return Err(Error::config_invalid("max_timer_delay_ms must be positive"));
        }
        Ok(())
    }
}
