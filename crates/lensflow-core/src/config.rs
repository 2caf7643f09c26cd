//! Engine configuration loaded from JSON.
//!
//! ```json
//! {
//!   "fallback_to_default": false,
//!   "nodes": {
//!     "WriteChapters": { "max_attempts": 3, "wait_secs": 1.5 }
//!   }
//! }
//! ```
//!
//! Node entries are keyed by node id and override the retry policy the node
//! declares itself; see [`Graph::apply_config`](crate::Graph::apply_config).
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, FlowResult};
use crate::retry::RetryPolicy;

/// Retry override for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Seconds to wait between attempts
    #[serde(default)]
    pub wait_secs: f64,
}

fn default_max_attempts() -> usize {
    1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            wait_secs: 0.0,
        }
    }
}

impl RetryConfig {
    /// Validate and convert into a [`RetryPolicy`]
    pub fn to_policy(&self) -> FlowResult<RetryPolicy> {
        if !self.wait_secs.is_finite() || self.wait_secs < 0.0 {
            return Err(FlowError::Config(format!(
                "wait_secs must be a finite, non-negative number of seconds, got {}",
                self.wait_secs
            )));
        }
        Ok(RetryPolicy::new(
            self.max_attempts,
            Duration::from_secs_f64(self.wait_secs),
        ))
    }
}

/// Traversal flag plus per-node retry overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Follow the `"default"` edge when a node returns an action with no edge
    #[serde(default)]
    pub fallback_to_default: bool,
    #[serde(default)]
    pub nodes: BTreeMap<String, RetryConfig>,
}

impl FlowConfig {
    pub fn from_json_str(json: &str) -> FlowResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| FlowError::Config(format!("invalid flow configuration: {}", e)))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> FlowResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Builder-style node override
    pub fn with_node(mut self, id: impl Into<String>, retry: RetryConfig) -> Self {
        self.nodes.insert(id.into(), retry);
        self
    }

    /// Check every node entry without applying it
    pub fn validate(&self) -> FlowResult<()> {
        for retry in self.nodes.values() {
            retry.to_policy()?;
        }
        Ok(())
    }
}
