//! nlcmd Configuration
//!
//! Loaded from a TOML file. Every field has a default, so a missing file or
//! a partial one is fine. Lookup order: explicit path, then `$NLCMD_CONFIG`,
//! then built-in defaults.
//!
//! ```toml
//! [router]
//! confidence_threshold = 0.8
//! planner_timeout_ms = 15000
//!
//! [router.direct_intents]
//! list_containers = "docker.ps"
//!
//! [executor]
//! failure_policy = "continue"
//! item_failure_policy = "continue_items"
//!
//! [policy]
//! denied_actions = ["shell.remove_files"]
//! max_risk = "medium"
//! ```

use crate::executor::{FailurePolicy, ItemFailurePolicy};
use crate::llm_client::LlmConfig;
use crate::schema::ActionRisk;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "NLCMD_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub planner: LlmConfig,

    #[serde(default)]
    pub log: LogConfig,
}

impl EngineConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from the explicit path, else `$NLCMD_CONFIG`, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match std::env::var_os(CONFIG_ENV) {
            Some(env_path) if !env_path.is_empty() => Self::load(&PathBuf::from(env_path)),
            _ => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ============================================================================
// Router
// ============================================================================

/// Decision router settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Minimum classifier confidence for the direct path (valid: 0.0-1.0)
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Budget for one planner call in milliseconds (valid: 100-300000)
    #[serde(default = "default_planner_timeout_ms")]
    pub planner_timeout_ms: u64,

    /// Intents that map to exactly one action
    #[serde(default = "default_direct_intents")]
    pub direct_intents: BTreeMap<String, String>,
}

fn default_confidence_threshold() -> f64 {
    0.75
}

fn default_planner_timeout_ms() -> u64 {
    20_000
}

fn default_direct_intents() -> BTreeMap<String, String> {
    [
        ("find_files", "shell.find_files"),
        ("count_matches", "shell.count_matches"),
        ("query_table", "sql.select"),
        ("list_containers", "docker.ps"),
        ("container_logs", "docker.logs"),
        ("get_resources", "kubectl.get"),
    ]
    .into_iter()
    .map(|(intent, action)| (intent.to_string(), action.to_string()))
    .collect()
}

impl RouterConfig {
    pub fn effective_threshold(&self) -> f64 {
        if self.confidence_threshold.is_nan() {
            return default_confidence_threshold();
        }
        self.confidence_threshold.clamp(0.0, 1.0)
    }

    pub fn planner_timeout(&self) -> Duration {
        Duration::from_millis(self.planner_timeout_ms.clamp(100, 300_000))
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            planner_timeout_ms: default_planner_timeout_ms(),
            direct_intents: default_direct_intents(),
        }
    }
}

// ============================================================================
// Executor and Policy
// ============================================================================

/// Plan executor failure handling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Plan-wide default; a step's `on_error` overrides it
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// What a failing `foreach` item does to the rest of its step
    #[serde(default)]
    pub item_failure_policy: ItemFailurePolicy,
}

/// Safety policy enforced by the validator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Actions that may never appear in a plan
    #[serde(default)]
    pub denied_actions: Vec<String>,

    /// Highest risk an action may carry
    #[serde(default = "default_max_risk")]
    pub max_risk: ActionRisk,

    /// Longest plan accepted
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

fn default_max_risk() -> ActionRisk {
    ActionRisk::Medium
}

fn default_max_steps() -> usize {
    32
}

impl PolicyConfig {
    pub fn is_denied(&self, action: &str) -> bool {
        self.denied_actions.iter().any(|a| a == action)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            denied_actions: Vec::new(),
            max_risk: default_max_risk(),
            max_steps: default_max_steps(),
        }
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
