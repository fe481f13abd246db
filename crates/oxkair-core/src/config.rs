use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OxkairError, Result};
use crate::types::{FailurePolicy, Severity};

/// Top-level Oxkair configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    /// Scripted pipeline definition used by the CLI.
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Whole-run deadline in seconds. None = no deadline.
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
    /// Upper bound on concurrently running pathways. None or 0 = unbounded.
    #[serde(default)]
    pub max_concurrent_pathways: Option<usize>,
    /// Capacity of the progress broadcast channel.
    #[serde(default = "default_progress_capacity")]
    pub progress_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            run_timeout_secs: None,
            max_concurrent_pathways: None,
            progress_capacity: default_progress_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Effective pathway concurrency limit.
    pub fn concurrency_limit(&self) -> Option<usize> {
        self.max_concurrent_pathways.filter(|n| *n > 0)
    }
}

fn default_progress_capacity() -> usize { 256 }

/// One scripted agent in a pipeline file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    pub produces: String,
    #[serde(default)]
    pub requires: Vec<String>,
    /// Value the agent writes to its step. Defaults to a small summary object.
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    /// Simulated latency.
    #[serde(default)]
    pub delay_ms: u64,
    /// Make the agent fail with this severity.
    #[serde(default)]
    pub fail: Option<Severity>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub evidence: Vec<String>,
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| OxkairError::ConfigNotFound(path.display().to_string()))?;

        Self::parse(&content)
    }

    /// Parse config text, expanding `${ENV_VAR}` references first.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);

        toml::from_str(&expanded).map_err(|e| OxkairError::Config(e.to_string()))
    }
}

fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}
