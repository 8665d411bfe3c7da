//! Configuration management

use std::collections::{HashMap, HashSet};
use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::scanner::ContentScanner;
use crate::violation::DEFAULT_LEDGER_CAPACITY;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WardenConfig {
    /// Environment files to load before the environment merge.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Deployment-wide default security policy.
    pub policy: SecurityPolicy,
    /// Per-server policy overrides, keyed by server id. An override is a
    /// complete policy: fields left unset take the built-in defaults, not the
    /// deployment policy's values.
    pub servers: HashMap<String, SecurityPolicy>,
    /// Violation ledger configuration.
    pub ledger: LedgerConfig,
}

/// Security policy for one server (or the deployment default).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    /// Tool names that are always denied. Wins over `allowed_tools`.
    pub blocked_tools: HashSet<String>,
    /// When non-empty, only these tool names are permitted
    /// (deny-by-omission). Empty means no allowlist restriction.
    pub allowed_tools: HashSet<String>,
    /// Calls admitted per server inside the trailing 60-second window.
    pub max_calls_per_minute: u32,
    /// Calls in flight per server at any instant.
    pub max_concurrent_calls: u32,
    /// Input payload ceiling in canonical-JSON bytes.
    pub max_input_size_bytes: usize,
    /// Output payload ceiling in canonical-JSON bytes.
    pub max_output_size_bytes: usize,
    /// Scan tool descriptions for hidden-instruction indicators.
    pub detect_tool_poisoning: bool,
    /// Additional detection regexes, compiled case-insensitive.
    pub custom_detection_patterns: Vec<String>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            blocked_tools: HashSet::new(),
            allowed_tools: HashSet::new(),
            max_calls_per_minute: 100,
            max_concurrent_calls: 10,
            max_input_size_bytes: 1024 * 1024,
            max_output_size_bytes: 10 * 1024 * 1024,
            detect_tool_poisoning: true,
            custom_detection_patterns: Vec::new(),
        }
    }
}

impl SecurityPolicy {
    /// Validate limits and custom patterns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero limit and
    /// [`Error::InvalidPattern`] for a pattern that does not compile.
    pub fn validate(&self) -> Result<()> {
        if self.max_calls_per_minute == 0 {
            return Err(Error::Config("max_calls_per_minute must be at least 1".to_string()));
        }
        if self.max_concurrent_calls == 0 {
            return Err(Error::Config("max_concurrent_calls must be at least 1".to_string()));
        }
        if self.max_input_size_bytes == 0 {
            return Err(Error::Config("max_input_size_bytes must be at least 1".to_string()));
        }
        if self.max_output_size_bytes == 0 {
            return Err(Error::Config("max_output_size_bytes must be at least 1".to_string()));
        }
        // Compiling is the validation.
        ContentScanner::new(&self.custom_detection_patterns)?;
        Ok(())
    }

    /// True when `tool` is on the blocklist.
    #[must_use]
    pub fn is_blocked(&self, tool: &str) -> bool {
        self.blocked_tools.contains(tool)
    }

    /// True when the allowlist permits `tool`: either no allowlist is
    /// configured, or the tool is on it.
    #[must_use]
    pub fn allowlist_permits(&self, tool: &str) -> bool {
        self.allowed_tools.is_empty() || self.allowed_tools.contains(tool)
    }
}

/// Violation ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Maximum violations retained; oldest entries are evicted past this.
    pub capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_LEDGER_CAPACITY,
        }
    }
}

impl WardenConfig {
    /// Load configuration from file and environment.
    ///
    /// Any `env_files` named in the file are loaded into the process
    /// environment first, then `MCP_WARDEN_`-prefixed variables are merged
    /// over the file values. The result is validated before it is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut file_figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            file_figment = file_figment.merge(Yaml::file(p));
        }

        // First pass without the environment, so env_files listed in the
        // file can feed the environment merge below.
        let file_only: Self = file_figment
            .clone()
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        file_only.load_env_files();

        let config: Self = file_figment
            .merge(Env::prefixed("MCP_WARDEN_").split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Validate the ledger bound, the default policy, and every per-server
    /// override.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] listing every failure, one finding per line.
    pub fn validate(&self) -> Result<()> {
        let failures = self.validation_failures();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(failures.join("; ")))
        }
    }

    /// All validation failures, one message per finding. Empty means valid.
    #[must_use]
    pub fn validation_failures(&self) -> Vec<String> {
        let mut failures = Vec::new();

        if self.ledger.capacity == 0 {
            failures.push("ledger.capacity must be at least 1".to_string());
        }
        if let Err(e) = self.policy.validate() {
            failures.push(format!("default policy: {e}"));
        }
        for (server_id, policy) in &self.servers {
            if let Err(e) = policy.validate() {
                failures.push(format!("server '{server_id}': {e}"));
            }
        }

        failures
    }

    /// The policy in force for `server_id`: its override when one is
    /// configured, otherwise the deployment default.
    #[must_use]
    pub fn effective_policy(&self, server_id: &str) -> &SecurityPolicy {
        self.servers.get(server_id).unwrap_or(&self.policy)
    }
}

// ============================================================================
// Tests
// ============================================================================
