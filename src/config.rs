//! Execution configuration
//!
//! Loaded from a JSON file. Every field is optional and falls back to its
//! default; the loaded values are validated before use.
//!
//! ```json
//! {
//!   "quantum": 100,
//!   "log_level": "info",
//!   "verify_page_checksums": true
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::executor::{ExecError, ExecResult};
use crate::observability::{log_event_with_fields, Event, Logger, Severity};

/// Execution settings shared by every request of an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Record fetches between cooperative yields (default 100)
    #[serde(default = "default_quantum")]
    pub quantum: u32,

    /// Minimum log severity (default "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Validate index page checksums on fetch (default true)
    #[serde(default = "default_verify_page_checksums")]
    pub verify_page_checksums: bool,
}

fn default_quantum() -> u32 {
    100
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_verify_page_checksums() -> bool {
    true
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            quantum: default_quantum(),
            log_level: default_log_level(),
            verify_page_checksums: default_verify_page_checksums(),
        }
    }
}

impl ExecConfig {
    /// Loads and validates configuration from a file
    pub fn load(path: &Path) -> ExecResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| ExecError::config_invalid(format!("Failed to read config: {}", e)))?;

        let config = Self::from_json(&content)?;
        log_event_with_fields(
            Event::ConfigLoaded,
            &[
                ("path", path.display().to_string().as_str()),
                ("quantum", config.quantum.to_string().as_str()),
            ],
        );
        Ok(config)
    }

    /// Parses and validates configuration from JSON text
    pub fn from_json(content: &str) -> ExecResult<Self> {
        let config: ExecConfig = serde_json::from_str(content)
            .map_err(|e| ExecError::config_invalid(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validates field values
    pub fn validate(&self) -> ExecResult<()> {
        if self.quantum == 0 {
            return Err(ExecError::config_invalid("quantum must be > 0"));
        }

        if Severity::parse(&self.log_level).is_none() {
            return Err(ExecError::config_invalid(format!(
                "Invalid log_level: '{}'. Expected trace, info, warn, error or fatal.",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Minimum log severity named by `log_level`
    pub fn min_severity(&self) -> Severity {
        Severity::parse(&self.log_level).unwrap_or(Severity::Info)
    }

    /// Applies the configured log level to the process-wide logger
    pub fn apply_logging(&self) {
        Logger::set_min_severity(self.min_severity());
    }
}
