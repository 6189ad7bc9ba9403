//! Configuration for applications and template parsing.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Action delimiters recognized by the template lexer.
///
/// Component libraries that generate templates embedded in other `{{ }}`
/// templating systems can switch to `[[ ]]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delimiters {
    /// Standard `{{ }}` delimiters.
    #[default]
    Curly,
    /// `[[ ]]` delimiters for component-scope templates.
    Square,
}

impl Delimiters {
    pub(crate) fn pair(self) -> (&'static str, &'static str) {
        match self {
            Delimiters::Curly => ("{{", "}}"),
            Delimiters::Square => ("[[", "]]"),
        }
    }
}

/// Configuration options for an [`Application`](crate::Application).
///
/// Example `livetemplate.toml`:
/// ```toml
/// max_memory_mb = 64
/// metrics_enabled = true
/// session_ttl_secs = 1800
/// max_pages = 1000
/// delimiters = "curly"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Soft cap on the application's resident page state, in megabytes.
    pub max_memory_mb: Option<u64>,
    /// Whether per-application counters are maintained.
    pub metrics_enabled: bool,
    /// Idle duration after which a session is evicted, in seconds.
    pub session_ttl_secs: u64,
    /// Optional hard cap on pages per application.
    pub max_pages: Option<usize>,
    /// Template action delimiters.
    pub delimiters: Delimiters,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_memory_mb: None,
            metrics_enabled: false,
            session_ttl_secs: 3600,
            max_pages: None,
            delimiters: Delimiters::Curly,
        }
    }
}

impl Options {
    /// Load options from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Set the memory cap in megabytes.
    pub fn with_max_memory_mb(mut self, mb: u64) -> Self {
        self.max_memory_mb = Some(mb);
        self
    }

    /// Enable or disable per-application counters.
    pub fn with_metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// Set the session idle TTL.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl_secs = ttl.as_secs();
        self
    }

    /// Set the hard cap on pages.
    pub fn with_max_pages(mut self, max: usize) -> Self {
        self.max_pages = Some(max);
        self
    }

    /// Set the template action delimiters.
    pub fn with_delimiters(mut self, delimiters: Delimiters) -> Self {
        self.delimiters = delimiters;
        self
    }

    /// The session idle TTL as a [`Duration`].
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// The memory cap in bytes, if configured.
    pub(crate) fn max_memory_bytes(&self) -> Option<u64> {
        self.max_memory_mb.map(|mb| mb * 1024 * 1024)
    }
}
