//! Configuration data structures for sluice.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and
//! carry defaults so that a minimal config stays short.
use std::{collections::HashMap, sync::Arc};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

/// Filter settings shared by every event loop; swapped atomically on reload.
pub type SharedSettings = Arc<ArcSwap<FilterSettings>>;

fn default_event_loops() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_exchange_timeout_secs() -> u64 {
    30
}

/// Top-level server configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Address to accept connections on, e.g. "127.0.0.1:8080"
    pub listen_addr: String,

    /// Number of single-threaded event loops serving connections
    #[serde(default = "default_event_loops")]
    pub event_loops: usize,

    /// Time after which an unanswered exchange is cancelled
    #[serde(default = "default_exchange_timeout_secs")]
    pub exchange_timeout_secs: u64,

    /// Engine tuning
    #[serde(default)]
    pub filters: FilterSettings,

    /// Path prefix -> endpoint filter name
    #[serde(default)]
    pub routes: HashMap<String, String>,

    /// Headers added to every response
    #[serde(default)]
    pub response_headers: HashMap<String, String>,

    /// Names of built-in filters that are administratively disabled
    #[serde(default)]
    pub disabled_filters: Vec<String>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Fresh shared handle over a copy of the filter settings.
    pub fn shared_filter_settings(&self) -> SharedSettings {
        Arc::new(ArcSwap::from_pointee(self.filters.clone()))
    }

    pub fn is_filter_disabled(&self, name: &str) -> bool {
        self.disabled_filters.iter().any(|n| n == name)
    }
}

fn default_excessive_exec_time_ms() -> u64 {
    500
}

fn default_error_endpoint() -> String {
    "endpoint.ErrorResponse".to_string()
}

fn default_concurrency_limit() -> usize {
    4000
}

fn default_true() -> bool {
    true
}

/// Knobs read by the filter engine on every invocation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FilterSettings {
    /// Filters running at least this long are reported to metrics
    #[serde(default = "default_excessive_exec_time_ms")]
    pub excessive_exec_time_ms: u64,

    /// Endpoint used for error responses when the exchange names none
    #[serde(default = "default_error_endpoint")]
    pub default_error_endpoint: String,

    /// Whether asynchronous filters are bounded by a concurrency limit
    #[serde(default = "default_true")]
    pub concurrency_protect_enabled: bool,

    /// Default in-flight limit per asynchronous filter
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Per-filter overrides of `concurrency_limit`
    #[serde(default)]
    pub concurrency_limits: HashMap<String, usize>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            excessive_exec_time_ms: default_excessive_exec_time_ms(),
            default_error_endpoint: default_error_endpoint(),
            concurrency_protect_enabled: true,
            concurrency_limit: default_concurrency_limit(),
            concurrency_limits: HashMap::new(),
        }
    }
}

impl FilterSettings {
    /// Concurrency limit applying to `filter_name`, or `None` when unprotected.
    pub fn concurrency_limit_for(&self, filter_name: &str) -> Option<usize> {
        if !self.concurrency_protect_enabled {
            return None;
        }
        Some(
            self.concurrency_limits
                .get(filter_name)
                .copied()
                .unwrap_or(self.concurrency_limit),
        )
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Log output settings. `RUST_LOG` takes precedence over `level`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,

    /// Include span open/close events
    #[serde(default)]
    pub spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            spans: false,
        }
    }
}
