use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

/// Resolved memory configuration. Read once from the environment at
/// construction and passed in — no process-global state.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Master switch for compression. When false, urgency is always `None`.
    pub enabled: bool,
    /// Hard token threshold: above this, full compression runs.
    pub compression_threshold: u64,
    /// Soft threshold as a fraction of the hard threshold.
    pub soft_threshold_ratio: f64,
    /// Target size after compression, as a fraction of the current size.
    pub compression_ratio: f64,
    /// Emergency cap on buffered message count.
    pub short_term_size: usize,
    /// Master switch for the cross-session knowledge store.
    pub long_term_enabled: bool,
    /// Token-equivalent size above which long-term consolidation runs.
    pub consolidation_threshold: u64,
    /// Runtime root, `~/.aloop` unless overridden.
    pub runtime_dir: PathBuf,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            compression_threshold: 40_000,
            soft_threshold_ratio: 0.6,
            compression_ratio: 0.3,
            short_term_size: 500,
            long_term_enabled: true,
            consolidation_threshold: 2_000,
            runtime_dir: default_runtime_dir(),
        }
    }
}

impl MemoryConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: parse_var("MEMORY_ENABLED", defaults.enabled),
            compression_threshold: parse_var(
                "MEMORY_COMPRESSION_THRESHOLD",
                defaults.compression_threshold,
            ),
            soft_threshold_ratio: parse_var(
                "MEMORY_SOFT_THRESHOLD_RATIO",
                defaults.soft_threshold_ratio,
            ),
            compression_ratio: parse_var("MEMORY_COMPRESSION_RATIO", defaults.compression_ratio),
            short_term_size: parse_var("MEMORY_SHORT_TERM_SIZE", defaults.short_term_size),
            long_term_enabled: parse_var("LONG_TERM_MEMORY_ENABLED", defaults.long_term_enabled),
            consolidation_threshold: parse_var(
                "LONG_TERM_MEMORY_CONSOLIDATION_THRESHOLD",
                defaults.consolidation_threshold,
            ),
            runtime_dir: std::env::var("ALOOP_HOME")
                .map(PathBuf::from)
                .unwrap_or(defaults.runtime_dir),
        }
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.runtime_dir.join("sessions")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.runtime_dir.join("memory")
    }

    /// Soft compression threshold in tokens.
    pub fn soft_threshold(&self) -> u64 {
        (self.compression_threshold as f64 * self.soft_threshold_ratio) as u64
    }

    /// Target token count for a compression pass, floored at 500 so the
    /// summary always has room to be useful.
    pub fn target_tokens(&self, current_tokens: u64) -> u64 {
        ((current_tokens as f64 * self.compression_ratio) as u64).max(500)
    }
}

fn default_runtime_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".aloop")
}

fn parse_var<T: FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => parse_value(name, &raw, default),
        Err(_) => default,
    }
}

fn parse_value<T: FromStr + Copy>(name: &str, raw: &str, default: T) -> T {
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(name, raw, "unparseable config value, using default");
            default
        }
    }
}
