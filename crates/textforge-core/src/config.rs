//! Engine configuration.
//!
//! All tunables live in one [`EngineConfig`] value that hosts construct (or
//! deserialize from a TOML fragment) and pass to the components that need
//! them. There is no global configuration state.

use serde::Deserialize;

/// Scheduling knobs for the analysis orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Debounce window in milliseconds: a lint/symbols request is dispatched
    /// only after input has been quiet for this long.
    pub delay_ms: u64,
    /// Minimum number of edited characters before a lint pass is scheduled.
    /// Smaller edit bursts accumulate until the gate is reached.
    pub min_idle_chars: usize,
    /// Age in milliseconds after which an in-flight request is reported by
    /// the health query. This is a UI-facing signal, not a timeout.
    pub in_flight_warn_ms: u64,
    /// Worker threads in the shared analysis pool.
    pub pool_workers: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            delay_ms: 300,
            min_idle_chars: 1,
            in_flight_warn_ms: 5_000,
            pool_workers: 2,
        }
    }
}

/// Undo/redo and edit-history knobs for buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    /// Maximum number of undo steps retained per buffer.
    pub max_undo_depth: usize,
    /// Whether consecutive short insertions coalesce into one undo step.
    pub coalesce_inserts: bool,
    /// Upper bound on the inserted length of a coalesced undo group.
    pub coalesce_max_chars: usize,
    /// Number of recent edits kept in the remapping journal.
    pub journal_depth: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            max_undo_depth: 1_000,
            coalesce_inserts: true,
            coalesce_max_chars: 100,
            journal_depth: 256,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Analysis orchestrator settings.
    pub analysis: AnalysisSettings,
    /// Buffer history settings.
    pub buffer: BufferSettings,
}

impl EngineConfig {
    /// Parse a configuration from a TOML document.
    ///
    /// Missing keys fall back to their defaults, so a partial fragment like
    /// `[analysis]\ndelay_ms = 150` is valid.
    pub fn from_toml_str(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }
}
