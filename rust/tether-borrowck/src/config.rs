//! Analysis options, read from the `[borrowck]` table of `tether.toml`.
//!
//! Every key is optional; a missing file, table or key falls back to the
//! default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid toml: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How loops are brought to a stable entry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoopStrategy {
    /// Analyse the body from the entry state, then once more from the merge
    /// of "zero iterations" and "one iteration".
    #[default]
    TwoState,
    /// Re-analyse until the entry state stops changing, up to `max_loop_passes`.
    FixedPoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    /// Report one diagnostic per root cause instead of one per use.
    pub dedup_diagnostics: bool,
    pub loop_strategy: LoopStrategy,
    pub max_loop_passes: usize,
    /// Analyse functions on the rayon pool.
    pub parallel: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            dedup_diagnostics: true,
            loop_strategy: LoopStrategy::TwoState,
            max_loop_passes: 8,
            parallel: false,
        }
    }
}

/// The parts of `tether.toml` this crate cares about.
#[derive(Debug, Default, Deserialize)]
struct TetherToml {
    #[serde(default)]
    borrowck: AnalysisOptions,
}

impl AnalysisOptions {
    /// Number of body passes a loop gets before its entry state is accepted.
    pub fn loop_pass_limit(&self) -> usize {
        match self.loop_strategy {
            LoopStrategy::TwoState => 2,
            LoopStrategy::FixedPoint => self.max_loop_passes.max(2),
        }
    }

    /// Parse the `[borrowck]` table out of a full `tether.toml` document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let doc: TetherToml = toml::from_str(s)?;
        Ok(doc.borrowck)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let options = Self::from_toml_str(&content)?;
        log::debug!("loaded borrowck options from {}", path.display());
        Ok(options)
    }

    /// Search `start` and its ancestors for `tether.toml`. Defaults when none exists.
    pub fn discover(start: &Path) -> Result<Self, ConfigError> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join("tether.toml");
            if candidate.is_file() {
                return Self::load_from(&candidate);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Template `[borrowck]` table with every key at its default.
    pub fn default_template() -> &'static str {
        r#"[borrowck]
dedup_diagnostics = true
loop_strategy = "two-state"   # or "fixed-point"
max_loop_passes = 8
parallel = false
"#
    }
}
