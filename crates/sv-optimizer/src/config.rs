//! Search configuration and the on-disk search description.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sv_engine::CommandTemplate;
use sv_types::{validation_error, ParameterScope, SvResult};

/// Whether a failing experiment aborts the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Halt when running sequentially, continue when running through a pool.
    #[default]
    Auto,
    Halt,
    Continue,
}

impl FailurePolicy {
    pub fn halts(&self, pooled: bool) -> bool {
        match self {
            Self::Auto => !pooled,
            Self::Halt => true,
            Self::Continue => false,
        }
    }
}

/// Tuning knobs for a progressive search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Concurrent experiments. `0` or `1` runs them one after another.
    pub pool_size: usize,

    /// Largest sample size a round may use. `None` (or a negative number in
    /// JSON) means every round runs on the complete input.
    #[serde(deserialize_with = "deserialize_max_size")]
    pub max_size: Option<usize>,

    /// Percentage of `max_size` used in round one; round `n` uses
    /// `n²` times as much.
    pub size_percent: f64,

    /// Fraction of the candidates discarded after every round.
    pub prune_fraction: f64,

    /// Delete each experiment once its score has been read.
    pub delete: bool,

    pub failure_policy: FailurePolicy,

    /// Stop after this many rounds even if several candidates survive.
    /// Without a cap, a prune schedule that never discards anything keeps
    /// the search running forever.
    pub max_rounds: Option<usize>,

    /// Pause between completion checks, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            pool_size: 1,
            max_size: None,
            size_percent: 1.0,
            prune_fraction: 0.5,
            delete: true,
            failure_policy: FailurePolicy::Auto,
            max_rounds: None,
            poll_interval_ms: 1000,
        }
    }
}

impl SearchConfig {
    pub fn with_pool_size(mut self, n: usize) -> Self {
        self.pool_size = n;
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_full_dataset(mut self) -> Self {
        self.max_size = None;
        self
    }

    pub fn with_prune_fraction(mut self, fraction: f64) -> Self {
        self.prune_fraction = fraction;
        self
    }

    pub fn with_delete(mut self, delete: bool) -> Self {
        self.delete = delete;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = Some(rounds);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn is_pooled(&self) -> bool {
        self.pool_size > 1
    }

    pub fn halt_on_error(&self) -> bool {
        self.failure_policy.halts(self.is_pooled())
    }

    pub fn validate(&self) -> SvResult<()> {
        if !(0.0..=1.0).contains(&self.prune_fraction) {
            return Err(validation_error!(
                "prune_fraction must lie in [0, 1], got {}",
                self.prune_fraction
            ));
        }
        if !self.size_percent.is_finite() || self.size_percent <= 0.0 {
            return Err(validation_error!(
                "size_percent must be positive, got {}",
                self.size_percent
            ));
        }
        if self.max_rounds == Some(0) {
            return Err(validation_error!("max_rounds must be at least 1"));
        }
        Ok(())
    }
}

fn deserialize_max_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
    let raw = Option::<i64>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| usize::try_from(v).ok()))
}

/// Everything the `sieve-search` binary needs, as read from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchFile {
    pub command: CommandTemplate,
    pub data: PathBuf,
    pub scope: ParameterScope,
    #[serde(default)]
    pub search: SearchConfig,
    /// Run a single exhaustive round instead of a progressive search.
    #[serde(default)]
    pub plain: bool,
}

impl SearchFile {
    pub fn load(path: impl AsRef<Path>) -> SvResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let file: SearchFile = serde_json::from_str(&contents)?;
        file.search.validate()?;
        Ok(file)
    }
}
