//! Search run tracking and per-round reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sv_types::ParameterCombination;

/// Unique search run identifier.
pub type SearchId = Uuid;

/// Lifecycle state for a search run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchState {
    Pending,
    Running,
    Completed,
    /// A round exceeded the sample budget and produced no results.
    Stalled,
    Failed,
}

/// What happened in one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    pub round: usize,
    /// `None` when the round ran on the complete input.
    pub sample_size: Option<usize>,
    pub evaluated: usize,
    pub failed: usize,
    pub pruned: usize,
    pub survivors: usize,
    pub best_score: Option<f64>,
    pub best: Option<ParameterCombination>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Aggregate status of a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStatus {
    pub id: SearchId,
    pub state: SearchState,
    pub rounds: Vec<RoundReport>,
    pub experiments_run: usize,
    pub experiments_failed: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SearchStatus {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SearchState::Pending,
            rounds: Vec::new(),
            experiments_run: 0,
            experiments_failed: 0,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        if self.state == SearchState::Pending {
            self.state = SearchState::Running;
            self.started_at = Some(Utc::now());
        }
    }

    pub fn mark_completed(&mut self) {
        self.state = SearchState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_stalled(&mut self) {
        self.state = SearchState::Stalled;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = SearchState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn record_round(&mut self, report: RoundReport) {
        self.experiments_run += report.evaluated;
        self.experiments_failed += report.failed;
        self.rounds.push(report);
    }

    pub fn last_round(&self) -> Option<&RoundReport> {
        self.rounds.last()
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            SearchState::Completed | SearchState::Stalled | SearchState::Failed
        )
    }
}

impl Default for SearchStatus {
    fn default() -> Self {
        Self::new()
    }
}
