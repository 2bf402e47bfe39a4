//! # sv-optimizer
//!
//! Parameter search drivers for Sieve.
//!
//! Provides the progressive-sampling search (score every candidate on a
//! growing sample, prune the weakest, repeat), its exhaustive single-round
//! variant, search configuration, and run status tracking.

mod config;
mod search;
mod status;

pub use config::{FailurePolicy, SearchConfig, SearchFile};
pub use search::{quadratic_size, PlainSearch, ProgressiveSearch, PruneFn, Rounds, SizeFn};
pub use status::{RoundReport, SearchId, SearchState, SearchStatus};
