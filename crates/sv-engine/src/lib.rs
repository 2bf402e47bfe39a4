//! # sv-engine
//!
//! Experiment execution for Sieve: the pluggable [`Experiment`] contract,
//! process lifecycle tracking, command-line assembly, and the
//! bounded-concurrency [`ExperimentPool`].

pub mod command;
pub mod experiment;
pub mod pool;
pub mod process;
pub mod shell;

pub use command::{CommandLine, CommandOption, Redirect, SpawnOptions, DEFAULT_DELIMITER};
pub use experiment::{instantiate, Experiment, DEFAULT_POLL_INTERVAL};
pub use pool::{ExperimentPool, Finished, PoolRun, DEFAULT_POOL_POLL_INTERVAL};
pub use process::{ProcessHandle, ProcessStatus};
pub use shell::{CommandExperiment, CommandInput, CommandTemplate, INPUT_PLACEHOLDER};
