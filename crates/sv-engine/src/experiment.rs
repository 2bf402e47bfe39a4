//! The pluggable experiment contract.
//!
//! An [`Experiment`] is one parameterized unit of work backed by an external
//! process. Integrations implement the operations they support; every
//! operation left out fails with [`SvError::NotImplemented`] naming it.

use chrono::Duration as ChronoDuration;
use std::time::Duration;

use sv_types::{ParameterSet, SvError, SvResult};

use crate::process::{ProcessHandle, ProcessStatus};

/// Pause between two completion checks while blocking on an experiment.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub trait Experiment: Sized {
    /// Reference to the data the experiment runs on.
    type Input: Clone;

    /// Base parameters that caller overrides are merged onto.
    fn default_parameters(_input: &Self::Input) -> ParameterSet {
        ParameterSet::new()
    }

    /// Build an experiment from its input and the fully merged parameters.
    /// Use [`instantiate`] to apply the defaults.
    fn create(input: Self::Input, parameters: ParameterSet) -> SvResult<Self>;

    /// Reduce `input` to a subset of `size` items.
    fn sample(_input: &Self::Input, _size: usize) -> SvResult<Self::Input> {
        Err(SvError::NotImplemented { operation: "sample" })
    }

    /// Release a reduced input made by [`Experiment::sample`] once every
    /// experiment bound to it has finished.
    fn discard_sample(_sample: &Self::Input) -> SvResult<()> {
        Ok(())
    }

    fn parameters(&self) -> &ParameterSet;

    /// Short human-readable reference to the input, used in diagnostics.
    fn describe_input(&self) -> String;

    /// The process backing this experiment, if the integration uses one.
    fn process(&self) -> Option<&ProcessHandle> {
        None
    }

    fn process_mut(&mut self) -> Option<&mut ProcessHandle> {
        None
    }

    /// Launch without waiting.
    fn start(&mut self) -> SvResult<()> {
        Err(SvError::NotImplemented { operation: "start" })
    }

    /// Non-blocking completion check. A non-zero exit surfaces as
    /// [`SvError::ProcessFailed`].
    fn done(&mut self) -> SvResult<bool> {
        let status = match self.process_mut() {
            Some(handle) => handle.poll()?,
            None => return Err(SvError::NotImplemented { operation: "done" }),
        };
        match status {
            ProcessStatus::Completed => Ok(true),
            ProcessStatus::Failed { exit_code } => Err(self.failure(exit_code)),
            ProcessStatus::Pending | ProcessStatus::Running => Ok(false),
        }
    }

    fn score(&self) -> SvResult<f64> {
        Err(SvError::NotImplemented { operation: "score" })
    }

    /// Release files and other artifacts.
    fn delete(&mut self) -> SvResult<()> {
        Err(SvError::NotImplemented { operation: "delete" })
    }

    /// Start, then block until done.
    fn run(&mut self) -> SvResult<()> {
        self.run_with_interval(DEFAULT_POLL_INTERVAL)
    }

    fn run_with_interval(&mut self, interval: Duration) -> SvResult<()> {
        self.start()?;
        self.wait(interval)
    }

    fn wait(&mut self, interval: Duration) -> SvResult<()> {
        while !self.done()? {
            std::thread::sleep(interval);
        }
        Ok(())
    }

    fn duration(&self) -> ChronoDuration {
        self.process()
            .map(ProcessHandle::duration)
            .unwrap_or_else(ChronoDuration::zero)
    }

    /// The error reported when this experiment's process exits abnormally.
    fn failure(&self, exit_code: Option<i32>) -> SvError {
        SvError::ProcessFailed {
            input: self.describe_input(),
            parameters: self.parameters().clone(),
            exit_code,
        }
    }
}

/// Construct `E` on `input` with its default parameters overridden by
/// `overrides`.
pub fn instantiate<E: Experiment>(input: &E::Input, overrides: &ParameterSet) -> SvResult<E> {
    let parameters = E::default_parameters(input).merged(overrides);
    E::create(input.clone(), parameters)
}
