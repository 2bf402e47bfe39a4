//! Lifecycle tracking for a single external process.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::process::Child;
use tracing::{debug, warn};

use sv_types::{SvError, SvResult};

use crate::command::{CommandLine, SpawnOptions};

/// Lifecycle state of an experiment's process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    Pending,
    Running,
    Completed,
    Failed { exit_code: Option<i32> },
}

impl ProcessStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }
}

/// Owns the OS handle of a launched command together with its timestamps.
///
/// The child handle is only held while the process is active; once an exit
/// status has been observed it is released and the final status is kept, so
/// later polls keep returning the same answer.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Option<Child>,
    status: ProcessStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl ProcessHandle {
    pub fn new() -> Self {
        Self {
            child: None,
            status: ProcessStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Spawn `command` and record the start time. Returns the process id.
    pub fn launch(&mut self, command: &CommandLine, options: &SpawnOptions) -> SvResult<u32> {
        if self.status != ProcessStatus::Pending {
            return Err(SvError::Validation(
                "experiment process has already been started".to_string(),
            ));
        }
        let child = command.spawn(options)?;
        self.started_at = Some(Utc::now());
        let pid = child.id();
        debug!(pid, "Process launched");
        self.child = Some(child);
        self.status = ProcessStatus::Running;
        Ok(pid)
    }

    /// Check the process once without blocking.
    pub fn poll(&mut self) -> SvResult<ProcessStatus> {
        if self.status.is_finished() {
            return Ok(self.status);
        }
        let child = self.child.as_mut().ok_or(SvError::NotStarted)?;
        let Some(exit) = child.try_wait()? else {
            return Ok(ProcessStatus::Running);
        };

        self.finished_at = Some(Utc::now());
        self.child = None;
        self.status = if exit.success() {
            ProcessStatus::Completed
        } else {
            ProcessStatus::Failed {
                exit_code: exit.code(),
            }
        };
        Ok(self.status)
    }

    /// Kill the process if it is still active.
    pub fn kill(&mut self) -> SvResult<()> {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                warn!(pid = child.id(), "Failed to kill process: {}", e);
            }
            child.wait()?;
            self.finished_at = Some(Utc::now());
            self.status = ProcessStatus::Failed { exit_code: None };
        }
        Ok(())
    }

    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.child.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Wall-clock run time, zero until both ends are known.
    pub fn duration(&self) -> Duration {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end - start,
            _ => Duration::zero(),
        }
    }
}

impl Default for ProcessHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessHandle {
    /// A handle dropped while its process is still active takes the process
    /// down with it.
    fn drop(&mut self) {
        if let Some(pid) = self.pid() {
            debug!(pid, "Killing process of dropped handle");
            if let Err(e) = self.kill() {
                warn!(pid, "Failed to reap process: {}", e);
            }
        }
    }
}
