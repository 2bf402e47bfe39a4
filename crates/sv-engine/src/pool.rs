//! Bounded-concurrency experiment pool.
//!
//! The pool owns a FIFO queue of pending experiments and the set of running
//! ones. It never runs more than `capacity` experiments at once. It is driven
//! cooperatively from a single thread: [`ExperimentPool::run`] returns an
//! iterator that polls, yields completions, and admits pending work as slots
//! free up.

use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, error, warn};

use sv_types::{SvError, SvResult};

use crate::experiment::Experiment;

/// Pause between two polls that found nothing new.
pub const DEFAULT_POOL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// An experiment that left the running set.
#[derive(Debug)]
pub struct Finished<E> {
    pub experiment: E,
    /// The process failure absorbed when the pool does not halt on errors.
    pub failure: Option<SvError>,
}

impl<E> Finished<E> {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

pub struct ExperimentPool<E: Experiment> {
    capacity: usize,
    pending: VecDeque<E>,
    running: Vec<E>,
    poll_interval: Duration,
}

impl<E: Experiment> ExperimentPool<E> {
    /// A pool that runs at most `capacity` experiments concurrently. A
    /// capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            pending: VecDeque::new(),
            running: Vec::new(),
            poll_interval: DEFAULT_POOL_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Queue an experiment. Nothing is started until the pool runs.
    pub fn submit(&mut self, experiment: E) {
        self.pending.push_back(experiment);
    }

    /// Start an experiment and move it into the running set.
    pub fn admit(&mut self, mut experiment: E) -> SvResult<()> {
        experiment.start()?;
        debug!(
            input = %experiment.describe_input(),
            parameters = %experiment.parameters(),
            "Experiment admitted"
        );
        self.running.push(experiment);
        Ok(())
    }

    /// Check every running experiment once and return those that finished.
    ///
    /// A process failure is returned as an error when `halt_on_error` is set;
    /// otherwise the failed experiment counts as finished. Any other error
    /// is always returned.
    pub fn poll(&mut self, halt_on_error: bool) -> SvResult<Vec<Finished<E>>> {
        let mut finished = Vec::new();
        let mut still_running = Vec::with_capacity(self.running.len());
        let mut remaining = std::mem::take(&mut self.running).into_iter();

        while let Some(mut experiment) = remaining.next() {
            match experiment.done() {
                Ok(true) => finished.push(Finished {
                    experiment,
                    failure: None,
                }),
                Ok(false) => still_running.push(experiment),
                Err(e) if e.is_process_failure() && !halt_on_error => {
                    warn!("One experiment in the pool failed: {}", e);
                    finished.push(Finished {
                        experiment,
                        failure: Some(e),
                    });
                }
                Err(e) => {
                    error!("One experiment in the pool failed: {}", e);
                    // Keep ownership of everything so the pool stays intact.
                    still_running.push(experiment);
                    still_running.extend(remaining);
                    still_running.extend(finished.into_iter().map(|f| f.experiment));
                    self.running = still_running;
                    return Err(e);
                }
            }
        }

        self.running = still_running;
        Ok(finished)
    }

    /// Admit pending experiments in FIFO order while slots are free.
    /// Returns how many were admitted.
    pub fn fill(&mut self) -> SvResult<usize> {
        let mut admitted = 0;
        while self.running.len() < self.capacity {
            let Some(next) = self.pending.pop_front() else {
                break;
            };
            self.admit(next)?;
            admitted += 1;
        }
        Ok(admitted)
    }

    /// Drive the pool to completion, yielding finished experiments in the
    /// order they complete. The pool is consumed.
    pub fn run(self, halt_on_error: bool) -> PoolRun<E> {
        PoolRun {
            pool: self,
            halt_on_error,
            ready: VecDeque::new(),
            polled: false,
            last_poll_empty: false,
            exhausted: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn running_len(&self) -> usize {
        self.running.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.running.is_empty()
    }
}

/// Iterator returned by [`ExperimentPool::run`].
///
/// Each cycle polls the running set, yields what finished, then admits
/// pending work. It ends once nothing is pending or running, or right after
/// yielding an error.
pub struct PoolRun<E: Experiment> {
    pool: ExperimentPool<E>,
    halt_on_error: bool,
    ready: VecDeque<Finished<E>>,
    polled: bool,
    last_poll_empty: bool,
    exhausted: bool,
}

impl<E: Experiment> PoolRun<E> {
    pub fn pool(&self) -> &ExperimentPool<E> {
        &self.pool
    }
}

impl<E: Experiment> Iterator for PoolRun<E> {
    type Item = SvResult<Finished<E>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(finished) = self.ready.pop_front() {
                return Some(Ok(finished));
            }
            if self.exhausted {
                return None;
            }

            if self.polled {
                self.polled = false;
                let admitted = match self.pool.fill() {
                    Ok(admitted) => admitted,
                    Err(e) => {
                        self.exhausted = true;
                        return Some(Err(e));
                    }
                };
                if self.pool.is_idle() {
                    self.exhausted = true;
                    return None;
                }
                if admitted > 0 {
                    debug!(
                        admitted,
                        running = self.pool.running_len(),
                        pending = self.pool.pending_len(),
                        "Pool slots filled"
                    );
                }
                continue;
            }

            if self.last_poll_empty && self.pool.running_len() > 0 {
                std::thread::sleep(self.pool.poll_interval);
            }
            match self.pool.poll(self.halt_on_error) {
                Ok(finished) => {
                    self.last_poll_empty = finished.is_empty();
                    self.ready.extend(finished);
                    self.polled = true;
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
