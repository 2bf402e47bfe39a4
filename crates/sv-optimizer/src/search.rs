//! Progressive-sampling parameter search.
//!
//! [`ProgressiveSearch`] evaluates every candidate combination on a data
//! sample that grows each round, discards the weakest fraction, and repeats
//! until a single combination is left. [`PlainSearch`] is the one-round
//! variant: every combination, full data, no pruning.

use chrono::Utc;
use std::cmp::Ordering;
use std::marker::PhantomData;
use tracing::{debug, info, warn};

use sv_engine::{instantiate, Experiment, ExperimentPool, Finished};
use sv_types::{
    validation_error, ParameterCombination, ParameterScope, ParameterSet, ScoredCombination,
    SvError, SvResult,
};

use crate::config::SearchConfig;
use crate::status::{RoundReport, SearchStatus};

/// Maps `(round, max_size)` to the sample size of that round.
pub type SizeFn = Box<dyn Fn(usize, usize) -> usize>;

/// Maps a round to the fraction of candidates discarded after it.
pub type PruneFn = Box<dyn Fn(usize) -> f64>;

/// `round(max_size · percent/100 · round²)`.
pub fn quadratic_size(round: usize, max_size: usize, percent: f64) -> usize {
    ((max_size as f64 * percent / 100.0) * (round * round) as f64).round() as usize
}

/// Ascending score order with NaN treated as the lowest score.
fn score_order(a: f64, b: f64) -> Ordering {
    let rank = |s: f64| if s.is_nan() { f64::NEG_INFINITY } else { s };
    rank(a).total_cmp(&rank(b))
}

fn sort_by_score(scored: &mut [ScoredCombination]) {
    scored.sort_by(|a, b| score_order(a.score, b.score));
}

/// Score of an experiment whose process failed: whatever its accessor
/// reports, or negative infinity when it has none.
fn failed_score<E: Experiment>(experiment: &E) -> SvResult<f64> {
    match experiment.score() {
        Ok(score) => Ok(score),
        Err(e) if e.is_contract_violation() => Err(e),
        Err(e) => {
            debug!("No score for failed experiment: {}", e);
            Ok(f64::NEG_INFINITY)
        }
    }
}

/// Keep only the scope's parameters, in scope order.
fn project(parameters: &ParameterSet, names: &[String]) -> ParameterCombination {
    names
        .iter()
        .filter_map(|name| parameters.get(name).map(|v| (name.clone(), v.clone())))
        .collect()
}

struct RoundEvaluation {
    scored: Vec<ScoredCombination>,
    sample_size: Option<usize>,
    failed: usize,
}

/// Wrapped progressive sampling over a parameter scope.
pub struct ProgressiveSearch<E: Experiment> {
    input: E::Input,
    config: SearchConfig,
    size_fn: SizeFn,
    prune_fn: PruneFn,
    names: Vec<String>,
    candidates: Vec<ScoredCombination>,
    round: usize,
    finished: bool,
    budget_exceeded: Option<SvError>,
    status: SearchStatus,
    _experiment: PhantomData<fn() -> E>,
}

impl<E: Experiment> ProgressiveSearch<E> {
    pub fn new(input: E::Input, scope: &ParameterScope, config: SearchConfig) -> SvResult<Self> {
        config.validate()?;
        let percent = config.size_percent;
        let fraction = config.prune_fraction;
        let candidates = scope
            .combinations()
            .into_iter()
            .map(ScoredCombination::unscored)
            .collect::<Vec<_>>();
        info!(
            candidates = candidates.len(),
            pool_size = config.pool_size,
            max_size = ?config.max_size,
            "Progressive search initialised"
        );

        Ok(Self {
            input,
            config,
            size_fn: Box::new(move |round, max_size| quadratic_size(round, max_size, percent)),
            prune_fn: Box::new(move |_| fraction),
            names: scope.names().map(str::to_string).collect(),
            candidates,
            round: 0,
            finished: false,
            budget_exceeded: None,
            status: SearchStatus::new(),
            _experiment: PhantomData,
        })
    }

    /// Replace the sample-size schedule. Ignored when the configuration has
    /// no `max_size`.
    pub fn with_size_fn(mut self, f: impl Fn(usize, usize) -> usize + 'static) -> Self {
        self.size_fn = Box::new(f);
        self
    }

    pub fn with_prune_fn(mut self, f: impl Fn(usize) -> f64 + 'static) -> Self {
        self.prune_fn = Box::new(f);
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Index of the last round run; zero before the first.
    pub fn round(&self) -> usize {
        self.round
    }

    /// Current candidates, ascending by the score they got last round.
    pub fn candidates(&self) -> &[ScoredCombination] {
        &self.candidates
    }

    pub fn status(&self) -> &SearchStatus {
        &self.status
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Score every current candidate on the sample for `round`.
    ///
    /// Returns an empty list when the round's sample size exceeds the
    /// configured maximum.
    pub fn test(&mut self, round: usize) -> SvResult<Vec<ScoredCombination>> {
        Ok(self.evaluate(round)?.scored)
    }

    fn evaluate(&mut self, round: usize) -> SvResult<RoundEvaluation> {
        let (data, sample_size) = match self.config.max_size {
            None => (self.input.clone(), None),
            Some(max_size) => {
                let size = (self.size_fn)(round, max_size);
                if size > max_size {
                    warn!(round, size, max_size, "Sample size exceeds the budget");
                    self.budget_exceeded = Some(SvError::BudgetExceeded {
                        round,
                        size,
                        max_size,
                    });
                    return Ok(RoundEvaluation {
                        scored: Vec::new(),
                        sample_size: Some(size),
                        failed: 0,
                    });
                }
                (E::sample(&self.input, size)?, Some(size))
            }
        };

        let evaluation = if self.config.is_pooled() {
            self.evaluate_pooled(&data, sample_size)
        } else {
            self.evaluate_sequential(&data, sample_size)
        };
        // Every experiment of the round has been dropped by now.
        let discarded = match sample_size {
            Some(_) if self.config.delete => E::discard_sample(&data),
            _ => Ok(()),
        };
        let evaluation = evaluation?;
        discarded?;
        Ok(evaluation)
    }

    fn evaluate_sequential(
        &self,
        data: &E::Input,
        sample_size: Option<usize>,
    ) -> SvResult<RoundEvaluation> {
        let halt = self.config.halt_on_error();
        let interval = self.config.poll_interval();
        let mut scored = Vec::with_capacity(self.candidates.len());
        let mut failed = 0;

        for candidate in &self.candidates {
            let mut experiment: E = instantiate(data, &candidate.parameters)?;
            let score = match experiment.run_with_interval(interval) {
                Ok(()) => experiment.score()?,
                Err(e) if e.is_process_failure() && !halt => {
                    warn!("Experiment failed, continuing: {}", e);
                    failed += 1;
                    failed_score(&experiment)?
                }
                Err(e) => return Err(e),
            };
            debug!(parameters = %candidate.parameters, score, "Experiment scored");
            if self.config.delete {
                experiment.delete()?;
            }
            scored.push(ScoredCombination {
                parameters: candidate.parameters.clone(),
                score,
            });
        }

        Ok(RoundEvaluation {
            scored,
            sample_size,
            failed,
        })
    }

    fn evaluate_pooled(
        &self,
        data: &E::Input,
        sample_size: Option<usize>,
    ) -> SvResult<RoundEvaluation> {
        let mut pool =
            ExperimentPool::new(self.config.pool_size).with_poll_interval(self.config.poll_interval());
        for candidate in &self.candidates {
            pool.submit(instantiate::<E>(data, &candidate.parameters)?);
        }

        let mut scored = Vec::with_capacity(self.candidates.len());
        let mut failed = 0;
        for finished in pool.run(self.config.halt_on_error()) {
            let Finished {
                mut experiment,
                failure,
            } = finished?;
            let score = match failure {
                None => experiment.score()?,
                Some(_) => {
                    failed += 1;
                    failed_score(&experiment)?
                }
            };
            let parameters = project(experiment.parameters(), &self.names);
            debug!(parameters = %parameters, score, "Experiment scored");
            if self.config.delete {
                experiment.delete()?;
            }
            scored.push(ScoredCombination { parameters, score });
        }

        Ok(RoundEvaluation {
            scored,
            sample_size,
            failed,
        })
    }

    /// Run one round: score, prune, and return the surviving combinations.
    /// Returns `None` once the search has finished.
    pub fn next_round(&mut self) -> SvResult<Option<Vec<ParameterCombination>>> {
        if self.finished {
            return Ok(None);
        }
        self.status.mark_running();
        match self.step() {
            Ok(survivors) => Ok(Some(survivors)),
            Err(e) => {
                self.finished = true;
                self.status.mark_failed(e.to_string());
                Err(e)
            }
        }
    }

    fn step(&mut self) -> SvResult<Vec<ParameterCombination>> {
        self.round += 1;
        let round = self.round;
        let started_at = Utc::now();

        let RoundEvaluation {
            mut scored,
            sample_size,
            failed,
        } = self.evaluate(round)?;
        let count = scored.len();

        let fraction = (self.prune_fn)(round);
        if !(0.0..=1.0).contains(&fraction) {
            return Err(validation_error!(
                "prune fraction for round {} must lie in [0, 1], got {}",
                round,
                fraction
            ));
        }
        let prune = ((fraction * count as f64).round() as usize).min(count);

        sort_by_score(&mut scored);
        self.candidates = scored.split_off(prune);

        let best = self.candidates.last();
        info!(
            round,
            sample_size = ?sample_size,
            evaluated = count,
            failed,
            pruned = prune,
            survivors = self.candidates.len(),
            best_score = ?best.map(|b| b.score),
            "Round complete"
        );
        self.status.record_round(RoundReport {
            round,
            sample_size,
            evaluated: count,
            failed,
            pruned: prune,
            survivors: self.candidates.len(),
            best_score: best.map(|b| b.score),
            best: best.map(|b| b.parameters.clone()),
            started_at,
            finished_at: Utc::now(),
        });

        if self.budget_exceeded.is_some() {
            self.finished = true;
            self.status.mark_stalled();
        } else if self.candidates.len() <= 1 {
            self.finished = true;
            self.status.mark_completed();
        } else if self.config.max_rounds.is_some_and(|cap| round >= cap) {
            info!(
                round,
                survivors = self.candidates.len(),
                "Round cap reached"
            );
            self.finished = true;
            self.status.mark_completed();
        }

        Ok(self
            .candidates
            .iter()
            .map(|c| c.parameters.clone())
            .collect())
    }

    /// Lazily run the remaining rounds.
    pub fn rounds(&mut self) -> Rounds<'_, E> {
        Rounds { search: self }
    }

    /// Run all rounds and return the winning combination: the highest-scoring
    /// survivor of the final round.
    ///
    /// Pruning rounds half away from zero, so with the default fraction a
    /// lone candidate is discarded in round one and this returns
    /// [`SvError::NoSurvivors`].
    pub fn search_best(&mut self) -> SvResult<ParameterCombination> {
        for survivors in self.rounds() {
            survivors?;
        }
        if let Some(best) = self.candidates.last() {
            return Ok(best.parameters.clone());
        }
        Err(self
            .budget_exceeded
            .take()
            .unwrap_or(SvError::NoSurvivors { rounds: self.round }))
    }
}

/// Iterator over the survivors of each round.
pub struct Rounds<'a, E: Experiment> {
    search: &'a mut ProgressiveSearch<E>,
}

impl<E: Experiment> Iterator for Rounds<'_, E> {
    type Item = SvResult<Vec<ParameterCombination>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.search.next_round().transpose()
    }
}

/// Exhaustive single-round evaluation on the complete input.
pub struct PlainSearch<E: Experiment> {
    inner: ProgressiveSearch<E>,
    results: Option<Vec<ScoredCombination>>,
}

impl<E: Experiment> PlainSearch<E> {
    pub fn new(input: E::Input, scope: &ParameterScope, config: SearchConfig) -> SvResult<Self> {
        let config = config
            .with_full_dataset()
            .with_prune_fraction(0.0)
            .with_max_rounds(1);
        Ok(Self {
            inner: ProgressiveSearch::new(input, scope, config)?.with_prune_fn(|_| 0.0),
            results: None,
        })
    }

    pub fn status(&self) -> &SearchStatus {
        self.inner.status()
    }

    /// Every combination with its score, ascending by score. Runs the
    /// evaluation on first call.
    pub fn evaluate(&mut self) -> SvResult<&[ScoredCombination]> {
        if self.results.is_none() {
            self.inner.next_round()?;
            self.results = Some(self.inner.candidates().to_vec());
        }
        Ok(self.results.as_deref().unwrap_or_default())
    }

    pub fn search_best(&mut self) -> SvResult<ParameterCombination> {
        let rounds = self.inner.round();
        self.evaluate()?
            .last()
            .map(|best| best.parameters.clone())
            .ok_or(SvError::NoSurvivors { rounds: rounds.max(1) })
    }
}

impl<E: Experiment> IntoIterator for PlainSearch<E> {
    type Item = SvResult<ScoredCombination>;
    type IntoIter = std::vec::IntoIter<SvResult<ScoredCombination>>;

    /// Evaluate and yield the results in ascending score order.
    fn into_iter(mut self) -> Self::IntoIter {
        let items: Vec<_> = match self.evaluate() {
            Ok(results) => results.iter().cloned().map(Ok).collect(),
            Err(e) => vec![Err(e)],
        };
        items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailurePolicy;
    use crate::status::SearchState;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Journal {
        samples: Vec<usize>,
        seen_sizes: Vec<usize>,
        started: usize,
        deleted: usize,
        discarded: Vec<usize>,
    }

    /// Input of [`Synthetic`]: a dataset size plus a shared journal.
    #[derive(Debug, Clone)]
    struct Dataset {
        size: usize,
        journal: Rc<RefCell<Journal>>,
    }

    impl Dataset {
        fn new(size: usize) -> Self {
            Self {
                size,
                journal: Rc::new(RefCell::new(Journal::default())),
            }
        }
    }

    /// In-process experiment. Scores `x` (plus `tie` if set), fails when
    /// `fail` is true, and finishes after `delay` polls.
    #[derive(Debug)]
    struct Synthetic {
        data: Dataset,
        parameters: ParameterSet,
        polls_left: usize,
        finished: bool,
    }

    impl Experiment for Synthetic {
        type Input = Dataset;

        fn default_parameters(_input: &Dataset) -> ParameterSet {
            ParameterSet::new().with("delay", 0).with("fail", false)
        }

        fn create(data: Dataset, parameters: ParameterSet) -> SvResult<Self> {
            let polls_left = parameters.get("delay").and_then(|v| v.as_i64()).unwrap_or(0) as usize;
            Ok(Self {
                data,
                parameters,
                polls_left,
                finished: false,
            })
        }

        fn sample(input: &Dataset, size: usize) -> SvResult<Dataset> {
            input.journal.borrow_mut().samples.push(size);
            Ok(Dataset {
                size,
                journal: Rc::clone(&input.journal),
            })
        }

        fn discard_sample(sample: &Dataset) -> SvResult<()> {
            sample.journal.borrow_mut().discarded.push(sample.size);
            Ok(())
        }

        fn parameters(&self) -> &ParameterSet {
            &self.parameters
        }

        fn describe_input(&self) -> String {
            format!("dataset[{}]", self.data.size)
        }

        fn start(&mut self) -> SvResult<()> {
            let mut journal = self.data.journal.borrow_mut();
            journal.started += 1;
            journal.seen_sizes.push(self.data.size);
            Ok(())
        }

        fn done(&mut self) -> SvResult<bool> {
            if self.polls_left > 0 {
                self.polls_left -= 1;
                return Ok(false);
            }
            if self.parameters.get("fail").and_then(|v| v.as_bool()) == Some(true) {
                return Err(self.failure(Some(1)));
            }
            self.finished = true;
            Ok(true)
        }

        fn score(&self) -> SvResult<f64> {
            if !self.finished {
                return Err(SvError::NotFinished { operation: "score" });
            }
            let x = self.parameters.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let tie = self.parameters.get("tie").and_then(|v| v.as_f64()).unwrap_or(0.0);
            Ok(x + tie)
        }

        fn delete(&mut self) -> SvResult<()> {
            self.data.journal.borrow_mut().deleted += 1;
            Ok(())
        }
    }

    fn fast() -> SearchConfig {
        SearchConfig::default().with_poll_interval(Duration::from_millis(1))
    }

    fn xs(values: impl IntoIterator<Item = i64>) -> ParameterScope {
        ParameterScope::new().add("x", values.into_iter().collect::<Vec<_>>())
    }

    fn x_of(combo: &ParameterCombination) -> i64 {
        combo.get("x").and_then(|v| v.as_i64()).unwrap()
    }

    #[test]
    fn initial_candidates_are_the_scope_product() {
        let scope = ParameterScope::new().add("a", [1, 2]).add("b", [10, 20]);
        let search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(Dataset::new(100), &scope, fast()).unwrap();

        let rendered: Vec<String> = search
            .candidates()
            .iter()
            .map(|c| c.parameters.to_string())
            .collect();
        assert_eq!(rendered, vec!["a=1 b=10", "a=1 b=20", "a=2 b=10", "a=2 b=20"]);
        assert!(search.candidates().iter().all(|c| c.score == 0.0));
        assert_eq!(search.round(), 0);
    }

    #[test]
    fn default_prune_discards_the_lower_half() {
        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(Dataset::new(100), &xs(1..=8), fast()).unwrap();

        let survivors = search.next_round().unwrap().unwrap();
        let kept: Vec<i64> = survivors.iter().map(x_of).collect();
        assert_eq!(kept, vec![5, 6, 7, 8]);
        assert_eq!(search.round(), 1);
        assert!(!search.is_finished());
    }

    #[test]
    fn survivors_shrink_until_one_remains() {
        let scope = xs([3, 8, 1, 6, 2, 7, 5, 4]);
        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(Dataset::new(100), &scope, fast()).unwrap();

        let sizes: Vec<usize> = search
            .rounds()
            .map(|survivors| survivors.unwrap().len())
            .collect();
        assert_eq!(sizes, vec![4, 2, 1]);
        assert!(sizes.windows(2).all(|w| w[1] <= w[0]));

        assert_eq!(x_of(&search.search_best().unwrap()), 8);
        assert_eq!(search.status().state, SearchState::Completed);
        assert_eq!(search.status().rounds.len(), 3);
        assert_eq!(search.status().experiments_run, 8 + 4 + 2);
    }

    #[test]
    fn sample_grows_quadratically() {
        let data = Dataset::new(1000);
        let journal = Rc::clone(&data.journal);
        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(data, &xs(1..=8), fast().with_max_size(1000)).unwrap();

        search.search_best().unwrap();
        assert_eq!(journal.borrow().samples, vec![10, 40, 90]);
        assert!(journal.borrow().seen_sizes[..8].iter().all(|&s| s == 10));
        assert_eq!(
            search.status().rounds[1].sample_size,
            Some(quadratic_size(2, 1000, 1.0))
        );
    }

    #[test]
    fn full_dataset_is_never_sampled() {
        let data = Dataset::new(777);
        let journal = Rc::clone(&data.journal);
        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(data, &xs(1..=4), fast().with_full_dataset())
                .unwrap()
                .with_size_fn(|_, _| panic!("size schedule must not run"));

        search.search_best().unwrap();
        let journal = journal.borrow();
        assert!(journal.samples.is_empty());
        assert!(journal.seen_sizes.iter().all(|&s| s == 777));
        assert!(search.status().rounds.iter().all(|r| r.sample_size.is_none()));
    }

    #[test]
    fn exceeding_the_budget_stalls_the_search() {
        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(Dataset::new(50), &xs(1..=4), fast().with_max_size(50))
                .unwrap()
                .with_size_fn(|round, max| if round == 1 { max / 2 } else { max + 1 });

        assert_eq!(search.next_round().unwrap().unwrap().len(), 2);
        assert!(search.next_round().unwrap().unwrap().is_empty());
        assert!(search.next_round().unwrap().is_none());
        assert_eq!(search.status().state, SearchState::Stalled);

        match search.search_best() {
            Err(SvError::BudgetExceeded {
                round,
                size,
                max_size,
            }) => {
                assert_eq!((round, size, max_size), (2, 51, 50));
            }
            other => panic!("expected BudgetExceeded, got {other:?}"),
        }
    }

    #[test]
    fn test_reports_empty_when_over_budget() {
        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(Dataset::new(10), &xs(1..=3), fast().with_max_size(10))
                .unwrap();
        // Round 11 asks for 12 items out of 10.
        assert!(search.test(11).unwrap().is_empty());
        assert_eq!(search.test(1).unwrap().len(), 3);
    }

    #[test]
    fn pooled_and_sequential_agree() {
        let scope = ParameterScope::new()
            .add("x", [4, 9, 1, 7, 3, 8])
            .add("delay", [0, 2]);

        let mut sequential: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(Dataset::new(100), &scope, fast()).unwrap();
        let mut pooled: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(Dataset::new(100), &scope, fast().with_pool_size(3)).unwrap();

        let a = sequential.search_best().unwrap();
        let b = pooled.search_best().unwrap();
        assert_eq!(x_of(&a), 9);
        assert_eq!(x_of(&b), 9);
        // Pooled results keep only the scope's parameters.
        assert_eq!(b.len(), 2);
        assert!(b.get("fail").is_none());
    }

    #[test]
    fn pooled_failures_are_scored_lowest() {
        let scope = ParameterScope::new()
            .add("x", [1, 2, 3, 4])
            .add("fail", [false, true]);
        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(Dataset::new(100), &scope, fast().with_pool_size(4)).unwrap();

        let survivors = search.next_round().unwrap().unwrap();
        assert_eq!(survivors.len(), 4);
        assert!(survivors
            .iter()
            .all(|c| c.get("fail").and_then(|v| v.as_bool()) == Some(false)));
        assert_eq!(search.status().rounds[0].failed, 4);
    }

    #[test]
    fn sequential_failure_halts_by_default() {
        let scope = ParameterScope::new().add("x", [1, 2]).add("fail", [true]);
        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(Dataset::new(100), &scope, fast()).unwrap();

        let err = search.search_best().unwrap_err();
        assert!(err.is_process_failure());
        assert_eq!(search.status().state, SearchState::Failed);
        assert!(search.next_round().unwrap().is_none());
    }

    #[test]
    fn sequential_failure_can_be_absorbed() {
        let scope = ParameterScope::new()
            .add("x", [1, 2, 3])
            .add("fail", [false, true]);
        let config = fast().with_failure_policy(FailurePolicy::Continue);
        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(Dataset::new(100), &scope, config).unwrap();

        let best = search.search_best().unwrap();
        assert_eq!(x_of(&best), 3);
        assert_eq!(best.get("fail").and_then(|v| v.as_bool()), Some(false));
    }

    #[test]
    fn pooled_failure_halts_when_forced() {
        let scope = ParameterScope::new().add("x", [1, 2]).add("fail", [true]);
        let config = fast().with_pool_size(2).with_failure_policy(FailurePolicy::Halt);
        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(Dataset::new(100), &scope, config).unwrap();
        assert!(search.search_best().unwrap_err().is_process_failure());
    }

    #[test]
    fn experiments_are_deleted_only_when_requested() {
        let data = Dataset::new(100);
        let journal = Rc::clone(&data.journal);
        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(data, &xs(1..=4), fast()).unwrap();
        search.search_best().unwrap();
        assert_eq!(journal.borrow().deleted, journal.borrow().started);
        assert_eq!(journal.borrow().started, 4 + 2);

        let data = Dataset::new(100);
        let journal = Rc::clone(&data.journal);
        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(data, &xs(1..=4), fast().with_delete(false)).unwrap();
        search.search_best().unwrap();
        assert_eq!(journal.borrow().deleted, 0);
    }

    #[test]
    fn samples_are_discarded_after_each_round_when_deleting() {
        let data = Dataset::new(1000);
        let journal = Rc::clone(&data.journal);
        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(data, &xs(1..=8), fast().with_max_size(1000)).unwrap();
        search.search_best().unwrap();
        assert_eq!(journal.borrow().discarded, vec![10, 40, 90]);

        let data = Dataset::new(1000);
        let journal = Rc::clone(&data.journal);
        let config = fast().with_max_size(1000).with_delete(false);
        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(data, &xs(1..=8), config).unwrap();
        search.search_best().unwrap();
        assert!(journal.borrow().discarded.is_empty());

        // The complete input is never a sample.
        let data = Dataset::new(1000);
        let journal = Rc::clone(&data.journal);
        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(data, &xs(1..=8), fast()).unwrap();
        search.search_best().unwrap();
        assert!(journal.borrow().discarded.is_empty());
    }

    #[test]
    fn ties_prune_the_earlier_candidate() {
        // All four score 1.0; the stable sort keeps the last two.
        let scope = ParameterScope::new().add("x", [1]).add("tie", [0, 0, 0, 0]);
        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(Dataset::new(100), &scope, fast()).unwrap();
        search.next_round().unwrap();
        assert_eq!(search.candidates().len(), 2);

        let mut scored = vec![
            ScoredCombination {
                parameters: ParameterSet::new().with("id", 0),
                score: 1.0,
            },
            ScoredCombination {
                parameters: ParameterSet::new().with("id", 1),
                score: 1.0,
            },
            ScoredCombination {
                parameters: ParameterSet::new().with("id", 2),
                score: 0.5,
            },
        ];
        sort_by_score(&mut scored);
        let ids: Vec<String> = scored.iter().map(|s| s.parameters.to_string()).collect();
        assert_eq!(ids, vec!["id=2", "id=0", "id=1"]);
    }

    #[test]
    fn nan_scores_sort_first() {
        let mut scored: Vec<ScoredCombination> = [0.3, f64::NAN, -2.0]
            .into_iter()
            .map(|score| ScoredCombination {
                parameters: ParameterSet::new(),
                score,
            })
            .collect();
        sort_by_score(&mut scored);
        assert!(scored[0].score.is_nan());
        assert_eq!(scored[2].score, 0.3);
    }

    #[test]
    fn invalid_prune_fraction_is_rejected() {
        assert!(matches!(
            ProgressiveSearch::<Synthetic>::new(
                Dataset::new(10),
                &xs(1..=2),
                fast().with_prune_fraction(-0.1)
            ),
            Err(SvError::Validation(_))
        ));

        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(Dataset::new(10), &xs(1..=2), fast())
                .unwrap()
                .with_prune_fn(|_| 2.0);
        assert!(matches!(search.next_round(), Err(SvError::Validation(_))));
    }

    #[test]
    fn idle_first_round_does_not_end_the_search() {
        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(Dataset::new(100), &xs(1..=8), fast())
                .unwrap()
                .with_prune_fn(|round| if round == 1 { 0.0 } else { 0.5 });

        let sizes: Vec<usize> = search
            .rounds()
            .map(|survivors| survivors.unwrap().len())
            .collect();
        assert_eq!(sizes, vec![8, 4, 2, 1]);
        assert_eq!(x_of(&search.search_best().unwrap()), 8);
    }

    #[test]
    fn round_cap_stops_a_search_that_never_prunes() {
        let config = fast().with_prune_fraction(0.0).with_max_rounds(3);
        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(Dataset::new(10), &xs(1..=3), config).unwrap();
        assert_eq!(search.rounds().count(), 3);
        assert_eq!(search.status().state, SearchState::Completed);
        assert_eq!(search.candidates().len(), 3);
        assert_eq!(x_of(&search.search_best().unwrap()), 3);
    }

    #[test]
    fn lone_candidate_is_pruned_by_default() {
        let mut search: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(Dataset::new(10), &xs([4]), fast()).unwrap();
        assert!(matches!(
            search.search_best(),
            Err(SvError::NoSurvivors { rounds: 1 })
        ));

        let mut kept: ProgressiveSearch<Synthetic> =
            ProgressiveSearch::new(Dataset::new(10), &xs([4]), fast().with_prune_fraction(0.0))
                .unwrap();
        assert_eq!(x_of(&kept.search_best().unwrap()), 4);
    }

    #[test]
    fn missing_delete_surfaces_as_contract_violation() {
        #[derive(Debug)]
        struct NoDelete(ParameterSet);

        impl Experiment for NoDelete {
            type Input = ();

            fn create(_input: (), parameters: ParameterSet) -> SvResult<Self> {
                Ok(Self(parameters))
            }

            fn parameters(&self) -> &ParameterSet {
                &self.0
            }

            fn describe_input(&self) -> String {
                String::new()
            }

            fn start(&mut self) -> SvResult<()> {
                Ok(())
            }

            fn done(&mut self) -> SvResult<bool> {
                Ok(true)
            }

            fn score(&self) -> SvResult<f64> {
                Ok(1.0)
            }
        }

        let mut search: ProgressiveSearch<NoDelete> =
            ProgressiveSearch::new((), &xs(1..=2), fast()).unwrap();
        assert!(search.search_best().unwrap_err().is_contract_violation());
    }

    #[test]
    fn plain_search_scores_everything_once() {
        let data = Dataset::new(300);
        let journal = Rc::clone(&data.journal);
        let scope = ParameterScope::new().add("x", [5, 1, 9, 3]).add("tie", [0, 10]);
        let mut search: PlainSearch<Synthetic> =
            PlainSearch::new(data, &scope, fast().with_max_size(10)).unwrap();

        let results = search.evaluate().unwrap().to_vec();
        assert_eq!(results.len(), 8);
        assert!(results.windows(2).all(|w| w[0].score <= w[1].score));
        assert_eq!(results.last().unwrap().score, 19.0);

        // Evaluated once, on the full data.
        assert_eq!(search.evaluate().unwrap().len(), 8);
        assert_eq!(journal.borrow().started, 8);
        assert!(journal.borrow().samples.is_empty());

        let best = search.search_best().unwrap();
        assert_eq!(best.to_string(), "x=9 tie=10");
        assert_eq!(search.status().state, SearchState::Completed);
    }

    #[test]
    fn plain_search_iterates_in_ascending_order() {
        let search: PlainSearch<Synthetic> =
            PlainSearch::new(Dataset::new(10), &xs([2, 3, 1]), fast()).unwrap();
        let order: Vec<i64> = search
            .into_iter()
            .map(|r| x_of(&r.unwrap().parameters))
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[cfg(unix)]
    mod processes {
        use super::*;
        use std::path::{Path, PathBuf};
        use sv_engine::{CommandExperiment, CommandInput, CommandTemplate};

        /// `sleep 0.02; echo -n <value>` prints the `-n` parameter as score.
        fn echo_input(dir: &Path, lines: usize) -> (CommandInput, PathBuf) {
            let data = dir.join("d.txt");
            let body: String = (0..lines).map(|i| format!("row{i}\n")).collect();
            std::fs::write(&data, body).unwrap();
            let out = dir.join("out");
            let template = CommandTemplate::new("sleep")
                .with_args(["0.02;", "echo"])
                .with_output_dir(&out)
                .with_echo(false)
                .with_seed(11);
            (CommandInput::new(template, data), out)
        }

        fn scope() -> ParameterScope {
            ParameterScope::new().add("-n", [3, 7, 1, 5])
        }

        fn leftovers(out: &Path) -> Vec<String> {
            std::fs::read_dir(out)
                .unwrap()
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .collect()
        }

        #[test]
        fn pooled_search_over_commands_cleans_up() {
            let dir = tempfile::tempdir().unwrap();
            let (input, out) = echo_input(dir.path(), 200);
            let config = fast().with_pool_size(2).with_max_size(100);
            let mut search: ProgressiveSearch<CommandExperiment> =
                ProgressiveSearch::new(input, &scope(), config).unwrap();

            let best = search.search_best().unwrap();
            assert_eq!(best.to_string(), "-n=7");
            let sizes: Vec<Option<usize>> =
                search.status().rounds.iter().map(|r| r.sample_size).collect();
            assert_eq!(sizes, vec![Some(1), Some(4)]);
            assert_eq!(leftovers(&out), Vec::<String>::new());
        }

        #[test]
        fn sequential_search_over_commands_cleans_up() {
            let dir = tempfile::tempdir().unwrap();
            let (input, out) = echo_input(dir.path(), 200);
            let mut search: ProgressiveSearch<CommandExperiment> =
                ProgressiveSearch::new(input, &scope(), fast().with_max_size(100)).unwrap();

            assert_eq!(search.search_best().unwrap().to_string(), "-n=7");
            assert_eq!(leftovers(&out), Vec::<String>::new());
            assert!(dir.path().join("d.txt").exists());
        }

        #[test]
        fn kept_outputs_stay_when_not_deleting() {
            let dir = tempfile::tempdir().unwrap();
            let (input, out) = echo_input(dir.path(), 200);
            let config = fast().with_max_size(100).with_delete(false);
            let mut search: ProgressiveSearch<CommandExperiment> =
                ProgressiveSearch::new(input, &scope(), config).unwrap();
            search.search_best().unwrap();

            let files = leftovers(&out);
            // Two samples plus stdout and stderr for 4 + 2 experiments.
            assert_eq!(files.len(), 2 + 2 * 6);
            assert_eq!(files.iter().filter(|f| f.contains(".sample")).count(), 2);
        }

        #[test]
        fn re_evaluation_yields_the_same_order() {
            let dir = tempfile::tempdir().unwrap();
            let (input, _) = echo_input(dir.path(), 10);
            let scope = ParameterScope::new().add("-n", [4, 9, 2, 6, 1]);

            let order = |pool_size: usize| -> Vec<String> {
                let search: PlainSearch<CommandExperiment> =
                    PlainSearch::new(input.clone(), &scope, fast().with_pool_size(pool_size))
                        .unwrap();
                search
                    .into_iter()
                    .map(|r| r.unwrap().parameters.to_string())
                    .collect()
            };

            let first = order(3);
            assert_eq!(first, vec!["-n=1", "-n=2", "-n=4", "-n=6", "-n=9"]);
            assert_eq!(order(3), first);
            assert_eq!(order(1), first);
        }
    }
}
