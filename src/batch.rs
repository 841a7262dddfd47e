//! Sequential, rate-limited batch execution.
//!
//! The image provider caps requests per minute for the whole run, so items
//! are processed strictly one after another with a fixed pause between
//! consecutive calls. A failing item is logged and recorded as absent; the
//! batch carries on.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

/// Inserts a fixed pause between consecutive calls: nothing before the
/// first call, exactly `delay` before every later one.
#[derive(Debug, Clone)]
pub struct Pacer {
    delay: Duration,
    started: bool,
}

impl Pacer {
    /// A pacer that has not made any call yet.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: false,
        }
    }

    /// Call right before each external request.
    pub async fn wait(&mut self) {
        if self.started && !self.delay.is_zero() {
            info!(
                "Waiting {} seconds to respect rate limit",
                self.delay.as_secs_f32()
            );
            tokio::time::sleep(self.delay).await;
        }
        self.started = true;
    }
}

/// Per-item outcome of a batch, keyed by item index. `None` marks a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResults<T> {
    entries: BTreeMap<usize, Option<T>>,
}

impl<T> Default for BatchResults<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> BatchResults<T> {
    /// Records (or overwrites) the outcome for `index`.
    pub fn record(&mut self, index: usize, outcome: Option<T>) {
        self.entries.insert(index, outcome);
    }

    /// The artifact for `index`, if that item succeeded.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(&index).and_then(Option::as_ref)
    }

    /// True when `index` was attempted.
    pub fn contains(&self, index: usize) -> bool {
        self.entries.contains_key(&index)
    }

    /// Indices that produced an artifact, ascending.
    pub fn succeeded(&self) -> Vec<usize> {
        self.entries
            .iter()
            .filter_map(|(index, outcome)| outcome.as_ref().map(|_| *index))
            .collect()
    }

    /// Indices that failed, ascending.
    pub fn failed(&self) -> Vec<usize> {
        self.entries
            .iter()
            .filter_map(|(index, outcome)| outcome.is_none().then_some(*index))
            .collect()
    }

    /// Number of attempted items.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was attempted.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of successful items.
    pub fn success_count(&self) -> usize {
        self.entries.values().filter(|outcome| outcome.is_some()).count()
    }

    /// Every entry in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, Option<&T>)> {
        self.entries
            .iter()
            .map(|(index, outcome)| (*index, outcome.as_ref()))
    }
}

/// Reported after each item of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Item that just finished.
    pub index: usize,
    /// Items finished so far, including this one.
    pub done: usize,
    /// Items in the batch.
    pub total: usize,
    /// Whether this item produced an artifact.
    pub succeeded: bool,
}

/// What a retry pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryOutcome {
    /// Rounds actually executed; less than the ceiling when every failure
    /// recovered early.
    pub rounds: usize,
    /// Indices that succeeded during the pass.
    pub recovered: Vec<usize>,
    /// Indices still failing afterwards.
    pub remaining: Vec<usize>,
}

/// Drives items one at a time through a fallible operation.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    pacer: Pacer,
}

impl BatchRunner {
    /// A runner pausing `delay` between consecutive attempts.
    pub fn new(delay: Duration) -> Self {
        Self {
            pacer: Pacer::new(delay),
        }
    }

    /// Runs every item in order and collects the outcomes.
    pub async fn run<I, T, E, F, Fut>(&mut self, items: Vec<(usize, I)>, op: F) -> BatchResults<T>
    where
        E: Display,
        F: FnMut(usize, I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_with_progress(items, op, |_| {}).await
    }

    /// Like [`BatchRunner::run`], calling `on_progress` after each item.
    pub async fn run_with_progress<I, T, E, F, Fut, P>(
        &mut self,
        items: Vec<(usize, I)>,
        mut op: F,
        mut on_progress: P,
    ) -> BatchResults<T>
    where
        E: Display,
        F: FnMut(usize, I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(Progress),
    {
        let total = items.len();
        let mut results = BatchResults::default();
        for (done, (index, item)) in items.into_iter().enumerate() {
            info!("Processing item {index} ({}/{total})", done + 1);
            let outcome = self.attempt(index, item, &mut op).await;
            let succeeded = outcome.is_some();
            results.record(index, outcome);
            on_progress(Progress {
                index,
                done: done + 1,
                total,
                succeeded,
            });
        }
        info!(
            "Batch finished: {}/{} succeeded",
            results.success_count(),
            results.len()
        );
        results
    }

    /// Re-runs only the failed entries of `results`, up to `max_retries`
    /// rounds, stopping as soon as nothing is left to retry. `lookup` rebuilds
    /// the work item for an index; indices it can't rebuild stay failed.
    pub async fn retry_failed<I, T, E, F, Fut, L>(
        &mut self,
        results: &mut BatchResults<T>,
        max_retries: usize,
        mut lookup: L,
        mut op: F,
    ) -> RetryOutcome
    where
        E: Display,
        L: FnMut(usize) -> Option<I>,
        F: FnMut(usize, I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut outcome = RetryOutcome::default();
        for round in 1..=max_retries {
            let failed = results.failed();
            if failed.is_empty() {
                break;
            }
            outcome.rounds = round;
            info!(
                "Retry round {round}/{max_retries} for {} failed item(s)",
                failed.len()
            );
            for index in failed {
                let Some(item) = lookup(index) else {
                    warn!("No work item for index {index}, leaving it failed");
                    continue;
                };
                if let Some(artifact) = self.attempt(index, item, &mut op).await {
                    results.record(index, Some(artifact));
                    outcome.recovered.push(index);
                }
            }
        }
        outcome.remaining = results.failed();
        if outcome.remaining.is_empty() {
            debug!("Retry pass left no failures");
        } else {
            warn!("{} item(s) still failing after retries", outcome.remaining.len());
        }
        outcome
    }

    async fn attempt<I, T, E, F, Fut>(&mut self, index: usize, item: I, op: &mut F) -> Option<T>
    where
        E: Display,
        F: FnMut(usize, I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.pacer.wait().await;
        match op(index, item).await {
            Ok(artifact) => {
                info!("Item {index} completed");
                Some(artifact)
            }
            Err(err) => {
                warn!("Item {index} failed: {err}");
                None
            }
        }
    }
}
