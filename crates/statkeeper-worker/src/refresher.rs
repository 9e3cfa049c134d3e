//! Refresher: the tick-driven control loop.
//!
//! Each cycle reconciles finished executions, snapshots the configuration,
//! refreshes the queue from the signal provider and then dispatches the
//! highest-priority eligible jobs while concurrency slots are free.
//! Executions run on a [`JoinSet`], whose length is the exact number of
//! running jobs; completions are observed by the loop itself so every
//! mutation of the queue and the job registry happens on one task.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing;
use uuid::Uuid;

use statkeeper_core::config::RefresherConfig;
use statkeeper_core::result::AppResult;
use statkeeper_core::traits::{AnalyzeExecutor, JobHistoryStore, SignalProvider};
use statkeeper_core::types::{
    CandidateSignals, CompletionOutcome, CompletionRecord, HistorySource, TableIdentity,
    TimeWindow,
};
use statkeeper_entity::{AnalysisJob, FailureDisposition, JobSignals, JobStatus};

use crate::executor::{ExecutionOutcome, JobExecutor};
use crate::queue::PriorityQueue;

/// Summary of one control-loop cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Whether the maintenance window was open.
    pub window_open: bool,
    /// Candidates returned by the signal provider.
    pub candidates: usize,
    /// Jobs pushed (inserted or re-scored) into the queue.
    pub pushed: usize,
    /// Candidates skipped because their signals were malformed.
    pub skipped: usize,
    /// Queued jobs removed because their object is no longer a candidate.
    pub removed: usize,
    /// Quarantines that expired this cycle.
    pub released: usize,
    /// Jobs handed to the executor.
    pub dispatched: usize,
    /// Popped jobs dropped as ineligible.
    pub discarded: usize,
    /// Whether the signal fetch failed and the cycle was skipped.
    pub fetch_failed: bool,
}

/// Summary of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Jobs handed to the executor.
    pub dispatched: usize,
    /// Popped jobs dropped as ineligible.
    pub discarded: usize,
}

/// Point-in-time scheduler statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefresherStats {
    /// Jobs waiting in the queue.
    pub queued: usize,
    /// Executions in flight.
    pub running: usize,
    /// Jobs in an unexpired or unreleased quarantine.
    pub quarantined: usize,
    /// Successful executions since start.
    pub succeeded: u64,
    /// Failed executions since start, including aborted ones.
    pub failed_total: u64,
    /// Current concurrency budget.
    pub concurrency_limit: usize,
}

/// Bookkeeping for one spawned execution.
struct InFlight {
    key: String,
    identity: TableIdentity,
    attempt_id: Uuid,
    attempt: u32,
    started: Instant,
}

/// Validated configuration snapshot used for a whole cycle.
struct Settings {
    config: RefresherConfig,
    window: TimeWindow,
}

impl Settings {
    fn from_config(config: RefresherConfig) -> AppResult<Self> {
        config.validate()?;
        let window = config.window()?;
        Ok(Self { config, window })
    }
}

/// What a signal refresh did with one candidate.
enum Upsert {
    Pushed(String),
    Held(String),
    NotStale,
}

/// The statistics refresh scheduler.
pub struct Refresher {
    provider: Arc<dyn SignalProvider>,
    executor: JobExecutor,
    config_rx: watch::Receiver<RefresherConfig>,
    settings: Settings,
    /// Every known job by key; the queue holds scoring copies.
    jobs: HashMap<String, AnalysisJob>,
    queue: PriorityQueue<AnalysisJob>,
    tasks: JoinSet<ExecutionOutcome>,
    in_flight: HashMap<Id, InFlight>,
    succeeded_total: u64,
    failed_total: u64,
}

impl std::fmt::Debug for Refresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Refresher")
            .field("jobs", &self.jobs.len())
            .field("queue", &self.queue)
            .field("running", &self.tasks.len())
            .finish()
    }
}

impl Refresher {
    /// Create a refresher. The initial configuration must be valid.
    pub fn new(
        provider: Arc<dyn SignalProvider>,
        analyzer: Arc<dyn AnalyzeExecutor>,
        history: Arc<dyn JobHistoryStore>,
        mut config_rx: watch::Receiver<RefresherConfig>,
    ) -> AppResult<Self> {
        let config = config_rx.borrow_and_update().clone();
        let settings = Settings::from_config(config)?;

        Ok(Self {
            provider,
            executor: JobExecutor::new(analyzer, history),
            config_rx,
            settings,
            jobs: HashMap::new(),
            queue: PriorityQueue::new(),
            tasks: JoinSet::new(),
            in_flight: HashMap::new(),
            succeeded_total: 0,
            failed_total: 0,
        })
    }

    /// Configuration snapshot currently in force.
    pub fn config(&self) -> &RefresherConfig {
        &self.settings.config
    }

    /// The job registered under `key`.
    pub fn job(&self, key: &str) -> Option<&AnalysisJob> {
        self.jobs.get(key)
    }

    /// The dispatch queue.
    pub fn queue(&self) -> &PriorityQueue<AnalysisJob> {
        &self.queue
    }

    /// Current scheduler statistics.
    pub fn stats(&self) -> RefresherStats {
        RefresherStats {
            queued: self.queue.len(),
            running: self.tasks.len(),
            quarantined: self
                .jobs
                .values()
                .filter(|job| job.status() == JobStatus::Quarantined)
                .count(),
            succeeded: self.succeeded_total,
            failed_total: self.failed_total,
            concurrency_limit: self.settings.config.concurrency_limit,
        }
    }

    /// Run until `cancel` flips to `true` (or its sender is dropped), then
    /// drain in-flight executions and return the final statistics.
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) -> RefresherStats {
        let mut period = self.settings.config.tick_interval();
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            tick_seconds = period.as_secs(),
            concurrency_limit = self.settings.config.concurrency_limit,
            window = %self.settings.window,
            "Refresher started"
        );

        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        tracing::info!("Refresher received shutdown signal");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let report = self.run_cycle(Utc::now()).await;
                    tracing::debug!(
                        window_open = report.window_open,
                        candidates = report.candidates,
                        pushed = report.pushed,
                        skipped = report.skipped,
                        removed = report.removed,
                        dispatched = report.dispatched,
                        discarded = report.discarded,
                        fetch_failed = report.fetch_failed,
                        "Refresher cycle complete"
                    );

                    let next = self.settings.config.tick_interval();
                    if next != period {
                        period = next;
                        ticker = time::interval_at(Instant::now() + period, period);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    }
                }
                Some(joined) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => {
                    let now = Utc::now();
                    self.reconcile(joined, now).await;
                    self.dispatch(now);
                }
            }
        }

        self.shutdown().await;
        self.stats()
    }

    /// One full cycle: reconcile, snapshot config, refresh the queue from
    /// the provider, then dispatch if the window is open.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        self.reconcile_finished(now).await;
        self.reload_config();

        let mut report = CycleReport::default();
        if !self.settings.config.enabled {
            tracing::trace!("Refresher disabled, skipping cycle");
            return report;
        }

        report.released = self.release_quarantines(now);
        report.window_open = self.settings.window.contains_instant(now);

        let candidates = match self.provider.list_stale_candidates().await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch stale candidates, skipping cycle");
                report.fetch_failed = true;
                return report;
            }
        };
        report.candidates = candidates.len();

        let mut seen = HashSet::with_capacity(candidates.len());
        for candidate in &candidates {
            match self.upsert(candidate, now) {
                Ok(Upsert::Pushed(key)) => {
                    report.pushed += 1;
                    seen.insert(key);
                }
                Ok(Upsert::Held(key)) => {
                    seen.insert(key);
                }
                Ok(Upsert::NotStale) => {}
                Err(e) => {
                    tracing::warn!(
                        key = %candidate.identity.key(),
                        error = %e,
                        "Skipping candidate with invalid signals"
                    );
                    report.skipped += 1;
                }
            }
        }
        report.removed = self.remove_absent(&seen, now);

        if !report.window_open {
            tracing::debug!(
                window = %self.settings.window,
                queued = self.queue.len(),
                "Outside maintenance window, not dispatching"
            );
            return report;
        }

        let dispatch = self.dispatch(now);
        report.dispatched = dispatch.dispatched;
        report.discarded = dispatch.discarded;
        report
    }

    /// Pop and spawn eligible jobs until the concurrency budget is spent or
    /// the queue is empty. Ineligible jobs are dropped until the next
    /// signal refresh.
    pub fn dispatch(&mut self, now: DateTime<Utc>) -> DispatchReport {
        let mut report = DispatchReport::default();
        if !self.settings.config.enabled || !self.settings.window.contains_instant(now) {
            return report;
        }

        let limit = self.settings.config.concurrency_limit;
        let min_interval = self.settings.config.min_reanalyze_interval();

        while self.tasks.len() < limit {
            let Some(popped) = self.queue.pop_max() else {
                break;
            };
            let Some(job) = self.jobs.get_mut(popped.key()) else {
                continue;
            };

            if !job.is_eligible(now, &self.settings.window, min_interval) {
                tracing::debug!(key = %job.key(), "Discarding ineligible job until next refresh");
                if let Err(e) = job.transition(JobStatus::Pending, now) {
                    tracing::warn!(error = %e, "Failed to return discarded job to pending");
                }
                report.discarded += 1;
                continue;
            }

            if let Err(e) = job.transition(JobStatus::Running, now) {
                tracing::warn!(error = %e, "Refusing to dispatch job");
                continue;
            }

            let attempt_id = Uuid::now_v7();
            let attempt = job.retry_count().saturating_add(1);
            let identity = job.identity().clone();
            let executor = self.executor.clone();
            let target = identity.clone();
            let handle = self
                .tasks
                .spawn(async move { executor.execute(attempt_id, target).await });

            tracing::info!(
                key = %job.key(),
                attempt_id = %attempt_id,
                attempt,
                score = job.priority(),
                running = self.tasks.len(),
                limit,
                "Dispatched statistics refresh"
            );

            self.in_flight.insert(
                handle.id(),
                InFlight {
                    key: job.key().to_string(),
                    identity,
                    attempt_id,
                    attempt,
                    started: Instant::now(),
                },
            );
            report.dispatched += 1;
        }

        report
    }

    /// Wait for the next execution to finish and reconcile it.
    ///
    /// Returns `None` when nothing is running.
    pub async fn next_completion(&mut self) -> Option<CompletionRecord> {
        let joined = self.tasks.join_next_with_id().await?;
        self.reconcile(joined, Utc::now()).await
    }

    /// Wait for every in-flight execution and reconcile them all.
    pub async fn drain(&mut self) -> Vec<CompletionRecord> {
        let mut records = Vec::new();
        while let Some(joined) = self.tasks.join_next_with_id().await {
            if let Some(record) = self.reconcile(joined, Utc::now()).await {
                records.push(record);
            }
        }
        records
    }

    async fn shutdown(&mut self) {
        let timeout = self.settings.config.shutdown_timeout();
        let deadline = Instant::now() + timeout;

        if !self.tasks.is_empty() {
            tracing::info!(
                running = self.tasks.len(),
                timeout_seconds = timeout.as_secs(),
                "Waiting for in-flight refreshes to complete"
            );
        }

        while !self.tasks.is_empty() {
            match time::timeout_at(deadline, self.tasks.join_next_with_id()).await {
                Ok(Some(joined)) => {
                    self.reconcile(joined, Utc::now()).await;
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        running = self.tasks.len(),
                        "Shutdown timeout elapsed, cancelling remaining refreshes"
                    );
                    self.tasks.abort_all();
                    break;
                }
            }
        }

        // Aborted tasks still surface here and are recorded as failures.
        self.drain().await;

        self.queue.clear();
        let now = Utc::now();
        for job in self.jobs.values_mut() {
            if job.status() == JobStatus::Queued {
                if let Err(e) = job.transition(JobStatus::Pending, now) {
                    tracing::warn!(error = %e, "Failed to unqueue job during shutdown");
                }
            }
        }

        tracing::info!(
            succeeded = self.succeeded_total,
            failed = self.failed_total,
            "Refresher shut down complete"
        );
    }

    async fn reconcile_finished(&mut self, now: DateTime<Utc>) {
        while let Some(joined) = self.tasks.try_join_next_with_id() {
            self.reconcile(joined, now).await;
        }
    }

    /// Apply the result of one finished task to its job and write history.
    async fn reconcile(
        &mut self,
        joined: Result<(Id, ExecutionOutcome), JoinError>,
        now: DateTime<Utc>,
    ) -> Option<CompletionRecord> {
        let (id, joined) = match joined {
            Ok((id, outcome)) => (id, Ok(outcome)),
            Err(e) => (e.id(), Err(e)),
        };
        let Some(flight) = self.in_flight.remove(&id) else {
            tracing::warn!(task_id = %id, "Completion for an unknown task");
            return None;
        };

        let (failure, duration_ms, finished_at) = match joined {
            Ok(outcome) => (
                outcome
                    .result
                    .err()
                    .map(|e| (e.to_string(), e.is_permanent())),
                outcome.duration_ms,
                outcome.finished_at,
            ),
            Err(e) => {
                let reason = if e.is_cancelled() {
                    "Refresh cancelled before completion"
                } else {
                    "Refresh task panicked"
                };
                let elapsed = flight.started.elapsed().as_millis();
                (
                    Some((reason.to_string(), false)),
                    u64::try_from(elapsed).unwrap_or(u64::MAX),
                    now,
                )
            }
        };

        let outcome = match self.jobs.get_mut(&flight.key) {
            Some(job) => apply_completion(job, failure.clone(), &self.settings.config, now),
            None if failure.is_none() => CompletionOutcome::Succeeded,
            None => CompletionOutcome::Failed,
        };
        match outcome {
            CompletionOutcome::Succeeded => self.succeeded_total += 1,
            CompletionOutcome::Failed | CompletionOutcome::Quarantined => self.failed_total += 1,
        }

        let record = CompletionRecord {
            attempt_id: flight.attempt_id,
            identity: flight.identity,
            finished_at,
            outcome,
            attempt: flight.attempt,
            duration_ms,
            message: failure.map(|(message, _)| message),
            source: HistorySource::Analyze,
        };
        self.executor.record(&record).await;
        Some(record)
    }

    fn reload_config(&mut self) {
        if !matches!(self.config_rx.has_changed(), Ok(true)) {
            return;
        }
        let next = self.config_rx.borrow_and_update().clone();
        if next == self.settings.config {
            return;
        }

        match Settings::from_config(next) {
            Ok(settings) => {
                tracing::info!(
                    concurrency_limit = settings.config.concurrency_limit,
                    window = %settings.window,
                    max_retries = settings.config.max_retries,
                    "Refresher configuration reloaded"
                );
                self.settings = settings;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring invalid refresher configuration");
            }
        }
    }

    fn release_quarantines(&mut self, now: DateTime<Utc>) -> usize {
        let mut released = 0;
        for job in self.jobs.values_mut() {
            match job.release_quarantine(now) {
                Ok(true) => {
                    tracing::info!(key = %job.key(), "Quarantine expired");
                    released += 1;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to release quarantine"),
            }
        }
        released
    }

    /// Create or update the job for `candidate` and push it if schedulable.
    fn upsert(&mut self, candidate: &CandidateSignals, now: DateTime<Utc>) -> AppResult<Upsert> {
        candidate.identity.validate()?;
        let signals = JobSignals::try_from_candidate(candidate)?;
        if !signals.is_stale(self.settings.config.auto_analyze_ratio) {
            return Ok(Upsert::NotStale);
        }

        let weights = &self.settings.config.weights;
        let job = match self.jobs.entry(candidate.identity.key()) {
            Entry::Occupied(entry) => {
                let job = entry.into_mut();
                job.refresh_signals(signals, weights, now);
                job
            }
            Entry::Vacant(entry) => entry.insert(AnalysisJob::new(
                candidate.identity.clone(),
                signals,
                weights,
                now,
            )),
        };

        if !job.status().is_schedulable() {
            tracing::trace!(key = %job.key(), status = %job.status(), "Holding job");
            return Ok(Upsert::Held(job.key().to_string()));
        }

        job.transition(JobStatus::Queued, now)?;
        self.queue.push(job.clone());
        Ok(Upsert::Pushed(job.key().to_string()))
    }

    /// Drop queued jobs whose object was not in this cycle's snapshot and
    /// forget idle jobs nobody reports any more.
    fn remove_absent(&mut self, seen: &HashSet<String>, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for key in self.queue.keys() {
            if seen.contains(&key) {
                continue;
            }
            if self.queue.remove(&key).is_some() {
                removed += 1;
                tracing::debug!(key = %key, "Removed job no longer reported as stale");
            }
            if let Some(job) = self.jobs.get_mut(&key) {
                if let Err(e) = job.transition(JobStatus::Pending, now) {
                    tracing::warn!(error = %e, "Failed to unqueue removed job");
                }
            }
        }

        self.jobs.retain(|key, job| {
            seen.contains(key)
                || matches!(job.status(), JobStatus::Running | JobStatus::Quarantined)
        });
        removed
    }
}

/// Move a running job to its post-execution status.
fn apply_completion(
    job: &mut AnalysisJob,
    failure: Option<(String, bool)>,
    config: &RefresherConfig,
    now: DateTime<Utc>,
) -> CompletionOutcome {
    let Some((message, permanent)) = failure else {
        if let Err(e) = job.record_success(now) {
            tracing::error!(error = %e, "Failed to record refresh success");
        }
        tracing::info!(key = %job.key(), "Statistics refresh succeeded");
        return CompletionOutcome::Succeeded;
    };

    match job.record_failure(
        now,
        message.clone(),
        config.max_retries,
        config.quarantine_duration(),
        permanent,
    ) {
        Ok(FailureDisposition::Retry { retry_count }) => {
            tracing::warn!(
                key = %job.key(),
                retry_count,
                max_retries = config.max_retries,
                error = %message,
                "Statistics refresh failed, will retry"
            );
            CompletionOutcome::Failed
        }
        Ok(FailureDisposition::Quarantined { until }) => {
            tracing::error!(
                key = %job.key(),
                retry_count = job.retry_count(),
                permanent,
                until = %until,
                error = %message,
                "Statistics refresh failed, object quarantined"
            );
            CompletionOutcome::Quarantined
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to record refresh failure");
            CompletionOutcome::Failed
        }
    }
}
