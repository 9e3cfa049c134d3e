//! Shared in-memory collaborators for refresher integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use statkeeper_core::config::RefresherConfig;
use statkeeper_core::error::AppError;
use statkeeper_core::result::AppResult;
use statkeeper_core::traits::{AnalyzeExecutor, ExecutionError, JobHistoryStore, SignalProvider};
use statkeeper_core::types::{CandidateSignals, CompletionRecord, TableIdentity};
use statkeeper_worker::Refresher;

/// Signal provider returning whatever the test last configured.
#[derive(Default)]
pub struct StubProvider {
    candidates: Mutex<Vec<CandidateSignals>>,
    failing: Mutex<bool>,
    pub calls: AtomicUsize,
}

impl StubProvider {
    pub fn with(candidates: Vec<CandidateSignals>) -> Arc<Self> {
        let provider = Self::default();
        *provider.candidates.lock().unwrap() = candidates;
        Arc::new(provider)
    }

    pub fn set(&self, candidates: Vec<CandidateSignals>) {
        *self.candidates.lock().unwrap() = candidates;
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl SignalProvider for StubProvider {
    async fn list_stale_candidates(&self) -> AppResult<Vec<CandidateSignals>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.failing.lock().unwrap() {
            return Err(AppError::database("statistics catalog unavailable"));
        }
        Ok(self.candidates.lock().unwrap().clone())
    }
}

/// How the stub analyzer responds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    FailTransient,
    FailPermanent,
    Hang,
    Panic,
}

/// Analyzer that records calls and peak concurrency.
pub struct StubAnalyzer {
    behavior: Mutex<Behavior>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl StubAnalyzer {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Self::with_delay(behavior, Duration::ZERO)
    }

    pub fn with_delay(behavior: Behavior, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            delay,
            calls: Mutex::new(Vec::new()),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalyzeExecutor for StubAnalyzer {
    async fn execute(&self, target: &TableIdentity) -> Result<(), ExecutionError> {
        let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        self.calls.lock().unwrap().push(target.key());
        let behavior = *self.behavior.lock().unwrap();

        if behavior == Behavior::Hang {
            std::future::pending::<()>().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.current.fetch_sub(1, Ordering::SeqCst);

        match behavior {
            Behavior::Succeed | Behavior::Hang => Ok(()),
            Behavior::FailTransient => Err(ExecutionError::Transient("lock wait timeout".into())),
            Behavior::FailPermanent => Err(ExecutionError::Permanent("relation does not exist".into())),
            Behavior::Panic => panic!("analyzer crashed"),
        }
    }
}

/// History store kept in memory.
#[derive(Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<CompletionRecord>>,
}

impl MemoryHistory {
    pub fn records(&self) -> Vec<CompletionRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn count_by_key(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for record in self.records.lock().unwrap().iter() {
            *counts.entry(record.identity.key()).or_insert(0) += 1;
        }
        counts
    }
}

#[async_trait]
impl JobHistoryStore for MemoryHistory {
    async fn record_completion(&self, record: &CompletionRecord) -> AppResult<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Test context wiring a refresher to stub collaborators.
pub struct TestRefresher {
    pub refresher: Refresher,
    pub provider: Arc<StubProvider>,
    pub analyzer: Arc<StubAnalyzer>,
    pub history: Arc<MemoryHistory>,
    pub config_tx: watch::Sender<RefresherConfig>,
}

impl TestRefresher {
    pub fn new(
        provider: Arc<StubProvider>,
        analyzer: Arc<StubAnalyzer>,
        config: RefresherConfig,
    ) -> Self {
        let history = Arc::new(MemoryHistory::default());
        let (config_tx, config_rx) = watch::channel(config);
        let refresher = Refresher::new(
            provider.clone(),
            analyzer.clone(),
            history.clone(),
            config_rx,
        )
        .expect("valid config");

        Self {
            refresher,
            provider,
            analyzer,
            history,
            config_tx,
        }
    }
}

/// Always-open window, no staleness threshold, generous retry budget.
pub fn config(concurrency_limit: usize) -> RefresherConfig {
    RefresherConfig {
        concurrency_limit,
        window_start: "00:00".to_string(),
        window_end: "00:00".to_string(),
        auto_analyze_ratio: 0.0,
        tick_interval_seconds: 1,
        ..RefresherConfig::default()
    }
}

pub fn table(name: &str, rows: i64, modified: i64, last: Option<DateTime<Utc>>) -> CandidateSignals {
    CandidateSignals::new(TableIdentity::table("app", name), rows, modified, last)
}

pub fn never_analyzed(names: &[&str]) -> Vec<CandidateSignals> {
    names.iter().map(|name| table(name, 1_000, 100, None)).collect()
}
