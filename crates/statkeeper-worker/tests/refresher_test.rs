//! Integration tests for the refresher control loop.

mod helpers;

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::watch;

use statkeeper_core::config::RefresherConfig;
use statkeeper_core::types::{CandidateSignals, CompletionOutcome, TableIdentity};
use statkeeper_entity::JobStatus;
use statkeeper_worker::CycleReport;

use helpers::{config, never_analyzed, table, Behavior, StubAnalyzer, StubProvider, TestRefresher};

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn night_window(limit: usize) -> RefresherConfig {
    RefresherConfig {
        window_start: "01:00 +0000".to_string(),
        window_end: "05:00 +0000".to_string(),
        ..config(limit)
    }
}

#[tokio::test]
async fn test_dispatches_by_descending_priority() {
    let now = Utc::now();
    let two_hours_ago = Some(now - Duration::hours(2));
    let provider = StubProvider::with(vec![
        table("t1", 1_000, 500, two_hours_ago),
        table("t2", 1_000, 900, two_hours_ago),
        table("t3", 1_000, 100, two_hours_ago),
    ]);
    let mut ctx = TestRefresher::new(provider, StubAnalyzer::new(Behavior::Succeed), config(1));

    let first = ctx.refresher.run_cycle(now).await;
    assert_eq!(first.pushed, 3);
    assert_eq!(first.dispatched, 1);
    ctx.refresher.drain().await;

    // t2 was just refreshed, so it is popped first again and discarded.
    let second = ctx.refresher.run_cycle(now).await;
    assert_eq!(second.discarded, 1);
    assert_eq!(second.dispatched, 1);
    ctx.refresher.drain().await;

    ctx.refresher.run_cycle(now).await;
    ctx.refresher.drain().await;

    assert_eq!(ctx.analyzer.calls(), vec!["app.t2", "app.t1", "app.t3"]);
}

#[tokio::test]
async fn test_concurrency_never_exceeds_limit() {
    let names = ["a", "b", "c", "d", "e", "f"];
    let provider = StubProvider::with(never_analyzed(&names));
    let analyzer = StubAnalyzer::with_delay(Behavior::Succeed, StdDuration::from_millis(30));
    let mut ctx = TestRefresher::new(provider, analyzer, config(2));

    for _ in 0..8 {
        ctx.refresher.run_cycle(Utc::now()).await;
        assert!(ctx.refresher.stats().running <= 2);
        if ctx.refresher.stats().running > 0 {
            ctx.refresher.next_completion().await;
        }
    }
    ctx.refresher.drain().await;

    assert_eq!(ctx.analyzer.call_count(), names.len());
    assert_eq!(ctx.analyzer.peak(), 2);
    assert_eq!(ctx.refresher.stats().succeeded, names.len() as u64);
}

#[tokio::test]
async fn test_success_records_history() {
    let provider = StubProvider::with(never_analyzed(&["orders"]));
    let mut ctx = TestRefresher::new(provider, StubAnalyzer::new(Behavior::Succeed), config(1));

    ctx.refresher.run_cycle(Utc::now()).await;
    let record = ctx.refresher.next_completion().await.unwrap();

    assert_eq!(record.outcome, CompletionOutcome::Succeeded);
    assert_eq!(record.attempt, 1);
    assert!(record.message.is_none());

    let job = ctx.refresher.job("app.orders").unwrap();
    assert_eq!(job.status(), JobStatus::Succeeded);
    assert!(job.signals().last_refresh.is_some());
    assert_eq!(ctx.history.records().len(), 1);
}

#[tokio::test]
async fn test_failing_job_retried_then_quarantined() {
    let provider = StubProvider::with(never_analyzed(&["broken"]));
    let mut ctx = TestRefresher::new(
        provider,
        StubAnalyzer::new(Behavior::FailTransient),
        config(1),
    );

    ctx.refresher.run_cycle(Utc::now()).await;
    ctx.refresher.drain().await;
    let job = ctx.refresher.job("app.broken").unwrap();
    assert_eq!(job.status(), JobStatus::Pending);
    assert_eq!(job.retry_count(), 1);

    for _ in 0..4 {
        ctx.refresher.run_cycle(Utc::now()).await;
        ctx.refresher.drain().await;
    }

    assert_eq!(ctx.analyzer.call_count(), 3);
    let job = ctx.refresher.job("app.broken").unwrap();
    assert_eq!(job.status(), JobStatus::Quarantined);
    assert!(job.quarantined_until().is_some());
    assert!(job.last_error().unwrap().contains("lock wait timeout"));

    let records = ctx.history.records();
    let outcomes: Vec<_> = records.iter().map(|r| r.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            CompletionOutcome::Failed,
            CompletionOutcome::Failed,
            CompletionOutcome::Quarantined
        ]
    );
    let attempts: Vec<_> = records.iter().map(|r| r.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);

    let stats = ctx.refresher.stats();
    assert_eq!(stats.quarantined, 1);
    assert_eq!(stats.failed_total, 3);
    assert_eq!(stats.queued, 0);
}

#[tokio::test]
async fn test_permanent_failure_quarantines_immediately() {
    let provider = StubProvider::with(never_analyzed(&["gone"]));
    let mut ctx = TestRefresher::new(
        provider,
        StubAnalyzer::new(Behavior::FailPermanent),
        config(1),
    );

    ctx.refresher.run_cycle(Utc::now()).await;
    let record = ctx.refresher.next_completion().await.unwrap();

    assert_eq!(record.outcome, CompletionOutcome::Quarantined);
    assert_eq!(ctx.analyzer.call_count(), 1);
    assert_eq!(
        ctx.refresher.job("app.gone").unwrap().status(),
        JobStatus::Quarantined
    );
}

#[tokio::test]
async fn test_quarantine_expires_after_cool_down() {
    let provider = StubProvider::with(never_analyzed(&["flaky"]));
    let cfg = RefresherConfig {
        max_retries: 1,
        quarantine_seconds: 60,
        ..config(1)
    };
    let mut ctx = TestRefresher::new(provider, StubAnalyzer::new(Behavior::FailTransient), cfg);

    ctx.refresher.run_cycle(Utc::now()).await;
    ctx.refresher.drain().await;
    assert_eq!(
        ctx.refresher.job("app.flaky").unwrap().status(),
        JobStatus::Quarantined
    );

    let during = ctx.refresher.run_cycle(Utc::now()).await;
    assert_eq!(during.released, 0);
    assert_eq!(during.dispatched, 0);
    assert_eq!(ctx.analyzer.call_count(), 1);

    ctx.analyzer.set_behavior(Behavior::Succeed);
    let after = ctx
        .refresher
        .run_cycle(Utc::now() + Duration::seconds(61))
        .await;
    assert_eq!(after.released, 1);
    assert_eq!(after.dispatched, 1);
    ctx.refresher.drain().await;

    let job = ctx.refresher.job("app.flaky").unwrap();
    assert_eq!(job.status(), JobStatus::Succeeded);
    assert_eq!(job.retry_count(), 0);
}

#[tokio::test]
async fn test_closed_window_refreshes_queue_without_dispatch() {
    let provider = StubProvider::with(never_analyzed(&["a", "b", "c"]));
    let mut ctx = TestRefresher::new(provider, StubAnalyzer::new(Behavior::Succeed), night_window(2));

    let report = ctx.refresher.run_cycle(noon()).await;
    assert!(!report.window_open);
    assert_eq!(report.pushed, 3);
    assert_eq!(report.dispatched, 0);
    assert_eq!(ctx.refresher.queue().len(), 3);
    assert_eq!(ctx.refresher.dispatch(noon()).dispatched, 0);

    let three_am = Utc.with_ymd_and_hms(2024, 6, 2, 3, 0, 0).unwrap();
    let report = ctx.refresher.run_cycle(three_am).await;
    assert!(report.window_open);
    assert_eq!(report.dispatched, 2);
    ctx.refresher.drain().await;
    assert_eq!(ctx.analyzer.call_count(), 2);
}

#[tokio::test]
async fn test_recently_refreshed_job_is_skipped_despite_top_score() {
    let now = Utc::now();
    let provider = StubProvider::with(vec![
        table("hot", 1_000, 10_000, Some(now - Duration::seconds(1))),
        table("cold", 1_000, 10, Some(now - Duration::hours(48))),
    ]);
    let mut ctx = TestRefresher::new(provider, StubAnalyzer::new(Behavior::Succeed), config(1));

    let report = ctx.refresher.run_cycle(now).await;
    assert_eq!(report.discarded, 1);
    assert_eq!(report.dispatched, 1);
    ctx.refresher.drain().await;

    assert_eq!(ctx.analyzer.calls(), vec!["app.cold"]);
    assert_eq!(
        ctx.refresher.job("app.hot").unwrap().status(),
        JobStatus::Pending
    );
}

#[tokio::test]
async fn test_malformed_candidates_are_skipped() {
    let provider = StubProvider::with(vec![
        table("negative", -5, 1, None),
        CandidateSignals::new(TableIdentity::table("", "nameless"), 10, 1, None),
        table("fine", 10, 1, None),
    ]);
    let mut ctx = TestRefresher::new(provider, StubAnalyzer::new(Behavior::Succeed), config(4));

    let report = ctx.refresher.run_cycle(Utc::now()).await;
    assert_eq!(report.candidates, 3);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.pushed, 1);
    assert_eq!(report.dispatched, 1);
    ctx.refresher.drain().await;
    assert_eq!(ctx.analyzer.calls(), vec!["app.fine"]);
}

#[tokio::test]
async fn test_fetch_failure_skips_cycle() {
    let provider = StubProvider::with(never_analyzed(&["a"]));
    let mut ctx = TestRefresher::new(
        provider.clone(),
        StubAnalyzer::new(Behavior::Succeed),
        config(1),
    );

    provider.set_failing(true);
    let report = ctx.refresher.run_cycle(Utc::now()).await;
    assert!(report.fetch_failed);
    assert_eq!(report.dispatched, 0);

    provider.set_failing(false);
    let report = ctx.refresher.run_cycle(Utc::now()).await;
    assert!(!report.fetch_failed);
    assert_eq!(report.dispatched, 1);
}

#[tokio::test]
async fn test_dropped_objects_are_removed() {
    let provider = StubProvider::with(never_analyzed(&["kept", "dropped"]));
    let mut ctx = TestRefresher::new(
        provider.clone(),
        StubAnalyzer::new(Behavior::Succeed),
        night_window(1),
    );

    ctx.refresher.run_cycle(noon()).await;
    assert_eq!(ctx.refresher.queue().len(), 2);

    provider.set(never_analyzed(&["kept"]));
    let report = ctx.refresher.run_cycle(noon()).await;
    assert_eq!(report.removed, 1);
    assert_eq!(ctx.refresher.queue().keys(), vec!["app.kept".to_string()]);
    assert!(ctx.refresher.job("app.dropped").is_none());
}

#[tokio::test]
async fn test_staleness_threshold_filters_candidates() {
    let last = Some(Utc::now() - Duration::days(2));
    let provider = StubProvider::with(vec![
        table("busy", 1_000, 600, last),
        table("quiet", 1_000, 10, last),
        table("new", 1_000, 0, None),
    ]);
    let cfg = RefresherConfig {
        auto_analyze_ratio: 0.5,
        ..night_window(1)
    };
    let mut ctx = TestRefresher::new(provider, StubAnalyzer::new(Behavior::Succeed), cfg);

    let report = ctx.refresher.run_cycle(noon()).await;
    assert_eq!(report.pushed, 2);
    assert!(ctx.refresher.queue().contains("app.busy"));
    assert!(ctx.refresher.queue().contains("app.new"));
    assert!(!ctx.refresher.queue().contains("app.quiet"));
}

#[tokio::test]
async fn test_config_reload_applies_next_cycle() {
    let provider = StubProvider::with(never_analyzed(&["a", "b", "c", "d"]));
    let mut ctx = TestRefresher::new(provider, StubAnalyzer::new(Behavior::Hang), config(1));

    let report = ctx.refresher.run_cycle(Utc::now()).await;
    assert_eq!(report.dispatched, 1);

    ctx.config_tx.send(config(3)).unwrap();
    let report = ctx.refresher.run_cycle(Utc::now()).await;
    assert_eq!(report.dispatched, 2);
    assert_eq!(ctx.refresher.stats().running, 3);
    assert_eq!(ctx.refresher.stats().concurrency_limit, 3);

    ctx.config_tx.send(config(0)).unwrap();
    ctx.refresher.run_cycle(Utc::now()).await;
    assert_eq!(ctx.refresher.config().concurrency_limit, 3);
}

#[tokio::test]
async fn test_disabled_refresher_does_nothing() {
    let provider = StubProvider::with(never_analyzed(&["a"]));
    let cfg = RefresherConfig {
        enabled: false,
        ..config(1)
    };
    let mut ctx = TestRefresher::new(provider.clone(), StubAnalyzer::new(Behavior::Succeed), cfg);

    let report = ctx.refresher.run_cycle(Utc::now()).await;
    assert_eq!(report, CycleReport::default());
    assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_panicked_execution_counts_as_failure() {
    let provider = StubProvider::with(never_analyzed(&["crash"]));
    let mut ctx = TestRefresher::new(provider, StubAnalyzer::new(Behavior::Panic), config(1));

    ctx.refresher.run_cycle(Utc::now()).await;
    let record = ctx.refresher.next_completion().await.unwrap();

    assert_eq!(record.outcome, CompletionOutcome::Failed);
    assert!(record.message.unwrap().contains("panicked"));
    let job = ctx.refresher.job("app.crash").unwrap();
    assert_eq!(job.status(), JobStatus::Pending);
    assert_eq!(job.retry_count(), 1);
    assert_eq!(ctx.refresher.stats().running, 0);
}

async fn wait_for_calls(analyzer: &StubAnalyzer, count: usize) {
    for _ in 0..200 {
        if analyzer.call_count() >= count {
            return;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    panic!("analyzer was not called {count} times");
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_work() {
    let provider = StubProvider::with(never_analyzed(&["a"]));
    let analyzer = StubAnalyzer::with_delay(Behavior::Succeed, StdDuration::from_millis(50));
    let ctx = TestRefresher::new(provider, analyzer.clone(), config(1));
    let history = ctx.history.clone();

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let handle = tokio::spawn(ctx.refresher.run(cancel_rx));

    wait_for_calls(&analyzer, 1).await;
    cancel_tx.send(true).unwrap();
    let stats = handle.await.unwrap();

    assert_eq!(stats.running, 0);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed_total, 0);
    assert_eq!(history.records().len(), 1);
}

#[tokio::test]
async fn test_shutdown_timeout_aborts_and_reconciles() {
    let provider = StubProvider::with(never_analyzed(&["a", "b"]));
    let analyzer = StubAnalyzer::new(Behavior::Hang);
    let cfg = RefresherConfig {
        shutdown_timeout_seconds: 0,
        ..config(2)
    };
    let ctx = TestRefresher::new(provider, analyzer.clone(), cfg);
    let history = ctx.history.clone();

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let handle = tokio::spawn(ctx.refresher.run(cancel_rx));

    wait_for_calls(&analyzer, 2).await;
    cancel_tx.send(true).unwrap();
    let stats = handle.await.unwrap();

    assert_eq!(stats.running, 0);
    assert_eq!(stats.failed_total, 2);
    let records = history.records();
    assert_eq!(records.len(), 2);
    for record in records {
        assert_eq!(record.outcome, CompletionOutcome::Failed);
        assert!(record.message.unwrap().contains("cancelled"));
    }
}

#[tokio::test]
async fn test_partition_and_dotted_table_are_separate_jobs() {
    let provider = StubProvider::with(vec![
        CandidateSignals::new(TableIdentity::partition("app", "orders", "p1"), 1_000, 100, None),
        CandidateSignals::new(TableIdentity::table("app", "orders.p1"), 1_000, 100, None),
    ]);
    let mut ctx = TestRefresher::new(provider, StubAnalyzer::new(Behavior::Succeed), config(4));

    let report = ctx.refresher.run_cycle(noon()).await;
    assert_eq!(report.pushed, 2);
    assert_eq!(report.dispatched, 2);
    ctx.refresher.drain().await;

    let mut calls = ctx.analyzer.calls();
    calls.sort();
    assert_eq!(calls, vec!["app.\"orders.p1\"", "app.orders.p1"]);
    assert_eq!(
        ctx.refresher.job("app.orders.p1").unwrap().status(),
        JobStatus::Succeeded
    );
    assert_eq!(
        ctx.refresher.job("app.\"orders.p1\"").unwrap().status(),
        JobStatus::Succeeded
    );
}
