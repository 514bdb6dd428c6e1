//! Integration tests for the acquisition engine.
//!
//! Drives the public `Engine` API with in-process adapters to check fallback
//! order, retry budgets, access-driven reordering, worker and per-host caps,
//! validation, cancellation and fatal-error handling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use paperfetch_core::acquire::{
    ALREADY_PRESENT, AcquireError, ChainSettings, ConcurrencyConfig, Engine, ExhaustionReason,
    RetryPolicy,
};
use paperfetch_core::classify::{AccessClassifier, AccessLookup, AccessStatus, LookupError};
use paperfetch_core::request::AcquisitionRequest;
use paperfetch_core::source::{
    AccessTier, AttemptOutcome, HostLimit, SourceAdapter, SourceError,
};
use tempfile::TempDir;

mod support;
use support::adapters::{
    GatedSource, InFlight, ScriptedSource, descriptor, html_artifact, pdf_artifact, pdf_bytes,
};

fn fast_settings(max_attempts: u32) -> ChainSettings {
    ChainSettings {
        policy: RetryPolicy::new(
            max_attempts,
            Duration::from_millis(1),
            Duration::from_millis(5),
            2.0,
            0.0,
        ),
        ..ChainSettings::default()
    }
}

fn request(doi: &str) -> AcquisitionRequest {
    AcquisitionRequest::new(doi).unwrap()
}

fn requests(count: usize) -> Vec<AcquisitionRequest> {
    (0..count)
        .map(|i| request(&format!("10.5555/batch.{i}")))
        .collect()
}

fn network_error() -> SourceError {
    SourceError::network("https://b.test/x", "connection reset")
}

struct FixedLookup(AccessStatus);

#[async_trait]
impl AccessLookup for FixedLookup {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn lookup(&self, _doi: &str) -> Result<AccessStatus, LookupError> {
        Ok(self.0)
    }
}

// ==================== Fallback Chain Tests ====================

#[tokio::test]
async fn test_not_found_then_transient_retries_then_success() {
    let dir = TempDir::new().unwrap();
    let a = ScriptedSource::failing(descriptor("a", "a.test", 1, AccessTier::Free), || {
        SourceError::not_found("no copy")
    });
    let b = ScriptedSource::new(
        descriptor("b", "b.test", 2, AccessTier::Free),
        vec![Err(network_error()), Err(network_error()), Ok(pdf_artifact())],
    );

    let engine = Engine::builder(dir.path())
        .sources(vec![a.clone(), b.clone()])
        .settings(fast_settings(3))
        .build()
        .await
        .unwrap();

    let result = engine.acquire(request("10.1000/chain")).await.unwrap();

    assert!(result.success);
    assert_eq!(result.source.as_deref(), Some("b"));
    let outcomes: Vec<(&str, u32, AttemptOutcome)> = result
        .attempts
        .iter()
        .map(|r| (r.source.as_str(), r.attempt, r.outcome))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            ("a", 1, AttemptOutcome::NotFound),
            ("b", 1, AttemptOutcome::NetworkError),
            ("b", 2, AttemptOutcome::NetworkError),
            ("b", 3, AttemptOutcome::Success),
        ]
    );
    assert_eq!(a.calls(), 1, "terminal failures are not retried");

    let stored = std::fs::read(result.artifact.unwrap()).unwrap();
    assert_eq!(stored, pdf_bytes());
    assert!(dir.path().join("10.1000%2Fchain_b.pdf").exists());
}

#[tokio::test]
async fn test_all_transient_failures_exhaust_every_budget() {
    let dir = TempDir::new().unwrap();
    let sources: Vec<Arc<dyn SourceAdapter>> = (1..=3)
        .map(|i| {
            ScriptedSource::failing(
                descriptor(&format!("s{i}"), &format!("s{i}.test"), i, AccessTier::Free),
                network_error,
            ) as Arc<dyn SourceAdapter>
        })
        .collect();

    let engine = Engine::builder(dir.path())
        .sources(sources)
        .settings(fast_settings(2))
        .build()
        .await
        .unwrap();

    let result = engine.acquire(request("10.1000/none")).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.attempts.len(), 3 * 2);
    assert_eq!(result.exhaustion, Some(ExhaustionReason::AllSourcesFailed));
    assert!(result.artifact.is_none());
    assert!(result.attempts.iter().all(|r| !r.is_success()));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_validation_failure_advances_to_next_source() {
    let dir = TempDir::new().unwrap();
    let a = ScriptedSource::new(
        descriptor("a", "a.test", 1, AccessTier::Free),
        vec![Ok(html_artifact()), Ok(pdf_artifact())],
    );
    let b = ScriptedSource::new(
        descriptor("b", "b.test", 2, AccessTier::Free),
        vec![Ok(pdf_artifact())],
    );

    let engine = Engine::builder(dir.path())
        .sources(vec![a.clone(), b])
        .settings(fast_settings(3))
        .build()
        .await
        .unwrap();

    let result = engine.acquire(request("10.1000/html")).await.unwrap();

    assert!(result.success);
    assert_eq!(result.source.as_deref(), Some("b"));
    assert_eq!(result.attempts[0].outcome, AttemptOutcome::ValidationError);
    assert!(
        result.attempts[0]
            .detail
            .as_deref()
            .unwrap()
            .contains("HTML")
    );
    assert_eq!(a.calls(), 1, "a rejected artifact is not refetched from the same source");
    assert!(!dir.path().join("10.1000%2Fhtml_a.pdf").exists());
}

#[tokio::test]
async fn test_retry_after_delays_next_attempt() {
    let dir = TempDir::new().unwrap();
    let a = ScriptedSource::new(
        descriptor("a", "a.test", 1, AccessTier::Free),
        vec![
            Err(SourceError::rate_limited(
                "https://a.test/x",
                Some(Duration::from_millis(150)),
            )),
            Ok(pdf_artifact()),
        ],
    );

    let engine = Engine::builder(dir.path())
        .sources(vec![a])
        .settings(fast_settings(3))
        .build()
        .await
        .unwrap();

    let start = Instant::now();
    let result = engine.acquire(request("10.1000/slow")).await.unwrap();

    assert!(result.success);
    assert_eq!(result.attempts[0].outcome, AttemptOutcome::RateLimited);
    assert!(start.elapsed() >= Duration::from_millis(150));
}

// ==================== Access Ordering Tests ====================

async fn run_with_access(status: AccessStatus) -> (String, AccessStatus) {
    let dir = TempDir::new().unwrap();
    let restricted = ScriptedSource::new(
        descriptor("relay", "relay.test", 1, AccessTier::Restricted),
        vec![Ok(pdf_artifact())],
    );
    let free = ScriptedSource::new(
        descriptor("repo", "repo.test", 2, AccessTier::Free),
        vec![Ok(pdf_artifact())],
    );

    let engine = Engine::builder(dir.path())
        .sources(vec![restricted, free])
        .classifier(AccessClassifier::new(Arc::new(FixedLookup(status))))
        .settings(fast_settings(1))
        .build()
        .await
        .unwrap();

    let result = engine.acquire(request("10.1000/oa")).await.unwrap();
    (result.source.unwrap(), result.access)
}

#[tokio::test]
async fn test_open_access_promotes_free_sources() {
    let (source, access) = run_with_access(AccessStatus::Open).await;
    assert_eq!(access, AccessStatus::Open);
    assert_eq!(source, "repo");
}

#[tokio::test]
async fn test_restricted_and_unknown_keep_priority_order() {
    let (source, access) = run_with_access(AccessStatus::Restricted).await;
    assert_eq!(access, AccessStatus::Restricted);
    assert_eq!(source, "relay");

    let (source, access) = run_with_access(AccessStatus::Unknown).await;
    assert_eq!(access, AccessStatus::Unknown);
    assert_eq!(source, "relay");
}

// ==================== Concurrency Tests ====================

#[tokio::test]
async fn test_worker_count_bounds_concurrent_chains() {
    let dir = TempDir::new().unwrap();
    let in_flight = Arc::new(InFlight::default());
    let source = GatedSource::new(
        descriptor("gated", "gated.test", 1, AccessTier::Free).with_limit(HostLimit {
            max_concurrent: 64,
            min_interval: Duration::ZERO,
        }),
        Duration::from_millis(30),
        Arc::clone(&in_flight),
        || Ok(pdf_artifact()),
    );

    let engine = Engine::builder(dir.path())
        .sources(vec![source])
        .settings(fast_settings(1))
        .build()
        .await
        .unwrap();

    let report = engine
        .acquire_batch(requests(12), &ConcurrencyConfig::new(3).unwrap())
        .await
        .unwrap();

    assert_eq!(report.total, 12);
    assert_eq!(report.succeeded, 12);
    assert!(in_flight.high_water() <= 3, "high water {}", in_flight.high_water());
    assert!(in_flight.high_water() >= 2, "workers should overlap");
}

#[tokio::test]
async fn test_sources_sharing_a_host_share_its_cap() {
    let dir = TempDir::new().unwrap();
    let in_flight = Arc::new(InFlight::default());
    let limit = HostLimit {
        max_concurrent: 2,
        min_interval: Duration::ZERO,
    };
    let first = GatedSource::new(
        descriptor("page", "shared.test", 1, AccessTier::Free).with_limit(limit),
        Duration::from_millis(20),
        Arc::clone(&in_flight),
        || Err(SourceError::not_found("no link")),
    );
    let second = GatedSource::new(
        descriptor("browser", "shared.test", 2, AccessTier::Free).with_limit(limit),
        Duration::from_millis(20),
        Arc::clone(&in_flight),
        || Ok(pdf_artifact()),
    );

    let engine = Engine::builder(dir.path())
        .sources(vec![first, second])
        .settings(fast_settings(1))
        .build()
        .await
        .unwrap();

    let report = engine
        .acquire_batch(requests(8), &ConcurrencyConfig::new(8).unwrap())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 8);
    assert_eq!(report.by_source.get("browser"), Some(&8));
    assert!(in_flight.high_water() <= 2, "high water {}", in_flight.high_water());
    assert!(engine.limiter().high_water("shared.test") <= 2);
}

#[tokio::test]
async fn test_cancel_stops_batch_promptly() {
    let dir = TempDir::new().unwrap();
    let in_flight = Arc::new(InFlight::default());
    let source = GatedSource::new(
        descriptor("slow", "slow.test", 1, AccessTier::Free),
        Duration::from_secs(30),
        in_flight,
        || Ok(pdf_artifact()),
    );

    let engine = Engine::builder(dir.path())
        .sources(vec![source])
        .settings(fast_settings(3))
        .build()
        .await
        .unwrap();

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let start = Instant::now();
    let report = engine
        .acquire_batch(requests(6), &ConcurrencyConfig::new(2).unwrap())
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.exhaustion.get(&ExhaustionReason::Cancelled), Some(&report.total));
}

// ==================== Fatal Error Tests ====================

#[tokio::test]
async fn test_duplicate_identifier_is_fatal() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::new(
        descriptor("a", "a.test", 1, AccessTier::Free),
        vec![Ok(pdf_artifact())],
    );
    let engine = Engine::builder(dir.path())
        .sources(vec![source.clone()])
        .build()
        .await
        .unwrap();

    let batch = vec![
        request("10.1000/same"),
        request("https://doi.org/10.1000/SAME"),
    ];
    let err = engine
        .acquire_batch(batch, &ConcurrencyConfig::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AcquireError::DuplicateIdentifier { ref doi } if doi == "10.1000/same"));
    assert_eq!(source.calls(), 0, "nothing runs when the batch is rejected");
}

#[tokio::test]
async fn test_unwritable_output_dir_is_fatal() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let source = ScriptedSource::new(descriptor("a", "a.test", 1, AccessTier::Free), vec![]);
    let err = Engine::builder(&blocker)
        .sources(vec![source])
        .build()
        .await
        .unwrap_err();

    assert!(matches!(err, AcquireError::OutputDirUnwritable { .. }));
}

#[tokio::test]
async fn test_no_enabled_sources_is_fatal() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::new(
        descriptor("a", "a.test", 1, AccessTier::Free).with_enabled(false),
        vec![],
    );
    let err = Engine::builder(dir.path())
        .sources(vec![source])
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, AcquireError::NoSources));
}

#[tokio::test]
async fn test_fatal_batch_leaves_engine_usable() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();
    let source = ScriptedSource::new(
        descriptor("a", "a.test", 1, AccessTier::Free),
        (0..4).map(|_| Ok(pdf_artifact())).collect(),
    );
    let engine = Engine::builder(&out)
        .sources(vec![source])
        .settings(fast_settings(1))
        .build()
        .await
        .unwrap();

    // Replace the output directory with a file so the first write fails.
    std::fs::remove_dir(&out).unwrap();
    std::fs::write(&out, b"file").unwrap();
    let err = engine
        .acquire_batch(requests(2), &ConcurrencyConfig::new(1).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, AcquireError::Storage { .. }));
    assert!(!engine.cancel_token().is_cancelled());

    std::fs::remove_file(&out).unwrap();
    std::fs::create_dir(&out).unwrap();
    let result = engine.acquire(request("10.5555/after")).await.unwrap();
    assert!(result.success);
    assert_eq!(result.attempts.len(), 1);
}

#[tokio::test]
async fn test_long_identifier_stored_alongside_short_one() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::new(
        descriptor("a", "a.test", 1, AccessTier::Free),
        vec![Ok(pdf_artifact()), Ok(pdf_artifact())],
    );
    let engine = Engine::builder(dir.path())
        .sources(vec![source])
        .settings(fast_settings(1))
        .build()
        .await
        .unwrap();

    let batch = vec![
        request("10.1234/short"),
        request(&format!("10.1234/{}", "x".repeat(250))),
    ];
    let report = engine
        .acquire_batch(batch, &ConcurrencyConfig::new(1).unwrap())
        .await
        .unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.succeeded, 2);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}

// ==================== Existing Artifact & Report Tests ====================

#[tokio::test]
async fn test_skip_existing_reuses_stored_artifact() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("10.1000%2Fkept_a.pdf"), pdf_bytes()).unwrap();
    let source = ScriptedSource::new(descriptor("a", "a.test", 1, AccessTier::Free), vec![]);

    let engine = Engine::builder(dir.path())
        .sources(vec![source.clone()])
        .settings(ChainSettings {
            skip_existing: true,
            ..fast_settings(1)
        })
        .build()
        .await
        .unwrap();

    let result = engine.acquire(request("10.1000/kept")).await.unwrap();

    assert!(result.success);
    assert_eq!(result.attempts.len(), 1);
    assert_eq!(result.attempts[0].detail.as_deref(), Some(ALREADY_PRESENT));
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn test_batch_report_aggregates_and_serializes() {
    let dir = TempDir::new().unwrap();
    let good = ScriptedSource::new(
        descriptor("good", "good.test", 1, AccessTier::Free),
        vec![Ok(pdf_artifact()), Err(SourceError::not_found("gone"))],
    );

    let engine = Engine::builder(dir.path().join("out"))
        .sources(vec![good])
        .settings(fast_settings(1))
        .build()
        .await
        .unwrap();

    let report = engine
        .acquire_batch(requests(2), &ConcurrencyConfig::new(1).unwrap())
        .await
        .unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.by_source.get("good"), Some(&1));
    assert_eq!(
        report.exhaustion.get(&ExhaustionReason::AllSourcesFailed),
        Some(&1)
    );

    let path = dir.path().join("report.json");
    report.write_json(&path).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(json["total"], 2);
    assert_eq!(json["results"].as_array().unwrap().len(), 2);
    assert!(json["total_elapsed_ms"].is_u64());
}
