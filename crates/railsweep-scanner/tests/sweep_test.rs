//! Sweep scenarios driven through stub fetchers and credential providers.

use async_trait::async_trait;
use railsweep_core::{BoundingBox, Credential, DelayRange, Tile};
use railsweep_scanner::{
    AuthError, CredentialProvider, ExpirySignal, FetchOutcome, RawPayload, ScanError,
    SweepOrchestrator, SweepSettings, SweepStatus, TileError, TileFetcher, TilePosition,
};
use railsweep_scheduler::Pacer;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

const COOKIE: &str = ".ASPXAUTH";

#[derive(Debug, Clone)]
struct Call {
    index: usize,
    attempt: usize,
    credential: String,
}

type Script = dyn Fn(&Call) -> FetchOutcome + Send + Sync;

/// Fetcher answering from a script keyed by tile index and attempt number.
struct StubFetcher {
    script: Box<Script>,
    calls: Mutex<Vec<Call>>,
}

impl StubFetcher {
    fn new(script: impl Fn(&Call) -> FetchOutcome + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TileFetcher for StubFetcher {
    async fn fetch(
        &self,
        _tile: &Tile,
        credential: &Credential,
        position: TilePosition,
    ) -> FetchOutcome {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let attempt = calls.iter().filter(|c| c.index == position.index).count();
            let call = Call {
                index: position.index,
                attempt,
                credential: credential.value().to_string(),
            };
            calls.push(call.clone());
            call
        };
        (self.script)(&call)
    }
}

/// Provider handing out FRESH0, FRESH1, ... or failing.
struct StubProvider {
    calls: AtomicUsize,
    fail: bool,
}

impl StubProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for StubProvider {
    async fn obtain_credential(&self) -> Result<Credential, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AuthError::Rejected("bad password".to_string()));
        }
        Ok(Credential::new(COOKIE, format!("FRESH{n}")).unwrap())
    }

    fn describe(&self) -> &'static str {
        "stub"
    }
}

fn initial() -> Option<Credential> {
    Some(Credential::new(COOKIE, "INITIAL").unwrap())
}

fn payload(value: Value) -> FetchOutcome {
    match value {
        Value::Object(map) => FetchOutcome::Success(map),
        other => panic!("not an object: {other}"),
    }
}

fn trains(ids: &[&str]) -> FetchOutcome {
    let items: Vec<Value> = ids.iter().map(|id| json!({"id": id})).collect();
    payload(json!({ "trains": items }))
}

fn empty() -> FetchOutcome {
    FetchOutcome::Success(RawPayload::new())
}

fn explicit_expiry() -> FetchOutcome {
    FetchOutcome::AuthExpired(ExpirySignal::Explicit("HTTP 401".to_string()))
}

/// 2x2 grid: 110..155 E, -10..-45 S at 25 degrees
fn four_tiles() -> SweepSettings {
    SweepSettings {
        bbox: BoundingBox::new(110.0, -10.0, 155.0, -45.0).unwrap(),
        tile_size_deg: 25.0,
        ..SweepSettings::default()
    }
}

/// 10x1 strip of one-degree tiles
fn ten_tiles() -> SweepSettings {
    SweepSettings {
        bbox: BoundingBox::new(140.0, -30.0, 150.0, -31.0).unwrap(),
        tile_size_deg: 1.0,
        ..SweepSettings::default()
    }
}

fn orchestrator(
    fetcher: Arc<StubFetcher>,
    provider: Arc<StubProvider>,
    settings: SweepSettings,
) -> SweepOrchestrator {
    SweepOrchestrator::new(fetcher, provider, settings).with_pacer(Pacer::disabled())
}

fn train_ids(value: &Value) -> Vec<String> {
    value
        .as_array()
        .expect("trains is a list")
        .iter()
        .map(|t| t["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_four_tile_sweep_merges_and_dedups() {
    let fetcher = StubFetcher::new(|call| match call.index {
        0 => trains(&["A", "B"]),
        1 => trains(&["B", "C"]),
        2 => empty(),
        _ => payload(json!({"trains": [{"id": "D"}], "alerts": {"n1": "Delays"}})),
    });
    let provider = StubProvider::new();

    let report = orchestrator(fetcher.clone(), provider.clone(), four_tiles())
        .run(initial(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.tiles_total, 4);
    assert_eq!(report.tiles_merged, 4);
    assert_eq!(report.status(), SweepStatus::Complete);
    assert_eq!(report.refreshes, 0);
    assert_eq!(provider.calls(), 0);

    let doc = report.aggregate.to_document();
    assert_eq!(train_ids(&doc["trains"]), vec!["A", "B", "C", "D"]);
    assert_eq!(doc["alerts"], json!({"n1": "Delays"}));
    assert!(doc["favs"].is_null());
    assert!(doc["generated_at"].is_i64());

    let order: Vec<usize> = fetcher.calls().iter().map(|c| c.index).collect();
    assert_eq!(order, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_four_distinct_partials_give_four_trains() {
    let fetcher = StubFetcher::new(|call| trains(&[&format!("train-{}", call.index)]));

    let report = orchestrator(fetcher, StubProvider::new(), four_tiles())
        .run(initial(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.tiles_total, 4);
    assert_eq!(report.aggregate.list_len("trains"), Some(4));
}

#[tokio::test]
async fn test_first_copy_in_planner_order_wins() {
    let fetcher = StubFetcher::new(|call| match call.index {
        1 => payload(json!({"trains": [{"id": "X", "speed": 80}]})),
        3 => payload(json!({"trains": [{"id": "X", "speed": 45}]})),
        _ => empty(),
    });

    let report = orchestrator(fetcher, StubProvider::new(), four_tiles())
        .run(initial(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report.aggregate.get("trains"),
        json!([{"id": "X", "speed": 80}])
    );
}

#[tokio::test]
async fn test_persistent_expiry_is_fatal_after_one_refresh() {
    let fetcher = StubFetcher::new(|_| explicit_expiry());
    let provider = StubProvider::new();

    let err = orchestrator(fetcher.clone(), provider.clone(), four_tiles())
        .run(initial(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ScanError::AuthExpiredAfterRefresh { tile_index: 0 }
    ));
    assert_eq!(provider.calls(), 1);

    let calls = fetcher.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].credential, "INITIAL");
    assert_eq!(calls[1].credential, "FRESH0");
}

#[tokio::test]
async fn test_transport_errors_do_not_abort() {
    let fetcher = StubFetcher::new(|call| match call.index {
        2 => FetchOutcome::TransportError(TileError::Timeout),
        5 => FetchOutcome::TransportError(TileError::Network("reset".to_string())),
        9 => FetchOutcome::TransportError(TileError::Malformed("<html>".to_string())),
        i => trains(&[&format!("T{i}")]),
    });
    let provider = StubProvider::new();

    let report = orchestrator(fetcher.clone(), provider.clone(), ten_tiles())
        .run(initial(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.tiles_total, 10);
    assert_eq!(report.tiles_merged, 7);
    let failed: Vec<usize> = report.failed_tiles.iter().map(|f| f.index).collect();
    assert_eq!(failed, vec![2, 5, 9]);
    assert_eq!(report.failed_tiles[0].error, TileError::Timeout);
    assert_eq!(report.status(), SweepStatus::Degraded);
    assert!(!report.cancelled);
    assert_eq!(report.aggregate.list_len("trains"), Some(7));

    // No retries for transport errors
    assert_eq!(fetcher.calls().len(), 10);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_mid_sweep_expiry_refreshes_and_continues() {
    let fetcher = StubFetcher::new(|call| {
        if call.credential == "INITIAL" && call.index >= 2 {
            explicit_expiry()
        } else {
            trains(&[&format!("T{}", call.index)])
        }
    });
    let provider = StubProvider::new();

    let report = orchestrator(fetcher.clone(), provider.clone(), four_tiles())
        .run(initial(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.tiles_merged, 4);
    assert_eq!(report.refreshes, 1);
    assert_eq!(report.heuristic_expiries, 0);
    assert_eq!(report.credential.value(), "FRESH0");
    assert_eq!(
        train_ids(&report.aggregate.get("trains")),
        vec!["T0", "T1", "T2", "T3"]
    );

    let calls: Vec<(usize, usize)> = fetcher
        .calls()
        .iter()
        .map(|c| (c.index, c.attempt))
        .collect();
    assert_eq!(calls, vec![(0, 0), (1, 0), (2, 0), (2, 1), (3, 0)]);
}

#[tokio::test]
async fn test_empty_first_tile_refreshes_then_merges() {
    let fetcher = StubFetcher::new(|call| match (call.index, call.attempt) {
        (0, 0) => FetchOutcome::AuthExpired(ExpirySignal::EmptyPayload),
        (0, _) => trains(&["A"]),
        _ => empty(),
    });
    let provider = StubProvider::new();

    let report = orchestrator(fetcher, provider.clone(), four_tiles())
        .run(initial(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.refreshes, 1);
    assert_eq!(report.heuristic_expiries, 1);
    assert_eq!(report.tiles_merged, 4);
    assert_eq!(report.aggregate.list_len("trains"), Some(1));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_empty_after_refresh_is_fatal() {
    let fetcher = StubFetcher::new(|_| FetchOutcome::AuthExpired(ExpirySignal::EmptyPayload));
    let provider = StubProvider::new();

    let err = orchestrator(fetcher.clone(), provider.clone(), four_tiles())
        .run(initial(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ScanError::AuthExpiredAfterRefresh { tile_index: 0 }
    ));
    assert_eq!(provider.calls(), 1);

    let calls = fetcher.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.index == 0));
    assert_eq!(calls[1].credential, "FRESH0");
}

#[tokio::test]
async fn test_cancellation_returns_partial_result() {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let fetcher = StubFetcher::new(move |call| {
        if call.index == 1 {
            token.cancel();
        }
        trains(&[&format!("T{}", call.index)])
    });

    let report = orchestrator(fetcher.clone(), StubProvider::new(), ten_tiles())
        .run(initial(), &cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.status(), SweepStatus::Partial);
    assert_eq!(report.tiles_merged, 2);
    assert_eq!(report.tiles_total, 10);
    assert_eq!(
        train_ids(&report.aggregate.get("trains")),
        vec!["T0", "T1"]
    );
    assert!(report.aggregate.generated_at().is_some());
    assert_eq!(fetcher.calls().len(), 2);
}

#[tokio::test]
async fn test_missing_credential_is_obtained_up_front() {
    let fetcher = StubFetcher::new(|_| trains(&["A"]));
    let provider = StubProvider::new();

    let report = orchestrator(fetcher.clone(), provider.clone(), four_tiles())
        .run(None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(provider.calls(), 1);
    assert_eq!(report.refreshes, 0);
    assert!(fetcher.calls().iter().all(|c| c.credential == "FRESH0"));
}

#[tokio::test]
async fn test_provider_failure_is_fatal() {
    let fetcher = StubFetcher::new(|_| explicit_expiry());
    let provider = StubProvider::failing();

    let err = orchestrator(fetcher.clone(), provider, four_tiles())
        .run(initial(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::Auth(AuthError::Rejected(_))));
    assert_eq!(fetcher.calls().len(), 1);
}

#[tokio::test]
async fn test_invalid_plan_is_fatal() {
    let settings = SweepSettings {
        tile_size_deg: 0.0,
        ..four_tiles()
    };
    let fetcher = StubFetcher::new(|_| empty());

    let err = orchestrator(fetcher.clone(), StubProvider::new(), settings)
        .run(initial(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::InvalidPlan(_)));
    assert!(fetcher.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_pacing_between_tiles_only() {
    let fetcher = StubFetcher::new(|_| empty());
    let settings = SweepSettings {
        pacing: DelayRange::from_millis(1_000, 1_000).unwrap(),
        ..four_tiles()
    };

    let start = tokio::time::Instant::now();
    SweepOrchestrator::new(fetcher, StubProvider::new(), settings)
        .run(initial(), &CancellationToken::new())
        .await
        .unwrap();

    // Three pauses for four tiles, none after the last
    assert_eq!(start.elapsed(), std::time::Duration::from_millis(3_000));
}

#[tokio::test(start_paused = true)]
async fn test_pacing_before_retry_after_refresh() {
    let fetcher = StubFetcher::new(|call| match (call.index, call.attempt) {
        (0, 0) => explicit_expiry(),
        _ => empty(),
    });
    let settings = SweepSettings {
        pacing: DelayRange::from_millis(500, 500).unwrap(),
        ..four_tiles()
    };

    let start = tokio::time::Instant::now();
    let report = SweepOrchestrator::new(fetcher, StubProvider::new(), settings)
        .run(initial(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.refreshes, 1);
    assert_eq!(start.elapsed(), std::time::Duration::from_millis(2_000));
}
