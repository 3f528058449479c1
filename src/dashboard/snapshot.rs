use crate::dashboard::reconciler::{ReconcilerSender, SnapshotResource, ViewModelStore};
use crate::dashboard::upstream::DashboardApi;
use crate::error::AppError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshScope {
    All,
    Status,
}

impl RefreshScope {
    fn merge(self, other: Self) -> Self {
        if self == Self::All || other == Self::All {
            Self::All
        } else {
            Self::Status
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefreshTrigger {
    tx: mpsc::UnboundedSender<RefreshScope>,
}

impl RefreshTrigger {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RefreshScope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn request(&self, scope: RefreshScope) {
        if self.tx.send(scope).is_err() {
            debug!(?scope, "refresh requested after poller stopped");
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotLimits {
    pub trades: Option<u16>,
    pub candles: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    pub applied: Vec<&'static str>,
    pub failed: Vec<&'static str>,
}

async fn pull_resource<F>(
    name: &'static str,
    read: F,
    sink: &ReconcilerSender,
) -> Result<&'static str, &'static str>
where
    F: Future<Output = Result<SnapshotResource, AppError>>,
{
    match read.await {
        Ok(resource) => {
            sink.snapshot(resource);
            Ok(name)
        }
        Err(error) => {
            warn!(resource = name, %error, "snapshot read failed; keeping previous value");
            Err(name)
        }
    }
}

/// Reads every resource in `scope` concurrently. Each successful read is
/// forwarded as soon as it lands; failures leave the previous value in place.
/// Candles are read for `chart_engine` when one is known.
pub async fn pull_snapshot(
    api: &dyn DashboardApi,
    scope: RefreshScope,
    limits: SnapshotLimits,
    chart_engine: Option<&str>,
    sink: &ReconcilerSender,
) -> PullReport {
    let status = pull_resource(
        "status",
        async { api.fetch_strategy_status().await.map(SnapshotResource::Status) },
        sink,
    );

    let results = match scope {
        RefreshScope::Status => vec![status.await],
        RefreshScope::All => {
            let (account, positions, trades, candles, status) = tokio::join!(
                pull_resource(
                    "account",
                    async { api.fetch_account().await.map(SnapshotResource::Account) },
                    sink,
                ),
                pull_resource(
                    "positions",
                    async { api.fetch_positions().await.map(SnapshotResource::Positions) },
                    sink,
                ),
                pull_resource(
                    "trades",
                    async { api.fetch_trades(limits.trades).await.map(SnapshotResource::Trades) },
                    sink,
                ),
                pull_resource(
                    "candles",
                    async {
                        api.fetch_candles(limits.candles, chart_engine)
                            .await
                            .map(|bars| SnapshotResource::Candles {
                                engine_id: chart_engine.map(str::to_string),
                                bars,
                            })
                    },
                    sink,
                ),
                status,
            );
            vec![account, positions, trades, candles, status]
        }
    };

    let mut report = PullReport::default();
    for result in results {
        match result {
            Ok(name) => report.applied.push(name),
            Err(name) => report.failed.push(name),
        }
    }
    report
}

fn coalesce_pending(
    scope: RefreshScope,
    refresh_rx: &mut mpsc::UnboundedReceiver<RefreshScope>,
) -> RefreshScope {
    let mut merged = scope;
    while let Ok(next) = refresh_rx.try_recv() {
        merged = merged.merge(next);
    }
    merged
}

/// Pulls once immediately, then every `poll_interval` and on every refresh
/// request. Pulls run one at a time and are never interrupted mid-flight.
pub async fn run_snapshot_poller(
    api: Arc<dyn DashboardApi>,
    poll_interval: Duration,
    limits: SnapshotLimits,
    store: ViewModelStore,
    sink: ReconcilerSender,
    mut refresh_rx: mpsc::UnboundedReceiver<RefreshScope>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let scope = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => RefreshScope::All,
            Some(scope) = refresh_rx.recv() => scope,
        };
        let scope = coalesce_pending(scope, &mut refresh_rx);
        if scope == RefreshScope::All {
            ticker.reset();
        }

        let chart_engine = store.read().await.chart_engine.clone();
        let report = pull_snapshot(
            api.as_ref(),
            scope,
            limits,
            chart_engine.as_deref(),
            &sink,
        )
        .await;
        debug!(?scope, applied = ?report.applied, failed = ?report.failed, "snapshot pull finished");
    }

    debug!("snapshot poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::reconciler::ReconcilerInput;
    use crate::dashboard::types::{
        Account, Candle, MutationAck, Position, StrategyStatus, Trade, TradeSide, ViewModel,
    };
    use crate::dashboard::upstream::StartStrategyRequest;
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::RwLock;

    #[derive(Default)]
    struct FlakyApi {
        fail_trades: bool,
        status_reads: AtomicUsize,
        full_reads: AtomicUsize,
        candle_engines: Mutex<Vec<Option<String>>>,
    }

    fn refused() -> AppError {
        AppError::InvalidArgument("connection refused".to_string())
    }

    #[async_trait]
    impl DashboardApi for FlakyApi {
        async fn fetch_account(&self) -> Result<Account, AppError> {
            self.full_reads.fetch_add(1, Ordering::SeqCst);
            Ok(Account::default())
        }

        async fn fetch_positions(&self) -> Result<Vec<Position>, AppError> {
            Ok(vec![Position {
                order_id: "1".to_string(),
                symbol: "EURUSD".to_string(),
                side: TradeSide::Sell,
                entry_price: 1.2,
                volume: 10.0,
                sl: 0.0,
                tp: 0.0,
                entry_time: String::new(),
                unrealized_pnl: -1.0,
            }])
        }

        async fn fetch_trades(&self, limit: Option<u16>) -> Result<Vec<Trade>, AppError> {
            assert_eq!(limit, Some(25));
            if self.fail_trades {
                return Err(refused());
            }
            Ok(Vec::new())
        }

        async fn fetch_candles(
            &self,
            _limit: Option<u16>,
            engine_id: Option<&str>,
        ) -> Result<Vec<Candle>, AppError> {
            self.candle_engines.lock().push(engine_id.map(str::to_string));
            Ok(Vec::new())
        }

        async fn fetch_strategy_status(&self) -> Result<StrategyStatus, AppError> {
            self.status_reads.fetch_add(1, Ordering::SeqCst);
            Ok(StrategyStatus::default())
        }

        async fn close_position(&self, _order_id: &str) -> Result<MutationAck, AppError> {
            Err(refused())
        }

        async fn start_strategy(
            &self,
            _request: &StartStrategyRequest,
        ) -> Result<MutationAck, AppError> {
            Err(refused())
        }

        async fn stop_strategy(&self) -> Result<MutationAck, AppError> {
            Err(refused())
        }

        async fn stop_engine(&self, _engine_id: &str) -> Result<MutationAck, AppError> {
            Err(refused())
        }

        async fn stop_all_engines(&self) -> Result<MutationAck, AppError> {
            Err(refused())
        }

        async fn update_strategy_params(
            &self,
            _params: &Map<String, Value>,
        ) -> Result<MutationAck, AppError> {
            Err(refused())
        }
    }

    fn limits() -> SnapshotLimits {
        SnapshotLimits {
            trades: Some(25),
            candles: None,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ReconcilerInput>) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(ReconcilerInput::Snapshot(resource)) = rx.try_recv() {
            names.push(resource.name());
        }
        names.sort_unstable();
        names
    }

    #[tokio::test]
    async fn partial_failure_forwards_successful_resources() {
        let api = FlakyApi {
            fail_trades: true,
            ..FlakyApi::default()
        };
        let (sink, mut rx) = ReconcilerSender::channel();

        let report = pull_snapshot(&api, RefreshScope::All, limits(), None, &sink).await;

        assert_eq!(report.failed, vec!["trades"]);
        assert_eq!(report.applied.len(), 4);
        assert_eq!(drain(&mut rx), vec!["account", "candles", "positions", "status"]);
    }

    #[tokio::test]
    async fn status_scope_reads_only_status() {
        let api = FlakyApi::default();
        let (sink, mut rx) = ReconcilerSender::channel();

        let report = pull_snapshot(&api, RefreshScope::Status, limits(), None, &sink).await;

        assert_eq!(report.applied, vec!["status"]);
        assert_eq!(api.full_reads.load(Ordering::SeqCst), 0);
        assert_eq!(drain(&mut rx), vec!["status"]);
    }

    #[tokio::test]
    async fn candles_are_read_for_the_chart_engine() {
        let api = FlakyApi::default();
        let (sink, mut rx) = ReconcilerSender::channel();

        pull_snapshot(
            &api,
            RefreshScope::All,
            limits(),
            Some("bb_GBPUSD_15m"),
            &sink,
        )
        .await;

        assert_eq!(
            *api.candle_engines.lock(),
            vec![Some("bb_GBPUSD_15m".to_string())]
        );
        let mut tagged = None;
        while let Ok(input) = rx.try_recv() {
            if let ReconcilerInput::Snapshot(SnapshotResource::Candles { engine_id, .. }) = input {
                tagged = engine_id;
            }
        }
        assert_eq!(tagged.as_deref(), Some("bb_GBPUSD_15m"));
    }

    #[test]
    fn coalesces_queued_refresh_requests() {
        let (trigger, mut rx) = RefreshTrigger::channel();
        trigger.request(RefreshScope::Status);
        trigger.request(RefreshScope::All);
        trigger.request(RefreshScope::Status);

        assert_eq!(coalesce_pending(RefreshScope::Status, &mut rx), RefreshScope::All);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn poller_runs_immediately_then_on_interval_and_on_request() {
        let api = Arc::new(FlakyApi::default());
        let (sink, _rx) = ReconcilerSender::channel();
        let (trigger, refresh_rx) = RefreshTrigger::channel();
        let cancel_token = CancellationToken::new();

        let handle = tokio::spawn(run_snapshot_poller(
            api.clone(),
            Duration::from_secs(5),
            limits(),
            Arc::new(RwLock::new(ViewModel::new(10))),
            sink,
            refresh_rx,
            cancel_token.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(api.full_reads.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.full_reads.load(Ordering::SeqCst), 2);

        trigger.request(RefreshScope::Status);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(api.full_reads.load(Ordering::SeqCst), 2);
        assert_eq!(api.status_reads.load(Ordering::SeqCst), 3);

        cancel_token.cancel();
        handle.await.expect("poller should stop cleanly");
    }
}
