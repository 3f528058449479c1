use crate::dashboard::channel::ChannelStatusSnapshot;
use crate::dashboard::config::DashboardConfig;
use crate::dashboard::gate::MutationGate;
use crate::dashboard::reconciler::{
    DashboardNotice, ReconcilerInput, ReconcilerSender, ViewModelStore,
};
use crate::dashboard::snapshot::{RefreshScope, RefreshTrigger, SnapshotLimits};
use crate::dashboard::types::ViewModel;
use crate::dashboard::upstream::DashboardApi;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const NOTICE_CAPACITY: usize = 256;

pub struct SessionTasks {
    pub cancellation_token: CancellationToken,
    pub join_handles: Vec<JoinHandle<()>>,
}

/// Everything one dashboard session owns. Background tasks live in `tasks`
/// until the session is shut down.
pub struct DashboardSession {
    pub started_at: Instant,
    pub config: DashboardConfig,
    pub api: Arc<dyn DashboardApi>,
    pub view_model: ViewModelStore,
    pub channel_status: watch::Receiver<ChannelStatusSnapshot>,
    pub gate: MutationGate,
    pub refresh: RefreshTrigger,
    pub inputs: ReconcilerSender,
    pub notices: broadcast::Sender<DashboardNotice>,
    pub tasks: Mutex<Option<SessionTasks>>,
}

/// Receiving ends handed to the background tasks when a session starts.
pub struct SessionWiring {
    pub inputs: mpsc::UnboundedReceiver<ReconcilerInput>,
    pub refresh: mpsc::UnboundedReceiver<RefreshScope>,
    pub channel_status: watch::Sender<ChannelStatusSnapshot>,
}

impl DashboardSession {
    pub fn new(config: DashboardConfig, api: Arc<dyn DashboardApi>) -> (Self, SessionWiring) {
        let (inputs, inputs_rx) = ReconcilerSender::channel();
        let (refresh, refresh_rx) = RefreshTrigger::channel();
        let (status_tx, status_rx) = watch::channel(ChannelStatusSnapshot::idle());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let view_model = Arc::new(RwLock::new(ViewModel::new(config.candle_capacity)));

        let session = Self {
            started_at: Instant::now(),
            config,
            api,
            view_model,
            channel_status: status_rx,
            gate: MutationGate::new(),
            refresh,
            inputs,
            notices,
            tasks: Mutex::new(None),
        };
        let wiring = SessionWiring {
            inputs: inputs_rx,
            refresh: refresh_rx,
            channel_status: status_tx,
        };
        (session, wiring)
    }

    pub fn snapshot_limits(&self) -> SnapshotLimits {
        SnapshotLimits {
            trades: self.config.trades_limit,
            candles: self.config.candles_limit,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardNotice> {
        self.notices.subscribe()
    }
}
