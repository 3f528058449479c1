use crate::dashboard::snapshot::{RefreshScope, RefreshTrigger};
use crate::dashboard::types::{
    Account, Candle, DashboardEvent, Position, StrategyStatus, StreamEvent, Trade, ViewModel,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub type ViewModelStore = Arc<RwLock<ViewModel>>;

/// One resource's worth of a snapshot pull.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotResource {
    Account(Account),
    Positions(Vec<Position>),
    Trades(Vec<Trade>),
    /// Bars read for `engine_id`; `None` when no chart engine was known yet.
    Candles {
        engine_id: Option<String>,
        bars: Vec<Candle>,
    },
    Status(StrategyStatus),
}

impl SnapshotResource {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Account(_) => "account",
            Self::Positions(_) => "positions",
            Self::Trades(_) => "trades",
            Self::Candles { .. } => "candles",
            Self::Status(_) => "status",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcilerInput {
    Snapshot(SnapshotResource),
    Event(StreamEvent),
    Connection(bool),
    PositionRemoved(String),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DashboardNotice {
    ViewModelChanged { revision: u64 },
    ConnectionChanged { connected: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Changed,
    Unchanged,
    /// The input carried no usable data; the authoritative snapshot must be re-read.
    Refresh(RefreshScope),
    /// The view changed and part of it now needs a fresh read.
    ChangedAndRefresh(RefreshScope),
}

impl ApplyOutcome {
    pub fn is_change(self) -> bool {
        matches!(self, Self::Changed | Self::ChangedAndRefresh(_))
    }

    fn refresh_scope(self) -> Option<RefreshScope> {
        match self {
            Self::Refresh(scope) | Self::ChangedAndRefresh(scope) => Some(scope),
            Self::Changed | Self::Unchanged => None,
        }
    }
}

/// Cloneable handle feeding the reconciler queue. Sends after teardown are dropped.
#[derive(Debug, Clone)]
pub struct ReconcilerSender {
    tx: mpsc::UnboundedSender<ReconcilerInput>,
}

impl ReconcilerSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ReconcilerInput>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, input: ReconcilerInput) -> bool {
        self.tx.send(input).is_ok()
    }

    pub fn snapshot(&self, resource: SnapshotResource) -> bool {
        self.send(ReconcilerInput::Snapshot(resource))
    }

    pub fn event(&self, event: StreamEvent) -> bool {
        self.send(ReconcilerInput::Event(event))
    }

    pub fn connection(&self, connected: bool) -> bool {
        self.send(ReconcilerInput::Connection(connected))
    }

    pub fn position_removed(&self, order_id: String) -> bool {
        self.send(ReconcilerInput::PositionRemoved(order_id))
    }
}

/// Points the chart at the status's active engine. A switch empties the
/// candle buffer, so the caller must re-read candles for the new engine.
fn follow_active_engine(view: &mut ViewModel) -> bool {
    let active = view
        .strategy_status
        .as_ref()
        .and_then(|status| status.active_engine_id.clone());
    match active {
        Some(engine_id) if view.chart_engine.as_deref() != Some(engine_id.as_str()) => {
            info!(engine_id = %engine_id, "chart follows active engine");
            view.chart_engine = Some(engine_id);
            view.candles.clear();
            true
        }
        _ => false,
    }
}

fn status_outcome(view: &mut ViewModel) -> ApplyOutcome {
    if follow_active_engine(view) {
        ApplyOutcome::ChangedAndRefresh(RefreshScope::All)
    } else {
        ApplyOutcome::Changed
    }
}

/// True when bars tagged `engine_id` belong on the chart. Untagged bars are
/// taken as the chart engine's; the first tagged bar picks the engine when
/// none is known yet.
fn accepts_chart_engine(view: &mut ViewModel, engine_id: Option<String>) -> bool {
    let Some(source) = engine_id else {
        return true;
    };
    match view.chart_engine.as_deref() {
        Some(chart) if chart != source => {
            debug!(engine_id = %source, chart_engine = chart, "dropping bars from another engine");
            false
        }
        Some(_) => true,
        None => {
            view.chart_engine = Some(source);
            true
        }
    }
}

pub fn apply_snapshot(view: &mut ViewModel, resource: SnapshotResource) -> ApplyOutcome {
    match resource {
        SnapshotResource::Account(account) => view.account = Some(account),
        SnapshotResource::Positions(positions) => view.replace_positions(positions),
        SnapshotResource::Trades(trades) => view.trades = trades,
        SnapshotResource::Candles { engine_id, bars } => {
            if !accepts_chart_engine(view, engine_id) {
                return ApplyOutcome::Unchanged;
            }
            view.candles.replace(bars);
        }
        SnapshotResource::Status(status) => {
            view.strategy_status = Some(status);
            return status_outcome(view);
        }
    }
    ApplyOutcome::Changed
}

pub fn apply_event(view: &mut ViewModel, event: StreamEvent) -> ApplyOutcome {
    match event.event {
        DashboardEvent::AccountUpdate(update) => {
            let mut changed = false;
            if let Some(account) = update.account {
                view.account = Some(account);
                changed = true;
            }
            if let Some(positions) = update.positions {
                view.replace_positions(positions);
                changed = true;
            }
            if let Some(engines) = update.engines {
                view.strategy_status
                    .get_or_insert_with(StrategyStatus::default)
                    .replace_engines(engines);
                return status_outcome(view);
            }
            if changed {
                ApplyOutcome::Changed
            } else {
                ApplyOutcome::Unchanged
            }
        }
        // Prices refresh with the next poll.
        DashboardEvent::Tick => ApplyOutcome::Unchanged,
        DashboardEvent::CandleClosed(candle) => {
            if !accepts_chart_engine(view, event.engine_id) {
                return ApplyOutcome::Unchanged;
            }
            view.candles.push(candle);
            ApplyOutcome::Changed
        }
        DashboardEvent::OrderFilled { .. } | DashboardEvent::PositionClosed { .. } => {
            ApplyOutcome::Refresh(RefreshScope::All)
        }
        DashboardEvent::EngineStarted | DashboardEvent::EngineStopped => {
            ApplyOutcome::Refresh(RefreshScope::Status)
        }
        DashboardEvent::Alert(alert) => {
            view.push_alert(alert);
            ApplyOutcome::Changed
        }
        DashboardEvent::Ignored(event_type) | DashboardEvent::Unknown(event_type) => {
            debug!(event_type = %event_type, "ignoring stream event");
            ApplyOutcome::Unchanged
        }
    }
}

pub fn apply_input(view: &mut ViewModel, input: ReconcilerInput) -> ApplyOutcome {
    match input {
        ReconcilerInput::Snapshot(resource) => apply_snapshot(view, resource),
        ReconcilerInput::Event(event) => apply_event(view, event),
        ReconcilerInput::Connection(connected) => {
            if view.connected == connected {
                return ApplyOutcome::Unchanged;
            }
            view.connected = connected;
            ApplyOutcome::Changed
        }
        ReconcilerInput::PositionRemoved(order_id) => {
            if view.positions.remove(&order_id).is_some() {
                ApplyOutcome::Changed
            } else {
                ApplyOutcome::Unchanged
            }
        }
    }
}

/// Drains the input queue in arrival order, one merge at a time, until the
/// session is cancelled. Inputs still queued at teardown are discarded.
pub async fn run_reconciler(
    mut inputs: mpsc::UnboundedReceiver<ReconcilerInput>,
    store: ViewModelStore,
    refresh: RefreshTrigger,
    notices: broadcast::Sender<DashboardNotice>,
    cancel_token: CancellationToken,
) {
    loop {
        let input = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            next = inputs.recv() => match next {
                Some(input) => input,
                None => break,
            },
        };

        let connection_input = match &input {
            ReconcilerInput::Connection(connected) => Some(*connected),
            _ => None,
        };

        let (outcome, revision) = {
            let mut writable = store.write().await;
            let outcome = apply_input(&mut writable, input);
            if outcome.is_change() {
                writable.revision = writable.revision.saturating_add(1);
            }
            (outcome, writable.revision)
        };

        if outcome.is_change() {
            if let Some(connected) = connection_input {
                info!(connected, "stream connection changed");
                let _ = notices.send(DashboardNotice::ConnectionChanged { connected });
            }
            let _ = notices.send(DashboardNotice::ViewModelChanged { revision });
        }
        if let Some(scope) = outcome.refresh_scope() {
            debug!(?scope, "input requested snapshot refresh");
            refresh.request(scope);
        }
    }

    debug!("reconciler stopped");
}
