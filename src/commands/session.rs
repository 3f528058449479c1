use crate::dashboard::channel::{run_event_channel, ChannelStatusSnapshot};
use crate::dashboard::config::DashboardConfig;
use crate::dashboard::reconciler::run_reconciler;
use crate::dashboard::snapshot::run_snapshot_poller;
use crate::dashboard::types::ViewModel;
use crate::dashboard::upstream::{DashboardApi, HttpDashboardApi, StreamConnector, WsStreamConnector};
use crate::error::AppError;
use crate::state::{DashboardSession, SessionTasks};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStopResult {
    pub stopped: bool,
}

/// Spawns the reconciler, snapshot poller and event channel for a new session.
/// Must be called from within a tokio runtime.
pub fn start_session<C>(
    config: DashboardConfig,
    api: Arc<dyn DashboardApi>,
    connector: C,
) -> DashboardSession
where
    C: StreamConnector + 'static,
{
    let (mut session, wiring) = DashboardSession::new(config, api);
    let cancellation_token = CancellationToken::new();

    let reconciler = tokio::spawn(run_reconciler(
        wiring.inputs,
        Arc::clone(&session.view_model),
        session.refresh.clone(),
        session.notices.clone(),
        cancellation_token.clone(),
    ));
    let poller = tokio::spawn(run_snapshot_poller(
        Arc::clone(&session.api),
        session.config.poll_interval,
        session.snapshot_limits(),
        Arc::clone(&session.view_model),
        session.inputs.clone(),
        wiring.refresh,
        cancellation_token.clone(),
    ));
    let channel = tokio::spawn(run_event_channel(
        connector,
        session.config.reconnect_delay,
        session.config.ping_interval,
        wiring.channel_status,
        session.inputs.clone(),
        cancellation_token.clone(),
    ));

    info!(
        base_url = %session.config.base_url,
        stream_url = %session.config.stream_url,
        "dashboard session started"
    );

    *session.tasks.get_mut() = Some(SessionTasks {
        cancellation_token,
        join_handles: vec![reconciler, poller, channel],
    });
    session
}

pub fn connect_http_session(config: DashboardConfig) -> Result<DashboardSession, AppError> {
    let api = Arc::new(HttpDashboardApi::new(&config)?);
    let connector = WsStreamConnector::new(&config);
    Ok(start_session(config, api, connector))
}

/// Cancels every session task and waits for each to finish. Safe to call more
/// than once; later calls report `stopped: false`.
pub async fn shutdown_session(session: &DashboardSession) -> SessionStopResult {
    let existing_tasks = {
        let mut task_slot = session.tasks.lock().await;
        task_slot.take()
    };

    let Some(tasks) = existing_tasks else {
        return SessionStopResult { stopped: false };
    };

    tasks.cancellation_token.cancel();
    for join_handle in tasks.join_handles {
        if let Err(error) = join_handle.await {
            warn!(%error, "session task ended abnormally");
        }
    }

    // Every writer has exited; mark the view disconnected for late readers.
    session.view_model.write().await.connected = false;
    info!("dashboard session stopped");
    SessionStopResult { stopped: true }
}

pub async fn dashboard_snapshot(session: &DashboardSession) -> ViewModel {
    session.view_model.read().await.clone()
}

pub fn connection_status(session: &DashboardSession) -> ChannelStatusSnapshot {
    session.channel_status.borrow().clone()
}
