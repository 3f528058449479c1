use crate::dashboard::channel::{ChannelPhase, ChannelStatusSnapshot};
use crate::state::DashboardSession;
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u128,
    pub stream: ChannelPhase,
    pub reconnect_attempt: u32,
    pub revision: u64,
}

pub fn build_health_response(
    started_at: Instant,
    channel: &ChannelStatusSnapshot,
    revision: u64,
) -> HealthResponse {
    let status = if channel.connected { "ok" } else { "degraded" };

    HealthResponse {
        status,
        uptime_ms: started_at.elapsed().as_millis(),
        stream: channel.phase,
        reconnect_attempt: channel.reconnect_attempt,
        revision,
    }
}

pub async fn health(session: &DashboardSession) -> HealthResponse {
    let channel = session.channel_status.borrow().clone();
    let revision = session.view_model.read().await.revision;
    build_health_response(session.started_at, &channel, revision)
}
