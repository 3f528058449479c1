use crate::dashboard::reconciler::ReconcilerSender;
use crate::dashboard::types::parse_event_payload;
use crate::dashboard::upstream::{StreamConnection, StreamConnector};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Text frame the backend answers with `{"type":"pong"}`.
const PING_FRAME: &str = "ping";
/// Keep-alive periods without any inbound frame before the stream counts as dead.
const STALE_AFTER_PINGS: u32 = 3;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelPhase {
    Connecting,
    Open,
    Closed,
    Stopped,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatusSnapshot {
    pub phase: ChannelPhase,
    pub connected: bool,
    pub reconnect_attempt: u32,
    pub reason: Option<String>,
}

impl ChannelStatusSnapshot {
    pub fn idle() -> Self {
        Self {
            phase: ChannelPhase::Stopped,
            connected: false,
            reconnect_attempt: 0,
            reason: Some("stream idle".to_string()),
        }
    }
}

enum StreamDirective {
    Continue,
    Closed,
}

fn publish_status(
    status: &watch::Sender<ChannelStatusSnapshot>,
    phase: ChannelPhase,
    reconnect_attempt: u32,
    reason: Option<String>,
) {
    status.send_replace(ChannelStatusSnapshot {
        phase,
        connected: phase == ChannelPhase::Open,
        reconnect_attempt,
        reason,
    });
}

fn handle_message(message: Message, sink: &ReconcilerSender) -> StreamDirective {
    let parsed = match message {
        Message::Text(text_payload) => {
            let mut owned_payload = text_payload.into_bytes();
            parse_event_payload(owned_payload.as_mut_slice())
        }
        Message::Binary(mut binary_payload) => parse_event_payload(binary_payload.as_mut_slice()),
        Message::Close(_) => return StreamDirective::Closed,
        _ => return StreamDirective::Continue,
    };

    match parsed {
        Ok(event) => {
            sink.event(event);
        }
        Err(error) => debug!(%error, "dropping malformed stream payload"),
    }
    StreamDirective::Continue
}

/// Keeps at most one stream open, forwarding parsed events in arrival order.
///
/// Any transport failure, remote close or failed connect leads to `Closed`,
/// a flat `reconnect_delay` wait, and a fresh connect. While open, a ping is
/// sent every `ping_interval`; a stream silent for `STALE_AFTER_PINGS`
/// intervals is treated as failed. Only cancellation ends the loop.
pub async fn run_event_channel<C: StreamConnector>(
    connector: C,
    reconnect_delay: Duration,
    ping_interval: Duration,
    status: watch::Sender<ChannelStatusSnapshot>,
    sink: ReconcilerSender,
    cancel_token: CancellationToken,
) {
    let mut reconnect_attempt = 0_u32;
    let mut reason = Some("opening event stream".to_string());

    while !cancel_token.is_cancelled() {
        publish_status(&status, ChannelPhase::Connecting, reconnect_attempt, reason.take());

        let connect_result = tokio::select! {
            _ = cancel_token.cancelled() => break,
            result = connector.connect() => result,
        };

        match connect_result {
            Ok(StreamConnection {
                mut outbound,
                mut frames,
            }) => {
                info!(reconnect_attempt, "event stream connected");
                reconnect_attempt = 0;
                publish_status(
                    &status,
                    ChannelPhase::Open,
                    reconnect_attempt,
                    Some("event stream connected".to_string()),
                );
                sink.connection(true);

                let mut keepalive =
                    tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
                keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
                let mut last_frame_at = Instant::now();

                loop {
                    let frame = tokio::select! {
                        _ = cancel_token.cancelled() => break,
                        _ = keepalive.tick() => {
                            let silent_for = last_frame_at.elapsed();
                            if silent_for >= ping_interval * STALE_AFTER_PINGS {
                                warn!(?silent_for, "event stream went silent");
                                reason = Some("event stream went silent".to_string());
                                break;
                            }
                            let ping = Message::Text(PING_FRAME.to_string());
                            if let Err(error) = outbound.send(ping).await {
                                warn!(%error, "event stream ping failed");
                                reason = Some(format!("event stream ping failed: {error}"));
                                break;
                            }
                            continue;
                        }
                        next_frame = frames.next() => next_frame,
                    };
                    last_frame_at = Instant::now();

                    let Some(frame_result) = frame else {
                        reason = Some("event stream ended".to_string());
                        break;
                    };

                    match frame_result {
                        Ok(message) => match handle_message(message, &sink) {
                            StreamDirective::Continue => {}
                            StreamDirective::Closed => {
                                reason = Some("event stream closed by remote".to_string());
                                break;
                            }
                        },
                        Err(error) => {
                            warn!(%error, "event stream transport error");
                            reason = Some(format!("event stream error: {error}"));
                            break;
                        }
                    }
                }

                drop(frames);
                drop(outbound);
                sink.connection(false);

                if cancel_token.is_cancelled() {
                    break;
                }
            }
            Err(error) => {
                warn!(%error, reconnect_attempt, "event stream connect failed");
                reason = Some(format!("event stream connect error: {error}"));
            }
        }

        reconnect_attempt = reconnect_attempt.saturating_add(1);
        publish_status(&status, ChannelPhase::Closed, reconnect_attempt, reason.clone());

        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
        reason = Some(format!("reconnect attempt {reconnect_attempt}"));
    }

    publish_status(
        &status,
        ChannelPhase::Stopped,
        0,
        Some("event stream stopped".to_string()),
    );
    debug!("event channel stopped");
}
