pub mod channel;
pub mod config;
pub mod gate;
pub mod reconciler;
pub mod snapshot;
pub mod types;
pub mod upstream;
pub mod views;

pub const ACCOUNT_UPDATE_EVENT: &str = "account_update";
pub const TICK_EVENT: &str = "tick";
pub const CANDLE_CLOSED_EVENT: &str = "candle_closed";
pub const ORDER_FILLED_EVENT: &str = "order_filled";
pub const POSITION_CLOSED_EVENT: &str = "position_closed";
pub const ENGINE_STARTED_EVENT: &str = "engine_started";
pub const ENGINE_STOPPED_EVENT: &str = "engine_stopped";
pub const SIGNAL_EVENT: &str = "signal";
pub const CIRCUIT_BREAKER_EVENT: &str = "circuit_breaker";
pub const RISK_BLOCKED_EVENT: &str = "risk_blocked";
pub const LLM_ASSESSMENT_EVENT: &str = "llm_assessment";
pub const LLM_BLOCKED_EVENT: &str = "llm_blocked";
pub const STREAM_DISCONNECTED_EVENT: &str = "stream_disconnected";
pub const STREAM_DEAD_EVENT: &str = "stream_dead";
pub const PONG_EVENT: &str = "pong";
