use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CANDLE_CAPACITY: usize = 500;
pub const DEFAULT_PING_INTERVAL_MS: u64 = 15_000;
pub const MIN_POLL_INTERVAL_MS: u64 = 1_000;
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;
pub const MIN_RECONNECT_DELAY_MS: u64 = 250;
pub const MAX_RECONNECT_DELAY_MS: u64 = 60_000;
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 1_000;
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 60_000;
pub const MIN_PING_INTERVAL_MS: u64 = 1_000;
pub const MAX_PING_INTERVAL_MS: u64 = 120_000;
pub const MIN_CANDLE_CAPACITY: usize = 10;
pub const MAX_CANDLE_CAPACITY: usize = 10_000;
pub const MAX_TRADES_LIMIT: u16 = 1_000;
pub const MAX_CANDLES_LIMIT: u16 = 5_000;

pub const BASE_URL_ENV: &str = "DASHBOARD_BASE_URL";
pub const STREAM_URL_ENV: &str = "DASHBOARD_STREAM_URL";

const STREAM_PATH: &str = "/ws/stream";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DashboardArgs {
    pub base_url: Option<String>,
    pub stream_url: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub reconnect_delay_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub ping_interval_ms: Option<u64>,
    pub candle_capacity: Option<usize>,
    pub trades_limit: Option<u16>,
    pub candles_limit: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    pub base_url: String,
    pub stream_url: String,
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
    pub ping_interval: Duration,
    pub candle_capacity: usize,
    pub trades_limit: Option<u16>,
    pub candles_limit: Option<u16>,
}

fn resolve_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

impl DashboardArgs {
    /// Fills unset URLs from the environment. Explicit arguments win.
    pub fn with_env_fallbacks(self) -> Self {
        self.apply_env_fallbacks(resolve_env)
    }

    fn apply_env_fallbacks(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        if self.base_url.is_none() {
            self.base_url = read(BASE_URL_ENV);
        }
        if self.stream_url.is_none() {
            self.stream_url = read(STREAM_URL_ENV);
        }
        self
    }

    pub fn normalize(self) -> Result<DashboardConfig, AppError> {
        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://"))
            || base_url.contains(char::is_whitespace)
        {
            return Err(AppError::InvalidArgument(
                "baseUrl must be an http:// or https:// URL".to_string(),
            ));
        }

        let stream_url = match self.stream_url {
            Some(value) => value.trim().to_string(),
            None => derive_stream_url(&base_url)?,
        };
        if !(stream_url.starts_with("ws://") || stream_url.starts_with("wss://")) {
            return Err(AppError::InvalidArgument(
                "streamUrl must be a ws:// or wss:// URL".to_string(),
            ));
        }

        let poll_interval_ms = self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&poll_interval_ms) {
            return Err(AppError::InvalidArgument(format!(
                "pollIntervalMs must be between {MIN_POLL_INTERVAL_MS} and {MAX_POLL_INTERVAL_MS}"
            )));
        }

        let reconnect_delay_ms = self
            .reconnect_delay_ms
            .unwrap_or(DEFAULT_RECONNECT_DELAY_MS);
        if !(MIN_RECONNECT_DELAY_MS..=MAX_RECONNECT_DELAY_MS).contains(&reconnect_delay_ms) {
            return Err(AppError::InvalidArgument(format!(
                "reconnectDelayMs must be between {MIN_RECONNECT_DELAY_MS} and {MAX_RECONNECT_DELAY_MS}"
            )));
        }

        let request_timeout_ms = self
            .request_timeout_ms
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        if !(MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS).contains(&request_timeout_ms) {
            return Err(AppError::InvalidArgument(format!(
                "requestTimeoutMs must be between {MIN_REQUEST_TIMEOUT_MS} and {MAX_REQUEST_TIMEOUT_MS}"
            )));
        }

        let ping_interval_ms = self.ping_interval_ms.unwrap_or(DEFAULT_PING_INTERVAL_MS);
        if !(MIN_PING_INTERVAL_MS..=MAX_PING_INTERVAL_MS).contains(&ping_interval_ms) {
            return Err(AppError::InvalidArgument(format!(
                "pingIntervalMs must be between {MIN_PING_INTERVAL_MS} and {MAX_PING_INTERVAL_MS}"
            )));
        }

        let candle_capacity = self.candle_capacity.unwrap_or(DEFAULT_CANDLE_CAPACITY);
        if !(MIN_CANDLE_CAPACITY..=MAX_CANDLE_CAPACITY).contains(&candle_capacity) {
            return Err(AppError::InvalidArgument(format!(
                "candleCapacity must be between {MIN_CANDLE_CAPACITY} and {MAX_CANDLE_CAPACITY}"
            )));
        }

        if let Some(limit) = self.trades_limit {
            if !(1..=MAX_TRADES_LIMIT).contains(&limit) {
                return Err(AppError::InvalidArgument(format!(
                    "tradesLimit must be between 1 and {MAX_TRADES_LIMIT}"
                )));
            }
        }
        if let Some(limit) = self.candles_limit {
            if !(1..=MAX_CANDLES_LIMIT).contains(&limit) {
                return Err(AppError::InvalidArgument(format!(
                    "candlesLimit must be between 1 and {MAX_CANDLES_LIMIT}"
                )));
            }
        }

        Ok(DashboardConfig {
            base_url,
            stream_url,
            poll_interval: Duration::from_millis(poll_interval_ms),
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            request_timeout: Duration::from_millis(request_timeout_ms),
            ping_interval: Duration::from_millis(ping_interval_ms),
            candle_capacity,
            trades_limit: self.trades_limit,
            candles_limit: self.candles_limit,
        })
    }
}

pub fn derive_stream_url(base_url: &str) -> Result<String, AppError> {
    let trimmed = base_url.trim().trim_end_matches('/');
    let websocket_base = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(AppError::InvalidArgument(format!(
            "cannot derive stream url from '{base_url}'"
        )));
    };
    Ok(websocket_base + STREAM_PATH)
}
