use crate::dashboard::config::DashboardConfig;
use crate::dashboard::types::{
    Account, Candle, MutationAck, Position, StrategyStatus, StrategyStatusWire, Trade,
};
use crate::error::AppError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{Sink, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::pin::Pin;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

pub const DEFAULT_STRATEGY: &str = "ema_crossover";
pub const DEFAULT_STRATEGY_SYMBOL: &str = "EURUSD=X";
pub const DEFAULT_STRATEGY_TIMEFRAME: StrategyTimeframe = StrategyTimeframe::H1;
pub const DEFAULT_BROKER: &str = "paper";
pub const DEFAULT_CAPITAL: f64 = 10_000.0;

pub type FrameStream = BoxStream<'static, Result<Message, WsError>>;
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Both halves of one event-stream connection.
pub struct StreamConnection {
    pub outbound: FrameSink,
    pub frames: FrameStream,
}

/// Read and write operations of the upstream trading service.
#[async_trait]
pub trait DashboardApi: Send + Sync {
    async fn fetch_account(&self) -> Result<Account, AppError>;
    async fn fetch_positions(&self) -> Result<Vec<Position>, AppError>;
    async fn fetch_trades(&self, limit: Option<u16>) -> Result<Vec<Trade>, AppError>;
    /// Bars for `engine_id`, or for the upstream's current engine when `None`.
    async fn fetch_candles(
        &self,
        limit: Option<u16>,
        engine_id: Option<&str>,
    ) -> Result<Vec<Candle>, AppError>;
    async fn fetch_strategy_status(&self) -> Result<StrategyStatus, AppError>;
    async fn close_position(&self, order_id: &str) -> Result<MutationAck, AppError>;
    async fn start_strategy(&self, request: &StartStrategyRequest)
        -> Result<MutationAck, AppError>;
    async fn stop_strategy(&self) -> Result<MutationAck, AppError>;
    async fn stop_engine(&self, engine_id: &str) -> Result<MutationAck, AppError>;
    async fn stop_all_engines(&self) -> Result<MutationAck, AppError>;
    async fn update_strategy_params(
        &self,
        params: &Map<String, Value>,
    ) -> Result<MutationAck, AppError>;
}

/// Opens the push-event stream. Each call yields a fresh, independent stream.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self) -> Result<StreamConnection, AppError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StrategyTimeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl StrategyTimeframe {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartStrategyArgs {
    pub strategy: Option<String>,
    pub symbol: Option<String>,
    pub timeframe: Option<StrategyTimeframe>,
    pub broker: Option<String>,
    pub capital: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StartStrategyRequest {
    pub strategy: String,
    pub symbol: String,
    pub timeframe: StrategyTimeframe,
    pub broker: String,
    pub capital: f64,
}

impl StartStrategyArgs {
    pub fn normalize(self) -> Result<StartStrategyRequest, AppError> {
        let strategy = non_empty_or(self.strategy, DEFAULT_STRATEGY, "strategy")?;
        let symbol = non_empty_or(self.symbol, DEFAULT_STRATEGY_SYMBOL, "symbol")?;
        let broker = non_empty_or(self.broker, DEFAULT_BROKER, "broker")?.to_ascii_lowercase();

        let capital = self.capital.unwrap_or(DEFAULT_CAPITAL);
        if !capital.is_finite() || capital <= 0.0 {
            return Err(AppError::InvalidArgument(
                "capital must be a finite positive number".to_string(),
            ));
        }

        Ok(StartStrategyRequest {
            strategy,
            symbol,
            timeframe: self.timeframe.unwrap_or(DEFAULT_STRATEGY_TIMEFRAME),
            broker,
            capital,
        })
    }
}

fn non_empty_or(value: Option<String>, default: &str, field: &str) -> Result<String, AppError> {
    let value = value.unwrap_or_else(|| default.to_string()).trim().to_string();
    if value.is_empty() {
        return Err(AppError::InvalidArgument(format!(
            "{field} must not be empty"
        )));
    }
    Ok(value)
}

fn path_segment(value: &str, field: &str) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() || value.contains(['/', '?', '#']) {
        return Err(AppError::InvalidArgument(format!(
            "{field} must be non-empty and contain no path separators"
        )));
    }
    Ok(value.to_string())
}

pub fn normalize_order_id(order_id: &str) -> Result<String, AppError> {
    path_segment(order_id, "orderId")
}

pub fn normalize_engine_id(engine_id: &str) -> Result<String, AppError> {
    path_segment(engine_id, "engineId")
}

type QueryParams = Vec<(&'static str, String)>;

fn list_query(limit: Option<u16>, engine_id: Option<&str>) -> QueryParams {
    let mut query = QueryParams::new();
    if let Some(limit) = limit {
        query.push(("limit", limit.to_string()));
    }
    if let Some(engine_id) = engine_id {
        query.push(("engine_id", engine_id.to_string()));
    }
    query
}

fn account_endpoint(base_url: &str) -> String {
    format!("{base_url}/api/account")
}

fn positions_endpoint(base_url: &str) -> String {
    format!("{base_url}/api/positions")
}

fn trades_endpoint(base_url: &str) -> String {
    format!("{base_url}/api/trades")
}

fn candles_endpoint(base_url: &str) -> String {
    format!("{base_url}/api/candles")
}

fn strategy_status_endpoint(base_url: &str) -> String {
    format!("{base_url}/api/strategy/status")
}

fn close_position_endpoint(base_url: &str, order_id: &str) -> String {
    format!("{base_url}/api/positions/{order_id}/close")
}

fn strategy_start_endpoint(base_url: &str) -> String {
    format!("{base_url}/api/strategy/start")
}

fn strategy_stop_endpoint(base_url: &str) -> String {
    format!("{base_url}/api/strategy/stop")
}

fn engine_stop_endpoint(base_url: &str, engine_id: &str) -> String {
    format!("{base_url}/api/strategy/{engine_id}/stop")
}

fn stop_all_endpoint(base_url: &str) -> String {
    format!("{base_url}/api/strategy/stop-all")
}

fn strategy_params_endpoint(base_url: &str) -> String {
    format!("{base_url}/api/strategy/params")
}

/// Extracts the human-readable failure from an upstream error body.
///
/// Accepts `{"detail": "..."}`, validation lists `{"detail": [{"msg": ...}]}`
/// and `{"message": "..."}`; anything else falls back to the body text or the
/// HTTP reason phrase.
pub fn upstream_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) {
        match fields.get("detail").or_else(|| fields.get("message")) {
            Some(Value::String(message)) if !message.trim().is_empty() => {
                return message.trim().to_string();
            }
            Some(Value::Array(entries)) => {
                let messages: Vec<&str> = entries
                    .iter()
                    .filter_map(|entry| entry.get("msg").and_then(Value::as_str))
                    .collect();
                if !messages.is_empty() {
                    return messages.join("; ");
                }
            }
            _ => {}
        }
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() && trimmed.len() <= 200 && !trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("request failed with status {}", status.as_u16()))
}

async fn ensure_success(response: Response) -> Result<Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::Upstream {
        status: status.as_u16(),
        message: upstream_error_message(status, &body),
    })
}

#[derive(Debug, Serialize)]
struct StrategyParamsBody<'a> {
    params: &'a Map<String, Value>,
}

pub struct HttpDashboardApi {
    client: Client,
    base_url: String,
}

impl HttpDashboardApi {
    pub fn new(config: &DashboardConfig) -> Result<Self, AppError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: String,
        query: QueryParams,
    ) -> Result<T, AppError> {
        let response =
            ensure_success(self.client.get(endpoint).query(&query).send().await?).await?;
        Ok(response.json::<T>().await?)
    }

    async fn read_ack(response: Response) -> Result<MutationAck, AppError> {
        let response = ensure_success(response).await?;
        // Acks are advisory; an unparseable body still means the write succeeded.
        Ok(response.json::<MutationAck>().await.unwrap_or_default())
    }
}

#[async_trait]
impl DashboardApi for HttpDashboardApi {
    async fn fetch_account(&self) -> Result<Account, AppError> {
        self.get_json(account_endpoint(&self.base_url), QueryParams::new())
            .await
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>, AppError> {
        self.get_json(positions_endpoint(&self.base_url), QueryParams::new())
            .await
    }

    async fn fetch_trades(&self, limit: Option<u16>) -> Result<Vec<Trade>, AppError> {
        self.get_json(trades_endpoint(&self.base_url), list_query(limit, None))
            .await
    }

    async fn fetch_candles(
        &self,
        limit: Option<u16>,
        engine_id: Option<&str>,
    ) -> Result<Vec<Candle>, AppError> {
        self.get_json(candles_endpoint(&self.base_url), list_query(limit, engine_id))
            .await
    }

    async fn fetch_strategy_status(&self) -> Result<StrategyStatus, AppError> {
        let wire: StrategyStatusWire = self
            .get_json(strategy_status_endpoint(&self.base_url), QueryParams::new())
            .await?;
        Ok(wire.into())
    }

    async fn close_position(&self, order_id: &str) -> Result<MutationAck, AppError> {
        let endpoint = close_position_endpoint(&self.base_url, order_id);
        Self::read_ack(self.client.post(endpoint).send().await?).await
    }

    async fn start_strategy(
        &self,
        request: &StartStrategyRequest,
    ) -> Result<MutationAck, AppError> {
        let endpoint = strategy_start_endpoint(&self.base_url);
        Self::read_ack(self.client.post(endpoint).json(request).send().await?).await
    }

    async fn stop_strategy(&self) -> Result<MutationAck, AppError> {
        let endpoint = strategy_stop_endpoint(&self.base_url);
        Self::read_ack(self.client.post(endpoint).send().await?).await
    }

    async fn stop_engine(&self, engine_id: &str) -> Result<MutationAck, AppError> {
        let endpoint = engine_stop_endpoint(&self.base_url, engine_id);
        Self::read_ack(self.client.post(endpoint).send().await?).await
    }

    async fn stop_all_engines(&self) -> Result<MutationAck, AppError> {
        let endpoint = stop_all_endpoint(&self.base_url);
        Self::read_ack(self.client.post(endpoint).send().await?).await
    }

    async fn update_strategy_params(
        &self,
        params: &Map<String, Value>,
    ) -> Result<MutationAck, AppError> {
        let endpoint = strategy_params_endpoint(&self.base_url);
        let body = StrategyParamsBody { params };
        Self::read_ack(self.client.put(endpoint).json(&body).send().await?).await
    }
}

pub struct WsStreamConnector {
    url: String,
}

impl WsStreamConnector {
    pub fn new(config: &DashboardConfig) -> Self {
        Self {
            url: config.stream_url.clone(),
        }
    }
}

#[async_trait]
impl StreamConnector for WsStreamConnector {
    async fn connect(&self) -> Result<StreamConnection, AppError> {
        let ws_config = WebSocketConfig {
            max_message_size: Some(16 << 20),
            max_frame_size: Some(4 << 20),
            ..Default::default()
        };

        let (stream, _) = connect_async_with_config(self.url.as_str(), Some(ws_config), true).await?;
        let (write, read) = stream.split();
        Ok(StreamConnection {
            outbound: Box::pin(write),
            frames: read.boxed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://127.0.0.1:8000";

    #[test]
    fn read_endpoints_use_api_prefix() {
        assert_eq!(account_endpoint(BASE), "http://127.0.0.1:8000/api/account");
        assert_eq!(positions_endpoint(BASE), "http://127.0.0.1:8000/api/positions");
        assert_eq!(
            strategy_status_endpoint(BASE),
            "http://127.0.0.1:8000/api/strategy/status"
        );
    }

    #[test]
    fn list_query_carries_limit_and_engine() {
        assert!(trades_endpoint(BASE).ends_with("/api/trades"));
        assert!(candles_endpoint(BASE).ends_with("/api/candles"));
        assert!(list_query(None, None).is_empty());
        assert_eq!(list_query(Some(50), None), vec![("limit", "50".to_string())]);
        assert_eq!(
            list_query(Some(250), Some("ema_EURUSD=X_1h")),
            vec![
                ("limit", "250".to_string()),
                ("engine_id", "ema_EURUSD=X_1h".to_string()),
            ]
        );
    }

    #[test]
    fn write_endpoints_target_expected_paths() {
        assert!(close_position_endpoint(BASE, "abc-1").ends_with("/api/positions/abc-1/close"));
        assert!(strategy_start_endpoint(BASE).ends_with("/api/strategy/start"));
        assert!(strategy_stop_endpoint(BASE).ends_with("/api/strategy/stop"));
        assert!(engine_stop_endpoint(BASE, "bb_GBPUSD_15m")
            .ends_with("/api/strategy/bb_GBPUSD_15m/stop"));
        assert!(stop_all_endpoint(BASE).ends_with("/api/strategy/stop-all"));
        assert!(strategy_params_endpoint(BASE).ends_with("/api/strategy/params"));
    }

    #[test]
    fn extracts_detail_message() {
        let message =
            upstream_error_message(StatusCode::BAD_REQUEST, r#"{"detail":"No broker active"}"#);
        assert_eq!(message, "No broker active");
    }

    #[test]
    fn joins_validation_messages() {
        let body = r#"{"detail":[{"loc":["body","capital"],"msg":"value is not a valid float"},{"msg":"field required"}]}"#;
        let message = upstream_error_message(StatusCode::UNPROCESSABLE_ENTITY, body);
        assert_eq!(message, "value is not a valid float; field required");
    }

    #[test]
    fn falls_back_to_reason_phrase() {
        let message = upstream_error_message(StatusCode::BAD_GATEWAY, "");
        assert_eq!(message, "Bad Gateway");

        let message = upstream_error_message(StatusCode::BAD_GATEWAY, r#"{"unexpected":1}"#);
        assert_eq!(message, "Bad Gateway");
    }

    #[test]
    fn normalizes_start_args_defaults() {
        let request = StartStrategyArgs::default()
            .normalize()
            .expect("defaults should be valid");

        assert_eq!(request.strategy, DEFAULT_STRATEGY);
        assert_eq!(request.symbol, DEFAULT_STRATEGY_SYMBOL);
        assert_eq!(request.timeframe, DEFAULT_STRATEGY_TIMEFRAME);
        assert_eq!(request.broker, DEFAULT_BROKER);
        assert_eq!(request.capital, DEFAULT_CAPITAL);
    }

    #[test]
    fn start_request_serializes_wire_shape() {
        let request = StartStrategyArgs {
            strategy: Some("bb_reversion".to_string()),
            symbol: Some("GBPUSD".to_string()),
            timeframe: Some(StrategyTimeframe::M15),
            broker: Some("OANDA".to_string()),
            capital: Some(2_500.0),
        }
        .normalize()
        .expect("args should be valid");

        let encoded = serde_json::to_value(&request).expect("request should serialize");
        assert_eq!(encoded["timeframe"], "15m");
        assert_eq!(encoded["broker"], "oanda");
        assert_eq!(encoded["capital"], 2_500.0);
    }

    #[test]
    fn validates_capital() {
        let result = StartStrategyArgs {
            capital: Some(-1.0),
            ..StartStrategyArgs::default()
        }
        .normalize();
        assert!(result.is_err());

        let result = StartStrategyArgs {
            symbol: Some("   ".to_string()),
            ..StartStrategyArgs::default()
        }
        .normalize();
        assert!(result.is_err());
    }

    #[test]
    fn validates_order_id() {
        assert_eq!(normalize_order_id(" 42 ").expect("valid id"), "42");
        assert!(normalize_order_id("").is_err());
        assert!(normalize_order_id("1/../2").is_err());
    }

    #[test]
    fn validates_engine_id() {
        assert_eq!(
            normalize_engine_id(" ema_EURUSD_1h ").expect("valid id"),
            "ema_EURUSD_1h"
        );
        assert!(normalize_engine_id("  ").is_err());
        assert!(normalize_engine_id("a?b").is_err());
    }
}
