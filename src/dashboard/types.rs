use crate::error::AppError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};

use super::{
    ACCOUNT_UPDATE_EVENT, CANDLE_CLOSED_EVENT, CIRCUIT_BREAKER_EVENT, ENGINE_STARTED_EVENT,
    ENGINE_STOPPED_EVENT, LLM_ASSESSMENT_EVENT, LLM_BLOCKED_EVENT, ORDER_FILLED_EVENT,
    PONG_EVENT, POSITION_CLOSED_EVENT, RISK_BLOCKED_EVENT, SIGNAL_EVENT, STREAM_DEAD_EVENT,
    STREAM_DISCONNECTED_EVENT, TICK_EVENT,
};

pub const ALERT_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    #[serde(alias = "buy")]
    Buy,
    #[serde(alias = "sell")]
    Sell,
}

impl TradeSide {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct Account {
    pub balance: f64,
    pub equity: f64,
    #[serde(default)]
    pub open_positions: u32,
    #[serde(default)]
    pub total_pnl: f64,
    #[serde(default)]
    pub margin_used: f64,
    #[serde(default)]
    pub margin_available: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct Position {
    pub order_id: String,
    #[serde(default)]
    pub symbol: String,
    pub side: TradeSide,
    pub entry_price: f64,
    pub volume: f64,
    #[serde(default)]
    pub sl: f64,
    #[serde(default)]
    pub tp: f64,
    #[serde(default, deserialize_with = "timestamp_text")]
    pub entry_time: String,
    #[serde(default)]
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct Trade {
    #[serde(default)]
    pub strategy_name: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub timeframe: String,
    pub side: TradeSide,
    #[serde(default, deserialize_with = "timestamp_text")]
    pub entry_time: String,
    #[serde(default, deserialize_with = "timestamp_text")]
    pub exit_time: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub volume: f64,
    pub pnl: f64,
    #[serde(default)]
    pub sl: f64,
    #[serde(default)]
    pub tp: f64,
    #[serde(default)]
    pub exit_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct Candle {
    #[serde(deserialize_with = "timestamp_text")]
    pub timestamp: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct EngineStatus {
    #[serde(default)]
    pub engine_id: String,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub timeframe: String,
    #[serde(default)]
    pub broker: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StrategyStatus {
    pub running: bool,
    pub strategy: String,
    pub symbol: String,
    pub timeframe: String,
    pub broker: String,
    pub engines: Vec<EngineStatus>,
    /// Engine the flat fields describe; `None` for a single-engine upstream.
    pub active_engine_id: Option<String>,
}

/// Status payload as served upstream: either a flat single-engine record or
/// a multi-engine list with an aggregate running flag.
#[derive(Debug, Deserialize)]
pub struct StrategyStatusWire {
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub timeframe: String,
    #[serde(default)]
    pub broker: String,
    #[serde(default)]
    pub engines: Vec<EngineStatus>,
}

impl From<StrategyStatusWire> for StrategyStatus {
    fn from(value: StrategyStatusWire) -> Self {
        let mut status = Self {
            running: value.running,
            strategy: value.strategy,
            symbol: value.symbol,
            timeframe: value.timeframe,
            broker: value.broker,
            engines: value.engines,
            active_engine_id: None,
        };
        status.adopt_active_engine();
        status
    }
}

impl StrategyStatus {
    /// Picks the first running engine (or the first engine at all) as the
    /// active one, and fills the flat fields from it when the upstream only
    /// reported an engine list.
    pub fn adopt_active_engine(&mut self) {
        let active = self
            .engines
            .iter()
            .find(|engine| engine.running)
            .or_else(|| self.engines.first());
        self.active_engine_id = active
            .map(|engine| engine.engine_id.clone())
            .filter(|engine_id| !engine_id.is_empty());

        if !self.strategy.is_empty() {
            return;
        }
        if let Some(engine) = active {
            self.strategy = engine.strategy.clone();
            self.symbol = engine.symbol.clone();
            self.timeframe = engine.timeframe.clone();
            self.broker = engine.broker.clone();
        }
    }

    /// Swaps in a pushed engine list. Flat fields are rebuilt from it, so an
    /// empty list leaves them blank.
    pub fn replace_engines(&mut self, engines: Vec<EngineStatus>) {
        self.running = engines.iter().any(|engine| engine.running);
        self.engines = engines;
        self.strategy.clear();
        self.symbol.clear();
        self.timeframe.clear();
        self.broker.clear();
        self.adopt_active_engine();
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    CircuitBreaker,
    RiskBlocked,
    LlmBlocked,
    StreamDisconnected,
    StreamDead,
}

impl AlertKind {
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            CIRCUIT_BREAKER_EVENT => Some(Self::CircuitBreaker),
            RISK_BLOCKED_EVENT => Some(Self::RiskBlocked),
            LLM_BLOCKED_EVENT => Some(Self::LlmBlocked),
            STREAM_DISCONNECTED_EVENT => Some(Self::StreamDisconnected),
            STREAM_DEAD_EVENT => Some(Self::StreamDead),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub kind: AlertKind,
    pub engine_id: Option<String>,
    pub reason: Option<String>,
    pub symbol: Option<String>,
}

/// Bounded FIFO of closed bars. Capacity is fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleBuffer {
    capacity: usize,
    bars: VecDeque<Candle>,
}

impl CandleBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            bars: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends a bar, returning the evicted oldest bar when over capacity.
    pub fn push(&mut self, candle: Candle) -> Option<Candle> {
        self.bars.push_back(candle);
        if self.bars.len() > self.capacity {
            return self.bars.pop_front();
        }
        None
    }

    /// Replaces the buffer with the most recent `capacity` bars of `candles`.
    pub fn replace(&mut self, candles: Vec<Candle>) {
        let overflow = candles.len().saturating_sub(self.capacity);
        self.bars.clear();
        self.bars.extend(candles.into_iter().skip(overflow));
    }

    pub fn clear(&mut self) {
        self.bars.clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.bars.iter()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.bars.back()
    }
}

impl Serialize for CandleBuffer {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.bars.iter())
    }
}

/// The canonical dashboard state. Written only by the reconciler task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewModel {
    pub account: Option<Account>,
    pub positions: BTreeMap<String, Position>,
    pub trades: Vec<Trade>,
    pub candles: CandleBuffer,
    /// Engine whose bars `candles` holds. Bars from other engines are dropped.
    pub chart_engine: Option<String>,
    pub strategy_status: Option<StrategyStatus>,
    pub connected: bool,
    pub alerts: VecDeque<Alert>,
    pub revision: u64,
}

impl ViewModel {
    pub fn new(candle_capacity: usize) -> Self {
        Self {
            account: None,
            positions: BTreeMap::new(),
            trades: Vec::new(),
            candles: CandleBuffer::with_capacity(candle_capacity),
            chart_engine: None,
            strategy_status: None,
            connected: false,
            alerts: VecDeque::with_capacity(ALERT_CAPACITY),
            revision: 0,
        }
    }

    pub fn replace_positions(&mut self, positions: Vec<Position>) {
        self.positions = positions
            .into_iter()
            .map(|position| (position.order_id.clone(), position))
            .collect();
    }

    pub fn push_alert(&mut self, alert: Alert) {
        self.alerts.push_back(alert);
        while self.alerts.len() > ALERT_CAPACITY {
            self.alerts.pop_front();
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct AccountUpdate {
    #[serde(default)]
    pub account: Option<Account>,
    #[serde(default)]
    pub positions: Option<Vec<Position>>,
    #[serde(default)]
    pub engines: Option<Vec<EngineStatus>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DashboardEvent {
    AccountUpdate(AccountUpdate),
    Tick,
    CandleClosed(Candle),
    OrderFilled { order_id: Option<String> },
    PositionClosed { order_id: Option<String> },
    EngineStarted,
    EngineStopped,
    Alert(Alert),
    /// Known event kinds the dashboard state does not track.
    Ignored(String),
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub engine_id: Option<String>,
    pub event: DashboardEvent,
}

#[derive(Debug, Deserialize)]
pub struct EventEnvelopeWire {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub engine_id: Option<String>,
}

impl TryFrom<EventEnvelopeWire> for StreamEvent {
    type Error = AppError;

    fn try_from(value: EventEnvelopeWire) -> Result<Self, Self::Error> {
        let EventEnvelopeWire {
            event_type,
            data,
            engine_id,
        } = value;

        let event = match event_type.as_str() {
            ACCOUNT_UPDATE_EVENT => DashboardEvent::AccountUpdate(serde_json::from_value(data)?),
            TICK_EVENT => DashboardEvent::Tick,
            CANDLE_CLOSED_EVENT => DashboardEvent::CandleClosed(serde_json::from_value(data)?),
            ORDER_FILLED_EVENT => DashboardEvent::OrderFilled {
                order_id: text_field(&data, "order_id"),
            },
            POSITION_CLOSED_EVENT => DashboardEvent::PositionClosed {
                order_id: text_field(&data, "order_id"),
            },
            ENGINE_STARTED_EVENT => DashboardEvent::EngineStarted,
            ENGINE_STOPPED_EVENT => DashboardEvent::EngineStopped,
            SIGNAL_EVENT | LLM_ASSESSMENT_EVENT | PONG_EVENT => {
                DashboardEvent::Ignored(event_type)
            }
            other => match AlertKind::from_event_type(other) {
                Some(kind) => DashboardEvent::Alert(Alert {
                    kind,
                    engine_id: engine_id.clone(),
                    reason: text_field(&data, "reason"),
                    symbol: text_field(&data, "symbol"),
                }),
                None => DashboardEvent::Unknown(event_type),
            },
        };

        Ok(Self { engine_id, event })
    }
}

pub fn parse_event_payload(payload: &mut [u8]) -> Result<StreamEvent, AppError> {
    let wire: EventEnvelopeWire = simd_json::serde::from_slice(payload)?;
    wire.try_into()
}

fn text_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Upstream timestamps arrive as stringified datetimes, epoch numbers or null.
fn timestamp_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TimestampWire {
        Text(String),
        Integer(i64),
        Float(f64),
    }

    let value = Option::<TimestampWire>::deserialize(deserializer)?;
    Ok(match value {
        Some(TimestampWire::Text(text)) => text,
        Some(TimestampWire::Integer(value)) => value.to_string(),
        Some(TimestampWire::Float(value)) => value.to_string(),
        None => String::new(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MutationAck {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub engine_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(index: usize) -> Candle {
        Candle {
            timestamp: format!("2024-01-01T00:{index:02}:00"),
            open: index as f64,
            high: index as f64 + 1.0,
            low: index as f64 - 1.0,
            close: index as f64 + 0.5,
            volume: 10.0,
        }
    }

    #[test]
    fn parses_candle_closed_payload() {
        let mut payload = br#"{"type":"candle_closed","data":{"timestamp":"2024-01-01 10:00:00","open":1.1,"high":1.2,"low":1.0,"close":1.15,"volume":42}}"#.to_vec();
        let parsed = parse_event_payload(&mut payload).expect("candle payload should parse");

        match parsed.event {
            DashboardEvent::CandleClosed(candle) => {
                assert_eq!(candle.timestamp, "2024-01-01 10:00:00");
                assert_eq!(candle.close, 1.15);
                assert_eq!(candle.volume, 42.0);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn parses_account_update_with_partial_payload() {
        let mut payload = br#"{"type":"account_update","engine_id":"ema_EURUSD_1h","data":{"positions":[{"order_id":"7","side":"BUY","entry_price":1.1,"volume":1000,"sl":1.09,"tp":1.12,"entry_time":"2024-01-01","unrealized_pnl":3.5}]}}"#.to_vec();
        let parsed = parse_event_payload(&mut payload).expect("account update should parse");

        assert_eq!(parsed.engine_id.as_deref(), Some("ema_EURUSD_1h"));
        match parsed.event {
            DashboardEvent::AccountUpdate(update) => {
                assert!(update.account.is_none());
                let positions = update.positions.expect("positions should be present");
                assert_eq!(positions[0].order_id, "7");
                assert_eq!(positions[0].side, TradeSide::Buy);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_is_not_an_error() {
        let mut payload = br#"{"type":"brand_new_kind","data":{"x":1},"extra":true}"#.to_vec();
        let parsed = parse_event_payload(&mut payload).expect("unknown type should parse");
        assert_eq!(
            parsed.event,
            DashboardEvent::Unknown("brand_new_kind".to_string())
        );
    }

    #[test]
    fn staleness_events_tolerate_missing_data() {
        let mut payload = br#"{"type":"engine_stopped"}"#.to_vec();
        let parsed = parse_event_payload(&mut payload).expect("engine_stopped should parse");
        assert_eq!(parsed.event, DashboardEvent::EngineStopped);

        let mut payload = br#"{"type":"order_filled","data":{"order_id":"99","side":"SELL"}}"#.to_vec();
        let parsed = parse_event_payload(&mut payload).expect("order_filled should parse");
        assert_eq!(
            parsed.event,
            DashboardEvent::OrderFilled {
                order_id: Some("99".to_string())
            }
        );
    }

    #[test]
    fn maps_risk_events_to_alerts() {
        let mut payload =
            br#"{"type":"risk_blocked","data":{"reason":"position_limit","side":"BUY"}}"#.to_vec();
        let parsed = parse_event_payload(&mut payload).expect("risk event should parse");
        match parsed.event {
            DashboardEvent::Alert(alert) => {
                assert_eq!(alert.kind, AlertKind::RiskBlocked);
                assert_eq!(alert.reason.as_deref(), Some("position_limit"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_payloads() {
        let mut not_json = b"definitely not json".to_vec();
        assert!(parse_event_payload(&mut not_json).is_err());

        let mut missing_type = br#"{"data":{}}"#.to_vec();
        assert!(parse_event_payload(&mut missing_type).is_err());

        let mut broken_candle = br#"{"type":"candle_closed","data":{"open":"x"}}"#.to_vec();
        assert!(parse_event_payload(&mut broken_candle).is_err());
    }

    #[test]
    fn accepts_numeric_and_null_timestamps() {
        let trade: Trade = serde_json::from_str(
            r#"{"side":"SELL","entry_time":1704067200,"exit_time":null,"entry_price":1.0,"exit_price":0.9,"volume":1.0,"pnl":0.1}"#,
        )
        .expect("trade should parse");
        assert_eq!(trade.entry_time, "1704067200");
        assert_eq!(trade.exit_time, "");
        assert_eq!(trade.side, TradeSide::Sell);
    }

    #[test]
    fn status_wire_adopts_running_engine() {
        let wire: StrategyStatusWire = serde_json::from_str(
            r#"{"running":true,"engines":[{"engine_id":"a","running":false,"strategy":"bb_reversion","symbol":"GBPUSD","timeframe":"15m","broker":"paper"},{"engine_id":"b","running":true,"strategy":"ema_crossover","symbol":"EURUSD","timeframe":"1h","broker":"oanda"}]}"#,
        )
        .expect("status should parse");
        let status = StrategyStatus::from(wire);

        assert!(status.running);
        assert_eq!(status.strategy, "ema_crossover");
        assert_eq!(status.broker, "oanda");
        assert_eq!(status.active_engine_id.as_deref(), Some("b"));
        assert_eq!(status.engines.len(), 2);
    }

    #[test]
    fn empty_engine_list_blanks_flat_fields() {
        let mut status = StrategyStatus::default();
        status.replace_engines(vec![EngineStatus {
            engine_id: "bb_GBPUSD_15m".to_string(),
            running: true,
            strategy: "bb_reversion".to_string(),
            symbol: "GBPUSD".to_string(),
            timeframe: "15m".to_string(),
            broker: "paper".to_string(),
        }]);
        assert_eq!(status.symbol, "GBPUSD");

        status.replace_engines(Vec::new());

        assert!(!status.running);
        assert!(status.strategy.is_empty());
        assert!(status.symbol.is_empty());
        assert!(status.timeframe.is_empty());
        assert!(status.broker.is_empty());
        assert_eq!(status.active_engine_id, None);
    }

    #[test]
    fn candle_buffer_evicts_oldest_first() {
        let mut buffer = CandleBuffer::with_capacity(3);
        for index in 0..3 {
            assert!(buffer.push(candle(index)).is_none());
        }
        let evicted = buffer.push(candle(3)).expect("fourth bar should evict");

        assert_eq!(evicted, candle(0));
        assert_eq!(buffer.len(), 3);
        let retained: Vec<_> = buffer.iter().cloned().collect();
        assert_eq!(retained, vec![candle(1), candle(2), candle(3)]);
    }

    #[test]
    fn candle_buffer_replace_keeps_latest_window() {
        let mut buffer = CandleBuffer::with_capacity(2);
        buffer.replace((0..5).map(candle).collect());

        let retained: Vec<_> = buffer.iter().cloned().collect();
        assert_eq!(retained, vec![candle(3), candle(4)]);
    }

    #[test]
    fn replace_positions_keeps_unique_keys() {
        let mut view = ViewModel::new(10);
        let first = Position {
            order_id: "1".to_string(),
            symbol: "EURUSD".to_string(),
            side: TradeSide::Buy,
            entry_price: 1.0,
            volume: 1.0,
            sl: 0.0,
            tp: 0.0,
            entry_time: String::new(),
            unrealized_pnl: 0.0,
        };
        let mut repeated = first.clone();
        repeated.unrealized_pnl = 5.0;

        view.replace_positions(vec![first, repeated]);

        assert_eq!(view.positions.len(), 1);
        assert_eq!(view.positions["1"].unrealized_pnl, 5.0);
    }

    #[test]
    fn alerts_are_bounded() {
        let mut view = ViewModel::new(10);
        for index in 0..(ALERT_CAPACITY + 5) {
            view.push_alert(Alert {
                kind: AlertKind::RiskBlocked,
                engine_id: None,
                reason: Some(index.to_string()),
                symbol: None,
            });
        }

        assert_eq!(view.alerts.len(), ALERT_CAPACITY);
        assert_eq!(view.alerts.front().and_then(|a| a.reason.as_deref()), Some("5"));
    }
}
