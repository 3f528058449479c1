use crate::dashboard::types::Trade;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EquityPoint {
    pub time: String,
    pub cumulative_pnl: f64,
}

/// Sort key for a timestamp rendered as text. Epoch numbers compare
/// numerically and precede textual (ISO-8601) stamps, which compare lexically.
#[derive(Debug, Clone, Copy, PartialEq)]
enum TimeKey<'a> {
    Epoch(f64),
    Text(&'a str),
}

impl<'a> TimeKey<'a> {
    fn parse(value: &'a str) -> Self {
        match value.trim().parse::<f64>() {
            Ok(epoch) if epoch.is_finite() => Self::Epoch(epoch),
            _ => Self::Text(value),
        }
    }

    fn compare(self, other: Self) -> Ordering {
        match (self, other) {
            (Self::Epoch(left), Self::Epoch(right)) => left.total_cmp(&right),
            (Self::Text(left), Self::Text(right)) => left.cmp(right),
            (Self::Epoch(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Epoch(_)) => Ordering::Greater,
        }
    }
}

/// Running realized P&L ordered by exit time. Trades sharing an exit time keep
/// their input order.
pub fn equity_curve(trades: &[Trade]) -> Vec<EquityPoint> {
    let mut ordered: Vec<(TimeKey<'_>, &Trade)> = trades
        .iter()
        .map(|trade| (TimeKey::parse(&trade.exit_time), trade))
        .collect();
    ordered.sort_by(|(left, _), (right, _)| left.compare(*right));

    let mut cumulative_pnl = 0.0;
    ordered
        .into_iter()
        .map(|(_, trade)| {
            cumulative_pnl += trade.pnl;
            EquityPoint {
                time: trade.exit_time.clone(),
                cumulative_pnl,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TradeColumn {
    Strategy,
    Symbol,
    Timeframe,
    Side,
    EntryTime,
    ExitTime,
    EntryPrice,
    ExitPrice,
    Volume,
    Pnl,
    StopLoss,
    TakeProfit,
    ExitReason,
}

enum ColumnValue<'a> {
    Text(&'a str),
    Time(TimeKey<'a>),
    Number(f64),
}

impl TradeColumn {
    fn value(self, trade: &Trade) -> ColumnValue<'_> {
        match self {
            Self::Strategy => ColumnValue::Text(&trade.strategy_name),
            Self::Symbol => ColumnValue::Text(&trade.symbol),
            Self::Timeframe => ColumnValue::Text(&trade.timeframe),
            Self::Side => ColumnValue::Text(trade.side.as_str()),
            Self::EntryTime => ColumnValue::Time(TimeKey::parse(&trade.entry_time)),
            Self::ExitTime => ColumnValue::Time(TimeKey::parse(&trade.exit_time)),
            Self::EntryPrice => ColumnValue::Number(trade.entry_price),
            Self::ExitPrice => ColumnValue::Number(trade.exit_price),
            Self::Volume => ColumnValue::Number(trade.volume),
            Self::Pnl => ColumnValue::Number(trade.pnl),
            Self::StopLoss => ColumnValue::Number(trade.sl),
            Self::TakeProfit => ColumnValue::Number(trade.tp),
            Self::ExitReason => ColumnValue::Text(&trade.exit_reason),
        }
    }

    fn compare(self, left: &Trade, right: &Trade) -> Ordering {
        match (self.value(left), self.value(right)) {
            (ColumnValue::Number(left), ColumnValue::Number(right)) => left.total_cmp(&right),
            (ColumnValue::Text(left), ColumnValue::Text(right)) => left.cmp(right),
            (ColumnValue::Time(left), ColumnValue::Time(right)) => left.compare(right),
            _ => Ordering::Equal,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeSort {
    pub column: TradeColumn,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeTableQuery {
    pub sort: Option<TradeSort>,
    pub filter: Option<String>,
}

fn displayed_fields(trade: &Trade) -> [String; 13] {
    [
        trade.strategy_name.clone(),
        trade.symbol.clone(),
        trade.timeframe.clone(),
        trade.side.as_str().to_string(),
        trade.entry_time.clone(),
        trade.exit_time.clone(),
        trade.entry_price.to_string(),
        trade.exit_price.to_string(),
        trade.volume.to_string(),
        trade.pnl.to_string(),
        trade.sl.to_string(),
        trade.tp.to_string(),
        trade.exit_reason.clone(),
    ]
}

fn matches_filter(trade: &Trade, needle: &str) -> bool {
    displayed_fields(trade)
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
}

/// Filtered and sorted copy of `trades` for display. Sorting is stable and a
/// blank filter keeps every row.
pub fn trade_table(trades: &[Trade], query: &TradeTableQuery) -> Vec<Trade> {
    let needle = query
        .filter
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_lowercase);

    let mut rows: Vec<Trade> = trades
        .iter()
        .filter(|trade| {
            needle
                .as_deref()
                .map_or(true, |needle| matches_filter(trade, needle))
        })
        .cloned()
        .collect();

    if let Some(sort) = query.sort {
        match sort.direction {
            SortDirection::Ascending => rows.sort_by(|left, right| sort.column.compare(left, right)),
            SortDirection::Descending => {
                rows.sort_by(|left, right| sort.column.compare(right, left))
            }
        }
    }
    rows
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeSummary {
    pub count: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
}

pub fn trade_summary(trades: &[Trade]) -> TradeSummary {
    let wins = trades.iter().filter(|trade| trade.pnl > 0.0).count();
    let losses = trades.iter().filter(|trade| trade.pnl < 0.0).count();
    let count = trades.len();
    let win_rate = if count == 0 {
        0.0
    } else {
        wins as f64 / count as f64
    };

    TradeSummary {
        count,
        wins,
        losses,
        win_rate,
        total_pnl: trades.iter().map(|trade| trade.pnl).sum(),
    }
}
