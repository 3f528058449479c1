use crate::dashboard::types::Trade;
use crate::dashboard::views::{
    equity_curve as build_equity_curve, trade_summary as build_trade_summary,
    trade_table as build_trade_table, EquityPoint, TradeSummary, TradeTableQuery,
};
use crate::state::DashboardSession;

pub async fn equity_curve(session: &DashboardSession) -> Vec<EquityPoint> {
    let readable = session.view_model.read().await;
    build_equity_curve(&readable.trades)
}

pub async fn trade_table(
    session: &DashboardSession,
    query: Option<TradeTableQuery>,
) -> Vec<Trade> {
    let query = query.unwrap_or_default();
    let readable = session.view_model.read().await;
    build_trade_table(&readable.trades, &query)
}

pub async fn trade_summary(session: &DashboardSession) -> TradeSummary {
    let readable = session.view_model.read().await;
    build_trade_summary(&readable.trades)
}
