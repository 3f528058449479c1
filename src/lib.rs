pub mod commands;
pub mod dashboard;
pub mod error;
pub mod state;

use commands::session::{connect_http_session, shutdown_session};
use commands::views::trade_summary;
use dashboard::config::DashboardArgs;
use dashboard::reconciler::DashboardNotice;
use error::AppError;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Runs a headless session until ctrl-c, logging every view-model change.
pub async fn run(args: DashboardArgs) -> Result<(), AppError> {
    let config = args.with_env_fallbacks().normalize()?;
    let session = connect_http_session(config)?;
    let mut notices = session.subscribe();

    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);

    loop {
        let notice = tokio::select! {
            signal = &mut shutdown_signal => {
                match signal {
                    Ok(()) => info!("shutdown requested"),
                    Err(error) => warn!(%error, "ctrl-c listener failed; shutting down"),
                }
                break;
            }
            notice = notices.recv() => notice,
        };

        match notice {
            Ok(DashboardNotice::ConnectionChanged { connected }) => {
                info!(connected, "event stream connection changed");
            }
            Ok(DashboardNotice::ViewModelChanged { revision }) => {
                let (positions, candles, alerts) = {
                    let readable = session.view_model.read().await;
                    (
                        readable.positions.len(),
                        readable.candles.len(),
                        readable.alerts.len(),
                    )
                };
                let summary = trade_summary(&session).await;
                debug!(
                    revision,
                    positions,
                    candles,
                    alerts,
                    trades = summary.count,
                    total_pnl = summary.total_pnl,
                    "view model updated"
                );
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "notice subscriber lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }

    shutdown_session(&session).await;
    Ok(())
}
