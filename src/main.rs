use clap::Parser;
use dashboard_sync_lib::dashboard::config::DashboardArgs;
use dashboard_sync_lib::error::AppError;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "dashboard-sync",
    about = "Keeps a live trading dashboard view in sync with its backend",
    version
)]
struct Cli {
    /// Backend REST base URL, e.g. http://127.0.0.1:8000.
    #[arg(long)]
    base_url: Option<String>,

    /// Event stream URL; derived from the base URL when omitted.
    #[arg(long)]
    stream_url: Option<String>,

    #[arg(long)]
    poll_interval_ms: Option<u64>,

    #[arg(long)]
    reconnect_delay_ms: Option<u64>,

    #[arg(long)]
    request_timeout_ms: Option<u64>,

    /// Keep-alive ping period on the event stream.
    #[arg(long)]
    ping_interval_ms: Option<u64>,

    /// Number of candles kept for the chart.
    #[arg(long)]
    candle_capacity: Option<usize>,

    #[arg(long)]
    trades_limit: Option<u16>,

    #[arg(long)]
    candles_limit: Option<u16>,

    /// Used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl From<Cli> for DashboardArgs {
    fn from(cli: Cli) -> Self {
        Self {
            base_url: cli.base_url,
            stream_url: cli.stream_url,
            poll_interval_ms: cli.poll_interval_ms,
            reconnect_delay_ms: cli.reconnect_delay_ms,
            request_timeout_ms: cli.request_timeout_ms,
            ping_interval_ms: cli.ping_interval_ms,
            candle_capacity: cli.candle_capacity,
            trades_limit: cli.trades_limit,
            candles_limit: cli.candles_limit,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    dashboard_sync_lib::run(cli.into()).await
}
