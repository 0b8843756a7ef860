use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tokio::sync::broadcast::{self, error::RecvError};

use common::{
    Config, ExchangeClient, OrderSide, OrderType, ProgressEvent, SystemClock, TradingMode,
};
use engine::{BinanceClient, OrderExecutor, TwapManager, TwapRequest};
use paper::PaperClient;

/// Market, Limit and TWAP orders against Binance Spot Testnet
#[derive(Parser)]
#[command(name = "twapbot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Trading mode; overrides TRADING_MODE
    #[arg(long, global = true)]
    mode: Option<TradingMode>,

    /// Binance API key; overrides BINANCE_API_KEY
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Binance API secret; overrides BINANCE_API_SECRET
    #[arg(long, global = true)]
    api_secret: Option<String>,

    /// REST base URL; overrides BASE_URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Place a single MARKET order
    Market(OrderArgs),

    /// Place a single LIMIT order (GTC)
    Limit {
        #[command(flatten)]
        order: OrderArgs,

        /// Limit price
        #[arg(long)]
        price: Decimal,
    },

    /// Split an order into equal slices spread over time
    Twap(TwapArgs),

    /// Run the dashboard API until Ctrl-C
    Serve {
        /// Listen port; overrides DASHBOARD_PORT
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Args)]
struct OrderArgs {
    /// Trading pair, e.g. BTCUSDT
    symbol: String,

    /// BUY or SELL
    side: OrderSide,

    /// Base-asset quantity
    quantity: Decimal,
}

#[derive(Args)]
struct TwapArgs {
    #[command(flatten)]
    order: OrderArgs,

    /// Number of slices
    #[arg(long, alias = "parts", default_value_t = 3)]
    slices: u32,

    /// Total duration in seconds
    #[arg(long, conflicts_with = "interval")]
    duration: Option<u64>,

    /// Spacing between slices in seconds, used when --duration is absent
    #[arg(long, default_value_t = 5)]
    interval: u64,

    /// MARKET or LIMIT
    #[arg(long, default_value = "MARKET")]
    order_type: OrderType,

    /// Limit price for LIMIT slices
    #[arg(long)]
    price: Option<Decimal>,
}

impl TwapArgs {
    fn total_duration(&self) -> Result<Duration> {
        match self.duration {
            Some(secs) => Ok(Duration::from_secs(secs)),
            None => match Duration::from_secs(self.interval).checked_mul(self.slices) {
                Some(total) => Ok(total),
                None => bail!(
                    "--interval {} with {} slices overflows the total duration",
                    self.interval,
                    self.slices
                ),
            },
        }
    }
}

fn setup_logging(log_file: &str) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("cannot open log file {log_file}"))?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}

fn apply_overrides(cfg: &mut Config, cli: &Cli) {
    if let Some(mode) = cli.mode {
        cfg.trading_mode = mode;
    }
    if let Some(key) = &cli.api_key {
        cfg.binance_api_key = key.clone();
    }
    if let Some(secret) = &cli.api_secret {
        cfg.binance_secret = secret.clone();
    }
    if let Some(url) = &cli.base_url {
        cfg.base_url = url.trim_end_matches('/').to_string();
    }
}

/// Exchange client injected based on the trading mode.
fn exchange_client(cfg: &Config) -> Result<Arc<dyn ExchangeClient>> {
    cfg.require_credentials()?;
    let binance = BinanceClient::from_config(cfg)?;
    match cfg.trading_mode {
        TradingMode::Live => {
            info!(base_url = %cfg.base_url, "Live mode, orders go to Binance");
            Ok(Arc::new(binance))
        }
        TradingMode::Paper => {
            info!(
                slippage_bps = %cfg.paper_slippage_bps,
                balance = %cfg.paper_balance_usdt,
                "Paper mode, orders are simulated against live prices"
            );
            Ok(Arc::new(
                PaperClient::new(cfg.paper_balance_usdt, cfg.paper_slippage_bps)
                    .with_market_data(Arc::new(binance)),
            ))
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_twap(executor: OrderExecutor, args: TwapArgs) -> Result<()> {
    let request = TwapRequest {
        symbol: args.order.symbol.clone(),
        side: args.order.side,
        order_type: args.order_type,
        quantity: args.order.quantity,
        price: args.price,
        slices: args.slices,
        duration: args.total_duration()?,
    };
    let plan = executor.prepare_twap(request).await?;

    let manager = TwapManager::new(executor.client(), Arc::new(SystemClock));
    let events = manager.subscribe();
    let handle = manager.launch(plan).await?;
    let printer = tokio::spawn(print_events(events, handle.run_id().to_string()));

    let summary = tokio::select! {
        summary = handle.wait() => summary,
        _ = tokio::signal::ctrl_c() => {
            warn!(run_id = %handle.run_id(), "Ctrl-C received, cancelling TWAP");
            handle.cancel();
            handle.wait().await
        }
    };
    // The terminal event is already queued; the printer stops after it.
    if let Err(e) = printer.await {
        warn!(error = %e, "Progress printer failed");
    }

    print_json(&handle.snapshot().await)?;
    info!(
        run_id = %summary.run_id,
        state = %summary.state,
        filled = %summary.total_filled_quantity,
        "TWAP finished"
    );
    Ok(())
}

/// Print progress events as JSON lines until `run_id` reaches a terminal state.
async fn print_events(mut events: broadcast::Receiver<ProgressEvent>, run_id: String) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{line}");
                }
                if is_terminal_for(&event, &run_id) {
                    break;
                }
            }
            Err(RecvError::Lagged(n)) => warn!(dropped = n, "Progress output lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn is_terminal_for(event: &ProgressEvent, run_id: &str) -> bool {
    matches!(event, ProgressEvent::RunStateChanged { to, .. } if to.is_terminal())
        && event.run_id() == run_id
}

async fn run_server(cfg: &Config, executor: OrderExecutor, port: Option<u16>) -> Result<()> {
    let Some(token) = cfg.dashboard_token.clone() else {
        bail!("DASHBOARD_TOKEN must be set to serve the dashboard");
    };
    let manager = TwapManager::new(executor.client(), Arc::new(SystemClock));
    let state = api::AppState {
        manager: manager.clone(),
        executor,
        trading_mode: cfg.trading_mode,
        dashboard_token: token,
    };

    let port = port.unwrap_or(cfg.dashboard_port);
    tokio::select! {
        result = api::serve(state, port) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, cancelling active runs");
            manager.cancel_all().await;
            let summaries = manager.wait_all().await;
            info!(runs = summaries.len(), "All runs settled, exiting");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = Config::from_env()?;
    apply_overrides(&mut cfg, &cli);
    setup_logging(&cfg.log_file)?;
    info!(mode = %cfg.trading_mode, "twapbot starting");

    let executor = OrderExecutor::new(exchange_client(&cfg)?);

    match cli.command {
        Commands::Market(order) => {
            let ack = executor
                .place_market(&order.symbol, order.side, order.quantity)
                .await?;
            print_json(&ack)?;
        }
        Commands::Limit { order, price } => {
            let ack = executor
                .place_limit(&order.symbol, order.side, order.quantity, price)
                .await?;
            print_json(&ack)?;
        }
        Commands::Twap(args) => run_twap(executor, args).await?,
        Commands::Serve { port } => run_server(&cfg, executor, port).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn twap_interval_sets_total_duration() {
        let cli = Cli::parse_from([
            "twapbot", "twap", "BTCUSDT", "buy", "0.01", "--parts", "4", "--interval", "15",
        ]);
        let Commands::Twap(args) = cli.command else {
            panic!("expected twap");
        };
        assert_eq!(args.slices, 4);
        assert_eq!(args.order.side, OrderSide::Buy);
        assert_eq!(args.total_duration().unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn interval_defaults_to_five_seconds() {
        let cli = Cli::parse_from(["twapbot", "twap", "BTCUSDT", "BUY", "0.01"]);
        let Commands::Twap(args) = cli.command else {
            panic!("expected twap");
        };
        assert_eq!(args.slices, 3);
        assert_eq!(args.total_duration().unwrap(), Duration::from_secs(15));
    }

    #[test]
    fn overflowing_interval_is_an_error() {
        let cli = Cli::parse_from([
            "twapbot",
            "twap",
            "BTCUSDT",
            "BUY",
            "1",
            "--interval",
            "18446744073709551615",
            "--slices",
            "2",
        ]);
        let Commands::Twap(args) = cli.command else {
            panic!("expected twap");
        };
        assert!(args.total_duration().is_err());
    }

    #[tokio::test]
    async fn printer_stops_after_terminal_event_of_its_run() {
        use chrono::Utc;
        use common::RunState;

        let (tx, rx) = broadcast::channel(16);
        let event = |run_id: &str, to: RunState| ProgressEvent::RunStateChanged {
            run_id: run_id.into(),
            from: RunState::Running,
            to,
            timestamp: Utc::now(),
        };
        tx.send(event("other", RunState::Completed)).unwrap();
        tx.send(event("mine", RunState::Cancelled)).unwrap();

        // The sender stays open, so only the terminal event can end the loop.
        tokio::time::timeout(Duration::from_secs(1), print_events(rx, "mine".into()))
            .await
            .expect("printer should stop on its run's terminal event");
        drop(tx);
    }

    #[test]
    fn duration_and_interval_conflict() {
        let result = Cli::try_parse_from([
            "twapbot", "twap", "BTCUSDT", "SELL", "1", "--duration", "60", "--interval", "10",
        ]);
        assert!(result.is_err());
    }

    fn paper_config() -> Config {
        Config {
            binance_api_key: String::new(),
            binance_secret: String::new(),
            base_url: common::TESTNET_BASE_URL.into(),
            request_timeout: Duration::from_secs(10),
            order_min_interval: Duration::from_millis(100),
            trading_mode: TradingMode::Paper,
            paper_slippage_bps: Decimal::TEN,
            paper_balance_usdt: Decimal::from(10_000),
            dashboard_token: None,
            dashboard_port: 8080,
            log_file: "bot.log".into(),
        }
    }

    #[test]
    fn global_mode_flag_overrides_env() {
        let cli = Cli::parse_from(["twapbot", "market", "ETHUSDT", "SELL", "0.5", "--mode", "live"]);
        let mut cfg = paper_config();
        apply_overrides(&mut cfg, &cli);
        assert_eq!(cfg.trading_mode, TradingMode::Live);
        assert!(exchange_client(&cfg).is_err());
    }

    #[test]
    fn live_credentials_may_come_from_flags() {
        let cli = Cli::parse_from([
            "twapbot", "--mode", "live", "--api-key", "k", "--api-secret", "s", "market",
            "BTCUSDT", "BUY", "0.001",
        ]);
        let mut cfg = paper_config();
        apply_overrides(&mut cfg, &cli);
        assert!(exchange_client(&cfg).is_ok());
    }
}
