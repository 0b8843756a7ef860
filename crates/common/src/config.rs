use std::time::Duration;

use rust_decimal::Decimal;

use crate::{Error, Result, TradingMode};

pub const TESTNET_BASE_URL: &str = "https://testnet.binance.vision";

/// All configuration loaded from environment variables at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // Exchange
    pub binance_api_key: String,
    pub binance_secret: String,
    pub base_url: String,
    pub request_timeout: Duration,
    /// Minimum spacing between two order requests from this process.
    pub order_min_interval: Duration,

    // Trading
    pub trading_mode: TradingMode,
    pub paper_slippage_bps: Decimal,
    pub paper_balance_usdt: Decimal,

    // Dashboard
    pub dashboard_token: Option<String>,
    pub dashboard_port: u16,

    // Audit log
    pub log_file: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Credentials are optional here; CLI flags may
    /// still supply them, so live mode checks them with [`Config::require_credentials`].
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trading_mode = match optional_env("TRADING_MODE") {
            Some(v) => v.parse()?,
            None => TradingMode::Paper,
        };

        Ok(Config {
            binance_api_key: optional_env("BINANCE_API_KEY").unwrap_or_default(),
            binance_secret: optional_env("BINANCE_API_SECRET").unwrap_or_default(),
            base_url: optional_env("BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| TESTNET_BASE_URL.to_string()),
            request_timeout: Duration::from_secs(parsed_env("REQUEST_TIMEOUT_SECS", 10)?),
            order_min_interval: Duration::from_millis(parsed_env("ORDER_MIN_INTERVAL_MS", 100)?),
            trading_mode,
            paper_slippage_bps: parsed_env("PAPER_SLIPPAGE_BPS", Decimal::TEN)?,
            paper_balance_usdt: parsed_env("PAPER_BALANCE_USDT", Decimal::from(10_000))?,
            dashboard_token: optional_env("DASHBOARD_TOKEN"),
            dashboard_port: parsed_env("DASHBOARD_PORT", 8080)?,
            log_file: optional_env("BOT_LOGFILE").unwrap_or_else(|| "bot.log".to_string()),
        })
    }

    /// Live mode signs every order, so both credentials must be present once
    /// env and CLI overrides are merged. Paper mode never needs them.
    pub fn require_credentials(&self) -> Result<()> {
        if self.trading_mode == TradingMode::Paper {
            return Ok(());
        }
        let missing: Vec<&str> = [
            ("BINANCE_API_KEY", &self.binance_api_key),
            ("BINANCE_API_SECRET", &self.binance_secret),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(name, _)| name)
        .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "live mode needs {} (env or --api-key/--api-secret)",
                missing.join(" and ")
            )))
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key} has an invalid value: '{raw}'"))),
        None => Ok(default),
    }
}
