//! Configuration module for Fluxtrade.
//!
//! Structured configuration loading from environment variables, validated
//! against the ranges the engine supports. Most fields are hot-updatable
//! through `TradingBot::update_config`; exchange credentials are not.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Validation(String),
}

/// Exchange connectivity settings. Not hot-updatable.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub api_key: String,
    pub secret_key: String,
    pub base_url: String,
    pub ws_url: String,
    /// Demo (paper) environment: quote suffix is rewritten -USDT -> -VST
    /// on the wire and reversed on responses.
    pub demo_mode: bool,
    pub window_cap: usize,
    pub window_ms: u64,
    pub request_timeout_ms: u64,
}

impl ExchangeConfig {
    fn from_env() -> Self {
        Self {
            api_key: env::var("BINGX_API_KEY").unwrap_or_default(),
            secret_key: env::var("BINGX_SECRET_KEY").unwrap_or_default(),
            base_url: env::var("BINGX_BASE_URL")
                .unwrap_or_else(|_| "https://open-api.bingx.com".to_string()),
            ws_url: env::var("BINGX_WS_URL")
                .unwrap_or_else(|_| "wss://open-api-swap.bingx.com/swap-market".to_string()),
            demo_mode: env_parse("DEMO_MODE", true),
            window_cap: env_parse("REQUEST_WINDOW_CAP", 100),
            window_ms: env_parse("REQUEST_WINDOW_MS", 10_000),
            request_timeout_ms: env_parse("REQUEST_TIMEOUT_MS", 10_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPoolConfig {
    pub max_workers: usize,
    pub enable_parallel: bool,
    pub task_timeout_ms: u64,
    pub retry_attempts: u32,
    pub batch_size: usize,
}

impl WorkerPoolConfig {
    fn from_env() -> Self {
        let enable_parallel = env_parse("WORKER_ENABLE_PARALLEL", true);
        Self {
            max_workers: env_parse("WORKER_MAX_WORKERS", 3),
            enable_parallel,
            task_timeout_ms: env_parse(
                "WORKER_TASK_TIMEOUT_MS",
                if enable_parallel { 10_000 } else { 20_000 },
            ),
            retry_attempts: env_parse("WORKER_RETRY_ATTEMPTS", 2),
            batch_size: env_parse("WORKER_BATCH_SIZE", 3),
        }
    }

    pub fn dedupe_window(&self) -> Duration {
        if self.enable_parallel {
            Duration::from_secs(15)
        } else {
            Duration::from_secs(30)
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub ticker_ttl_ms: u64,
    pub kline_ttl_ms: u64,
    pub max_cache_size: usize,
    /// Relative move vs previous cached price that triggers a
    /// significantPriceChange event, in percent (0.1 = 0.1%).
    pub price_change_threshold: f64,
}

impl CacheConfig {
    fn from_env() -> Self {
        Self {
            ticker_ttl_ms: env_parse("CACHE_TICKER_TTL_MS", 5_000),
            kline_ttl_ms: env_parse("CACHE_KLINE_TTL_MS", 30_000),
            max_cache_size: env_parse("CACHE_MAX_SIZE", 500),
            price_change_threshold: env_parse("CACHE_PRICE_CHANGE_THRESHOLD", 0.1),
        }
    }

    pub fn ticker_ttl(&self) -> Duration {
        Duration::from_millis(self.ticker_ttl_ms)
    }

    pub fn kline_ttl(&self) -> Duration {
        Duration::from_millis(self.kline_ttl_ms)
    }
}

/// Parameters consumed by the signal generator. Extracted from `BotConfig`
/// so hot-updates propagate as one value.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalParams {
    pub ma1_period: usize,
    pub ma2_period: usize,
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub volume_spike_threshold: f64,
    pub min_signal_strength: f64,
    pub confirmation_required: bool,
}

/// Main engine configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    // Trading
    pub max_concurrent_trades: usize,
    pub default_position_size: Decimal,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub trailing_stop_pct: f64,
    pub min_volume_usdt: f64,

    // Signal
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub volume_spike_threshold: f64,
    pub min_signal_strength: f64,
    pub confirmation_required: bool,
    pub ma1_period: usize,
    pub ma2_period: usize,
    /// Minimum strength for a non-HOLD signal to enter the execution queue.
    pub admit_threshold: f64,
    pub kline_interval: String,
    pub kline_limit: u32,

    // Risk
    pub risk_reward_ratio: f64,
    pub max_drawdown_pct: f64,
    pub max_daily_loss_usdt: Decimal,
    pub max_position_size_pct: f64,

    // Scheduling
    pub scan_interval_ms: u64,

    pub worker_pool: WorkerPoolConfig,
    pub cache: CacheConfig,
    pub exchange: ExchangeConfig,
}

impl BotConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults, and validate it.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            max_concurrent_trades: env_parse("MAX_CONCURRENT_TRADES", 3),
            default_position_size: env_parse_decimal("DEFAULT_POSITION_SIZE", "100")?,
            stop_loss_pct: env_parse("STOP_LOSS_PCT", 2.0),
            take_profit_pct: env_parse("TAKE_PROFIT_PCT", 4.0),
            trailing_stop_pct: env_parse("TRAILING_STOP_PCT", 1.0),
            min_volume_usdt: env_parse("MIN_VOLUME_USDT", 1_000_000.0),

            rsi_period: env_parse("RSI_PERIOD", 14),
            rsi_oversold: env_parse("RSI_OVERSOLD", 30.0),
            rsi_overbought: env_parse("RSI_OVERBOUGHT", 70.0),
            volume_spike_threshold: env_parse("VOLUME_SPIKE_THRESHOLD", 2.0),
            min_signal_strength: env_parse("MIN_SIGNAL_STRENGTH", 60.0),
            confirmation_required: env_parse("CONFIRMATION_REQUIRED", true),
            ma1_period: env_parse("MA1_PERIOD", 9),
            ma2_period: env_parse("MA2_PERIOD", 21),
            admit_threshold: env_parse("ADMIT_THRESHOLD", 65.0),
            kline_interval: env::var("KLINE_INTERVAL").unwrap_or_else(|_| "5m".to_string()),
            kline_limit: env_parse("KLINE_LIMIT", 100),

            risk_reward_ratio: env_parse("RISK_REWARD_RATIO", 2.0),
            max_drawdown_pct: env_parse("MAX_DRAWDOWN_PCT", 10.0),
            max_daily_loss_usdt: env_parse_decimal("MAX_DAILY_LOSS_USDT", "100")?,
            max_position_size_pct: env_parse("MAX_POSITION_SIZE_PCT", 10.0),

            scan_interval_ms: env_parse("SCAN_INTERVAL_MS", 300_000),

            worker_pool: WorkerPoolConfig::from_env(),
            cache: CacheConfig::from_env(),
            exchange: ExchangeConfig::from_env(),
        };

        for warning in config.validate().map_err(anyhow::Error::from)? {
            tracing::warn!("Config: {}", warning);
        }

        Ok(config)
    }

    /// Validate all ranges and cross-field constraints. Returns the list
    /// of non-fatal warnings on success.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        let err = |msg: String| Err(ConfigError::Validation(msg));

        if !(1..=10).contains(&self.max_concurrent_trades) {
            return err(format!(
                "max_concurrent_trades {} out of range 1..=10",
                self.max_concurrent_trades
            ));
        }
        if self.default_position_size <= Decimal::ZERO {
            return err("default_position_size must be positive".to_string());
        }
        if !(0.5..=10.0).contains(&self.stop_loss_pct) {
            return err(format!("stop_loss_pct {} out of range 0.5..=10", self.stop_loss_pct));
        }
        if !(0.5..=20.0).contains(&self.take_profit_pct) {
            return err(format!(
                "take_profit_pct {} out of range 0.5..=20",
                self.take_profit_pct
            ));
        }
        if !(0.1..=5.0).contains(&self.trailing_stop_pct) {
            return err(format!(
                "trailing_stop_pct {} out of range 0.1..=5",
                self.trailing_stop_pct
            ));
        }
        if !(10.0..=40.0).contains(&self.rsi_oversold) {
            return err(format!("rsi_oversold {} out of range 10..=40", self.rsi_oversold));
        }
        if !(60.0..=90.0).contains(&self.rsi_overbought) {
            return err(format!(
                "rsi_overbought {} out of range 60..=90",
                self.rsi_overbought
            ));
        }
        if !(1.0..=5.0).contains(&self.volume_spike_threshold) {
            return err(format!(
                "volume_spike_threshold {} out of range 1..=5",
                self.volume_spike_threshold
            ));
        }
        if !(30.0..=90.0).contains(&self.min_signal_strength) {
            return err(format!(
                "min_signal_strength {} out of range 30..=90",
                self.min_signal_strength
            ));
        }
        if !(5..=20).contains(&self.ma1_period) {
            return err(format!("ma1_period {} out of range 5..=20", self.ma1_period));
        }
        if !(10..=50).contains(&self.ma2_period) {
            return err(format!("ma2_period {} out of range 10..=50", self.ma2_period));
        }
        if self.ma2_period <= self.ma1_period {
            return err(format!(
                "ma2_period ({}) must be greater than ma1_period ({})",
                self.ma2_period, self.ma1_period
            ));
        }
        if !(1.0..=5.0).contains(&self.risk_reward_ratio) {
            return err(format!(
                "risk_reward_ratio {} out of range 1.0..=5.0",
                self.risk_reward_ratio
            ));
        }
        if !(5.0..=25.0).contains(&self.max_drawdown_pct) {
            return err(format!(
                "max_drawdown_pct {} out of range 5..=25",
                self.max_drawdown_pct
            ));
        }
        if !(5.0..=50.0).contains(&self.max_position_size_pct) {
            return err(format!(
                "max_position_size_pct {} out of range 5..=50",
                self.max_position_size_pct
            ));
        }
        if self.worker_pool.max_workers == 0 || self.worker_pool.max_workers > 12 {
            return err(format!(
                "worker_pool.max_workers {} out of range 1..=12",
                self.worker_pool.max_workers
            ));
        }

        let mut warnings = Vec::new();
        if self.take_profit_pct / self.stop_loss_pct < self.risk_reward_ratio {
            warnings.push(format!(
                "take_profit_pct / stop_loss_pct ({:.2}) below risk_reward_ratio ({:.2}); trades may fail risk validation",
                self.take_profit_pct / self.stop_loss_pct,
                self.risk_reward_ratio
            ));
        }

        Ok(warnings)
    }

    pub fn signal_params(&self) -> SignalParams {
        SignalParams {
            ma1_period: self.ma1_period,
            ma2_period: self.ma2_period,
            rsi_period: self.rsi_period,
            rsi_oversold: self.rsi_oversold,
            rsi_overbought: self.rsi_overbought,
            volume_spike_threshold: self.volume_spike_threshold,
            min_signal_strength: self.min_signal_strength,
            confirmation_required: self.confirmation_required,
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            max_concurrent_trades: 3,
            default_position_size: Decimal::from(100),
            stop_loss_pct: 2.0,
            take_profit_pct: 4.0,
            trailing_stop_pct: 1.0,
            min_volume_usdt: 1_000_000.0,
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            volume_spike_threshold: 2.0,
            min_signal_strength: 60.0,
            confirmation_required: true,
            ma1_period: 9,
            ma2_period: 21,
            admit_threshold: 65.0,
            kline_interval: "5m".to_string(),
            kline_limit: 100,
            risk_reward_ratio: 2.0,
            max_drawdown_pct: 10.0,
            max_daily_loss_usdt: Decimal::from(100),
            max_position_size_pct: 10.0,
            scan_interval_ms: 300_000,
            worker_pool: WorkerPoolConfig {
                max_workers: 3,
                enable_parallel: true,
                task_timeout_ms: 10_000,
                retry_attempts: 2,
                batch_size: 3,
            },
            cache: CacheConfig {
                ticker_ttl_ms: 5_000,
                kline_ttl_ms: 30_000,
                max_cache_size: 500,
                price_change_threshold: 0.1,
            },
            exchange: ExchangeConfig {
                api_key: String::new(),
                secret_key: String::new(),
                base_url: "https://open-api.bingx.com".to_string(),
                ws_url: "wss://open-api-swap.bingx.com/swap-market".to_string(),
                demo_mode: true,
                window_cap: 100,
                window_ms: 10_000,
                request_timeout_ms: 10_000,
            },
        }
    }
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_parse_decimal(key: &str, default: &str) -> Result<Decimal> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    Decimal::from_str(&raw).with_context(|| format!("Failed to parse {} as decimal: {}", key, raw))
}
