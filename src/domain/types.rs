use crate::domain::errors::MarketDataError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Futures position direction. BUY opens LONG, SELL opens SHORT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl From<OrderSide> for PositionSide {
    fn from(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Validate OHLC ordering and positivity. Invariant:
    /// low <= min(open, close) <= max(open, close) <= high, volume >= 0.
    pub fn validate(&self) -> Result<(), MarketDataError> {
        let invalid = |reason: &str| MarketDataError::InvalidData {
            reason: reason.to_string(),
        };

        if self.open <= Decimal::ZERO
            || self.high <= Decimal::ZERO
            || self.low <= Decimal::ZERO
            || self.close <= Decimal::ZERO
        {
            return Err(invalid("non-positive OHLC value"));
        }
        if self.volume < Decimal::ZERO {
            return Err(invalid("negative volume"));
        }

        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if self.low > body_low || body_high > self.high {
            return Err(invalid("OHLC ordering violated"));
        }

        Ok(())
    }
}

/// Validate a candle series: each candle well-formed, timestamps strictly ascending.
pub fn validate_candle_series(candles: &[Candle]) -> Result<(), MarketDataError> {
    for candle in candles {
        candle.validate()?;
    }
    for pair in candles.windows(2) {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(MarketDataError::InvalidData {
                reason: format!(
                    "timestamps not strictly ascending: {} -> {}",
                    pair[0].timestamp, pair[1].timestamp
                ),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: Decimal,
    pub volume_24h: Decimal,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolMeta {
    pub symbol: String,
    pub asset: String,
    /// 1 = active/tradable on the exchange.
    pub status: i32,
    pub price_precision: u32,
    pub quantity_precision: u32,
    pub display_name: String,
}

impl SymbolMeta {
    pub fn is_active(&self) -> bool {
        self.status == 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub balance: Decimal,
    pub available: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub unrealized_pnl: Decimal,
    pub order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub position_side: PositionSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order_id: String,
    pub symbol: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalAction::Buy => write!(f, "BUY"),
            SignalAction::Sell => write!(f, "SELL"),
            SignalAction::Hold => write!(f, "HOLD"),
        }
    }
}

/// Indicator values the signal was computed from. Missing inputs are
/// substituted upstream (MA falls back to price, RSI to 50).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub price: f64,
    pub ma1: f64,
    pub ma2: f64,
    pub rsi: f64,
    pub volume: f64,
    pub avg_volume: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalConditions {
    pub ma_crossover: bool,
    pub bullish_crossover: bool,
    pub rsi_signal: bool,
    pub volume_confirmation: bool,
    pub trend_alignment: bool,
}

impl SignalConditions {
    /// Count of confirmations relevant to the confirmation gate.
    pub fn confirmation_count(&self) -> usize {
        [self.ma_crossover, self.rsi_signal, self.trend_alignment]
            .iter()
            .filter(|c| **c)
            .count()
    }
}

/// Immutable output of the signal generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub symbol: String,
    pub action: SignalAction,
    /// 0..=100. For HOLD this reports the strongest non-triggering side.
    pub strength: f64,
    pub reason: String,
    pub indicators: IndicatorSnapshot,
    pub conditions: SignalConditions,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestPriority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone)]
pub struct SignalTask {
    pub id: Uuid,
    pub symbol: String,
    pub created_at: Instant,
    pub created_at_ms: i64,
    pub priority: i32,
    pub retries: u32,
    pub max_retries: u32,
}

impl SignalTask {
    pub fn new(symbol: String, priority: i32, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol,
            created_at: Instant::now(),
            created_at_ms: chrono::Utc::now().timestamp_millis(),
            priority,
            retries: 0,
            max_retries,
        }
    }
}

/// Stage machine for a signal tracked by the orchestrator:
/// analyzing -> evaluating -> decided -> queued -> executing -> completed,
/// with rejected reachable from any non-terminal stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalStage {
    Analyzing,
    Evaluating,
    Decided,
    Queued,
    Executing,
    Completed,
    Rejected,
}

impl SignalStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SignalStage::Completed | SignalStage::Rejected)
    }

    /// Ordinal along the happy path; Rejected has none.
    fn ordinal(&self) -> Option<u8> {
        match self {
            SignalStage::Analyzing => Some(0),
            SignalStage::Evaluating => Some(1),
            SignalStage::Decided => Some(2),
            SignalStage::Queued => Some(3),
            SignalStage::Executing => Some(4),
            SignalStage::Completed => Some(5),
            SignalStage::Rejected => None,
        }
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(&self, next: &SignalStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next.ordinal() {
            // Rejection is allowed from any non-terminal stage
            None => true,
            Some(n) => self.ordinal().map(|c| n == c + 1).unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalInProcess {
    pub id: Uuid,
    pub symbol: String,
    pub stage: SignalStage,
    pub rejection_reason: Option<String>,
    pub started_at_ms: i64,
}

impl SignalInProcess {
    pub fn new(symbol: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol,
            stage: SignalStage::Analyzing,
            rejection_reason: None,
            started_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Queued,
    Processing,
    Executed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TradeInQueue {
    pub id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub estimated_price: Decimal,
    /// Signal strength; higher dequeues earlier.
    pub priority: f64,
    pub queued_at_ms: i64,
    pub status: TradeStatus,
    pub signal_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Derived per-position risk figures; recomputed on each monitor tick,
/// never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRisk {
    pub symbol: String,
    pub side: PositionSide,
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
    pub break_even_price: Decimal,
    pub trailing_stop_price: Option<Decimal>,
    pub liquidation_price: Decimal,
    pub margin_ratio: f64,
    pub risk_amount: Decimal,
    pub reward_amount: Decimal,
    pub risk_reward_ratio: f64,
    pub risk_level: RiskLevel,
    pub unrealized_pnl_pct: f64,
}

/// Per-trade record written to the external history store on order submit
/// and on fill updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub position_side: PositionSide,
    pub order_type: OrderType,
    pub status: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub signal_strength: f64,
    pub signal_reason: String,
    pub indicators: IndicatorSnapshot,
    pub commissions: Decimal,
    pub executed_qty: Decimal,
    pub avg_price: Decimal,
    pub realized_pnl: Decimal,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}
