//! Risk Manager
//!
//! Pre-trade validation gate plus continuous monitoring of open
//! positions. Validation is fail-closed: any I/O failure while gathering
//! inputs rejects the trade. The monitor loop recomputes per-position
//! risk every few seconds and emits lifecycle events (break-even,
//! trailing stop, emergency stop, daily limit).

use crate::config::BotConfig;
use crate::domain::errors::RiskError;
use crate::domain::events::{TradingEvent, now_ms};
use crate::domain::types::{
    Balance, OrderSide, Position, PositionRisk, PositionSide, RequestPriority, RiskLevel,
};
use crate::infrastructure::EventBus;
use crate::infrastructure::exchange::{ExchangeRequest, ExchangeResponse, RequestManager};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

const MONITOR_INTERVAL: Duration = Duration::from_secs(5);

/// Round-trip taker fee allowance baked into the break-even price.
const ROUND_TRIP_FEE_PCT: f64 = 0.075 * 2.0;

/// Futures leverage assumed for margin and liquidation estimates.
const ASSUMED_LEVERAGE: u32 = 10;
const MAINTENANCE_MARGIN_PCT: f64 = 0.5;

/// Unrealized P&L percentage that arms the move-to-break-even event.
const BREAK_EVEN_TRIGGER_PCT: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct TradeAssessment {
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
    pub risk_amount: Decimal,
    pub reward_amount: Decimal,
    pub risk_reward_ratio: f64,
}

#[derive(Debug, Clone)]
pub struct TradeValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub assessment: Option<TradeAssessment>,
}

/// Stop-loss price for an entry: `pct` percent against the position.
pub fn stop_loss_price(entry: Decimal, side: PositionSide, pct: f64) -> Decimal {
    let factor = Decimal::from_f64(pct / 100.0).unwrap_or(Decimal::ZERO);
    match side {
        PositionSide::Long => entry * (Decimal::ONE - factor),
        PositionSide::Short => entry * (Decimal::ONE + factor),
    }
}

pub fn take_profit_price(entry: Decimal, side: PositionSide, pct: f64) -> Decimal {
    let factor = Decimal::from_f64(pct / 100.0).unwrap_or(Decimal::ZERO);
    match side {
        PositionSide::Long => entry * (Decimal::ONE + factor),
        PositionSide::Short => entry * (Decimal::ONE - factor),
    }
}

/// Break-even price including the symmetric round-trip fee allowance.
pub fn break_even_price(entry: Decimal, side: PositionSide) -> Decimal {
    let fees = Decimal::from_f64(ROUND_TRIP_FEE_PCT / 100.0).unwrap_or(Decimal::ZERO);
    match side {
        PositionSide::Long => entry * (Decimal::ONE + fees),
        PositionSide::Short => entry * (Decimal::ONE - fees),
    }
}

/// Trailing stop anchored at `reference_price` (the current price when the
/// stop is activated).
pub fn trailing_stop_price(reference_price: Decimal, side: PositionSide, pct: f64) -> Decimal {
    let factor = Decimal::from_f64(pct / 100.0).unwrap_or(Decimal::ZERO);
    match side {
        PositionSide::Long => reference_price * (Decimal::ONE - factor),
        PositionSide::Short => reference_price * (Decimal::ONE + factor),
    }
}

fn liquidation_price(entry: Decimal, side: PositionSide) -> Decimal {
    let distance = Decimal::from_f64((100.0 / ASSUMED_LEVERAGE as f64 - MAINTENANCE_MARGIN_PCT) / 100.0)
        .unwrap_or(Decimal::ZERO);
    match side {
        PositionSide::Long => entry * (Decimal::ONE - distance),
        PositionSide::Short => entry * (Decimal::ONE + distance),
    }
}

/// Classify by unrealized P&L percentage against the drawdown budget.
pub fn classify_risk_level(unrealized_pnl_pct: f64, max_drawdown_pct: f64) -> RiskLevel {
    if unrealized_pnl_pct <= -0.8 * max_drawdown_pct {
        RiskLevel::Critical
    } else if unrealized_pnl_pct <= -0.5 * max_drawdown_pct {
        RiskLevel::High
    } else if unrealized_pnl_pct <= -0.25 * max_drawdown_pct {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Derive the full risk picture for an open position.
pub fn compute_position_risk(
    position: &Position,
    config: &BotConfig,
    account_balance: Decimal,
) -> PositionRisk {
    let entry = position.entry_price;
    let side = position.side;
    let notional = entry * position.quantity;

    let stop = stop_loss_price(entry, side, config.stop_loss_pct);
    let take = take_profit_price(entry, side, config.take_profit_pct);

    let risk_amount = (entry - stop).abs() * position.quantity;
    let reward_amount = (take - entry).abs() * position.quantity;
    let risk_reward_ratio = if risk_amount > Decimal::ZERO {
        (reward_amount / risk_amount).to_f64().unwrap_or(0.0)
    } else {
        0.0
    };

    let unrealized_pnl_pct = if notional > Decimal::ZERO {
        (position.unrealized_pnl / notional * Decimal::from(100))
            .to_f64()
            .unwrap_or(0.0)
    } else {
        0.0
    };

    let margin = notional / Decimal::from(ASSUMED_LEVERAGE);
    let margin_ratio = if account_balance > Decimal::ZERO {
        (margin / account_balance).to_f64().unwrap_or(0.0)
    } else {
        1.0
    };

    let trailing_armed = unrealized_pnl_pct > config.take_profit_pct * 0.5;

    PositionRisk {
        symbol: position.symbol.clone(),
        side,
        stop_loss_price: stop,
        take_profit_price: take,
        break_even_price: break_even_price(entry, side),
        trailing_stop_price: trailing_armed.then(|| {
            // Anchor at the price implied by the current P&L
            let current = match side {
                PositionSide::Long => {
                    entry + position.unrealized_pnl / position.quantity.max(Decimal::ONE)
                }
                PositionSide::Short => {
                    entry - position.unrealized_pnl / position.quantity.max(Decimal::ONE)
                }
            };
            trailing_stop_price(current, side, config.trailing_stop_pct)
        }),
        liquidation_price: liquidation_price(entry, side),
        margin_ratio,
        risk_amount,
        reward_amount,
        risk_reward_ratio,
        risk_level: classify_risk_level(unrealized_pnl_pct, config.max_drawdown_pct),
        unrealized_pnl_pct,
    }
}

pub struct RiskManager {
    request_manager: Arc<RequestManager>,
    event_bus: EventBus,
    config: RwLock<BotConfig>,
    daily_start_balance: RwLock<Option<Decimal>>,
    daily_pnl: RwLock<Decimal>,
    monitor_interval: Duration,
    task_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RiskManager {
    pub fn new(request_manager: Arc<RequestManager>, event_bus: EventBus, config: BotConfig) -> Self {
        Self::with_interval(request_manager, event_bus, config, MONITOR_INTERVAL)
    }

    pub fn with_interval(
        request_manager: Arc<RequestManager>,
        event_bus: EventBus,
        config: BotConfig,
        monitor_interval: Duration,
    ) -> Self {
        Self {
            request_manager,
            event_bus,
            config: RwLock::new(config),
            daily_start_balance: RwLock::new(None),
            daily_pnl: RwLock::new(Decimal::ZERO),
            monitor_interval,
            task_handle: Mutex::new(None),
        }
    }

    pub async fn update_config(&self, config: BotConfig) {
        *self.config.write().await = config;
    }

    pub async fn daily_pnl(&self) -> Decimal {
        *self.daily_pnl.read().await
    }

    /// Record the session start balance and spawn the monitor. Refuses to
    /// start when the balance is unavailable.
    pub async fn start(self: &Arc<Self>) -> Result<(), RiskError> {
        let mut handle_guard = self.task_handle.lock().await;
        if handle_guard.is_some() {
            return Ok(());
        }

        let balance = self.fetch_balance().await.map_err(|e| RiskError::Fatal {
            reason: format!("cannot obtain account balance at start: {}", e),
        })?;

        *self.daily_start_balance.write().await = Some(balance);
        info!("RiskManager: Session start balance {}", balance);

        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(manager.monitor_interval);
            tick.tick().await;
            loop {
                tick.tick().await;
                manager.monitor_tick().await;
            }
        });
        *handle_guard = Some(handle);
        Ok(())
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.task_handle.lock().await.take() {
            handle.abort();
        }
        info!("RiskManager: Stopped");
    }

    async fn fetch_balance(&self) -> Result<Decimal, RiskError> {
        let response = self
            .request_manager
            .submit(ExchangeRequest::GetBalance, RequestPriority::Normal)
            .await?;

        let balances: Vec<Balance> = match response {
            ExchangeResponse::Balances(b) => b,
            other => {
                return Err(RiskError::Fatal {
                    reason: format!("unexpected balance response: {:?}", other),
                });
            }
        };

        balances
            .iter()
            .find(|b| b.asset == "USDT" || b.asset == "VST")
            .map(|b| b.balance)
            .ok_or_else(|| RiskError::Fatal {
                reason: "no USDT balance in account".to_string(),
            })
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>, RiskError> {
        let response = self
            .request_manager
            .submit(ExchangeRequest::GetPositions, RequestPriority::Normal)
            .await?;

        match response {
            ExchangeResponse::Positions(p) => Ok(p),
            other => Err(RiskError::Fatal {
                reason: format!("unexpected positions response: {:?}", other),
            }),
        }
    }

    /// One monitoring pass: refresh daily P&L, derive per-position risk,
    /// emit lifecycle events.
    pub async fn monitor_tick(&self) {
        let config = self.config.read().await.clone();

        let balance = match self.fetch_balance().await {
            Ok(b) => b,
            Err(e) => {
                warn!("RiskManager: Monitor could not fetch balance: {}", e);
                return;
            }
        };

        let positions = match self.fetch_positions().await {
            Ok(p) => p,
            Err(e) => {
                warn!("RiskManager: Monitor could not fetch positions: {}", e);
                return;
            }
        };

        let unrealized: Decimal = positions.iter().map(|p| p.unrealized_pnl).sum();
        let daily_pnl = match *self.daily_start_balance.read().await {
            Some(start) => balance + unrealized - start,
            None => Decimal::ZERO,
        };
        *self.daily_pnl.write().await = daily_pnl;

        if daily_pnl.abs() > config.max_daily_loss_usdt {
            error!(
                "RiskManager: Daily P&L {} beyond limit {}",
                daily_pnl, config.max_daily_loss_usdt
            );
            self.event_bus
                .publish(TradingEvent::DailyLimitExceeded {
                    daily_pnl,
                    limit: config.max_daily_loss_usdt,
                    timestamp: now_ms(),
                });
        }

        for position in &positions {
            let risk = compute_position_risk(position, &config, balance);

            if risk.risk_level == RiskLevel::Critical {
                error!(
                    "RiskManager: EMERGENCY {} P&L {:.2}% (level {})",
                    risk.symbol, risk.unrealized_pnl_pct, risk.risk_level
                );
                self.event_bus
                    .publish(TradingEvent::EmergencyStop {
                        risk: risk.clone(),
                        timestamp: now_ms(),
                    });
                continue;
            }

            if risk.unrealized_pnl_pct > BREAK_EVEN_TRIGGER_PCT {
                self.event_bus
                    .publish(TradingEvent::MoveToBreakEven {
                        risk: risk.clone(),
                        timestamp: now_ms(),
                    });
            }

            if risk.unrealized_pnl_pct > config.take_profit_pct * 0.5 {
                self.event_bus
                    .publish(TradingEvent::ActivateTrailingStop {
                        risk,
                        timestamp: now_ms(),
                    });
            }
        }
    }

    /// Synchronous pre-trade gate. All failures are errors; the trade is
    /// valid only when every check passes.
    pub async fn validate_trade(
        &self,
        symbol: &str,
        side: OrderSide,
        size: Decimal,
        entry_price: Decimal,
    ) -> TradeValidation {
        let config = self.config.read().await.clone();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if size <= Decimal::ZERO || entry_price <= Decimal::ZERO {
            return TradeValidation {
                valid: false,
                errors: vec!["Size and entry price must be positive".to_string()],
                warnings,
                assessment: None,
            };
        }

        // Fail closed: no balance, no trade
        let balance = match self.fetch_balance().await {
            Ok(b) => b,
            Err(e) => {
                return TradeValidation {
                    valid: false,
                    errors: vec![format!("Cannot verify account state: {}", e)],
                    warnings,
                    assessment: None,
                };
            }
        };

        let position_side = PositionSide::from(side);
        let stop = stop_loss_price(entry_price, position_side, config.stop_loss_pct);
        let take = take_profit_price(entry_price, position_side, config.take_profit_pct);
        let quantity = size / entry_price;
        let risk_amount = (entry_price - stop).abs() * quantity;
        let reward_amount = (take - entry_price).abs() * quantity;
        let risk_reward_ratio = if risk_amount > Decimal::ZERO {
            (reward_amount / risk_amount).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        let max_notional =
            balance * Decimal::from_f64(config.max_position_size_pct / 100.0).unwrap_or(Decimal::ZERO);
        if size > max_notional {
            errors.push(format!(
                "Position size {} exceeds maximum {} ({}% of balance {})",
                size, max_notional, config.max_position_size_pct, balance
            ));
        } else if size * Decimal::from(2) > max_notional {
            warnings.push(format!(
                "Position size {} is more than half the allowed maximum {}",
                size, max_notional
            ));
        }

        if risk_reward_ratio + 1e-9 < config.risk_reward_ratio {
            errors.push(format!(
                "Risk/Reward ratio too low: {:.2} < {:.2}",
                risk_reward_ratio, config.risk_reward_ratio
            ));
        }

        let daily_pnl = *self.daily_pnl.read().await;
        if daily_pnl - risk_amount < -config.max_daily_loss_usdt {
            errors.push(format!(
                "Projected risk {} with daily P&L {} breaches daily loss limit {}",
                risk_amount, daily_pnl, config.max_daily_loss_usdt
            ));
        }

        let required_margin = size / Decimal::from(ASSUMED_LEVERAGE);
        let margin_cap = balance * Decimal::new(9, 1);
        if required_margin > margin_cap {
            errors.push(format!(
                "Required margin {} exceeds 90% of balance {}",
                required_margin, balance
            ));
        }

        TradeValidation {
            valid: errors.is_empty(),
            errors,
            warnings,
            assessment: Some(TradeAssessment {
                stop_loss_price: stop,
                take_profit_price: take,
                risk_amount,
                reward_amount,
                risk_reward_ratio,
            }),
        }
    }
}
