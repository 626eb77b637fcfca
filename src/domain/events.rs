use crate::domain::types::{PositionRisk, SignalStage, TradingSignal};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

/// Severity tag for activity-feed entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Events published on the bus for UI/log subsystems. Every variant
/// carries a wall-clock timestamp in ms.
#[derive(Debug, Clone)]
pub enum TradingEvent {
    Signal {
        signal: TradingSignal,
        timestamp: i64,
    },
    TradeExecuted {
        symbol: String,
        order_id: String,
        signal_id: Uuid,
        quantity: Decimal,
        price: Decimal,
        timestamp: i64,
    },
    PositionClosed {
        symbol: String,
        timestamp: i64,
    },
    ProcessUpdate {
        signal_id: Uuid,
        symbol: String,
        stage: SignalStage,
        detail: Option<String>,
        timestamp: i64,
    },
    Activity {
        level: ActivityLevel,
        message: String,
        timestamp: i64,
    },
    SignificantPriceChange {
        symbol: String,
        previous_price: Decimal,
        current_price: Decimal,
        change_pct: f64,
        timestamp: i64,
    },
    CircuitBreakerOpened {
        is_rate_limit: bool,
        pause_ms: u64,
        consecutive_errors: u32,
        timestamp: i64,
    },
    EmergencyStop {
        risk: PositionRisk,
        timestamp: i64,
    },
    MoveToBreakEven {
        risk: PositionRisk,
        timestamp: i64,
    },
    ActivateTrailingStop {
        risk: PositionRisk,
        timestamp: i64,
    },
    DailyLimitExceeded {
        daily_pnl: Decimal,
        limit: Decimal,
        timestamp: i64,
    },
}

/// Subscribers implement this to receive every published event.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &TradingEvent);
}

/// Default listener that forwards events to the tracing log.
pub struct LoggingListener;

impl EventListener for LoggingListener {
    fn on_event(&self, event: &TradingEvent) {
        match event {
            TradingEvent::Signal { signal, .. } => info!(
                "Event: signal {} {} strength={:.0} ({})",
                signal.symbol, signal.action, signal.strength, signal.reason
            ),
            TradingEvent::TradeExecuted { symbol, price, .. } => {
                info!("Event: trade executed {} @ {}", symbol, price)
            }
            TradingEvent::PositionClosed { symbol, .. } => {
                info!("Event: position closed {}", symbol)
            }
            other => info!("Event: {:?}", other),
        }
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
