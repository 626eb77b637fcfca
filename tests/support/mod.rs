//! Shared test doubles for the engine integration tests.

use async_trait::async_trait;
use fluxtrade::config::BotConfig;
use fluxtrade::domain::errors::ExchangeError;
use fluxtrade::domain::events::{EventListener, TradingEvent};
use fluxtrade::domain::ports::ExchangeApi;
use fluxtrade::domain::types::{
    Balance, Candle, OrderRequest, PlacedOrder, Position, PositionSide, SymbolMeta, Ticker,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Candle shape served for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketShape {
    /// Flat prices, no signal.
    Flat,
    /// Flat history with a two-candle breakout and a closing volume spike:
    /// bullish crossover + uptrend + volume, strength 70.
    Breakout,
    /// Breakout followed by a pullback below the short MA: the crossover
    /// is the only confirmation (strength 45 with the volume spike).
    CrossoverOnly,
}

pub struct MockExchange {
    pub symbols: Vec<String>,
    pub shapes: Mutex<HashMap<String, MarketShape>>,
    pub balance: Mutex<Decimal>,
    pub positions: Mutex<Vec<Position>>,
    pub placed_orders: Mutex<Vec<OrderRequest>>,
    pub order_seq: AtomicUsize,
    pub price: Decimal,
}

impl MockExchange {
    pub fn new(symbols: &[&str]) -> Self {
        Self {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            shapes: Mutex::new(HashMap::new()),
            balance: Mutex::new(dec!(1000)),
            positions: Mutex::new(Vec::new()),
            placed_orders: Mutex::new(Vec::new()),
            order_seq: AtomicUsize::new(0),
            price: dec!(50000),
        }
    }

    pub fn set_shape(&self, symbol: &str, shape: MarketShape) {
        self.shapes.lock().unwrap().insert(symbol.to_string(), shape);
    }

    pub fn add_position(&self, symbol: &str) {
        self.positions.lock().unwrap().push(Position {
            symbol: symbol.to_string(),
            side: PositionSide::Long,
            entry_price: self.price,
            quantity: dec!(0.002),
            unrealized_pnl: Decimal::ZERO,
            order_id: format!("seed-{}", symbol),
        });
    }

    pub fn order_count(&self) -> usize {
        self.placed_orders.lock().unwrap().len()
    }

    fn candles(&self, symbol: &str, limit: u32) -> Vec<Candle> {
        let shape = self
            .shapes
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .unwrap_or(MarketShape::Flat);

        let n = limit.max(60) as usize;
        let mut closes = vec![100.0; n];
        let mut volumes = vec![10.0; n];
        match shape {
            MarketShape::Flat => {}
            MarketShape::Breakout => {
                closes[n - 2] = 120.0;
                closes[n - 1] = 121.0;
                volumes[n - 1] = 40.0;
            }
            MarketShape::CrossoverOnly => {
                closes[n - 2] = 120.0;
                closes[n - 1] = 101.0;
                volumes[n - 1] = 40.0;
            }
        }

        closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                let prev = if i == 0 { closes[0] } else { closes[i - 1] };
                let open = Decimal::from_f64_retain(prev).unwrap();
                let close = Decimal::from_f64_retain(*close).unwrap();
                Candle {
                    timestamp: 1_700_000_000_000 + i as i64 * 300_000,
                    open,
                    high: close.max(open) + dec!(1),
                    low: close.min(open) - dec!(1),
                    close,
                    volume: Decimal::from_f64_retain(volumes[i]).unwrap(),
                }
            })
            .collect()
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn get_symbols(&self) -> Result<Vec<SymbolMeta>, ExchangeError> {
        Ok(self
            .symbols
            .iter()
            .map(|s| SymbolMeta {
                symbol: s.clone(),
                asset: s.split('-').next().unwrap_or(s).to_string(),
                status: 1,
                price_precision: 2,
                quantity_precision: 3,
                display_name: s.replace('-', "/"),
            })
            .collect())
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        Ok(Ticker {
            symbol: symbol.to_string(),
            last_price: self.price,
            volume_24h: dec!(5000000),
            timestamp: 1_700_000_000_000,
        })
    }

    async fn get_klines(
        &self,
        symbol: &str,
        _interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        Ok(self.candles(symbol, limit))
    }

    async fn get_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn get_balance(&self) -> Result<Vec<Balance>, ExchangeError> {
        let balance = *self.balance.lock().unwrap();
        Ok(vec![Balance {
            asset: "USDT".to_string(),
            balance,
            available: balance,
        }])
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<PlacedOrder, ExchangeError> {
        self.placed_orders.lock().unwrap().push(order.clone());
        let id = self.order_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PlacedOrder {
            order_id: format!("order-{}", id),
            symbol: order.symbol.clone(),
            status: "NEW".to_string(),
        })
    }

    async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn create_listen_key(&self) -> Result<String, ExchangeError> {
        Ok("test-listen-key".to_string())
    }

    async fn keep_alive_listen_key(&self, _key: &str) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn close_listen_key(&self, _key: &str) -> Result<(), ExchangeError> {
        Ok(())
    }
}

/// Collects every event published on the bus.
pub struct EventRecorder {
    pub events: Mutex<Vec<TradingEvent>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn snapshot(&self) -> Vec<TradingEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventListener for EventRecorder {
    fn on_event(&self, event: &TradingEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// S1-style config: strength 70 breakouts clear the 65 admit threshold,
/// one short scan cycle, fast stale-free settings for tests.
pub fn test_config() -> BotConfig {
    let mut config = BotConfig::default();
    config.max_concurrent_trades = 3;
    config.default_position_size = dec!(100);
    config.stop_loss_pct = 2.0;
    config.take_profit_pct = 4.0;
    config.risk_reward_ratio = 2.0;
    config.min_signal_strength = 60.0;
    config.admit_threshold = 65.0;
    config.confirmation_required = true;
    // Keep the periodic rescan out of short-lived tests
    config.scan_interval_ms = 120_000;
    config.exchange.ws_url = "wss://example.invalid/ws".to_string();
    config
}

/// Wait until `check` passes or the timeout elapses.
pub async fn wait_for<F>(timeout_ms: u64, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    while !check() {
        assert!(
            std::time::Instant::now() < deadline,
            "condition not met within {}ms",
            timeout_ms
        );
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
}
