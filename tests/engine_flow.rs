//! End-to-end engine scenarios against a mock exchange: the happy-path
//! BUY, the confirmation gate, the capacity cap, the risk veto, and the
//! push-stream position close.

mod support;

use fluxtrade::application::engine::TradingBot;
use fluxtrade::domain::events::TradingEvent;
use fluxtrade::domain::types::{
    OrderSide, OrderType, PositionSide, SignalAction, SignalConditions, SignalStage,
    TradingSignal,
};
use fluxtrade::infrastructure::exchange::PushEvent;
use fluxtrade::infrastructure::{EventBus, InMemoryTradeStore};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use support::{EventRecorder, MarketShape, MockExchange, test_config, wait_for};

struct Rig {
    bot: Arc<TradingBot>,
    exchange: Arc<MockExchange>,
    store: Arc<InMemoryTradeStore>,
    recorder: Arc<EventRecorder>,
}

async fn rig(config: fluxtrade::config::BotConfig, exchange: Arc<MockExchange>) -> Rig {
    let store = Arc::new(InMemoryTradeStore::new());
    let event_bus = EventBus::new();
    let recorder = EventRecorder::new();
    event_bus.subscribe(recorder.clone());

    let bot = TradingBot::build(
        config,
        Arc::clone(&exchange) as Arc<dyn fluxtrade::domain::ports::ExchangeApi>,
        Arc::clone(&store) as Arc<dyn fluxtrade::domain::ports::TradeRecordStore>,
        event_bus,
    );

    Rig {
        bot,
        exchange,
        store,
        recorder,
    }
}

fn manual_signal(symbol: &str, action: SignalAction, strength: f64) -> TradingSignal {
    TradingSignal {
        symbol: symbol.to_string(),
        action,
        strength,
        reason: "manual test signal".to_string(),
        indicators: fluxtrade::domain::types::IndicatorSnapshot {
            price: 50000.0,
            ma1: 49800.0,
            ma2: 49500.0,
            rsi: 55.0,
            volume: 20.0,
            avg_volume: 10.0,
        },
        conditions: SignalConditions::default(),
        timestamp: 1_700_000_000_000,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s1_happy_path_buy_places_order_and_tracks_position() {
    let exchange = Arc::new(MockExchange::new(&["BTC-USDT"]));
    exchange.set_shape("BTC-USDT", MarketShape::Breakout);

    let r = rig(test_config(), Arc::clone(&exchange)).await;
    r.bot.start().await.expect("start");

    // The first scan fires immediately; wait for the order to land
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while r.bot.position("BTC-USDT").await.is_none() {
        assert!(std::time::Instant::now() < deadline, "no position opened");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let orders = r.exchange.placed_orders.lock().unwrap().clone();
    assert_eq!(orders.len(), 1);
    let order = &orders[0];
    assert_eq!(order.symbol, "BTC-USDT");
    assert_eq!(order.side, OrderSide::Buy);
    assert_eq!(order.position_side, PositionSide::Long);
    assert_eq!(order.order_type, OrderType::Market);
    // 100 USDT at 50000 rounded to 3 decimals
    assert_eq!(order.quantity, dec!(0.002));
    assert_eq!(order.stop_loss, Some(dec!(49000.00)));
    assert_eq!(order.take_profit, Some(dec!(52000.00)));

    let position = r.bot.position("BTC-USDT").await.unwrap();
    assert_eq!(position.side, PositionSide::Long);
    assert_eq!(position.quantity, dec!(0.002));

    // Trade record persisted and tradeExecuted emitted
    assert_eq!(r.store.len().await, 1);
    let events = r.recorder.snapshot();
    assert!(events.iter().any(|e| matches!(
        e,
        TradingEvent::TradeExecuted { symbol, .. } if symbol == "BTC-USDT"
    )));

    r.bot.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s2_confirmation_gate_holds_and_places_nothing() {
    // Crossover-only market: strength clears the generator minimum but
    // only one confirmation is present, so the signal downgrades to HOLD.
    let exchange = Arc::new(MockExchange::new(&["BTC-USDT"]));
    exchange.set_shape("BTC-USDT", MarketShape::CrossoverOnly);

    let mut config = test_config();
    config.min_signal_strength = 40.0; // crossover + volume = 45 clears it

    let r = rig(config, Arc::clone(&exchange)).await;
    r.bot.start().await.expect("start");

    let recorder = r.recorder.clone();
    wait_for(10_000, move || {
        recorder.snapshot().iter().any(|e| matches!(
            e,
            TradingEvent::ProcessUpdate { stage: SignalStage::Rejected, detail: Some(d), .. }
                if d.contains("Insufficient confirmations")
        ))
    })
    .await;

    assert_eq!(r.exchange.order_count(), 0);
    assert_eq!(r.bot.execution_queue_len().await, 0);
    assert_eq!(r.bot.active_position_count().await, 0);

    r.bot.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s3_capacity_cap_blocks_new_admissions() {
    let exchange = Arc::new(MockExchange::new(&[
        "BTC-USDT", "ETH-USDT", "SOL-USDT", "ADA-USDT", "XRP-USDT", "DOT-USDT",
    ]));
    // Three positions already open
    exchange.add_position("BTC-USDT");
    exchange.add_position("ETH-USDT");
    exchange.add_position("SOL-USDT");
    // Strong setups everywhere else
    for symbol in ["ADA-USDT", "XRP-USDT", "DOT-USDT"] {
        exchange.set_shape(symbol, MarketShape::Breakout);
    }

    let r = rig(test_config(), Arc::clone(&exchange)).await;
    r.bot.start().await.expect("start");
    tokio::time::sleep(Duration::from_secs(2)).await;

    // Scan short-circuits at capacity: no orders this cycle
    assert_eq!(r.exchange.order_count(), 0);
    assert_eq!(r.bot.active_position_count().await, 3);

    // A strong signal arriving anyway is rejected for capacity
    r.bot
        .handle_signal(manual_signal("ADA-USDT", SignalAction::Buy, 90.0))
        .await;

    let events = r.recorder.snapshot();
    assert!(events.iter().any(|e| matches!(
        e,
        TradingEvent::ProcessUpdate { stage: SignalStage::Rejected, detail: Some(d), .. }
            if d == "Max concurrent trades reached"
    )));
    assert_eq!(r.exchange.order_count(), 0);
    assert_eq!(r.bot.active_position_count().await, 3);

    r.bot.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s5_risk_gate_vetoes_low_risk_reward() {
    let exchange = Arc::new(MockExchange::new(&["BTC-USDT"]));
    exchange.set_shape("BTC-USDT", MarketShape::Breakout);

    // take 2.8 / stop 2.0 = R/R 1.4 under the required 2.0
    let mut config = test_config();
    config.take_profit_pct = 2.8;

    let r = rig(config, Arc::clone(&exchange)).await;
    r.bot.start().await.expect("start");

    let recorder = r.recorder.clone();
    wait_for(10_000, move || {
        recorder.snapshot().iter().any(|e| matches!(
            e,
            TradingEvent::ProcessUpdate { stage: SignalStage::Rejected, detail: Some(d), .. }
                if d.contains("Risk/Reward ratio too low")
        ))
    })
    .await;

    assert_eq!(r.exchange.order_count(), 0);
    assert_eq!(r.bot.active_position_count().await, 0);

    r.bot.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s6_account_update_with_zero_amount_closes_position() {
    let exchange = Arc::new(MockExchange::new(&["ETH-USDT"]));
    exchange.add_position("ETH-USDT");

    let r = rig(test_config(), Arc::clone(&exchange)).await;
    r.bot.start().await.expect("start");

    assert!(r.bot.position("ETH-USDT").await.is_some());

    r.bot
        .handle_push_event(PushEvent::AccountUpdate {
            symbol: "ETH-USDT".to_string(),
            position_amt: dec!(0),
            entry_price: dec!(0),
            unrealized_pnl: dec!(0),
        })
        .await;

    assert!(r.bot.position("ETH-USDT").await.is_none());
    let events = r.recorder.snapshot();
    assert!(events.iter().any(|e| matches!(
        e,
        TradingEvent::PositionClosed { symbol, .. } if symbol == "ETH-USDT"
    )));

    r.bot.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nonzero_account_update_patches_position() {
    let exchange = Arc::new(MockExchange::new(&["ETH-USDT"]));
    exchange.add_position("ETH-USDT");

    let r = rig(test_config(), Arc::clone(&exchange)).await;
    r.bot.start().await.expect("start");

    r.bot
        .handle_push_event(PushEvent::AccountUpdate {
            symbol: "ETH-USDT".to_string(),
            position_amt: dec!(0.004),
            entry_price: dec!(49500),
            unrealized_pnl: dec!(2.5),
        })
        .await;

    let position = r.bot.position("ETH-USDT").await.unwrap();
    assert_eq!(position.quantity, dec!(0.004));
    assert_eq!(position.unrealized_pnl, dec!(2.5));
    assert_eq!(position.entry_price, dec!(49500));

    r.bot.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_trades_after_stop() {
    let exchange = Arc::new(MockExchange::new(&["BTC-USDT"]));
    let r = rig(test_config(), Arc::clone(&exchange)).await;
    r.bot.start().await.expect("start");
    r.bot.stop().await;

    r.bot
        .handle_signal(manual_signal("BTC-USDT", SignalAction::Buy, 95.0))
        .await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(r.exchange.order_count(), 0);
    let events = r.recorder.snapshot();
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, TradingEvent::TradeExecuted { .. }))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn order_fill_push_updates_trade_record() {
    let exchange = Arc::new(MockExchange::new(&["BTC-USDT"]));
    exchange.set_shape("BTC-USDT", MarketShape::Breakout);

    let r = rig(test_config(), Arc::clone(&exchange)).await;
    r.bot.start().await.expect("start");

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while r.store.len().await == 0 {
        assert!(std::time::Instant::now() < deadline, "no trade recorded");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    r.bot
        .handle_push_event(PushEvent::OrderUpdate {
            order_id: "order-1".to_string(),
            symbol: "BTC-USDT".to_string(),
            status: "FILLED".to_string(),
            executed_qty: dec!(0.002),
            avg_price: dec!(50005),
            commission: dec!(0.05),
            realized_pnl: dec!(0),
        })
        .await;

    let record = r.store.get("order-1").await.expect("record exists");
    assert_eq!(record.status, "FILLED");
    assert_eq!(record.avg_price, dec!(50005));

    r.bot.stop().await;
}
