//! Trading Bot orchestrator
//!
//! Owns the ground truth: active positions, the execution queue, and the
//! in-process signal stage machines. Drives the periodic scan cycle,
//! admits qualifying signals into the execution queue, runs them through
//! the risk gate, places orders, and applies push-stream account updates.

use crate::application::market_data::MarketDataCache;
use crate::application::risk::{RiskManager, stop_loss_price, take_profit_price};
use crate::application::signal::SignalGenerator;
use crate::application::symbols::SymbolRegistry;
use crate::application::worker_pool::{KlineSpec, SignalWorkerPool};
use crate::config::BotConfig;
use crate::domain::errors::RiskError;
use crate::domain::events::{ActivityLevel, TradingEvent, now_ms};
use crate::domain::ports::{ExchangeApi, TradeRecordStore};
use crate::domain::types::{
    OrderRequest, OrderSide, OrderType, PlacedOrder, Position, PositionSide, RequestPriority,
    SignalAction, SignalInProcess, SignalStage, TradeInQueue, TradeRecord, TradeStatus,
    TradingSignal,
};
use crate::infrastructure::EventBus;
use crate::infrastructure::exchange::{
    ExchangeRequest, ExchangeResponse, PushEvent, PushStreamManager, RequestManager,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const SCAN_CYCLE_DEADLINE: Duration = Duration::from_secs(25);
/// Bound on one symbol's validate -> price -> place sequence, so a hung
/// exchange call cannot starve other queued trades.
const PER_SYMBOL_TIMEOUT: Duration = Duration::from_secs(8);
const BATCH_SPACER: Duration = Duration::from_millis(200);
const SEED_SYMBOL_COUNT: usize = 10;
const FULL_SCAN_SYMBOL_CAP: usize = 30;
const SYMBOL_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);

pub struct TradingBot {
    config: std::sync::RwLock<BotConfig>,
    request_manager: Arc<RequestManager>,
    cache: Arc<MarketDataCache>,
    registry: Arc<SymbolRegistry>,
    generator: Arc<SignalGenerator>,
    pool: Arc<SignalWorkerPool>,
    risk: Arc<RiskManager>,
    stream: Arc<PushStreamManager>,
    store: Arc<dyn TradeRecordStore>,
    event_bus: EventBus,

    running: AtomicBool,
    active_positions: Mutex<HashMap<String, Position>>,
    execution_queue: Mutex<Vec<TradeInQueue>>,
    active_signals: Mutex<HashMap<Uuid, SignalInProcess>>,
    scan_symbols: Mutex<Vec<String>>,
    signal_rx: Mutex<Option<mpsc::Receiver<TradingSignal>>>,
    task_handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl TradingBot {
    /// Composition root: wire every service against one exchange client.
    pub fn build(
        config: BotConfig,
        api: Arc<dyn ExchangeApi>,
        store: Arc<dyn TradeRecordStore>,
        event_bus: EventBus,
    ) -> Arc<Self> {
        let request_manager = Arc::new(RequestManager::with_timing(
            api,
            config.exchange.window_cap,
            config.exchange.window_ms,
            config.exchange.request_timeout_ms,
            100,
        ));

        let stream = Arc::new(PushStreamManager::new(
            config.exchange.ws_url.clone(),
            config.exchange.demo_mode,
            Arc::clone(&request_manager),
        ));

        let cache = Arc::new(MarketDataCache::new(
            Arc::clone(&request_manager),
            Arc::clone(&stream),
            event_bus.clone(),
            config.cache.clone(),
        ));

        let registry = Arc::new(SymbolRegistry::new(
            Arc::clone(&request_manager),
            SYMBOL_REFRESH_INTERVAL,
        ));

        let generator = Arc::new(SignalGenerator::new(config.signal_params()));

        let (signal_tx, signal_rx) = mpsc::channel(256);
        let pool = Arc::new(SignalWorkerPool::new(
            Arc::clone(&cache),
            Arc::clone(&generator),
            event_bus.clone(),
            signal_tx,
            config.worker_pool.clone(),
            KlineSpec {
                interval: config.kline_interval.clone(),
                limit: config.kline_limit,
            },
        ));

        let risk = Arc::new(RiskManager::new(
            Arc::clone(&request_manager),
            event_bus.clone(),
            config.clone(),
        ));

        Arc::new(Self {
            config: std::sync::RwLock::new(config),
            request_manager,
            cache,
            registry,
            generator,
            pool,
            risk,
            stream,
            store,
            event_bus,
            running: AtomicBool::new(false),
            active_positions: Mutex::new(HashMap::new()),
            execution_queue: Mutex::new(Vec::new()),
            active_signals: Mutex::new(HashMap::new()),
            scan_symbols: Mutex::new(Vec::new()),
            signal_rx: Mutex::new(Some(signal_rx)),
            task_handles: Mutex::new(Vec::new()),
        })
    }

    fn config(&self) -> BotConfig {
        self.config.read().expect("bot config lock poisoned").clone()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub async fn active_position_count(&self) -> usize {
        self.active_positions.lock().await.len()
    }

    pub async fn position(&self, symbol: &str) -> Option<Position> {
        self.active_positions.lock().await.get(symbol).cloned()
    }

    pub async fn execution_queue_len(&self) -> usize {
        self.execution_queue.lock().await.len()
    }

    pub async fn signal_stage(&self, id: Uuid) -> Option<SignalStage> {
        self.active_signals
            .lock()
            .await
            .get(&id)
            .map(|s| s.stage.clone())
    }

    /// Apply a config update: signal parameters reach the generator,
    /// worker settings reach the pool, the rest applies on the next cycle.
    pub async fn update_config(&self, config: BotConfig) -> anyhow::Result<()> {
        for warning in config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid config update: {}", e))?
        {
            warn!("TradingBot: {}", warning);
        }

        self.generator.set_params(config.signal_params());
        self.pool.update_config(config.worker_pool.clone());
        self.pool.update_kline_spec(KlineSpec {
            interval: config.kline_interval.clone(),
            limit: config.kline_limit,
        });
        self.cache.update_config(config.cache.clone());
        self.risk.update_config(config.clone()).await;
        *self.config.write().expect("bot config lock poisoned") = config;

        info!("TradingBot: Configuration updated");
        Ok(())
    }

    /// Start every service and the scan/event loops. Fails fast when the
    /// risk manager cannot establish the session baseline.
    pub async fn start(self: &Arc<Self>) -> Result<(), RiskError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.request_manager.start().await;
        if let Err(e) = self.stream.start().await {
            warn!("TradingBot: Push stream unavailable at start: {}", e);
        }
        self.cache.start().await;
        self.registry.start().await;
        self.pool.start().await;

        // Fatal: no session baseline, no trading
        self.risk.start().await?;

        self.load_positions().await;
        self.seed_scan_symbols().await;

        // Widen the scan set beyond the seed once the registry settles
        let bot = Arc::clone(self);
        tokio::spawn(async move {
            bot.refresh_scan_symbols().await;
        });

        let config = self.config();

        // Scan loop
        let bot = Arc::clone(self);
        let scan_interval = config.scan_interval();
        let scan_handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(scan_interval);
            loop {
                tick.tick().await;
                if !bot.running.load(Ordering::SeqCst) {
                    break;
                }
                bot.scan_cycle().await;
            }
        });

        // Signal pipeline consumer
        let bot = Arc::clone(self);
        let mut signal_rx = self
            .signal_rx
            .lock()
            .await
            .take()
            .expect("signal receiver already taken");
        let signal_handle = tokio::spawn(async move {
            while let Some(signal) = signal_rx.recv().await {
                if !bot.running.load(Ordering::SeqCst) {
                    break;
                }
                bot.handle_signal(signal).await;
            }
        });

        // Push-stream consumer
        let bot = Arc::clone(self);
        let mut push_rx = self.stream.subscribe();
        let push_handle = tokio::spawn(async move {
            loop {
                match push_rx.recv().await {
                    Ok(event) => {
                        if !bot.running.load(Ordering::SeqCst) {
                            break;
                        }
                        bot.handle_push_event(event).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("TradingBot: Push receiver lagged, missed {} events", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut handles = self.task_handles.lock().await;
        handles.push(scan_handle);
        handles.push(signal_handle);
        handles.push(push_handle);

        self.event_bus
            .activity(ActivityLevel::Success, "Trading bot started");
        info!("TradingBot: Started");
        Ok(())
    }

    /// Single cancellation point: stops the scan loop, the pool, the risk
    /// monitor, the cache, the stream, and the request dispatcher.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        for handle in self.task_handles.lock().await.drain(..) {
            handle.abort();
        }

        self.pool.stop().await;
        self.risk.stop().await;
        self.registry.stop().await;
        self.cache.stop().await;
        self.stream.stop().await;
        self.request_manager.stop().await;

        info!("TradingBot: Stopped");
    }

    async fn load_positions(&self) {
        match self
            .request_manager
            .submit(ExchangeRequest::GetPositions, RequestPriority::High)
            .await
        {
            Ok(ExchangeResponse::Positions(positions)) => {
                let mut active = self.active_positions.lock().await;
                for position in positions {
                    active.insert(position.symbol.clone(), position);
                }
                info!("TradingBot: Loaded {} open positions", active.len());
            }
            Ok(other) => warn!("TradingBot: Unexpected positions response: {:?}", other),
            Err(e) => error!("TradingBot: Failed to load positions: {}", e),
        }
    }

    async fn seed_scan_symbols(&self) {
        let seed = self.registry.get_popular(SEED_SYMBOL_COUNT).await;
        if !seed.is_empty() {
            info!("TradingBot: Seeded scan set with {} symbols", seed.len());
            *self.scan_symbols.lock().await = seed;
        }
    }

    /// Refresh the scan set from the full active universe, keeping the
    /// popular seed at the front.
    pub async fn refresh_scan_symbols(&self) {
        let mut symbols = self.registry.get_popular(SEED_SYMBOL_COUNT).await;
        for symbol in self.registry.active_symbols().await {
            if symbols.len() >= FULL_SCAN_SYMBOL_CAP {
                break;
            }
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
        if !symbols.is_empty() {
            *self.scan_symbols.lock().await = symbols;
        }
    }

    /// One scan cycle: derive the scan set and feed it to the worker pool
    /// in spaced batches under the cycle deadline.
    pub async fn scan_cycle(self: &Arc<Self>) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        let config = self.config();

        // Drop stage machines whose task never produced a signal (expired
        // in the pool queue or deduplicated away)
        let cutoff = now_ms() - 2 * config.scan_interval_ms.max(60_000) as i64;
        self.active_signals
            .lock()
            .await
            .retain(|_, s| s.started_at_ms >= cutoff);

        let held: usize = self.active_positions.lock().await.len();
        if held >= config.max_concurrent_trades {
            debug!(
                "TradingBot: At capacity ({}/{}), skipping scan",
                held, config.max_concurrent_trades
            );
            return;
        }

        let scan_set: Vec<String> = {
            let positions = self.active_positions.lock().await;
            self.scan_symbols
                .lock()
                .await
                .iter()
                .filter(|s| !positions.contains_key(*s))
                .cloned()
                .collect()
        };

        if scan_set.is_empty() {
            debug!("TradingBot: Empty scan set");
            return;
        }

        self.event_bus.activity(
            ActivityLevel::Info,
            format!("Scanning {} symbols", scan_set.len()),
        );

        let bot = Arc::clone(self);
        let batch_size = config.worker_pool.batch_size.max(1);
        let cycle = async move {
            for batch in scan_set.chunks(batch_size) {
                for symbol in batch {
                    let signal_state = SignalInProcess::new(symbol.clone());
                    bot.publish_stage(&signal_state, None);
                    bot.active_signals
                        .lock()
                        .await
                        .insert(signal_state.id, signal_state);
                }
                bot.pool.submit(batch, 0).await;
                tokio::time::sleep(BATCH_SPACER).await;
            }
        };

        if tokio::time::timeout(SCAN_CYCLE_DEADLINE, cycle).await.is_err() {
            warn!("TradingBot: Scan cycle hit the {:?} deadline", SCAN_CYCLE_DEADLINE);
        }
    }

    fn publish_stage(&self, signal: &SignalInProcess, detail: Option<String>) {
        self.event_bus
            .publish(TradingEvent::ProcessUpdate {
                signal_id: signal.id,
                symbol: signal.symbol.clone(),
                stage: signal.stage.clone(),
                detail,
                timestamp: now_ms(),
            });
    }

    /// Advance a tracked signal's stage, enforcing the legal transitions.
    async fn advance_stage(&self, id: Uuid, next: SignalStage, detail: Option<String>) {
        let mut signals = self.active_signals.lock().await;
        let Some(state) = signals.get_mut(&id) else {
            return;
        };

        if !state.stage.can_advance_to(&next) {
            warn!(
                "TradingBot: Illegal stage transition {:?} -> {:?} for {}",
                state.stage, next, state.symbol
            );
            return;
        }

        state.stage = next.clone();
        if next == SignalStage::Rejected {
            state.rejection_reason = detail.clone();
        }
        let snapshot = state.clone();
        let terminal = state.stage.is_terminal();
        if terminal {
            signals.remove(&id);
        }
        drop(signals);

        self.publish_stage(&snapshot, detail);
    }

    /// Find the in-process entry for a symbol still in the analysis stage.
    async fn signal_state_for(&self, symbol: &str) -> Option<Uuid> {
        self.active_signals
            .lock()
            .await
            .values()
            .find(|s| s.symbol == symbol && !s.stage.is_terminal())
            .map(|s| s.id)
    }

    /// Evaluate a generated signal and admit it into the execution queue
    /// when it qualifies.
    pub async fn handle_signal(self: &Arc<Self>, signal: TradingSignal) {
        let config = self.config();

        let id = match self.signal_state_for(&signal.symbol).await {
            Some(id) => id,
            None => {
                // Signal for a symbol submitted outside a scan cycle
                let state = SignalInProcess::new(signal.symbol.clone());
                let id = state.id;
                self.active_signals.lock().await.insert(id, state);
                id
            }
        };

        self.advance_stage(id, SignalStage::Evaluating, None).await;
        self.advance_stage(
            id,
            SignalStage::Decided,
            Some(format!("{} strength {:.0}", signal.action, signal.strength)),
        )
        .await;

        if signal.action == SignalAction::Hold {
            self.advance_stage(
                id,
                SignalStage::Rejected,
                Some(format!("HOLD: {}", signal.reason)),
            )
            .await;
            return;
        }

        if signal.strength < config.admit_threshold {
            self.advance_stage(
                id,
                SignalStage::Rejected,
                Some(format!(
                    "Strength {:.0} below admit threshold {:.0}",
                    signal.strength, config.admit_threshold
                )),
            )
            .await;
            return;
        }

        {
            let positions = self.active_positions.lock().await;
            if positions.contains_key(&signal.symbol) {
                drop(positions);
                self.advance_stage(
                    id,
                    SignalStage::Rejected,
                    Some("Position already open".to_string()),
                )
                .await;
                return;
            }
            if positions.len() >= config.max_concurrent_trades {
                drop(positions);
                self.advance_stage(
                    id,
                    SignalStage::Rejected,
                    Some("Max concurrent trades reached".to_string()),
                )
                .await;
                return;
            }
        }

        let side = match signal.action {
            SignalAction::Buy => OrderSide::Buy,
            SignalAction::Sell => OrderSide::Sell,
            SignalAction::Hold => unreachable!(),
        };

        let estimated_price =
            Decimal::from_f64_retain(signal.indicators.price).unwrap_or(Decimal::ZERO);
        let quantity = if estimated_price > Decimal::ZERO {
            (config.default_position_size / estimated_price).round_dp(3)
        } else {
            Decimal::ZERO
        };

        let trade = TradeInQueue {
            id: Uuid::new_v4(),
            symbol: signal.symbol.clone(),
            side,
            quantity,
            estimated_price,
            priority: signal.strength,
            queued_at_ms: now_ms(),
            status: TradeStatus::Queued,
            signal_id: id,
        };

        self.execution_queue.lock().await.push(trade);
        self.advance_stage(id, SignalStage::Queued, Some(signal.reason.clone())).await;

        self.process_execution_queue(&signal).await;
    }

    /// Drain the execution queue in priority order, skipping symbols that
    /// are already held and stopping at capacity.
    async fn process_execution_queue(self: &Arc<Self>, signal: &TradingSignal) {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            let config = self.config();

            let next = {
                let positions = self.active_positions.lock().await;
                if positions.len() >= config.max_concurrent_trades {
                    return;
                }
                let mut queue = self.execution_queue.lock().await;
                let index = queue
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| {
                        t.status == TradeStatus::Queued && !positions.contains_key(&t.symbol)
                    })
                    .max_by(|(_, a), (_, b)| {
                        a.priority
                            .partial_cmp(&b.priority)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then(b.queued_at_ms.cmp(&a.queued_at_ms))
                    })
                    .map(|(i, _)| i);
                match index {
                    Some(i) => {
                        queue[i].status = TradeStatus::Processing;
                        Some(queue[i].clone())
                    }
                    None => None,
                }
            };

            let Some(trade) = next else { return };

            self.advance_stage(trade.signal_id, SignalStage::Executing, None).await;
            let outcome =
                tokio::time::timeout(PER_SYMBOL_TIMEOUT, self.execute_trade(&trade, signal)).await;
            match outcome {
                Ok(Ok((order, quantity, price))) => {
                    self.finish_trade(&trade, TradeStatus::Executed).await;
                    self.advance_stage(trade.signal_id, SignalStage::Completed, None).await;
                    self.event_bus
                        .publish(TradingEvent::TradeExecuted {
                            symbol: trade.symbol.clone(),
                            order_id: order.order_id,
                            signal_id: trade.signal_id,
                            quantity,
                            price,
                            timestamp: now_ms(),
                        });
                }
                Ok(Err(reason)) => {
                    warn!("TradingBot: Trade for {} failed: {}", trade.symbol, reason);
                    self.finish_trade(&trade, TradeStatus::Failed).await;
                    self.advance_stage(trade.signal_id, SignalStage::Rejected, Some(reason)).await;
                }
                Err(_) => {
                    let reason = format!(
                        "Execution timed out after {:?}",
                        PER_SYMBOL_TIMEOUT
                    );
                    warn!("TradingBot: Trade for {} failed: {}", trade.symbol, reason);
                    self.finish_trade(&trade, TradeStatus::Failed).await;
                    self.advance_stage(trade.signal_id, SignalStage::Rejected, Some(reason)).await;
                }
            }
        }
    }

    async fn finish_trade(&self, trade: &TradeInQueue, status: TradeStatus) {
        let mut queue = self.execution_queue.lock().await;
        queue.retain(|t| t.id != trade.id);
        if status == TradeStatus::Failed {
            // Failed entries are dropped; the next scan may retry the symbol
            debug!("TradingBot: Dropped failed trade entry for {}", trade.symbol);
        }
    }

    /// Validate, price, and place one order. Returns the placed order with
    /// the executed quantity and price, or the rejection reason.
    async fn execute_trade(
        self: &Arc<Self>,
        trade: &TradeInQueue,
        signal: &TradingSignal,
    ) -> Result<(PlacedOrder, Decimal, Decimal), String> {
        let config = self.config();

        let validation = self
            .risk
            .validate_trade(
                &trade.symbol,
                trade.side,
                config.default_position_size,
                trade.estimated_price,
            )
            .await;
        if !validation.valid {
            return Err(validation.errors.join("; "));
        }
        for warning in &validation.warnings {
            self.event_bus
                .activity(ActivityLevel::Warning, warning.clone());
        }

        let ticker = self
            .cache
            .get_ticker(&trade.symbol, true)
            .await
            .map_err(|e| format!("Cannot price order: {}", e))?;
        let price = ticker.last_price;

        let quantity = (config.default_position_size / price).round_dp(3);
        if quantity <= Decimal::ZERO {
            return Err("Computed order quantity is zero".to_string());
        }

        let position_side = PositionSide::from(trade.side);
        let order = OrderRequest {
            symbol: trade.symbol.clone(),
            side: trade.side,
            position_side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_loss: Some(stop_loss_price(price, position_side, config.stop_loss_pct)),
            take_profit: Some(take_profit_price(price, position_side, config.take_profit_pct)),
        };

        let placed = match self
            .request_manager
            .submit(ExchangeRequest::PlaceOrder(order.clone()), RequestPriority::High)
            .await
        {
            Ok(ExchangeResponse::OrderPlaced(placed)) => placed,
            Ok(other) => return Err(format!("Unexpected order response: {:?}", other)),
            Err(e) => return Err(format!("Order placement failed: {}", e)),
        };

        let record = TradeRecord {
            order_id: placed.order_id.clone(),
            symbol: trade.symbol.clone(),
            side: trade.side,
            position_side,
            order_type: OrderType::Market,
            status: placed.status.clone(),
            quantity,
            price,
            stop_loss_price: order.stop_loss,
            take_profit_price: order.take_profit,
            signal_strength: signal.strength,
            signal_reason: signal.reason.clone(),
            indicators: signal.indicators,
            commissions: Decimal::ZERO,
            executed_qty: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            created_at_ms: now_ms(),
            updated_at_ms: now_ms(),
        };
        if let Err(e) = self.store.record_open(&record).await {
            warn!("TradingBot: Failed to persist trade record: {}", e);
        }

        self.active_positions.lock().await.insert(
            trade.symbol.clone(),
            Position {
                symbol: trade.symbol.clone(),
                side: position_side,
                entry_price: price,
                quantity,
                unrealized_pnl: Decimal::ZERO,
                order_id: placed.order_id.clone(),
            },
        );

        info!(
            "TradingBot: Executed {} {} {} @ {} (order {})",
            trade.side, quantity, trade.symbol, price, placed.order_id
        );
        Ok((placed, quantity, price))
    }

    /// Apply one push-stream event to the tracked state.
    pub async fn handle_push_event(&self, event: PushEvent) {
        match event {
            PushEvent::Ticker { symbol, price, .. } => {
                let mut positions = self.active_positions.lock().await;
                if let Some(position) = positions.get_mut(&symbol) {
                    let delta = match position.side {
                        PositionSide::Long => price - position.entry_price,
                        PositionSide::Short => position.entry_price - price,
                    };
                    position.unrealized_pnl = delta * position.quantity;
                }
            }
            PushEvent::AccountUpdate {
                symbol,
                position_amt,
                entry_price,
                unrealized_pnl,
            } => {
                let mut positions = self.active_positions.lock().await;
                if position_amt.is_zero() {
                    if positions.remove(&symbol).is_some() {
                        drop(positions);
                        info!("TradingBot: Position closed remotely: {}", symbol);
                        self.event_bus
                            .publish(TradingEvent::PositionClosed {
                                symbol,
                                timestamp: now_ms(),
                            });
                    }
                } else if let Some(position) = positions.get_mut(&symbol) {
                    position.quantity = position_amt.abs();
                    position.unrealized_pnl = unrealized_pnl;
                    if entry_price > Decimal::ZERO {
                        position.entry_price = entry_price;
                    }
                }
            }
            PushEvent::OrderUpdate {
                order_id,
                status,
                executed_qty,
                avg_price,
                commission,
                realized_pnl,
                ..
            } => {
                if let Err(e) = self
                    .store
                    .record_fill(
                        &order_id,
                        &status,
                        executed_qty,
                        avg_price,
                        commission,
                        realized_pnl,
                    )
                    .await
                {
                    warn!("TradingBot: Failed to persist fill update: {}", e);
                }
            }
            PushEvent::Kline { .. } => {}
        }
    }
}
