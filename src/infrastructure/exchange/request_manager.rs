//! Rate-Limited Request Manager
//!
//! Every outbound exchange call flows through this component. It owns a
//! sliding-window budget (default 100 requests / 10 s) and a priority
//! queue of pending requests; identical in-flight GETs are coalesced so
//! that N concurrent callers share one underlying call.

use crate::domain::errors::ExchangeError;
use crate::domain::ports::ExchangeApi;
use crate::domain::types::{
    Balance, Candle, OrderRequest, PlacedOrder, Position, RequestPriority, SymbolMeta, Ticker,
};
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

const INITIAL_BACKOFF_SECS: u64 = 1;
const MAX_BACKOFF_SECS: u64 = 60;

/// Typed outbound request. Mutating variants are never deduplicated.
#[derive(Debug, Clone)]
pub enum ExchangeRequest {
    GetSymbols,
    GetTicker {
        symbol: String,
    },
    GetKlines {
        symbol: String,
        interval: String,
        limit: u32,
    },
    GetPositions,
    GetBalance,
    PlaceOrder(OrderRequest),
    CancelOrder {
        symbol: String,
        order_id: String,
    },
    CreateListenKey,
    KeepAliveListenKey {
        key: String,
    },
    CloseListenKey {
        key: String,
    },
}

impl ExchangeRequest {
    /// Single-flight key: method + symbol + params. `None` for requests
    /// with side effects, which must each reach the exchange.
    pub fn key(&self) -> Option<String> {
        match self {
            ExchangeRequest::GetSymbols => Some("getSymbols".to_string()),
            ExchangeRequest::GetTicker { symbol } => Some(format!("getTicker:{}", symbol)),
            ExchangeRequest::GetKlines {
                symbol,
                interval,
                limit,
            } => Some(format!("getKlines:{}:{}:{}", symbol, interval, limit)),
            ExchangeRequest::GetPositions => Some("getPositions".to_string()),
            ExchangeRequest::GetBalance => Some("getBalance".to_string()),
            ExchangeRequest::PlaceOrder(_)
            | ExchangeRequest::CancelOrder { .. }
            | ExchangeRequest::CreateListenKey
            | ExchangeRequest::KeepAliveListenKey { .. }
            | ExchangeRequest::CloseListenKey { .. } => None,
        }
    }
}

/// Typed response shared among coalesced waiters.
#[derive(Debug, Clone)]
pub enum ExchangeResponse {
    Symbols(Vec<SymbolMeta>),
    Ticker(Ticker),
    Klines(Vec<Candle>),
    Positions(Vec<Position>),
    Balances(Vec<Balance>),
    OrderPlaced(PlacedOrder),
    Ack,
    ListenKey(String),
}

type SubmitResult = Result<ExchangeResponse, ExchangeError>;

struct PendingRequest {
    seq: u64,
    request: ExchangeRequest,
    priority: RequestPriority,
    enqueued_at: Instant,
    waiters: Vec<oneshot::Sender<SubmitResult>>,
}

/// Waiter list shared with the executing task so that late joiners attach
/// while the call is in flight.
type InFlightEntry = Arc<Mutex<Vec<oneshot::Sender<SubmitResult>>>>;

struct ManagerState {
    queue: Vec<PendingRequest>,
    in_flight: HashMap<String, InFlightEntry>,
    window: VecDeque<Instant>,
    backoff_until: Option<Instant>,
    backoff_secs: u64,
    seq: u64,
    running: bool,
}

/// Observable state for monitors.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestManagerStats {
    pub current_requests: usize,
    pub remaining_requests: usize,
    pub window_ms: u64,
    pub oldest_request_age_ms: Option<u64>,
    pub queued: usize,
}

pub struct RequestManager {
    api: Arc<dyn ExchangeApi>,
    state: Arc<Mutex<ManagerState>>,
    window_cap: usize,
    window: Duration,
    request_timeout: Duration,
    tick: Duration,
    task_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RequestManager {
    pub fn new(api: Arc<dyn ExchangeApi>, window_cap: usize, window_ms: u64) -> Self {
        Self::with_timing(api, window_cap, window_ms, 10_000, 100)
    }

    pub fn with_timing(
        api: Arc<dyn ExchangeApi>,
        window_cap: usize,
        window_ms: u64,
        request_timeout_ms: u64,
        tick_ms: u64,
    ) -> Self {
        Self {
            api,
            state: Arc::new(Mutex::new(ManagerState {
                queue: Vec::new(),
                in_flight: HashMap::new(),
                window: VecDeque::new(),
                backoff_until: None,
                backoff_secs: INITIAL_BACKOFF_SECS,
                seq: 0,
                running: false,
            })),
            window_cap,
            window: Duration::from_millis(window_ms),
            request_timeout: Duration::from_millis(request_timeout_ms),
            tick: Duration::from_millis(tick_ms),
            task_handle: Mutex::new(None),
        }
    }

    /// Spawn the dispatch loop. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        let mut handle_guard = self.task_handle.lock().await;
        if handle_guard.is_some() {
            return;
        }

        self.state.lock().await.running = true;

        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(manager.tick);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                manager.dispatch_tick().await;
            }
        });

        *handle_guard = Some(handle);
        info!(
            "RequestManager: Started (cap {} / {:?} window)",
            self.window_cap, self.window
        );
    }

    /// Stop dispatching and fail everything still queued.
    pub async fn stop(&self) {
        if let Some(handle) = self.task_handle.lock().await.take() {
            handle.abort();
        }

        let mut state = self.state.lock().await;
        state.running = false;
        for pending in state.queue.drain(..) {
            for waiter in pending.waiters {
                let _ = waiter.send(Err(ExchangeError::Shutdown));
            }
        }
        info!("RequestManager: Stopped");
    }

    /// Submit a request at the given priority and await its result.
    pub async fn submit(
        &self,
        request: ExchangeRequest,
        priority: RequestPriority,
    ) -> SubmitResult {
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.state.lock().await;
            if !state.running {
                return Err(ExchangeError::Shutdown);
            }

            if let Some(key) = request.key() {
                // Join a request already executing
                if let Some(entry) = state.in_flight.get(&key) {
                    entry.lock().await.push(tx);
                    debug!("RequestManager: Joined in-flight request {}", key);
                } else if let Some(pending) = state
                    .queue
                    .iter_mut()
                    .find(|p| p.request.key().as_deref() == Some(key.as_str()))
                {
                    pending.waiters.push(tx);
                    debug!("RequestManager: Joined queued request {}", key);
                } else {
                    Self::enqueue(&mut state, request, priority, tx);
                }
            } else {
                Self::enqueue(&mut state, request, priority, tx);
            }
        }

        rx.await.unwrap_or(Err(ExchangeError::Shutdown))
    }

    fn enqueue(
        state: &mut ManagerState,
        request: ExchangeRequest,
        priority: RequestPriority,
        tx: oneshot::Sender<SubmitResult>,
    ) {
        state.seq += 1;
        state.queue.push(PendingRequest {
            seq: state.seq,
            request,
            priority,
            enqueued_at: Instant::now(),
            waiters: vec![tx],
        });
    }

    async fn dispatch_tick(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        // Age out window entries
        while let Some(front) = state.window.front() {
            if now.duration_since(*front) >= self.window {
                state.window.pop_front();
            } else {
                break;
            }
        }

        if let Some(until) = state.backoff_until {
            if now < until {
                return;
            }
            state.backoff_until = None;
        }

        while state.window.len() < self.window_cap {
            // Highest priority first; FIFO (by seq) within a priority
            let Some(best_index) = state
                .queue
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| {
                    a.priority
                        .cmp(&b.priority)
                        .then(b.seq.cmp(&a.seq))
                })
                .map(|(i, _)| i)
            else {
                break;
            };

            let pending = state.queue.swap_remove(best_index);
            state.window.push_back(now);

            let entry: InFlightEntry = Arc::new(Mutex::new(pending.waiters));
            let key = pending.request.key();
            if let Some(key) = &key {
                state.in_flight.insert(key.clone(), Arc::clone(&entry));
            }

            let manager = Arc::clone(self);
            let request = pending.request;
            tokio::spawn(async move {
                let result = manager.execute(request).await;
                manager.complete(key, entry, result).await;
            });
        }
    }

    async fn execute(&self, request: ExchangeRequest) -> SubmitResult {
        let call = async {
            match request {
                ExchangeRequest::GetSymbols => {
                    self.api.get_symbols().await.map(ExchangeResponse::Symbols)
                }
                ExchangeRequest::GetTicker { symbol } => {
                    self.api.get_ticker(&symbol).await.map(ExchangeResponse::Ticker)
                }
                ExchangeRequest::GetKlines {
                    symbol,
                    interval,
                    limit,
                } => self
                    .api
                    .get_klines(&symbol, &interval, limit)
                    .await
                    .map(ExchangeResponse::Klines),
                ExchangeRequest::GetPositions => self
                    .api
                    .get_positions()
                    .await
                    .map(ExchangeResponse::Positions),
                ExchangeRequest::GetBalance => {
                    self.api.get_balance().await.map(ExchangeResponse::Balances)
                }
                ExchangeRequest::PlaceOrder(order) => self
                    .api
                    .place_order(&order)
                    .await
                    .map(ExchangeResponse::OrderPlaced),
                ExchangeRequest::CancelOrder { symbol, order_id } => self
                    .api
                    .cancel_order(&symbol, &order_id)
                    .await
                    .map(|_| ExchangeResponse::Ack),
                ExchangeRequest::CreateListenKey => self
                    .api
                    .create_listen_key()
                    .await
                    .map(ExchangeResponse::ListenKey),
                ExchangeRequest::KeepAliveListenKey { key } => self
                    .api
                    .keep_alive_listen_key(&key)
                    .await
                    .map(|_| ExchangeResponse::Ack),
                ExchangeRequest::CloseListenKey { key } => self
                    .api
                    .close_listen_key(&key)
                    .await
                    .map(|_| ExchangeResponse::Ack),
            }
        };

        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ExchangeError::Timeout {
                duration_ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }

    async fn complete(&self, key: Option<String>, entry: InFlightEntry, result: SubmitResult) {
        {
            let mut state = self.state.lock().await;
            if let Some(key) = &key {
                state.in_flight.remove(key);
            }

            match &result {
                Err(ExchangeError::RateLimited { retry_after_secs }) => {
                    let base = retry_after_secs.unwrap_or(state.backoff_secs);
                    let jitter_ms = rand::rng().random_range(0..500);
                    let pause = Duration::from_secs(base) + Duration::from_millis(jitter_ms);
                    state.backoff_until = Some(Instant::now() + pause);
                    state.backoff_secs = (state.backoff_secs * 2).min(MAX_BACKOFF_SECS);
                    warn!(
                        "RequestManager: Rate limited by exchange, pausing dispatch for {:?}",
                        pause
                    );
                }
                Ok(_) => {
                    state.backoff_secs = INITIAL_BACKOFF_SECS;
                    state.backoff_until = None;
                }
                Err(_) => {}
            }
        }

        let mut waiters = entry.lock().await;
        for waiter in waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    pub async fn stats(&self) -> RequestManagerStats {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        while let Some(front) = state.window.front() {
            if now.duration_since(*front) >= self.window {
                state.window.pop_front();
            } else {
                break;
            }
        }

        RequestManagerStats {
            current_requests: state.window.len(),
            remaining_requests: self.window_cap.saturating_sub(state.window.len()),
            window_ms: self.window.as_millis() as u64,
            oldest_request_age_ms: state
                .window
                .front()
                .map(|t| now.duration_since(*t).as_millis() as u64),
            queued: state.queue.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as TokioMutex;

    struct MockApi {
        ticker_calls: AtomicUsize,
        call_log: TokioMutex<Vec<String>>,
        ticker_delay_ms: u64,
        rate_limit_remaining: AtomicUsize,
    }

    impl MockApi {
        fn new() -> Self {
            Self {
                ticker_calls: AtomicUsize::new(0),
                call_log: TokioMutex::new(Vec::new()),
                ticker_delay_ms: 0,
                rate_limit_remaining: AtomicUsize::new(0),
            }
        }

        fn with_delay(ms: u64) -> Self {
            Self {
                ticker_delay_ms: ms,
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl crate::domain::ports::ExchangeApi for MockApi {
        async fn get_symbols(&self) -> Result<Vec<SymbolMeta>, ExchangeError> {
            self.call_log.lock().await.push("getSymbols".to_string());
            Ok(vec![])
        }

        async fn get_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
            if self.rate_limit_remaining.load(Ordering::SeqCst) > 0 {
                self.rate_limit_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(ExchangeError::RateLimited {
                    retry_after_secs: None,
                });
            }
            self.ticker_calls.fetch_add(1, Ordering::SeqCst);
            self.call_log
                .lock()
                .await
                .push(format!("getTicker:{}", symbol));
            if self.ticker_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.ticker_delay_ms)).await;
            }
            Ok(Ticker {
                symbol: symbol.to_string(),
                last_price: dec!(50000),
                volume_24h: dec!(1000),
                timestamp: 1,
            })
        }

        async fn get_klines(
            &self,
            symbol: &str,
            _interval: &str,
            _limit: u32,
        ) -> Result<Vec<Candle>, ExchangeError> {
            self.call_log
                .lock()
                .await
                .push(format!("getKlines:{}", symbol));
            Ok(vec![])
        }

        async fn get_positions(&self) -> Result<Vec<Position>, ExchangeError> {
            Ok(vec![])
        }

        async fn get_balance(&self) -> Result<Vec<Balance>, ExchangeError> {
            Ok(vec![])
        }

        async fn place_order(&self, order: &OrderRequest) -> Result<PlacedOrder, ExchangeError> {
            self.call_log
                .lock()
                .await
                .push(format!("placeOrder:{}", order.symbol));
            Ok(PlacedOrder {
                order_id: "1".to_string(),
                symbol: order.symbol.clone(),
                status: "NEW".to_string(),
            })
        }

        async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<(), ExchangeError> {
            Ok(())
        }

        async fn create_listen_key(&self) -> Result<String, ExchangeError> {
            Ok("lk".to_string())
        }

        async fn keep_alive_listen_key(&self, _key: &str) -> Result<(), ExchangeError> {
            Ok(())
        }

        async fn close_listen_key(&self, _key: &str) -> Result<(), ExchangeError> {
            Ok(())
        }
    }

    fn manager(api: Arc<MockApi>, cap: usize, window_ms: u64) -> Arc<RequestManager> {
        Arc::new(RequestManager::with_timing(api, cap, window_ms, 5_000, 10))
    }

    #[tokio::test]
    async fn test_single_flight_coalesces_identical_gets() {
        let api = Arc::new(MockApi::with_delay(100));
        let mgr = manager(Arc::clone(&api), 100, 10_000);
        mgr.start().await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let mgr = Arc::clone(&mgr);
            handles.push(tokio::spawn(async move {
                mgr.submit(
                    ExchangeRequest::GetTicker {
                        symbol: "BTC-USDT".to_string(),
                    },
                    RequestPriority::Normal,
                )
                .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap();
            assert!(matches!(result, Ok(ExchangeResponse::Ticker(_))));
        }

        // Exactly one underlying exchange call
        assert_eq!(api.ticker_calls.load(Ordering::SeqCst), 1);
        mgr.stop().await;
    }

    #[tokio::test]
    async fn test_mutating_requests_are_not_deduplicated() {
        let api = Arc::new(MockApi::new());
        let mgr = manager(Arc::clone(&api), 100, 10_000);
        mgr.start().await;

        let order = OrderRequest {
            symbol: "BTC-USDT".to_string(),
            side: crate::domain::types::OrderSide::Buy,
            position_side: crate::domain::types::PositionSide::Long,
            order_type: crate::domain::types::OrderType::Market,
            quantity: dec!(0.001),
            price: None,
            stop_loss: None,
            take_profit: None,
        };

        let (a, b) = tokio::join!(
            mgr.submit(
                ExchangeRequest::PlaceOrder(order.clone()),
                RequestPriority::High
            ),
            mgr.submit(ExchangeRequest::PlaceOrder(order), RequestPriority::High),
        );
        assert!(a.is_ok());
        assert!(b.is_ok());

        let log = api.call_log.lock().await;
        assert_eq!(log.iter().filter(|c| c.starts_with("placeOrder")).count(), 2);
        mgr.stop().await;
    }

    #[tokio::test]
    async fn test_window_cap_limits_dispatch() {
        let api = Arc::new(MockApi::new());
        let mgr = manager(Arc::clone(&api), 2, 60_000);
        mgr.start().await;

        let mut handles = Vec::new();
        for i in 0..5 {
            let mgr = Arc::clone(&mgr);
            handles.push(tokio::spawn(async move {
                mgr.submit(
                    ExchangeRequest::GetKlines {
                        symbol: format!("SYM{}-USDT", i),
                        interval: "5m".to_string(),
                        limit: 100,
                    },
                    RequestPriority::Normal,
                )
                .await
            }));
        }

        // Give the dispatcher a few ticks; the 60s window never ages out
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stats = mgr.stats().await;
        assert_eq!(stats.current_requests, 2);
        assert_eq!(stats.remaining_requests, 0);
        assert_eq!(stats.queued, 3);
        mgr.stop().await;
    }

    #[tokio::test]
    async fn test_priority_order_high_before_low() {
        let api = Arc::new(MockApi::new());
        // cap 1 with a short window serializes dispatch one at a time
        let mgr = manager(Arc::clone(&api), 1, 150);
        mgr.start().await;

        let warm = mgr.submit(
            ExchangeRequest::GetKlines {
                symbol: "WARM-USDT".to_string(),
                interval: "5m".to_string(),
                limit: 1,
            },
            RequestPriority::Normal,
        );
        let low = mgr.submit(
            ExchangeRequest::GetKlines {
                symbol: "LOW-USDT".to_string(),
                interval: "5m".to_string(),
                limit: 1,
            },
            RequestPriority::Low,
        );
        let normal = mgr.submit(
            ExchangeRequest::GetKlines {
                symbol: "NORMAL-USDT".to_string(),
                interval: "5m".to_string(),
                limit: 1,
            },
            RequestPriority::Normal,
        );
        let high = mgr.submit(
            ExchangeRequest::GetKlines {
                symbol: "HIGH-USDT".to_string(),
                interval: "5m".to_string(),
                limit: 1,
            },
            RequestPriority::High,
        );

        let _ = tokio::join!(warm, low, normal, high);

        // All four enqueue before the first dispatch tick, so priority
        // decides first; FIFO breaks the Normal-priority tie.
        let log = api.call_log.lock().await;
        let order: Vec<&String> = log.iter().filter(|c| c.starts_with("getKlines")).collect();
        assert_eq!(order[0], "getKlines:HIGH-USDT");
        assert_eq!(order[1], "getKlines:WARM-USDT");
        assert_eq!(order[2], "getKlines:NORMAL-USDT");
        assert_eq!(order[3], "getKlines:LOW-USDT");
        mgr.stop().await;
    }

    #[tokio::test]
    async fn test_rate_limit_backs_off_dispatch() {
        let api = Arc::new(MockApi::new());
        api.rate_limit_remaining.store(1, Ordering::SeqCst);
        let mgr = manager(Arc::clone(&api), 10, 100);
        mgr.start().await;

        let started = Instant::now();
        let first = mgr
            .submit(
                ExchangeRequest::GetTicker {
                    symbol: "BTC-USDT".to_string(),
                },
                RequestPriority::Normal,
            )
            .await;
        assert!(matches!(first, Err(ExchangeError::RateLimited { .. })));

        // Second request only dispatches after the ~1s backoff elapses
        let second = mgr
            .submit(
                ExchangeRequest::GetTicker {
                    symbol: "BTC-USDT".to_string(),
                },
                RequestPriority::Normal,
            )
            .await;
        assert!(second.is_ok());
        assert!(started.elapsed() >= Duration::from_secs(1));
        mgr.stop().await;
    }

    #[tokio::test]
    async fn test_stop_fails_queued_requests() {
        let api = Arc::new(MockApi::new());
        let mgr = manager(Arc::clone(&api), 1, 60_000);
        mgr.start().await;

        // Fill the window slot, then queue one more and stop
        let _ = mgr
            .submit(
                ExchangeRequest::GetTicker {
                    symbol: "A-USDT".to_string(),
                },
                RequestPriority::Normal,
            )
            .await;

        let mgr_clone = Arc::clone(&mgr);
        let queued = tokio::spawn(async move {
            mgr_clone
                .submit(
                    ExchangeRequest::GetTicker {
                        symbol: "B-USDT".to_string(),
                    },
                    RequestPriority::Normal,
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        mgr.stop().await;

        let result = queued.await.unwrap();
        assert!(matches!(result, Err(ExchangeError::Shutdown)));

        // After stop, submits are refused outright
        let refused = mgr
            .submit(
                ExchangeRequest::GetTicker {
                    symbol: "C-USDT".to_string(),
                },
                RequestPriority::Normal,
            )
            .await;
        assert!(matches!(refused, Err(ExchangeError::Shutdown)));
    }
}
