//! Signal Worker Pool
//!
//! Fixed pool of workers draining a deduplicated, priority-ordered task
//! queue. Each task fetches a candle window through the market-data cache,
//! validates it, runs the signal generator, and emits the signal to the
//! orchestrator. Failures retry up to the configured attempts and feed
//! the circuit breaker; a rate-limited breaker trip clears the queue.

pub mod breaker;

use crate::application::market_data::MarketDataCache;
use crate::application::signal::SignalGenerator;
use crate::config::WorkerPoolConfig;
use crate::domain::errors::MarketDataError;
use crate::domain::events::{ActivityLevel, TradingEvent, now_ms};
use crate::domain::types::{SignalTask, TradingSignal, validate_candle_series};
use crate::infrastructure::EventBus;
use breaker::{BreakerConfig, CircuitBreaker};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

const QUEUE_CAPACITY: usize = 256;
const DEFAULT_TICK: Duration = Duration::from_millis(100);
const DEFAULT_TASK_EXPIRY: Duration = Duration::from_secs(45);

/// Kline window each task requests.
#[derive(Debug, Clone)]
pub struct KlineSpec {
    pub interval: String,
    pub limit: u32,
}

struct QueueState {
    queue: VecDeque<SignalTask>,
    /// Last submission instant per symbol, for the dedupe window.
    recent: HashMap<String, Instant>,
}

pub struct SignalWorkerPool {
    cache: Arc<MarketDataCache>,
    generator: Arc<SignalGenerator>,
    event_bus: EventBus,
    signal_tx: mpsc::Sender<TradingSignal>,
    config: std::sync::RwLock<WorkerPoolConfig>,
    kline_spec: std::sync::RwLock<KlineSpec>,
    state: Arc<Mutex<QueueState>>,
    breaker: Arc<CircuitBreaker>,
    in_flight: Arc<AtomicUsize>,
    tick: Duration,
    task_expiry: Duration,
    task_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SignalWorkerPool {
    pub fn new(
        cache: Arc<MarketDataCache>,
        generator: Arc<SignalGenerator>,
        event_bus: EventBus,
        signal_tx: mpsc::Sender<TradingSignal>,
        config: WorkerPoolConfig,
        kline_spec: KlineSpec,
    ) -> Self {
        Self::with_tuning(
            cache,
            generator,
            event_bus,
            signal_tx,
            config,
            kline_spec,
            BreakerConfig::default(),
            DEFAULT_TICK,
            DEFAULT_TASK_EXPIRY,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_tuning(
        cache: Arc<MarketDataCache>,
        generator: Arc<SignalGenerator>,
        event_bus: EventBus,
        signal_tx: mpsc::Sender<TradingSignal>,
        config: WorkerPoolConfig,
        kline_spec: KlineSpec,
        breaker_config: BreakerConfig,
        tick: Duration,
        task_expiry: Duration,
    ) -> Self {
        Self {
            cache,
            generator,
            event_bus,
            signal_tx,
            config: std::sync::RwLock::new(config),
            kline_spec: std::sync::RwLock::new(kline_spec),
            state: Arc::new(Mutex::new(QueueState {
                queue: VecDeque::new(),
                recent: HashMap::new(),
            })),
            breaker: Arc::new(CircuitBreaker::new(breaker_config)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            tick,
            task_expiry,
            task_handle: Mutex::new(None),
        }
    }

    fn config(&self) -> WorkerPoolConfig {
        self.config.read().expect("pool config lock poisoned").clone()
    }

    /// Hot-swap the pool configuration. A parallel/sequential switch takes
    /// effect on the next dispatch tick without dropping the queue.
    pub fn update_config(&self, config: WorkerPoolConfig) {
        let mut current = self.config.write().expect("pool config lock poisoned");
        if current.enable_parallel != config.enable_parallel {
            info!(
                "SignalWorkerPool: Switching to {} mode ({} workers)",
                if config.enable_parallel { "parallel" } else { "sequential" },
                config.max_workers
            );
        }
        *current = config;
    }

    pub fn update_kline_spec(&self, spec: KlineSpec) {
        *self.kline_spec.write().expect("kline spec lock poisoned") = spec;
    }

    /// Enqueue tasks for `symbols`, deduplicating submissions for a symbol
    /// seen within the dedupe window. Returns how many were enqueued.
    pub async fn submit(&self, symbols: &[String], priority: i32) -> usize {
        let config = self.config();
        let window = config.dedupe_window();
        let mut state = self.state.lock().await;

        // Lazily expire dedupe entries
        state.recent.retain(|_, at| at.elapsed() < window);

        let mut enqueued = 0;
        for symbol in symbols {
            if state.recent.contains_key(symbol) {
                debug!("SignalWorkerPool: Deduplicated {}", symbol);
                continue;
            }
            if state.queue.len() >= QUEUE_CAPACITY {
                warn!(
                    "SignalWorkerPool: Queue full ({}), dropping submission for {}",
                    QUEUE_CAPACITY, symbol
                );
                continue;
            }

            state.recent.insert(symbol.clone(), Instant::now());
            state
                .queue
                .push_back(SignalTask::new(symbol.clone(), priority, config.retry_attempts));
            enqueued += 1;
        }

        if enqueued > 0 {
            let queue = &mut state.queue;
            queue
                .make_contiguous()
                .sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        }

        enqueued
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Spawn the dispatch loop. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        let mut handle_guard = self.task_handle.lock().await;
        if handle_guard.is_some() {
            return;
        }

        let pool = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(pool.tick);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                pool.dispatch_tick().await;
            }
        });
        *handle_guard = Some(handle);

        let config = self.config();
        info!(
            "SignalWorkerPool: Started ({} workers, {})",
            config.max_workers,
            if config.enable_parallel { "parallel" } else { "sequential" }
        );
    }

    /// Stop dispatching and abandon the queue.
    pub async fn stop(&self) {
        if let Some(handle) = self.task_handle.lock().await.take() {
            handle.abort();
        }
        let mut state = self.state.lock().await;
        state.queue.clear();
        state.recent.clear();
        info!("SignalWorkerPool: Stopped");
    }

    async fn dispatch_tick(self: &Arc<Self>) {
        if self.breaker.is_open() {
            return;
        }

        let config = self.config();
        let in_flight = self.in_flight.load(Ordering::SeqCst);
        let available = if config.enable_parallel {
            config.max_workers.saturating_sub(in_flight)
        } else if in_flight == 0 {
            1
        } else {
            0
        };
        if available == 0 {
            return;
        }

        let mut to_run = Vec::new();
        {
            let mut state = self.state.lock().await;

            // Expire tasks that waited too long
            let expiry = self.task_expiry;
            let before = state.queue.len();
            state.queue.retain(|task| task.created_at.elapsed() < expiry);
            let expired = before - state.queue.len();
            if expired > 0 {
                debug!("SignalWorkerPool: Expired {} stale tasks", expired);
            }

            for _ in 0..available {
                match state.queue.pop_front() {
                    Some(task) => to_run.push(task),
                    None => break,
                }
            }
        }

        for task in to_run {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let pool = Arc::clone(self);
            tokio::spawn(async move {
                pool.process_task(task).await;
                pool.in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }

    async fn process_task(self: &Arc<Self>, task: SignalTask) {
        let config = self.config();
        let spec = self.kline_spec.read().expect("kline spec lock poisoned").clone();

        let outcome = tokio::time::timeout(
            config.task_timeout(),
            self.run_analysis(&task.symbol, &spec),
        )
        .await;

        let error = match outcome {
            Ok(Ok(signal)) => {
                self.breaker.record_success();
                self.event_bus
                    .publish(TradingEvent::Signal {
                        signal: signal.clone(),
                        timestamp: now_ms(),
                    });
                if self.signal_tx.send(signal).await.is_err() {
                    debug!("SignalWorkerPool: Signal receiver dropped");
                }
                return;
            }
            Ok(Err(e)) => e,
            Err(_) => MarketDataError::ConnectionLost {
                reason: format!("task timed out after {:?}", config.task_timeout()),
            },
        };

        let is_rate_limited = matches!(
            &error,
            MarketDataError::Exchange(e) if e.is_rate_limited()
        );

        warn!(
            "SignalWorkerPool: Task {} for {} failed (attempt {}/{}): {}",
            task.id, task.symbol, task.retries + 1, task.max_retries + 1, error
        );

        let opened = self.breaker.record_failure(is_rate_limited);
        if let Some(opened) = opened {
            self.event_bus
                .publish(TradingEvent::CircuitBreakerOpened {
                    is_rate_limit: opened.is_rate_limit,
                    pause_ms: opened.pause_ms,
                    consecutive_errors: opened.consecutive_errors,
                    timestamp: now_ms(),
                });

            if opened.is_rate_limit {
                // Queued work would only burn more of the API budget; the
                // failing task is abandoned along with the queue.
                let mut state = self.state.lock().await;
                let dropped = state.queue.len();
                state.queue.clear();
                warn!(
                    "SignalWorkerPool: Cleared {} queued tasks after rate-limit trip",
                    dropped
                );
                return;
            }
        }

        if task.retries < task.max_retries {
            let mut retried = task;
            retried.retries += 1;
            self.state.lock().await.queue.push_front(retried);
        } else {
            self.event_bus.activity(
                ActivityLevel::Error,
                format!(
                    "Signal task for {} failed after {} attempts: {}",
                    task.symbol,
                    task.max_retries + 1,
                    error
                ),
            );
        }
    }

    async fn run_analysis(
        &self,
        symbol: &str,
        spec: &KlineSpec,
    ) -> Result<TradingSignal, MarketDataError> {
        let candles = self
            .cache
            .get_klines(symbol, &spec.interval, spec.limit, true)
            .await?;
        validate_candle_series(&candles)?;
        Ok(self.generator.evaluate(symbol, &candles))
    }
}
