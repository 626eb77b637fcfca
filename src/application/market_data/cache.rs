//! Market-Data Cache
//!
//! TTL cache for tickers and klines in front of the request manager.
//! Ticker misses subscribe the symbol on the push stream so subsequent
//! reads are refreshed without spending API budget; price moves beyond
//! the configured threshold emit a significantPriceChange event.

use crate::config::CacheConfig;
use crate::domain::errors::MarketDataError;
use crate::domain::events::{TradingEvent, now_ms};
use crate::domain::types::{Candle, RequestPriority, Ticker};
use crate::infrastructure::EventBus;
use crate::infrastructure::exchange::{
    ExchangeRequest, ExchangeResponse, PushEvent, PushStreamManager, RequestManager,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

struct CachedTicker {
    ticker: Ticker,
    last_update: Instant,
}

struct CachedKlines {
    candles: Vec<Candle>,
    last_update: Instant,
}

type KlineKey = (String, String, u32);

pub struct MarketDataCache {
    request_manager: Arc<RequestManager>,
    stream: Arc<PushStreamManager>,
    event_bus: EventBus,
    config: std::sync::RwLock<CacheConfig>,
    tickers: Arc<Mutex<HashMap<String, CachedTicker>>>,
    klines: Arc<Mutex<HashMap<KlineKey, CachedKlines>>>,
    task_handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl MarketDataCache {
    pub fn new(
        request_manager: Arc<RequestManager>,
        stream: Arc<PushStreamManager>,
        event_bus: EventBus,
        config: CacheConfig,
    ) -> Self {
        Self {
            request_manager,
            stream,
            event_bus,
            config: std::sync::RwLock::new(config),
            tickers: Arc::new(Mutex::new(HashMap::new())),
            klines: Arc::new(Mutex::new(HashMap::new())),
            task_handles: Mutex::new(Vec::new()),
        }
    }

    fn config(&self) -> CacheConfig {
        self.config.read().expect("cache config lock poisoned").clone()
    }

    pub fn update_config(&self, config: CacheConfig) {
        *self.config.write().expect("cache config lock poisoned") = config;
    }

    /// Spawn the push-stream listener and the stale-entry sweeper.
    pub async fn start(self: &Arc<Self>) {
        let mut handles = self.task_handles.lock().await;
        if !handles.is_empty() {
            return;
        }

        let cache = Arc::clone(self);
        let mut rx = self.stream.subscribe();
        handles.push(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(PushEvent::Ticker {
                        symbol,
                        price,
                        timestamp,
                    }) => {
                        cache.apply_stream_ticker(&symbol, price, timestamp).await;
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("MarketDataCache: Stream receiver lagged, missed {} events", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("MarketDataCache: Stream channel closed");
                        break;
                    }
                }
            }
        }));

        let cache = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.tick().await;
            loop {
                tick.tick().await;
                cache.sweep().await;
            }
        }));

        info!("MarketDataCache: Started");
    }

    pub async fn stop(&self) {
        for handle in self.task_handles.lock().await.drain(..) {
            handle.abort();
        }
        info!("MarketDataCache: Stopped");
    }

    pub async fn get_ticker(
        &self,
        symbol: &str,
        use_cache: bool,
    ) -> Result<Ticker, MarketDataError> {
        let config = self.config();

        if use_cache {
            let tickers = self.tickers.lock().await;
            if let Some(cached) = tickers.get(symbol)
                && cached.last_update.elapsed() < config.ticker_ttl()
            {
                return Ok(cached.ticker.clone());
            }
        }

        let response = self
            .request_manager
            .submit(
                ExchangeRequest::GetTicker {
                    symbol: symbol.to_string(),
                },
                RequestPriority::Normal,
            )
            .await?;

        let ticker = match response {
            ExchangeResponse::Ticker(t) => t,
            other => {
                return Err(MarketDataError::InvalidData {
                    reason: format!("unexpected response for ticker request: {:?}", other),
                });
            }
        };

        self.insert_ticker(ticker.clone(), &config).await;
        // Keep hot symbols fresh off the push stream
        self.stream.subscribe_symbol(symbol).await;

        Ok(ticker)
    }

    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
        use_cache: bool,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let config = self.config();
        let key: KlineKey = (symbol.to_string(), interval.to_string(), limit);

        if use_cache {
            let klines = self.klines.lock().await;
            if let Some(cached) = klines.get(&key)
                && cached.last_update.elapsed() < config.kline_ttl()
            {
                return Ok(cached.candles.clone());
            }
        }

        let response = self
            .request_manager
            .submit(
                ExchangeRequest::GetKlines {
                    symbol: symbol.to_string(),
                    interval: interval.to_string(),
                    limit,
                },
                RequestPriority::Normal,
            )
            .await?;

        let candles = match response {
            ExchangeResponse::Klines(c) => c,
            other => {
                return Err(MarketDataError::InvalidData {
                    reason: format!("unexpected response for klines request: {:?}", other),
                });
            }
        };

        let mut klines = self.klines.lock().await;
        klines.insert(
            key,
            CachedKlines {
                candles: candles.clone(),
                last_update: Instant::now(),
            },
        );
        if klines.len() > config.max_cache_size {
            evict_oldest(&mut klines, |entry| entry.last_update);
        }

        Ok(candles)
    }

    async fn insert_ticker(&self, ticker: Ticker, config: &CacheConfig) {
        let mut tickers = self.tickers.lock().await;
        tickers.insert(
            ticker.symbol.clone(),
            CachedTicker {
                ticker,
                last_update: Instant::now(),
            },
        );
        if tickers.len() > config.max_cache_size
            && let Some(evicted) = evict_oldest(&mut tickers, |entry| entry.last_update)
        {
            drop(tickers);
            self.stream.unsubscribe_symbol(&evicted).await;
            debug!("MarketDataCache: Evicted {} (capacity)", evicted);
        }
    }

    /// Refresh a cached ticker from the push stream and emit a
    /// significantPriceChange event when the move exceeds the threshold.
    async fn apply_stream_ticker(&self, symbol: &str, price: Decimal, timestamp: i64) {
        let config = self.config();
        let mut tickers = self.tickers.lock().await;

        let previous = tickers.get(symbol).map(|c| c.ticker.last_price);

        match tickers.get_mut(symbol) {
            Some(cached) => {
                cached.ticker.last_price = price;
                cached.ticker.timestamp = timestamp;
                cached.last_update = Instant::now();
            }
            None => {
                // Stream update for a symbol we never fetched; cache it so
                // the next read is a hit.
                tickers.insert(
                    symbol.to_string(),
                    CachedTicker {
                        ticker: Ticker {
                            symbol: symbol.to_string(),
                            last_price: price,
                            volume_24h: Decimal::ZERO,
                            timestamp,
                        },
                        last_update: Instant::now(),
                    },
                );
            }
        }
        drop(tickers);

        if let Some(previous) = previous
            && previous > Decimal::ZERO
        {
            let change_pct = ((price - previous) / previous * Decimal::from(100))
                .to_f64()
                .unwrap_or(0.0);
            if change_pct.abs() > config.price_change_threshold {
                self.event_bus
                    .publish(TradingEvent::SignificantPriceChange {
                        symbol: symbol.to_string(),
                        previous_price: previous,
                        current_price: price,
                        change_pct,
                        timestamp: now_ms(),
                    });
            }
        }
    }

    /// Drop entries older than 2x their TTL and release their stream
    /// subscriptions.
    async fn sweep(&self) {
        let config = self.config();

        let stale_tickers: Vec<String> = {
            let mut tickers = self.tickers.lock().await;
            let cutoff = config.ticker_ttl() * 2;
            let stale: Vec<String> = tickers
                .iter()
                .filter(|(_, entry)| entry.last_update.elapsed() >= cutoff)
                .map(|(symbol, _)| symbol.clone())
                .collect();
            for symbol in &stale {
                tickers.remove(symbol);
            }
            stale
        };

        for symbol in &stale_tickers {
            self.stream.unsubscribe_symbol(symbol).await;
        }

        let mut klines = self.klines.lock().await;
        let cutoff = config.kline_ttl() * 2;
        klines.retain(|_, entry| entry.last_update.elapsed() < cutoff);
        drop(klines);

        if !stale_tickers.is_empty() {
            debug!(
                "MarketDataCache: Swept {} stale ticker entries",
                stale_tickers.len()
            );
        }
    }

    pub async fn ticker_cache_size(&self) -> usize {
        self.tickers.lock().await.len()
    }
}

/// Remove the entry with the oldest `last_update`; returns its key.
fn evict_oldest<K: Clone + std::hash::Hash + Eq, V>(
    map: &mut HashMap<K, V>,
    last_update: impl Fn(&V) -> Instant,
) -> Option<K> {
    let oldest = map
        .iter()
        .min_by_key(|(_, v)| last_update(v))
        .map(|(k, _)| k.clone())?;
    map.remove(&oldest);
    Some(oldest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ExchangeError;
    use crate::domain::events::EventListener;
    use crate::domain::ports::ExchangeApi;
    use crate::domain::types::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingApi {
        ticker_calls: AtomicUsize,
        kline_calls: AtomicUsize,
    }

    impl CountingApi {
        fn new() -> Self {
            Self {
                ticker_calls: AtomicUsize::new(0),
                kline_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ExchangeApi for CountingApi {
        async fn get_symbols(&self) -> Result<Vec<SymbolMeta>, ExchangeError> {
            Ok(vec![])
        }

        async fn get_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
            self.ticker_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Ticker {
                symbol: symbol.to_string(),
                last_price: dec!(50000),
                volume_24h: dec!(1000),
                timestamp: 1,
            })
        }

        async fn get_klines(
            &self,
            _symbol: &str,
            _interval: &str,
            limit: u32,
        ) -> Result<Vec<Candle>, ExchangeError> {
            self.kline_calls.fetch_add(1, Ordering::SeqCst);
            Ok((0..limit as i64)
                .map(|i| Candle {
                    timestamp: 1_700_000_000_000 + i * 60_000,
                    open: dec!(100),
                    high: dec!(101),
                    low: dec!(99),
                    close: dec!(100.5),
                    volume: dec!(10),
                })
                .collect())
        }

        async fn get_positions(&self) -> Result<Vec<Position>, ExchangeError> {
            Ok(vec![])
        }

        async fn get_balance(&self) -> Result<Vec<Balance>, ExchangeError> {
            Ok(vec![])
        }

        async fn place_order(&self, _order: &OrderRequest) -> Result<PlacedOrder, ExchangeError> {
            Err(ExchangeError::Shutdown)
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

    struct CollectingListener {
        events: std::sync::Mutex<Vec<TradingEvent>>,
    }

    impl EventListener for CollectingListener {
        fn on_event(&self, event: &TradingEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    async fn build_cache(
        api: Arc<CountingApi>,
        config: CacheConfig,
    ) -> (Arc<MarketDataCache>, EventBus) {
        let request_manager = Arc::new(RequestManager::with_timing(
            api, 100, 10_000, 5_000, 10,
        ));
        request_manager.start().await;
        let stream = Arc::new(PushStreamManager::new(
            "wss://example.invalid/ws".to_string(),
            true,
            Arc::clone(&request_manager),
        ));
        let bus = EventBus::new();
        (
            Arc::new(MarketDataCache::new(
                request_manager,
                stream,
                bus.clone(),
                config,
            )),
            bus,
        )
    }

    fn test_config() -> CacheConfig {
        CacheConfig {
            ticker_ttl_ms: 5_000,
            kline_ttl_ms: 30_000,
            max_cache_size: 3,
            price_change_threshold: 0.1,
        }
    }

    #[tokio::test]
    async fn test_ticker_cache_hit_skips_exchange() {
        let api = Arc::new(CountingApi::new());
        let (cache, _bus) = build_cache(Arc::clone(&api), test_config()).await;

        let first = cache.get_ticker("BTC-USDT", true).await.unwrap();
        let second = cache.get_ticker("BTC-USDT", true).await.unwrap();
        assert_eq!(first.last_price, second.last_price);
        assert_eq!(api.ticker_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ticker_bypass_cache_refetches() {
        let api = Arc::new(CountingApi::new());
        let (cache, _bus) = build_cache(Arc::clone(&api), test_config()).await;

        cache.get_ticker("BTC-USDT", true).await.unwrap();
        cache.get_ticker("BTC-USDT", false).await.unwrap();
        assert_eq!(api.ticker_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_ticker_is_invalid() {
        let api = Arc::new(CountingApi::new());
        let mut config = test_config();
        config.ticker_ttl_ms = 50;
        let (cache, _bus) = build_cache(Arc::clone(&api), config).await;

        cache.get_ticker("BTC-USDT", true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        cache.get_ticker("BTC-USDT", true).await.unwrap();
        assert_eq!(api.ticker_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_kline_cache_hit() {
        let api = Arc::new(CountingApi::new());
        let (cache, _bus) = build_cache(Arc::clone(&api), test_config()).await;

        let candles = cache.get_klines("BTC-USDT", "5m", 100, true).await.unwrap();
        assert_eq!(candles.len(), 100);
        cache.get_klines("BTC-USDT", "5m", 100, true).await.unwrap();
        assert_eq!(api.kline_calls.load(Ordering::SeqCst), 1);

        // Different limit is a different cache key
        cache.get_klines("BTC-USDT", "5m", 50, true).await.unwrap();
        assert_eq!(api.kline_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ticker_miss_subscribes_symbol() {
        let api = Arc::new(CountingApi::new());
        let (cache, _bus) = build_cache(Arc::clone(&api), test_config()).await;

        cache.get_ticker("BTC-USDT", true).await.unwrap();
        assert_eq!(cache.stream.subscription_count().await, 1);
    }

    #[tokio::test]
    async fn test_eviction_honors_capacity_and_releases_subscription() {
        let api = Arc::new(CountingApi::new());
        let (cache, _bus) = build_cache(Arc::clone(&api), test_config()).await;

        for (i, symbol) in ["A-USDT", "B-USDT", "C-USDT", "D-USDT"].iter().enumerate() {
            cache.get_ticker(symbol, true).await.unwrap();
            // Spread out last_update so eviction order is deterministic
            tokio::time::sleep(Duration::from_millis(5 * (i as u64 + 1))).await;
        }

        assert_eq!(cache.ticker_cache_size().await, 3);
        // Oldest entry (A-USDT) is evicted and its subscription released
        assert_eq!(cache.stream.subscription_count().await, 3);
    }

    #[tokio::test]
    async fn test_stream_update_emits_significant_change() {
        let api = Arc::new(CountingApi::new());
        let (cache, bus) = build_cache(Arc::clone(&api), test_config()).await;

        let listener = Arc::new(CollectingListener {
            events: std::sync::Mutex::new(Vec::new()),
        });
        bus.subscribe(listener.clone());

        // Seed the cache at 50000, then push a 1% move
        cache.get_ticker("BTC-USDT", true).await.unwrap();
        cache
            .apply_stream_ticker("BTC-USDT", dec!(50500), now_ms())
            .await;

        let events = listener.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            TradingEvent::SignificantPriceChange { symbol, .. } if symbol == "BTC-USDT"
        )));
    }

    #[tokio::test]
    async fn test_small_stream_move_is_silent() {
        let api = Arc::new(CountingApi::new());
        let (cache, bus) = build_cache(Arc::clone(&api), test_config()).await;

        let listener = Arc::new(CollectingListener {
            events: std::sync::Mutex::new(Vec::new()),
        });
        bus.subscribe(listener.clone());

        cache.get_ticker("BTC-USDT", true).await.unwrap();
        // 0.02% move, below the 0.1% threshold
        cache
            .apply_stream_ticker("BTC-USDT", dec!(50010), now_ms())
            .await;

        assert!(listener.events.lock().unwrap().is_empty());

        // But the cache itself is refreshed
        let ticker = cache.get_ticker("BTC-USDT", true).await.unwrap();
        assert_eq!(ticker.last_price, dec!(50010));
        assert_eq!(api.ticker_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sweep_drops_stale_entries() {
        let api = Arc::new(CountingApi::new());
        let mut config = test_config();
        config.ticker_ttl_ms = 20;
        let (cache, _bus) = build_cache(Arc::clone(&api), config).await;

        cache.get_ticker("BTC-USDT", true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        cache.sweep().await;

        assert_eq!(cache.ticker_cache_size().await, 0);
        assert_eq!(cache.stream.subscription_count().await, 0);
    }
}
