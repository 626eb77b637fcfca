//! Symbol Registry
//!
//! Authoritative view of the tradable symbol universe, refreshed hourly
//! through the request manager. Free-form user input is normalized to the
//! canonical `ASSET-USDT` form, with ranked suggestions when the result
//! does not exist.

use crate::domain::errors::ExchangeError;
use crate::domain::types::{RequestPriority, SymbolMeta};
use crate::infrastructure::exchange::{ExchangeRequest, ExchangeResponse, RequestManager};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

const DEFAULT_QUOTE: &str = "USDT";
const MAX_SUGGESTIONS: usize = 5;

/// Liquid majors preferred when seeding a scan set.
const POPULAR_SYMBOLS: [&str; 10] = [
    "BTC-USDT", "ETH-USDT", "BNB-USDT", "SOL-USDT", "XRP-USDT", "ADA-USDT", "DOGE-USDT",
    "AVAX-USDT", "LINK-USDT", "DOT-USDT",
];

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolValidation {
    pub is_valid: bool,
    pub canonical_symbol: String,
    pub suggestions: Vec<String>,
}

pub struct SymbolRegistry {
    request_manager: Arc<RequestManager>,
    symbols: RwLock<HashMap<String, SymbolMeta>>,
    last_refresh: RwLock<Option<Instant>>,
    refresh_interval: Duration,
    task_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Normalize free-form input to the canonical `ASSET-USDT` form:
/// uppercase, separators stripped, default quote suffix appended when
/// absent. Idempotent.
pub fn normalize_symbol(input: &str) -> String {
    let cleaned: String = input
        .trim()
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();

    if cleaned.is_empty() {
        return String::new();
    }

    let base = cleaned
        .strip_suffix(DEFAULT_QUOTE)
        .filter(|b| !b.is_empty())
        .unwrap_or(&cleaned);

    format!("{}-{}", base, DEFAULT_QUOTE)
}

impl SymbolRegistry {
    pub fn new(request_manager: Arc<RequestManager>, refresh_interval: Duration) -> Self {
        Self {
            request_manager,
            symbols: RwLock::new(HashMap::new()),
            last_refresh: RwLock::new(None),
            refresh_interval,
            task_handle: Mutex::new(None),
        }
    }

    /// Initial fetch plus the periodic refresh task.
    pub async fn start(self: &Arc<Self>) {
        let mut handle_guard = self.task_handle.lock().await;
        if handle_guard.is_some() {
            return;
        }

        if let Err(e) = self.refresh().await {
            warn!("SymbolRegistry: Initial refresh failed: {}", e);
        }

        let registry = Arc::clone(self);
        let interval = self.refresh_interval;
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await;
            loop {
                tick.tick().await;
                if let Err(e) = registry.refresh().await {
                    error!("SymbolRegistry: Refresh failed: {}", e);
                }
            }
        });
        *handle_guard = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.task_handle.lock().await.take() {
            handle.abort();
        }
    }

    /// Fetch the symbol table; on failure the previous table is kept.
    pub async fn refresh(&self) -> Result<(), ExchangeError> {
        let response = self
            .request_manager
            .submit(ExchangeRequest::GetSymbols, RequestPriority::Low)
            .await?;

        let metas = match response {
            ExchangeResponse::Symbols(metas) => metas,
            other => {
                return Err(ExchangeError::Validation {
                    reason: format!("unexpected response for symbol refresh: {:?}", other),
                });
            }
        };

        let mut symbols = self.symbols.write().await;
        symbols.clear();
        for meta in metas {
            symbols.insert(meta.symbol.clone(), meta);
        }
        drop(symbols);

        *self.last_refresh.write().await = Some(Instant::now());
        info!("SymbolRegistry: Refreshed symbol table");
        Ok(())
    }

    pub async fn is_stale(&self) -> bool {
        match *self.last_refresh.read().await {
            Some(at) => at.elapsed() >= self.refresh_interval,
            None => true,
        }
    }

    pub async fn get(&self, symbol: &str) -> Option<SymbolMeta> {
        self.symbols.read().await.get(symbol).cloned()
    }

    pub async fn len(&self) -> usize {
        self.symbols.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.symbols.read().await.is_empty()
    }

    /// Validate free-form input against the known universe.
    pub async fn validate(&self, input: &str) -> SymbolValidation {
        let canonical = normalize_symbol(input);
        if canonical.is_empty() {
            return SymbolValidation {
                is_valid: false,
                canonical_symbol: canonical,
                suggestions: Vec::new(),
            };
        }

        let symbols = self.symbols.read().await;
        let is_valid = symbols
            .get(&canonical)
            .map(|meta| meta.is_active())
            .unwrap_or(false);

        let suggestions = if is_valid {
            Vec::new()
        } else {
            Self::rank_suggestions(&canonical, &symbols)
        };

        SymbolValidation {
            is_valid,
            canonical_symbol: canonical,
            suggestions,
        }
    }

    /// Suggestion ranking: exact match > same asset prefix > substring >
    /// shortest symbol.
    fn rank_suggestions(canonical: &str, symbols: &HashMap<String, SymbolMeta>) -> Vec<String> {
        let asset = canonical.split('-').next().unwrap_or(canonical);

        let mut ranked: Vec<(u8, usize, String)> = symbols
            .values()
            .filter(|meta| meta.is_active())
            .filter_map(|meta| {
                let rank = if meta.symbol == canonical {
                    0
                } else if meta.asset.starts_with(asset) || meta.symbol.starts_with(asset) {
                    1
                } else if meta.symbol.contains(asset) {
                    2
                } else {
                    return None;
                };
                Some((rank, meta.symbol.len(), meta.symbol.clone()))
            })
            .collect();

        ranked.sort();
        ranked
            .into_iter()
            .take(MAX_SUGGESTIONS)
            .map(|(_, _, symbol)| symbol)
            .collect()
    }

    /// Up to `k` active symbols, preferring the static priority list and
    /// topping up from the refreshed universe.
    pub async fn get_popular(&self, k: usize) -> Vec<String> {
        let symbols = self.symbols.read().await;
        let mut result: Vec<String> = Vec::with_capacity(k);

        for candidate in POPULAR_SYMBOLS {
            if result.len() >= k {
                break;
            }
            if symbols
                .get(candidate)
                .map(|meta| meta.is_active())
                .unwrap_or(false)
            {
                result.push(candidate.to_string());
            }
        }

        if result.len() < k {
            let mut rest: Vec<&SymbolMeta> = symbols
                .values()
                .filter(|meta| meta.is_active() && !result.contains(&meta.symbol))
                .collect();
            rest.sort_by(|a, b| a.symbol.cmp(&b.symbol));
            for meta in rest {
                if result.len() >= k {
                    break;
                }
                result.push(meta.symbol.clone());
            }
        }

        result
    }

    /// All active symbols, for the full-universe scan refresh.
    pub async fn active_symbols(&self) -> Vec<String> {
        let symbols = self.symbols.read().await;
        let mut active: Vec<String> = symbols
            .values()
            .filter(|meta| meta.is_active())
            .map(|meta| meta.symbol.clone())
            .collect();
        active.sort();
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ExchangeError;
    use crate::domain::ports::ExchangeApi;
    use crate::domain::types::*;
    use async_trait::async_trait;

    fn meta(symbol: &str, status: i32) -> SymbolMeta {
        let asset = symbol.split('-').next().unwrap_or(symbol).to_string();
        SymbolMeta {
            symbol: symbol.to_string(),
            asset,
            status,
            price_precision: 2,
            quantity_precision: 3,
            display_name: symbol.replace('-', "/"),
        }
    }

    struct FixedApi {
        symbols: Vec<SymbolMeta>,
    }

    #[async_trait]
    impl ExchangeApi for FixedApi {
        async fn get_symbols(&self) -> Result<Vec<SymbolMeta>, ExchangeError> {
            Ok(self.symbols.clone())
        }
        async fn get_ticker(&self, _symbol: &str) -> Result<Ticker, ExchangeError> {
            Err(ExchangeError::Shutdown)
        }
        async fn get_klines(
            &self,
            _symbol: &str,
            _interval: &str,
            _limit: u32,
        ) -> Result<Vec<Candle>, ExchangeError> {
            Ok(vec![])
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

    async fn registry_with(symbols: Vec<SymbolMeta>) -> SymbolRegistry {
        let api = Arc::new(FixedApi { symbols });
        let request_manager = Arc::new(RequestManager::with_timing(api, 100, 10_000, 5_000, 10));
        request_manager.start().await;
        let registry = SymbolRegistry::new(request_manager, Duration::from_secs(3600));
        registry.refresh().await.unwrap();
        registry
    }

    #[test]
    fn test_normalize_appends_quote_suffix() {
        assert_eq!(normalize_symbol("btc"), "BTC-USDT");
        assert_eq!(normalize_symbol("BTC"), "BTC-USDT");
        assert_eq!(normalize_symbol("btc-usdt"), "BTC-USDT");
        assert_eq!(normalize_symbol("BTC/USDT"), "BTC-USDT");
        assert_eq!(normalize_symbol(" btc usdt "), "BTC-USDT");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for input in ["btc", "BTC-USDT", "eth/usdt", "SOLUSDT", ""] {
            let once = normalize_symbol(input);
            assert_eq!(normalize_symbol(&once), once);
        }
    }

    #[test]
    fn test_normalize_empty_input() {
        assert_eq!(normalize_symbol(""), "");
        assert_eq!(normalize_symbol("--//"), "");
    }

    #[tokio::test]
    async fn test_validate_known_symbol() {
        let registry = registry_with(vec![meta("BTC-USDT", 1), meta("ETH-USDT", 1)]).await;

        let result = registry.validate("btc").await;
        assert!(result.is_valid);
        assert_eq!(result.canonical_symbol, "BTC-USDT");
        assert!(result.suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_validate_inactive_symbol_is_invalid() {
        let registry = registry_with(vec![meta("BTC-USDT", 0)]).await;
        let result = registry.validate("btc").await;
        assert!(!result.is_valid);
    }

    #[tokio::test]
    async fn test_suggestions_prefer_asset_prefix() {
        let registry = registry_with(vec![
            meta("BTC-USDT", 1),
            meta("BTCDOM-USDT", 1),
            meta("WBTC-USDT", 1),
            meta("ETH-USDT", 1),
        ])
        .await;

        // "btcd" normalizes to BTCD-USDT, which does not exist
        let result = registry.validate("btcd").await;
        assert!(!result.is_valid);
        assert!(!result.suggestions.is_empty());
        // Prefix matches (BTCDOM) rank before substring matches (WBTC)
        let dom_pos = result
            .suggestions
            .iter()
            .position(|s| s == "BTCDOM-USDT")
            .unwrap();
        if let Some(wbtc_pos) = result.suggestions.iter().position(|s| s == "WBTC-USDT") {
            assert!(dom_pos < wbtc_pos);
        }
    }

    #[tokio::test]
    async fn test_suggestions_capped_at_five() {
        let symbols: Vec<SymbolMeta> = (0..10)
            .map(|i| meta(&format!("AB{}-USDT", i), 1))
            .collect();
        let registry = registry_with(symbols).await;

        let result = registry.validate("ab").await;
        assert!(result.suggestions.len() <= 5);
    }

    #[tokio::test]
    async fn test_popular_prefers_seed_list() {
        let registry = registry_with(vec![
            meta("ZRX-USDT", 1),
            meta("ETH-USDT", 1),
            meta("BTC-USDT", 1),
        ])
        .await;

        let popular = registry.get_popular(2).await;
        assert_eq!(popular, vec!["BTC-USDT".to_string(), "ETH-USDT".to_string()]);
    }

    #[tokio::test]
    async fn test_popular_tops_up_from_universe() {
        let registry = registry_with(vec![meta("BTC-USDT", 1), meta("ZRX-USDT", 1)]).await;

        let popular = registry.get_popular(2).await;
        assert_eq!(popular.len(), 2);
        assert!(popular.contains(&"BTC-USDT".to_string()));
        assert!(popular.contains(&"ZRX-USDT".to_string()));
    }

    #[tokio::test]
    async fn test_popular_skips_inactive() {
        let registry = registry_with(vec![meta("BTC-USDT", 0), meta("ETH-USDT", 1)]).await;

        let popular = registry.get_popular(5).await;
        assert_eq!(popular, vec!["ETH-USDT".to_string()]);
    }
}
