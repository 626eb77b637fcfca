use crate::domain::errors::ExchangeError;
use crate::domain::types::{
    Balance, Candle, OrderRequest, PlacedOrder, Position, SymbolMeta, Ticker, TradeRecord,
};
use async_trait::async_trait;

// Need async_trait for async functions in traits
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn get_symbols(&self) -> Result<Vec<SymbolMeta>, ExchangeError>;
    async fn get_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError>;
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError>;
    async fn get_positions(&self) -> Result<Vec<Position>, ExchangeError>;
    async fn get_balance(&self) -> Result<Vec<Balance>, ExchangeError>;
    async fn place_order(&self, order: &OrderRequest) -> Result<PlacedOrder, ExchangeError>;
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError>;

    // Listen-key lifecycle for the user data stream
    async fn create_listen_key(&self) -> Result<String, ExchangeError>;
    async fn keep_alive_listen_key(&self, key: &str) -> Result<(), ExchangeError>;
    async fn close_listen_key(&self, key: &str) -> Result<(), ExchangeError>;
}

/// External trade-history store. The engine writes on order submit and on
/// fill updates; reading it back is out of scope here.
#[async_trait]
pub trait TradeRecordStore: Send + Sync {
    async fn record_open(&self, record: &TradeRecord) -> anyhow::Result<()>;
    async fn record_fill(
        &self,
        order_id: &str,
        status: &str,
        executed_qty: rust_decimal::Decimal,
        avg_price: rust_decimal::Decimal,
        commissions: rust_decimal::Decimal,
        realized_pnl: rust_decimal::Decimal,
    ) -> anyhow::Result<()>;
}
