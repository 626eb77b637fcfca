//! In-memory trade-record store.
//!
//! Stands in for the external trade-history service: the engine writes
//! through the `TradeRecordStore` port on order submit and on fill
//! updates, and this implementation keeps them addressable by order id.

use crate::domain::events::now_ms;
use crate::domain::ports::TradeRecordStore;
use crate::domain::types::TradeRecord;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct InMemoryTradeStore {
    records: Mutex<HashMap<String, TradeRecord>>,
}

impl InMemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, order_id: &str) -> Option<TradeRecord> {
        self.records.lock().await.get(order_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl TradeRecordStore for InMemoryTradeStore {
    async fn record_open(&self, record: &TradeRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .await
            .insert(record.order_id.clone(), record.clone());
        Ok(())
    }

    async fn record_fill(
        &self,
        order_id: &str,
        status: &str,
        executed_qty: Decimal,
        avg_price: Decimal,
        commissions: Decimal,
        realized_pnl: Decimal,
    ) -> anyhow::Result<()> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(order_id) else {
            // Fill for an order placed before this process started
            return Ok(());
        };
        record.status = status.to_string();
        record.executed_qty = executed_qty;
        record.avg_price = avg_price;
        record.commissions = commissions;
        record.realized_pnl = realized_pnl;
        record.updated_at_ms = now_ms();
        Ok(())
    }
}
