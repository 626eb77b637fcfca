//! Exchange Push Stream
//!
//! One long-lived WebSocket connection carrying market tickers for
//! subscribed symbols plus the account/order user-data events. The
//! subscription set survives reconnects; the keep-alive tick refreshes
//! the listen key through the request manager.

use crate::domain::types::{Candle, RequestPriority};
use crate::infrastructure::exchange::client::{canonical_symbol, wire_symbol};
use crate::infrastructure::exchange::request_manager::{
    ExchangeRequest, ExchangeResponse, RequestManager,
};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const RECONNECT_DELAY_SECS: u64 = 5;
const KEEP_ALIVE_SECS: u64 = 30;

/// Parsed inbound push events, fanned out to subscribers.
#[derive(Debug, Clone)]
pub enum PushEvent {
    Ticker {
        symbol: String,
        price: Decimal,
        timestamp: i64,
    },
    Kline {
        symbol: String,
        candle: Candle,
    },
    AccountUpdate {
        symbol: String,
        position_amt: Decimal,
        entry_price: Decimal,
        unrealized_pnl: Decimal,
    },
    OrderUpdate {
        order_id: String,
        symbol: String,
        status: String,
        executed_qty: Decimal,
        avg_price: Decimal,
        commission: Decimal,
        realized_pnl: Decimal,
    },
}

pub struct PushStreamManager {
    ws_url: String,
    demo_mode: bool,
    request_manager: Arc<RequestManager>,
    event_tx: broadcast::Sender<PushEvent>,
    subscriptions: Arc<RwLock<HashSet<String>>>,
    outgoing: Arc<RwLock<Option<mpsc::Sender<Message>>>>,
    listen_key: Arc<RwLock<Option<String>>>,
    task_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PushStreamManager {
    pub fn new(ws_url: String, demo_mode: bool, request_manager: Arc<RequestManager>) -> Self {
        let (event_tx, _) = broadcast::channel(1000);
        Self {
            ws_url,
            demo_mode,
            request_manager,
            event_tx,
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
            outgoing: Arc::new(RwLock::new(None)),
            listen_key: Arc::new(RwLock::new(None)),
            task_handle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.event_tx.subscribe()
    }

    /// Start the connection loop. Idempotent.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut handle_guard = self.task_handle.lock().await;
        if handle_guard.is_some() {
            return Ok(());
        }

        // Obtain a listen key before the first connect; the stream carries
        // account and order events only when it is attached.
        match self
            .request_manager
            .submit(ExchangeRequest::CreateListenKey, RequestPriority::High)
            .await
        {
            Ok(ExchangeResponse::ListenKey(key)) => {
                *self.listen_key.write().await = Some(key);
            }
            Ok(other) => {
                warn!("PushStreamManager: Unexpected listen key response: {:?}", other);
            }
            Err(e) => {
                warn!(
                    "PushStreamManager: Could not create listen key ({}); market data only",
                    e
                );
            }
        }

        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            manager.run().await;
        });
        *handle_guard = Some(handle);
        info!("PushStreamManager: Started");
        Ok(())
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.task_handle.lock().await.take() {
            handle.abort();
        }
        *self.outgoing.write().await = None;

        if let Some(key) = self.listen_key.write().await.take() {
            let _ = self
                .request_manager
                .submit(
                    ExchangeRequest::CloseListenKey { key },
                    RequestPriority::Low,
                )
                .await;
        }
        info!("PushStreamManager: Stopped");
    }

    /// Add a symbol to the ticker subscription set (canonical form).
    pub async fn subscribe_symbol(&self, symbol: &str) {
        let inserted = self.subscriptions.write().await.insert(symbol.to_string());
        if !inserted {
            return;
        }
        if let Some(tx) = self.outgoing.read().await.as_ref() {
            let _ = tx
                .send(Self::subscription_message(symbol, self.demo_mode, true))
                .await;
        }
        debug!("PushStreamManager: Subscribed {}", symbol);
    }

    pub async fn unsubscribe_symbol(&self, symbol: &str) {
        let removed = self.subscriptions.write().await.remove(symbol);
        if !removed {
            return;
        }
        if let Some(tx) = self.outgoing.read().await.as_ref() {
            let _ = tx
                .send(Self::subscription_message(symbol, self.demo_mode, false))
                .await;
        }
        debug!("PushStreamManager: Unsubscribed {}", symbol);
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    fn subscription_message(symbol: &str, demo_mode: bool, subscribe: bool) -> Message {
        let msg = serde_json::json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "reqType": if subscribe { "sub" } else { "unsub" },
            "dataType": format!("{}@ticker", wire_symbol(symbol, demo_mode)),
        });
        Message::Text(msg.to_string().into())
    }

    async fn run(self: Arc<Self>) {
        loop {
            match self.connect_and_stream().await {
                Ok(_) => {
                    info!("PushStreamManager: Connection closed, reconnecting");
                }
                Err(e) => {
                    error!(
                        "PushStreamManager: Stream error: {}. Reconnecting in {}s",
                        e, RECONNECT_DELAY_SECS
                    );
                }
            }
            *self.outgoing.write().await = None;
            tokio::time::sleep(tokio::time::Duration::from_secs(RECONNECT_DELAY_SECS)).await;
        }
    }

    async fn connect_and_stream(&self) -> Result<()> {
        let url = match self.listen_key.read().await.as_ref() {
            Some(key) => format!("{}?listenKey={}", self.ws_url, key),
            None => self.ws_url.clone(),
        };

        info!("PushStreamManager: Connecting to {}", self.ws_url);
        let (ws_stream, _) = connect_async(&url)
            .await
            .context("Failed to connect to exchange push stream")?;
        info!("PushStreamManager: Connected");

        let (mut write, mut read) = ws_stream.split();

        // Writer channel so subscriptions and pongs share one sink
        let (ws_tx, mut ws_rx) = mpsc::channel::<Message>(100);
        *self.outgoing.write().await = Some(ws_tx.clone());

        tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        // Resubscribe everything registered before this (re)connect
        {
            let subs = self.subscriptions.read().await;
            for symbol in subs.iter() {
                let _ = ws_tx
                    .send(Self::subscription_message(symbol, self.demo_mode, true))
                    .await;
            }
            if !subs.is_empty() {
                info!("PushStreamManager: Resubscribed {} symbols", subs.len());
            }
        }

        let mut keep_alive =
            tokio::time::interval(tokio::time::Duration::from_secs(KEEP_ALIVE_SECS));
        keep_alive.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = keep_alive.tick() => {
                    let _ = ws_tx.send(Message::Ping(vec![].into())).await;
                    if let Some(key) = self.listen_key.read().await.clone() {
                        let result = self
                            .request_manager
                            .submit(
                                ExchangeRequest::KeepAliveListenKey { key },
                                RequestPriority::Low,
                            )
                            .await;
                        if let Err(e) = result {
                            warn!("PushStreamManager: Listen key refresh failed: {}", e);
                        }
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_message(&text) {
                                debug!("PushStreamManager: Unhandled message: {}", e);
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = ws_tx.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("PushStreamManager: Closed by server: {:?}", frame);
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(anyhow::anyhow!("read error: {}", e));
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    fn handle_message(&self, text: &str) -> Result<()> {
        #[derive(Debug, Deserialize)]
        struct Envelope {
            #[serde(rename = "e")]
            event_type: Option<String>,
            #[serde(flatten)]
            rest: serde_json::Value,
        }

        let envelope: Envelope = serde_json::from_str(text)?;
        let Some(event_type) = envelope.event_type else {
            // Subscription acknowledgements have no event type
            return Ok(());
        };

        match event_type.as_str() {
            "24hrTicker" => self.handle_ticker(&envelope.rest),
            "kline" => self.handle_kline(&envelope.rest),
            "ACCOUNT_UPDATE" => self.handle_account_update(&envelope.rest),
            "ORDER_TRADE_UPDATE" => self.handle_order_update(&envelope.rest),
            // trade / depthUpdate carry nothing the engine consumes
            "trade" | "depthUpdate" => Ok(()),
            other => {
                debug!("PushStreamManager: Ignoring event type {}", other);
                Ok(())
            }
        }
    }

    fn handle_ticker(&self, data: &serde_json::Value) -> Result<()> {
        #[derive(Debug, Deserialize)]
        struct TickerData {
            #[serde(rename = "s")]
            symbol: String,
            #[serde(rename = "c")]
            last_price: String,
            #[serde(rename = "E", default)]
            event_time: i64,
        }

        let ticker: TickerData = serde_json::from_value(data.clone())?;
        let price: Decimal = ticker.last_price.parse().unwrap_or(Decimal::ZERO);
        if price <= Decimal::ZERO {
            return Ok(());
        }

        let _ = self.event_tx.send(PushEvent::Ticker {
            symbol: canonical_symbol(&ticker.symbol, self.demo_mode),
            price,
            timestamp: if ticker.event_time > 0 {
                ticker.event_time
            } else {
                chrono::Utc::now().timestamp_millis()
            },
        });
        Ok(())
    }

    fn handle_kline(&self, data: &serde_json::Value) -> Result<()> {
        #[derive(Debug, Deserialize)]
        struct KlineInner {
            #[serde(rename = "t")]
            open_time: i64,
            #[serde(rename = "o")]
            open: String,
            #[serde(rename = "h")]
            high: String,
            #[serde(rename = "l")]
            low: String,
            #[serde(rename = "c")]
            close: String,
            #[serde(rename = "v")]
            volume: String,
        }

        #[derive(Debug, Deserialize)]
        struct KlineData {
            #[serde(rename = "s")]
            symbol: String,
            #[serde(rename = "k")]
            kline: KlineInner,
        }

        let data: KlineData = serde_json::from_value(data.clone())?;
        let parse = |s: &str| s.parse::<Decimal>().unwrap_or(Decimal::ZERO);

        let _ = self.event_tx.send(PushEvent::Kline {
            symbol: canonical_symbol(&data.symbol, self.demo_mode),
            candle: Candle {
                timestamp: data.kline.open_time,
                open: parse(&data.kline.open),
                high: parse(&data.kline.high),
                low: parse(&data.kline.low),
                close: parse(&data.kline.close),
                volume: parse(&data.kline.volume),
            },
        });
        Ok(())
    }

    fn handle_account_update(&self, data: &serde_json::Value) -> Result<()> {
        #[derive(Debug, Deserialize)]
        struct PositionData {
            #[serde(rename = "s")]
            symbol: String,
            #[serde(rename = "pa")]
            position_amt: String,
            #[serde(rename = "ep", default)]
            entry_price: String,
            #[serde(rename = "up", default)]
            unrealized_pnl: String,
        }

        #[derive(Debug, Deserialize)]
        struct AccountData {
            #[serde(rename = "P", default)]
            positions: Vec<PositionData>,
        }

        #[derive(Debug, Deserialize)]
        struct AccountUpdate {
            #[serde(rename = "a")]
            account: AccountData,
        }

        let update: AccountUpdate = serde_json::from_value(data.clone())?;
        let parse = |s: &str| s.parse::<Decimal>().unwrap_or(Decimal::ZERO);

        for position in update.account.positions {
            let _ = self.event_tx.send(PushEvent::AccountUpdate {
                symbol: canonical_symbol(&position.symbol, self.demo_mode),
                position_amt: parse(&position.position_amt),
                entry_price: parse(&position.entry_price),
                unrealized_pnl: parse(&position.unrealized_pnl),
            });
        }
        Ok(())
    }

    fn handle_order_update(&self, data: &serde_json::Value) -> Result<()> {
        #[derive(Debug, Deserialize)]
        struct OrderData {
            #[serde(rename = "i")]
            order_id: serde_json::Value,
            #[serde(rename = "s")]
            symbol: String,
            #[serde(rename = "X", default)]
            status: String,
            #[serde(rename = "z", default)]
            executed_qty: String,
            #[serde(rename = "ap", default)]
            avg_price: String,
            #[serde(rename = "n", default)]
            commission: String,
            #[serde(rename = "rp", default)]
            realized_pnl: String,
        }

        #[derive(Debug, Deserialize)]
        struct OrderUpdate {
            #[serde(rename = "o")]
            order: OrderData,
        }

        let update: OrderUpdate = serde_json::from_value(data.clone())?;
        let parse = |s: &str| s.parse::<Decimal>().unwrap_or(Decimal::ZERO);

        let order_id = match &update.order.order_id {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return Ok(()),
        };

        let _ = self.event_tx.send(PushEvent::OrderUpdate {
            order_id,
            symbol: canonical_symbol(&update.order.symbol, self.demo_mode),
            status: update.order.status,
            executed_qty: parse(&update.order.executed_qty),
            avg_price: parse(&update.order.avg_price),
            commission: parse(&update.order.commission),
            realized_pnl: parse(&update.order.realized_pnl),
        });
        Ok(())
    }
}
