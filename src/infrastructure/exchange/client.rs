//! BingX Perpetual Swap REST Client
//!
//! Implements the `ExchangeApi` port against the BingX swap API:
//! - Market data (contracts, ticker, klines)
//! - Account state (positions, balance)
//! - Order placement and cancellation
//! - Listen-key lifecycle for the user data stream
//! - HMAC-SHA256 request signing
//!
//! Demo mode rewrites the quote suffix (-USDT -> -VST) on all outbound
//! symbol fields and reverses it on responses.

use crate::config::ExchangeConfig;
use crate::domain::errors::ExchangeError;
use crate::domain::ports::ExchangeApi;
use crate::domain::types::{
    Balance, Candle, OrderRequest, PlacedOrder, Position, PositionSide, SymbolMeta, Ticker,
};
use crate::infrastructure::exchange::http::{HttpClientFactory, build_url_with_query};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::{debug, info, warn};

const DEMO_QUOTE_SUFFIX: &str = "-VST";
const LIVE_QUOTE_SUFFIX: &str = "-USDT";

/// BingX error codes treated as rate limiting.
const RATE_LIMIT_CODES: [i64; 2] = [109400, 100410];

/// Rewrite a canonical symbol for the wire: demo mode substitutes the
/// quote suffix (-USDT -> -VST).
pub fn wire_symbol(symbol: &str, demo_mode: bool) -> String {
    if demo_mode && symbol.ends_with(LIVE_QUOTE_SUFFIX) {
        format!(
            "{}{}",
            symbol.trim_end_matches(LIVE_QUOTE_SUFFIX),
            DEMO_QUOTE_SUFFIX
        )
    } else {
        symbol.to_string()
    }
}

/// Reverse of [`wire_symbol`].
pub fn canonical_symbol(symbol: &str, demo_mode: bool) -> String {
    if demo_mode && symbol.ends_with(DEMO_QUOTE_SUFFIX) {
        format!(
            "{}{}",
            symbol.trim_end_matches(DEMO_QUOTE_SUFFIX),
            LIVE_QUOTE_SUFFIX
        )
    } else {
        symbol.to_string()
    }
}

pub struct BingxClient {
    client: ClientWithMiddleware,
    api_key: String,
    api_secret: String,
    base_url: String,
    demo_mode: bool,
}

impl BingxClient {
    pub fn new(config: &ExchangeConfig) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            api_key: config.api_key.clone(),
            api_secret: config.secret_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            demo_mode: config.demo_mode,
        }
    }

    /// Generate HMAC-SHA256 signature over the query string.
    fn sign_request(&self, query_string: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;

        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        let result = mac.finalize();
        hex::encode(result.into_bytes())
    }

    /// Sorted-key query string with `timestamp`, plus trailing signature.
    fn signed_query(&self, mut params: Vec<(String, String)>) -> String {
        params.push((
            "timestamp".to_string(),
            chrono::Utc::now().timestamp_millis().to_string(),
        ));
        params.sort_by(|a, b| a.0.cmp(&b.0));

        let query_string: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let signature = self.sign_request(&query_string);
        format!("{}&signature={}", query_string, signature)
    }

    /// Quote suffix rewrite for the demo (paper) environment.
    fn to_wire_symbol(&self, symbol: &str) -> String {
        wire_symbol(symbol, self.demo_mode)
    }

    fn from_wire_symbol(&self, symbol: &str) -> String {
        canonical_symbol(symbol, self.demo_mode)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
        signed: bool,
    ) -> Result<T, ExchangeError> {
        let url = if signed {
            let owned: Vec<(String, String)> = params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            format!("{}{}?{}", self.base_url, path, self.signed_query(owned))
        } else {
            build_url_with_query(&format!("{}{}", self.base_url, path), params)
        };

        let response = self
            .client
            .get(&url)
            .header("X-BX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(classify_transport_error)?;

        parse_response(response).await
    }

    async fn send_signed<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        params: Vec<(String, String)>,
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}?{}", self.base_url, path, self.signed_query(params));

        let response = self
            .client
            .request(method, &url)
            .header("X-BX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(classify_transport_error)?;

        parse_response(response).await
    }
}

/// Envelope every BingX response is wrapped in.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

fn classify_transport_error(err: reqwest_middleware::Error) -> ExchangeError {
    match &err {
        reqwest_middleware::Error::Reqwest(inner) if inner.is_timeout() => ExchangeError::Timeout {
            duration_ms: 10_000,
        },
        _ => ExchangeError::Network {
            reason: err.to_string(),
        },
    }
}

async fn parse_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ExchangeError> {
    let status = response.status();

    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        return Err(ExchangeError::RateLimited {
            retry_after_secs: retry_after,
        });
    }

    let body = response.text().await.map_err(|e| ExchangeError::Network {
        reason: format!("failed to read response body: {}", e),
    })?;

    if !status.is_success() {
        return Err(ExchangeError::Api {
            code: status.as_u16() as i64,
            message: body,
        });
    }

    let envelope: ApiEnvelope<T> =
        serde_json::from_str(&body).map_err(|e| ExchangeError::Validation {
            reason: format!("malformed exchange response: {} ({})", e, truncate(&body)),
        })?;

    if envelope.code != 0 {
        if RATE_LIMIT_CODES.contains(&envelope.code) {
            return Err(ExchangeError::RateLimited {
                retry_after_secs: None,
            });
        }
        return Err(ExchangeError::Api {
            code: envelope.code,
            message: envelope.msg,
        });
    }

    envelope.data.ok_or_else(|| ExchangeError::Validation {
        reason: "exchange response missing data field".to_string(),
    })
}

fn truncate(s: &str) -> &str {
    if s.len() <= 200 {
        return s;
    }
    let mut end = 200;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn parse_decimal(raw: &str) -> Decimal {
    raw.parse::<Decimal>().unwrap_or(Decimal::ZERO)
}

#[async_trait]
impl ExchangeApi for BingxClient {
    async fn get_symbols(&self) -> Result<Vec<SymbolMeta>, ExchangeError> {
        #[derive(Debug, Deserialize)]
        struct Contract {
            symbol: String,
            asset: String,
            status: i32,
            #[serde(rename = "pricePrecision")]
            price_precision: u32,
            #[serde(rename = "quantityPrecision")]
            quantity_precision: u32,
        }

        let contracts: Vec<Contract> = self
            .get_json("/openApi/swap/v2/quote/contracts", &[], false)
            .await?;

        let symbols = contracts
            .into_iter()
            .map(|c| {
                let symbol = self.from_wire_symbol(&c.symbol);
                SymbolMeta {
                    display_name: symbol.replace('-', "/"),
                    symbol,
                    asset: c.asset,
                    status: c.status,
                    price_precision: c.price_precision,
                    quantity_precision: c.quantity_precision,
                }
            })
            .collect::<Vec<_>>();

        info!("BingxClient: Fetched {} contracts", symbols.len());
        Ok(symbols)
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        #[derive(Debug, Deserialize)]
        struct TickerData {
            symbol: String,
            #[serde(rename = "lastPrice")]
            last_price: String,
            #[serde(default)]
            volume: String,
            #[serde(default)]
            time: i64,
        }

        let wire_symbol = self.to_wire_symbol(symbol);
        let data: TickerData = self
            .get_json(
                "/openApi/swap/v2/quote/ticker",
                &[("symbol", wire_symbol.as_str())],
                false,
            )
            .await?;

        let last_price = parse_decimal(&data.last_price);
        if last_price <= Decimal::ZERO {
            return Err(ExchangeError::Validation {
                reason: format!("non-positive ticker price for {}", symbol),
            });
        }

        Ok(Ticker {
            symbol: self.from_wire_symbol(&data.symbol),
            last_price,
            volume_24h: parse_decimal(&data.volume),
            timestamp: if data.time > 0 {
                data.time
            } else {
                chrono::Utc::now().timestamp_millis()
            },
        })
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        #[derive(Debug, Deserialize)]
        struct KlineData {
            open: String,
            high: String,
            low: String,
            close: String,
            volume: String,
            time: i64,
        }

        let wire_symbol = self.to_wire_symbol(symbol);
        let limit_str = limit.to_string();
        let mut klines: Vec<KlineData> = self
            .get_json(
                "/openApi/swap/v3/quote/klines",
                &[
                    ("symbol", wire_symbol.as_str()),
                    ("interval", interval),
                    ("limit", limit_str.as_str()),
                ],
                false,
            )
            .await?;

        // The API returns newest-first; candles flow oldest-first internally
        klines.sort_by_key(|k| k.time);

        let candles: Vec<Candle> = klines
            .into_iter()
            .map(|k| Candle {
                timestamp: k.time,
                open: parse_decimal(&k.open),
                high: parse_decimal(&k.high),
                low: parse_decimal(&k.low),
                close: parse_decimal(&k.close),
                volume: parse_decimal(&k.volume),
            })
            .collect();

        debug!(
            "BingxClient: Fetched {} klines for {} ({})",
            candles.len(),
            symbol,
            interval
        );
        Ok(candles)
    }

    async fn get_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        #[derive(Debug, Deserialize)]
        struct PositionData {
            symbol: String,
            #[serde(rename = "positionSide")]
            position_side: String,
            #[serde(rename = "avgPrice")]
            avg_price: String,
            #[serde(rename = "positionAmt")]
            position_amt: String,
            #[serde(rename = "unrealizedProfit")]
            unrealized_profit: String,
            #[serde(rename = "positionId", default)]
            position_id: String,
        }

        let data: Vec<PositionData> = self
            .send_signed(
                reqwest::Method::GET,
                "/openApi/swap/v2/user/positions",
                vec![],
            )
            .await?;

        let positions = data
            .into_iter()
            .filter_map(|p| {
                let quantity = parse_decimal(&p.position_amt).abs();
                if quantity.is_zero() {
                    return None;
                }
                let side = match p.position_side.as_str() {
                    "LONG" => PositionSide::Long,
                    "SHORT" => PositionSide::Short,
                    other => {
                        warn!("BingxClient: Unknown position side '{}', skipping", other);
                        return None;
                    }
                };
                Some(Position {
                    symbol: self.from_wire_symbol(&p.symbol),
                    side,
                    entry_price: parse_decimal(&p.avg_price),
                    quantity,
                    unrealized_pnl: parse_decimal(&p.unrealized_profit),
                    order_id: p.position_id,
                })
            })
            .collect();

        Ok(positions)
    }

    async fn get_balance(&self) -> Result<Vec<Balance>, ExchangeError> {
        #[derive(Debug, Deserialize)]
        struct BalanceData {
            asset: String,
            balance: String,
            #[serde(rename = "availableMargin")]
            available_margin: String,
        }

        #[derive(Debug, Deserialize)]
        struct BalanceEnvelope {
            balance: BalanceData,
        }

        let data: BalanceEnvelope = self
            .send_signed(
                reqwest::Method::GET,
                "/openApi/swap/v2/user/balance",
                vec![],
            )
            .await?;

        Ok(vec![Balance {
            asset: data.balance.asset,
            balance: parse_decimal(&data.balance.balance),
            available: parse_decimal(&data.balance.available_margin),
        }])
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<PlacedOrder, ExchangeError> {
        if order.quantity <= Decimal::ZERO {
            return Err(ExchangeError::Validation {
                reason: "order quantity must be positive".to_string(),
            });
        }

        let mut params: Vec<(String, String)> = vec![
            ("symbol".to_string(), self.to_wire_symbol(&order.symbol)),
            ("side".to_string(), order.side.to_string()),
            ("positionSide".to_string(), order.position_side.to_string()),
            ("type".to_string(), order.order_type.to_string()),
            ("quantity".to_string(), order.quantity.to_string()),
        ];

        if let Some(price) = order.price {
            params.push(("price".to_string(), price.to_string()));
        }
        if let Some(stop_loss) = order.stop_loss {
            params.push(("stopLoss".to_string(), stop_loss.to_string()));
        }
        if let Some(take_profit) = order.take_profit {
            params.push(("takeProfit".to_string(), take_profit.to_string()));
        }

        #[derive(Debug, Deserialize)]
        struct OrderData {
            #[serde(rename = "orderId")]
            order_id: serde_json::Value,
            #[serde(default)]
            status: String,
        }

        #[derive(Debug, Deserialize)]
        struct OrderEnvelope {
            order: OrderData,
        }

        let data: OrderEnvelope = self
            .send_signed(reqwest::Method::POST, "/openApi/swap/v2/trade/order", params)
            .await?;

        let order_id = match &data.order.order_id {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(ExchangeError::Validation {
                    reason: format!("unexpected orderId type: {}", other),
                });
            }
        };

        info!(
            "BingxClient: Order placed {} {} {} qty={} -> id {}",
            order.symbol, order.side, order.position_side, order.quantity, order_id
        );

        Ok(PlacedOrder {
            order_id,
            symbol: order.symbol.clone(),
            status: if data.order.status.is_empty() {
                "NEW".to_string()
            } else {
                data.order.status
            },
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        let params = vec![
            ("symbol".to_string(), self.to_wire_symbol(symbol)),
            ("orderId".to_string(), order_id.to_string()),
        ];

        let _: serde_json::Value = self
            .send_signed(
                reqwest::Method::DELETE,
                "/openApi/swap/v2/trade/order",
                params,
            )
            .await?;

        info!("BingxClient: Cancelled order {} on {}", order_id, symbol);
        Ok(())
    }

    async fn create_listen_key(&self) -> Result<String, ExchangeError> {
        #[derive(Debug, Deserialize)]
        struct ListenKeyData {
            #[serde(rename = "listenKey")]
            listen_key: String,
        }

        let data: ListenKeyData = self
            .send_signed(
                reqwest::Method::POST,
                "/openApi/user/auth/userDataStream",
                vec![],
            )
            .await?;

        Ok(data.listen_key)
    }

    async fn keep_alive_listen_key(&self, key: &str) -> Result<(), ExchangeError> {
        let params = vec![("listenKey".to_string(), key.to_string())];
        let _: serde_json::Value = self
            .send_signed(
                reqwest::Method::PUT,
                "/openApi/user/auth/userDataStream",
                params,
            )
            .await?;
        Ok(())
    }

    async fn close_listen_key(&self, key: &str) -> Result<(), ExchangeError> {
        let params = vec![("listenKey".to_string(), key.to_string())];
        let _: serde_json::Value = self
            .send_signed(
                reqwest::Method::DELETE,
                "/openApi/user/auth/userDataStream",
                params,
            )
            .await?;
        Ok(())
    }
}
