//! Signal Generator
//!
//! Deterministic scoring of a candle window into a directional signal.
//! Buy-side contributions: RSI at/below oversold (+30), bullish MA
//! crossover within the last candles (+35), price above both MAs (+25),
//! and a volume spike alongside either of the first two (+10). Sell-side
//! contributions mirror these. The action is the side whose strength
//! clears the configured minimum and strictly beats the other side.

use crate::application::signal::indicators::IndicatorSeries;
use crate::config::SignalParams;
use crate::domain::types::{
    Candle, IndicatorSnapshot, SignalAction, SignalConditions, TradingSignal,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub const MIN_CANDLES: usize = 50;

const RSI_POINTS: f64 = 30.0;
const CROSSOVER_POINTS: f64 = 35.0;
const TREND_POINTS: f64 = 25.0;
const VOLUME_POINTS: f64 = 10.0;

const MEMO_CAPACITY: usize = 256;

type MemoKey = (String, i64, usize);

struct IndicatorMemo {
    entries: HashMap<MemoKey, IndicatorSeries>,
    order: VecDeque<MemoKey>,
}

impl IndicatorMemo {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &MemoKey) -> Option<IndicatorSeries> {
        let series = self.entries.get(key).cloned()?;
        // Touch: move to the back of the eviction order
        self.order.retain(|k| k != key);
        self.order.push_back(key.clone());
        Some(series)
    }

    fn insert(&mut self, key: MemoKey, series: IndicatorSeries) {
        if self.entries.len() >= MEMO_CAPACITY
            && !self.entries.contains_key(&key)
            && let Some(evicted) = self.order.pop_front()
        {
            self.entries.remove(&evicted);
        }
        self.order.retain(|k| k != &key);
        self.order.push_back(key.clone());
        self.entries.insert(key, series);
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct SignalGenerator {
    params: Mutex<SignalParams>,
    /// Indicator memo keyed by (symbol, last candle timestamp, count);
    /// cleared whenever parameters change.
    memo: Mutex<IndicatorMemo>,
}

impl SignalGenerator {
    pub fn new(params: SignalParams) -> Self {
        Self {
            params: Mutex::new(params),
            memo: Mutex::new(IndicatorMemo::new()),
        }
    }

    pub fn set_params(&self, params: SignalParams) {
        let mut current = self.params.lock().expect("signal params lock poisoned");
        if *current != params {
            *current = params;
            self.memo.lock().expect("signal memo lock poisoned").clear();
        }
    }

    pub fn params(&self) -> SignalParams {
        self.params.lock().expect("signal params lock poisoned").clone()
    }

    #[cfg(test)]
    pub(crate) fn memo_len(&self) -> usize {
        self.memo.lock().unwrap().len()
    }

    /// Evaluate a candle window into a signal. Never fails: degraded or
    /// insufficient input yields a HOLD with an explanatory reason.
    pub fn evaluate(&self, symbol: &str, candles: &[Candle]) -> TradingSignal {
        let params = self.params();
        let timestamp = candles.last().map(|c| c.timestamp).unwrap_or(0);

        if candles.len() < MIN_CANDLES {
            return TradingSignal {
                symbol: symbol.to_string(),
                action: SignalAction::Hold,
                strength: 0.0,
                reason: "Insufficient historical data".to_string(),
                indicators: IndicatorSnapshot {
                    price: candles
                        .last()
                        .and_then(|c| rust_decimal::prelude::ToPrimitive::to_f64(&c.close))
                        .unwrap_or(0.0),
                    ma1: 0.0,
                    ma2: 0.0,
                    rsi: 50.0,
                    volume: 0.0,
                    avg_volume: 0.0,
                },
                conditions: SignalConditions::default(),
                timestamp,
            };
        }

        let series = self.indicators_for(symbol, candles, &params);

        let (bullish_cross, bearish_cross) = series.crossover();
        let price = series.price;
        let ma1 = series.ma1();
        let ma2 = series.ma2();

        let buy_rsi = series.rsi <= params.rsi_oversold;
        let sell_rsi = series.rsi >= params.rsi_overbought;
        let bullish_trend = price > ma1 && ma1 > ma2;
        let bearish_trend = price < ma1 && ma1 < ma2;
        let volume_spike = series.volume_spike(params.volume_spike_threshold);

        let mut buy_strength = 0.0;
        let mut buy_reasons: Vec<String> = Vec::new();
        if buy_rsi {
            buy_strength += RSI_POINTS;
            buy_reasons.push(format!("RSI oversold ({:.1})", series.rsi));
        }
        if bullish_cross {
            buy_strength += CROSSOVER_POINTS;
            buy_reasons.push("Bullish MA crossover".to_string());
        }
        if bullish_trend {
            buy_strength += TREND_POINTS;
            buy_reasons.push("Uptrend alignment".to_string());
        }
        if volume_spike && (buy_rsi || bullish_cross) {
            buy_strength += VOLUME_POINTS;
            buy_reasons.push(format!(
                "Volume spike {:.1}x",
                series.volume / series.avg_volume.max(f64::MIN_POSITIVE)
            ));
        }

        let mut sell_strength = 0.0;
        let mut sell_reasons: Vec<String> = Vec::new();
        if sell_rsi {
            sell_strength += RSI_POINTS;
            sell_reasons.push(format!("RSI overbought ({:.1})", series.rsi));
        }
        if bearish_cross {
            sell_strength += CROSSOVER_POINTS;
            sell_reasons.push("Bearish MA crossover".to_string());
        }
        if bearish_trend {
            sell_strength += TREND_POINTS;
            sell_reasons.push("Downtrend alignment".to_string());
        }
        if volume_spike && (sell_rsi || bearish_cross) {
            sell_strength += VOLUME_POINTS;
            sell_reasons.push(format!(
                "Volume spike {:.1}x",
                series.volume / series.avg_volume.max(f64::MIN_POSITIVE)
            ));
        }

        let min = params.min_signal_strength;
        let (mut action, mut strength, mut reason) =
            if buy_strength >= min && buy_strength > sell_strength {
                (SignalAction::Buy, buy_strength, buy_reasons.join("; "))
            } else if sell_strength >= min && sell_strength > buy_strength {
                (SignalAction::Sell, sell_strength, sell_reasons.join("; "))
            } else {
                let strongest = buy_strength.max(sell_strength);
                (
                    SignalAction::Hold,
                    strongest,
                    format!(
                        "No side clears minimum strength {:.0} (buy {:.0}, sell {:.0})",
                        min, buy_strength, sell_strength
                    ),
                )
            };

        let conditions = match action {
            SignalAction::Buy => SignalConditions {
                ma_crossover: bullish_cross,
                bullish_crossover: bullish_cross,
                rsi_signal: buy_rsi,
                volume_confirmation: volume_spike,
                trend_alignment: bullish_trend,
            },
            SignalAction::Sell => SignalConditions {
                ma_crossover: bearish_cross,
                bullish_crossover: false,
                rsi_signal: sell_rsi,
                volume_confirmation: volume_spike,
                trend_alignment: bearish_trend,
            },
            SignalAction::Hold => SignalConditions {
                ma_crossover: bullish_cross || bearish_cross,
                bullish_crossover: bullish_cross,
                rsi_signal: buy_rsi || sell_rsi,
                volume_confirmation: volume_spike,
                trend_alignment: bullish_trend || bearish_trend,
            },
        };

        if params.confirmation_required
            && action != SignalAction::Hold
            && conditions.confirmation_count() < 2
        {
            action = SignalAction::Hold;
            reason = "Insufficient confirmations".to_string();
            strength = buy_strength.max(sell_strength);
        }

        TradingSignal {
            symbol: symbol.to_string(),
            action,
            strength: strength.min(100.0),
            reason,
            indicators: IndicatorSnapshot {
                price,
                ma1,
                ma2,
                rsi: series.rsi,
                volume: series.volume,
                avg_volume: series.avg_volume,
            },
            conditions,
            timestamp,
        }
    }

    fn indicators_for(
        &self,
        symbol: &str,
        candles: &[Candle],
        params: &SignalParams,
    ) -> IndicatorSeries {
        let key: MemoKey = (
            symbol.to_string(),
            candles.last().map(|c| c.timestamp).unwrap_or(0),
            candles.len(),
        );

        let mut memo = self.memo.lock().expect("signal memo lock poisoned");
        if let Some(series) = memo.get(&key) {
            return series;
        }

        let series = IndicatorSeries::compute(candles, params);
        memo.insert(key, series.clone());
        series
    }
}
