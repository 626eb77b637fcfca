//! Indicator series feeding the signal generator.
//!
//! Thin layer over the `ta` crate: moving averages and RSI over the close
//! series, plus the rolling average volume. Missing values degrade to
//! neutral defaults (MA falls back to price, RSI to 50) so a price-only
//! candle stream still yields a weak signal instead of an error.

use crate::config::SignalParams;
use crate::domain::types::Candle;
use rust_decimal::prelude::ToPrimitive;
use ta::Next;
use ta::indicators::{RelativeStrengthIndex, SimpleMovingAverage};

/// How many candles back a crossover still counts as recent.
pub const CROSSOVER_LOOKBACK: usize = 3;

const VOLUME_AVG_PERIOD: usize = 20;

/// Computed indicator bundle for one candle window.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSeries {
    pub price: f64,
    /// Tail of the short MA series, oldest first (lookback + 1 values).
    pub ma1_tail: Vec<f64>,
    /// Tail of the long MA series, oldest first.
    pub ma2_tail: Vec<f64>,
    pub rsi: f64,
    pub volume: f64,
    pub avg_volume: f64,
}

impl IndicatorSeries {
    pub fn compute(candles: &[Candle], params: &SignalParams) -> Self {
        let closes: Vec<f64> = candles
            .iter()
            .map(|c| c.close.to_f64().unwrap_or(0.0))
            .collect();
        let volumes: Vec<f64> = candles
            .iter()
            .map(|c| c.volume.to_f64().unwrap_or(0.0))
            .collect();

        let price = closes.last().copied().unwrap_or(0.0);
        let tail_len = CROSSOVER_LOOKBACK + 1;

        let ma1_tail = sma_tail(&closes, params.ma1_period, tail_len)
            .unwrap_or_else(|| vec![price; tail_len]);
        let ma2_tail = sma_tail(&closes, params.ma2_period, tail_len)
            .unwrap_or_else(|| vec![price; tail_len]);
        let rsi = rsi_latest(&closes, params.rsi_period).unwrap_or(50.0);

        let volume = volumes.last().copied().unwrap_or(0.0);
        let avg_volume = rolling_average(&volumes, VOLUME_AVG_PERIOD).unwrap_or(volume);

        Self {
            price,
            ma1_tail,
            ma2_tail,
            rsi,
            volume,
            avg_volume,
        }
    }

    pub fn ma1(&self) -> f64 {
        self.ma1_tail.last().copied().unwrap_or(self.price)
    }

    pub fn ma2(&self) -> f64 {
        self.ma2_tail.last().copied().unwrap_or(self.price)
    }

    /// Crossover of the short MA over the long one within the lookback
    /// window: (bullish, bearish).
    pub fn crossover(&self) -> (bool, bool) {
        detect_crossover(&self.ma1_tail, &self.ma2_tail)
    }

    pub fn volume_spike(&self, threshold: f64) -> bool {
        self.avg_volume > 0.0 && self.volume >= threshold * self.avg_volume
    }
}

/// Last `tail_len` values of an SMA over `values`. `None` when the series
/// is too short or the period is degenerate.
fn sma_tail(values: &[f64], period: usize, tail_len: usize) -> Option<Vec<f64>> {
    if period == 0 || values.len() < period + tail_len - 1 {
        return None;
    }

    let mut sma = SimpleMovingAverage::new(period).ok()?;
    let series: Vec<f64> = values.iter().map(|v| sma.next(*v)).collect();
    let tail = series[series.len() - tail_len..].to_vec();
    if tail.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(tail)
}

fn rsi_latest(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() <= period {
        return None;
    }

    let mut rsi = RelativeStrengthIndex::new(period).ok()?;
    let mut latest = None;
    for close in closes {
        latest = Some(rsi.next(*close));
    }
    latest.filter(|v| v.is_finite())
}

fn rolling_average(values: &[f64], period: usize) -> Option<f64> {
    if values.is_empty() || period == 0 {
        return None;
    }
    let window = &values[values.len().saturating_sub(period)..];
    Some(window.iter().sum::<f64>() / window.len() as f64)
}

/// Short MA crossing the long MA anywhere in the tail window.
pub fn detect_crossover(ma1_tail: &[f64], ma2_tail: &[f64]) -> (bool, bool) {
    let len = ma1_tail.len().min(ma2_tail.len());
    let mut bullish = false;
    let mut bearish = false;

    for i in 1..len {
        let prev_diff = ma1_tail[i - 1] - ma2_tail[i - 1];
        let diff = ma1_tail[i] - ma2_tail[i];
        if prev_diff <= 0.0 && diff > 0.0 {
            bullish = true;
        }
        if prev_diff >= 0.0 && diff < 0.0 {
            bearish = true;
        }
    }

    (bullish, bearish)
}
