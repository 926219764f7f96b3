use analysis_core::{round1, DailyBar, PillarScore};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::indicators::*;

pub const RSI_PERIOD: usize = 14;
/// Below this many closes nothing is computed
pub const MIN_CLOSES: usize = 20;
/// Below this many closes the score is capped
pub const FULL_HISTORY_CLOSES: usize = 200;
pub const LIMITED_HISTORY_CAP: f64 = 55.0;

const RSI_WEIGHT: f64 = 0.40;
const TREND_WEIGHT: f64 = 0.35;
const MOMENTUM_WEIGHT: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsiBand {
    Oversold,
    Healthy,
    Overbought,
}

impl RsiBand {
    pub fn classify(rsi: f64) -> Self {
        if rsi < 30.0 {
            RsiBand::Oversold
        } else if rsi > 70.0 {
            RsiBand::Overbought
        } else {
            RsiBand::Healthy
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            RsiBand::Oversold => 75.0,
            RsiBand::Healthy => 60.0,
            RsiBand::Overbought => 35.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendBand {
    Bullish,
    Bearish,
    Unavailable,
}

impl TrendBand {
    pub fn classify(sma_50: Option<f64>, sma_200: Option<f64>) -> Self {
        match (sma_50, sma_200) {
            (Some(fast), Some(slow)) if fast > slow => TrendBand::Bullish,
            (Some(_), Some(_)) => TrendBand::Bearish,
            _ => TrendBand::Unavailable,
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            TrendBand::Bullish => 75.0,
            TrendBand::Bearish => 35.0,
            TrendBand::Unavailable => 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MomentumBand {
    Positive,
    Negative,
    Unavailable,
}

impl MomentumBand {
    pub fn classify(close: f64, sma_20: Option<f64>) -> Self {
        match sma_20 {
            Some(avg) if close > avg => MomentumBand::Positive,
            Some(_) => MomentumBand::Negative,
            None => MomentumBand::Unavailable,
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            MomentumBand::Positive => 65.0,
            MomentumBand::Negative => 45.0,
            MomentumBand::Unavailable => 50.0,
        }
    }
}

/// Bands behind a technical pillar score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TechnicalBands {
    pub rsi: RsiBand,
    pub trend: TrendBand,
    pub momentum: MomentumBand,
}

impl TechnicalBands {
    /// Rebuild the bands from the raw indicators recorded in `data_used`.
    /// `None` when the pillar never got far enough to compute them.
    pub fn from_data_used(data_used: &Value) -> Option<Self> {
        let read = |key: &str| data_used.get(key).and_then(Value::as_f64);
        // Averages are recorded as 0 when unavailable
        let avg = |key: &str| read(key).filter(|v| *v > 0.0);

        let rsi = read("rsi")?;
        let close = read("lastClose")?;
        Some(Self {
            rsi: RsiBand::classify(rsi),
            trend: TrendBand::classify(avg("sma50"), avg("sma200")),
            momentum: MomentumBand::classify(close, avg("sma20")),
        })
    }
}

pub struct TechnicalAnalysisEngine;

impl TechnicalAnalysisEngine {
    pub fn new() -> Self {
        Self
    }

    /// Score a raw daily series. Bars may arrive in any order.
    pub fn score(&self, bars: &[DailyBar]) -> PillarScore {
        let mut sorted: Vec<&DailyBar> = bars.iter().collect();
        sorted.sort_by_key(|b| b.date);
        let closes: Vec<f64> = sorted
            .iter()
            .map(|b| b.effective_close())
            .filter(|c| c.is_finite())
            .collect();

        let (Some(rsi), Some(&last_close)) = (
            rsi_latest(&closes, RSI_PERIOD).filter(|_| closes.len() >= MIN_CLOSES),
            closes.last(),
        ) else {
            return PillarScore::neutral(
                json!({ "pricesUsed": closes.len() }),
                vec![format!(
                    "Insufficient price history ({} closes, need {}); using neutral score",
                    closes.len(),
                    MIN_CLOSES
                )],
            );
        };

        let sma_20 = latest_sma(&closes, 20);
        let sma_50 = latest_sma(&closes, 50);
        let sma_200 = latest_sma(&closes, 200);
        let limited_history = closes.len() < FULL_HISTORY_CLOSES;

        let bands = TechnicalBands {
            rsi: RsiBand::classify(rsi),
            trend: TrendBand::classify(sma_50, sma_200),
            momentum: MomentumBand::classify(last_close, sma_20),
        };

        let raw = round1(
            RSI_WEIGHT * bands.rsi.score()
                + TREND_WEIGHT * bands.trend.score()
                + MOMENTUM_WEIGHT * bands.momentum.score(),
        );
        let score = if limited_history {
            raw.min(LIMITED_HISTORY_CAP)
        } else {
            raw
        };

        let mut subscores = BTreeMap::new();
        subscores.insert("rsi".to_string(), Some(bands.rsi.score()));
        subscores.insert("trend".to_string(), Some(bands.trend.score()));
        subscores.insert("momentum".to_string(), Some(bands.momentum.score()));

        let data_used = json!({
            "rsi": rsi,
            "sma20": sma_20.unwrap_or(0.0),
            "sma50": sma_50.unwrap_or(0.0),
            "sma200": sma_200.unwrap_or(0.0),
            "lastClose": last_close,
            "pricesUsed": closes.len(),
            "limitedHistory": limited_history,
            "uncappedScore": raw,
        });

        let mut notes = vec![
            rsi_note(rsi, bands.rsi),
            trend_note(bands.trend),
            momentum_note(bands.momentum),
        ];
        if limited_history {
            notes.push(format!(
                "Limited history ({} closes, under {}); score capped at {}",
                closes.len(),
                FULL_HISTORY_CLOSES,
                LIMITED_HISTORY_CAP
            ));
        }

        PillarScore::new(score, subscores, data_used, notes)
    }
}

impl Default for TechnicalAnalysisEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn rsi_note(rsi: f64, band: RsiBand) -> String {
    match band {
        RsiBand::Oversold => format!("RSI(14) at {:.1} - oversold, rebound potential", rsi),
        RsiBand::Healthy => format!("RSI(14) at {:.1} - healthy range", rsi),
        RsiBand::Overbought => format!("RSI(14) at {:.1} - overbought, pullback risk", rsi),
    }
}

fn trend_note(band: TrendBand) -> String {
    match band {
        TrendBand::Bullish => "SMA50 above SMA200 - bullish trend",
        TrendBand::Bearish => "SMA50 below SMA200 - bearish trend",
        TrendBand::Unavailable => "Trend unavailable - SMA50/SMA200 need more history",
    }
    .to_string()
}

fn momentum_note(band: MomentumBand) -> String {
    match band {
        MomentumBand::Positive => "Close above SMA20 - positive short-term momentum",
        MomentumBand::Negative => "Close below SMA20 - weak short-term momentum",
        MomentumBand::Unavailable => "Momentum unavailable - SMA20 needs more history",
    }
    .to_string()
}
