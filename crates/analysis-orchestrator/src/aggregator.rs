use alpha_vantage_client::PROVIDER_NAME;
use analysis_core::{
    round1, AggregateResult, Contributions, DataSources, PillarScore, PillarScores, Verdict,
    WeightsPct,
};
use chrono::{DateTime, Utc};
use fundamental_analysis::{key_drivers, metric_bands};
use sentiment_analysis::PolarityBand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use technical_analysis::{MomentumBand, RsiBand, TechnicalBands, TrendBand, FULL_HISTORY_CLOSES};

/// Sentiment weight ceiling (percent) when the news pillar saw too few articles
pub const LOW_NEWS_SENTIMENT_CAP: f64 = 15.0;
pub const MAX_REASONS: usize = 6;

pub const FLAG_LOW_NEWS: &str = "lowNews";
pub const FLAG_LIMITED_HISTORY: &str = "limitedHistory";
pub const FLAG_API_ERROR: &str = "APIError";
pub const FLAG_FUNDAMENTALS_UNAVAILABLE: &str = "fundamentalsUnavailable";
pub const FLAG_TECHNICALS_UNAVAILABLE: &str = "technicalsUnavailable";
pub const FLAG_SENTIMENT_UNAVAILABLE: &str = "sentimentUnavailable";

/// Pillar weights as fractions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    pub technical: f64,
    pub fundamental: f64,
    pub sentiment: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            technical: 0.40,
            fundamental: 0.40,
            sentiment: 0.20,
        }
    }
}

impl WeightConfig {
    pub fn new(technical: f64, fundamental: f64, sentiment: f64) -> Self {
        Self {
            technical,
            fundamental,
            sentiment,
        }
    }

    /// Scale to sum to 1. Negative, non-finite or all-zero weights fall back
    /// to the defaults.
    pub fn normalized(&self) -> Self {
        let parts = [self.technical, self.fundamental, self.sentiment];
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
            tracing::warn!("Invalid pillar weights {:?}; using defaults", self);
            return Self::default();
        }
        let sum: f64 = parts.iter().sum();
        if sum <= 0.0 {
            tracing::warn!("Pillar weights sum to zero; using defaults");
            return Self::default();
        }
        Self::new(
            self.technical / sum,
            self.fundamental / sum,
            self.sentiment / sum,
        )
    }
}

/// Combine the three pillar scores into one recommendation. Pure: the same
/// inputs always give the same result.
pub fn aggregate(
    ticker: &str,
    scores: PillarScores,
    weights: &WeightConfig,
    requests: Vec<String>,
    as_of: DateTime<Utc>,
) -> AggregateResult {
    let mut flags = BTreeSet::new();

    if scores.fundamentals.is_none() {
        flags.insert(FLAG_FUNDAMENTALS_UNAVAILABLE.to_string());
    }
    if scores.technicals.is_none() {
        flags.insert(FLAG_TECHNICALS_UNAVAILABLE.to_string());
    }
    if scores.sentiment.is_none() {
        flags.insert(FLAG_SENTIMENT_UNAVAILABLE.to_string());
    }

    let low_news = scores
        .sentiment
        .as_ref()
        .is_some_and(|s| s.data_flag("lowNews"));
    let limited_history = scores.technicals.as_ref().is_some_and(|t| {
        t.data_flag("limitedHistory")
            || t.data_f64("pricesUsed")
                .is_some_and(|n| n < FULL_HISTORY_CLOSES as f64)
    });
    if low_news {
        flags.insert(FLAG_LOW_NEWS.to_string());
    }
    if limited_history {
        flags.insert(FLAG_LIMITED_HISTORY.to_string());
    }

    let mut pct = present_weights(&scores, &weights.normalized());
    let capped = low_news && apply_low_news_cap(&mut pct);

    let contribution =
        |pillar: &Option<PillarScore>, weight: f64| pillar.as_ref().map(|p| weight / 100.0 * p.score);
    let contributions = Contributions {
        technical: contribution(&scores.technicals, pct.technical),
        fundamental: contribution(&scores.fundamentals, pct.fundamental),
        sentiment: contribution(&scores.sentiment, pct.sentiment),
    };

    let present: Vec<f64> = [
        contributions.technical,
        contributions.fundamental,
        contributions.sentiment,
    ]
    .into_iter()
    .flatten()
    .collect();
    let aggregate_score = if present.is_empty() {
        flags.insert(FLAG_API_ERROR.to_string());
        None
    } else {
        Some(round1(present.iter().sum::<f64>()))
    };

    let mut reasons = pillar_reasons(&scores);
    if low_news {
        reasons.truncate(MAX_REASONS - 1);
        reasons.push(if capped {
            format!(
                "Low news volume; sentiment weight capped at {}%",
                LOW_NEWS_SENTIMENT_CAP
            )
        } else {
            "Low news volume; sentiment is less reliable".to_string()
        });
    } else {
        reasons.truncate(MAX_REASONS);
    }

    AggregateResult {
        ticker: ticker.to_string(),
        as_of,
        scores,
        aggregate_score,
        label: Verdict::from_score(aggregate_score),
        flags,
        weights: pct,
        contributions,
        reasons,
        data_sources: DataSources {
            provider: PROVIDER_NAME.to_string(),
            requests,
        },
    }
}

/// Configured weights in percent, with the share of missing pillars handed
/// pro rata to the ones that produced a score.
fn present_weights(scores: &PillarScores, weights: &WeightConfig) -> WeightsPct {
    let slots = [
        (scores.technicals.is_some(), weights.technical),
        (scores.fundamentals.is_some(), weights.fundamental),
        (scores.sentiment.is_some(), weights.sentiment),
    ];
    let present = slots.iter().filter(|(p, _)| *p).count();
    let active: f64 = slots.iter().filter(|(p, _)| *p).map(|(_, w)| w).sum();

    let share = |(is_present, weight): (bool, f64)| -> f64 {
        if present == 0 {
            weight * 100.0
        } else if !is_present {
            0.0
        } else if active > 0.0 {
            weight / active * 100.0
        } else {
            // Only zero-weighted pillars arrived
            100.0 / present as f64
        }
    };

    WeightsPct {
        technical: share(slots[0]),
        fundamental: share(slots[1]),
        sentiment: share(slots[2]),
    }
}

/// Clamp sentiment to the low-news ceiling and hand the spare weight to the
/// other pillars in proportion to their current weights. Returns whether the
/// cap changed anything.
fn apply_low_news_cap(pct: &mut WeightsPct) -> bool {
    if pct.sentiment <= LOW_NEWS_SENTIMENT_CAP {
        return false;
    }
    let others = pct.technical + pct.fundamental;
    if others <= 0.0 {
        return false;
    }
    let spare = pct.sentiment - LOW_NEWS_SENTIMENT_CAP;
    pct.technical += spare * pct.technical / others;
    pct.fundamental += spare * pct.fundamental / others;
    pct.sentiment = LOW_NEWS_SENTIMENT_CAP;
    true
}

fn pillar_reasons(scores: &PillarScores) -> Vec<String> {
    let mut reasons = Vec::new();
    if let Some(technicals) = &scores.technicals {
        reasons.extend(technical_reasons(technicals));
    }
    if let Some(fundamentals) = &scores.fundamentals {
        reasons.extend(fundamental_reasons(fundamentals));
    }
    if let Some(sentiment) = &scores.sentiment {
        if let Some(band) = PolarityBand::from_data_used(&sentiment.data_used) {
            reasons.push(format!("{} news sentiment", capitalize(band.describe())));
        }
    }
    reasons
}

fn technical_reasons(pillar: &PillarScore) -> Vec<String> {
    let Some(bands) = TechnicalBands::from_data_used(&pillar.data_used) else {
        return vec!["Not enough price history for technical signals".to_string()];
    };

    let rsi = match bands.rsi {
        RsiBand::Oversold => Some("RSI oversold"),
        RsiBand::Overbought => Some("RSI overbought"),
        RsiBand::Healthy => Some("RSI in healthy range"),
    };
    let trend = match bands.trend {
        TrendBand::Bullish => Some("SMA50 > SMA200 - bullish trend"),
        TrendBand::Bearish => Some("SMA50 < SMA200 - bearish trend"),
        TrendBand::Unavailable => None,
    };
    let momentum = match bands.momentum {
        MomentumBand::Positive => Some("Price above SMA20 - positive momentum"),
        MomentumBand::Negative => Some("Price below SMA20 - negative momentum"),
        MomentumBand::Unavailable => None,
    };

    [rsi, trend, momentum]
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect()
}

fn fundamental_reasons(pillar: &PillarScore) -> Vec<String> {
    let bands = metric_bands(&pillar.data_used);
    if bands.is_empty() {
        return vec!["No fundamental metrics reported".to_string()];
    }
    key_drivers(&bands)
        .into_iter()
        .take(2)
        .map(capitalize)
        .collect()
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
