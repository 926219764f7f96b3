use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Company overview record. Every metric is optional: a field the provider
/// reports as "None" or "-" stays absent instead of defaulting to zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyOverview {
    pub symbol: String,
    pub name: Option<String>,
    /// Enterprise value over EBITDA (plain ratio)
    pub ev_to_ebitda: Option<f64>,
    /// Return on equity, trailing twelve months (fraction, 0.25 = 25%)
    pub return_on_equity_ttm: Option<f64>,
    /// Operating margin, trailing twelve months (fraction)
    pub operating_margin_ttm: Option<f64>,
    /// Quarterly revenue growth year over year (fraction)
    pub quarterly_revenue_growth_yoy: Option<f64>,
    /// Quarterly earnings growth year over year (fraction)
    pub quarterly_earnings_growth_yoy: Option<f64>,
    /// Forward dividend yield (fraction)
    pub dividend_yield: Option<f64>,
}

/// One trading day of the daily adjusted series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub adjusted_close: Option<f64>,
    pub volume: f64,
}

impl DailyBar {
    /// Split/dividend adjusted close when the provider supplies one.
    pub fn effective_close(&self) -> f64 {
        self.adjusted_close.unwrap_or(self.close)
    }
}

/// News article with its provider-assigned sentiment polarity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    /// Sentiment polarity in [-1, 1]
    pub polarity: f64,
}

/// Output of one pillar scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PillarScore {
    /// 0 to 100
    pub score: f64,
    pub subscores: BTreeMap<String, Option<f64>>,
    pub data_used: serde_json::Value,
    pub notes: Vec<String>,
}

impl PillarScore {
    pub fn new(
        score: f64,
        subscores: BTreeMap<String, Option<f64>>,
        data_used: serde_json::Value,
        notes: Vec<String>,
    ) -> Self {
        Self {
            score: clamp_score(score),
            subscores,
            data_used,
            notes,
        }
    }

    /// Neutral score used whenever a pillar has nothing to work with.
    pub fn neutral(data_used: serde_json::Value, notes: Vec<String>) -> Self {
        Self::new(NEUTRAL_SCORE, BTreeMap::new(), data_used, notes)
    }

    pub fn subscore(&self, key: &str) -> Option<f64> {
        self.subscores.get(key).copied().flatten()
    }

    /// Numeric entry of `data_used`, if present and not null.
    pub fn data_f64(&self, key: &str) -> Option<f64> {
        self.data_used.get(key).and_then(|v| v.as_f64())
    }

    pub fn data_flag(&self, key: &str) -> bool {
        self.data_used
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

pub const NEUTRAL_SCORE: f64 = 50.0;

/// Clamp to [0, 100]; NaN collapses to the neutral score.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        NEUTRAL_SCORE
    } else {
        score.clamp(0.0, 100.0)
    }
}

/// Round to one decimal place
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Final verdict attached to an aggregate score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "Strong Buy")]
    StrongBuy,
    Buy,
    Hold,
    Sell,
    #[serde(rename = "Strong Sell")]
    StrongSell,
    #[serde(rename = "Insufficient Data")]
    InsufficientData,
}

impl Verdict {
    /// Classify an aggregate score. Only the Strong Buy / Hold / Sell bands are
    /// produced by the default thresholds.
    pub fn from_score(score: Option<f64>) -> Self {
        match score {
            None => Verdict::InsufficientData,
            Some(s) if s >= 70.0 => Verdict::StrongBuy,
            Some(s) if s >= 40.0 => Verdict::Hold,
            Some(_) => Verdict::Sell,
        }
    }

    /// Human-readable label for the verdict
    pub fn to_label(&self) -> &'static str {
        match self {
            Verdict::StrongBuy => "Strong Buy",
            Verdict::Buy => "Buy",
            Verdict::Hold => "Hold",
            Verdict::Sell => "Sell",
            Verdict::StrongSell => "Strong Sell",
            Verdict::InsufficientData => "Insufficient Data",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_label())
    }
}

/// The three pillar results of one analysis; `None` means the data never arrived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PillarScores {
    pub fundamentals: Option<PillarScore>,
    pub technicals: Option<PillarScore>,
    pub sentiment: Option<PillarScore>,
}

/// Pillar weights in percent (sum to 100)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightsPct {
    pub technical: f64,
    pub fundamental: f64,
    pub sentiment: f64,
}

impl WeightsPct {
    pub fn total(&self) -> f64 {
        self.technical + self.fundamental + self.sentiment
    }
}

/// Weighted contribution (weight x score) of each pillar that produced a score
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Contributions {
    pub technical: Option<f64>,
    pub fundamental: Option<f64>,
    pub sentiment: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSources {
    pub provider: String,
    pub requests: Vec<String>,
}

/// Combined recommendation for one ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub ticker: String,
    pub as_of: DateTime<Utc>,
    pub scores: PillarScores,
    pub aggregate_score: Option<f64>,
    pub label: Verdict,
    pub flags: BTreeSet<String>,
    pub weights: WeightsPct,
    pub contributions: Contributions,
    pub reasons: Vec<String>,
    pub data_sources: DataSources,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_bands() {
        assert_eq!(Verdict::from_score(Some(70.0)), Verdict::StrongBuy);
        assert_eq!(Verdict::from_score(Some(69.9)), Verdict::Hold);
        assert_eq!(Verdict::from_score(Some(40.0)), Verdict::Hold);
        assert_eq!(Verdict::from_score(Some(39.9)), Verdict::Sell);
        assert_eq!(Verdict::from_score(None), Verdict::InsufficientData);
    }

    #[test]
    fn test_verdict_serializes_as_label() {
        let json = serde_json::to_string(&Verdict::StrongBuy).unwrap();
        assert_eq!(json, "\"Strong Buy\"");
        assert_eq!(Verdict::InsufficientData.to_string(), "Insufficient Data");
    }

    #[test]
    fn test_pillar_score_is_clamped() {
        let high = PillarScore::new(130.0, BTreeMap::new(), serde_json::json!({}), vec![]);
        let low = PillarScore::new(-5.0, BTreeMap::new(), serde_json::json!({}), vec![]);
        assert_eq!(high.score, 100.0);
        assert_eq!(low.score, 0.0);
    }

    #[test]
    fn test_round1() {
        assert_eq!(round1(72.04), 72.0);
        assert_eq!(round1(54.96), 55.0);
    }

    #[test]
    fn test_effective_close_prefers_adjusted() {
        let bar = DailyBar {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            open: 10.0,
            high: 11.0,
            low: 9.0,
            close: 10.5,
            adjusted_close: Some(5.25),
            volume: 1000.0,
        };
        assert_eq!(bar.effective_close(), 5.25);
    }
}
