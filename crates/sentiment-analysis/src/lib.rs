use analysis_core::{clamp_score, NewsArticle, PillarScore, NEUTRAL_SCORE};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Articles older than this are ignored
pub const WINDOW_DAYS: f64 = 7.0;
/// Age at which an article counts half
pub const HALF_LIFE_DAYS: f64 = 3.0;
/// Fewer qualifying articles than this raises the low-news flag
pub const LOW_NEWS_THRESHOLD: usize = 3;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Polarity bands used for notes and aggregate reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolarityBand {
    StrongPositive,
    ModeratelyPositive,
    Neutral,
    ModeratelyNegative,
    StrongNegative,
}

impl PolarityBand {
    pub fn classify(polarity: f64) -> Self {
        if polarity >= 0.3 {
            PolarityBand::StrongPositive
        } else if polarity >= 0.1 {
            PolarityBand::ModeratelyPositive
        } else if polarity > -0.1 {
            PolarityBand::Neutral
        } else if polarity > -0.3 {
            PolarityBand::ModeratelyNegative
        } else {
            PolarityBand::StrongNegative
        }
    }

    /// Read the band back from a sentiment pillar's `data_used`.
    /// `None` when no article qualified.
    pub fn from_data_used(data_used: &Value) -> Option<Self> {
        let count = data_used.get("articleCount").and_then(Value::as_u64)?;
        if count == 0 {
            return None;
        }
        data_used
            .get("aggregatePolarity")
            .and_then(Value::as_f64)
            .map(Self::classify)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            PolarityBand::StrongPositive => "strong positive",
            PolarityBand::ModeratelyPositive => "moderately positive",
            PolarityBand::Neutral => "neutral",
            PolarityBand::ModeratelyNegative => "moderately negative",
            PolarityBand::StrongNegative => "strong negative",
        }
    }
}

pub struct SentimentAnalysisEngine;

impl SentimentAnalysisEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, articles: &[NewsArticle]) -> PillarScore {
        self.score_at(articles, Utc::now())
    }

    /// Score against an explicit clock. Future-dated articles count as fresh.
    pub fn score_at(&self, articles: &[NewsArticle], now: DateTime<Utc>) -> PillarScore {
        let weighted: Vec<(f64, f64)> = articles
            .iter()
            .filter(|a| a.polarity.is_finite())
            .filter_map(|a| {
                let age_days = age_in_days(a.published_at, now);
                (age_days <= WINDOW_DAYS).then(|| (a.polarity.clamp(-1.0, 1.0), decay_weight(age_days)))
            })
            .collect();

        let count = weighted.len();
        let low_news = count < LOW_NEWS_THRESHOLD;

        if count == 0 {
            tracing::debug!(total = articles.len(), "no recent articles");
            let mut subscores = BTreeMap::new();
            subscores.insert("sentiment7d".to_string(), Some(NEUTRAL_SCORE));
            subscores.insert("lowNewsFlag".to_string(), Some(1.0));
            return PillarScore::new(
                NEUTRAL_SCORE,
                subscores,
                json!({
                    "articleCount": 0,
                    "totalArticles": articles.len(),
                    "aggregatePolarity": 0.0,
                    "lowNews": true,
                }),
                vec![format!(
                    "No news in the last {} days; using neutral score",
                    WINDOW_DAYS
                )],
            );
        }

        let total_weight: f64 = weighted.iter().map(|(_, w)| w).sum();
        let polarity = if total_weight > 0.0 {
            weighted.iter().map(|(p, w)| p * w).sum::<f64>() / total_weight
        } else {
            0.0
        };
        let score = clamp_score((50.0 * (polarity + 1.0)).round());

        let mut subscores = BTreeMap::new();
        subscores.insert("sentiment7d".to_string(), Some(score));
        subscores.insert("lowNewsFlag".to_string(), Some(if low_news { 1.0 } else { 0.0 }));

        let band = PolarityBand::classify(polarity);
        let mut notes = vec![format!(
            "{} news sentiment across {} article{} (polarity {:.2})",
            capitalize(band.describe()),
            count,
            if count == 1 { "" } else { "s" },
            polarity
        )];
        if low_news {
            notes.push(format!(
                "Only {} article{} in the last {} days; sentiment is less reliable",
                count,
                if count == 1 { "" } else { "s" },
                WINDOW_DAYS
            ));
        }

        PillarScore::new(
            score,
            subscores,
            json!({
                "articleCount": count,
                "totalArticles": articles.len(),
                "aggregatePolarity": polarity,
                "lowNews": low_news,
            }),
            notes,
        )
    }
}

impl Default for SentimentAnalysisEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn age_in_days(published_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let seconds = (now - published_at).num_seconds().max(0);
    seconds as f64 / SECONDS_PER_DAY
}

fn decay_weight(age_days: f64) -> f64 {
    (-std::f64::consts::LN_2 * age_days / HALF_LIFE_DAYS).exp()
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
