use analysis_core::{round1, CompanyOverview, PillarScore, NEUTRAL_SCORE};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// How a metric reading compares with its bands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Strong,
    Favorable,
    Neutral,
    Weak,
    Poor,
}

impl Tone {
    pub fn is_positive(&self) -> bool {
        matches!(self, Tone::Strong | Tone::Favorable)
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, Tone::Weak | Tone::Poor)
    }
}

/// Sub-score band a metric reading falls into
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub score: f64,
    pub tone: Tone,
}

impl Band {
    const fn new(score: f64, tone: Tone) -> Self {
        Self { score, tone }
    }
}

/// The six ratios the fundamental pillar consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    EvToEbitda,
    ReturnOnEquity,
    OperatingMargin,
    RevenueGrowth,
    EarningsGrowth,
    DividendYield,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::EvToEbitda,
        Metric::ReturnOnEquity,
        Metric::OperatingMargin,
        Metric::RevenueGrowth,
        Metric::EarningsGrowth,
        Metric::DividendYield,
    ];

    /// Key used in `subscores` and `data_used`
    pub fn key(&self) -> &'static str {
        match self {
            Metric::EvToEbitda => "evToEbitda",
            Metric::ReturnOnEquity => "roe",
            Metric::OperatingMargin => "operatingMargin",
            Metric::RevenueGrowth => "revenueGrowth",
            Metric::EarningsGrowth => "earningsGrowth",
            Metric::DividendYield => "dividendYield",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Metric::EvToEbitda => "EV/EBITDA",
            Metric::ReturnOnEquity => "ROE",
            Metric::OperatingMargin => "operating margin",
            Metric::RevenueGrowth => "revenue growth",
            Metric::EarningsGrowth => "earnings growth",
            Metric::DividendYield => "dividend yield",
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            Metric::EvToEbitda => 0.30,
            Metric::ReturnOnEquity => 0.20,
            Metric::OperatingMargin => 0.15,
            Metric::RevenueGrowth => 0.20,
            Metric::EarningsGrowth => 0.10,
            Metric::DividendYield => 0.05,
        }
    }

    /// Reading in the unit the bands use: a plain ratio for EV/EBITDA, percent
    /// for everything else (the provider reports fractions).
    pub fn value(&self, overview: &CompanyOverview) -> Option<f64> {
        let pct = |v: Option<f64>| v.map(|x| x * 100.0);
        match self {
            Metric::EvToEbitda => overview.ev_to_ebitda,
            Metric::ReturnOnEquity => pct(overview.return_on_equity_ttm),
            Metric::OperatingMargin => pct(overview.operating_margin_ttm),
            Metric::RevenueGrowth => pct(overview.quarterly_revenue_growth_yoy),
            Metric::EarningsGrowth => pct(overview.quarterly_earnings_growth_yoy),
            Metric::DividendYield => pct(overview.dividend_yield),
        }
    }

    pub fn band(&self, value: f64) -> Band {
        use Tone::*;
        match self {
            Metric::EvToEbitda => match value {
                v if v <= 6.0 => Band::new(90.0, Strong),
                v if v <= 8.0 => Band::new(80.0, Favorable),
                v if v <= 10.0 => Band::new(65.0, Neutral),
                v if v <= 14.0 => Band::new(45.0, Weak),
                _ => Band::new(25.0, Poor),
            },
            Metric::ReturnOnEquity => match value {
                v if v >= 20.0 => Band::new(90.0, Strong),
                v if v >= 12.0 => Band::new(75.0, Favorable),
                v if v >= 8.0 => Band::new(60.0, Neutral),
                v if v >= 4.0 => Band::new(45.0, Weak),
                _ => Band::new(25.0, Poor),
            },
            Metric::OperatingMargin => match value {
                v if v >= 25.0 => Band::new(90.0, Strong),
                v if v >= 15.0 => Band::new(75.0, Favorable),
                v if v >= 10.0 => Band::new(60.0, Neutral),
                v if v >= 5.0 => Band::new(45.0, Weak),
                _ => Band::new(25.0, Poor),
            },
            Metric::RevenueGrowth => match value {
                v if v >= 20.0 => Band::new(90.0, Strong),
                v if v >= 10.0 => Band::new(75.0, Favorable),
                v if v >= 5.0 => Band::new(60.0, Neutral),
                v if v >= 0.0 => Band::new(45.0, Weak),
                _ => Band::new(25.0, Poor),
            },
            Metric::EarningsGrowth => match value {
                v if v >= 25.0 => Band::new(90.0, Strong),
                v if v >= 10.0 => Band::new(75.0, Favorable),
                v if v >= 0.0 => Band::new(55.0, Neutral),
                v if v >= -10.0 => Band::new(40.0, Weak),
                _ => Band::new(25.0, Poor),
            },
            Metric::DividendYield => match value {
                v if (2.0..=6.0).contains(&v) => Band::new(90.0, Strong),
                v if v > 6.0 => Band::new(60.0, Neutral),
                v if v >= 1.0 => Band::new(70.0, Favorable),
                v if v > 0.0 => Band::new(55.0, Neutral),
                _ => Band::new(50.0, Neutral),
            },
        }
    }

    /// Short description of a non-neutral reading, e.g. "strong ROE".
    pub fn describe(&self, tone: Tone) -> Option<&'static str> {
        use Tone::*;
        let phrase = match (self, tone) {
            (_, Neutral) => return None,
            (Metric::EvToEbitda, Strong) => "attractive EV/EBITDA valuation",
            (Metric::EvToEbitda, Favorable) => "reasonable EV/EBITDA valuation",
            (Metric::EvToEbitda, Weak) => "elevated EV/EBITDA valuation",
            (Metric::EvToEbitda, Poor) => "expensive EV/EBITDA valuation",
            (Metric::ReturnOnEquity, Strong) => "strong ROE",
            (Metric::ReturnOnEquity, Favorable) => "solid ROE",
            (Metric::ReturnOnEquity, Weak) => "weak ROE",
            (Metric::ReturnOnEquity, Poor) => "very weak ROE",
            (Metric::OperatingMargin, Strong) => "high operating margin",
            (Metric::OperatingMargin, Favorable) => "healthy operating margin",
            (Metric::OperatingMargin, Weak) => "thin operating margin",
            (Metric::OperatingMargin, Poor) => "very thin operating margin",
            (Metric::RevenueGrowth, Strong) => "strong revenue growth",
            (Metric::RevenueGrowth, Favorable) => "steady revenue growth",
            (Metric::RevenueGrowth, Weak) => "flat revenue",
            (Metric::RevenueGrowth, Poor) => "revenue declining",
            (Metric::EarningsGrowth, Strong) => "strong earnings growth",
            (Metric::EarningsGrowth, Favorable) => "earnings growing",
            (Metric::EarningsGrowth, Weak) => "earnings slipping",
            (Metric::EarningsGrowth, Poor) => "earnings declining",
            (Metric::DividendYield, Strong) => "attractive dividend yield",
            (Metric::DividendYield, Favorable) => "modest dividend yield",
            (Metric::DividendYield, _) => return None,
        };
        Some(phrase)
    }
}

/// Re-derive the band of every metric recorded in a fundamental pillar's `data_used`.
pub fn metric_bands(data_used: &Value) -> Vec<(Metric, f64, Band)> {
    Metric::ALL
        .iter()
        .filter_map(|m| {
            let value = data_used.get(m.key())?.as_f64()?;
            Some((*m, value, m.band(value)))
        })
        .collect()
}

pub struct FundamentalAnalysisEngine;

impl FundamentalAnalysisEngine {
    pub fn new() -> Self {
        Self
    }

    /// Score a company overview. Missing metrics drop out and the remaining
    /// weights are renormalized.
    pub fn score(&self, overview: &CompanyOverview) -> PillarScore {
        let mut subscores = BTreeMap::new();
        let mut data_used = serde_json::Map::new();
        let mut present: Vec<(Metric, f64, Band)> = Vec::new();
        let mut missing: Vec<Metric> = Vec::new();

        for metric in Metric::ALL {
            match metric.value(overview) {
                Some(value) => {
                    let band = metric.band(value);
                    subscores.insert(metric.key().to_string(), Some(band.score));
                    data_used.insert(metric.key().to_string(), json!(value));
                    present.push((metric, value, band));
                }
                None => {
                    subscores.insert(metric.key().to_string(), None);
                    data_used.insert(metric.key().to_string(), Value::Null);
                    missing.push(metric);
                }
            }
        }
        data_used.insert("symbol".to_string(), json!(overview.symbol));
        data_used.insert("metricsAvailable".to_string(), json!(present.len()));

        if present.is_empty() {
            return PillarScore::new(
                NEUTRAL_SCORE,
                subscores,
                Value::Object(data_used),
                vec!["No fundamental data available; using neutral score".to_string()],
            );
        }

        let weight_sum: f64 = present.iter().map(|(m, _, _)| m.weight()).sum();
        let weighted: f64 = present.iter().map(|(m, _, b)| b.score * m.weight()).sum();
        let score = round1(weighted / weight_sum);

        let notes = vec![drivers_note(&present), missing_note(&missing)];

        PillarScore::new(score, subscores, Value::Object(data_used), notes)
    }
}

impl Default for FundamentalAnalysisEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Band phrases ordered by how far each reading pulls the score from neutral,
/// weighted by metric importance.
pub fn key_drivers(bands: &[(Metric, f64, Band)]) -> Vec<&'static str> {
    let mut drivers: Vec<(f64, &'static str)> = bands
        .iter()
        .filter_map(|(m, _, band)| {
            let phrase = m.describe(band.tone)?;
            Some(((band.score - NEUTRAL_SCORE).abs() * m.weight(), phrase))
        })
        .collect();
    drivers.sort_by(|a, b| b.0.total_cmp(&a.0));
    drivers.into_iter().map(|(_, phrase)| phrase).collect()
}

fn drivers_note(present: &[(Metric, f64, Band)]) -> String {
    let drivers = key_drivers(present);
    if drivers.is_empty() {
        return "No dominant fundamental driver; metrics sit mid-range".to_string();
    }
    let top: Vec<&str> = drivers.into_iter().take(3).collect();
    format!("Key drivers: {}", top.join(", "))
}

fn missing_note(missing: &[Metric]) -> String {
    if missing.is_empty() {
        return format!("All {} fundamental metrics available", Metric::ALL.len());
    }
    let labels: Vec<&str> = missing.iter().map(|m| m.label()).collect();
    format!(
        "{} of {} metrics missing ({})",
        missing.len(),
        Metric::ALL.len(),
        labels.join(", ")
    )
}
