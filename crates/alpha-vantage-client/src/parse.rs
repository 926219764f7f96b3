//! Typed views over the provider's JSON payloads.
//!
//! Numbers arrive as strings, missing values as "None" or "-". Anything that
//! does not parse is kept as absent rather than coerced to zero.

use analysis_core::{CompanyOverview, DailyBar, NewsArticle};
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

const DAILY_SERIES_KEY: &str = "Time Series (Daily)";

#[derive(Debug, Deserialize)]
struct OverviewResponse {
    #[serde(rename = "Symbol", default)]
    symbol: Option<String>,
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "EVToEBITDA", default, deserialize_with = "de_metric")]
    ev_to_ebitda: Option<f64>,
    #[serde(rename = "ReturnOnEquityTTM", default, deserialize_with = "de_metric")]
    roe_ttm: Option<f64>,
    #[serde(rename = "OperatingMarginTTM", default, deserialize_with = "de_metric")]
    operating_margin_ttm: Option<f64>,
    #[serde(rename = "QuarterlyRevenueGrowthYOY", default, deserialize_with = "de_metric")]
    revenue_growth_yoy: Option<f64>,
    #[serde(rename = "QuarterlyEarningsGrowthYOY", default, deserialize_with = "de_metric")]
    earnings_growth_yoy: Option<f64>,
    #[serde(rename = "DividendYield", default, deserialize_with = "de_metric")]
    dividend_yield: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    #[serde(default)]
    feed: Vec<FeedItem>,
}

#[derive(Debug, Deserialize)]
struct FeedItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    time_published: String,
    #[serde(default, deserialize_with = "de_metric")]
    overall_sentiment_score: Option<f64>,
    #[serde(default)]
    ticker_sentiment: Vec<TickerSentiment>,
}

#[derive(Debug, Deserialize)]
struct TickerSentiment {
    #[serde(default)]
    ticker: String,
    #[serde(default, deserialize_with = "de_metric")]
    ticker_sentiment_score: Option<f64>,
}

fn de_metric<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(metric_value))
}

fn metric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_metric(s),
        _ => None,
    }
}

/// Parse a provider numeric string; "None", "-" and blanks are absent.
pub fn parse_metric(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if matches!(trimmed, "" | "None" | "-" | "N/A" | "NaN") {
        return None;
    }
    trimmed
        .trim_end_matches('%')
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// `OVERVIEW` payload. An empty object (unknown symbol) is treated as no data.
pub fn parse_overview(payload: &Value) -> Option<CompanyOverview> {
    let obj = payload.as_object()?;
    if obj.is_empty() {
        return None;
    }

    let raw: OverviewResponse = match serde_json::from_value(payload.clone()) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("Unreadable company overview payload: {}", e);
            return None;
        }
    };

    Some(CompanyOverview {
        symbol: raw.symbol.unwrap_or_default(),
        name: raw.name,
        ev_to_ebitda: raw.ev_to_ebitda,
        return_on_equity_ttm: raw.roe_ttm,
        operating_margin_ttm: raw.operating_margin_ttm,
        quarterly_revenue_growth_yoy: raw.revenue_growth_yoy,
        quarterly_earnings_growth_yoy: raw.earnings_growth_yoy,
        dividend_yield: raw.dividend_yield,
    })
}

/// `TIME_SERIES_DAILY_ADJUSTED` payload, sorted ascending by date.
/// Rows that fail to parse are skipped.
pub fn parse_daily_series(payload: &Value) -> Option<Vec<DailyBar>> {
    let series = payload.get(DAILY_SERIES_KEY)?.as_object()?;

    let field = |row: &Value, key: &str| row.get(key).and_then(metric_value);

    let mut bars: Vec<DailyBar> = series
        .iter()
        .filter_map(|(date, row)| {
            let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
            let close = field(row, "4. close")?;
            Some(DailyBar {
                date,
                open: field(row, "1. open").unwrap_or(close),
                high: field(row, "2. high").unwrap_or(close),
                low: field(row, "3. low").unwrap_or(close),
                close,
                adjusted_close: field(row, "5. adjusted close"),
                // Adjusted series puts volume at 6, the plain series at 5
                volume: field(row, "6. volume")
                    .or_else(|| field(row, "5. volume"))
                    .unwrap_or(0.0),
            })
        })
        .collect();

    bars.sort_by_key(|b| b.date);
    Some(bars)
}

/// `NEWS_SENTIMENT` payload. Uses the ticker-specific sentiment when the article
/// tags `ticker`, falling back to the article's overall score.
pub fn parse_news_feed(payload: &Value, ticker: &str) -> Option<Vec<NewsArticle>> {
    payload.get("feed")?;

    let response: NewsResponse = match serde_json::from_value(payload.clone()) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Unreadable news sentiment payload: {}", e);
            return None;
        }
    };

    let articles = response
        .feed
        .into_iter()
        .filter_map(|item| {
            let published_at = parse_published(&item.time_published)?;
            let ticker_score = item
                .ticker_sentiment
                .iter()
                .find(|t| t.ticker.eq_ignore_ascii_case(ticker))
                .and_then(|t| t.ticker_sentiment_score);
            let polarity = ticker_score.or(item.overall_sentiment_score)?;

            Some(NewsArticle {
                title: item.title,
                url: item.url,
                published_at,
                polarity: polarity.clamp(-1.0, 1.0),
            })
        })
        .collect();

    Some(articles)
}

/// Provider timestamps look like `20240115T143000`; seconds are sometimes dropped.
fn parse_published(raw: &str) -> Option<chrono::DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M"))
        .ok()?;
    Some(Utc.from_utc_datetime(&naive))
}
