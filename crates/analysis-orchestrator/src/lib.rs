use alpha_vantage_client::Gateway;
use analysis_core::{AggregateResult, PillarScores};
use chrono::Utc;
use fundamental_analysis::FundamentalAnalysisEngine;
use sentiment_analysis::SentimentAnalysisEngine;
use std::sync::Arc;
use std::time::Duration;
use technical_analysis::TechnicalAnalysisEngine;
use tokio::time::Instant;

pub mod aggregator;
pub mod config;

pub use aggregator::{aggregate, WeightConfig};
pub use config::PipelineConfig;

/// Fetches provider data for a symbol, runs the three pillar scorers and
/// folds them into one [`AggregateResult`].
pub struct ScoringPipeline {
    gateway: Arc<Gateway>,
    technical_analyzer: TechnicalAnalysisEngine,
    fundamental_analyzer: FundamentalAnalysisEngine,
    sentiment_analyzer: SentimentAnalysisEngine,
    weights: WeightConfig,
    /// Provider calls still pending this long after the analysis started are dropped
    deadline: Option<Duration>,
}

impl ScoringPipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        let gateway = Arc::new(Gateway::new(config.gateway_config()));
        Self::with_gateway(gateway)
            .with_weights(config.weights)
            .with_deadline(config.deadline)
    }

    /// Share an existing gateway, and with it the cache and rate budget.
    pub fn with_gateway(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            technical_analyzer: TechnicalAnalysisEngine::new(),
            fundamental_analyzer: FundamentalAnalysisEngine::new(),
            sentiment_analyzer: SentimentAnalysisEngine::new(),
            weights: WeightConfig::default(),
            deadline: None,
        }
    }

    pub fn with_weights(mut self, weights: WeightConfig) -> Self {
        self.weights = weights.normalized();
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Score one symbol. Never fails: missing data shows up as unavailable
    /// pillars and flags on the result.
    pub async fn score_symbol(&self, symbol: &str) -> AggregateResult {
        let ticker = symbol.trim().to_uppercase();
        tracing::info!("Starting analysis for {}", ticker);

        let deadline = self.deadline.map(|d| Instant::now() + d);
        let bundle = self.gateway.fetch_all_before(&ticker, deadline).await;

        let scores = PillarScores {
            fundamentals: bundle
                .overview
                .as_ref()
                .map(|o| self.fundamental_analyzer.score(o)),
            technicals: bundle
                .daily_series
                .as_deref()
                .map(|bars| self.technical_analyzer.score(bars)),
            sentiment: bundle
                .news
                .as_deref()
                .map(|articles| self.sentiment_analyzer.score(articles)),
        };

        let result = aggregate(&ticker, scores, &self.weights, bundle.requests, Utc::now());

        match result.aggregate_score {
            Some(score) => tracing::info!(
                "Analysis complete for {}: {:.1} ({}) flags={:?}",
                ticker,
                score,
                result.label,
                result.flags
            ),
            None => tracing::warn!("No pillar data for {}; flags={:?}", ticker, result.flags),
        }

        result
    }

    /// Score symbols one after another, pausing one rate-limit interval
    /// between them.
    pub async fn score_symbols(&self, symbols: &[String]) -> Vec<AggregateResult> {
        let pause = self.gateway.config().min_interval;
        let mut results = Vec::with_capacity(symbols.len());

        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(pause).await;
            }
            results.push(self.score_symbol(symbol).await);
        }

        results
    }
}
