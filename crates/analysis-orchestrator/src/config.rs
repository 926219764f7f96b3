use crate::aggregator::WeightConfig;
use alpha_vantage_client::{GatewayConfig, DEFAULT_BASE_URL};
use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

/// Runtime settings for a [`crate::ScoringPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub api_key: String,
    pub base_url: String,
    pub weights: WeightConfig,
    /// Per-analysis deadline for provider calls
    pub deadline: Option<Duration>,
}

impl PipelineConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            weights: WeightConfig::default(),
            deadline: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key/value source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = get("ALPHA_VANTAGE_API_KEY").context("ALPHA_VANTAGE_API_KEY must be set")?;

        let defaults = WeightConfig::default();
        let weight = |key: &str, default: f64| -> Result<f64> {
            match get(key) {
                Some(raw) => raw
                    .parse::<f64>()
                    .with_context(|| format!("{} is not a number: {}", key, raw)),
                None => Ok(default),
            }
        };
        let weights = WeightConfig::new(
            weight("SCORE_WEIGHT_TECHNICAL", defaults.technical)?,
            weight("SCORE_WEIGHT_FUNDAMENTAL", defaults.fundamental)?,
            weight("SCORE_WEIGHT_SENTIMENT", defaults.sentiment)?,
        )
        .normalized();

        let deadline = match get("ANALYSIS_DEADLINE_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .parse()
                    .with_context(|| format!("ANALYSIS_DEADLINE_SECS is not a whole number: {}", raw))?;
                if secs == 0 {
                    bail!("ANALYSIS_DEADLINE_SECS must be greater than zero");
                }
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            api_key,
            base_url: get("ALPHA_VANTAGE_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            weights,
            deadline,
        })
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig::new(self.api_key.clone()).with_base_url(self.base_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_api_key_is_required() {
        let err = PipelineConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("ALPHA_VANTAGE_API_KEY"));

        assert!(PipelineConfig::from_lookup(lookup(&[("ALPHA_VANTAGE_API_KEY", "  ")])).is_err());
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_lookup(lookup(&[("ALPHA_VANTAGE_API_KEY", "demo")])).unwrap();

        assert_eq!(config.api_key, "demo");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.weights, WeightConfig::default());
        assert_eq!(config.deadline, None);
    }

    #[test]
    fn test_weights_are_normalized() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("ALPHA_VANTAGE_API_KEY", "demo"),
            ("SCORE_WEIGHT_TECHNICAL", "1"),
            ("SCORE_WEIGHT_FUNDAMENTAL", "2"),
            ("SCORE_WEIGHT_SENTIMENT", "1"),
        ]))
        .unwrap();

        assert_relative_eq!(config.weights.technical, 0.25);
        assert_relative_eq!(config.weights.fundamental, 0.5);
        assert_relative_eq!(config.weights.sentiment, 0.25);
    }

    #[test]
    fn test_bad_values_are_rejected() {
        let bad_weight = PipelineConfig::from_lookup(lookup(&[
            ("ALPHA_VANTAGE_API_KEY", "demo"),
            ("SCORE_WEIGHT_SENTIMENT", "lots"),
        ]));
        assert!(bad_weight.is_err());

        let zero_deadline = PipelineConfig::from_lookup(lookup(&[
            ("ALPHA_VANTAGE_API_KEY", "demo"),
            ("ANALYSIS_DEADLINE_SECS", "0"),
        ]));
        assert!(zero_deadline.is_err());
    }

    #[test]
    fn test_overrides() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("ALPHA_VANTAGE_API_KEY", "demo"),
            ("ALPHA_VANTAGE_BASE_URL", "http://localhost:8080"),
            ("ANALYSIS_DEADLINE_SECS", "90"),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.deadline, Some(Duration::from_secs(90)));
        assert_eq!(config.gateway_config().base_url, "http://localhost:8080");
    }
}
