//! score-cli: score one or more tickers across fundamentals, technicals and news sentiment.
//!
//! Usage:
//!   cargo run -p score-cli -- AAPL
//!   cargo run -p score-cli -- AAPL MSFT --json
//!
//! Needs ALPHA_VANTAGE_API_KEY (read from the environment or `.env`).

use analysis_core::AggregateResult;
use analysis_orchestrator::{PipelineConfig, ScoringPipeline};
use anyhow::bail;

#[derive(Debug, PartialEq)]
struct CliArgs {
    symbols: Vec<String>,
    json: bool,
}

fn parse_args(args: &[String]) -> CliArgs {
    CliArgs {
        symbols: args
            .iter()
            .filter(|a| !a.starts_with("--"))
            .map(|a| a.trim().to_uppercase())
            .filter(|a| !a.is_empty())
            .collect(),
        json: args.iter().any(|a| a == "--json"),
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  score-cli SYMBOL [SYMBOL ...] [--json]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --json    Print full results as JSON");
}

fn print_summary(result: &AggregateResult) {
    let score = result
        .aggregate_score
        .map(|s| format!("{:.1}", s))
        .unwrap_or_else(|| "n/a".to_string());
    println!("{}  {}  [{}]", result.ticker, score, result.label);

    let pillar = |p: &Option<analysis_core::PillarScore>| {
        p.as_ref()
            .map(|s| format!("{:.1}", s.score))
            .unwrap_or_else(|| "unavailable".to_string())
    };
    println!(
        "  technical {} ({:.1}%) | fundamental {} ({:.1}%) | sentiment {} ({:.1}%)",
        pillar(&result.scores.technicals),
        result.weights.technical,
        pillar(&result.scores.fundamentals),
        result.weights.fundamental,
        pillar(&result.scores.sentiment),
        result.weights.sentiment,
    );
    if !result.flags.is_empty() {
        let flags: Vec<&str> = result.flags.iter().map(String::as_str).collect();
        println!("  flags: {}", flags.join(", "));
    }
    for reason in &result.reasons {
        println!("  - {}", reason);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "score_cli=info,alpha_vantage_client=info,analysis_orchestrator=info".into()
            }),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_args(&args);
    if cli.symbols.is_empty() {
        print_usage();
        bail!("no symbols given");
    }

    let config = PipelineConfig::from_env()?;
    let pipeline = ScoringPipeline::new(&config);
    tracing::info!("Scoring {} symbol(s): {}", cli.symbols.len(), cli.symbols.join(", "));

    let results = if let [symbol] = cli.symbols.as_slice() {
        vec![pipeline.score_symbol(symbol).await]
    } else {
        pipeline.score_symbols(&cli.symbols).await
    };

    if cli.json {
        if let [result] = results.as_slice() {
            println!("{}", serde_json::to_string_pretty(result)?);
        } else {
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    } else {
        for result in &results {
            print_summary(result);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_symbols_and_json_flag() {
        let cli = parse_args(&args(&["aapl", "--json", "MSFT"]));
        assert_eq!(
            cli,
            CliArgs {
                symbols: vec!["AAPL".to_string(), "MSFT".to_string()],
                json: true,
            }
        );
    }

    #[test]
    fn test_parse_without_symbols() {
        let cli = parse_args(&args(&["--json", "  "]));
        assert!(cli.symbols.is_empty());
    }
}
