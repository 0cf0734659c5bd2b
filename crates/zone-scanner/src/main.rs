//! zone-scanner: support/resistance zones and breakout confidence as JSON.
//!
//! Usage:
//!   cargo run -p zone-scanner -- --symbols AAPL MSFT
//!   cargo run -p zone-scanner -- --bars-file data/aapl.csv --price 191.2
//!   cargo run -p zone-scanner -- --bars-file a.csv b.json --config zones.json --pretty

mod bars_file;

use analysis_orchestrator::{ZoneAnalysisOrchestrator, DEFAULT_CONCURRENCY};
use anyhow::{bail, Context, Result};
use clap::Parser;
use polygon_client::PolygonClient;
use serde::Serialize;
use std::path::{Path, PathBuf};
use zone_analysis::{analyze_batch, BatchRequest, ZoneAnalysisConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Find support/resistance zones and score breakouts", long_about = None)]
struct Cli {
    /// Symbols to analyze with Polygon data (needs POLYGON_API_KEY)
    #[arg(long, num_args = 1.., conflicts_with = "bars_file")]
    symbols: Vec<String>,

    /// Local CSV or JSON bar files; the symbol defaults to the file stem
    #[arg(long = "bars-file", num_args = 1..)]
    bars_file: Vec<PathBuf>,

    /// Symbol for a single bars file
    #[arg(long, requires = "bars_file")]
    symbol: Option<String>,

    /// Current price for a single bars file (defaults to its last close)
    #[arg(long, requires = "bars_file")]
    price: Option<f64>,

    /// JSON analysis config; missing fields keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Max symbols analyzed at once
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Pretty-print the JSON output
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

/// One line of output: the analysis, or why there is none
#[derive(Serialize)]
struct ScanEntry<T: Serialize> {
    symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ScanEntry<T> {
    fn from_result<E: std::fmt::Display>(symbol: String, result: std::result::Result<T, E>) -> Self {
        match result {
            Ok(analysis) => Self { symbol, analysis: Some(analysis), error: None },
            Err(e) => {
                tracing::warn!("{} failed: {}", symbol, e);
                Self { symbol, analysis: None, error: Some(e.to_string()) }
            }
        }
    }

    fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zone_scanner=info,analysis_orchestrator=info,polygon_client=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let (output, succeeded, total) = if !cli.bars_file.is_empty() {
        let entries = scan_files(&cli, &config).await?;
        let ok = entries.iter().filter(|e| e.is_ok()).count();
        let total = entries.len();
        (render(&entries, cli.pretty)?, ok, total)
    } else if !cli.symbols.is_empty() {
        let entries = scan_symbols(&cli, config).await?;
        let ok = entries.iter().filter(|e| e.is_ok()).count();
        let total = entries.len();
        (render(&entries, cli.pretty)?, ok, total)
    } else {
        bail!("nothing to analyze: pass --symbols or --bars-file (see --help)");
    };

    println!("{}", output);
    tracing::info!("Analyzed {}/{} successfully", succeeded, total);

    if succeeded == 0 {
        bail!("every analysis failed");
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ZoneAnalysisConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            ZoneAnalysisConfig::from_json(&text)
                .with_context(|| format!("loading config {}", path.display()))?
        }
        None => ZoneAnalysisConfig::default(),
    }
    .with_env_overrides();

    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn scan_files(
    cli: &Cli,
    config: &ZoneAnalysisConfig,
) -> Result<Vec<ScanEntry<zone_analysis::BarAnalysis>>> {
    if cli.bars_file.len() > 1 && (cli.symbol.is_some() || cli.price.is_some()) {
        bail!("--symbol and --price apply to a single --bars-file");
    }

    let mut requests = Vec::with_capacity(cli.bars_file.len());
    for path in &cli.bars_file {
        let bars = bars_file::load_bars(path)?;
        let symbol = cli
            .symbol
            .clone()
            .unwrap_or_else(|| bars_file::symbol_from_path(path));
        let last_close = bars
            .last()
            .map(|b| b.close)
            .with_context(|| format!("{} contains no bars", path.display()))?;
        analysis_core::validate_series(&bars)
            .with_context(|| format!("validating {}", path.display()))?;

        requests.push(BatchRequest {
            symbol,
            bars,
            current_price: cli.price.unwrap_or(last_close),
        });
    }

    let config = *config;
    let results = tokio::task::spawn_blocking(move || analyze_batch(&requests, &config))
        .await
        .context("analysis worker panicked")?;

    Ok(results
        .into_iter()
        .map(|r| ScanEntry::from_result(r.symbol, r.result))
        .collect())
}

async fn scan_symbols(
    cli: &Cli,
    config: ZoneAnalysisConfig,
) -> Result<Vec<ScanEntry<analysis_orchestrator::SymbolAnalysis>>> {
    let polygon = PolygonClient::from_env().context("Polygon client")?;
    let orchestrator = ZoneAnalysisOrchestrator::with_polygon(polygon, config)
        .with_concurrency(cli.concurrency);

    let symbols: Vec<String> = cli.symbols.iter().map(|s| s.to_ascii_uppercase()).collect();
    tracing::info!("Analyzing {} symbols (concurrency {})", symbols.len(), cli.concurrency);

    Ok(orchestrator
        .analyze_symbols(&symbols)
        .await
        .into_iter()
        .map(|(symbol, result)| ScanEntry::from_result(symbol, result))
        .collect())
}

fn render<T: Serialize>(entries: &[ScanEntry<T>], pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(entries)?
    } else {
        serde_json::to_string(entries)?
    };
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_parses_file_mode() {
        let cli = Cli::try_parse_from([
            "zone-scanner",
            "--bars-file",
            "a.csv",
            "--symbol",
            "ACME",
            "--price",
            "12.5",
            "--pretty",
        ])
        .unwrap();
        assert_eq!(cli.bars_file, vec![PathBuf::from("a.csv")]);
        assert_eq!(cli.symbol.as_deref(), Some("ACME"));
        assert_eq!(cli.price, Some(12.5));
        assert!(cli.pretty);
        assert_eq!(cli.concurrency, DEFAULT_CONCURRENCY);
    }

    #[test]
    fn test_cli_rejects_mixed_sources() {
        assert!(Cli::try_parse_from(["zone-scanner", "--symbols", "AAPL", "--bars-file", "a.csv"]).is_err());
        assert!(Cli::try_parse_from(["zone-scanner", "--symbols", "AAPL", "--price", "3"]).is_err());
    }

    #[test]
    fn test_config_file_loaded() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{"zones": {"min_touches": 3}}"#).unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.zones.min_touches, 3);
        assert_eq!(config.pivots.left_bars, 5);
    }

    #[tokio::test]
    async fn test_scan_csv_file() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "timestamp,open,high,low,close,volume").unwrap();
        for i in 0..60u32 {
            let day = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64);
            let low = if i == 15 || i == 40 { 20.0 } else { 21.0 + (i % 3) as f64 * 0.5 };
            writeln!(file, "{},{},{},{},{},100000", day, low + 1.5, low + 3.0, low, low + 1.5).unwrap();
        }

        let cli = Cli::try_parse_from([
            "zone-scanner",
            "--bars-file",
            file.path().to_str().unwrap(),
            "--symbol",
            "DBL",
            "--price",
            "25.0",
        ])
        .unwrap();
        let entries = scan_files(&cli, &ZoneAnalysisConfig::default()).await.unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].symbol, "DBL");
        let analysis = entries[0].analysis.as_ref().unwrap();
        let support = analysis.levels.nearest_support.as_ref().unwrap();
        assert!((support.middle - 20.0).abs() < 1e-9);

        let json = render(&entries, false).unwrap();
        assert!(json.contains("\"symbol\":\"DBL\""));
    }
}
