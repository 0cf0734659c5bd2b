//! Local bar files: CSV with a `timestamp,open,high,low,close,volume` header,
//! or a JSON array of bars.

use analysis_core::Bar;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct CsvBar {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Load bars from `path`, choosing the format by extension, sorted oldest first
pub fn load_bars(path: &Path) -> Result<Vec<Bar>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let mut bars = match extension.as_deref() {
        Some("csv") => load_csv(path)?,
        Some("json") => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<Vec<Bar>>(&text)
                .with_context(|| format!("parsing bars from {}", path.display()))?
        }
        _ => bail!("{}: expected a .csv or .json bar file", path.display()),
    };

    bars.sort_by_key(|b| b.timestamp);
    tracing::info!("Loaded {} bars from {}", bars.len(), path.display());
    Ok(bars)
}

fn load_csv(path: &Path) -> Result<Vec<Bar>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut bars = Vec::new();
    for (line, row) in rdr.deserialize::<CsvBar>().enumerate() {
        let row = row.with_context(|| format!("{} row {}", path.display(), line + 1))?;
        let timestamp = parse_timestamp(&row.timestamp)
            .with_context(|| format!("{} row {}", path.display(), line + 1))?;
        bars.push(Bar {
            timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        });
    }
    Ok(bars)
}

/// RFC 3339, or a bare `YYYY-MM-DD` taken as midnight UTC
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| anyhow!("unrecognised timestamp '{}'", raw))
}

/// Upper-cased file stem, e.g. `data/aapl.csv` -> `AAPL`
pub fn symbol_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_uppercase())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn write_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_csv_with_dates_and_rfc3339() {
        let file = write_file(
            ".csv",
            "timestamp,open,high,low,close,volume\n\
             2024-01-03,10.2,10.8,10.0,10.5,120000\n\
             2024-01-02T00:00:00Z,10.0,10.4,9.8,10.1,100000\n",
        );
        let bars = load_bars(file.path()).unwrap();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        assert_eq!(bars[0].close, 10.1);
        assert_eq!(bars[1].volume, 120000.0);
    }

    #[test]
    fn test_csv_bad_row_reports_location() {
        let file = write_file(
            ".csv",
            "timestamp,open,high,low,close,volume\n2024-01-02,10.0,abc,9.8,10.1,100\n",
        );
        let err = load_bars(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("row 1"));
    }

    #[test]
    fn test_json_bars() {
        let file = write_file(
            ".json",
            r#"[{"timestamp":"2024-01-02T00:00:00Z","open":5.0,"high":5.5,"low":4.9,"close":5.2,"volume":900.0}]"#,
        );
        let bars = load_bars(file.path()).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].high, 5.5);
    }

    #[test]
    fn test_unknown_extension() {
        let file = write_file(".txt", "nothing");
        assert!(load_bars(file.path()).is_err());
    }

    #[test]
    fn test_timestamp_formats() {
        assert!(parse_timestamp("2024-02-29").is_ok());
        assert!(parse_timestamp("2024-02-29T14:30:00-05:00").is_ok());
        assert!(parse_timestamp("29/02/2024").is_err());
    }

    #[test]
    fn test_symbol_from_path() {
        assert_eq!(symbol_from_path(Path::new("data/aapl.csv")), "AAPL");
        assert_eq!(symbol_from_path(Path::new("MSFT.json")), "MSFT");
    }
}
