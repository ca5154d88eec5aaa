//! CSV-coupled back-test metadata loader (§6, §9): the back-test metadata
//! file and the BBW-minima file are read once at construction and cached in
//! memory, mirroring the teacher's CSV-ingestion helpers.

use crate::domain::group::{PsType, TradeSide};
use crate::domain::ports::{BacktestMetadata, BacktestMetadataLoader};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, serde::Deserialize)]
struct BacktestMetadataRow {
    #[serde(rename = "SYMBOL")]
    symbol: String,
    #[serde(rename = "DIRECTION")]
    direction: String,
    #[serde(rename = "SL%")]
    sl_percent: f64,
    #[serde(rename = "PS_TYPE")]
    ps_type: String,
}

#[derive(Debug, serde::Deserialize)]
struct BbWidthRow {
    instrument_key: String,
    lowest_min_bb_width: f64,
}

#[derive(Debug, serde::Deserialize)]
struct UniverseRow {
    instrument_key: String,
    symbol: String,
}

/// The tradable universe is an external vendor feed (§1); this is the
/// static CSV stand-in the shipped pipeline reads it from.
pub fn load_universe(path: impl AsRef<Path>) -> Result<Vec<(String, String)>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open stock universe at {}", path.display()))?;
    let mut out = Vec::new();
    for record in reader.deserialize() {
        let row: UniverseRow = record?;
        out.push((row.instrument_key, row.symbol));
    }
    Ok(out)
}

#[derive(Debug)]
pub struct CsvBacktestMetadataLoader {
    metadata: HashMap<String, BacktestMetadata>,
    lowest_bb_width: HashMap<String, f64>,
}

impl CsvBacktestMetadataLoader {
    pub fn load(metadata_path: impl AsRef<Path>, bb_width_path: impl AsRef<Path>) -> Result<Self> {
        let metadata = Self::load_metadata(metadata_path.as_ref())
            .with_context(|| format!("failed to load back-test metadata from {}", metadata_path.as_ref().display()))?;
        let lowest_bb_width = Self::load_bb_width(bb_width_path.as_ref())
            .with_context(|| format!("failed to load bb-width minima from {}", bb_width_path.as_ref().display()))?;
        Ok(Self { metadata, lowest_bb_width })
    }

    fn load_metadata(path: &Path) -> Result<HashMap<String, BacktestMetadata>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut out = HashMap::new();
        for record in reader.deserialize() {
            let row: BacktestMetadataRow = record?;
            let direction = match row.direction.as_str() {
                "LONG" => TradeSide::Long,
                "SHORT" => TradeSide::Short,
                other => anyhow::bail!("unknown direction '{other}' for symbol {}", row.symbol),
            };
            let ps_type = match row.ps_type.as_str() {
                "FIXED" => PsType::Fixed,
                "DYNAMIC" => PsType::Dynamic,
                other => anyhow::bail!("unknown ps_type '{other}' for symbol {}", row.symbol),
            };
            out.insert(
                row.symbol.clone(),
                BacktestMetadata {
                    symbol: row.symbol,
                    direction,
                    sl_percent: row.sl_percent,
                    ps_type,
                },
            );
        }
        Ok(out)
    }

    fn load_bb_width(path: &Path) -> Result<HashMap<String, f64>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut out = HashMap::new();
        for record in reader.deserialize() {
            let row: BbWidthRow = record?;
            out.insert(row.instrument_key, row.lowest_min_bb_width);
        }
        Ok(out)
    }
}

impl BacktestMetadataLoader for CsvBacktestMetadataLoader {
    fn lookup(&self, symbol: &str) -> Option<BacktestMetadata> {
        self.metadata.get(symbol).cloned()
    }

    fn lowest_bb_width(&self, instrument_key: &str) -> Option<f64> {
        self.lowest_bb_width.get(instrument_key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_metadata_and_bb_width_by_key() {
        let metadata_csv = write_temp(
            "SYMBOL,TREND,DIRECTION,STRATEGY,ENTRY_TYPE,ENTRY_TIME,SL%,PS_TYPE\n\
             TESTSTOCK,UP,LONG,BB_RANGE,1ST_ENTRY,09:20,2.0,FIXED\n",
        );
        let bb_width_csv = write_temp("instrument_key,lowest_min_bb_width\nNSE_EQ|TEST,0.0123\n");

        let loader = CsvBacktestMetadataLoader::load(metadata_csv.path(), bb_width_csv.path()).unwrap();

        let meta = loader.lookup("TESTSTOCK").unwrap();
        assert!(matches!(meta.direction, TradeSide::Long));
        assert!(matches!(meta.ps_type, PsType::Fixed));
        assert_eq!(meta.sl_percent, 2.0);

        assert_eq!(loader.lowest_bb_width("NSE_EQ|TEST"), Some(0.0123));
        assert_eq!(loader.lookup("UNKNOWN"), None);
    }

    #[test]
    fn rejects_unknown_direction() {
        let metadata_csv = write_temp(
            "SYMBOL,TREND,DIRECTION,STRATEGY,ENTRY_TYPE,ENTRY_TIME,SL%,PS_TYPE\n\
             TESTSTOCK,UP,SIDEWAYS,BB_RANGE,1ST_ENTRY,09:20,2.0,FIXED\n",
        );
        let bb_width_csv = write_temp("instrument_key,lowest_min_bb_width\n");
        let err = CsvBacktestMetadataLoader::load(metadata_csv.path(), bb_width_csv.path()).unwrap_err();
        assert!(err.to_string().contains("back-test metadata"));
    }
}
