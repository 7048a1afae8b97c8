//! Writing wide tables and benchmark series to disk.
//!
//! Files are written to a sibling `.tmp` path and renamed into place, so a
//! failed export never leaves a truncated file behind under the final name.

use super::benchmark::BenchmarkSeries;
use super::provider::{DataError, WIRE_DATE_FORMAT};
use super::reshape::WideTable;
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Run `write` against a temporary file, then move it to `path`.
fn write_atomically<F>(path: &Path, write: F) -> Result<(), DataError>
where
    F: FnOnce(&Path) -> Result<(), DataError>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| DataError::Export(format!("create dir: {e}")))?;
    }
    let tmp = tmp_path(path);
    if let Err(e) = write(&tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path).map_err(|e| DataError::Export(format!("rename: {e}")))
}

/// Write the table as Parquet: a `trade_date` column plus one column per key.
pub fn write_parquet(table: &WideTable, path: &Path) -> Result<(), DataError> {
    let mut df = table.to_dataframe()?;
    write_atomically(path, |tmp| {
        let file =
            fs::File::create(tmp).map_err(|e| DataError::Export(format!("create file: {e}")))?;
        ParquetWriter::new(file)
            .finish(&mut df)
            .map_err(|e| DataError::Export(format!("write parquet: {e}")))?;
        Ok(())
    })?;
    info!(path = %path.display(), rows = table.height(), columns = table.width(), "wrote parquet");
    Ok(())
}

/// Write the table as CSV with a two-row header (symbol, then field).
///
/// Missing cells are left empty.
pub fn write_csv(table: &WideTable, path: &Path) -> Result<(), DataError> {
    write_atomically(path, |tmp| {
        let mut writer =
            csv::Writer::from_path(tmp).map_err(|e| DataError::Export(format!("create csv: {e}")))?;
        let csv_err = |e: csv::Error| DataError::Export(format!("write csv: {e}"));

        let mut symbols = vec!["symbol".to_string()];
        symbols.extend(table.columns().iter().map(|k| k.symbol.clone()));
        writer.write_record(&symbols).map_err(csv_err)?;

        let mut fields = vec!["trade_date".to_string()];
        fields.extend(table.columns().iter().map(|k| k.field.clone()));
        writer.write_record(&fields).map_err(csv_err)?;

        for (i, date) in table.dates().iter().enumerate() {
            let mut record = vec![date.format(WIRE_DATE_FORMAT).to_string()];
            for (_, cells) in table.iter_columns() {
                record.push(cells[i].map(|v| v.to_string()).unwrap_or_default());
            }
            writer.write_record(&record).map_err(csv_err)?;
        }
        writer
            .flush()
            .map_err(|e| DataError::Export(format!("flush csv: {e}")))
    })?;
    info!(path = %path.display(), rows = table.height(), columns = table.width(), "wrote csv");
    Ok(())
}

/// Write a benchmark series as `trade_date,<index_code>` CSV.
pub fn write_benchmark_csv(series: &BenchmarkSeries, path: &Path) -> Result<(), DataError> {
    write_atomically(path, |tmp| {
        let mut writer =
            csv::Writer::from_path(tmp).map_err(|e| DataError::Export(format!("create csv: {e}")))?;
        let csv_err = |e: csv::Error| DataError::Export(format!("write csv: {e}"));

        writer
            .write_record(["trade_date", series.index_code.as_str()])
            .map_err(csv_err)?;
        for (date, value) in series.iter() {
            writer
                .write_record([date.format(WIRE_DATE_FORMAT).to_string(), value.to_string()])
                .map_err(csv_err)?;
        }
        writer
            .flush()
            .map_err(|e| DataError::Export(format!("flush csv: {e}")))
    })?;
    info!(path = %path.display(), rows = series.len(), "wrote benchmark csv");
    Ok(())
}
