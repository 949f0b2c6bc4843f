//! CSV output of an exported [`Table`].

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use gnbwatch_protocol::TelemetryFrame;

use crate::export::{Alignment, INDEX_COLUMN, Table, flatten};

/// Errors from writing an export.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("output directory {} does not exist", .0.display())]
    MissingDirectory(PathBuf),

    #[error("export file {} already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Where and how to write the export for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
    /// Must already exist; it is never created.
    pub dir: PathBuf,
    pub device_id: String,
    pub alignment: Alignment,
}

/// Result of a successful export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutcome {
    pub path: PathBuf,
    pub rows: usize,
    pub columns: usize,
}

/// `<epoch>.<device>.csv`
pub fn export_file_name(epoch_secs: i64, device_id: &str) -> String {
    format!("{epoch_secs}.{device_id}.csv")
}

impl ExportRequest {
    /// Flattens `frames` and writes them to `<dir>/<epoch>.<device>.csv`.
    pub fn export(
        &self,
        frames: &[Arc<TelemetryFrame>],
        epoch_secs: i64,
    ) -> Result<ExportOutcome, ExportError> {
        let table = flatten(frames, self.alignment);
        debug!(
            frames = frames.len(),
            rows = table.rows.len(),
            columns = table.columns.len(),
            "telemetry flattened"
        );
        let path = write_csv(&table, &self.dir, &export_file_name(epoch_secs, &self.device_id))?;
        info!(path = %path.display(), rows = table.rows.len(), "telemetry exported");
        Ok(ExportOutcome {
            path,
            rows: table.rows.len(),
            columns: table.columns.len(),
        })
    }
}

/// Writes `table` as a new file in `dir`. Refuses to overwrite.
pub fn write_csv(table: &Table, dir: &Path, file_name: &str) -> Result<PathBuf, ExportError> {
    if !dir.is_dir() {
        return Err(ExportError::MissingDirectory(dir.to_path_buf()));
    }
    let path = dir.join(file_name);
    let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(ExportError::AlreadyExists(path));
        }
        Err(e) => return Err(e.into()),
    };
    write_table(table, file)?;
    Ok(path)
}

/// Writes `table` as CSV with a leading `timestamp` column.
pub fn write_table<W: io::Write>(table: &Table, out: W) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(std::iter::once(INDEX_COLUMN).chain(table.columns.iter().map(String::as_str)))?;
    for row in &table.rows {
        writer.write_record(
            std::iter::once(row.timestamp.as_str())
                .chain(row.cells.iter().map(|c| c.as_deref().unwrap_or(""))),
        )?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frames() -> Vec<Arc<TelemetryFrame>> {
        [
            r#"{"timestamp":1,"ues":[{"rnti":"a","rsrp":"10"}]}"#,
            r#"{"timestamp":2,"ues":[]}"#,
            r#"{"timestamp":3,"ues":[{"rnti":"b","rsrp":"-90"},{"rnti":"c","rsrp":"-80"}]}"#,
        ]
        .iter()
        .map(|s| Arc::new(TelemetryFrame::from_slice(s.as_bytes()).unwrap()))
        .collect()
    }

    #[test]
    fn file_name_layout() {
        assert_eq!(export_file_name(1_700_000_000, "m1"), "1700000000.m1.csv");
    }

    #[test]
    fn table_as_csv() {
        let table = flatten(&sample_frames(), Alignment::Slot);
        let mut out = Vec::new();
        write_table(&table, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "timestamp,0.rnti,0.rsrp,1.rnti,1.rsrp\n1,a,10,,\n3,b,-90,c,-80\n"
        );
    }

    #[test]
    fn export_writes_into_existing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let req = ExportRequest {
            dir: tmp.path().to_path_buf(),
            device_id: "m1".into(),
            alignment: Alignment::Slot,
        };
        let outcome = req.export(&sample_frames(), 42).unwrap();
        assert_eq!(outcome.path, tmp.path().join("42.m1.csv"));
        assert_eq!(outcome.rows, 2);
        assert_eq!(outcome.columns, 4);
        let text = std::fs::read_to_string(&outcome.path).unwrap();
        assert!(text.starts_with("timestamp,"));
    }

    #[test]
    fn missing_dir_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("output");
        let err = write_csv(&Table::default(), &dir, "x.csv").unwrap_err();
        assert!(matches!(err, ExportError::MissingDirectory(p) if p == dir));
        assert!(!dir.exists());
    }

    #[test]
    fn existing_file_is_not_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("1.m1.csv"), "keep").unwrap();
        let err = write_csv(&Table::default(), tmp.path(), "1.m1.csv").unwrap_err();
        assert!(matches!(err, ExportError::AlreadyExists(_)));
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("1.m1.csv")).unwrap(),
            "keep"
        );
    }

    #[test]
    fn empty_table_writes_header_only() {
        let mut out = Vec::new();
        write_table(&Table::default(), &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "timestamp\n");
    }
}
