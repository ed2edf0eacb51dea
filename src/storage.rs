//! File export for completed runs.
//!
//! Every run produces a [`SampleLog`](crate::sample::SampleLog) plus a
//! [`RunInfo`] header describing what was measured. [`CsvWriter`] writes
//! both into a single CSV file: the header as `# `-prefixed pretty-printed
//! JSON lines, then one record per sample. A file read back therefore
//! carries everything needed to interpret it, without a sidecar.
//!
//! ## Feature Flags
//!
//! CSV export pulls in the `csv` crate and is gated behind the
//! `storage_csv` feature (enabled by default). With the feature off,
//! [`CsvWriter`] still exists but every export returns
//! [`DaqError::FeatureNotEnabled`](crate::error::DaqError::FeatureNotEnabled),
//! so callers compile unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DaqResult;

/// Descriptive header for one exported run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    /// Unique id assigned when the header is created.
    pub run_id: Uuid,
    /// Protocol name, e.g. `"iv_sweep"`. Also used as the file name prefix.
    pub protocol: String,
    /// Hardware model string the run was validated against.
    pub model: String,
    /// Wall-clock start of the run.
    pub started_utc: DateTime<Utc>,
    /// Full parameter set the run was invoked with, if attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RunInfo {
    /// Header for a run starting now.
    pub fn new(protocol: &str, model: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            protocol: protocol.to_string(),
            model: model.to_string(),
            started_utc: Utc::now(),
            params: None,
        }
    }

    /// Attach the run parameters as a JSON document.
    pub fn with_params<P: Serialize>(mut self, params: &P) -> DaqResult<Self> {
        self.params = Some(serde_json::to_value(params)?);
        Ok(self)
    }
}

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use std::fs::File;
    use std::io::Write;
    use std::path::{Path, PathBuf};

    use super::RunInfo;
    use crate::error::DaqResult;
    use crate::sample::SampleLog;

    /// Writes one CSV file per run into a target directory.
    #[derive(Debug, Clone)]
    pub struct CsvWriter {
        dir: PathBuf,
    }

    impl CsvWriter {
        /// A writer that places files under `dir`, creating it on first use.
        pub fn new(dir: impl Into<PathBuf>) -> Self {
            Self { dir: dir.into() }
        }

        /// Directory the writer exports into.
        pub fn dir(&self) -> &Path {
            &self.dir
        }

        /// Write `log` with its `info` header, returning the created path.
        ///
        /// The file name is `<protocol>_<YYYYmmdd_HHMMSS>.csv`, derived from
        /// the run start time. Failed readings serialize as `NaN` in the
        /// `current_a` column.
        pub fn export(&self, info: &RunInfo, log: &SampleLog) -> DaqResult<PathBuf> {
            if !self.dir.exists() {
                std::fs::create_dir_all(&self.dir)?;
            }
            let file_name = format!(
                "{}_{}.csv",
                info.protocol,
                info.started_utc.format("%Y%m%d_%H%M%S")
            );
            let path = self.dir.join(file_name);
            let mut file = File::create(&path)?;

            let json_string = serde_json::to_string_pretty(info)?;
            for line in json_string.lines() {
                file.write_all(b"# ")
                    .and_then(|_| file.write_all(line.as_bytes()))
                    .and_then(|_| file.write_all(b"\n"))?;
            }

            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(["voltage_v", "current_a", "elapsed_s"])?;
            for sample in log.iter() {
                writer.write_record(&[
                    sample.voltage_v.to_string(),
                    sample.current_a.to_string(),
                    sample.elapsed_s.to_string(),
                ])?;
            }
            writer.flush()?;

            log::info!("Exported {} rows to '{}'.", log.len(), path.display());
            Ok(path)
        }
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use std::path::{Path, PathBuf};

    use super::RunInfo;
    use crate::error::{DaqError, DaqResult};
    use crate::sample::SampleLog;

    /// Placeholder that reports the missing `storage_csv` feature.
    #[derive(Debug, Clone)]
    pub struct CsvWriter {
        dir: PathBuf,
    }

    impl CsvWriter {
        /// A writer that would place files under `dir`.
        pub fn new(dir: impl Into<PathBuf>) -> Self {
            Self { dir: dir.into() }
        }

        /// Directory the writer would export into.
        pub fn dir(&self) -> &Path {
            &self.dir
        }

        /// Always fails: the `storage_csv` feature is not compiled in.
        pub fn export(&self, _info: &RunInfo, _log: &SampleLog) -> DaqResult<PathBuf> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::CsvWriter;
#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::CsvWriter;


#[cfg(all(test, feature = "storage_csv"))]
mod csv_tests {
    use super::*;
    use crate::sample::{Sample, SampleLog};

    fn two_row_log() -> SampleLog {
        let mut log = SampleLog::new();
        log.push(Sample {
            voltage_v: 0.1,
            current_a: 1e-6,
            elapsed_s: 0.0,
        });
        log.push(Sample::failed(0.2, 0.5));
        log
    }

    #[test]
    fn test_export_writes_commented_header_then_rows() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CsvWriter::new(dir.path());
        let info = RunInfo::new("iv_sweep", "generic")
            .with_params(&serde_json::json!({"start_v": 0.0, "stop_v": 1.0}))
            .unwrap();

        let path = writer.export(&info, &two_row_log()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();

        let header_json: String = content
            .lines()
            .filter_map(|l| l.strip_prefix("# "))
            .collect::<Vec<_>>()
            .join("\n");
        let parsed: serde_json::Value = serde_json::from_str(&header_json).unwrap();
        assert_eq!(parsed["protocol"], "iv_sweep");
        assert_eq!(parsed["model"], "generic");
        assert_eq!(parsed["params"]["stop_v"], 1.0);

        let data_lines: Vec<&str> = content
            .lines()
            .filter(|l| !l.starts_with('#') && !l.is_empty())
            .collect();
        assert_eq!(data_lines[0], "voltage_v,current_a,elapsed_s");
        assert_eq!(data_lines.len(), 3, "header plus one line per sample");
        assert!(data_lines[2].contains("NaN"), "failed reading kept as NaN");
    }

    #[test]
    fn test_export_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("runs").join("today");
        let writer = CsvWriter::new(&nested);

        let path = writer
            .export(&RunInfo::new("retention", "generic"), &SampleLog::new())
            .unwrap();
        assert!(path.starts_with(&nested));
        assert!(path.exists());
    }

    #[test]
    fn test_file_name_carries_protocol_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CsvWriter::new(dir.path());

        let path = writer
            .export(&RunInfo::new("endurance", "generic"), &SampleLog::new())
            .unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("endurance_"), "unexpected name: {name}");
        assert!(name.ends_with(".csv"));
    }
}
