//! Record ingestion and artifact export.
//!
//! Input is one delimited table for the whole study (`.tsv`/`.txt` are read as
//! tab-separated, anything else as comma-separated) with the header columns
//! `reader`, `mode`, `patient_id` and either `ground_truth` + `prediction` (0/1) or a
//! single `result` column (TP/FP/FN/TN). Extra columns such as `lesion_id` are ignored.

use crate::types::{ClassificationRecord, Mode, ParseModeError, ParseResultCodeError, ResultCode};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),
    #[error("{path} is missing the required column '{column}'")]
    MissingColumn { path: String, column: String },
    #[error("{path} needs either 'ground_truth' and 'prediction' columns or a 'result' column")]
    MissingLabels { path: String },
    #[error("{path}, line {line}: {source}")]
    InvalidMode {
        path: String,
        line: u64,
        source: ParseModeError,
    },
    #[error("{path}, line {line}: column '{column}' must be 0 or 1, found '{value}'")]
    InvalidLabel {
        path: String,
        line: u64,
        column: String,
        value: String,
    },
    #[error("{path}, line {line}: {source}")]
    InvalidResultCode {
        path: String,
        line: u64,
        source: ParseResultCodeError,
    },
    #[error("{path} contains no records")]
    Empty { path: String },
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),
}

/// All records of one reader, split by mode, input order preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReaderData {
    pub reader: String,
    pub assisted: Vec<ClassificationRecord>,
    pub unaided: Vec<ClassificationRecord>,
}

impl ReaderData {
    pub fn new(reader: impl Into<String>) -> Self {
        Self {
            reader: reader.into(),
            ..Self::default()
        }
    }

    pub fn records(&self, mode: Mode) -> &[ClassificationRecord] {
        match mode {
            Mode::Assisted => &self.assisted,
            Mode::Unaided => &self.unaided,
        }
    }

    pub fn push(&mut self, mode: Mode, record: ClassificationRecord) {
        match mode {
            Mode::Assisted => self.assisted.push(record),
            Mode::Unaided => self.unaided.push(record),
        }
    }
}

/// Reads a study table into one [`ReaderData`] per reader, readers in first-appearance order.
pub fn load_reader_records(path: &Path) -> Result<Vec<ReaderData>, DataError> {
    let display = path.display().to_string();
    let file = File::open(path)?;

    let is_tab = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("tsv") || e.eq_ignore_ascii_case("txt"))
        .unwrap_or(false);
    let delimiter = if is_tab { b'\t' } else { b',' };

    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(BufReader::new(file));

    let headers = rdr.headers()?.clone();
    let columns = internal::Columns::locate(&headers, &display)?;

    let mut readers: Vec<ReaderData> = Vec::new();
    for result in rdr.records() {
        let row = result?;
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        let field = |idx: usize| row.get(idx).unwrap_or("");

        let mode: Mode = field(columns.mode).parse().map_err(|source| DataError::InvalidMode {
            path: display.clone(),
            line,
            source,
        })?;
        let patient_id = field(columns.patient_id).to_string();
        let record = match columns.labels {
            internal::LabelColumns::Binary { ground_truth, prediction } => {
                let parse = |idx: usize, name: &str| {
                    internal::parse_binary(field(idx)).ok_or_else(|| DataError::InvalidLabel {
                        path: display.clone(),
                        line,
                        column: name.to_string(),
                        value: field(idx).to_string(),
                    })
                };
                ClassificationRecord::new(
                    patient_id,
                    parse(ground_truth, "ground_truth")?,
                    parse(prediction, "prediction")?,
                )
            }
            internal::LabelColumns::ResultCode(idx) => {
                let code: ResultCode =
                    field(idx)
                        .parse()
                        .map_err(|source| DataError::InvalidResultCode {
                            path: display.clone(),
                            line,
                            source,
                        })?;
                ClassificationRecord::from_result_code(patient_id, code)
            }
        };

        let reader = field(columns.reader);
        let slot = match readers.iter().position(|r| r.reader == reader) {
            Some(i) => i,
            None => {
                readers.push(ReaderData::new(reader));
                readers.len() - 1
            }
        };
        readers[slot].push(mode, record);
    }

    if readers.is_empty() {
        return Err(DataError::Empty { path: display });
    }
    for r in &readers {
        log::info!(
            "Loaded reader '{}': {} assisted, {} unaided records",
            r.reader,
            r.assisted.len(),
            r.unaided.len()
        );
    }
    Ok(readers)
}

pub fn prepare_output_path(path: &Path) -> Result<(), io::Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Writes `value` as pretty-printed JSON.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<PathBuf, OutputError> {
    prepare_output_path(path)?;
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    log::debug!("Wrote {}", path.display());
    Ok(path.to_path_buf())
}

/// Writes one CSV row per element of `rows`, with a header from the field names.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<PathBuf, OutputError> {
    prepare_output_path(path)?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(File::create(path)?));
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    log::debug!("Wrote {}", path.display());
    Ok(path.to_path_buf())
}

pub fn write_text(path: &Path, content: &str) -> Result<PathBuf, OutputError> {
    prepare_output_path(path)?;
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(content.as_bytes())?;
    writer.flush()?;
    log::debug!("Wrote {}", path.display());
    Ok(path.to_path_buf())
}

mod internal {
    use super::*;

    pub(super) enum LabelColumns {
        Binary { ground_truth: usize, prediction: usize },
        ResultCode(usize),
    }

    pub(super) struct Columns {
        pub(super) reader: usize,
        pub(super) mode: usize,
        pub(super) patient_id: usize,
        pub(super) labels: LabelColumns,
    }

    impl Columns {
        pub(super) fn locate(headers: &StringRecord, path: &str) -> Result<Self, DataError> {
            let find = |name: &str| {
                headers
                    .iter()
                    .position(|h| h.trim().eq_ignore_ascii_case(name))
            };
            let require = |name: &str| {
                find(name).ok_or_else(|| DataError::MissingColumn {
                    path: path.to_string(),
                    column: name.to_string(),
                })
            };

            let labels = match (find("ground_truth"), find("prediction"), find("result")) {
                (Some(ground_truth), Some(prediction), _) => LabelColumns::Binary {
                    ground_truth,
                    prediction,
                },
                (_, _, Some(idx)) => LabelColumns::ResultCode(idx),
                _ => {
                    return Err(DataError::MissingLabels {
                        path: path.to_string(),
                    });
                }
            };

            Ok(Self {
                reader: require("reader")?,
                mode: require("mode")?,
                patient_id: require("patient_id")?,
                labels,
            })
        }
    }

    pub(super) fn parse_binary(value: &str) -> Option<bool> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "1.0" | "true" => Some(true),
            "0" | "0.0" | "false" => Some(false),
            _ => None,
        }
    }
}
