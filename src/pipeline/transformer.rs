//! Turns raw API responses into flat table rows.
//!
//! Each item becomes one row in the data type's main table holding its scalar
//! fields. Nested objects that carry their own meaning (score contributors,
//! sample series, SpO2 averages) are split into child tables keyed by the
//! parent's id; other nested values are dropped.

use crate::error::{EtlError, Result};
use crate::shared::DataType;
use chrono::{DateTime, FixedOffset, TimeDelta};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub type Row = Map<String, Value>;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unexpected {data_type} payload: {reason}")]
    Shape { data_type: DataType, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// Object of sub-scores copied into one row.
    Contributors,
    /// `{timestamp, interval, items}` expanded to one row per sample.
    Samples,
    /// `{average}` stored with the parent's timestamp.
    Average,
}

struct Nested {
    field: &'static str,
    table: &'static str,
    shape: Shape,
}

const fn nested(field: &'static str, table: &'static str, shape: Shape) -> Nested {
    Nested { field, table, shape }
}

fn nested_fields(data_type: DataType) -> &'static [Nested] {
    const ACTIVITY: &[Nested] = &[
        nested("contributors", "activity_contributors", Shape::Contributors),
        nested("met", "activity_metrics", Shape::Samples),
    ];
    const SLEEP: &[Nested] = &[
        nested("heart_rate", "heart_rate_samples", Shape::Samples),
        nested("hrv", "hrv_samples", Shape::Samples),
    ];
    const READINESS: &[Nested] = &[nested(
        "contributors",
        "readiness_contributors",
        Shape::Contributors,
    )];
    const DAILY_SLEEP: &[Nested] = &[nested(
        "contributors",
        "sleep_contributors",
        Shape::Contributors,
    )];
    const SPO2: &[Nested] = &[nested("spo2_percentage", "spo2_percentage", Shape::Average)];
    const RESILIENCE: &[Nested] = &[nested(
        "contributors",
        "resilience_contributors",
        Shape::Contributors,
    )];

    match data_type {
        DataType::DailyActivity => ACTIVITY,
        DataType::Sleep => SLEEP,
        DataType::DailyReadiness => READINESS,
        DataType::DailySleep => DAILY_SLEEP,
        DataType::DailySpo2 => SPO2,
        DataType::DailyResilience => RESILIENCE,
        _ => &[],
    }
}

/// Rows per table, in table-name order.
#[derive(Debug, Default)]
pub struct Tables {
    tables: BTreeMap<String, Vec<Row>>,
}

impl Tables {
    fn push(&mut self, table: &str, row: Row) {
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    #[cfg(test)]
    pub fn get(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Row])> {
        self.tables.iter().map(|(name, rows)| (name.as_str(), rows.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Stable id for rows the API does not identify itself.
fn derived_id(name: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("oura-etl:{name}").as_bytes()).to_string()
}

fn items_of(data_type: DataType, body: &Value) -> std::result::Result<Vec<Row>, TransformError> {
    let shape_error = |reason: &str| TransformError::Shape {
        data_type,
        reason: reason.to_string(),
    };

    let object = body
        .as_object()
        .ok_or_else(|| shape_error("response is not a JSON object"))?;

    let items = match object.get("data") {
        Some(Value::Array(items)) => items.clone(),
        Some(_) => return Err(shape_error("'data' is not an array")),
        // Single-record endpoints such as personal_info
        None if object.contains_key("id") => vec![body.clone()],
        None => Vec::new(),
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(map),
            _ => Err(shape_error("item is not an object")),
        })
        .collect()
}

/// Splits a response body into rows for the main table and its child tables.
pub fn normalize(data_type: DataType, body: &Value) -> std::result::Result<Tables, TransformError> {
    let mut tables = Tables::default();
    let parent_key = format!("{}_id", data_type.as_str());

    for item in items_of(data_type, body)? {
        let mut row: Row = item
            .iter()
            .filter(|(_, v)| !v.is_object() && !v.is_array())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let id = match row.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(other) if !other.is_null() => other.to_string(),
            _ => derived_id(&format!(
                "{}:{}",
                data_type,
                Value::Object(row.clone())
            )),
        };
        row.insert("id".to_string(), Value::String(id.clone()));

        for nested in nested_fields(data_type) {
            let Some(value) = item.get(nested.field) else {
                continue;
            };
            match nested.shape {
                Shape::Contributors => {
                    if let Some(row) = contributors_row(value, &id, &parent_key, nested.table) {
                        tables.push(nested.table, row);
                    }
                }
                Shape::Samples => {
                    for row in sample_rows(value, &id, &parent_key, nested.table) {
                        tables.push(nested.table, row);
                    }
                }
                Shape::Average => {
                    if let Some(row) =
                        average_row(value, item.get("timestamp"), &id, &parent_key, nested.table)
                    {
                        tables.push(nested.table, row);
                    }
                }
            }
        }

        tables.push(data_type.as_str(), row);
    }

    Ok(tables)
}

fn contributors_row(value: &Value, parent_id: &str, parent_key: &str, table: &str) -> Option<Row> {
    let contributors = value.as_object()?;
    let mut row = Row::new();
    row.insert(
        "id".to_string(),
        Value::String(derived_id(&format!("{table}:{parent_id}"))),
    );
    row.insert(parent_key.to_string(), Value::String(parent_id.to_string()));
    for (k, v) in contributors {
        if k != "id" && k != parent_key {
            row.insert(k.clone(), v.clone());
        }
    }
    Some(row)
}

fn sample_rows(value: &Value, parent_id: &str, parent_key: &str, table: &str) -> Vec<Row> {
    let Some(series) = value.as_object() else {
        return Vec::new();
    };
    let Some(items) = series.get("items").and_then(Value::as_array) else {
        return Vec::new();
    };
    let interval = series.get("interval").and_then(Value::as_f64);
    let start = series.get("timestamp").and_then(Value::as_str);
    let parsed_start = start.and_then(|s| DateTime::parse_from_rfc3339(s).ok());

    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let sample = item.as_f64()?;
            let timestamp = match sample_time(parsed_start, interval, index) {
                Some(time) => Value::String(time.to_rfc3339()),
                None => start.map_or(Value::Null, |s| Value::String(s.to_string())),
            };

            let mut row = Row::new();
            row.insert(
                "id".to_string(),
                Value::String(derived_id(&format!("{table}:{parent_id}:{index}"))),
            );
            row.insert(parent_key.to_string(), Value::String(parent_id.to_string()));
            row.insert("timestamp".to_string(), timestamp);
            row.insert(
                "interval".to_string(),
                interval.map_or(Value::Null, Value::from),
            );
            row.insert("value".to_string(), Value::from(sample));
            Some(row)
        })
        .collect()
}

/// `start + index * interval` seconds, or `None` when that is not a representable time.
fn sample_time(
    start: Option<DateTime<FixedOffset>>,
    interval: Option<f64>,
    index: usize,
) -> Option<DateTime<FixedOffset>> {
    let start = start?;
    let interval = interval.filter(|i| i.is_finite() && *i >= 0.0)?;
    let millis = interval * 1000.0 * index as f64;
    if millis >= i64::MAX as f64 {
        return None;
    }
    start.checked_add_signed(TimeDelta::try_milliseconds(millis as i64)?)
}

fn average_row(
    value: &Value,
    timestamp: Option<&Value>,
    parent_id: &str,
    parent_key: &str,
    table: &str,
) -> Option<Row> {
    let average = value.as_object()?.get("average")?.clone();
    let mut row = Row::new();
    row.insert(
        "id".to_string(),
        Value::String(derived_id(&format!("{table}:{parent_id}"))),
    );
    row.insert(parent_key.to_string(), Value::String(parent_id.to_string()));
    row.insert("average".to_string(), average);
    row.insert(
        "timestamp".to_string(),
        timestamp.cloned().unwrap_or(Value::Null),
    );
    Some(row)
}

/// Outcome of a process step.
#[derive(Debug, Default)]
pub struct ProcessSummary {
    pub files_processed: usize,
    pub files_failed: usize,
    pub outputs: Vec<PathBuf>,
}

/// Writes normalized rows as JSONL under `{processed_dir}/{data_type}/`.
pub struct Transformer {
    processed_dir: PathBuf,
}

impl Transformer {
    pub fn new(processed_dir: impl Into<PathBuf>) -> Self {
        Self {
            processed_dir: processed_dir.into(),
        }
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    /// Normalizes one raw file, writing `{table}.{raw_stem}.jsonl` per table.
    pub fn transform_file(
        &self,
        data_type: DataType,
        raw_file: &Path,
    ) -> std::result::Result<Vec<PathBuf>, TransformError> {
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| TransformError::Io { path, source }
        };

        let content = std::fs::read(raw_file).map_err(io_error(raw_file))?;
        let body: Value = serde_json::from_slice(&content).map_err(|source| TransformError::Json {
            path: raw_file.to_path_buf(),
            source,
        })?;

        let tables = normalize(data_type, &body)?;
        if tables.is_empty() {
            warn!("No data items found in {}", raw_file.display());
            return Ok(Vec::new());
        }

        let out_dir = self.processed_dir.join(data_type.as_str());
        std::fs::create_dir_all(&out_dir).map_err(io_error(&out_dir))?;

        let stem = raw_file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("raw");

        let mut written = Vec::new();
        for (table, rows) in tables.iter() {
            let path = out_dir.join(format!("{table}.{stem}.jsonl"));
            write_rows(&path, rows).map_err(io_error(&path))?;
            debug!("Wrote {} rows to {}", rows.len(), path.display());
            written.push(path);
        }

        info!(
            "Saved {} processed files for {} from {}",
            written.len(),
            data_type,
            raw_file.display()
        );
        Ok(written)
    }

    /// Processes every raw file found for every data type.
    pub fn transform_directory(&self, raw_dir: &Path) -> Result<ProcessSummary> {
        if !raw_dir.exists() {
            return Err(EtlError::DirectoryNotFound(raw_dir.to_path_buf()));
        }
        info!("Starting transformation of files in {}", raw_dir.display());

        let mut summary = ProcessSummary::default();
        for data_type in DataType::ALL {
            let files = raw_files(raw_dir, data_type)
                .map_err(|source| EtlError::Io {
                    path: raw_dir.to_path_buf(),
                    source,
                })?;
            if files.is_empty() {
                debug!("No JSON files found for {}", data_type);
                continue;
            }
            info!("Found {} JSON files for {}", files.len(), data_type);

            for file in files {
                match self.transform_file(data_type, &file) {
                    Ok(outputs) => {
                        summary.files_processed += 1;
                        summary.outputs.extend(outputs);
                    }
                    Err(e) => {
                        error!("Failed to transform {}: {}", file.display(), e);
                        summary.files_failed += 1;
                    }
                }
            }
        }

        info!(
            "Completed directory transformation: {} files processed, {} failed",
            summary.files_processed, summary.files_failed
        );
        Ok(summary)
    }
}

fn write_rows(path: &Path, rows: &[Row]) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

/// Raw files for `data_type`: `{raw_dir}/{data_type}/*.json` plus files named
/// `{data_type}_<digits>...json` directly in `raw_dir`. Sorted by path.
pub fn raw_files(raw_dir: &Path, data_type: DataType) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    let nested_dir = raw_dir.join(data_type.as_str());
    if nested_dir.is_dir() {
        for entry in std::fs::read_dir(&nested_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }

    let prefix = format!("{}_", data_type.as_str());
    for entry in std::fs::read_dir(raw_dir)? {
        let path = entry?.path();
        if !path.is_file() || !path.extension().is_some_and(|ext| ext == "json") {
            continue;
        }
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix(&prefix))
            .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()));
        if matches {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}
