use crate::database::{Database, LoadError};
use crate::error::{EtlError, Result};
use crate::pipeline::transformer::Row;
use crate::shared::DataType;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Outcome of a load step.
#[derive(Debug, Default)]
pub struct LoadSummary {
    pub files_loaded: usize,
    pub files_failed: usize,
    pub rows_written: u64,
    /// Row count of every table after the load.
    pub table_rows: Vec<(String, i64)>,
}

/// Moves processed JSONL files into the database.
pub struct Loader {
    db: Database,
}

impl Loader {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[cfg(test)]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Loads one `{table}.{stem}.jsonl` file into `table`.
    pub async fn load_file(&self, path: &Path) -> std::result::Result<(String, u64), LoadError> {
        let table = table_for_file(path)
            .ok_or_else(|| LoadError::InvalidIdentifier(path.display().to_string()))?;
        let rows = read_rows(path).await?;
        if rows.is_empty() {
            return Ok((table, 0));
        }

        let written = self.db.upsert_rows(&table, &rows).await?;
        info!("Loaded {} records from {} into {}", written, path.display(), table);
        Ok((table, written))
    }

    pub async fn load_directory(&self, processed_dir: &Path) -> Result<LoadSummary> {
        if !processed_dir.exists() {
            return Err(EtlError::DirectoryNotFound(processed_dir.to_path_buf()));
        }

        let mut summary = LoadSummary::default();
        for data_type in DataType::ALL {
            let dir = processed_dir.join(data_type.as_str());
            if !dir.is_dir() {
                continue;
            }

            let files = processed_files(&dir)
                .await
                .map_err(crate::error::io_at(&dir))?;
            for path in files {
                match self.load_file(&path).await {
                    Ok((_, written)) => {
                        summary.files_loaded += 1;
                        summary.rows_written += written;
                    }
                    Err(e) => {
                        error!("Failed to load {}: {}", path.display(), e);
                        summary.files_failed += 1;
                    }
                }
            }
        }

        for table in self.db.tables().await? {
            let count = self.db.count(&table).await?;
            summary.table_rows.push((table, count));
        }

        info!(
            "Loaded {} rows from {} files ({} failed)",
            summary.rows_written, summary.files_loaded, summary.files_failed
        );
        Ok(summary)
    }
}

/// Table name is the file name up to the first `.`.
pub fn table_for_file(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let (table, _) = name.split_once('.')?;
    (!table.is_empty()).then(|| table.to_string())
}

async fn processed_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && path.extension().is_some_and(|ext| ext == "jsonl") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn read_rows(path: &Path) -> std::result::Result<Vec<Row>, LoadError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let mut rows = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(line).map_err(|source| LoadError::Json {
            path: path.to_path_buf(),
            line: index + 1,
            source,
        })?;
        rows.push(row);
    }
    Ok(rows)
}
