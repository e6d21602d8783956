use crate::api::DataSource;
use crate::error::{io_at, Result};
use crate::shared::{DataType, DateWindow};
use chrono::Local;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Outcome of an extract step: which data types made it to disk.
#[derive(Debug, Default)]
pub struct ExtractSummary {
    pub saved: Vec<(DataType, PathBuf)>,
    pub failed: Vec<(DataType, String)>,
}

impl ExtractSummary {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fetches API responses and stores them verbatim under `{raw_dir}/{data_type}/`.
pub struct Downloader {
    source: Arc<dyn DataSource>,
    raw_dir: PathBuf,
}

impl Downloader {
    pub fn new(source: Arc<dyn DataSource>, raw_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            raw_dir: raw_dir.into(),
        }
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    /// Downloads one data type and returns the path of the saved JSON file.
    pub async fn download(&self, data_type: DataType, window: &DateWindow) -> Result<PathBuf> {
        let body = self.source.fetch(data_type, window).await?;

        let dir = self.raw_dir.join(data_type.as_str());
        tokio::fs::create_dir_all(&dir).await.map_err(io_at(&dir))?;

        let path = unique_path(&dir, data_type).await;
        tokio::fs::write(&path, serde_json::to_vec_pretty(&body)?)
            .await
            .map_err(io_at(&path))?;

        info!(
            "Saved {} {} records to {}",
            record_count(&body),
            data_type,
            path.display()
        );
        Ok(path)
    }

    /// Downloads each data type in turn; a failing type does not stop the others.
    pub async fn download_all(&self, data_types: &[DataType], window: &DateWindow) -> ExtractSummary {
        let mut summary = ExtractSummary::default();

        for &data_type in data_types {
            info!("Extracting {} data", data_type);
            match self.download(data_type, window).await {
                Ok(path) => summary.saved.push((data_type, path)),
                Err(e) => {
                    error!("Failed to extract {} data: {}", data_type, e);
                    summary.failed.push((data_type, e.to_string()));
                }
            }
        }

        summary
    }
}

/// `{data_type}_{YYYYmmdd_HHMMSS}.json`, suffixed when that name is taken.
async fn unique_path(dir: &Path, data_type: DataType) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let mut path = dir.join(format!("{data_type}_{stamp}.json"));
    let mut n = 1;
    while tokio::fs::try_exists(&path).await.unwrap_or(false) {
        path = dir.join(format!("{data_type}_{stamp}_{n}.json"));
        n += 1;
    }
    path
}

/// Number of records in a response: the `data` array length, or 1 for a bare object.
pub fn record_count(body: &Value) -> usize {
    match body.get("data") {
        Some(Value::Array(items)) => items.len(),
        _ if body.is_object() => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, Result as ApiResult};
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedSource;

    #[async_trait]
    impl DataSource for FixedSource {
        async fn fetch(&self, data_type: DataType, _window: &DateWindow) -> ApiResult<Value> {
            match data_type {
                DataType::Workout => Err(ApiError::Unauthorized),
                _ => Ok(json!({ "data": [{ "id": "a" }, { "id": "b" }], "next_token": null })),
            }
        }
    }

    #[tokio::test]
    async fn saves_response_under_data_type_directory() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(Arc::new(FixedSource), dir.path());

        let path = downloader
            .download(DataType::DailySleep, &DateWindow::default())
            .await
            .unwrap();

        assert_eq!(path.parent().unwrap(), dir.path().join("daily_sleep"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("daily_sleep_") && name.ends_with(".json"));
        let saved: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(saved["data"][1]["id"], "b");
    }

    #[tokio::test]
    async fn repeated_downloads_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(Arc::new(FixedSource), dir.path());

        let first = downloader.download(DataType::Tag, &DateWindow::default()).await.unwrap();
        let second = downloader.download(DataType::Tag, &DateWindow::default()).await.unwrap();

        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
    }

    #[tokio::test]
    async fn failing_type_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(Arc::new(FixedSource), dir.path());

        let summary = downloader
            .download_all(
                &[DataType::Workout, DataType::Sleep],
                &DateWindow::default(),
            )
            .await;

        assert!(!summary.is_complete());
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, DataType::Workout);
        assert_eq!(summary.saved.len(), 1);
        assert_eq!(summary.saved[0].0, DataType::Sleep);
    }

    #[test]
    fn counts_records_in_list_and_single_responses() {
        assert_eq!(record_count(&json!({ "data": [1, 2, 3] })), 3);
        assert_eq!(record_count(&json!({ "id": "me", "age": 30 })), 1);
        assert_eq!(record_count(&json!([1, 2])), 0);
    }
}
