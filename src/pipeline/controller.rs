use super::downloader::{Downloader, ExtractSummary};
use super::loader::{LoadSummary, Loader};
use super::transformer::{ProcessSummary, Transformer};
use crate::api::DataSource;
use crate::database::Database;
use crate::error::{io_at, Result};
use crate::shared::{DataType, DateWindow, Step};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub db_path: PathBuf,
}

/// What to run. An empty `data_types` means every type; empty `steps` means all steps.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub data_types: Vec<DataType>,
    pub window: DateWindow,
    pub steps: Vec<Step>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub extract: Option<ExtractSummary>,
    pub process: Option<ProcessSummary>,
    pub load: Option<LoadSummary>,
}

impl RunReport {
    /// Data types whose extraction failed.
    pub fn failed_types(&self) -> Vec<DataType> {
        self.extract
            .as_ref()
            .map(|s| s.failed.iter().map(|(t, _)| *t).collect())
            .unwrap_or_default()
    }
}

/// Runs extract, process and load over the configured directories.
pub struct Pipeline {
    downloader: Downloader,
    transformer: Transformer,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(source: Arc<dyn DataSource>, options: PipelineOptions) -> Result<Self> {
        std::fs::create_dir_all(&options.raw_dir).map_err(io_at(&options.raw_dir))?;
        std::fs::create_dir_all(&options.processed_dir).map_err(io_at(&options.processed_dir))?;

        Ok(Self {
            downloader: Downloader::new(source, &options.raw_dir),
            transformer: Transformer::new(&options.processed_dir),
            options,
        })
    }

    pub async fn extract(&self, data_types: &[DataType], window: &DateWindow) -> ExtractSummary {
        let data_types = if data_types.is_empty() {
            &DataType::ALL[..]
        } else {
            data_types
        };
        info!(
            "Extracting {} data types for {} to {}",
            data_types.len(),
            window.start().map_or("-".to_string(), |d| d.to_string()),
            window.end().map_or("-".to_string(), |d| d.to_string())
        );
        self.downloader.download_all(data_types, window).await
    }

    pub fn process(&self) -> Result<ProcessSummary> {
        info!("Processing raw data in {}", self.downloader.raw_dir().display());
        self.transformer.transform_directory(self.downloader.raw_dir())
    }

    pub async fn load(&self) -> Result<LoadSummary> {
        info!(
            "Loading processed data from {} into {}",
            self.transformer.processed_dir().display(),
            self.options.db_path.display()
        );
        let db = Database::open(&self.options.db_path).await?;
        Loader::new(db)
            .load_directory(self.transformer.processed_dir())
            .await
    }

    pub async fn run(&self, request: &RunRequest) -> Result<RunReport> {
        let steps = if request.steps.is_empty() {
            &Step::ALL[..]
        } else {
            &request.steps[..]
        };
        let mut report = RunReport::default();

        if steps.contains(&Step::Extract) {
            info!("Starting extraction step");
            let summary = self.extract(&request.data_types, &request.window).await;
            if !summary.is_complete() {
                warn!("{} data types failed to extract", summary.failed.len());
            }
            report.extract = Some(summary);
        }
        if steps.contains(&Step::Process) {
            info!("Starting processing step");
            report.process = Some(self.process()?);
        }
        if steps.contains(&Step::Load) {
            info!("Starting loading step");
            report.load = Some(self.load().await?);
        }

        info!("Pipeline finished");
        Ok(report)
    }
}
