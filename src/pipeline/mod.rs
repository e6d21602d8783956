pub mod controller;
pub mod downloader;
pub mod loader;
pub mod transformer;

pub use controller::{Pipeline, PipelineOptions, RunReport, RunRequest};
