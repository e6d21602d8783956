mod client;
mod error;
mod throttle;

pub use client::OuraClient;
pub use error::{ApiError, Result};

use crate::shared::{DataType, DateWindow};
use async_trait::async_trait;

/// Anything that can answer a user collection query with the raw JSON body.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(&self, data_type: DataType, window: &DateWindow) -> Result<serde_json::Value>;
}
