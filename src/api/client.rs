use super::error::{ApiError, Result};
use super::throttle::{retry_after, RetryPolicy, Throttle};
use super::DataSource;
use crate::config::{ApiConfig, ClientSettings};
use crate::shared::{DataType, DateWindow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Bearer-authenticated client for the Oura v2 REST API.
pub struct OuraClient {
    client: Client,
    config: Arc<ApiConfig>,
    throttle: Throttle,
    retry: RetryPolicy,
}

impl OuraClient {
    pub fn new(config: Arc<ApiConfig>, settings: &ClientSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("oura-etl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Client(e.to_string()))?;

        let throttle = Throttle::per_minute(settings.rate_limit_per_minute);
        debug!(
            "Spacing requests to {} at least {:?} apart",
            config.base_url,
            throttle.min_interval()
        );

        Ok(Self {
            client,
            config,
            throttle,
            retry: RetryPolicy::from_settings(settings),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    /// GET `endpoint` and decode the body as JSON, retrying transient failures.
    pub async fn get_json(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value> {
        let url = self.url(endpoint);
        let mut attempt = 0;

        loop {
            self.throttle.wait().await;
            debug!("GET {} {:?} (attempt {})", url, params, attempt + 1);

            let sent = self
                .client
                .get(&url)
                .bearer_auth(&self.config.token)
                .query(params)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < self.retry.total => {
                    let delay = self.retry.delay(attempt, None);
                    warn!(
                        "Request to {} failed ({}), retrying in {:?} ({}/{})",
                        url,
                        e,
                        delay,
                        attempt + 1,
                        self.retry.total
                    );
                    sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                Err(e) => {
                    error!("Error making request to {}: {}", url, e);
                    return Err(e.into());
                }
            };

            let status = response.status();
            if status.is_success() {
                let body = response.text().await?;
                let value = serde_json::from_str(&body)
                    .map_err(|source| ApiError::Decode { url: url.clone(), source })?;
                info!("Fetched {} ({} bytes)", url, body.len());
                return Ok(value);
            }

            if self.retry.retries_status(status) && attempt < self.retry.total {
                let delay = self.retry.delay(attempt, retry_after(response.headers()));
                warn!(
                    "{} returned {}, retrying in {:?} ({}/{})",
                    url,
                    status,
                    delay,
                    attempt + 1,
                    self.retry.total
                );
                sleep(delay).await;
                attempt += 1;
                continue;
            }

            return match status {
                StatusCode::UNAUTHORIZED => Err(ApiError::Unauthorized),
                status => {
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    error!("{} returned {}: {}", url, status, body);
                    Err(ApiError::Status { status, body })
                }
            };
        }
    }
}

#[async_trait]
impl DataSource for OuraClient {
    async fn fetch(&self, data_type: DataType, window: &DateWindow) -> Result<serde_json::Value> {
        self.get_json(data_type.endpoint(), &window.query_params())
            .await
    }
}
