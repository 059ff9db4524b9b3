use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{http_client, MarketDataProvider};
use crate::error::{IngestError, Result};
use crate::models::Config;

/// Client for the structured market-data API.
pub struct MarketDataClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl MarketDataClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: config.market_data_base_url.trim_end_matches('/').to_string(),
            api_key: config.market_data_api_key.clone(),
        })
    }

    /// GET a provider endpoint, mapping transport and status failures
    /// onto the error taxonomy: network problems are retryable
    /// `SourceUnavailable`, a 404 is terminal `NoDataFound`.
    async fn get_json(&self, url: &str) -> Result<Value> {
        debug!(%url, "market-data request");

        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| IngestError::SourceUnavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(IngestError::NoDataFound(url.to_string()));
        }
        if !response.status().is_success() {
            return Err(IngestError::SourceUnavailable(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| IngestError::SourceUnavailable(format!("{}: {}", url, e)))
    }
}

#[async_trait]
impl MarketDataProvider for MarketDataClient {
    async fn company_overview(&self, ticker: &str) -> Result<Value> {
        let url = format!("{}/v1/companies/{}", self.base_url, ticker);
        let data = self.get_json(&url).await?;

        // Some providers answer 200 with an empty object for unknown
        // symbols.
        if data.as_object().map(|o| o.is_empty()).unwrap_or(true) {
            return Err(IngestError::NoDataFound(ticker.to_string()));
        }
        Ok(data)
    }

    async fn quarterly_statements(&self, ticker: &str) -> Result<Vec<Value>> {
        let url = format!("{}/v1/companies/{}/quarterlies", self.base_url, ticker);
        let data = self.get_json(&url).await?;

        let reports = match &data {
            Value::Array(items) => items.clone(),
            Value::Object(map) => map
                .get("quarterlyReports")
                .or_else(|| map.get("quarters"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        if reports.is_empty() {
            return Err(IngestError::NoDataFound(format!("{} quarterlies", ticker)));
        }

        debug!(%ticker, count = reports.len(), "retrieved quarterly statements");
        Ok(reports)
    }
}
