use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::{Config, FETCH_TIMEOUT_SECS};
use crate::error::{AppError, Result};

/// Source of raw auction lots for one item id.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetch up to `limit` lots for `item_id`. Lots are returned undecoded so
    /// one malformed entry cannot fail the batch.
    async fn fetch_lots(&self, item_id: &str, limit: u32, token: &str) -> Result<Vec<serde_json::Value>>;
}

#[derive(Debug, Deserialize)]
struct LotsResponse {
    #[serde(default)]
    lots: Vec<serde_json::Value>,
}

/// REST client for `GET <api-base>/<region>/auction/<item>/lots`.
pub struct ListingFetcher {
    client: reqwest::Client,
    api_base_url: String,
    region: String,
}

impl ListingFetcher {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
            region: cfg.region.clone(),
        })
    }

    pub fn lots_url(&self, item_id: &str) -> String {
        format!("{}/{}/auction/{}/lots", self.api_base_url, self.region, item_id)
    }
}

#[async_trait]
impl ListingSource for ListingFetcher {
    async fn fetch_lots(&self, item_id: &str, limit: u32, token: &str) -> Result<Vec<serde_json::Value>> {
        let url = self.lots_url(item_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[("additional", "true".to_string()), ("limit", limit.to_string())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::UpstreamStatus {
                status: status.as_u16(),
                url,
            });
        }

        let body = resp.text().await?;
        let parsed: LotsResponse = serde_json::from_str(&body)?;
        debug!(item_id, limit, lots = parsed.lots.len(), "Fetched lots");
        Ok(parsed.lots)
    }
}
