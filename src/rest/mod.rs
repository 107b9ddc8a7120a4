use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::common::Result;
use crate::config::NodeConfig;

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// REST search client for the node's `/loadtracks` endpoint. The response
/// body is opaque to this layer and forwarded as-is.
pub struct TrackQuery {
    http: Client,
    rest_url: String,
    password: String,
}

impl TrackQuery {
    pub fn new(node: &NodeConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            rest_url: node.rest_url.trim_end_matches('/').to_string(),
            password: node.password.clone(),
        })
    }

    /// Single search request.
    pub async fn query(&self, identifier: &str) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}/loadtracks", self.rest_url))
            .header("Authorization", &self.password)
            .header("Accept", "application/json")
            .query(&[("identifier", identifier)])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Search with retries on empty result sets. A freshly started node
    /// returns empty sets during a short warm-up window; this absorbs
    /// that race. Negative `retry_count` retries without bound, `0`
    /// disables retries. The final result is returned either way.
    pub async fn query_with_retry(
        &self,
        identifier: &str,
        mut retry_count: i32,
        retry_delay: Duration,
    ) -> Result<Value> {
        loop {
            let result = self.query(identifier).await?;
            if !is_empty_result(&result) || retry_count == 0 {
                return Ok(result);
            }
            if retry_count > 0 {
                retry_count -= 1;
            }
            debug!("empty result set for {:?}, retrying", identifier);
            if !retry_delay.is_zero() {
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}

/// An empty array, or a loadtracks object whose `tracks` array is empty.
fn is_empty_result(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map
            .get("tracks")
            .and_then(Value::as_array)
            .map(|tracks| tracks.is_empty())
            .unwrap_or(false),
        _ => false,
    }
}
