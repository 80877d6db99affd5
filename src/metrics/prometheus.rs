// Prometheus backend - evaluates instant queries over the HTTP API
//
// POSTs form-encoded queries to /api/v1/query and reduces the response to the
// first sample of the result.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{MetricsBackend, QueryError};

/// Basic-auth credentials for Prometheus instances behind a proxy
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Instant-query client for the Prometheus HTTP API.
///
/// Holds only connection configuration, so a single instance is shared by
/// every collector worker.
pub struct PrometheusClient {
    http_client: Client,
    query_url: Url,
    auth: Option<BasicAuth>,
}

impl PrometheusClient {
    /// Creates a client for the server at `base_url`.
    ///
    /// # Arguments
    /// * `base_url` - Server root, e.g. `http://prometheus:9090`
    /// * `auth` - Optional basic-auth credentials
    /// * `timeout` - Per-request timeout
    pub fn new(base_url: &Url, auth: Option<BasicAuth>, timeout: Duration) -> Result<Self, QueryError> {
        let query_url = base_url
            .join("api/v1/query")
            .map_err(|e| QueryError::Decode(format!("invalid Prometheus URL: {}", e)))?;

        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(PrometheusClient {
            http_client,
            query_url,
            auth,
        })
    }
}

#[async_trait]
impl MetricsBackend for PrometheusClient {
    async fn query(&self, expression: &str) -> Result<f64, QueryError> {
        debug!(query = expression, "Querying Prometheus");

        let mut request = self
            .http_client
            .post(self.query_url.clone())
            .form(&[("query", expression)]);
        if let Some(auth) = &self.auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), "Prometheus responded");
        if status.as_u16() > 399 {
            return Err(QueryError::Status(status));
        }

        let body = response.text().await?;
        parse_scalar(&body)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Series {
    value: (serde_json::Value, String),
}

/// Reduces an instant-query response body to one number.
///
/// Vector results yield the first series' sample, scalar results their value,
/// and an empty vector yields `0.0`.
fn parse_scalar(body: &str) -> Result<f64, QueryError> {
    let response: QueryResponse =
        serde_json::from_str(body).map_err(|e| QueryError::Decode(e.to_string()))?;

    if response.status != "success" {
        return Err(QueryError::Api {
            error_type: response.error_type.unwrap_or_else(|| "unknown".to_string()),
            message: response.error.unwrap_or_default(),
        });
    }

    let data = response
        .data
        .ok_or_else(|| QueryError::Decode("response has no data".to_string()))?;

    let sample = match data.result_type.as_str() {
        "vector" => {
            let series: Vec<Series> = serde_json::from_value(data.result)
                .map_err(|e| QueryError::Decode(e.to_string()))?;
            match series.into_iter().next() {
                Some(first) => first.value.1,
                None => return Ok(0.0),
            }
        }
        "scalar" => {
            let (_, value): (serde_json::Value, String) = serde_json::from_value(data.result)
                .map_err(|e| QueryError::Decode(e.to_string()))?;
            value
        }
        other => {
            return Err(QueryError::Decode(format!(
                "unsupported result type '{}'",
                other
            )))
        }
    };

    sample
        .parse::<f64>()
        .map_err(|_| QueryError::Decode(format!("sample '{}' is not a number", sample)))
}
