use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use urlencoding::encode;

use crate::dump::partition::TimeRange;
use crate::error::{PromError, PromResult};

/// One series of a range-query matrix, in the shape the Prometheus HTTP API
/// returns it: `{"metric": {..}, "values": [[<unix seconds>, "<value>"], ..]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleStream {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    #[serde(default)]
    pub values: Vec<(f64, String)>,
}

/// A successful response body together with any warnings the server attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Warned<T> {
    pub data: T,
    pub warnings: Vec<String>,
}

impl<T> Warned<T> {
    pub fn clean(data: T) -> Self {
        Self {
            data,
            warnings: Vec::new(),
        }
    }

    /// Any warning from the source is treated as a hard failure.
    pub fn into_strict(self) -> PromResult<T> {
        if self.warnings.is_empty() {
            Ok(self.data)
        } else {
            Err(PromError::UpstreamWarning(self.warnings))
        }
    }
}

/// The two read operations the dump pipeline needs from a Prometheus-compatible
/// source.
#[allow(async_fn_in_trait)]
pub trait QuerySource {
    async fn query_range(
        &self,
        query: &str,
        range: TimeRange,
        step: Duration,
    ) -> PromResult<Warned<Vec<SampleStream>>>;

    async fn label_values(
        &self,
        label: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PromResult<Warned<Vec<String>>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse<T> {
    status: String,
    data: Option<T>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatrixData {
    result_type: String,
    #[serde(default)]
    result: Vec<SampleStream>,
}

#[derive(Debug, Clone)]
pub struct PromClient {
    http: Client,
    base_url: String,
}

impl PromClient {
    pub fn new(endpoint: &str) -> PromResult<Self> {
        let base_url = endpoint.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(PromError::config("prometheus endpoint is required"));
        }
        let http = Client::builder()
            .user_agent(concat!("promdump/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| PromError::config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { http, base_url })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> PromResult<Warned<T>> {
        let url = self.url(path);
        tracing::debug!(url = %url, ?params, "prometheus request");
        let response = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|err| PromError::UpstreamQuery(format!("GET {url}: {err}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| PromError::UpstreamQuery(format!("GET {url}: {err}")))?;

        // Prometheus reports query errors as 4xx/5xx with the usual envelope.
        let parsed: ApiResponse<T> = serde_json::from_str(&body).map_err(|err| {
            if status.is_success() {
                PromError::decode(format!("response from {url}"), err)
            } else {
                PromError::UpstreamQuery(format!("GET {url} ({status}): {body}"))
            }
        })?;

        if parsed.status != "success" {
            return Err(PromError::UpstreamQuery(format!(
                "GET {url} ({status}): {}: {}",
                parsed.error_type.as_deref().unwrap_or("error"),
                parsed.error.as_deref().unwrap_or("unknown error"),
            )));
        }

        let data = parsed
            .data
            .ok_or_else(|| PromError::decode(format!("response from {url}"), "missing data"))?;
        Ok(Warned {
            data,
            warnings: parsed.warnings,
        })
    }
}

impl QuerySource for PromClient {
    async fn query_range(
        &self,
        query: &str,
        range: TimeRange,
        step: Duration,
    ) -> PromResult<Warned<Vec<SampleStream>>> {
        let params = [
            ("query", query.to_string()),
            ("start", format_unix_seconds(range.start)),
            ("end", format_unix_seconds(range.end)),
            ("step", format_step_seconds(step)),
        ];
        let response: Warned<MatrixData> = self.get("/api/v1/query_range", &params).await?;
        if response.data.result_type != "matrix" {
            return Err(PromError::decode(
                format!("range query `{query}`"),
                format!("expected matrix result, got `{}`", response.data.result_type),
            ));
        }
        Ok(Warned {
            data: response.data.result,
            warnings: response.warnings,
        })
    }

    async fn label_values(
        &self,
        label: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PromResult<Warned<Vec<String>>> {
        let path = format!("/api/v1/label/{}/values", encode(label));
        let params = [
            ("start", format_unix_seconds(start)),
            ("end", format_unix_seconds(end)),
        ];
        self.get(&path, &params).await
    }
}

fn format_unix_seconds(ts: DateTime<Utc>) -> String {
    let millis = ts.timestamp_millis();
    format!("{}.{:03}", millis.div_euclid(1000), millis.rem_euclid(1000))
}

fn format_step_seconds(step: Duration) -> String {
    let millis = step.num_milliseconds();
    if millis % 1000 == 0 {
        format!("{}", millis / 1000)
    } else {
        format!("{}.{:03}", millis / 1000, millis % 1000)
    }
}
