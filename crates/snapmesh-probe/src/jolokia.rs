//! Minimal Jolokia (JMX over HTTP+JSON) client.
//!
//! Every call is a single request/response against the agent running inside the
//! local Cassandra JVM. Reads go through `GET <base>/read/<mbean>/<attribute>`,
//! operations through `POST <base>/` with an `exec` request body. Responses are
//! wrapped in an envelope whose `error` field, when present, is turned into
//! [`ManagementError::Remote`]. There is no retry at this layer.

use crate::error::ManagementError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

type Result<T> = std::result::Result<T, ManagementError>;

/// Jolokia response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    /// Server side timestamp (seconds).
    #[serde(default)]
    pub timestamp: i64,
    /// Status code of the JMX call (200 on success).
    #[serde(default)]
    pub status: i64,
    /// Error text, empty or missing on success.
    pub error: Option<String>,
    /// Java exception class of the error.
    pub error_type: Option<String>,
    /// Returned value.
    pub value: Option<T>,
}

impl<T> Envelope<T> {
    /// Converts a non-empty `error` field into an error, otherwise yields the value.
    pub fn into_value(self) -> Result<Option<T>> {
        match self.error {
            Some(message) if !message.is_empty() => Err(ManagementError::Remote {
                message,
                error_type: self.error_type,
                status: self.status,
            }),
            _ => Ok(self.value),
        }
    }
}

#[derive(Debug, Serialize)]
struct ExecRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    mbean: &'a str,
    operation: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    arguments: Vec<serde_json::Value>,
}

/// Agent and product information returned by `/version`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionInfo {
    /// Jolokia protocol version.
    #[serde(default)]
    pub protocol: String,
    /// Jolokia agent version.
    #[serde(default)]
    pub agent: String,
    /// Detected server product.
    #[serde(default)]
    pub info: ProductInfo,
}

/// Server product detected by the Jolokia agent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductInfo {
    /// Product name.
    #[serde(default)]
    pub product: String,
    /// Vendor name.
    #[serde(default)]
    pub vendor: String,
    /// Product version.
    #[serde(default)]
    pub version: String,
}

/// HTTP client for a single Jolokia endpoint.
#[derive(Debug, Clone)]
pub struct JolokiaClient {
    http: reqwest::Client,
    base_url: String,
}

impl JolokiaClient {
    /// Creates a client for `base_url` (e.g. `http://127.0.0.1:8778/jolokia`).
    ///
    /// Every request is bounded by `timeout`; a client that cannot carry it is an error.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ManagementError::Client)?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    /// Base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn fetch<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder, url: String) -> Result<Envelope<T>> {
        let response = request
            .send()
            .await
            .map_err(|source| ManagementError::Transport { url: url.clone(), source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ManagementError::HttpStatus {
                url,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| ManagementError::Transport { url: url.clone(), source })?;

        serde_json::from_slice(&body).map_err(|source| ManagementError::Decode { url, source })
    }

    /// Reads an attribute and decodes its value into `T`.
    ///
    /// A missing `value` is returned as `None`.
    pub async fn read<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = self.url(&format!("read/{}", path));
        debug!(%url, "jolokia read");
        let envelope: Envelope<T> = self.fetch(self.http.get(&url), url).await?;
        envelope.into_value()
    }

    /// Reads a string attribute.
    pub async fn read_string(&self, path: &str) -> Result<String> {
        Ok(self.read::<String>(path).await?.unwrap_or_default())
    }

    /// Reads a list-of-strings attribute.
    pub async fn read_string_list(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.read::<Vec<String>>(path).await?.unwrap_or_default())
    }

    /// Reads a boolean attribute.
    pub async fn read_bool(&self, path: &str) -> Result<bool> {
        Ok(self.read::<bool>(path).await?.unwrap_or_default())
    }

    /// Reads a string-to-string map attribute.
    pub async fn read_map(&self, path: &str) -> Result<HashMap<String, String>> {
        Ok(self
            .read::<HashMap<String, String>>(path)
            .await?
            .unwrap_or_default())
    }

    /// Reads a numeric attribute.
    pub async fn read_u64(&self, path: &str) -> Result<u64> {
        Ok(self.read::<u64>(path).await?.unwrap_or_default())
    }

    /// Executes a JMX operation and returns the raw envelope value.
    pub async fn exec(
        &self,
        mbean: &str,
        operation: &str,
        arguments: Vec<serde_json::Value>,
    ) -> Result<Option<serde_json::Value>> {
        self.exec_into(mbean, operation, arguments).await
    }

    /// Executes a JMX operation and decodes its return value into `T`.
    pub async fn exec_into<T: DeserializeOwned>(
        &self,
        mbean: &str,
        operation: &str,
        arguments: Vec<serde_json::Value>,
    ) -> Result<Option<T>> {
        let request = ExecRequest {
            kind: "exec",
            mbean,
            operation,
            arguments,
        };
        let body = serde_json::to_vec(&request).map_err(ManagementError::Encode)?;
        let url = self.url("");
        debug!(%url, mbean, operation, "jolokia exec");
        let builder = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        let envelope: Envelope<T> = self.fetch(builder, url).await?;
        envelope.into_value()
    }

    /// Fetches agent version information.
    pub async fn version(&self) -> Result<VersionInfo> {
        let url = self.url("version");
        let envelope: Envelope<VersionInfo> = self.fetch(self.http.get(&url), url).await?;
        Ok(envelope.into_value()?.unwrap_or_default())
    }
}
