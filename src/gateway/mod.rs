pub mod stream;

use log::warn;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::Deserialize;
use thiserror::Error;

/// Models offered when the gateway cannot be asked.
pub const DEFAULT_MODELS: &[&str] = &[
    "claude-sonnet-4-5",
    "claude-opus-4-5",
    "claude-haiku-4-5",
];

/// Model ids carrying this marker are gateway-internal and never shown.
const INTERNAL_MODEL_MARKER: &str = "internal";

const WILDCARD_HOST: &str = "0.0.0.0";
const LOOPBACK_HOST: &str = "127.0.0.1";

/// Where the local gateway listens.
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Host to dial. The all-interfaces bind address is not a valid
    /// peer address, so it maps to loopback.
    pub fn resolved_host(&self) -> &str {
        if self.host == WILDCARD_HOST {
            LOOPBACK_HOST
        } else {
            &self.host
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.resolved_host(), self.port)
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Non-2xx response. The display text is shown verbatim in the
    /// transcript when a call fails.
    #[error("HTTP error! status: {0}")]
    Status(u16),
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("stream read failed: {0}")]
    Read(String),
    #[error("invalid gateway configuration: {0}")]
    Config(String),
}

/// HTTP client for the local gateway's OpenAI-compatible API.
#[derive(Clone)]
pub struct GatewayClient {
    http: HttpClient,
    endpoint: Endpoint,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

impl GatewayClient {
    pub fn new(endpoint: Endpoint, api_key: &str) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e|
                GatewayError::Config(format!("invalid API key format: {}", e))
            )?
        );

        let http = HttpClient::builder().default_headers(headers).build()?;

        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Fetch the model ids the gateway serves, dropping internal ones.
    /// Falls back to the built-in default list when the gateway cannot
    /// be reached or returns nothing usable.
    pub async fn list_models(&self) -> Vec<String> {
        match self.fetch_models().await {
            Ok(ids) if !ids.is_empty() => ids,
            Ok(_) => {
                warn!("Gateway returned no usable models, using defaults");
                default_models()
            }
            Err(e) => {
                warn!("Model list unavailable ({}), using defaults", e);
                default_models()
            }
        }
    }

    async fn fetch_models(&self) -> Result<Vec<String>, GatewayError> {
        let url = format!("{}/v1/models", self.endpoint.base_url());
        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(GatewayError::Status(status.as_u16()));
        }
        let list: ModelList = resp.json().await?;
        Ok(
            list.data
                .into_iter()
                .map(|m| m.id)
                .filter(|id| !id.contains(INTERNAL_MODEL_MARKER))
                .collect()
        )
    }
}

pub fn default_models() -> Vec<String> {
    DEFAULT_MODELS.iter().map(|m| m.to_string()).collect()
}

/// Keep the current selection if the gateway still serves it, otherwise
/// fall back to the first available model.
pub fn select_model(current: &str, available: &[String]) -> String {
    if available.iter().any(|m| m == current) {
        current.to_string()
    } else {
        available
            .first()
            .cloned()
            .unwrap_or_else(|| DEFAULT_MODELS[0].to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_host_resolves_to_loopback() {
        let ep = Endpoint::new("0.0.0.0", 8000);
        assert_eq!(ep.resolved_host(), "127.0.0.1");
        assert_eq!(ep.base_url(), "http://127.0.0.1:8000");
    }

    #[test]
    fn other_hosts_pass_through() {
        let ep = Endpoint::new("192.168.1.20", 9000);
        assert_eq!(ep.resolved_host(), "192.168.1.20");
        assert_eq!(ep.base_url(), "http://192.168.1.20:9000");
    }

    #[test]
    fn status_error_text_is_stable() {
        assert_eq!(GatewayError::Status(500).to_string(), "HTTP error! status: 500");
    }

    #[test]
    fn model_selection_keeps_current_when_served() {
        let available = vec!["claude-opus-4-5".to_string(), "claude-sonnet-4-5".to_string()];
        assert_eq!(select_model("claude-sonnet-4-5", &available), "claude-sonnet-4-5");
    }

    #[test]
    fn model_selection_falls_back_to_first() {
        let available = vec!["claude-opus-4-5".to_string()];
        assert_eq!(select_model("gone-model", &available), "claude-opus-4-5");
        assert_eq!(select_model("gone-model", &[]), DEFAULT_MODELS[0]);
    }
}
