//! # HTTP Generation Provider
//!
//! Posts a `GenerationRequest` as JSON to a configured endpoint and returns
//! the response body. The endpoint may answer with the bare value or with
//! `{"value": ...}`; coercion to the declared type happens in the core.

use async_trait::async_trait;
use serde_json::Value;
use weave_core::{GenerationProvider, GenerationRequest, WeaveError};

/// `GenerationProvider` backed by an HTTP endpoint.
#[derive(Clone)]
pub struct HttpGenerationProvider {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpGenerationProvider {
    /// Create a provider posting to `url`, with optional Bearer auth.
    pub fn new(url: String, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            api_key,
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self) -> reqwest::RequestBuilder {
        let mut req = self.http.post(&self.url);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    /// Check status codes and parse JSON.
    async fn handle_response(&self, resp: reqwest::Response) -> Result<Value, WeaveError> {
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(WeaveError::Provider(
                "generation endpoint rejected the API key".to_string(),
            ));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(WeaveError::Provider("generation endpoint rate limited".to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(WeaveError::Provider(format!(
                "generation endpoint error ({}): {}",
                status.as_u16(),
                body
            )));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| WeaveError::Generation(format!("unreadable generation response: {}", e)))
    }
}

#[async_trait]
impl GenerationProvider for HttpGenerationProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<Value, WeaveError> {
        tracing::debug!(
            entity_type = %request.entity_type,
            field = %request.field,
            url = %self.url,
            "requesting generated value"
        );
        let resp = self
            .request()
            .json(request)
            .send()
            .await
            .map_err(|e| WeaveError::Provider(format!("cannot reach {}: {}", self.url, e)))?;
        self.handle_response(resp).await
    }
}
