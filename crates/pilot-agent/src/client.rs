//! Anthropic Messages API reasoning channel
//!
//! One call per step, full transcript each time. Retrying and fail-fast
//! behaviour live in the caller (circuit breaker); this client maps transport
//! and HTTP failures onto the error categories the breaker and retry
//! classification understand.

use async_trait::async_trait;
use pilot_core::{ConversationMessage, ModelSettings, PilotError, Result};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::auth;
use crate::types::{AnthropicRequest, AnthropicResponse, Model};
use crate::ReasoningClient;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: usize = 4096;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Reasoning client backed by the Anthropic Messages API
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    model: Model,
    max_tokens: usize,
    api_key: String,
    endpoint: String,
    http: reqwest::Client,
}

impl AnthropicClient {
    /// Create a client with an explicit API key
    pub fn new(model: Model, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PilotError::Reasoning(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            model,
            max_tokens: DEFAULT_MAX_TOKENS,
            api_key: api_key.into(),
            endpoint: ANTHROPIC_API_URL.to_string(),
            http,
        })
    }

    /// Create a client from model settings, reading the key from the environment
    pub fn from_settings(settings: &ModelSettings) -> Result<Self> {
        let model = settings
            .default
            .parse::<Model>()
            .map_err(PilotError::Config)?;
        let api_key = auth::get_auth_token(&settings.api_key_env)?;
        Ok(Self::new(model, api_key)?.with_max_tokens(settings.max_tokens))
    }

    /// Set max tokens for responses
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Point the client at a different endpoint (proxies, test servers)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn model(&self) -> Model {
        self.model
    }
}

#[async_trait]
impl ReasoningClient for AnthropicClient {
    #[instrument(skip(self, conversation), fields(model = %self.model, turns = conversation.len()))]
    async fn generate(&self, conversation: &[ConversationMessage]) -> Result<String> {
        let request =
            AnthropicRequest::from_conversation(self.model, self.max_tokens, conversation);

        debug!("Sending request to Anthropic API");

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown".to_string());
            warn!("Rate limited (429), retry-after: {:?}", retry_after);
            return Err(PilotError::RateLimited(match retry_after {
                Some(secs) => format!("retry after {}s: {}", secs, body),
                None => body,
            }));
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown".to_string());
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(PilotError::Auth(format!("Anthropic API {}: {}", status, body)));
            }
            return Err(PilotError::Reasoning(format!(
                "Anthropic API error {}: {}",
                status, body
            )));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| PilotError::Reasoning(format!("Failed to parse response: {}", e)))?;

        let output: String = parsed
            .content
            .iter()
            .filter(|block| block.content_type == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        if let Some(usage) = &parsed.usage {
            info!(
                "Reasoning reply ({} chars, {} input tokens, {} output tokens)",
                output.len(),
                usage.input_tokens,
                usage.output_tokens
            );
        } else {
            info!("Reasoning reply ({} chars)", output.len());
        }

        Ok(output)
    }
}

fn transport_error(e: reqwest::Error) -> PilotError {
    if e.is_timeout() {
        PilotError::Timeout(format!("Anthropic request timed out: {}", e))
    } else {
        PilotError::Reasoning(format!("Failed to send request: {}", e))
    }
}
