use crate::error::MarketError;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI client is not configured: {0}")]
    Configuration(String),

    #[error("AI service returned an empty response")]
    UpstreamEmptyResponse,

    #[error("AI service returned a malformed response: {0}")]
    MalformedResponse(String),

    #[error("AI authentication failed: {0}")]
    Auth(String),

    #[error("AI API error: HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("AI HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<AiError> for MarketError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::Configuration(msg) => MarketError::Configuration(msg),
            AiError::UpstreamEmptyResponse => MarketError::UpstreamEmptyResponse,
            AiError::MalformedResponse(msg) => MarketError::MalformedResponse(msg),
            other => MarketError::Upstream(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// One structured-output request: the model must answer with JSON matching
/// `response_schema`.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub image: Option<InlineImage>,
    pub response_schema: serde_json::Value,
    pub temperature: f32,
}

/// A generative-model backend. Selected once at process start.
#[async_trait]
pub trait AiClient: Send + Sync {
    /// Returns the raw text of the model answer.
    async fn generate(&self, request: GenerationRequest) -> Result<String, AiError>;
}

/// Stand-in used when no API key is configured.
pub struct DisabledAiClient;

#[async_trait]
impl AiClient for DisabledAiClient {
    async fn generate(&self, _request: GenerationRequest) -> Result<String, AiError> {
        Err(AiError::Configuration(
            "GEMINI_API_KEY is not set".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_client_fails_with_configuration_error() {
        let result = DisabledAiClient
            .generate(GenerationRequest {
                prompt: "hello".to_string(),
                image: None,
                response_schema: serde_json::json!({}),
                temperature: 0.0,
            })
            .await;
        assert!(matches!(result, Err(AiError::Configuration(_))));
    }

    #[test]
    fn test_ai_errors_map_to_market_errors() {
        assert!(matches!(
            MarketError::from(AiError::UpstreamEmptyResponse),
            MarketError::UpstreamEmptyResponse
        ));
        assert!(matches!(
            MarketError::from(AiError::Api {
                status: 503,
                body: "overloaded".to_string()
            }),
            MarketError::Upstream(_)
        ));
    }
}
