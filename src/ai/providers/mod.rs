//! # Language-Model Providers
//!
//! One contract for every backend: a system prompt, a context block and the
//! customer's message go in; reply text, a confidence estimate, token usage
//! and an estimated cost come out.

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::ProviderError;

pub mod anthropic;
pub mod chat_completions;
pub mod gemini;

pub use anthropic::AnthropicModel;
pub use chat_completions::ChatCompletionsModel;
pub use gemini::GeminiModel;

#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub system_prompt: &'a str,
    pub user_message: &'a str,
    pub context: &'a str,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    /// Heuristic in `0.0..=1.0`.
    pub confidence: f64,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub model: String,
}

impl Generation {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn provider(&self) -> &str;
    fn model(&self) -> &str;
    async fn generate(&self, request: GenerateRequest<'_>) -> Result<Generation, ProviderError>;
}

/// USD per one million (input, output) tokens.
pub fn price_per_million(provider: &str, model: &str) -> (f64, f64) {
    match provider {
        "openai" => match model {
            "gpt-4o-mini" => (0.15, 0.60),
            "gpt-4o" => (2.50, 10.0),
            _ => (0.50, 1.50),
        },
        "groq" => match model {
            "llama-3.3-70b-versatile" => (0.59, 0.79),
            "llama-3.1-8b-instant" => (0.05, 0.08),
            "mixtral-8x7b-32768" => (0.24, 0.24),
            _ => (0.20, 0.20),
        },
        "anthropic" => match model {
            "claude-3-5-sonnet-latest" => (3.0, 15.0),
            _ => (0.80, 4.0),
        },
        "gemini" => match model {
            "gemini-2.0-flash-lite" => (0.0375, 0.15),
            _ => (0.075, 0.30),
        },
        _ => (0.0, 0.0),
    }
}

pub fn estimate_cost(provider: &str, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    let (input, output) = price_per_million(provider, model);
    f64::from(input_tokens) / 1_000_000.0 * input + f64::from(output_tokens) / 1_000_000.0 * output
}

/// Rough token count for backends that do not report usage.
pub fn estimate_tokens(text: &str) -> u32 {
    u32::try_from(text.len() / 4).unwrap_or(u32::MAX)
}

/// System prompt with the context block and reply rules appended.
pub fn compose_system(system_prompt: &str, context: &str) -> String {
    let mut composed = system_prompt.to_string();
    if !context.trim().is_empty() {
        composed.push_str("\n\nCONTEXT:\n");
        composed.push_str(context);
    }
    composed.push_str("\n\n");
    composed.push_str(crate::ai::context::REPLY_RULES);
    composed
}

pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            provider: provider.to_string(),
        }
    } else {
        ProviderError::Transport(err.to_string())
    }
}

/// Map a non-success status to a provider error.
pub(crate) fn status_error(provider: &str, status: StatusCode, body: String) -> ProviderError {
    let provider = provider.to_string();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth { provider },
        StatusCode::TOO_MANY_REQUESTS => ProviderError::Quota { provider },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ProviderError::Timeout { provider }
        }
        _ => ProviderError::Upstream {
            provider,
            status: status.as_u16(),
            body: body.chars().take(500).collect(),
        },
    }
}

pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    provider: &str,
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(provider, status, body));
    }
    response
        .json()
        .await
        .map_err(|err| ProviderError::Malformed {
            provider: provider.to_string(),
            detail: err.to_string(),
        })
}
