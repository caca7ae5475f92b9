//! OpenAI-compatible chat completions, used for OpenAI and Groq.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    GenerateRequest, Generation, LanguageModel, compose_system, estimate_cost, read_json,
    transport_error,
};
use crate::error::ProviderError;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

pub struct ChatCompletionsModel {
    http: reqwest::Client,
    provider: String,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsModel {
    pub fn new(
        http: reqwest::Client,
        provider: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            provider: provider.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

fn confidence(finish_reason: Option<&str>) -> f64 {
    match finish_reason {
        Some("stop") => 0.90,
        _ => 0.75,
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsModel {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<Generation, ProviderError> {
        let system = compose_system(request.system_prompt, request.context);
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: request.user_message,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: 0.7,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| transport_error(&self.provider, err))?;
        let parsed: ChatResponse = read_json(&self.provider, response).await?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Malformed {
                provider: self.provider.clone(),
                detail: "no choices returned".to_string(),
            })?;

        let input_tokens = parsed.usage.prompt_tokens;
        let output_tokens = parsed.usage.completion_tokens;
        Ok(Generation {
            text: choice.message.content.unwrap_or_default(),
            confidence: confidence(choice.finish_reason.as_deref()),
            input_tokens,
            output_tokens,
            cost_usd: estimate_cost(&self.provider, &self.model, input_tokens, output_tokens),
            model: self.model.clone(),
        })
    }
}
