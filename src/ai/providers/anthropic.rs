//! Anthropic messages API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    GenerateRequest, Generation, LanguageModel, compose_system, estimate_cost, read_json,
    transport_error,
};
use crate::error::ProviderError;

pub const BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "anthropic";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [Message<'a>; 1],
    temperature: f32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

pub struct AnthropicModel {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicModel {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LanguageModel for AnthropicModel {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<Generation, ProviderError> {
        let system = compose_system(request.system_prompt, request.context);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            system: &system,
            messages: [Message {
                role: "user",
                content: request.user_message,
            }],
            temperature: 0.7,
        };

        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|err| transport_error(PROVIDER, err))?;
        let parsed: MessagesResponse = read_json(PROVIDER, response).await?;

        if parsed.content.is_empty() {
            return Err(ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                detail: "no content returned".to_string(),
            });
        }
        let text: String = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect();

        let confidence = match parsed.stop_reason.as_deref() {
            Some("end_turn") => 0.90,
            _ => 0.75,
        };
        let (input_tokens, output_tokens) = (parsed.usage.input_tokens, parsed.usage.output_tokens);
        Ok(Generation {
            text,
            confidence,
            input_tokens,
            output_tokens,
            cost_usd: estimate_cost(PROVIDER, &self.model, input_tokens, output_tokens),
            model: self.model.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn joins_text_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "ak-test"))
            .and(header("anthropic-version", "2023-06-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"type": "text", "text": "Buka "},
                    {"type": "text", "text": "jam 9."}
                ],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 1000000, "output_tokens": 0}
            })))
            .mount(&server)
            .await;

        let model = AnthropicModel::new(
            reqwest::Client::new(),
            server.uri(),
            "ak-test",
            "claude-3-5-haiku-latest",
        );
        let generation = model
            .generate(GenerateRequest {
                system_prompt: "Be nice.",
                user_message: "jam buka?",
                context: "",
                max_tokens: 200,
            })
            .await
            .unwrap();
        assert_eq!(generation.text, "Buka jam 9.");
        assert_eq!(generation.confidence, 0.90);
        assert!((generation.cost_usd - 0.80).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rejected_key_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let model = AnthropicModel::new(reqwest::Client::new(), server.uri(), "bad", "m");
        let result = model
            .generate(GenerateRequest {
                system_prompt: "",
                user_message: "x",
                context: "",
                max_tokens: 10,
            })
            .await;
        assert!(matches!(result, Err(ProviderError::Auth { .. })));
    }
}
