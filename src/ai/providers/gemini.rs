//! Google Gemini `generateContent`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    GenerateRequest, Generation, LanguageModel, estimate_cost, estimate_tokens, read_json,
    transport_error,
};
use crate::error::ProviderError;

pub const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const PROVIDER: &str = "gemini";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

pub struct GeminiModel {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiModel {
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

fn confidence(finish_reason: Option<&str>) -> f64 {
    match finish_reason {
        Some("STOP") => 0.90,
        Some("MAX_TOKENS") => 0.75,
        Some("SAFETY") => 0.50,
        Some("RECITATION") => 0.60,
        Some("OTHER") => 0.70,
        _ => 0.85,
    }
}

/// Gemini receives one flat prompt rather than separate system and user turns.
fn flat_prompt(request: &GenerateRequest<'_>) -> String {
    let mut prompt = String::from("SYSTEM INSTRUCTIONS:\n");
    prompt.push_str(request.system_prompt);
    prompt.push_str("\n\n");
    if !request.context.trim().is_empty() {
        prompt.push_str("CONTEXT:\n");
        prompt.push_str(request.context);
        prompt.push_str("\n\n");
    }
    prompt.push_str(crate::ai::context::REPLY_RULES);
    prompt.push_str("\n\nUSER MESSAGE:\n");
    prompt.push_str(request.user_message);
    prompt
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<Generation, ProviderError> {
        let prompt = flat_prompt(&request);
        let body = GenerateContentRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: &prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.7,
                top_k: 40,
                top_p: 0.95,
                max_output_tokens: request.max_tokens,
            },
        };

        let response = self
            .http
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| transport_error(PROVIDER, err))?;
        let parsed: GenerateContentResponse = read_json(PROVIDER, response).await?;

        let candidate =
            parsed
                .candidates
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::Malformed {
                    provider: PROVIDER.to_string(),
                    detail: "no candidates returned".to_string(),
                })?;
        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                detail: "empty candidate content".to_string(),
            });
        }

        let (input_tokens, output_tokens) = match parsed.usage_metadata {
            Some(usage) => (usage.prompt_token_count, usage.candidates_token_count),
            None => (estimate_tokens(&prompt), estimate_tokens(&text)),
        };
        Ok(Generation {
            confidence: confidence(candidate.finish_reason.as_deref()),
            cost_usd: estimate_cost(PROVIDER, &self.model, input_tokens, output_tokens),
            text,
            input_tokens,
            output_tokens,
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

    fn request() -> GenerateRequest<'static> {
        GenerateRequest {
            system_prompt: "Be nice.",
            user_message: "halo",
            context: "Nama Bisnis: A",
            max_tokens: 200,
        }
    }

    #[test]
    fn finish_reasons_map_to_confidence() {
        assert_eq!(confidence(Some("STOP")), 0.90);
        assert_eq!(confidence(Some("SAFETY")), 0.50);
        assert_eq!(confidence(None), 0.85);
    }

    #[test]
    fn flat_prompt_orders_sections() {
        let prompt = flat_prompt(&request());
        let system = prompt.find("SYSTEM INSTRUCTIONS:").unwrap();
        let context = prompt.find("CONTEXT:\nNama Bisnis: A").unwrap();
        let user = prompt.find("USER MESSAGE:\nhalo").unwrap();
        assert!(system < context && context < user);
    }

    #[tokio::test]
    async fn estimates_usage_when_metadata_missing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"parts": [{"text": "Halo kak!"}]},
                    "finishReason": "MAX_TOKENS"
                }]
            })))
            .mount(&server)
            .await;

        let model = GeminiModel::new(
            reqwest::Client::new(),
            server.uri(),
            "g-key",
            "gemini-2.0-flash",
        );
        let generation = model.generate(request()).await.unwrap();
        assert_eq!(generation.text, "Halo kak!");
        assert_eq!(generation.confidence, 0.75);
        assert_eq!(generation.output_tokens, 2);
        assert!(generation.input_tokens > 0);
    }

    #[tokio::test]
    async fn empty_candidates_are_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
            .mount(&server)
            .await;
        let model = GeminiModel::new(reqwest::Client::new(), server.uri(), "k", "m");
        assert!(matches!(
            model.generate(request()).await,
            Err(ProviderError::Malformed { .. })
        ));
    }
}
