//! Credential resolution and model construction.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use super::providers::{
    AnthropicModel, ChatCompletionsModel, GeminiModel, LanguageModel, anthropic,
    chat_completions, gemini,
};
use crate::config::LlmConfig;
use crate::crypto::{CryptoKey, open_credential};
use crate::error::ProviderError;
use crate::repositories::ai::TenantAiSettings;

pub const SUPPORTED_PROVIDERS: [&str; 4] = ["gemini", "openai", "groq", "anthropic"];

/// Where a resolved credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Tenant,
    System,
    GlobalDefault,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedCredential {
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub source: CredentialSource,
}

impl std::fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCredential")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .field("source", &self.source)
            .finish()
    }
}

/// Picks the model a tenant's message is answered with.
pub trait ModelResolver: Send + Sync {
    fn resolve(
        &self,
        tenant_id: Uuid,
        settings: &TenantAiSettings,
    ) -> Result<Arc<dyn LanguageModel>, ProviderError>;
}

fn canonical_provider(name: &str) -> String {
    match name.trim().to_ascii_lowercase().as_str() {
        "claude" => "anthropic".to_string(),
        other => other.to_string(),
    }
}

/// Credential precedence:
///
/// 1. the tenant's own key, when the tenant opted out of the system key;
/// 2. the system key for the tenant's provider;
/// 3. the global default provider and model with its system key.
pub fn resolve_credential(
    llm: &LlmConfig,
    crypto_key: Option<&CryptoKey>,
    tenant_id: Uuid,
    settings: &TenantAiSettings,
) -> Result<ResolvedCredential, ProviderError> {
    let provider = canonical_provider(&settings.provider);

    if !settings.use_system_key
        && let Some(stored) = settings.user_api_key.as_deref()
    {
        match crypto_key.map(|key| open_credential(key, tenant_id, stored)) {
            Some(Ok(api_key)) if SUPPORTED_PROVIDERS.contains(&provider.as_str()) => {
                return Ok(ResolvedCredential {
                    provider,
                    model: settings.model.clone(),
                    api_key,
                    source: CredentialSource::Tenant,
                });
            }
            Some(Ok(_)) => {
                warn!(tenant_id = %tenant_id, provider = %provider, "Tenant key set for unsupported provider");
            }
            Some(Err(err)) => {
                warn!(tenant_id = %tenant_id, error = %err, "Tenant model credential could not be opened");
            }
            None => {
                warn!(tenant_id = %tenant_id, "No crypto key configured; ignoring tenant model credential");
            }
        }
    }

    if let Some(api_key) = llm.system_key(&provider)
        && SUPPORTED_PROVIDERS.contains(&provider.as_str())
    {
        return Ok(ResolvedCredential {
            provider,
            model: settings.model.clone(),
            api_key: api_key.to_string(),
            source: CredentialSource::System,
        });
    }

    let fallback = canonical_provider(&llm.default_provider);
    if let Some(api_key) = llm.system_key(&fallback) {
        debug!(tenant_id = %tenant_id, requested = %provider, fallback = %fallback, "Using global default model");
        return Ok(ResolvedCredential {
            provider: fallback,
            model: llm.default_model.clone(),
            api_key: api_key.to_string(),
            source: CredentialSource::GlobalDefault,
        });
    }

    Err(ProviderError::MissingCredential { provider })
}

/// Builds HTTP-backed models from configuration.
pub struct HttpModelResolver {
    llm: LlmConfig,
    crypto_key: Option<CryptoKey>,
    http: reqwest::Client,
}

impl HttpModelResolver {
    pub fn new(
        llm: LlmConfig,
        crypto_key: Option<CryptoKey>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ProviderError::Transport(err.to_string()))?;
        Ok(Self {
            llm,
            crypto_key,
            http,
        })
    }

    fn base_url<'a>(&'a self, provider: &str, default: &'a str) -> &'a str {
        self.llm
            .base_urls
            .get(provider)
            .map(String::as_str)
            .unwrap_or(default)
    }

    pub fn build(&self, credential: ResolvedCredential) -> Result<Arc<dyn LanguageModel>, ProviderError> {
        let ResolvedCredential {
            provider,
            model,
            api_key,
            ..
        } = credential;
        let http = self.http.clone();
        let built: Arc<dyn LanguageModel> = match provider.as_str() {
            "gemini" => Arc::new(GeminiModel::new(
                http,
                self.base_url("gemini", gemini::BASE_URL),
                api_key,
                model,
            )),
            "openai" => Arc::new(ChatCompletionsModel::new(
                http,
                "openai",
                self.base_url("openai", chat_completions::OPENAI_BASE_URL),
                api_key,
                model,
            )),
            "groq" => Arc::new(ChatCompletionsModel::new(
                http,
                "groq",
                self.base_url("groq", chat_completions::GROQ_BASE_URL),
                api_key,
                model,
            )),
            "anthropic" => Arc::new(AnthropicModel::new(
                http,
                self.base_url("anthropic", anthropic::BASE_URL),
                api_key,
                model,
            )),
            other => return Err(ProviderError::Unsupported(other.to_string())),
        };
        Ok(built)
    }
}

impl ModelResolver for HttpModelResolver {
    fn resolve(
        &self,
        tenant_id: Uuid,
        settings: &TenantAiSettings,
    ) -> Result<Arc<dyn LanguageModel>, ProviderError> {
        let credential =
            resolve_credential(&self.llm, self.crypto_key.as_ref(), tenant_id, settings)?;
        self.build(credential)
    }
}
