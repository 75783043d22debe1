//! AI factory: adapter registry, the active adapter, and the tutoring entry points.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{AiProvider, AiResponse, Message, ModelUsage, OpenRouterProvider, TutorContext, TutorRequest, OPENROUTER};
use crate::config::{AiConfig, RequestConfig};
use crate::error::{AiError, AiResult};
use crate::storage::{AiInteraction, InteractionType, SqliteStorage, Storage};

/// Setting holding the active AI provider type.
pub const ACTIVE_PROVIDER_KEY: &str = "ai.active_provider";
/// Setting holding the active AI provider's JSON config.
pub const PROVIDER_CONFIG_KEY: &str = "ai.provider_config";

/// Builds an AI adapter from JSON overrides and the configured defaults.
pub type AiBuilder =
    Arc<dyn Fn(&Value, &AiConfig, &RequestConfig) -> AiResult<Arc<dyn AiProvider>> + Send + Sync>;

/// Owns the active AI adapter and routes tutoring requests to it.
pub struct AiFactory {
    storage: SqliteStorage,
    config: AiConfig,
    request: RequestConfig,
    builders: RwLock<HashMap<String, AiBuilder>>,
    active: RwLock<Option<Arc<dyn AiProvider>>>,
}

impl AiFactory {
    /// Create a factory with the OpenRouter adapter registered.
    pub fn new(storage: SqliteStorage, config: AiConfig, request: RequestConfig) -> Self {
        let factory = Self {
            storage,
            config,
            request,
            builders: RwLock::new(HashMap::new()),
            active: RwLock::new(None),
        };

        factory.register(
            OPENROUTER,
            Arc::new(|overrides: &Value, config: &AiConfig, request: &RequestConfig| {
                Ok(Arc::new(OpenRouterProvider::from_value(
                    overrides,
                    &config.openrouter,
                    request.clone(),
                )?) as Arc<dyn AiProvider>)
            }),
        );
        factory
    }

    /// Register (or replace) the builder for an AI provider type.
    pub fn register(&self, provider_type: &str, builder: AiBuilder) {
        self.builders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(provider_type.to_ascii_lowercase(), builder);
    }

    /// Build an adapter of `provider_type`.
    pub fn create_ai_provider(
        &self,
        provider_type: &str,
        config: Option<&Value>,
    ) -> AiResult<Arc<dyn AiProvider>> {
        let key = provider_type.trim().to_ascii_lowercase();
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(AiError::InvalidType {
                provider_type: provider_type.to_string(),
            });
        }

        let builder = self
            .builders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .ok_or_else(|| AiError::NotRegistered {
                provider_type: key.clone(),
            })?;

        let empty = json!({});
        builder(config.unwrap_or(&empty), &self.config, &self.request)
    }

    /// The active adapter.
    ///
    /// Resolved once from the persisted selection, else the configured
    /// provider type, then held by this factory.
    pub async fn get_active_provider(&self) -> AiResult<Arc<dyn AiProvider>> {
        if let Some(active) = self
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Ok(active);
        }

        let persisted = self.storage.get_setting(ACTIVE_PROVIDER_KEY).await?;
        let provider_type = persisted
            .or_else(|| self.config.provider.clone())
            .ok_or(AiError::NoActiveProvider)?;

        let config = match self.storage.get_setting(PROVIDER_CONFIG_KEY).await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "Ignoring malformed stored AI provider config");
                json!({})
            }),
            None => json!({}),
        };

        let provider = self.create_ai_provider(&provider_type, Some(&config))?;
        debug!(provider_type = %provider_type, "AI provider activated");
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(provider.clone());
        Ok(provider)
    }

    /// Persist a new selection and swap the active adapter.
    pub async fn set_active_provider(&self, provider_type: &str, config: &Value) -> AiResult<()> {
        let provider = self.create_ai_provider(provider_type, Some(config))?;

        self.storage
            .set_setting(ACTIVE_PROVIDER_KEY, provider.provider_type())
            .await?;
        self.storage
            .set_setting(PROVIDER_CONFIG_KEY, &config.to_string())
            .await?;

        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(provider);
        info!(provider_type = %provider_type, "Active AI provider set");
        Ok(())
    }

    /// Help with the session's current step.
    pub async fn get_contextual_help(
        &self,
        session_id: &str,
        question: Option<&str>,
    ) -> AiResult<AiResponse> {
        let request = match question {
            Some(q) => TutorRequest::message(q),
            None => TutorRequest::default(),
        };
        self.dispatch(session_id, InteractionType::ContextualHelp, request)
            .await
    }

    /// Review device configuration submitted in the session.
    pub async fn analyze_configuration(
        &self,
        session_id: &str,
        configuration: &str,
        device_type: Option<&str>,
    ) -> AiResult<AiResponse> {
        let request =
            TutorRequest::configuration(configuration, device_type.map(str::to_string));
        self.dispatch(session_id, InteractionType::ConfigurationAnalysis, request)
            .await
    }

    /// Conversation turn, with earlier turns as history.
    pub async fn get_response(
        &self,
        session_id: &str,
        message: &str,
        history: Vec<Message>,
    ) -> AiResult<AiResponse> {
        let request = TutorRequest::message(message).with_history(history);
        self.dispatch(session_id, InteractionType::Chat, request).await
    }

    /// Explain an error the student hit.
    pub async fn explain_error(&self, session_id: &str, error_message: &str) -> AiResult<AiResponse> {
        self.dispatch(
            session_id,
            InteractionType::ErrorExplanation,
            TutorRequest::error(error_message),
        )
        .await
    }

    /// Progressive hints for the current step.
    pub async fn generate_hints(&self, session_id: &str) -> AiResult<AiResponse> {
        self.dispatch(session_id, InteractionType::Hints, TutorRequest::default())
            .await
    }

    /// Per-model usage of the active adapter.
    pub async fn usage_summary(&self) -> AiResult<Vec<ModelUsage>> {
        Ok(self.get_active_provider().await?.usage_summary())
    }

    async fn dispatch(
        &self,
        session_id: &str,
        kind: InteractionType,
        request: TutorRequest,
    ) -> AiResult<AiResponse> {
        let provider = self.get_active_provider().await?;

        let loaded = self
            .storage
            .load_session_context(session_id)
            .await?
            .ok_or_else(|| AiError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        if loaded.template.is_none() {
            return Err(AiError::TemplateNotFound {
                session_id: session_id.to_string(),
            });
        }

        let context = TutorContext::from_session(&loaded, request);
        let start = Instant::now();
        let response = match kind {
            InteractionType::ContextualHelp => provider.get_contextual_help(&context).await,
            InteractionType::ConfigurationAnalysis => {
                provider.analyze_configuration(&context).await
            }
            InteractionType::Chat => provider.chat_response(&context).await,
            InteractionType::ErrorExplanation => provider.explain_error(&context).await,
            InteractionType::Hints => provider.generate_hints(&context).await,
        }?;
        let elapsed_ms = start.elapsed().as_millis() as i64;

        let mut interaction =
            AiInteraction::new(session_id, context.user_id, provider.provider_type(), kind);
        interaction.request_data = serde_json::to_value(&context.request).unwrap_or(Value::Null);
        interaction.response_data = json!({
            "content": response.content,
            "model": response.model,
        });
        interaction.tokens_used = i64::from(response.usage.total_tokens);
        interaction.response_time_ms = elapsed_ms;
        interaction.cost_usd = response.cost_estimate;

        // The answer is already paid for; a failed audit write does not discard it.
        if let Err(e) = self.storage.log_ai_interaction(&interaction).await {
            warn!(session_id = %session_id, error = %e, "Failed to log AI interaction");
        }

        info!(
            session_id = %session_id,
            interaction = %kind,
            tokens = response.usage.total_tokens,
            response_time_ms = elapsed_ms,
            "AI request answered"
        );
        Ok(response)
    }
}
