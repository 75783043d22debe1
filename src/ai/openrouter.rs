use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use super::pricing::{estimate_cost, ModelUsage, UsageTracker};
use super::{
    AiProvider, AiResponse, ChatRequest, ChatResponse, Message, TokenUsage, TutorContext,
    OPENROUTER,
};
use crate::config::{OpenRouterConfig, RequestConfig};
use crate::error::{AiError, AiResult};
use crate::prompts::{
    CHAT_PROMPT, CONFIG_ANALYSIS_PROMPT, CONTEXTUAL_HELP_PROMPT, ERROR_EXPLANATION_PROMPT,
    HINTS_PROMPT, TUTOR_SYSTEM_PROMPT,
};
use crate::provider::ConnectionTest;

/// Client for the OpenRouter chat completions API
pub struct OpenRouterProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    request_config: RequestConfig,
    usage: UsageTracker,
}

impl OpenRouterProvider {
    /// Create a new OpenRouter client
    pub fn new(config: &OpenRouterConfig, request_config: RequestConfig) -> AiResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AiError::Instantiation {
                provider_type: OPENROUTER.to_string(),
                message: "api_key is required".to_string(),
            })?;

        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(AiError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            request_config,
            usage: UsageTracker::new(),
        })
    }

    /// Create a client from stored JSON, falling back to `defaults` per field
    pub fn from_value(
        overrides: &Value,
        defaults: &OpenRouterConfig,
        request_config: RequestConfig,
    ) -> AiResult<Self> {
        let mut config = defaults.clone();
        if let Some(key) = overrides.get("api_key").and_then(Value::as_str) {
            config.api_key = Some(key.to_string());
        }
        if let Some(url) = overrides.get("base_url").and_then(Value::as_str) {
            config.base_url = url.to_string();
        }
        if let Some(model) = overrides.get("model").and_then(Value::as_str) {
            config.model = model.to_string();
        }
        if let Some(max) = overrides.get("max_tokens").and_then(Value::as_u64) {
            config.max_tokens = u32::try_from(max).unwrap_or(u32::MAX);
        }
        if let Some(t) = overrides.get("temperature").and_then(Value::as_f64) {
            config.temperature = t;
        }
        Self::new(&config, request_config)
    }

    /// Model used for completions
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_messages(&self, task_prompt: &str, context: &TutorContext) -> Vec<Message> {
        let mut messages = vec![Message::system(format!(
            "{}\n\n{}\n\nLab state:\n{}",
            TUTOR_SYSTEM_PROMPT,
            task_prompt,
            context.describe()
        ))];
        messages.extend(context.request.history.iter().cloned());

        let request = &context.request;
        let mut parts = Vec::new();
        if let Some(device) = &request.device_type {
            parts.push(format!("Device type: {}", device));
        }
        if let Some(configuration) = &request.configuration {
            parts.push(format!("Configuration:\n{}", configuration));
        }
        if let Some(error_message) = &request.error_message {
            parts.push(format!("Error message:\n{}", error_message));
        }
        if let Some(message) = &request.message {
            parts.push(message.clone());
        }
        if parts.is_empty() {
            parts.push("Help me with the current step.".to_string());
        }
        messages.push(Message::user(parts.join("\n\n")));
        messages
    }

    async fn complete(&self, kind: &str, messages: Vec<Message>) -> AiResult<AiResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        debug!(kind = kind, model = %self.model, messages = request.messages.len(), "Calling OpenRouter");
        let start = Instant::now();

        let result = self.execute_request(&url, &request).await;
        let latency = start.elapsed();
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                error!(kind = kind, error = %e, latency_ms = latency.as_millis(), "OpenRouter call failed");
                return Err(e);
            }
        };

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AiError::InvalidResponse {
                message: "Response contained no completion".to_string(),
            })?;

        let model = response.model.unwrap_or_else(|| self.model.clone());
        let usage: TokenUsage = response.usage.map(Into::into).unwrap_or_default();
        let cost_estimate = estimate_cost(&model, &usage);
        self.usage.record(&model, &usage, cost_estimate);

        info!(
            kind = kind,
            model = %model,
            tokens = usage.total_tokens,
            latency_ms = latency.as_millis(),
            "OpenRouter call succeeded"
        );

        Ok(AiResponse {
            content,
            model,
            usage,
            cost_estimate,
        })
    }

    /// Execute a single request (internal)
    async fn execute_request(&self, url: &str, request: &ChatRequest) -> AiResult<ChatResponse> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("X-Title", "labtutor")
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(AiError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })
    }

    fn map_send_error(&self, e: reqwest::Error) -> AiError {
        if e.is_timeout() {
            AiError::Timeout {
                timeout_ms: self.request_config.timeout_ms,
            }
        } else {
            AiError::Http(e)
        }
    }
}

#[async_trait::async_trait]
impl AiProvider for OpenRouterProvider {
    fn provider_type(&self) -> &'static str {
        OPENROUTER
    }

    async fn get_contextual_help(&self, context: &TutorContext) -> AiResult<AiResponse> {
        self.complete("contextual_help", self.build_messages(CONTEXTUAL_HELP_PROMPT, context))
            .await
    }

    async fn analyze_configuration(&self, context: &TutorContext) -> AiResult<AiResponse> {
        self.complete(
            "configuration_analysis",
            self.build_messages(CONFIG_ANALYSIS_PROMPT, context),
        )
        .await
    }

    async fn explain_error(&self, context: &TutorContext) -> AiResult<AiResponse> {
        self.complete(
            "error_explanation",
            self.build_messages(ERROR_EXPLANATION_PROMPT, context),
        )
        .await
    }

    async fn generate_hints(&self, context: &TutorContext) -> AiResult<AiResponse> {
        self.complete("hints", self.build_messages(HINTS_PROMPT, context))
            .await
    }

    async fn chat_response(&self, context: &TutorContext) -> AiResult<AiResponse> {
        self.complete("chat", self.build_messages(CHAT_PROMPT, context))
            .await
    }

    async fn test_connection(&self) -> ConnectionTest {
        let url = format!("{}/models", self.base_url);
        let response = match self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return ConnectionTest::failed(self.map_send_error(e).to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            return ConnectionTest::failed(format!("OpenRouter returned HTTP {}", status.as_u16()));
        }

        match response.json::<Value>().await {
            Ok(body) => {
                let count = body
                    .get("data")
                    .and_then(Value::as_array)
                    .map(Vec::len)
                    .unwrap_or(0);
                ConnectionTest::ok(format!("Connected to OpenRouter ({} models available)", count))
            }
            Err(e) => ConnectionTest::failed(format!("Failed to parse models list: {}", e)),
        }
    }

    fn usage_summary(&self) -> Vec<ModelUsage> {
        self.usage.summary()
    }
}
