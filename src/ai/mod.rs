//! AI tutoring adapters and the factory that owns the active one.

mod factory;
mod openrouter;
mod pricing;
mod types;

pub use factory::{AiBuilder, AiFactory, ACTIVE_PROVIDER_KEY, PROVIDER_CONFIG_KEY};
pub use openrouter::OpenRouterProvider;
pub use pricing::{estimate_cost, price_for, ModelPrice, ModelUsage, UsageTracker};
pub use types::{
    AiResponse, ApiUsage, ChatRequest, ChatResponse, Choice, ChoiceMessage, Message, MessageRole,
    TokenUsage, TutorContext, TutorRequest,
};

use async_trait::async_trait;

use crate::error::AiResult;
use crate::provider::ConnectionTest;

/// Registered name of the OpenRouter adapter.
pub const OPENROUTER: &str = "openrouter";

/// An LLM backend that answers tutoring requests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Registered type name.
    fn provider_type(&self) -> &'static str;

    /// Help with the current step.
    async fn get_contextual_help(&self, context: &TutorContext) -> AiResult<AiResponse>;

    /// Review submitted device configuration.
    async fn analyze_configuration(&self, context: &TutorContext) -> AiResult<AiResponse>;

    /// Explain an error message.
    async fn explain_error(&self, context: &TutorContext) -> AiResult<AiResponse>;

    /// Progressive hints for the current step.
    async fn generate_hints(&self, context: &TutorContext) -> AiResult<AiResponse>;

    /// Free-form conversation turn.
    async fn chat_response(&self, context: &TutorContext) -> AiResult<AiResponse>;

    /// Check that the backend is reachable.
    async fn test_connection(&self) -> ConnectionTest;

    /// Per-model usage since the adapter was created.
    fn usage_summary(&self) -> Vec<ModelUsage>;
}
