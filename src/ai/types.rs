use serde::{Deserialize, Serialize};

use crate::storage::{GuidedStep, SessionContext};

/// Message in a chat completion conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Request body for `/chat/completions`
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// Response from `/chat/completions`
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<ApiUsage>,
}

/// One completion choice
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

/// Message inside a choice
#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Token usage as reported by the gateway
#[derive(Debug, Clone, Deserialize)]
pub struct ApiUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// Token counts of one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<ApiUsage> for TokenUsage {
    fn from(usage: ApiUsage) -> Self {
        let prompt_tokens = usage.prompt_tokens.unwrap_or(0);
        let completion_tokens = usage.completion_tokens.unwrap_or(0);
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: usage
                .total_tokens
                .unwrap_or(prompt_tokens + completion_tokens),
        }
    }
}

/// Reply from an AI adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
    pub cost_estimate: f64,
}

/// What the student asked for, merged into the session context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TutorRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub history: Vec<Message>,
}

impl TutorRequest {
    /// Request carrying a free-form message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Request carrying device configuration to review.
    pub fn configuration(configuration: impl Into<String>, device_type: Option<String>) -> Self {
        Self {
            configuration: Some(configuration.into()),
            device_type,
            ..Default::default()
        }
    }

    /// Request carrying an error message to explain.
    pub fn error(error_message: impl Into<String>) -> Self {
        Self {
            error_message: Some(error_message.into()),
            ..Default::default()
        }
    }

    /// Attach earlier conversation turns.
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}

/// Everything an AI adapter sees about the student's lab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TutorContext {
    pub session_id: String,
    pub user_id: i64,
    pub user_name: String,
    pub lab_name: String,
    pub lab_description: String,
    pub difficulty: String,
    pub provider_type: String,
    pub status: String,
    pub current_step: i64,
    pub total_steps: i64,
    pub step: Option<GuidedStep>,
    pub score: f64,
    pub max_score: f64,
    pub request: TutorRequest,
}

impl TutorContext {
    /// Merge a loaded session with the student's request.
    ///
    /// Malformed guided steps only drop the step details.
    pub fn from_session(context: &SessionContext, request: TutorRequest) -> Self {
        let session = &context.session;
        let template = context.template.as_ref();
        let step = template
            .and_then(|t| t.steps().ok())
            .and_then(|steps| {
                usize::try_from(session.current_step - 1)
                    .ok()
                    .and_then(|i| steps.into_iter().nth(i))
            });

        Self {
            session_id: session.id.clone(),
            user_id: session.user_id,
            user_name: context
                .user_display_name
                .clone()
                .or_else(|| context.user_login.clone())
                .unwrap_or_else(|| "Student".to_string()),
            lab_name: template.map(|t| t.name.clone()).unwrap_or_default(),
            lab_description: template
                .and_then(|t| t.description.clone())
                .unwrap_or_default(),
            difficulty: template
                .map(|t| t.difficulty_level.clone())
                .unwrap_or_default(),
            provider_type: session.provider_type.clone(),
            status: session.status.to_string(),
            current_step: session.current_step,
            total_steps: session.total_steps,
            step,
            score: session.score,
            max_score: session.max_score,
            request,
        }
    }

    /// Plain-text summary of the lab state for a prompt.
    pub fn describe(&self) -> String {
        let mut lines = vec![
            format!("Student: {}", self.user_name),
            format!("Lab: {} ({})", self.lab_name, self.provider_type),
        ];
        if !self.lab_description.is_empty() {
            lines.push(format!("Description: {}", self.lab_description));
        }
        if !self.difficulty.is_empty() {
            lines.push(format!("Difficulty: {}", self.difficulty));
        }
        lines.push(format!(
            "Progress: step {} of {}, score {}/{}",
            self.current_step, self.total_steps, self.score, self.max_score
        ));
        if let Some(step) = &self.step {
            lines.push(format!("Current step: {}", step.title));
            if !step.instructions.is_empty() {
                lines.push(format!("Instructions: {}", step.instructions));
            }
        }
        lines.join("\n")
    }
}
