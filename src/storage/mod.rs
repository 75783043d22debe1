//! Storage layer for lab session persistence.
//!
//! This module provides SQLite-based storage for lab templates, provider
//! configurations, sessions, validation attempts, AI interactions and the
//! identity/LMS tables the session lifecycle consults.

mod sqlite;


pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;

/// Default points awarded for a guided step that does not set its own.
pub const DEFAULT_STEP_MAX_SCORE: f64 = 10.0;

/// Lifecycle status of a lab session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Row written, lab not yet in use.
    #[default]
    Started,
    /// Lab provisioned and usable.
    Active,
    /// Student is working through steps.
    InProgress,
    /// Suspended by the student.
    Paused,
    /// All steps done or explicitly completed.
    Completed,
    /// Ended explicitly or reaped after its deadline.
    Expired,
    /// Terminal failure.
    Failed,
}

impl SessionStatus {
    /// Statuses that count toward the one-live-session-per-lab rule.
    pub const LIVE: [SessionStatus; 3] = [
        SessionStatus::Started,
        SessionStatus::Active,
        SessionStatus::InProgress,
    ];

    /// Whether the session is live (started, active or in progress).
    pub fn is_live(&self) -> bool {
        Self::LIVE.contains(self)
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Expired | SessionStatus::Failed
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Started, Active | InProgress) => true,
            (Active, InProgress) => true,
            (Started | Active | InProgress, Paused) => true,
            (Paused, Active | InProgress) => true,
            (Started | Active | InProgress | Paused, Completed) => true,
            (Started | Active | InProgress | Paused, Expired) => true,
            (Started | Active | InProgress | Paused, Failed) => true,
            _ => false,
        }
    }

    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Started => "started",
            SessionStatus::Active => "active",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Expired => "expired",
            SessionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "started" => Ok(SessionStatus::Started),
            "active" => Ok(SessionStatus::Active),
            "in_progress" => Ok(SessionStatus::InProgress),
            "paused" => Ok(SessionStatus::Paused),
            "completed" => Ok(SessionStatus::Completed),
            "expired" => Ok(SessionStatus::Expired),
            "failed" => Ok(SessionStatus::Failed),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// One student's attempt at one lab template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabSession {
    /// Unique session identifier.
    pub id: String,
    /// Student.
    pub user_id: i64,
    /// Lab template.
    pub lab_id: i64,
    /// Provider configuration row used to provision the lab.
    pub provider_id: Option<i64>,
    /// Provider type (e.g. "gns3").
    pub provider_type: String,
    /// Identifier of the lab on the provider side.
    pub provider_session_id: String,
    /// 1-based step the student is on.
    pub current_step: i64,
    /// Number of guided steps in the template.
    pub total_steps: i64,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Accumulated validation score.
    pub score: f64,
    /// Sum of step max scores.
    pub max_score: f64,
    /// Provider response and caller options.
    pub session_data: serde_json::Value,
    /// Free-form tutoring context.
    pub ai_context: serde_json::Value,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last updated.
    pub updated_at: DateTime<Utc>,
    /// Wall-clock deadline.
    pub expires_at: DateTime<Utc>,
    /// When the session was completed.
    pub completed_at: Option<DateTime<Utc>>,
}

impl LabSession {
    /// Create a new active session at step 1.
    pub fn new(
        user_id: i64,
        lab_id: i64,
        provider_type: impl Into<String>,
        provider_session_id: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            lab_id,
            provider_id: None,
            provider_type: provider_type.into(),
            provider_session_id: provider_session_id.into(),
            current_step: 1,
            total_steps: 0,
            status: SessionStatus::Active,
            score: 0.0,
            max_score: 0.0,
            session_data: serde_json::Value::Null,
            ai_context: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
            expires_at,
            completed_at: None,
        }
    }

    /// Set the provider configuration row.
    pub fn with_provider(mut self, provider_id: i64) -> Self {
        self.provider_id = Some(provider_id);
        self
    }

    /// Set step count and maximum score.
    pub fn with_steps(mut self, total_steps: i64, max_score: f64) -> Self {
        self.total_steps = total_steps;
        self.max_score = max_score;
        self
    }

    /// Set the status.
    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = status;
        self
    }

    /// Set session data.
    pub fn with_session_data(mut self, data: serde_json::Value) -> Self {
        self.session_data = data;
        self
    }

    /// Whether the deadline has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Score as a percentage of the max score (0 when max score is 0).
    pub fn score_percent(&self) -> f64 {
        if self.max_score > 0.0 {
            self.score / self.max_score * 100.0
        } else {
            0.0
        }
    }
}

/// Health state of a provider backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Never checked.
    #[default]
    Unknown,
    /// Last connection test succeeded.
    Healthy,
    /// Last connection test failed.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Unknown => write!(f, "unknown"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

impl std::str::FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unknown" => Ok(HealthStatus::Unknown),
            "healthy" => Ok(HealthStatus::Healthy),
            "unhealthy" => Ok(HealthStatus::Unhealthy),
            _ => Err(format!("Unknown health status: {}", s)),
        }
    }
}

/// A persisted lab provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    /// Row identifier.
    pub id: i64,
    /// Unique machine name.
    pub name: String,
    /// Adapter type (e.g. "gns3", "guacamole").
    pub provider_type: String,
    /// Human-readable name.
    pub display_name: String,
    /// Adapter configuration.
    pub config: serde_json::Value,
    /// Whether the provider may be used.
    pub is_active: bool,
    /// Whether this is the default for its type.
    pub is_default: bool,
    /// Result of the last connection test.
    pub health_status: HealthStatus,
    /// Message from the last connection test.
    pub health_message: Option<String>,
    /// When the last connection test ran.
    pub last_health_check: Option<DateTime<Utc>>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Fields for inserting a provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProvider {
    pub name: String,
    pub provider_type: String,
    pub display_name: String,
    pub config: serde_json::Value,
    pub is_active: bool,
    pub is_default: bool,
}

impl NewProvider {
    /// Create an active, non-default provider.
    pub fn new(
        name: impl Into<String>,
        provider_type: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            provider_type: provider_type.into(),
            config,
            is_active: true,
            is_default: false,
        }
    }

    /// Set the display name.
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Mark as the default for its type.
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Mark as inactive.
    pub fn as_inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Partial update of a provider configuration. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderUpdate {
    pub display_name: Option<String>,
    pub config: Option<serde_json::Value>,
    pub is_active: Option<bool>,
    pub is_default: Option<bool>,
}

impl ProviderUpdate {
    /// Whether the update touches nothing.
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.config.is_none()
            && self.is_active.is_none()
            && self.is_default.is_none()
    }
}

/// Whether a template walks the student through validated steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateType {
    /// Step-by-step with validation.
    #[default]
    Guided,
    /// Free-form lab.
    NonGuided,
}

impl std::fmt::Display for TemplateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateType::Guided => write!(f, "guided"),
            TemplateType::NonGuided => write!(f, "non_guided"),
        }
    }
}

impl std::str::FromStr for TemplateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "guided" => Ok(TemplateType::Guided),
            "non_guided" | "non-guided" => Ok(TemplateType::NonGuided),
            _ => Err(format!("Unknown template type: {}", s)),
        }
    }
}

/// One guided step of a lab template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidedStep {
    /// Short step title.
    pub title: String,
    /// What the student should do.
    #[serde(default)]
    pub instructions: String,
    /// Progressive hints.
    #[serde(default)]
    pub hints: Vec<String>,
    /// Points for this step.
    #[serde(default = "default_step_max_score")]
    pub max_score: f64,
    /// Provider-specific check definition (`{"type": ..., "expected": ...}`).
    #[serde(default)]
    pub validation: Option<serde_json::Value>,
}

fn default_step_max_score() -> f64 {
    DEFAULT_STEP_MAX_SCORE
}

impl GuidedStep {
    /// Create a step with default score and no check.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            instructions: String::new(),
            hints: Vec::new(),
            max_score: DEFAULT_STEP_MAX_SCORE,
            validation: None,
        }
    }

    /// Set instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Add a hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }

    /// Set the points for this step.
    pub fn with_max_score(mut self, max_score: f64) -> Self {
        self.max_score = max_score.max(0.0);
        self
    }

    /// Set the check definition.
    pub fn with_validation(mut self, validation: serde_json::Value) -> Self {
        self.validation = Some(validation);
        self
    }

    /// Check type named by the validation block, or "manual".
    pub fn validation_type(&self) -> String {
        self.validation
            .as_ref()
            .and_then(|v| v.get("type"))
            .and_then(|t| t.as_str())
            .unwrap_or("manual")
            .to_string()
    }

    /// Expected result named by the validation block.
    pub fn expected_result(&self) -> Option<serde_json::Value> {
        self.validation.as_ref().and_then(|v| v.get("expected")).cloned()
    }
}

/// Static definition of a lab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabTemplate {
    /// Row identifier.
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    /// Preferred provider type, if any.
    pub provider_type: Option<String>,
    pub template_type: TemplateType,
    /// Raw guided steps JSON, decoded on use.
    pub guided_steps: String,
    pub startup_script: Option<String>,
    pub verification_script: Option<String>,
    pub difficulty_level: String,
    /// Minutes.
    pub estimated_duration: i64,
    pub is_active: bool,
    pub is_featured: bool,
    pub usage_count: i64,
    /// LMS course the lab belongs to.
    pub course_id: Option<i64>,
    /// LMS lesson completed by passing the lab.
    pub lesson_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LabTemplate {
    /// Create an active guided template with no steps.
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            slug: slug.into(),
            description: None,
            provider_type: None,
            template_type: TemplateType::Guided,
            guided_steps: "[]".to_string(),
            startup_script: None,
            verification_script: None,
            difficulty_level: "beginner".to_string(),
            estimated_duration: 60,
            is_active: true,
            is_featured: false,
            usage_count: 0,
            course_id: None,
            lesson_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the guided steps.
    pub fn with_steps(mut self, steps: &[GuidedStep]) -> Self {
        self.guided_steps = serde_json::to_string(steps).unwrap_or_else(|_| "[]".to_string());
        self
    }

    /// Set raw guided steps JSON.
    pub fn with_raw_steps(mut self, raw: impl Into<String>) -> Self {
        self.guided_steps = raw.into();
        self
    }

    /// Set the preferred provider type.
    pub fn with_provider_type(mut self, provider_type: impl Into<String>) -> Self {
        self.provider_type = Some(provider_type.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Link the template to an LMS course and lesson.
    pub fn with_lesson(mut self, course_id: i64, lesson_id: i64) -> Self {
        self.course_id = Some(course_id);
        self.lesson_id = Some(lesson_id);
        self
    }

    /// Mark as inactive.
    pub fn as_inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Decode the guided steps.
    pub fn steps(&self) -> Result<Vec<GuidedStep>, serde_json::Error> {
        if self.guided_steps.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&self.guided_steps)
    }
}

/// A student or instructor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub login: String,
    pub display_name: String,
    pub email: Option<String>,
    /// Instructors and admins bypass enrollment checks.
    pub can_manage_labs: bool,
}

impl User {
    /// Create a user without lab management capability.
    pub fn new(login: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: 0,
            login: login.into(),
            display_name: display_name.into(),
            email: None,
            can_manage_labs: false,
        }
    }

    /// Set the email.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Grant lab management capability.
    pub fn as_manager(mut self) -> Self {
        self.can_manage_labs = true;
        self
    }
}

/// A persisted outcome of one step-check attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub id: String,
    pub session_id: String,
    pub step: i64,
    pub validation_type: String,
    /// Data submitted by the student.
    pub validation_data: serde_json::Value,
    pub expected_result: Option<serde_json::Value>,
    pub actual_result: Option<serde_json::Value>,
    pub score: f64,
    pub max_score: f64,
    pub passed: bool,
    pub feedback: Option<String>,
    pub validation_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl ValidationRecord {
    /// Create a record for a step attempt.
    pub fn new(
        session_id: impl Into<String>,
        step: i64,
        validation_type: impl Into<String>,
        validation_data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            step,
            validation_type: validation_type.into(),
            validation_data,
            expected_result: None,
            actual_result: None,
            score: 0.0,
            max_score: 0.0,
            passed: false,
            feedback: None,
            validation_time_ms: 0,
            created_at: Utc::now(),
        }
    }

    /// Set the outcome.
    pub fn with_outcome(mut self, passed: bool, score: f64, max_score: f64) -> Self {
        self.passed = passed;
        self.score = score;
        self.max_score = max_score;
        self
    }
}

/// Kind of AI tutoring request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    ContextualHelp,
    ConfigurationAnalysis,
    Chat,
    ErrorExplanation,
    Hints,
}

impl std::fmt::Display for InteractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InteractionType::ContextualHelp => write!(f, "contextual_help"),
            InteractionType::ConfigurationAnalysis => write!(f, "configuration_analysis"),
            InteractionType::Chat => write!(f, "chat"),
            InteractionType::ErrorExplanation => write!(f, "error_explanation"),
            InteractionType::Hints => write!(f, "hints"),
        }
    }
}

/// Audit row for one AI call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiInteraction {
    pub id: String,
    pub session_id: String,
    pub user_id: i64,
    pub ai_provider: String,
    pub interaction_type: String,
    pub request_data: serde_json::Value,
    pub response_data: serde_json::Value,
    pub tokens_used: i64,
    pub response_time_ms: i64,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
}

impl AiInteraction {
    /// Create an interaction row.
    pub fn new(
        session_id: impl Into<String>,
        user_id: i64,
        ai_provider: impl Into<String>,
        interaction_type: InteractionType,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            user_id,
            ai_provider: ai_provider.into(),
            interaction_type: interaction_type.to_string(),
            request_data: serde_json::Value::Null,
            response_data: serde_json::Value::Null,
            tokens_used: 0,
            response_time_ms: 0,
            cost_usd: 0.0,
            created_at: Utc::now(),
        }
    }
}

/// Success-path analytics event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub id: String,
    pub event_type: String,
    pub user_id: Option<i64>,
    pub session_id: Option<String>,
    pub lab_id: Option<i64>,
    pub event_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AnalyticsEvent {
    /// Create an event for a session.
    pub fn for_session(event_type: impl Into<String>, session: &LabSession) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            user_id: Some(session.user_id),
            session_id: Some(session.id.clone()),
            lab_id: Some(session.lab_id),
            event_data: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    /// Attach event data.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.event_data = data;
        self
    }
}

/// LMS lesson completion written when a lab is passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonCompletion {
    pub user_id: i64,
    pub course_id: Option<i64>,
    pub lesson_id: i64,
    pub session_id: String,
    pub score_percent: f64,
    pub completed_at: DateTime<Utc>,
}

/// Session joined with its student and template, as read by the tutor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session: LabSession,
    pub user_login: Option<String>,
    pub user_display_name: Option<String>,
    pub template: Option<LabTemplate>,
}

/// Count of sessions per status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

/// Format a timestamp the way rows store it (fixed width, so text order is time order).
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp, falling back to now on malformed input.
pub fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Storage trait for database operations.
///
/// This trait defines all persistence operations for templates, providers,
/// sessions, validations, AI interactions, analytics and LMS records.
#[async_trait]
pub trait Storage: Send + Sync {
    // User and LMS operations

    /// Insert a user and return its ID.
    async fn create_user(&self, user: &User) -> StorageResult<i64>;
    /// Get a user by ID.
    async fn get_user(&self, id: i64) -> StorageResult<Option<User>>;
    /// Enroll a user in a course.
    async fn enroll_user(&self, user_id: i64, course_id: i64) -> StorageResult<()>;
    /// Whether a user is enrolled in a course.
    async fn is_enrolled(&self, user_id: i64, course_id: i64) -> StorageResult<bool>;
    /// Record a lesson completion. Returns false if it was already recorded.
    async fn mark_lesson_complete(&self, completion: &LessonCompletion) -> StorageResult<bool>;
    /// Get the completion of a lesson by a user.
    async fn get_lesson_completion(
        &self,
        user_id: i64,
        lesson_id: i64,
    ) -> StorageResult<Option<LessonCompletion>>;

    // Lab template operations

    /// Insert a template and return its ID.
    async fn create_template(&self, template: &LabTemplate) -> StorageResult<i64>;
    /// Get a template by ID.
    async fn get_template(&self, id: i64) -> StorageResult<Option<LabTemplate>>;
    /// Get a template by slug.
    async fn get_template_by_slug(&self, slug: &str) -> StorageResult<Option<LabTemplate>>;
    /// List templates.
    async fn list_templates(&self, active_only: bool) -> StorageResult<Vec<LabTemplate>>;
    /// Bump a template's usage counter.
    async fn increment_template_usage(&self, id: i64) -> StorageResult<()>;

    // Provider configuration operations

    /// Insert a provider, clearing other defaults of its type first when it is the default.
    async fn insert_provider(&self, provider: &NewProvider) -> StorageResult<i64>;
    /// Get a provider by ID.
    async fn get_provider(&self, id: i64) -> StorageResult<Option<ProviderRecord>>;
    /// List providers.
    async fn list_providers(&self, active_only: bool) -> StorageResult<Vec<ProviderRecord>>;
    /// Active default provider, else the first active provider.
    async fn get_default_provider(&self) -> StorageResult<Option<ProviderRecord>>;
    /// Active provider of a type, preferring its default.
    async fn get_provider_by_type(&self, provider_type: &str)
        -> StorageResult<Option<ProviderRecord>>;
    /// Apply a partial update. Returns false if the provider does not exist.
    async fn update_provider(&self, id: i64, update: &ProviderUpdate) -> StorageResult<bool>;
    /// Make a provider the only default of its type, in one transaction.
    async fn set_default_provider(&self, id: i64) -> StorageResult<bool>;
    /// Delete a provider. Returns false if it did not exist.
    async fn delete_provider(&self, id: i64) -> StorageResult<bool>;
    /// Persist a connection test result.
    async fn update_provider_health(
        &self,
        id: i64,
        status: HealthStatus,
        message: Option<&str>,
        checked_at: DateTime<Utc>,
    ) -> StorageResult<()>;
    /// Sessions on a provider that are live or paused.
    async fn count_open_sessions_for_provider(&self, provider_id: i64) -> StorageResult<i64>;

    // Session operations

    /// Insert a session. A second live session for the same user and lab is a `Conflict`.
    async fn create_session(&self, session: &LabSession) -> StorageResult<()>;
    /// Get a session by ID.
    async fn get_session(&self, id: &str) -> StorageResult<Option<LabSession>>;
    /// The live session of a user for a lab, if any.
    async fn find_live_session(&self, user_id: i64, lab_id: i64)
        -> StorageResult<Option<LabSession>>;
    /// Write the mutable fields of a session.
    async fn update_session(&self, session: &LabSession) -> StorageResult<()>;
    /// Write step, status, score and deadline only while the stored session is
    /// still live. Returns whether a row changed.
    async fn update_live_session(&self, session: &LabSession) -> StorageResult<bool>;
    /// Move a session to `to` if its status is one of `from`. Returns whether a row changed.
    async fn transition_session(
        &self,
        id: &str,
        from: &[SessionStatus],
        to: SessionStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> StorageResult<bool>;
    /// Live sessions whose deadline is before `now`.
    async fn list_expired_sessions(&self, now: DateTime<Utc>) -> StorageResult<Vec<LabSession>>;
    /// Sessions grouped by status.
    async fn count_sessions_by_status(&self) -> StorageResult<Vec<StatusCount>>;
    /// Session joined with user and template.
    async fn load_session_context(&self, session_id: &str) -> StorageResult<Option<SessionContext>>;

    // Validation operations

    /// Append a validation attempt.
    async fn create_validation(&self, record: &ValidationRecord) -> StorageResult<()>;
    /// All attempts for a session, oldest first.
    async fn get_session_validations(&self, session_id: &str)
        -> StorageResult<Vec<ValidationRecord>>;
    /// SUM(score) over every attempt of a session.
    async fn sum_validation_scores(&self, session_id: &str) -> StorageResult<f64>;

    // AI interaction operations

    /// Append an AI interaction.
    async fn log_ai_interaction(&self, interaction: &AiInteraction) -> StorageResult<()>;
    /// All interactions for a session, oldest first.
    async fn get_session_interactions(&self, session_id: &str)
        -> StorageResult<Vec<AiInteraction>>;

    // Analytics and settings

    /// Append an analytics event.
    async fn record_event(&self, event: &AnalyticsEvent) -> StorageResult<()>;
    /// Events of one type, oldest first.
    async fn get_events(&self, event_type: &str) -> StorageResult<Vec<AnalyticsEvent>>;
    /// Read a setting.
    async fn get_setting(&self, key: &str) -> StorageResult<Option<String>>;
    /// Write a setting.
    async fn set_setting(&self, key: &str, value: &str) -> StorageResult<()>;
}
