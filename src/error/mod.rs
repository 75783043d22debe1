use thiserror::Error;

/// Coarse error classes callers translate into responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing input, or an entity in the wrong state.
    Validation,
    /// A session, template, user or provider does not exist.
    NotFound,
    /// The remote lab or AI backend reported a failure.
    Adapter,
    /// Local persistence or configuration failed.
    Infrastructure,
}

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("AI error: {0}")]
    Ai(#[from] AiError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Constraint violated: {message}")]
    Conflict { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Lab provider adapter and factory errors
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Invalid provider type: '{provider_type}'")]
    InvalidType { provider_type: String },

    #[error("No adapter registered for provider type: {provider_type}")]
    NotRegistered { provider_type: String },

    #[error("Failed to instantiate {provider_type} provider: {message}")]
    Instantiation {
        provider_type: String,
        message: String,
    },

    #[error("Provider not found: {id}")]
    NotFound { id: i64 },

    #[error("Invalid configuration for provider {id}: {message}")]
    InvalidConfig { id: i64, message: String },

    #[error("No active providers configured")]
    NoActiveProviders,

    #[error("No active provider of type: {provider_type}")]
    TypeNotFound { provider_type: String },

    #[error("Provider {id} has {count} active sessions")]
    HasActiveSessions { id: i64, count: i64 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// AI adapter and factory errors
#[derive(Debug, Error)]
pub enum AiError {
    #[error("Invalid AI provider type: '{provider_type}'")]
    InvalidType { provider_type: String },

    #[error("No AI adapter registered for type: {provider_type}")]
    NotRegistered { provider_type: String },

    #[error("Failed to instantiate {provider_type} AI provider: {message}")]
    Instantiation {
        provider_type: String,
        message: String,
    },

    #[error("No active AI provider configured")]
    NoActiveProvider,

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Lab template not found for session: {session_id}")]
    TemplateNotFound { session_id: String },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Lab session lifecycle errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("User not found: {user_id}")]
    UserNotFound { user_id: i64 },

    #[error("Lab template not found: {lab_id}")]
    TemplateNotFound { lab_id: i64 },

    #[error("Lab template is not active: {lab_id}")]
    TemplateInactive { lab_id: i64 },

    #[error("User {user_id} may not access lab {lab_id}")]
    AccessDenied { user_id: i64, lab_id: i64 },

    #[error("User {user_id} already has an active session for lab {lab_id}")]
    ActiveSessionExists { user_id: i64, lab_id: i64 },

    #[error("Invalid guided steps JSON for lab {lab_id}: {message}")]
    InvalidTemplateJson { lab_id: i64, message: String },

    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },

    #[error("Session {session_id} is not active (status: {status})")]
    NotActive { session_id: String, status: String },

    #[error("Session {session_id} cannot move from {from} to {to}")]
    InvalidTransition {
        session_id: String,
        from: String,
        to: String,
    },

    #[error("Step {step} is outside 1..={total_steps}")]
    StepOutOfRange { step: i64, total_steps: i64 },

    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl StorageError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Infrastructure
    }
}

impl ProviderError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::InvalidType { .. }
            | ProviderError::HasActiveSessions { .. }
            | ProviderError::InvalidConfig { .. } => ErrorKind::Validation,
            ProviderError::NotFound { .. }
            | ProviderError::NotRegistered { .. }
            | ProviderError::NoActiveProviders
            | ProviderError::TypeNotFound { .. } => ErrorKind::NotFound,
            ProviderError::Api { .. }
            | ProviderError::InvalidResponse { .. }
            | ProviderError::Timeout { .. }
            | ProviderError::Http(_) => ErrorKind::Adapter,
            ProviderError::Instantiation { .. } | ProviderError::Storage(_) => {
                ErrorKind::Infrastructure
            }
        }
    }
}

impl AiError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AiError::InvalidType { .. } => ErrorKind::Validation,
            AiError::NotRegistered { .. }
            | AiError::NoActiveProvider
            | AiError::SessionNotFound { .. }
            | AiError::TemplateNotFound { .. } => ErrorKind::NotFound,
            AiError::Api { .. }
            | AiError::InvalidResponse { .. }
            | AiError::Timeout { .. }
            | AiError::Http(_) => ErrorKind::Adapter,
            AiError::Instantiation { .. } | AiError::Storage(_) => ErrorKind::Infrastructure,
        }
    }
}

impl SessionError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::UserNotFound { .. }
            | SessionError::TemplateNotFound { .. }
            | SessionError::NotFound { .. } => ErrorKind::NotFound,
            SessionError::TemplateInactive { .. }
            | SessionError::AccessDenied { .. }
            | SessionError::ActiveSessionExists { .. }
            | SessionError::InvalidTemplateJson { .. }
            | SessionError::NotActive { .. }
            | SessionError::InvalidTransition { .. }
            | SessionError::StepOutOfRange { .. }
            | SessionError::InvalidInput { .. } => ErrorKind::Validation,
            SessionError::Provider(e) => e.kind(),
            SessionError::Storage(_) => ErrorKind::Infrastructure,
        }
    }
}

impl AppError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Config { .. } | AppError::Internal { .. } => ErrorKind::Infrastructure,
            AppError::Storage(e) => e.kind(),
            AppError::Provider(e) => e.kind(),
            AppError::Ai(e) => e.kind(),
            AppError::Session(e) => e.kind(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Result type alias for AI operations
pub type AiResult<T> = Result<T, AiError>;

/// Result type alias for session lifecycle operations
pub type SessionResult<T> = Result<T, SessionError>;
