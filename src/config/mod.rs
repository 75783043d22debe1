use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub session: SessionConfig,
    pub ai: AiConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration shared by provider and AI adapters
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
}

/// Lab session lifecycle configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hours until a new session expires.
    pub timeout_hours: i64,
    /// Percentage of max score needed to mark the linked lesson complete.
    pub completion_threshold: f64,
    /// Seconds between expiry sweeps.
    pub cleanup_interval_secs: u64,
}

/// AI tutoring configuration
#[derive(Debug, Clone)]
pub struct AiConfig {
    /// Provider type used when nothing has been persisted yet.
    pub provider: Option<String>,
    pub openrouter: OpenRouterConfig,
}

/// OpenRouter gateway configuration
#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/labtutor.db".to_string()),
            ),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS").unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_env("REQUEST_TIMEOUT_MS").unwrap_or(30000),
        };

        let session = SessionConfig {
            timeout_hours: parse_env("SESSION_TIMEOUT_HOURS").unwrap_or(4),
            completion_threshold: parse_env("COMPLETION_THRESHOLD").unwrap_or(70.0),
            cleanup_interval_secs: parse_env("CLEANUP_INTERVAL_SECS").unwrap_or(3600),
        };

        if session.timeout_hours <= 0 {
            return Err(AppError::Config {
                message: "SESSION_TIMEOUT_HOURS must be positive".to_string(),
            });
        }
        if !(0.0..=100.0).contains(&session.completion_threshold) {
            return Err(AppError::Config {
                message: "COMPLETION_THRESHOLD must be between 0 and 100".to_string(),
            });
        }

        let ai = AiConfig {
            provider: env::var("AI_PROVIDER").ok().filter(|s| !s.trim().is_empty()),
            openrouter: OpenRouterConfig {
                api_key: env::var("OPENROUTER_API_KEY")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
                base_url: env::var("OPENROUTER_BASE_URL")
                    .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string()),
                model: env::var("OPENROUTER_MODEL")
                    .unwrap_or_else(|_| "openai/gpt-4o-mini".to_string()),
                max_tokens: parse_env("AI_MAX_TOKENS").unwrap_or(1000),
                temperature: parse_env("AI_TEMPERATURE").unwrap_or(0.7),
            },
        };

        Ok(Config {
            database,
            logging,
            request,
            session,
            ai,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout_ms: 30000 }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_hours: 4,
            completion_threshold: 70.0,
            cleanup_interval_secs: 3600,
        }
    }
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            max_tokens: 1000,
            temperature: 0.7,
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: None,
            openrouter: OpenRouterConfig::default(),
        }
    }
}
