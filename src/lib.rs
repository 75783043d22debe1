//! # labtutor
//!
//! Virtual networking lab sessions with AI tutoring, layered onto LMS courses.
//!
//! ## Features
//!
//! - **Lab Providers**: GNS3 and Guacamole adapters behind a cached factory
//! - **Session Lifecycle**: create, step, validate, pause/resume, complete, expire
//! - **Scoring**: every validation attempt recorded and summed into the session score
//! - **AI Tutoring**: contextual help, configuration review, error explanation,
//!   hints and chat through OpenRouter, with per-model cost bookkeeping
//! - **LMS Bridge**: enrollment-based access and lesson completion
//!
//! ## Architecture
//!
//! ```text
//! caller → SessionManager → ProviderFactory → GNS3 / Guacamole (HTTP)
//!              ↓
//!        SQLite (State) ← AiFactory → OpenRouter (HTTP)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use labtutor::{Config, AppState};
//! use labtutor::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let state = Arc::new(AppState::new(config, storage));
//!     let session = state.sessions.create_session(1, 1, None, &serde_json::json!({})).await?;
//!     println!("{}", session.id);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// AI tutoring adapters and factory.
pub mod ai;
/// Command-line interface.
pub mod cli;
/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// LMS access checks and lesson completion.
pub mod lms;
/// System prompts for AI tutoring.
pub mod prompts;
/// Lab provider adapters and factory.
pub mod provider;
/// Lab session lifecycle.
pub mod session;
/// Shared application state.
pub mod state;
/// SQLite storage layer for persistence.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult, ErrorKind};
pub use state::{AppState, SharedState};
