//! Shared application state.

use std::sync::Arc;

use tracing::info;

use crate::ai::AiFactory;
use crate::config::Config;
use crate::provider::ProviderFactory;
use crate::session::SessionManager;
use crate::storage::SqliteStorage;

/// Application state shared by the CLI commands and the sweeper.
///
/// Holds the storage pool and the three services built on it.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// SQLite storage backend.
    pub storage: SqliteStorage,
    /// Lab provider factory.
    pub providers: Arc<ProviderFactory>,
    /// AI tutoring factory.
    pub ai: Arc<AiFactory>,
    /// Session lifecycle manager.
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config, storage: SqliteStorage) -> Self {
        let providers = Arc::new(ProviderFactory::new(
            storage.clone(),
            config.request.clone(),
        ));
        let ai = Arc::new(AiFactory::new(
            storage.clone(),
            config.ai.clone(),
            config.request.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            storage.clone(),
            providers.clone(),
            config.session.clone(),
        ));

        info!(
            timeout_hours = config.session.timeout_hours,
            completion_threshold = config.session.completion_threshold,
            ai_provider = ?config.ai.provider,
            "Application state initialized"
        );

        Self {
            config,
            storage,
            providers,
            ai,
            sessions,
        }
    }
}

/// Shared application state handle.
pub type SharedState = Arc<AppState>;
