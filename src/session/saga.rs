//! Provision-then-persist saga for new sessions.
//!
//! ```text
//! Pending --provision--> Provisioned --persisted--> Persisted
//!                             |
//!                             +--compensate--> Compensated { destroyed }
//! ```
//!
//! A lab provisioned on a provider but never persisted is destroyed again.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::ProviderResult;
use crate::provider::{LabProvider, ProviderSession};
use crate::storage::{LabTemplate, User};

/// Where the saga is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaState {
    /// Nothing provisioned yet.
    Pending,
    /// Provider holds a lab the store does not know about.
    Provisioned { provider_session_id: String },
    /// Session row written; nothing left to undo.
    Persisted,
    /// Provider lab torn down after a failed insert.
    Compensated { destroyed: bool },
}

/// Tracks one session creation across the provider and the store.
pub struct ProvisionSaga {
    adapter: Arc<dyn LabProvider>,
    state: SagaState,
}

impl ProvisionSaga {
    /// Start a saga against `adapter`.
    pub fn new(adapter: Arc<dyn LabProvider>) -> Self {
        Self {
            adapter,
            state: SagaState::Pending,
        }
    }

    /// Current state.
    pub fn state(&self) -> &SagaState {
        &self.state
    }

    /// Provision the lab. A provider error leaves the saga `Pending`.
    pub async fn provision(
        &mut self,
        user: &User,
        template: &LabTemplate,
        options: &Value,
    ) -> ProviderResult<ProviderSession> {
        let session = self
            .adapter
            .create_session(user, template, options)
            .await?;
        self.state = SagaState::Provisioned {
            provider_session_id: session.session_id.clone(),
        };
        Ok(session)
    }

    /// The session row was written.
    pub fn persisted(&mut self) {
        if matches!(self.state, SagaState::Provisioned { .. }) {
            self.state = SagaState::Persisted;
        }
    }

    /// Undo a provisioned lab. Returns whether the provider destroyed it.
    pub async fn compensate(&mut self) -> bool {
        let SagaState::Provisioned {
            provider_session_id,
        } = &self.state
        else {
            return false;
        };
        let provider_session_id = provider_session_id.clone();

        let destroyed = match self.adapter.destroy_session(&provider_session_id).await {
            Ok(destroyed) => destroyed,
            Err(e) => {
                warn!(
                    provider_session_id = %provider_session_id,
                    error = %e,
                    "Compensating destroy failed, provider lab leaked"
                );
                false
            }
        };

        info!(
            provider_session_id = %provider_session_id,
            destroyed,
            "Session creation compensated"
        );
        self.state = SagaState::Compensated { destroyed };
        destroyed
    }
}
