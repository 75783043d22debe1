//! Lab session lifecycle.
//!
//! ```text
//! started -> active/in_progress <-> paused
//!                 |                    |
//!                 +--> completed       |
//!                 +--> expired <-------+
//! ```
//!
//! `failed` is a valid status that no flow currently produces.

mod saga;
mod sweeper;

pub use saga::{ProvisionSaga, SagaState};
pub use sweeper::Sweeper;

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult, StorageError};
use crate::lms::LmsBridge;
use crate::provider::{ProviderFactory, ProviderHandle, StepValidation};
use crate::storage::{
    AnalyticsEvent, GuidedStep, LabSession, LabTemplate, SessionStatus, SqliteStorage,
    StatusCount, Storage, ValidationRecord,
};

/// Outcome of one `validate_step` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    /// What the provider decided.
    pub validation: StepValidation,
    /// Session after scoring (and completion, if this was the last step).
    pub session: LabSession,
    /// Whether this attempt completed the session.
    pub completed: bool,
}

/// Result of one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Sessions moved to `expired`.
    pub expired: usize,
    /// Provider labs torn down.
    pub destroyed: usize,
    /// Provider labs that could not be torn down.
    pub destroy_failures: usize,
}

/// Owns the session lifecycle and coordinates providers with stored rows.
pub struct SessionManager {
    storage: SqliteStorage,
    providers: Arc<ProviderFactory>,
    lms: LmsBridge,
    config: SessionConfig,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(storage: SqliteStorage, providers: Arc<ProviderFactory>, config: SessionConfig) -> Self {
        Self {
            lms: LmsBridge::new(storage.clone()),
            storage,
            providers,
            config,
        }
    }

    /// Lifecycle settings in use.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a lab for a student.
    ///
    /// Checks run in order: user, template, access, existing live session,
    /// provider, guided steps. The provider lab is created before the row; if
    /// the insert fails, the lab is destroyed again.
    pub async fn create_session(
        &self,
        user_id: i64,
        lab_id: i64,
        provider_id: Option<i64>,
        options: &Value,
    ) -> SessionResult<LabSession> {
        let user = self
            .storage
            .get_user(user_id)
            .await?
            .ok_or(SessionError::UserNotFound { user_id })?;

        let template = self
            .storage
            .get_template(lab_id)
            .await?
            .ok_or(SessionError::TemplateNotFound { lab_id })?;
        if !template.is_active {
            return Err(SessionError::TemplateInactive { lab_id });
        }

        if !self.lms.can_access(&user, &template).await? {
            return Err(SessionError::AccessDenied { user_id, lab_id });
        }

        if let Some(existing) = self.storage.find_live_session(user_id, lab_id).await? {
            debug!(session_id = %existing.id, "Live session already exists");
            return Err(SessionError::ActiveSessionExists { user_id, lab_id });
        }

        let handle = self.resolve_provider(provider_id, &template).await?;
        let steps = decode_steps(&template)?;
        let max_score: f64 = steps.iter().map(|s| s.max_score).sum();

        let mut saga = ProvisionSaga::new(handle.adapter.clone());
        let provisioned = saga.provision(&user, &template, options).await?;

        let expires_at = Utc::now() + Duration::hours(self.config.timeout_hours);
        let session = LabSession::new(
            user_id,
            lab_id,
            handle.adapter.provider_type(),
            provisioned.session_id.clone(),
            expires_at,
        )
        .with_provider(handle.record.id)
        .with_steps(steps.len() as i64, max_score)
        .with_session_data(json!({
            "access_url": provisioned.access_url,
            "provider_data": provisioned.data,
            "options": options,
        }));

        if let Err(e) = self.storage.create_session(&session).await {
            saga.compensate().await;
            return Err(match e {
                StorageError::Conflict { .. } => {
                    SessionError::ActiveSessionExists { user_id, lab_id }
                }
                other => other.into(),
            });
        }
        saga.persisted();

        if let Err(e) = self.storage.increment_template_usage(lab_id).await {
            warn!(lab_id, error = %e, "Failed to bump template usage");
        }
        self.record_event(
            AnalyticsEvent::for_session("session_created", &session).with_data(json!({
                "provider_id": handle.record.id,
                "provider_type": session.provider_type,
            })),
        )
        .await;

        info!(
            session_id = %session.id,
            user_id,
            lab_id,
            provider_id = handle.record.id,
            total_steps = session.total_steps,
            "Lab session created"
        );
        Ok(session)
    }

    /// Load a session.
    pub async fn get_session(&self, session_id: &str) -> SessionResult<LabSession> {
        self.storage
            .get_session(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Move a live session to `step`.
    pub async fn update_session_step(&self, session_id: &str, step: i64) -> SessionResult<LabSession> {
        let mut session = self.live_session(session_id).await?;
        check_step(step, session.total_steps)?;

        session.current_step = step;
        if session.status.can_transition_to(SessionStatus::InProgress) {
            session.status = SessionStatus::InProgress;
        }
        session.updated_at = Utc::now();
        self.write_live(&session).await?;

        debug!(session_id = %session_id, step, "Session step updated");
        Ok(session)
    }

    /// Judge one step attempt.
    ///
    /// Every attempt is recorded and the session score is the sum over all
    /// recorded attempts, so repeated attempts on a step add up.
    pub async fn validate_step(
        &self,
        session_id: &str,
        step: i64,
        data: &Value,
    ) -> SessionResult<StepOutcome> {
        let mut session = self.live_session(session_id).await?;
        check_step(step, session.total_steps)?;

        let template = self
            .storage
            .get_template(session.lab_id)
            .await?
            .ok_or(SessionError::TemplateNotFound {
                lab_id: session.lab_id,
            })?;
        let steps = decode_steps(&template)?;
        let step_config = usize::try_from(step - 1)
            .ok()
            .and_then(|i| steps.get(i))
            .ok_or(SessionError::StepOutOfRange {
                step,
                total_steps: steps.len() as i64,
            })?;

        let handle = self.session_provider(&session).await?;
        let validation = handle
            .adapter
            .validate_step(&session.provider_session_id, step_config, data)
            .await?;

        let mut record =
            ValidationRecord::new(session_id, step, step_config.validation_type(), data.clone())
                .with_outcome(validation.passed, validation.score, step_config.max_score);
        record.expected_result = step_config.expected_result();
        record.actual_result = validation.actual_result.clone();
        record.feedback = Some(validation.feedback.clone());
        record.validation_time_ms = validation.validation_time_ms;
        self.storage.create_validation(&record).await?;

        session.score = self.storage.sum_validation_scores(session_id).await?;
        let finishes = validation.passed && step == session.current_step && step >= session.total_steps;
        if validation.passed && step == session.current_step && !finishes {
            session.current_step += 1;
            if session.status.can_transition_to(SessionStatus::InProgress) {
                session.status = SessionStatus::InProgress;
            }
        }
        session.updated_at = Utc::now();
        self.write_live(&session).await?;

        self.record_event(
            AnalyticsEvent::for_session("step_validated", &session).with_data(json!({
                "step": step,
                "passed": validation.passed,
                "score": validation.score,
            })),
        )
        .await;

        info!(
            session_id = %session_id,
            step,
            passed = validation.passed,
            score = validation.score,
            session_score = session.score,
            "Step validated"
        );

        if finishes {
            session = self.complete_session(session_id).await?;
        }

        Ok(StepOutcome {
            validation,
            session,
            completed: finishes,
        })
    }

    /// Mark a live or paused session completed. Completing a completed session is a no-op.
    ///
    /// The provider lab is destroyed and, when the score reaches the
    /// completion threshold, the linked lesson is marked complete.
    pub async fn complete_session(&self, session_id: &str) -> SessionResult<LabSession> {
        let now = Utc::now();
        let mut from = SessionStatus::LIVE.to_vec();
        from.push(SessionStatus::Paused);
        let moved = self
            .storage
            .transition_session(session_id, &from, SessionStatus::Completed, Some(now))
            .await?;

        let session = self.get_session(session_id).await?;
        if !moved {
            if session.status == SessionStatus::Completed {
                debug!(session_id = %session_id, "Session already completed");
                return Ok(session);
            }
            return Err(invalid_transition(&session, SessionStatus::Completed));
        }

        self.destroy_provider_session(&session).await;

        match self.storage.get_template(session.lab_id).await {
            Ok(Some(template)) => {
                if let Err(e) = self
                    .lms
                    .complete_lesson(&session, &template, self.config.completion_threshold)
                    .await
                {
                    warn!(session_id = %session_id, error = %e, "Failed to record lesson completion");
                }
            }
            Ok(None) => warn!(session_id = %session_id, lab_id = session.lab_id, "Template gone, skipping lesson completion"),
            Err(e) => warn!(session_id = %session_id, error = %e, "Failed to load template for lesson completion"),
        }

        self.record_event(
            AnalyticsEvent::for_session("session_completed", &session).with_data(json!({
                "score": session.score,
                "max_score": session.max_score,
                "percent": session.score_percent(),
            })),
        )
        .await;

        info!(
            session_id = %session_id,
            score = session.score,
            max_score = session.max_score,
            "Lab session completed"
        );
        Ok(session)
    }

    /// End a live or paused session early; it becomes `expired`.
    pub async fn end_session(&self, session_id: &str) -> SessionResult<LabSession> {
        let mut from = SessionStatus::LIVE.to_vec();
        from.push(SessionStatus::Paused);
        self.expire(session_id, &from).await
    }

    /// Pause a live session.
    pub async fn pause_session(&self, session_id: &str) -> SessionResult<LabSession> {
        let moved = self
            .storage
            .transition_session(session_id, &SessionStatus::LIVE, SessionStatus::Paused, None)
            .await?;

        let session = self.get_session(session_id).await?;
        if !moved {
            return Err(invalid_transition(&session, SessionStatus::Paused));
        }

        self.record_event(AnalyticsEvent::for_session("session_paused", &session))
            .await;
        info!(session_id = %session_id, "Lab session paused");
        Ok(session)
    }

    /// Resume a paused session, or end it if its deadline has passed.
    pub async fn resume_session(&self, session_id: &str) -> SessionResult<LabSession> {
        let session = self.get_session(session_id).await?;
        if session.status != SessionStatus::Paused {
            return Err(invalid_transition(&session, SessionStatus::Active));
        }

        if session.is_expired_at(Utc::now()) {
            info!(session_id = %session_id, "Paused session past its deadline, ending");
            return self.end_session(session_id).await;
        }

        let moved = self
            .storage
            .transition_session(session_id, &[SessionStatus::Paused], SessionStatus::Active, None)
            .await
            .map_err(|e| match e {
                StorageError::Conflict { .. } => SessionError::ActiveSessionExists {
                    user_id: session.user_id,
                    lab_id: session.lab_id,
                },
                other => other.into(),
            })?;

        let resumed = self.get_session(session_id).await?;
        if !moved {
            return Err(invalid_transition(&resumed, SessionStatus::Active));
        }

        self.record_event(AnalyticsEvent::for_session("session_resumed", &resumed))
            .await;
        info!(session_id = %session_id, "Lab session resumed");
        Ok(resumed)
    }

    /// Push a live session's deadline out by `hours`.
    pub async fn extend_session(&self, session_id: &str, hours: i64) -> SessionResult<LabSession> {
        if hours <= 0 {
            return Err(SessionError::InvalidInput {
                field: "hours".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let mut session = self.live_session(session_id).await?;
        let now = Utc::now();
        session.expires_at = session.expires_at.max(now) + Duration::hours(hours);
        session.updated_at = now;
        self.write_live(&session).await?;

        info!(session_id = %session_id, hours, expires_at = %session.expires_at, "Lab session extended");
        Ok(session)
    }

    /// Expire every live session past its deadline, one at a time.
    ///
    /// Provider labs are destroyed best-effort; failures are counted, not returned.
    pub async fn cleanup_expired_sessions(&self) -> SessionResult<CleanupReport> {
        let expired = self.storage.list_expired_sessions(Utc::now()).await?;
        let mut report = CleanupReport::default();

        for session in expired {
            let moved = self
                .storage
                .transition_session(&session.id, &SessionStatus::LIVE, SessionStatus::Expired, None)
                .await?;
            if !moved {
                continue;
            }
            report.expired += 1;

            if self.destroy_provider_session(&session).await {
                report.destroyed += 1;
            } else {
                report.destroy_failures += 1;
            }
        }

        if report.expired > 0 {
            info!(
                expired = report.expired,
                destroyed = report.destroyed,
                "Expired sessions cleaned up"
            );
        }
        Ok(report)
    }

    /// All validation attempts of a session, oldest first.
    pub async fn session_validations(&self, session_id: &str) -> SessionResult<Vec<ValidationRecord>> {
        self.get_session(session_id).await?;
        Ok(self.storage.get_session_validations(session_id).await?)
    }

    /// Number of sessions per status.
    pub async fn status_counts(&self) -> SessionResult<Vec<StatusCount>> {
        Ok(self.storage.count_sessions_by_status().await?)
    }

    async fn expire(&self, session_id: &str, from: &[SessionStatus]) -> SessionResult<LabSession> {
        let moved = self
            .storage
            .transition_session(session_id, from, SessionStatus::Expired, None)
            .await?;

        let session = self.get_session(session_id).await?;
        if !moved {
            return Err(invalid_transition(&session, SessionStatus::Expired));
        }

        self.destroy_provider_session(&session).await;
        self.record_event(AnalyticsEvent::for_session("session_ended", &session))
            .await;
        info!(session_id = %session_id, "Lab session ended");
        Ok(session)
    }

    async fn live_session(&self, session_id: &str) -> SessionResult<LabSession> {
        let session = self.get_session(session_id).await?;
        if !session.status.is_live() {
            return Err(SessionError::NotActive {
                session_id: session_id.to_string(),
                status: session.status.to_string(),
            });
        }
        Ok(session)
    }

    /// Persist progress unless the session left the live states meanwhile.
    async fn write_live(&self, session: &LabSession) -> SessionResult<()> {
        if self.storage.update_live_session(session).await? {
            return Ok(());
        }
        let current = self.get_session(&session.id).await?;
        Err(SessionError::NotActive {
            session_id: session.id.clone(),
            status: current.status.to_string(),
        })
    }

    /// Explicit provider, else the template's provider type, else the default.
    async fn resolve_provider(
        &self,
        provider_id: Option<i64>,
        template: &LabTemplate,
    ) -> SessionResult<ProviderHandle> {
        let handle = match (provider_id, template.provider_type.as_deref()) {
            (Some(id), _) => self.providers.get(id).await?,
            (None, Some(provider_type)) if !provider_type.is_empty() => {
                self.providers.get_by_type(provider_type).await?
            }
            _ => self.providers.get_default().await?,
        };
        Ok(handle)
    }

    async fn session_provider(&self, session: &LabSession) -> SessionResult<ProviderHandle> {
        let handle = match session.provider_id {
            Some(id) => self.providers.get(id).await?,
            None => self.providers.get_by_type(&session.provider_type).await?,
        };
        Ok(handle)
    }

    /// Returns whether the provider lab is gone.
    async fn destroy_provider_session(&self, session: &LabSession) -> bool {
        let handle = match self.session_provider(session).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "No provider to destroy lab on");
                return false;
            }
        };

        match handle
            .adapter
            .destroy_session(&session.provider_session_id)
            .await
        {
            Ok(destroyed) => {
                debug!(session_id = %session.id, destroyed, "Provider lab destroyed");
                true
            }
            Err(e) => {
                warn!(
                    session_id = %session.id,
                    provider_session_id = %session.provider_session_id,
                    error = %e,
                    "Failed to destroy provider lab"
                );
                false
            }
        }
    }

    async fn record_event(&self, event: AnalyticsEvent) {
        if let Err(e) = self.storage.record_event(&event).await {
            warn!(event_type = %event.event_type, error = %e, "Failed to record analytics event");
        }
    }
}

fn decode_steps(template: &LabTemplate) -> SessionResult<Vec<GuidedStep>> {
    template
        .steps()
        .map_err(|e| SessionError::InvalidTemplateJson {
            lab_id: template.id,
            message: e.to_string(),
        })
}

fn check_step(step: i64, total_steps: i64) -> SessionResult<()> {
    if step < 1 || step > total_steps {
        return Err(SessionError::StepOutOfRange { step, total_steps });
    }
    Ok(())
}

fn invalid_transition(session: &LabSession, to: SessionStatus) -> SessionError {
    SessionError::InvalidTransition {
        session_id: session.id.clone(),
        from: session.status.to_string(),
        to: to.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_step_bounds() {
        assert!(check_step(1, 3).is_ok());
        assert!(check_step(3, 3).is_ok());
        assert!(matches!(
            check_step(0, 3),
            Err(SessionError::StepOutOfRange { step: 0, total_steps: 3 })
        ));
        assert!(check_step(4, 3).is_err());
        assert!(check_step(1, 0).is_err());
    }

    #[test]
    fn test_decode_steps_reports_lab() {
        let mut template = LabTemplate::new("Broken", "broken").with_raw_steps("[{");
        template.id = 9;
        assert!(matches!(
            decode_steps(&template),
            Err(SessionError::InvalidTemplateJson { lab_id: 9, .. })
        ));
    }

    #[test]
    fn test_cleanup_report_default() {
        assert_eq!(CleanupReport::default().expired, 0);
    }
}
