//! Shared fixtures for integration tests.
//!
//! `ScriptedProvider` stands in for a real lab backend: it counts calls,
//! hands out queued step results, and can be told to fail or to let a
//! competing session win the insert race.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use labtutor::config::{RequestConfig, SessionConfig};
use labtutor::error::{ProviderError, ProviderResult};
use labtutor::provider::{
    ConfigField, ConnectionTest, LabProvider, ProviderFactory, ProviderSession, StepValidation,
};
use labtutor::session::SessionManager;
use labtutor::storage::{
    GuidedStep, LabSession, LabTemplate, NewProvider, SessionStatus, SqliteStorage, Storage, User,
};

/// Registered type of the scripted adapter.
pub const SCRIPTED: &str = "scripted";

/// In-process lab backend driven by the test.
#[derive(Default)]
pub struct ScriptedProvider {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub validated: AtomicUsize,
    results: Mutex<VecDeque<ProviderResult<StepValidation>>>,
    fail_create: Mutex<Option<String>>,
    fail_destroy: Mutex<bool>,
    competitor: Mutex<Option<(SqliteStorage, LabSession)>>,
    interrupt: Mutex<Option<(SqliteStorage, String, SessionStatus)>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the outcome of the next `validate_step`.
    pub fn push_result(&self, passed: bool, score: f64) {
        self.results.lock().unwrap().push_back(Ok(StepValidation {
            passed,
            score,
            feedback: if passed { "ok" } else { "not yet" }.to_string(),
            actual_result: Some(json!({ "score": score })),
            validation_time_ms: 3,
        }));
    }

    /// Queue an adapter failure for the next `validate_step`.
    pub fn push_error(&self, status: u16) {
        self.results.lock().unwrap().push_back(Err(ProviderError::Api {
            status,
            message: "backend unavailable".to_string(),
        }));
    }

    pub fn fail_create(&self, message: &str) {
        *self.fail_create.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_destroy(&self) {
        *self.fail_destroy.lock().unwrap() = true;
    }

    /// Insert `session` while the next lab is being provisioned.
    pub fn race_with(&self, storage: SqliteStorage, session: LabSession) {
        *self.competitor.lock().unwrap() = Some((storage, session));
    }

    /// Move session `session_id` to `to` while the next step is being judged.
    pub fn interrupt_with(&self, storage: SqliteStorage, session_id: &str, to: SessionStatus) {
        *self.interrupt.lock().unwrap() = Some((storage, session_id.to_string(), to));
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn validated(&self) -> usize {
        self.validated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LabProvider for ScriptedProvider {
    fn provider_type(&self) -> &'static str {
        SCRIPTED
    }

    async fn create_session(
        &self,
        user: &User,
        template: &LabTemplate,
        _options: &Value,
    ) -> ProviderResult<ProviderSession> {
        if let Some(message) = self.fail_create.lock().unwrap().clone() {
            return Err(ProviderError::Api {
                status: 503,
                message,
            });
        }

        let competitor = self.competitor.lock().unwrap().take();
        if let Some((storage, session)) = competitor {
            storage.create_session(&session).await.unwrap();
        }

        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ProviderSession {
            session_id: format!("lab-{}-{}-{}", template.slug, user.id, n),
            access_url: Some(format!("https://labs.test/{}", n)),
            data: json!({ "n": n }),
        })
    }

    async fn destroy_session(&self, _session_id: &str) -> ProviderResult<bool> {
        if *self.fail_destroy.lock().unwrap() {
            return Err(ProviderError::Api {
                status: 500,
                message: "destroy failed".to_string(),
            });
        }
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn validate_step(
        &self,
        _session_id: &str,
        step: &GuidedStep,
        _data: &Value,
    ) -> ProviderResult<StepValidation> {
        self.validated.fetch_add(1, Ordering::SeqCst);

        let interrupt = self.interrupt.lock().unwrap().take();
        if let Some((storage, id, to)) = interrupt {
            let mut from = SessionStatus::LIVE.to_vec();
            from.push(SessionStatus::Paused);
            assert!(storage.transition_session(&id, &from, to, None).await.unwrap());
        }

        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(StepValidation {
                    passed: true,
                    score: step.max_score,
                    feedback: "ok".to_string(),
                    actual_result: None,
                    validation_time_ms: 1,
                })
            })
    }

    async fn test_connection(&self) -> ConnectionTest {
        ConnectionTest::ok("scripted backend ready")
    }

    fn config_fields(&self) -> Vec<ConfigField> {
        Vec::new()
    }
}

/// Everything a lifecycle test needs.
pub struct Fixture {
    pub storage: SqliteStorage,
    pub providers: Arc<ProviderFactory>,
    pub manager: SessionManager,
    pub backend: Arc<ScriptedProvider>,
    pub provider_id: i64,
    pub user_id: i64,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(SessionConfig::default()).await
    }

    pub async fn with_config(config: SessionConfig) -> Self {
        let storage = SqliteStorage::new_in_memory()
            .await
            .expect("Failed to create in-memory storage");
        let providers = Arc::new(ProviderFactory::new(storage.clone(), RequestConfig::default()));

        let backend = ScriptedProvider::new();
        let shared = backend.clone();
        providers.register(
            SCRIPTED,
            Arc::new(move |_: &Value, _: &RequestConfig| {
                Ok(shared.clone() as Arc<dyn LabProvider>)
            }),
        );

        let provider_id = providers
            .save(&NewProvider::new("scripted-main", SCRIPTED, json!({})).as_default())
            .await
            .expect("Failed to save provider");

        let user_id = storage
            .create_user(&User::new("ada", "Ada Lovelace"))
            .await
            .expect("Failed to create user");

        let manager = SessionManager::new(storage.clone(), providers.clone(), config);

        Self {
            storage,
            providers,
            manager,
            backend,
            provider_id,
            user_id,
        }
    }

    /// Active template with `scores.len()` steps of the given max scores.
    pub async fn template(&self, slug: &str, scores: &[f64]) -> i64 {
        let steps: Vec<GuidedStep> = scores
            .iter()
            .enumerate()
            .map(|(i, s)| GuidedStep::new(format!("Step {}", i + 1)).with_max_score(*s))
            .collect();
        self.storage
            .create_template(&LabTemplate::new(slug, slug).with_steps(&steps))
            .await
            .expect("Failed to create template")
    }

    pub async fn add_template(&self, template: LabTemplate) -> i64 {
        self.storage
            .create_template(&template)
            .await
            .expect("Failed to create template")
    }

    /// A live session row for `lab_id` that is already past its deadline.
    pub fn overdue_session(&self, lab_id: i64) -> LabSession {
        LabSession::new(
            self.user_id,
            lab_id,
            SCRIPTED,
            format!("overdue-{}", lab_id),
            Utc::now() - Duration::minutes(5),
        )
        .with_provider(self.provider_id)
        .with_steps(1, 10.0)
    }
}
