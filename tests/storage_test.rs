//! Integration tests for SQLite storage layer
//!
//! Tests database operations using an in-memory SQLite database.

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;

use labtutor::config::DatabaseConfig;
use labtutor::error::StorageError;
use labtutor::storage::{
    AiInteraction, AnalyticsEvent, GuidedStep, HealthStatus, InteractionType, LabSession,
    LabTemplate, LessonCompletion, NewProvider, ProviderUpdate, SessionStatus, SqliteStorage,
    Storage, User, ValidationRecord,
};

/// Create an in-memory storage instance for testing
async fn create_test_storage() -> SqliteStorage {
    SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage")
}

/// User, template and provider rows every session needs.
async fn seed(storage: &SqliteStorage) -> (i64, i64, i64) {
    let user_id = storage.create_user(&User::new("ada", "Ada")).await.unwrap();
    let lab_id = storage
        .create_template(
            &LabTemplate::new("OSPF Basics", "ospf-basics")
                .with_steps(&[GuidedStep::new("Enable OSPF"), GuidedStep::new("Verify")]),
        )
        .await
        .unwrap();
    let provider_id = storage
        .insert_provider(&NewProvider::new("gns3-main", "gns3", json!({"base_url": "http://gns3"})))
        .await
        .unwrap();
    (user_id, lab_id, provider_id)
}

fn live_session(user_id: i64, lab_id: i64, provider_id: i64) -> LabSession {
    LabSession::new(user_id, lab_id, "gns3", "project-1", Utc::now() + Duration::hours(4))
        .with_provider(provider_id)
        .with_steps(2, 20.0)
}

#[cfg(test)]
mod file_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("nested").join("labs.db"),
            max_connections: 2,
        };

        {
            let storage = SqliteStorage::new(&config).await.unwrap();
            storage.set_setting("ai.active_provider", "openrouter").await.unwrap();
        }

        let reopened = SqliteStorage::new(&config).await.unwrap();
        let value = reopened.get_setting("ai.active_provider").await.unwrap();
        assert_eq!(value.as_deref(), Some("openrouter"));
    }
}

#[cfg(test)]
mod user_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_user_round_trip_and_enrollment() {
        let storage = create_test_storage().await;
        let id = storage
            .create_user(&User::new("grace", "Grace").with_email("g@example.com").as_manager())
            .await
            .unwrap();

        let user = storage.get_user(id).await.unwrap().unwrap();
        assert_eq!(user.login, "grace");
        assert_eq!(user.email.as_deref(), Some("g@example.com"));
        assert!(user.can_manage_labs);
        assert!(storage.get_user(id + 1).await.unwrap().is_none());

        assert!(!storage.is_enrolled(id, 5).await.unwrap());
        storage.enroll_user(id, 5).await.unwrap();
        storage.enroll_user(id, 5).await.unwrap();
        assert!(storage.is_enrolled(id, 5).await.unwrap());
    }

    #[tokio::test]
    async fn test_lesson_completion_recorded_once() {
        let storage = create_test_storage().await;
        let user_id = storage.create_user(&User::new("ada", "Ada")).await.unwrap();
        let completion = LessonCompletion {
            user_id,
            course_id: Some(1),
            lesson_id: 10,
            session_id: "s-1".to_string(),
            score_percent: 90.0,
            completed_at: Utc::now(),
        };

        assert!(storage.mark_lesson_complete(&completion).await.unwrap());
        assert!(!storage.mark_lesson_complete(&completion).await.unwrap());

        let stored = storage.get_lesson_completion(user_id, 10).await.unwrap().unwrap();
        assert_eq!(stored.session_id, "s-1");
        assert_eq!(stored.score_percent, 90.0);
    }
}

#[cfg(test)]
mod template_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_template_round_trip() {
        let storage = create_test_storage().await;
        let id = storage
            .create_template(
                &LabTemplate::new("VLANs", "vlans")
                    .with_description("Trunking and access ports")
                    .with_provider_type("gns3")
                    .with_lesson(2, 20)
                    .with_steps(&[GuidedStep::new("Create VLAN 10").with_max_score(15.0)]),
            )
            .await
            .unwrap();

        let template = storage.get_template(id).await.unwrap().unwrap();
        assert_eq!(template.slug, "vlans");
        assert_eq!(template.provider_type.as_deref(), Some("gns3"));
        assert_eq!(template.lesson_id, Some(20));
        let steps = template.steps().unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].max_score, 15.0);

        let by_slug = storage.get_template_by_slug("vlans").await.unwrap().unwrap();
        assert_eq!(by_slug.id, id);
    }

    #[tokio::test]
    async fn test_duplicate_slug_conflicts() {
        let storage = create_test_storage().await;
        storage.create_template(&LabTemplate::new("A", "same")).await.unwrap();

        let err = storage
            .create_template(&LabTemplate::new("B", "same"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_list_templates_and_usage() {
        let storage = create_test_storage().await;
        let active = storage.create_template(&LabTemplate::new("A", "a")).await.unwrap();
        storage
            .create_template(&LabTemplate::new("B", "b").as_inactive())
            .await
            .unwrap();

        assert_eq!(storage.list_templates(true).await.unwrap().len(), 1);
        assert_eq!(storage.list_templates(false).await.unwrap().len(), 2);

        storage.increment_template_usage(active).await.unwrap();
        storage.increment_template_usage(active).await.unwrap();
        let template = storage.get_template(active).await.unwrap().unwrap();
        assert_eq!(template.usage_count, 2);
    }
}

#[cfg(test)]
mod provider_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_one_default_per_type() {
        let storage = create_test_storage().await;
        let first = storage
            .insert_provider(&NewProvider::new("g1", "gns3", json!({})).as_default())
            .await
            .unwrap();
        let second = storage
            .insert_provider(&NewProvider::new("g2", "gns3", json!({})).as_default())
            .await
            .unwrap();
        let guac = storage
            .insert_provider(&NewProvider::new("guac", "guacamole", json!({})).as_default())
            .await
            .unwrap();

        assert!(!storage.get_provider(first).await.unwrap().unwrap().is_default);
        assert!(storage.get_provider(second).await.unwrap().unwrap().is_default);
        assert!(storage.get_provider(guac).await.unwrap().unwrap().is_default);

        assert!(storage.set_default_provider(first).await.unwrap());
        assert!(storage.get_provider(first).await.unwrap().unwrap().is_default);
        assert!(!storage.get_provider(second).await.unwrap().unwrap().is_default);
        assert!(storage.get_provider(guac).await.unwrap().unwrap().is_default);

        assert!(!storage.set_default_provider(999).await.unwrap());
    }

    #[tokio::test]
    async fn test_default_and_type_lookup_skip_inactive() {
        let storage = create_test_storage().await;
        storage
            .insert_provider(&NewProvider::new("off", "gns3", json!({})).as_default().as_inactive())
            .await
            .unwrap();
        assert!(storage.get_default_provider().await.unwrap().is_none());
        assert!(storage.get_provider_by_type("gns3").await.unwrap().is_none());

        let on = storage
            .insert_provider(&NewProvider::new("on", "gns3", json!({})))
            .await
            .unwrap();
        assert_eq!(storage.get_default_provider().await.unwrap().unwrap().id, on);
        assert_eq!(storage.get_provider_by_type("gns3").await.unwrap().unwrap().id, on);
        assert_eq!(storage.list_providers(true).await.unwrap().len(), 1);
        assert_eq!(storage.list_providers(false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_partial_update() {
        let storage = create_test_storage().await;
        let id = storage
            .insert_provider(&NewProvider::new("g", "gns3", json!({"base_url": "http://a"})))
            .await
            .unwrap();

        let update = ProviderUpdate {
            display_name: Some("Lab Server".to_string()),
            is_default: Some(true),
            ..Default::default()
        };
        assert!(storage.update_provider(id, &update).await.unwrap());

        let record = storage.get_provider(id).await.unwrap().unwrap();
        assert_eq!(record.display_name, "Lab Server");
        assert_eq!(record.config, json!({"base_url": "http://a"}));
        assert!(record.is_active);
        assert!(record.is_default);

        assert!(!storage.update_provider(999, &update).await.unwrap());
    }

    #[tokio::test]
    async fn test_health_and_delete() {
        let storage = create_test_storage().await;
        let (user_id, lab_id, provider_id) = seed(&storage).await;

        storage
            .update_provider_health(provider_id, HealthStatus::Unhealthy, Some("refused"), Utc::now())
            .await
            .unwrap();
        let record = storage.get_provider(provider_id).await.unwrap().unwrap();
        assert_eq!(record.health_status, HealthStatus::Unhealthy);
        assert_eq!(record.health_message.as_deref(), Some("refused"));
        assert!(record.last_health_check.is_some());

        let session = live_session(user_id, lab_id, provider_id);
        storage.create_session(&session).await.unwrap();
        assert_eq!(storage.count_open_sessions_for_provider(provider_id).await.unwrap(), 1);

        storage
            .transition_session(&session.id, &SessionStatus::LIVE, SessionStatus::Paused, None)
            .await
            .unwrap();
        assert_eq!(storage.count_open_sessions_for_provider(provider_id).await.unwrap(), 1);

        storage
            .transition_session(&session.id, &[SessionStatus::Paused], SessionStatus::Expired, None)
            .await
            .unwrap();
        assert_eq!(storage.count_open_sessions_for_provider(provider_id).await.unwrap(), 0);

        assert!(storage.delete_provider(provider_id).await.unwrap());
        assert!(!storage.delete_provider(provider_id).await.unwrap());
    }
}

#[cfg(test)]
mod session_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_session_round_trip() {
        let storage = create_test_storage().await;
        let (user_id, lab_id, provider_id) = seed(&storage).await;

        let session = live_session(user_id, lab_id, provider_id)
            .with_session_data(json!({"access_url": "http://gns3/ui"}));
        storage.create_session(&session).await.unwrap();

        let stored = storage.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
        assert_eq!(stored.provider_id, Some(provider_id));
        assert_eq!(stored.total_steps, 2);
        assert_eq!(stored.max_score, 20.0);
        assert_eq!(stored.session_data["access_url"], "http://gns3/ui");
        assert!(stored.completed_at.is_none());

        assert!(storage.get_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_one_live_session_per_user_and_lab() {
        let storage = create_test_storage().await;
        let (user_id, lab_id, provider_id) = seed(&storage).await;

        storage
            .create_session(&live_session(user_id, lab_id, provider_id))
            .await
            .unwrap();
        let err = storage
            .create_session(&live_session(user_id, lab_id, provider_id))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));

        // Terminal rows do not count.
        let done = live_session(user_id, lab_id, provider_id).with_status(SessionStatus::Completed);
        storage.create_session(&done).await.unwrap();
    }

    #[tokio::test]
    async fn test_find_live_session() {
        let storage = create_test_storage().await;
        let (user_id, lab_id, provider_id) = seed(&storage).await;
        assert!(storage.find_live_session(user_id, lab_id).await.unwrap().is_none());

        let session = live_session(user_id, lab_id, provider_id);
        storage.create_session(&session).await.unwrap();
        let found = storage.find_live_session(user_id, lab_id).await.unwrap().unwrap();
        assert_eq!(found.id, session.id);
    }

    #[tokio::test]
    async fn test_transition_is_conditional() {
        let storage = create_test_storage().await;
        let (user_id, lab_id, provider_id) = seed(&storage).await;
        let session = live_session(user_id, lab_id, provider_id);
        storage.create_session(&session).await.unwrap();

        let now = Utc::now();
        assert!(storage
            .transition_session(&session.id, &SessionStatus::LIVE, SessionStatus::Completed, Some(now))
            .await
            .unwrap());
        assert!(!storage
            .transition_session(&session.id, &SessionStatus::LIVE, SessionStatus::Expired, None)
            .await
            .unwrap());
        assert!(!storage
            .transition_session(&session.id, &[], SessionStatus::Expired, None)
            .await
            .unwrap());

        let stored = storage.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_resume_into_occupied_slot_conflicts() {
        let storage = create_test_storage().await;
        let (user_id, lab_id, provider_id) = seed(&storage).await;

        let paused = live_session(user_id, lab_id, provider_id).with_status(SessionStatus::Paused);
        storage.create_session(&paused).await.unwrap();
        storage
            .create_session(&live_session(user_id, lab_id, provider_id))
            .await
            .unwrap();

        let err = storage
            .transition_session(&paused.id, &[SessionStatus::Paused], SessionStatus::Active, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_list_expired_only_live_past_deadline() {
        let storage = create_test_storage().await;
        let (user_id, lab_id, provider_id) = seed(&storage).await;
        let other_lab = storage
            .create_template(&LabTemplate::new("BGP", "bgp"))
            .await
            .unwrap();
        let third_lab = storage
            .create_template(&LabTemplate::new("STP", "stp"))
            .await
            .unwrap();

        let mut overdue = live_session(user_id, lab_id, provider_id);
        overdue.expires_at = Utc::now() - Duration::minutes(1);
        storage.create_session(&overdue).await.unwrap();

        storage
            .create_session(&live_session(user_id, other_lab, provider_id))
            .await
            .unwrap();

        let mut paused = live_session(user_id, third_lab, provider_id).with_status(SessionStatus::Paused);
        paused.expires_at = Utc::now() - Duration::minutes(1);
        storage.create_session(&paused).await.unwrap();

        let expired = storage.list_expired_sessions(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, overdue.id);
    }

    #[tokio::test]
    async fn test_update_session_and_counts() {
        let storage = create_test_storage().await;
        let (user_id, lab_id, provider_id) = seed(&storage).await;

        let mut session = live_session(user_id, lab_id, provider_id);
        storage.create_session(&session).await.unwrap();
        session.current_step = 2;
        session.status = SessionStatus::InProgress;
        session.score = 7.5;
        storage.update_session(&session).await.unwrap();

        let stored = storage.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.current_step, 2);
        assert_eq!(stored.status, SessionStatus::InProgress);
        assert_eq!(stored.score, 7.5);

        let counts = storage.count_sessions_by_status().await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].status, "in_progress");
        assert_eq!(counts[0].count, 1);
    }

    #[tokio::test]
    async fn test_update_live_session_skips_non_live_rows() {
        let storage = create_test_storage().await;
        let (user_id, lab_id, provider_id) = seed(&storage).await;

        let mut session = live_session(user_id, lab_id, provider_id);
        storage.create_session(&session).await.unwrap();
        session.current_step = 2;
        session.score = 4.0;
        assert!(storage.update_live_session(&session).await.unwrap());

        storage
            .transition_session(&session.id, &SessionStatus::LIVE, SessionStatus::Expired, None)
            .await
            .unwrap();
        session.current_step = 3;
        session.status = SessionStatus::InProgress;
        assert!(!storage.update_live_session(&session).await.unwrap());

        let stored = storage.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Expired);
        assert_eq!(stored.current_step, 2);
        assert_eq!(stored.score, 4.0);
    }

    #[tokio::test]
    async fn test_load_session_context() {
        let storage = create_test_storage().await;
        let (user_id, lab_id, provider_id) = seed(&storage).await;
        let session = live_session(user_id, lab_id, provider_id);
        storage.create_session(&session).await.unwrap();

        let context = storage.load_session_context(&session.id).await.unwrap().unwrap();
        assert_eq!(context.session.id, session.id);
        assert_eq!(context.user_display_name.as_deref(), Some("Ada"));
        assert_eq!(context.template.unwrap().name, "OSPF Basics");

        assert!(storage.load_session_context("missing").await.unwrap().is_none());
    }
}

#[cfg(test)]
mod validation_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_validations_sum_every_attempt() {
        let storage = create_test_storage().await;
        let (user_id, lab_id, provider_id) = seed(&storage).await;
        let session = live_session(user_id, lab_id, provider_id);
        storage.create_session(&session).await.unwrap();

        assert_eq!(storage.sum_validation_scores(&session.id).await.unwrap(), 0.0);

        for (step, passed, score) in [(1, true, 10.0), (2, false, 0.0), (2, true, 8.0)] {
            let record = ValidationRecord::new(&session.id, step, "manual", json!({}))
                .with_outcome(passed, score, 10.0);
            storage.create_validation(&record).await.unwrap();
        }

        assert_eq!(storage.sum_validation_scores(&session.id).await.unwrap(), 18.0);
        let records = storage.get_session_validations(&session.id).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].step, 1);
        assert!(!records[1].passed);
    }
}

#[cfg(test)]
mod audit_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_ai_interactions() {
        let storage = create_test_storage().await;
        let (user_id, lab_id, provider_id) = seed(&storage).await;
        let session = live_session(user_id, lab_id, provider_id);
        storage.create_session(&session).await.unwrap();

        let mut interaction =
            AiInteraction::new(&session.id, user_id, "openrouter", InteractionType::Hints);
        interaction.tokens_used = 120;
        interaction.cost_usd = 0.0004;
        interaction.response_data = json!({"content": "Check the area id"});
        storage.log_ai_interaction(&interaction).await.unwrap();

        let rows = storage.get_session_interactions(&session.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].interaction_type, "hints");
        assert_eq!(rows[0].tokens_used, 120);
        assert_eq!(rows[0].response_data["content"], "Check the area id");
    }

    #[tokio::test]
    async fn test_events_filtered_by_type() {
        let storage = create_test_storage().await;
        let (user_id, lab_id, provider_id) = seed(&storage).await;
        let session = live_session(user_id, lab_id, provider_id);

        storage
            .record_event(&AnalyticsEvent::for_session("session_created", &session))
            .await
            .unwrap();
        storage
            .record_event(
                &AnalyticsEvent::for_session("step_validated", &session)
                    .with_data(json!({"step": 1})),
            )
            .await
            .unwrap();

        let events = storage.get_events("step_validated").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_data["step"], 1);
        assert_eq!(events[0].session_id.as_deref(), Some(session.id.as_str()));
    }

    #[tokio::test]
    async fn test_settings_upsert() {
        let storage = create_test_storage().await;
        assert!(storage.get_setting("k").await.unwrap().is_none());

        storage.set_setting("k", "one").await.unwrap();
        storage.set_setting("k", "two").await.unwrap();
        assert_eq!(storage.get_setting("k").await.unwrap().as_deref(), Some("two"));
    }
}
