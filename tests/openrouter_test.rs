//! Integration tests for the OpenRouter adapter and the AI factory
//!
//! Tests HTTP client behavior using wiremock for request/response mocking.

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, body_string_contains, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use labtutor::ai::{AiFactory, AiProvider, OpenRouterProvider, TutorContext, TutorRequest};
use labtutor::config::{AiConfig, OpenRouterConfig, RequestConfig};
use labtutor::error::AiError;
use labtutor::storage::{
    GuidedStep, LabSession, LabTemplate, SqliteStorage, Storage, User,
};

/// Create a test client pointing to mock server
fn create_test_client(base_url: &str) -> OpenRouterProvider {
    let config = OpenRouterConfig {
        api_key: Some("test-api-key".to_string()),
        base_url: base_url.to_string(),
        model: "openai/gpt-4o-mini".to_string(),
        max_tokens: 500,
        temperature: 0.2,
    };

    OpenRouterProvider::new(&config, RequestConfig { timeout_ms: 5000 })
        .expect("Failed to create client")
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "gen-1",
        "model": "openai/gpt-4o-mini",
        "choices": [
            { "index": 0, "message": { "role": "assistant", "content": content } }
        ],
        "usage": {
            "prompt_tokens": 1000,
            "completion_tokens": 500,
            "total_tokens": 1500
        }
    })
}

fn tutor_context(request: TutorRequest) -> TutorContext {
    TutorContext {
        session_id: "s-1".to_string(),
        user_id: 1,
        user_name: "Ada".to_string(),
        lab_name: "OSPF Basics".to_string(),
        lab_description: "Single-area OSPF".to_string(),
        difficulty: "beginner".to_string(),
        provider_type: "gns3".to_string(),
        status: "active".to_string(),
        current_step: 2,
        total_steps: 3,
        step: Some(GuidedStep::new("Advertise networks")),
        score: 10.0,
        max_score: 30.0,
        request,
    }
}

#[cfg(test)]
mod completion_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_successful_completion() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-api-key"))
            .and(header("X-Title", "labtutor"))
            .and(body_partial_json(json!({
                "model": "openai/gpt-4o-mini",
                "max_tokens": 500
            })))
            .and(body_string_contains("Advertise networks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                "Use the network command under router ospf.",
            )))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let response = client
            .get_contextual_help(&tutor_context(TutorRequest::default()))
            .await
            .unwrap();

        assert_eq!(response.content, "Use the network command under router ospf.");
        assert_eq!(response.model, "openai/gpt-4o-mini");
        assert_eq!(response.usage.total_tokens, 1500);
        // 1000 * 0.15 / 1M + 500 * 0.60 / 1M
        assert!((response.cost_estimate - 0.00045).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_usage_summary_accumulates() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let ctx = tutor_context(TutorRequest::message("hi"));
        client.chat_response(&ctx).await.unwrap();
        client.generate_hints(&ctx).await.unwrap();

        let summary = client.usage_summary();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].requests, 2);
        assert_eq!(summary[0].prompt_tokens, 2000);
        assert!((summary[0].cost_usd - 0.0009).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_api_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "message": "No auth credentials found" }
            })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let err = client
            .explain_error(&tutor_context(TutorRequest::error("% Invalid input")))
            .await
            .unwrap_err();

        match err {
            AiError::Api { status, message } => {
                assert_eq!(status, 401);
                assert!(message.contains("No auth credentials"));
            }
            other => panic!("Expected Api error, got: {:?}", other),
        }
        assert!(client.usage_summary().is_empty());
    }

    #[tokio::test]
    async fn test_empty_choices_is_invalid() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let err = client
            .analyze_configuration(&tutor_context(TutorRequest::configuration(
                "interface g0/0",
                None,
            )))
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion("late"))
                    .set_delay(std::time::Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let config = OpenRouterConfig {
            api_key: Some("k".to_string()),
            base_url: mock_server.uri(),
            ..Default::default()
        };
        let client = OpenRouterProvider::new(&config, RequestConfig { timeout_ms: 50 }).unwrap();
        let err = client
            .chat_response(&tutor_context(TutorRequest::message("hi")))
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::Timeout { timeout_ms: 50 }));
    }

    #[tokio::test]
    async fn test_connection_counts_models() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "id": "a" }, { "id": "b" }]
            })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let result = client.test_connection().await;
        assert!(result.success);
        assert!(result.message.contains("2 models"));
    }
}

#[cfg(test)]
mod factory_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn seeded_session(storage: &SqliteStorage) -> String {
        let user_id = storage.create_user(&User::new("ada", "Ada")).await.unwrap();
        let lab_id = storage
            .create_template(
                &LabTemplate::new("OSPF Basics", "ospf-basics")
                    .with_steps(&[GuidedStep::new("Enable OSPF")]),
            )
            .await
            .unwrap();
        let session = LabSession::new(user_id, lab_id, "gns3", "p-1", Utc::now() + Duration::hours(4))
            .with_steps(1, 10.0);
        storage.create_session(&session).await.unwrap();
        session.id
    }

    #[tokio::test]
    async fn test_selection_routes_requests_and_logs() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer stored-key"))
            .and(body_string_contains("Enable OSPF"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Try router ospf 1")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let session_id = seeded_session(&storage).await;

        let factory = AiFactory::new(storage.clone(), AiConfig::default(), RequestConfig::default());
        factory
            .set_active_provider(
                "openrouter",
                &json!({ "api_key": "stored-key", "base_url": mock_server.uri() }),
            )
            .await
            .unwrap();

        let response = factory
            .get_response(&session_id, "How do I start?", Vec::new())
            .await
            .unwrap();
        assert_eq!(response.content, "Try router ospf 1");

        let logged = storage.get_session_interactions(&session_id).await.unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].ai_provider, "openrouter");
        assert_eq!(logged[0].interaction_type, "chat");
        assert_eq!(logged[0].tokens_used, 1500);

        // A fresh factory over the same store picks the selection back up.
        let reloaded = AiFactory::new(storage.clone(), AiConfig::default(), RequestConfig::default());
        let provider = reloaded.get_active_provider().await.unwrap();
        assert_eq!(provider.provider_type(), "openrouter");
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_selection() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let factory = AiFactory::new(storage.clone(), AiConfig::default(), RequestConfig::default());

        let err = factory
            .set_active_provider("openrouter", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::Instantiation { .. }));
        assert!(storage.get_setting("ai.active_provider").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let config = AiConfig {
            provider: Some("openrouter".to_string()),
            openrouter: OpenRouterConfig {
                api_key: Some("k".to_string()),
                ..Default::default()
            },
        };
        let factory = AiFactory::new(storage, config, RequestConfig::default());

        let err = factory.generate_hints("missing").await.unwrap_err();
        assert!(matches!(err, AiError::SessionNotFound { .. }));
    }
}
