//! Integration tests for the GNS3 adapter
//!
//! Tests HTTP behavior using wiremock for request/response mocking.

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use labtutor::config::RequestConfig;
use labtutor::error::ProviderError;
use labtutor::provider::{Gns3Provider, LabProvider};
use labtutor::storage::{GuidedStep, LabTemplate, User};

/// Create a test adapter pointing to mock server
fn create_test_provider(base_url: &str, extra: serde_json::Value) -> Gns3Provider {
    let mut config = json!({ "base_url": base_url });
    if let (Some(target), Some(extra)) = (config.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            target.insert(k.clone(), v.clone());
        }
    }
    Gns3Provider::from_value(&config, &RequestConfig { timeout_ms: 5000 })
        .expect("Failed to create provider")
}

fn student() -> User {
    let mut user = User::new("ada", "Ada");
    user.id = 42;
    user
}

#[cfg(test)]
mod create_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_create_project_and_start_nodes() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/projects"))
            .and(body_partial_json(json!({ "auto_close": false })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "project_id": "p-123",
                "name": "lab-ospf-u42-abcdef12"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v2/projects/p-123/nodes/start"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = create_test_provider(&mock_server.uri(), json!({}));
        let session = provider
            .create_session(&student(), &LabTemplate::new("OSPF", "ospf"), &json!({}))
            .await
            .unwrap();

        assert_eq!(session.session_id, "p-123");
        assert_eq!(
            session.access_url.unwrap(),
            format!("{}/static/web-ui/server/1/project/p-123", mock_server.uri())
        );
        assert_eq!(session.data["auto_start"], true);
    }

    #[tokio::test]
    async fn test_auto_start_can_be_disabled_per_session() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/projects"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "project_id": "p-1",
                "name": "lab"
            })))
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v2/projects/p-1/nodes/start"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&mock_server)
            .await;

        let provider = create_test_provider(&mock_server.uri(), json!({}));
        let session = provider
            .create_session(
                &student(),
                &LabTemplate::new("OSPF", "ospf"),
                &json!({ "auto_start": false }),
            )
            .await
            .unwrap();
        assert_eq!(session.data["auto_start"], false);
    }

    #[tokio::test]
    async fn test_failed_start_removes_project() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/projects"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "project_id": "p-9",
                "name": "lab"
            })))
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v2/projects/p-9/nodes/start"))
            .respond_with(ResponseTemplate::new(409).set_body_string("compute offline"))
            .mount(&mock_server)
            .await;

        Mock::given(method("DELETE"))
            .and(path("/v2/projects/p-9"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = create_test_provider(&mock_server.uri(), json!({}));
        let err = provider
            .create_session(&student(), &LabTemplate::new("OSPF", "ospf"), &json!({}))
            .await
            .unwrap_err();

        match err {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 409);
                assert!(message.contains("compute offline"));
            }
            other => panic!("Expected Api error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_basic_auth_sent_when_configured() {
        let mock_server = MockServer::start().await;

        // "admin:secret"
        Mock::given(method("POST"))
            .and(path("/v2/projects"))
            .and(header("Authorization", "Basic YWRtaW46c2VjcmV0"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "project_id": "p-2",
                "name": "lab"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = create_test_provider(
            &mock_server.uri(),
            json!({ "username": "admin", "password": "secret", "auto_start": false }),
        );
        let result = provider
            .create_session(&student(), &LabTemplate::new("OSPF", "ospf"), &json!({}))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_project_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/projects"))
            .respond_with(ResponseTemplate::new(201).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let provider = create_test_provider(&mock_server.uri(), json!({}));
        let err = provider
            .create_session(&student(), &LabTemplate::new("OSPF", "ospf"), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse { .. }));
    }
}

#[cfg(test)]
mod destroy_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_destroy_project() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/v2/projects/p-1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let provider = create_test_provider(&mock_server.uri(), json!({}));
        assert!(provider.destroy_session("p-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_destroy_missing_project_is_not_an_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/v2/projects/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let provider = create_test_provider(&mock_server.uri(), json!({}));
        assert!(!provider.destroy_session("gone").await.unwrap());
    }

    #[tokio::test]
    async fn test_destroy_server_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/v2/projects/p-1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let provider = create_test_provider(&mock_server.uri(), json!({}));
        let err = provider.destroy_session("p-1").await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 500, .. }));
    }
}

#[cfg(test)]
mod validation_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn mount_nodes(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v2/projects/p-1/nodes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "name": "R1", "status": "started" },
                { "name": "R2", "status": "stopped" }
            ])))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_node_status_partial_credit() {
        let mock_server = MockServer::start().await;
        mount_nodes(&mock_server).await;

        let provider = create_test_provider(&mock_server.uri(), json!({}));
        let step = GuidedStep::new("Boot routers").with_validation(json!({
            "type": "node_status",
            "expected": ["R1", "R2"]
        }));

        let result = provider.validate_step("p-1", &step, &json!({})).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.score, 5.0);
        assert!(result.feedback.contains("R2 should be started"));
        assert_eq!(result.actual_result.unwrap()["R2"], "stopped");
    }

    #[tokio::test]
    async fn test_node_status_object_form() {
        let mock_server = MockServer::start().await;
        mount_nodes(&mock_server).await;

        let provider = create_test_provider(&mock_server.uri(), json!({}));
        let step = GuidedStep::new("Shut R2").with_validation(json!({
            "type": "node_status",
            "expected": { "r1": "started", "R2": "stopped" }
        }));

        let result = provider.validate_step("p-1", &step, &json!({})).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.score, 10.0);
    }

    #[tokio::test]
    async fn test_node_status_defaults_to_all_started() {
        let mock_server = MockServer::start().await;
        mount_nodes(&mock_server).await;

        let provider = create_test_provider(&mock_server.uri(), json!({}));
        let step = GuidedStep::new("Boot").with_validation(json!({ "type": "node_status" }));

        let result = provider.validate_step("p-1", &step, &json!({})).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.score, 0.0);
    }

    #[tokio::test]
    async fn test_link_count() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/projects/p-1/links"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{}, {}, {}])))
            .mount(&mock_server)
            .await;

        let provider = create_test_provider(&mock_server.uri(), json!({}));
        let step = GuidedStep::new("Cable")
            .with_max_score(20.0)
            .with_validation(json!({ "type": "link_count", "expected": 3 }));

        let result = provider.validate_step("p-1", &step, &json!({})).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.score, 20.0);
        assert_eq!(result.actual_result.unwrap()["link_count"], 3);
    }

    #[tokio::test]
    async fn test_command_output_needs_no_server() {
        let provider = create_test_provider("http://127.0.0.1:9", json!({}));
        let step = GuidedStep::new("Configure").with_validation(json!({
            "type": "command_output",
            "expected": ["router ospf 1", "network 10.0.0.0 0.0.0.255 area 0"]
        }));

        let result = provider
            .validate_step(
                "p-1",
                &step,
                &json!({ "output": "Router OSPF 1\n  network 10.0.0.0  0.0.0.255 area 0" }),
            )
            .await
            .unwrap();
        assert!(result.passed);
        assert_eq!(result.score, 10.0);
    }

    #[tokio::test]
    async fn test_unsupported_check_type() {
        let provider = create_test_provider("http://127.0.0.1:9", json!({}));
        let step = GuidedStep::new("Ping").with_validation(json!({ "type": "ping" }));

        let result = provider.validate_step("p-1", &step, &json!({})).await.unwrap();
        assert!(!result.passed);
        assert!(result.feedback.contains("Unsupported check type: ping"));
    }

    #[tokio::test]
    async fn test_nodes_api_error_propagates() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/projects/p-1/nodes"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let provider = create_test_provider(&mock_server.uri(), json!({}));
        let step = GuidedStep::new("Boot").with_validation(json!({ "type": "node_status" }));
        let err = provider.validate_step("p-1", &step, &json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 503, .. }));
    }
}

#[cfg(test)]
mod connection_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_connection_reports_version() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/version"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "version": "2.2.44" })))
            .mount(&mock_server)
            .await;

        let provider = create_test_provider(&mock_server.uri(), json!({}));
        let result = provider.test_connection().await;
        assert!(result.success);
        assert_eq!(result.message, "Connected to GNS3 server 2.2.44");
    }

    #[tokio::test]
    async fn test_connection_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/version"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&mock_server)
            .await;

        let provider = create_test_provider(&mock_server.uri(), json!({}));
        let result = provider.test_connection().await;
        assert!(!result.success);
        assert!(result.message.contains("401"));
    }
}
