//! Lab provider adapters and the factory that builds them.
//!
//! A provider is a remote virtual-lab backend (GNS3, Guacamole, ...). Adapters
//! provision a lab for a student, tear it down, and judge guided steps.

mod checks;
mod factory;
mod gns3;
mod guacamole;

pub use checks::{evaluate_output, CheckOutcome};
pub use factory::{ProviderBuilder, ProviderFactory, ProviderHandle};
pub use gns3::{Gns3Config, Gns3Provider};
pub use guacamole::{GuacamoleConfig, GuacamoleProvider};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RequestConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::storage::{GuidedStep, LabTemplate, User};

/// Registered name of the GNS3 adapter.
pub const GNS3: &str = "gns3";
/// Registered name of the Guacamole adapter.
pub const GUACAMOLE: &str = "guacamole";

/// A lab provisioned on a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSession {
    /// Provider-side identifier.
    pub session_id: String,
    /// URL the student opens, if the provider has one.
    pub access_url: Option<String>,
    /// Anything else the provider returned.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Outcome of one step check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepValidation {
    /// Whether the step counts as done.
    pub passed: bool,
    /// Points awarded for this attempt.
    pub score: f64,
    /// Message shown to the learner.
    pub feedback: String,
    /// What the provider observed, if it reports anything.
    pub actual_result: Option<serde_json::Value>,
    /// Time spent judging the attempt.
    pub validation_time_ms: i64,
}

/// Result of a connection test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTest {
    /// Whether the backend answered as expected.
    pub success: bool,
    /// Version string or failure reason.
    pub message: String,
}

impl ConnectionTest {
    /// Successful test.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Failed test.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Field kinds shown when configuring a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Url,
    Password,
    Number,
    Boolean,
}

/// One configuration field of a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<serde_json::Value>,
}

impl ConfigField {
    /// Required field without default.
    pub fn required(name: &str, label: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            field_type,
            required: true,
            default: None,
        }
    }

    /// Optional field with a default.
    pub fn optional(
        name: &str,
        label: &str,
        field_type: FieldType,
        default: serde_json::Value,
    ) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            field_type,
            required: false,
            default: Some(default),
        }
    }
}

/// A remote virtual-lab backend.
#[async_trait]
pub trait LabProvider: Send + Sync {
    /// Registered type name.
    fn provider_type(&self) -> &'static str;

    /// Provision a lab for `user` from `template`.
    async fn create_session(
        &self,
        user: &User,
        template: &LabTemplate,
        options: &serde_json::Value,
    ) -> ProviderResult<ProviderSession>;

    /// Tear a lab down. Returns false if the provider no longer knew it.
    async fn destroy_session(&self, session_id: &str) -> ProviderResult<bool>;

    /// Judge one guided step against the running lab and submitted data.
    async fn validate_step(
        &self,
        session_id: &str,
        step: &GuidedStep,
        data: &serde_json::Value,
    ) -> ProviderResult<StepValidation>;

    /// Check that the backend is reachable with the configured credentials.
    async fn test_connection(&self) -> ConnectionTest;

    /// Configuration schema.
    fn config_fields(&self) -> Vec<ConfigField>;
}

/// Deserialize an adapter config, mapping failures to `Instantiation`.
pub(crate) fn parse_config<T: serde::de::DeserializeOwned>(
    provider_type: &str,
    config: &serde_json::Value,
) -> ProviderResult<T> {
    serde_json::from_value(config.clone()).map_err(|e| {
        ProviderError::Instantiation {
            provider_type: provider_type.to_string(),
            message: e.to_string(),
        }
    })
}

/// Short lowercase slug for naming provider-side resources.
pub(crate) fn resource_name(prefix: &str, template: &LabTemplate, user: &User) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-u{}-{}", prefix, template.slug, user.id, &suffix[..8])
}

/// HTTP client with the configured request timeout.
pub(crate) fn http_client(
    provider_type: &str,
    request: &RequestConfig,
) -> ProviderResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(request.timeout_ms))
        .build()
        .map_err(|e| ProviderError::Instantiation {
            provider_type: provider_type.to_string(),
            message: e.to_string(),
        })
}

/// Send a request, turning non-2xx statuses into `Api` errors.
pub(crate) async fn send(
    builder: reqwest::RequestBuilder,
    timeout_ms: u64,
) -> ProviderResult<reqwest::Response> {
    let response = builder.send().await.map_err(|e| {
        if e.is_timeout() {
            ProviderError::Timeout { timeout_ms }
        } else {
            ProviderError::Http(e)
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let error_body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Api {
            status: status.as_u16(),
            message: error_body,
        });
    }

    Ok(response)
}

/// Decode a JSON response body.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> ProviderResult<T> {
    response
        .json()
        .await
        .map_err(|e| ProviderError::InvalidResponse {
            message: format!("Failed to parse response: {}", e),
        })
}
