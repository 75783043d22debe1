//! Apache Guacamole adapter.
//!
//! A lab session is a Guacamole connection (SSH/RDP/VNC into a prepared lab
//! host). Guacamole has no view into the lab itself, so only `manual` and
//! `command_output` checks are supported.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, info};

use super::checks::{judge_output, manual_pass, unsupported};
use super::{
    http_client, parse_config, read_json, resource_name, send, ConfigField, ConnectionTest,
    FieldType, LabProvider, ProviderSession, StepValidation, GUACAMOLE,
};
use crate::config::RequestConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::storage::{GuidedStep, LabTemplate, User};

/// Connection settings stored in the provider row.
#[derive(Debug, Clone, Deserialize)]
pub struct GuacamoleConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_data_source")]
    pub data_source: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Lab host the connection points at.
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_data_source() -> String {
    "mysql".to_string()
}

fn default_protocol() -> String {
    "ssh".to_string()
}

fn default_port() -> u16 {
    22
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    auth_token: String,
    #[serde(default)]
    data_source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Connection {
    identifier: String,
}

/// Adapter for a Guacamole gateway.
pub struct GuacamoleProvider {
    client: reqwest::Client,
    config: GuacamoleConfig,
    base_url: String,
    timeout_ms: u64,
}

impl GuacamoleProvider {
    /// Create an adapter from typed settings.
    pub fn new(config: GuacamoleConfig, request: &RequestConfig) -> ProviderResult<Self> {
        if config.base_url.trim().is_empty() || config.hostname.trim().is_empty() {
            return Err(ProviderError::Instantiation {
                provider_type: GUACAMOLE.to_string(),
                message: "base_url and hostname are required".to_string(),
            });
        }

        Ok(Self {
            client: http_client(GUACAMOLE, request)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config,
            timeout_ms: request.timeout_ms,
        })
    }

    /// Create an adapter from a stored JSON config.
    pub fn from_value(config: &Value, request: &RequestConfig) -> ProviderResult<Self> {
        Self::new(parse_config(GUACAMOLE, config)?, request)
    }

    async fn authenticate(&self) -> ProviderResult<TokenResponse> {
        let builder = self
            .client
            .post(format!("{}/api/tokens", self.base_url))
            .form(&[
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
            ]);
        let response = send(builder, self.timeout_ms).await?;
        read_json(response).await
    }

    fn connections_url(&self) -> String {
        format!(
            "{}/api/session/data/{}/connections",
            self.base_url, self.config.data_source
        )
    }

    /// URL that opens `identifier` in the Guacamole web client.
    pub fn client_url(&self, identifier: &str) -> String {
        let raw = format!("{}\0c\0{}", identifier, self.config.data_source);
        format!("{}/#/client/{}", self.base_url, STANDARD.encode(raw))
    }
}

#[async_trait]
impl LabProvider for GuacamoleProvider {
    fn provider_type(&self) -> &'static str {
        GUACAMOLE
    }

    async fn create_session(
        &self,
        user: &User,
        template: &LabTemplate,
        options: &Value,
    ) -> ProviderResult<ProviderSession> {
        let token = self.authenticate().await?;
        let name = resource_name("lab", template, user);

        let hostname = options
            .get("hostname")
            .and_then(Value::as_str)
            .unwrap_or(&self.config.hostname);
        let port = options
            .get("port")
            .and_then(Value::as_u64)
            .unwrap_or(u64::from(self.config.port));

        debug!(connection = %name, hostname = %hostname, "Creating Guacamole connection");

        let body = json!({
            "parentIdentifier": "ROOT",
            "name": name,
            "protocol": self.config.protocol,
            "parameters": {
                "hostname": hostname,
                "port": port.to_string(),
            },
            "attributes": {},
        });
        let response = send(
            self.client
                .post(self.connections_url())
                .query(&[("token", token.auth_token.as_str())])
                .json(&body),
            self.timeout_ms,
        )
        .await?;
        let connection: Connection = read_json(response).await?;

        info!(connection_id = %connection.identifier, "Guacamole connection ready");

        Ok(ProviderSession {
            access_url: Some(self.client_url(&connection.identifier)),
            data: json!({
                "connection_name": name,
                "protocol": self.config.protocol,
                "hostname": hostname,
            }),
            session_id: connection.identifier,
        })
    }

    async fn destroy_session(&self, session_id: &str) -> ProviderResult<bool> {
        let token = self.authenticate().await?;
        let builder = self
            .client
            .delete(format!("{}/{}", self.connections_url(), session_id))
            .query(&[("token", token.auth_token.as_str())]);

        match send(builder, self.timeout_ms).await {
            Ok(_) => {
                info!(connection_id = %session_id, "Guacamole connection deleted");
                Ok(true)
            }
            Err(ProviderError::Api { status: 404, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn validate_step(
        &self,
        session_id: &str,
        step: &GuidedStep,
        data: &Value,
    ) -> ProviderResult<StepValidation> {
        let start = Instant::now();
        let check = step.validation.clone().unwrap_or(Value::Null);
        let check_type = step.validation_type();

        let mut result = match check_type.as_str() {
            "manual" => manual_pass(step),
            "command_output" => judge_output(step, &check, data),
            other => unsupported(other),
        };
        result.validation_time_ms = start.elapsed().as_millis() as i64;

        debug!(
            connection_id = %session_id,
            check = %check_type,
            passed = result.passed,
            "Guacamole step checked"
        );
        Ok(result)
    }

    async fn test_connection(&self) -> ConnectionTest {
        match self.authenticate().await {
            Ok(token) => ConnectionTest::ok(format!(
                "Authenticated with Guacamole (data source: {})",
                token
                    .data_source
                    .as_deref()
                    .unwrap_or(&self.config.data_source)
            )),
            Err(e) => ConnectionTest::failed(e.to_string()),
        }
    }

    fn config_fields(&self) -> Vec<ConfigField> {
        vec![
            ConfigField::required("base_url", "Guacamole URL", FieldType::Url),
            ConfigField::required("username", "Username", FieldType::Text),
            ConfigField::required("password", "Password", FieldType::Password),
            ConfigField::required("hostname", "Lab host", FieldType::Text),
            ConfigField::optional("port", "Port", FieldType::Number, json!(22)),
            ConfigField::optional("protocol", "Protocol", FieldType::Text, json!("ssh")),
            ConfigField::optional("data_source", "Data source", FieldType::Text, json!("mysql")),
        ]
    }
}
