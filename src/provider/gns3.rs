//! GNS3 server adapter.
//!
//! Each lab session is a GNS3 project named after the template and student.
//! Step checks can inspect node status and link count through the `/v2` API,
//! or judge submitted command output.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::checks::{judge_output, manual_pass, unsupported};
use super::{
    http_client, parse_config, read_json, resource_name, send, ConfigField, ConnectionTest,
    FieldType, LabProvider, ProviderSession, StepValidation, GNS3,
};
use crate::config::RequestConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::storage::{GuidedStep, LabTemplate, User};

/// Connection settings stored in the provider row.
#[derive(Debug, Clone, Deserialize)]
pub struct Gns3Config {
    pub base_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_project_prefix")]
    pub project_prefix: String,
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
}

fn default_project_prefix() -> String {
    "lab".to_string()
}

fn default_auto_start() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct Project {
    project_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct Node {
    name: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct Version {
    version: String,
}

/// Adapter for a GNS3 server.
pub struct Gns3Provider {
    client: reqwest::Client,
    config: Gns3Config,
    base_url: String,
    timeout_ms: u64,
}

impl Gns3Provider {
    /// Create an adapter from typed settings.
    pub fn new(config: Gns3Config, request: &RequestConfig) -> ProviderResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(ProviderError::Instantiation {
                provider_type: GNS3.to_string(),
                message: "base_url is required".to_string(),
            });
        }

        Ok(Self {
            client: http_client(GNS3, request)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config,
            timeout_ms: request.timeout_ms,
        })
    }

    /// Create an adapter from a stored JSON config.
    pub fn from_value(config: &Value, request: &RequestConfig) -> ProviderResult<Self> {
        Self::new(parse_config(GNS3, config)?, request)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/v2{}", self.base_url, path));
        match &self.config.username {
            Some(username) if !username.is_empty() => {
                builder.basic_auth(username, self.config.password.as_deref())
            }
            _ => builder,
        }
    }

    async fn list_nodes(&self, project_id: &str) -> ProviderResult<Vec<Node>> {
        let path = format!("/projects/{}/nodes", project_id);
        let response = send(self.request(reqwest::Method::GET, &path), self.timeout_ms).await?;
        read_json(response).await
    }

    async fn list_links(&self, project_id: &str) -> ProviderResult<Vec<Value>> {
        let path = format!("/projects/{}/links", project_id);
        let response = send(self.request(reqwest::Method::GET, &path), self.timeout_ms).await?;
        read_json(response).await
    }

    /// `expected` is either `{"R1": "started"}` or a list of names that must be started.
    async fn check_nodes(
        &self,
        project_id: &str,
        step: &GuidedStep,
        check: &Value,
    ) -> ProviderResult<StepValidation> {
        let wanted: Vec<(String, String)> = match check.get("expected") {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(name, status)| {
                    (
                        name.clone(),
                        status.as_str().unwrap_or("started").to_string(),
                    )
                })
                .collect(),
            Some(Value::Array(names)) => names
                .iter()
                .filter_map(Value::as_str)
                .map(|name| (name.to_string(), "started".to_string()))
                .collect(),
            _ => Vec::new(),
        };

        let nodes = self.list_nodes(project_id).await?;
        if wanted.is_empty() {
            let all_started = !nodes.is_empty() && nodes.iter().all(|n| n.status == "started");
            return Ok(StepValidation {
                passed: all_started,
                score: if all_started { step.max_score } else { 0.0 },
                feedback: if all_started {
                    "All nodes are running.".to_string()
                } else {
                    "Not all nodes are running.".to_string()
                },
                actual_result: Some(node_summary(&nodes)),
                validation_time_ms: 0,
            });
        }

        let mut wrong = Vec::new();
        for (name, status) in &wanted {
            let ok = nodes
                .iter()
                .any(|n| n.name.eq_ignore_ascii_case(name) && n.status == *status);
            if !ok {
                wrong.push(format!("{} should be {}", name, status));
            }
        }

        let fraction = (wanted.len() - wrong.len()) as f64 / wanted.len() as f64;
        Ok(StepValidation {
            passed: wrong.is_empty(),
            score: (step.max_score * fraction * 100.0).round() / 100.0,
            feedback: if wrong.is_empty() {
                "All nodes are in the expected state.".to_string()
            } else {
                wrong.join("; ")
            },
            actual_result: Some(node_summary(&nodes)),
            validation_time_ms: 0,
        })
    }

    async fn check_links(
        &self,
        project_id: &str,
        step: &GuidedStep,
        check: &Value,
    ) -> ProviderResult<StepValidation> {
        let expected = check.get("expected").and_then(Value::as_u64).unwrap_or(1) as usize;
        let links = self.list_links(project_id).await?;
        let passed = links.len() >= expected;

        Ok(StepValidation {
            passed,
            score: if passed { step.max_score } else { 0.0 },
            feedback: format!("Found {} of {} expected links.", links.len(), expected),
            actual_result: Some(json!({ "link_count": links.len() })),
            validation_time_ms: 0,
        })
    }
}

fn node_summary(nodes: &[Node]) -> Value {
    nodes
        .iter()
        .map(|n| (n.name.clone(), Value::String(n.status.clone())))
        .collect::<serde_json::Map<_, _>>()
        .into()
}

#[async_trait]
impl LabProvider for Gns3Provider {
    fn provider_type(&self) -> &'static str {
        GNS3
    }

    async fn create_session(
        &self,
        user: &User,
        template: &LabTemplate,
        options: &Value,
    ) -> ProviderResult<ProviderSession> {
        let name = resource_name(&self.config.project_prefix, template, user);
        debug!(project = %name, user_id = user.id, "Creating GNS3 project");

        let response = send(
            self.request(reqwest::Method::POST, "/projects")
                .json(&json!({ "name": name, "auto_close": false })),
            self.timeout_ms,
        )
        .await?;
        let project: Project = read_json(response).await?;

        let auto_start = options
            .get("auto_start")
            .and_then(Value::as_bool)
            .unwrap_or(self.config.auto_start);
        if auto_start {
            let path = format!("/projects/{}/nodes/start", project.project_id);
            if let Err(e) = send(self.request(reqwest::Method::POST, &path), self.timeout_ms).await
            {
                warn!(project_id = %project.project_id, error = %e, "Failed to start nodes, removing project");
                if let Err(cleanup) = self.destroy_session(&project.project_id).await {
                    warn!(project_id = %project.project_id, error = %cleanup, "Project cleanup failed");
                }
                return Err(e);
            }
        }

        info!(project_id = %project.project_id, project = %project.name, "GNS3 project ready");

        Ok(ProviderSession {
            access_url: Some(format!(
                "{}/static/web-ui/server/1/project/{}",
                self.base_url, project.project_id
            )),
            data: json!({ "project_name": project.name, "auto_start": auto_start }),
            session_id: project.project_id,
        })
    }

    async fn destroy_session(&self, session_id: &str) -> ProviderResult<bool> {
        let path = format!("/projects/{}", session_id);
        match send(self.request(reqwest::Method::DELETE, &path), self.timeout_ms).await {
            Ok(_) => {
                info!(project_id = %session_id, "GNS3 project deleted");
                Ok(true)
            }
            Err(ProviderError::Api { status: 404, .. }) => {
                debug!(project_id = %session_id, "GNS3 project already gone");
                Ok(false)
            }
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
            "node_status" => self.check_nodes(session_id, step, &check).await?,
            "link_count" => self.check_links(session_id, step, &check).await?,
            other => unsupported(other),
        };
        result.validation_time_ms = start.elapsed().as_millis() as i64;

        debug!(
            project_id = %session_id,
            check = %check_type,
            passed = result.passed,
            score = result.score,
            "GNS3 step checked"
        );
        Ok(result)
    }

    async fn test_connection(&self) -> ConnectionTest {
        let response = match send(self.request(reqwest::Method::GET, "/version"), self.timeout_ms)
            .await
        {
            Ok(response) => response,
            Err(e) => return ConnectionTest::failed(e.to_string()),
        };

        match read_json::<Version>(response).await {
            Ok(v) => ConnectionTest::ok(format!("Connected to GNS3 server {}", v.version)),
            Err(e) => ConnectionTest::failed(e.to_string()),
        }
    }

    fn config_fields(&self) -> Vec<ConfigField> {
        vec![
            ConfigField::required("base_url", "Server URL", FieldType::Url),
            ConfigField::optional("username", "Username", FieldType::Text, json!("")),
            ConfigField::optional("password", "Password", FieldType::Password, json!("")),
            ConfigField::optional("project_prefix", "Project prefix", FieldType::Text, json!("lab")),
            ConfigField::optional("auto_start", "Start nodes on create", FieldType::Boolean, json!(true)),
        ]
    }
}
