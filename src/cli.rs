//! Command-line interface.
//!
//! Operational commands over the lab session store: the expiry sweeper
//! daemon, one-off sweeps, and read-only views of sessions and providers.

use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};

use crate::session::Sweeper;
use crate::state::AppState;
use crate::storage::{HealthStatus, ProviderRecord};

const RULE: &str = "═══════════════════════════════════════════════════════════════════════════════\n";

/// Lab session lifecycle manager.
#[derive(Parser, Debug)]
#[command(name = "labtutor")]
#[command(about = "Virtual networking lab sessions with AI tutoring")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Run the expiry sweeper until interrupted (default)
    Run,

    /// Expire overdue sessions once and exit
    Sweep,

    /// Show session counts by status
    Status,

    /// List configured lab providers
    Providers {
        /// Only show active providers
        #[arg(long)]
        active_only: bool,
    },

    /// Test a provider's connection and record its health
    TestProvider {
        /// Provider id
        id: i64,
    },

    /// Show a session and its validation attempts
    Session {
        /// Session id
        id: String,
    },
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a CLI command.
pub async fn execute_command(command: Commands, state: &AppState) -> CliResult {
    match command {
        Commands::Run => execute_run(state).await,
        Commands::Sweep => execute_sweep(state).await,
        Commands::Status => execute_status(state).await,
        Commands::Providers { active_only } => execute_providers(state, active_only).await,
        Commands::TestProvider { id } => execute_test_provider(state, id).await,
        Commands::Session { id } => execute_session(state, &id).await,
    }
}

async fn execute_run(state: &AppState) -> CliResult {
    let period = Duration::from_secs(state.config.session.cleanup_interval_secs.max(1));
    let sweeper = Sweeper::spawn(state.sessions.clone(), period);

    let result = tokio::signal::ctrl_c().await;
    sweeper.stop();

    match result {
        Ok(()) => CliResult::success("Sweeper stopped"),
        Err(e) => CliResult::error(format!("Failed to listen for shutdown signal: {}", e)),
    }
}

async fn execute_sweep(state: &AppState) -> CliResult {
    match state.sessions.cleanup_expired_sessions().await {
        Ok(report) => CliResult::success(format!(
            "Expired {} session(s); destroyed {} provider lab(s), {} failure(s)",
            report.expired, report.destroyed, report.destroy_failures
        )),
        Err(e) => CliResult::error(format!("Sweep failed: {}", e)),
    }
}

async fn execute_status(state: &AppState) -> CliResult {
    let mut output = String::new();
    output.push_str("\nLab Sessions\n");
    output.push_str(RULE);
    output.push('\n');

    match state.sessions.status_counts().await {
        Ok(counts) if counts.is_empty() => output.push_str("No sessions recorded\n"),
        Ok(counts) => {
            for row in counts {
                output.push_str(&format!("  {:<12} {}\n", row.status, row.count));
            }
        }
        Err(e) => return CliResult::error(format!("Failed to load session counts: {}", e)),
    }

    output.push('\n');
    match state.providers.list(true).await {
        Ok(providers) => output.push_str(&format!("Active providers: {}\n", providers.len())),
        Err(e) => output.push_str(&format!("Active providers: Error loading ({})\n", e)),
    }

    CliResult::success(output)
}

async fn execute_providers(state: &AppState, active_only: bool) -> CliResult {
    let providers = match state.providers.list(active_only).await {
        Ok(p) => p,
        Err(e) => return CliResult::error(format!("Failed to list providers: {}", e)),
    };

    let mut output = String::new();
    output.push_str("\nLab Providers\n");
    output.push_str(RULE);
    output.push('\n');

    if providers.is_empty() {
        output.push_str("No providers configured\n");
    }
    for provider in &providers {
        output.push_str(&format_provider(provider));
    }

    CliResult::success(output)
}

async fn execute_test_provider(state: &AppState, id: i64) -> CliResult {
    match state.providers.test(id).await {
        Ok(result) if result.success => CliResult::success(format!("OK: {}", result.message)),
        Ok(result) => CliResult::error(format!("FAILED: {}", result.message)),
        Err(e) => CliResult::error(format!("Provider test failed: {}", e)),
    }
}

async fn execute_session(state: &AppState, id: &str) -> CliResult {
    let session = match state.sessions.get_session(id).await {
        Ok(s) => s,
        Err(e) => return CliResult::error(e.to_string()),
    };

    let mut output = String::new();
    output.push_str(&format!("\nSession {}\n", session.id));
    output.push_str(RULE);
    output.push('\n');
    output.push_str(&format!("User:      {}\n", session.user_id));
    output.push_str(&format!("Lab:       {}\n", session.lab_id));
    output.push_str(&format!(
        "Provider:  {} ({})\n",
        session.provider_type, session.provider_session_id
    ));
    output.push_str(&format!("Status:    {}\n", session.status));
    output.push_str(&format!(
        "Step:      {} of {}\n",
        session.current_step, session.total_steps
    ));
    output.push_str(&format!(
        "Score:     {}/{} ({:.0}%)\n",
        session.score,
        session.max_score,
        session.score_percent()
    ));

    let remaining = session.expires_at - Utc::now();
    if session.status.is_live() && remaining > chrono::Duration::zero() {
        output.push_str(&format!("Expires:   in {}\n", format_duration(remaining)));
    } else {
        output.push_str(&format!("Expires:   {}\n", session.expires_at.to_rfc3339()));
    }

    output.push('\n');
    match state.sessions.session_validations(id).await {
        Ok(records) => {
            output.push_str(&format!("Validation attempts: {}\n", records.len()));
            for record in records {
                output.push_str(&format!(
                    "  [{}] step {} {}: {}/{} {}\n",
                    if record.passed { "PASS" } else { "FAIL" },
                    record.step,
                    record.validation_type,
                    record.score,
                    record.max_score,
                    record.feedback.as_deref().unwrap_or("")
                ));
            }
        }
        Err(e) => output.push_str(&format!("Validation attempts: Error loading ({})\n", e)),
    }

    CliResult::success(output)
}

fn format_provider(provider: &ProviderRecord) -> String {
    let health = match provider.health_status {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Unhealthy => "UNHEALTHY",
        HealthStatus::Unknown => "untested",
    };
    let mut flags = Vec::new();
    if provider.is_default {
        flags.push("default");
    }
    if !provider.is_active {
        flags.push("inactive");
    }

    let mut line = format!(
        "  #{:<4} {:<20} {:<10} {}",
        provider.id, provider.display_name, provider.provider_type, health
    );
    if !flags.is_empty() {
        line.push_str(&format!(" [{}]", flags.join(", ")));
    }
    if let Some(message) = &provider.health_message {
        line.push_str(&format!(" - {}", message));
    }
    line.push('\n');
    line
}

fn format_duration(duration: chrono::Duration) -> String {
    let total_secs = duration.num_seconds();
    if total_secs < 60 {
        format!("{}s", total_secs)
    } else if total_secs < 3600 {
        format!("{}m", total_secs / 60)
    } else if total_secs < 86400 {
        format!("{}h", total_secs / 3600)
    } else {
        format!("{}d", total_secs / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::seconds(30)), "30s");
        assert_eq!(format_duration(chrono::Duration::seconds(90)), "1m");
        assert_eq!(format_duration(chrono::Duration::seconds(7200)), "2h");
        assert_eq!(format_duration(chrono::Duration::seconds(86400)), "1d");
    }

    #[test]
    fn test_default_command_is_none() {
        let cli = Cli::parse_from(["labtutor"]);
        assert_eq!(cli.command, None);
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::parse_from(["labtutor", "test-provider", "3"]);
        assert_eq!(cli.command, Some(Commands::TestProvider { id: 3 }));

        let cli = Cli::parse_from(["labtutor", "providers", "--active-only"]);
        assert_eq!(cli.command, Some(Commands::Providers { active_only: true }));
    }

    #[test]
    fn test_format_provider_flags() {
        let provider = ProviderRecord {
            id: 2,
            name: "gns3-main".to_string(),
            provider_type: "gns3".to_string(),
            display_name: "GNS3 Main".to_string(),
            config: json!({}),
            is_active: false,
            is_default: true,
            health_status: HealthStatus::Unhealthy,
            health_message: Some("connection refused".to_string()),
            last_health_check: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let line = format_provider(&provider);
        assert!(line.contains("UNHEALTHY"));
        assert!(line.contains("[default, inactive]"));
        assert!(line.contains("connection refused"));
    }

    #[test]
    fn test_cli_result_error() {
        let result = CliResult::error("error message");
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.message, "error message");
    }
}
