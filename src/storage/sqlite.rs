use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::{
    format_timestamp, parse_timestamp, AiInteraction, AnalyticsEvent, HealthStatus, LabSession,
    LabTemplate, LessonCompletion, NewProvider, ProviderRecord, ProviderUpdate, SessionContext,
    SessionStatus, StatusCount, Storage, User, ValidationRecord,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const SESSION_COLUMNS: &str = "id, user_id, lab_id, provider_id, provider_type, provider_session_id, \
     current_step, total_steps, status, score, max_score, session_data, ai_context, \
     created_at, updated_at, expires_at, completed_at";

const TEMPLATE_COLUMNS: &str = "id, name, slug, description, provider_type, template_type, \
     guided_steps, startup_script, verification_script, difficulty_level, estimated_duration, \
     is_active, is_featured, usage_count, course_id, lesson_id, created_at, updated_at";

const PROVIDER_COLUMNS: &str = "id, name, provider_type, display_name, config, is_active, \
     is_default, health_status, health_message, last_health_check, created_at, updated_at";

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create a private in-memory database (single pooled connection).
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        // Every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn map_conflict(err: sqlx::Error, message: impl Into<String>) -> StorageError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict {
            message: message.into(),
        },
        _ => StorageError::Sqlx(err),
    }
}

fn json_column(value: &serde_json::Value) -> Option<String> {
    if value.is_null() {
        None
    } else {
        Some(value.to_string())
    }
}

fn json_value(column: Option<String>) -> serde_json::Value {
    column
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(serde_json::Value::Null)
}

/// Clear the other defaults of the provider's type and flag it as default.
async fn make_default(conn: &mut SqliteConnection, id: i64, now: &str) -> StorageResult<bool> {
    let provider_type: Option<String> =
        sqlx::query_scalar("SELECT provider_type FROM lab_providers WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

    let Some(provider_type) = provider_type else {
        return Ok(false);
    };

    sqlx::query("UPDATE lab_providers SET is_default = 0, updated_at = ? WHERE provider_type = ?")
        .bind(now)
        .bind(&provider_type)
        .execute(&mut *conn)
        .await?;

    sqlx::query("UPDATE lab_providers SET is_default = 1, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(true)
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_user(&self, user: &User) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (login, display_name, email, can_manage_labs, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.login)
        .bind(&user.display_name)
        .bind(&user.email)
        .bind(user.can_manage_labs)
        .bind(format_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| map_conflict(e, format!("user login '{}' already exists", user.login)))?;

        Ok(result.last_insert_rowid())
    }

    async fn get_user(&self, id: i64) -> StorageResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, login, display_name, email, can_manage_labs FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn enroll_user(&self, user_id: i64, course_id: i64) -> StorageResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO enrollments (user_id, course_id, enrolled_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(course_id)
        .bind(format_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn is_enrolled(&self, user_id: i64, course_id: i64) -> StorageResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM enrollments WHERE user_id = ? AND course_id = ?",
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    async fn mark_lesson_complete(&self, completion: &LessonCompletion) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO lesson_completions
                (user_id, course_id, lesson_id, session_id, score_percent, completed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(completion.user_id)
        .bind(completion.course_id)
        .bind(completion.lesson_id)
        .bind(&completion.session_id)
        .bind(completion.score_percent)
        .bind(format_timestamp(&completion.completed_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_lesson_completion(
        &self,
        user_id: i64,
        lesson_id: i64,
    ) -> StorageResult<Option<LessonCompletion>> {
        let row: Option<LessonCompletionRow> = sqlx::query_as(
            r#"
            SELECT user_id, course_id, lesson_id, session_id, score_percent, completed_at
            FROM lesson_completions
            WHERE user_id = ? AND lesson_id = ?
            "#,
        )
        .bind(user_id)
        .bind(lesson_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn create_template(&self, template: &LabTemplate) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO lab_templates (name, slug, description, provider_type, template_type,
                guided_steps, startup_script, verification_script, difficulty_level,
                estimated_duration, is_active, is_featured, usage_count, course_id, lesson_id,
                created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&template.name)
        .bind(&template.slug)
        .bind(&template.description)
        .bind(&template.provider_type)
        .bind(template.template_type.to_string())
        .bind(&template.guided_steps)
        .bind(&template.startup_script)
        .bind(&template.verification_script)
        .bind(&template.difficulty_level)
        .bind(template.estimated_duration)
        .bind(template.is_active)
        .bind(template.is_featured)
        .bind(template.usage_count)
        .bind(template.course_id)
        .bind(template.lesson_id)
        .bind(format_timestamp(&template.created_at))
        .bind(format_timestamp(&template.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| map_conflict(e, format!("template slug '{}' already exists", template.slug)))?;

        Ok(result.last_insert_rowid())
    }

    async fn get_template(&self, id: i64) -> StorageResult<Option<LabTemplate>> {
        let sql = format!("SELECT {} FROM lab_templates WHERE id = ?", TEMPLATE_COLUMNS);
        let row: Option<TemplateRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn get_template_by_slug(&self, slug: &str) -> StorageResult<Option<LabTemplate>> {
        let sql = format!("SELECT {} FROM lab_templates WHERE slug = ?", TEMPLATE_COLUMNS);
        let row: Option<TemplateRow> = sqlx::query_as(&sql)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn list_templates(&self, active_only: bool) -> StorageResult<Vec<LabTemplate>> {
        let sql = if active_only {
            format!(
                "SELECT {} FROM lab_templates WHERE is_active = 1 ORDER BY is_featured DESC, name ASC",
                TEMPLATE_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM lab_templates ORDER BY is_featured DESC, name ASC",
                TEMPLATE_COLUMNS
            )
        };
        let rows: Vec<TemplateRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn increment_template_usage(&self, id: i64) -> StorageResult<()> {
        sqlx::query("UPDATE lab_templates SET usage_count = usage_count + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn insert_provider(&self, provider: &NewProvider) -> StorageResult<i64> {
        let now = format_timestamp(&Utc::now());
        let mut tx = self.pool.begin().await?;

        if provider.is_default {
            sqlx::query(
                "UPDATE lab_providers SET is_default = 0, updated_at = ? WHERE provider_type = ?",
            )
            .bind(&now)
            .bind(&provider.provider_type)
            .execute(&mut *tx)
            .await?;
        }

        let result = sqlx::query(
            r#"
            INSERT INTO lab_providers (name, provider_type, display_name, config, is_active,
                is_default, health_status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&provider.name)
        .bind(&provider.provider_type)
        .bind(&provider.display_name)
        .bind(provider.config.to_string())
        .bind(provider.is_active)
        .bind(provider.is_default)
        .bind(HealthStatus::Unknown.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_conflict(e, format!("provider name '{}' already exists", provider.name)))?;

        tx.commit().await?;

        Ok(result.last_insert_rowid())
    }

    async fn get_provider(&self, id: i64) -> StorageResult<Option<ProviderRecord>> {
        let sql = format!("SELECT {} FROM lab_providers WHERE id = ?", PROVIDER_COLUMNS);
        let row: Option<ProviderRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn list_providers(&self, active_only: bool) -> StorageResult<Vec<ProviderRecord>> {
        let filter = if active_only { "WHERE is_active = 1" } else { "" };
        let sql = format!(
            "SELECT {} FROM lab_providers {} ORDER BY provider_type ASC, is_default DESC, id ASC",
            PROVIDER_COLUMNS, filter
        );
        let rows: Vec<ProviderRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn get_default_provider(&self) -> StorageResult<Option<ProviderRecord>> {
        let sql = format!(
            "SELECT {} FROM lab_providers WHERE is_active = 1 ORDER BY is_default DESC, id ASC LIMIT 1",
            PROVIDER_COLUMNS
        );
        let row: Option<ProviderRow> = sqlx::query_as(&sql).fetch_optional(&self.pool).await?;

        Ok(row.map(|r| r.into()))
    }

    async fn get_provider_by_type(
        &self,
        provider_type: &str,
    ) -> StorageResult<Option<ProviderRecord>> {
        let sql = format!(
            "SELECT {} FROM lab_providers WHERE is_active = 1 AND provider_type = ? \
             ORDER BY is_default DESC, id ASC LIMIT 1",
            PROVIDER_COLUMNS
        );
        let row: Option<ProviderRow> = sqlx::query_as(&sql)
            .bind(provider_type)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn update_provider(&self, id: i64, update: &ProviderUpdate) -> StorageResult<bool> {
        let now = format_timestamp(&Utc::now());
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE lab_providers
            SET display_name = COALESCE(?, display_name),
                config = COALESCE(?, config),
                is_active = COALESCE(?, is_active),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&update.display_name)
        .bind(update.config.as_ref().map(|c| c.to_string()))
        .bind(update.is_active)
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        match update.is_default {
            Some(true) => {
                make_default(&mut *tx, id, &now).await?;
            }
            Some(false) => {
                sqlx::query("UPDATE lab_providers SET is_default = 0 WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {}
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn set_default_provider(&self, id: i64) -> StorageResult<bool> {
        let now = format_timestamp(&Utc::now());
        let mut tx = self.pool.begin().await?;

        if !make_default(&mut *tx, id, &now).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        debug!(provider_id = id, "Default provider switched");
        Ok(true)
    }

    async fn delete_provider(&self, id: i64) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM lab_providers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_provider_health(
        &self,
        id: i64,
        status: HealthStatus,
        message: Option<&str>,
        checked_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE lab_providers
            SET health_status = ?, health_message = ?, last_health_check = ?
            WHERE id = ?
            "#,
        )
        .bind(status.to_string())
        .bind(message)
        .bind(format_timestamp(&checked_at))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_open_sessions_for_provider(&self, provider_id: i64) -> StorageResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM lab_sessions
            WHERE provider_id = ? AND status IN ('started', 'active', 'in_progress', 'paused')
            "#,
        )
        .bind(provider_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn create_session(&self, session: &LabSession) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO lab_sessions (id, user_id, lab_id, provider_id, provider_type,
                provider_session_id, current_step, total_steps, status, score, max_score,
                session_data, ai_context, created_at, updated_at, expires_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(session.user_id)
        .bind(session.lab_id)
        .bind(session.provider_id)
        .bind(&session.provider_type)
        .bind(&session.provider_session_id)
        .bind(session.current_step)
        .bind(session.total_steps)
        .bind(session.status.as_str())
        .bind(session.score)
        .bind(session.max_score)
        .bind(json_column(&session.session_data))
        .bind(json_column(&session.ai_context))
        .bind(format_timestamp(&session.created_at))
        .bind(format_timestamp(&session.updated_at))
        .bind(format_timestamp(&session.expires_at))
        .bind(session.completed_at.as_ref().map(format_timestamp))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_conflict(
                e,
                format!(
                    "user {} already has a live session for lab {}",
                    session.user_id, session.lab_id
                ),
            )
        })?;

        Ok(())
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<LabSession>> {
        let sql = format!("SELECT {} FROM lab_sessions WHERE id = ?", SESSION_COLUMNS);
        let row: Option<SessionRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn find_live_session(
        &self,
        user_id: i64,
        lab_id: i64,
    ) -> StorageResult<Option<LabSession>> {
        let sql = format!(
            "SELECT {} FROM lab_sessions WHERE user_id = ? AND lab_id = ? \
             AND status IN ('started', 'active', 'in_progress') LIMIT 1",
            SESSION_COLUMNS
        );
        let row: Option<SessionRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(lab_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn update_session(&self, session: &LabSession) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE lab_sessions
            SET current_step = ?, total_steps = ?, status = ?, score = ?, max_score = ?,
                session_data = ?, ai_context = ?, updated_at = ?, expires_at = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(session.current_step)
        .bind(session.total_steps)
        .bind(session.status.as_str())
        .bind(session.score)
        .bind(session.max_score)
        .bind(json_column(&session.session_data))
        .bind(json_column(&session.ai_context))
        .bind(format_timestamp(&session.updated_at))
        .bind(format_timestamp(&session.expires_at))
        .bind(session.completed_at.as_ref().map(format_timestamp))
        .bind(&session.id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_conflict(e, format!("session {} conflicts with a live session", session.id)))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Query {
                message: format!("Session not found: {}", session.id),
            });
        }

        Ok(())
    }

    async fn update_live_session(&self, session: &LabSession) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE lab_sessions
            SET current_step = ?, status = ?, score = ?, updated_at = ?, expires_at = ?
            WHERE id = ? AND status IN ('started', 'active', 'in_progress')
            "#,
        )
        .bind(session.current_step)
        .bind(session.status.as_str())
        .bind(session.score)
        .bind(format_timestamp(&session.updated_at))
        .bind(format_timestamp(&session.expires_at))
        .bind(&session.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn transition_session(
        &self,
        id: &str,
        from: &[SessionStatus],
        to: SessionStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> StorageResult<bool> {
        if from.is_empty() {
            return Ok(false);
        }

        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            "UPDATE lab_sessions SET status = ?, updated_at = ?, \
             completed_at = COALESCE(?, completed_at) \
             WHERE id = ? AND status IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(format_timestamp(&Utc::now()))
            .bind(completed_at.as_ref().map(format_timestamp))
            .bind(id);
        for status in from {
            query = query.bind(status.as_str());
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| map_conflict(e, format!("session {} conflicts with a live session", id)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_expired_sessions(&self, now: DateTime<Utc>) -> StorageResult<Vec<LabSession>> {
        let sql = format!(
            "SELECT {} FROM lab_sessions WHERE status IN ('started', 'active', 'in_progress') \
             AND expires_at < ? ORDER BY expires_at ASC",
            SESSION_COLUMNS
        );
        let rows: Vec<SessionRow> = sqlx::query_as(&sql)
            .bind(format_timestamp(&now))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn count_sessions_by_status(&self) -> StorageResult<Vec<StatusCount>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM lab_sessions GROUP BY status ORDER BY status ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect())
    }

    async fn load_session_context(&self, session_id: &str) -> StorageResult<Option<SessionContext>> {
        let row: Option<ContextRow> = sqlx::query_as(
            r#"
            SELECT s.id, s.user_id, s.lab_id, s.provider_id, s.provider_type,
                   s.provider_session_id, s.current_step, s.total_steps, s.status, s.score,
                   s.max_score, s.session_data, s.ai_context, s.created_at, s.updated_at,
                   s.expires_at, s.completed_at,
                   u.login AS user_login, u.display_name AS user_display_name,
                   t.id AS template_id
            FROM lab_sessions s
            LEFT JOIN users u ON u.id = s.user_id
            LEFT JOIN lab_templates t ON t.id = s.lab_id
            WHERE s.id = ?
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let template = match row.template_id {
            Some(id) => self.get_template(id).await?,
            None => None,
        };

        Ok(Some(SessionContext {
            session: row.session.into(),
            user_login: row.user_login,
            user_display_name: row.user_display_name,
            template,
        }))
    }

    async fn create_validation(&self, record: &ValidationRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO step_validations (id, session_id, step, validation_type, validation_data,
                expected_result, actual_result, score, max_score, passed, feedback,
                validation_time_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.session_id)
        .bind(record.step)
        .bind(&record.validation_type)
        .bind(json_column(&record.validation_data))
        .bind(record.expected_result.as_ref().map(|v| v.to_string()))
        .bind(record.actual_result.as_ref().map(|v| v.to_string()))
        .bind(record.score)
        .bind(record.max_score)
        .bind(record.passed)
        .bind(&record.feedback)
        .bind(record.validation_time_ms)
        .bind(format_timestamp(&record.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session_validations(
        &self,
        session_id: &str,
    ) -> StorageResult<Vec<ValidationRecord>> {
        let rows: Vec<ValidationRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, step, validation_type, validation_data, expected_result,
                   actual_result, score, max_score, passed, feedback, validation_time_ms, created_at
            FROM step_validations
            WHERE session_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn sum_validation_scores(&self, session_id: &str) -> StorageResult<f64> {
        let total: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(score), 0.0) FROM step_validations WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    async fn log_ai_interaction(&self, interaction: &AiInteraction) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ai_interactions (id, session_id, user_id, ai_provider, interaction_type,
                request_data, response_data, tokens_used, response_time_ms, cost_usd, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&interaction.id)
        .bind(&interaction.session_id)
        .bind(interaction.user_id)
        .bind(&interaction.ai_provider)
        .bind(&interaction.interaction_type)
        .bind(interaction.request_data.to_string())
        .bind(interaction.response_data.to_string())
        .bind(interaction.tokens_used)
        .bind(interaction.response_time_ms)
        .bind(interaction.cost_usd)
        .bind(format_timestamp(&interaction.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session_interactions(
        &self,
        session_id: &str,
    ) -> StorageResult<Vec<AiInteraction>> {
        let rows: Vec<InteractionRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, user_id, ai_provider, interaction_type, request_data,
                   response_data, tokens_used, response_time_ms, cost_usd, created_at
            FROM ai_interactions
            WHERE session_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn record_event(&self, event: &AnalyticsEvent) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO analytics_events (id, event_type, user_id, session_id, lab_id,
                event_data, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(event.user_id)
        .bind(&event.session_id)
        .bind(event.lab_id)
        .bind(json_column(&event.event_data))
        .bind(format_timestamp(&event.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_events(&self, event_type: &str) -> StorageResult<Vec<AnalyticsEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, event_type, user_id, session_id, lab_id, event_data, created_at
            FROM analytics_events
            WHERE event_type = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(event_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn get_setting(&self, key: &str) -> StorageResult<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    async fn set_setting(&self, key: &str, value: &str) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(format_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    login: String,
    display_name: String,
    email: Option<String>,
    can_manage_labs: bool,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            login: row.login,
            display_name: row.display_name,
            email: row.email,
            can_manage_labs: row.can_manage_labs,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LessonCompletionRow {
    user_id: i64,
    course_id: Option<i64>,
    lesson_id: i64,
    session_id: String,
    score_percent: f64,
    completed_at: String,
}

impl From<LessonCompletionRow> for LessonCompletion {
    fn from(row: LessonCompletionRow) -> Self {
        Self {
            user_id: row.user_id,
            course_id: row.course_id,
            lesson_id: row.lesson_id,
            session_id: row.session_id,
            score_percent: row.score_percent,
            completed_at: parse_timestamp(&row.completed_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: i64,
    name: String,
    slug: String,
    description: Option<String>,
    provider_type: Option<String>,
    template_type: String,
    guided_steps: String,
    startup_script: Option<String>,
    verification_script: Option<String>,
    difficulty_level: String,
    estimated_duration: i64,
    is_active: bool,
    is_featured: bool,
    usage_count: i64,
    course_id: Option<i64>,
    lesson_id: Option<i64>,
    created_at: String,
    updated_at: String,
}

impl From<TemplateRow> for LabTemplate {
    fn from(row: TemplateRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            slug: row.slug,
            description: row.description,
            provider_type: row.provider_type,
            template_type: row.template_type.parse().unwrap_or_default(),
            guided_steps: row.guided_steps,
            startup_script: row.startup_script,
            verification_script: row.verification_script,
            difficulty_level: row.difficulty_level,
            estimated_duration: row.estimated_duration,
            is_active: row.is_active,
            is_featured: row.is_featured,
            usage_count: row.usage_count,
            course_id: row.course_id,
            lesson_id: row.lesson_id,
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProviderRow {
    id: i64,
    name: String,
    provider_type: String,
    display_name: String,
    config: String,
    is_active: bool,
    is_default: bool,
    health_status: String,
    health_message: Option<String>,
    last_health_check: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<ProviderRow> for ProviderRecord {
    fn from(row: ProviderRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            provider_type: row.provider_type,
            display_name: row.display_name,
            // Malformed config is surfaced by the factory as InvalidConfig.
            config: serde_json::from_str(&row.config)
                .unwrap_or(serde_json::Value::String(row.config)),
            is_active: row.is_active,
            is_default: row.is_default,
            health_status: row.health_status.parse().unwrap_or_default(),
            health_message: row.health_message,
            last_health_check: row.last_health_check.as_deref().map(parse_timestamp),
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: i64,
    lab_id: i64,
    provider_id: Option<i64>,
    provider_type: String,
    provider_session_id: String,
    current_step: i64,
    total_steps: i64,
    status: String,
    score: f64,
    max_score: f64,
    session_data: Option<String>,
    ai_context: Option<String>,
    created_at: String,
    updated_at: String,
    expires_at: String,
    completed_at: Option<String>,
}

impl From<SessionRow> for LabSession {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            lab_id: row.lab_id,
            provider_id: row.provider_id,
            provider_type: row.provider_type,
            provider_session_id: row.provider_session_id,
            current_step: row.current_step,
            total_steps: row.total_steps,
            status: row.status.parse().unwrap_or(SessionStatus::Failed),
            score: row.score,
            max_score: row.max_score,
            session_data: json_value(row.session_data),
            ai_context: json_value(row.ai_context),
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
            expires_at: parse_timestamp(&row.expires_at),
            completed_at: row.completed_at.as_deref().map(parse_timestamp),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ContextRow {
    #[sqlx(flatten)]
    session: SessionRow,
    user_login: Option<String>,
    user_display_name: Option<String>,
    template_id: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct ValidationRow {
    id: String,
    session_id: String,
    step: i64,
    validation_type: String,
    validation_data: Option<String>,
    expected_result: Option<String>,
    actual_result: Option<String>,
    score: f64,
    max_score: f64,
    passed: bool,
    feedback: Option<String>,
    validation_time_ms: i64,
    created_at: String,
}

impl From<ValidationRow> for ValidationRecord {
    fn from(row: ValidationRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            step: row.step,
            validation_type: row.validation_type,
            validation_data: json_value(row.validation_data),
            expected_result: row.expected_result.and_then(|s| serde_json::from_str(&s).ok()),
            actual_result: row.actual_result.and_then(|s| serde_json::from_str(&s).ok()),
            score: row.score,
            max_score: row.max_score,
            passed: row.passed,
            feedback: row.feedback,
            validation_time_ms: row.validation_time_ms,
            created_at: parse_timestamp(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct InteractionRow {
    id: String,
    session_id: String,
    user_id: i64,
    ai_provider: String,
    interaction_type: String,
    request_data: String,
    response_data: String,
    tokens_used: i64,
    response_time_ms: i64,
    cost_usd: f64,
    created_at: String,
}

impl From<InteractionRow> for AiInteraction {
    fn from(row: InteractionRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            user_id: row.user_id,
            ai_provider: row.ai_provider,
            interaction_type: row.interaction_type,
            request_data: serde_json::from_str(&row.request_data).unwrap_or_default(),
            response_data: serde_json::from_str(&row.response_data).unwrap_or_default(),
            tokens_used: row.tokens_used,
            response_time_ms: row.response_time_ms,
            cost_usd: row.cost_usd,
            created_at: parse_timestamp(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    event_type: String,
    user_id: Option<i64>,
    session_id: Option<String>,
    lab_id: Option<i64>,
    event_data: Option<String>,
    created_at: String,
}

impl From<EventRow> for AnalyticsEvent {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            event_type: row.event_type,
            user_id: row.user_id,
            session_id: row.session_id,
            lab_id: row.lab_id,
            event_data: json_value(row.event_data),
            created_at: parse_timestamp(&row.created_at),
        }
    }
}
