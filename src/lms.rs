//! Bridge to the learning-management side: who may open a lab, and which
//! lesson a passed lab completes.

use chrono::Utc;
use tracing::{debug, info};

use crate::error::StorageResult;
use crate::storage::{LabSession, LabTemplate, LessonCompletion, SqliteStorage, Storage, User};

/// Access checks and lesson completion against the LMS tables.
#[derive(Clone)]
pub struct LmsBridge {
    storage: SqliteStorage,
}

impl LmsBridge {
    /// Create a bridge over `storage`.
    pub fn new(storage: SqliteStorage) -> Self {
        Self { storage }
    }

    /// Lab managers may open any lab; others need enrollment in the lab's course,
    /// and labs outside any course are open to everyone.
    pub async fn can_access(&self, user: &User, template: &LabTemplate) -> StorageResult<bool> {
        if user.can_manage_labs {
            return Ok(true);
        }

        match template.course_id {
            Some(course_id) => {
                let enrolled = self.storage.is_enrolled(user.id, course_id).await?;
                debug!(user_id = user.id, course_id, enrolled, "Checked course enrollment");
                Ok(enrolled)
            }
            None => Ok(true),
        }
    }

    /// Mark the template's lesson complete when the session scored at least
    /// `threshold` percent. Returns true when a new completion was written.
    pub async fn complete_lesson(
        &self,
        session: &LabSession,
        template: &LabTemplate,
        threshold: f64,
    ) -> StorageResult<bool> {
        let Some(lesson_id) = template.lesson_id else {
            return Ok(false);
        };

        let percent = session.score_percent();
        if percent < threshold {
            debug!(
                session_id = %session.id,
                percent,
                threshold,
                "Score below completion threshold"
            );
            return Ok(false);
        }

        let written = self
            .storage
            .mark_lesson_complete(&LessonCompletion {
                user_id: session.user_id,
                course_id: template.course_id,
                lesson_id,
                session_id: session.id.clone(),
                score_percent: percent,
                completed_at: Utc::now(),
            })
            .await?;

        if written {
            info!(
                session_id = %session.id,
                user_id = session.user_id,
                lesson_id,
                percent,
                "Lesson marked complete"
            );
        }
        Ok(written)
    }
}
