//! Job notifications delivered through a live query on `job_notification`.

use futures_util::StreamExt;
use queue_core::{JobId, JobNotification, NotificationStream};
use serde::Deserialize;
use surrealdb::Action;
use surrealdb::sql::Datetime;

use super::job_repo::to_datetime;
use crate::{Database, DbError};

/// Repository for the notification channel.
#[derive(Clone)]
pub struct NotificationRepository {
    db: Database,
}

#[derive(Debug, Deserialize)]
struct NotificationRow {
    job_id: i64,
    queue: String,
    priority: i64,
    run_at: Datetime,
    job_class: String,
}

impl NotificationRow {
    fn into_notification(self) -> Option<JobNotification> {
        Some(JobNotification {
            id: JobId(self.job_id),
            queue: self.queue,
            priority: i16::try_from(self.priority).ok()?,
            run_at: to_datetime(self.run_at),
            job_class: self.job_class,
        })
    }
}

impl NotificationRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a notification row. Live queries pick it up as a create event.
    pub async fn publish(&self, notification: JobNotification) -> Result<(), DbError> {
        self.db
            .query(
                r#"
                CREATE job_notification CONTENT {
                    job_id: $job_id,
                    queue: $queue,
                    priority: $priority,
                    run_at: $run_at,
                    job_class: $job_class
                }
                "#,
            )
            .bind(("job_id", notification.id.get()))
            .bind(("queue", notification.queue))
            .bind(("priority", i64::from(notification.priority)))
            .bind(("run_at", Datetime::from(notification.run_at)))
            .bind(("job_class", notification.job_class))
            .await?
            .check()?;

        Ok(())
    }

    /// Subscribe to notifications created from now on.
    pub async fn subscribe(&self) -> Result<NotificationStream, DbError> {
        let stream = self
            .db
            .select::<Vec<NotificationRow>>("job_notification")
            .live()
            .await?;

        Ok(stream
            .filter_map(|item| async move {
                match item {
                    Ok(notification) if matches!(notification.action, Action::Create) => {
                        notification.data.into_notification()
                    }
                    Ok(_) => None,
                    Err(e) => {
                        tracing::warn!("Notification stream error: {}", e);
                        None
                    }
                }
            })
            .boxed())
    }
}
