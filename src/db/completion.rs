//! Completion record persistence.

use chrono::{DateTime, Utc};

use super::{from_millis, to_millis};
use crate::error::Result;
use crate::model::work::WorkItem;

impl super::Db {
    /// Record a completion, never moving an existing record backwards.
    pub async fn upsert_completion(&self, item: &WorkItem, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO completions (work_type, subject, completed_at) VALUES ($1, $2, $3)
             ON CONFLICT (work_type, subject)
             DO UPDATE SET completed_at = MAX(completed_at, excluded.completed_at)",
        )
        .bind(&item.work_type)
        .bind(&item.subject)
        .bind(to_millis(at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_completion(&self, item: &WorkItem) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT completed_at FROM completions WHERE work_type = $1 AND subject = $2",
        )
        .bind(&item.work_type)
        .bind(&item.subject)
        .fetch_optional(self.pool())
        .await?;
        row.map(|(ms,)| from_millis(ms)).transpose()
    }

    /// Every stored completion record.
    pub async fn load_completions(&self) -> Result<Vec<(WorkItem, DateTime<Utc>)>> {
        let rows: Vec<(String, String, i64)> =
            sqlx::query_as("SELECT work_type, subject, completed_at FROM completions")
                .fetch_all(self.pool())
                .await?;
        rows.into_iter()
            .map(|(work_type, subject, ms)| Ok((WorkItem::new(work_type, subject), from_millis(ms)?)))
            .collect()
    }
}
