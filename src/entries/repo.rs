use anyhow::Context;
use axum::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::model::{
    Completion, CompletionOutcome, Entry, EntryRow, EntryStatus, EntryStatusView, NewEntry,
};
use crate::uploads::UploadKind;

/// Persistence for the `entries` table. Owns the status state machine.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Inserts a new entry in `processing`.
    async fn create(&self, new: NewEntry) -> anyhow::Result<Entry>;

    /// Records an upload path. Returns `false` if a path was already set.
    async fn attach_upload(&self, id: Uuid, kind: UploadKind, path: &str)
        -> anyhow::Result<bool>;

    /// Replaces `raw_text`; blank text is ignored so the column is never cleared.
    async fn set_raw_text(&self, id: Uuid, text: &str) -> anyhow::Result<()>;

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Entry>>;

    async fn get_for_user(&self, user_id: Uuid, id: Uuid) -> anyhow::Result<Option<Entry>>;

    async fn status_for_user(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> anyhow::Result<Option<EntryStatusView>>;

    /// Conditional `processing -> complete` write; a no-op in any other state.
    async fn complete(&self, id: Uuid, completion: &Completion)
        -> anyhow::Result<CompletionOutcome>;

    /// Claims the single relaxed retry of a `processing` entry. Only the first
    /// caller gets `true`.
    async fn claim_relaxed_retry(&self, id: Uuid) -> anyhow::Result<bool>;

    /// Moves entries stuck in `processing` longer than `older_than` to `error`.
    async fn sweep_stale(
        &self,
        older_than: time::Duration,
        reason: &str,
    ) -> anyhow::Result<Vec<Uuid>>;
}

const ENTRY_COLUMNS: &str = r#"
    id, user_id, status, raw_text, has_text, has_image, has_audio,
    image_path, audio_path, model_output, protein_g, carbs_g, fat_g,
    calories_kcal, confidence, processed_at, local_day, timezone_snapshot,
    created_at
"#;

#[derive(Clone)]
pub struct PgEntryStore {
    db: PgPool,
}

impl PgEntryStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn into_entry(row: EntryRow) -> anyhow::Result<Entry> {
    Entry::try_from(row).context("decode entry row")
}

#[async_trait]
impl EntryStore for PgEntryStore {
    async fn create(&self, new: NewEntry) -> anyhow::Result<Entry> {
        let has_text = new.has_text();
        // Unknown timezone names fall back to UTC.
        let sql = format!(
            r#"
            WITH tz AS (
                SELECT COALESCE(
                    (SELECT name FROM pg_timezone_names WHERE name = $5 LIMIT 1),
                    'UTC'
                ) AS name
            )
            INSERT INTO entries (id, user_id, status, raw_text, has_text, timezone_snapshot, local_day)
            SELECT $1, $2, 'processing', $3, $4, tz.name, (now() AT TIME ZONE tz.name)::date
            FROM tz
            RETURNING {ENTRY_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(new.id)
            .bind(new.user_id)
            .bind(new.raw_text.as_deref())
            .bind(has_text)
            .bind(&new.timezone)
            .fetch_one(&self.db)
            .await
            .context("insert entry")?;
        into_entry(row)
    }

    async fn attach_upload(
        &self,
        id: Uuid,
        kind: UploadKind,
        path: &str,
    ) -> anyhow::Result<bool> {
        let sql = match kind {
            UploadKind::Image => {
                r#"UPDATE entries SET has_image = TRUE, image_path = $2
                   WHERE id = $1 AND image_path IS NULL"#
            }
            UploadKind::Audio => {
                r#"UPDATE entries SET has_audio = TRUE, audio_path = $2
                   WHERE id = $1 AND audio_path IS NULL"#
            }
        };
        let res = sqlx::query(sql)
            .bind(id)
            .bind(path)
            .execute(&self.db)
            .await
            .with_context(|| format!("attach {kind} path"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn set_raw_text(&self, id: Uuid, text: &str) -> anyhow::Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        sqlx::query(r#"UPDATE entries SET raw_text = $2, has_text = TRUE WHERE id = $1"#)
            .bind(id)
            .bind(text)
            .execute(&self.db)
            .await
            .context("update raw_text")?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Entry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = $1");
        let row = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("get entry")?;
        row.map(into_entry).transpose()
    }

    async fn get_for_user(&self, user_id: Uuid, id: Uuid) -> anyhow::Result<Option<Entry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = $1 AND user_id = $2");
        let row = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.db)
            .await
            .context("get entry for user")?;
        row.map(into_entry).transpose()
    }

    async fn status_for_user(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> anyhow::Result<Option<EntryStatusView>> {
        #[derive(sqlx::FromRow)]
        struct StatusRow {
            id: Uuid,
            status: String,
            protein_g: Option<f64>,
            carbs_g: Option<f64>,
            fat_g: Option<f64>,
            calories_kcal: Option<f64>,
            raw_text: Option<String>,
        }

        let row = sqlx::query_as::<_, StatusRow>(
            r#"
            SELECT id, status, protein_g, carbs_g, fat_g, calories_kcal, raw_text
            FROM entries
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await
        .context("read entry status")?;

        row.map(|r| {
            Ok(EntryStatusView {
                id: r.id,
                status: r.status.parse().context("decode entry status")?,
                protein_g: r.protein_g,
                carbs_g: r.carbs_g,
                fat_g: r.fat_g,
                calories_kcal: r.calories_kcal,
                raw_text: r.raw_text,
            })
        })
        .transpose()
    }

    async fn complete(
        &self,
        id: Uuid,
        completion: &Completion,
    ) -> anyhow::Result<CompletionOutcome> {
        let m = &completion.macros;
        let res = sqlx::query(
            r#"
            UPDATE entries
               SET status = 'complete',
                   protein_g = $2,
                   carbs_g = $3,
                   fat_g = $4,
                   calories_kcal = $5,
                   confidence = $6,
                   model_output = $7,
                   processed_at = now()
             WHERE id = $1
               AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(m.protein_g)
        .bind(m.carbs_g)
        .bind(m.fat_g)
        .bind(m.calories_kcal)
        .bind(completion.confidence)
        .bind(&completion.model_output)
        .execute(&self.db)
        .await
        .context("complete entry")?;

        if res.rows_affected() == 1 {
            return Ok(CompletionOutcome::Applied);
        }

        let current: Option<(String,)> = sqlx::query_as("SELECT status FROM entries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("read entry status")?;
        match current {
            Some((status,)) => {
                let status: EntryStatus = status.parse().context("decode entry status")?;
                Ok(CompletionOutcome::rejected(status))
            }
            None => Ok(CompletionOutcome::NotFound),
        }
    }

    async fn claim_relaxed_retry(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE entries
               SET relaxed_retry_at = now()
             WHERE id = $1
               AND status = 'processing'
               AND relaxed_retry_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.db)
        .await
        .context("claim relaxed retry")?;
        Ok(res.rows_affected() == 1)
    }

    async fn sweep_stale(
        &self,
        older_than: time::Duration,
        reason: &str,
    ) -> anyhow::Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE entries
               SET status = 'error',
                   processed_at = now(),
                   model_output = COALESCE(model_output, '{}'::jsonb)
                                  || jsonb_build_object('error', $2::text)
             WHERE status = 'processing'
               AND created_at < now() - make_interval(secs => $1)
            RETURNING id
            "#,
        )
        .bind(older_than.as_seconds_f64())
        .bind(reason)
        .fetch_all(&self.db)
        .await
        .context("sweep stale entries")?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
