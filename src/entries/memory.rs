use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::anyhow;
use axum::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{
    Completion, CompletionOutcome, Entry, EntryStatus, EntryStatusView, NewEntry,
};
use super::repo::EntryStore;
use crate::uploads::UploadKind;

/// Process-local `EntryStore`. `local_day` is taken in UTC.
#[derive(Default)]
pub struct MemoryEntryStore {
    rows: Mutex<HashMap<Uuid, Entry>>,
    relaxed_claims: Mutex<HashSet<Uuid>>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Entry> {
        self.lock()
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Forces a status the store itself never writes.
    pub fn set_status(&self, id: Uuid, status: EntryStatus) -> anyhow::Result<()> {
        let mut rows = self.lock()?;
        let entry = rows.get_mut(&id).ok_or_else(|| anyhow!("no entry {id}"))?;
        entry.status = status;
        Ok(())
    }

    /// Shifts `created_at` into the past.
    pub fn backdate(&self, id: Uuid, by: time::Duration) -> anyhow::Result<()> {
        let mut rows = self.lock()?;
        let entry = rows.get_mut(&id).ok_or_else(|| anyhow!("no entry {id}"))?;
        entry.created_at -= by;
        Ok(())
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, HashMap<Uuid, Entry>>> {
        self.rows
            .lock()
            .map_err(|_| anyhow!("entry store lock poisoned"))
    }
}

#[async_trait]
impl EntryStore for MemoryEntryStore {
    async fn create(&self, new: NewEntry) -> anyhow::Result<Entry> {
        let now = OffsetDateTime::now_utc();
        let entry = Entry {
            id: new.id,
            user_id: new.user_id,
            status: EntryStatus::Processing,
            has_text: new.has_text(),
            raw_text: new.raw_text,
            has_image: false,
            has_audio: false,
            image_path: None,
            audio_path: None,
            model_output: None,
            protein_g: None,
            carbs_g: None,
            fat_g: None,
            calories_kcal: None,
            confidence: None,
            processed_at: None,
            local_day: now.date(),
            timezone_snapshot: new.timezone,
            created_at: now,
        };
        let mut rows = self.lock()?;
        anyhow::ensure!(!rows.contains_key(&entry.id), "duplicate entry id {}", entry.id);
        rows.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn attach_upload(
        &self,
        id: Uuid,
        kind: UploadKind,
        path: &str,
    ) -> anyhow::Result<bool> {
        let mut rows = self.lock()?;
        let Some(entry) = rows.get_mut(&id) else {
            return Ok(false);
        };
        let (flag, slot) = match kind {
            UploadKind::Image => (&mut entry.has_image, &mut entry.image_path),
            UploadKind::Audio => (&mut entry.has_audio, &mut entry.audio_path),
        };
        if slot.is_some() {
            return Ok(false);
        }
        *flag = true;
        *slot = Some(path.to_string());
        Ok(true)
    }

    async fn set_raw_text(&self, id: Uuid, text: &str) -> anyhow::Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        if let Some(entry) = self.lock()?.get_mut(&id) {
            entry.raw_text = Some(text.to_string());
            entry.has_text = true;
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Entry>> {
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn get_for_user(&self, user_id: Uuid, id: Uuid) -> anyhow::Result<Option<Entry>> {
        Ok(self
            .lock()?
            .get(&id)
            .filter(|e| e.user_id == user_id)
            .cloned())
    }

    async fn status_for_user(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> anyhow::Result<Option<EntryStatusView>> {
        Ok(self
            .get_for_user(user_id, id)
            .await?
            .map(|e| e.status_view()))
    }

    async fn complete(
        &self,
        id: Uuid,
        completion: &Completion,
    ) -> anyhow::Result<CompletionOutcome> {
        let mut rows = self.lock()?;
        let Some(entry) = rows.get_mut(&id) else {
            return Ok(CompletionOutcome::NotFound);
        };
        if !entry.status.can_transition_to(EntryStatus::Complete) {
            return Ok(CompletionOutcome::rejected(entry.status));
        }
        let m = completion.macros;
        entry.status = EntryStatus::Complete;
        entry.protein_g = Some(m.protein_g);
        entry.carbs_g = Some(m.carbs_g);
        entry.fat_g = Some(m.fat_g);
        entry.calories_kcal = Some(m.calories_kcal);
        entry.confidence = completion.confidence;
        entry.model_output = Some(completion.model_output.clone());
        entry.processed_at = Some(OffsetDateTime::now_utc());
        Ok(CompletionOutcome::Applied)
    }

    async fn claim_relaxed_retry(&self, id: Uuid) -> anyhow::Result<bool> {
        let rows = self.lock()?;
        let processing = rows
            .get(&id)
            .is_some_and(|e| e.status == EntryStatus::Processing);
        if !processing {
            return Ok(false);
        }
        let mut claims = self
            .relaxed_claims
            .lock()
            .map_err(|_| anyhow!("relaxed claim lock poisoned"))?;
        Ok(claims.insert(id))
    }

    async fn sweep_stale(
        &self,
        older_than: time::Duration,
        reason: &str,
    ) -> anyhow::Result<Vec<Uuid>> {
        let now = OffsetDateTime::now_utc();
        let cutoff = now - older_than;
        let mut swept = Vec::new();
        for entry in self.lock()?.values_mut() {
            if entry.status.can_transition_to(EntryStatus::Error) && entry.created_at < cutoff {
                entry.status = EntryStatus::Error;
                entry.processed_at = Some(now);
                let mut output = entry
                    .model_output
                    .take()
                    .unwrap_or_else(|| serde_json::json!({}));
                output["error"] = serde_json::Value::String(reason.to_string());
                entry.model_output = Some(output);
                swept.push(entry.id);
            }
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::Macros;

    fn new_entry(user_id: Uuid) -> NewEntry {
        NewEntry {
            id: Uuid::new_v4(),
            user_id,
            raw_text: Some("two eggs".into()),
            timezone: "Europe/Berlin".into(),
        }
    }

    fn completion(protein: f64) -> Completion {
        Completion {
            macros: Macros {
                protein_g: protein,
                carbs_g: 1.0,
                fat_g: 10.0,
                calories_kcal: 150.0,
            },
            confidence: Some(0.8),
            model_output: serde_json::json!({ "parsed": {} }),
        }
    }

    #[tokio::test]
    async fn created_entries_start_processing() {
        let store = MemoryEntryStore::new();
        let e = store.create(new_entry(Uuid::new_v4())).await.unwrap();
        assert_eq!(e.status, EntryStatus::Processing);
        assert!(e.has_text);
        assert!(e.processed_at.is_none());
        assert_eq!(e.timezone_snapshot, "Europe/Berlin");
    }

    #[tokio::test]
    async fn upload_paths_are_append_only() {
        let store = MemoryEntryStore::new();
        let e = store.create(new_entry(Uuid::new_v4())).await.unwrap();
        assert!(store.attach_upload(e.id, UploadKind::Image, "a.jpg").await.unwrap());
        assert!(!store.attach_upload(e.id, UploadKind::Image, "b.jpg").await.unwrap());
        let got = store.get(e.id).await.unwrap().unwrap();
        assert_eq!(got.image_path.as_deref(), Some("a.jpg"));
        assert!(got.has_image);
        assert!(!got.has_audio);
    }

    #[tokio::test]
    async fn raw_text_is_never_cleared() {
        let store = MemoryEntryStore::new();
        let e = store.create(new_entry(Uuid::new_v4())).await.unwrap();
        store.set_raw_text(e.id, "").await.unwrap();
        let got = store.get(e.id).await.unwrap().unwrap();
        assert_eq!(got.raw_text.as_deref(), Some("two eggs"));
    }

    #[tokio::test]
    async fn second_completion_is_a_no_op() {
        let store = MemoryEntryStore::new();
        let e = store.create(new_entry(Uuid::new_v4())).await.unwrap();

        let first = store.complete(e.id, &completion(12.0)).await.unwrap();
        let processed_at = store.get(e.id).await.unwrap().unwrap().processed_at;
        let second = store.complete(e.id, &completion(99.0)).await.unwrap();

        assert_eq!(first, CompletionOutcome::Applied);
        assert_eq!(second, CompletionOutcome::AlreadyTerminal);
        let got = store.get(e.id).await.unwrap().unwrap();
        assert_eq!(got.protein_g, Some(12.0));
        assert_eq!(got.processed_at, processed_at);
    }

    #[tokio::test]
    async fn completion_of_unknown_entry_reports_not_found() {
        let store = MemoryEntryStore::new();
        let outcome = store.complete(Uuid::new_v4(), &completion(1.0)).await.unwrap();
        assert_eq!(outcome, CompletionOutcome::NotFound);
    }

    #[tokio::test]
    async fn pending_entries_cannot_jump_to_complete() {
        let store = MemoryEntryStore::new();
        let e = store.create(new_entry(Uuid::new_v4())).await.unwrap();
        store.set_status(e.id, EntryStatus::Pending).unwrap();

        let outcome = store.complete(e.id, &completion(3.0)).await.unwrap();
        assert_eq!(outcome, CompletionOutcome::NotProcessing);
        let got = store.get(e.id).await.unwrap().unwrap();
        assert_eq!(got.status, EntryStatus::Pending);
        assert!(got.protein_g.is_none());

        store.backdate(e.id, time::Duration::hours(1)).unwrap();
        let swept = store
            .sweep_stale(time::Duration::minutes(15), "timed out")
            .await
            .unwrap();
        assert!(swept.is_empty());
    }

    #[tokio::test]
    async fn relaxed_retry_is_claimed_once() {
        let store = MemoryEntryStore::new();
        let e = store.create(new_entry(Uuid::new_v4())).await.unwrap();
        assert!(store.claim_relaxed_retry(e.id).await.unwrap());
        assert!(!store.claim_relaxed_retry(e.id).await.unwrap());
        assert!(!store.claim_relaxed_retry(Uuid::new_v4()).await.unwrap());

        let done = store.create(new_entry(Uuid::new_v4())).await.unwrap();
        store.complete(done.id, &completion(1.0)).await.unwrap();
        assert!(!store.claim_relaxed_retry(done.id).await.unwrap());
    }

    #[tokio::test]
    async fn status_read_is_scoped_to_owner() {
        let store = MemoryEntryStore::new();
        let owner = Uuid::new_v4();
        let e = store.create(new_entry(owner)).await.unwrap();
        assert!(store.status_for_user(owner, e.id).await.unwrap().is_some());
        assert!(store
            .status_for_user(Uuid::new_v4(), e.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn sweep_only_touches_old_non_terminal_entries() {
        let store = MemoryEntryStore::new();
        let user = Uuid::new_v4();
        let stale = store.create(new_entry(user)).await.unwrap();
        let fresh = store.create(new_entry(user)).await.unwrap();
        let done = store.create(new_entry(user)).await.unwrap();
        store.complete(done.id, &completion(5.0)).await.unwrap();
        store.backdate(stale.id, time::Duration::hours(1)).unwrap();
        store.backdate(done.id, time::Duration::hours(1)).unwrap();

        let swept = store
            .sweep_stale(time::Duration::minutes(15), "timed out")
            .await
            .unwrap();

        assert_eq!(swept, vec![stale.id]);
        let stale = store.get(stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, EntryStatus::Error);
        assert_eq!(stale.model_output.unwrap()["error"], "timed out");
        assert_eq!(
            store.get(fresh.id).await.unwrap().unwrap().status,
            EntryStatus::Processing
        );
        assert_eq!(
            store.get(done.id).await.unwrap().unwrap().status,
            EntryStatus::Complete
        );
    }
}
