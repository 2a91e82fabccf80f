use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use super::model::{Completion, CompletionOutcome};
use super::repo::EntryStore;
use crate::normalize::NormalizedOutput;

/// The only writer of canonical macros and the terminal `complete` transition.
///
/// Replays are safe: the store's conditional update turns a second write into
/// [`CompletionOutcome::AlreadyTerminal`].
pub async fn write_completion(
    store: &dyn EntryStore,
    entry_id: Uuid,
    normalized: &NormalizedOutput,
    envelope: &Value,
) -> anyhow::Result<CompletionOutcome> {
    let completion = Completion {
        macros: normalized.macros,
        confidence: normalized.confidence,
        model_output: normalized.audit_record(envelope),
    };

    let outcome = store.complete(entry_id, &completion).await?;
    match outcome {
        CompletionOutcome::Applied => info!(
            %entry_id,
            stage = ?normalized.stage,
            protein_g = completion.macros.protein_g,
            carbs_g = completion.macros.carbs_g,
            fat_g = completion.macros.fat_g,
            calories_kcal = completion.macros.calories_kcal,
            "entry completed"
        ),
        CompletionOutcome::AlreadyTerminal => {
            info!(%entry_id, "entry already terminal; completion ignored")
        }
        CompletionOutcome::NotProcessing => {
            warn!(%entry_id, "entry not processing; completion refused")
        }
        CompletionOutcome::NotFound => warn!(%entry_id, "completion for unknown entry"),
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::memory::MemoryEntryStore;
    use crate::entries::model::{EntryStatus, NewEntry};
    use crate::normalize::normalize_response;
    use serde_json::json;

    async fn seeded() -> (MemoryEntryStore, Uuid) {
        let store = MemoryEntryStore::new();
        let entry = store
            .create(NewEntry {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                raw_text: Some("toast".into()),
                timezone: "UTC".into(),
            })
            .await
            .unwrap();
        (store, entry.id)
    }

    #[tokio::test]
    async fn applies_macros_and_audit_record() {
        let (store, id) = seeded().await;
        let envelope = json!({
            "id": "resp_1",
            "output_parsed": {
                "items": [{ "name": "toast", "quantity": 1, "unit": "piece",
                    "macros": { "protein_g": 3, "carbs_g": 15, "fat_g": 1, "calories_kcal": 80 },
                    "confidence": 0.9 }],
                "entry_macros": { "protein_g": 3, "carbs_g": 15, "fat_g": 1, "calories_kcal": 80 },
                "notes": ""
            }
        });
        let normalized = normalize_response(&envelope);

        let outcome = write_completion(&store, id, &normalized, &envelope).await.unwrap();
        assert_eq!(outcome, CompletionOutcome::Applied);

        let entry = store.get(id).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Complete);
        assert_eq!(entry.calories_kcal, Some(80.0));
        assert_eq!(entry.confidence, Some(0.9));
        assert!(entry.processed_at.is_some());
        let audit = entry.model_output.unwrap();
        assert_eq!(audit["raw_json"]["id"], "resp_1");
        assert_eq!(audit["parsed"]["entry_macros"]["carbs_g"], 15);
    }

    #[tokio::test]
    async fn duplicate_delivery_keeps_the_first_values() {
        let (store, id) = seeded().await;
        let envelope = json!({ "output_parsed": { "entry_macros": { "protein_g": 10 } } });
        let normalized = normalize_response(&envelope);

        write_completion(&store, id, &normalized, &envelope).await.unwrap();
        let first = store.get(id).await.unwrap().unwrap();

        let replay = write_completion(&store, id, &normalized, &envelope).await.unwrap();
        assert_eq!(replay, CompletionOutcome::AlreadyTerminal);
        let second = store.get(id).await.unwrap().unwrap();
        assert_eq!(first.protein_g, second.protein_g);
        assert_eq!(first.calories_kcal, second.calories_kcal);
        assert_eq!(first.processed_at, second.processed_at);
    }

    #[tokio::test]
    async fn unusable_output_still_completes_with_zeros() {
        let (store, id) = seeded().await;
        let envelope = json!({ "output_text": "no idea" });
        let normalized = normalize_response(&envelope);

        write_completion(&store, id, &normalized, &envelope).await.unwrap();
        let entry = store.get(id).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Complete);
        assert_eq!(entry.protein_g, Some(0.0));
        assert_eq!(entry.confidence, None);
    }
}
