use crate::hooks::Customize;
use anyhow::Context;
use futures::future::try_join_all;
use models::HistoryRecord;
use std::collections::HashSet;
use store::{ObjectMeta, ObjectStore};

/// StaleFilter selects which history objects a pass must re-read, given
/// the shard's pending incoming markers.
///
/// The intended refinement is to restrict re-reads to the bounded time
/// region covered by the incoming events; the semantics of that window
/// (how far a landed reward can reach back to its decisions) are not yet
/// settled, so the default reads everything.
pub trait StaleFilter: Send + Sync {
    fn stale_objects(&self, objects: Vec<ObjectMeta>, incoming_keys: &[String]) -> Vec<ObjectMeta>;
}

/// The default stale filter: every history object is stale.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityFilter;

impl StaleFilter for IdentityFilter {
    fn stale_objects(
        &self,
        objects: Vec<ObjectMeta>,
        _incoming_keys: &[String],
    ) -> Vec<ObjectMeta> {
        objects
    }
}

#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub records: Vec<HistoryRecord>,
    /// Records dropped for a missing or already-seen message id.
    pub duplicates: usize,
    /// Date paths whose objects were coalesced into one.
    pub consolidated_paths: usize,
}

/// Load all stale history of a shard: group objects by date path, read
/// each group's objects in parallel, coalesce multi-object date paths
/// into their canonical consolidated object, drop duplicate message ids,
/// and hand the result to the history-records customization hook.
pub async fn load_history(
    store: &dyn ObjectStore,
    customize: &dyn Customize,
    project: &str,
    objects: &[ObjectMeta],
) -> anyhow::Result<LoadOutcome> {
    let groups =
        layout::group_history_keys_by_date_path(objects.iter().map(|object| object.key.clone()));

    let loaded = try_join_all(
        groups
            .iter()
            .map(|(date_path, keys)| load_date_path(store, date_path, keys)),
    )
    .await?;

    let mut outcome = LoadOutcome::default();
    let mut seen = HashSet::new();

    for (records, consolidated) in loaded {
        if consolidated {
            outcome.consolidated_paths += 1;
        }
        for record in records {
            match &record.message_id {
                Some(id) if seen.insert(id.clone()) => outcome.records.push(record),
                _ => outcome.duplicates += 1,
            }
        }
    }

    outcome.records = customize
        .modify_history_records(project, outcome.records)
        .context("modify_history_records hook failed")?;

    Ok(outcome)
}

/// Read one date path's objects and, if there are several, coalesce them:
/// write the loaded records to the canonical consolidated key and delete
/// the originals. Consolidation never alters record contents, so records
/// dropped by this pass's dedup are still preserved in storage.
async fn load_date_path(
    store: &dyn ObjectStore,
    date_path: &str,
    keys: &[String],
) -> anyhow::Result<(Vec<HistoryRecord>, bool)> {
    let bodies = try_join_all(keys.iter().map(|key| store.get(key))).await?;

    let mut records = Vec::new();
    for (key, body) in keys.iter().zip(bodies) {
        let rows: Vec<HistoryRecord> = store::read_jsonl(body)
            .await
            .with_context(|| format!("failed to read history object {key:?}"))?;
        records.extend(rows);
    }

    if keys.len() <= 1 {
        return Ok((records, false));
    }

    let consolidated_key = layout::consolidated_history_key(&keys[0])?;
    let body = store::write_jsonl(&records).await?;
    store.put(&consolidated_key, body).await?;

    let originals: Vec<String> = keys
        .iter()
        .filter(|key| **key != consolidated_key)
        .cloned()
        .collect();
    store.delete(&originals).await?;

    tracing::debug!(date_path, objects = keys.len(), "consolidated history objects");
    Ok((records, true))
}
