use std::collections::BTreeSet;
use store::{ObjectMeta, ObjectStore};

/// Enumerate every shard with landed history for `project`, in sorted order.
pub async fn list_all_shards(
    store: &dyn ObjectStore,
    project: &str,
) -> anyhow::Result<Vec<String>> {
    let listed = store.list(&layout::history_prefix(project)).await?;

    let shards: BTreeSet<String> = listed
        .iter()
        .filter_map(|object| layout::shard_of_history_key(&object.key))
        .map(str::to_string)
        .collect();
    Ok(shards.into_iter().collect())
}

/// Enumerate shards of `project` with pending incoming markers, sorted.
pub async fn list_all_incoming_history_shards(
    store: &dyn ObjectStore,
    project: &str,
) -> anyhow::Result<Vec<String>> {
    let listed = store.list(&layout::incoming_prefix(project)).await?;

    let shards: BTreeSet<String> = listed
        .iter()
        .filter_map(|object| layout::shard_of_incoming_key(&object.key))
        .map(str::to_string)
        .collect();
    Ok(shards.into_iter().collect())
}

/// History objects of one shard, with size metadata.
pub async fn list_history_shard_objects(
    store: &dyn ObjectStore,
    project: &str,
    shard: &str,
) -> anyhow::Result<Vec<ObjectMeta>> {
    let mut listed = store
        .list(&layout::history_shard_prefix(project, shard))
        .await?;
    listed.retain(|object| layout::is_history_key(&object.key));
    Ok(listed)
}

/// Incoming marker keys of one shard.
pub async fn list_incoming_shard_keys(
    store: &dyn ObjectStore,
    project: &str,
    shard: &str,
) -> anyhow::Result<Vec<String>> {
    let listed = store
        .list(&layout::incoming_shard_prefix(project, shard))
        .await?;
    Ok(listed.into_iter().map(|object| object.key).collect())
}
