use crate::{builder, listing, loader, registry, writer, Pipeline};
use serde::{Deserialize, Serialize};

/// Input of one worker invocation, as enqueued by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPayload {
    pub project_name: String,
    pub shard_id: String,
    /// True when the dispatcher already marked the shard's last-processed
    /// timestamp as part of its mark-then-dispatch step.
    #[serde(default)]
    pub last_processed_timestamp_updated: bool,
}

impl Pipeline {
    /// One reward-assignment pass over a single (project, shard).
    ///
    /// Deleting the shard's incoming markers is strictly the last step:
    /// any earlier failure leaves them in place, and the next dispatch
    /// retries the shard. Combined with message-id dedup in the loader,
    /// this makes the worker idempotent under at-least-once invocation.
    #[tracing::instrument(
        skip_all,
        fields(project = %payload.project_name, shard = %payload.shard_id)
    )]
    pub async fn assign_rewards(&self, payload: &WorkerPayload) -> anyhow::Result<()> {
        anyhow::ensure!(
            !payload.project_name.is_empty(),
            "worker payload is missing project_name"
        );
        anyhow::ensure!(
            !payload.shard_id.is_empty(),
            "worker payload is missing shard_id"
        );
        let (project, shard) = (payload.project_name.as_str(), payload.shard_id.as_str());

        if !payload.last_processed_timestamp_updated {
            registry::update_last_processed(self.store.as_ref(), project, shard).await?;
        }

        let (objects, incoming_keys) = futures::try_join!(
            listing::list_history_shard_objects(self.store.as_ref(), project, shard),
            listing::list_incoming_shard_keys(self.store.as_ref(), project, shard),
        )?;

        let stale = self.stale_filter.stale_objects(objects, &incoming_keys);
        let stale_bytes: u64 = stale.iter().map(|object| object.size).sum();

        if stale_bytes > self.settings.max_payload_bytes {
            tracing::warn!(
                stale_bytes,
                limit_bytes = self.settings.max_payload_bytes,
                "stale payload exceeds the worker limit; escalating to reshard"
            );
            self.resharder.reshard(project, shard).await?;
            return Ok(());
        }

        let loaded =
            loader::load_history(self.store.as_ref(), self.customize.as_ref(), project, &stale)
                .await?;
        let built = builder::build_rewarded_decisions(
            self.customize.as_ref(),
            project,
            self.config.reward_window(),
            loaded.records,
        );
        let stats = writer::write_rewarded_decisions(
            self.store.as_ref(),
            self.customize.as_ref(),
            &self.config,
            project,
            shard,
            built.decisions,
        )
        .await?;

        self.store.delete(&incoming_keys).await?;

        tracing::info!(
            emitted = stats.emitted,
            with_reward = stats.with_reward,
            max_reward = stats.max_reward,
            mean_reward = stats.mean_reward,
            partitions = stats.partitions,
            duplicates = loaded.duplicates,
            consolidated_paths = loaded.consolidated_paths,
            abandoned_groups = built.abandoned_groups,
            consumed_markers = incoming_keys.len(),
            "assigned rewards"
        );
        Ok(())
    }
}
