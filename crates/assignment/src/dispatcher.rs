use crate::worker::WorkerPayload;
use crate::{listing, registry, Pipeline};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Input of one dispatcher invocation.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct DispatchEvent {
    /// Process every incoming shard, ignoring cool-downs, the worker
    /// budget, and reshard suppression.
    #[serde(default)]
    pub force_processing: bool,
    /// Ask the reshard subsystem to continue unfinished parent splits.
    #[serde(default)]
    pub force_continue_reshard: bool,
}

/// WorkerInvoker enqueues asynchronous worker invocations. Delivery is
/// fire-and-forget and at-least-once; workers are idempotent.
#[async_trait::async_trait]
pub trait WorkerInvoker: Send + Sync {
    async fn invoke(&self, payload: WorkerPayload) -> anyhow::Result<()>;
}

impl Pipeline {
    /// One dispatcher tick: inspect every project's shards, suppress those
    /// resharding or cooling down, and fan out a bounded number of worker
    /// invocations, oldest-processed shards first.
    ///
    /// The dispatcher is not safe to run concurrently with itself; the
    /// host must guarantee single-flight execution. Workers it fans out
    /// do run in parallel, one shard each.
    pub async fn dispatch_reward_assignment_workers(
        &self,
        event: &DispatchEvent,
        invoker: &dyn WorkerInvoker,
    ) -> anyhow::Result<()> {
        let projects: Vec<&str> = self.config.all_projects().collect();

        futures::future::try_join_all(
            projects
                .into_iter()
                .map(|project| self.dispatch_project(project, event, invoker)),
        )
        .await?;
        Ok(())
    }

    async fn dispatch_project(
        &self,
        project: &str,
        event: &DispatchEvent,
        invoker: &dyn WorkerInvoker,
    ) -> anyhow::Result<()> {
        let (shards, last_processed) = futures::try_join!(
            listing::list_all_shards(self.store.as_ref(), project),
            registry::load_and_consolidate_last_processed(self.store.as_ref(), project),
        )?;

        if shards.is_empty() {
            tracing::debug!(project, "project has no landed history");
            return Ok(());
        }
        let grouped = registry::group_shards(&shards);

        futures::try_join!(
            self.resharder.continue_unfinished(
                project,
                &grouped.parents,
                &grouped.children,
                event.force_continue_reshard,
            ),
            self.dispatch_assign_rewards_if_necessary(
                project,
                &grouped.stable,
                &last_processed,
                event.force_processing,
                invoker,
            ),
        )?;
        Ok(())
    }

    async fn dispatch_assign_rewards_if_necessary(
        &self,
        project: &str,
        stable_shards: &[String],
        last_processed: &BTreeMap<String, DateTime<Utc>>,
        force_processing: bool,
        invoker: &dyn WorkerInvoker,
    ) -> anyhow::Result<()> {
        let incoming =
            listing::list_all_incoming_history_shards(self.store.as_ref(), project).await?;

        let mut pending: Vec<(String, DateTime<Utc>)> = incoming
            .into_iter()
            .map(|shard| {
                let last = last_processed
                    .get(&shard)
                    .copied()
                    .unwrap_or(DateTime::UNIX_EPOCH);
                (shard, last)
            })
            .collect();
        // Never-processed shards sort to the front: no shard starves.
        pending.sort_by(|lhs, rhs| lhs.1.cmp(&rhs.1));

        let stable: BTreeSet<&str> = stable_shards.iter().map(String::as_str).collect();
        let mut remaining_workers = self.settings.worker_count.max(1) as i64;
        let now = Utc::now();

        for (shard, last) in pending {
            if !force_processing {
                if remaining_workers <= 0 {
                    tracing::debug!(project, shard, "worker budget exhausted; deferring shard");
                    continue;
                }
                if !stable.contains(shard.as_str()) {
                    tracing::debug!(project, shard, "shard is resharding; deferring");
                    continue;
                }
                if now - last < self.settings.reprocess_wait {
                    tracing::debug!(project, shard, "shard is cooling down; deferring");
                    continue;
                }
            }
            remaining_workers -= 1;

            // Mark first, then dispatch: pairing the registry write with
            // the enqueue narrows the window in which an overlapping tick
            // could double-fire on this shard.
            let payload = WorkerPayload {
                project_name: project.to_string(),
                shard_id: shard.clone(),
                last_processed_timestamp_updated: true,
            };
            futures::try_join!(
                registry::update_last_processed(self.store.as_ref(), project, &shard),
                invoker.invoke(payload),
            )?;
            tracing::info!(project, shard, "dispatched reward-assignment worker");
        }
        Ok(())
    }
}

/// WorkerInvoker which runs workers in-process on the tokio runtime.
/// Invocations are fire-and-forget from the dispatcher's point of view;
/// call `join` to drain them before process exit.
pub struct SpawnInvoker {
    pipeline: Arc<Pipeline>,
    tasks: tokio::sync::Mutex<tokio::task::JoinSet<()>>,
}

impl SpawnInvoker {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            tasks: tokio::sync::Mutex::new(tokio::task::JoinSet::new()),
        }
    }

    /// Await all workers spawned so far.
    pub async fn join(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                tracing::error!(?err, "reward-assignment worker panicked");
            }
        }
    }
}

#[async_trait::async_trait]
impl WorkerInvoker for SpawnInvoker {
    async fn invoke(&self, payload: WorkerPayload) -> anyhow::Result<()> {
        let pipeline = self.pipeline.clone();
        self.tasks.lock().await.spawn(async move {
            if let Err(err) = pipeline.assign_rewards(&payload).await {
                tracing::error!(
                    error = ?err,
                    project = %payload.project_name,
                    shard = %payload.shard_id,
                    "reward-assignment worker failed"
                );
            }
        });
        Ok(())
    }
}
