//! Reward-assignment core of the training pipeline.
//!
//! Upstream collectors land raw history records (decisions, and reward
//! signals observed later) into per-project, per-shard object partitions,
//! and mark the landed keys as incoming. This crate periodically reprocesses
//! each shard's history, correlates decisions with subsequent rewards inside
//! a per-decision reward window, and emits rewarded decision records into
//! per-model, per-shard, per-date output partitions ready for training.
//!
//! The control flow is two-tier: a single-flight dispatcher inspects every
//! project's shards and fans out a bounded number of workers; each worker
//! owns one (project, shard) pass end to end. See the module docs of
//! `dispatcher` and `worker`.

use std::sync::Arc;

pub mod builder;
pub mod dispatcher;
pub mod hooks;
pub mod listing;
pub mod loader;
pub mod registry;
pub mod worker;
pub mod writer;

pub use dispatcher::{DispatchEvent, SpawnInvoker, WorkerInvoker};
pub use hooks::{Customize, IdentityCustomize};
pub use loader::{IdentityFilter, StaleFilter};
pub use registry::{LoggingResharder, Resharder};
pub use worker::WorkerPayload;

/// Environment-driven operating limits of the pipeline.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Upper bound on worker dispatches per dispatcher invocation (min 1).
    pub worker_count: usize,
    /// Per-shard cool-down between reward-assignment passes.
    pub reprocess_wait: chrono::Duration,
    /// Stale-payload size beyond which a shard escalates to resharding.
    pub max_payload_bytes: u64,
}

impl Settings {
    pub fn new(worker_count: usize, reprocess_wait_seconds: u64, max_payload_mb: u64) -> Self {
        Self {
            worker_count: worker_count.max(1),
            reprocess_wait: chrono::Duration::seconds(reprocess_wait_seconds as i64),
            max_payload_bytes: max_payload_mb << 20,
        }
    }
}

/// Pipeline binds the core to its injected capabilities: the object store,
/// the customization hooks, the external reshard subsystem, and the
/// stale-object selection strategy.
pub struct Pipeline {
    store: Arc<dyn store::ObjectStore>,
    customize: Arc<dyn Customize>,
    config: models::Config,
    resharder: Arc<dyn Resharder>,
    stale_filter: Arc<dyn StaleFilter>,
    settings: Settings,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn store::ObjectStore>,
        customize: Arc<dyn Customize>,
        config: models::Config,
        resharder: Arc<dyn Resharder>,
        stale_filter: Arc<dyn StaleFilter>,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            customize,
            config,
            resharder,
            stale_filter,
            settings,
        }
    }
}
