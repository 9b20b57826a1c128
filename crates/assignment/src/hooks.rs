use models::{DecisionRecord, HistoryRecord, RewardedDecision};

/// Customize is the capability interface of the user-supplied customization
/// hooks, called at fixed points of a reward-assignment pass. Hooks are
/// treated as pure transforms, except that any of them may fail; a failure
/// is fatal to the hook's current unit of work (the conversation group, or
/// the whole pass at final projection).
pub trait Customize: Send + Sync {
    /// Model which trains on `action`, overriding the static
    /// project-to-model mapping. Return None to use the mapping.
    fn model_name_for_action(&self, action: &DecisionRecord) -> anyhow::Result<Option<String>>;

    /// Transform the loaded history records of a pass. The result replaces
    /// the loaded records. Timestamps and history ids must not change;
    /// violations surface as per-group errors downstream.
    fn modify_history_records(
        &self,
        project: &str,
        records: Vec<HistoryRecord>,
    ) -> anyhow::Result<Vec<HistoryRecord>>;

    /// Final transform of a rewarded decision, before validation and write.
    fn modify_rewarded_action(
        &self,
        project: &str,
        rewarded: RewardedDecision,
    ) -> anyhow::Result<RewardedDecision>;

    /// Decision records carried by `record`. `inferred` holds the decisions
    /// the core inferred itself (the record, when its type is "decision",
    /// followed by its embedded `decisions`); the returned sequence replaces
    /// it. Identifying fields of returned records are re-stamped from
    /// `record` by the caller.
    fn action_records_from_history_record(
        &self,
        project: &str,
        record: &HistoryRecord,
        inferred: Vec<DecisionRecord>,
    ) -> anyhow::Result<Vec<DecisionRecord>>;

    /// Rewards carried by `record`, or None when it carries none. The
    /// returned record's `rewards` field must be a mapping.
    fn rewards_record_from_history_record(
        &self,
        project: &str,
        record: &HistoryRecord,
    ) -> anyhow::Result<Option<HistoryRecord>>;

    /// Project which an ingestion event belongs to, for hosts which route
    /// raw events rather than explicit payloads.
    fn project_name(&self, event: &serde_json::Value) -> anyhow::Result<Option<String>>;
}

/// The identity customization: each hook is the projection or identity.
/// Sufficient for deployments which don't customize, and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCustomize;

impl Customize for IdentityCustomize {
    fn model_name_for_action(&self, _action: &DecisionRecord) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    fn modify_history_records(
        &self,
        _project: &str,
        records: Vec<HistoryRecord>,
    ) -> anyhow::Result<Vec<HistoryRecord>> {
        Ok(records)
    }

    fn modify_rewarded_action(
        &self,
        _project: &str,
        rewarded: RewardedDecision,
    ) -> anyhow::Result<RewardedDecision> {
        Ok(rewarded)
    }

    fn action_records_from_history_record(
        &self,
        _project: &str,
        _record: &HistoryRecord,
        inferred: Vec<DecisionRecord>,
    ) -> anyhow::Result<Vec<DecisionRecord>> {
        Ok(inferred)
    }

    fn rewards_record_from_history_record(
        &self,
        _project: &str,
        record: &HistoryRecord,
    ) -> anyhow::Result<Option<HistoryRecord>> {
        Ok(record.rewards.is_some().then(|| record.clone()))
    }

    fn project_name(&self, event: &serde_json::Value) -> anyhow::Result<Option<String>> {
        Ok(event
            .get("project_name")
            .and_then(|name| name.as_str())
            .map(str::to_string))
    }
}
