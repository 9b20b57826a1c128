use crate::hooks::Customize;
use chrono::{DateTime, Utc};
use models::{parse_timestamp, DecisionRecord, HistoryRecord, RewardsRecord, TYPE_DECISION};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Errors which poison a single conversation group. The group is abandoned
/// and the pass continues with the remaining groups.
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("record {message_id:?} has a missing or invalid timestamp")]
    InvalidTimestamp { message_id: Option<String> },
    #[error("record has a missing or empty message_id")]
    InvalidMessageId,
    #[error("`decisions` of record {message_id:?} is not a sequence")]
    DecisionsNotASequence { message_id: String },
    #[error("record {message_id:?} carries a malformed decision")]
    MalformedDecision {
        message_id: String,
        #[source]
        err: serde_json::Error,
    },
    #[error("`rewards` of record {message_id:?} is not a mapping")]
    RewardsNotAMapping { message_id: String },
    #[error("reward under key {reward_key:?} is not a number or boolean")]
    RewardNotNumeric { reward_key: String },
    #[error("inferred decision names history id {returned:?}, but its group is {expected:?}")]
    HistoryIdMismatch { expected: String, returned: String },
    #[error("customization hook failed")]
    Hook(#[source] anyhow::Error),
}

/// Result of building all groups of a pass.
#[derive(Debug, Default)]
pub struct BuildOutcome {
    pub decisions: Vec<DecisionRecord>,
    /// Conversation groups abandoned due to a GroupError.
    pub abandoned_groups: usize,
}

/// Group history records by conversation and, per group, expand them into
/// decision and rewards records and run the temporal reward join. A
/// poisoned group is logged and abandoned without stopping the shard.
pub fn build_rewarded_decisions(
    customize: &dyn Customize,
    project: &str,
    reward_window: chrono::Duration,
    records: Vec<HistoryRecord>,
) -> BuildOutcome {
    let mut groups: BTreeMap<String, Vec<HistoryRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.history_id.clone())
            .or_default()
            .push(record);
    }

    let mut outcome = BuildOutcome::default();
    for (history_id, group) in groups {
        match build_group(customize, project, reward_window, &history_id, &group) {
            Ok(decisions) => outcome.decisions.extend(decisions),
            Err(err) => {
                tracing::warn!(%history_id, error = %err, "abandoning conversation group");
                outcome.abandoned_groups += 1;
            }
        }
    }
    outcome
}

fn build_group(
    customize: &dyn Customize,
    project: &str,
    reward_window: chrono::Duration,
    history_id: &str,
    records: &[HistoryRecord],
) -> Result<Vec<DecisionRecord>, GroupError> {
    let mut decisions = Vec::new();
    let mut rewards = Vec::new();

    for record in records {
        let Some(raw_timestamp) = record.timestamp.as_deref() else {
            return Err(GroupError::InvalidTimestamp {
                message_id: record.message_id.clone(),
            });
        };
        let Ok(timestamp_date) = parse_timestamp(raw_timestamp) else {
            return Err(GroupError::InvalidTimestamp {
                message_id: record.message_id.clone(),
            });
        };
        let message_id = match record.message_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => return Err(GroupError::InvalidMessageId),
        };

        // Infer the record's decisions: the record itself when typed as
        // one, then any embedded `decisions` elements, in order.
        let mut inferred = Vec::new();
        if record.kind.as_deref() == Some(TYPE_DECISION) {
            inferred.push(decision_from_fields(
                Value::Object(record.extra.clone().into_iter().collect()),
                message_id,
            )?);
        }
        if let Some(embedded) = &record.decisions {
            let Value::Array(embedded) = embedded else {
                return Err(GroupError::DecisionsNotASequence {
                    message_id: message_id.to_string(),
                });
            };
            for element in embedded {
                inferred.push(decision_from_fields(element.clone(), message_id)?);
            }
        }

        let returned = customize
            .action_records_from_history_record(project, record, inferred)
            .map_err(GroupError::Hook)?;

        for (index, mut decision) in returned.into_iter().enumerate() {
            // A hook may not move a decision to another conversation.
            if !decision.history_id.is_empty() && decision.history_id != history_id {
                return Err(GroupError::HistoryIdMismatch {
                    expected: history_id.to_string(),
                    returned: decision.history_id,
                });
            }
            decision.history_id = history_id.to_string();
            decision.timestamp = raw_timestamp.to_string();
            decision.timestamp_date = timestamp_date;
            decision.message_id = if index == 0 {
                message_id.to_string()
            } else {
                format!("{message_id}-{index}")
            };
            decision.reward = None; // Accumulation starts absent.
            decisions.push(decision);
        }

        let maybe_rewards = customize
            .rewards_record_from_history_record(project, record)
            .map_err(GroupError::Hook)?;

        if let Some(rewards_record) = maybe_rewards {
            let Some(Value::Object(map)) = rewards_record.rewards else {
                return Err(GroupError::RewardsNotAMapping {
                    message_id: message_id.to_string(),
                });
            };
            rewards.push(RewardsRecord {
                history_id: history_id.to_string(),
                timestamp: raw_timestamp.to_string(),
                timestamp_date,
                rewards: map.into_iter().collect(),
            });
        }
    }

    assign_rewards_to_group(decisions, rewards, reward_window)
}

fn decision_from_fields(fields: Value, message_id: &str) -> Result<DecisionRecord, GroupError> {
    serde_json::from_value(fields).map_err(|err| GroupError::MalformedDecision {
        message_id: message_id.to_string(),
        err,
    })
}

/// The single-pass temporal join: walk decisions and rewards of one
/// conversation in time order, routing each reward to the still-live
/// decisions listening on its reward key.
///
/// Each decision listens from its timestamp until the end of its reward
/// window `[t, t+W)`. Because the walk is time-ordered, a listener whose
/// window has closed can never be credited again and is dropped on sight,
/// which keeps the cost of a reward proportional to its live listeners.
fn assign_rewards_to_group(
    mut decisions: Vec<DecisionRecord>,
    rewards: Vec<RewardsRecord>,
    reward_window: chrono::Duration,
) -> Result<Vec<DecisionRecord>, GroupError> {
    if rewards.is_empty() {
        return Ok(decisions);
    }

    enum Item {
        Decision(usize),
        Rewards(usize),
    }

    let mut merged: Vec<(DateTime<Utc>, Item)> =
        Vec::with_capacity(decisions.len() + rewards.len());
    merged.extend(
        decisions
            .iter()
            .enumerate()
            .map(|(index, decision)| (decision.timestamp_date, Item::Decision(index))),
    );
    merged.extend(
        rewards
            .iter()
            .enumerate()
            .map(|(index, record)| (record.timestamp_date, Item::Rewards(index))),
    );
    // Stable: a decision precedes rewards landing at the same instant.
    merged.sort_by_key(|(timestamp, _)| *timestamp);

    let mut window_ends = vec![DateTime::<Utc>::MIN_UTC; decisions.len()];
    let mut listeners_by_key: HashMap<String, Vec<usize>> = HashMap::new();

    for (timestamp, item) in merged {
        match item {
            Item::Decision(index) => {
                window_ends[index] = timestamp + reward_window;
                listeners_by_key
                    .entry(decisions[index].reward_key().to_string())
                    .or_default()
                    .push(index);
            }
            Item::Rewards(index) => {
                for (reward_key, value) in &rewards[index].rewards {
                    let Some(listeners) = listeners_by_key.get_mut(reward_key) else {
                        continue;
                    };
                    // Reverse iteration keeps in-place removal safe.
                    for slot in (0..listeners.len()).rev() {
                        let decision_index = listeners[slot];
                        // A reward at exactly the window end falls outside
                        // the half-open window.
                        if window_ends[decision_index] <= timestamp {
                            listeners.remove(slot);
                        } else {
                            let value = coerce_reward(reward_key, value)?;
                            *decisions[decision_index].reward.get_or_insert(0.0) += value;
                        }
                    }
                }
            }
        }
    }
    Ok(decisions)
}

fn coerce_reward(reward_key: &str, value: &Value) -> Result<f64, GroupError> {
    match value {
        Value::Bool(value) => Ok(if *value { 1.0 } else { 0.0 }),
        Value::Number(number) => number.as_f64().ok_or_else(|| GroupError::RewardNotNumeric {
            reward_key: reward_key.to_string(),
        }),
        _ => Err(GroupError::RewardNotNumeric {
            reward_key: reward_key.to_string(),
        }),
    }
}
