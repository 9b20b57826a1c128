use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// `type` discriminant of a history record which is itself a decision.
pub const TYPE_DECISION: &str = "decision";
/// Reward key used by decisions which don't name one.
pub const DEFAULT_REWARD_KEY: &str = "reward";

/// HistoryRecord is a raw record landed by upstream collectors.
/// Its shape is loose: aside from the identifying fields, anything goes,
/// and unrecognized fields round-trip through `extra` so that rewriting a
/// record (as consolidation does) never drops content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// RFC 3339 timestamp of the record. Required, but validated only
    /// when the record's conversation group is processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Globally-unique identifier within a shard's live set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Conversation key which groups decisions with later rewards.
    pub history_id: String,
    /// Discriminant: "decision", "rewards", or absent.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Embedded decision records. Must be a sequence when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decisions: Option<Value>,
    /// Mapping of reward-key to a numeric or boolean reward value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewards: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// DecisionRecord is a decision inferred from a history record: either the
/// record itself (via its `type`), an element of its embedded `decisions`,
/// or a record returned by the customization hook. The identifying fields
/// are stamped from the source history record after inference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    #[serde(default)]
    pub history_id: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip)]
    pub timestamp_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propensity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<f64>,
}

impl DecisionRecord {
    /// Reward key which routes rewards to this decision.
    pub fn reward_key(&self) -> &str {
        self.reward_key.as_deref().unwrap_or(DEFAULT_REWARD_KEY)
    }

    /// Project this decision onto the rewarded-decision output shape.
    pub fn to_rewarded(&self) -> RewardedDecision {
        RewardedDecision {
            chosen: self.chosen.clone(),
            context: self.context.clone(),
            domain: self.domain.clone(),
            timestamp: self.timestamp.clone(),
            message_id: self.message_id.clone(),
            history_id: self.history_id.clone(),
            reward: self.reward,
            propensity: self.propensity,
        }
    }
}

/// RewardsRecord is the rewards half of a conversation, derived from a
/// history record by the customization hook and validated by the builder.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardsRecord {
    pub history_id: String,
    pub timestamp: String,
    pub timestamp_date: DateTime<Utc>,
    pub rewards: BTreeMap<String, Value>,
}

/// RewardedDecision is the output record: a fixed eight-field projection of
/// a decision plus its accumulated reward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardedDecision {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub timestamp: String,
    pub message_id: String,
    pub history_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propensity: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidRewardedDecision {
    #[error("rewarded decision has an empty message_id")]
    EmptyMessageId,
    #[error("rewarded decision {message_id:?} has an empty history_id")]
    EmptyHistoryId { message_id: String },
    #[error("rewarded decision {message_id:?} has invalid timestamp {timestamp:?}")]
    Timestamp {
        message_id: String,
        timestamp: String,
        #[source]
        err: chrono::ParseError,
    },
    #[error("rewarded decision {message_id:?} has non-finite reward {reward}")]
    NonFiniteReward { message_id: String, reward: f64 },
}

impl RewardedDecision {
    /// Require that all fields a training consumer depends on are present
    /// and well-formed.
    pub fn validate(&self) -> Result<(), InvalidRewardedDecision> {
        if self.message_id.is_empty() {
            return Err(InvalidRewardedDecision::EmptyMessageId);
        }
        if self.history_id.is_empty() {
            return Err(InvalidRewardedDecision::EmptyHistoryId {
                message_id: self.message_id.clone(),
            });
        }
        if let Err(err) = parse_timestamp(&self.timestamp) {
            return Err(InvalidRewardedDecision::Timestamp {
                message_id: self.message_id.clone(),
                timestamp: self.timestamp.clone(),
                err,
            });
        }
        match self.reward {
            Some(reward) if !reward.is_finite() => Err(InvalidRewardedDecision::NonFiniteReward {
                message_id: self.message_id.clone(),
                reward,
            }),
            _ => Ok(()),
        }
    }
}

/// Parse an RFC 3339 record timestamp into UTC.
pub fn parse_timestamp(ts: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(ts).map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_history_record_round_trips_unknown_fields() {
        let fixture = json!({
            "timestamp": "2024-05-01T00:00:00Z",
            "message_id": "m-1",
            "history_id": "h-1",
            "type": "decision",
            "chosen": {"song": "Marrow of the Spirit"},
            "context": {"hour": 3},
            "domain": "songs",
            "propensity": 0.25,
            "sampling_seed": 42,
        });

        let record: HistoryRecord = serde_json::from_value(fixture.clone()).unwrap();
        assert_eq!(record.kind.as_deref(), Some(TYPE_DECISION));
        assert_eq!(record.extra.get("domain"), Some(&json!("songs")));
        assert_eq!(record.extra.get("sampling_seed"), Some(&json!(42)));

        // Re-serialization preserves every field and value.
        let round = serde_json::to_value(&record).unwrap();
        assert_eq!(round, fixture);
    }

    #[test]
    fn test_decision_record_from_loose_json() {
        let decision: DecisionRecord = serde_json::from_value(json!({
            "chosen": "A",
            "propensity": 0.5,
            "reward_key": "clicks",
            "what_is_this": "ignored",
        }))
        .unwrap();

        assert_eq!(decision.chosen, Some(json!("A")));
        assert_eq!(decision.reward_key(), "clicks");
        assert!(decision.history_id.is_empty()); // Stamped later.

        let decision = DecisionRecord::default();
        assert_eq!(decision.reward_key(), DEFAULT_REWARD_KEY);
    }

    #[test]
    fn test_rewarded_decision_validation() {
        let valid = RewardedDecision {
            chosen: Some(json!("A")),
            context: None,
            domain: None,
            timestamp: "2024-05-01T00:00:00Z".to_string(),
            message_id: "m-1".to_string(),
            history_id: "h-1".to_string(),
            reward: Some(1.5),
            propensity: None,
        };
        () = valid.validate().unwrap();

        let mut invalid = valid.clone();
        invalid.message_id.clear();
        assert!(matches!(
            invalid.validate(),
            Err(InvalidRewardedDecision::EmptyMessageId)
        ));

        let mut invalid = valid.clone();
        invalid.timestamp = "not a timestamp".to_string();
        assert!(matches!(
            invalid.validate(),
            Err(InvalidRewardedDecision::Timestamp { .. })
        ));

        let mut invalid = valid;
        invalid.reward = Some(f64::NAN);
        assert!(matches!(
            invalid.validate(),
            Err(InvalidRewardedDecision::NonFiniteReward { .. })
        ));
    }

    #[test]
    fn test_rewarded_decision_omits_absent_fields() {
        let rewarded = RewardedDecision {
            chosen: None,
            context: None,
            domain: None,
            timestamp: "2024-05-01T00:00:00Z".to_string(),
            message_id: "m-1".to_string(),
            history_id: "h-1".to_string(),
            reward: None,
            propensity: None,
        };
        insta::assert_snapshot!(serde_json::to_string_pretty(&rewarded).unwrap(), @r###"
        {
          "timestamp": "2024-05-01T00:00:00Z",
          "message_id": "m-1",
          "history_id": "h-1"
        }
        "###);
    }
}
