mod config;
mod records;

pub use config::{Config, ConfigError, DEFAULT_MODEL_KEY};
pub use records::{
    parse_timestamp, DecisionRecord, HistoryRecord, InvalidRewardedDecision, RewardedDecision,
    RewardsRecord, DEFAULT_REWARD_KEY, TYPE_DECISION,
};
