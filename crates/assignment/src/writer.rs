use crate::hooks::Customize;
use anyhow::Context;
use futures::future::try_join_all;
use models::{Config, DecisionRecord, RewardedDecision};
use std::collections::BTreeMap;
use store::ObjectStore;

/// Memoized project -> domain -> model resolution. Instance-scoped: one
/// cache per worker pass, dropped at worker exit. Entries merge; domains
/// per project are few and bounded.
#[derive(Debug, Default)]
struct ModelCache {
    resolved: BTreeMap<String, BTreeMap<String, String>>,
}

impl ModelCache {
    fn resolve(
        &mut self,
        customize: &dyn Customize,
        config: &Config,
        project: &str,
        decision: &DecisionRecord,
    ) -> anyhow::Result<String> {
        // The hook sees the whole action and overrides the static mapping.
        if let Some(model) = customize
            .model_name_for_action(decision)
            .context("model_name_for_action hook failed")?
        {
            return Ok(model);
        }

        let domain = decision.domain.clone().unwrap_or_default();
        let by_domain = self.resolved.entry(project.to_string()).or_default();
        if let Some(model) = by_domain.get(&domain) {
            return Ok(model.clone());
        }

        let model = config
            .model_for_domain(project, decision.domain.as_deref())?
            .to_string();
        by_domain.insert(domain, model.clone());
        Ok(model)
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct WriteStats {
    pub emitted: usize,
    /// Emitted decisions carrying a non-zero reward.
    pub with_reward: usize,
    pub max_reward: Option<f64>,
    pub mean_reward: Option<f64>,
    pub partitions: usize,
}

/// Project each decision onto the output shape, apply the final
/// customization hook, validate, and flush one compressed object per
/// (project, model, shard, date) partition. Any validation or hook
/// failure here is fatal to the whole pass.
pub async fn write_rewarded_decisions(
    store: &dyn ObjectStore,
    customize: &dyn Customize,
    config: &Config,
    project: &str,
    shard: &str,
    decisions: Vec<DecisionRecord>,
) -> anyhow::Result<WriteStats> {
    let mut cache = ModelCache::default();
    let mut partitions: BTreeMap<String, Vec<RewardedDecision>> = BTreeMap::new();

    let mut stats = WriteStats::default();
    let mut reward_sum = 0.0;
    let mut reward_count = 0usize;

    for decision in &decisions {
        let rewarded = customize
            .modify_rewarded_action(project, decision.to_rewarded())
            .context("modify_rewarded_action hook failed")?;
        rewarded.validate()?;

        stats.emitted += 1;
        if let Some(reward) = rewarded.reward {
            if reward != 0.0 {
                stats.with_reward += 1;
            }
            reward_sum += reward;
            reward_count += 1;
            stats.max_reward = Some(stats.max_reward.map_or(reward, |max| max.max(reward)));
        }

        let model = cache.resolve(customize, config, project, decision)?;
        let key = layout::rewarded_decision_key(
            project,
            &model,
            shard,
            decision.timestamp_date.date_naive(),
        );
        partitions.entry(key).or_default().push(rewarded);
    }

    if reward_count != 0 {
        stats.mean_reward = Some(reward_sum / reward_count as f64);
    }
    stats.partitions = partitions.len();

    try_join_all(partitions.iter().map(|(key, rows)| async move {
        let body = store::write_jsonl(rows).await?;
        store.put(key, body).await?;
        anyhow::Ok(())
    }))
    .await?;

    Ok(stats)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hooks::IdentityCustomize;
    use models::parse_timestamp;
    use serde_json::json;

    fn config() -> Config {
        Config::from_slice(
            json!({
                "reward_window_in_seconds": 100,
                "project_names_to_model_names": {
                    "songs": {
                        "default": "songs-base",
                        "playlists": "songs-playlists",
                    },
                },
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap()
    }

    fn decision(message_id: &str, timestamp: &str, domain: Option<&str>) -> DecisionRecord {
        DecisionRecord {
            history_id: "h".to_string(),
            message_id: message_id.to_string(),
            timestamp: timestamp.to_string(),
            timestamp_date: parse_timestamp(timestamp).unwrap(),
            chosen: Some(json!("A")),
            context: None,
            domain: domain.map(str::to_string),
            propensity: None,
            reward_key: None,
            reward: Some(2.0),
        }
    }

    #[tokio::test]
    async fn test_partitioning_by_model_and_date() {
        let store = store::MemoryStore::new();

        let decisions = vec![
            decision("m1", "2024-05-01T10:00:00Z", None),
            decision("m2", "2024-05-01T11:00:00Z", Some("playlists")),
            decision("m3", "2024-05-02T00:00:00Z", Some("radio")), // Falls back.
        ];
        let stats = write_rewarded_decisions(
            &store,
            &IdentityCustomize,
            &config(),
            "songs",
            "0",
            decisions,
        )
        .await
        .unwrap();

        assert_eq!(
            stats,
            WriteStats {
                emitted: 3,
                with_reward: 3,
                max_reward: Some(2.0),
                mean_reward: Some(2.0),
                partitions: 3,
            }
        );
        assert_eq!(
            store.keys(),
            vec![
                "rewarded_decisions/songs/songs-base/0/2024/05/01/decisions.jsonl.gz",
                "rewarded_decisions/songs/songs-base/0/2024/05/02/decisions.jsonl.gz",
                "rewarded_decisions/songs/songs-playlists/0/2024/05/01/decisions.jsonl.gz",
            ]
        );

        // Output rows are the eight-field projection.
        let body = store
            .get("rewarded_decisions/songs/songs-playlists/0/2024/05/01/decisions.jsonl.gz")
            .await
            .unwrap();
        let rows: Vec<serde_json::Value> = store::read_jsonl(body).await.unwrap();
        assert_eq!(
            rows,
            vec![json!({
                "chosen": "A",
                "domain": "playlists",
                "timestamp": "2024-05-01T11:00:00Z",
                "message_id": "m2",
                "history_id": "h",
                "reward": 2.0,
            })]
        );
    }

    #[tokio::test]
    async fn test_invalid_rewarded_decision_is_fatal_to_the_pass() {
        let store = store::MemoryStore::new();

        let mut poisoned = decision("m1", "2024-05-01T10:00:00Z", None);
        poisoned.message_id.clear();

        let result = write_rewarded_decisions(
            &store,
            &IdentityCustomize,
            &config(),
            "songs",
            "0",
            vec![poisoned],
        )
        .await;

        assert!(result.is_err());
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_project_is_fatal() {
        let store = store::MemoryStore::new();
        let result = write_rewarded_decisions(
            &store,
            &IdentityCustomize,
            &config(),
            "stories",
            "0",
            vec![decision("m1", "2024-05-01T10:00:00Z", None)],
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_pass_writes_nothing() {
        let store = store::MemoryStore::new();
        let stats = write_rewarded_decisions(
            &store,
            &IdentityCustomize,
            &config(),
            "songs",
            "0",
            Vec::new(),
        )
        .await
        .unwrap();

        assert_eq!(stats, WriteStats::default());
        assert!(store.keys().is_empty());
    }
}
