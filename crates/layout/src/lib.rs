//! Pure mapping between logical identifiers (project, shard, history id,
//! date) and object-store keys. Nothing in this crate performs I/O; listing
//! and storage live with the store adapter.
//!
//! The layout, with all components `/`-separated:
//!
//!   history/<project>/<shard>/<YYYY>/<MM>/<DD>/<object>.jsonl.gz
//!   incoming/<project>/<shard>/<marker>.json
//!   registry/<project>/<shard>.json
//!   rewarded_decisions/<project>/<model>/<shard>/<YYYY>/<MM>/<DD>/decisions.jsonl.gz

use chrono::NaiveDate;
use std::collections::BTreeMap;

pub const HISTORY_PREFIX: &str = "history";
pub const INCOMING_PREFIX: &str = "incoming";
pub const REWARDED_PREFIX: &str = "rewarded_decisions";
pub const REGISTRY_PREFIX: &str = "registry";

/// Suffix of every compressed-JSONL object.
pub const JSONL_GZ_SUFFIX: &str = ".jsonl.gz";
/// Canonical object name a date path's objects coalesce into.
pub const CONSOLIDATED_OBJECT: &str = "consolidated.jsonl.gz";
/// Object name of a rewarded-decision output partition.
const REWARDED_OBJECT: &str = "decisions.jsonl.gz";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0:?} is not a history object key")]
    NotAHistoryKey(String),
}

/// Components of a parsed history object key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryKey<'k> {
    pub project: &'k str,
    pub shard: &'k str,
    /// Calendar bucket of the object, as "YYYY/MM/DD".
    pub date_path: &'k str,
    /// Object file name, including its suffix.
    pub object: &'k str,
}

/// Body of an incoming marker: the history key needing (re)processing.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IncomingMarker {
    pub key: String,
}

lazy_static::lazy_static! {
    static ref HISTORY_KEY_RE: regex::Regex = regex::Regex::new(
        r"^history/[^/]+/[^/]+/\d{4}/\d{2}/\d{2}/[^/]+\.jsonl\.gz$"
    ).expect("history key pattern must parse");
}

pub fn history_prefix(project: &str) -> String {
    format!("{HISTORY_PREFIX}/{project}/")
}

pub fn history_shard_prefix(project: &str, shard: &str) -> String {
    format!("{HISTORY_PREFIX}/{project}/{shard}/")
}

pub fn history_key(project: &str, shard: &str, date: NaiveDate, object: &str) -> String {
    format!(
        "{HISTORY_PREFIX}/{project}/{shard}/{}/{object}{JSONL_GZ_SUFFIX}",
        date.format("%Y/%m/%d")
    )
}

pub fn incoming_prefix(project: &str) -> String {
    format!("{INCOMING_PREFIX}/{project}/")
}

pub fn incoming_shard_prefix(project: &str, shard: &str) -> String {
    format!("{INCOMING_PREFIX}/{project}/{shard}/")
}

pub fn registry_prefix(project: &str) -> String {
    format!("{REGISTRY_PREFIX}/{project}/")
}

pub fn registry_key(project: &str, shard: &str) -> String {
    format!("{REGISTRY_PREFIX}/{project}/{shard}.json")
}

/// True if `key` names a history object (and not, say, a marker or a
/// stray object under the history prefix).
pub fn is_history_key(key: &str) -> bool {
    HISTORY_KEY_RE.is_match(key)
}

pub fn parse_history_key(key: &str) -> Result<HistoryKey<'_>, Error> {
    if !is_history_key(key) {
        return Err(Error::NotAHistoryKey(key.to_string()));
    }
    // history / project / shard / YYYY / MM / DD / object
    let parts: Vec<&str> = key.splitn(7, '/').collect();

    let date_len = "YYYY/MM/DD".len();
    let tail_start = key.len() - parts[6].len();
    let date_path = &key[tail_start - date_len - 1..tail_start - 1];

    Ok(HistoryKey {
        project: parts[1],
        shard: parts[2],
        date_path,
        object: parts[6],
    })
}

/// Shard component of a history object key, if it has one.
pub fn shard_of_history_key(key: &str) -> Option<&str> {
    match parse_history_key(key) {
        Ok(parsed) => Some(parsed.shard),
        Err(_) => None,
    }
}

/// Shard component of an incoming marker key, if it has one.
pub fn shard_of_incoming_key(key: &str) -> Option<&str> {
    let mut parts = key.splitn(4, '/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(INCOMING_PREFIX), Some(_project), Some(shard), Some(marker))
            if !shard.is_empty() && !marker.contains('/') =>
        {
            Some(shard)
        }
        _ => None,
    }
}

/// Group history keys by their calendar-date path. Keys under the same
/// date path are consolidation candidates. Non-history keys are dropped.
pub fn group_history_keys_by_date_path<I>(keys: I) -> BTreeMap<String, Vec<String>>
where
    I: IntoIterator<Item = String>,
{
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for key in keys {
        if let Ok(parsed) = parse_history_key(&key) {
            groups.entry(parsed.date_path.to_string()).or_default().push(key);
        }
    }
    groups
}

/// Canonical key which a date path's many objects consolidate into.
/// Any member of the group derives the same consolidated key.
pub fn consolidated_history_key(key: &str) -> Result<String, Error> {
    let parsed = parse_history_key(key)?;
    Ok(format!(
        "{HISTORY_PREFIX}/{}/{}/{}/{CONSOLIDATED_OBJECT}",
        parsed.project, parsed.shard, parsed.date_path,
    ))
}

/// Marker key whose presence signals that `history_key` needs processing.
/// The mapping is injective: the date path is flattened into the marker
/// name with fixed-width date components.
pub fn incoming_history_key(history_key: &str) -> Result<String, Error> {
    let parsed = parse_history_key(history_key)?;
    let stem = parsed
        .object
        .strip_suffix(JSONL_GZ_SUFFIX)
        .unwrap_or(parsed.object);
    Ok(format!(
        "{INCOMING_PREFIX}/{}/{}/{}-{stem}.json",
        parsed.project,
        parsed.shard,
        parsed.date_path.replace('/', "-"),
    ))
}

/// Output key for rewarded decisions. A pure function of its coordinates:
/// two records with identical coordinates always collate into one object.
pub fn rewarded_decision_key(project: &str, model: &str, shard: &str, date: NaiveDate) -> String {
    format!(
        "{REWARDED_PREFIX}/{project}/{model}/{shard}/{}/{REWARDED_OBJECT}",
        date.format("%Y/%m/%d")
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_history_key_round_trip() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let key = history_key("songs", "01", date, "a1b2");
        assert_eq!(key, "history/songs/01/2024/05/01/a1b2.jsonl.gz");

        assert!(is_history_key(&key));
        let parsed = parse_history_key(&key).unwrap();
        assert_eq!(parsed.project, "songs");
        assert_eq!(parsed.shard, "01");
        assert_eq!(parsed.date_path, "2024/05/01");
        assert_eq!(parsed.object, "a1b2.jsonl.gz");
    }

    #[test]
    fn test_non_history_keys_are_rejected() {
        for key in [
            "history/songs/01/2024/05/01/a1b2.jsonl", // Wrong suffix.
            "history/songs/01/2024/5/1/a1b2.jsonl.gz", // Non-padded date.
            "history/songs/2024/05/01/a1b2.jsonl.gz", // Missing shard.
            "incoming/songs/01/2024-05-01-a1b2.json",
            "rewarded_decisions/songs/m/01/2024/05/01/decisions.jsonl.gz",
        ] {
            assert!(!is_history_key(key), "{key}");
            assert!(parse_history_key(key).is_err(), "{key}");
        }
    }

    #[test]
    fn test_group_by_date_path() {
        let date1 = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let date2 = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let groups = group_history_keys_by_date_path(vec![
            history_key("songs", "0", date1, "b"),
            history_key("songs", "0", date2, "c"),
            history_key("songs", "0", date1, "a"),
            "registry/songs/0.json".to_string(), // Dropped.
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups["2024/05/01"].len(), 2);
        assert_eq!(groups["2024/05/02"].len(), 1);
    }

    #[test]
    fn test_consolidated_key_is_stable_across_group_members() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let one = history_key("songs", "0", date, "a");
        let two = history_key("songs", "0", date, "b");

        let consolidated = consolidated_history_key(&one).unwrap();
        assert_eq!(consolidated, consolidated_history_key(&two).unwrap());
        assert_eq!(consolidated, "history/songs/0/2024/05/01/consolidated.jsonl.gz");
        // Consolidating a consolidated object is a fixed point.
        assert_eq!(consolidated, consolidated_history_key(&consolidated).unwrap());
    }

    #[test]
    fn test_incoming_marker_key() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let key = history_key("songs", "0", date, "a1b2");
        assert_eq!(
            incoming_history_key(&key).unwrap(),
            "incoming/songs/0/2024-05-01-a1b2.json"
        );
        assert_eq!(
            serde_json::to_value(IncomingMarker { key: key.clone() }).unwrap(),
            serde_json::json!({"key": "history/songs/0/2024/05/01/a1b2.jsonl.gz"})
        );
        assert_eq!(
            shard_of_incoming_key("incoming/songs/0/2024-05-01-a1b2.json"),
            Some("0")
        );
        assert_eq!(shard_of_incoming_key("incoming/songs/0"), None);
        assert_eq!(shard_of_incoming_key("history/songs/0/marker.json"), None);
    }

    #[test]
    fn test_rewarded_decision_key_is_pure() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let key = rewarded_decision_key("songs", "songs-base", "01", date);
        assert_eq!(
            key,
            "rewarded_decisions/songs/songs-base/01/2024/05/01/decisions.jsonl.gz"
        );
        assert_eq!(key, rewarded_decision_key("songs", "songs-base", "01", date));
    }
}
