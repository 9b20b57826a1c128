use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Domain key which maps a project's otherwise-unmapped domains.
pub const DEFAULT_MODEL_KEY: &str = "default";

/// Config is the static customization document, parsed once at process
/// start and passed to the core by construction. It enumerates the legal
/// projects and their models, and sets the reward window.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Width of the per-decision reward window, in seconds.
    pub reward_window_in_seconds: u64,
    /// project -> domain -> model. Every project must be present here;
    /// a domain of "default" is the fallback for unmapped domains.
    pub project_names_to_model_names: BTreeMap<String, BTreeMap<String, String>>,
    /// Per-project hyperparameter overrides (e.g. max_age, objective),
    /// consumed downstream of this pipeline and passed through opaquely.
    #[serde(default)]
    pub hyperparameters: BTreeMap<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("project {0:?} is not configured")]
    UnknownProject(String),
    #[error("project {project:?} maps neither domain {domain:?} nor \"default\"")]
    NoModelForDomain { project: String, domain: String },
}

impl Config {
    pub fn from_slice(doc: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(doc)
    }

    /// Enumerate configured projects, in sorted order.
    pub fn all_projects(&self) -> impl Iterator<Item = &str> {
        self.project_names_to_model_names.keys().map(String::as_str)
    }

    pub fn reward_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reward_window_in_seconds as i64)
    }

    /// Resolve the model which trains on decisions of `domain`, falling
    /// back to the project's default model for unmapped domains.
    pub fn model_for_domain(
        &self,
        project: &str,
        domain: Option<&str>,
    ) -> Result<&str, ConfigError> {
        let models = self
            .project_names_to_model_names
            .get(project)
            .ok_or_else(|| ConfigError::UnknownProject(project.to_string()))?;

        domain
            .and_then(|domain| models.get(domain))
            .or_else(|| models.get(DEFAULT_MODEL_KEY))
            .map(String::as_str)
            .ok_or_else(|| ConfigError::NoModelForDomain {
                project: project.to_string(),
                domain: domain.unwrap_or(DEFAULT_MODEL_KEY).to_string(),
            })
    }
}
