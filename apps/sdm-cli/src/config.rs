// config.rs — SdmConfig: .sdm/sdm.toml, with every field optional.
//
// Relative paths are resolved against the project root, so the default
// layout is:
//
//   <root>/.sdm/sdm.toml         this file
//   <root>/.sdm/store/           feature store (one JSON file per key)
//   <root>/.sdm/events.jsonl     lifecycle events
//   <root>/.sdm/outbox.jsonl     rollout offers waiting for delivery
//   <root>/repos/<owner>/<repo>  checked-out repositories

use std::path::{Path, PathBuf};

use anyhow::Context;
use sdm_goal::{DeploymentStatusManager, RepoRef};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdmConfig {
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    #[serde(default = "default_events_log")]
    pub events_log: PathBuf,

    #[serde(default = "default_outbox")]
    pub outbox: PathBuf,

    /// Directory holding `<owner>/<repo>` checkouts.
    #[serde(default = "default_repos_root")]
    pub repos_root: PathBuf,

    /// Prefix for discovered repository URLs.
    #[serde(default = "default_url_base")]
    pub url_base: String,

    #[serde(default)]
    pub deploy: DeployConfig,

    #[serde(default)]
    pub rollout: RolloutConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Freeze all deployments.
    #[serde(default)]
    pub frozen: bool,

    /// Shown when explaining the freeze.
    pub note: Option<String>,

    /// `owner/repo` slugs with deployment enabled.
    #[serde(default)]
    pub enabled_repos: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutConfig {
    /// Run the push-impact rollout on `sdm push`.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".sdm/store")
}

fn default_events_log() -> PathBuf {
    PathBuf::from(".sdm/events.jsonl")
}

fn default_outbox() -> PathBuf {
    PathBuf::from(".sdm/outbox.jsonl")
}

fn default_repos_root() -> PathBuf {
    PathBuf::from("repos")
}

fn default_url_base() -> String {
    "https://github.com".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for SdmConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            events_log: default_events_log(),
            outbox: default_outbox(),
            repos_root: default_repos_root(),
            url_base: default_url_base(),
            deploy: DeployConfig::default(),
            rollout: RolloutConfig::default(),
        }
    }
}

impl SdmConfig {
    pub fn config_path(project_root: &Path) -> PathBuf {
        project_root.join(".sdm").join("sdm.toml")
    }

    /// Parse a config file. Paths are returned as written.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Config for a project: `.sdm/sdm.toml` if present, else defaults, with
    /// every path resolved against `project_root`.
    pub fn for_project(project_root: &Path) -> anyhow::Result<Self> {
        let path = Self::config_path(project_root);
        let config = if path.exists() {
            Self::load(&path)?
        } else {
            Self::default()
        };
        Ok(config.rooted_at(project_root))
    }

    fn rooted_at(mut self, root: &Path) -> Self {
        self.store_dir = root.join(&self.store_dir);
        self.events_log = root.join(&self.events_log);
        self.outbox = root.join(&self.outbox);
        self.repos_root = root.join(&self.repos_root);
        self
    }

    /// Deployment status seeded from `[deploy]`. Used until `sdm deploy`
    /// first saves a state to the store.
    pub fn deployments(&self) -> anyhow::Result<DeploymentStatusManager> {
        let deployments = DeploymentStatusManager::new();
        if self.deploy.frozen {
            let note = self
                .deploy
                .note
                .clone()
                .unwrap_or_else(|| "Deployments are frozen".to_string());
            deployments.freeze(note)?;
        }
        for slug in &self.deploy.enabled_repos {
            let (owner, repo) = slug
                .split_once('/')
                .with_context(|| format!("enabled_repos entry '{}' is not owner/repo", slug))?;
            let url = format!("{}/{}", self.url_base.trim_end_matches('/'), slug);
            deployments.enable_deploy(&RepoRef::new(owner, repo, url)?)?;
        }
        Ok(deployments)
    }
}
