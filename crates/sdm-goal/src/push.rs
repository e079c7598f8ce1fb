// push.rs — The push event and repository identity.
//
// A Push is the unit of work for the delivery machine: one batch of commits
// landing on one branch of one repository. It is immutable once received.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GoalError;

/// Stable identity of a repository.
///
/// The `url` always carries a `scheme://` prefix. Feature observations are
/// keyed by this URL, so the invariant keeps them disjoint from any
/// non-URL key space (such as the `ideal_` prefix).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "RawRepoRef")]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
    pub url: String,
    pub default_branch: String,
}

/// Unvalidated wire form of [`RepoRef`].
#[derive(Deserialize)]
struct RawRepoRef {
    owner: String,
    repo: String,
    url: String,
    #[serde(default = "default_branch")]
    default_branch: String,
}

impl TryFrom<RawRepoRef> for RepoRef {
    type Error = GoalError;

    fn try_from(raw: RawRepoRef) -> Result<Self, Self::Error> {
        let mut repo = RepoRef::new(raw.owner, raw.repo, raw.url)?;
        repo.default_branch = raw.default_branch;
        Ok(repo)
    }
}

fn default_branch() -> String {
    "main".to_string()
}

impl RepoRef {
    /// Create a repository reference. Fails if `url` has no valid scheme.
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        url: impl Into<String>,
    ) -> Result<Self, GoalError> {
        let url = url.into();
        validate_url(&url)?;
        Ok(Self {
            owner: owner.into(),
            repo: repo.into(),
            url,
            default_branch: default_branch(),
        })
    }

    /// Reference to a GitHub-hosted repository.
    pub fn github(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        let owner = owner.into();
        let repo = repo.into();
        let url = format!("https://github.com/{}/{}", owner, repo);
        Self {
            owner,
            repo,
            url,
            default_branch: default_branch(),
        }
    }

    /// Override the default branch.
    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    /// `owner/repo` slug.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

fn validate_url(url: &str) -> Result<(), GoalError> {
    let invalid = |reason: &str| GoalError::InvalidRepoUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| invalid("missing scheme"))?;
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return Err(invalid("scheme must start with a letter")),
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        return Err(invalid("illegal character in scheme"));
    }
    if rest.is_empty() {
        return Err(invalid("empty location"));
    }
    Ok(())
}

/// One commit in a push.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Paths this commit added.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<String>,
}

impl Commit {
    pub fn new(sha: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sha: sha.into(),
            message: message.into(),
            author: None,
            added: Vec::new(),
        }
    }

    pub fn with_added(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.added.extend(paths.into_iter().map(Into::into));
        self
    }
}

/// A batch of commits landing on a branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Push {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub repo: RepoRef,
    pub branch: String,
    #[serde(default)]
    pub commits: Vec<Commit>,
    /// Chat channels linked to the repository.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl Push {
    pub fn new(repo: RepoRef, branch: impl Into<String>, commits: Vec<Commit>) -> Self {
        Self {
            id: Uuid::new_v4(),
            repo,
            branch: branch.into(),
            commits,
            channels: Vec::new(),
            received_at: Utc::now(),
        }
    }

    /// Whether the push targets the repository's default branch.
    pub fn to_default_branch(&self) -> bool {
        self.branch == self.repo.default_branch
    }

    /// Whether any commit in the push added `path`.
    pub fn adds_file(&self, path: &str) -> bool {
        self.commits
            .iter()
            .any(|c| c.added.iter().any(|p| p == path))
    }

    /// The most recent commit, if any.
    pub fn head(&self) -> Option<&Commit> {
        self.commits.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_ref_builds_https_url() {
        let r = RepoRef::github("atomist", "sdm");
        assert_eq!(r.url, "https://github.com/atomist/sdm");
        assert_eq!(r.slug(), "atomist/sdm");
        assert_eq!(r.default_branch, "main");
    }

    #[test]
    fn url_without_scheme_is_rejected() {
        let result = RepoRef::new("o", "r", "github.com/o/r");
        assert!(matches!(result, Err(GoalError::InvalidRepoUrl { .. })));
        let result = RepoRef::new("o", "r", "ideal_license://x");
        assert!(matches!(result, Err(GoalError::InvalidRepoUrl { .. })));
    }

    #[test]
    fn file_and_ssh_urls_are_accepted() {
        assert!(RepoRef::new("o", "r", "file:///tmp/o/r").is_ok());
        assert!(RepoRef::new("o", "r", "git+ssh://host/o/r").is_ok());
    }

    #[test]
    fn deserialization_validates_url() {
        let bad = r#"{"owner":"o","repo":"r","url":"nope"}"#;
        assert!(serde_json::from_str::<RepoRef>(bad).is_err());

        let good = r#"{"owner":"o","repo":"r","url":"https://x/o/r","default_branch":"master"}"#;
        let r: RepoRef = serde_json::from_str(good).unwrap();
        assert_eq!(r.default_branch, "master");
    }

    #[test]
    fn push_to_default_branch() {
        let repo = RepoRef::github("o", "r");
        let push = Push::new(repo.clone(), "main", vec![Commit::new("abc", "fix")]);
        assert!(push.to_default_branch());
        assert_eq!(push.head().unwrap().sha, "abc");

        let push = Push::new(repo, "feature/x", vec![]);
        assert!(!push.to_default_branch());
        assert!(push.head().is_none());
    }

    #[test]
    fn push_json_defaults() {
        let json = r#"{
            "repo": {"owner":"o","repo":"r","url":"https://github.com/o/r"},
            "branch": "main"
        }"#;
        let push: Push = serde_json::from_str(json).unwrap();
        assert!(push.commits.is_empty());
        assert!(push.channels.is_empty());
        assert!(push.to_default_branch());
    }

    #[test]
    fn added_paths_come_from_any_commit() {
        let json = r#"{
            "repo": {"owner":"o","repo":"r","url":"https://github.com/o/r"},
            "branch": "main",
            "commits": [
                {"sha":"1","message":"docs"},
                {"sha":"2","message":"cf","added":["manifest.yml"]}
            ]
        }"#;
        let push: Push = serde_json::from_str(json).unwrap();
        assert!(push.adds_file("manifest.yml"));
        assert!(!push.adds_file("pom.xml"));
        assert!(push.commits[0].added.is_empty());
    }
}
