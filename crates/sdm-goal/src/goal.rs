// goal.rs — Goals and goal sets.
//
// A Goal is one named unit of delivery work (build, inspect, deploy...).
// A GoalSet groups goals under a name and may declare that it runs "after"
// other goal sets or goals. Whether an "after" name refers to a set or a
// goal is decided at resolution time against what actually matched.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named unit of delivery-pipeline work. Identity is the `key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub key: String,
    pub description: String,
    /// Optional guidance shown to users (e.g. for suggested-action goals).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl PartialEq for Goal {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Goal {}

impl std::hash::Hash for Goal {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

impl Goal {
    pub fn new(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            detail: None,
            link: None,
        }
    }

    // Well-known goals.

    pub fn autofix() -> Self {
        Goal::new("autofix", "Apply autofixes")
    }

    pub fn code_inspection() -> Self {
        Goal::new("code-inspection", "Run code inspections")
    }

    pub fn push_impact() -> Self {
        Goal::new("push-impact", "React to push impact")
    }

    pub fn fingerprint() -> Self {
        Goal::new("fingerprint", "Compute fingerprints")
    }

    pub fn build() -> Self {
        Goal::new("build", "Build")
    }

    pub fn artifact() -> Self {
        Goal::new("artifact", "Store artifact")
    }

    pub fn staging_deploy() -> Self {
        Goal::new("staging-deploy", "Deploy to staging")
    }

    pub fn staging_endpoint() -> Self {
        Goal::new("staging-endpoint", "Locate staging endpoint")
    }

    pub fn staging_verified() -> Self {
        Goal::new("staging-verified", "Verify staging deployment")
    }

    pub fn production_deploy() -> Self {
        Goal::new("production-deploy", "Deploy to production")
    }

    pub fn explain_deployment_freeze() -> Self {
        Goal::new(
            "explain-deployment-freeze",
            "Explain that deployment is frozen",
        )
    }

    /// A goal that only tells the user what they could do next.
    pub fn suggested_action(
        key: impl Into<String>,
        message: impl Into<String>,
        link: impl Into<String>,
    ) -> Self {
        let key = key.into();
        Self {
            description: format!("Suggested action: {}", key),
            key,
            detail: Some(message.into()),
            link: Some(link.into()),
        }
    }
}

/// An ordered, named collection of goals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoalSet {
    pub name: String,
    pub goals: Vec<Goal>,
    /// Names of goal sets or goal keys this set runs after.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<String>,
}

impl GoalSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            goals: Vec::new(),
            after: Vec::new(),
        }
    }

    /// Append goals to the set, in order.
    pub fn plan(mut self, goals: impl IntoIterator<Item = Goal>) -> Self {
        self.goals.extend(goals);
        self
    }

    /// Declare that this set runs after the named goal set or goal.
    pub fn after(mut self, name: impl Into<String>) -> Self {
        self.after.push(name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.goals.iter().any(|g| g.key == key)
    }
}
