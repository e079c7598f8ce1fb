// events.rs — Delivery machine events and notification dispatch.
//
// The resolver's callers and the rollout engine emit events at key points:
// a goal plan was resolved, a feature's ideal was raised, a rollout offer
// was sent or skipped. Notification sinks (JSONL log, chat bridges, tests)
// subscribe to them.
//
// Dispatch is synchronous. A failing sink is logged and never stops
// delivery to the other sinks.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GoalError;
use crate::push::RepoRef;
use crate::resolver::Resolution;

/// Events emitted by the delivery machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum SdmEvent {
    /// A push was resolved to a goal plan.
    GoalsPlanned {
        push_id: Uuid,
        repo: String,
        goals: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A push matched no contribution.
    NoGoals {
        push_id: Uuid,
        repo: String,
        timestamp: DateTime<Utc>,
    },

    /// A push raised the ideal value of a feature.
    IdealRaised {
        feature: String,
        repo: String,
        previous_sha: String,
        ideal_sha: String,
        timestamp: DateTime<Utc>,
    },

    /// A rollout offer was sent to a lagging repository.
    RolloutOffered {
        feature: String,
        repo: String,
        command: String,
        timestamp: DateTime<Utc>,
    },

    /// A repository was skipped during a rollout sweep.
    RolloutSkipped {
        feature: String,
        repo: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl SdmEvent {
    /// Get the event type name as a string.
    pub fn event_type(&self) -> &str {
        match self {
            SdmEvent::GoalsPlanned { .. } => "goals_planned",
            SdmEvent::NoGoals { .. } => "no_goals",
            SdmEvent::IdealRaised { .. } => "ideal_raised",
            SdmEvent::RolloutOffered { .. } => "rollout_offered",
            SdmEvent::RolloutSkipped { .. } => "rollout_skipped",
        }
    }

    /// Event describing the outcome of resolving a push.
    pub fn resolved(push_id: Uuid, repo: &RepoRef, resolution: &Resolution) -> Self {
        match resolution {
            Resolution::NoGoals => SdmEvent::NoGoals {
                push_id,
                repo: repo.slug(),
                timestamp: Utc::now(),
            },
            Resolution::Planned(plan) => SdmEvent::GoalsPlanned {
                push_id,
                repo: repo.slug(),
                goals: plan.keys().into_iter().map(str::to_string).collect(),
                timestamp: Utc::now(),
            },
        }
    }

    pub fn ideal_raised(feature: &str, repo: &RepoRef, previous_sha: &str, ideal_sha: &str) -> Self {
        SdmEvent::IdealRaised {
            feature: feature.to_string(),
            repo: repo.slug(),
            previous_sha: previous_sha.to_string(),
            ideal_sha: ideal_sha.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn rollout_offered(feature: &str, repo: &RepoRef, command: &str) -> Self {
        SdmEvent::RolloutOffered {
            feature: feature.to_string(),
            repo: repo.slug(),
            command: command.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn rollout_skipped(feature: &str, repo: &RepoRef, reason: impl Into<String>) -> Self {
        SdmEvent::RolloutSkipped {
            feature: feature.to_string(),
            repo: repo.slug(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Receives delivery machine events.
pub trait NotificationSink: Send + Sync {
    /// Short name used when reporting a failed delivery.
    fn name(&self) -> &str {
        "sink"
    }

    fn send(&self, event: &SdmEvent) -> Result<(), GoalError>;
}

/// Appends each event to a file as one JSON line.
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)
    }
}

impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "jsonl-log"
    }

    fn send(&self, event: &SdmEvent) -> Result<(), GoalError> {
        let line = serde_json::to_string(event)?;
        self.append_line(&line).map_err(|source| GoalError::IoError {
            path: self.path.display().to_string(),
            source,
        })
    }
}

/// Fans each event out to every registered sink, in registration order.
#[derive(Default)]
pub struct EventDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Box<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Deliver `event` to every sink. Returns how many sinks accepted it.
    pub fn dispatch(&self, event: &SdmEvent) -> usize {
        self.sinks
            .iter()
            .filter(|sink| match sink.send(event) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(
                        sink = sink.name(),
                        event = event.event_type(),
                        error = %e,
                        "event not delivered"
                    );
                    false
                }
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::Goal;
    use crate::resolver::{GoalPlan, PlannedGoal};
    use tempfile::tempdir;

    struct FailingSink;

    impl NotificationSink for FailingSink {
        fn send(&self, _event: &SdmEvent) -> Result<(), GoalError> {
            Err(GoalError::NotificationError("down".into()))
        }
    }

    #[test]
    fn resolved_event_reflects_resolution() {
        let repo = RepoRef::github("o", "r");
        let id = Uuid::new_v4();
        assert_eq!(
            SdmEvent::resolved(id, &repo, &Resolution::NoGoals).event_type(),
            "no_goals"
        );

        let plan = GoalPlan {
            name: "Build".into(),
            goals: vec![PlannedGoal {
                goal: Goal::build(),
                goal_set: "Build".into(),
                preconditions: vec![],
            }],
        };
        match SdmEvent::resolved(id, &repo, &Resolution::Planned(plan)) {
            SdmEvent::GoalsPlanned { goals, repo, .. } => {
                assert_eq!(goals, vec!["build"]);
                assert_eq!(repo, "o/r");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn event_serialization_round_trip() {
        let event = SdmEvent::rollout_offered("license", &RepoRef::github("o", "r"), "tr-license");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"rollout_offered\""));
        let restored: SdmEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.event_type(), "rollout_offered");
    }

    #[test]
    fn log_sink_appends_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/events.jsonl");
        let sink = LogSink::new(&path);
        let repo = RepoRef::github("o", "r");

        sink.send(&SdmEvent::rollout_skipped("f", &repo, "checkout failed"))
            .unwrap();
        sink.send(&SdmEvent::ideal_raised("f", &repo, "a", "b")).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn dispatcher_survives_failing_sink() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let dispatcher = EventDispatcher::new()
            .with_sink(Box::new(FailingSink))
            .with_sink(Box::new(LogSink::new(&path)));

        let delivered =
            dispatcher.dispatch(&SdmEvent::ideal_raised("f", &RepoRef::github("o", "r"), "a", "b"));
        assert_eq!(delivered, 1);
        assert!(fs::read_to_string(&path).unwrap().contains("ideal_raised"));
        let nobody = EventDispatcher::new();
        assert_eq!(
            nobody.dispatch(&SdmEvent::rollout_skipped("f", &RepoRef::github("o", "r"), "x")),
            0
        );
    }
}
