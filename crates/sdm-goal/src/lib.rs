//! # sdm-goal
//!
//! Push evaluation and goal planning for the software delivery machine.
//!
//! Every push is matched against a fixed list of [`GoalContribution`]s. Each
//! contribution pairs a [`PushTest`] with a [`GoalSet`]; the
//! [`GoalContributionResolver`] unions the sets that match, honours their
//! "after" edges, and returns an ordered [`GoalPlan`] or
//! [`Resolution::NoGoals`].
//!
//! ## Key components
//!
//! - [`Push`] / [`RepoRef`] — the inbound event and repository identity
//! - [`Project`] / [`ProjectLoader`] / [`RepoFinder`] — checked-out code and
//!   repository discovery
//! - [`PushTest`] — tagged-union predicates with one interpreter
//! - [`DeploymentStatusManager`] — freeze state passed in per evaluation
//! - [`GoalContributionResolver`] — push → goal plan, with terminal precedence
//! - [`SdmEvent`] / [`EventDispatcher`] — lifecycle notifications

pub mod contribution;
pub mod deployment;
pub mod error;
pub mod events;
pub mod goal;
pub mod project;
pub mod push;
pub mod resolver;

pub use contribution::{on_any_push, when_push_satisfies, Contributes, GoalContribution};
pub use deployment::{DeploymentState, DeploymentStatus, DeploymentStatusManager};
pub use error::GoalError;
pub use events::{EventDispatcher, LogSink, NotificationSink, SdmEvent};
pub use goal::{Goal, GoalSet};
pub use project::{
    do_with_project, InMemoryProject, InMemoryProjectLoader, LoadMode, LocalProject,
    LocalProjectLoader, Project, ProjectLoader, RepoFinder, StaticRepoFinder,
};
pub use push::{Commit, Push, RepoRef};
pub use push_test::{PushContext, PushTest};
pub use resolver::{
    ContributionStep, GoalContributionResolver, GoalPlan, PlannedGoal, Resolution,
    ResolutionTrace, StepOutcome,
};
