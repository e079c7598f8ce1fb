// contribution.rs — Goal contributions: "when the push satisfies X, add Y".
//
// Contributions are registered once when the delivery machine is assembled
// and never change afterwards. Each one pairs a PushTest with either a goal
// set or an extra ordering edge. A terminal contribution replaces the whole
// plan instead of adding to it.
//
//   when_push_satisfies(vec![is_maven])
//       .it_means("Build Java")
//       .set_goals(GoalSet::new("Build").plan([Goal::build()]))

use crate::goal::GoalSet;
use crate::push_test::{all_of, PushTest};

/// What a matched contribution adds to the plan.
#[derive(Debug, Clone)]
pub enum Contributes {
    /// Add this goal set.
    Goals(GoalSet),
    /// Add ordering edges: `target` (a goal set name or goal key) runs after
    /// each name in `after`.
    Ordering { target: String, after: Vec<String> },
}

/// A registered rule contributing to the goal plan of matching pushes.
#[derive(Debug, Clone)]
pub struct GoalContribution {
    pub description: Option<String>,
    pub test: PushTest,
    pub contributes: Contributes,
    /// First matching terminal contribution wins and suppresses all others.
    pub terminal: bool,
}

impl GoalContribution {
    /// Name used in logs and traces: the description, else the set name.
    pub fn name(&self) -> String {
        if let Some(description) = &self.description {
            return description.clone();
        }
        match &self.contributes {
            Contributes::Goals(set) => set.name.clone(),
            Contributes::Ordering { target, after } => {
                format!("{} after {}", target, after.join(", "))
            }
        }
    }
}

/// Builder returned by [`on_any_push`] and [`when_push_satisfies`].
#[derive(Debug, Clone)]
pub struct ContributionBuilder {
    test: PushTest,
    description: Option<String>,
    terminal: bool,
}

/// Contribution that applies to every push.
pub fn on_any_push() -> ContributionBuilder {
    ContributionBuilder {
        test: PushTest::Always,
        description: None,
        terminal: false,
    }
}

/// Contribution that applies when all `tests` match.
pub fn when_push_satisfies(tests: Vec<PushTest>) -> ContributionBuilder {
    ContributionBuilder {
        test: all_of(tests),
        description: None,
        terminal: false,
    }
}

impl ContributionBuilder {
    /// Describe what a match means, e.g. "No material change to Java".
    pub fn it_means(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replace, rather than add to, the plan when this contribution matches.
    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    pub fn set_goals(self, goals: GoalSet) -> GoalContribution {
        GoalContribution {
            description: self.description,
            test: self.test,
            contributes: Contributes::Goals(goals),
            terminal: self.terminal,
        }
    }

    pub fn set_ordering(
        self,
        target: impl Into<String>,
        after: impl IntoIterator<Item = impl Into<String>>,
    ) -> GoalContribution {
        GoalContribution {
            description: self.description,
            test: self.test,
            contributes: Contributes::Ordering {
                target: target.into(),
                after: after.into_iter().map(Into::into).collect(),
            },
            terminal: self.terminal,
        }
    }

    /// Terminal contribution with no goals: matching pushes get no plan.
    pub fn do_not_set_any_goals(self) -> GoalContribution {
        let name = self
            .description
            .clone()
            .unwrap_or_else(|| "Do not set any goals".to_string());
        GoalContribution {
            description: self.description,
            test: self.test,
            contributes: Contributes::Goals(GoalSet::new(name)),
            terminal: true,
        }
    }
}
