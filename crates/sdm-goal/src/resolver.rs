// resolver.rs — Goal Contribution Resolver.
//
// Maps one push to one ordered goal plan:
//
// 1. Terminal contributions are checked first, in registration order.
//    The first one that matches wins and every other contribution is
//    suppressed without being evaluated.
// 2. Otherwise every non-terminal contribution is evaluated. Matched goal
//    sets are unioned (goals deduplicated by key, first occurrence keeps its
//    position) and "after" edges are collected.
// 3. Goals are topologically sorted. Ties are broken by registration order,
//    and each set's internal order is kept as an extra ordering constraint.
//
// Nothing matching is not an error: the result is `Resolution::NoGoals`.
// A predicate that errors is fatal for the push and is returned as-is.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};

use crate::contribution::{Contributes, GoalContribution};
use crate::error::GoalError;
use crate::goal::{Goal, GoalSet};
use crate::push_test::PushContext;

/// One goal in a resolved plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannedGoal {
    pub goal: Goal,
    /// The goal set that first contributed this goal.
    pub goal_set: String,
    /// Keys of goals that must complete before this one may start.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preconditions: Vec<String>,
}

/// An ordered goal plan for one push.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoalPlan {
    /// Names of the contributing goal sets, joined.
    pub name: String,
    pub goals: Vec<PlannedGoal>,
}

impl GoalPlan {
    pub fn keys(&self) -> Vec<&str> {
        self.goals.iter().map(|g| g.goal.key.as_str()).collect()
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.goals.iter().position(|g| g.goal.key == key)
    }
}

/// Outcome of resolving a push.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum Resolution {
    /// No contribution applies: the push gets no goals.
    NoGoals,
    Planned(GoalPlan),
}

impl Resolution {
    pub fn plan(&self) -> Option<&GoalPlan> {
        match self {
            Resolution::NoGoals => None,
            Resolution::Planned(plan) => Some(plan),
        }
    }

    pub fn is_no_goals(&self) -> bool {
        matches!(self, Resolution::NoGoals)
    }
}

/// What happened to one contribution during resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Matched,
    NotMatched,
    /// Not evaluated because a terminal contribution already won.
    Suppressed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributionStep {
    pub contribution: String,
    pub test: String,
    pub terminal: bool,
    pub outcome: StepOutcome,
}

/// Resolution plus the per-contribution evaluation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionTrace {
    pub resolution: Resolution,
    pub steps: Vec<ContributionStep>,
}

/// Resolves pushes against a fixed list of contributions.
#[derive(Debug, Clone, Default)]
pub struct GoalContributionResolver {
    contributions: Vec<GoalContribution>,
}

impl GoalContributionResolver {
    pub fn new(contributions: Vec<GoalContribution>) -> Self {
        Self { contributions }
    }

    pub fn contributions(&self) -> &[GoalContribution] {
        &self.contributions
    }

    /// Resolve the goal plan for a push.
    pub fn resolve(&self, ctx: &PushContext<'_>) -> Result<Resolution, GoalError> {
        Ok(self.resolve_with_trace(ctx)?.resolution)
    }

    /// Resolve the goal plan and record how each contribution was handled.
    pub fn resolve_with_trace(&self, ctx: &PushContext<'_>) -> Result<ResolutionTrace, GoalError> {
        let step = |c: &GoalContribution, outcome: StepOutcome| ContributionStep {
            contribution: c.name(),
            test: c.test.describe(),
            terminal: c.terminal,
            outcome,
        };

        // Terminal contributions take precedence over everything else.
        let mut terminal_steps = Vec::new();
        for (index, contribution) in self.contributions.iter().enumerate() {
            if !contribution.terminal {
                continue;
            }
            if !contribution.test.evaluate(ctx)? {
                terminal_steps.push((index, step(contribution, StepOutcome::NotMatched)));
                continue;
            }
            tracing::info!(
                repo = %ctx.push.repo,
                contribution = %contribution.name(),
                "terminal goal contribution matched"
            );
            terminal_steps.push((index, step(contribution, StepOutcome::Matched)));
            let steps = self
                .contributions
                .iter()
                .enumerate()
                .map(|(i, c)| match terminal_steps.iter().find(|(t, _)| *t == i) {
                    Some((_, s)) => s.clone(),
                    None => step(c, StepOutcome::Suppressed),
                })
                .collect();
            let resolution = match &contribution.contributes {
                Contributes::Goals(set) if !set.is_empty() => {
                    let mut plan = build_plan(&[set], &[])?;
                    explain_freeze(&mut plan, ctx)?;
                    Resolution::Planned(plan)
                }
                _ => Resolution::NoGoals,
            };
            return Ok(ResolutionTrace { resolution, steps });
        }

        let mut steps = Vec::with_capacity(self.contributions.len());
        let mut sets: Vec<&GoalSet> = Vec::new();
        let mut orderings: Vec<(&str, &[String])> = Vec::new();
        for contribution in &self.contributions {
            if contribution.terminal {
                steps.push(step(contribution, StepOutcome::NotMatched));
                continue;
            }
            let matched = contribution.test.evaluate(ctx)?;
            tracing::debug!(
                contribution = %contribution.name(),
                test = %contribution.test.describe(),
                matched,
                "evaluated goal contribution"
            );
            if matched {
                match &contribution.contributes {
                    Contributes::Goals(set) => sets.push(set),
                    Contributes::Ordering { target, after } => {
                        orderings.push((target.as_str(), after.as_slice()))
                    }
                }
                steps.push(step(contribution, StepOutcome::Matched));
            } else {
                steps.push(step(contribution, StepOutcome::NotMatched));
            }
        }

        let resolution = if sets.iter().all(|s| s.is_empty()) {
            Resolution::NoGoals
        } else {
            let mut plan = build_plan(&sets, &orderings)?;
            explain_freeze(&mut plan, ctx)?;
            Resolution::Planned(plan)
        };
        match &resolution {
            Resolution::NoGoals => {
                tracing::info!(repo = %ctx.push.repo, branch = %ctx.push.branch, "no goals for push")
            }
            Resolution::Planned(plan) => tracing::info!(
                repo = %ctx.push.repo,
                branch = %ctx.push.branch,
                goals = ?plan.keys(),
                "resolved goal plan"
            ),
        }
        Ok(ResolutionTrace { resolution, steps })
    }
}

/// Carry the freeze note into the goal that explains the freeze.
fn explain_freeze(plan: &mut GoalPlan, ctx: &PushContext<'_>) -> Result<(), GoalError> {
    let key = Goal::explain_deployment_freeze().key;
    let Some(planned) = plan.goals.iter_mut().find(|g| g.goal.key == key) else {
        return Ok(());
    };
    if planned.goal.detail.is_none() {
        planned.goal.detail = ctx.deployments.status()?.note;
    }
    Ok(())
}

/// Union the matched sets and order them.
fn build_plan(sets: &[&GoalSet], orderings: &[(&str, &[String])]) -> Result<GoalPlan, GoalError> {
    let mut goals: Vec<(Goal, String)> = Vec::new();
    let mut index_of: HashMap<&str, usize> = HashMap::new();
    let mut members: HashMap<&str, Vec<usize>> = HashMap::new();

    for set in sets {
        let mut indices = Vec::with_capacity(set.goals.len());
        for goal in &set.goals {
            let idx = match index_of.get(goal.key.as_str()) {
                Some(&idx) => idx,
                None => {
                    goals.push((goal.clone(), set.name.clone()));
                    index_of.insert(goal.key.as_str(), goals.len() - 1);
                    goals.len() - 1
                }
            };
            if !indices.contains(&idx) {
                indices.push(idx);
            }
        }
        members.entry(set.name.as_str()).or_default().extend(indices);
    }

    // A name refers to a matched goal set first, then to a goal key.
    // Unknown names were not contributed for this push and are ignored.
    let lookup = |name: &str| -> Vec<usize> {
        if let Some(indices) = members.get(name) {
            return indices.clone();
        }
        match index_of.get(name) {
            Some(&idx) => vec![idx],
            None => {
                tracing::debug!(name, "ordering reference not in plan, ignored");
                Vec::new()
            }
        }
    };

    let mut after_edges: BTreeSet<(usize, usize)> = BTreeSet::new();
    for set in sets {
        let targets = lookup(set.name.as_str());
        for name in &set.after {
            for pred in lookup(name.as_str()) {
                for &target in &targets {
                    if pred != target {
                        after_edges.insert((pred, target));
                    }
                }
            }
        }
    }
    for &(target, after) in orderings {
        let targets = lookup(target);
        for name in after {
            for pred in lookup(name.as_str()) {
                for &t in &targets {
                    if pred != t {
                        after_edges.insert((pred, t));
                    }
                }
            }
        }
    }

    let mut sort_edges = after_edges.clone();
    for indices in members.values() {
        for pair in indices.windows(2) {
            if pair[0] != pair[1] {
                sort_edges.insert((pair[0], pair[1]));
            }
        }
    }

    let order = topological_order(goals.len(), &sort_edges).map_err(|stuck| {
        GoalError::OrderingCycle {
            goals: stuck.iter().map(|&i| goals[i].0.key.clone()).collect(),
        }
    })?;

    let planned = order
        .into_iter()
        .map(|idx| {
            let preconditions = after_edges
                .iter()
                .filter(|(_, target)| *target == idx)
                .map(|(pred, _)| goals[*pred].0.key.clone())
                .collect();
            PlannedGoal {
                goal: goals[idx].0.clone(),
                goal_set: goals[idx].1.clone(),
                preconditions,
            }
        })
        .collect();

    let mut names: Vec<&str> = Vec::new();
    for set in sets {
        if !names.contains(&set.name.as_str()) {
            names.push(&set.name);
        }
    }
    Ok(GoalPlan {
        name: names.join(", "),
        goals: planned,
    })
}

/// Kahn's algorithm with the lowest index first among ready nodes.
/// On a cycle, returns the indices that could not be ordered.
fn topological_order(
    count: usize,
    edges: &BTreeSet<(usize, usize)>,
) -> Result<Vec<usize>, Vec<usize>> {
    let mut indegree = vec![0usize; count];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];
    for &(from, to) in edges {
        indegree[to] += 1;
        successors[from].push(to);
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..count)
        .filter(|&i| indegree[i] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::with_capacity(count);
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &next in &successors[node] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() == count {
        Ok(order)
    } else {
        Err((0..count).filter(|&i| indegree[i] > 0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contribution::{on_any_push, when_push_satisfies};
    use crate::deployment::DeploymentStatusManager;
    use crate::project::InMemoryProject;
    use crate::push::{Push, RepoRef};
    use crate::push_test::{has_file, not, predicate, to_default_branch, PushTest};

    struct Fixture {
        push: Push,
        project: InMemoryProject,
        deployments: DeploymentStatusManager,
    }

    impl Fixture {
        fn new(branch: &str, files: &[&str]) -> Self {
            let repo = RepoRef::github("acme", "api");
            let mut project = InMemoryProject::new(repo.clone());
            for f in files {
                project = project.with_file(*f, "");
            }
            Self {
                push: Push::new(repo, branch, vec![]),
                project,
                deployments: DeploymentStatusManager::new(),
            }
        }

        fn ctx(&self) -> PushContext<'_> {
            PushContext::new(&self.push, &self.project, &self.deployments)
        }
    }

    fn checks() -> GoalSet {
        GoalSet::new("Checks").plan([Goal::code_inspection(), Goal::push_impact(), Goal::autofix()])
    }

    fn machine() -> GoalContributionResolver {
        GoalContributionResolver::new(vec![
            on_any_push().set_goals(checks()),
            when_push_satisfies(vec![PushTest::DeploymentFrozen])
                .it_means("Deployment frozen")
                .terminal()
                .set_goals(GoalSet::new("Frozen").plan([Goal::explain_deployment_freeze()])),
            when_push_satisfies(vec![has_file("pom.xml").unwrap()])
                .set_goals(GoalSet::new("Build").plan([Goal::build()]).after("autofix")),
            when_push_satisfies(vec![has_file("manifest.yml").unwrap(), to_default_branch()])
                .set_goals(GoalSet::new("StagingDeployment").plan([
                    Goal::artifact(),
                    Goal::staging_deploy(),
                    Goal::staging_endpoint(),
                    Goal::staging_verified(),
                ])),
            when_push_satisfies(vec![
                has_file("manifest.yml").unwrap(),
                not(PushTest::DeploymentFrozen),
                to_default_branch(),
            ])
            .set_goals(
                GoalSet::new("ProdDeployment")
                    .plan([Goal::production_deploy()])
                    .after("artifact")
                    .after("staging-verified"),
            ),
        ])
    }

    fn assert_edges_honored(plan: &GoalPlan) {
        for goal in &plan.goals {
            let pos = plan.position(&goal.goal.key).unwrap();
            for pre in &goal.preconditions {
                assert!(
                    plan.position(pre).unwrap() < pos,
                    "{} must precede {}",
                    pre,
                    goal.goal.key
                );
            }
        }
    }

    #[test]
    fn no_matching_contribution_yields_no_goals() {
        let resolver = GoalContributionResolver::new(vec![when_push_satisfies(vec![
            has_file("pom.xml").unwrap(),
        ])
        .set_goals(GoalSet::new("Build").plan([Goal::build()]))]);
        let fx = Fixture::new("main", &["package.json"]);
        assert_eq!(resolver.resolve(&fx.ctx()).unwrap(), Resolution::NoGoals);
    }

    #[test]
    fn empty_resolver_yields_no_goals() {
        let fx = Fixture::new("main", &[]);
        let resolution = GoalContributionResolver::default().resolve(&fx.ctx()).unwrap();
        assert!(resolution.is_no_goals());
        assert!(resolution.plan().is_none());
    }

    #[test]
    fn full_plan_honors_after_edges() {
        let fx = Fixture::new("main", &["pom.xml", "manifest.yml"]);
        let resolution = machine().resolve(&fx.ctx()).unwrap();
        let plan = resolution.plan().unwrap();

        assert_eq!(plan.goals.len(), 9);
        assert_edges_honored(plan);
        assert!(plan.position("autofix").unwrap() < plan.position("build").unwrap());
        assert!(
            plan.position("staging-verified").unwrap()
                < plan.position("production-deploy").unwrap()
        );
        let prod = &plan.goals[plan.position("production-deploy").unwrap()];
        assert_eq!(prod.preconditions, vec!["artifact", "staging-verified"]);
        assert_eq!(prod.goal_set, "ProdDeployment");
        assert_eq!(
            plan.name,
            "Checks, Build, StagingDeployment, ProdDeployment"
        );
    }

    #[test]
    fn internal_set_order_is_preserved() {
        let fx = Fixture::new("main", &["manifest.yml"]);
        let plan = machine().resolve(&fx.ctx()).unwrap();
        let plan = plan.plan().unwrap();
        let staging: Vec<usize> = [
            "artifact",
            "staging-deploy",
            "staging-endpoint",
            "staging-verified",
        ]
        .iter()
        .map(|k| plan.position(k).unwrap())
        .collect();
        assert!(staging.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn edge_to_uncontributed_goal_is_ignored() {
        // Build runs after autofix, but without Checks there is no autofix.
        let resolver = GoalContributionResolver::new(vec![when_push_satisfies(vec![
            has_file("pom.xml").unwrap(),
        ])
        .set_goals(GoalSet::new("Build").plan([Goal::build()]).after("autofix"))]);
        let fx = Fixture::new("main", &["pom.xml"]);
        let resolution = resolver.resolve(&fx.ctx()).unwrap();
        let plan = resolution.plan().unwrap();
        assert_eq!(plan.keys(), vec!["build"]);
        assert!(plan.goals[0].preconditions.is_empty());
    }

    #[test]
    fn after_may_name_a_goal_set() {
        // Registered in reverse so ordering cannot come from registration.
        let resolver = GoalContributionResolver::new(vec![
            on_any_push().set_goals(GoalSet::new("Deploy").plan([Goal::staging_deploy()]).after("Build")),
            on_any_push().set_goals(GoalSet::new("Build").plan([Goal::build(), Goal::artifact()])),
        ]);
        let fx = Fixture::new("main", &[]);
        let resolution = resolver.resolve(&fx.ctx()).unwrap();
        let plan = resolution.plan().unwrap();
        assert_eq!(plan.keys(), vec!["build", "artifact", "staging-deploy"]);
        assert_eq!(plan.goals[2].preconditions, vec!["build", "artifact"]);
    }

    #[test]
    fn ordering_contribution_adds_edges_only_when_matched() {
        let resolver = GoalContributionResolver::new(vec![
            on_any_push().set_goals(GoalSet::new("Deploy").plan([Goal::staging_deploy()])),
            on_any_push().set_goals(GoalSet::new("Build").plan([Goal::build()])),
            when_push_satisfies(vec![to_default_branch()]).set_ordering("Deploy", ["Build"]),
        ]);

        let fx = Fixture::new("main", &[]);
        let resolution = resolver.resolve(&fx.ctx()).unwrap();
        assert_eq!(resolution.plan().unwrap().keys(), vec!["build", "staging-deploy"]);

        let fx = Fixture::new("feature", &[]);
        let resolution = resolver.resolve(&fx.ctx()).unwrap();
        assert_eq!(resolution.plan().unwrap().keys(), vec!["staging-deploy", "build"]);
    }

    #[test]
    fn duplicate_goals_are_unioned() {
        let resolver = GoalContributionResolver::new(vec![
            on_any_push().set_goals(checks()),
            on_any_push().set_goals(GoalSet::new("MoreChecks").plan([Goal::autofix(), Goal::fingerprint()])),
        ]);
        let fx = Fixture::new("main", &[]);
        let resolution = resolver.resolve(&fx.ctx()).unwrap();
        let plan = resolution.plan().unwrap();
        assert_eq!(
            plan.keys(),
            vec!["code-inspection", "push-impact", "autofix", "fingerprint"]
        );
        assert_eq!(plan.goals[2].goal_set, "Checks");
    }

    #[test]
    fn terminal_contribution_replaces_everything() {
        let fx = Fixture::new("main", &["pom.xml", "manifest.yml"]);
        fx.deployments.freeze("release").unwrap();
        let trace = machine().resolve_with_trace(&fx.ctx()).unwrap();
        let plan = trace.resolution.plan().unwrap();
        assert_eq!(plan.keys(), vec!["explain-deployment-freeze"]);
        assert_eq!(plan.name, "Frozen");
        assert_eq!(plan.goals[0].goal.detail.as_deref(), Some("release"));

        assert_eq!(trace.steps.len(), 5);
        assert_eq!(trace.steps[1].outcome, StepOutcome::Matched);
        assert!(trace.steps[1].terminal);
        for i in [0, 2, 3, 4] {
            assert_eq!(trace.steps[i].outcome, StepOutcome::Suppressed);
        }
    }

    #[test]
    fn first_matching_terminal_wins() {
        let resolver = GoalContributionResolver::new(vec![
            on_any_push().set_goals(checks()),
            when_push_satisfies(vec![has_file("pom.xml").unwrap()])
                .terminal()
                .set_goals(GoalSet::new("First").plan([Goal::build()])),
            on_any_push()
                .terminal()
                .set_goals(GoalSet::new("Second").plan([Goal::artifact()])),
        ]);
        let fx = Fixture::new("main", &["pom.xml"]);
        let resolution = resolver.resolve(&fx.ctx()).unwrap();
        assert_eq!(resolution.plan().unwrap().keys(), vec!["build"]);

        let fx = Fixture::new("main", &[]);
        let resolution = resolver.resolve(&fx.ctx()).unwrap();
        assert_eq!(resolution.plan().unwrap().keys(), vec!["artifact"]);
    }

    #[test]
    fn terminal_without_goals_yields_no_goals() {
        let resolver = GoalContributionResolver::new(vec![
            on_any_push().set_goals(checks()),
            when_push_satisfies(vec![has_file(".travis.yml").unwrap()])
                .it_means("Already builds with Travis")
                .do_not_set_any_goals(),
        ]);
        let fx = Fixture::new("main", &[".travis.yml"]);
        assert!(resolver.resolve(&fx.ctx()).unwrap().is_no_goals());
    }

    #[test]
    fn failing_predicate_is_fatal() {
        let resolver = GoalContributionResolver::new(vec![
            on_any_push().set_goals(checks()),
            when_push_satisfies(vec![predicate("explodes", |_| {
                Err(GoalError::ProjectNotFound("acme/api".into()))
            })])
            .set_goals(GoalSet::new("Build").plan([Goal::build()])),
        ]);
        let fx = Fixture::new("main", &[]);
        let result = resolver.resolve(&fx.ctx());
        assert!(matches!(
            result,
            Err(GoalError::PredicateFailed { ref test, .. }) if test == "explodes"
        ));
    }

    #[test]
    fn unreadable_freeze_state_fails_resolution() {
        let fx = Fixture::new("main", &["manifest.yml"]);
        fx.deployments.freeze("release").unwrap();
        fx.deployments.poison();
        assert!(matches!(
            machine().resolve(&fx.ctx()),
            Err(GoalError::DeploymentStatusUnavailable(_))
        ));
    }

    #[test]
    fn cycle_is_a_configuration_error() {
        let resolver = GoalContributionResolver::new(vec![
            on_any_push().set_goals(GoalSet::new("A").plan([Goal::build()]).after("B")),
            on_any_push().set_goals(GoalSet::new("B").plan([Goal::artifact()]).after("A")),
        ]);
        let fx = Fixture::new("main", &[]);
        match resolver.resolve(&fx.ctx()) {
            Err(GoalError::OrderingCycle { goals }) => {
                assert_eq!(goals, vec!["build", "artifact"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn evaluation_order_does_not_change_the_goal_set() {
        let fx = Fixture::new("main", &["pom.xml", "manifest.yml"]);
        let forward = machine();
        let mut reversed: Vec<GoalContribution> = forward.contributions().to_vec();
        reversed.reverse();
        let reversed = GoalContributionResolver::new(reversed);

        let a = forward.resolve(&fx.ctx()).unwrap();
        let b = reversed.resolve(&fx.ctx()).unwrap();
        let mut ka: Vec<&str> = a.plan().unwrap().keys();
        let mut kb: Vec<&str> = b.plan().unwrap().keys();
        assert_edges_honored(b.plan().unwrap());
        ka.sort();
        kb.sort();
        assert_eq!(ka, kb);
    }

    #[test]
    fn resolution_serializes_with_tag() {
        let json = serde_json::to_string(&Resolution::NoGoals).unwrap();
        assert_eq!(json, r#"{"resolution":"no_goals"}"#);
    }
}
