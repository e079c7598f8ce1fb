// push.rs — `sdm plan` and `sdm push`: resolve a push and react to it.

use std::path::Path;

use anyhow::Context;
use sdm_feature::{FeatureResult, FingerprintRecord, RolloutDecision};
use sdm_goal::{
    Goal, LoadMode, ProjectLoader, Push, PushContext, Resolution, SdmEvent, StepOutcome,
};

use crate::machine::Sdm;

/// What handling one push did.
#[derive(Debug)]
pub struct PushReport {
    pub resolution: Resolution,
    pub rollouts: Vec<FeatureResult<RolloutDecision>>,
    pub observations: Vec<FeatureResult<Option<FingerprintRecord>>>,
    /// Deployment was enabled because the push added a manifest.
    pub deploy_enabled: bool,
}

/// Resolve the push and print the plan with the per-contribution trace.
pub fn plan(sdm: &Sdm, push_file: &Path, json: bool) -> anyhow::Result<()> {
    let push = Sdm::read_push(push_file)?;
    let project = sdm
        .loader
        .load(&push.repo, LoadMode::ReadOnly)
        .with_context(|| format!("loading {}", push.repo))?;
    let ctx = PushContext::new(&push, project.as_ref(), &sdm.deployments);
    let trace = sdm.resolver.resolve_with_trace(&ctx)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&trace)?);
        return Ok(());
    }

    println!("Push {} to {} ({})", push.id, push.repo, push.branch);
    println!();
    println!("{:<40} {:<10} {}", "CONTRIBUTION", "OUTCOME", "TEST");
    println!("{}", "-".repeat(90));
    for step in &trace.steps {
        let outcome = match step.outcome {
            StepOutcome::Matched => "matched",
            StepOutcome::NotMatched => "-",
            StepOutcome::Suppressed => "suppressed",
        };
        let name = if step.terminal {
            format!("{} (terminal)", step.contribution)
        } else {
            step.contribution.clone()
        };
        println!("{:<40} {:<10} {}", name, outcome, step.test);
    }
    println!();
    print_resolution(&trace.resolution);
    Ok(())
}

/// Resolve the push, then run the feature reactions its plan asks for.
pub fn push(sdm: &Sdm, push_file: &Path) -> anyhow::Result<()> {
    let push = Sdm::read_push(push_file)?;
    let report = handle_push(sdm, &push)?;

    print_resolution(&report.resolution);
    if report.deploy_enabled {
        println!("Deployment enabled for {}: manifest added.", push.repo);
    }
    for FeatureResult { feature, result } in &report.rollouts {
        match result {
            Ok(RolloutDecision::IdealRaised(outcome)) => {
                println!(
                    "{}: ideal raised to {} ({} offer(s), {} failure(s))",
                    feature,
                    outcome.ideal.sha,
                    outcome.offers.len(),
                    outcome.failures.len()
                );
                for offer in &outcome.offers {
                    println!("  offered to {} in #{}", offer.repo, offer.channel);
                }
                for failure in &outcome.failures {
                    match &failure.repo {
                        Some(repo) => println!("  failed for {}: {}", repo, failure.reason),
                        None => println!("  failed: {}", failure.reason),
                    }
                }
            }
            Ok(decision) => println!("{}: {}", feature, decision.label()),
            Err(e) => println!("{}: error: {}", feature, e),
        }
    }
    for FeatureResult { feature, result } in &report.observations {
        match result {
            Ok(Some(record)) => println!("{}: observed {}", feature, record.sha),
            Ok(None) => println!("{}: not present", feature),
            Err(e) => println!("{}: error: {}", feature, e),
        }
    }
    Ok(())
}

/// Plan a push and run its push-impact and fingerprint reactions.
///
/// Feature failures are reported per feature; only a failure to load the
/// pushed project or to resolve its plan is an error.
pub fn handle_push(sdm: &Sdm, push: &Push) -> anyhow::Result<PushReport> {
    let project = sdm
        .loader
        .load(&push.repo, LoadMode::ReadOnly)
        .with_context(|| format!("loading {}", push.repo))?;
    let ctx = PushContext::new(push, project.as_ref(), &sdm.deployments);

    let resolution = sdm.resolver.resolve(&ctx)?;
    sdm.events
        .dispatch(&SdmEvent::resolved(push.id, &push.repo, &resolution));

    let planned = |goal: Goal| {
        resolution
            .plan()
            .is_some_and(|plan| plan.position(&goal.key).is_some())
    };

    let push_impact = planned(Goal::push_impact());
    let deploy_enabled = push_impact && sdm.enable_deploy_on_manifest_addition(push)?;
    let rollouts = if push_impact && sdm.config.rollout.enabled {
        sdm.features.on_push(&ctx, &sdm.collaborators())
    } else {
        Vec::new()
    };
    let observations = if planned(Goal::fingerprint()) {
        sdm.features.record_observations(&ctx)
    } else {
        Vec::new()
    };

    tracing::info!(
        push = %push.id,
        repo = %push.repo,
        rollouts = rollouts.len(),
        observations = observations.len(),
        deploy_enabled,
        "push handled"
    );
    Ok(PushReport {
        resolution,
        rollouts,
        observations,
        deploy_enabled,
    })
}

fn print_resolution(resolution: &Resolution) {
    let Some(plan) = resolution.plan() else {
        println!("No goals.");
        return;
    };
    println!("Plan: {}", plan.name);
    for (i, planned) in plan.goals.iter().enumerate() {
        print!("  {:>2}. {:<30} [{}]", i + 1, planned.goal.key, planned.goal_set);
        if !planned.preconditions.is_empty() {
            print!(" after {}", planned.preconditions.join(", "));
        }
        println!();
        if let Some(detail) = &planned.goal.detail {
            println!("      {}", detail.replace('\n', "\n      "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SdmConfig;
    use sdm_goal::{Commit, RepoRef};
    use std::fs;
    use tempfile::tempdir;

    fn checkout(root: &Path, repo: &str, files: &[(&str, &str)]) {
        let dir = root.join("repos").join("acme").join(repo);
        fs::create_dir_all(&dir).unwrap();
        for (path, content) in files {
            fs::write(dir.join(path), content).unwrap();
        }
    }

    fn push_to(repo: &str, branch: &str) -> Push {
        Push::new(
            RepoRef::github("acme", repo),
            branch,
            vec![Commit::new("c0ffee", "update")],
        )
    }

    #[test]
    fn push_raises_ideal_and_offers_rollout() {
        let dir = tempdir().unwrap();
        checkout(dir.path(), "leader", &[("LICENSE", "Apache-3.0\n"), ("pom.xml", "<project/>")]);
        checkout(dir.path(), "follower", &[("LICENSE", "Apache-2.0\n")]);
        checkout(dir.path(), "other", &[("README.md", "no license")]);
        let sdm = Sdm::assemble(SdmConfig::for_project(dir.path()).unwrap()).unwrap();

        let report = handle_push(&sdm, &push_to("leader", "main")).unwrap();
        assert!(report.resolution.plan().unwrap().position("build").is_some());

        let decision = report.rollouts[0].result.as_ref().unwrap();
        assert!(decision.raised_ideal());
        let offered: Vec<&str> = decision.offers().iter().map(|o| o.repo.repo.as_str()).collect();
        assert_eq!(offered, vec!["follower"]);

        let ideal = sdm.features.store().ideal("license-header").unwrap().unwrap();
        assert_eq!(ideal.field("text"), Some("Apache-3.0"));
        assert!(report.observations[0].result.as_ref().unwrap().is_some());

        let events = fs::read_to_string(&sdm.config.events_log).unwrap();
        assert!(events.contains("\"goals_planned\""));
        assert!(events.contains("\"ideal_raised\""));
        assert_eq!(fs::read_to_string(&sdm.config.outbox).unwrap().lines().count(), 1);
    }

    #[test]
    fn frozen_push_runs_no_reactions() {
        let dir = tempdir().unwrap();
        checkout(dir.path(), "leader", &[("LICENSE", "Apache-3.0\n")]);
        let mut config = SdmConfig::for_project(dir.path()).unwrap();
        config.deploy.frozen = true;
        let sdm = Sdm::assemble(config).unwrap();

        let report = handle_push(&sdm, &push_to("leader", "main")).unwrap();
        assert_eq!(
            report.resolution.plan().unwrap().keys(),
            vec!["explain-deployment-freeze"]
        );
        assert_eq!(
            report.resolution.plan().unwrap().goals[0].goal.detail.as_deref(),
            Some("Deployments are frozen")
        );
        assert!(report.rollouts.is_empty());
        assert!(report.observations.is_empty());
        let ideal = sdm.features.store().ideal("license-header").unwrap().unwrap();
        assert_eq!(ideal.field("text"), Some("Apache-2.0"));
    }

    #[test]
    fn rollout_can_be_disabled() {
        let dir = tempdir().unwrap();
        checkout(dir.path(), "leader", &[("LICENSE", "Apache-3.0\n")]);
        let mut config = SdmConfig::for_project(dir.path()).unwrap();
        config.rollout.enabled = false;
        let sdm = Sdm::assemble(config).unwrap();

        let report = handle_push(&sdm, &push_to("leader", "topic")).unwrap();
        assert!(report.rollouts.is_empty());
        assert_eq!(report.observations.len(), 1);
        let repo = RepoRef::github("acme", "leader");
        let observed = sdm.features.store().last_observed(&repo, "license-header").unwrap();
        assert_eq!(observed.unwrap().field("text"), Some("Apache-3.0"));
    }

    #[test]
    fn manifest_push_enables_deploy_for_the_next_push() {
        let dir = tempdir().unwrap();
        checkout(dir.path(), "svc", &[("manifest.yml", "applications: []")]);
        let sdm = Sdm::assemble(SdmConfig::for_project(dir.path()).unwrap()).unwrap();
        let repo = RepoRef::github("acme", "svc");

        let first = Push::new(
            repo.clone(),
            "main",
            vec![Commit::new("1", "Add Cloud Foundry manifest").with_added(["manifest.yml"])],
        );
        let report = handle_push(&sdm, &first).unwrap();
        assert!(report.deploy_enabled);
        let plan = report.resolution.plan().unwrap();
        assert!(plan.position("production-deploy-suggestion").is_some());

        let report = handle_push(&sdm, &push_to("svc", "main")).unwrap();
        assert!(!report.deploy_enabled);
        let plan = report.resolution.plan().unwrap();
        assert!(plan.position("production-deploy").is_some());
        assert!(plan.position("production-deploy-suggestion").is_none());
    }

    #[test]
    fn missing_checkout_is_an_error() {
        let dir = tempdir().unwrap();
        let sdm = Sdm::assemble(SdmConfig::for_project(dir.path()).unwrap()).unwrap();
        assert!(handle_push(&sdm, &push_to("ghost", "main")).is_err());
    }
}
