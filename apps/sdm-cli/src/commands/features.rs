// features.rs — Feature listing, inspection, and accepting a rollout.

use anyhow::Context;
use sdm_feature::{FeatureResult, FingerprintRecord};
use sdm_goal::{LoadMode, ProjectLoader, RepoFinder};

use crate::machine::{well_known_goals, Sdm};

pub fn list(sdm: &Sdm) -> anyhow::Result<()> {
    let features = sdm.features.features();
    if features.is_empty() {
        println!("No features registered.");
        return Ok(());
    }

    println!("{:<24} {:<8} {:<30} {}", "FEATURE", "VERSION", "IDEAL", "POLICIES");
    println!("{}", "-".repeat(80));
    for feature in features {
        let ideal = match sdm.features.store().ideal(feature.name())? {
            Some(record) => feature.summary(&record),
            None => "-".to_string(),
        };
        let policies: Vec<String> = feature
            .supported_comparison_policies()
            .iter()
            .map(ToString::to_string)
            .collect();
        println!(
            "{:<24} {:<8} {:<30} {}",
            feature.name(),
            feature.version(),
            ideal,
            policies.join(", ")
        );
    }

    println!();
    println!("Registrations:");
    for registration in sdm.features.enable(&well_known_goals()) {
        println!("  {}", serde_json::to_string(&registration)?);
    }
    Ok(())
}

/// Fingerprint every feature in `owner/repo`.
pub fn inspect(
    sdm: &Sdm,
    owner: &str,
    repo: &str,
) -> anyhow::Result<Vec<FeatureResult<Option<FingerprintRecord>>>> {
    let target = sdm
        .loader
        .find_repos()?
        .into_iter()
        .find(|r| r.owner == owner && r.repo == repo)
        .with_context(|| format!("no checkout for {}/{}", owner, repo))?;
    let project = sdm.loader.load(&target, LoadMode::ReadOnly)?;
    Ok(sdm.features.inspect(project.as_ref()))
}

pub fn print_inspection(sdm: &Sdm, owner: &str, repo: &str) -> anyhow::Result<()> {
    for FeatureResult { feature, result } in inspect(sdm, owner, repo)? {
        match result {
            Ok(Some(record)) => {
                let summary = sdm
                    .features
                    .get(&feature)
                    .map(|f| f.summary(&record))
                    .unwrap_or_default();
                let short = record.sha.get(..12).unwrap_or(&record.sha);
                println!("{:<24} {}  {}", feature, short, summary);
            }
            Ok(None) => println!("{:<24} not present", feature),
            Err(e) => println!("{:<24} error: {}", feature, e),
        }
    }
    Ok(())
}

/// Bring `owner/repo` to the feature's current ideal.
pub fn accept(sdm: &Sdm, name: &str, owner: &str, repo: &str) -> anyhow::Result<FingerprintRecord> {
    let feature = sdm
        .features
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("unknown feature: {}", name))?;
    let applied = sdm.features.accept(
        &feature.transform_command_name(),
        owner,
        repo,
        &sdm.loader,
        &sdm.loader,
    )?;
    println!(
        "Applied {} = {} to {}/{}",
        name,
        feature.summary(&applied),
        owner,
        repo
    );
    Ok(applied)
}
