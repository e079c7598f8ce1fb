// machine.rs — The built-in delivery machine: goal contributions, features,
// and the collaborators they run against.
//
// Contributions are additive. Every push gets the checks; Maven and Node
// projects get a build after autofix; Cloud Foundry projects pushed to the
// default branch get staging and then production (or a suggestion to set
// production up). A deployment freeze is terminal and replaces all of it
// with a single explanation goal.

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::Context;
use sdm_feature::{
    Collaborators, ComparisonPolicy, Feature, FeatureError, Features,
    FingerprintRecord, JsonFileStore, LogMessageClient, Rating, RatingScale, Store,
    StoreFeatureStore, WellKnownGoals,
};
use sdm_goal::contribution::{on_any_push, when_push_satisfies};
use sdm_goal::push_test::{has_file, not, to_default_branch};
use sdm_goal::{
    DeploymentState, DeploymentStatusManager, EventDispatcher, Goal, GoalContribution,
    GoalContributionResolver, GoalError, GoalSet, LocalProjectLoader, LogSink, Project, Push,
    PushTest,
};

use crate::config::SdmConfig;

const PRODUCTION_DEPLOY_HELP: &str = "I'd love to deploy for you, but you haven't told me how!\n\
    Enable deployment for this repository with `sdm deploy enable OWNER REPO`";
const CLOUD_FOUNDRY_MANIFEST: &str = "manifest.yml";
const DEPLOYMENT_STATUS_KEY: &str = "deployment_status";
const PRODUCTION_DEPLOY_LINK: &str = "https://docs.cloudfoundry.org/devguide/deploy-apps/";

pub fn checks() -> GoalSet {
    GoalSet::new("Checks").plan([
        Goal::code_inspection(),
        Goal::push_impact(),
        Goal::fingerprint(),
        Goal::autofix(),
    ])
}

fn staging_deployment() -> GoalSet {
    GoalSet::new("StagingDeployment").plan([
        Goal::artifact(),
        Goal::staging_deploy(),
        Goal::staging_endpoint(),
        Goal::staging_verified(),
    ])
}

pub fn goal_contributions() -> Result<Vec<GoalContribution>, GoalError> {
    let has_manifest = has_file(CLOUD_FOUNDRY_MANIFEST)?;
    Ok(vec![
        on_any_push().set_goals(checks()),
        when_push_satisfies(vec![PushTest::DeploymentFrozen])
            .it_means("Deployment frozen")
            .terminal()
            .set_goals(GoalSet::new("Frozen").plan([Goal::explain_deployment_freeze()])),
        when_push_satisfies(vec![has_file("pom.xml")?])
            .it_means("Build with Maven")
            .set_goals(GoalSet::new("MavenBuild").plan([Goal::build()]).after("autofix")),
        when_push_satisfies(vec![has_file("package.json")?])
            .it_means("Build with npm")
            .set_goals(GoalSet::new("NodeBuild").plan([Goal::build()]).after("autofix")),
        when_push_satisfies(vec![has_manifest.clone(), to_default_branch()])
            .set_goals(staging_deployment().after("build")),
        when_push_satisfies(vec![
            has_manifest.clone(),
            not(PushTest::DeploymentFrozen),
            to_default_branch(),
            PushTest::DeployEnabled,
        ])
        .it_means("Deploy to production")
        .set_goals(
            GoalSet::new("ProdDeployment")
                .plan([Goal::production_deploy()])
                .after("artifact")
                .after("staging-verified"),
        ),
        when_push_satisfies(vec![
            has_manifest,
            not(PushTest::DeploymentFrozen),
            to_default_branch(),
            not(PushTest::DeployEnabled),
        ])
        .it_means("Suggest production deployment")
        .set_goals(
            GoalSet::new("ProdDeploymentSuggestion")
                .plan([Goal::suggested_action(
                    "production-deploy-suggestion",
                    PRODUCTION_DEPLOY_HELP,
                    PRODUCTION_DEPLOY_LINK,
                )])
                .after("artifact")
                .after("staging-verified"),
        ),
    ])
}

pub fn well_known_goals() -> WellKnownGoals {
    WellKnownGoals {
        inspect: Some(Goal::code_inspection()),
        push_impact: Some(Goal::push_impact()),
    }
}

// ── license-header ──

pub const LICENSE_HEADER: &str = "license-header";
const LICENSE_FILE: &str = "LICENSE";

/// License identifier from a LICENSE file: an SPDX-style first line such as
/// `Apache-2.0`, or `Apache-<version>` from the Apache license text.
pub fn license_id(text: &str) -> Option<String> {
    let first = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    if first.starts_with("Apache License") {
        let version = text
            .split_whitespace()
            .skip_while(|word| *word != "Version")
            .nth(1)?
            .trim_end_matches(',');
        return Some(format!("Apache-{}", version));
    }
    Some(first.to_string())
}

fn license_record(id: &str) -> FingerprintRecord {
    FingerprintRecord::new(LICENSE_HEADER, "1.0", serde_json::json!({ "text": id }))
}

fn apache_version(record: &FingerprintRecord) -> Option<(u32, u32)> {
    let version = record.field("text")?.strip_prefix("Apache-")?;
    let (major, minor) = version.split_once('.').unwrap_or((version, "0"));
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// Apache licenses compare by version. Anything else is incomparable and
/// never raises the ideal.
fn compare_licenses(baseline: &FingerprintRecord, candidate: &FingerprintRecord) -> Ordering {
    match (apache_version(baseline), apache_version(candidate)) {
        (Some(b), Some(c)) => c.cmp(&b),
        _ => Ordering::Equal,
    }
}

fn rate_license(record: &FingerprintRecord) -> Rating {
    match apache_version(record) {
        Some((major, _)) if major >= 2 => Rating::Good,
        Some(_) => Rating::Fair,
        None => Rating::Poor,
    }
}

pub fn license_header() -> Result<Feature, FeatureError> {
    Feature::builder(LICENSE_HEADER, "1.0", |project: &dyn Project| {
        Ok(project
            .read_file(LICENSE_FILE)?
            .and_then(|text| license_id(&text))
            .map(|id| license_record(&id)))
    })
    .ideal(license_record("Apache-2.0"))
    .comparison(ComparisonPolicy::Quality, compare_licenses)
    .rating(RatingScale::Health, rate_license)
    .summary(|record| record.field("text").unwrap_or("unknown license").to_string())
    .transform(|project, ideal| {
        let id = ideal.field("text").ok_or_else(|| FeatureError::TransformFailed {
            feature: LICENSE_HEADER.to_string(),
            reason: "ideal has no license text".to_string(),
        })?;
        project.write_file(LICENSE_FILE, &format!("{}\n", id))?;
        Ok(())
    })
    .build()
}

pub fn feature_set() -> Result<Vec<Feature>, FeatureError> {
    Ok(vec![license_header()?])
}

// ── Assembly ──

/// Everything a command needs, wired from config.
pub struct Sdm {
    pub config: SdmConfig,
    pub store: Arc<dyn Store>,
    pub resolver: GoalContributionResolver,
    pub features: Features,
    pub deployments: DeploymentStatusManager,
    pub loader: LocalProjectLoader,
    pub messages: LogMessageClient,
    pub events: EventDispatcher,
}

impl Sdm {
    pub fn assemble(config: SdmConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn Store> = Arc::new(
            JsonFileStore::new(&config.store_dir)
                .with_context(|| format!("opening store {}", config.store_dir.display()))?,
        );
        let features = Features::new(
            Arc::new(StoreFeatureStore::new(Arc::clone(&store))),
            feature_set()?,
        )?;
        seed_missing_ideals(&features)?;

        Ok(Self {
            resolver: GoalContributionResolver::new(goal_contributions()?),
            deployments: load_deployments(store.as_ref(), &config)?,
            store,
            loader: LocalProjectLoader::new(&config.repos_root, config.url_base.clone()),
            messages: LogMessageClient::with_outbox(&config.outbox),
            events: EventDispatcher::new().with_sink(Box::new(LogSink::new(&config.events_log))),
            features,
            config,
        })
    }

    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            loader: &self.loader,
            finder: &self.loader,
            messages: &self.messages,
            events: &self.events,
        }
    }

    /// Persist the current deployment status so later runs see it.
    pub fn save_deployments(&self) -> anyhow::Result<()> {
        let state = serde_json::to_value(self.deployments.snapshot()?)?;
        self.store.save(DEPLOYMENT_STATUS_KEY, &state)?;
        Ok(())
    }

    /// Push-impact reaction: a push that adds a Cloud Foundry manifest on
    /// the default branch enables production deployment for its repository.
    /// Returns whether deployment was newly enabled.
    pub fn enable_deploy_on_manifest_addition(&self, push: &Push) -> anyhow::Result<bool> {
        if !push.to_default_branch() || !push.adds_file(CLOUD_FOUNDRY_MANIFEST) {
            return Ok(false);
        }
        if self.deployments.is_deploy_enabled(&push.repo)? {
            return Ok(false);
        }
        self.deployments.enable_deploy(&push.repo)?;
        self.save_deployments()?;
        tracing::info!(repo = %push.repo, "manifest added, deployment enabled");
        Ok(true)
    }

    /// Read a push event from a JSON file.
    pub fn read_push(path: &std::path::Path) -> anyhow::Result<Push> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading push {}", path.display()))?;
        let push = serde_json::from_str(&json)
            .with_context(|| format!("parsing push {}", path.display()))?;
        Ok(push)
    }
}

/// The saved deployment status, or `[deploy]` from config when nothing has
/// been saved yet.
fn load_deployments(store: &dyn Store, config: &SdmConfig) -> anyhow::Result<DeploymentStatusManager> {
    match store.load(DEPLOYMENT_STATUS_KEY)? {
        Some(value) => {
            let state: DeploymentState =
                serde_json::from_value(value).context("parsing saved deployment status")?;
            Ok(DeploymentStatusManager::from_state(state))
        }
        None => config.deployments(),
    }
}

/// Store each feature's seed ideal unless an ideal is already stored.
fn seed_missing_ideals(features: &Features) -> anyhow::Result<()> {
    let store = features.store();
    for feature in features.features() {
        let Some(seed) = feature.seed_ideal() else {
            continue;
        };
        if store.ideal(feature.name())?.is_none() {
            store.set_ideal(seed)?;
            tracing::info!(feature = %feature.name(), "seeded ideal");
        }
    }
    Ok(())
}
