// registry.rs — Integrate a set of features with the delivery machine.
//
// `enable` lists what each feature contributes to the machine's registries:
// a `tr-<name>` transform command, an `inspect=<name>` code inspection, a
// `pi-<name>` push-impact reaction and a fingerprinter. The other methods are
// the bodies of those registrations: `on_push` is the push-impact reaction,
// `record_observations` the fingerprint goal, `inspect` the inspection and
// `accept` the transform command invoked from a rollout offer's button.
//
// Each feature is handled independently. One feature failing never stops the
// others from being evaluated for the same push.

use std::collections::HashSet;
use std::sync::Arc;

use sdm_goal::{
    do_with_project, Goal, GoalError, LoadMode, Project, ProjectLoader, PushContext, RepoFinder,
};
use serde::Serialize;

use crate::error::FeatureError;
use crate::feature::Feature;
use crate::feature_store::FeatureStore;
use crate::fingerprint::FingerprintRecord;
use crate::message::Action;
use crate::rollout::{Collaborators, RolloutDecision, RolloutEngine};

/// Goals that feature reactions attach to. Either may be absent.
#[derive(Debug, Clone, Default)]
pub struct WellKnownGoals {
    pub inspect: Option<Goal>,
    pub push_impact: Option<Goal>,
}

/// Something a feature registers with the delivery machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Registration {
    CodeTransform { name: String, intent: String },
    Inspection { goal: String, name: String },
    PushImpact { goal: String, name: String, push_test: String },
    Fingerprinter { name: String, push_test: String },
}

impl Registration {
    pub fn name(&self) -> &str {
        match self {
            Registration::CodeTransform { name, .. }
            | Registration::Inspection { name, .. }
            | Registration::PushImpact { name, .. }
            | Registration::Fingerprinter { name, .. } => name,
        }
    }
}

/// The result of running one feature.
#[derive(Debug)]
pub struct FeatureResult<T> {
    pub feature: String,
    pub result: Result<T, FeatureError>,
}

/// A fixed set of features plus the store their ideals live in.
pub struct Features {
    features: Vec<Feature>,
    engine: RolloutEngine,
}

impl Features {
    /// Fails if two features share a name.
    pub fn new(store: Arc<dyn FeatureStore>, features: Vec<Feature>) -> Result<Self, FeatureError> {
        let mut names = HashSet::new();
        for feature in &features {
            if !names.insert(feature.name()) {
                return Err(FeatureError::DuplicateFeature(feature.name().to_string()));
            }
        }
        Ok(Self {
            features,
            engine: RolloutEngine::new(store),
        })
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn get(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name() == name)
    }

    pub fn store(&self) -> &Arc<dyn FeatureStore> {
        self.engine.store()
    }

    /// Registrations for every feature. Transform, inspection and push-impact
    /// registrations only exist for features that have a transform.
    pub fn enable(&self, goals: &WellKnownGoals) -> Vec<Registration> {
        tracing::info!(
            features = self.features.len(),
            inspect = goals.inspect.is_some(),
            push_impact = goals.push_impact.is_some(),
            "enabling features"
        );
        let mut registrations = Vec::new();
        for feature in self.features.iter().filter(|f| f.has_transform()) {
            registrations.push(Registration::CodeTransform {
                name: feature.transform_command_name(),
                intent: format!("transform {}", feature.name()),
            });
            if let Some(goal) = &goals.inspect {
                registrations.push(Registration::Inspection {
                    goal: goal.key.clone(),
                    name: feature.inspection_name(),
                });
            }
            if let Some(goal) = &goals.push_impact {
                registrations.push(Registration::PushImpact {
                    goal: goal.key.clone(),
                    name: feature.push_impact_name(),
                    push_test: feature.presence_test().describe(),
                });
            }
        }
        for feature in &self.features {
            registrations.push(Registration::Fingerprinter {
                name: feature.name().to_string(),
                push_test: feature.relevant().describe(),
            });
        }
        registrations
    }

    /// Push-impact reaction: run the rollout engine for every feature with a
    /// transform whose relevance test matches the push.
    pub fn on_push(
        &self,
        ctx: &PushContext<'_>,
        with: &Collaborators<'_>,
    ) -> Vec<FeatureResult<RolloutDecision>> {
        let mut results = Vec::new();
        for feature in self.features.iter().filter(|f| f.has_transform()) {
            match feature.relevant().evaluate(ctx) {
                Ok(false) => continue,
                Ok(true) => {
                    tracing::info!(
                        feature = %feature.name(),
                        repo = %ctx.push.repo,
                        "push on project with feature"
                    );
                    let result = self.engine.on_push(feature, ctx.project, with);
                    if let Err(e) = &result {
                        tracing::warn!(feature = %feature.name(), "rollout failed: {}", e);
                    }
                    results.push(FeatureResult {
                        feature: feature.name().to_string(),
                        result,
                    });
                }
                Err(e) => results.push(FeatureResult {
                    feature: feature.name().to_string(),
                    result: Err(e.into()),
                }),
            }
        }
        results
    }

    /// Fingerprint goal: record the pushed project's fingerprint for every
    /// relevant feature.
    pub fn record_observations(
        &self,
        ctx: &PushContext<'_>,
    ) -> Vec<FeatureResult<Option<FingerprintRecord>>> {
        let mut results = Vec::new();
        for feature in &self.features {
            let result = match feature.relevant().evaluate(ctx) {
                Ok(false) => continue,
                Ok(true) => self.observe(feature, ctx),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = &result {
                tracing::warn!(feature = %feature.name(), "fingerprinting failed: {}", e);
            }
            results.push(FeatureResult {
                feature: feature.name().to_string(),
                result,
            });
        }
        results
    }

    fn observe(
        &self,
        feature: &Feature,
        ctx: &PushContext<'_>,
    ) -> Result<Option<FingerprintRecord>, FeatureError> {
        let Some(record) = feature.fingerprint(ctx.project)? else {
            return Ok(None);
        };
        self.store().store(&ctx.push.repo, &record)?;
        Ok(Some(record))
    }

    /// Inspection: every feature's fingerprint of `project`.
    pub fn inspect(&self, project: &dyn Project) -> Vec<FeatureResult<Option<FingerprintRecord>>> {
        self.features
            .iter()
            .map(|feature| FeatureResult {
                feature: feature.name().to_string(),
                result: feature.fingerprint(project),
            })
            .collect()
    }

    /// Transform command behind a rollout offer's button: bring
    /// `owner/repo` to the feature's current ideal.
    ///
    /// The stored ideal is used when there is one, else the feature's seed.
    /// Returns the value applied.
    pub fn accept(
        &self,
        command: &str,
        owner: &str,
        repo: &str,
        loader: &dyn ProjectLoader,
        finder: &dyn RepoFinder,
    ) -> Result<FingerprintRecord, FeatureError> {
        let feature = self
            .features
            .iter()
            .find(|f| f.transform_command_name() == command)
            .ok_or_else(|| FeatureError::UnknownCommand(command.to_string()))?;

        let target = finder
            .find_repos()?
            .into_iter()
            .find(|r| r.owner == owner && r.repo == repo)
            .ok_or_else(|| GoalError::ProjectNotFound(format!("{}/{}", owner, repo)))?;

        let ideal = match self.store().ideal(feature.name())? {
            Some(ideal) => ideal,
            None => feature
                .seed_ideal()
                .cloned()
                .ok_or_else(|| FeatureError::NoIdeal(feature.name().to_string()))?,
        };

        do_with_project(loader, &target, LoadMode::Writable, |project| {
            feature.apply(project, &ideal)
        })?;
        tracing::info!(
            feature = %feature.name(),
            repo = %target,
            value = %feature.summary(&ideal),
            "feature accepted"
        );
        Ok(ideal)
    }

    /// [`Features::accept`] driven by a pressed button.
    pub fn accept_action(
        &self,
        action: &Action,
        loader: &dyn ProjectLoader,
        finder: &dyn RepoFinder,
    ) -> Result<FingerprintRecord, FeatureError> {
        let param = |key: &str| {
            action
                .parameters
                .get(key)
                .map(String::as_str)
                .ok_or_else(|| {
                    FeatureError::UnknownCommand(format!("{} (missing {})", action.command, key))
                })
        };
        self.accept(&action.command, param("targets.owner")?, param("targets.repo")?, loader, finder)
    }

    /// Distinct values of the named feature among `snapshots`.
    pub fn uniques(
        &self,
        name: &str,
        snapshots: &[FingerprintRecord],
    ) -> Result<Vec<FingerprintRecord>, FeatureError> {
        let feature = self
            .get(name)
            .ok_or_else(|| FeatureError::UnknownFeature(name.to_string()))?;
        Ok(feature.uniques(snapshots))
    }
}
