// rollout.rs — Raise a feature's ideal and offer the upgrade to lagging repos.
//
// On every qualifying push, for one feature:
//
//   no quality comparator      → NotComparable
//   no stored ideal            → NoIdeal
//   feature absent in the push → NotPresent
//   pushed value not better    → NotBetter   (no writes, no enumeration)
//   pushed value better        → set_ideal, then sweep every other known
//                                repository and send one offer to each
//                                repository where the feature lags.
//
// Nothing about a rollout is persisted besides the ideal itself; each push
// re-derives its decision from the store. A failing set_ideal aborts before
// any offer is sent. Failures during the sweep are isolated per repository.

use std::cmp::Ordering;
use std::sync::Arc;

use sdm_goal::{
    do_with_project, EventDispatcher, LoadMode, Project, ProjectLoader, RepoFinder, RepoRef,
    SdmEvent,
};
use serde::Serialize;

use crate::error::FeatureError;
use crate::feature::{ComparisonPolicy, Feature};
use crate::feature_store::FeatureStore;
use crate::fingerprint::FingerprintRecord;
use crate::message::{button_for_command, Attachment, Message, MessageClient};

/// External collaborators a rollout talks to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub loader: &'a dyn ProjectLoader,
    pub finder: &'a dyn RepoFinder,
    pub messages: &'a dyn MessageClient,
    pub events: &'a EventDispatcher,
}

/// An offer sent to one lagging repository.
#[derive(Debug, Clone, Serialize)]
pub struct RolloutOffer {
    pub repo: RepoRef,
    pub channel: String,
    pub command: String,
}

/// A repository the sweep could not handle. `repo` is `None` when the
/// repositories could not be enumerated at all.
#[derive(Debug, Clone, Serialize)]
pub struct RolloutFailure {
    pub repo: Option<RepoRef>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RolloutOutcome {
    pub previous: FingerprintRecord,
    pub ideal: FingerprintRecord,
    pub offers: Vec<RolloutOffer>,
    pub failures: Vec<RolloutFailure>,
}

/// What the engine decided for one feature on one push.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RolloutDecision {
    NotComparable,
    NoIdeal,
    NotPresent,
    NotBetter { ideal_sha: String },
    IdealRaised(RolloutOutcome),
}

impl RolloutDecision {
    pub fn label(&self) -> &'static str {
        match self {
            RolloutDecision::NotComparable => "not_comparable",
            RolloutDecision::NoIdeal => "no_ideal",
            RolloutDecision::NotPresent => "not_present",
            RolloutDecision::NotBetter { .. } => "not_better",
            RolloutDecision::IdealRaised(_) => "ideal_raised",
        }
    }

    /// Offers sent; empty unless the ideal was raised.
    pub fn offers(&self) -> &[RolloutOffer] {
        match self {
            RolloutDecision::IdealRaised(outcome) => outcome.offers.as_slice(),
            _ => &[],
        }
    }

    pub fn raised_ideal(&self) -> bool {
        matches!(self, RolloutDecision::IdealRaised(_))
    }
}

/// The offer sent to `repo`: one button bound to the feature's transform
/// command, targeted at that repository.
pub fn rollout_message(feature: &Feature, ideal: &FingerprintRecord, repo: &RepoRef) -> Message {
    Message::with_attachment(Attachment {
        text: format!(
            "Accept new feature {}: {}?",
            feature.name(),
            feature.summary(ideal)
        ),
        fallback: "accept feature".to_string(),
        actions: vec![button_for_command(
            format!("Accept feature {}", feature.name()),
            feature.transform_command_name(),
            [
                ("targets.owner", repo.owner.as_str()),
                ("targets.repo", repo.repo.as_str()),
            ],
        )],
    })
}

pub struct RolloutEngine {
    store: Arc<dyn FeatureStore>,
}

impl RolloutEngine {
    pub fn new(store: Arc<dyn FeatureStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn FeatureStore> {
        &self.store
    }

    /// Decide and act for `feature` after a push to `pushed`.
    pub fn on_push(
        &self,
        feature: &Feature,
        pushed: &dyn Project,
        with: &Collaborators<'_>,
    ) -> Result<RolloutDecision, FeatureError> {
        let name = feature.name();
        if !feature.supports_comparison(ComparisonPolicy::Quality) {
            tracing::info!(feature = %name, "feature doesn't support quality comparison");
            return Ok(RolloutDecision::NotComparable);
        }

        let Some(ideal) = self.store.ideal(name)? else {
            tracing::info!(feature = %name, "no ideal set, nothing to converge to");
            return Ok(RolloutDecision::NoIdeal);
        };

        let Some(candidate) = feature.fingerprint(pushed)? else {
            tracing::debug!(feature = %name, repo = %pushed.id(), "feature not present");
            return Ok(RolloutDecision::NotPresent);
        };

        if feature.compare(&ideal, &candidate, ComparisonPolicy::Quality)? != Ordering::Greater {
            tracing::debug!(feature = %name, repo = %pushed.id(), "pushed value does not beat ideal");
            return Ok(RolloutDecision::NotBetter {
                ideal_sha: ideal.sha,
            });
        }

        self.store.set_ideal(&candidate)?;
        let repo = pushed.id();
        tracing::info!(
            feature = %name,
            repo = %repo,
            previous = %feature.summary(&ideal),
            ideal = %feature.summary(&candidate),
            "push raised the ideal"
        );
        with.events
            .dispatch(&SdmEvent::ideal_raised(name, repo, &ideal.sha, &candidate.sha));

        let (offers, failures) = self.roll_out(feature, &candidate, repo, with);
        tracing::info!(
            feature = %name,
            offers = offers.len(),
            failures = failures.len(),
            "rollout sweep finished"
        );

        Ok(RolloutDecision::IdealRaised(RolloutOutcome {
            previous: ideal,
            ideal: candidate,
            offers,
            failures,
        }))
    }

    fn roll_out(
        &self,
        feature: &Feature,
        ideal: &FingerprintRecord,
        pushed: &RepoRef,
        with: &Collaborators<'_>,
    ) -> (Vec<RolloutOffer>, Vec<RolloutFailure>) {
        let mut offers = Vec::new();
        let mut failures = Vec::new();

        let repos = match with.finder.find_repos() {
            Ok(repos) => repos,
            Err(e) => {
                tracing::warn!(feature = %feature.name(), "cannot enumerate repositories: {}", e);
                failures.push(RolloutFailure {
                    repo: None,
                    reason: e.to_string(),
                });
                return (offers, failures);
            }
        };

        let command = feature.transform_command_name();
        for repo in repos {
            if repo.url == pushed.url {
                continue;
            }

            let lagging = match self.is_lagging(feature, ideal, &repo, with.loader) {
                Ok(lagging) => lagging,
                Err(e) => {
                    self.skip(feature, &repo, e.to_string(), with, &mut failures);
                    continue;
                }
            };
            if !lagging {
                tracing::debug!(feature = %feature.name(), repo = %repo, "not lagging");
                continue;
            }

            let message = rollout_message(feature, ideal, &repo);
            let channel = repo.repo.clone();
            match with.messages.address_channels(&message, &channel) {
                Ok(()) => {
                    tracing::info!(feature = %feature.name(), repo = %repo, "rollout offer sent");
                    with.events
                        .dispatch(&SdmEvent::rollout_offered(feature.name(), &repo, &command));
                    offers.push(RolloutOffer {
                        repo,
                        channel,
                        command: command.clone(),
                    });
                }
                Err(e) => self.skip(feature, &repo, e.to_string(), with, &mut failures),
            }
        }

        (offers, failures)
    }

    /// The feature is present in `repo` and its value is worse than `ideal`.
    fn is_lagging(
        &self,
        feature: &Feature,
        ideal: &FingerprintRecord,
        repo: &RepoRef,
        loader: &dyn ProjectLoader,
    ) -> Result<bool, FeatureError> {
        do_with_project(loader, repo, LoadMode::ReadOnly, |project| {
            match feature.fingerprint(project)? {
                Some(current) => Ok(feature.compare(&current, ideal, ComparisonPolicy::Quality)?
                    == Ordering::Greater),
                None => Ok(false),
            }
        })
    }

    fn skip(
        &self,
        feature: &Feature,
        repo: &RepoRef,
        reason: String,
        with: &Collaborators<'_>,
        failures: &mut Vec<RolloutFailure>,
    ) {
        tracing::warn!(feature = %feature.name(), repo = %repo, "skipping repository: {}", reason);
        with.events
            .dispatch(&SdmEvent::rollout_skipped(feature.name(), repo, reason.clone()));
        failures.push(RolloutFailure {
            repo: Some(repo.clone()),
            reason,
        });
    }
}
