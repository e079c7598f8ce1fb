// feature.rs — Features: fingerprinting, comparison and rating of one
// characteristic of a project.
//
// A Feature is built once by FeatureBuilder and is immutable afterwards.
// Comparators and raters live in fixed maps keyed by policy and scale, so
// asking for an unregistered one is a typed error. The `ideal` carried here
// is only a seed; the current target is always read through the
// FeatureStore.
//
//   let license = Feature::builder("license-header", "1.0", fingerprint_license)
//       .ideal(apache_2)
//       .comparison(ComparisonPolicy::Quality, compare_versions)
//       .transform(write_license)
//       .build()?;

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use sdm_goal::push_test::predicate;
use sdm_goal::{GoalError, Project, PushTest};
use serde::{Deserialize, Serialize};

use crate::error::FeatureError;
use crate::fingerprint::FingerprintRecord;

/// How two fingerprint values are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonPolicy {
    /// Which value is technically better.
    Quality,
    /// Which value is more widely used.
    Popularity,
}

impl fmt::Display for ComparisonPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonPolicy::Quality => write!(f, "quality"),
            ComparisonPolicy::Popularity => write!(f, "popularity"),
        }
    }
}

/// A scale a fingerprint value can be rated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingScale {
    Health,
    Risk,
}

impl fmt::Display for RatingScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RatingScale::Health => write!(f, "health"),
            RatingScale::Risk => write!(f, "risk"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Good,
    Fair,
    Poor,
}

type FingerprintFn =
    dyn Fn(&dyn Project) -> Result<Option<FingerprintRecord>, FeatureError> + Send + Sync;
/// `compare(baseline, candidate)`: `Greater` when `candidate` is better.
type CompareFn = dyn Fn(&FingerprintRecord, &FingerprintRecord) -> Ordering + Send + Sync;
type RateFn = dyn Fn(&FingerprintRecord) -> Rating + Send + Sync;
type TransformFn = dyn Fn(&dyn Project, &FingerprintRecord) -> Result<(), FeatureError> + Send + Sync;
type SummaryFn = dyn Fn(&FingerprintRecord) -> String + Send + Sync;

/// One fingerprintable characteristic of a project.
#[derive(Clone)]
pub struct Feature {
    name: String,
    version: String,
    fingerprinter: Arc<FingerprintFn>,
    ideal: Option<FingerprintRecord>,
    comparisons: BTreeMap<ComparisonPolicy, Arc<CompareFn>>,
    raters: BTreeMap<RatingScale, Arc<RateFn>>,
    relevant: PushTest,
    transform: Option<Arc<TransformFn>>,
    summary: Option<Arc<SummaryFn>>,
}

impl Feature {
    /// Start building a feature. Without `.relevant(..)` it applies to every push.
    pub fn builder<F>(name: impl Into<String>, version: impl Into<String>, fingerprinter: F) -> FeatureBuilder
    where
        F: Fn(&dyn Project) -> Result<Option<FingerprintRecord>, FeatureError> + Send + Sync + 'static,
    {
        FeatureBuilder {
            name: name.into(),
            version: version.into(),
            fingerprinter: Arc::new(fingerprinter),
            ideal: None,
            comparisons: Vec::new(),
            raters: Vec::new(),
            relevant: PushTest::Always,
            transform: None,
            summary: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The ideal the feature was built with. Not the current target.
    pub fn seed_ideal(&self) -> Option<&FingerprintRecord> {
        self.ideal.as_ref()
    }

    /// Which pushes this feature should be fingerprinted on.
    pub fn relevant(&self) -> &PushTest {
        &self.relevant
    }

    /// Fingerprint a project. `Ok(None)` when the feature is absent.
    ///
    /// A record must carry this feature's name: ideals and observations are
    /// keyed by it.
    pub fn fingerprint(&self, project: &dyn Project) -> Result<Option<FingerprintRecord>, FeatureError> {
        match (self.fingerprinter)(project)? {
            Some(record) if record.name != self.name => Err(FeatureError::RecordNameMismatch {
                feature: self.name.clone(),
                record: record.name,
            }),
            record => Ok(record),
        }
    }

    pub fn is_present(&self, project: &dyn Project) -> Result<bool, FeatureError> {
        Ok(self.fingerprint(project)?.is_some())
    }

    /// Push test matching projects where the feature is present.
    pub fn presence_test(&self) -> PushTest {
        let fingerprinter = Arc::clone(&self.fingerprinter);
        let test_name = format!("present:{}", self.name);
        let reported = test_name.clone();
        predicate(test_name, move |ctx| {
            fingerprinter(ctx.project)
                .map(|found| found.is_some())
                .map_err(|e| GoalError::PredicateFailed {
                    test: reported.clone(),
                    reason: e.to_string(),
                })
        })
    }

    /// Compare `candidate` against `baseline`. `Greater` means the candidate
    /// is better under `policy`.
    pub fn compare(
        &self,
        baseline: &FingerprintRecord,
        candidate: &FingerprintRecord,
        policy: ComparisonPolicy,
    ) -> Result<Ordering, FeatureError> {
        let compare = self
            .comparisons
            .get(&policy)
            .ok_or_else(|| FeatureError::UnsupportedComparisonPolicy {
                feature: self.name.clone(),
                policy,
            })?;
        Ok(compare(baseline, candidate))
    }

    pub fn supports_comparison(&self, policy: ComparisonPolicy) -> bool {
        self.comparisons.contains_key(&policy)
    }

    pub fn supported_comparison_policies(&self) -> Vec<ComparisonPolicy> {
        self.comparisons.keys().copied().collect()
    }

    pub fn rate(&self, record: &FingerprintRecord, scale: RatingScale) -> Result<Rating, FeatureError> {
        let rate = self
            .raters
            .get(&scale)
            .ok_or_else(|| FeatureError::UnsupportedRatingScale {
                feature: self.name.clone(),
                scale,
            })?;
        Ok(rate(record))
    }

    pub fn supported_rating_scales(&self) -> Vec<RatingScale> {
        self.raters.keys().copied().collect()
    }

    /// One-line description of a value, used in rollout offers.
    /// Defaults to the JSON of `data`.
    pub fn summary(&self, record: &FingerprintRecord) -> String {
        match &self.summary {
            Some(summarize) => summarize(record),
            None => record.data.to_string(),
        }
    }

    pub fn has_transform(&self) -> bool {
        self.transform.is_some()
    }

    /// Bring `project` to the value `ideal`.
    pub fn apply(&self, project: &dyn Project, ideal: &FingerprintRecord) -> Result<(), FeatureError> {
        let transform = self
            .transform
            .as_ref()
            .ok_or_else(|| FeatureError::NoTransform(self.name.clone()))?;
        transform(project, ideal)
    }

    /// Distinct values among `snapshots`, first occurrence kept.
    pub fn uniques(&self, snapshots: &[FingerprintRecord]) -> Vec<FingerprintRecord> {
        let mut seen = HashSet::new();
        snapshots
            .iter()
            .filter(|s| seen.insert(s.sha.as_str()))
            .cloned()
            .collect()
    }

    /// Name of the code transform command, bound to rollout offer buttons.
    pub fn transform_command_name(&self) -> String {
        format!("tr-{}", self.name)
    }

    pub fn inspection_name(&self) -> String {
        format!("inspect={}", self.name)
    }

    pub fn push_impact_name(&self) -> String {
        format!("pi-{}", self.name)
    }
}

impl fmt::Debug for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feature")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("ideal", &self.ideal)
            .field("comparisons", &self.supported_comparison_policies())
            .field("raters", &self.supported_rating_scales())
            .field("relevant", &self.relevant)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// Builder for [`Feature`]. Duplicate policies or scales fail in `build`.
pub struct FeatureBuilder {
    name: String,
    version: String,
    fingerprinter: Arc<FingerprintFn>,
    ideal: Option<FingerprintRecord>,
    comparisons: Vec<(ComparisonPolicy, Arc<CompareFn>)>,
    raters: Vec<(RatingScale, Arc<RateFn>)>,
    relevant: PushTest,
    transform: Option<Arc<TransformFn>>,
    summary: Option<Arc<SummaryFn>>,
}

impl FeatureBuilder {
    pub fn ideal(mut self, ideal: FingerprintRecord) -> Self {
        self.ideal = Some(ideal);
        self
    }

    pub fn comparison<F>(mut self, policy: ComparisonPolicy, compare: F) -> Self
    where
        F: Fn(&FingerprintRecord, &FingerprintRecord) -> Ordering + Send + Sync + 'static,
    {
        self.comparisons.push((policy, Arc::new(compare)));
        self
    }

    pub fn rating<F>(mut self, scale: RatingScale, rate: F) -> Self
    where
        F: Fn(&FingerprintRecord) -> Rating + Send + Sync + 'static,
    {
        self.raters.push((scale, Arc::new(rate)));
        self
    }

    pub fn relevant(mut self, test: PushTest) -> Self {
        self.relevant = test;
        self
    }

    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&dyn Project, &FingerprintRecord) -> Result<(), FeatureError> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn summary<F>(mut self, summary: F) -> Self
    where
        F: Fn(&FingerprintRecord) -> String + Send + Sync + 'static,
    {
        self.summary = Some(Arc::new(summary));
        self
    }

    pub fn build(self) -> Result<Feature, FeatureError> {
        let mut comparisons = BTreeMap::new();
        for (policy, compare) in self.comparisons {
            if comparisons.insert(policy, compare).is_some() {
                return Err(FeatureError::DuplicateComparisonPolicy {
                    feature: self.name,
                    policy,
                });
            }
        }

        let mut raters = BTreeMap::new();
        for (scale, rate) in self.raters {
            if raters.insert(scale, rate).is_some() {
                return Err(FeatureError::DuplicateRatingScale {
                    feature: self.name,
                    scale,
                });
            }
        }

        Ok(Feature {
            name: self.name,
            version: self.version,
            fingerprinter: self.fingerprinter,
            ideal: self.ideal,
            comparisons,
            raters,
            relevant: self.relevant,
            transform: self.transform,
            summary: self.summary,
        })
    }
}
