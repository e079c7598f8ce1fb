// error.rs — Error types for features, stores and messaging.

use sdm_goal::GoalError;
use thiserror::Error;

use crate::feature::{ComparisonPolicy, RatingScale};

/// Errors raised by a key/value [`Store`](crate::store::Store).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The store's internal lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Errors raised while delivering a message.
///
/// The rollout engine logs these and moves on to the next repository.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("delivery to channel '{channel}' failed: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("I/O error at {path}: {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Errors raised by features, the feature store and the rollout engine.
#[derive(Debug, Error)]
pub enum FeatureError {
    /// The feature has no comparator for this policy. A wiring mistake,
    /// never silently defaulted.
    #[error("feature '{feature}' does not support comparison policy '{policy}'")]
    UnsupportedComparisonPolicy {
        feature: String,
        policy: ComparisonPolicy,
    },

    /// The feature has no rater for this scale.
    #[error("feature '{feature}' does not support rating scale '{scale}'")]
    UnsupportedRatingScale { feature: String, scale: RatingScale },

    #[error("feature '{feature}' registers comparison policy '{policy}' twice")]
    DuplicateComparisonPolicy {
        feature: String,
        policy: ComparisonPolicy,
    },

    #[error("feature '{feature}' registers rating scale '{scale}' twice")]
    DuplicateRatingScale { feature: String, scale: RatingScale },

    #[error("feature '{0}' is registered twice")]
    DuplicateFeature(String),

    #[error("fingerprinting '{feature}' failed: {reason}")]
    FingerprintFailed { feature: String, reason: String },

    /// The fingerprinter produced a record for a different feature.
    #[error("feature '{feature}' fingerprinted a record named '{record}'")]
    RecordNameMismatch { feature: String, record: String },

    #[error("feature '{0}' has no transform")]
    NoTransform(String),

    #[error("transform for '{feature}' failed: {reason}")]
    TransformFailed { feature: String, reason: String },

    /// Neither the store nor the feature itself has an ideal to apply.
    #[error("feature '{0}' has no ideal")]
    NoIdeal(String),

    #[error("no feature handles command '{0}'")]
    UnknownCommand(String),

    #[error("unknown feature: {0}")]
    UnknownFeature(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Goal(#[from] GoalError),
}
