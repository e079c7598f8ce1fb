//! # sdm-feature
//!
//! Feature fingerprinting and drift convergence for the software delivery
//! machine.
//!
//! A [`Feature`] fingerprints one characteristic of a project (a license
//! header, a dependency version, a CI config) and knows how to compare and
//! rate those fingerprints. The [`FeatureStore`] holds the current ideal for
//! each feature. When a push beats the ideal, the [`RolloutEngine`] records
//! the new ideal and offers the upgrade to every repository that lags behind.
//!
//! ## Key components
//!
//! - [`FingerprintRecord`] — a named, versioned, digested fingerprint value
//! - [`Feature`] / [`FeatureBuilder`] — immutable feature definitions
//! - [`Store`] / [`FeatureStore`] — key/value persistence of ideals and
//!   observations
//! - [`RolloutEngine`] — ideal raising and rollout offers
//! - [`Features`] — the registry wiring features into the machine

pub mod error;
pub mod feature;
pub mod feature_store;
pub mod fingerprint;
pub mod message;
pub mod registry;
pub mod rollout;
pub mod store;

pub use error::{FeatureError, MessageError, StoreError};
pub use feature::{ComparisonPolicy, Feature, FeatureBuilder, Rating, RatingScale};
pub use feature_store::{FeatureStore, StoreFeatureStore};
pub use fingerprint::FingerprintRecord;
pub use message::{
    button_for_command, Action, Attachment, LogMessageClient, Message, MessageClient,
    RecordingMessageClient,
};
pub use registry::{FeatureResult, Features, Registration, WellKnownGoals};
pub use rollout::{
    rollout_message, Collaborators, RolloutDecision, RolloutEngine, RolloutFailure, RolloutOffer,
    RolloutOutcome,
};
pub use store::{InMemoryStore, JsonFileStore, Store};
