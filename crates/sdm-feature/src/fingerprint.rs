// fingerprint.rs — Fingerprint records and their content digests.
//
// A fingerprint summarises one characteristic of a project's code as JSON.
// The `sha` is computed over the canonical serialization of `data`, so two
// records with the same value always carry the same digest regardless of the
// key order they were built with.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A named, versioned fingerprint value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FingerprintRecord {
    /// Name of the feature that produced this fingerprint.
    pub name: String,
    pub version: String,
    pub data: Value,
    /// Lowercase hex SHA-256 of the canonical JSON of `data`.
    pub sha: String,
}

impl FingerprintRecord {
    pub fn new(name: impl Into<String>, version: impl Into<String>, data: Value) -> Self {
        let sha = data_sha(&data);
        Self {
            name: name.into(),
            version: version.into(),
            data,
            sha,
        }
    }

    /// String field of `data`, if present.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// True when both records hold the same value.
    pub fn same_value(&self, other: &FingerprintRecord) -> bool {
        self.sha == other.sha
    }
}

/// Digest of a fingerprint value.
///
/// `serde_json::Value` keeps object keys sorted, so serializing it yields a
/// canonical form.
pub fn data_sha(data: &Value) -> String {
    let canonical = data.to_string();
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}
