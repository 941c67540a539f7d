use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

// ── Typed ID wrappers ──────────────────────────────────────────────

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

typed_id!(FactId);
typed_id!(EnvironmentId);
typed_id!(InvocationId);
typed_id!(DataProductId);

// ── Facts ──────────────────────────────────────────────────────────

/// What a fact describes. A library and a variable sharing the same
/// `(name, value)` are different facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactKind {
    /// An installed library and its version.
    Library,
    /// An environment variable and its value.
    Variable,
}

impl FactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Library => "library",
            Self::Variable => "variable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "library" => Some(Self::Library),
            "variable" => Some(Self::Variable),
            _ => None,
        }
    }
}

impl std::fmt::Display for FactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The natural key of a fact: kind plus `(name, value)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FactKey {
    pub kind: FactKind,
    pub name: String,
    pub value: String,
}

impl FactKey {
    pub fn library(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            kind: FactKind::Library,
            name: name.into(),
            value: version.into(),
        }
    }

    pub fn variable(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: FactKind::Variable,
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A stored fact row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    pub key: FactKey,
}

// ── Environments and invocations ───────────────────────────────────

/// A stored environment: a deduplicated set of facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    /// SHA-256 over the sorted fact ids; unique per fact set.
    pub signature: String,
    pub fact_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Outcome of resolving an observed context to a stored environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEnvironment {
    pub id: EnvironmentId,
    /// `true` when this call persisted the environment.
    pub created: bool,
    pub fact_count: usize,
}

/// One tracked execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    pub id: InvocationId,
    pub environment_id: EnvironmentId,
    pub host: String,
    pub user: String,
    pub command: String,
    /// Caller-supplied name for the run (pipeline step, function, ...).
    pub label: String,
    pub started_at: DateTime<Utc>,
    /// `None` while the invocation is still open.
    pub ended_at: Option<DateTime<Utc>>,
}

// ── Data products ──────────────────────────────────────────────────

/// A tracked file at a point in time, identified by `(path, content_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataProduct {
    pub id: DataProductId,
    pub path: PathBuf,
    pub content_hash: ContentHash,
    pub invocation_id: InvocationId,
    pub created_at: DateTime<Utc>,
}

/// Row counts for every table in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub facts: u64,
    pub environments: u64,
    pub invocations: u64,
    pub data_products: u64,
    pub dependencies: u64,
}
