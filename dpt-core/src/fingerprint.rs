//! Canonical, order-independent forms of an observed execution context.
//!
//! A [`Fingerprint`] is the set of facts observed for one context; a
//! [`FactIdSet`] is the same set after the facts have been resolved to
//! stored ids. Both are sets: ordering exists only to make signatures stable.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::observe::Observation;
use crate::types::{FactId, FactKey};

/// Canonical set of observed facts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    facts: BTreeSet<FactKey>,
}

impl Fingerprint {
    pub fn builder() -> FingerprintBuilder {
        FingerprintBuilder::default()
    }

    /// Build from raw fact keys; duplicates collapse.
    pub fn from_facts(facts: impl IntoIterator<Item = FactKey>) -> Self {
        Self {
            facts: facts.into_iter().collect(),
        }
    }

    pub fn from_observation(observation: &Observation) -> Self {
        Self::builder()
            .libraries(observation.libraries.iter().cloned())
            .variables(observation.variables.iter().cloned())
            .build()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Facts in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &FactKey> {
        self.facts.iter()
    }

    pub fn contains(&self, key: &FactKey) -> bool {
        self.facts.contains(key)
    }

    /// Stable SHA-256 hex over the canonical order of the facts.
    pub fn signature(&self) -> String {
        let mut hasher = Sha256::new();
        for fact in &self.facts {
            // Length-prefix every field so ("ab","c") and ("a","bc") differ.
            for field in [fact.kind.as_str(), &fact.name, &fact.value] {
                hasher.update((field.len() as u64).to_le_bytes());
                hasher.update(field.as_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Accumulates raw `(name, value)` observations into a [`Fingerprint`].
#[derive(Debug, Default)]
pub struct FingerprintBuilder {
    facts: BTreeSet<FactKey>,
}

impl FingerprintBuilder {
    #[must_use]
    pub fn library(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.facts.insert(FactKey::library(name, version));
        self
    }

    #[must_use]
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.facts.insert(FactKey::variable(name, value));
        self
    }

    #[must_use]
    pub fn libraries(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.facts
            .extend(pairs.into_iter().map(|(n, v)| FactKey::library(n, v)));
        self
    }

    #[must_use]
    pub fn variables(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.facts
            .extend(pairs.into_iter().map(|(n, v)| FactKey::variable(n, v)));
        self
    }

    pub fn build(self) -> Fingerprint {
        Fingerprint { facts: self.facts }
    }
}

/// Set of resolved fact ids describing one environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactIdSet {
    ids: BTreeSet<FactId>,
}

impl FactIdSet {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = FactId> + '_ {
        self.ids.iter().copied()
    }

    /// Raw ids as a JSON array, the form bulk membership queries bind.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.ids.iter().map(|id| id.0).collect::<Vec<_>>())
    }

    /// Stable SHA-256 hex over the sorted ids.
    ///
    /// Used both as the matcher's cache key and as the unique column that
    /// keeps two environments from sharing one fact set.
    pub fn signature(&self) -> String {
        let mut joined = String::with_capacity(self.ids.len() * 8);
        for (i, id) in self.ids.iter().enumerate() {
            if i > 0 {
                joined.push(',');
            }
            let _ = write!(joined, "{}", id.0);
        }
        format!("{:x}", Sha256::digest(joined.as_bytes()))
    }
}

impl FromIterator<FactId> for FactIdSet {
    fn from_iter<I: IntoIterator<Item = FactId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}
