//! Environment matcher: find the stored environment whose fact set equals a
//! given set exactly.
//!
//! A candidate matches when every given fact is attached to it (matched
//! count = `len`) and it has no other facts (total count = `len`). Either
//! test alone is wrong: matched count alone accepts supersets, total count
//! alone accepts unrelated sets of the same size.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, params};
use tracing::{debug, trace};

use crate::error::{StoreError, TrackerError};
use crate::fingerprint::FactIdSet;
use crate::types::EnvironmentId;

/// Set-equality lookup over `environment_facts` with a process-local cache.
///
/// The cache is keyed by [`FactIdSet::signature`]. Environments are never
/// deleted, so an entry can only be missing, never wrong; entries written by
/// other processes are picked up by the query path on first miss.
#[derive(Debug)]
pub struct EnvironmentMatcher {
    cache: Option<Mutex<HashMap<String, EnvironmentId>>>,
}

impl Default for EnvironmentMatcher {
    fn default() -> Self {
        Self::new(true)
    }
}

impl EnvironmentMatcher {
    pub fn new(cache_enabled: bool) -> Self {
        Self {
            cache: cache_enabled.then(|| Mutex::new(HashMap::new())),
        }
    }

    /// Matcher that always goes to the store.
    pub fn uncached() -> Self {
        Self::new(false)
    }

    fn cache(&self) -> Option<MutexGuard<'_, HashMap<String, EnvironmentId>>> {
        self.cache
            .as_ref()
            .map(|c| c.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Find the environment whose fact set is exactly `fact_ids`.
    ///
    /// Returns `ConsistencyError` if more than one environment qualifies.
    pub fn find_environment(
        &self,
        conn: &Connection,
        fact_ids: &FactIdSet,
    ) -> crate::error::Result<Option<EnvironmentId>> {
        let signature = fact_ids.signature();
        if let Some(id) = self.cache().and_then(|c| c.get(&signature).copied()) {
            trace!(environment = id.0, "Environment cache hit");
            return Ok(Some(id));
        }

        let candidates = if fact_ids.is_empty() {
            query_empty_environments(conn)?
        } else {
            query_exact_environments(conn, fact_ids)?
        };

        match candidates.as_slice() {
            [] => {
                debug!(facts = fact_ids.len(), "No matching environment");
                Ok(None)
            }
            [id] => {
                self.remember(signature, *id);
                debug!(environment = id.0, facts = fact_ids.len(), "Matched environment");
                Ok(Some(*id))
            }
            many => Err(TrackerError::Consistency(format!(
                "{} environments share one fact set of size {}: {:?}",
                many.len(),
                fact_ids.len(),
                many.iter().map(|id| id.0).collect::<Vec<_>>()
            ))),
        }
    }

    /// Record a known signature → environment mapping.
    pub fn remember(&self, signature: String, id: EnvironmentId) {
        if let Some(mut cache) = self.cache() {
            cache.insert(signature, id);
        }
    }

    /// Drop every cached entry.
    pub fn invalidate(&self) {
        if let Some(mut cache) = self.cache() {
            cache.clear();
        }
    }

    /// Number of cached entries (0 when caching is disabled).
    pub fn len(&self) -> usize {
        self.cache().map_or(0, |c| c.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One pass over the join table restricted to the given ids, grouped by
/// environment, keeping groups whose matched and total counts both equal `len`.
fn query_exact_environments(
    conn: &Connection,
    fact_ids: &FactIdSet,
) -> crate::error::Result<Vec<EnvironmentId>> {
    let ids_json = fact_ids.to_json().map_err(StoreError::Serialization)?;
    #[allow(clippy::cast_possible_wrap)]
    let len = fact_ids.len() as i64;

    let mut stmt = conn
        .prepare_cached(
            "SELECT ef.environment_id
             FROM environment_facts ef
             WHERE ef.fact_id IN (SELECT value FROM json_each(?1))
             GROUP BY ef.environment_id
             HAVING COUNT(*) = ?2
                AND (SELECT COUNT(*) FROM environment_facts total
                     WHERE total.environment_id = ef.environment_id) = ?2
             ORDER BY ef.environment_id",
        )
        .map_err(StoreError::Sqlite)?;
    let ids = stmt
        .query_map(params![ids_json, len], |row| row.get(0).map(EnvironmentId))
        .map_err(StoreError::Sqlite)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(StoreError::Sqlite)?;
    Ok(ids)
}

/// Environments with no facts at all; the only valid match for an empty set.
fn query_empty_environments(conn: &Connection) -> crate::error::Result<Vec<EnvironmentId>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT e.id FROM environments e
             WHERE NOT EXISTS (
                SELECT 1 FROM environment_facts ef WHERE ef.environment_id = e.id
             )
             ORDER BY e.id",
        )
        .map_err(StoreError::Sqlite)?;
    let ids = stmt
        .query_map([], |row| row.get(0).map(EnvironmentId))
        .map_err(StoreError::Sqlite)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(StoreError::Sqlite)?;
    Ok(ids)
}
