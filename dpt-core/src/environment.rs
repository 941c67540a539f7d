//! Resolve an observed context to a stored environment: reuse or create.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::error::StoreError;
use crate::facts::ensure_fact_ids;
use crate::fingerprint::Fingerprint;
use crate::matcher::EnvironmentMatcher;
use crate::store::SqliteStore;
use crate::store::sqlite::parse_timestamp;
use crate::types::{Environment, EnvironmentId, ResolvedEnvironment};
use crate::writer::create_environment;

/// Find or persist the environment for `fingerprint`.
///
/// Fact resolution, matching and creation share one immediate transaction:
/// the write lock is held from the first fact insert to the last membership
/// row, so concurrent callers observing the same new context serialize and
/// the later one matches the earlier one's environment.
pub fn resolve_environment(
    store: &SqliteStore,
    matcher: &EnvironmentMatcher,
    fingerprint: &Fingerprint,
) -> crate::error::Result<ResolvedEnvironment> {
    let (resolved, signature) = store.with_immediate_transaction(|tx| {
        let fact_ids = ensure_fact_ids(tx, fingerprint)?;
        let signature = fact_ids.signature();

        if let Some(id) = matcher.find_environment(tx, &fact_ids)? {
            let resolved = ResolvedEnvironment {
                id,
                created: false,
                fact_count: fact_ids.len(),
            };
            return Ok((resolved, signature));
        }

        let (id, created) = create_environment(tx, &fact_ids)?;
        let resolved = ResolvedEnvironment {
            id,
            created,
            fact_count: fact_ids.len(),
        };
        Ok((resolved, signature))
    })?;

    // A newly created environment is cached only after commit. Matches of
    // already-committed rows are cached by the matcher itself.
    matcher.remember(signature, resolved.id);

    debug!(
        environment = resolved.id.0,
        created = resolved.created,
        facts = resolved.fact_count,
        "Resolved environment"
    );
    Ok(resolved)
}

/// Load an environment row.
pub fn get_environment(
    conn: &Connection,
    id: EnvironmentId,
) -> crate::error::Result<Option<Environment>> {
    conn.query_row(
        "SELECT id, signature, fact_count, created_at FROM environments WHERE id = ?1",
        params![id.0],
        |row| {
            let created_at: String = row.get(3)?;
            let fact_count: i64 = row.get(2)?;
            Ok(Environment {
                id: EnvironmentId(row.get(0)?),
                signature: row.get(1)?,
                fact_count: usize::try_from(fact_count).unwrap_or_default(),
                created_at: parse_timestamp(3, &created_at)?,
            })
        },
    )
    .optional()
    .map_err(StoreError::Sqlite)
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::facts_of_environment;

    fn numpy_pandas() -> Fingerprint {
        Fingerprint::builder()
            .library("numpy", "1.2")
            .library("pandas", "2.0")
            .build()
    }

    #[test]
    fn first_resolution_creates_then_reuses() {
        let store = SqliteStore::in_memory().unwrap();
        let matcher = EnvironmentMatcher::default();

        let first = resolve_environment(&store, &matcher, &numpy_pandas()).unwrap();
        let second = resolve_environment(&store, &matcher, &numpy_pandas()).unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(first.fact_count, 2);
        assert_eq!(matcher.len(), 1);
    }

    #[test]
    fn order_of_observation_does_not_matter() {
        let store = SqliteStore::in_memory().unwrap();
        let matcher = EnvironmentMatcher::uncached();

        let ab = Fingerprint::builder().library("A", "1").library("B", "2").build();
        let ba = Fingerprint::builder().library("B", "2").library("A", "1").build();

        let x = resolve_environment(&store, &matcher, &ab).unwrap();
        let y = resolve_environment(&store, &matcher, &ba).unwrap();
        assert_eq!(x.id, y.id);
    }

    #[test]
    fn superset_gets_its_own_environment() {
        let store = SqliteStore::in_memory().unwrap();
        let matcher = EnvironmentMatcher::default();

        let a = Fingerprint::builder().library("A", "1").build();
        let ab = Fingerprint::builder().library("A", "1").library("B", "2").build();

        let x = resolve_environment(&store, &matcher, &a).unwrap();
        let y = resolve_environment(&store, &matcher, &ab).unwrap();
        assert_ne!(x.id, y.id);

        // (A, 1) is stored once and shared by both environments.
        let stats = store.stats().unwrap();
        assert_eq!(stats.facts, 2);
        assert_eq!(stats.environments, 2);
    }

    #[test]
    fn empty_context_does_not_match_nonempty_environment() {
        let store = SqliteStore::in_memory().unwrap();
        let matcher = EnvironmentMatcher::default();

        let full = resolve_environment(&store, &matcher, &numpy_pandas()).unwrap();
        let empty = resolve_environment(&store, &matcher, &Fingerprint::default()).unwrap();
        let empty_again =
            resolve_environment(&store, &matcher, &Fingerprint::default()).unwrap();

        assert_ne!(full.id, empty.id);
        assert!(empty.created);
        assert_eq!(empty.id, empty_again.id);
        assert!(!empty_again.created);
    }

    #[test]
    fn environment_row_is_loadable() {
        let store = SqliteStore::in_memory().unwrap();
        let matcher = EnvironmentMatcher::default();
        let resolved = resolve_environment(&store, &matcher, &numpy_pandas()).unwrap();

        let env = store
            .read(|conn| get_environment(conn, resolved.id))
            .unwrap()
            .unwrap();
        assert_eq!(env.fact_count, 2);
        let facts = store
            .read(|conn| facts_of_environment(conn, resolved.id))
            .unwrap();
        assert_eq!(facts[0].key.name, "numpy");
        assert_eq!(facts[1].key.name, "pandas");
    }
}
