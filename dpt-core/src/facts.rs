//! Library/variable store: globally deduplicated `(kind, name, value)` facts.

use std::collections::HashMap;

use rusqlite::{Connection, params, params_from_iter};
use tracing::debug;

use crate::error::{StoreError, TrackerError};
use crate::fingerprint::{FactIdSet, Fingerprint};
use crate::store::sqlite::{now_rfc3339, values_placeholders};
use crate::types::{EnvironmentId, Fact, FactId, FactKey, FactKind};

/// Rows per multi-row statement; four bound parameters each.
const INSERT_CHUNK: usize = 500;

/// Resolve every fact in `fingerprint` to its id, creating missing rows.
///
/// Each chunk is one `INSERT … ON CONFLICT DO UPDATE … RETURNING` statement:
/// the no-op update makes pre-existing rows come back through `RETURNING`
/// alongside the new ones, so a single statement both inserts and resolves.
/// Run this inside a transaction; a failure leaves no partial batch behind.
pub fn ensure_facts(
    conn: &Connection,
    fingerprint: &Fingerprint,
) -> crate::error::Result<HashMap<FactKey, FactId>> {
    let keys: Vec<&FactKey> = fingerprint.iter().collect();
    let mut resolved = HashMap::with_capacity(keys.len());
    let created_at = now_rfc3339();

    for chunk in keys.chunks(INSERT_CHUNK) {
        let sql = format!(
            "INSERT INTO facts (kind, name, value, created_at) VALUES {}
             ON CONFLICT(kind, name, value) DO UPDATE SET name = excluded.name
             RETURNING id, kind, name, value",
            values_placeholders(chunk.len(), 4)
        );
        let bound = chunk.iter().flat_map(|key| {
            [
                key.kind.as_str(),
                key.name.as_str(),
                key.value.as_str(),
                created_at.as_str(),
            ]
        });

        let mut stmt = conn.prepare(&sql).map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params_from_iter(bound), row_to_fact)
            .map_err(StoreError::Sqlite)?;
        for row in rows {
            let fact = row.map_err(StoreError::Sqlite)?;
            resolved.insert(fact.key, fact.id);
        }
    }

    if resolved.len() != fingerprint.len() {
        return Err(TrackerError::Consistency(format!(
            "resolved {} of {} facts",
            resolved.len(),
            fingerprint.len()
        )));
    }

    debug!(facts = resolved.len(), "Resolved fact batch");
    Ok(resolved)
}

/// Resolve a fingerprint straight to the id set used for matching.
pub fn ensure_fact_ids(
    conn: &Connection,
    fingerprint: &Fingerprint,
) -> crate::error::Result<FactIdSet> {
    Ok(ensure_facts(conn, fingerprint)?.into_values().collect())
}

/// Every fact referenced by an environment, in `(kind, name, value)` order.
pub fn facts_of_environment(
    conn: &Connection,
    environment_id: EnvironmentId,
) -> crate::error::Result<Vec<Fact>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT f.id, f.kind, f.name, f.value FROM facts f
             JOIN environment_facts ef ON ef.fact_id = f.id
             WHERE ef.environment_id = ?1
             ORDER BY f.kind, f.name, f.value",
        )
        .map_err(StoreError::Sqlite)?;
    let facts = stmt
        .query_map(params![environment_id.0], row_to_fact)
        .map_err(StoreError::Sqlite)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(StoreError::Sqlite)?;
    Ok(facts)
}

fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Fact> {
    let kind_str: String = row.get(1)?;
    let kind = FactKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown fact kind {kind_str:?}").into(),
        )
    })?;
    Ok(Fact {
        id: FactId(row.get(0)?),
        key: FactKey {
            kind,
            name: row.get(2)?,
            value: row.get(3)?,
        },
    })
}
