//! Environment writer: persist a new environment and its memberships once.

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::{debug, info};

use crate::error::{StoreError, TrackerError};
use crate::fingerprint::FactIdSet;
use crate::store::sqlite::{now_rfc3339, values_placeholders};
use crate::types::EnvironmentId;

/// Membership rows per multi-row statement; two bound parameters each.
const MEMBERSHIP_CHUNK: usize = 1_000;

/// Persist an environment for `fact_ids`, returning `(id, created)`.
///
/// The `signature` column is unique, so a concurrent writer that already
/// stored this fact set makes the insert a no-op; its id is then reused and
/// `created` is `false`. Membership rows are only written by the creator.
pub fn create_environment(
    conn: &Connection,
    fact_ids: &FactIdSet,
) -> crate::error::Result<(EnvironmentId, bool)> {
    let signature = fact_ids.signature();
    #[allow(clippy::cast_possible_wrap)]
    let fact_count = fact_ids.len() as i64;

    let inserted: Option<i64> = conn
        .query_row(
            "INSERT INTO environments (signature, fact_count, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(signature) DO NOTHING
             RETURNING id",
            params![signature, fact_count, now_rfc3339()],
            |row| row.get(0),
        )
        .optional()
        .map_err(StoreError::Sqlite)?;

    let Some(id) = inserted.map(EnvironmentId) else {
        let existing = environment_by_signature(conn, &signature)?.ok_or_else(|| {
            TrackerError::Consistency(format!(
                "environment signature {signature} conflicted but no row holds it"
            ))
        })?;
        debug!(
            environment = existing.0,
            "Environment already stored by another writer; reusing"
        );
        return Ok((existing, false));
    };

    let members: Vec<i64> = fact_ids.iter().map(|f| f.0).collect();
    for chunk in members.chunks(MEMBERSHIP_CHUNK) {
        let sql = format!(
            "INSERT INTO environment_facts (environment_id, fact_id) VALUES {}",
            values_placeholders(chunk.len(), 2)
        );
        let bound = chunk.iter().flat_map(|fact_id| [id.0, *fact_id]);
        conn.execute(&sql, params_from_iter(bound))
            .map_err(StoreError::Sqlite)?;
    }

    info!(environment = id.0, facts = members.len(), "Created environment");
    Ok((id, true))
}

/// Look up an environment by its fact-set signature.
pub fn environment_by_signature(
    conn: &Connection,
    signature: &str,
) -> crate::error::Result<Option<EnvironmentId>> {
    conn.query_row(
        "SELECT id FROM environments WHERE signature = ?1",
        params![signature],
        |row| row.get(0).map(EnvironmentId),
    )
    .optional()
    .map_err(StoreError::Sqlite)
    .map_err(TrackerError::Store)
}
