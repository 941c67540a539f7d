//! Invocation rows: one per tracked execution.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use crate::error::{StoreError, TrackerError};
use crate::observe::Observation;
use crate::store::sqlite::{now_rfc3339, parse_timestamp};
use crate::types::{EnvironmentId, Invocation, InvocationId};

/// Insert an open invocation tied to `environment_id`.
pub fn begin_invocation(
    conn: &Connection,
    environment_id: EnvironmentId,
    observation: &Observation,
    label: &str,
) -> crate::error::Result<InvocationId> {
    conn.execute(
        "INSERT INTO invocations (environment_id, host, user, command, label, started_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            environment_id.0,
            observation.host,
            observation.user,
            observation.command,
            label,
            now_rfc3339()
        ],
    )
    .map_err(StoreError::Sqlite)?;
    let id = InvocationId(conn.last_insert_rowid());
    info!(invocation = id.0, environment = environment_id.0, label, "Began invocation");
    Ok(id)
}

/// Stamp `ended_at` on an open invocation. Closing twice is a state error.
pub fn close_invocation(conn: &Connection, id: InvocationId) -> crate::error::Result<()> {
    let updated = conn
        .execute(
            "UPDATE invocations SET ended_at = ?1 WHERE id = ?2 AND ended_at IS NULL",
            params![now_rfc3339(), id.0],
        )
        .map_err(StoreError::Sqlite)?;
    if updated == 0 {
        return match get_invocation(conn, id)? {
            Some(_) => Err(TrackerError::State(format!(
                "invocation {id} is already closed"
            ))),
            None => Err(StoreError::NotFound(format!("invocation {id}")).into()),
        };
    }
    info!(invocation = id.0, "Closed invocation");
    Ok(())
}

pub fn get_invocation(
    conn: &Connection,
    id: InvocationId,
) -> crate::error::Result<Option<Invocation>> {
    conn.query_row(
        "SELECT id, environment_id, host, user, command, label, started_at, ended_at
         FROM invocations WHERE id = ?1",
        params![id.0],
        |row| {
            let started_at: String = row.get(6)?;
            let ended_at: Option<String> = row.get(7)?;
            Ok(Invocation {
                id: InvocationId(row.get(0)?),
                environment_id: EnvironmentId(row.get(1)?),
                host: row.get(2)?,
                user: row.get(3)?,
                command: row.get(4)?,
                label: row.get(5)?,
                started_at: parse_timestamp(6, &started_at)?,
                ended_at: ended_at
                    .as_deref()
                    .map(|s| parse_timestamp(7, s))
                    .transpose()?,
            })
        },
    )
    .optional()
    .map_err(StoreError::Sqlite)
    .map_err(Into::into)
}
