//! Provenance graph: data product nodes and parent → child dependency edges.
//!
//! This is the only module that writes `dependencies`. Data product rows
//! are insert-only; registering an identical `(path, content_hash)` again
//! returns the existing id.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::{debug, warn};

use crate::error::{StoreError, TrackerError};
use crate::hash::ContentHash;
use crate::store::sqlite::{now_rfc3339, parse_timestamp, values_placeholders};
use crate::types::{DataProduct, DataProductId, InvocationId};

const EDGE_CHUNK: usize = 500;

const PRODUCT_COLUMNS: &str = "id, path, content_hash, invocation_id, created_at";

/// Record a data product and its parent edges.
///
/// Must run inside a transaction: if any parent edge is rejected the
/// caller's transaction rolls back the node as well, so a failed
/// registration leaves nothing behind.
pub fn register(
    conn: &Connection,
    path: &Path,
    content_hash: &ContentHash,
    invocation_id: InvocationId,
    parent_ids: &[DataProductId],
) -> crate::error::Result<DataProductId> {
    let path_str = utf8_path(path)?;
    let inserted: Option<i64> = conn
        .query_row(
            "INSERT INTO data_products (path, content_hash, invocation_id, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path, content_hash) DO NOTHING
             RETURNING id",
            params![path_str, content_hash.as_str(), invocation_id.0, now_rfc3339()],
            |row| row.get(0),
        )
        .optional()
        .map_err(StoreError::Sqlite)?;

    let child = match inserted {
        Some(id) => {
            debug!(product = id, path = %path_str, "Registered data product");
            DataProductId(id)
        }
        None => {
            let existing = find_by_identity(conn, path, content_hash)?.ok_or_else(|| {
                TrackerError::Consistency(format!(
                    "data product {path_str} conflicted but no row holds it"
                ))
            })?;
            debug!(product = existing.0, path = %path_str, "Data product already tracked");
            existing
        }
    };

    let parents: BTreeSet<DataProductId> = parent_ids.iter().copied().collect();
    for &parent in &parents {
        if !exists(conn, parent)? {
            return Err(StoreError::NotFound(format!("data product {parent}")).into());
        }
        if parent == child || would_create_cycle(conn, parent, child)? {
            warn!(parent = parent.0, child = child.0, "Rejected cyclic dependency");
            return Err(TrackerError::Cycle { parent, child });
        }
    }

    let parents: Vec<DataProductId> = parents.into_iter().collect();
    let created_at = now_rfc3339();
    for chunk in parents.chunks(EDGE_CHUNK) {
        let sql = format!(
            "INSERT OR IGNORE INTO dependencies (parent_id, child_id, created_at) VALUES {}",
            values_placeholders(chunk.len(), 3)
        );
        let mut bound: Vec<&dyn rusqlite::types::ToSql> = Vec::with_capacity(chunk.len() * 3);
        for parent in chunk {
            bound.push(&parent.0);
            bound.push(&child.0);
            bound.push(&created_at);
        }
        conn.execute(&sql, params_from_iter(bound))
            .map_err(StoreError::Sqlite)?;
    }

    Ok(child)
}

/// Whether adding `parent -> child` would close a cycle, i.e. `child` is
/// already an ancestor of `parent`.
///
/// Walks ancestors of `parent`; `UNION` drops revisits, so the walk is
/// bounded by the connected part of the graph.
pub fn would_create_cycle(
    conn: &Connection,
    parent: DataProductId,
    child: DataProductId,
) -> crate::error::Result<bool> {
    conn.query_row(
        "WITH RECURSIVE ancestors(id) AS (
            SELECT ?1
            UNION
            SELECT d.parent_id FROM dependencies d
            JOIN ancestors a ON d.child_id = a.id
         )
         SELECT EXISTS (SELECT 1 FROM ancestors WHERE id = ?2)",
        params![parent.0, child.0],
        |row| row.get(0),
    )
    .map_err(StoreError::Sqlite)
    .map_err(Into::into)
}

fn utf8_path(path: &Path) -> crate::error::Result<&str> {
    path.to_str().ok_or_else(|| TrackerError::InvalidPath(path.to_path_buf()))
}

fn exists(conn: &Connection, id: DataProductId) -> crate::error::Result<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM data_products WHERE id = ?1)",
        params![id.0],
        |row| row.get(0),
    )
    .map_err(StoreError::Sqlite)
    .map_err(Into::into)
}

fn row_to_product(row: &rusqlite::Row<'_>) -> rusqlite::Result<DataProduct> {
    let path: String = row.get(1)?;
    let hash: String = row.get(2)?;
    let created_at: String = row.get(4)?;
    Ok(DataProduct {
        id: DataProductId(row.get(0)?),
        path: PathBuf::from(path),
        content_hash: ContentHash(hash),
        invocation_id: InvocationId(row.get(3)?),
        created_at: parse_timestamp(4, &created_at)?,
    })
}

pub fn get_data_product(
    conn: &Connection,
    id: DataProductId,
) -> crate::error::Result<Option<DataProduct>> {
    conn.query_row(
        &format!("SELECT {PRODUCT_COLUMNS} FROM data_products WHERE id = ?1"),
        params![id.0],
        row_to_product,
    )
    .optional()
    .map_err(StoreError::Sqlite)
    .map_err(Into::into)
}

/// The product with exactly this path and content.
pub fn find_by_identity(
    conn: &Connection,
    path: &Path,
    content_hash: &ContentHash,
) -> crate::error::Result<Option<DataProductId>> {
    conn.query_row(
        "SELECT id FROM data_products WHERE path = ?1 AND content_hash = ?2",
        params![utf8_path(path)?, content_hash.as_str()],
        |row| row.get(0).map(DataProductId),
    )
    .optional()
    .map_err(StoreError::Sqlite)
    .map_err(Into::into)
}

/// The most recently registered product at `path`, whatever its content.
pub fn find_latest_by_path(
    conn: &Connection,
    path: &Path,
) -> crate::error::Result<Option<DataProduct>> {
    conn.query_row(
        &format!(
            "SELECT {PRODUCT_COLUMNS} FROM data_products WHERE path = ?1
             ORDER BY id DESC LIMIT 1"
        ),
        params![utf8_path(path)?],
        row_to_product,
    )
    .optional()
    .map_err(StoreError::Sqlite)
    .map_err(Into::into)
}

/// Direct parents of a product, ascending by id.
pub fn parents_of(
    conn: &Connection,
    id: DataProductId,
) -> crate::error::Result<Vec<DataProductId>> {
    neighbours(
        conn,
        "SELECT parent_id FROM dependencies WHERE child_id = ?1 ORDER BY parent_id",
        id,
    )
}

/// Direct children of a product, ascending by id.
pub fn children_of(
    conn: &Connection,
    id: DataProductId,
) -> crate::error::Result<Vec<DataProductId>> {
    neighbours(
        conn,
        "SELECT child_id FROM dependencies WHERE parent_id = ?1 ORDER BY child_id",
        id,
    )
}

fn neighbours(
    conn: &Connection,
    sql: &str,
    id: DataProductId,
) -> crate::error::Result<Vec<DataProductId>> {
    let mut stmt = conn.prepare_cached(sql).map_err(StoreError::Sqlite)?;
    let ids = stmt
        .query_map(params![id.0], |row| row.get(0).map(DataProductId))
        .map_err(StoreError::Sqlite)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(StoreError::Sqlite)?;
    Ok(ids)
}

/// `id` and all of its ancestors, parents before children.
///
/// The ancestor closure and its edges are fetched with two queries and
/// ordered in memory.
pub fn lineage(conn: &Connection, id: DataProductId) -> crate::error::Result<Vec<DataProduct>> {
    const ANCESTORS: &str = "WITH RECURSIVE ancestors(id) AS (
            SELECT ?1
            UNION
            SELECT d.parent_id FROM dependencies d
            JOIN ancestors a ON d.child_id = a.id
         )";

    let mut stmt = conn
        .prepare_cached(&format!(
            "{ANCESTORS}
             SELECT {PRODUCT_COLUMNS} FROM data_products
             WHERE id IN (SELECT id FROM ancestors)"
        ))
        .map_err(StoreError::Sqlite)?;
    let products = stmt
        .query_map(params![id.0], row_to_product)
        .map_err(StoreError::Sqlite)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(StoreError::Sqlite)?;
    if products.is_empty() {
        return Err(StoreError::NotFound(format!("data product {id}")).into());
    }

    let mut stmt = conn
        .prepare_cached(&format!(
            "{ANCESTORS}
             SELECT d.parent_id, d.child_id FROM dependencies d
             WHERE d.child_id IN (SELECT id FROM ancestors)"
        ))
        .map_err(StoreError::Sqlite)?;
    let edges = stmt
        .query_map(params![id.0], |row| {
            Ok((DataProductId(row.get(0)?), DataProductId(row.get(1)?)))
        })
        .map_err(StoreError::Sqlite)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(StoreError::Sqlite)?;

    let mut graph: DiGraph<DataProductId, ()> = DiGraph::new();
    let mut index: HashMap<DataProductId, NodeIndex> = HashMap::with_capacity(products.len());
    for product in &products {
        index.insert(product.id, graph.add_node(product.id));
    }
    for (parent, child) in edges {
        if let (Some(&p), Some(&c)) = (index.get(&parent), index.get(&child)) {
            graph.add_edge(p, c, ());
        }
    }

    let order = toposort(&graph, None).map_err(|cycle| {
        TrackerError::Consistency(format!(
            "dependency cycle through data product {}",
            graph[cycle.node_id()]
        ))
    })?;

    let mut by_id: HashMap<DataProductId, DataProduct> =
        products.into_iter().map(|p| (p.id, p)).collect();
    Ok(order
        .into_iter()
        .filter_map(|idx| by_id.remove(&graph[idx]))
        .collect())
}
