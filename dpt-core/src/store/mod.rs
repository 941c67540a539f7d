//! Relational storage for facts, environments, invocations and data products.
//!
//! [`SqliteStore`] owns the connection and hands out transactions; the
//! component modules (`facts`, `matcher`, `writer`, `graph`, `invocation`)
//! are repository functions that run inside those transactions.

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteStore;
