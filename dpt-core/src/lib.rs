//! dpt core library: provenance tracking for data products.
//!
//! The main entry point is [`tracker::Tracker`], which opens sessions that
//! resolve the observed execution context to a deduplicated environment and
//! record data products and their dependencies in a [`store::SqliteStore`].

pub mod config;
pub mod environment;
pub mod error;
pub mod facts;
pub mod fingerprint;
pub mod graph;
pub mod hash;
pub mod invocation;
pub mod matcher;
pub mod observe;
pub mod store;
pub mod tracker;
pub mod types;
pub mod writer;

pub use error::{Result, TrackerError};
pub use tracker::{ParentRef, Session, Tracker};
