// Integration test utilities and fixture management for dpt.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dpt_core::Tracker;
use dpt_core::config::DptConfig;
use dpt_core::hash::Sha256Hasher;
use dpt_core::observe::{Observation, StaticObserver};
use dpt_core::store::SqliteStore;

/// Libraries of the reference pipeline environment.
pub const SCIENCE_STACK: &[(&str, &str)] = &[("numpy", "1.2"), ("pandas", "2.0")];

/// A temporary directory holding an on-disk provenance database.
#[derive(Debug)]
pub struct TestWorkspace {
    pub dir: tempfile::TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("dpt.db")
    }

    /// A fresh connection to the workspace database.
    pub fn open_store(&self) -> Arc<SqliteStore> {
        Arc::new(
            SqliteStore::open(&self.db_path(), Duration::from_secs(10))
                .expect("open workspace store"),
        )
    }

    /// A tracker on its own connection, observing `observation`.
    pub fn tracker(&self, observation: Observation) -> Tracker {
        Tracker::new(
            self.open_store(),
            Arc::new(StaticObserver::new(observation)),
            Arc::new(Sha256Hasher),
            &DptConfig::default(),
        )
    }

    /// A tracker whose context is exactly these libraries.
    pub fn tracker_with_libraries(&self, libraries: &[(&str, &str)]) -> Tracker {
        self.tracker(observation(libraries, &[]))
    }

    /// Write `contents` under the workspace and return the absolute path.
    pub fn write_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&path, contents).expect("write fixture file");
        path
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Observation with the given libraries and variables.
pub fn observation(libraries: &[(&str, &str)], variables: &[(&str, &str)]) -> Observation {
    let owned = |pairs: &[(&str, &str)]| {
        pairs
            .iter()
            .map(|(n, v)| ((*n).to_string(), (*v).to_string()))
            .collect()
    };
    Observation {
        libraries: owned(libraries),
        variables: owned(variables),
        host: "test-host".into(),
        user: "test-user".into(),
        command: "dpt-test".into(),
    }
}

/// Count rows of `table` directly.
pub fn count_rows(store: &SqliteStore, table: &str) -> i64 {
    store
        .read(|conn| {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?)
        })
        .expect("count rows")
}
