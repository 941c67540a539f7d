//! Tracker façade: sessions that tie data products to one invocation and
//! one resolved environment.
//!
//! A [`Session`] moves through `idle → open → closed`. Opening observes the
//! execution context once, resolves it to an environment and begins an
//! invocation; every product registered afterwards belongs to that
//! invocation. Closing stamps `ended_at`. Operations outside the open state
//! fail with [`TrackerError::State`].

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::DptConfig;
use crate::environment::resolve_environment;
use crate::error::{StoreError, TrackerError};
use crate::fingerprint::Fingerprint;
use crate::graph;
use crate::hash::{ContentHash, ContentHasher, Sha256Hasher};
use crate::invocation::{begin_invocation, close_invocation};
use crate::matcher::EnvironmentMatcher;
use crate::observe::{EnvironmentObserver, Observation, ProcessObserver};
use crate::store::SqliteStore;
use crate::types::{DataProductId, InvocationId, ResolvedEnvironment};

/// A parent of a data product, by id or by path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRef {
    Id(DataProductId),
    /// Resolves to the latest product recorded at this path. An untracked
    /// file that exists on disk is hashed and recorded as an input.
    Path(PathBuf),
}

impl From<DataProductId> for ParentRef {
    fn from(id: DataProductId) -> Self {
        Self::Id(id)
    }
}

impl From<&Path> for ParentRef {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for ParentRef {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&str> for ParentRef {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

/// Shared entry point: a store, the seams, and the matcher cache that all
/// of its sessions use.
#[derive(Clone)]
pub struct Tracker {
    store: Arc<SqliteStore>,
    observer: Arc<dyn EnvironmentObserver>,
    hasher: Arc<dyn ContentHasher>,
    matcher: Arc<EnvironmentMatcher>,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("store", &self.store)
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}

impl Tracker {
    pub fn new(
        store: Arc<SqliteStore>,
        observer: Arc<dyn EnvironmentObserver>,
        hasher: Arc<dyn ContentHasher>,
        config: &DptConfig,
    ) -> Self {
        Self {
            store,
            observer,
            hasher,
            matcher: Arc::new(EnvironmentMatcher::new(config.matcher.cache)),
        }
    }

    /// Tracker over the configured store, observing this process and
    /// hashing with SHA-256.
    pub fn from_config(config: &DptConfig) -> crate::error::Result<Self> {
        let store = Arc::new(SqliteStore::open_with_config(&config.store)?);
        let observer = Arc::new(ProcessObserver::from_config(&config.observer)?);
        Ok(Self::new(store, observer, Arc::new(Sha256Hasher), config))
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn matcher(&self) -> &EnvironmentMatcher {
        &self.matcher
    }

    pub fn hasher(&self) -> &dyn ContentHasher {
        self.hasher.as_ref()
    }

    /// Observe the current context and resolve it to an environment.
    pub fn current_environment(&self) -> crate::error::Result<ResolvedEnvironment> {
        let observation = self.observer.observe()?;
        self.resolve(&observation)
    }

    fn resolve(&self, observation: &Observation) -> crate::error::Result<ResolvedEnvironment> {
        let fingerprint = Fingerprint::from_observation(observation);
        resolve_environment(&self.store, &self.matcher, &fingerprint)
    }

    /// A new idle session.
    pub fn session(&self, label: impl Into<String>) -> Session {
        Session {
            tracker: self.clone(),
            label: label.into(),
            state: SessionState::Idle,
        }
    }

    /// A new session, already open.
    pub fn open(&self, label: impl Into<String>) -> crate::error::Result<Session> {
        let mut session = self.session(label);
        session.open()?;
        Ok(session)
    }
}

/// Lifecycle of a [`Session`].
#[derive(Debug)]
pub enum SessionState {
    Idle,
    Open(OpenSession),
    Closed { invocation: InvocationId },
}

/// Everything an open session carries.
#[derive(Debug)]
pub struct OpenSession {
    pub invocation: InvocationId,
    pub environment: ResolvedEnvironment,
    /// Path → latest product id seen by this session.
    products: HashMap<PathBuf, DataProductId>,
}

/// One tracked execution.
#[derive(Debug)]
pub struct Session {
    tracker: Tracker,
    label: String,
    state: SessionState,
}

impl Session {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Open(_))
    }

    pub fn invocation_id(&self) -> Option<InvocationId> {
        match &self.state {
            SessionState::Idle => None,
            SessionState::Open(open) => Some(open.invocation),
            SessionState::Closed { invocation } => Some(*invocation),
        }
    }

    pub fn environment(&self) -> Option<ResolvedEnvironment> {
        match &self.state {
            SessionState::Open(open) => Some(open.environment),
            _ => None,
        }
    }

    /// Observe, resolve the environment and begin the invocation.
    pub fn open(&mut self) -> crate::error::Result<InvocationId> {
        if !matches!(self.state, SessionState::Idle) {
            return Err(TrackerError::State(format!(
                "session '{}' has already been opened",
                self.label
            )));
        }

        let observation = self.tracker.observer.observe()?;
        let environment = self.tracker.resolve(&observation)?;
        let invocation = self.tracker.store.with_immediate_transaction(|tx| {
            begin_invocation(tx, environment.id, &observation, &self.label)
        })?;

        info!(
            session = %self.label,
            invocation = invocation.0,
            environment = environment.id.0,
            new_environment = environment.created,
            "Opened session"
        );
        self.state = SessionState::Open(OpenSession {
            invocation,
            environment,
            products: HashMap::new(),
        });
        Ok(invocation)
    }

    fn open_state(&mut self, operation: &str) -> crate::error::Result<&mut OpenSession> {
        match &mut self.state {
            SessionState::Open(open) => Ok(open),
            SessionState::Idle => Err(TrackerError::State(format!(
                "cannot {operation}: session '{}' is not open",
                self.label
            ))),
            SessionState::Closed { .. } => Err(TrackerError::State(format!(
                "cannot {operation}: session '{}' is closed",
                self.label
            ))),
        }
    }

    /// Record `path` with the given content as a product of this session.
    ///
    /// Registration is idempotent on `(path, content_hash)`. The product
    /// row, any parents recorded on demand, and the edges commit together.
    pub fn register(
        &mut self,
        path: impl AsRef<Path>,
        content_hash: &ContentHash,
        parents: &[ParentRef],
    ) -> crate::error::Result<DataProductId> {
        let hasher = Arc::clone(&self.tracker.hasher);
        let store = Arc::clone(&self.tracker.store);
        let open = self.open_state("register")?;
        let path = normalize_path(path.as_ref())?;
        let parent_paths = parents
            .iter()
            .map(|p| match p {
                ParentRef::Id(id) => Ok(ParentRef::Id(*id)),
                ParentRef::Path(p) => normalize_path(p).map(ParentRef::Path),
            })
            .collect::<crate::error::Result<Vec<_>>>()?;

        let invocation = open.invocation;
        let cache = &open.products;
        let (id, resolved_parents) = store.with_immediate_transaction(|tx| {
            let mut resolved = Vec::with_capacity(parent_paths.len());
            let mut parent_ids = Vec::with_capacity(parent_paths.len());
            for parent in &parent_paths {
                let id = match parent {
                    ParentRef::Id(id) => *id,
                    ParentRef::Path(p) => {
                        let id = resolve_parent_path(tx, hasher.as_ref(), cache, p, invocation)?;
                        resolved.push((p.clone(), id));
                        id
                    }
                };
                parent_ids.push(id);
            }
            let id = graph::register(tx, &path, content_hash, invocation, &parent_ids)?;
            Ok((id, resolved))
        })?;

        open.products.extend(resolved_parents);
        debug!(product = id.0, path = %path.display(), "Registered in session");
        open.products.insert(path, id);
        Ok(id)
    }

    /// Hash the file at `path` and register it.
    pub fn register_file(
        &mut self,
        path: impl AsRef<Path>,
        parents: &[ParentRef],
    ) -> crate::error::Result<DataProductId> {
        self.open_state("register")?;
        let hash = self.tracker.hasher.hash_file(path.as_ref())?;
        self.register(path, &hash, parents)
    }

    /// Look up the product recorded at `path`, preferring this session's view.
    pub fn product_at(&self, path: impl AsRef<Path>) -> crate::error::Result<Option<DataProductId>> {
        let path = normalize_path(path.as_ref())?;
        if let SessionState::Open(open) = &self.state {
            if let Some(id) = open.products.get(&path) {
                return Ok(Some(*id));
            }
        }
        let latest = self
            .tracker
            .store
            .read(|conn| graph::find_latest_by_path(conn, &path))?;
        Ok(latest.map(|p| p.id))
    }

    /// Stamp the invocation's end time.
    pub fn close(&mut self) -> crate::error::Result<()> {
        let invocation = self.open_state("close")?.invocation;
        self.tracker
            .store
            .with_immediate_transaction(|tx| close_invocation(tx, invocation))?;
        info!(session = %self.label, invocation = invocation.0, "Closed session");
        self.state = SessionState::Closed { invocation };
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let SessionState::Open(open) = &self.state {
            warn!(
                session = %self.label,
                invocation = open.invocation.0,
                "Session dropped while open; invocation has no end time"
            );
        }
    }
}

fn resolve_parent_path(
    conn: &rusqlite::Connection,
    hasher: &dyn ContentHasher,
    cache: &HashMap<PathBuf, DataProductId>,
    path: &Path,
    invocation: InvocationId,
) -> crate::error::Result<DataProductId> {
    if let Some(id) = cache.get(path) {
        return Ok(*id);
    }
    if let Some(product) = graph::find_latest_by_path(conn, path)? {
        return Ok(product.id);
    }
    if path.is_file() {
        let hash = hasher.hash_file(path)?;
        debug!(path = %path.display(), "Recording untracked parent as input");
        return graph::register(conn, path, &hash, invocation, &[]);
    }
    Err(StoreError::NotFound(format!("no data product at {}", path.display())).into())
}

/// Absolute form of `path` that does not depend on whether the file exists.
///
/// `.` and `..` are folded lexically. The deepest existing ancestor
/// directory is canonicalized and the remaining components are appended
/// as written, so the final component is never resolved as a symlink.
pub fn normalize_path(path: &Path) -> crate::error::Result<PathBuf> {
    let mut lexical = PathBuf::new();
    for component in std::path::absolute(path)?.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                lexical.pop();
            }
            other => lexical.push(other),
        }
    }

    let (Some(name), Some(mut dir)) = (lexical.file_name(), lexical.parent()) else {
        return Ok(lexical.clone());
    };
    let mut missing = vec![name];
    let mut resolved = loop {
        match std::fs::canonicalize(dir) {
            Ok(canonical) => break canonical,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                match (dir.file_name(), dir.parent()) {
                    (Some(child), Some(parent)) => {
                        missing.push(child);
                        dir = parent;
                    }
                    _ => break dir.to_path_buf(),
                }
            }
            Err(e) => return Err(e.into()),
        }
    };
    for component in missing.into_iter().rev() {
        resolved.push(component);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::StaticObserver;

    fn tracker_with(observer: StaticObserver) -> Tracker {
        Tracker::new(
            Arc::new(SqliteStore::in_memory().unwrap()),
            Arc::new(observer),
            Arc::new(Sha256Hasher),
            &DptConfig::default(),
        )
    }

    fn tracker() -> Tracker {
        tracker_with(StaticObserver::with_libraries([("numpy", "1.2"), ("pandas", "2.0")]))
    }

    #[test]
    fn end_to_end_scenario() {
        let tracker = tracker();
        let mut session = tracker.open("scenario").unwrap();

        let out = session
            .register("out.csv", &ContentHash::from("H1"), &[])
            .unwrap();
        let merged = session
            .register("merged.csv", &ContentHash::from("H2"), &["out.csv".into()])
            .unwrap();
        session.close().unwrap();

        let stats = tracker.store().stats().unwrap();
        assert_eq!(stats.environments, 1);
        assert_eq!(stats.invocations, 1);
        assert_eq!(stats.data_products, 2);
        assert_eq!(stats.dependencies, 1);
        assert_eq!(
            tracker.store().read(|c| graph::parents_of(c, merged)).unwrap(),
            vec![out]
        );
    }

    #[test]
    fn sessions_in_same_context_share_environment() {
        let tracker = tracker();
        let mut a = tracker.open("a").unwrap();
        let mut b = tracker.open("b").unwrap();
        assert_eq!(a.environment().unwrap().id, b.environment().unwrap().id);
        assert!(a.environment().unwrap().created);
        assert!(!b.environment().unwrap().created);
        assert_ne!(a.invocation_id(), b.invocation_id());
        a.close().unwrap();
        b.close().unwrap();
    }

    #[test]
    fn reregistering_is_idempotent_across_sessions() {
        let tracker = tracker();
        let mut first = tracker.open("first").unwrap();
        let a = first.register("/data/x", &ContentHash::from("h"), &[]).unwrap();
        let again = first.register("/data/x", &ContentHash::from("h"), &[]).unwrap();
        first.close().unwrap();

        let mut second = tracker.open("second").unwrap();
        let b = second.register("/data/x", &ContentHash::from("h"), &[]).unwrap();
        second.close().unwrap();

        assert_eq!(a, again);
        assert_eq!(a, b);
        assert_eq!(tracker.store().stats().unwrap().data_products, 1);
    }

    #[test]
    fn cycle_through_session_is_rejected() {
        let tracker = tracker();
        let mut session = tracker.open("cycle").unwrap();
        let x = session.register("/x", &ContentHash::from("1"), &[]).unwrap();
        let y = session.register("/y", &ContentHash::from("2"), &[x.into()]).unwrap();

        let err = session
            .register("/x", &ContentHash::from("1"), &[y.into()])
            .unwrap_err();
        assert!(matches!(err, TrackerError::Cycle { .. }));
        session.close().unwrap();
    }

    #[test]
    fn untracked_parent_on_disk_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, b"raw").unwrap();

        let tracker = tracker();
        let mut session = tracker.open("inputs").unwrap();
        let out = session
            .register(dir.path().join("out.txt"), &ContentHash::from("o"), &[input.clone().into()])
            .unwrap();

        let parents = tracker.store().read(|c| graph::parents_of(c, out)).unwrap();
        assert_eq!(parents.len(), 1);
        let parent = tracker
            .store()
            .read(|c| graph::get_data_product(c, parents[0]))
            .unwrap()
            .unwrap();
        assert_eq!(parent.content_hash, Sha256Hasher.hash(b"raw"));
        assert_eq!(session.product_at(&input).unwrap(), Some(parents[0]));
        session.close().unwrap();
    }

    #[test]
    fn missing_parent_path_is_not_found() {
        let tracker = tracker();
        let mut session = tracker.open("missing").unwrap();
        let err = session
            .register("/out", &ContentHash::from("o"), &["/definitely/not/here".into()])
            .unwrap_err();
        assert!(matches!(err, TrackerError::Store(StoreError::NotFound(_))));
        assert_eq!(tracker.store().stats().unwrap().data_products, 0);
        session.close().unwrap();
    }

    #[test]
    fn register_file_hashes_contents() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("result.bin");
        std::fs::write(&file, b"v1").unwrap();

        let tracker = tracker();
        let mut session = tracker.open("files").unwrap();
        let v1 = session.register_file(&file, &[]).unwrap();
        std::fs::write(&file, b"v2").unwrap();
        let v2 = session.register_file(&file, &[v1.into()]).unwrap();
        assert_ne!(v1, v2);

        let latest = tracker
            .store()
            .read(|c| graph::find_latest_by_path(c, &normalize_path(&file)?))
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, v2);
        assert_eq!(latest.content_hash, Sha256Hasher.hash(b"v2"));
        session.close().unwrap();
    }

    #[test]
    fn register_before_open_is_state_error() {
        let tracker = tracker();
        let mut session = tracker.session("idle");
        let err = session.register("/x", &ContentHash::from("h"), &[]).unwrap_err();
        assert!(matches!(err, TrackerError::State(_)));
        assert!(matches!(session.close(), Err(TrackerError::State(_))));
        assert!(session.invocation_id().is_none());
    }

    #[test]
    fn operations_after_close_are_state_errors() {
        let tracker = tracker();
        let mut session = tracker.open("done").unwrap();
        session.close().unwrap();

        assert!(matches!(
            session.register("/x", &ContentHash::from("h"), &[]),
            Err(TrackerError::State(_))
        ));
        assert!(matches!(session.close(), Err(TrackerError::State(_))));
        assert!(matches!(session.open(), Err(TrackerError::State(_))));
        assert!(matches!(session.state(), SessionState::Closed { .. }));
    }

    #[test]
    fn opening_twice_is_state_error() {
        let tracker = tracker();
        let mut session = tracker.open("twice").unwrap();
        assert!(matches!(session.open(), Err(TrackerError::State(_))));
        assert_eq!(tracker.store().stats().unwrap().invocations, 1);
        session.close().unwrap();
    }

    #[test]
    fn empty_context_gets_empty_environment() {
        let tracker = tracker_with(StaticObserver::default());
        let mut session = tracker.open("bare").unwrap();
        let env = session.environment().unwrap();
        assert_eq!(env.fact_count, 0);
        session.close().unwrap();

        let other = tracker_with(StaticObserver::with_libraries([("numpy", "1.2")]));
        assert_eq!(other.current_environment().unwrap().fact_count, 1);
    }

    #[test]
    fn relative_and_absolute_paths_are_one_product() {
        let tracker = tracker();
        let mut session = tracker.open("paths").unwrap();
        let rel = session.register("rel.csv", &ContentHash::from("h"), &[]).unwrap();
        let abs_path = std::env::current_dir().unwrap().join("rel.csv");
        let abs = session.register(&abs_path, &ContentHash::from("h"), &[]).unwrap();
        assert_eq!(rel, abs);
        session.close().unwrap();
    }

    #[test]
    fn dot_dot_is_folded_before_lookup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let via_parent = normalize_path(&dir.path().join("sub/../out.csv")).unwrap();
        let direct = normalize_path(&dir.path().join("out.csv")).unwrap();
        assert_eq!(via_parent, direct);
        assert_eq!(
            normalize_path(&dir.path().join("gone/deeper/../out.csv")).unwrap(),
            normalize_path(&dir.path().join("gone/out.csv")).unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_names_one_product_before_and_after_write() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();
        let target = dir.path().join("link/out.csv");

        let tracker = tracker();
        let mut session = tracker.open("symlink").unwrap();
        let before = session.register(&target, &ContentHash::from("H"), &[]).unwrap();
        std::fs::write(&target, "a,b\n").unwrap();
        let after = session.register(&target, &ContentHash::from("H"), &[]).unwrap();
        session.close().unwrap();

        assert_eq!(before, after);
        assert_eq!(tracker.store().stats().unwrap().data_products, 1);
        assert_eq!(
            normalize_path(&target).unwrap(),
            normalize_path(&dir.path().join("real/out.csv")).unwrap()
        );
    }
}
