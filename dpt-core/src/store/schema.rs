/// Current schema version.
pub const SCHEMA_VERSION: &str = "1";

/// Full SQL schema for dpt's `SQLite` database.
pub const SCHEMA_SQL: &str = r"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS dpt_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Atomic (name, value) observations, shared by many environments
CREATE TABLE IF NOT EXISTS facts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL CHECK (kind IN ('library', 'variable')),
    name TEXT NOT NULL,
    value TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(kind, name, value)
);

-- Distinct execution contexts; signature is derived from the sorted fact ids
CREATE TABLE IF NOT EXISTS environments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signature TEXT NOT NULL UNIQUE,
    fact_count INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

-- Environment membership (junction table)
CREATE TABLE IF NOT EXISTS environment_facts (
    environment_id INTEGER NOT NULL REFERENCES environments(id),
    fact_id INTEGER NOT NULL REFERENCES facts(id),
    PRIMARY KEY (environment_id, fact_id)
);
CREATE INDEX IF NOT EXISTS idx_env_facts_fact ON environment_facts(fact_id);

-- Tracked executions
CREATE TABLE IF NOT EXISTS invocations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    environment_id INTEGER NOT NULL REFERENCES environments(id),
    host TEXT NOT NULL,
    user TEXT NOT NULL,
    command TEXT NOT NULL,
    label TEXT NOT NULL DEFAULT '',
    started_at TEXT NOT NULL,
    ended_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_invocations_environment ON invocations(environment_id);

-- Tracked files, identified by path + content hash
CREATE TABLE IF NOT EXISTS data_products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    invocation_id INTEGER NOT NULL REFERENCES invocations(id),
    created_at TEXT NOT NULL,
    UNIQUE(path, content_hash)
);
CREATE INDEX IF NOT EXISTS idx_data_products_path ON data_products(path);
CREATE INDEX IF NOT EXISTS idx_data_products_invocation ON data_products(invocation_id);

-- Parent -> child dependency edges
CREATE TABLE IF NOT EXISTS dependencies (
    parent_id INTEGER NOT NULL REFERENCES data_products(id),
    child_id INTEGER NOT NULL REFERENCES data_products(id),
    created_at TEXT NOT NULL,
    PRIMARY KEY (parent_id, child_id),
    CHECK (parent_id <> child_id)
);
CREATE INDEX IF NOT EXISTS idx_dependencies_child ON dependencies(child_id);
";

/// `SQLite` PRAGMAs applied to every connection.
pub const PRAGMAS_SQL: &str = r"
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -16000;
PRAGMA foreign_keys = ON;
";
