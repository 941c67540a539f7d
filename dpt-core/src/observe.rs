//! Capture of the raw execution context: libraries, variables, host identity.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ObserverSection;
use crate::error::TrackerError;

/// Raw observations for one execution context, before canonicalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// `(name, version)` of each installed library.
    pub libraries: Vec<(String, String)>,
    /// `(name, value)` of each recorded environment variable.
    pub variables: Vec<(String, String)>,
    pub host: String,
    pub user: String,
    pub command: String,
}

/// Supplies the current execution context to the tracker.
pub trait EnvironmentObserver: Send + Sync {
    fn observe(&self) -> crate::error::Result<Observation>;
}

/// Returns a fixed observation every time.
#[derive(Debug, Clone, Default)]
pub struct StaticObserver {
    observation: Observation,
}

impl StaticObserver {
    pub fn new(observation: Observation) -> Self {
        Self { observation }
    }

    /// Observation with the given libraries and no variables.
    pub fn with_libraries<'a>(libraries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self::new(Observation {
            libraries: libraries
                .into_iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            host: "static-host".into(),
            user: "static-user".into(),
            ..Observation::default()
        })
    }
}

impl EnvironmentObserver for StaticObserver {
    fn observe(&self) -> crate::error::Result<Observation> {
        Ok(self.observation.clone())
    }
}

/// Observes the running process.
///
/// Variables are read from the process environment and filtered through
/// the configured include/exclude globs. Libraries come from an optional
/// `Cargo.lock` plus any registered with [`ProcessObserver::with_library`].
#[derive(Debug, Clone)]
pub struct ProcessObserver {
    include: Vec<glob::Pattern>,
    exclude: Vec<glob::Pattern>,
    lockfile: Option<std::path::PathBuf>,
    extra_libraries: Vec<(String, String)>,
}

impl ProcessObserver {
    pub fn from_config(config: &ObserverSection) -> crate::error::Result<Self> {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| {
                    glob::Pattern::new(p).map_err(|e| {
                        TrackerError::Observe(format!("bad variable pattern {p:?}: {e}"))
                    })
                })
                .collect::<crate::error::Result<Vec<_>>>()
        };
        Ok(Self {
            include: compile(&config.include_variables)?,
            exclude: compile(&config.exclude_variables)?,
            lockfile: config.lockfile.clone(),
            extra_libraries: Vec::new(),
        })
    }

    /// Record an additional library that cannot be discovered from a lockfile.
    #[must_use]
    pub fn with_library(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.extra_libraries.push((name.into(), version.into()));
        self
    }

    /// Whether a variable name passes the include/exclude filters.
    pub fn records_variable(&self, name: &str) -> bool {
        self.include.iter().any(|p| p.matches(name)) && !self.exclude.iter().any(|p| p.matches(name))
    }

    fn filter_variables(&self, vars: impl Iterator<Item = (String, String)>) -> Vec<(String, String)> {
        vars.filter(|(name, _)| self.records_variable(name)).collect()
    }
}

impl EnvironmentObserver for ProcessObserver {
    fn observe(&self) -> crate::error::Result<Observation> {
        let mut libraries = match &self.lockfile {
            Some(path) => read_cargo_lock(path)?,
            None => Vec::new(),
        };
        libraries.extend(self.extra_libraries.iter().cloned());

        let variables = self.filter_variables(std::env::vars());
        debug!(
            libraries = libraries.len(),
            variables = variables.len(),
            "Observed process environment"
        );

        Ok(Observation {
            libraries,
            variables,
            host: host_name(),
            user: user_name(),
            command: std::env::args().collect::<Vec<_>>().join(" "),
        })
    }
}

/// `(name, version)` of every `[[package]]` in a `Cargo.lock`.
pub fn read_cargo_lock(path: &Path) -> crate::error::Result<Vec<(String, String)>> {
    #[derive(Deserialize)]
    struct Lockfile {
        #[serde(default)]
        package: Vec<Package>,
    }

    #[derive(Deserialize)]
    struct Package {
        name: String,
        version: String,
    }

    let text = std::fs::read_to_string(path)?;
    let lock: Lockfile = toml::from_str(&text)
        .map_err(|e| TrackerError::Observe(format!("cannot parse {}: {e}", path.display())))?;
    Ok(lock
        .package
        .into_iter()
        .map(|p| (p.name, p.version))
        .collect())
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn user_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
