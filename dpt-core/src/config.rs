use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "dpt.toml";

/// Top-level dpt configuration, matching `dpt.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DptConfig {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub observer: ObserverSection,
    #[serde(default)]
    pub matcher: MatcherSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Database file; relative paths resolve against the config file's directory.
    pub path: PathBuf,
    /// How long a writer waits for the database lock before failing.
    pub busy_timeout_ms: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dpt.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverSection {
    /// Glob patterns over variable names that are recorded.
    pub include_variables: Vec<String>,
    /// Glob patterns over variable names that are never recorded, even if included.
    pub exclude_variables: Vec<String>,
    /// `Cargo.lock` whose packages are recorded as libraries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockfile: Option<PathBuf>,
}

impl Default for ObserverSection {
    fn default() -> Self {
        Self {
            include_variables: vec![
                "PATH".into(),
                "LANG".into(),
                "LC_*".into(),
                "RUST*".into(),
                "CARGO*".into(),
                "PYTHON*".into(),
                "VIRTUAL_ENV".into(),
                "CONDA_*".into(),
            ],
            exclude_variables: vec![
                "*TOKEN*".into(),
                "*SECRET*".into(),
                "*PASSWORD*".into(),
                "*KEY*".into(),
            ],
            lockfile: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherSection {
    /// Keep a process-local cache of fact-set → environment lookups.
    pub cache: bool,
}

impl Default for MatcherSection {
    fn default() -> Self {
        Self { cache: true }
    }
}

impl DptConfig {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Invalid(format!("{}: {e}", path.display())))?;
        let mut config = Self::parse(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store.path must not be empty".into()));
        }
        for pattern in self
            .observer
            .include_variables
            .iter()
            .chain(&self.observer.exclude_variables)
        {
            glob::Pattern::new(pattern).map_err(|e| {
                ConfigError::Invalid(format!("bad variable pattern {pattern:?}: {e}"))
            })?;
        }
        Ok(())
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        if self.store.path.is_relative() {
            self.store.path = base.join(&self.store.path);
        }
        if let Some(lockfile) = &self.observer.lockfile {
            if lockfile.is_relative() {
                self.observer.lockfile = Some(base.join(lockfile));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = DptConfig::parse("").unwrap();
        assert_eq!(config, DptConfig::default());
        assert_eq!(config.store.busy_timeout_ms, 5_000);
        assert!(config.matcher.cache);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = DptConfig::parse("[matcher]\ncache = false\n").unwrap();
        assert!(!config.matcher.cache);
        assert_eq!(config.store.path, PathBuf::from("dpt.db"));
    }

    #[test]
    fn fields_missing_from_a_section_take_defaults() {
        let config =
            DptConfig::parse("[store]\npath = \"x.db\"\n\n[observer]\nlockfile = \"Cargo.lock\"\n")
                .unwrap();
        assert_eq!(config.store.path, PathBuf::from("x.db"));
        assert_eq!(config.store.busy_timeout_ms, 5_000);
        assert_eq!(
            config.observer.include_variables,
            ObserverSection::default().include_variables
        );
        assert_eq!(config.observer.lockfile, Some(PathBuf::from("Cargo.lock")));
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let text = DptConfig::default().to_toml().unwrap();
        assert_eq!(DptConfig::parse(&text).unwrap(), DptConfig::default());
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let err = DptConfig::parse(
            "[observer]\ninclude_variables = [\"[\"]\nexclude_variables = []\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn empty_store_path_is_rejected() {
        let err = DptConfig::parse("[store]\npath = \"\"\nbusy_timeout_ms = 10\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn syntax_error_is_parse_error() {
        assert!(matches!(
            DptConfig::parse("[store"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_resolves_paths_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            "[store]\npath = \"prov.db\"\nbusy_timeout_ms = 100\n\n\
             [observer]\ninclude_variables = []\nexclude_variables = []\nlockfile = \"Cargo.lock\"\n",
        )
        .unwrap();

        let config = DptConfig::load(&path).unwrap();
        assert_eq!(config.store.path, dir.path().join("prov.db"));
        assert_eq!(config.observer.lockfile, Some(dir.path().join("Cargo.lock")));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        assert!(matches!(
            DptConfig::load(&path),
            Err(ConfigError::NotFound(_))
        ));
        assert_eq!(
            DptConfig::load_or_default(&path).unwrap(),
            DptConfig::default()
        );
    }
}
