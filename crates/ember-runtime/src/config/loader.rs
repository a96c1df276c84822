//! Configuration loader using figment.
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: enables TOML configuration files (`ember.toml`, `config.toml`)
//! - `yaml-config`: enables YAML configuration files (`ember.yaml`, `ember.yml`, etc.)
//!
//! Both can be enabled at once; each enabled format is searched independently.
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Main config file (`ember.toml` / `ember.yaml`)
//! 3. Profile-specific config file (`ember.{profile}.toml` / `ember.{profile}.yaml`)
//! 4. Environment variables (`EMBER_*`)
//! 5. Programmatic overrides
//!
//! # Environment Variable Mapping
//!
//! Environment variables use the `EMBER_` prefix with `__` as separator:
//!
//! - `EMBER_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `EMBER_DISPATCH__WORKER_THREADS=4` → `dispatch.worker_threads = 4`
//!
//! `EMBER_PROFILE` selects the profile and is not mapped into the schema.
//!
//! # Example
//!
//! ```rust,ignore
//! use ember_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .file("./config/ember.toml")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::EmberConfig;

const ENV_PREFIX: &str = "EMBER_";
const PROFILE_VAR: &str = "EMBER_PROFILE";

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    /// Development profile (default).
    #[default]
    Development,
    /// Production profile.
    Production,
    /// Custom profile name.
    Custom(String),
}

impl Profile {
    /// Parses a profile name; `prod` and `dev` are accepted as short forms.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Returns the profile name as a string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Reads `EMBER_PROFILE`, defaulting to Development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_VAR)
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-source configuration loader.
pub struct ConfigLoader {
    /// Programmatic overrides, merged last.
    overrides: Vec<EmberConfig>,
    profile: Option<Profile>,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    /// Specific config file to load (overrides search).
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader that searches the default locations and reads the environment.
    pub fn new() -> Self {
        Self {
            overrides: Vec::new(),
            profile: None,
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration profile; defaults to `EMBER_PROFILE`.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Some(Profile::parse(profile.as_ref()));
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds the current directory to the search paths.
    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    /// Adds the user config directory (`<config>/ember`) to the search paths.
    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(dir) => self.search_path(dir.join("ember")),
            None => self,
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables loading environment variables (default: true).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges a configuration over every other source.
    pub fn merge(mut self, config: EmberConfig) -> Self {
        self.overrides.push(config);
        self
    }

    /// Loads and returns the configuration.
    pub fn load(self) -> ConfigResult<EmberConfig> {
        let profile = self.profile.clone().unwrap_or_else(Profile::from_env);
        let figment = self.build_figment(&profile)?;
        let config: EmberConfig = figment.extract()?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            worker_threads = ?config.dispatch.worker_threads,
            "Configuration loaded"
        );
        Ok(config)
    }

    fn build_figment(self, profile: &Profile) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(EmberConfig::default()));

        match &self.config_file {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Loading configuration file");
                figment = Self::merge_config_file(figment, path)?;
            }
            Some(path) => return Err(ConfigError::FileNotFound(path.clone())),
            None => figment = self.load_config_files(figment, profile),
        }

        if self.load_env {
            trace!("Loading environment variables with {ENV_PREFIX} prefix");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["profile"]).split("__"));
        }

        for config in self.overrides {
            figment = figment.merge(Serialized::defaults(config));
        }
        Ok(figment)
    }

    /// Merges a single config file, dispatching on its extension.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("ember"));
        }
        paths
    }

    /// Searches `search_paths × base_names` for one format.
    ///
    /// Stops at the first directory holding a base file, merging the base file
    /// and then its profile-specific sibling.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn load_format_files<F>(
        mut figment: Figment,
        search_paths: &[PathBuf],
        base_names: &[&str],
        profile: &Profile,
        merge_fn: F,
    ) -> (Figment, bool)
    where
        F: Fn(Figment, &Path) -> Figment,
    {
        for search_path in search_paths {
            for base_name in base_names {
                let base_path = search_path.join(base_name);
                if !base_path.exists() {
                    continue;
                }
                info!(path = %base_path.display(), "Loading configuration file");
                figment = merge_fn(figment, &base_path);

                if let Some((stem, ext)) = base_name.rsplit_once('.') {
                    let profile_path = search_path.join(format!("{stem}.{profile}.{ext}"));
                    if profile_path.exists() {
                        debug!(path = %profile_path.display(), "Loading profile-specific config");
                        figment = merge_fn(figment, &profile_path);
                    }
                }
                return (figment, true);
            }
        }
        (figment, false)
    }

    #[allow(unused_mut, unused_variables)]
    fn load_config_files(&self, mut figment: Figment, profile: &Profile) -> Figment {
        let search_paths = self.resolve_search_paths();
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (f, ok) = Self::load_format_files(
                figment,
                &search_paths,
                &["ember.toml", "config.toml"],
                profile,
                |fig, path| fig.merge(Toml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        #[cfg(feature = "yaml-config")]
        {
            let (f, ok) = Self::load_format_files(
                figment,
                &search_paths,
                &["ember.yaml", "ember.yml", "config.yaml", "config.yml"],
                profile,
                |fig, path| fig.merge(Yaml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        if !found {
            warn!("No configuration file found, using defaults");
        }
        figment
    }
}

/// Loads configuration from the default locations.
pub fn load_config() -> ConfigResult<EmberConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from `path`, with environment overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<EmberConfig> {
    ConfigLoader::new().file(path).load()
}
