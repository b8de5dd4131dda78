//! # Theia Configuration Module
//!
//! Configuration management for the Theia media core:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Typed getters and setters for configuration values
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use theiaconfig::get_config;
//!
//! let config = get_config();
//! let window = config.get_lookup_window_millis();
//! let db = config.get_cache_database()?;
//! config.set_scanner_max_depth(8)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Result, anyhow};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex},
};
use tracing::{info, warn};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("theia.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load Theia configuration"));
}

const ENV_CONFIG_DIR: &str = "THEIA_CONFIG";
const ENV_PREFIX: &str = "THEIA_CONFIG__";

const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_CACHE_DATABASE: &str = "theia.db";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BROWSE_PAGE_SIZE: usize = 999;
const DEFAULT_BROWSE_MAX_PAGES: usize = 20;
const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_EVENT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_SCANNER_MAX_DEPTH: usize = 16;
const DEFAULT_SCANNER_MAX_QUEUED: usize = 4096;
const DEFAULT_LOOKUP_WINDOW_MILLIS: u64 = 1000;
const DEFAULT_LOOKUP_CANDIDATES: usize = 3;
const DEFAULT_TVDB_LANGUAGE: &str = "en";
const DEFAULT_TVDB_BASE_URL: &str = "https://api.thetvdb.com";
const DEFAULT_MOVIEDB_BASE_URL: &str = "https://api.themoviedb.org/3";

/// Generates a getter/setter pair for unsigned integer values with a default
macro_rules! impl_unsigned_config {
    ($getter:ident, $setter:ident, $ty:ty, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> $ty {
            match self.get_value($path) {
                Ok(Value::Number(n)) if n.is_u64() => n.as_u64().map(|v| v as $ty).unwrap_or($default),
                Ok(Value::String(s)) => s.trim().parse::<$ty>().unwrap_or_else(|_| {
                    tracing::warn!(
                        "Invalid value '{}' for {}, using default {}",
                        s,
                        $path.join("."),
                        $default
                    );
                    $default
                }),
                _ => $default,
            }
        }

        pub fn $setter(&self, value: $ty) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value as u64)))
        }
    };
}

/// Generates a getter/setter pair for string values with a default
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> String {
            match self.get_value($path) {
                Ok(Value::String(s)) => s,
                _ => $default.to_string(),
            }
        }

        pub fn $setter(&self, value: String) -> Result<()> {
            self.set_value($path, Value::String(value))
        }
    };
}

/// Configuration manager for Theia
///
/// Loads the embedded defaults, merges the user's `config.yaml`, applies
/// `THEIA_CONFIG__SECTION__KEY=value` environment overrides and saves the
/// merged result back so that every key is visible to the user.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var=ENV_CONFIG_DIR, path=%env_path, "Trying to load config from env");
            return env_path;
        }

        if Path::new(".theia").exists() {
            return ".theia".to_string();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(".theia");
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        ".theia".to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `THEIA_CONFIG` environment variable
    /// 3. `.theia` in the current directory
    /// 4. `.theia` in the user's home directory
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// # Arguments
    ///
    /// * `directory` - The directory containing the config.yaml file, or empty to use defaults
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir=%config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file=%path, "Loaded config file");
            data
        } else {
            info!(config_file=%path, "Config file not found, using default embedded config");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        let external_value: Value = serde_yaml::from_slice(&yaml_data)?;
        merge_yaml(&mut default_value, &external_value);
        let mut config_value = Self::lower_keys_value(default_value);

        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        let yaml = serde_yaml::to_string(&*data)?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Directory holding `config.yaml` and every relative managed path
    pub fn directory(&self) -> &str {
        &self.config_dir
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["scanner", "max_depth"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        Self::set_value_internal(&mut data, path, value)?;
        drop(data);
        self.save()?;
        Ok(())
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key = path[0].to_lowercase();
            let key_value = Value::String(key);
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        path.iter()
            .enumerate()
            .try_fold(data, |node, (depth, key)| {
                let Value::Mapping(map) = node else {
                    return Err(anyhow!("{} is not a section", path[..depth].join(".")));
                };
                map.get(&Value::String(key.to_lowercase()))
                    .ok_or_else(|| anyhow!("No value at {}", path[..=depth].join(".")))
            })
            .cloned()
    }

    /// Applies `THEIA_CONFIG__SECTION__KEY=value` variables
    fn apply_env_overrides(config: &mut Value) {
        let overrides = env::vars()
            .filter_map(|(key, value)| Some((key.strip_prefix(ENV_PREFIX)?.to_string(), value)));
        for (key, raw) in overrides {
            let path: Vec<&str> = key.split("__").collect();
            // env values are YAML scalars when they parse, strings otherwise
            let value = serde_yaml::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
            if let Err(err) = Self::set_value_internal(config, &path, value) {
                warn!(variable = %key, error = %err, "Ignoring config override");
            }
        }
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => Value::Mapping(
                map.into_iter()
                    .map(|(key, child)| {
                        let key = match key {
                            Value::String(name) => Value::String(name.to_lowercase()),
                            other => other,
                        };
                        (key, Self::lower_keys_value(child))
                    })
                    .collect(),
            ),
            Value::Sequence(items) => {
                Value::Sequence(items.into_iter().map(Self::lower_keys_value).collect())
            }
            other => other,
        }
    }

    /// Resolves a path against the config directory when it is relative
    fn resolve_path(&self, raw: &str) -> String {
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_string_lossy().to_string()
        } else {
            Path::new(&self.config_dir)
                .join(path)
                .to_string_lossy()
                .to_string()
        }
    }

    /// Absolute path of the SQLite cache database
    ///
    /// Relative paths are resolved against the config directory, whose
    /// existence has already been checked when the configuration was loaded.
    pub fn get_cache_database(&self) -> Result<String> {
        let raw = match self.get_value(&["cache", "database"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => s,
            _ => {
                self.set_value(
                    &["cache", "database"],
                    Value::String(DEFAULT_CACHE_DATABASE.to_string()),
                )?;
                DEFAULT_CACHE_DATABASE.to_string()
            }
        };
        Ok(self.resolve_path(&raw))
    }

    /// Local directories scanned as storage volumes
    pub fn get_storage_volumes(&self) -> Vec<String> {
        match self.get_value(&["storage", "volumes"]) {
            Ok(Value::Sequence(seq)) => seq
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) if !s.trim().is_empty() => Some(self.resolve_path(&s)),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn set_storage_volumes(&self, volumes: Vec<String>) -> Result<()> {
        self.set_value(
            &["storage", "volumes"],
            Value::Sequence(volumes.into_iter().map(Value::String).collect()),
        )
    }

    impl_unsigned_config!(
        get_http_timeout_secs,
        set_http_timeout_secs,
        u64,
        &["upnp", "http_timeout_secs"],
        DEFAULT_HTTP_TIMEOUT_SECS
    );

    impl_unsigned_config!(
        get_browse_page_size,
        set_browse_page_size,
        usize,
        &["upnp", "browse_page_size"],
        DEFAULT_BROWSE_PAGE_SIZE
    );

    impl_unsigned_config!(
        get_browse_max_pages,
        set_browse_max_pages,
        usize,
        &["upnp", "browse_max_pages"],
        DEFAULT_BROWSE_MAX_PAGES
    );

    impl_unsigned_config!(
        get_discovery_timeout_secs,
        set_discovery_timeout_secs,
        u64,
        &["upnp", "discovery_timeout_secs"],
        DEFAULT_DISCOVERY_TIMEOUT_SECS
    );

    impl_unsigned_config!(
        get_event_timeout_secs,
        set_event_timeout_secs,
        u64,
        &["upnp", "event_timeout_secs"],
        DEFAULT_EVENT_TIMEOUT_SECS
    );

    impl_unsigned_config!(
        get_scanner_max_depth,
        set_scanner_max_depth,
        usize,
        &["scanner", "max_depth"],
        DEFAULT_SCANNER_MAX_DEPTH
    );

    impl_unsigned_config!(
        get_scanner_max_queued,
        set_scanner_max_queued,
        usize,
        &["scanner", "max_queued"],
        DEFAULT_SCANNER_MAX_QUEUED
    );

    impl_unsigned_config!(
        get_lookup_window_millis,
        set_lookup_window_millis,
        u64,
        &["lookup", "window_millis"],
        DEFAULT_LOOKUP_WINDOW_MILLIS
    );

    impl_unsigned_config!(
        get_lookup_candidates,
        set_lookup_candidates,
        usize,
        &["lookup", "candidates"],
        DEFAULT_LOOKUP_CANDIDATES
    );

    impl_string_config!(
        get_tvdb_api_key,
        set_tvdb_api_key,
        &["lookup", "tvdb", "api_key"],
        ""
    );

    impl_string_config!(
        get_tvdb_language,
        set_tvdb_language,
        &["lookup", "tvdb", "language"],
        DEFAULT_TVDB_LANGUAGE
    );

    impl_string_config!(
        get_tvdb_base_url,
        set_tvdb_base_url,
        &["lookup", "tvdb", "base_url"],
        DEFAULT_TVDB_BASE_URL
    );

    impl_string_config!(
        get_moviedb_api_key,
        set_moviedb_api_key,
        &["lookup", "moviedb", "api_key"],
        ""
    );

    impl_string_config!(
        get_moviedb_base_url,
        set_moviedb_base_url,
        &["lookup", "moviedb", "base_url"],
        DEFAULT_MOVIEDB_BASE_URL
    );

    impl_string_config!(
        get_log_min_level,
        set_log_min_level,
        &["host", "logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL
    );
}

/// Returns the global configuration instance
///
/// The instance is lazily loaded on first access.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merges external YAML configuration into default configuration
///
/// Mappings are merged key by key; scalars and sequences from `external`
/// replace the default value.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_in(dir: &tempfile::TempDir) -> Config {
        Config::load_config(dir.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_defaults_are_embedded() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_in(&dir);

        assert_eq!(config.get_lookup_window_millis(), 1000);
        assert_eq!(config.get_browse_page_size(), 999);
        assert_eq!(config.get_scanner_max_depth(), 16);
        assert_eq!(config.get_tvdb_language(), "en");
        assert!(config.get_storage_volumes().is_empty());
        assert!(dir.path().join("config.yaml").exists());
    }

    #[test]
    fn test_user_file_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "Scanner:\n  Max_Depth: 3\nlookup:\n  tvdb:\n    language: fr\n",
        )
        .unwrap();
        let config = load_in(&dir);

        assert_eq!(config.get_scanner_max_depth(), 3);
        assert_eq!(config.get_tvdb_language(), "fr");
        // untouched keys keep their defaults
        assert_eq!(config.get_scanner_max_queued(), 4096);
    }

    #[test]
    fn test_set_value_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_in(&dir);
        config.set_lookup_candidates(5).unwrap();

        let reloaded = load_in(&dir);
        assert_eq!(reloaded.get_lookup_candidates(), 5);
    }

    #[test]
    fn test_relative_database_resolves_in_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_in(&dir);
        let db = config.get_cache_database().unwrap();
        assert!(db.starts_with(dir.path().to_str().unwrap()));
        assert!(db.ends_with("theia.db"));
    }

    #[test]
    fn test_merge_yaml_replaces_scalars() {
        let mut base: Value = serde_yaml::from_str("a:\n  b: 1\n  c: 2\n").unwrap();
        let ext: Value = serde_yaml::from_str("a:\n  c: 3\nd: x\n").unwrap();
        merge_yaml(&mut base, &ext);
        let merged = Config::get_value_internal(&base, &["a", "c"]).unwrap();
        assert_eq!(merged, Value::Number(Number::from(3)));
        assert!(Config::get_value_internal(&base, &["d"]).is_ok());
    }
}
