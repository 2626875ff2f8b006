//! # PMOSiriusXM Configuration Module
//!
//! This module provides configuration management for the SiriusXM proxy:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides (`PMOSXM_CONFIG__HOST__HTTP_PORT=8000`)
//! - Type-safe getters and setters for configuration values
//! - Thread-safe singleton access pattern
//!
//! Crates of the workspace extend [`Config`] with their own settings through
//! extension traits working on [`Config::get_value`] / [`Config::set_value`].
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! let config = get_config();
//! let port = config.get_http_port();
//! let address = config.get_bind_address();
//!
//! config.set_http_port(9000)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{info, warn};

pub mod encryption;

// Embedded default configuration
const DEFAULT_CONFIG: &str = include_str!("pmosxm.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load PMOSiriusXM configuration"));
}

const ENV_CONFIG_DIR: &str = "PMOSXM_CONFIG";
const ENV_PREFIX: &str = "PMOSXM_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmosxm";

// Default values for configuration
const DEFAULT_HTTP_PORT: u16 = 9999;
const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
const DEFAULT_LOG_MIN_LEVEL: &str = "WARN";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<bool> {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => Ok(b),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Macro to generate getter/setter for string values with default
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<String> {
            match self.get_value($path) {
                Ok(Value::String(s)) if !s.is_empty() => Ok(s),
                _ => Ok($default.to_string()),
            }
        }

        pub fn $setter(&self, value: &str) -> Result<()> {
            self.set_value($path, Value::String(value.to_string()))
        }
    };
}

/// Configuration manager
///
/// Holds the merged YAML tree and the path of the `config.yaml` file it is
/// persisted to. Every setter saves the file immediately.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(self.data().clone()),
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
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        if Path::new(CONFIG_DIR_NAME).exists() {
            return CONFIG_DIR_NAME.to_string();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        CONFIG_DIR_NAME.to_string()
    }

    /// Creates the directory if needed and checks it is writable
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

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `PMOSXM_CONFIG` environment variable
    /// 3. `.pmosxm` in the current directory
    /// 4. `.pmosxm` in the user's home directory
    ///
    /// The directory is created if it doesn't exist.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))
            .map_err(|e| anyhow!("Invalid configuration directory {}: {}", dir_path, e))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    /// 5. Saves the merged configuration
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir, "Using config directory");

        let path = Path::new(&config_dir)
            .join("config.yaml")
            .to_string_lossy()
            .to_string();

        let mut config_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        match fs::read(&path) {
            Ok(data) => {
                info!(config_file = %path, "Loaded config file");
                let external: Value = serde_yaml::from_slice(&data)?;
                merge_yaml(&mut config_value, &external);
            }
            Err(_) => {
                info!(config_file = %path, "Config file not found, using default embedded config");
            }
        }

        let mut config_value = lower_keys_value(config_value);
        apply_env_overrides(&mut config_value, env::vars());

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    fn data(&self) -> MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config_dir_path(&self) -> &str {
        &self.config_dir
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.data())?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["host", "http_port"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        set_value_internal(&mut self.data(), path, value)?;
        self.save()
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        get_value_internal(&self.data(), path)
    }

    /// Gets the HTTP port the proxy listens on
    ///
    /// Accepts numbers and numeric strings; anything else falls back to the
    /// default port (9999).
    pub fn get_http_port(&self) -> u16 {
        match self.get_value(&["host", "http_port"]) {
            Ok(Value::Number(n)) => match n.as_u64().and_then(|p| u16::try_from(p).ok()) {
                Some(port) => port,
                None => {
                    warn!("Invalid HTTP port {}, using default {}", n, DEFAULT_HTTP_PORT);
                    DEFAULT_HTTP_PORT
                }
            },
            Ok(Value::String(s)) => s.parse::<u16>().unwrap_or_else(|_| {
                warn!("Invalid HTTP port '{}', using default {}", s, DEFAULT_HTTP_PORT);
                DEFAULT_HTTP_PORT
            }),
            _ => DEFAULT_HTTP_PORT,
        }
    }

    pub fn set_http_port(&self, port: u16) -> Result<()> {
        self.set_value(&["host", "http_port"], Value::Number(Number::from(port)))
    }

    /// Gets the IP address the proxy binds to (default `127.0.0.1`)
    pub fn get_bind_address(&self) -> String {
        match self.get_value(&["host", "bind_address"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => DEFAULT_BIND_ADDRESS.to_string(),
        }
    }

    pub fn set_bind_address(&self, address: &str) -> Result<()> {
        self.set_value(&["host", "bind_address"], Value::String(address.to_string()))
    }

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
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
/// The configuration is lazily loaded on first access.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let Some((first, rest)) = path.split_first() else {
        *data = value;
        return Ok(());
    };

    let Value::Mapping(map) = data else {
        return Err(anyhow!("Current node is not a map"));
    };

    let key = Value::String(first.to_lowercase());
    if rest.is_empty() {
        map.insert(key, value);
        Ok(())
    } else {
        let entry = map.entry(key).or_insert(Value::Mapping(Mapping::new()));
        // Scalars on the way are replaced by maps
        if !entry.is_mapping() {
            *entry = Value::Mapping(Mapping::new());
        }
        set_value_internal(entry, rest, value)
    }
}

fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
    let mut current = data;
    for (i, key) in path.iter().enumerate() {
        let Value::Mapping(map) = current else {
            return Err(anyhow!("Path {} is not a mapping", path[..i].join(".")));
        };
        current = map
            .get(&Value::String(key.to_lowercase()))
            .ok_or_else(|| anyhow!("Path {} does not exist", path[..=i].join(".")))?;
    }
    Ok(current.clone())
}

fn apply_env_overrides(config: &mut Value, vars: impl IntoIterator<Item = (String, String)>) {
    for (key, value) in vars {
        let Some(suffix) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let key_path: Vec<String> = suffix.split("__").map(str::to_lowercase).collect();
        let key_path: Vec<&str> = key_path.iter().map(String::as_str).collect();
        if let Err(e) = set_value_internal(config, &key_path, convert_env_value(&value)) {
            warn!(variable = %key, "Ignoring environment override: {}", e);
        }
    }
}

fn convert_env_value(value: &str) -> Value {
    serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

fn lower_keys_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| {
                    let k = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    (k, lower_keys_value(v))
                })
                .collect(),
        ),
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys_value).collect()),
        _ => value,
    }
}

/// Merges external YAML configuration into default configuration
///
/// Mappings are merged key by key; scalars and sequences from `external`
/// replace those of `default`.
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

    fn temp_config() -> (Config, std::path::PathBuf) {
        let dir = env::temp_dir().join(format!("pmosxm-config-{}", uuid::Uuid::new_v4()));
        let config = Config::load_config(&dir.to_string_lossy()).unwrap();
        (config, dir)
    }

    #[test]
    fn test_defaults() {
        let (config, dir) = temp_config();

        assert_eq!(config.get_http_port(), 9999);
        assert_eq!(config.get_bind_address(), "127.0.0.1");
        assert_eq!(config.get_log_min_level().unwrap(), "WARN");
        assert!(config.get_log_enable_console().unwrap());
        assert!(dir.join("config.yaml").exists());

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_values_persist_across_loads() {
        let (config, dir) = temp_config();
        config.set_http_port(8123).unwrap();
        config
            .set_value(&["Sources", "SiriusXM", "Region"], Value::String("CA".into()))
            .unwrap();

        let reloaded = Config::load_config(&dir.to_string_lossy()).unwrap();
        assert_eq!(reloaded.get_http_port(), 8123);
        assert_eq!(
            reloaded.get_value(&["sources", "siriusxm", "region"]).unwrap(),
            Value::String("CA".into())
        );

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let (config, dir) = temp_config();
        assert!(config.get_value(&["host", "nope"]).is_err());
        assert!(config.get_value(&["host", "http_port", "deeper"]).is_err());
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_env_overrides() {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG).unwrap();
        apply_env_overrides(
            &mut value,
            vec![
                ("PMOSXM_CONFIG__HOST__HTTP_PORT".to_string(), "8000".to_string()),
                ("PMOSXM_CONFIG__SOURCES__SIRIUSXM__PRECACHE".to_string(), "false".to_string()),
                ("UNRELATED".to_string(), "x".to_string()),
            ],
        );

        assert_eq!(
            get_value_internal(&value, &["host", "http_port"]).unwrap(),
            Value::Number(8000.into())
        );
        assert_eq!(
            get_value_internal(&value, &["sources", "siriusxm", "precache"]).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_merge_and_lowercase() {
        let mut default: Value = serde_yaml::from_str("host:\n  http_port: 9999\n  logger:\n    min_level: WARN\n").unwrap();
        let external: Value = serde_yaml::from_str("host:\n  logger:\n    min_level: DEBUG\n").unwrap();
        merge_yaml(&mut default, &external);
        assert_eq!(
            get_value_internal(&default, &["host", "logger", "min_level"]).unwrap(),
            Value::String("DEBUG".into())
        );
        assert_eq!(
            get_value_internal(&default, &["host", "http_port"]).unwrap(),
            Value::Number(9999.into())
        );

        let upper: Value = serde_yaml::from_str("Host:\n  HTTP_Port: 1\n").unwrap();
        let lowered = lower_keys_value(upper);
        assert!(get_value_internal(&lowered, &["host", "http_port"]).is_ok());
    }
}
