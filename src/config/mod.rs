//! Configuration surface.
//!
//! Settings are read through a [`PropertySource`], a plain `key -> string`
//! lookup with typed accessors on top. [`Properties`] is the default source:
//! an optional TOML file and `TESTFORGE_*` environment variables, overlaid by
//! runtime overrides that any thread may write.
//!
//! [`ForgeConfig`] is the typed view read once at startup.

mod forge;

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::RwLock;

use thiserror::Error;
use tracing::warn;

pub use forge::{EventConfig, ExecutionConfig, ForgeConfig, RetryConfig};

/// Prefix for environment variable overrides, e.g. `TESTFORGE_PARALLEL_THREAD_CORE`.
pub const ENV_PREFIX: &str = "TESTFORGE";

/// Errors raised while loading or interpreting configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file or environment could not be read.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A property holds a value that does not parse as the expected type.
    #[error("invalid value {value:?} for property {key}")]
    Invalid { key: String, value: String },
}

/// Key/value configuration lookup.
pub trait PropertySource: Send + Sync {
    fn get_property(&self, key: &str) -> Option<String>;

    fn get_string(&self, key: &str, default: &str) -> String {
        self.get_property(key)
            .unwrap_or_else(|| default.to_string())
    }

    /// Parse a property, `Ok(None)` when unset.
    fn try_get<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        Self: Sized,
    {
        parse_property(self, key)
    }

    fn get_usize(&self, key: &str, default: usize) -> usize {
        parse_or_default(self, key, default)
    }

    fn get_u64(&self, key: &str, default: u64) -> u64 {
        parse_or_default(self, key, default)
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        parse_or_default(self, key, default)
    }

    /// Comma separated list, entries trimmed, empties skipped.
    fn get_list(&self, key: &str, default: &[&str]) -> Vec<String> {
        match self.get_property(key) {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
            None => default.iter().map(|item| item.to_string()).collect(),
        }
    }
}

fn parse_property<S, T>(source: &S, key: &str) -> Result<Option<T>, ConfigError>
where
    S: PropertySource + ?Sized,
    T: FromStr,
{
    match source.get_property(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
            }),
    }
}

fn parse_or_default<S, T>(source: &S, key: &str, default: T) -> T
where
    S: PropertySource + ?Sized,
    T: FromStr,
{
    match parse_property(source, key) {
        Ok(Some(value)) => value,
        Ok(None) => default,
        Err(err) => {
            warn!(error = %err, "using default");
            default
        }
    }
}

impl PropertySource for HashMap<String, String> {
    fn get_property(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Layered property store safe for concurrent reads and writes.
#[derive(Debug, Default)]
pub struct Properties {
    overrides: RwLock<HashMap<String, String>>,
    base: Option<config::Config>,
}

impl Properties {
    /// Empty store with no file or environment layer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `TESTFORGE_*` environment variables and, when given, a TOML file.
    ///
    /// A file that is named but missing is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        let base = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("_"))
            .build()?;
        Ok(Self {
            overrides: RwLock::new(HashMap::new()),
            base: Some(base),
        })
    }

    /// Set an override, visible to every thread on its next read.
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.overrides
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value.into());
    }

    pub fn remove_property(&self, key: &str) -> Option<String> {
        self.overrides
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
    }
}

impl PropertySource for Properties {
    fn get_property(&self, key: &str) -> Option<String> {
        let overridden = self
            .overrides
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned();
        overridden.or_else(|| self.base.as_ref().and_then(|base| base.get_string(key).ok()))
    }
}
