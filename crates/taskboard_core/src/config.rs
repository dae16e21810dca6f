//! Startup configuration for backend selection.
//!
//! # Responsibility
//! - Describe which storage adapter the store runs on.
//! - Load that choice from JSON or from process environment.
//!
//! # Invariants
//! - Backend selection happens once, at store open; it is never switched
//!   on a live store.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const BACKEND_ENV: &str = "TASKBOARD_BACKEND";
pub const DB_PATH_ENV: &str = "TASKBOARD_DB_PATH";

#[derive(Debug)]
pub enum ConfigError {
    Json(serde_json::Error),
    UnsupportedBackend(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(err) => write!(f, "invalid store config: {err}"),
            Self::UnsupportedBackend(value) => write!(
                f,
                "unsupported backend `{value}`; expected sqlite|memory"
            ),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            Self::UnsupportedBackend(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendConfig {
    /// SQLite file at `path`; in-memory SQLite when `path` is absent.
    Sqlite {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// Map-based engine, persisted as a JSON document when
    /// `persist_path` is set.
    Memory {
        #[serde(default)]
        persist_path: Option<PathBuf>,
    },
}

/// Top-level store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(flatten)]
    pub backend: BackendConfig,
}

impl StoreConfig {
    pub fn sqlite_file(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendConfig::Sqlite {
                path: Some(path.into()),
            },
        }
    }

    pub fn sqlite_in_memory() -> Self {
        Self {
            backend: BackendConfig::Sqlite { path: None },
        }
    }

    pub fn memory() -> Self {
        Self {
            backend: BackendConfig::Memory { persist_path: None },
        }
    }

    pub fn memory_persisted(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendConfig::Memory {
                persist_path: Some(path.into()),
            },
        }
    }

    /// Parses `{"backend": "sqlite" | "memory", ...}`.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Reads `TASKBOARD_BACKEND` and `TASKBOARD_DB_PATH`.
    ///
    /// Backend defaults to `sqlite`; a blank path means no path.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let path = lookup(DB_PATH_ENV)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(PathBuf::from);
        let backend = lookup(BACKEND_ENV)
            .map(|raw| raw.trim().to_ascii_lowercase())
            .filter(|raw| !raw.is_empty())
            .unwrap_or_else(|| "sqlite".to_string());

        match backend.as_str() {
            "sqlite" => Ok(Self {
                backend: BackendConfig::Sqlite { path },
            }),
            "memory" => Ok(Self {
                backend: BackendConfig::Memory { persist_path: path },
            }),
            other => Err(ConfigError::UnsupportedBackend(other.to_string())),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::sqlite_in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::{BackendConfig, ConfigError, StoreConfig, BACKEND_ENV, DB_PATH_ENV};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn json_selects_sqlite_file() {
        let config =
            StoreConfig::from_json_str(r#"{"backend":"sqlite","path":"/tmp/tb.sqlite3"}"#).unwrap();
        assert_eq!(config, StoreConfig::sqlite_file("/tmp/tb.sqlite3"));
    }

    #[test]
    fn json_memory_without_path_is_volatile() {
        let config = StoreConfig::from_json_str(r#"{"backend":"memory"}"#).unwrap();
        assert_eq!(config.backend, BackendConfig::Memory { persist_path: None });
    }

    #[test]
    fn env_defaults_to_sqlite_and_ignores_blank_path() {
        let config = StoreConfig::from_lookup(lookup(&[(DB_PATH_ENV, "   ")])).unwrap();
        assert_eq!(config, StoreConfig::sqlite_in_memory());
    }

    #[test]
    fn env_memory_backend_uses_path_for_persistence() {
        let config = StoreConfig::from_lookup(lookup(&[
            (BACKEND_ENV, " Memory "),
            (DB_PATH_ENV, "/data/store.json"),
        ]))
        .unwrap();
        assert_eq!(
            config.backend,
            BackendConfig::Memory {
                persist_path: Some(PathBuf::from("/data/store.json"))
            }
        );
    }

    #[test]
    fn env_rejects_unknown_backend() {
        let err = StoreConfig::from_lookup(lookup(&[(BACKEND_ENV, "lokijs")])).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedBackend(value) if value == "lokijs"));
    }
}
