//! Storage configuration
//!
//! The backend is chosen once at startup from `DATABASE_URI`:
//!
//! | URI                          | Backend                      |
//! |------------------------------|------------------------------|
//! | `sqlite::memory:`            | relational, in-memory SQLite |
//! | `sqlite://pokedex.db`        | relational, file-backed      |
//! | `document://memory`          | in-process document engine   |
//! | `lmdb://data/pokedex`        | key-value on LMDB            |
//!
//! Appending `?reinitialize=true` wipes existing data when storage opens.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PokedexError, PokedexResult};

/// LMDB requires the map size to be a multiple of the OS page size
const LMDB_PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Relational,
    Document,
    KeyValue,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Relational => "relational",
            Self::Document => "document",
            Self::KeyValue => "key-value",
        };
        f.write_str(name)
    }
}

/// Configuration for the storage layer
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub database_uri: String,
    /// Pool size for the relational backend (in-memory SQLite always uses 1)
    pub max_connections: u32,
    pub lmdb_max_size: usize,
    /// Run document units of work inside multi-document transactions
    pub document_transactions: bool,
    /// Load the starter Pokedex after opening storage
    pub seed_data: bool,
    pub operation_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_uri: "sqlite::memory:".to_string(),
            max_connections: 10,
            lmdb_max_size: 100 * 1024 * 1024, // 100MB
            document_transactions: true,
            seed_data: false,
            operation_timeout: Duration::from_secs(5),
        }
    }
}

impl StorageConfig {
    pub fn new(database_uri: impl Into<String>) -> Self {
        Self {
            database_uri: database_uri.into(),
            ..Default::default()
        }
    }

    /// Read configuration from the environment, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let database_uri =
            std::env::var("DATABASE_URI").unwrap_or_else(|_| defaults.database_uri.clone());
        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(defaults.max_connections);
        let lmdb_max_size = {
            let raw = std::env::var("LMDB_MAX_SIZE")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(defaults.lmdb_max_size);
            raw.div_ceil(LMDB_PAGE_SIZE) * LMDB_PAGE_SIZE
        };
        let document_transactions = env_flag("DOCUMENT_TRANSACTIONS")
            .unwrap_or(defaults.document_transactions);
        let seed_data = env_flag("SEED_DATA").unwrap_or(defaults.seed_data);
        let operation_timeout = std::env::var("OPERATION_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.operation_timeout);

        Self {
            database_uri,
            max_connections,
            lmdb_max_size,
            document_transactions,
            seed_data,
            operation_timeout,
        }
    }

    /// Backend selected by the URI scheme
    pub fn backend(&self) -> PokedexResult<BackendKind> {
        let base = self.location();
        let scheme = base
            .split_once(':')
            .map(|(scheme, _)| scheme)
            .ok_or_else(|| PokedexError::Config(format!("missing scheme in {:?}", base)))?;

        match scheme.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(BackendKind::Relational),
            "document" | "memdoc" => Ok(BackendKind::Document),
            "lmdb" | "kv" => Ok(BackendKind::KeyValue),
            other => Err(PokedexError::Config(format!(
                "unsupported database scheme {:?}",
                other
            ))),
        }
    }

    /// URI without its query string
    pub fn location(&self) -> &str {
        match self.database_uri.split_once('?') {
            Some((base, _)) => base,
            None => &self.database_uri,
        }
    }

    /// Whether existing data should be dropped on startup
    pub fn reinitialize(&self) -> bool {
        self.query_param("reinitialize")
            .map(parse_flag)
            .unwrap_or(false)
    }

    /// Filesystem path of the LMDB environment (`lmdb://<path>`)
    pub fn lmdb_path(&self) -> PokedexResult<PathBuf> {
        let base = self.location();
        let path = base
            .split_once("://")
            .map(|(_, path)| path)
            .filter(|path| !path.is_empty())
            .ok_or_else(|| PokedexError::Config(format!("missing LMDB path in {:?}", base)))?;
        Ok(PathBuf::from(path))
    }

    /// True for `sqlite::memory:` style URIs
    pub fn is_in_memory_sqlite(&self) -> bool {
        self.location().contains(":memory:")
    }

    fn query_param(&self, key: &str) -> Option<&str> {
        let (_, query) = self.database_uri.split_once('?')?;
        query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, "true"));
            (k == key).then_some(v)
        })
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| parse_flag(&v))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
