//! Storage Layer - one catalog, three interchangeable backends
//!
//! Implements the Repository + Unit of Work pattern over:
//! - **SQLite**: relational tables, foreign keys, real transactions
//! - **Document engine**: in-process collections with `_id` reference arrays
//! - **LMDB key-value**: hashes and sets, maintained by hand in both directions
//!
//! ## Architecture
//! ```text
//! [Usecases]
//!       ↓
//! [UnitOfWorkFactory] ── enter() ──► [UnitOfWork] ── pokemon() / trainers()
//!       ↓                                  ↓
//! ┌──────────────┬──────────────────┬──────────────────┐
//! │ SqliteStore  │ DocumentStore    │ LmdbKeyValueStore│
//! │ + SqliteRepo │ + DocumentRepo   │ + LmdbRepo       │
//! └──────────────┴──────────────────┴──────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let config = StorageConfig::new("sqlite::memory:");
//! let factory = storage::init_storage(&config).await?;
//!
//! let pikachu = usecases::pokemon::get(factory.as_ref(), &number).await?;
//! ```

pub mod document_pipeline;
pub mod document_repo_adapter;
pub mod document_store;
pub mod evolution;
pub mod lmdb_kv;
pub mod lmdb_repo_adapter;
pub mod migrations;
pub mod repository;
pub mod seed_data;
pub mod sqlite;
pub mod sqlite_repo_adapter;
pub mod unit_of_work;

use std::sync::Arc;
use tracing::info;

use self::document_store::DocumentStore;
use self::lmdb_kv::LmdbKeyValueStore;
use self::sqlite::SqliteStore;
use self::unit_of_work::UnitOfWorkFactory;
use crate::config::{BackendKind, StorageConfig};
use crate::error::PokedexResult;

/// Open the backend named by `config.database_uri`
///
/// Runs schema setup for the chosen backend, and wipes existing data first
/// when the URI carries `reinitialize=true`.
pub async fn init_storage(config: &StorageConfig) -> PokedexResult<Arc<dyn UnitOfWorkFactory>> {
    let backend = config.backend()?;

    let factory: Arc<dyn UnitOfWorkFactory> = match backend {
        BackendKind::Relational => {
            Arc::new(SqliteStore::new(config).await?)
        }
        BackendKind::Document => {
            let store = DocumentStore::new(config.document_transactions);
            document_repo_adapter::initialize(&store)?;
            Arc::new(store)
        }
        BackendKind::KeyValue => {
            let path = config.lmdb_path()?;
            Arc::new(LmdbKeyValueStore::new(path, config.lmdb_max_size)?)
        }
    };

    if config.reinitialize() {
        factory.reset().await?;
        info!("Storage reinitialized ({} backend)", backend);
    }

    info!("Storage initialized: {} backend at {}", backend, config.location());
    Ok(factory)
}
