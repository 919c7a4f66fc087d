//! Pokedex Server Library
//!
//! Storage core for a Pokemon / Trainer catalog:
//! - Domain model and backend-independent invariants
//! - Repository + Unit of Work contracts
//! - Three interchangeable backends (SQLite, in-process documents, LMDB key-value)
//! - Usecases orchestrating catalog edits, catches, releases and trades

pub mod config;
pub mod error;
pub mod models;
pub mod storage; // Repositories, units of work and the three backends
pub mod usecases; // Backend-agnostic orchestration

// Re-export commonly used types
pub use config::{BackendKind, StorageConfig};
pub use error::{PokedexError, PokedexResult};
pub use storage::init_storage;
pub use storage::unit_of_work::{UnitOfWork, UnitOfWorkFactory};
