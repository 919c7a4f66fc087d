//! Unit of work - the session boundary around one logical operation
//!
//! ```text
//! factory.enter() ──► UnitOfWork ──► pokemon() / trainers() ──► exit(outcome)
//!                        │                                          │
//!                        └── owns the session / tx / connection ────┘
//! ```
//!
//! | Backend    | Success           | Failure             |
//! |------------|-------------------|---------------------|
//! | relational | COMMIT            | ROLLBACK            |
//! | document   | commit txn        | abort txn           |
//! | key-value  | release handle    | release handle only |

use async_trait::async_trait;
use tracing::{debug, warn};

use super::repository::{PokemonRepository, TrainerRepository};
use crate::config::BackendKind;
use crate::error::PokedexResult;

/// How a unit of work ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// A live session with both repositories bound to it
#[async_trait]
pub trait UnitOfWork: Send {
    fn backend(&self) -> BackendKind;

    fn pokemon(&mut self) -> Box<dyn PokemonRepository + '_>;

    fn trainers(&mut self) -> Box<dyn TrainerRepository + '_>;

    /// Close the session: commit on success, roll back on failure
    async fn exit(self: Box<Self>, outcome: Outcome) -> PokedexResult<()>;
}

/// Opens units of work against the configured backend
#[async_trait]
pub trait UnitOfWorkFactory: Send + Sync {
    fn backend(&self) -> BackendKind;

    async fn enter(&self) -> PokedexResult<Box<dyn UnitOfWork>>;

    /// Drop all stored data (used for `reinitialize`)
    async fn reset(&self) -> PokedexResult<()>;
}

/// Exit `uow` according to `result` and hand the result back.
///
/// The work error wins over an exit error on the failure path; on the
/// success path a failed commit is reported.
pub async fn finish<T>(uow: Box<dyn UnitOfWork>, result: PokedexResult<T>) -> PokedexResult<T> {
    let backend = uow.backend();
    match result {
        Ok(value) => {
            uow.exit(Outcome::Success).await?;
            Ok(value)
        }
        Err(err) => {
            debug!("Unit of work failed on {} backend: {}", backend, err);
            if let Err(exit_err) = uow.exit(Outcome::Failure).await {
                warn!("Failed to close {} unit of work: {}", backend, exit_err);
            }
            Err(err)
        }
    }
}
