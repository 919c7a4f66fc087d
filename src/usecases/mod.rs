//! Usecases - backend-agnostic orchestration
//!
//! Each public function opens exactly one unit of work, runs its repository
//! calls against it and closes it with [`finish`](crate::storage::unit_of_work::finish),
//! so a failure anywhere rolls back whatever the backend can roll back.

pub mod pokemon;
pub mod trainer;

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{PokedexError, PokedexResult};

/// Run `operation` with a deadline.
///
/// On expiry the future is dropped, and with it any open unit of work:
/// relational and document work is abandoned uncommitted, key-value work
/// keeps whatever commands already ran.
pub async fn with_deadline<F, T>(deadline: Duration, operation: F) -> PokedexResult<T>
where
    F: Future<Output = PokedexResult<T>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Operation exceeded its {:?} deadline", deadline);
            Err(PokedexError::Timeout(deadline))
        }
    }
}
