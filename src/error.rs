//! Error taxonomy shared by repositories and usecases

use crate::config::BackendKind;
use crate::models::{PokemonNumber, TrainerId};

/// Result type used across the storage and usecase layers
pub type PokedexResult<T> = Result<T, PokedexError>;

/// Errors surfaced to callers of the repositories and usecases
#[derive(Debug, thiserror::Error)]
pub enum PokedexError {
    #[error("Pokemon not found: {0}")]
    PokemonNotFound(String),
    #[error("Trainer not found: {0}")]
    TrainerNotFound(String),
    #[error("Pokemon already exists: {0}")]
    PokemonAlreadyExists(String),
    #[error("Trainer {trainer_id} already has a full team")]
    TeamFull { trainer_id: TrainerId },
    #[error("Trainer {trainer_id} already owns Pokemon {number}")]
    AlreadyOwnsPokemon {
        trainer_id: TrainerId,
        number: PokemonNumber,
    },
    #[error("Trainer {trainer_id} does not own Pokemon {number}")]
    DoesNotOwnPokemon {
        trainer_id: TrainerId,
        number: PokemonNumber,
    },
    #[error("Invalid Pokemon number: {0:?}")]
    InvalidPokemonNumber(String),
    #[error("Invalid trainer id: {0:?}")]
    InvalidTrainerId(String),
    #[error("Pokemon {0} cannot evolve from or into itself")]
    SelfReferencingEvolution(String),
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Configuration error: {0}")]
    Config(String),
    /// Anything the backend could not classify
    #[error("Storage error ({backend}): {message}")]
    Storage {
        backend: BackendKind,
        message: String,
    },
}

impl PokedexError {
    pub fn pokemon_not_found(number: &PokemonNumber) -> Self {
        Self::PokemonNotFound(number.to_string())
    }

    /// NotFound for a batch of numbers, joined in input order
    pub fn pokemon_batch_not_found<'a, I>(numbers: I) -> Self
    where
        I: IntoIterator<Item = &'a PokemonNumber>,
    {
        let joined = numbers
            .into_iter()
            .map(PokemonNumber::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        Self::PokemonNotFound(joined)
    }

    pub fn trainer_not_found(id: &TrainerId) -> Self {
        Self::TrainerNotFound(id.to_string())
    }

    pub fn storage(backend: BackendKind, err: impl std::fmt::Display) -> Self {
        Self::Storage {
            backend,
            message: err.to_string(),
        }
    }

    /// HTTP status a controller should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::PokemonNotFound(_) | Self::TrainerNotFound(_) => 404,
            Self::PokemonAlreadyExists(_) | Self::AlreadyOwnsPokemon { .. } => 409,
            Self::TeamFull { .. }
            | Self::DoesNotOwnPokemon { .. }
            | Self::InvalidPokemonNumber(_)
            | Self::InvalidTrainerId(_)
            | Self::SelfReferencingEvolution(_) => 400,
            Self::Timeout(_) => 504,
            Self::Config(_) | Self::Storage { .. } => 500,
        }
    }
}

impl From<sqlx::Error> for PokedexError {
    fn from(err: sqlx::Error) -> Self {
        Self::storage(BackendKind::Relational, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let number = PokemonNumber::parse("0001").unwrap();
        let trainer_id = TrainerId::generate();

        assert_eq!(PokedexError::pokemon_not_found(&number).status_code(), 404);
        assert_eq!(PokedexError::PokemonAlreadyExists("0001".into()).status_code(), 409);
        assert_eq!(
            PokedexError::TeamFull { trainer_id: trainer_id.clone() }.status_code(),
            400
        );
        assert_eq!(
            PokedexError::AlreadyOwnsPokemon { trainer_id, number }.status_code(),
            409
        );
        assert_eq!(
            PokedexError::storage(BackendKind::KeyValue, "boom").status_code(),
            500
        );
    }

    #[test]
    fn test_batch_not_found_message() {
        let numbers = [
            PokemonNumber::parse("0002").unwrap(),
            PokemonNumber::parse("0003").unwrap(),
        ];
        let err = PokedexError::pokemon_batch_not_found(&numbers);
        assert_eq!(err.to_string(), "Pokemon not found: 0002, 0003");
        assert_eq!(err.status_code(), 404);
    }
}
