//! Repository traits - abstraction layer for data access
//!
//! Usecases talk to storage only through these traits, so the relational,
//! document and key-value backends are interchangeable. A repository borrows
//! the session owned by its unit of work; it never opens its own.
//!
//! Every backend honours the same read ordering: types by name, evolutions and
//! teams by Pokedex number, Pokemon lists by number, trainer lists by id.

use async_trait::async_trait;

use crate::error::PokedexResult;
use crate::models::{
    CreatePokemon, CreateTrainer, ListParams, Pokemon, PokemonNumber, Trainer, TrainerId,
    UpdatePokemon, UpdateTrainer,
};

// ============================================================================
// Pokemon
// ============================================================================

/// Repository for Pokemon and their type / evolution links
#[async_trait]
pub trait PokemonRepository: Send {
    /// Fully resolved Pokemon, or `PokemonNotFound`
    async fn get(&mut self, number: &PokemonNumber) -> PokedexResult<Pokemon>;

    /// One page of Pokemon ordered by number
    async fn list(&mut self, params: ListParams) -> PokedexResult<Vec<Pokemon>>;

    /// Insert the base record (name and stats only). Types and evolutions are
    /// attached afterwards through the `replace_*` operations.
    async fn create(&mut self, data: &CreatePokemon) -> PokedexResult<PokemonNumber>;

    /// Apply the name / stats part of a patch. Fails with `PokemonNotFound`
    /// even when the patch is empty.
    async fn update(&mut self, number: &PokemonNumber, patch: &UpdatePokemon) -> PokedexResult<()>;

    /// Remove the Pokemon with its type links and every evolution edge that
    /// touches it. Team membership is cleaned by the trainer repository.
    async fn delete(&mut self, number: &PokemonNumber) -> PokedexResult<()>;

    /// True when every number exists; vacuously true for an empty slice
    async fn are_all_present(&mut self, numbers: &[PokemonNumber]) -> PokedexResult<bool>;

    /// Replace the type set, creating unknown types on first use
    async fn replace_types(&mut self, number: &PokemonNumber, type_names: &[String]) -> PokedexResult<()>;

    /// Replace the previous evolutions and keep every peer's next list in step
    async fn replace_previous_evolutions(
        &mut self,
        number: &PokemonNumber,
        previous: &[PokemonNumber],
    ) -> PokedexResult<()>;

    /// Replace the next evolutions and keep every peer's previous list in step
    async fn replace_next_evolutions(
        &mut self,
        number: &PokemonNumber,
        next: &[PokemonNumber],
    ) -> PokedexResult<()>;

    async fn count(&mut self) -> PokedexResult<usize>;
}

// ============================================================================
// Trainers
// ============================================================================

/// Repository for trainers and their teams
#[async_trait]
pub trait TrainerRepository: Send {
    async fn get(&mut self, id: &TrainerId) -> PokedexResult<Trainer>;

    /// All trainers ordered by id
    async fn list(&mut self) -> PokedexResult<Vec<Trainer>>;

    async fn create(&mut self, data: &CreateTrainer) -> PokedexResult<TrainerId>;

    async fn update(&mut self, id: &TrainerId, patch: &UpdateTrainer) -> PokedexResult<()>;

    async fn delete(&mut self, id: &TrainerId) -> PokedexResult<()>;

    /// Idempotent; capacity and ownership rules are enforced by the caller
    async fn add_to_team(&mut self, id: &TrainerId, number: &PokemonNumber) -> PokedexResult<()>;

    /// No-op when the Pokemon is not on the team
    async fn remove_from_team(&mut self, id: &TrainerId, number: &PokemonNumber) -> PokedexResult<()>;

    /// Strip a Pokemon from every team (deletion cascade)
    async fn remove_pokemon_from_all_teams(&mut self, number: &PokemonNumber) -> PokedexResult<()>;

    async fn count(&mut self) -> PokedexResult<usize>;
}
