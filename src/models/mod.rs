//! Domain model - plain value types shared by every storage backend
//!
//! Nothing here touches storage. Backends map their rows, documents and
//! hashes into these types, and the usecase layer passes them around.

pub mod invariants;
pub mod pokemon;
pub mod trainer;

pub use pokemon::{
    BaseStats, CreatePokemon, EvolutionRef, ListParams, Pokemon, PokemonNumber, TypeTag,
    UpdatePokemon,
};
pub use trainer::{
    CreateTrainer, TeamMember, TradePokemon, Trainer, TrainerId, UpdateTrainer, MAX_TEAM_SIZE,
};
