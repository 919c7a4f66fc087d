//! Pokemon usecases
//!
//! Create and update attach types and evolution links after the base record
//! exists, inside the same unit of work. Evolution lists are validated for
//! self-reference and for presence of every peer before any link is written.

use tracing::{info, instrument};

use crate::error::{PokedexError, PokedexResult};
use crate::models::invariants::validate_number_not_self_referencing;
use crate::models::{CreatePokemon, ListParams, Pokemon, PokemonNumber, UpdatePokemon};
use crate::storage::unit_of_work::{finish, UnitOfWork, UnitOfWorkFactory};

#[instrument(skip(factory, data), fields(number = %data.number))]
pub async fn create(factory: &dyn UnitOfWorkFactory, data: &CreatePokemon) -> PokedexResult<Pokemon> {
    let mut uow = factory.enter().await?;
    let result = create_in(uow.as_mut(), data).await;
    let pokemon = finish(uow, result).await?;
    info!("Created Pokemon {} ({})", pokemon.number, pokemon.name);
    Ok(pokemon)
}

async fn create_in(uow: &mut dyn UnitOfWork, data: &CreatePokemon) -> PokedexResult<Pokemon> {
    validate_number_not_self_referencing(
        &data.number,
        &data.previous_evolution_numbers,
        &data.next_evolution_numbers,
    )?;

    let number = uow.pokemon().create(data).await?;
    uow.pokemon().replace_types(&number, &data.type_names).await?;

    if !data.previous_evolution_numbers.is_empty() {
        ensure_present(uow, &data.previous_evolution_numbers).await?;
        uow.pokemon()
            .replace_previous_evolutions(&number, &data.previous_evolution_numbers)
            .await?;
    }
    if !data.next_evolution_numbers.is_empty() {
        ensure_present(uow, &data.next_evolution_numbers).await?;
        uow.pokemon()
            .replace_next_evolutions(&number, &data.next_evolution_numbers)
            .await?;
    }

    uow.pokemon().get(&number).await
}

#[instrument(skip(factory))]
pub async fn get(factory: &dyn UnitOfWorkFactory, number: &PokemonNumber) -> PokedexResult<Pokemon> {
    let mut uow = factory.enter().await?;
    let result = uow.pokemon().get(number).await;
    finish(uow, result).await
}

#[instrument(skip(factory))]
pub async fn list(factory: &dyn UnitOfWorkFactory, params: ListParams) -> PokedexResult<Vec<Pokemon>> {
    let mut uow = factory.enter().await?;
    let result = uow.pokemon().list(params).await;
    finish(uow, result).await
}

/// Apply a partial update; `Some` lists replace the stored ones wholesale
#[instrument(skip(factory, patch))]
pub async fn update(
    factory: &dyn UnitOfWorkFactory,
    number: &PokemonNumber,
    patch: &UpdatePokemon,
) -> PokedexResult<Pokemon> {
    let mut uow = factory.enter().await?;
    let result = update_in(uow.as_mut(), number, patch).await;
    finish(uow, result).await
}

async fn update_in(uow: &mut dyn UnitOfWork, number: &PokemonNumber, patch: &UpdatePokemon) -> PokedexResult<Pokemon> {
    validate_number_not_self_referencing(
        number,
        patch.previous_evolution_numbers.as_deref().unwrap_or_default(),
        patch.next_evolution_numbers.as_deref().unwrap_or_default(),
    )?;

    uow.pokemon().update(number, patch).await?;

    if let Some(type_names) = &patch.type_names {
        uow.pokemon().replace_types(number, type_names).await?;
    }
    if let Some(previous) = &patch.previous_evolution_numbers {
        ensure_present(uow, previous).await?;
        uow.pokemon().replace_previous_evolutions(number, previous).await?;
    }
    if let Some(next) = &patch.next_evolution_numbers {
        ensure_present(uow, next).await?;
        uow.pokemon().replace_next_evolutions(number, next).await?;
    }

    uow.pokemon().get(number).await
}

/// Delete a Pokemon and strip it from every trainer's team
#[instrument(skip(factory))]
pub async fn delete(factory: &dyn UnitOfWorkFactory, number: &PokemonNumber) -> PokedexResult<()> {
    let mut uow = factory.enter().await?;
    let result = delete_in(uow.as_mut(), number).await;
    finish(uow, result).await?;
    info!("Deleted Pokemon {}", number);
    Ok(())
}

async fn delete_in(uow: &mut dyn UnitOfWork, number: &PokemonNumber) -> PokedexResult<()> {
    uow.pokemon().delete(number).await?;
    uow.trainers().remove_pokemon_from_all_teams(number).await
}

async fn ensure_present(uow: &mut dyn UnitOfWork, numbers: &[PokemonNumber]) -> PokedexResult<()> {
    if uow.pokemon().are_all_present(numbers).await? {
        Ok(())
    } else {
        Err(PokedexError::pokemon_batch_not_found(numbers))
    }
}
