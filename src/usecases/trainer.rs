//! Trainer usecases: CRUD plus team orchestration (catch, release, trade)
//!
//! Ownership and capacity checks run here against a trainer loaded inside
//! the same unit of work as the writes. No row lock guards the gap between
//! check and write, so concurrent catches against one trainer are only as
//! safe as the backend's isolation makes them.

use tracing::{info, instrument};

use crate::error::{PokedexError, PokedexResult};
use crate::models::{
    CreateTrainer, PokemonNumber, TradePokemon, Trainer, TrainerId, UpdateTrainer,
};
use crate::storage::unit_of_work::{finish, UnitOfWork, UnitOfWorkFactory};

#[instrument(skip(factory, data), fields(name = %data.name))]
pub async fn create(factory: &dyn UnitOfWorkFactory, data: &CreateTrainer) -> PokedexResult<Trainer> {
    let mut uow = factory.enter().await?;
    let result = create_in(uow.as_mut(), data).await;
    let trainer = finish(uow, result).await?;
    info!("Created trainer {} ({})", trainer.id, trainer.name);
    Ok(trainer)
}

async fn create_in(uow: &mut dyn UnitOfWork, data: &CreateTrainer) -> PokedexResult<Trainer> {
    let id = uow.trainers().create(data).await?;
    uow.trainers().get(&id).await
}

#[instrument(skip(factory))]
pub async fn get(factory: &dyn UnitOfWorkFactory, id: &TrainerId) -> PokedexResult<Trainer> {
    let mut uow = factory.enter().await?;
    let result = uow.trainers().get(id).await;
    finish(uow, result).await
}

#[instrument(skip(factory))]
pub async fn list(factory: &dyn UnitOfWorkFactory) -> PokedexResult<Vec<Trainer>> {
    let mut uow = factory.enter().await?;
    let result = uow.trainers().list().await;
    finish(uow, result).await
}

#[instrument(skip(factory, patch))]
pub async fn update(factory: &dyn UnitOfWorkFactory, id: &TrainerId, patch: &UpdateTrainer) -> PokedexResult<Trainer> {
    let mut uow = factory.enter().await?;
    let result = update_in(uow.as_mut(), id, patch).await;
    finish(uow, result).await
}

async fn update_in(uow: &mut dyn UnitOfWork, id: &TrainerId, patch: &UpdateTrainer) -> PokedexResult<Trainer> {
    uow.trainers().update(id, patch).await?;
    uow.trainers().get(id).await
}

#[instrument(skip(factory))]
pub async fn delete(factory: &dyn UnitOfWorkFactory, id: &TrainerId) -> PokedexResult<()> {
    let mut uow = factory.enter().await?;
    let result = uow.trainers().delete(id).await;
    finish(uow, result).await
}

// ============================================================================
// Team orchestration
// ============================================================================

/// Add a Pokemon to a trainer's team
///
/// Fails with `TeamFull` before `AlreadyOwnsPokemon`, so a full team never
/// reports ownership.
#[instrument(skip(factory))]
pub async fn catch(factory: &dyn UnitOfWorkFactory, id: &TrainerId, number: &PokemonNumber) -> PokedexResult<Trainer> {
    let mut uow = factory.enter().await?;
    let result = catch_in(uow.as_mut(), id, number).await;
    let trainer = finish(uow, result).await?;
    info!("Trainer {} caught Pokemon {}", id, number);
    Ok(trainer)
}

async fn catch_in(uow: &mut dyn UnitOfWork, id: &TrainerId, number: &PokemonNumber) -> PokedexResult<Trainer> {
    let trainer = uow.trainers().get(id).await?;
    uow.pokemon().get(number).await?;

    if trainer.is_team_full() {
        return Err(PokedexError::TeamFull { trainer_id: id.clone() });
    }
    if trainer.has_pokemon(number) {
        return Err(PokedexError::AlreadyOwnsPokemon {
            trainer_id: id.clone(),
            number: number.clone(),
        });
    }

    uow.trainers().add_to_team(id, number).await?;
    uow.trainers().get(id).await
}

/// Remove a Pokemon from a trainer's team
#[instrument(skip(factory))]
pub async fn release(factory: &dyn UnitOfWorkFactory, id: &TrainerId, number: &PokemonNumber) -> PokedexResult<Trainer> {
    let mut uow = factory.enter().await?;
    let result = release_in(uow.as_mut(), id, number).await;
    let trainer = finish(uow, result).await?;
    info!("Trainer {} released Pokemon {}", id, number);
    Ok(trainer)
}

async fn release_in(uow: &mut dyn UnitOfWork, id: &TrainerId, number: &PokemonNumber) -> PokedexResult<Trainer> {
    let trainer = uow.trainers().get(id).await?;
    if !trainer.has_pokemon(number) {
        return Err(PokedexError::DoesNotOwnPokemon {
            trainer_id: id.clone(),
            number: number.clone(),
        });
    }

    uow.trainers().remove_from_team(id, number).await?;
    uow.trainers().get(id).await
}

/// Swap one Pokemon each between two trainers; returns both trainers afterwards
#[instrument(skip(factory, trade), fields(trainer = %trade.trainer_id, other = %trade.other_trainer_id))]
pub async fn trade(factory: &dyn UnitOfWorkFactory, trade: &TradePokemon) -> PokedexResult<(Trainer, Trainer)> {
    let mut uow = factory.enter().await?;
    let result = trade_in(uow.as_mut(), trade).await;
    let traded = finish(uow, result).await?;
    info!(
        "Trainer {} traded {} for {} with trainer {}",
        trade.trainer_id, trade.pokemon_number, trade.other_pokemon_number, trade.other_trainer_id
    );
    Ok(traded)
}

async fn trade_in(uow: &mut dyn UnitOfWork, trade: &TradePokemon) -> PokedexResult<(Trainer, Trainer)> {
    let trainer = uow.trainers().get(&trade.trainer_id).await?;
    let other = uow.trainers().get(&trade.other_trainer_id).await?;

    for (owner, number) in [
        (&trainer, &trade.pokemon_number),
        (&other, &trade.other_pokemon_number),
    ] {
        if !owner.has_pokemon(number) {
            return Err(PokedexError::DoesNotOwnPokemon {
                trainer_id: owner.id.clone(),
                number: number.clone(),
            });
        }
    }
    for (owner, number) in [
        (&trainer, &trade.other_pokemon_number),
        (&other, &trade.pokemon_number),
    ] {
        if owner.has_pokemon(number) {
            return Err(PokedexError::AlreadyOwnsPokemon {
                trainer_id: owner.id.clone(),
                number: number.clone(),
            });
        }
    }

    let mut repo = uow.trainers();
    repo.remove_from_team(&trade.trainer_id, &trade.pokemon_number).await?;
    repo.remove_from_team(&trade.other_trainer_id, &trade.other_pokemon_number).await?;
    repo.add_to_team(&trade.trainer_id, &trade.other_pokemon_number).await?;
    repo.add_to_team(&trade.other_trainer_id, &trade.pokemon_number).await?;

    Ok((
        repo.get(&trade.trainer_id).await?,
        repo.get(&trade.other_trainer_id).await?,
    ))
}
