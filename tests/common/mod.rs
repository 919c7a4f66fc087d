//! Backend contract suite
//!
//! Every function takes a freshly opened factory and checks one property
//! that all three backends must share. `tests/storage_contract.rs` runs the
//! suite once per backend.

#![allow(dead_code)]

use pokedex_server::models::{
    BaseStats, CreatePokemon, CreateTrainer, ListParams, Pokemon, PokemonNumber, TradePokemon,
    Trainer, UpdatePokemon, UpdateTrainer, MAX_TEAM_SIZE,
};
use pokedex_server::storage::unit_of_work::Outcome;
use pokedex_server::usecases::{pokemon, trainer};
use pokedex_server::{PokedexError, UnitOfWorkFactory};

pub fn no(raw: &str) -> PokemonNumber {
    PokemonNumber::parse(raw).unwrap()
}

pub async fn add(factory: &dyn UnitOfWorkFactory, number: &str, name: &str) -> Pokemon {
    pokemon::create(factory, &CreatePokemon::new(no(number), name))
        .await
        .unwrap()
}

pub async fn add_trainer(factory: &dyn UnitOfWorkFactory, name: &str) -> Trainer {
    trainer::create(factory, &CreateTrainer::new(name, "Kanto"))
        .await
        .unwrap()
}

async fn fetch(factory: &dyn UnitOfWorkFactory, number: &str) -> Pokemon {
    pokemon::get(factory, &no(number)).await.unwrap()
}

fn next_of(p: &Pokemon) -> Vec<&str> {
    p.next_evolutions.iter().map(|e| e.number.as_str()).collect()
}

fn previous_of(p: &Pokemon) -> Vec<&str> {
    p.previous_evolutions.iter().map(|e| e.number.as_str()).collect()
}

fn team_of(t: &Trainer) -> Vec<&str> {
    t.team.iter().map(|m| m.number.as_str()).collect()
}

fn set_previous(numbers: &[&str]) -> UpdatePokemon {
    UpdatePokemon {
        previous_evolution_numbers: Some(numbers.iter().map(|n| no(n)).collect()),
        ..Default::default()
    }
}

fn set_next(numbers: &[&str]) -> UpdatePokemon {
    UpdatePokemon {
        next_evolution_numbers: Some(numbers.iter().map(|n| no(n)).collect()),
        ..Default::default()
    }
}

// ============================================================================
// Pokemon CRUD
// ============================================================================

pub async fn create_then_duplicate_fails(factory: &dyn UnitOfWorkFactory) {
    let created = add(factory, "0025", "Pikachu").await;
    assert_eq!(created.name, "Pikachu");
    assert_eq!(fetch(factory, "0025").await, created);

    let duplicate = pokemon::create(factory, &CreatePokemon::new(no("0025"), "Pikachu")).await;
    assert!(
        matches!(duplicate, Err(PokedexError::PokemonAlreadyExists(_))),
        "expected PokemonAlreadyExists, got: {:?}",
        duplicate
    );
}

pub async fn get_missing_is_not_found(factory: &dyn UnitOfWorkFactory) {
    let result = pokemon::get(factory, &no("0404")).await;
    assert!(matches!(result, Err(PokedexError::PokemonNotFound(_))));
}

pub async fn stats_and_types_round_trip(factory: &dyn UnitOfWorkFactory) {
    let stats = BaseStats {
        hp: Some(45),
        speed: Some(45),
        ..Default::default()
    };
    let data = CreatePokemon::new(no("0001"), "Bulbasaur")
        .with_stats(stats)
        .with_types(["poison", "grass"]);
    let created = pokemon::create(factory, &data).await.unwrap();

    assert_eq!(created.stats, stats);
    assert_eq!(created.type_names(), vec!["grass", "poison"]);
    assert!(created.types.iter().all(|t| !t.id.is_empty()));
}

pub async fn list_is_ordered_and_paginated(factory: &dyn UnitOfWorkFactory) {
    add(factory, "0003", "Venusaur").await;
    add(factory, "0001", "Bulbasaur").await;
    add(factory, "0002", "Ivysaur").await;

    let all = pokemon::list(factory, ListParams::default()).await.unwrap();
    let numbers: Vec<&str> = all.iter().map(|p| p.number.as_str()).collect();
    assert_eq!(numbers, vec!["0001", "0002", "0003"]);

    let first = pokemon::list(factory, ListParams::new(1, 2)).await.unwrap();
    assert_eq!(first.len(), 2);
    let second = pokemon::list(factory, ListParams::new(2, 2)).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].number.as_str(), "0003");
    assert!(pokemon::list(factory, ListParams::new(3, 2)).await.unwrap().is_empty());
}

pub async fn page_past_the_end_is_empty(factory: &dyn UnitOfWorkFactory) {
    add(factory, "0001", "Bulbasaur").await;
    add(factory, "0002", "Ivysaur").await;
    add(factory, "0003", "Venusaur").await;

    assert!(pokemon::list(factory, ListParams::new(4, 1)).await.unwrap().is_empty());
    let far = pokemon::list(factory, ListParams::new(u32::MAX, u32::MAX)).await.unwrap();
    assert!(far.is_empty(), "expected an empty page, got {} Pokemon", far.len());
}

pub async fn type_tags_are_shared_by_name(factory: &dyn UnitOfWorkFactory) {
    let bulbasaur = pokemon::create(
        factory,
        &CreatePokemon::new(no("0001"), "Bulbasaur").with_types(["grass", "poison"]),
    )
    .await
    .unwrap();
    let oddish = pokemon::create(
        factory,
        &CreatePokemon::new(no("0043"), "Oddish").with_types(["grass"]),
    )
    .await
    .unwrap();

    let grass_id = |p: &Pokemon| {
        p.types
            .iter()
            .find(|t| t.name == "grass")
            .map(|t| t.id.clone())
            .unwrap()
    };
    assert_eq!(grass_id(&bulbasaur), grass_id(&oddish));

    // Re-tagging reuses the existing type instead of creating another
    let patch = UpdatePokemon {
        type_names: Some(vec!["grass".to_string()]),
        ..Default::default()
    };
    let retagged = pokemon::update(factory, &no("0001"), &patch).await.unwrap();
    assert_eq!(retagged.types.len(), 1);
    assert_eq!(grass_id(&retagged), grass_id(&oddish));
}

pub async fn update_applies_patch(factory: &dyn UnitOfWorkFactory) {
    pokemon::create(
        factory,
        &CreatePokemon::new(no("0133"), "Eevee").with_types(["normal"]),
    )
    .await
    .unwrap();

    let patch = UpdatePokemon {
        name: Some("Eievui".to_string()),
        type_names: Some(vec!["fairy".to_string(), "normal".to_string()]),
        ..Default::default()
    };
    let updated = pokemon::update(factory, &no("0133"), &patch).await.unwrap();
    assert_eq!(updated.name, "Eievui");
    assert_eq!(updated.type_names(), vec!["fairy", "normal"]);

    // Untouched fields survive an empty patch
    let same = pokemon::update(factory, &no("0133"), &UpdatePokemon::default())
        .await
        .unwrap();
    assert_eq!(same, updated);
}

pub async fn stats_patch_replaces_all_fields(factory: &dyn UnitOfWorkFactory) {
    let stats = BaseStats {
        hp: Some(45),
        attack: Some(49),
        speed: Some(45),
        ..Default::default()
    };
    pokemon::create(factory, &CreatePokemon::new(no("0001"), "Bulbasaur").with_stats(stats))
        .await
        .unwrap();

    let patch = UpdatePokemon {
        stats: Some(BaseStats {
            defense: Some(49),
            ..Default::default()
        }),
        ..Default::default()
    };
    let updated = pokemon::update(factory, &no("0001"), &patch).await.unwrap();
    let expected = BaseStats {
        defense: Some(49),
        ..Default::default()
    };
    assert_eq!(updated.stats, expected);
    assert_eq!(fetch(factory, "0001").await.stats, expected);
}

pub async fn update_missing_is_not_found(factory: &dyn UnitOfWorkFactory) {
    let result = pokemon::update(factory, &no("0404"), &UpdatePokemon::default()).await;
    assert!(matches!(result, Err(PokedexError::PokemonNotFound(_))));
}

pub async fn delete_missing_is_not_found(factory: &dyn UnitOfWorkFactory) {
    let result = pokemon::delete(factory, &no("0404")).await;
    assert!(matches!(result, Err(PokedexError::PokemonNotFound(_))));
}

// ============================================================================
// Evolutions
// ============================================================================

pub async fn next_link_is_symmetric(factory: &dyn UnitOfWorkFactory) {
    add(factory, "0004", "Charmander").await;
    add(factory, "0005", "Charmeleon").await;

    pokemon::update(factory, &no("0004"), &set_next(&["0005"]))
        .await
        .unwrap();

    assert_eq!(next_of(&fetch(factory, "0004").await), vec!["0005"]);
    assert_eq!(previous_of(&fetch(factory, "0005").await), vec!["0004"]);
}

pub async fn evolutions_resolve_in_number_order(factory: &dyn UnitOfWorkFactory) {
    add(factory, "0136", "Flareon").await;
    add(factory, "0134", "Vaporeon").await;
    add(factory, "0135", "Jolteon").await;

    let eevee = pokemon::create(
        factory,
        &CreatePokemon::new(no("0133"), "Eevee").with_next(vec![no("0136"), no("0134"), no("0135")]),
    )
    .await
    .unwrap();

    let names: Vec<&str> = eevee.next_evolutions.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Vaporeon", "Jolteon", "Flareon"]);
    assert_eq!(previous_of(&fetch(factory, "0135").await), vec!["0133"]);
}

pub async fn clearing_previous_removes_stale_reverse_entries(factory: &dyn UnitOfWorkFactory) {
    add(factory, "0001", "Bulbasaur").await;
    add(factory, "0002", "Ivysaur").await;
    add(factory, "0003", "Venusaur").await;

    pokemon::update(factory, &no("0003"), &set_previous(&["0001"])).await.unwrap();
    assert_eq!(next_of(&fetch(factory, "0001").await), vec!["0003"]);

    // Moving the edge to another peer must unlink the old one
    pokemon::update(factory, &no("0003"), &set_previous(&["0002"])).await.unwrap();
    assert!(next_of(&fetch(factory, "0001").await).is_empty());
    assert_eq!(next_of(&fetch(factory, "0002").await), vec!["0003"]);

    pokemon::update(factory, &no("0003"), &set_previous(&[])).await.unwrap();
    assert!(next_of(&fetch(factory, "0002").await).is_empty());
    assert!(previous_of(&fetch(factory, "0003").await).is_empty());
}

pub async fn moving_next_evolution_unlinks_old_peer(factory: &dyn UnitOfWorkFactory) {
    add(factory, "0133", "Eevee").await;
    add(factory, "0134", "Vaporeon").await;
    add(factory, "0135", "Jolteon").await;

    pokemon::update(factory, &no("0133"), &set_next(&["0134"])).await.unwrap();
    assert_eq!(previous_of(&fetch(factory, "0134").await), vec!["0133"]);

    pokemon::update(factory, &no("0133"), &set_next(&["0135"])).await.unwrap();
    assert!(previous_of(&fetch(factory, "0134").await).is_empty());
    assert_eq!(previous_of(&fetch(factory, "0135").await), vec!["0133"]);
    assert_eq!(next_of(&fetch(factory, "0133").await), vec!["0135"]);

    pokemon::update(factory, &no("0133"), &set_next(&[])).await.unwrap();
    assert!(previous_of(&fetch(factory, "0135").await).is_empty());
    assert!(next_of(&fetch(factory, "0133").await).is_empty());
}

pub async fn replace_previous_is_idempotent(factory: &dyn UnitOfWorkFactory) {
    add(factory, "0007", "Squirtle").await;
    add(factory, "0008", "Wartortle").await;

    for _ in 0..2 {
        let mut uow = factory.enter().await.unwrap();
        uow.pokemon()
            .replace_previous_evolutions(&no("0008"), &[no("0007"), no("0007")])
            .await
            .unwrap();
        uow.exit(Outcome::Success).await.unwrap();
    }

    assert_eq!(previous_of(&fetch(factory, "0008").await), vec!["0007"]);
    assert_eq!(next_of(&fetch(factory, "0007").await), vec!["0008"]);
}

pub async fn replace_with_missing_peer_fails(factory: &dyn UnitOfWorkFactory) {
    add(factory, "0025", "Pikachu").await;

    let mut uow = factory.enter().await.unwrap();
    let result = uow
        .pokemon()
        .replace_next_evolutions(&no("0025"), &[no("0026")])
        .await;
    uow.exit(Outcome::Failure).await.unwrap();

    assert!(matches!(result, Err(PokedexError::PokemonNotFound(_))));
    assert!(next_of(&fetch(factory, "0025").await).is_empty());
}

pub async fn self_referencing_evolution_is_rejected(factory: &dyn UnitOfWorkFactory) {
    let data = CreatePokemon::new(no("0132"), "Ditto").with_next(vec![no("0132")]);
    let result = pokemon::create(factory, &data).await;
    assert!(matches!(result, Err(PokedexError::SelfReferencingEvolution(_))));
    assert!(pokemon::get(factory, &no("0132")).await.is_err());
}

pub async fn cyclic_chains_are_accepted(factory: &dyn UnitOfWorkFactory) {
    add(factory, "0001", "Bulbasaur").await;
    add(factory, "0002", "Ivysaur").await;

    pokemon::update(factory, &no("0001"), &set_next(&["0002"])).await.unwrap();
    pokemon::update(factory, &no("0002"), &set_next(&["0001"])).await.unwrap();

    let bulbasaur = fetch(factory, "0001").await;
    assert_eq!(next_of(&bulbasaur), vec!["0002"]);
    assert_eq!(previous_of(&bulbasaur), vec!["0002"]);
}

pub async fn delete_cascades_to_evolutions_and_teams(factory: &dyn UnitOfWorkFactory) {
    add(factory, "0001", "Bulbasaur").await;
    add(factory, "0002", "Ivysaur").await;
    add(factory, "0003", "Venusaur").await;
    pokemon::update(factory, &no("0002"), &set_previous(&["0001"])).await.unwrap();
    pokemon::update(factory, &no("0002"), &set_next(&["0003"])).await.unwrap();

    let red = add_trainer(factory, "Red").await;
    trainer::catch(factory, &red.id, &no("0002")).await.unwrap();
    trainer::catch(factory, &red.id, &no("0003")).await.unwrap();

    pokemon::delete(factory, &no("0002")).await.unwrap();

    assert!(matches!(
        pokemon::get(factory, &no("0002")).await,
        Err(PokedexError::PokemonNotFound(_))
    ));
    assert!(next_of(&fetch(factory, "0001").await).is_empty());
    assert!(previous_of(&fetch(factory, "0003").await).is_empty());

    let red = trainer::get(factory, &red.id).await.unwrap();
    assert_eq!(team_of(&red), vec!["0003"]);
}

/// Bulbasaur evolves into Ivysaur, then Ivysaur is deleted
pub async fn bulbasaur_ivysaur_scenario(factory: &dyn UnitOfWorkFactory) {
    add(factory, "0001", "Bulbasaur").await;
    add(factory, "0002", "Ivysaur").await;

    pokemon::update(factory, &no("0001"), &set_next(&["0002"])).await.unwrap();

    let bulbasaur = fetch(factory, "0001").await;
    assert_eq!(bulbasaur.next_evolutions.len(), 1);
    assert_eq!(bulbasaur.next_evolutions[0].number.as_str(), "0002");
    assert_eq!(bulbasaur.next_evolutions[0].name, "Ivysaur");

    let ivysaur = fetch(factory, "0002").await;
    assert_eq!(ivysaur.previous_evolutions.len(), 1);
    assert_eq!(ivysaur.previous_evolutions[0].number.as_str(), "0001");
    assert_eq!(ivysaur.previous_evolutions[0].name, "Bulbasaur");

    pokemon::delete(factory, &no("0002")).await.unwrap();
    assert!(fetch(factory, "0001").await.next_evolutions.is_empty());
}

// ============================================================================
// Trainers
// ============================================================================

pub async fn trainer_crud(factory: &dyn UnitOfWorkFactory) {
    let red = add_trainer(factory, "Red").await;
    assert_eq!(red.badge_count, 0);
    assert!(red.team.is_empty());
    let blue = add_trainer(factory, "Blue").await;

    let listed = trainer::list(factory).await.unwrap();
    let mut expected = vec![red.id.clone(), blue.id.clone()];
    expected.sort();
    assert_eq!(listed.iter().map(|t| t.id.clone()).collect::<Vec<_>>(), expected);

    let patch = UpdateTrainer {
        badge_count: Some(8),
        region: Some("Johto".to_string()),
        ..Default::default()
    };
    let updated = trainer::update(factory, &red.id, &patch).await.unwrap();
    assert_eq!(updated.name, "Red");
    assert_eq!(updated.region, "Johto");
    assert_eq!(updated.badge_count, 8);

    trainer::delete(factory, &red.id).await.unwrap();
    assert!(matches!(
        trainer::get(factory, &red.id).await,
        Err(PokedexError::TrainerNotFound(_))
    ));
    assert!(matches!(
        trainer::delete(factory, &red.id).await,
        Err(PokedexError::TrainerNotFound(_))
    ));
    assert_eq!(trainer::list(factory).await.unwrap().len(), 1);
}

pub async fn catch_requires_existing_trainer_and_pokemon(factory: &dyn UnitOfWorkFactory) {
    add(factory, "0025", "Pikachu").await;
    let red = add_trainer(factory, "Red").await;
    let ghost = pokedex_server::models::TrainerId::generate();

    assert!(matches!(
        trainer::catch(factory, &ghost, &no("0025")).await,
        Err(PokedexError::TrainerNotFound(_))
    ));
    assert!(matches!(
        trainer::catch(factory, &red.id, &no("0026")).await,
        Err(PokedexError::PokemonNotFound(_))
    ));
}

pub async fn seventh_catch_fails_team_full(factory: &dyn UnitOfWorkFactory) {
    let red = add_trainer(factory, "Red").await;
    for n in 1..=MAX_TEAM_SIZE + 1 {
        add(factory, &format!("{:04}", n), &format!("Mon{}", n)).await;
    }

    for n in 1..=MAX_TEAM_SIZE {
        trainer::catch(factory, &red.id, &no(&format!("{:04}", n))).await.unwrap();
    }

    let seventh = trainer::catch(factory, &red.id, &no("0007")).await;
    assert!(
        matches!(seventh, Err(PokedexError::TeamFull { .. })),
        "expected TeamFull, got: {:?}",
        seventh
    );

    // A full team reports TeamFull even for a Pokemon it already owns
    let owned = trainer::catch(factory, &red.id, &no("0001")).await;
    assert!(matches!(owned, Err(PokedexError::TeamFull { .. })));

    let red = trainer::get(factory, &red.id).await.unwrap();
    assert_eq!(red.team.len(), MAX_TEAM_SIZE);
}

pub async fn catch_owned_and_release_unowned_fail(factory: &dyn UnitOfWorkFactory) {
    add(factory, "0025", "Pikachu").await;
    add(factory, "0133", "Eevee").await;
    let red = add_trainer(factory, "Red").await;

    let caught = trainer::catch(factory, &red.id, &no("0025")).await.unwrap();
    assert_eq!(team_of(&caught), vec!["0025"]);

    assert!(matches!(
        trainer::catch(factory, &red.id, &no("0025")).await,
        Err(PokedexError::AlreadyOwnsPokemon { .. })
    ));
    assert!(matches!(
        trainer::release(factory, &red.id, &no("0133")).await,
        Err(PokedexError::DoesNotOwnPokemon { .. })
    ));

    let released = trainer::release(factory, &red.id, &no("0025")).await.unwrap();
    assert!(released.team.is_empty());
}

pub async fn same_pokemon_on_two_teams(factory: &dyn UnitOfWorkFactory) {
    add(factory, "0025", "Pikachu").await;
    let red = add_trainer(factory, "Red").await;
    let ash = add_trainer(factory, "Ash").await;

    trainer::catch(factory, &red.id, &no("0025")).await.unwrap();
    let ash = trainer::catch(factory, &ash.id, &no("0025")).await.unwrap();
    assert_eq!(team_of(&ash), vec!["0025"]);
}

pub async fn trade_swaps_ownership(factory: &dyn UnitOfWorkFactory) {
    add(factory, "0001", "Bulbasaur").await;
    add(factory, "0004", "Charmander").await;
    let x = add_trainer(factory, "X").await;
    let y = add_trainer(factory, "Y").await;
    trainer::catch(factory, &x.id, &no("0001")).await.unwrap();
    trainer::catch(factory, &y.id, &no("0004")).await.unwrap();

    let request = TradePokemon {
        trainer_id: x.id.clone(),
        pokemon_number: no("0001"),
        other_trainer_id: y.id.clone(),
        other_pokemon_number: no("0004"),
    };
    let (x_after, y_after) = trainer::trade(factory, &request).await.unwrap();
    assert_eq!(team_of(&x_after), vec!["0004"]);
    assert_eq!(team_of(&y_after), vec!["0001"]);

    // Retrying the same trade fails: X no longer owns 0001
    assert!(matches!(
        trainer::trade(factory, &request).await,
        Err(PokedexError::DoesNotOwnPokemon { .. })
    ));
}

pub async fn trade_rejects_duplicate_ownership(factory: &dyn UnitOfWorkFactory) {
    add(factory, "0001", "Bulbasaur").await;
    add(factory, "0004", "Charmander").await;
    let x = add_trainer(factory, "X").await;
    let y = add_trainer(factory, "Y").await;
    trainer::catch(factory, &x.id, &no("0001")).await.unwrap();
    trainer::catch(factory, &x.id, &no("0004")).await.unwrap();
    trainer::catch(factory, &y.id, &no("0004")).await.unwrap();

    let request = TradePokemon {
        trainer_id: x.id.clone(),
        pokemon_number: no("0001"),
        other_trainer_id: y.id.clone(),
        other_pokemon_number: no("0004"),
    };
    assert!(matches!(
        trainer::trade(factory, &request).await,
        Err(PokedexError::AlreadyOwnsPokemon { .. })
    ));

    let x = trainer::get(factory, &x.id).await.unwrap();
    assert_eq!(team_of(&x), vec!["0001", "0004"]);
}

// ============================================================================
// Unit of work
// ============================================================================

/// A create that fails on a missing evolution peer leaves nothing behind
pub async fn failed_create_rolls_back(factory: &dyn UnitOfWorkFactory) {
    let data = CreatePokemon::new(no("0025"), "Pikachu").with_next(vec![no("0026")]);
    let result = pokemon::create(factory, &data).await;
    assert!(matches!(result, Err(PokedexError::PokemonNotFound(_))));

    assert!(matches!(
        pokemon::get(factory, &no("0025")).await,
        Err(PokedexError::PokemonNotFound(_))
    ));
}

/// Without rollback, writes issued before the failure stay applied
pub async fn failed_create_keeps_partial_writes(factory: &dyn UnitOfWorkFactory) {
    let data = CreatePokemon::new(no("0025"), "Pikachu").with_next(vec![no("0026")]);
    assert!(pokemon::create(factory, &data).await.is_err());

    let orphan = fetch(factory, "0025").await;
    assert!(orphan.next_evolutions.is_empty());
}

pub async fn reset_clears_everything(factory: &dyn UnitOfWorkFactory) {
    add(factory, "0001", "Bulbasaur").await;
    add_trainer(factory, "Red").await;

    factory.reset().await.unwrap();

    assert!(pokemon::list(factory, ListParams::default()).await.unwrap().is_empty());
    assert!(trainer::list(factory).await.unwrap().is_empty());

    // Schema is usable again after the reset
    add(factory, "0001", "Bulbasaur").await;
}
