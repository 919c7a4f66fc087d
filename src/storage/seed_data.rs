//! Seed Data - a starter Pokedex
//!
//! Loads a few well-known evolution lines through the usecases, so every
//! backend receives them with the same invariants and reverse links. Entries
//! already present are skipped; seeding twice is harmless.

use tracing::{debug, info};

use super::unit_of_work::UnitOfWorkFactory;
use crate::error::{PokedexError, PokedexResult};
use crate::models::{BaseStats, CreatePokemon, PokemonNumber};
use crate::usecases;

struct Entry {
    number: &'static str,
    name: &'static str,
    types: &'static [&'static str],
    /// hp, attack, defense, sp_atk, sp_def, speed
    stats: [u32; 6],
    previous: &'static [&'static str],
}

/// Ordered so every previous evolution is seeded before the Pokemon naming it
const STARTER_POKEDEX: &[Entry] = &[
    Entry { number: "0001", name: "Bulbasaur", types: &["grass", "poison"], stats: [45, 49, 49, 65, 65, 45], previous: &[] },
    Entry { number: "0002", name: "Ivysaur", types: &["grass", "poison"], stats: [60, 62, 63, 80, 80, 60], previous: &["0001"] },
    Entry { number: "0003", name: "Venusaur", types: &["grass", "poison"], stats: [80, 82, 83, 100, 100, 80], previous: &["0002"] },
    Entry { number: "0004", name: "Charmander", types: &["fire"], stats: [39, 52, 43, 60, 50, 65], previous: &[] },
    Entry { number: "0005", name: "Charmeleon", types: &["fire"], stats: [58, 64, 58, 80, 65, 80], previous: &["0004"] },
    Entry { number: "0006", name: "Charizard", types: &["fire", "flying"], stats: [78, 84, 78, 109, 85, 100], previous: &["0005"] },
    Entry { number: "0007", name: "Squirtle", types: &["water"], stats: [44, 48, 65, 50, 64, 43], previous: &[] },
    Entry { number: "0008", name: "Wartortle", types: &["water"], stats: [59, 63, 80, 65, 80, 58], previous: &["0007"] },
    Entry { number: "0009", name: "Blastoise", types: &["water"], stats: [79, 83, 100, 85, 105, 78], previous: &["0008"] },
    Entry { number: "0025", name: "Pikachu", types: &["electric"], stats: [35, 55, 40, 50, 50, 90], previous: &[] },
    Entry { number: "0026", name: "Raichu", types: &["electric"], stats: [60, 90, 55, 90, 80, 110], previous: &["0025"] },
    Entry { number: "0133", name: "Eevee", types: &["normal"], stats: [55, 55, 50, 45, 65, 55], previous: &[] },
    Entry { number: "0134", name: "Vaporeon", types: &["water"], stats: [130, 65, 60, 110, 95, 65], previous: &["0133"] },
    Entry { number: "0135", name: "Jolteon", types: &["electric"], stats: [65, 65, 60, 110, 95, 130], previous: &["0133"] },
    Entry { number: "0136", name: "Flareon", types: &["fire"], stats: [65, 130, 60, 95, 110, 65], previous: &["0133"] },
];

fn to_create(entry: &Entry) -> PokedexResult<CreatePokemon> {
    let [hp, attack, defense, sp_atk, sp_def, speed] = entry.stats;
    let previous = entry
        .previous
        .iter()
        .map(|n| PokemonNumber::parse(n))
        .collect::<PokedexResult<Vec<_>>>()?;

    Ok(CreatePokemon::new(PokemonNumber::parse(entry.number)?, entry.name)
        .with_types(entry.types.iter().copied())
        .with_stats(BaseStats {
            hp: Some(hp),
            attack: Some(attack),
            defense: Some(defense),
            sp_atk: Some(sp_atk),
            sp_def: Some(sp_def),
            speed: Some(speed),
        })
        .with_previous(previous))
}

/// Seed the starter Pokedex; returns how many Pokemon were created
pub async fn seed_pokedex(factory: &dyn UnitOfWorkFactory) -> PokedexResult<usize> {
    let mut created = 0;

    for entry in STARTER_POKEDEX {
        let data = to_create(entry)?;
        match usecases::pokemon::create(factory, &data).await {
            Ok(_) => created += 1,
            Err(PokedexError::PokemonAlreadyExists(number)) => {
                debug!("Seed entry {} already present, skipping", number);
            }
            Err(e) => return Err(e),
        }
    }

    info!("Seeded {} Pokemon ({} in starter set)", created, STARTER_POKEDEX.len());
    Ok(created)
}

/// Size of the starter set
pub fn starter_count() -> usize {
    STARTER_POKEDEX.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::document_repo_adapter::initialize;
    use crate::storage::document_store::DocumentStore;

    #[test]
    fn test_starter_entries_are_valid() {
        for entry in STARTER_POKEDEX {
            assert!(to_create(entry).is_ok(), "bad seed entry {}", entry.number);
        }
    }

    #[tokio::test]
    async fn test_seeding_is_idempotent() {
        let store = DocumentStore::new(true);
        initialize(&store).unwrap();

        assert_eq!(seed_pokedex(&store).await.unwrap(), starter_count());
        assert_eq!(seed_pokedex(&store).await.unwrap(), 0);

        let eevee = usecases::pokemon::get(&store, &PokemonNumber::parse("0133").unwrap())
            .await
            .unwrap();
        let names: Vec<&str> = eevee.next_evolutions.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Vaporeon", "Jolteon", "Flareon"]);
    }
}
