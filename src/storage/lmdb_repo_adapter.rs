//! LMDB Repository Adapters
//!
//! Implements the repository traits on the key-value store. Nothing here is
//! relational: every link is a set maintained by hand on both sides.
//!
//! ## Key scheme
//! - `POKEMON:{no}:INFO`                hash  (no, name, stats; "" for unset stats)
//! - `POKEMON:{no}:TYPE`                set of type names
//! - `POKEMON:{no}:PREVIOUS_EVOLUTION`  set of numbers
//! - `POKEMON:{no}:NEXT_EVOLUTION`      set of numbers
//! - `TRAINER:{id}:INFO`                hash  (id, name, region, badge_count)
//! - `TRAINER:{id}:TEAM`                set of numbers
//!
//! Writes go out as pipelines, which are not transactions: a failure
//! part-way can leave a one-sided edge behind. The next replace on either
//! side repairs it.

use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::evolution::{plan_replacement, EvolutionDirection};
use super::lmdb_kv::{Hash, KeyValueConnection, LmdbKeyValueStore, Reply, Set};
use super::repository::{PokemonRepository, TrainerRepository};
use super::unit_of_work::{Outcome, UnitOfWork, UnitOfWorkFactory};
use crate::config::BackendKind;
use crate::error::{PokedexError, PokedexResult};
use crate::models::{
    BaseStats, CreatePokemon, CreateTrainer, EvolutionRef, ListParams, Pokemon, PokemonNumber,
    TeamMember, Trainer, TrainerId, TypeTag, UpdatePokemon, UpdateTrainer,
};

pub mod keys {
    use crate::models::{PokemonNumber, TrainerId};
    use crate::storage::evolution::EvolutionDirection;

    pub const POKEMON_INFO_PATTERN: &str = "POKEMON:*:INFO";
    pub const TRAINER_INFO_PATTERN: &str = "TRAINER:*:INFO";
    pub const TRAINER_TEAM_PATTERN: &str = "TRAINER:*:TEAM";

    pub fn pokemon_info(number: &str) -> String {
        format!("POKEMON:{}:INFO", number)
    }

    pub fn pokemon_types(number: &str) -> String {
        format!("POKEMON:{}:TYPE", number)
    }

    pub fn pokemon_evolutions(number: &str, direction: EvolutionDirection) -> String {
        match direction {
            EvolutionDirection::Previous => format!("POKEMON:{}:PREVIOUS_EVOLUTION", number),
            EvolutionDirection::Next => format!("POKEMON:{}:NEXT_EVOLUTION", number),
        }
    }

    /// All four keys owned by one Pokemon
    pub fn pokemon_all(number: &PokemonNumber) -> Vec<String> {
        let n = number.as_str();
        vec![
            pokemon_info(n),
            pokemon_types(n),
            pokemon_evolutions(n, EvolutionDirection::Previous),
            pokemon_evolutions(n, EvolutionDirection::Next),
        ]
    }

    pub fn trainer_info(id: &str) -> String {
        format!("TRAINER:{}:INFO", id)
    }

    pub fn trainer_team(id: &TrainerId) -> String {
        format!("TRAINER:{}:TEAM", id.as_str())
    }

    /// The `{..}` segment of `PREFIX:{..}:SUFFIX`
    pub fn middle_segment(key: &str) -> Option<&str> {
        let mut parts = key.splitn(3, ':');
        parts.next()?;
        parts.next()
    }
}

// ============================================================================
// Hash mapping
// ============================================================================

fn pokemon_info_fields(number: &PokemonNumber, name: &str, stats: Option<&BaseStats>) -> Vec<(String, String)> {
    let mut fields = vec![
        ("no".to_string(), number.as_str().to_string()),
        ("name".to_string(), name.to_string()),
    ];
    if let Some(stats) = stats {
        for (field, value) in stats.fields() {
            fields.push((field.to_string(), value.map(|v| v.to_string()).unwrap_or_default()));
        }
    }
    fields
}

fn stats_from_hash(info: &Hash) -> BaseStats {
    BaseStats::from_lookup(|field| info.get(field).and_then(|v| v.parse::<u32>().ok()))
}

fn evolution_from_hash(info: &Hash) -> Option<EvolutionRef> {
    Some(EvolutionRef {
        number: PokemonNumber::parse(info.get("no")?).ok()?,
        name: info.get("name")?.clone(),
    })
}

fn parse_numbers(members: &Set) -> Vec<PokemonNumber> {
    members
        .iter()
        .filter_map(|m| PokemonNumber::parse(m).ok())
        .collect()
}

fn strings(numbers: &[PokemonNumber]) -> Vec<String> {
    numbers.iter().map(|n| n.as_str().to_string()).collect()
}

/// Pull the next reply off a pipeline result
fn next_reply(replies: &mut std::vec::IntoIter<Reply>) -> PokedexResult<Reply> {
    replies
        .next()
        .ok_or_else(|| PokedexError::storage(BackendKind::KeyValue, "pipeline returned too few replies"))
}

/// Fetch INFO hashes for many numbers in one pipeline; missing ones are skipped
fn load_refs(conn: &KeyValueConnection, numbers: &BTreeSet<PokemonNumber>) -> PokedexResult<Vec<EvolutionRef>> {
    if numbers.is_empty() {
        return Ok(Vec::new());
    }
    let mut pipe = conn.pipeline();
    for number in numbers {
        pipe.hgetall(keys::pokemon_info(number.as_str()));
    }
    let mut refs = Vec::with_capacity(numbers.len());
    for reply in pipe.execute()? {
        if let Some(evolution) = evolution_from_hash(&reply.into_hash()?) {
            refs.push(evolution);
        }
    }
    Ok(refs)
}

// ============================================================================
// Pokemon
// ============================================================================

/// PokemonRepository over a key-value connection
pub struct LmdbPokemonRepo<'c> {
    conn: &'c KeyValueConnection,
}

impl<'c> LmdbPokemonRepo<'c> {
    pub fn new(conn: &'c KeyValueConnection) -> Self {
        Self { conn }
    }

    fn exists(&self, number: &PokemonNumber) -> PokedexResult<bool> {
        Ok(self.conn.exists(&keys::pokemon_info(number.as_str()))?)
    }

    fn ensure_exists(&self, number: &PokemonNumber) -> PokedexResult<()> {
        if !self.exists(number)? {
            return Err(PokedexError::pokemon_not_found(number));
        }
        Ok(())
    }

    /// Numbers among `numbers` without an INFO hash
    fn missing(&self, numbers: &[PokemonNumber]) -> PokedexResult<Vec<PokemonNumber>> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = self.conn.pipeline();
        for number in numbers {
            pipe.exists(keys::pokemon_info(number.as_str()));
        }
        let mut missing = Vec::new();
        for (number, reply) in numbers.iter().zip(pipe.execute()?) {
            if !reply.into_bool()? {
                missing.push(number.clone());
            }
        }
        Ok(missing)
    }

    /// Load many Pokemon with two pipelines: own keys, then peer INFO hashes
    fn load_many(&self, numbers: &[PokemonNumber]) -> PokedexResult<Vec<Pokemon>> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = self.conn.pipeline();
        for number in numbers {
            let n = number.as_str();
            pipe.hgetall(keys::pokemon_info(n))
                .smembers(keys::pokemon_types(n))
                .smembers(keys::pokemon_evolutions(n, EvolutionDirection::Previous))
                .smembers(keys::pokemon_evolutions(n, EvolutionDirection::Next));
        }
        let mut replies = pipe.execute()?.into_iter();

        let mut partial = Vec::with_capacity(numbers.len());
        let mut peers: BTreeSet<PokemonNumber> = BTreeSet::new();
        for number in numbers {
            let info = next_reply(&mut replies)?.into_hash()?;
            let types = next_reply(&mut replies)?.into_set()?;
            let previous = parse_numbers(&next_reply(&mut replies)?.into_set()?);
            let next = parse_numbers(&next_reply(&mut replies)?.into_set()?);
            if info.is_empty() {
                return Err(PokedexError::pokemon_not_found(number));
            }
            peers.extend(previous.iter().cloned());
            peers.extend(next.iter().cloned());
            partial.push((number, info, types, previous, next));
        }

        // Sets iterate in key order, so resolved peers come back sorted by number
        let resolved = load_refs(self.conn, &peers)?;
        let pick = |wanted: &[PokemonNumber]| -> Vec<EvolutionRef> {
            resolved
                .iter()
                .filter(|r| wanted.contains(&r.number))
                .cloned()
                .collect()
        };

        partial
            .into_iter()
            .map(|(number, info, types, previous, next)| {
                Ok(Pokemon {
                    number: number.clone(),
                    name: info.get("name").cloned().unwrap_or_default(),
                    stats: stats_from_hash(&info),
                    types: types.iter().map(|name| TypeTag::derived(name)).collect(),
                    previous_evolutions: pick(&previous),
                    next_evolutions: pick(&next),
                })
            })
            .collect()
    }

    fn replace_direction(
        &mut self,
        number: &PokemonNumber,
        peers: &[PokemonNumber],
        direction: EvolutionDirection,
    ) -> PokedexResult<()> {
        self.ensure_exists(number)?;
        let missing = self.missing(peers)?;
        if !missing.is_empty() {
            return Err(PokedexError::pokemon_batch_not_found(&missing));
        }

        let own_key = keys::pokemon_evolutions(number.as_str(), direction);
        let current = self.conn.smembers(&own_key)?;
        let plan = plan_replacement(current, strings(peers));

        let me = vec![number.as_str().to_string()];
        let mut pipe = self.conn.pipeline();
        for peer in &plan.unlink {
            pipe.srem(keys::pokemon_evolutions(peer, direction.reverse()), me.clone());
        }
        pipe.del(vec![own_key.clone()]);
        pipe.sadd(own_key, plan.target.clone());
        for peer in &plan.link {
            pipe.sadd(keys::pokemon_evolutions(peer, direction.reverse()), me.clone());
        }
        pipe.execute()?;

        debug!(
            "Replaced {} evolutions of {} ({} linked, {} unlinked)",
            direction.label(),
            number,
            plan.link.len(),
            plan.unlink.len()
        );
        Ok(())
    }
}

#[async_trait]
impl<'c> PokemonRepository for LmdbPokemonRepo<'c> {
    async fn get(&mut self, number: &PokemonNumber) -> PokedexResult<Pokemon> {
        self.ensure_exists(number)?;
        self.load_many(std::slice::from_ref(number))?
            .pop()
            .ok_or_else(|| PokedexError::pokemon_not_found(number))
    }

    async fn list(&mut self, params: ListParams) -> PokedexResult<Vec<Pokemon>> {
        // Full key-space scan, then fan out for the requested page only
        let mut numbers: Vec<PokemonNumber> = self
            .conn
            .scan(keys::POKEMON_INFO_PATTERN)?
            .iter()
            .filter_map(|key| keys::middle_segment(key))
            .filter_map(|n| PokemonNumber::parse(n).ok())
            .collect();
        numbers.sort();

        self.load_many(&params.slice(numbers))
    }

    async fn create(&mut self, data: &CreatePokemon) -> PokedexResult<PokemonNumber> {
        if self.exists(&data.number)? {
            return Err(PokedexError::PokemonAlreadyExists(data.number.to_string()));
        }
        let fields = pokemon_info_fields(&data.number, &data.name, Some(&data.stats));
        self.conn.hset(&keys::pokemon_info(data.number.as_str()), &fields)?;
        Ok(data.number.clone())
    }

    async fn update(&mut self, number: &PokemonNumber, patch: &UpdatePokemon) -> PokedexResult<()> {
        self.ensure_exists(number)?;

        let mut fields = Vec::new();
        if let Some(name) = &patch.name {
            fields.push(("name".to_string(), name.clone()));
        }
        if let Some(stats) = &patch.stats {
            for (field, value) in stats.fields() {
                fields.push((field.to_string(), value.map(|v| v.to_string()).unwrap_or_default()));
            }
        }
        self.conn.hset(&keys::pokemon_info(number.as_str()), &fields)?;
        Ok(())
    }

    async fn delete(&mut self, number: &PokemonNumber) -> PokedexResult<()> {
        self.ensure_exists(number)?;
        let n = number.as_str();

        let mut read = self.conn.pipeline();
        read.smembers(keys::pokemon_evolutions(n, EvolutionDirection::Previous))
            .smembers(keys::pokemon_evolutions(n, EvolutionDirection::Next));
        let mut replies = read.execute()?.into_iter();
        let previous = next_reply(&mut replies)?.into_set()?;
        let next = next_reply(&mut replies)?.into_set()?;

        let me = vec![n.to_string()];
        let mut write = self.conn.pipeline();
        for peer in &previous {
            write.srem(keys::pokemon_evolutions(peer, EvolutionDirection::Next), me.clone());
        }
        for peer in &next {
            write.srem(keys::pokemon_evolutions(peer, EvolutionDirection::Previous), me.clone());
        }
        write.del(keys::pokemon_all(number));
        write.execute()?;
        Ok(())
    }

    async fn are_all_present(&mut self, numbers: &[PokemonNumber]) -> PokedexResult<bool> {
        let unique: Vec<PokemonNumber> = numbers.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        Ok(self.missing(&unique)?.is_empty())
    }

    async fn replace_types(&mut self, number: &PokemonNumber, type_names: &[String]) -> PokedexResult<()> {
        self.ensure_exists(number)?;
        let key = keys::pokemon_types(number.as_str());

        let mut pipe = self.conn.pipeline();
        pipe.del(vec![key.clone()]);
        pipe.sadd(key, type_names.to_vec());
        pipe.execute()?;
        Ok(())
    }

    async fn replace_previous_evolutions(
        &mut self,
        number: &PokemonNumber,
        previous: &[PokemonNumber],
    ) -> PokedexResult<()> {
        self.replace_direction(number, previous, EvolutionDirection::Previous)
    }

    async fn replace_next_evolutions(&mut self, number: &PokemonNumber, next: &[PokemonNumber]) -> PokedexResult<()> {
        self.replace_direction(number, next, EvolutionDirection::Next)
    }

    async fn count(&mut self) -> PokedexResult<usize> {
        Ok(self.conn.scan(keys::POKEMON_INFO_PATTERN)?.len())
    }
}

// ============================================================================
// Trainers
// ============================================================================

/// TrainerRepository over a key-value connection
pub struct LmdbTrainerRepo<'c> {
    conn: &'c KeyValueConnection,
}

impl<'c> LmdbTrainerRepo<'c> {
    pub fn new(conn: &'c KeyValueConnection) -> Self {
        Self { conn }
    }

    fn ensure_exists(&self, id: &TrainerId) -> PokedexResult<()> {
        if !self.conn.exists(&keys::trainer_info(id.as_str()))? {
            return Err(PokedexError::trainer_not_found(id));
        }
        Ok(())
    }

    fn load(&self, id: &TrainerId) -> PokedexResult<Trainer> {
        let mut pipe = self.conn.pipeline();
        pipe.hgetall(keys::trainer_info(id.as_str()))
            .smembers(keys::trainer_team(id));
        let mut replies = pipe.execute()?.into_iter();
        let info = next_reply(&mut replies)?.into_hash()?;
        let team = next_reply(&mut replies)?.into_set()?;
        if info.is_empty() {
            return Err(PokedexError::trainer_not_found(id));
        }

        let numbers: BTreeSet<PokemonNumber> = parse_numbers(&team).into_iter().collect();
        let team = load_refs(self.conn, &numbers)?
            .into_iter()
            .map(|r| TeamMember {
                number: r.number,
                name: r.name,
            })
            .collect();

        Ok(Trainer {
            id: id.clone(),
            name: info.get("name").cloned().unwrap_or_default(),
            region: info.get("region").cloned().unwrap_or_default(),
            badge_count: info
                .get("badge_count")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            team,
        })
    }
}

#[async_trait]
impl<'c> TrainerRepository for LmdbTrainerRepo<'c> {
    async fn get(&mut self, id: &TrainerId) -> PokedexResult<Trainer> {
        self.load(id)
    }

    async fn list(&mut self) -> PokedexResult<Vec<Trainer>> {
        let mut ids: Vec<TrainerId> = self
            .conn
            .scan(keys::TRAINER_INFO_PATTERN)?
            .iter()
            .filter_map(|key| keys::middle_segment(key))
            .filter_map(|id| TrainerId::parse(id).ok())
            .collect();
        ids.sort();

        ids.iter().map(|id| self.load(id)).collect()
    }

    async fn create(&mut self, data: &CreateTrainer) -> PokedexResult<TrainerId> {
        let id = TrainerId::generate();
        let fields = vec![
            ("id".to_string(), id.as_str().to_string()),
            ("name".to_string(), data.name.clone()),
            ("region".to_string(), data.region.clone()),
            ("badge_count".to_string(), data.badge_count.to_string()),
        ];
        self.conn.hset(&keys::trainer_info(id.as_str()), &fields)?;
        Ok(id)
    }

    async fn update(&mut self, id: &TrainerId, patch: &UpdateTrainer) -> PokedexResult<()> {
        self.ensure_exists(id)?;

        let mut fields = Vec::new();
        if let Some(name) = &patch.name {
            fields.push(("name".to_string(), name.clone()));
        }
        if let Some(region) = &patch.region {
            fields.push(("region".to_string(), region.clone()));
        }
        if let Some(badge_count) = patch.badge_count {
            fields.push(("badge_count".to_string(), badge_count.to_string()));
        }
        self.conn.hset(&keys::trainer_info(id.as_str()), &fields)?;
        Ok(())
    }

    async fn delete(&mut self, id: &TrainerId) -> PokedexResult<()> {
        self.ensure_exists(id)?;
        self.conn
            .del(&[keys::trainer_info(id.as_str()), keys::trainer_team(id)])?;
        Ok(())
    }

    async fn add_to_team(&mut self, id: &TrainerId, number: &PokemonNumber) -> PokedexResult<()> {
        self.ensure_exists(id)?;
        if !self.conn.exists(&keys::pokemon_info(number.as_str()))? {
            return Err(PokedexError::pokemon_not_found(number));
        }
        self.conn
            .sadd(&keys::trainer_team(id), &[number.as_str().to_string()])?;
        Ok(())
    }

    async fn remove_from_team(&mut self, id: &TrainerId, number: &PokemonNumber) -> PokedexResult<()> {
        self.ensure_exists(id)?;
        self.conn
            .srem(&keys::trainer_team(id), &[number.as_str().to_string()])?;
        Ok(())
    }

    async fn remove_pokemon_from_all_teams(&mut self, number: &PokemonNumber) -> PokedexResult<()> {
        let teams = self.conn.scan(keys::TRAINER_TEAM_PATTERN)?;
        if teams.is_empty() {
            return Ok(());
        }
        let me = vec![number.as_str().to_string()];
        let mut pipe = self.conn.pipeline();
        for team in teams {
            pipe.srem(team, me.clone());
        }
        pipe.execute()?;
        Ok(())
    }

    async fn count(&mut self) -> PokedexResult<usize> {
        Ok(self.conn.scan(keys::TRAINER_INFO_PATTERN)?.len())
    }
}

// ============================================================================
// Unit of work
// ============================================================================

/// Holds a connection for the duration of one operation. There is nothing to
/// commit or roll back; writes are already applied when `exit` runs.
pub struct LmdbUnitOfWork {
    conn: KeyValueConnection,
}

#[async_trait]
impl UnitOfWork for LmdbUnitOfWork {
    fn backend(&self) -> BackendKind {
        BackendKind::KeyValue
    }

    fn pokemon(&mut self) -> Box<dyn PokemonRepository + '_> {
        Box::new(LmdbPokemonRepo::new(&self.conn))
    }

    fn trainers(&mut self) -> Box<dyn TrainerRepository + '_> {
        Box::new(LmdbTrainerRepo::new(&self.conn))
    }

    async fn exit(self: Box<Self>, outcome: Outcome) -> PokedexResult<()> {
        if outcome == Outcome::Failure {
            warn!("Key-value unit of work failed; applied writes cannot be rolled back");
        }
        self.conn.close();
        Ok(())
    }
}

#[async_trait]
impl UnitOfWorkFactory for LmdbKeyValueStore {
    fn backend(&self) -> BackendKind {
        BackendKind::KeyValue
    }

    async fn enter(&self) -> PokedexResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(LmdbUnitOfWork { conn: self.connect() }))
    }

    async fn reset(&self) -> PokedexResult<()> {
        let keys = self.dbsize()?;
        self.flush_all()?;
        info!("Key-value store flushed ({} keys)", keys);
        Ok(())
    }
}
