//! Document Repository Adapters
//!
//! Pokemon documents carry their types as a name array and their evolution
//! links as arrays of `_id` references in both directions:
//!
//! ```text
//! { _id, no, name, stats, types: [..],
//!   previous_evolution_refs: [_id..], next_evolution_refs: [_id..] }
//! ```
//!
//! Reads resolve the reference arrays with a lookup / unwind / sort / group
//! pipeline per direction. Writes keep both arrays in step by hand. Trainer
//! documents store their team as an array of Pokedex numbers.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::document_pipeline::{Accumulator, Stage};
use super::document_store::{
    DocumentError, DocumentSession, DocumentStore, Document, Filter, ObjectId, Update, ID_FIELD,
};
use super::evolution::{plan_replacement, EvolutionDirection};
use super::repository::{PokemonRepository, TrainerRepository};
use super::unit_of_work::{Outcome, UnitOfWork, UnitOfWorkFactory};
use crate::config::BackendKind;
use crate::error::{PokedexError, PokedexResult};
use crate::models::{
    BaseStats, CreatePokemon, CreateTrainer, EvolutionRef, ListParams, Pokemon, PokemonNumber,
    TeamMember, Trainer, TrainerId, TypeTag, UpdatePokemon, UpdateTrainer,
};

pub const POKEMON_COLLECTION: &str = "pokemon";
pub const TRAINER_COLLECTION: &str = "trainer";

const PREVIOUS_REFS: &str = "previous_evolution_refs";
const NEXT_REFS: &str = "next_evolution_refs";
const PREVIOUS_DETAILS: &str = "previous_evolution_details";
const NEXT_DETAILS: &str = "next_evolution_details";
const TEAM_DETAILS: &str = "team_details";

fn refs_field(direction: EvolutionDirection) -> &'static str {
    match direction {
        EvolutionDirection::Previous => PREVIOUS_REFS,
        EvolutionDirection::Next => NEXT_REFS,
    }
}

/// Create the unique indexes the backend relies on
pub fn initialize(store: &DocumentStore) -> Result<(), DocumentError> {
    store.create_unique_index(POKEMON_COLLECTION, "no")?;
    store.create_unique_index(TRAINER_COLLECTION, "id")?;
    Ok(())
}

// ============================================================================
// Pipelines
// ============================================================================

fn first(field: &str) -> (String, Accumulator) {
    (field.to_string(), Accumulator::First(field.to_string()))
}

/// lookup + unwind + sort + group for one evolution direction, carrying
/// every other field through `First`
fn resolve_direction(refs: &str, details: &str, carried: &[&str]) -> Vec<Stage> {
    let mut accumulators: Vec<(String, Accumulator)> = carried.iter().map(|f| first(f)).collect();
    accumulators.push((details.to_string(), Accumulator::Push(details.to_string())));

    vec![
        Stage::lookup(POKEMON_COLLECTION, refs, ID_FIELD, details),
        Stage::unwind_preserving(details),
        Stage::sort_by(&format!("{}.no", details)),
        Stage::Group {
            key: ID_FIELD.to_string(),
            accumulators,
        },
    ]
}

fn pokemon_pipeline(filter: Filter) -> Vec<Stage> {
    let mut stages = vec![Stage::Match(filter)];
    stages.extend(resolve_direction(
        PREVIOUS_REFS,
        PREVIOUS_DETAILS,
        &["no", "name", "stats", "types", NEXT_REFS],
    ));
    stages.extend(resolve_direction(
        NEXT_REFS,
        NEXT_DETAILS,
        &["no", "name", "stats", "types", PREVIOUS_DETAILS],
    ));
    stages.push(Stage::sort_by("no"));
    stages
}

fn trainer_pipeline(filter: Filter) -> Vec<Stage> {
    vec![
        Stage::Match(filter),
        Stage::lookup(POKEMON_COLLECTION, "team", "no", TEAM_DETAILS),
        Stage::sort_by("id"),
    ]
}

// ============================================================================
// Document mapping
// ============================================================================

fn malformed(reason: impl Into<String>) -> PokedexError {
    DocumentError::Malformed {
        collection: POKEMON_COLLECTION.to_string(),
        reason: reason.into(),
    }
    .into()
}

fn str_field<'a>(doc: &'a Document, field: &str) -> PokedexResult<&'a str> {
    doc.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(format!("missing string field {}", field)))
}

fn badge_count(doc: &Document) -> PokedexResult<u32> {
    match doc.get("badge_count") {
        None | Some(Value::Null) => Ok(0),
        Some(value) => value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| malformed(format!("badge_count out of range: {}", value))),
    }
}

fn evolution_refs(doc: &Document, field: &str) -> PokedexResult<Vec<EvolutionRef>> {
    let Some(Value::Array(items)) = doc.get(field) else {
        return Ok(Vec::new());
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|linked| {
            Ok(EvolutionRef {
                number: PokemonNumber::parse(str_field(linked, "no")?)?,
                name: str_field(linked, "name")?.to_string(),
            })
        })
        .collect()
}

fn doc_to_pokemon(doc: &Document) -> PokedexResult<Pokemon> {
    let stats: BaseStats = match doc.get("stats") {
        Some(value) if !value.is_null() => serde_json::from_value(value.clone())
            .map_err(|e| malformed(format!("bad stats: {}", e)))?,
        _ => BaseStats::default(),
    };

    let mut types: Vec<TypeTag> = doc
        .get("types")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).map(TypeTag::derived).collect())
        .unwrap_or_default();
    types.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Pokemon {
        number: PokemonNumber::parse(str_field(doc, "no")?)?,
        name: str_field(doc, "name")?.to_string(),
        stats,
        types,
        previous_evolutions: evolution_refs(doc, PREVIOUS_DETAILS)?,
        next_evolutions: evolution_refs(doc, NEXT_DETAILS)?,
    })
}

fn doc_to_trainer(doc: &Document) -> PokedexResult<Trainer> {
    let mut team: Vec<TeamMember> = evolution_refs(doc, TEAM_DETAILS)?
        .into_iter()
        .map(|r| TeamMember {
            number: r.number,
            name: r.name,
        })
        .collect();
    team.sort_by(|a, b| a.number.cmp(&b.number));

    Ok(Trainer {
        id: TrainerId::parse(str_field(doc, "id")?)?,
        name: str_field(doc, "name")?.to_string(),
        region: str_field(doc, "region")?.to_string(),
        badge_count: badge_count(doc)?,
        team,
    })
}

fn number_values(numbers: &[PokemonNumber]) -> Vec<Value> {
    numbers.iter().map(|n| Value::from(n.as_str())).collect()
}

// ============================================================================
// Pokemon
// ============================================================================

/// PokemonRepository over a borrowed document session
pub struct DocumentPokemonRepo<'s> {
    session: &'s mut DocumentSession,
}

impl<'s> DocumentPokemonRepo<'s> {
    pub fn new(session: &'s mut DocumentSession) -> Self {
        Self { session }
    }

    fn by_number(number: &PokemonNumber) -> Filter {
        Filter::eq("no", number.as_str())
    }

    /// Map numbers to `_id`s in one query; the target must resolve and so must every peer
    fn resolve_ids(
        &self,
        number: &PokemonNumber,
        peers: &[PokemonNumber],
    ) -> PokedexResult<(Document, Vec<ObjectId>)> {
        let mut wanted = number_values(peers);
        wanted.push(Value::from(number.as_str()));
        let found = self.session.find(POKEMON_COLLECTION, &Filter::In("no".to_string(), wanted));

        let target = found
            .iter()
            .find(|d| d.get("no").and_then(Value::as_str) == Some(number.as_str()))
            .cloned()
            .ok_or_else(|| PokedexError::pokemon_not_found(number))?;

        let mut ids = Vec::with_capacity(peers.len());
        let mut missing = Vec::new();
        for peer in peers {
            let id = found
                .iter()
                .find(|d| d.get("no").and_then(Value::as_str) == Some(peer.as_str()))
                .and_then(|d| d.get(ID_FIELD))
                .and_then(ObjectId::from_value);
            match id {
                Some(id) => ids.push(id),
                None => missing.push(peer),
            }
        }
        if !missing.is_empty() {
            return Err(PokedexError::pokemon_batch_not_found(missing));
        }
        Ok((target, ids))
    }

    /// Overwrite one direction on the target and mirror it on every peer
    fn replace_direction(
        &mut self,
        number: &PokemonNumber,
        peers: &[PokemonNumber],
        direction: EvolutionDirection,
    ) -> PokedexResult<()> {
        let (target, peer_ids) = self.resolve_ids(number, peers)?;
        let target_id = target
            .get(ID_FIELD)
            .and_then(ObjectId::from_value)
            .ok_or_else(|| malformed("document without _id"))?;

        let own_field = refs_field(direction);
        let mirror_field = refs_field(direction.reverse());

        let current: Vec<ObjectId> = target
            .get(own_field)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(ObjectId::from_value).collect())
            .unwrap_or_default();
        let plan = plan_replacement(current, peer_ids);

        // Target first, then peers
        let target_refs: Vec<Value> = plan.target.iter().cloned().map(Value::from).collect();
        self.session.update_one(
            POKEMON_COLLECTION,
            &Filter::by_id(&target_id),
            &[Update::set(own_field, Value::Array(target_refs))],
        )?;

        if !plan.unlink.is_empty() {
            self.session.update_many(
                POKEMON_COLLECTION,
                &Filter::any_of(ID_FIELD, plan.unlink.iter().cloned()),
                &[Update::pull(mirror_field, target_id.clone())],
            )?;
        }
        if !plan.link.is_empty() {
            self.session.update_many(
                POKEMON_COLLECTION,
                &Filter::any_of(ID_FIELD, plan.link.iter().cloned()),
                &[Update::add_to_set(mirror_field, target_id.clone())],
            )?;
        }

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
impl<'s> PokemonRepository for DocumentPokemonRepo<'s> {
    async fn get(&mut self, number: &PokemonNumber) -> PokedexResult<Pokemon> {
        let docs = self
            .session
            .aggregate(POKEMON_COLLECTION, &pokemon_pipeline(Self::by_number(number)));
        match docs.first() {
            Some(doc) => doc_to_pokemon(doc),
            None => Err(PokedexError::pokemon_not_found(number)),
        }
    }

    async fn list(&mut self, params: ListParams) -> PokedexResult<Vec<Pokemon>> {
        let mut stages = pokemon_pipeline(Filter::All);
        stages.push(Stage::Skip(params.offset()));
        stages.push(Stage::Limit(params.limit()));

        self.session
            .aggregate(POKEMON_COLLECTION, &stages)
            .iter()
            .map(doc_to_pokemon)
            .collect()
    }

    async fn create(&mut self, data: &CreatePokemon) -> PokedexResult<PokemonNumber> {
        if self.session.count_documents(POKEMON_COLLECTION, &Self::by_number(&data.number)) > 0 {
            return Err(PokedexError::PokemonAlreadyExists(data.number.to_string()));
        }

        let doc = json!({
            "no": data.number.as_str(),
            "name": data.name,
            "stats": data.stats,
            "types": [],
            PREVIOUS_REFS: [],
            NEXT_REFS: [],
        });
        let Value::Object(doc) = doc else {
            return Err(malformed("pokemon document is not an object"));
        };

        match self.session.insert_one(POKEMON_COLLECTION, doc) {
            Ok(_) => Ok(data.number.clone()),
            Err(DocumentError::DuplicateKey { .. }) => {
                Err(PokedexError::PokemonAlreadyExists(data.number.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn update(&mut self, number: &PokemonNumber, patch: &UpdatePokemon) -> PokedexResult<()> {
        let filter = Self::by_number(number);
        let mut updates = Vec::new();
        if let Some(name) = &patch.name {
            updates.push(Update::set("name", name.as_str()));
        }
        if let Some(stats) = &patch.stats {
            let stats = serde_json::to_value(stats).map_err(|e| malformed(e.to_string()))?;
            updates.push(Update::Set("stats".to_string(), stats));
        }

        let matched = if updates.is_empty() {
            self.session.count_documents(POKEMON_COLLECTION, &filter)
        } else {
            self.session.update_one(POKEMON_COLLECTION, &filter, &updates)?.matched
        };
        if matched == 0 {
            return Err(PokedexError::pokemon_not_found(number));
        }
        Ok(())
    }

    async fn delete(&mut self, number: &PokemonNumber) -> PokedexResult<()> {
        let target = self
            .session
            .find_one(POKEMON_COLLECTION, &Self::by_number(number))
            .ok_or_else(|| PokedexError::pokemon_not_found(number))?;
        let id = target
            .get(ID_FIELD)
            .and_then(ObjectId::from_value)
            .ok_or_else(|| malformed("document without _id"))?;

        self.session.delete_one(POKEMON_COLLECTION, &Filter::by_id(&id))?;

        // No foreign keys: strip the reference out of every peer in both directions
        for field in [PREVIOUS_REFS, NEXT_REFS] {
            self.session.update_many(
                POKEMON_COLLECTION,
                &Filter::eq(field, id.clone()),
                &[Update::pull(field, id.clone())],
            )?;
        }
        Ok(())
    }

    async fn are_all_present(&mut self, numbers: &[PokemonNumber]) -> PokedexResult<bool> {
        let mut unique: Vec<&PokemonNumber> = numbers.iter().collect();
        unique.sort();
        unique.dedup();
        if unique.is_empty() {
            return Ok(true);
        }
        let found = self.session.count_documents(
            POKEMON_COLLECTION,
            &Filter::any_of("no", unique.iter().map(|n| n.as_str())),
        );
        Ok(found == unique.len())
    }

    async fn replace_types(&mut self, number: &PokemonNumber, type_names: &[String]) -> PokedexResult<()> {
        let mut names: Vec<&str> = type_names.iter().map(String::as_str).collect();
        names.sort();
        names.dedup();

        let result = self.session.update_one(
            POKEMON_COLLECTION,
            &Self::by_number(number),
            &[Update::set("types", json!(names))],
        )?;
        if result.matched == 0 {
            return Err(PokedexError::pokemon_not_found(number));
        }
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
        Ok(self.session.count_documents(POKEMON_COLLECTION, &Filter::All))
    }
}

// ============================================================================
// Trainers
// ============================================================================

/// TrainerRepository over a borrowed document session
pub struct DocumentTrainerRepo<'s> {
    session: &'s mut DocumentSession,
}

impl<'s> DocumentTrainerRepo<'s> {
    pub fn new(session: &'s mut DocumentSession) -> Self {
        Self { session }
    }

    fn by_id(id: &TrainerId) -> Filter {
        Filter::eq("id", id.as_str())
    }

    fn ensure_trainer(&self, id: &TrainerId) -> PokedexResult<()> {
        if self.session.count_documents(TRAINER_COLLECTION, &Self::by_id(id)) == 0 {
            return Err(PokedexError::trainer_not_found(id));
        }
        Ok(())
    }

    fn team_update(&mut self, id: &TrainerId, update: Update) -> PokedexResult<()> {
        let result = self.session.update_one(TRAINER_COLLECTION, &Self::by_id(id), &[update])?;
        if result.matched == 0 {
            return Err(PokedexError::trainer_not_found(id));
        }
        Ok(())
    }
}

#[async_trait]
impl<'s> TrainerRepository for DocumentTrainerRepo<'s> {
    async fn get(&mut self, id: &TrainerId) -> PokedexResult<Trainer> {
        let docs = self
            .session
            .aggregate(TRAINER_COLLECTION, &trainer_pipeline(Self::by_id(id)));
        match docs.first() {
            Some(doc) => doc_to_trainer(doc),
            None => Err(PokedexError::trainer_not_found(id)),
        }
    }

    async fn list(&mut self) -> PokedexResult<Vec<Trainer>> {
        self.session
            .aggregate(TRAINER_COLLECTION, &trainer_pipeline(Filter::All))
            .iter()
            .map(doc_to_trainer)
            .collect()
    }

    async fn create(&mut self, data: &CreateTrainer) -> PokedexResult<TrainerId> {
        let id = TrainerId::generate();
        let doc = json!({
            "id": id.as_str(),
            "name": data.name,
            "region": data.region,
            "badge_count": data.badge_count,
            "team": [],
        });
        let Value::Object(doc) = doc else {
            return Err(malformed("trainer document is not an object"));
        };
        self.session.insert_one(TRAINER_COLLECTION, doc)?;
        Ok(id)
    }

    async fn update(&mut self, id: &TrainerId, patch: &UpdateTrainer) -> PokedexResult<()> {
        let mut updates = Vec::new();
        if let Some(name) = &patch.name {
            updates.push(Update::set("name", name.as_str()));
        }
        if let Some(region) = &patch.region {
            updates.push(Update::set("region", region.as_str()));
        }
        if let Some(badge_count) = patch.badge_count {
            updates.push(Update::set("badge_count", badge_count));
        }
        if updates.is_empty() {
            return self.ensure_trainer(id);
        }

        let result = self.session.update_one(TRAINER_COLLECTION, &Self::by_id(id), &updates)?;
        if result.matched == 0 {
            return Err(PokedexError::trainer_not_found(id));
        }
        Ok(())
    }

    async fn delete(&mut self, id: &TrainerId) -> PokedexResult<()> {
        if self.session.delete_one(TRAINER_COLLECTION, &Self::by_id(id))? == 0 {
            return Err(PokedexError::trainer_not_found(id));
        }
        Ok(())
    }

    async fn add_to_team(&mut self, id: &TrainerId, number: &PokemonNumber) -> PokedexResult<()> {
        self.ensure_trainer(id)?;
        if self
            .session
            .count_documents(POKEMON_COLLECTION, &Filter::eq("no", number.as_str()))
            == 0
        {
            return Err(PokedexError::pokemon_not_found(number));
        }
        self.team_update(id, Update::add_to_set("team", number.as_str()))
    }

    async fn remove_from_team(&mut self, id: &TrainerId, number: &PokemonNumber) -> PokedexResult<()> {
        self.team_update(id, Update::pull("team", number.as_str()))
    }

    async fn remove_pokemon_from_all_teams(&mut self, number: &PokemonNumber) -> PokedexResult<()> {
        self.session.update_many(
            TRAINER_COLLECTION,
            &Filter::eq("team", number.as_str()),
            &[Update::pull("team", number.as_str())],
        )?;
        Ok(())
    }

    async fn count(&mut self) -> PokedexResult<usize> {
        Ok(self.session.count_documents(TRAINER_COLLECTION, &Filter::All))
    }
}

// ============================================================================
// Unit of work
// ============================================================================

/// One document session, transactional when the store allows it
pub struct DocumentUnitOfWork {
    session: DocumentSession,
}

#[async_trait]
impl UnitOfWork for DocumentUnitOfWork {
    fn backend(&self) -> BackendKind {
        BackendKind::Document
    }

    fn pokemon(&mut self) -> Box<dyn PokemonRepository + '_> {
        Box::new(DocumentPokemonRepo::new(&mut self.session))
    }

    fn trainers(&mut self) -> Box<dyn TrainerRepository + '_> {
        Box::new(DocumentTrainerRepo::new(&mut self.session))
    }

    async fn exit(self: Box<Self>, outcome: Outcome) -> PokedexResult<()> {
        match outcome {
            Outcome::Success => self.session.commit()?,
            Outcome::Failure => self.session.abort(),
        }
        Ok(())
    }
}

#[async_trait]
impl UnitOfWorkFactory for DocumentStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Document
    }

    async fn enter(&self) -> PokedexResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(DocumentUnitOfWork {
            session: self.start_session(),
        }))
    }

    async fn reset(&self) -> PokedexResult<()> {
        self.clear();
        initialize(self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_badge_count_out_of_range_is_malformed() {
        assert_eq!(badge_count(&doc(json!({ "badge_count": 8 }))).unwrap(), 8);
        assert_eq!(badge_count(&doc(json!({}))).unwrap(), 0);
        assert!(badge_count(&doc(json!({ "badge_count": 1u64 << 40 }))).is_err());
        assert!(badge_count(&doc(json!({ "badge_count": -1 }))).is_err());
    }
}
