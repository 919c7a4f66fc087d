//! SQLite Repository Adapters
//!
//! Implements the repository traits on top of a connection borrowed from the
//! unit of work's transaction. Lists use the select-in pattern: one query for
//! the page, then one `IN (...)` query per relation.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::{BTreeSet, HashMap};

use super::repository::{PokemonRepository, TrainerRepository};
use super::sqlite::{EvolutionRow, PokemonRow, PokemonTypeRow, TeamRow, TrainerRow};
use crate::config::BackendKind;
use crate::error::{PokedexError, PokedexResult};
use crate::models::{
    BaseStats, CreatePokemon, CreateTrainer, EvolutionRef, ListParams, Pokemon, PokemonNumber,
    TeamMember, Trainer, TrainerId, TypeTag, UpdatePokemon, UpdateTrainer,
};

const POKEMON_COLUMNS: &str = "no, name, hp, attack, defense, sp_atk, sp_def, speed";

// ============================================================================
// Row mapping
// ============================================================================

fn row_to_pokemon(
    row: PokemonRow,
    types: Vec<TypeTag>,
    previous_evolutions: Vec<EvolutionRef>,
    next_evolutions: Vec<EvolutionRef>,
) -> PokedexResult<Pokemon> {
    Ok(Pokemon {
        number: PokemonNumber::parse(&row.no)?,
        name: row.name,
        stats: BaseStats {
            hp: column_u32("hp", row.hp)?,
            attack: column_u32("attack", row.attack)?,
            defense: column_u32("defense", row.defense)?,
            sp_atk: column_u32("sp_atk", row.sp_atk)?,
            sp_def: column_u32("sp_def", row.sp_def)?,
            speed: column_u32("speed", row.speed)?,
        },
        types,
        previous_evolutions,
        next_evolutions,
    })
}

fn to_u32(column: &str, value: i64) -> PokedexResult<u32> {
    u32::try_from(value).map_err(|_| {
        PokedexError::storage(
            BackendKind::Relational,
            format!("column {} out of range: {}", column, value),
        )
    })
}

fn column_u32(column: &str, value: Option<i64>) -> PokedexResult<Option<u32>> {
    value.map(|v| to_u32(column, v)).transpose()
}

fn row_to_evolution(row: &EvolutionRow) -> PokedexResult<EvolutionRef> {
    Ok(EvolutionRef {
        number: PokemonNumber::parse(&row.no)?,
        name: row.name.clone(),
    })
}

fn row_to_trainer(row: TrainerRow, team: Vec<TeamMember>) -> PokedexResult<Trainer> {
    Ok(Trainer {
        id: TrainerId::parse(&row.id)?,
        name: row.name,
        region: row.region,
        badge_count: to_u32("badge_count", row.badge_count)?,
        team,
    })
}

/// `<prefix>(?, ?, ...)<suffix>` with one bind per value
fn in_list<'a>(prefix: &str, values: &'a [String], suffix: &str) -> QueryBuilder<'a, Sqlite> {
    let mut qb = QueryBuilder::new(prefix);
    qb.push("(");
    let mut separated = qb.separated(", ");
    for value in values {
        separated.push_bind(value.as_str());
    }
    separated.push_unseparated(")");
    qb.push(suffix);
    qb
}

fn dedupe(numbers: &[PokemonNumber]) -> Vec<String> {
    numbers
        .iter()
        .map(|n| n.as_str().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn classify_db_error(err: sqlx::Error, number: &PokemonNumber) -> PokedexError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return PokedexError::PokemonAlreadyExists(number.to_string());
        }
        if db.is_check_violation() {
            return PokedexError::SelfReferencingEvolution(number.to_string());
        }
    }
    err.into()
}

/// Numbers among `numbers` with no `pokemon` row
async fn missing_pokemon(conn: &mut SqliteConnection, numbers: &[String]) -> PokedexResult<Vec<String>> {
    if numbers.is_empty() {
        return Ok(Vec::new());
    }
    let found: Vec<String> = in_list("SELECT no FROM pokemon WHERE no IN ", numbers, "")
        .build_query_scalar()
        .fetch_all(&mut *conn)
        .await?;
    let found: BTreeSet<String> = found.into_iter().collect();
    Ok(numbers.iter().filter(|n| !found.contains(*n)).cloned().collect())
}

async fn pokemon_exists(conn: &mut SqliteConnection, number: &PokemonNumber) -> PokedexResult<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pokemon WHERE no = ?")
        .bind(number.as_str())
        .fetch_one(&mut *conn)
        .await?;
    Ok(count > 0)
}

async fn trainer_exists(conn: &mut SqliteConnection, id: &TrainerId) -> PokedexResult<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trainer WHERE id = ?")
        .bind(id.as_str())
        .fetch_one(&mut *conn)
        .await?;
    Ok(count > 0)
}

// ============================================================================
// Pokemon
// ============================================================================

/// PokemonRepository over a borrowed SQLite connection
pub struct SqlitePokemonRepo<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SqlitePokemonRepo<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Attach types and evolutions to a batch of base rows
    async fn hydrate(&mut self, rows: Vec<PokemonRow>) -> PokedexResult<Vec<Pokemon>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let numbers: Vec<String> = rows.iter().map(|r| r.no.clone()).collect();

        let type_rows: Vec<PokemonTypeRow> = in_list(
            "SELECT pt.pokemon_no, t.id, t.name FROM pokemon_type pt \
             JOIN type_tag t ON t.id = pt.type_id WHERE pt.pokemon_no IN ",
            &numbers,
            " ORDER BY t.name",
        )
        .build_query_as()
        .fetch_all(&mut *self.conn)
        .await?;

        let previous_rows: Vec<EvolutionRow> = in_list(
            "SELECT e.next_no AS owner_no, p.no, p.name FROM pokemon_evolution e \
             JOIN pokemon p ON p.no = e.previous_no WHERE e.next_no IN ",
            &numbers,
            " ORDER BY p.no",
        )
        .build_query_as()
        .fetch_all(&mut *self.conn)
        .await?;

        let next_rows: Vec<EvolutionRow> = in_list(
            "SELECT e.previous_no AS owner_no, p.no, p.name FROM pokemon_evolution e \
             JOIN pokemon p ON p.no = e.next_no WHERE e.previous_no IN ",
            &numbers,
            " ORDER BY p.no",
        )
        .build_query_as()
        .fetch_all(&mut *self.conn)
        .await?;

        let mut types: HashMap<String, Vec<TypeTag>> = HashMap::new();
        for row in type_rows {
            types.entry(row.pokemon_no).or_default().push(TypeTag {
                id: row.id,
                name: row.name,
            });
        }
        let mut previous: HashMap<String, Vec<EvolutionRef>> = HashMap::new();
        for row in &previous_rows {
            previous.entry(row.owner_no.clone()).or_default().push(row_to_evolution(row)?);
        }
        let mut next: HashMap<String, Vec<EvolutionRef>> = HashMap::new();
        for row in &next_rows {
            next.entry(row.owner_no.clone()).or_default().push(row_to_evolution(row)?);
        }

        rows.into_iter()
            .map(|row| {
                let types = types.remove(&row.no).unwrap_or_default();
                let prev = previous.remove(&row.no).unwrap_or_default();
                let nxt = next.remove(&row.no).unwrap_or_default();
                row_to_pokemon(row, types, prev, nxt)
            })
            .collect()
    }

    /// Target must exist and so must every peer
    async fn ensure_edge_endpoints(&mut self, number: &PokemonNumber, peers: &[String]) -> PokedexResult<()> {
        if !pokemon_exists(self.conn, number).await? {
            return Err(PokedexError::pokemon_not_found(number));
        }
        let missing = missing_pokemon(self.conn, peers).await?;
        if !missing.is_empty() {
            return Err(PokedexError::PokemonNotFound(missing.join(", ")));
        }
        Ok(())
    }

    /// Insert `(previous_no, next_no)` edges in one statement
    async fn insert_edges(&mut self, number: &PokemonNumber, edges: Vec<(String, String)>) -> PokedexResult<()> {
        if edges.is_empty() {
            return Ok(());
        }
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO pokemon_evolution (id, previous_no, next_no) ");
        qb.push_values(edges, |mut b, (previous_no, next_no)| {
            b.push_bind(uuid::Uuid::new_v4().simple().to_string())
                .push_bind(previous_no)
                .push_bind(next_no);
        });
        qb.build()
            .execute(&mut *self.conn)
            .await
            .map_err(|e| classify_db_error(e, number))?;
        Ok(())
    }
}

#[async_trait]
impl<'c> PokemonRepository for SqlitePokemonRepo<'c> {
    async fn get(&mut self, number: &PokemonNumber) -> PokedexResult<Pokemon> {
        let row = sqlx::query_as::<_, PokemonRow>(&format!(
            "SELECT {} FROM pokemon WHERE no = ?",
            POKEMON_COLUMNS
        ))
        .bind(number.as_str())
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or_else(|| PokedexError::pokemon_not_found(number))?;

        self.hydrate(vec![row])
            .await?
            .pop()
            .ok_or_else(|| PokedexError::pokemon_not_found(number))
    }

    async fn list(&mut self, params: ListParams) -> PokedexResult<Vec<Pokemon>> {
        let rows = sqlx::query_as::<_, PokemonRow>(&format!(
            "SELECT {} FROM pokemon ORDER BY no LIMIT ? OFFSET ?",
            POKEMON_COLUMNS
        ))
        .bind(i64::try_from(params.limit()).unwrap_or(i64::MAX))
        .bind(i64::try_from(params.offset()).unwrap_or(i64::MAX))
        .fetch_all(&mut *self.conn)
        .await?;

        self.hydrate(rows).await
    }

    async fn create(&mut self, data: &CreatePokemon) -> PokedexResult<PokemonNumber> {
        if pokemon_exists(self.conn, &data.number).await? {
            return Err(PokedexError::PokemonAlreadyExists(data.number.to_string()));
        }

        let stats = data.stats;
        sqlx::query(
            "INSERT INTO pokemon (no, name, hp, attack, defense, sp_atk, sp_def, speed)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(data.number.as_str())
        .bind(&data.name)
        .bind(stats.hp.map(i64::from))
        .bind(stats.attack.map(i64::from))
        .bind(stats.defense.map(i64::from))
        .bind(stats.sp_atk.map(i64::from))
        .bind(stats.sp_def.map(i64::from))
        .bind(stats.speed.map(i64::from))
        .execute(&mut *self.conn)
        .await
        .map_err(|e| classify_db_error(e, &data.number))?;

        Ok(data.number.clone())
    }

    async fn update(&mut self, number: &PokemonNumber, patch: &UpdatePokemon) -> PokedexResult<()> {
        if patch.name.is_none() && patch.stats.is_none() {
            if !pokemon_exists(self.conn, number).await? {
                return Err(PokedexError::pokemon_not_found(number));
            }
            return Ok(());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE pokemon SET ");
        let mut assignments = qb.separated(", ");
        if let Some(name) = &patch.name {
            assignments.push("name = ").push_bind_unseparated(name.clone());
        }
        if let Some(stats) = &patch.stats {
            for (column, value) in stats.fields() {
                assignments
                    .push(format!("{} = ", column))
                    .push_bind_unseparated(value.map(i64::from));
            }
        }
        qb.push(" WHERE no = ").push_bind(number.as_str());

        let result = qb.build().execute(&mut *self.conn).await?;
        if result.rows_affected() == 0 {
            return Err(PokedexError::pokemon_not_found(number));
        }
        Ok(())
    }

    async fn delete(&mut self, number: &PokemonNumber) -> PokedexResult<()> {
        let result = sqlx::query("DELETE FROM pokemon WHERE no = ?")
            .bind(number.as_str())
            .execute(&mut *self.conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(PokedexError::pokemon_not_found(number));
        }
        Ok(())
    }

    async fn are_all_present(&mut self, numbers: &[PokemonNumber]) -> PokedexResult<bool> {
        let numbers = dedupe(numbers);
        Ok(missing_pokemon(self.conn, &numbers).await?.is_empty())
    }

    async fn replace_types(&mut self, number: &PokemonNumber, type_names: &[String]) -> PokedexResult<()> {
        if !pokemon_exists(self.conn, number).await? {
            return Err(PokedexError::pokemon_not_found(number));
        }

        sqlx::query("DELETE FROM pokemon_type WHERE pokemon_no = ?")
            .bind(number.as_str())
            .execute(&mut *self.conn)
            .await?;

        let names: Vec<String> = type_names.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        if names.is_empty() {
            return Ok(());
        }

        // Get-or-create: a concurrent insert of the same name is absorbed by
        // ON CONFLICT and picked up by the re-query below.
        let mut insert: QueryBuilder<Sqlite> = QueryBuilder::new("INSERT INTO type_tag (id, name) ");
        insert.push_values(&names, |mut b, name| {
            b.push_bind(uuid::Uuid::new_v4().simple().to_string())
                .push_bind(name.clone());
        });
        insert.push(" ON CONFLICT (name) DO NOTHING");
        insert.build().execute(&mut *self.conn).await?;

        let type_ids: Vec<String> = in_list("SELECT id FROM type_tag WHERE name IN ", &names, "")
            .build_query_scalar()
            .fetch_all(&mut *self.conn)
            .await?;

        let mut link: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO pokemon_type (pokemon_no, type_id) ");
        link.push_values(type_ids, |mut b, type_id| {
            b.push_bind(number.as_str().to_string()).push_bind(type_id);
        });
        link.build().execute(&mut *self.conn).await?;

        Ok(())
    }

    async fn replace_previous_evolutions(
        &mut self,
        number: &PokemonNumber,
        previous: &[PokemonNumber],
    ) -> PokedexResult<()> {
        let previous = dedupe(previous);
        self.ensure_edge_endpoints(number, &previous).await?;

        sqlx::query("DELETE FROM pokemon_evolution WHERE next_no = ?")
            .bind(number.as_str())
            .execute(&mut *self.conn)
            .await?;

        let edges = previous
            .into_iter()
            .map(|prev| (prev, number.as_str().to_string()))
            .collect();
        self.insert_edges(number, edges).await
    }

    async fn replace_next_evolutions(&mut self, number: &PokemonNumber, next: &[PokemonNumber]) -> PokedexResult<()> {
        let next = dedupe(next);
        self.ensure_edge_endpoints(number, &next).await?;

        sqlx::query("DELETE FROM pokemon_evolution WHERE previous_no = ?")
            .bind(number.as_str())
            .execute(&mut *self.conn)
            .await?;

        let edges = next
            .into_iter()
            .map(|nxt| (number.as_str().to_string(), nxt))
            .collect();
        self.insert_edges(number, edges).await
    }

    async fn count(&mut self) -> PokedexResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pokemon")
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(count as usize)
    }
}

// ============================================================================
// Trainers
// ============================================================================

/// TrainerRepository over a borrowed SQLite connection
pub struct SqliteTrainerRepo<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SqliteTrainerRepo<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    async fn ensure_trainer(&mut self, id: &TrainerId) -> PokedexResult<()> {
        if !trainer_exists(self.conn, id).await? {
            return Err(PokedexError::trainer_not_found(id));
        }
        Ok(())
    }

    async fn teams(&mut self, trainer_id: Option<&TrainerId>) -> PokedexResult<HashMap<String, Vec<TeamMember>>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT tp.trainer_id, p.no, p.name FROM trainer_pokemon tp \
             JOIN pokemon p ON p.no = tp.pokemon_no",
        );
        if let Some(id) = trainer_id {
            qb.push(" WHERE tp.trainer_id = ").push_bind(id.as_str());
        }
        qb.push(" ORDER BY tp.pokemon_no");

        let rows: Vec<TeamRow> = qb.build_query_as().fetch_all(&mut *self.conn).await?;

        let mut teams: HashMap<String, Vec<TeamMember>> = HashMap::new();
        for row in rows {
            teams.entry(row.trainer_id).or_default().push(TeamMember {
                number: PokemonNumber::parse(&row.no)?,
                name: row.name,
            });
        }
        Ok(teams)
    }
}

#[async_trait]
impl<'c> TrainerRepository for SqliteTrainerRepo<'c> {
    async fn get(&mut self, id: &TrainerId) -> PokedexResult<Trainer> {
        let row = sqlx::query_as::<_, TrainerRow>(
            "SELECT id, name, region, badge_count FROM trainer WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or_else(|| PokedexError::trainer_not_found(id))?;

        let team = self.teams(Some(id)).await?.remove(id.as_str()).unwrap_or_default();
        row_to_trainer(row, team)
    }

    async fn list(&mut self) -> PokedexResult<Vec<Trainer>> {
        let rows = sqlx::query_as::<_, TrainerRow>(
            "SELECT id, name, region, badge_count FROM trainer ORDER BY id",
        )
        .fetch_all(&mut *self.conn)
        .await?;

        let mut teams = self.teams(None).await?;
        rows.into_iter()
            .map(|row| {
                let team = teams.remove(&row.id).unwrap_or_default();
                row_to_trainer(row, team)
            })
            .collect()
    }

    async fn create(&mut self, data: &CreateTrainer) -> PokedexResult<TrainerId> {
        let id = TrainerId::generate();
        sqlx::query("INSERT INTO trainer (id, name, region, badge_count) VALUES (?, ?, ?, ?)")
            .bind(id.as_str())
            .bind(&data.name)
            .bind(&data.region)
            .bind(i64::from(data.badge_count))
            .execute(&mut *self.conn)
            .await?;
        Ok(id)
    }

    async fn update(&mut self, id: &TrainerId, patch: &UpdateTrainer) -> PokedexResult<()> {
        if patch.name.is_none() && patch.region.is_none() && patch.badge_count.is_none() {
            return self.ensure_trainer(id).await;
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE trainer SET ");
        let mut assignments = qb.separated(", ");
        if let Some(name) = &patch.name {
            assignments.push("name = ").push_bind_unseparated(name.clone());
        }
        if let Some(region) = &patch.region {
            assignments.push("region = ").push_bind_unseparated(region.clone());
        }
        if let Some(badge_count) = patch.badge_count {
            assignments
                .push("badge_count = ")
                .push_bind_unseparated(i64::from(badge_count));
        }
        qb.push(" WHERE id = ").push_bind(id.as_str());

        let result = qb.build().execute(&mut *self.conn).await?;
        if result.rows_affected() == 0 {
            return Err(PokedexError::trainer_not_found(id));
        }
        Ok(())
    }

    async fn delete(&mut self, id: &TrainerId) -> PokedexResult<()> {
        let result = sqlx::query("DELETE FROM trainer WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *self.conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(PokedexError::trainer_not_found(id));
        }
        Ok(())
    }

    async fn add_to_team(&mut self, id: &TrainerId, number: &PokemonNumber) -> PokedexResult<()> {
        self.ensure_trainer(id).await?;
        if !pokemon_exists(self.conn, number).await? {
            return Err(PokedexError::pokemon_not_found(number));
        }

        sqlx::query(
            "INSERT INTO trainer_pokemon (trainer_id, pokemon_no) VALUES (?, ?)
             ON CONFLICT (trainer_id, pokemon_no) DO NOTHING",
        )
        .bind(id.as_str())
        .bind(number.as_str())
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    async fn remove_from_team(&mut self, id: &TrainerId, number: &PokemonNumber) -> PokedexResult<()> {
        self.ensure_trainer(id).await?;
        sqlx::query("DELETE FROM trainer_pokemon WHERE trainer_id = ? AND pokemon_no = ?")
            .bind(id.as_str())
            .bind(number.as_str())
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    async fn remove_pokemon_from_all_teams(&mut self, number: &PokemonNumber) -> PokedexResult<()> {
        // Usually a no-op: the foreign key already cascaded when the Pokemon row went away.
        sqlx::query("DELETE FROM trainer_pokemon WHERE pokemon_no = ?")
            .bind(number.as_str())
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    async fn count(&mut self) -> PokedexResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trainer")
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(count as usize)
    }
}
