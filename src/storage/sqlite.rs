//! SQLite Storage - relational backend
//!
//! Foreign keys and joins do the heavy lifting here: an evolution edge is a
//! single row visible from both endpoints, and deletes cascade natively.
//! Every unit of work is one SQLite transaction (SQLite transactions are
//! serializable).
//!
//! ## Tables
//! - pokemon, type_tag, pokemon_type, pokemon_evolution
//! - trainer, trainer_pokemon

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Sqlite, Transaction};
use std::str::FromStr;
use tracing::{debug, info};

use super::migrations;
use super::repository::{PokemonRepository, TrainerRepository};
use super::sqlite_repo_adapter::{SqlitePokemonRepo, SqliteTrainerRepo};
use super::unit_of_work::{Outcome, UnitOfWork, UnitOfWorkFactory};
use crate::config::{BackendKind, StorageConfig};
use crate::error::PokedexResult;

/// SQLite connection pool wrapper
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to SQLite and run migrations
    pub async fn new(config: &StorageConfig) -> PokedexResult<Self> {
        let database_uri = config.location();
        let max_connections = config.max_connections;
        let options = SqliteConnectOptions::from_str(database_uri)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `:memory:` is a separate database, so the pool
        // must hold exactly one connection for its whole lifetime.
        let in_memory = config.is_in_memory_sqlite();
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections)
        };

        let pool = pool_options.connect_with(options).await?;
        info!(
            "SQLite connected: {} (max_connections={})",
            database_uri,
            if in_memory { 1 } else { max_connections }
        );

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Run all pending migrations
    pub async fn run_migrations(&self) -> PokedexResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name VARCHAR(100) PRIMARY KEY,
                applied_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(&self.pool)
        .await?;

        for (name, sql) in migrations::get_migrations() {
            let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _migrations WHERE name = ?")
                .bind(name)
                .fetch_one(&self.pool)
                .await?;

            if applied == 0 {
                info!("Running migration: {}", name);
                sqlx::raw_sql(sql).execute(&self.pool).await?;

                sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
                    .bind(name)
                    .execute(&self.pool)
                    .await?;

                info!("Migration applied: {}", name);
            } else {
                debug!("Migration already applied: {}", name);
            }
        }

        Ok(())
    }

    /// Drop every table and recreate the schema
    pub async fn reset(&self) -> PokedexResult<()> {
        for table in migrations::DROP_ORDER {
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
                .execute(&self.pool)
                .await?;
        }
        info!("SQLite schema dropped, re-running migrations");
        self.run_migrations().await
    }

    /// Start a transaction-backed unit of work
    pub async fn begin(&self) -> PokedexResult<SqliteUnitOfWork> {
        let tx = self.pool.begin().await?;
        Ok(SqliteUnitOfWork { tx })
    }
}

// ============================================================================
// Unit of work
// ============================================================================

/// One SQLite transaction; dropping it without `exit` rolls back
pub struct SqliteUnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl UnitOfWork for SqliteUnitOfWork {
    fn backend(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn pokemon(&mut self) -> Box<dyn PokemonRepository + '_> {
        Box::new(SqlitePokemonRepo::new(&mut self.tx))
    }

    fn trainers(&mut self) -> Box<dyn TrainerRepository + '_> {
        Box::new(SqliteTrainerRepo::new(&mut self.tx))
    }

    async fn exit(self: Box<Self>, outcome: Outcome) -> PokedexResult<()> {
        match outcome {
            Outcome::Success => {
                self.tx.commit().await?;
                debug!("SQLite transaction committed");
            }
            Outcome::Failure => {
                self.tx.rollback().await?;
                debug!("SQLite transaction rolled back");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UnitOfWorkFactory for SqliteStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Relational
    }

    async fn enter(&self) -> PokedexResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(self.begin().await?))
    }

    async fn reset(&self) -> PokedexResult<()> {
        SqliteStore::reset(self).await
    }
}

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct PokemonRow {
    pub no: String,
    pub name: String,
    pub hp: Option<i64>,
    pub attack: Option<i64>,
    pub defense: Option<i64>,
    pub sp_atk: Option<i64>,
    pub sp_def: Option<i64>,
    pub speed: Option<i64>,
}

/// A type attached to `pokemon_no`
#[derive(Debug, Clone, FromRow)]
pub struct PokemonTypeRow {
    pub pokemon_no: String,
    pub id: String,
    pub name: String,
}

/// The far end (`no`, `name`) of an edge owned by `owner_no`
#[derive(Debug, Clone, FromRow)]
pub struct EvolutionRow {
    pub owner_no: String,
    pub no: String,
    pub name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct TrainerRow {
    pub id: String,
    pub name: String,
    pub region: String,
    pub badge_count: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct TeamRow {
    pub trainer_id: String,
    pub no: String,
    pub name: String,
}
