//! SQLite schema migrations
//!
//! Applied in order by `SqliteStore::run_migrations`, each at most once
//! (tracked in `_migrations`). Evolution edges and team slots reference
//! `pokemon` with `ON DELETE CASCADE`, so deleting a Pokemon cleans up after
//! itself.

/// Catalog: Pokemon, types, evolution edges
pub const MIGRATION_V1_CATALOG: &str = r#"
CREATE TABLE IF NOT EXISTS pokemon (
    no          VARCHAR(8) PRIMARY KEY,
    name        VARCHAR(256) NOT NULL,
    hp          INTEGER,
    attack      INTEGER,
    defense     INTEGER,
    sp_atk      INTEGER,
    sp_def      INTEGER,
    speed       INTEGER
);

CREATE TABLE IF NOT EXISTS type_tag (
    id          VARCHAR(32) PRIMARY KEY,
    name        VARCHAR(256) NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS pokemon_type (
    pokemon_no  VARCHAR(8) NOT NULL REFERENCES pokemon(no) ON DELETE CASCADE,
    type_id     VARCHAR(32) NOT NULL REFERENCES type_tag(id) ON DELETE CASCADE,
    PRIMARY KEY (pokemon_no, type_id)
);

CREATE TABLE IF NOT EXISTS pokemon_evolution (
    id          VARCHAR(32) PRIMARY KEY,
    previous_no VARCHAR(8) NOT NULL REFERENCES pokemon(no) ON DELETE CASCADE,
    next_no     VARCHAR(8) NOT NULL REFERENCES pokemon(no) ON DELETE CASCADE,
    CHECK (previous_no <> next_no),
    UNIQUE (previous_no, next_no)
);

CREATE INDEX IF NOT EXISTS idx_pokemon_evolution_next ON pokemon_evolution(next_no);
"#;

/// Trainers and team membership
pub const MIGRATION_V2_TRAINERS: &str = r#"
CREATE TABLE IF NOT EXISTS trainer (
    id          VARCHAR(32) PRIMARY KEY,
    name        VARCHAR(256) NOT NULL,
    region      VARCHAR(256) NOT NULL,
    badge_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS trainer_pokemon (
    trainer_id  VARCHAR(32) NOT NULL REFERENCES trainer(id) ON DELETE CASCADE,
    pokemon_no  VARCHAR(8) NOT NULL REFERENCES pokemon(no) ON DELETE CASCADE,
    PRIMARY KEY (trainer_id, pokemon_no)
);

CREATE INDEX IF NOT EXISTS idx_trainer_pokemon_no ON trainer_pokemon(pokemon_no);
"#;

/// Tables dropped by a reinitialize, children first
pub const DROP_ORDER: &[&str] = &[
    "trainer_pokemon",
    "trainer",
    "pokemon_evolution",
    "pokemon_type",
    "type_tag",
    "pokemon",
    "_migrations",
];

/// All migrations in apply order
pub fn get_migrations() -> Vec<(&'static str, &'static str)> {
    vec![
        ("v1_catalog", MIGRATION_V1_CATALOG),
        ("v2_trainers", MIGRATION_V2_TRAINERS),
    ]
}
