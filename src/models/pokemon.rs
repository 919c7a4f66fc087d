//! Pokemon value types
//!
//! A Pokemon is keyed by its four-digit Pokedex number. Types are tags
//! resolved by name, and evolutions are directed edges to other numbers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{PokedexError, PokedexResult};

/// Default page size for list queries
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Four-digit Pokedex number ("0001".."9999")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PokemonNumber(String);

impl PokemonNumber {
    /// Parse and validate a Pokedex number
    pub fn parse(raw: &str) -> PokedexResult<Self> {
        let valid = raw.len() == 4 && raw.bytes().all(|b| b.is_ascii_digit()) && raw != "0000";
        if !valid {
            return Err(PokedexError::InvalidPokemonNumber(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PokemonNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PokemonNumber {
    type Err = PokedexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PokemonNumber {
    type Error = PokedexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PokemonNumber> for String {
    fn from(number: PokemonNumber) -> Self {
        number.0
    }
}

/// Base stats; every field is optional
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseStats {
    pub hp: Option<u32>,
    pub attack: Option<u32>,
    pub defense: Option<u32>,
    pub sp_atk: Option<u32>,
    pub sp_def: Option<u32>,
    pub speed: Option<u32>,
}

impl BaseStats {
    /// Stat names paired with their values, in canonical order
    pub fn fields(&self) -> [(&'static str, Option<u32>); 6] {
        [
            ("hp", self.hp),
            ("attack", self.attack),
            ("defense", self.defense),
            ("sp_atk", self.sp_atk),
            ("sp_def", self.sp_def),
            ("speed", self.speed),
        ]
    }

    /// Build stats from a lookup keyed by stat name
    pub fn from_lookup<F>(mut lookup: F) -> Self
    where
        F: FnMut(&str) -> Option<u32>,
    {
        Self {
            hp: lookup("hp"),
            attack: lookup("attack"),
            defense: lookup("defense"),
            sp_atk: lookup("sp_atk"),
            sp_def: lookup("sp_def"),
            speed: lookup("speed"),
        }
    }
}

/// A type tag as seen from a Pokemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeTag {
    pub id: String,
    pub name: String,
}

impl TypeTag {
    /// Stable id derived from the type name (used by backends without a type table)
    pub fn derived(name: &str) -> Self {
        let id = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_DNS, name.as_bytes())
            .simple()
            .to_string();
        Self { id, name: name.to_string() }
    }
}

/// One end of an evolution edge, as seen from the other end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvolutionRef {
    pub number: PokemonNumber,
    pub name: String,
}

/// Fully resolved Pokemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pokemon {
    pub number: PokemonNumber,
    pub name: String,
    #[serde(default)]
    pub stats: BaseStats,
    pub types: Vec<TypeTag>,
    pub previous_evolutions: Vec<EvolutionRef>,
    pub next_evolutions: Vec<EvolutionRef>,
}

impl Pokemon {
    pub fn type_names(&self) -> Vec<&str> {
        self.types.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Input for creating a Pokemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePokemon {
    pub number: PokemonNumber,
    pub name: String,
    #[serde(default)]
    pub stats: BaseStats,
    #[serde(default)]
    pub type_names: Vec<String>,
    #[serde(default)]
    pub previous_evolution_numbers: Vec<PokemonNumber>,
    #[serde(default)]
    pub next_evolution_numbers: Vec<PokemonNumber>,
}

impl CreatePokemon {
    pub fn new(number: PokemonNumber, name: impl Into<String>) -> Self {
        Self {
            number,
            name: name.into(),
            stats: BaseStats::default(),
            type_names: Vec::new(),
            previous_evolution_numbers: Vec::new(),
            next_evolution_numbers: Vec::new(),
        }
    }

    pub fn with_types<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.type_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stats(mut self, stats: BaseStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_previous(mut self, numbers: Vec<PokemonNumber>) -> Self {
        self.previous_evolution_numbers = numbers;
        self
    }

    pub fn with_next(mut self, numbers: Vec<PokemonNumber>) -> Self {
        self.next_evolution_numbers = numbers;
        self
    }
}

/// Partial update; `None` leaves the field untouched, `Some` replaces it entirely
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePokemon {
    pub name: Option<String>,
    pub stats: Option<BaseStats>,
    pub type_names: Option<Vec<String>>,
    pub previous_evolution_numbers: Option<Vec<PokemonNumber>>,
    pub next_evolution_numbers: Option<Vec<PokemonNumber>>,
}

/// Pagination for list queries (`page` is 1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    pub page: u32,
    pub size: u32,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            page: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ListParams {
    pub fn new(page: u32, size: u32) -> Self {
        Self { page, size }
    }

    /// Number of items skipped before this page
    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1).saturating_mul(self.size as usize)
    }

    pub fn limit(&self) -> usize {
        self.size as usize
    }

    /// Apply this page to an already-sorted sequence
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.offset()).take(self.limit()).collect()
    }
}
