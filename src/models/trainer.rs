//! Trainer value types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::invariants;
use super::pokemon::PokemonNumber;
use crate::error::{PokedexError, PokedexResult};

/// Maximum number of Pokemon on one team
pub const MAX_TEAM_SIZE: usize = 6;

/// Opaque trainer id: 32 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrainerId(String);

impl TrainerId {
    /// Fresh random id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn parse(raw: &str) -> PokedexResult<Self> {
        let valid = raw.len() == 32
            && raw.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(PokedexError::InvalidTrainerId(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TrainerId {
    type Err = PokedexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TrainerId {
    type Error = PokedexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TrainerId> for String {
    fn from(id: TrainerId) -> Self {
        id.0
    }
}

/// A team slot as returned by reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub number: PokemonNumber,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trainer {
    pub id: TrainerId,
    pub name: String,
    pub region: String,
    pub badge_count: u32,
    pub team: Vec<TeamMember>,
}

impl Trainer {
    pub fn is_team_full(&self) -> bool {
        !invariants::team_has_capacity(&self.team)
    }

    pub fn has_pokemon(&self, number: &PokemonNumber) -> bool {
        invariants::team_contains(&self.team, number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTrainer {
    pub name: String,
    pub region: String,
    #[serde(default)]
    pub badge_count: u32,
}

impl CreateTrainer {
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            badge_count: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTrainer {
    pub name: Option<String>,
    pub region: Option<String>,
    pub badge_count: Option<u32>,
}

/// Exchange of one Pokemon each between two trainers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradePokemon {
    pub trainer_id: TrainerId,
    pub pokemon_number: PokemonNumber,
    pub other_trainer_id: TrainerId,
    pub other_pokemon_number: PokemonNumber,
}
