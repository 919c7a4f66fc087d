//! Backend-independent invariants
//!
//! Pure checks the usecase layer runs around storage calls. Backends never
//! call these; they only keep links consistent.

use super::pokemon::PokemonNumber;
use super::trainer::{TeamMember, MAX_TEAM_SIZE};
use crate::error::{PokedexError, PokedexResult};

/// Fails if `number` appears among its own previous or next evolutions
pub fn validate_number_not_self_referencing(
    number: &PokemonNumber,
    previous: &[PokemonNumber],
    next: &[PokemonNumber],
) -> PokedexResult<()> {
    if previous.contains(number) || next.contains(number) {
        return Err(PokedexError::SelfReferencingEvolution(number.to_string()));
    }
    Ok(())
}

pub fn team_has_capacity(team: &[TeamMember]) -> bool {
    team.len() < MAX_TEAM_SIZE
}

pub fn team_contains(team: &[TeamMember], number: &PokemonNumber) -> bool {
    team.iter().any(|member| &member.number == number)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no(raw: &str) -> PokemonNumber {
        PokemonNumber::parse(raw).unwrap()
    }

    fn member(raw: &str) -> TeamMember {
        TeamMember {
            number: no(raw),
            name: format!("Pokemon {}", raw),
        }
    }

    #[test]
    fn test_self_reference_detected_in_either_direction() {
        let target = no("0002");
        assert!(validate_number_not_self_referencing(&target, &[no("0001")], &[no("0003")]).is_ok());
        assert!(matches!(
            validate_number_not_self_referencing(&target, &[no("0002")], &[]),
            Err(PokedexError::SelfReferencingEvolution(_))
        ));
        assert!(validate_number_not_self_referencing(&target, &[], &[no("0002")]).is_err());
    }

    #[test]
    fn test_team_capacity_boundary() {
        let mut team: Vec<TeamMember> = (1..=5).map(|i| member(&format!("{:04}", i))).collect();
        assert!(team_has_capacity(&team));
        team.push(member("0006"));
        assert!(!team_has_capacity(&team));
        assert!(team_has_capacity(&[]));
    }

    #[test]
    fn test_team_contains() {
        let team = vec![member("0001"), member("0025")];
        assert!(team_contains(&team, &no("0025")));
        assert!(!team_contains(&team, &no("0004")));
    }
}
