//! Reverse-index bookkeeping for evolution edges
//!
//! The relational backend gets both directions of an edge from one row. The
//! document and key-value backends store each direction separately, so every
//! replace has to touch the peers on the other side as well. This module
//! computes those peer writes once for both.

use std::collections::BTreeSet;

/// Which side of an edge a list describes, as seen from its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvolutionDirection {
    Previous,
    Next,
}

impl EvolutionDirection {
    /// The list on the peer that mirrors this one
    pub fn reverse(self) -> Self {
        match self {
            Self::Previous => Self::Next,
            Self::Next => Self::Previous,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Previous => "previous",
            Self::Next => "next",
        }
    }
}

/// Peer writes needed to move an owner's list from `current` to `desired`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseIndexPlan<T> {
    /// The owner's new list, deduplicated and sorted
    pub target: Vec<T>,
    /// Former peers that must drop the owner from their mirrored list
    pub unlink: Vec<T>,
    /// Peers that must hold the owner in their mirrored list
    pub link: Vec<T>,
}

/// Plan a full replacement of one direction.
///
/// Every desired peer is linked, not only new ones, so a one-sided edge left
/// by an interrupted write heals on the next replace.
pub fn plan_replacement<T, C, D>(current: C, desired: D) -> ReverseIndexPlan<T>
where
    T: Ord + Clone,
    C: IntoIterator<Item = T>,
    D: IntoIterator<Item = T>,
{
    let current: BTreeSet<T> = current.into_iter().collect();
    let desired: BTreeSet<T> = desired.into_iter().collect();

    let unlink = current.difference(&desired).cloned().collect();
    let target: Vec<T> = desired.into_iter().collect();

    ReverseIndexPlan {
        link: target.clone(),
        unlink,
        target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_unlinks_dropped_peers() {
        let plan = plan_replacement(vec!["0001", "0002"], vec!["0002", "0003"]);
        assert_eq!(plan.unlink, vec!["0001"]);
        assert_eq!(plan.link, vec!["0002", "0003"]);
        assert_eq!(plan.target, vec!["0002", "0003"]);
    }

    #[test]
    fn test_plan_clear() {
        let plan = plan_replacement(vec!["0001"], Vec::<&str>::new());
        assert_eq!(plan.unlink, vec!["0001"]);
        assert!(plan.link.is_empty());
        assert!(plan.target.is_empty());
    }

    #[test]
    fn test_plan_dedupes_input() {
        let plan = plan_replacement(Vec::<&str>::new(), vec!["0003", "0002", "0003"]);
        assert_eq!(plan.target, vec!["0002", "0003"]);
        assert!(plan.unlink.is_empty());
    }

    #[test]
    fn test_empty_to_empty_plans_nothing() {
        let plan = plan_replacement(Vec::<u8>::new(), Vec::new());
        assert_eq!(
            plan,
            ReverseIndexPlan {
                target: vec![],
                unlink: vec![],
                link: vec![],
            }
        );
    }

    #[test]
    fn test_direction_reverse() {
        assert_eq!(EvolutionDirection::Previous.reverse(), EvolutionDirection::Next);
        assert_eq!(EvolutionDirection::Next.reverse(), EvolutionDirection::Previous);
    }
}
