//! Vote counting over the ideas of one analysis run

use super::idea::TradeIdea;
use crate::models::Direction;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Votes per direction
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Tally(BTreeMap<Direction, usize>);

impl Tally {
    pub fn count<'a>(ideas: impl IntoIterator<Item = &'a TradeIdea>) -> Self {
        let mut votes = BTreeMap::new();
        for idea in ideas {
            *votes.entry(idea.direction).or_insert(0) += 1;
        }
        Self(votes)
    }

    pub fn get(&self, direction: Direction) -> usize {
        self.0.get(&direction).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    /// The single most voted direction, or `None` on a tie or an empty tally
    pub fn mode(&self) -> Option<(Direction, usize)> {
        let top = self.0.values().copied().max()?;
        let mut leaders = self.0.iter().filter(|(_, n)| **n == top);
        let (direction, _) = leaders.next()?;
        match leaders.next() {
            Some(_) => None,
            None => Some((*direction, top)),
        }
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(d, n)| format!("{:?}={}", d, n)).collect();
        f.write_str(&parts.join(", "))
    }
}

/// "k/n": votes for the winner out of all votes cast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consensus {
    pub votes: usize,
    pub total: usize,
}

impl Consensus {
    pub fn is_unanimous(&self) -> bool {
        self.total > 0 && self.votes == self.total
    }
}

impl fmt::Display for Consensus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.votes, self.total)
    }
}

/// Stage-one decision
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Nobody voted
    Empty,
    /// Tie for first place, or the leader is below quorum
    Ambiguous(Tally),
    Winner {
        representative: TradeIdea,
        /// Position of the representative in the input
        index: usize,
        consensus: Consensus,
    },
}

/// Pick a winner: unique mode with at least `quorum` votes.
///
/// The representative is the first idea voting for the winner.
pub fn decide(ideas: &[TradeIdea], quorum: usize) -> Decision {
    if ideas.is_empty() {
        return Decision::Empty;
    }

    let tally = Tally::count(ideas);
    let Some((winner, votes)) = tally.mode() else {
        return Decision::Ambiguous(tally);
    };
    if votes < quorum {
        return Decision::Ambiguous(tally);
    }

    match ideas.iter().position(|i| i.direction == winner) {
        Some(index) => Decision::Winner {
            representative: ideas[index].clone(),
            index,
            consensus: Consensus {
                votes,
                total: ideas.len(),
            },
        },
        None => Decision::Ambiguous(tally),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryType;

    fn idea(direction: Direction, summary: &str) -> TradeIdea {
        TradeIdea {
            symbol: "BTC/USDT".to_string(),
            direction,
            entry_type: EntryType::Market,
            entry_price: None,
            stop_loss: 90.into(),
            take_profit: 120.into(),
            risk_reward_ratio: "1:2".to_string(),
            analysis_summary: summary.to_string(),
            entry_reason: None,
            invalidation_hours: 24,
        }
    }

    #[test]
    fn test_empty_results() {
        assert_eq!(decide(&[], 2), Decision::Empty);
    }

    #[test]
    fn test_two_to_one_majority_wins() {
        let ideas = vec![
            idea(Direction::Long, "first"),
            idea(Direction::Long, "second"),
            idea(Direction::Short, "third"),
        ];
        match decide(&ideas, 2) {
            Decision::Winner {
                representative,
                index,
                consensus,
            } => {
                assert_eq!(representative.direction, Direction::Long);
                assert_eq!(representative.analysis_summary, "first");
                assert_eq!(index, 0);
                assert_eq!(consensus.to_string(), "2/3");
                assert!(!consensus.is_unanimous());
            }
            other => panic!("expected winner, got {:?}", other),
        }
    }

    #[test]
    fn test_representative_is_first_winning_vote() {
        let ideas = vec![
            idea(Direction::Short, "a"),
            idea(Direction::Long, "b"),
            idea(Direction::Long, "c"),
        ];
        match decide(&ideas, 2) {
            Decision::Winner { representative, index, .. } => {
                assert_eq!(representative.analysis_summary, "b");
                assert_eq!(index, 1);
            }
            other => panic!("expected winner, got {:?}", other),
        }
    }

    #[test]
    fn test_tie_is_ambiguous() {
        let ideas = vec![idea(Direction::Long, "a"), idea(Direction::Short, "b")];
        match decide(&ideas, 1) {
            Decision::Ambiguous(tally) => {
                assert_eq!(tally.get(Direction::Long), 1);
                assert_eq!(tally.get(Direction::Short), 1);
            }
            other => panic!("expected ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn test_single_vote_fails_quorum() {
        let ideas = vec![idea(Direction::Long, "only")];
        assert!(matches!(decide(&ideas, 2), Decision::Ambiguous(_)));
    }

    #[test]
    fn test_unanimous_consensus() {
        let ideas = vec![
            idea(Direction::Short, "a"),
            idea(Direction::Short, "b"),
            idea(Direction::Short, "c"),
        ];
        match decide(&ideas, 2) {
            Decision::Winner { consensus, .. } => {
                assert_eq!(consensus.to_string(), "3/3");
                assert!(consensus.is_unanimous());
            }
            other => panic!("expected winner, got {:?}", other),
        }
    }

    #[test]
    fn test_tally_serializes_as_direction_map() {
        let ideas = vec![idea(Direction::Long, "a"), idea(Direction::Short, "b")];
        let json = serde_json::to_value(Tally::count(&ideas)).unwrap();
        assert_eq!(json, serde_json::json!({"Long": 1, "Short": 1}));
    }
}
