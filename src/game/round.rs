//! Round State Definitions
//!
//! The round record and the engine phase enum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fairness::RoundCommitment;

/// Unique round identifier (UUID as bytes).
pub type RoundId = [u8; 16];

/// Engine phase.
///
/// The cycle is `Waiting -> Running -> Crashed -> Waiting ...` and has
/// no terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Countdown to the next round; bets are accepted.
    Waiting,
    /// Multiplier is rising; cashouts are accepted.
    Running,
    /// Round over, seed revealed; pause before the next round.
    Crashed,
}

/// One wagering round.
///
/// The commitment (and with it the server seed and crash point) is
/// fixed at creation and never recomputed. `Round` is deliberately not
/// `Serialize`: seed material leaves only via [`Round::close`] or the
/// persistence record.
#[derive(Debug)]
pub struct Round {
    /// Round identifier.
    pub id: RoundId,
    /// Client seed the crash point was derived against.
    pub client_seed: String,
    /// When the round was opened.
    pub started_at: DateTime<Utc>,
    /// When the round crashed, if it has.
    pub ended_at: Option<DateTime<Utc>>,
    commitment: RoundCommitment,
}

impl Round {
    /// Open a new round around an already-generated commitment.
    pub fn open(commitment: RoundCommitment, client_seed: String) -> Self {
        Self {
            id: *uuid::Uuid::new_v4().as_bytes(),
            client_seed,
            started_at: Utc::now(),
            ended_at: None,
            commitment,
        }
    }

    /// The published commitment hash.
    pub fn server_seed_hash(&self) -> [u8; 32] {
        self.commitment.server_seed_hash()
    }

    /// The secret crash point in hundredths.
    pub fn crash_point(&self) -> u64 {
        self.commitment.crash_point()
    }

    /// Close the round: set `ended_at` and reveal the server seed.
    ///
    /// The engine's Running -> Crashed transition is the only caller.
    pub fn close(&mut self) -> [u8; 32] {
        self.ended_at = Some(Utc::now());
        self.commitment.clone().reveal()
    }

    /// Seed copy for the persistence record written at round open.
    pub(crate) fn seed_for_store(&self) -> [u8; 32] {
        self.commitment.seed_for_store()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::verify;

    #[test]
    fn test_round_open_close() {
        let commitment = RoundCommitment::from_seed([5; 32], "seed", 9_600);
        let hash = commitment.server_seed_hash();
        let crash = commitment.crash_point();

        let mut round = Round::open(commitment, "seed".to_string());
        assert!(round.ended_at.is_none());
        assert_eq!(round.server_seed_hash(), hash);

        let revealed = round.close();
        assert!(round.ended_at.is_some());
        assert!(verify(&revealed, &hash, "seed", 9_600, crash));
    }

    #[test]
    fn test_phase_serde_names() {
        let json = serde_json::to_string(&Phase::Waiting).unwrap();
        assert_eq!(json, "\"waiting\"");
        let back: Phase = serde_json::from_str("\"crashed\"").unwrap();
        assert_eq!(back, Phase::Crashed);
    }
}
