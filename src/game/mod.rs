//! Game logic: round lifecycle, wager ledger, and phase state.
//!
//! Everything in this module is synchronous and deterministic given a
//! server seed; the network layer supplies the timers and the lock.

pub mod engine;
pub mod ledger;
pub mod round;

pub use engine::{EngineConfig, RoundEngine, RoundStartInfo, TickOutcome, WelcomeInfo};
pub use ledger::{
    Bet, BetReceipt, CashoutReceipt, GameError, Session, SessionId, SessionLedger, SessionSnapshot,
};
pub use round::{Phase, Round, RoundId};
