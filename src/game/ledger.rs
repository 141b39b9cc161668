//! Session Ledger
//!
//! Balances and wagers for every connected session.
//! Enforces at-most-one active bet per round and atomic balance
//! transitions; all mutation happens under the engine lock.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fairness::MULT_SCALE;
use crate::game::round::Phase;

/// Unique session identifier (UUID as bytes).
pub type SessionId = [u8; 16];

/// Errors reported to the originating client. All recoverable; none
/// terminate the round loop or affect other sessions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// Action attempted outside its valid phase.
    #[error("action not allowed in the current phase")]
    WrongPhase,

    /// Session already has an active bet this round.
    #[error("bet already placed this round")]
    DuplicateBet,

    /// No active bet, or it was already cashed out.
    #[error("no active bet to cash out")]
    NoActiveBet,

    /// Balance is lower than the requested stake.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Zero or malformed bet amount.
    #[error("invalid bet amount")]
    InvalidAmount,

    /// Session is not registered with the ledger.
    #[error("unknown session")]
    SessionNotFound,
}

/// An active wager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bet {
    /// Stake, already debited from the balance.
    pub amount: u64,
    /// Flips false -> true exactly once.
    pub cashed_out: bool,
}

/// One connected player's server-side record.
#[derive(Debug)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Balance in whole currency units. Never negative: all debits are
    /// checked subtractions.
    pub balance: u64,
    /// At most one wager per round.
    pub active_bet: Option<Bet>,
}

/// Read-only session view for the administrative interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session id, hex-encoded.
    pub session_id: String,
    /// Current balance.
    pub balance: u64,
    /// Active stake, if any.
    pub bet_amount: Option<u64>,
    /// Whether the active bet has been cashed out.
    pub cashed_out: bool,
}

/// Result of a successful bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BetReceipt {
    /// Stake debited.
    pub amount: u64,
    /// Balance after the debit.
    pub balance: u64,
}

/// Result of a successful cashout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CashoutReceipt {
    /// Multiplier at cashout, in hundredths.
    pub multiplier: u64,
    /// Credited winnings.
    pub win: u64,
    /// Balance after the credit.
    pub balance: u64,
}

/// All connected sessions, keyed by id (BTreeMap for stable iteration).
#[derive(Debug, Default)]
pub struct SessionLedger {
    sessions: BTreeMap<SessionId, Session>,
}

impl SessionLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session with its starting balance.
    /// Reconnecting under an existing id keeps the existing record.
    pub fn connect(&mut self, id: SessionId, starting_balance: u64) -> &Session {
        self.sessions.entry(id).or_insert(Session {
            id,
            balance: starting_balance,
            active_bet: None,
        })
    }

    /// Remove a session. Returns true if it existed.
    pub fn disconnect(&mut self, id: &SessionId) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Current balance, if the session exists.
    pub fn balance(&self, id: &SessionId) -> Option<u64> {
        self.sessions.get(id).map(|s| s.balance)
    }

    /// Clear every active bet. Called on entry to Waiting; stakes of
    /// losing bets were already debited at bet time, so this is the
    /// only settlement work a crash leaves behind.
    pub fn reset_bets(&mut self) {
        for session in self.sessions.values_mut() {
            session.active_bet = None;
        }
    }

    /// Place a wager for `id`. Debits the stake and records the bet
    /// atomically with respect to other calls (the caller holds the
    /// engine lock).
    pub fn place_bet(
        &mut self,
        id: &SessionId,
        amount: u64,
        phase: Phase,
    ) -> Result<BetReceipt, GameError> {
        if amount == 0 {
            return Err(GameError::InvalidAmount);
        }
        if phase != Phase::Waiting {
            return Err(GameError::WrongPhase);
        }

        let session = self.sessions.get_mut(id).ok_or(GameError::SessionNotFound)?;
        if session.active_bet.is_some() {
            return Err(GameError::DuplicateBet);
        }

        let balance = session
            .balance
            .checked_sub(amount)
            .ok_or(GameError::InsufficientFunds)?;

        session.balance = balance;
        session.active_bet = Some(Bet {
            amount,
            cashed_out: false,
        });

        Ok(BetReceipt { amount, balance })
    }

    /// Cash out `id`'s active bet at `multiplier` (hundredths).
    /// Exactly-once: the first call wins, later calls see
    /// [`GameError::NoActiveBet`].
    pub fn cash_out(
        &mut self,
        id: &SessionId,
        multiplier: u64,
        phase: Phase,
    ) -> Result<CashoutReceipt, GameError> {
        if phase != Phase::Running {
            return Err(GameError::WrongPhase);
        }

        let session = self.sessions.get_mut(id).ok_or(GameError::SessionNotFound)?;
        let bet = match session.active_bet.as_mut() {
            Some(bet) if !bet.cashed_out => bet,
            _ => return Err(GameError::NoActiveBet),
        };

        bet.cashed_out = true;
        let win = (bet.amount as u128 * multiplier as u128 / MULT_SCALE as u128) as u64;
        session.balance = session.balance.saturating_add(win);

        Ok(CashoutReceipt {
            multiplier,
            win,
            balance: session.balance,
        })
    }

    /// Number of connected sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshot of all sessions for observability.
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .values()
            .map(|s| SessionSnapshot {
                session_id: hex::encode(s.id),
                balance: s.balance,
                bet_amount: s.active_bet.map(|b| b.amount),
                cashed_out: s.active_bet.map(|b| b.cashed_out).unwrap_or(false),
            })
            .collect()
    }
}
