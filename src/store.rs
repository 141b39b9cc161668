//! Persistence Collaborator
//!
//! Outbound queue decoupling round timing from storage latency.
//! The engine and connection tasks push [`StoreCommand`]s into an mpsc
//! channel; a dedicated task drains it into a [`RoundStore`]. Store
//! failures are logged and never fed back into game state: the
//! in-memory ledger is authoritative within a round's lifetime.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::game::ledger::SessionId;
use crate::game::round::RoundId;

/// Queue depth for the store channel. Senders use `try_send`; if the
/// store falls this far behind, records are dropped, not awaited.
pub const STORE_CHANNEL_CAPACITY: usize = 256;

/// Full round record persisted at round open. The store is a trusted
/// collaborator and receives the seed before the reveal.
#[derive(Debug, Clone)]
pub struct RoundRecord {
    /// Round identifier.
    pub round_id: RoundId,
    /// Secret server seed.
    pub server_seed: [u8; 32],
    /// Published commitment hash.
    pub server_seed_hash: [u8; 32],
    /// Client seed in use.
    pub client_seed: String,
    /// Derived crash point in hundredths.
    pub crash_point: u64,
    /// When the round opened.
    pub started_at: DateTime<Utc>,
}

/// Advisory persistence commands.
#[derive(Debug, Clone)]
pub enum StoreCommand {
    /// A round opened.
    RoundOpened(RoundRecord),
    /// A round crashed.
    RoundClosed {
        /// Round identifier.
        round_id: RoundId,
        /// When it crashed.
        ended_at: DateTime<Utc>,
    },
    /// A bet was accepted.
    BetPlaced {
        /// Round the bet belongs to.
        round_id: RoundId,
        /// Betting session.
        session_id: SessionId,
        /// Stake.
        amount: u64,
        /// Balance after the debit.
        balance: u64,
    },
    /// A cashout was accepted.
    CashedOut {
        /// Round the bet belonged to.
        round_id: RoundId,
        /// Cashing session.
        session_id: SessionId,
        /// Multiplier at cashout, in hundredths.
        multiplier: u64,
        /// Credited winnings.
        win: u64,
        /// Balance after the credit.
        balance: u64,
    },
}

/// Store failure. Always recoverable from the engine's perspective.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The external store rejected or could not take the write.
    #[error("persistence unavailable: {0}")]
    Unavailable(String),
}

/// External round/bet storage interface.
///
/// Implementations must not block for long: the drain task is the only
/// caller, but a wedged store still delays its own queue.
pub trait RoundStore: Send + Sync + 'static {
    /// Apply one persistence command.
    fn apply(&self, command: &StoreCommand) -> Result<(), StoreError>;
}

/// Store that writes records to the log. The in-tree default; a real
/// deployment swaps in a database-backed implementation.
#[derive(Debug, Default)]
pub struct TracingStore;

impl RoundStore for TracingStore {
    fn apply(&self, command: &StoreCommand) -> Result<(), StoreError> {
        match command {
            StoreCommand::RoundOpened(record) => {
                info!(
                    round = %hex::encode(&record.round_id[..4]),
                    hash = %hex::encode(record.server_seed_hash),
                    crash_point = record.crash_point,
                    "round opened"
                );
            }
            StoreCommand::RoundClosed { round_id, ended_at } => {
                info!(round = %hex::encode(&round_id[..4]), %ended_at, "round closed");
            }
            StoreCommand::BetPlaced {
                round_id,
                session_id,
                amount,
                balance,
            } => {
                info!(
                    round = %hex::encode(&round_id[..4]),
                    session = %hex::encode(&session_id[..4]),
                    amount,
                    balance,
                    "bet placed"
                );
            }
            StoreCommand::CashedOut {
                round_id,
                session_id,
                multiplier,
                win,
                balance,
            } => {
                info!(
                    round = %hex::encode(&round_id[..4]),
                    session = %hex::encode(&session_id[..4]),
                    multiplier,
                    win,
                    balance,
                    "cashed out"
                );
            }
        }
        Ok(())
    }
}

/// Spawn the drain task for `store`.
///
/// Returns the sender half; producers use `try_send` so persistence
/// can never delay the round loop.
pub fn spawn_store_task(
    store: impl RoundStore,
) -> (mpsc::Sender<StoreCommand>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<StoreCommand>(STORE_CHANNEL_CAPACITY);

    let handle = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            if let Err(e) = store.apply(&command) {
                // The round proceeds on schedule regardless.
                warn!("persistence failure (ignored): {}", e);
            }
        }
    });

    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingStore {
        applied: Arc<AtomicUsize>,
        fail: bool,
    }

    impl RoundStore for CountingStore {
        fn apply(&self, _command: &StoreCommand) -> Result<(), StoreError> {
            self.applied.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(StoreError::Unavailable("store down".into()))
            } else {
                Ok(())
            }
        }
    }

    fn closed_command() -> StoreCommand {
        StoreCommand::RoundClosed {
            round_id: [1; 16],
            ended_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_commands_reach_the_store() {
        let applied = Arc::new(AtomicUsize::new(0));
        let (tx, handle) = spawn_store_task(CountingStore {
            applied: applied.clone(),
            fail: false,
        });

        tx.try_send(closed_command()).unwrap();
        tx.try_send(closed_command()).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(applied.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_store_failure_does_not_kill_the_task() {
        let applied = Arc::new(AtomicUsize::new(0));
        let (tx, handle) = spawn_store_task(CountingStore {
            applied: applied.clone(),
            fail: true,
        });

        tx.try_send(closed_command()).unwrap();
        tx.try_send(closed_command()).unwrap();
        drop(tx);
        handle.await.unwrap();

        // Both commands were attempted despite the first failing.
        assert_eq!(applied.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_tracing_store_accepts_all_commands() {
        let store = TracingStore;
        store.apply(&closed_command()).unwrap();
        store
            .apply(&StoreCommand::BetPlaced {
                round_id: [1; 16],
                session_id: [2; 16],
                amount: 200,
                balance: 800,
            })
            .unwrap();
    }
}
