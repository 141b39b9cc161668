//! # Crashtide Game Server
//!
//! Provably-fair multiplayer crash wagering server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CRASHTIDE SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  fairness/       - Commit-reveal crash derivation            │
//! │  └── commitment.rs - Seed hash + HMAC crash point            │
//! │                                                              │
//! │  game/           - Round lifecycle (deterministic per seed)  │
//! │  ├── round.rs    - Round record and phase enum               │
//! │  ├── ledger.rs   - Balances and at-most-one wager            │
//! │  └── engine.rs   - WAITING -> RUNNING -> CRASHED machine     │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── server.rs   - WebSocket server + round driver loop      │
//! │  ├── protocol.rs - Message types                             │
//! │  └── hub.rs      - Best-effort event fan-out                 │
//! │                                                              │
//! │  store.rs        - Advisory persistence queue                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fairness Guarantee
//!
//! Each round's crash point is fixed before the round starts:
//! - the server draws a 256-bit secret seed and publishes its SHA-256
//!   hash at round start;
//! - the crash point is a pure function of
//!   `HMAC-SHA256(key = server_seed, msg = client_seed)`;
//! - the seed is revealed only at the crash, so any observer can
//!   recompute the crash point and check it against the hash that was
//!   published up front.
//!
//! All round, multiplier, and ledger state lives behind a single lock;
//! a cashout and the crash transition can never interleave.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod fairness;
pub mod game;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use fairness::{derive_crash_point, verify, RoundCommitment, FAIR_EDGE_BPS, MULT_SCALE};
pub use game::{
    EngineConfig, GameError, Phase, Round, RoundEngine, SessionId, SessionLedger, TickOutcome,
};
pub use network::{BroadcastHub, ClientMessage, GameServer, ServerConfig, ServerMessage};
pub use store::{RoundStore, StoreCommand, TracingStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
