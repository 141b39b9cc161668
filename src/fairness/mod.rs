//! Provably-fair round commitment.
//!
//! The server commits to each round's outcome before it starts by
//! publishing `SHA256(server_seed)`. The crash point is a pure function
//! of `(server_seed, client_seed, edge_bps)`, so once the seed is
//! revealed after the crash, anyone can recompute the outcome and check
//! it against the hash that was published up front.

pub mod commitment;

pub use commitment::{
    derive_crash_point, hash_server_seed, verify, RoundCommitment, FAIR_EDGE_BPS, MULT_SCALE,
};
