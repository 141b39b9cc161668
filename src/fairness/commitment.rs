//! Round Commitment Protocol
//!
//! Commit to the crash point before the round starts.
//! Reveal the server seed at crash time so any observer can verify
//! the outcome was fixed in advance.

use hmac::{Hmac, Mac};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Multiplier scale: multipliers and crash points are expressed in
/// hundredths, so `100` means 1.00x and `250` means 2.50x.
pub const MULT_SCALE: u64 = 100;

/// House edge in basis points that yields a mathematically fair
/// distribution. Values below this shift expected value to the house.
pub const FAIR_EDGE_BPS: u64 = 10_000;

/// Number of MAC prefix bits interpreted as the draw.
const PREFIX_BITS: u32 = 52;

/// A round's fairness commitment.
///
/// The server seed is private; it leaves this struct only through
/// [`RoundCommitment::reveal`], which the engine calls on the
/// Running -> Crashed transition (and through the persistence record,
/// which is a trusted collaborator).
#[derive(Clone)]
pub struct RoundCommitment {
    server_seed: [u8; 32],
    server_seed_hash: [u8; 32],
    crash_point: u64,
}

impl RoundCommitment {
    /// Generate a fresh commitment for a round.
    ///
    /// Draws a 256-bit secret from `rng`, publishes its SHA-256 hash,
    /// and fixes the crash point from the keyed MAC of `client_seed`.
    pub fn generate(client_seed: &str, edge_bps: u64, rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let mut server_seed = [0u8; 32];
        rng.fill_bytes(&mut server_seed);
        Self::from_seed(server_seed, client_seed, edge_bps)
    }

    /// Build a commitment from an explicit server seed.
    ///
    /// Used by [`generate`](Self::generate) and by tests that need a
    /// known crash point.
    pub fn from_seed(server_seed: [u8; 32], client_seed: &str, edge_bps: u64) -> Self {
        Self {
            server_seed,
            server_seed_hash: hash_server_seed(&server_seed),
            crash_point: derive_crash_point(&server_seed, client_seed, edge_bps),
        }
    }

    /// The hash published to all clients at round start.
    pub fn server_seed_hash(&self) -> [u8; 32] {
        self.server_seed_hash
    }

    /// The crash point in hundredths. Secret until the round crashes;
    /// never serialized or broadcast before the reveal.
    pub fn crash_point(&self) -> u64 {
        self.crash_point
    }

    /// Reveal the server seed, consuming the commitment.
    pub fn reveal(self) -> [u8; 32] {
        self.server_seed
    }

    /// Copy of the seed for the persistence record written at round
    /// open. The store is a trusted collaborator; nothing on the
    /// broadcast path goes through here.
    pub(crate) fn seed_for_store(&self) -> [u8; 32] {
        self.server_seed
    }
}

impl std::fmt::Debug for RoundCommitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Seed deliberately omitted.
        f.debug_struct("RoundCommitment")
            .field("server_seed_hash", &hex::encode(self.server_seed_hash))
            .finish_non_exhaustive()
    }
}

/// SHA-256 of the server seed. This is the published commitment.
pub fn hash_server_seed(server_seed: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(server_seed);
    hasher.finalize().into()
}

/// Derive the crash point in hundredths from a seed pair.
///
/// Takes the first 52 bits of `HMAC-SHA256(key = server_seed,
/// msg = client_seed)` as an integer `X` in `[0, 2^52)` and maps it
/// through
///
/// ```text
/// max(1.00, floor(100 * edge * 2^52 / (2^52 - X)) / 100)
/// ```
///
/// where `edge = edge_bps / 10_000`. All arithmetic is u128 integer
/// math, so the result is identical on every platform. With an edge
/// below 1.0 the low end of the distribution collapses to 1.00x, an
/// instant loss.
pub fn derive_crash_point(server_seed: &[u8; 32], client_seed: &str, edge_bps: u64) -> u64 {
    let edge_bps = edge_bps.min(FAIR_EDGE_BPS);

    let mut mac = HmacSha256::new_from_slice(server_seed)
        .expect("HMAC accepts any key length");
    mac.update(client_seed.as_bytes());
    let digest = mac.finalize().into_bytes();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let x = u64::from_be_bytes(prefix) >> (64 - PREFIX_BITS);

    let full = 1u128 << PREFIX_BITS;
    let numerator = MULT_SCALE as u128 * edge_bps as u128 * full;
    let denominator = FAIR_EDGE_BPS as u128 * (full - x as u128);
    let crash = (numerator / denominator) as u64;

    crash.max(MULT_SCALE)
}

/// Verify a revealed round.
///
/// Recomputes the seed hash and the crash point and compares both.
/// Not needed at runtime; any auditor can run this against the values
/// the server published and revealed.
pub fn verify(
    server_seed: &[u8; 32],
    server_seed_hash: &[u8; 32],
    client_seed: &str,
    edge_bps: u64,
    crash_point: u64,
) -> bool {
    hash_server_seed(server_seed) == *server_seed_hash
        && derive_crash_point(server_seed, client_seed, edge_bps) == crash_point
}
