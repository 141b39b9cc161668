//! Round Engine
//!
//! The authoritative state machine for the round lifecycle:
//! `Waiting -> Running -> Crashed -> Waiting ...`, forever.
//!
//! All transitions are synchronous, phase-guarded methods so tests can
//! drive the machine without wall-clock delay; the async driver loop in
//! `network::server` owns the actual timers. Every mutation of round,
//! multiplier, and session state goes through one
//! `Arc<RwLock<RoundEngine>>`, which makes a cashout and the crash
//! transition mutually exclusive: a cashout either completes before the
//! crash is externally visible or is rejected as `WrongPhase`.

use rand::{CryptoRng, RngCore};

use crate::fairness::{RoundCommitment, MULT_SCALE};
use crate::game::ledger::{
    BetReceipt, CashoutReceipt, GameError, SessionId, SessionLedger, SessionSnapshot,
};
use crate::game::round::{Phase, Round, RoundId};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Client seed the crash derivation is keyed against. A shared
    /// per-deployment constant.
    pub client_seed: String,
    /// House edge in basis points; 10_000 is mathematically fair.
    pub edge_bps: u64,
    /// Waiting countdown length in seconds.
    pub countdown_secs: u32,
    /// Multiplier tick interval while Running.
    pub tick_interval: std::time::Duration,
    /// Multiplier increase per tick, in hundredths.
    pub multiplier_step: u64,
    /// Pause between crash and the next round.
    pub crash_pause: std::time::Duration,
    /// Balance granted to a newly connected session.
    pub starting_balance: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            client_seed: "crashtide-client-seed-v1".to_string(),
            edge_bps: 9_600,
            countdown_secs: 5,
            tick_interval: std::time::Duration::from_millis(100),
            multiplier_step: 1,
            crash_pause: std::time::Duration::from_secs(3),
            starting_balance: 1_000,
        }
    }
}

/// Public round info broadcast at round start.
#[derive(Debug, Clone)]
pub struct RoundStartInfo {
    /// Round identifier.
    pub round_id: RoundId,
    /// Published commitment hash.
    pub server_seed_hash: [u8; 32],
    /// Client seed in use.
    pub client_seed: String,
}

/// Outcome of one Running tick.
#[derive(Debug, Clone, Copy)]
pub enum TickOutcome {
    /// Multiplier advanced; broadcast the new value.
    Tick {
        /// Current multiplier in hundredths.
        multiplier: u64,
    },
    /// The multiplier reached the crash point; the round is over and
    /// the seed is revealed.
    Crash {
        /// Final multiplier, equal to the crash point.
        crash_point: u64,
        /// Revealed server seed.
        server_seed: [u8; 32],
    },
}

/// State snapshot for a client joining mid-round.
#[derive(Debug, Clone)]
pub struct WelcomeInfo {
    /// The joining session's id.
    pub session_id: SessionId,
    /// The session's balance.
    pub balance: u64,
    /// Current phase.
    pub phase: Phase,
    /// Current multiplier in hundredths.
    pub multiplier: u64,
    /// Seconds left in the Waiting countdown (0 outside Waiting).
    pub countdown: u32,
}

/// The round lifecycle engine.
pub struct RoundEngine {
    /// Engine configuration.
    pub config: EngineConfig,
    phase: Phase,
    round: Option<Round>,
    multiplier: u64,
    countdown_remaining: u32,
    ledger: SessionLedger,
}

impl RoundEngine {
    /// Create an engine with no round open yet. The driver's first
    /// `begin_waiting` starts the cycle.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            phase: Phase::Crashed,
            round: None,
            multiplier: MULT_SCALE,
            countdown_remaining: 0,
            ledger: SessionLedger::new(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Current multiplier in hundredths.
    pub fn multiplier(&self) -> u64 {
        self.multiplier
    }

    /// The open round, if any.
    pub fn current_round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    /// Current round id, if a round is open.
    pub fn round_id(&self) -> Option<RoundId> {
        self.round.as_ref().map(|r| r.id)
    }

    // -------------------------------------------------------------------------
    // Phase transitions (driven by the timer loop)
    // -------------------------------------------------------------------------

    /// Enter Waiting: clear every bet, open a new committed round, arm
    /// the countdown. Returns the public info to broadcast.
    pub fn begin_waiting(&mut self, rng: &mut (impl RngCore + CryptoRng)) -> RoundStartInfo {
        let commitment =
            RoundCommitment::generate(&self.config.client_seed, self.config.edge_bps, rng);
        self.open_round(commitment)
    }

    /// Waiting entry with a caller-supplied seed. Test hook for
    /// deterministic crash points; `begin_waiting` is the production
    /// path.
    pub(crate) fn begin_waiting_with_seed(&mut self, server_seed: [u8; 32]) -> RoundStartInfo {
        let commitment = RoundCommitment::from_seed(
            server_seed,
            &self.config.client_seed,
            self.config.edge_bps,
        );
        self.open_round(commitment)
    }

    fn open_round(&mut self, commitment: RoundCommitment) -> RoundStartInfo {
        self.ledger.reset_bets();
        let round = Round::open(commitment, self.config.client_seed.clone());
        let info = RoundStartInfo {
            round_id: round.id,
            server_seed_hash: round.server_seed_hash(),
            client_seed: round.client_seed.clone(),
        };
        self.round = Some(round);
        self.phase = Phase::Waiting;
        self.multiplier = MULT_SCALE;
        self.countdown_remaining = self.config.countdown_secs;
        info
    }

    /// One second of Waiting countdown. Returns the seconds remaining
    /// to broadcast (a zero means the countdown is over), or `None`
    /// when the engine has already left Waiting, so a stale timer fire
    /// is a no-op.
    pub fn countdown_tick(&mut self) -> Option<u32> {
        if self.phase != Phase::Waiting {
            return None;
        }
        let seconds = self.countdown_remaining;
        self.countdown_remaining = seconds.saturating_sub(1);
        Some(seconds)
    }

    /// Waiting -> Running. Multiplier resets to 1.00x. Returns false
    /// (and does nothing) outside Waiting.
    pub fn begin_running(&mut self) -> bool {
        if self.phase != Phase::Waiting {
            return false;
        }
        self.phase = Phase::Running;
        self.multiplier = MULT_SCALE;
        self.countdown_remaining = 0;
        true
    }

    /// One Running tick: advance the multiplier and check it against
    /// the secret crash point. On the crash the phase flips to Crashed
    /// and the seed is revealed, all under the caller's lock, before
    /// anything is broadcast. `None` outside Running (stale fire).
    pub fn running_tick(&mut self) -> Option<TickOutcome> {
        if self.phase != Phase::Running {
            return None;
        }
        let round = self.round.as_mut()?;

        let next = self.multiplier.saturating_add(self.config.multiplier_step);
        let crash_point = round.crash_point();

        if next >= crash_point {
            // Never display a value past the crash point.
            self.multiplier = crash_point;
            self.phase = Phase::Crashed;
            let server_seed = round.close();
            Some(TickOutcome::Crash {
                crash_point,
                server_seed,
            })
        } else {
            self.multiplier = next;
            Some(TickOutcome::Tick { multiplier: next })
        }
    }

    // -------------------------------------------------------------------------
    // Player actions (arriving from connection tasks)
    // -------------------------------------------------------------------------

    /// Register a session and return its joining snapshot.
    pub fn connect(&mut self, id: SessionId) -> WelcomeInfo {
        let starting_balance = self.config.starting_balance;
        let session = self.ledger.connect(id, starting_balance);
        WelcomeInfo {
            session_id: id,
            balance: session.balance,
            phase: self.phase,
            multiplier: self.multiplier,
            countdown: self.countdown_remaining,
        }
    }

    /// Drop a session.
    pub fn disconnect(&mut self, id: &SessionId) -> bool {
        self.ledger.disconnect(id)
    }

    /// Place a bet; Waiting only.
    pub fn place_bet(&mut self, id: &SessionId, amount: u64) -> Result<BetReceipt, GameError> {
        self.ledger.place_bet(id, amount, self.phase)
    }

    /// Cash out at the current multiplier; Running only.
    pub fn cash_out(&mut self, id: &SessionId) -> Result<CashoutReceipt, GameError> {
        self.ledger.cash_out(id, self.multiplier, self.phase)
    }

    // -------------------------------------------------------------------------
    // Observability
    // -------------------------------------------------------------------------

    /// Number of connected sessions.
    pub fn session_count(&self) -> usize {
        self.ledger.session_count()
    }

    /// Snapshot of all session state.
    pub fn session_snapshot(&self) -> Vec<SessionSnapshot> {
        self.ledger.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // With the default client seed and a 4% edge:
    // [0x02; 32] derives crash point 459, [0x0c; 32] derives 100.
    const SEED_CRASH_459: [u8; 32] = [0x02; 32];
    const SEED_CRASH_100: [u8; 32] = [0x0c; 32];

    fn engine() -> RoundEngine {
        RoundEngine::new(EngineConfig::default())
    }

    fn run_to_crash(engine: &mut RoundEngine) -> (u64, [u8; 32]) {
        for _ in 0..100_000 {
            match engine.running_tick() {
                Some(TickOutcome::Crash {
                    crash_point,
                    server_seed,
                }) => return (crash_point, server_seed),
                Some(TickOutcome::Tick { .. }) => continue,
                None => panic!("engine left Running before crash"),
            }
        }
        panic!("round never crashed");
    }

    #[test]
    fn test_full_cycle_returns_to_waiting() {
        let mut engine = engine();

        let info = engine.begin_waiting_with_seed(SEED_CRASH_459);
        assert_eq!(engine.phase(), Phase::Waiting);
        assert_eq!(info.client_seed, "crashtide-client-seed-v1");

        // Countdown runs out without external input.
        while let Some(seconds) = engine.countdown_tick() {
            if seconds == 0 {
                break;
            }
        }
        assert!(engine.begin_running());
        assert_eq!(engine.multiplier(), 100);

        let (crash_point, seed) = run_to_crash(&mut engine);
        assert_eq!(crash_point, 459);
        assert_eq!(engine.phase(), Phase::Crashed);
        assert_eq!(engine.multiplier(), 459);
        assert!(crate::fairness::verify(
            &seed,
            &info.server_seed_hash,
            &info.client_seed,
            9_600,
            crash_point,
        ));

        // And the cycle repeats.
        engine.begin_waiting_with_seed(SEED_CRASH_459);
        assert_eq!(engine.phase(), Phase::Waiting);
    }

    #[test]
    fn test_bet_lost_on_instant_crash() {
        let mut engine = engine();
        let id = [1; 16];
        engine.connect(id);

        engine.begin_waiting_with_seed(SEED_CRASH_100);
        engine.place_bet(&id, 200).unwrap();
        engine.begin_running();

        // Crash point 1.00x: first tick crashes, no cashout possible.
        let (crash_point, _) = run_to_crash(&mut engine);
        assert_eq!(crash_point, 100);
        assert_eq!(engine.phase(), Phase::Crashed);

        // Stake stays lost into the next round.
        engine.begin_waiting_with_seed(SEED_CRASH_459);
        assert_eq!(engine.connect(id).balance, 800);
    }

    #[test]
    fn test_worked_example_cashout_at_250() {
        let mut engine = engine();
        let id = [1; 16];
        let welcome = engine.connect(id);
        assert_eq!(welcome.balance, 1000);

        engine.begin_waiting_with_seed(SEED_CRASH_459);
        let receipt = engine.place_bet(&id, 200).unwrap();
        assert_eq!(receipt.balance, 800);

        engine.begin_running();
        // 150 ticks of +0.01x: 1.00x -> 2.50x.
        for _ in 0..150 {
            match engine.running_tick() {
                Some(TickOutcome::Tick { .. }) => {}
                other => panic!("unexpected outcome before 2.50x: {:?}", other),
            }
        }
        assert_eq!(engine.multiplier(), 250);

        let receipt = engine.cash_out(&id).unwrap();
        assert_eq!(receipt.multiplier, 250);
        assert_eq!(receipt.win, 500);
        assert_eq!(receipt.balance, 1300);
    }

    #[test]
    fn test_cashout_after_crash_is_wrong_phase() {
        let mut engine = engine();
        let id = [1; 16];
        engine.connect(id);

        engine.begin_waiting_with_seed(SEED_CRASH_100);
        engine.place_bet(&id, 200).unwrap();
        engine.begin_running();
        run_to_crash(&mut engine);

        assert_eq!(engine.cash_out(&id).unwrap_err(), GameError::WrongPhase);
    }

    #[test]
    fn test_bet_rejected_outside_waiting() {
        let mut engine = engine();
        let id = [1; 16];
        engine.connect(id);

        engine.begin_waiting_with_seed(SEED_CRASH_459);
        engine.begin_running();
        assert_eq!(
            engine.place_bet(&id, 100).unwrap_err(),
            GameError::WrongPhase
        );
    }

    #[test]
    fn test_stale_timers_are_noops() {
        let mut engine = engine();
        engine.begin_waiting_with_seed(SEED_CRASH_459);

        // Running tick cannot fire during Waiting.
        assert!(engine.running_tick().is_none());

        engine.begin_running();
        // Countdown tick cannot fire during Running.
        assert!(engine.countdown_tick().is_none());
        // begin_running is idempotent against a duplicate trigger.
        assert!(!engine.begin_running());
    }

    #[test]
    fn test_waiting_clears_previous_bets() {
        let mut engine = engine();
        let id = [1; 16];
        engine.connect(id);

        engine.begin_waiting_with_seed(SEED_CRASH_459);
        engine.place_bet(&id, 100).unwrap();

        engine.begin_waiting_with_seed(SEED_CRASH_459);
        // New round, new bet allowed.
        engine.place_bet(&id, 100).unwrap();
    }

    #[test]
    fn test_welcome_snapshot_during_countdown() {
        let mut engine = engine();
        engine.begin_waiting_with_seed(SEED_CRASH_459);
        engine.countdown_tick();

        let welcome = engine.connect([7; 16]);
        assert_eq!(welcome.phase, Phase::Waiting);
        assert_eq!(welcome.multiplier, 100);
        assert_eq!(welcome.countdown, 4);
    }

    #[test]
    fn test_multiplier_never_exceeds_crash_point() {
        let mut engine = engine();
        engine.begin_waiting_with_seed(SEED_CRASH_459);
        engine.begin_running();

        let (crash_point, _) = run_to_crash(&mut engine);
        assert_eq!(engine.multiplier(), crash_point);
    }
}
