//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are serialized as JSON; seed material travels
//! hex-encoded. Multipliers and crash points are hundredths
//! (`250` = 2.50x), amounts are whole currency units.

use serde::{Deserialize, Serialize};

use crate::game::round::Phase;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Place a wager for the upcoming round. Waiting phase only.
    PlaceBet {
        /// Stake in whole currency units.
        amount: u64,
    },

    /// Cash out the active wager at the current multiplier.
    /// Running phase only.
    CashOut,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Joining snapshot, sent once on connect so a mid-round client
    /// can render correct state before the next tick.
    Welcome {
        /// Session id, hex-encoded.
        session_id: String,
        /// Starting (or current) balance.
        balance: u64,
        /// Current engine phase.
        phase: Phase,
        /// Current multiplier in hundredths.
        multiplier: u64,
        /// Seconds left in the Waiting countdown (0 outside Waiting).
        countdown: u32,
    },

    /// Phase change.
    State {
        /// New phase.
        state: Phase,
    },

    /// Waiting countdown tick.
    WaitingTick {
        /// Seconds remaining before the round starts.
        seconds: u32,
    },

    /// A new round opened; the commitment hash is published here,
    /// strictly before the seed is ever revealed.
    RoundStart {
        /// SHA-256 of the server seed, hex-encoded.
        server_seed_hash: String,
        /// Client seed the crash point is derived against.
        client_seed: String,
    },

    /// Multiplier update, broadcast every Running tick.
    Multiplier {
        /// Multiplier in hundredths.
        value: u64,
    },

    /// Bet accepted.
    BetConfirmed {
        /// Stake debited.
        amount: u64,
        /// Balance after the debit.
        balance: u64,
    },

    /// Cashout accepted.
    CashoutConfirmed {
        /// Multiplier at cashout, in hundredths.
        multiplier: u64,
        /// Credited winnings.
        win: u64,
        /// Balance after the credit.
        balance: u64,
    },

    /// The round crashed; the server seed is revealed for auditing.
    Crash {
        /// Crash point in hundredths.
        crash_point: u64,
        /// Revealed server seed, hex-encoded.
        server_seed: String,
    },

    /// Recoverable error, sent only to the originating client.
    Error {
        /// Human-readable message.
        message: String,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time in milliseconds since the Unix epoch.
        server_time: u64,
    },

    /// Server is shutting down.
    Shutdown {
        /// Reason string.
        reason: String,
    },
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_json_roundtrip() {
        let msg = ClientMessage::PlaceBet { amount: 200 };
        let json = msg.to_json().unwrap();
        assert!(json.contains("place_bet"));

        match ClientMessage::from_json(&json).unwrap() {
            ClientMessage::PlaceBet { amount } => assert_eq!(amount, 200),
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_cash_out_has_no_payload() {
        let parsed = ClientMessage::from_json(r#"{"type":"cash_out"}"#).unwrap();
        assert!(matches!(parsed, ClientMessage::CashOut));
    }

    #[test]
    fn test_malformed_client_message_rejected() {
        assert!(ClientMessage::from_json("not json").is_err());
        assert!(ClientMessage::from_json(r#"{"type":"launch_missiles"}"#).is_err());
        // Negative amounts do not parse into a u64 stake.
        assert!(ClientMessage::from_json(r#"{"type":"place_bet","amount":-5}"#).is_err());
    }

    #[test]
    fn test_server_message_json_roundtrip() {
        let msg = ServerMessage::CashoutConfirmed {
            multiplier: 250,
            win: 500,
            balance: 1300,
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("cashout_confirmed"));

        match ServerMessage::from_json(&json).unwrap() {
            ServerMessage::CashoutConfirmed {
                multiplier,
                win,
                balance,
            } => {
                assert_eq!(multiplier, 250);
                assert_eq!(win, 500);
                assert_eq!(balance, 1300);
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_phase_names_on_the_wire() {
        let msg = ServerMessage::State {
            state: Phase::Running,
        };
        assert!(msg.to_json().unwrap().contains("\"running\""));
    }

    #[test]
    fn test_crash_carries_hex_seed() {
        let msg = ServerMessage::Crash {
            crash_point: 459,
            server_seed: hex::encode([0x02u8; 32]),
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("0202"));
        let _ = ServerMessage::from_json(&json).unwrap();
    }

    #[test]
    fn test_welcome_roundtrip() {
        let msg = ServerMessage::Welcome {
            session_id: hex::encode([7u8; 16]),
            balance: 1000,
            phase: Phase::Waiting,
            multiplier: 100,
            countdown: 4,
        };
        let json = msg.to_json().unwrap();
        let parsed = ServerMessage::from_json(&json).unwrap();
        assert!(matches!(parsed, ServerMessage::Welcome { countdown: 4, .. }));
    }
}
