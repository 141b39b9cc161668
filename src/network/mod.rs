//! Network Layer
//!
//! WebSocket server for real-time multiplayer communication.
//! This layer is **non-deterministic** - all game logic runs through `game/`.

pub mod hub;
pub mod protocol;
pub mod server;

pub use hub::BroadcastHub;
pub use protocol::{ClientMessage, ServerMessage};
pub use server::{run_round_loop, GameServer, GameServerError, ServerConfig};
