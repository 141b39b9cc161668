//! WebSocket Game Server
//!
//! Async WebSocket server for player connections, plus the round
//! driver loop that owns all timers. Player actions flow from
//! per-connection tasks into the engine; round events flow out through
//! the broadcast hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use rand::rngs::OsRng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::fairness::MULT_SCALE;
use crate::game::engine::{EngineConfig, RoundEngine, TickOutcome};
use crate::game::ledger::{SessionId, SessionSnapshot};
use crate::game::round::Phase;
use crate::network::hub::{BroadcastHub, CLIENT_CHANNEL_CAPACITY};
use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::store::{RoundRecord, StoreCommand};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// The single exclusion domain for all round and session state.
    engine: Arc<RwLock<RoundEngine>>,
    /// Round event fan-out.
    hub: Arc<BroadcastHub>,
    /// Outbound persistence queue.
    store_tx: mpsc::Sender<StoreCommand>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(
        config: ServerConfig,
        engine_config: EngineConfig,
        store_tx: mpsc::Sender<StoreCommand>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            engine: Arc::new(RwLock::new(RoundEngine::new(engine_config))),
            hub: Arc::new(BroadcastHub::new()),
            store_tx,
            shutdown_tx,
        }
    }

    /// Run the server: the round loop plus the accept loop.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server listening on {}", self.config.bind_addr);

        let round_handle = tokio::spawn(run_round_loop(
            self.engine.clone(),
            self.hub.clone(),
            self.store_tx.clone(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.hub.subscriber_count().await >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        round_handle.abort();

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let engine = self.engine.clone();
        let hub = self.hub.clone();
        let store_tx = self.store_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(CLIENT_CHANNEL_CAPACITY);

            let session_id: SessionId = *uuid::Uuid::new_v4().as_bytes();

            // Joining snapshot first, composed under the engine lock,
            // then the live subscription: a mid-round client renders
            // correct state before the next tick reaches it.
            let welcome = {
                let mut engine = engine.write().await;
                engine.connect(session_id)
            };
            let _ = msg_tx
                .send(ServerMessage::Welcome {
                    session_id: hex::encode(welcome.session_id),
                    balance: welcome.balance,
                    phase: welcome.phase,
                    multiplier: welcome.multiplier,
                    countdown: welcome.countdown,
                })
                .await;
            hub.subscribe(session_id, msg_tx.clone()).await;

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::Error {
                                            message: "Invalid message format".to_string(),
                                        }).await;
                                        continue;
                                    }
                                };

                                Self::handle_client_message(
                                    session_id,
                                    client_msg,
                                    &engine,
                                    &store_tx,
                                    &msg_tx,
                                ).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Cleanup
            sender_task.abort();
            hub.unsubscribe(&session_id).await;
            engine.write().await.disconnect(&session_id);

            info!(
                "Session {} ({}) cleaned up",
                hex::encode(&session_id[..4]),
                addr
            );
        });
    }

    /// Handle a client message. Errors go back to the originating
    /// client only; they never touch the round loop or other sessions.
    async fn handle_client_message(
        session_id: SessionId,
        msg: ClientMessage,
        engine: &Arc<RwLock<RoundEngine>>,
        store_tx: &mpsc::Sender<StoreCommand>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match msg {
            ClientMessage::PlaceBet { amount } => {
                let (result, round_id) = {
                    let mut engine = engine.write().await;
                    (engine.place_bet(&session_id, amount), engine.round_id())
                };

                match result {
                    Ok(receipt) => {
                        let _ = sender
                            .send(ServerMessage::BetConfirmed {
                                amount: receipt.amount,
                                balance: receipt.balance,
                            })
                            .await;

                        if let Some(round_id) = round_id {
                            let command = StoreCommand::BetPlaced {
                                round_id,
                                session_id,
                                amount: receipt.amount,
                                balance: receipt.balance,
                            };
                            if store_tx.try_send(command).is_err() {
                                warn!("Store queue full, dropping bet record");
                            }
                        }
                    }
                    Err(e) => {
                        let _ = sender
                            .send(ServerMessage::Error {
                                message: e.to_string(),
                            })
                            .await;
                    }
                }
            }
            ClientMessage::CashOut => {
                let (result, round_id) = {
                    let mut engine = engine.write().await;
                    (engine.cash_out(&session_id), engine.round_id())
                };

                match result {
                    Ok(receipt) => {
                        let _ = sender
                            .send(ServerMessage::CashoutConfirmed {
                                multiplier: receipt.multiplier,
                                win: receipt.win,
                                balance: receipt.balance,
                            })
                            .await;

                        if let Some(round_id) = round_id {
                            let command = StoreCommand::CashedOut {
                                round_id,
                                session_id,
                                multiplier: receipt.multiplier,
                                win: receipt.win,
                                balance: receipt.balance,
                            };
                            if store_tx.try_send(command).is_err() {
                                warn!("Store queue full, dropping cashout record");
                            }
                        }
                    }
                    Err(e) => {
                        let _ = sender
                            .send(ServerMessage::Error {
                                message: e.to_string(),
                            })
                            .await;
                    }
                }
            }
            ClientMessage::Ping { timestamp } => {
                let _ = sender
                    .send(ServerMessage::Pong {
                        timestamp,
                        server_time: unix_millis(),
                    })
                    .await;
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Active connection count.
    pub async fn connection_count(&self) -> usize {
        self.hub.subscriber_count().await
    }

    /// Connected session count in the ledger.
    pub async fn session_count(&self) -> usize {
        self.engine.read().await.session_count()
    }

    /// Snapshot of all session state for observability.
    pub async fn session_snapshot(&self) -> Vec<SessionSnapshot> {
        self.engine.read().await.session_snapshot()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Run the round lifecycle forever.
///
/// This loop owns every timer. Each phase's timer lives only inside
/// its own scope, so exiting a phase drops it and a superseded timer
/// can never fire into the next phase; the engine's phase-guarded tick
/// methods make any stragglers no-ops anyway. No await happens while
/// the engine lock is held.
pub async fn run_round_loop(
    engine: Arc<RwLock<RoundEngine>>,
    hub: Arc<BroadcastHub>,
    store_tx: mpsc::Sender<StoreCommand>,
) {
    loop {
        let config = engine.read().await.config.clone();

        // Phase 1: Waiting. Open a committed round and count down.
        let (start, record) = {
            let mut engine = engine.write().await;
            let start = engine.begin_waiting(&mut OsRng);
            let record = engine.current_round().map(|round| {
                RoundRecord {
                    round_id: round.id,
                    server_seed: round.seed_for_store(),
                    server_seed_hash: round.server_seed_hash(),
                    client_seed: round.client_seed.clone(),
                    crash_point: round.crash_point(),
                    started_at: round.started_at,
                }
            });
            (start, record)
        };

        info!(
            "Round {} waiting, commitment {}",
            hex::encode(&start.round_id[..4]),
            hex::encode(start.server_seed_hash)
        );

        hub.publish(&ServerMessage::State {
            state: Phase::Waiting,
        })
        .await;
        hub.publish(&ServerMessage::RoundStart {
            server_seed_hash: hex::encode(start.server_seed_hash),
            client_seed: start.client_seed.clone(),
        })
        .await;

        if let Some(record) = record {
            if store_tx.try_send(StoreCommand::RoundOpened(record)).is_err() {
                warn!("Store queue full, dropping round-open record");
            }
        }

        loop {
            let seconds = {
                let mut engine = engine.write().await;
                engine.countdown_tick()
            };
            match seconds {
                Some(seconds) if seconds > 0 => {
                    hub.publish(&ServerMessage::WaitingTick { seconds }).await;
                    sleep(std::time::Duration::from_secs(1)).await;
                }
                _ => break,
            }
        }

        // Phase 2: Running. Tick the multiplier until the crash point.
        if !engine.write().await.begin_running() {
            continue;
        }
        hub.publish(&ServerMessage::State {
            state: Phase::Running,
        })
        .await;
        hub.publish(&ServerMessage::Multiplier { value: MULT_SCALE })
            .await;

        let crash = {
            let mut ticker = interval(config.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First interval tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let outcome = {
                    let mut engine = engine.write().await;
                    engine.running_tick()
                };

                match outcome {
                    Some(TickOutcome::Tick { multiplier }) => {
                        hub.publish(&ServerMessage::Multiplier { value: multiplier })
                            .await;
                    }
                    Some(TickOutcome::Crash {
                        crash_point,
                        server_seed,
                    }) => break Some((crash_point, server_seed)),
                    None => break None,
                }
            }
            // Ticker dropped here: no multiplier tick outlives Running.
        };

        // Phase 3: Crashed. Reveal, settle, pause.
        if let Some((crash_point, server_seed)) = crash {
            hub.publish(&ServerMessage::Crash {
                crash_point,
                server_seed: hex::encode(server_seed),
            })
            .await;

            let (round_id, ended_at) = {
                let engine = engine.read().await;
                (
                    engine.round_id(),
                    engine.current_round().and_then(|r| r.ended_at),
                )
            };
            if let (Some(round_id), Some(ended_at)) = (round_id, ended_at) {
                if store_tx
                    .try_send(StoreCommand::RoundClosed { round_id, ended_at })
                    .is_err()
                {
                    warn!("Store queue full, dropping round-close record");
                }
            }

            info!(
                "Round {} crashed at {}.{:02}x",
                hex::encode(&start.round_id[..4]),
                crash_point / MULT_SCALE,
                crash_point % MULT_SCALE
            );
        }

        sleep(config.crash_pause).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_server() -> (GameServer, mpsc::Receiver<StoreCommand>) {
        let (store_tx, store_rx) = mpsc::channel(64);
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        (
            GameServer::new(config, EngineConfig::default(), store_tx),
            store_rx,
        )
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[tokio::test]
    async fn test_server_creation() {
        let (server, _store_rx) = test_server();

        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.session_count().await, 0);
        assert!(server.session_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let (server, _store_rx) = test_server();
        server.shutdown();
        // Should not panic
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_loop_broadcasts_full_cycle() {
        let engine_config = EngineConfig {
            countdown_secs: 1,
            crash_pause: Duration::from_millis(10),
            ..Default::default()
        };
        let engine = Arc::new(RwLock::new(RoundEngine::new(engine_config)));
        let hub = Arc::new(BroadcastHub::new());
        let (store_tx, mut store_rx) = mpsc::channel(64);

        let (tx, mut rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
        hub.subscribe([1; 16], tx).await;

        let loop_handle = tokio::spawn(run_round_loop(engine, hub, store_tx));

        let mut saw_round_start = false;
        let mut saw_running = false;
        let mut crash_point = None;

        // Drain until the first crash; paused time auto-advances.
        for _ in 0..200_000 {
            match rx.recv().await.expect("loop alive") {
                ServerMessage::RoundStart { .. } => saw_round_start = true,
                ServerMessage::State {
                    state: Phase::Running,
                } => {
                    assert!(saw_round_start, "commitment published before Running");
                    saw_running = true;
                }
                ServerMessage::Crash {
                    crash_point: cp, ..
                } => {
                    assert!(saw_running, "Crash only after Running");
                    crash_point = Some(cp);
                    break;
                }
                _ => {}
            }
        }

        let crash_point = crash_point.expect("round crashed");
        assert!(crash_point >= MULT_SCALE);

        // The store saw the round open before it closed.
        let mut opened = false;
        while let Ok(cmd) = store_rx.try_recv() {
            match cmd {
                StoreCommand::RoundOpened(record) => {
                    assert!(record.crash_point >= MULT_SCALE);
                    opened = true;
                }
                StoreCommand::RoundClosed { .. } => {
                    assert!(opened, "round closed before it opened");
                }
                _ => {}
            }
        }
        assert!(opened);

        loop_handle.abort();
    }
}
