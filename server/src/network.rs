//! Server network layer: WebSocket connections and the game event loop
//!
//! Connection tasks only decode frames and forward them. Every decoded event,
//! connect and disconnect goes through one channel into [`Server::run`], which
//! is the only place the game state is touched. Two teams racing for the same
//! territory are therefore always evaluated one after the other.

use crate::auth::Credentials;
use crate::client_manager::{Client, ClientManager, ConnectionId, Membership, Outbound};
use crate::config::ServerConfig;
use crate::error::GameError;
use crate::game::GameState;
use crate::utils::unix_now;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ClientEvent, Role, ServerEvent};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;

/// Messages sent from connection tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    Connected {
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<String>,
        reply: oneshot::Sender<Option<ConnectionId>>,
    },
    EventReceived {
        client_id: ConnectionId,
        event: ClientEvent,
    },
    Disconnected {
        client_id: ConnectionId,
    },
    Shutdown,
}

/// Cloneable handle for stopping a running server
#[derive(Debug, Clone)]
pub struct ServerHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        if self.server_tx.send(ServerMessage::Shutdown).is_err() {
            debug!("Server already stopped");
        }
    }
}

/// Capture game server owning the connection registry and the game state
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    clients: ClientManager,
    game_state: GameState,
    credentials: Credentials,
    reap_interval: Duration,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn bind(config: &ServerConfig, credentials: Credentials) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on ws://{}", local_addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            local_addr,
            clients: ClientManager::new(config.max_clients),
            game_state: GameState::new(config),
            credentials,
            reap_interval: config.reap_interval.max(Duration::from_millis(10)),
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    /// Spawns task that accepts connections and starts one task per client
    fn spawn_acceptor(&self, listener: TcpListener) -> JoinHandle<()> {
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        tokio::spawn(handle_connection(stream, addr, server_tx.clone()));
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    /// Main server loop. Returns after [`ServerHandle::shutdown`].
    pub async fn run(mut self) -> io::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "listener already taken"))?;
        let acceptor = self.spawn_acceptor(listener);

        let mut reap_timer = interval(self.reap_interval);
        reap_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the first tick since it fires immediately
        reap_timer.tick().await;

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                        Some(message) => self.handle_message(message),
                    }
                },

                _ = reap_timer.tick() => {
                    let out = self.game_state.reap_orphaned_requests(unix_now());
                    if !out.is_empty() {
                        self.clients.dispatch(&out);
                    }
                },
            }
        }

        acceptor.abort();
        Ok(())
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Connected {
                addr,
                sender,
                reply,
            } => {
                let client_id = self.clients.add_client(addr, sender);
                if reply.send(client_id).is_err() {
                    // The connection task is gone before it learned its id
                    if let Some(id) = client_id {
                        self.clients.remove_client(&id);
                    }
                }
            }
            ServerMessage::EventReceived { client_id, event } => {
                let out = route_event(
                    &mut self.game_state,
                    &mut self.clients,
                    &self.credentials,
                    client_id,
                    event,
                    unix_now(),
                );
                self.clients.dispatch(&out);
            }
            ServerMessage::Disconnected { client_id } => {
                let peer = match self.clients.remove_client(&client_id) {
                    Some(Client {
                        membership: Some(Membership::Team(team_id)),
                        ..
                    }) => self.clients.team_peer(&team_id, client_id),
                    _ => None,
                };
                if let Some(team_id) = self
                    .game_state
                    .connection_closed(client_id, unix_now(), peer)
                {
                    info!("Team {} has no live connection", team_id);
                }
            }
            ServerMessage::Shutdown => {}
        }
    }
}

/// Applies one client event to the game and returns what must be sent.
///
/// Any game error becomes a single `error_message` to the acting connection.
pub fn route_event(
    game: &mut GameState,
    clients: &mut ClientManager,
    credentials: &Credentials,
    client_id: ConnectionId,
    event: ClientEvent,
    now: f64,
) -> Vec<Outbound> {
    debug!("Client {} sent {}", client_id, event.name());

    if event.requires_admin() && !clients.is_admin(client_id) {
        return report(client_id, event.name(), Err(GameError::NotAdmin));
    }

    match event {
        ClientEvent::LoginRequest(request) => {
            vec![Outbound::connection(client_id, credentials.login(&request))]
        }
        ClientEvent::JoinGame(join) => {
            if let Some(Membership::Team(previous)) = clients.membership(client_id).cloned() {
                let peer = clients.team_peer(&previous, client_id);
                game.connection_closed(client_id, now, peer);
            }
            match (join.role, join.team_id) {
                (Role::Admin, _) => {
                    clients.join(client_id, Membership::Admin);
                    game.join_admin(client_id)
                }
                (Role::Team, Some(team_id)) if !team_id.is_empty() => {
                    clients.join(client_id, Membership::Team(team_id.clone()));
                    game.join_team(client_id, &team_id)
                }
                (Role::Team, _) => report(client_id, "join_game", Err(GameError::MissingTeam)),
            }
        }
        ClientEvent::RequestLocationCheck(check) => report(
            client_id,
            "request_location_check",
            ensure_own_team(clients, client_id, &check.team_id)
                .and_then(|()| game.request_location_check(check, now)),
        ),
        ClientEvent::AdminVerifyLocation(verdict) => report(
            client_id,
            "admin_verify_location",
            game.verify_location(verdict),
        ),
        ClientEvent::SubmitTaskResponse(submission) => report(
            client_id,
            "submit_task_response",
            game.submit_task_response(submission),
        ),
        ClientEvent::AdminVerifyTask(verdict) => report(
            client_id,
            "admin_verify_task",
            game.verify_task(verdict, now),
        ),
        ClientEvent::CancelRequest(cancel) => {
            match ensure_own_team(clients, client_id, &cancel.team_id) {
                Ok(()) => game.cancel_request(client_id, &cancel.team_id),
                Err(e) => report(client_id, "cancel_request", Err(e)),
            }
        }
        ClientEvent::AdminClearAllRequests => game.clear_all_requests(),
        ClientEvent::RequestMapUpdate => game.map_snapshot(client_id),
    }
}

/// A connection joined as a team may only act for that team.
fn ensure_own_team(
    clients: &ClientManager,
    client_id: ConnectionId,
    team_id: &str,
) -> Result<(), GameError> {
    match clients.membership(client_id) {
        Some(Membership::Team(joined)) if joined != team_id => {
            Err(GameError::ForeignTeam(team_id.to_string()))
        }
        _ => Ok(()),
    }
}

fn report(
    client_id: ConnectionId,
    action: &str,
    result: Result<Vec<Outbound>, GameError>,
) -> Vec<Outbound> {
    match result {
        Ok(out) => out,
        Err(e) if e.is_silent() => {
            debug!("Ignoring {} from client {}: {}", action, client_id, e);
            Vec::new()
        }
        Err(e) => {
            warn!("Rejected {} from client {}: {}", action, client_id, e);
            vec![Outbound::connection(
                client_id,
                ServerEvent::error(e.user_message()),
            )]
        }
    }
}

/// Per-connection task: decodes inbound frames and drains outbound ones
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let (reply_tx, reply_rx) = oneshot::channel();
    let connected = ServerMessage::Connected {
        addr,
        sender: tx.clone(),
        reply: reply_tx,
    };
    if server_tx.send(connected).is_err() {
        return;
    }

    let client_id = match reply_rx.await {
        Ok(Some(id)) => id,
        _ => {
            if let Ok(frame) = ServerEvent::error("Server full").to_json() {
                let _ = ws_sender.send(Message::Text(frame)).await;
            }
            let _ = ws_sender.close().await;
            return;
        }
    };

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match ClientEvent::from_json(&text) {
                        Ok(event) => {
                            if server_tx.send(ServerMessage::EventReceived { client_id, event }).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Malformed frame from client {}: {}", client_id, e);
                            if let Ok(frame) = ServerEvent::error(format!("Invalid message: {}", e)).to_json() {
                                let _ = tx.send(frame);
                            }
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error from client {}: {}", client_id, e);
                        break;
                    }
                }
            },
            _ = &mut send_task => break,
        }
    }

    let _ = server_tx.send(ServerMessage::Disconnected { client_id });
    send_task.abort();
}
