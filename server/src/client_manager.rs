//! Connection registry and room routing for the capture server
//!
//! This module tracks every open connection together with the room it joined:
//! - A team room reaches exactly the connections joined as that team
//! - The admin room reaches every connection joined as admin
//! - Everyone reaches every open connection, joined or not
//!
//! Game logic never talks to connections directly. It returns [`Outbound`]
//! events addressed to a [`Recipient`] and the client manager resolves the
//! address into connections and pushes the serialized frame to each one.

use log::{debug, error, info, warn};
use shared::{ServerEvent, TeamId};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Server-assigned connection identifier
pub type ConnectionId = u32;

/// Room a connection joined with `join_game`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    Team(TeamId),
    Admin,
}

/// Address of an outbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Connection(ConnectionId),
    Team(TeamId),
    Admins,
    Everyone,
}

/// An event produced by the game, together with who must receive it
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Recipient,
    pub event: ServerEvent,
}

impl Outbound {
    pub fn connection(id: ConnectionId, event: ServerEvent) -> Self {
        Self {
            to: Recipient::Connection(id),
            event,
        }
    }

    pub fn team(team_id: impl Into<TeamId>, event: ServerEvent) -> Self {
        Self {
            to: Recipient::Team(team_id.into()),
            event,
        }
    }

    pub fn admins(event: ServerEvent) -> Self {
        Self {
            to: Recipient::Admins,
            event,
        }
    }

    pub fn everyone(event: ServerEvent) -> Self {
        Self {
            to: Recipient::Everyone,
            event,
        }
    }
}

/// A connected client and its outbound frame queue
#[derive(Debug)]
pub struct Client {
    /// Unique connection identifier assigned by the server
    pub id: ConnectionId,
    /// Remote address, for logging
    pub addr: SocketAddr,
    /// Room joined with `join_game`, if any
    pub membership: Option<Membership>,
    /// Serialized frames waiting for the connection's writer task
    sender: mpsc::UnboundedSender<String>,
}

impl Client {
    pub fn new(id: ConnectionId, addr: SocketAddr, sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id,
            addr,
            membership: None,
            sender,
        }
    }

    /// Queues a frame. Returns false when the writer task is gone.
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }

    pub fn is_admin(&self) -> bool {
        self.membership == Some(Membership::Admin)
    }

    pub fn is_in_team(&self, team_id: &str) -> bool {
        matches!(&self.membership, Some(Membership::Team(team)) if team == team_id)
    }

    fn matches(&self, recipient: &Recipient) -> bool {
        match recipient {
            Recipient::Connection(id) => self.id == *id,
            Recipient::Team(team_id) => self.is_in_team(team_id),
            Recipient::Admins => self.is_admin(),
            Recipient::Everyone => true,
        }
    }
}

/// Manages all open connections and delivers events to rooms
///
/// Delivery is fire-and-forget: a connection whose queue is closed is logged
/// and skipped, it never fails the operation that produced the event.
pub struct ClientManager {
    /// Open connections indexed by their ID
    clients: HashMap<ConnectionId, Client>,
    /// Next available ID for new connections
    next_client_id: ConnectionId,
    /// Maximum number of concurrent connections allowed
    max_clients: usize,
}

impl ClientManager {
    /// Creates an empty registry. Connection IDs start from 1.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a new connection
    ///
    /// Returns None if the server is at capacity.
    pub fn add_client(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<String>,
    ) -> Option<ConnectionId> {
        if self.clients.len() >= self.max_clients {
            warn!("Rejecting connection from {}: server full", addr);
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients
            .insert(client_id, Client::new(client_id, addr, sender));

        Some(client_id)
    }

    /// Removes a connection, dropping it from every room
    pub fn remove_client(&mut self, client_id: &ConnectionId) -> Option<Client> {
        let client = self.clients.remove(client_id)?;
        info!("Client {} disconnected", client.id);
        Some(client)
    }

    /// Puts a connection into a room, leaving any room it was in before
    pub fn join(&mut self, client_id: ConnectionId, membership: Membership) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                info!("Client {} joined as {:?}", client_id, membership);
                client.membership = Some(membership);
                true
            }
            None => false,
        }
    }

    pub fn membership(&self, client_id: ConnectionId) -> Option<&Membership> {
        self.clients.get(&client_id)?.membership.as_ref()
    }

    pub fn is_admin(&self, client_id: ConnectionId) -> bool {
        self.clients
            .get(&client_id)
            .map(Client::is_admin)
            .unwrap_or(false)
    }

    /// Another open connection in `team_id`'s room besides `except`
    pub fn team_peer(&self, team_id: &str, except: ConnectionId) -> Option<ConnectionId> {
        self.resolve(&Recipient::Team(team_id.to_string()))
            .into_iter()
            .find(|id| *id != except)
    }

    /// Resolves an address into the connections it currently reaches
    pub fn resolve(&self, recipient: &Recipient) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .clients
            .values()
            .filter(|client| client.matches(recipient))
            .map(|client| client.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Serializes and delivers each event in order
    ///
    /// Returns the number of frames queued.
    pub fn dispatch(&self, outbound: &[Outbound]) -> usize {
        let mut delivered = 0;

        for message in outbound {
            let frame = match message.event.to_json() {
                Ok(frame) => frame,
                Err(e) => {
                    error!("Failed to serialize {}: {}", message.event.name(), e);
                    continue;
                }
            };

            for client_id in self.resolve(&message.to) {
                if let Some(client) = self.clients.get(&client_id) {
                    if client.send(&frame) {
                        delivered += 1;
                    } else {
                        warn!(
                            "Dropping {} for client {}: connection closed",
                            message.event.name(),
                            client_id
                        );
                    }
                }
            }

            debug!("Sent {} to {:?}", message.event.name(), message.to);
        }

        delivered
    }

    /// Returns the number of open connections
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
