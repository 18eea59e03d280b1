//! In-memory game state: territories, active requests, scores and team sessions.
//!
//! The store holds data only. Every rule about when a value may change lives
//! in [`crate::territory`] and [`crate::game`].

use crate::client_manager::ConnectionId;
use log::debug;
use shared::{
    CaptureRequest, RequestId, RequestMap, ScoreMap, TeamId, Territory, TerritoryId, TerritoryMap,
};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct StateStore {
    territories: TerritoryMap,
    requests: RequestMap,
    scores: ScoreMap,
    /// Team -> its most recent connection, last write wins
    sessions: HashMap<TeamId, ConnectionId>,
    /// Team -> unix seconds since it has had no session
    offline_since: HashMap<TeamId, f64>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Territories

    pub fn territory(&self, territory_id: &TerritoryId) -> Option<&Territory> {
        self.territories.get(territory_id)
    }

    pub fn territories(&self) -> &TerritoryMap {
        &self.territories
    }

    pub fn set_territory(&mut self, territory_id: TerritoryId, territory: Territory) {
        self.territories.insert(territory_id, territory);
    }

    // Requests

    pub fn request(&self, req_id: &str) -> Option<&CaptureRequest> {
        self.requests.get(req_id)
    }

    pub fn request_mut(&mut self, req_id: &str) -> Option<&mut CaptureRequest> {
        self.requests.get_mut(req_id)
    }

    pub fn requests(&self) -> &RequestMap {
        &self.requests
    }

    pub fn contains_request(&self, req_id: &str) -> bool {
        self.requests.contains_key(req_id)
    }

    pub fn insert_request(&mut self, request: CaptureRequest) {
        self.requests.insert(request.id.clone(), request);
    }

    pub fn remove_request(&mut self, req_id: &str) -> Option<CaptureRequest> {
        self.requests.remove(req_id)
    }

    /// Drops every active request, returning how many there were.
    pub fn clear_requests(&mut self) -> usize {
        let count = self.requests.len();
        self.requests.clear();
        count
    }

    pub fn request_for_team(&self, team_id: &str) -> Option<&CaptureRequest> {
        self.requests.values().find(|req| req.team_id == team_id)
    }

    /// IDs of the requests targeting `territory_id`, sorted.
    pub fn requests_for_territory(&self, territory_id: &TerritoryId) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = self
            .requests
            .values()
            .filter(|req| &req.territory_id == territory_id)
            .map(|req| req.id.clone())
            .collect();
        ids.sort();
        ids
    }

    // Scores

    pub fn scores(&self) -> &ScoreMap {
        &self.scores
    }

    pub fn score(&self, team_id: &str) -> f64 {
        self.scores.get(team_id).copied().unwrap_or(0.0)
    }

    /// Adds ownership seconds to a team. Negative or non-finite amounts are ignored.
    pub fn credit_score(&mut self, team_id: &str, seconds: f64) -> f64 {
        let total = self.scores.entry(team_id.to_string()).or_insert(0.0);
        if seconds.is_finite() && seconds > 0.0 {
            *total += seconds;
        }
        *total
    }

    // Sessions

    /// Binds a team to a connection. Returns the connection it replaced.
    pub fn bind_session(&mut self, team_id: &str, conn: ConnectionId) -> Option<ConnectionId> {
        self.offline_since.remove(team_id);
        self.sessions.insert(team_id.to_string(), conn)
    }

    pub fn session(&self, team_id: &str) -> Option<ConnectionId> {
        self.sessions.get(team_id).copied()
    }

    /// Forgets the team whose current session is `conn` and marks it offline.
    ///
    /// A connection that was already superseded by a newer one leaves the
    /// session untouched.
    pub fn unbind_connection(&mut self, conn: ConnectionId, now: f64) -> Option<TeamId> {
        let team_id = self.team_of_connection(conn)?;

        self.sessions.remove(&team_id);
        self.offline_since.insert(team_id.clone(), now);
        debug!("Team {} is offline since {:.0}", team_id, now);
        Some(team_id)
    }

    /// Moves the team session held by `conn` over to `to`. The team stays online.
    pub fn hand_over_session(&mut self, conn: ConnectionId, to: ConnectionId) -> Option<TeamId> {
        let team_id = self.team_of_connection(conn)?;
        self.sessions.insert(team_id.clone(), to);
        Some(team_id)
    }

    fn team_of_connection(&self, conn: ConnectionId) -> Option<TeamId> {
        self.sessions
            .iter()
            .find(|(_, bound)| **bound == conn)
            .map(|(team, _)| team.clone())
    }

    /// Teams that have been offline for at least `timeout` seconds, sorted.
    pub fn offline_teams(&self, now: f64, timeout: f64) -> Vec<TeamId> {
        let mut teams: Vec<TeamId> = self
            .offline_since
            .iter()
            .filter(|(_, since)| now - **since >= timeout)
            .map(|(team, _)| team.clone())
            .collect();
        teams.sort();
        teams
    }
}
