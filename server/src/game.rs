//! Capture request lifecycle and conflict resolution.
//!
//! `GameState` is owned by the network loop and mutated by one event at a
//! time. Each operation validates first and mutates last, so an `Err` leaves
//! the state untouched. On success it returns the addressed events that
//! describe the committed change, in the order clients must see them.

use crate::client_manager::{ConnectionId, Outbound};
use crate::config::ServerConfig;
use crate::error::GameError;
use crate::store::StateStore;
use crate::territory::TerritoryManager;
use crate::utils::generate_request_id;
use log::{debug, info, warn};
use shared::{
    CaptureRequest, LocationCheck, RequestId, RequestStatus, ServerEvent, TaskSubmission, TeamId,
    TerritoryId, TerritoryUpdate, VerifyLocation, VerifyTask,
};

pub struct GameState {
    store: StateStore,
    territories: TerritoryManager,
    /// Seconds a team may stay offline before its request is reaped
    orphan_timeout: Option<f64>,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new(&ServerConfig::default())
    }
}

impl GameState {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            store: StateStore::new(),
            territories: TerritoryManager::new(config.lock_duration),
            orphan_timeout: config.orphan_timeout.map(|t| t.as_secs_f64()),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Binds the team's session and sends it the map, scores and its active request.
    pub fn join_team(&mut self, conn: ConnectionId, team_id: &str) -> Vec<Outbound> {
        if let Some(previous) = self.store.bind_session(team_id, conn) {
            if previous != conn {
                debug!(
                    "Team {} moved from connection {} to {}",
                    team_id, previous, conn
                );
            }
        }
        info!("Team {} joined on connection {}", team_id, conn);

        let mut out = vec![
            Outbound::connection(conn, ServerEvent::MapUpdate(self.store.territories().clone())),
            Outbound::connection(conn, ServerEvent::InitScores(self.store.scores().clone())),
        ];
        if let Some(request) = self.store.request_for_team(team_id) {
            out.push(Outbound::connection(
                conn,
                ServerEvent::RestoreRequest(request.clone()),
            ));
        }
        out
    }

    pub fn join_admin(&self, conn: ConnectionId) -> Vec<Outbound> {
        info!("Admin joined on connection {}", conn);
        vec![Outbound::connection(
            conn,
            ServerEvent::InitState {
                territories: self.store.territories().clone(),
                requests: self.store.requests().clone(),
                scores: self.store.scores().clone(),
            },
        )]
    }

    pub fn map_snapshot(&self, conn: ConnectionId) -> Vec<Outbound> {
        vec![Outbound::connection(
            conn,
            ServerEvent::MapUpdate(self.store.territories().clone()),
        )]
    }

    /// Drops the team session held by `conn`, if it is still the current one.
    ///
    /// `peer` is another open connection in the same team room. When there is
    /// one the session moves to it and the team stays online. Returns the team
    /// that is left without any live connection.
    pub fn connection_closed(
        &mut self,
        conn: ConnectionId,
        now: f64,
        peer: Option<ConnectionId>,
    ) -> Option<TeamId> {
        if let Some(peer) = peer {
            if let Some(team_id) = self.store.hand_over_session(conn, peer) {
                debug!(
                    "Team {} session moved from connection {} to {}",
                    team_id, conn, peer
                );
            }
            return None;
        }

        let team_id = self.store.unbind_connection(conn, now)?;
        if let Some(request) = self.store.request_for_team(&team_id) {
            info!(
                "Team {} went offline with request {} still {}",
                team_id, request.id, request.status
            );
        }
        Some(team_id)
    }

    /// Opens a PENDING request if the territory is unlocked and the team is idle.
    pub fn request_location_check(
        &mut self,
        check: LocationCheck,
        now: f64,
    ) -> Result<Vec<Outbound>, GameError> {
        self.territories
            .ensure_unlocked(&self.store, &check.territory_id, now)?;

        if self.store.request_for_team(&check.team_id).is_some() {
            return Err(GameError::DuplicateRequest(check.team_id));
        }

        let request = CaptureRequest::new(self.next_request_id(), &check, now);
        info!(
            "Team {} requested territory {} ({})",
            request.team_id, request.territory_id, request.id
        );
        self.store.insert_request(request.clone());

        Ok(vec![Outbound::admins(ServerEvent::NewRequest(request))])
    }

    /// Admin verdict on a reported location.
    pub fn verify_location(&mut self, verdict: VerifyLocation) -> Result<Vec<Outbound>, GameError> {
        let request = self.expect_status(&verdict.req_id, RequestStatus::Pending)?;
        let team_id = request.team_id.clone();
        let territory_id = request.territory_id.clone();

        let result = Outbound::team(
            team_id.clone(),
            ServerEvent::LocationVerificationResult {
                req_id: verdict.req_id.clone(),
                approved: verdict.approved,
                task_text: verdict.task_text.clone(),
                territory_id: territory_id.clone(),
            },
        );

        if !verdict.approved {
            self.store.remove_request(&verdict.req_id);
            info!("Location of request {} rejected", verdict.req_id);
            return Ok(vec![
                result,
                Outbound::admins(ServerEvent::RequestRemoved {
                    req_id: verdict.req_id,
                }),
            ]);
        }

        if let Some(holder) = self.task_holder(&territory_id, &verdict.req_id) {
            return Err(GameError::TerritoryContested {
                territory_id,
                holder,
            });
        }

        let request = self
            .store
            .request_mut(&verdict.req_id)
            .ok_or_else(|| GameError::Internal(format!("request {} vanished", verdict.req_id)))?;
        request.status = RequestStatus::TaskAssigned;
        request.task_text = Some(verdict.task_text);
        let updated = request.clone();

        info!(
            "Request {} approved, task assigned to {}",
            updated.id, team_id
        );
        Ok(vec![
            result,
            Outbound::admins(ServerEvent::RequestUpdated(updated)),
        ])
    }

    /// Attaches the team's task evidence and hands it to the admins for review.
    pub fn submit_task_response(
        &mut self,
        submission: TaskSubmission,
    ) -> Result<Vec<Outbound>, GameError> {
        self.expect_status(&submission.req_id, RequestStatus::TaskAssigned)?;

        let request = self
            .store
            .request_mut(&submission.req_id)
            .ok_or_else(|| GameError::RequestNotFound(submission.req_id.clone()))?;
        request.response = Some(submission.response());
        request.status = RequestStatus::ReviewPending;
        let updated = request.clone();

        info!("Team {} submitted task for {}", updated.team_id, updated.id);
        Ok(vec![Outbound::admins(ServerEvent::TaskResponseReceived(
            updated,
        ))])
    }

    /// Admin verdict on the submitted task. Approval captures the territory.
    ///
    /// If the capture itself fails the request stays in review and the error
    /// goes back to the admin.
    pub fn verify_task(&mut self, verdict: VerifyTask, now: f64) -> Result<Vec<Outbound>, GameError> {
        let request = self.expect_status(&verdict.req_id, RequestStatus::ReviewPending)?;
        let team_id = request.team_id.clone();
        let territory_id = request.territory_id.clone();

        if !verdict.approved {
            self.store.remove_request(&verdict.req_id);
            info!("Task of request {} rejected", verdict.req_id);
            return Ok(vec![
                Outbound::team(
                    team_id,
                    ServerEvent::TaskResult {
                        approved: false,
                        territory_id,
                    },
                ),
                Outbound::admins(ServerEvent::RequestRemoved {
                    req_id: verdict.req_id,
                }),
            ]);
        }

        let territory =
            self.territories
                .try_capture(&mut self.store, &territory_id, &team_id, now)?;
        self.store.remove_request(&verdict.req_id);

        let mut out = vec![
            Outbound::admins(ServerEvent::TerritoryCaptured {
                territory_id: territory_id.clone(),
                owner: team_id.clone(),
            }),
            Outbound::team(
                team_id.clone(),
                ServerEvent::TerritoryUpdate(TerritoryUpdate {
                    territory_id: territory_id.clone(),
                    territory,
                }),
            ),
            Outbound::everyone(ServerEvent::GameStateUpdate {
                territories: self.store.territories().clone(),
                scores: self.store.scores().clone(),
            }),
        ];
        out.extend(self.resolve_conflicts(&territory_id, &verdict.req_id));
        out.push(Outbound::team(
            team_id,
            ServerEvent::TaskResult {
                approved: true,
                territory_id,
            },
        ));
        out.push(Outbound::admins(ServerEvent::RequestRemoved {
            req_id: verdict.req_id,
        }));

        Ok(out)
    }

    /// Cancels the team's active request. Always confirms to the caller.
    pub fn cancel_request(&mut self, conn: ConnectionId, team_id: &str) -> Vec<Outbound> {
        let mut out = Vec::new();

        let req_id = self.store.request_for_team(team_id).map(|r| r.id.clone());
        match req_id {
            Some(req_id) => {
                self.store.remove_request(&req_id);
                info!("Request {} cancelled by team {}", req_id, team_id);
                out.push(Outbound::admins(ServerEvent::RequestRemoved { req_id }));
            }
            None => debug!("Cancel from team {} with no active request", team_id),
        }

        out.push(Outbound::connection(
            conn,
            ServerEvent::RequestCancelledConfirmation {},
        ));
        out
    }

    /// Administrative reset of every active request.
    pub fn clear_all_requests(&mut self) -> Vec<Outbound> {
        let cleared = self.store.clear_requests();
        warn!("Admin cleared {} active requests", cleared);
        vec![Outbound::admins(ServerEvent::RequestsCleared {})]
    }

    /// Deletes requests of teams that have been offline past the timeout.
    pub fn reap_orphaned_requests(&mut self, now: f64) -> Vec<Outbound> {
        let Some(timeout) = self.orphan_timeout else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for team_id in self.store.offline_teams(now, timeout) {
            let Some(req_id) = self.store.request_for_team(&team_id).map(|r| r.id.clone()) else {
                continue;
            };
            self.store.remove_request(&req_id);
            warn!(
                "Reaped request {} of team {} after {:.0}s offline",
                req_id, team_id, timeout
            );
            out.push(Outbound::admins(ServerEvent::RequestRemoved { req_id }));
        }
        out
    }

    /// Cancels every other request on a territory that was just captured.
    fn resolve_conflicts(&mut self, territory_id: &TerritoryId, winner: &str) -> Vec<Outbound> {
        let mut out = Vec::new();

        for req_id in self.store.requests_for_territory(territory_id) {
            if req_id == winner {
                continue;
            }
            let Some(loser) = self.store.remove_request(&req_id) else {
                continue;
            };

            info!(
                "Request {} of team {} cancelled, territory {} was taken",
                req_id, loser.team_id, territory_id
            );
            out.push(Outbound::team(
                loser.team_id.clone(),
                ServerEvent::error(format!(
                    "Territory {} was just captured by another team! Your request was cancelled.",
                    territory_id
                )),
            ));
            out.push(Outbound::team(
                loser.team_id,
                ServerEvent::RequestCancelledConfirmation {},
            ));
            out.push(Outbound::admins(ServerEvent::RequestRemoved { req_id }));
        }

        out
    }

    fn expect_status(
        &self,
        req_id: &str,
        expected: RequestStatus,
    ) -> Result<&CaptureRequest, GameError> {
        let request = self
            .store
            .request(req_id)
            .ok_or_else(|| GameError::RequestNotFound(req_id.to_string()))?;

        if request.status != expected {
            return Err(GameError::InvalidTransition {
                req_id: req_id.to_string(),
                expected,
                actual: request.status,
            });
        }
        Ok(request)
    }

    /// Another request on the territory that is already past location approval.
    fn task_holder(&self, territory_id: &TerritoryId, except: &str) -> Option<RequestId> {
        self.store
            .requests_for_territory(territory_id)
            .into_iter()
            .filter(|id| id != except)
            .find(|id| {
                self.store
                    .request(id)
                    .map(|r| r.status != RequestStatus::Pending)
                    .unwrap_or(false)
            })
    }

    fn next_request_id(&self) -> RequestId {
        loop {
            let id = generate_request_id();
            if !self.store.contains_request(&id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_manager::Recipient;
    use assert_approx_eq::assert_approx_eq;
    use shared::{ResponseKind, Territory};
    use std::time::Duration;

    const NOW: f64 = 1_700_000_000.0;
    const TEAM_CONN: ConnectionId = 1;

    fn check(team: &str, territory: &str) -> LocationCheck {
        LocationCheck {
            team_id: team.to_string(),
            territory_id: TerritoryId::from(territory),
            lat: Some(50.08),
            lng: Some(14.42),
        }
    }

    fn names(out: &[Outbound]) -> Vec<&'static str> {
        out.iter().map(|o| o.event.name()).collect()
    }

    fn request_id(game: &GameState, team: &str) -> RequestId {
        game.store.request_for_team(team).unwrap().id.clone()
    }

    fn approve_location(game: &mut GameState, req_id: &str, task: &str) -> Vec<Outbound> {
        game.verify_location(VerifyLocation {
            req_id: req_id.to_string(),
            approved: true,
            task_text: task.to_string(),
        })
        .unwrap()
    }

    fn submit(game: &mut GameState, req_id: &str, content: &str) -> Vec<Outbound> {
        game.submit_task_response(TaskSubmission {
            req_id: req_id.to_string(),
            response_type: ResponseKind::Text,
            content: content.to_string(),
        })
        .unwrap()
    }

    fn verify_task(
        game: &mut GameState,
        req_id: &str,
        approved: bool,
        now: f64,
    ) -> Result<Vec<Outbound>, GameError> {
        game.verify_task(
            VerifyTask {
                req_id: req_id.to_string(),
                approved,
            },
            now,
        )
    }

    /// Drives a request from creation to review_pending.
    fn under_review(game: &mut GameState, team: &str, territory: &str, now: f64) -> RequestId {
        game.request_location_check(check(team, territory), now)
            .unwrap();
        let req_id = request_id(game, team);
        approve_location(game, &req_id, "find flag");
        submit(game, &req_id, "done");
        req_id
    }

    #[test]
    fn test_full_capture_flow() {
        let mut game = GameState::default();

        let out = game.request_location_check(check("red", "3"), NOW).unwrap();
        assert_eq!(names(&out), vec!["new_request"]);
        assert_eq!(out[0].to, Recipient::Admins);
        let req_id = request_id(&game, "red");
        assert_eq!(req_id.len(), 8);
        assert_eq!(game.store.request(&req_id).unwrap().status, RequestStatus::Pending);

        let out = approve_location(&mut game, &req_id, "find flag");
        assert_eq!(
            names(&out),
            vec!["location_verification_result", "request_updated"]
        );
        assert_eq!(out[0].to, Recipient::Team("red".to_string()));
        match &out[0].event {
            ServerEvent::LocationVerificationResult {
                approved, task_text, ..
            } => {
                assert!(approved);
                assert_eq!(task_text, "find flag");
            }
            other => panic!("Unexpected event {:?}", other),
        }
        let request = game.store.request(&req_id).unwrap();
        assert_eq!(request.status, RequestStatus::TaskAssigned);
        assert_eq!(request.task_text.as_deref(), Some("find flag"));

        let out = submit(&mut game, &req_id, "done");
        assert_eq!(names(&out), vec!["task_response_received"]);
        assert_eq!(out[0].to, Recipient::Admins);
        assert_eq!(
            game.store.request(&req_id).unwrap().status,
            RequestStatus::ReviewPending
        );

        let out = verify_task(&mut game, &req_id, true, NOW + 60.0).unwrap();
        assert_eq!(
            names(&out),
            vec![
                "territory_captured",
                "territory_update",
                "game_state_update",
                "task_result",
                "request_removed"
            ]
        );
        assert_eq!(out[2].to, Recipient::Everyone);

        let territory = game.store.territory(&TerritoryId::from("3")).unwrap();
        assert_eq!(territory.owner.as_deref(), Some("red"));
        assert_approx_eq!(territory.locked_until.unwrap(), NOW + 60.0 + 1800.0);
        assert!(game.store.requests().is_empty());
    }

    #[test]
    fn test_locked_territory_rejects_request() {
        let mut game = GameState::default();
        game.store.set_territory(
            TerritoryId::from("3"),
            Territory {
                owner: Some("red".to_string()),
                captured_at: Some(NOW - 1200.0),
                locked_until: Some(NOW + 600.0),
            },
        );

        let err = game
            .request_location_check(check("blue", "3"), NOW)
            .unwrap_err();

        match err {
            GameError::TerritoryLocked { remaining_secs, .. } => {
                assert_approx_eq!(remaining_secs, 600.0)
            }
            other => panic!("Unexpected error {:?}", other),
        }
        assert!(game.store.requests().is_empty());
    }

    #[test]
    fn test_request_on_just_captured_territory_is_rejected() {
        let mut game = GameState::default();
        let red = under_review(&mut game, "red", "5", NOW);
        verify_task(&mut game, &red, true, NOW + 10.0).unwrap();

        let err = game
            .request_location_check(check("blue", "5"), NOW + 20.0)
            .unwrap_err();
        assert!(matches!(err, GameError::TerritoryLocked { .. }));
        assert!(game.store.request_for_team("blue").is_none());

        // Lock expiry reopens the territory
        assert!(game
            .request_location_check(check("blue", "5"), NOW + 10.0 + 1800.0)
            .is_ok());
    }

    #[test]
    fn test_one_active_request_per_team() {
        let mut game = GameState::default();
        game.request_location_check(check("red", "1"), NOW).unwrap();

        let err = game
            .request_location_check(check("red", "2"), NOW)
            .unwrap_err();

        assert_eq!(err, GameError::DuplicateRequest("red".to_string()));
        assert_eq!(game.store.requests().len(), 1);
    }

    #[test]
    fn test_capture_cancels_rival_requests() {
        let mut game = GameState::default();
        let red = under_review(&mut game, "red", "7", NOW);
        game.request_location_check(check("blue", "7"), NOW).unwrap();
        game.request_location_check(check("green", "8"), NOW).unwrap();
        let blue = request_id(&game, "blue");

        let out = verify_task(&mut game, &red, true, NOW + 30.0).unwrap();

        assert!(game.store.request(&blue).is_none());
        assert!(game.store.request_for_team("green").is_some());

        let to_blue: Vec<_> = out
            .iter()
            .filter(|o| o.to == Recipient::Team("blue".to_string()))
            .map(|o| o.event.name())
            .collect();
        assert_eq!(to_blue, vec!["error_message", "request_cancelled_confirmation"]);

        let removed: Vec<_> = out
            .iter()
            .filter_map(|o| match &o.event {
                ServerEvent::RequestRemoved { req_id } => Some(req_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(removed, vec![blue, red]);
    }

    #[test]
    fn test_second_task_assignment_on_territory_is_refused() {
        let mut game = GameState::default();
        game.request_location_check(check("red", "4"), NOW).unwrap();
        game.request_location_check(check("blue", "4"), NOW).unwrap();
        let red = request_id(&game, "red");
        let blue = request_id(&game, "blue");
        approve_location(&mut game, &red, "sing");

        let err = game
            .verify_location(VerifyLocation {
                req_id: blue.clone(),
                approved: true,
                task_text: "dance".to_string(),
            })
            .unwrap_err();

        assert_eq!(
            err,
            GameError::TerritoryContested {
                territory_id: TerritoryId::from("4"),
                holder: red,
            }
        );
        assert_eq!(
            game.store.request(&blue).unwrap().status,
            RequestStatus::Pending
        );
    }

    #[test]
    fn test_location_rejection_removes_request() {
        let mut game = GameState::default();
        game.request_location_check(check("red", "1"), NOW).unwrap();
        let req_id = request_id(&game, "red");

        let out = game
            .verify_location(VerifyLocation {
                req_id: req_id.clone(),
                approved: false,
                task_text: String::new(),
            })
            .unwrap();

        assert_eq!(
            names(&out),
            vec!["location_verification_result", "request_removed"]
        );
        assert!(game.store.request(&req_id).is_none());
    }

    #[test]
    fn test_task_rejection_leaves_territory_alone() {
        let mut game = GameState::default();
        let req_id = under_review(&mut game, "red", "2", NOW);

        let out = verify_task(&mut game, &req_id, false, NOW).unwrap();

        assert_eq!(names(&out), vec!["task_result", "request_removed"]);
        assert!(game.store.territory(&TerritoryId::from("2")).is_none());
        assert!(game.store.requests().is_empty());
    }

    #[test]
    fn test_failed_capture_keeps_request_for_review() {
        let mut game = GameState::default();
        let req_id = under_review(&mut game, "red", "6", NOW);
        game.store.set_territory(
            TerritoryId::from("6"),
            Territory {
                owner: Some("blue".to_string()),
                captured_at: Some(NOW),
                locked_until: Some(NOW + 900.0),
            },
        );

        let err = verify_task(&mut game, &req_id, true, NOW + 100.0).unwrap_err();

        assert!(matches!(err, GameError::TerritoryLocked { .. }));
        assert_eq!(
            game.store.request(&req_id).unwrap().status,
            RequestStatus::ReviewPending
        );
        assert_eq!(
            game.store
                .territory(&TerritoryId::from("6"))
                .unwrap()
                .owner
                .as_deref(),
            Some("blue")
        );
    }

    #[test]
    fn test_out_of_order_transitions_are_refused() {
        let mut game = GameState::default();
        game.request_location_check(check("red", "1"), NOW).unwrap();
        let req_id = request_id(&game, "red");

        let err = game
            .submit_task_response(TaskSubmission {
                req_id: req_id.clone(),
                response_type: ResponseKind::Text,
                content: "early".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, GameError::InvalidTransition { .. }));

        let err = verify_task(&mut game, &req_id, true, NOW).unwrap_err();
        assert_eq!(
            err,
            GameError::InvalidTransition {
                req_id: req_id.clone(),
                expected: RequestStatus::ReviewPending,
                actual: RequestStatus::Pending,
            }
        );
        assert!(game.store.territory(&TerritoryId::from("1")).is_none());
    }

    #[test]
    fn test_unknown_request_is_not_found() {
        let mut game = GameState::default();

        let err = verify_task(&mut game, "deadbeef", true, NOW).unwrap_err();

        assert!(err.is_silent());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut game = GameState::default();
        game.request_location_check(check("red", "1"), NOW).unwrap();

        let out = game.cancel_request(TEAM_CONN, "red");
        assert_eq!(
            names(&out),
            vec!["request_removed", "request_cancelled_confirmation"]
        );
        assert_eq!(out[1].to, Recipient::Connection(TEAM_CONN));

        let out = game.cancel_request(TEAM_CONN, "red");
        assert_eq!(names(&out), vec!["request_cancelled_confirmation"]);
        assert!(game.store.requests().is_empty());
    }

    #[test]
    fn test_clear_all_requests() {
        let mut game = GameState::default();
        game.request_location_check(check("red", "1"), NOW).unwrap();
        game.request_location_check(check("blue", "2"), NOW).unwrap();

        let out = game.clear_all_requests();

        assert_eq!(names(&out), vec!["requests_cleared"]);
        assert_eq!(out[0].to, Recipient::Admins);
        assert!(game.store.requests().is_empty());
    }

    #[test]
    fn test_join_team_restores_active_request() {
        let mut game = GameState::default();
        assert_eq!(
            names(&game.join_team(TEAM_CONN, "red")),
            vec!["map_update", "init_scores"]
        );

        game.request_location_check(check("red", "1"), NOW).unwrap();
        let out = game.join_team(2, "red");

        assert_eq!(
            names(&out),
            vec!["map_update", "init_scores", "restore_request"]
        );
        assert!(out.iter().all(|o| o.to == Recipient::Connection(2)));
        assert_eq!(game.store.session("red"), Some(2));
    }

    #[test]
    fn test_join_admin_snapshot() {
        let mut game = GameState::default();
        game.request_location_check(check("red", "1"), NOW).unwrap();

        let out = game.join_admin(9);

        match &out[0].event {
            ServerEvent::InitState { requests, .. } => assert_eq!(requests.len(), 1),
            other => panic!("Unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_orphaned_request_is_reaped() {
        let config = ServerConfig {
            orphan_timeout: Some(Duration::from_secs(60)),
            ..ServerConfig::default()
        };
        let mut game = GameState::new(&config);
        game.join_team(TEAM_CONN, "red");
        game.request_location_check(check("red", "1"), NOW).unwrap();

        assert_eq!(game.connection_closed(TEAM_CONN, NOW, None), Some("red".to_string()));
        assert!(game.reap_orphaned_requests(NOW + 30.0).is_empty());

        let out = game.reap_orphaned_requests(NOW + 60.0);
        assert_eq!(names(&out), vec!["request_removed"]);
        assert!(game.store.requests().is_empty());
    }

    #[test]
    fn test_reconnect_prevents_reaping() {
        let config = ServerConfig {
            orphan_timeout: Some(Duration::from_secs(60)),
            ..ServerConfig::default()
        };
        let mut game = GameState::new(&config);
        game.join_team(TEAM_CONN, "red");
        game.request_location_check(check("red", "1"), NOW).unwrap();
        game.connection_closed(TEAM_CONN, NOW, None);
        game.join_team(2, "red");

        assert!(game.reap_orphaned_requests(NOW + 600.0).is_empty());
        assert!(game.store.request_for_team("red").is_some());
    }

    #[test]
    fn test_request_survives_while_team_has_another_connection() {
        let config = ServerConfig {
            orphan_timeout: Some(Duration::from_secs(60)),
            ..ServerConfig::default()
        };
        let mut game = GameState::new(&config);
        game.join_team(1, "red");
        game.join_team(2, "red");
        game.request_location_check(check("red", "1"), NOW).unwrap();

        // The newest phone closes while the first one is still in the room
        assert_eq!(game.connection_closed(2, NOW, Some(1)), None);
        assert_eq!(game.store.session("red"), Some(1));

        assert!(game.reap_orphaned_requests(NOW + 60.0).is_empty());
        assert!(game.store.request_for_team("red").is_some());

        // Once the last phone is gone the usual timeout applies
        assert_eq!(
            game.connection_closed(1, NOW + 60.0, None),
            Some("red".to_string())
        );
        let out = game.reap_orphaned_requests(NOW + 120.0);
        assert_eq!(names(&out), vec!["request_removed"]);
    }

    #[test]
    fn test_reaping_disabled() {
        let config = ServerConfig {
            orphan_timeout: None,
            ..ServerConfig::default()
        };
        let mut game = GameState::new(&config);
        game.join_team(TEAM_CONN, "red");
        game.request_location_check(check("red", "1"), NOW).unwrap();
        game.connection_closed(TEAM_CONN, NOW, None);

        assert!(game.reap_orphaned_requests(NOW + 1e6).is_empty());
    }

    #[test]
    fn test_scores_accrue_across_recaptures() {
        let mut game = GameState::default();
        let red = under_review(&mut game, "red", "1", NOW);
        verify_task(&mut game, &red, true, NOW).unwrap();

        let later = NOW + 3600.0;
        let blue = under_review(&mut game, "blue", "1", later);
        let out = verify_task(&mut game, &blue, true, later).unwrap();

        assert_approx_eq!(game.store.score("red"), 3600.0);
        match &out[2].event {
            ServerEvent::GameStateUpdate { scores, .. } => {
                assert_approx_eq!(scores["red"], 3600.0)
            }
            other => panic!("Unexpected event {:?}", other),
        }
    }
}
