//! Errors raised by the coordination engine.

use shared::{RequestId, RequestStatus, TeamId, TerritoryId};
use thiserror::Error;

/// Failures of a single game operation.
///
/// An operation returning `Err` has not mutated any game state, so the
/// caller only has to report it to the acting connection.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GameError {
    #[error("invalid team or password")]
    AuthFailure,

    #[error("territory {territory_id} is locked for another {remaining_secs:.0}s")]
    TerritoryLocked {
        territory_id: TerritoryId,
        remaining_secs: f64,
    },

    #[error("team {0} already has an active request")]
    DuplicateRequest(TeamId),

    #[error("request {0} not found")]
    RequestNotFound(RequestId),

    #[error("request {req_id} is {actual}, expected {expected}")]
    InvalidTransition {
        req_id: RequestId,
        expected: RequestStatus,
        actual: RequestStatus,
    },

    #[error("territory {territory_id} already has an assigned task in request {holder}")]
    TerritoryContested {
        territory_id: TerritoryId,
        holder: RequestId,
    },

    #[error("malformed capture timestamp on territory {0}")]
    MalformedScoreInput(TerritoryId),

    #[error("connection is not joined as admin")]
    NotAdmin,

    #[error("teamId is required to join as a team")]
    MissingTeam,

    #[error("connection joined as another team cannot act for team {0}")]
    ForeignTeam(TeamId),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GameError {
    /// Errors that mean "already resolved" and are not reported back.
    pub fn is_silent(&self) -> bool {
        matches!(self, GameError::RequestNotFound(_))
    }

    /// Text shown to the player or admin in an `error_message` event.
    pub fn user_message(&self) -> String {
        match self {
            GameError::AuthFailure => "Wrong team or password".to_string(),
            GameError::TerritoryLocked {
                territory_id,
                remaining_secs,
            } => format!(
                "Territory {} is locked for another {} minutes!",
                territory_id,
                (remaining_secs / 60.0) as u64
            ),
            GameError::DuplicateRequest(_) => {
                "You already have an active request! Cancel it first.".to_string()
            }
            GameError::RequestNotFound(req_id) => format!("Request {} no longer exists", req_id),
            GameError::InvalidTransition { req_id, actual, .. } => {
                format!("Request {} cannot be updated while {}", req_id, actual)
            }
            GameError::TerritoryContested { territory_id, .. } => format!(
                "Another team is already working on a task for territory {}",
                territory_id
            ),
            GameError::NotAdmin => "Only the admin can do that".to_string(),
            GameError::MissingTeam => "Missing team id".to_string(),
            GameError::ForeignTeam(_) => "You can only act for your own team".to_string(),
            GameError::MalformedScoreInput(_) | GameError::Internal(_) => {
                "Server error while processing the request".to_string()
            }
        }
    }
}
