//! Wire protocol and data model shared by the capture server and its clients.
//!
//! Every frame on the wire is a JSON object `{"event": <name>, "data": <payload>}`.
//! Inbound frames decode into [`ClientEvent`], outbound frames are produced from
//! [`ServerEvent`]. Payload field names are camelCase.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How long a freshly captured territory stays locked, in seconds.
pub const LOCK_DURATION_SECS: f64 = 30.0 * 60.0;
/// Credential id that logs in with the admin role.
pub const ADMIN_ID: &str = "admin";

pub type TeamId = String;
pub type RequestId = String;

/// Canonical string form of a territory identifier.
///
/// Clients send territory ids either as JSON strings or as numbers. Both are
/// normalized here, once, so `3`, `3.0` and `"3"` name the same territory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TerritoryId(String);

impl TerritoryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TerritoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TerritoryId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<u64> for TerritoryId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

struct TerritoryIdVisitor;

impl<'de> Visitor<'de> for TerritoryIdVisitor {
    type Value = TerritoryId;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a territory id as string or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(TerritoryId::new(v.trim()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(TerritoryId::from(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(TerritoryId(v.to_string()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        if !v.is_finite() {
            return Err(E::custom("territory id must be finite"));
        }
        if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
            Ok(TerritoryId((v as i64).to_string()))
        } else {
            Ok(TerritoryId(v.to_string()))
        }
    }
}

impl<'de> Deserialize<'de> for TerritoryId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TerritoryIdVisitor)
    }
}

/// Accepts `true`/`false` as well as the strings `"true"`/`"false"`.
fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(s) => Ok(s.trim().eq_ignore_ascii_case("true")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Team,
    Admin,
}

/// Ownership and lock state of a single map territory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Territory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<TeamId>,
    /// Unix seconds of the last capture
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<f64>,
    /// Unix seconds until which the territory cannot be challenged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<f64>,
}

impl Territory {
    /// Seconds of lock left at `now`, or `None` when the territory is open.
    pub fn lock_remaining(&self, now: f64) -> Option<f64> {
        self.locked_until
            .map(|until| until - now)
            .filter(|remaining| *remaining > 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Waiting for the admin to verify the reported location
    Pending,
    /// Location approved, team is working on the task
    TaskAssigned,
    /// Team submitted evidence, waiting for the admin verdict
    ReviewPending,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::TaskAssigned => "task_assigned",
            RequestStatus::ReviewPending => "review_pending",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Text,
    /// `content` is a reference to a file stored by the upload endpoint
    Image,
}

/// Evidence a team submits for its assigned task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub response_type: ResponseKind,
    pub content: String,
}

/// A team's in-progress claim on a territory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    pub id: RequestId,
    pub team_id: TeamId,
    pub territory_id: TerritoryId,
    pub status: RequestStatus,
    /// Unix seconds at creation
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<TaskResponse>,
}

impl CaptureRequest {
    pub fn new(id: RequestId, check: &LocationCheck, timestamp: f64) -> Self {
        Self {
            id,
            team_id: check.team_id.clone(),
            territory_id: check.territory_id.clone(),
            status: RequestStatus::Pending,
            timestamp,
            lat: check.lat,
            lng: check.lng,
            task_text: None,
            response: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGame {
    pub role: Role,
    #[serde(default)]
    pub team_id: Option<TeamId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationCheck {
    pub team_id: TeamId,
    pub territory_id: TerritoryId,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyLocation {
    pub req_id: RequestId,
    #[serde(deserialize_with = "lenient_bool")]
    pub approved: bool,
    #[serde(default)]
    pub task_text: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSubmission {
    pub req_id: RequestId,
    pub response_type: ResponseKind,
    #[serde(default)]
    pub content: String,
}

impl TaskSubmission {
    pub fn response(&self) -> TaskResponse {
        TaskResponse {
            response_type: self.response_type,
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyTask {
    pub req_id: RequestId,
    #[serde(deserialize_with = "lenient_bool")]
    pub approved: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub team_id: TeamId,
}

/// Events a connected client can send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    LoginRequest(LoginRequest),
    JoinGame(JoinGame),
    RequestLocationCheck(LocationCheck),
    AdminVerifyLocation(VerifyLocation),
    SubmitTaskResponse(TaskSubmission),
    AdminVerifyTask(VerifyTask),
    CancelRequest(CancelRequest),
    AdminClearAllRequests,
    RequestMapUpdate,
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl ClientEvent {
    /// Decodes one text frame.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let Envelope { event, data } = serde_json::from_str(text)?;

        let event = match event.as_str() {
            "login_request" => ClientEvent::LoginRequest(serde_json::from_value(data)?),
            "join_game" => ClientEvent::JoinGame(serde_json::from_value(data)?),
            "request_location_check" => {
                ClientEvent::RequestLocationCheck(serde_json::from_value(data)?)
            }
            "admin_verify_location" => {
                ClientEvent::AdminVerifyLocation(serde_json::from_value(data)?)
            }
            "submit_task_response" => ClientEvent::SubmitTaskResponse(serde_json::from_value(data)?),
            "admin_verify_task" => ClientEvent::AdminVerifyTask(serde_json::from_value(data)?),
            "cancel_request" => ClientEvent::CancelRequest(serde_json::from_value(data)?),
            "admin_clear_all_requests" => ClientEvent::AdminClearAllRequests,
            "request_map_update" => ClientEvent::RequestMapUpdate,
            other => {
                return Err(<serde_json::Error as de::Error>::custom(format!(
                    "unknown event `{}`",
                    other
                )))
            }
        };

        Ok(event)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::LoginRequest(_) => "login_request",
            ClientEvent::JoinGame(_) => "join_game",
            ClientEvent::RequestLocationCheck(_) => "request_location_check",
            ClientEvent::AdminVerifyLocation(_) => "admin_verify_location",
            ClientEvent::SubmitTaskResponse(_) => "submit_task_response",
            ClientEvent::AdminVerifyTask(_) => "admin_verify_task",
            ClientEvent::CancelRequest(_) => "cancel_request",
            ClientEvent::AdminClearAllRequests => "admin_clear_all_requests",
            ClientEvent::RequestMapUpdate => "request_map_update",
        }
    }

    /// Events that only a connection joined as admin may send.
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            ClientEvent::AdminVerifyLocation(_)
                | ClientEvent::AdminVerifyTask(_)
                | ClientEvent::AdminClearAllRequests
        )
    }
}

// ---------------------------------------------------------------------------
// Outbound payloads
// ---------------------------------------------------------------------------

pub type TerritoryMap = HashMap<TerritoryId, Territory>;
pub type ScoreMap = HashMap<TeamId, f64>;
pub type RequestMap = HashMap<RequestId, CaptureRequest>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<TeamId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A territory together with its id, as sent to the capturing team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerritoryUpdate {
    pub territory_id: TerritoryId,
    #[serde(flatten)]
    pub territory: Territory,
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    LoginResponse(LoginResponse),
    MapUpdate(TerritoryMap),
    InitScores(ScoreMap),
    InitState {
        territories: TerritoryMap,
        requests: RequestMap,
        scores: ScoreMap,
    },
    RestoreRequest(CaptureRequest),
    NewRequest(CaptureRequest),
    RequestUpdated(CaptureRequest),
    TaskResponseReceived(CaptureRequest),
    #[serde(rename_all = "camelCase")]
    LocationVerificationResult {
        req_id: RequestId,
        approved: bool,
        task_text: String,
        territory_id: TerritoryId,
    },
    #[serde(rename_all = "camelCase")]
    TaskResult {
        approved: bool,
        territory_id: TerritoryId,
    },
    #[serde(rename_all = "camelCase")]
    TerritoryCaptured {
        territory_id: TerritoryId,
        owner: TeamId,
    },
    TerritoryUpdate(TerritoryUpdate),
    GameStateUpdate {
        territories: TerritoryMap,
        scores: ScoreMap,
    },
    #[serde(rename_all = "camelCase")]
    RequestRemoved {
        req_id: RequestId,
    },
    RequestsCleared {},
    RequestCancelledConfirmation {},
    ErrorMessage {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::ErrorMessage {
            message: message.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::LoginResponse(_) => "login_response",
            ServerEvent::MapUpdate(_) => "map_update",
            ServerEvent::InitScores(_) => "init_scores",
            ServerEvent::InitState { .. } => "init_state",
            ServerEvent::RestoreRequest(_) => "restore_request",
            ServerEvent::NewRequest(_) => "new_request",
            ServerEvent::RequestUpdated(_) => "request_updated",
            ServerEvent::TaskResponseReceived(_) => "task_response_received",
            ServerEvent::LocationVerificationResult { .. } => "location_verification_result",
            ServerEvent::TaskResult { .. } => "task_result",
            ServerEvent::TerritoryCaptured { .. } => "territory_captured",
            ServerEvent::TerritoryUpdate(_) => "territory_update",
            ServerEvent::GameStateUpdate { .. } => "game_state_update",
            ServerEvent::RequestRemoved { .. } => "request_removed",
            ServerEvent::RequestsCleared {} => "requests_cleared",
            ServerEvent::RequestCancelledConfirmation {} => "request_cancelled_confirmation",
            ServerEvent::ErrorMessage { .. } => "error_message",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
