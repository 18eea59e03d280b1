//! Shared-secret credential table for team and admin logins.

use crate::error::GameError;
use log::{info, warn};
use serde::Deserialize;
use shared::{LoginRequest, LoginResponse, Role, ServerEvent, TeamId, ADMIN_ID};
use std::collections::HashMap;
use std::path::Path;

/// Team id -> password. The `admin` entry logs in with the admin role.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Credentials {
    passwords: HashMap<TeamId, String>,
}

impl Credentials {
    /// Parses a JSON object such as `{"red": "secret", "admin": "hunter2"}`.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let credentials = Self::from_json(&text)?;
        info!(
            "Loaded {} credentials from {}",
            credentials.len(),
            path.as_ref().display()
        );
        Ok(credentials)
    }

    pub fn len(&self) -> usize {
        self.passwords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passwords.is_empty()
    }

    pub fn verify(&self, team_id: &str, password: &str) -> Result<Role, GameError> {
        match self.passwords.get(team_id) {
            Some(expected) if expected == password => {
                if team_id == ADMIN_ID {
                    Ok(Role::Admin)
                } else {
                    Ok(Role::Team)
                }
            }
            _ => Err(GameError::AuthFailure),
        }
    }

    /// Answers a `login_request`.
    pub fn login(&self, request: &LoginRequest) -> ServerEvent {
        let response = match self.verify(&request.team_id, &request.password) {
            Ok(role) => {
                info!("{} logged in as {:?}", request.team_id, role);
                LoginResponse {
                    success: true,
                    team_id: Some(request.team_id.clone()),
                    role: Some(role),
                    message: None,
                }
            }
            Err(e) => {
                warn!("Failed login for {:?}", request.team_id);
                LoginResponse {
                    success: false,
                    team_id: None,
                    role: None,
                    message: Some(e.user_message()),
                }
            }
        };
        ServerEvent::LoginResponse(response)
    }
}
