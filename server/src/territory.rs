//! Capture locks, ownership transfer and score accrual.

use crate::error::GameError;
use crate::store::StateStore;
use log::{info, warn};
use shared::{TeamId, Territory, TerritoryId, LOCK_DURATION_SECS};
use std::time::Duration;

/// Enforces capture locks and moves ownership between teams
#[derive(Debug, Clone)]
pub struct TerritoryManager {
    lock_duration: f64,
}

impl Default for TerritoryManager {
    fn default() -> Self {
        Self {
            lock_duration: LOCK_DURATION_SECS,
        }
    }
}

impl TerritoryManager {
    pub fn new(lock_duration: Duration) -> Self {
        Self {
            lock_duration: lock_duration.as_secs_f64(),
        }
    }

    /// Fails with `TerritoryLocked` while the territory's lock is in the future.
    pub fn ensure_unlocked(
        &self,
        store: &StateStore,
        territory_id: &TerritoryId,
        now: f64,
    ) -> Result<(), GameError> {
        match store.territory(territory_id).and_then(|t| t.lock_remaining(now)) {
            Some(remaining_secs) => Err(GameError::TerritoryLocked {
                territory_id: territory_id.clone(),
                remaining_secs,
            }),
            None => Ok(()),
        }
    }

    /// Gives `territory_id` to `by_team` and locks it.
    ///
    /// The previous owner is credited with the time it held the territory.
    /// Returns the new territory state. On `Err` the store is unchanged.
    pub fn try_capture(
        &self,
        store: &mut StateStore,
        territory_id: &TerritoryId,
        by_team: &str,
        now: f64,
    ) -> Result<Territory, GameError> {
        self.ensure_unlocked(store, territory_id, now)?;

        if let Some(previous) = store.territory(territory_id) {
            match ownership_credit(territory_id, previous, now) {
                Ok(Some((owner, seconds))) => {
                    let total = store.credit_score(&owner, seconds);
                    info!(
                        "Credited {:.1}s to {} for territory {} (total {:.1}s)",
                        seconds, owner, territory_id, total
                    );
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping score credit: {}", e),
            }
        }

        let territory = Territory {
            owner: Some(by_team.to_string()),
            captured_at: Some(now),
            locked_until: Some(now + self.lock_duration),
        };
        store.set_territory(territory_id.clone(), territory.clone());

        info!(
            "Territory {} captured by {}, locked until {:.0}",
            territory_id, by_team, now + self.lock_duration
        );
        Ok(territory)
    }
}

/// Seconds the previous owner earned, if it had a usable capture time.
fn ownership_credit(
    territory_id: &TerritoryId,
    previous: &Territory,
    now: f64,
) -> Result<Option<(TeamId, f64)>, GameError> {
    let Some(owner) = previous.owner.as_ref() else {
        return Ok(None);
    };

    match previous.captured_at {
        Some(captured_at) if captured_at.is_finite() && captured_at <= now => {
            Ok(Some((owner.clone(), now - captured_at)))
        }
        _ => Err(GameError::MalformedScoreInput(territory_id.clone())),
    }
}
