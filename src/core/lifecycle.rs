use crate::types::{CleanupStatus, SpillError, SpillId, SpillResult};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One entry of a spill's status history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: CleanupStatus,
    pub at: DateTime<Utc>,
}

/// Remediation state of one spill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupState {
    pub spill_id: SpillId,
    pub status: CleanupStatus,
    /// Append-only, non-decreasing in time; starts with the initial Idle entry
    pub history: Vec<StatusEntry>,
}

impl CleanupState {
    fn new(spill_id: SpillId, at: DateTime<Utc>) -> Self {
        Self {
            spill_id,
            status: CleanupStatus::Idle,
            history: vec![StatusEntry {
                status: CleanupStatus::Idle,
                at,
            }],
        }
    }

    pub fn last_changed(&self) -> Option<DateTime<Utc>> {
        self.history.last().map(|e| e.at)
    }
}

/// Operator actions on the cleanup state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupAction {
    /// Idle -> Cleaning
    StartCleaning,
    /// Cleaning -> Done
    MarkDone,
    /// Done -> Idle, operator override
    Reset,
}

impl CleanupAction {
    pub fn name(&self) -> &'static str {
        match self {
            CleanupAction::StartCleaning => "start cleaning",
            CleanupAction::MarkDone => "mark done",
            CleanupAction::Reset => "reset",
        }
    }

    /// Target status, or `None` when the action is illegal from `from`
    pub fn target(&self, from: CleanupStatus) -> Option<CleanupStatus> {
        match (self, from) {
            (CleanupAction::StartCleaning, CleanupStatus::Idle) => Some(CleanupStatus::Cleaning),
            (CleanupAction::MarkDone, CleanupStatus::Cleaning) => Some(CleanupStatus::Done),
            (CleanupAction::Reset, CleanupStatus::Done) => Some(CleanupStatus::Idle),
            _ => None,
        }
    }
}

/// Per-spill cleanup state machines.
///
/// Transitions on one spill are serialized by that spill's lock; the outer map
/// lock is only held to look up or register entries.
#[derive(Debug, Default)]
pub struct CleanupLifecycle {
    states: RwLock<HashMap<SpillId, Arc<Mutex<CleanupState>>>>,
}

impl CleanupLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a spill in Idle. Returns `false` if it was already tracked.
    pub fn register(&self, spill_id: &str) -> bool {
        let mut states = self.states.write();
        if states.contains_key(spill_id) {
            return false;
        }
        states.insert(
            spill_id.to_string(),
            Arc::new(Mutex::new(CleanupState::new(spill_id.to_string(), Utc::now()))),
        );
        log::debug!("Tracking cleanup for spill {}", spill_id);
        true
    }

    pub fn start_cleaning(&self, spill_id: &str) -> SpillResult<CleanupState> {
        self.transition(spill_id, CleanupAction::StartCleaning)
    }

    pub fn mark_done(&self, spill_id: &str) -> SpillResult<CleanupState> {
        self.transition(spill_id, CleanupAction::MarkDone)
    }

    pub fn reset(&self, spill_id: &str) -> SpillResult<CleanupState> {
        self.transition(spill_id, CleanupAction::Reset)
    }

    /// Apply an action; illegal actions leave state and history untouched
    pub fn transition(&self, spill_id: &str, action: CleanupAction) -> SpillResult<CleanupState> {
        let entry = self.entry(spill_id)?;
        let mut state = entry.lock();

        let from = state.status;
        let to = action.target(from).ok_or_else(|| SpillError::InvalidTransition {
            spill_id: spill_id.to_string(),
            from,
            action: action.name(),
        })?;

        let now = Utc::now();
        let at = match state.last_changed() {
            Some(last) if last > now => last,
            _ => now,
        };
        state.status = to;
        state.history.push(StatusEntry { status: to, at });

        if action == CleanupAction::Reset {
            log::warn!(
                "Operator override: spill {} reset from {} to {}",
                spill_id,
                from,
                to
            );
        } else {
            log::info!("Spill {} cleanup status {} -> {}", spill_id, from, to);
        }
        Ok(state.clone())
    }

    pub fn state(&self, spill_id: &str) -> SpillResult<CleanupState> {
        Ok(self.entry(spill_id)?.lock().clone())
    }

    pub fn status(&self, spill_id: &str) -> SpillResult<CleanupStatus> {
        Ok(self.entry(spill_id)?.lock().status)
    }

    /// Snapshot of every tracked spill, ordered by spill id
    pub fn all(&self) -> Vec<CleanupState> {
        let entries: Vec<Arc<Mutex<CleanupState>>> = self.states.read().values().cloned().collect();
        let mut states: Vec<CleanupState> = entries.iter().map(|e| e.lock().clone()).collect();
        states.sort_by(|a, b| a.spill_id.cmp(&b.spill_id));
        states
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, spill_id: &str) -> SpillResult<Arc<Mutex<CleanupState>>> {
        self.states
            .read()
            .get(spill_id)
            .cloned()
            .ok_or_else(|| SpillError::NotFound(format!("spill {}", spill_id)))
    }
}
