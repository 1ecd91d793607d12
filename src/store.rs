use serde::Serialize;
use thiserror::Error;

use crate::profile::DisplayProfile;
use crate::view::{SortKey, ViewState};

pub type CycleId = u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Status {
    #[default]
    Idle,
    Processing { cycle: CycleId },
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("an enrichment cycle is already in flight")]
    Busy,
    #[error("no identifiers to process")]
    NoIdentifiers,
}

/// Session state for one dashboard. Records are only ever replaced as a
/// whole set; a result for a cycle that is no longer current is dropped.
#[derive(Debug, Default)]
pub struct Dashboard {
    status: Status,
    next_cycle: CycleId,
    identifiers: Vec<String>,
    profiles: Vec<DisplayProfile>,
    view: ViewState,
    last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    #[serde(flatten)]
    pub status: Status,
    pub identifiers: usize,
    pub profiles: usize,
    pub last_error: Option<String>,
    pub view: ViewState,
}

impl Dashboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    pub fn profiles(&self) -> &[DisplayProfile] {
        &self.profiles
    }

    pub fn view_state(&self) -> &ViewState {
        &self.view
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Replace the queued identifiers. Refused while a cycle is in flight.
    pub fn set_upload(&mut self, identifiers: Vec<String>) -> Result<(), TransitionError> {
        if self.is_processing() {
            return Err(TransitionError::Busy);
        }
        self.identifiers = identifiers;
        self.last_error = None;
        Ok(())
    }

    /// Start a cycle for `identifiers`, or for the queued upload when `None`.
    /// Returns the cycle id and the identifiers to submit.
    pub fn begin_processing(
        &mut self,
        identifiers: Option<Vec<String>>,
    ) -> Result<(CycleId, Vec<String>), TransitionError> {
        if self.is_processing() {
            return Err(TransitionError::Busy);
        }
        let ids = identifiers.unwrap_or_else(|| self.identifiers.clone());
        if ids.is_empty() {
            return Err(TransitionError::NoIdentifiers);
        }

        self.identifiers = ids;
        self.next_cycle += 1;
        let cycle = self.next_cycle;
        self.status = Status::Processing { cycle };
        self.last_error = None;
        Ok((cycle, self.identifiers.clone()))
    }

    /// Install a reconciled record set. Returns false for a stale cycle.
    pub fn set_results(&mut self, cycle: CycleId, profiles: Vec<DisplayProfile>) -> bool {
        if !self.is_current(cycle) {
            return false;
        }
        self.profiles = profiles;
        self.status = Status::Completed;
        true
    }

    /// End a cycle without results; the displayed records stay as they were.
    pub fn fail(&mut self, cycle: CycleId, message: impl Into<String>) -> bool {
        if !self.is_current(cycle) {
            return false;
        }
        self.status = Status::Idle;
        self.last_error = Some(message.into());
        true
    }

    /// Abandon the in-flight cycle, if any. Returns its id.
    pub fn cancel(&mut self) -> Option<CycleId> {
        match self.status {
            Status::Processing { cycle } => {
                self.status = Status::Idle;
                self.last_error = Some("processing cancelled".to_string());
                Some(cycle)
            }
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        let next_cycle = self.next_cycle;
        *self = Self {
            next_cycle,
            ..Self::default()
        };
    }

    pub fn set_sort(&mut self, key: SortKey) {
        self.view.select_sort(key);
    }

    pub fn set_filter(&mut self, term: impl Into<String>) {
        self.view.set_search(term);
    }

    pub fn dismiss_error(&mut self) {
        self.last_error = None;
    }

    pub fn view(&self) -> Vec<&DisplayProfile> {
        self.view.apply(&self.profiles)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.status,
            identifiers: self.identifiers.len(),
            profiles: self.profiles.len(),
            last_error: self.last_error.clone(),
            view: self.view.clone(),
        }
    }

    fn is_processing(&self) -> bool {
        matches!(self.status, Status::Processing { .. })
    }

    fn is_current(&self, cycle: CycleId) -> bool {
        self.status == Status::Processing { cycle }
    }
}
