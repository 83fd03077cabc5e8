//! Portal ID selection.
//!
//! The account's permission scopes are not known ahead of time, so the
//! configured candidates are probed in priority order. The first one that
//! serves a request is remembered for the rest of the process.

use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const COMPONENT: &str = "PortalIdSelector";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalIdCandidate {
    pub id: String,
    pub confirmed: bool,
    pub permission_errors: u32,
    /// Reason recorded with the most recent denial, if any.
    pub last_denial: Option<String>,
}

impl PortalIdCandidate {
    fn new(id: String) -> Self {
        Self {
            id,
            confirmed: false,
            permission_errors: 0,
            last_denial: None,
        }
    }

    pub fn is_denied(&self) -> bool {
        self.permission_errors > 0
    }
}

/// One denied candidate, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFailure {
    pub portal_id: String,
    pub reason: String,
}

impl fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.portal_id, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    NoCandidates,
    Exhausted { failures: Vec<CandidateFailure> },
}

impl fmt::Display for SelectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorError::NoCandidates => write!(f, "no Portal IDs configured"),
            SelectorError::Exhausted { failures } => {
                write!(f, "every Portal ID was denied")?;
                for failure in failures {
                    write!(f, "; {failure}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for SelectorError {}

#[derive(Debug)]
struct SelectorState {
    candidates: Vec<PortalIdCandidate>,
    current: usize,
    confirmed: Option<usize>,
}

impl SelectorState {
    fn active_index(&self) -> usize {
        self.confirmed.unwrap_or(self.current)
    }

    fn failures(&self) -> Vec<CandidateFailure> {
        self.candidates
            .iter()
            .filter(|candidate| candidate.is_denied())
            .map(|candidate| CandidateFailure {
                portal_id: candidate.id.clone(),
                reason: candidate
                    .last_denial
                    .clone()
                    .unwrap_or_else(|| "permission denied".to_string()),
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct PortalIdSelector {
    state: Mutex<SelectorState>,
}

impl PortalIdSelector {
    pub fn new<I, S>(candidates: I) -> Result<Self, SelectorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<PortalIdCandidate> = Vec::new();
        for id in candidates {
            let id: String = id.into();
            let id = id.trim().to_string();
            if !id.is_empty() && !unique.iter().any(|candidate| candidate.id == id) {
                unique.push(PortalIdCandidate::new(id));
            }
        }
        if unique.is_empty() {
            return Err(SelectorError::NoCandidates);
        }

        Ok(Self {
            state: Mutex::new(SelectorState {
                candidates: unique,
                current: 0,
                confirmed: None,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SelectorState> {
        // Every critical section leaves the state consistent, so a poisoned
        // guard is still usable.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The candidate to use next: the confirmed one if established, otherwise
    /// the candidate under the pointer.
    pub fn current(&self) -> PortalIdCandidate {
        let state = self.lock();
        state.candidates[state.active_index()].clone()
    }

    pub fn candidate_count(&self) -> usize {
        self.lock().candidates.len()
    }

    /// True once every candidate from the pointer onward has been denied and
    /// nothing is confirmed.
    pub fn is_exhausted(&self) -> bool {
        let state = self.lock();
        state.confirmed.is_none() && state.candidates[state.current].is_denied()
    }

    pub fn failures(&self) -> Vec<CandidateFailure> {
        self.lock().failures()
    }

    pub fn candidates(&self) -> Vec<PortalIdCandidate> {
        self.lock().candidates.clone()
    }

    /// Record a permission denial for `failed_id` and return the candidate to
    /// try next.
    ///
    /// A denial for a candidate other than the active one (a stale report
    /// from a concurrent send) is recorded but does not move the pointer. The
    /// pointer never moves backwards and never wraps.
    pub fn advance(
        &self,
        failed_id: &str,
        reason: impl Into<String>,
    ) -> Result<PortalIdCandidate, SelectorError> {
        let mut state = self.lock();
        let reason = reason.into();

        let Some(failed_index) = state
            .candidates
            .iter()
            .position(|candidate| candidate.id == failed_id)
        else {
            let active = state.active_index();
            return Ok(state.candidates[active].clone());
        };

        {
            let candidate = &mut state.candidates[failed_index];
            candidate.permission_errors = candidate.permission_errors.saturating_add(1);
            candidate.last_denial = Some(reason.clone());
            candidate.confirmed = false;
        }
        debug!(
            component = COMPONENT,
            portal_id = %failed_id,
            reason = %reason,
            "Portal ID denied"
        );

        if state.confirmed == Some(failed_index) {
            state.confirmed = None;
            debug!(
                component = COMPONENT,
                portal_id = %failed_id,
                "Confirmed Portal ID lost its permission"
            );
        }

        let active = state.active_index();
        if !state.candidates[active].is_denied() {
            return Ok(state.candidates[active].clone());
        }

        let next = (state.current + 1..state.candidates.len())
            .find(|index| !state.candidates[*index].is_denied());
        match next {
            Some(index) => {
                let previous = state.candidates[state.current].id.clone();
                state.current = index;
                debug!(
                    component = COMPONENT,
                    from = %previous,
                    to = %state.candidates[index].id,
                    "Advanced to next Portal ID"
                );
                Ok(state.candidates[index].clone())
            }
            None => {
                // Park the pointer on the last candidate so `is_exhausted` holds.
                state.current = state.candidates.len() - 1;
                let failures = state.failures();
                debug!(
                    component = COMPONENT,
                    denied = failures.len(),
                    "Portal ID candidates exhausted"
                );
                Err(SelectorError::Exhausted { failures })
            }
        }
    }

    /// Mark `id` as the working candidate for the rest of the process.
    pub fn confirm(&self, id: &str) {
        let mut state = self.lock();
        let Some(index) = state.candidates.iter().position(|candidate| candidate.id == id) else {
            return;
        };
        if state.confirmed == Some(index) {
            return;
        }
        if index < state.current {
            // A late success for a candidate already passed over must not
            // move the pointer back.
            debug!(
                component = COMPONENT,
                portal_id = %id,
                current = %state.candidates[state.current].id,
                "Ignoring late success for a passed-over Portal ID"
            );
            return;
        }
        if let Some(previous) = state.confirmed {
            state.candidates[previous].confirmed = false;
        }
        let candidate = &mut state.candidates[index];
        candidate.confirmed = true;
        candidate.permission_errors = 0;
        candidate.last_denial = None;
        state.confirmed = Some(index);
        if index > state.current {
            state.current = index;
        }
        debug!(component = COMPONENT, portal_id = %id, "Portal ID confirmed");
    }
}
