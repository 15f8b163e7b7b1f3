//! Request groups: a set of requests tracked as one unit.
//!
//! A [`RequestGroup`] is running while at least one member has not reached
//! a terminal state, whether that member has started yet or not. It collects
//! the errors its members complete with. Members can be added at any time,
//! including from a member's own completion, which is how paginated walks
//! keep a group running from one page to the next.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, instrument};

use crate::error::NetworkError;
use crate::request::{Ended, Listener, Request, RequestState};
use crate::session::RequestId;

/// Group running state changes, as seen by the observer.
#[derive(Debug, Clone)]
pub enum GroupEvent {
    /// A member was added to a group with no pending members.
    Started,
    /// The last pending member ended. `error` aggregates the members'
    /// errors like [`RequestGroup::error`].
    Finished { error: Option<NetworkError> },
}

type Observer = Arc<dyn Fn(&GroupEvent) + Send + Sync>;

/// Pending members keyed by request id, and the errors of the current run.
#[derive(Default)]
struct GroupState {
    members: HashMap<RequestId, Request>,
    errors: Vec<NetworkError>,
}

impl GroupState {
    /// Tracks `request`; a group going from empty to busy starts a new run.
    fn insert(&mut self, request: Request) -> Option<GroupEvent> {
        let starting = self.members.is_empty();
        self.members.insert(request.id(), request);
        if starting {
            self.errors.clear();
            Some(GroupEvent::Started)
        } else {
            None
        }
    }

    /// Forgets `id`, recording its error. The last member out ends the run.
    fn remove(&mut self, id: RequestId, error: Option<&NetworkError>) -> Option<GroupEvent> {
        self.members.remove(&id)?;
        if let Some(error) = error {
            self.errors.push(error.clone());
        }
        self.members.is_empty().then(|| GroupEvent::Finished {
            error: NetworkError::aggregate(self.errors.clone()),
        })
    }
}

struct GroupInner {
    state: Mutex<GroupState>,
    observer: Option<Observer>,
}

impl GroupInner {
    fn state(&self) -> MutexGuard<'_, GroupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: Option<GroupEvent>) {
        if let (Some(event), Some(observer)) = (event, &self.observer) {
            debug!(?event, "group state changed");
            observer(&event);
        }
    }

    fn on_ended(&self, id: RequestId, ended: &Ended) {
        let event = self.state().remove(id, ended.error.as_ref());
        self.emit(event);
    }
}

/// Tracks a set of requests as a unit.
///
/// Cheap to clone; clones share the same members and errors.
#[derive(Clone)]
pub struct RequestGroup {
    inner: Arc<GroupInner>,
}

impl Default for RequestGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state();
        f.debug_struct("RequestGroup")
            .field("active", &state.members.len())
            .field("errors", &state.errors.len())
            .finish_non_exhaustive()
    }
}

impl RequestGroup {
    /// Creates an empty group without observer.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates an empty group reporting running state changes to `observer`.
    ///
    /// The observer runs outside the group lock, on the thread that caused
    /// the change, and may add or cancel members. Events from transitions
    /// racing on different threads may reach the observer out of order.
    #[must_use]
    pub fn with_observer(observer: impl Fn(&GroupEvent) + Send + Sync + 'static) -> Self {
        Self::build(Some(Arc::new(observer)))
    }

    fn build(observer: Option<Observer>) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                state: Mutex::new(GroupState::default()),
                observer,
            }),
        }
    }

    /// Adds `request` to the group.
    ///
    /// Idle and running requests both count as active until they end.
    /// Returns `false` when the request is already a member or has already
    /// ended.
    #[instrument(level = "debug", skip_all, fields(request_id = %request.id()))]
    pub fn add(&self, request: &Request) -> bool {
        let event = {
            let mut state = self.inner.state();
            if state.members.contains_key(&request.id()) {
                debug!("request already in group");
                return false;
            }

            let group = Arc::downgrade(&self.inner);
            let listener: Listener = Arc::new(move |id, ended: &Ended| {
                if let Some(group) = Weak::upgrade(&group) {
                    group.on_ended(id, ended);
                }
            });

            if request.observe(listener).is_terminal() {
                debug!("request already ended; not added");
                return false;
            }
            state.insert(request.clone())
        };
        self.inner.emit(event);
        true
    }

    /// Returns true while at least one member has not reached a terminal
    /// state.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.inner.state().members.is_empty()
    }

    /// Number of members that have not reached a terminal state.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.state().members.len()
    }

    /// Aggregated error: `None`, the single error, or
    /// [`NetworkError::Multiple`] in completion order.
    #[must_use]
    pub fn error(&self) -> Option<NetworkError> {
        NetworkError::aggregate(self.errors())
    }

    /// Errors collected so far, in completion order.
    #[must_use]
    pub fn errors(&self) -> Vec<NetworkError> {
        self.inner.state().errors.clone()
    }

    /// Appends an error found by the caller, e.g. while mapping a body.
    pub fn report_error(&self, error: NetworkError) {
        self.inner.state().errors.push(error);
    }

    /// Cancels every member.
    #[instrument(level = "debug", skip(self))]
    pub fn cancel(&self) {
        let members: Vec<Request> = self.inner.state().members.values().cloned().collect();
        debug!(count = members.len(), "cancelling group members");
        for request in members {
            request.cancel();
        }
    }

    /// Forgets the errors collected so far.
    pub fn clear_errors(&self) {
        self.inner.state().errors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(status: u16) -> NetworkError {
        NetworkError::http("https://api.example.com", status, None)
    }

    #[test]
    fn test_error_aggregation() {
        let group = RequestGroup::new();
        assert!(group.error().is_none());

        group.report_error(failure(404));
        assert_eq!(group.error().and_then(|e| e.status_code()), Some(404));

        group.report_error(failure(500));
        let error = group.error();
        assert!(matches!(error, Some(NetworkError::Multiple { ref errors }) if errors.len() == 2));
        assert_eq!(group.errors()[1].status_code(), Some(500));

        group.clear_errors();
        assert!(group.errors().is_empty());
        assert!(!group.is_running());
    }

    #[test]
    fn test_unknown_member_end_is_ignored() {
        let group = RequestGroup::new();
        group.inner.on_ended(
            RequestId::next(),
            &Ended {
                error: Some(failure(500)),
            },
        );
        assert!(group.errors().is_empty());
        assert_eq!(group.active_count(), 0);
    }
}
