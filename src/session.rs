//! Sessions: a transport, the runtime requests run on, and the registry of
//! in-flight requests.
//!
//! A running request is owned by its spawned task and listed in the session's
//! task registry under its [`RequestId`] until it reaches a terminal state.
//! Caller handles are not needed to keep it alive. The registry also drives
//! the network activity handler, which is told when the session goes from
//! idle to busy and back.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::config::TransportConfig;
use crate::error::SetupError;
use crate::transport::{ReqwestTransport, Transport};

/// Process-unique request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

type ActivityHandler = Arc<dyn Fn(bool) + Send + Sync>;

/// In-flight requests of a session, by identifier.
#[derive(Default)]
struct TaskRegistry {
    tasks: Mutex<HashMap<RequestId, CancellationToken>>,
    activity: Mutex<Option<ActivityHandler>>,
}

impl TaskRegistry {
    fn tasks(&self) -> MutexGuard<'_, HashMap<RequestId, CancellationToken>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn activity_handler(&self) -> Option<ActivityHandler> {
        self.activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn register(&self, id: RequestId, token: CancellationToken) {
        let became_busy = {
            let mut tasks = self.tasks();
            tasks.insert(id, token);
            tasks.len() == 1
        };
        if became_busy {
            debug!("session became busy");
            if let Some(handler) = self.activity_handler() {
                handler(true);
            }
        }
    }

    fn unregister(&self, id: RequestId) {
        let became_idle = {
            let mut tasks = self.tasks();
            tasks.remove(&id).is_some() && tasks.is_empty()
        };
        if became_idle {
            debug!("session became idle");
            if let Some(handler) = self.activity_handler() {
                handler(false);
            }
        }
    }
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    runtime: Handle,
    registry: TaskRegistry,
}

/// Shared entry point for executing requests.
///
/// Cheap to clone; clones share the transport and registry.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.inner.transport)
            .field("running", &self.running_count())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session running requests on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::NoRuntime`] outside a Tokio runtime.
    pub fn new(transport: impl Transport + 'static) -> Result<Self, SetupError> {
        Ok(Self::with_runtime(Arc::new(transport), Handle::try_current()?))
    }

    /// Creates a session running requests on `runtime`.
    ///
    /// Requests of such a session may be started from any thread, including
    /// dispatcher threads with no runtime of their own.
    #[must_use]
    pub fn with_runtime(transport: Arc<dyn Transport>, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                transport,
                runtime,
                registry: TaskRegistry::default(),
            }),
        }
    }

    /// Creates a session backed by [`ReqwestTransport`] on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] when the configuration is invalid, the client
    /// cannot be built, or no runtime is available.
    #[instrument(level = "debug", skip(config))]
    pub fn reqwest(config: &TransportConfig) -> Result<Self, SetupError> {
        Self::new(ReqwestTransport::new(config)?)
    }

    /// Returns the transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Number of requests currently running.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.inner.registry.tasks().len()
    }

    /// Returns true while at least one request is running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.running_count() > 0
    }

    /// Installs the network activity handler, replacing any previous one.
    ///
    /// The handler receives `true` when the first request starts and `false`
    /// when the last running request ends. It runs on whichever thread caused
    /// the transition, outside any session lock.
    pub fn set_activity_handler(&self, handler: impl Fn(bool) + Send + Sync + 'static) {
        *self
            .inner
            .registry
            .activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    /// Removes the network activity handler.
    pub fn clear_activity_handler(&self) {
        *self
            .inner
            .registry
            .activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Requests cancellation of every running request.
    ///
    /// Requests that have not been started are unaffected.
    #[instrument(level = "debug", skip(self))]
    pub fn cancel_all(&self) {
        let tokens: Vec<CancellationToken> =
            self.inner.registry.tasks().values().cloned().collect();
        debug!(count = tokens.len(), "cancelling running requests");
        for token in tokens {
            token.cancel();
        }
    }

    pub(crate) fn register(&self, id: RequestId, token: CancellationToken) {
        self.inner.registry.register(id, token);
    }

    pub(crate) fn unregister(&self, id: RequestId) {
        self.inner.registry.unregister(id);
    }
}
