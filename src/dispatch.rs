//! Delivery contexts for completions.
//!
//! Where a completion runs is part of the API, not an accident of the
//! transport. A request built with [`Delivery::TransportThread`] completes on
//! whatever runtime worker finished the transport call. A request built with
//! [`Delivery::On`] hands its completion to a [`Dispatcher`]; page requests
//! always use one. [`SerialDispatcher`] runs jobs in FIFO order on a single
//! dedicated thread, the natural home for UI-adjacent state.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tracing::{debug, warn};

use crate::error::SetupError;

/// A unit of work handed to a dispatcher.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// An execution context completions can be marshalled onto.
pub trait Dispatcher: Send + Sync + fmt::Debug {
    /// Schedules `job`. Jobs from one thread must run in submission order.
    fn dispatch(&self, job: Job);
}

/// Where a request's completion is invoked.
#[derive(Debug, Clone, Default)]
pub enum Delivery {
    /// On the runtime worker that finished the transport call.
    #[default]
    TransportThread,
    /// On the given dispatcher.
    On(Arc<dyn Dispatcher>),
}

impl Delivery {
    /// Runs `job` in this delivery context.
    pub(crate) fn deliver(&self, job: Job) {
        match self {
            Self::TransportThread => job(),
            Self::On(dispatcher) => dispatcher.dispatch(job),
        }
    }
}

/// Runs jobs immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// Runs jobs one at a time, in order, on a dedicated named thread.
///
/// The thread exits once every clone of the dispatcher has been dropped and
/// the queued jobs have run. A panicking job is logged and does not stop the
/// thread.
#[derive(Debug, Clone)]
pub struct SerialDispatcher {
    sender: UnboundedSender<Job>,
    thread_id: ThreadId,
    name: Arc<str>,
}

impl SerialDispatcher {
    /// Spawns the delivery thread.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::Thread`] if the OS refuses to spawn the thread.
    pub fn new(name: &str) -> Result<Self, SetupError> {
        let (sender, mut receiver) = unbounded_channel::<Job>();
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        warn!(dispatcher = %thread_name, "delivery job panicked");
                    }
                }
                debug!(dispatcher = %thread_name, "delivery thread stopped");
            })
            .map_err(SetupError::Thread)?;

        Ok(Self {
            sender,
            thread_id: handle.thread().id(),
            name: Arc::from(name),
        })
    }

    /// Returns true when called from the delivery thread.
    #[must_use]
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Returns the delivery thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Dispatcher for SerialDispatcher {
    fn dispatch(&self, job: Job) {
        if self.sender.send(job).is_err() {
            warn!(dispatcher = %self.name, "delivery thread is gone; dropping job");
        }
    }
}
