//! Single-threaded executor that owns a set of exchanges.
use std::{fmt, future::Future, rc::Rc};

use tokio::{
    runtime::Runtime,
    task::{JoinHandle, LocalSet},
};

/// Handle to a thread-affine task set.
///
/// Every exchange is bound to exactly one event loop; asynchronous filter
/// completions are delivered back onto it, so exchange state never needs
/// cross-thread synchronisation. Tasks spawned while the loop is not being
/// driven are queued and start on its next turn.
#[derive(Clone)]
pub struct EventLoop {
    tasks: Rc<LocalSet>,
}

impl EventLoop {
    pub fn new() -> Self {
        Self {
            tasks: Rc::new(LocalSet::new()),
        }
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.tasks.spawn_local(future)
    }

    /// Drive the loop until `future` resolves.
    pub async fn run_until<F: Future>(&self, future: F) -> F::Output {
        self.tasks.run_until(future).await
    }

    /// Drive the loop on `runtime` from a blocking context.
    pub fn block_on<F: Future>(&self, runtime: &Runtime, future: F) -> F::Output {
        self.tasks.block_on(runtime, future)
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop").finish_non_exhaustive()
    }
}
