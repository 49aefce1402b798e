//! Handles shared by the I/O tasks a channel spawns.

use std::future::Future;

use tokio_util::task::TaskTracker;

use crate::event::EventSender;

/// Where I/O tasks post completions and how they are tracked.
///
/// Every task a channel spawns is registered with the service's
/// [`TaskTracker`] so disposal can wait for them to wind down.
#[derive(Clone, Debug)]
pub(crate) struct IoContext {
    pub events: EventSender,
    pub tracker: TaskTracker,
}

impl IoContext {
    pub fn new(events: EventSender, tracker: TaskTracker) -> Self { Self { events, tracker } }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }
}
