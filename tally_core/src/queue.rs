//! Per-user serialization queue.
//!
//! Every inbound event, text turn or background completion alike, must pass
//! through here before it touches session or flow state: tasks for one
//! [`UserKey`] run strictly one at a time in submission order, while tasks
//! for different keys run concurrently. The queue is a pure ordering
//! primitive; it never interprets the work it runs.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::UserKey;

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type LaneMap = Arc<Mutex<HashMap<UserKey, Lane>>>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The entry was dropped by [`SerialQueue::clear`] before it started,
    /// or died without reporting. In-flight work is never aborted.
    #[error("queued task was discarded before completing")]
    Discarded,
}

#[derive(Default)]
struct Lane {
    pending: VecDeque<Task>,
    running: bool,
}

/// FIFO-per-key task queue with cross-key concurrency.
///
/// Cheap to clone; clones share the same lanes. A lane exists only while
/// its user has queued or running work, so idle users cost nothing.
#[derive(Clone, Default)]
pub struct SerialQueue {
    lanes: LaneMap,
}

impl SerialQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after all previously submitted work for `user` and
    /// return its output. Tasks for other keys are unaffected.
    ///
    /// Returns [`QueueError::Discarded`] if the entry was cleared before
    /// it started.
    pub async fn run<T, F>(&self, user: &UserKey, task: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        self.push(
            user,
            Box::pin(async move {
                let output = task.await;
                // the submitter may have gone away; that is not our problem
                let _ = done_tx.send(output);
            }),
        );
        done_rx.await.map_err(|_| QueueError::Discarded)
    }

    /// Fire-and-forget submission for work that reports elsewhere
    /// (background steps such as a document extraction completing).
    pub fn enqueue<F>(&self, user: &UserKey, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.push(user, Box::pin(task));
    }

    /// Discard every not-yet-started entry for `user`.
    ///
    /// A task already in flight always runs to completion, so partially
    /// applied side effects on external services cannot occur; its result
    /// is for its submitter to keep or discard. Returns the number of
    /// entries dropped.
    #[must_use]
    pub fn clear(&self, user: &UserKey) -> usize {
        let dropped = {
            let mut lanes = lock(&self.lanes);
            lanes.get_mut(user).map_or(0, |lane| {
                let dropped = lane.pending.len();
                lane.pending.clear();
                dropped
            })
        };
        if dropped > 0 {
            debug!(user = %user, dropped, "cleared pending queue entries");
        }
        dropped
    }

    /// Pending entries plus the in-flight one, if any.
    #[must_use]
    pub fn depth(&self, user: &UserKey) -> usize {
        lock(&self.lanes)
            .get(user)
            .map_or(0, |lane| lane.pending.len() + usize::from(lane.running))
    }

    fn push(&self, user: &UserKey, task: Task) {
        let start_drain = {
            let mut lanes = lock(&self.lanes);
            let lane = lanes.entry(user.clone()).or_default();
            lane.pending.push_back(task);
            if lane.running {
                false
            } else {
                lane.running = true;
                true
            }
        };
        if start_drain {
            let lanes = Arc::clone(&self.lanes);
            let user = user.clone();
            tokio::spawn(drain_lane(lanes, user));
        }
    }
}

/// Drive one user's lane until it is empty, then retire it.
///
/// At most one drain task exists per lane (guarded by `Lane::running`), so
/// entries execute strictly in push order. Each entry runs in its own task
/// so that a panicking entry cannot take the lane down with it.
async fn drain_lane(lanes: LaneMap, user: UserKey) {
    loop {
        let next = {
            let mut map = lock(&lanes);
            let task = map
                .get_mut(&user)
                .and_then(|lane| lane.pending.pop_front());
            if task.is_none() {
                // drained: retire the lane so idle users hold no memory
                map.remove(&user);
            }
            task
        };
        let Some(task) = next else { break };
        if let Err(join_err) = tokio::spawn(task).await {
            error!(user = %user, "queued task aborted: {join_err}");
        }
    }
}

fn lock(lanes: &LaneMap) -> std::sync::MutexGuard<'_, HashMap<UserKey, Lane>> {
    lanes.lock().unwrap_or_else(PoisonError::into_inner)
}
