//! Per-user session state: at most one active flow per user.
//!
//! Turns never hold the session lock while they run. A turn checks the
//! flow instance *out*, works on it without any lock held, and checks it
//! back *in*; a per-user epoch counter, bumped by reset, decides at
//! check-in whether the returning state is still wanted.
//!
//! Expiry is lazy: nobody watches idle sessions, they are found dead at
//! the next access (or by the periodic sweep).

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::UserKey;
use crate::flow::{FlowInstance, FrameInfo};

/// Sessions idle longer than this are abandoned.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// What became of a checked-out flow at check-in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The flow was installed (back) and will receive the next event.
    Retained,
    /// The flow finished normally and the slot was released.
    Completed,
    /// A reset intervened mid-turn; the returning state was dropped
    /// instead of installed.
    Discarded,
}

/// Read-only view of one user's session, for status output.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub root: &'static str,
    pub active: &'static str,
    pub active_step: &'static str,
    /// Frames root-first. Empty while a turn is in flight.
    pub frames: Vec<FrameInfo>,
    pub started_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub idle: Duration,
    /// True while the flow is processing an event right now.
    pub busy: bool,
}

/// A flow checked out for one turn.
///
/// The caller runs the turn with no lock held and then hands the
/// instance back via [`SessionManager::check_in`] (or reports completion
/// via [`SessionManager::release`]) together with this lease's epoch.
pub struct SessionLease {
    pub epoch: u64,
    pub instance: Option<FlowInstance>,
}

struct ParkedFlow {
    instance: FlowInstance,
    last_active: Instant,
    last_active_at: DateTime<Utc>,
}

/// Names kept behind while the instance itself is out on a lease, so
/// status still knows what is running.
struct LeaseMeta {
    root: &'static str,
    active: &'static str,
    active_step: &'static str,
    started_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
}

#[derive(Default)]
struct SessionSlot {
    epoch: u64,
    parked: Option<ParkedFlow>,
    lease: Option<LeaseMeta>,
}

type SlotMap = HashMap<UserKey, SessionSlot>;

/// Owns every user's session slot.
///
/// Cheap to clone; clones share the same map. Slots outlive their flows
/// on purpose: the epoch must survive a reset so that a turn already in
/// flight cannot resurrect state the user asked to drop.
#[derive(Clone)]
pub struct SessionManager {
    slots: Arc<Mutex<SlotMap>>,
    timeout: Duration,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TIMEOUT)
    }
}

impl SessionManager {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Take the user's flow out for one turn.
    ///
    /// An expired flow is dropped here rather than returned, which is
    /// the only place expiry needs checking on the turn path. The lease
    /// is always returned, instance or not, because its epoch guards the
    /// eventual check-in either way.
    #[must_use]
    pub fn check_out(&self, user: &UserKey) -> SessionLease {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(user) else {
            return SessionLease {
                epoch: 0,
                instance: None,
            };
        };
        self.evict_if_expired(user, slot);
        let instance = slot.parked.take().map(|parked| {
            slot.lease = Some(LeaseMeta {
                root: parked.instance.root_name(),
                active: parked.instance.active_name(),
                active_step: parked.instance.active_step(),
                started_at: parked.instance.started_at(),
                last_active_at: parked.last_active_at,
            });
            parked.instance
        });
        SessionLease {
            epoch: slot.epoch,
            instance,
        }
    }

    /// Hand a still-active flow back after a turn.
    ///
    /// Installs it only if no reset bumped the epoch since the matching
    /// check-out; otherwise the state is dropped. Installing over an
    /// existing parked flow replaces it.
    #[must_use]
    pub fn check_in(&self, user: &UserKey, epoch: u64, instance: FlowInstance) -> TurnOutcome {
        let mut slots = self.lock();
        let slot = slots.entry(user.clone()).or_default();
        if slot.epoch != epoch {
            info!(
                user = %user,
                flow = instance.root_name(),
                "discarding flow state checked out before a reset"
            );
            return TurnOutcome::Discarded;
        }
        slot.lease = None;
        slot.parked = Some(ParkedFlow {
            instance,
            last_active: Instant::now(),
            last_active_at: Utc::now(),
        });
        TurnOutcome::Retained
    }

    /// Report that a checked-out flow finished its last turn.
    #[must_use]
    pub fn release(&self, user: &UserKey, epoch: u64) -> TurnOutcome {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(user) else {
            return TurnOutcome::Completed;
        };
        if slot.epoch != epoch {
            return TurnOutcome::Discarded;
        }
        slot.lease = None;
        TurnOutcome::Completed
    }

    /// Drop whatever is active for `user` and bump the epoch so that any
    /// turn in flight is discarded at check-in.
    ///
    /// Returns the abandoned root flow's name, if there was one.
    #[must_use]
    pub fn clear(&self, user: &UserKey) -> Option<&'static str> {
        let mut slots = self.lock();
        let slot = slots.entry(user.clone()).or_default();
        slot.epoch += 1;
        let name = slot
            .parked
            .take()
            .map(|parked| parked.instance.root_name())
            .or_else(|| slot.lease.take().map(|meta| meta.root));
        if let Some(flow) = name {
            info!(user = %user, flow, "session cleared");
        }
        name
    }

    /// Current state of one user's session, if any.
    #[must_use]
    pub fn snapshot(&self, user: &UserKey) -> Option<SessionSnapshot> {
        let mut slots = self.lock();
        let slot = slots.get_mut(user)?;
        self.evict_if_expired(user, slot);
        if let Some(parked) = slot.parked.as_ref() {
            return Some(SessionSnapshot {
                root: parked.instance.root_name(),
                active: parked.instance.active_name(),
                active_step: parked.instance.active_step(),
                frames: parked.instance.frames(),
                started_at: parked.instance.started_at(),
                last_active_at: parked.last_active_at,
                idle: parked.last_active.elapsed(),
                busy: false,
            });
        }
        slot.lease.as_ref().map(|meta| SessionSnapshot {
            root: meta.root,
            active: meta.active,
            active_step: meta.active_step,
            frames: Vec::new(),
            started_at: meta.started_at,
            last_active_at: meta.last_active_at,
            idle: Duration::ZERO,
            busy: true,
        })
    }

    /// Drop every parked flow that has sat idle past the timeout.
    ///
    /// Slots themselves stay: their epochs must keep guarding late
    /// check-ins. Returns the number of flows dropped.
    #[must_use]
    pub fn sweep(&self) -> usize {
        let mut slots = self.lock();
        let mut dropped = 0;
        for (user, slot) in slots.iter_mut() {
            let expired = slot
                .parked
                .as_ref()
                .is_some_and(|parked| parked.last_active.elapsed() > self.timeout);
            if expired {
                if let Some(parked) = slot.parked.take() {
                    debug!(
                        user = %user,
                        flow = parked.instance.root_name(),
                        "swept expired session"
                    );
                    dropped += 1;
                }
            }
        }
        dropped
    }

    /// Users with a parked or in-flight flow right now.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| slot.parked.is_some() || slot.lease.is_some())
            .count()
    }

    fn evict_if_expired(&self, user: &UserKey, slot: &mut SessionSlot) {
        let expired = slot
            .parked
            .as_ref()
            .is_some_and(|parked| parked.last_active.elapsed() > self.timeout);
        if expired {
            if let Some(parked) = slot.parked.take() {
                info!(
                    user = %user,
                    flow = parked.instance.root_name(),
                    idle_secs = parked.last_active.elapsed().as_secs(),
                    "session expired"
                );
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotMap> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
