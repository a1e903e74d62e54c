//! One-shot "master exists" gate
//!
//! The registry fails fast when a dependent names a master that has not
//! been created yet. Threads that build a sharing group concurrently wait on
//! a [`MasterGate`] instead: the master's thread opens it once the master
//! context is created, and every dependent wakes with a handle to it.

use crate::context::{LifecycleState, RenderingContext};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GateError {
    /// The master's thread gave up before creating it.
    #[error("master creation was abandoned")]
    Abandoned,

    #[error("timed out waiting for master after {0:?}")]
    TimedOut(Duration),
}

enum Slot {
    Waiting,
    Open(RenderingContext),
    Abandoned,
}

/// Wait-until-created barrier keyed on one master.
pub struct MasterGate {
    slot: Mutex<Slot>,
    decided: Condvar,
}

impl Default for MasterGate {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterGate {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Waiting),
            decided: Condvar::new(),
        }
    }

    /// Publishes the created master. Returns false, leaving the gate as it
    /// was, if the gate was already decided or `master` is not created.
    pub fn open(&self, master: RenderingContext) -> bool {
        if !matches!(
            master.state(),
            LifecycleState::NotCurrent | LifecycleState::Current
        ) {
            warn!("refusing to open gate with uncreated master {}", master.id());
            return false;
        }

        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Waiting) {
            return false;
        }
        debug!("gate opened for master {}", master.id());
        *slot = Slot::Open(master);
        drop(slot);
        self.decided.notify_all();
        true
    }

    /// Wakes all waiters with [`GateError::Abandoned`].
    pub fn abandon(&self) -> bool {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Waiting) {
            return false;
        }
        *slot = Slot::Abandoned;
        drop(slot);
        self.decided.notify_all();
        true
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Open(_))
    }

    /// Blocks until the gate is decided.
    pub fn wait(&self) -> Result<RenderingContext, GateError> {
        let mut slot = self.slot.lock();
        loop {
            match &*slot {
                Slot::Open(master) => return Ok(master.clone()),
                Slot::Abandoned => return Err(GateError::Abandoned),
                Slot::Waiting => self.decided.wait(&mut slot),
            }
        }
    }

    /// Blocks for at most `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<RenderingContext, GateError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            match &*slot {
                Slot::Open(master) => return Ok(master.clone()),
                Slot::Abandoned => return Err(GateError::Abandoned),
                Slot::Waiting => {
                    if self.decided.wait_until(&mut slot, deadline).timed_out() {
                        if let Slot::Open(master) = &*slot {
                            return Ok(master.clone());
                        }
                        return Err(GateError::TimedOut(timeout));
                    }
                }
            }
        }
    }
}
