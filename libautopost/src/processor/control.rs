//! Pause and stop signalling between a host and a run worker
//!
//! The host flips the state; the worker only reads it at the top of each
//! item, so a request never interrupts a collaborator call in flight.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::time::sleep;

const RUNNING: u8 = 0;
const PAUSED: u8 = 1;
const STOPPED: u8 = 2;
const FINISHED: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Running,
    Paused,
    /// Stop requested; the worker exits at its next checkpoint
    Stopped,
    /// Worker has left the item loop
    Finished,
}

impl ControlState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            RUNNING => ControlState::Running,
            PAUSED => ControlState::Paused,
            STOPPED => ControlState::Stopped,
            _ => ControlState::Finished,
        }
    }
}

#[derive(Debug)]
pub struct RunControl {
    state: AtomicU8,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(RUNNING),
        }
    }

    pub fn state(&self) -> ControlState {
        ControlState::from_raw(self.state.load(Ordering::SeqCst))
    }

    /// Returns true when the state actually changed
    pub fn request_pause(&self) -> bool {
        self.transition(RUNNING, PAUSED)
    }

    /// Returns true when the state actually changed
    pub fn request_resume(&self) -> bool {
        self.transition(PAUSED, RUNNING)
    }

    /// Returns true when the state actually changed
    pub fn request_stop(&self) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if current == STOPPED || current == FINISHED {
                return false;
            }
            match self
                .state
                .compare_exchange(current, STOPPED, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Block while paused. Returns false once the worker should exit.
    pub async fn checkpoint(&self, poll: Duration) -> bool {
        loop {
            match self.state() {
                ControlState::Running => return true,
                ControlState::Paused => sleep(poll).await,
                ControlState::Stopped | ControlState::Finished => return false,
            }
        }
    }

    /// Mark the worker as done and return the state it finished from
    pub(crate) fn finish(&self) -> ControlState {
        ControlState::from_raw(self.state.swap(FINISHED, Ordering::SeqCst))
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
