use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Whether the worker is currently looping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    NotStarted = 0,
    Running = 1,
    Stopped = 2,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RunState::NotStarted,
            1 => RunState::Running,
            _ => RunState::Stopped,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NotStarted => write!(f, "not started"),
            RunState::Running => write!(f, "running"),
            RunState::Stopped => write!(f, "stopped"),
        }
    }
}

/// The run state shared by the controller and the worker. Only the worker writes it.
///
/// Stores are `Release` and loads are `Acquire`: a controller that reads `Stopped` also sees
/// everything the worker did before leaving.
#[derive(Debug, Clone)]
pub struct SharedRunState(Arc<AtomicU8>);

impl Default for SharedRunState {
    fn default() -> Self {
        SharedRunState(Arc::new(AtomicU8::new(RunState::NotStarted as u8)))
    }
}

impl SharedRunState {
    pub fn get(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: RunState) {
        let previous = RunState::from_u8(self.0.swap(state as u8, Ordering::AcqRel));
        log::trace!("Run state: {previous} -> {state}");
    }
}

/// Cooperative cancellation token, polled by the worker once per iteration.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
