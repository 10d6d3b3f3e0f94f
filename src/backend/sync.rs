// Synchronization primitives
//
// A fence is handed back by every backend submission. The Context keeps it
// while the work is in flight and either polls it (asynchronous submit) or
// blocks on it (synchronous submit).

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

use crate::{Error, Result};

/// Completion token for one backend submission.
pub(crate) trait SubmitFence: Send {
    /// Non-blocking check. An error means the work failed on the device.
    fn is_signaled(&self) -> Result<bool>;

    /// Blocks until the work has completed. No timeout.
    fn wait(&self) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum FenceState {
    Pending,
    Signaled,
    Failed(String),
}

/// Fence signalled from the emulated GPU timeline thread.
#[derive(Debug)]
pub(crate) struct CpuFence {
    state: Mutex<FenceState>,
    signaled: Condvar,
}

impl CpuFence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FenceState::Pending),
            signaled: Condvar::new(),
        })
    }

    pub fn signal(&self) {
        self.finish(FenceState::Signaled);
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.finish(FenceState::Failed(reason.into()));
    }

    fn finish(&self, state: FenceState) {
        let mut current = self.state.lock();
        if *current == FenceState::Pending {
            *current = state;
        }
        self.signaled.notify_all();
    }

    fn check(state: &FenceState) -> Result<bool> {
        match state {
            FenceState::Pending => Ok(false),
            FenceState::Signaled => Ok(true),
            FenceState::Failed(reason) => Err(Error::submission(reason.clone())),
        }
    }
}

impl SubmitFence for Arc<CpuFence> {
    fn is_signaled(&self) -> Result<bool> {
        CpuFence::check(&self.state.lock())
    }

    fn wait(&self) -> Result<()> {
        let mut state = self.state.lock();
        while *state == FenceState::Pending {
            self.signaled.wait(&mut state);
        }
        CpuFence::check(&state).map(|_| ())
    }
}

/// Fence for submissions that had nothing to execute.
pub(crate) struct SignaledFence;

impl SubmitFence for SignaledFence {
    fn is_signaled(&self) -> Result<bool> {
        Ok(true)
    }

    fn wait(&self) -> Result<()> {
        Ok(())
    }
}
