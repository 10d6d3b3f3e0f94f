use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::backend::{Command, GpuBackend};
use crate::context::ContextShared;
use crate::options::RecorderOptions;
use crate::recording::Recording;
use crate::types::BackendApi;

static NEXT_RECORDER_ID: AtomicU64 = AtomicU64::new(1);

/// Where a recorder is in its lifecycle.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RecorderState {
    /// Nothing recorded since creation or the last snap.
    Idle,
    /// Commands are accumulating.
    Recording,
}

/// Mutable half of a recorder. Surfaces hold a weak reference to it so they
/// can keep recording after being created.
pub(crate) struct RecorderInner {
    state: RecorderState,
    commands: Vec<Command>,
    next_sequence: u64,
}

impl RecorderInner {
    pub fn record(&mut self, command: Command) {
        self.state = RecorderState::Recording;
        self.commands.push(command);
    }
}

/// A single-threaded command recording session bound to a Context.
///
/// Recorders are reusable: [`Recorder::snap`] hands out everything recorded so
/// far as a [`Recording`] and leaves the recorder idle. The recorder keeps its
/// Context's backend alive, so it can never outlive the device it records for.
pub struct Recorder {
    id: u64,
    context: Arc<ContextShared>,
    inner: Arc<Mutex<RecorderInner>>,
    budget: Arc<GpuBudget>,
    require_ordered_recordings: Option<bool>,
}

impl Recorder {
    pub(crate) fn new(context: Arc<ContextShared>, options: &RecorderOptions) -> Self {
        let id = NEXT_RECORDER_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Created recorder {} on context {} (budget {} bytes)",
            id,
            context.id,
            options.gpu_budget_bytes
        );
        let ordered = options
            .require_ordered_recordings
            .unwrap_or(context.options.require_ordered_recordings);
        if ordered {
            context.track_recorder(id);
        }
        Self {
            id,
            context,
            inner: Arc::new(Mutex::new(RecorderInner {
                state: RecorderState::Idle,
                commands: Vec::new(),
                next_sequence: 0,
            })),
            budget: Arc::new(GpuBudget::new(options.gpu_budget_bytes)),
            require_ordered_recordings: options.require_ordered_recordings,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn backend(&self) -> BackendApi {
        self.context.backend.api()
    }

    pub fn state(&self) -> RecorderState {
        self.inner.lock().state
    }

    /// Bytes of live render targets charged to this recorder.
    pub fn budget_used(&self) -> u64 {
        self.budget.used()
    }

    pub fn max_budgeted_bytes(&self) -> u64 {
        self.budget.limit
    }

    /// Records a debug marker.
    pub fn add_marker(&mut self, label: impl Into<String>) {
        self.inner.lock().record(Command::Marker(label.into()));
    }

    /// Captures everything recorded since the last snap and resets the
    /// recorder to idle. Returns `None` if the device has been lost, in which
    /// case the recorded work is dropped.
    pub fn snap(&mut self) -> Option<Recording> {
        let mut inner = self.inner.lock();
        let commands = std::mem::take(&mut inner.commands);
        inner.state = RecorderState::Idle;

        if self.context.backend.is_device_lost() {
            log::warn!(
                "Recorder {}: device lost, dropping {} recorded commands",
                self.id,
                commands.len()
            );
            return None;
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        log::trace!(
            "Recorder {} snapped recording #{} ({} commands)",
            self.id,
            sequence,
            commands.len()
        );
        Some(Recording::new(
            self.context.id,
            self.id,
            sequence,
            self.require_ordered_recordings,
            commands,
        ))
    }

    pub(crate) fn gpu(&self) -> &dyn GpuBackend {
        self.context.backend.as_ref()
    }

    pub(crate) fn sink(&self) -> Weak<Mutex<RecorderInner>> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn charge(&self, bytes: u64) -> Option<BudgetCharge> {
        GpuBudget::try_charge(&self.budget, bytes)
    }
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("id", &self.id)
            .field("context", &self.context.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.context.forget_recorder(self.id);
        let unsnapped = self.inner.lock().commands.len();
        if unsnapped > 0 {
            log::debug!(
                "Recorder {} dropped with {} unsnapped commands",
                self.id,
                unsnapped
            );
        }
    }
}

/// Byte budget for render targets created through one recorder.
#[derive(Debug)]
pub(crate) struct GpuBudget {
    limit: u64,
    used: AtomicU64,
}

impl GpuBudget {
    fn new(limit: u64) -> Self {
        Self {
            limit,
            used: AtomicU64::new(0),
        }
    }

    fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    fn try_charge(budget: &Arc<Self>, bytes: u64) -> Option<BudgetCharge> {
        let mut used = budget.used.load(Ordering::Acquire);
        loop {
            let next = used.checked_add(bytes).filter(|next| *next <= budget.limit)?;
            match budget
                .used
                .compare_exchange_weak(used, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    return Some(BudgetCharge {
                        budget: Arc::clone(budget),
                        bytes,
                    })
                }
                Err(actual) => used = actual,
            }
        }
    }
}

/// Bytes charged against a [`GpuBudget`], returned on drop.
#[derive(Debug)]
pub(crate) struct BudgetCharge {
    budget: Arc<GpuBudget>,
    bytes: u64,
}

impl Drop for BudgetCharge {
    fn drop(&mut self) {
        self.budget.used.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_charges_are_returned_on_drop() {
        let budget = Arc::new(GpuBudget::new(100));
        let a = GpuBudget::try_charge(&budget, 60).unwrap();
        assert!(GpuBudget::try_charge(&budget, 50).is_none());
        let b = GpuBudget::try_charge(&budget, 40).unwrap();
        assert_eq!(budget.used(), 100);
        drop(a);
        assert_eq!(budget.used(), 40);
        drop(b);
        assert_eq!(budget.used(), 0);
    }
}
