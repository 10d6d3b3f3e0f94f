use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::Command;

static NEXT_RECORDING_ID: AtomicU64 = AtomicU64::new(1);

/// An immutable batch of recorded GPU work.
///
/// A recording is single-use: it is either moved into
/// [`Context::insert_recording`](crate::Context::insert_recording), which
/// consumes it whatever the outcome, or dropped without ever running.
pub struct Recording {
    id: u64,
    context_id: u64,
    recorder_id: u64,
    sequence: u64,
    require_ordered: Option<bool>,
    commands: Vec<Command>,
    consumed: bool,
}

impl Recording {
    pub(crate) fn new(
        context_id: u64,
        recorder_id: u64,
        sequence: u64,
        require_ordered: Option<bool>,
        commands: Vec<Command>,
    ) -> Self {
        Self {
            id: NEXT_RECORDING_ID.fetch_add(1, Ordering::Relaxed),
            context_id,
            recorder_id,
            sequence,
            require_ordered,
            commands,
            consumed: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn recorder_id(&self) -> u64 {
        self.recorder_id
    }

    /// Position in the snap order of its recorder, starting at zero.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub(crate) fn context_id(&self) -> u64 {
        self.context_id
    }

    pub(crate) fn require_ordered(&self) -> Option<bool> {
        self.require_ordered
    }

    pub(crate) fn into_commands(mut self) -> Vec<Command> {
        self.consumed = true;
        std::mem::take(&mut self.commands)
    }
}

impl fmt::Debug for Recording {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recording")
            .field("id", &self.id)
            .field("recorder", &self.recorder_id)
            .field("sequence", &self.sequence)
            .field("commands", &self.commands.len())
            .finish()
    }
}

impl Drop for Recording {
    fn drop(&mut self) {
        if !self.consumed {
            log::trace!(
                "Discarded recording {} ({} commands)",
                self.id,
                self.commands.len()
            );
        }
    }
}
