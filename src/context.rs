// Context - the top-level device binding and its submission queue
//
// FLOW:
// ┌──────────┐  make_recorder  ┌──────────┐  snap  ┌───────────┐
// │ Context  │ ──────────────> │ Recorder │ ─────> │ Recording │
// └──────────┘                 └──────────┘        └───────────┘
//      ^                                                 │
//      │  insert_recording (always consumes)             │
//      └─────────────────────────────────────────────────┘
//      submit: pending ──> backend queue ──> in flight ──> retired
//
// The queue is the only shared mutable state of a Context; one mutex
// serializes insert/submit calls coming from different threads. Finished
// callbacks always run after that mutex is released.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::sync::SubmitFence;
use crate::backend::{software, BackendContext, GpuBackend};
use crate::options::{ContextOptions, RecorderOptions};
use crate::recorder::Recorder;
use crate::recording::Recording;
use crate::types::{BackendApi, SyncToCpu};
use crate::{Error, Result};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Outcome reported to a finished callback.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CallbackResult {
    Success,
    Failed,
}

pub type FinishedCallback = Box<dyn FnOnce(CallbackResult) + Send>;

/// A recording plus an optional callback fired once its work has finished
/// (or has been rejected).
pub struct InsertRecordingInfo {
    pub recording: Recording,
    pub finished: Option<FinishedCallback>,
}

impl InsertRecordingInfo {
    pub fn new(recording: Recording) -> Self {
        Self {
            recording,
            finished: None,
        }
    }

    pub fn with_finished(
        mut self,
        finished: impl FnOnce(CallbackResult) + Send + 'static,
    ) -> Self {
        self.finished = Some(Box::new(finished));
        self
    }
}

/// State shared between a Context and every Recorder it created.
pub(crate) struct ContextShared {
    pub id: u64,
    pub backend: Box<dyn GpuBackend>,
    pub options: ContextOptions,
    /// Last inserted sequence of every live recorder that requires ordered
    /// insertion. Entries come and go with their recorder.
    last_sequence: Mutex<HashMap<u64, Option<u64>>>,
}

impl ContextShared {
    pub(crate) fn track_recorder(&self, recorder_id: u64) {
        self.last_sequence.lock().insert(recorder_id, None);
    }

    pub(crate) fn forget_recorder(&self, recorder_id: u64) {
        self.last_sequence.lock().remove(&recorder_id);
    }

    pub(crate) fn tracked_recorders(&self) -> usize {
        self.last_sequence.lock().len()
    }
}

struct QueuedRecording {
    recording: Recording,
    finished: Option<FinishedCallback>,
}

struct InFlight {
    serial: u64,
    fence: Box<dyn SubmitFence>,
    finished: Vec<FinishedCallback>,
    recordings: usize,
}

#[derive(Default)]
struct SubmissionQueue {
    pending: Vec<QueuedRecording>,
    in_flight: VecDeque<InFlight>,
    next_serial: u64,
}

type Completed = Vec<(FinishedCallback, CallbackResult)>;

impl SubmissionQueue {
    /// Retires finished submissions in submission order. With `blocking`,
    /// waits for everything in flight. Returns false if any retired
    /// submission failed on the device.
    fn retire(&mut self, blocking: bool, completed: &mut Completed) -> bool {
        let mut ok = true;
        while let Some(front) = self.in_flight.front() {
            let status = if blocking {
                front.fence.wait().map(|_| true)
            } else {
                front.fence.is_signaled()
            };
            let result = match status {
                Ok(false) => break,
                Ok(true) => CallbackResult::Success,
                Err(e) => {
                    log::error!("Submission {} failed on the device: {}", front.serial, e);
                    ok = false;
                    CallbackResult::Failed
                }
            };
            if let Some(done) = self.in_flight.pop_front() {
                log::trace!("Retired submission {} ({:?})", done.serial, result);
                completed.extend(done.finished.into_iter().map(|cb| (cb, result)));
            }
        }
        ok
    }

    fn in_flight_recordings(&self) -> usize {
        self.in_flight.iter().map(|f| f.recordings).sum()
    }
}

fn run_callbacks(completed: Completed) {
    for (callback, result) in completed {
        callback(result);
    }
}

/// A logical GPU device binding with its work queue.
///
/// Created by one of the `make_*` factories, which return `None` when the
/// backend cannot initialize. All methods take `&self`; the submission queue is
/// internally synchronized, so a Context can be shared between threads.
pub struct Context {
    shared: Arc<ContextShared>,
    queue: Mutex<SubmissionQueue>,
}

impl Context {
    /// Creates a Context for whichever backend `backend` describes.
    pub fn make(backend: BackendContext<'_>, options: &ContextOptions) -> Option<Context> {
        match Self::try_make(backend, options) {
            Ok(context) => Some(context),
            Err(e) => {
                log::warn!("Failed to create {:?} context: {}", backend.api(), e);
                None
            }
        }
    }

    fn try_make(backend: BackendContext<'_>, options: &ContextOptions) -> Result<Context> {
        options.validate()?;
        let gpu = backend.create_backend(options)?;
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        log::info!("Created {:?} context {}", gpu.api(), id);
        Ok(Context {
            shared: Arc::new(ContextShared {
                id,
                backend: gpu,
                options: options.clone(),
                last_sequence: Mutex::new(HashMap::new()),
            }),
            queue: Mutex::new(SubmissionQueue::default()),
        })
    }

    pub fn make_software(
        backend: &software::BackendContext,
        options: &ContextOptions,
    ) -> Option<Context> {
        Self::make(BackendContext::Software(backend), options)
    }

    #[cfg(backend_vulkan)]
    pub fn make_vulkan(backend: &crate::vk::BackendContext, options: &ContextOptions) -> Option<Context> {
        Self::make(BackendContext::Vulkan(backend), options)
    }

    #[cfg(backend_metal)]
    pub fn make_metal(backend: &crate::mtl::BackendContext, options: &ContextOptions) -> Option<Context> {
        Self::make(BackendContext::Metal(backend), options)
    }

    /// Software Context on the process-wide default device, with a queue of
    /// its own.
    pub fn make_default(options: Option<&ContextOptions>) -> Option<Context> {
        let device = software::default_device();
        let queue = match device.new_queue() {
            Ok(queue) => queue,
            Err(e) => {
                log::warn!("Failed to create default software queue: {}", e);
                return None;
            }
        };
        let backend = software::BackendContext::new(&device, &queue);
        let defaults = ContextOptions::default();
        Self::make_software(&backend, options.unwrap_or(&defaults))
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn backend(&self) -> BackendApi {
        self.shared.backend.api()
    }

    pub fn options(&self) -> &ContextOptions {
        &self.shared.options
    }

    pub fn is_device_lost(&self) -> bool {
        self.shared.backend.is_device_lost()
    }

    /// New recorder bound to this Context; `None` selects default options.
    pub fn make_recorder(&self, options: Option<&RecorderOptions>) -> Option<Recorder> {
        if self.is_device_lost() {
            log::warn!("Context {}: cannot make a recorder, device lost", self.id());
            return None;
        }
        let defaults = RecorderOptions::default();
        Some(Recorder::new(
            Arc::clone(&self.shared),
            options.unwrap_or(&defaults),
        ))
    }

    /// Queues a recording for the next `submit`. The recording is consumed
    /// even when this returns `false`.
    pub fn insert_recording(&self, recording: Recording) -> bool {
        self.insert_recording_with(InsertRecordingInfo::new(recording))
    }

    /// Like [`Context::insert_recording`], with an optional finished callback.
    /// A rejected recording fires its callback immediately with `Failed`.
    pub fn insert_recording_with(&self, info: InsertRecordingInfo) -> bool {
        let InsertRecordingInfo {
            recording,
            finished,
        } = info;
        let recording_id = recording.id();

        let rejected = {
            let mut queue = self.queue.lock();
            match self.check_insertable(&recording) {
                Ok(()) => {
                    queue.pending.push(QueuedRecording {
                        recording,
                        finished,
                    });
                    None
                }
                Err(e) => Some((e, recording, finished)),
            }
        };

        match rejected {
            None => {
                log::trace!("Context {}: inserted recording {}", self.id(), recording_id);
                true
            }
            Some((e, recording, finished)) => {
                log::warn!(
                    "Context {}: rejected recording {}: {}",
                    self.id(),
                    recording_id,
                    e
                );
                drop(recording);
                if let Some(finished) = finished {
                    finished(CallbackResult::Failed);
                }
                false
            }
        }
    }

    /// Runs under the queue lock, so check and sequence update are atomic with
    /// respect to other inserts.
    fn check_insertable(&self, recording: &Recording) -> Result<()> {
        if recording.context_id() != self.id() {
            return Err(Error::invalid(format!(
                "recording belongs to context {}",
                recording.context_id()
            )));
        }
        if self.is_device_lost() {
            return Err(Error::device_unavailable("device lost"));
        }
        let ordered = recording
            .require_ordered()
            .unwrap_or(self.shared.options.require_ordered_recordings);
        if !ordered {
            return Ok(());
        }
        // No entry: the recorder is gone and nothing newer can follow.
        let mut last_sequence = self.shared.last_sequence.lock();
        let Some(last) = last_sequence.get_mut(&recording.recorder_id()) else {
            return Ok(());
        };
        if let Some(previous) = *last {
            if recording.sequence() <= previous {
                return Err(Error::invalid(format!(
                    "recording #{} inserted after #{}",
                    recording.sequence(),
                    previous
                )));
            }
        }
        *last = Some(recording.sequence());
        Ok(())
    }

    /// Sends every pending recording to the GPU.
    ///
    /// `None` and `Some(SyncToCpu::No)` return once the work is enqueued and
    /// never wait on the GPU; `Some(SyncToCpu::Yes)` blocks until all work
    /// submitted so far has completed. Returns `false` if the backend refused
    /// the work or, when synchronous, if any of it failed. An earlier
    /// asynchronous submission that failed is reported through its callbacks
    /// only. Failures are not retried.
    pub fn submit(&self, sync_to_cpu: Option<SyncToCpu>) -> bool {
        let sync_to_cpu = sync_to_cpu.unwrap_or_default();
        let mut completed = Completed::new();

        let ok = {
            let mut queue = self.queue.lock();
            if !queue.retire(false, &mut completed) {
                log::warn!(
                    "Context {}: an earlier asynchronous submission failed",
                    self.id()
                );
            }

            let mut ok = if queue.pending.is_empty() {
                true
            } else {
                self.flush(&mut queue, &mut completed)
            };

            let max_in_flight = self.shared.options.max_in_flight_submissions as usize;
            if sync_to_cpu == SyncToCpu::No && queue.in_flight.len() > max_in_flight {
                log::warn!(
                    "Context {}: {} submissions in flight (limit {}); poll with check_async_work_completion",
                    self.id(),
                    queue.in_flight.len(),
                    max_in_flight
                );
            }

            if sync_to_cpu == SyncToCpu::Yes {
                ok &= queue.retire(true, &mut completed);
            }
            ok
        };

        run_callbacks(completed);
        ok
    }

    fn flush(&self, queue: &mut SubmissionQueue, completed: &mut Completed) -> bool {
        let batch = std::mem::take(&mut queue.pending);
        let recordings = batch.len();
        let mut commands = Vec::new();
        let mut finished = Vec::new();
        for QueuedRecording {
            recording,
            finished: callback,
        } in batch
        {
            commands.extend(recording.into_commands());
            finished.extend(callback);
        }

        let serial = queue.next_serial;
        queue.next_serial += 1;
        let command_count = commands.len();

        match self.shared.backend.submit(commands) {
            Ok(fence) => {
                log::debug!(
                    "Context {}: submission {} with {} recordings ({} commands)",
                    self.id(),
                    serial,
                    recordings,
                    command_count
                );
                queue.in_flight.push_back(InFlight {
                    serial,
                    fence,
                    finished,
                    recordings,
                });
                true
            }
            Err(e) => {
                log::error!(
                    "Context {}: submission {} of {} recordings failed: {}",
                    self.id(),
                    serial,
                    recordings,
                    e
                );
                completed.extend(finished.into_iter().map(|cb| (cb, CallbackResult::Failed)));
                false
            }
        }
    }

    /// Retires finished asynchronous submissions and runs their callbacks.
    /// Failed submissions are logged and report `Failed` to their callbacks.
    pub fn check_async_work_completion(&self) {
        let mut completed = Completed::new();
        self.queue.lock().retire(false, &mut completed);
        run_callbacks(completed);
    }

    /// Whether submitted work is still executing.
    pub fn has_unfinished_gpu_work(&self) -> bool {
        let mut completed = Completed::new();
        let unfinished = {
            let mut queue = self.queue.lock();
            queue.retire(false, &mut completed);
            !queue.in_flight.is_empty()
        };
        run_callbacks(completed);
        unfinished
    }

    /// Recordings inserted but not yet submitted.
    pub fn pending_recordings(&self) -> usize {
        self.queue.lock().pending.len()
    }

    /// Recordings inserted and not yet known to be complete.
    pub fn outstanding_recordings(&self) -> usize {
        let mut completed = Completed::new();
        let outstanding = {
            let mut queue = self.queue.lock();
            queue.retire(false, &mut completed);
            queue.pending.len() + queue.in_flight_recordings()
        };
        run_callbacks(completed);
        outstanding
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.shared.id)
            .field("backend", &self.backend())
            .finish()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let pending = self.pending_recordings();
        if pending > 0 {
            log::debug!(
                "Context {}: submitting {} pending recordings before teardown",
                self.id(),
                pending
            );
        }
        if !self.submit(Some(SyncToCpu::Yes)) {
            log::warn!("Context {}: work failed during teardown", self.id());
        }
        log::info!("Destroyed context {}", self.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::{SoftDevice, SoftDeviceDesc};

    fn context(options: &ContextOptions) -> Context {
        let device = SoftDevice::new(SoftDeviceDesc::default());
        let queue = device.new_queue().unwrap();
        let backend = software::BackendContext::new(&device, &queue);
        Context::make_software(&backend, options).unwrap()
    }

    #[test]
    fn unordered_recorders_leave_no_sequence_state() {
        let context = context(&ContextOptions::default());
        for _ in 0..16 {
            let mut recorder = context.make_recorder(None).unwrap();
            assert!(context.insert_recording(recorder.snap().unwrap()));
        }
        assert_eq!(context.shared.tracked_recorders(), 0);
    }

    #[test]
    fn sequence_state_follows_recorder_lifetime() {
        let options = ContextOptions {
            require_ordered_recordings: true,
            ..ContextOptions::default()
        };
        let context = context(&options);

        let mut recorder = context.make_recorder(None).unwrap();
        let first = recorder.snap().unwrap();
        let second = recorder.snap().unwrap();
        assert!(context.insert_recording(second));
        assert_eq!(context.shared.tracked_recorders(), 1);

        drop(recorder);
        assert_eq!(context.shared.tracked_recorders(), 0);

        // Leftovers of a dropped recorder are accepted and not tracked again.
        assert!(context.insert_recording(first));
        assert_eq!(context.shared.tracked_recorders(), 0);
        assert!(context.submit(Some(SyncToCpu::Yes)));
    }
}
