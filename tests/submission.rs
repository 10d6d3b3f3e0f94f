// Submission state machine: insertion, ordering, sync vs async submits,
// callbacks and failure paths.

use gpu_bridge::software::{self, SoftDevice, SoftDeviceDesc};
use gpu_bridge::{
    surfaces, CallbackResult, Color4f, Context, ContextOptions, ImageInfo, InsertRecordingInfo,
    RecorderOptions, SyncToCpu,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn context_with(delay: Duration, options: &ContextOptions) -> (Arc<SoftDevice>, Context) {
    let device = SoftDevice::new(SoftDeviceDesc {
        execution_delay: delay,
        ..SoftDeviceDesc::default()
    });
    let queue = device.new_queue().unwrap();
    let backend = software::BackendContext::new(&device, &queue);
    let context = Context::make_software(&backend, options).unwrap();
    (device, context)
}

type Outcomes = Arc<Mutex<Vec<(usize, CallbackResult)>>>;

fn tracked(recording: gpu_bridge::Recording, tag: usize, outcomes: &Outcomes) -> InsertRecordingInfo {
    let outcomes = Arc::clone(outcomes);
    InsertRecordingInfo::new(recording)
        .with_finished(move |result| outcomes.lock().push((tag, result)))
}

#[test]
fn submit_processes_exactly_the_pending_set() {
    let (_device, context) = context_with(Duration::ZERO, &ContextOptions::default());
    let mut recorder = context.make_recorder(None).unwrap();

    for i in 0..3 {
        recorder.add_marker(format!("batch {}", i));
        assert!(context.insert_recording(recorder.snap().unwrap()));
    }
    assert_eq!(context.pending_recordings(), 3);

    assert!(context.submit(Some(SyncToCpu::Yes)));
    assert_eq!(context.pending_recordings(), 0);
    assert_eq!(context.outstanding_recordings(), 0);

    // Nothing new: no-op, still true.
    assert!(context.submit(None));
    assert!(context.submit(Some(SyncToCpu::Yes)));
}

#[test]
fn async_submit_returns_before_completion() {
    let delay = Duration::from_millis(200);
    let (_device, context) = context_with(delay, &ContextOptions::default());
    let mut recorder = context.make_recorder(None).unwrap();
    let finished = Arc::new(AtomicUsize::new(0));

    recorder.add_marker("slow");
    let counter = Arc::clone(&finished);
    let info = InsertRecordingInfo::new(recorder.snap().unwrap()).with_finished(move |result| {
        assert_eq!(result, CallbackResult::Success);
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(context.insert_recording_with(info));

    let started = Instant::now();
    assert!(context.submit(Some(SyncToCpu::No)));
    assert!(started.elapsed() < delay);
    assert!(context.has_unfinished_gpu_work());
    assert_eq!(finished.load(Ordering::SeqCst), 0);
    assert_eq!(context.outstanding_recordings(), 1);

    // A synchronous submit with nothing pending still waits for earlier work.
    assert!(context.submit(Some(SyncToCpu::Yes)));
    assert!(started.elapsed() >= delay);
    assert!(!context.has_unfinished_gpu_work());
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[test]
fn check_async_work_completion_fires_callbacks() {
    let (_device, context) = context_with(Duration::from_millis(10), &ContextOptions::default());
    let mut recorder = context.make_recorder(None).unwrap();
    let outcomes = Outcomes::default();

    recorder.add_marker("a");
    assert!(context.insert_recording_with(tracked(recorder.snap().unwrap(), 0, &outcomes)));
    assert!(context.submit(None));

    let deadline = Instant::now() + Duration::from_secs(5);
    while outcomes.lock().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
        context.check_async_work_completion();
    }
    assert_eq!(*outcomes.lock(), vec![(0, CallbackResult::Success)]);
}

#[test]
fn callbacks_fire_in_submission_order() {
    let (_device, context) = context_with(Duration::from_millis(5), &ContextOptions::default());
    let mut recorder = context.make_recorder(None).unwrap();
    let outcomes = Outcomes::default();

    for tag in 0..4 {
        recorder.add_marker(format!("frame {}", tag));
        assert!(context.insert_recording_with(tracked(recorder.snap().unwrap(), tag, &outcomes)));
        assert!(context.submit(None));
    }
    assert!(context.submit(Some(SyncToCpu::Yes)));

    let tags: Vec<usize> = outcomes.lock().iter().map(|(tag, _)| *tag).collect();
    assert_eq!(tags, vec![0, 1, 2, 3]);
}

#[test]
fn async_submits_past_the_in_flight_limit_never_wait() {
    let delay = Duration::from_millis(300);
    let (_device, context) = context_with(delay, &ContextOptions::default());
    let mut recorder = context.make_recorder(None).unwrap();
    let submits = context.options().max_in_flight_submissions as usize + 2;

    for i in 0..submits {
        recorder.add_marker(format!("{}", i));
        assert!(context.insert_recording(recorder.snap().unwrap()));
        let started = Instant::now();
        assert!(context.submit(Some(SyncToCpu::No)));
        assert!(
            started.elapsed() < delay / 2,
            "asynchronous submit {} waited {:?}",
            i,
            started.elapsed()
        );
    }
    assert!(context.outstanding_recordings() > 0);

    assert!(context.submit(Some(SyncToCpu::Yes)));
    assert_eq!(context.outstanding_recordings(), 0);
}

#[test]
fn ordered_recordings_reject_stale_sequences() {
    let options = ContextOptions {
        require_ordered_recordings: true,
        ..ContextOptions::default()
    };
    let (_device, context) = context_with(Duration::ZERO, &options);
    let mut recorder = context.make_recorder(None).unwrap();
    let outcomes = Outcomes::default();

    let first = recorder.snap().unwrap();
    let second = recorder.snap().unwrap();

    assert!(context.insert_recording_with(tracked(second, 1, &outcomes)));
    assert!(!context.insert_recording_with(tracked(first, 0, &outcomes)));
    assert_eq!(*outcomes.lock(), vec![(0, CallbackResult::Failed)]);
    assert_eq!(context.pending_recordings(), 1);

    assert!(context.submit(Some(SyncToCpu::Yes)));
    assert_eq!(outcomes.lock().len(), 2);
}

#[test]
fn recorder_option_overrides_ordering() {
    let options = ContextOptions {
        require_ordered_recordings: true,
        ..ContextOptions::default()
    };
    let (_device, context) = context_with(Duration::ZERO, &options);
    let recorder_options = RecorderOptions {
        require_ordered_recordings: Some(false),
        ..RecorderOptions::default()
    };
    let mut recorder = context.make_recorder(Some(&recorder_options)).unwrap();

    let first = recorder.snap().unwrap();
    let second = recorder.snap().unwrap();
    assert!(context.insert_recording(second));
    assert!(context.insert_recording(first));
    assert!(context.submit(Some(SyncToCpu::Yes)));
}

#[test]
fn unordered_insertion_is_accepted_by_default() {
    let (_device, context) = context_with(Duration::ZERO, &ContextOptions::default());
    let mut recorder = context.make_recorder(None).unwrap();
    let first = recorder.snap().unwrap();
    let second = recorder.snap().unwrap();
    assert!(context.insert_recording(second));
    assert!(context.insert_recording(first));
}

#[test]
fn foreign_recordings_are_rejected_and_consumed() {
    let (_a, context_a) = context_with(Duration::ZERO, &ContextOptions::default());
    let (_b, context_b) = context_with(Duration::ZERO, &ContextOptions::default());
    let mut recorder = context_a.make_recorder(None).unwrap();
    let outcomes = Outcomes::default();

    recorder.add_marker("a");
    let recording = recorder.snap().unwrap();
    assert!(!context_b.insert_recording_with(tracked(recording, 7, &outcomes)));
    assert_eq!(*outcomes.lock(), vec![(7, CallbackResult::Failed)]);
    assert_eq!(context_b.pending_recordings(), 0);
    assert_eq!(context_a.pending_recordings(), 0);
}

#[test]
fn lost_device_makes_submit_fail() {
    let (device, context) = context_with(Duration::ZERO, &ContextOptions::default());
    let mut recorder = context.make_recorder(None).unwrap();
    let outcomes = Outcomes::default();

    let info = ImageInfo::new_n32_premul((4, 4));
    let mut surface = surfaces::render_target(&recorder, &info, None, None).unwrap();
    surface.clear(Color4f::WHITE);
    assert!(context.insert_recording_with(tracked(recorder.snap().unwrap(), 0, &outcomes)));

    device.mark_lost();
    assert!(!context.submit(Some(SyncToCpu::Yes)));
    assert_eq!(*outcomes.lock(), vec![(0, CallbackResult::Failed)]);
    assert_eq!(context.pending_recordings(), 0);

    // Not retried.
    assert!(context.submit(None));
}

#[test]
fn loss_during_execution_fails_the_submission() {
    let (device, context) = context_with(Duration::from_millis(100), &ContextOptions::default());
    let mut recorder = context.make_recorder(None).unwrap();
    let outcomes = Outcomes::default();

    recorder.add_marker("doomed");
    assert!(context.insert_recording_with(tracked(recorder.snap().unwrap(), 0, &outcomes)));
    assert!(context.submit(None));

    device.mark_lost();
    assert!(!context.submit(Some(SyncToCpu::Yes)));
    assert_eq!(*outcomes.lock(), vec![(0, CallbackResult::Failed)]);
}

#[test]
fn async_failure_reaches_the_caller_through_its_callback() {
    let (device, context) = context_with(Duration::from_millis(50), &ContextOptions::default());
    let mut recorder = context.make_recorder(None).unwrap();
    let outcomes = Outcomes::default();

    recorder.add_marker("lost on the device");
    assert!(context.insert_recording_with(tracked(recorder.snap().unwrap(), 0, &outcomes)));
    assert!(context.submit(None));
    device.mark_lost();

    let deadline = Instant::now() + Duration::from_secs(5);
    while outcomes.lock().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
        // Nothing new to send: the earlier failure does not fail this call.
        assert!(context.submit(None));
    }
    assert_eq!(*outcomes.lock(), vec![(0, CallbackResult::Failed)]);
    assert!(!context.has_unfinished_gpu_work());
}

#[test]
fn dropping_a_context_flushes_pending_work() {
    let (device, context) = context_with(Duration::from_millis(10), &ContextOptions::default());
    let mut recorder = context.make_recorder(None).unwrap();
    let outcomes = Outcomes::default();

    let texture = device.create_texture((2, 2), gpu_bridge::ColorType::RGBA8888).unwrap();
    let backend_texture = gpu_bridge::BackendTexture::new_software((2, 2), &texture);
    let mut surface = surfaces::wrap_backend_texture(
        &recorder,
        &backend_texture,
        gpu_bridge::ColorType::RGBA8888,
        None,
        None,
    )
    .unwrap();
    surface.clear(Color4f::WHITE);
    assert!(context.insert_recording_with(tracked(recorder.snap().unwrap(), 0, &outcomes)));

    drop(surface);
    drop(recorder);
    drop(context);

    assert_eq!(*outcomes.lock(), vec![(0, CallbackResult::Success)]);
    assert_eq!(texture.pixel(1, 1), Some(vec![255, 255, 255, 255]));
}

#[test]
fn concurrent_inserts_and_submits_are_serialized() {
    let (_device, context) = context_with(Duration::ZERO, &ContextOptions::default());
    let context = Arc::new(context);
    let finished = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let context = Arc::clone(&context);
            let finished = Arc::clone(&finished);
            std::thread::spawn(move || {
                let mut recorder = context.make_recorder(None).unwrap();
                for _ in 0..10 {
                    recorder.add_marker("work");
                    let finished = Arc::clone(&finished);
                    let info = InsertRecordingInfo::new(recorder.snap().unwrap())
                        .with_finished(move |_| {
                            finished.fetch_add(1, Ordering::SeqCst);
                        });
                    assert!(context.insert_recording_with(info));
                    assert!(context.submit(None));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(context.submit(Some(SyncToCpu::Yes)));
    assert_eq!(finished.load(Ordering::SeqCst), 40);
}
