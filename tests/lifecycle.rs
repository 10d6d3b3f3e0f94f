// Object lifecycle: contexts, recorders, recordings, descriptors and surfaces
// on the software backend.

use gpu_bridge::software::{self, SoftDevice, SoftDeviceDesc};
use gpu_bridge::{
    surfaces, BackendApi, BackendTexture, Color4f, ColorSpace, ColorType, Context,
    ContextOptions, ImageInfo, Mipmapped, RecorderOptions, RecorderState, SyncToCpu,
    TextureInfo,
};
use std::sync::Arc;

fn software_context(options: &ContextOptions) -> (Arc<SoftDevice>, Context) {
    let device = SoftDevice::new(SoftDeviceDesc::default());
    let queue = device.new_queue().unwrap();
    let backend = software::BackendContext::new(&device, &queue);
    let context = Context::make_software(&backend, options).unwrap();
    (device, context)
}

#[test]
fn default_context_round_trip() {
    let context = Context::make_default(None).unwrap();
    assert_eq!(context.backend(), BackendApi::Software);

    let mut recorder = context.make_recorder(None).unwrap();
    let recording = recorder.snap().unwrap();
    assert!(recording.is_empty());

    assert!(context.insert_recording(recording));
    assert!(context.submit(Some(SyncToCpu::Yes)));
    assert_eq!(context.outstanding_recordings(), 0);
    assert!(!context.has_unfinished_gpu_work());
}

#[test]
fn default_texture_info_becomes_valid_after_make() {
    let mut info = TextureInfo::default();
    assert!(!info.is_valid());

    info = TextureInfo::new_software(1, Mipmapped::No, ColorType::RGBA8888);
    assert!(info.is_valid());
    assert_eq!(info.sample_count(), 1);
}

#[test]
fn recorder_snaps_distinct_recordings_and_stays_usable() {
    let (_device, context) = software_context(&ContextOptions::default());
    let mut recorder = context.make_recorder(None).unwrap();

    let mut ids = Vec::new();
    for i in 0..4 {
        assert_eq!(recorder.state(), RecorderState::Idle);
        recorder.add_marker(format!("pass {}", i));
        assert_eq!(recorder.state(), RecorderState::Recording);

        let recording = recorder.snap().unwrap();
        assert_eq!(recording.command_count(), 1);
        assert_eq!(recording.sequence(), i);
        assert_eq!(recording.recorder_id(), recorder.id());
        ids.push(recording.id());
    }

    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 4);
    assert_eq!(recorder.state(), RecorderState::Idle);
}

#[test]
fn invalid_options_reject_context_creation() {
    let device = SoftDevice::new(SoftDeviceDesc::default());
    let queue = device.new_queue().unwrap();
    let backend = software::BackendContext::new(&device, &queue);
    let options = ContextOptions {
        max_in_flight_submissions: 0,
        ..ContextOptions::default()
    };
    assert!(Context::make_software(&backend, &options).is_none());
}

#[test]
fn lost_device_refuses_new_contexts_and_recorders() {
    let (device, context) = software_context(&ContextOptions::default());
    let mut recorder = context.make_recorder(None).unwrap();
    recorder.add_marker("before loss");

    device.mark_lost();
    assert!(context.is_device_lost());
    assert!(context.make_recorder(None).is_none());
    assert!(recorder.snap().is_none());

    let queue = device.new_queue();
    assert!(queue.is_err());
}

#[test]
fn default_device_can_be_shut_down_and_recreated() {
    let first = software::default_device();
    let first_id = first.id();
    assert!(software::shutdown_default_device());

    // Contexts keep their own reference; the old device stays usable.
    let queue = first.new_queue().unwrap();
    let backend = software::BackendContext::new(&first, &queue);
    assert!(Context::make_software(&backend, &ContextOptions::default()).is_some());

    let second = software::default_device();
    assert_ne!(second.id(), first_id);
}

#[test]
fn backend_texture_assignment_releases_previous_handle() {
    let device = SoftDevice::new(SoftDeviceDesc::default());
    let a = device.create_texture((4, 4), ColorType::RGBA8888).unwrap();
    let b = device.create_texture((4, 4), ColorType::RGBA8888).unwrap();

    let mut texture = BackendTexture::new_software((4, 4), &a);
    assert!(texture.is_valid());
    assert_eq!(Arc::strong_count(&a), 2);

    texture = BackendTexture::new_software((4, 4), &b);
    assert_eq!(Arc::strong_count(&a), 1);
    assert_eq!(Arc::strong_count(&b), 2);

    let copy = texture.clone();
    assert_eq!(Arc::strong_count(&b), 3);
    drop(copy);
    drop(texture);
    assert_eq!(Arc::strong_count(&b), 1);
}

#[test]
fn render_target_surface_clears_its_texture() {
    let (_device, context) = software_context(&ContextOptions::default());
    let mut recorder = context.make_recorder(None).unwrap();

    let info = ImageInfo::new_n32_premul((8, 4));
    let mut surface = surfaces::render_target(&recorder, &info, None, None).unwrap();
    assert_eq!((surface.width(), surface.height()), (8, 4));
    assert!(!surface.is_wrapped());
    assert_eq!(recorder.budget_used(), 8 * 4 * 4);

    assert!(surface.clear(Color4f::new(0.0, 1.0, 0.0, 1.0)));
    let recording = recorder.snap().unwrap();
    assert!(context.insert_recording(recording));
    assert!(context.submit(Some(SyncToCpu::Yes)));

    let texture = surface.backend_texture();
    assert!(texture.is_valid());
    let pixels = texture.software_texture().unwrap();
    assert_eq!(pixels.pixel(7, 3), Some(vec![0, 255, 0, 255]));

    drop(texture);
    drop(surface);
    assert_eq!(recorder.budget_used(), 0);
}

#[test]
fn invalid_image_info_yields_no_surface() {
    let (_device, context) = software_context(&ContextOptions::default());
    let recorder = context.make_recorder(None).unwrap();
    let info = ImageInfo::new_n32_premul((0, 16));
    assert!(surfaces::render_target(&recorder, &info, None, None).is_none());
}

#[test]
fn budget_exhaustion_yields_no_surface() {
    let (_device, context) = software_context(&ContextOptions::default());
    let options = RecorderOptions {
        gpu_budget_bytes: 256,
        ..RecorderOptions::default()
    };
    let recorder = context.make_recorder(Some(&options)).unwrap();
    let info = ImageInfo::new_n32_premul((8, 8));

    let first = surfaces::render_target(&recorder, &info, None, None).unwrap();
    assert!(surfaces::render_target(&recorder, &info, None, None).is_none());

    drop(first);
    assert!(surfaces::render_target(&recorder, &info, None, None).is_some());
}

#[test]
fn wrapped_texture_survives_its_surface() {
    let (device, context) = software_context(&ContextOptions::default());
    let mut recorder = context.make_recorder(None).unwrap();

    let texture = device.create_texture((4, 4), ColorType::BGRA8888).unwrap();
    let backend_texture = BackendTexture::new_software((4, 4), &texture);
    assert_eq!(Arc::strong_count(&texture), 2);

    let mut surface = surfaces::wrap_backend_texture(
        &recorder,
        &backend_texture,
        ColorType::BGRA8888,
        Some(ColorSpace::Srgb),
        None,
    )
    .unwrap();
    assert!(surface.is_wrapped());
    assert_eq!(surface.color_space(), Some(ColorSpace::Srgb));
    assert_eq!(recorder.budget_used(), 0);

    surface.clear(Color4f::new(1.0, 0.0, 0.0, 1.0));
    assert!(context.insert_recording(recorder.snap().unwrap()));
    assert!(context.submit(Some(SyncToCpu::Yes)));
    drop(surface);

    assert!(backend_texture.is_valid());
    assert_eq!(Arc::strong_count(&texture), 2);
    assert_eq!(texture.pixel(0, 0), Some(vec![0, 0, 255, 255]));

    drop(backend_texture);
    assert_eq!(Arc::strong_count(&texture), 1);
}

#[test]
fn wrapping_rejects_mismatched_textures() {
    let (_device, context) = software_context(&ContextOptions::default());
    let recorder = context.make_recorder(None).unwrap();

    assert!(surfaces::wrap_backend_texture(
        &recorder,
        &BackendTexture::default(),
        ColorType::RGBA8888,
        None,
        None
    )
    .is_none());

    let other = SoftDevice::new(SoftDeviceDesc::default());
    let foreign = other.create_texture((4, 4), ColorType::RGBA8888).unwrap();
    let foreign = BackendTexture::new_software((4, 4), &foreign);
    assert!(
        surfaces::wrap_backend_texture(&recorder, &foreign, ColorType::RGBA8888, None, None)
            .is_none()
    );
}

#[test]
fn wrapping_rejects_incompatible_color_type() {
    let (device, context) = software_context(&ContextOptions::default());
    let recorder = context.make_recorder(None).unwrap();
    let texture = device.create_texture((4, 4), ColorType::RGBA8888).unwrap();
    let backend_texture = BackendTexture::new_software((4, 4), &texture);

    assert!(surfaces::wrap_backend_texture(
        &recorder,
        &backend_texture,
        ColorType::Alpha8,
        None,
        None
    )
    .is_none());
    assert_eq!(Arc::strong_count(&texture), 2);
}

#[test]
fn clear_after_recorder_drop_is_refused() {
    let (_device, context) = software_context(&ContextOptions::default());
    let recorder = context.make_recorder(None).unwrap();
    let info = ImageInfo::new_n32_premul((2, 2));
    let mut surface = surfaces::render_target(&recorder, &info, None, None).unwrap();

    drop(recorder);
    assert!(!surface.clear(Color4f::WHITE));
}
