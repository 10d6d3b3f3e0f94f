//! C boundary
//!
//! Flat `extern "C"` entry points over the Rust API. Conventions:
//!
//! * Value descriptors live in caller storage. `*_construct` writes a default
//!   value into uninitialized storage, `*_destruct` drops it; the caller pairs
//!   them exactly once. Size and alignment come from [`gb_descriptor_layout`].
//! * `*_make_*` assigns into an already constructed descriptor, releasing the
//!   previous value.
//! * Objects (`Context`, `Recorder`, `Recording`, `Surface`) are heap pointers
//!   owned by the caller and released with their `*_destruct` function.
//! * Enumerations are passed as `i32` and validated; an out-of-range value makes
//!   the call fail without side effects.
//! * No panic unwinds into the caller: a panic is logged and reported as the
//!   call's failure value.

use std::ffi::{c_char, c_void, CStr};
use std::mem::{align_of, size_of};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::software::{self, SoftDevice, SoftDeviceDesc, SoftQueue, SoftTexture};
use crate::backend_texture::BackendTexture;
use crate::context::{CallbackResult, Context, InsertRecordingInfo};
use crate::options::{ContextOptions, RecorderOptions};
use crate::recorder::Recorder;
use crate::recording::Recording;
use crate::surfaces::{self, Surface};
use crate::texture_info::TextureInfo;
use crate::types::{
    AlphaType, Color4f, ColorSpace, ColorType, ISize, ImageInfo, Mipmapped, SurfaceProps,
    SyncToCpu,
};

/// Runs `f`, turning a panic into `fallback`.
fn guard<R>(fallback: R, f: impl FnOnce() -> R) -> R {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("Panic caught at the C boundary: {}", message);
            fallback
        }
    }
}

fn enum_arg<T: TryFrom<i32, Error = crate::Error>>(value: i32) -> Option<T> {
    T::try_from(value)
        .map_err(|e| log::warn!("Rejected argument: {}", e))
        .ok()
}

fn boxed<T>(value: Option<T>) -> *mut T {
    value.map_or(ptr::null_mut(), |value| Box::into_raw(Box::new(value)))
}

unsafe fn destroy<T>(object: *mut T) {
    if !object.is_null() {
        drop(Box::from_raw(object));
    }
}

// ---------------------------------------------------------------------------
// Descriptor layout
// ---------------------------------------------------------------------------

/// Descriptor kinds whose storage the caller allocates.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GbDescriptor {
    TextureInfo = 0,
    BackendTexture = 1,
    ContextOptions = 2,
    RecorderOptions = 3,
    SoftBackendContext = 4,
    VkBackendContext = 5,
    MtlBackendContext = 6,
}

fn layout_of(kind: i32) -> Option<(usize, usize)> {
    let layout = match kind {
        0 => (size_of::<TextureInfo>(), align_of::<TextureInfo>()),
        1 => (size_of::<BackendTexture>(), align_of::<BackendTexture>()),
        2 => (size_of::<ContextOptions>(), align_of::<ContextOptions>()),
        3 => (size_of::<RecorderOptions>(), align_of::<RecorderOptions>()),
        4 => (
            size_of::<software::BackendContext>(),
            align_of::<software::BackendContext>(),
        ),
        #[cfg(backend_vulkan)]
        5 => (
            size_of::<crate::vk::BackendContext>(),
            align_of::<crate::vk::BackendContext>(),
        ),
        #[cfg(backend_metal)]
        6 => (
            size_of::<crate::mtl::BackendContext>(),
            align_of::<crate::mtl::BackendContext>(),
        ),
        _ => return None,
    };
    Some(layout)
}

/// Writes the size and alignment of a descriptor kind. Returns false for
/// unknown kinds and for backends not compiled in.
#[no_mangle]
pub unsafe extern "C" fn gb_descriptor_layout(kind: i32, size: *mut usize, align: *mut usize) -> bool {
    guard(false, || {
        let Some((s, a)) = layout_of(kind) else {
            return false;
        };
        if size.is_null() || align.is_null() {
            return false;
        }
        *size = s;
        *align = a;
        true
    })
}

/// Which backend family this build uses for `gb_context_make_default`.
#[no_mangle]
pub extern "C" fn gb_default_backend() -> i32 {
    crate::BackendApi::Software as i32
}

// ---------------------------------------------------------------------------
// TextureInfo
// ---------------------------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn gb_texture_info_construct(storage: *mut TextureInfo) {
    guard((), || {
        if !storage.is_null() {
            ptr::write(storage, TextureInfo::default());
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn gb_texture_info_destruct(info: *mut TextureInfo) {
    guard((), || {
        if !info.is_null() {
            ptr::drop_in_place(info);
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn gb_texture_info_is_valid(info: *const TextureInfo) -> bool {
    guard(false, || info.as_ref().is_some_and(TextureInfo::is_valid))
}

/// Returns whether `info` is valid afterwards.
#[no_mangle]
pub unsafe extern "C" fn gb_texture_info_make_software(
    info: *mut TextureInfo,
    sample_count: u32,
    mipmapped: i32,
    color_type: i32,
) -> bool {
    guard(false, || {
        let Some(info) = info.as_mut() else {
            return false;
        };
        let (Some(mipmapped), Some(color_type)) = (enum_arg(mipmapped), enum_arg(color_type))
        else {
            return false;
        };
        *info = TextureInfo::new_software(sample_count, mipmapped, color_type);
        info.is_valid()
    })
}

#[cfg(backend_vulkan)]
#[no_mangle]
pub unsafe extern "C" fn gb_texture_info_make_vulkan(
    info: *mut TextureInfo,
    vk_info: *const crate::vk::TextureInfo,
) -> bool {
    guard(false, || {
        let (Some(info), Some(vk_info)) = (info.as_mut(), vk_info.as_ref()) else {
            return false;
        };
        *info = TextureInfo::new_vulkan(vk_info);
        info.is_valid()
    })
}

#[cfg(backend_metal)]
#[no_mangle]
pub unsafe extern "C" fn gb_texture_info_make_metal(
    info: *mut TextureInfo,
    texture: crate::mtl::Handle,
) -> bool {
    guard(false, || {
        let Some(info) = info.as_mut() else {
            return false;
        };
        *info = TextureInfo::new_metal(texture);
        info.is_valid()
    })
}

/// Heap-allocates a Vulkan texture description. Release with
/// `gb_vk_texture_info_destruct`. Null for out-of-range enum values.
#[cfg(backend_vulkan)]
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn gb_vk_texture_info_make(
    sample_count: u32,
    mipmapped: i32,
    flags: u32,
    format: i32,
    tiling: i32,
    usage: u32,
    sharing_mode: i32,
    aspect_mask: u32,
) -> *mut crate::vk::TextureInfo {
    use ash::vk;

    guard(ptr::null_mut(), || {
        let Some(mipmapped) = enum_arg(mipmapped) else {
            return ptr::null_mut();
        };
        boxed(Some(crate::vk::TextureInfo {
            sample_count,
            mipmapped,
            flags: vk::ImageCreateFlags::from_raw(flags),
            format: vk::Format::from_raw(format),
            tiling: vk::ImageTiling::from_raw(tiling),
            usage: vk::ImageUsageFlags::from_raw(usage),
            sharing_mode: vk::SharingMode::from_raw(sharing_mode),
            aspect_mask: vk::ImageAspectFlags::from_raw(aspect_mask),
            ycbcr_conversion_info: Default::default(),
        }))
    })
}

#[cfg(backend_vulkan)]
#[no_mangle]
pub unsafe extern "C" fn gb_vk_texture_info_destruct(info: *mut crate::vk::TextureInfo) {
    guard((), || destroy(info))
}

// ---------------------------------------------------------------------------
// BackendTexture
// ---------------------------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn gb_backend_texture_construct(storage: *mut BackendTexture) {
    guard((), || {
        if !storage.is_null() {
            ptr::write(storage, BackendTexture::default());
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn gb_backend_texture_destruct(texture: *mut BackendTexture) {
    guard((), || {
        if !texture.is_null() {
            ptr::drop_in_place(texture);
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn gb_backend_texture_is_valid(texture: *const BackendTexture) -> bool {
    guard(false, || texture.as_ref().is_some_and(BackendTexture::is_valid))
}

#[no_mangle]
pub unsafe extern "C" fn gb_backend_texture_dimensions(
    texture: *const BackendTexture,
    dimensions: *mut ISize,
) -> bool {
    guard(false, || {
        let (Some(texture), Some(dimensions)) = (texture.as_ref(), dimensions.as_mut()) else {
            return false;
        };
        *dimensions = texture.dimensions();
        true
    })
}

/// Copies the texture's format into a constructed `TextureInfo`.
#[no_mangle]
pub unsafe extern "C" fn gb_backend_texture_info(
    texture: *const BackendTexture,
    info: *mut TextureInfo,
) -> bool {
    guard(false, || {
        let (Some(texture), Some(info)) = (texture.as_ref(), info.as_mut()) else {
            return false;
        };
        *info = texture.info();
        info.is_valid()
    })
}

#[no_mangle]
pub unsafe extern "C" fn gb_backend_texture_make_software(
    texture: *mut BackendTexture,
    width: i32,
    height: i32,
    soft_texture: *const SoftTexture,
) -> bool {
    guard(false, || {
        let Some(texture) = texture.as_mut() else {
            return false;
        };
        let Some(soft) = borrow_arc(soft_texture) else {
            return false;
        };
        *texture = BackendTexture::new_software((width, height), &soft);
        texture.is_valid()
    })
}

#[cfg(backend_vulkan)]
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn gb_backend_texture_make_vulkan(
    texture: *mut BackendTexture,
    width: i32,
    height: i32,
    vk_info: *const crate::vk::TextureInfo,
    layout: i32,
    queue_family_index: u32,
    image: u64,
    memory: u64,
    offset: u64,
    size: u64,
) -> bool {
    use ash::vk::{self, Handle};

    guard(false, || {
        let (Some(texture), Some(vk_info)) = (texture.as_mut(), vk_info.as_ref()) else {
            return false;
        };
        *texture = BackendTexture::new_vulkan(
            (width, height),
            vk_info,
            vk::ImageLayout::from_raw(layout),
            queue_family_index,
            vk::Image::from_raw(image),
            crate::vk::Alloc {
                memory: vk::DeviceMemory::from_raw(memory),
                offset,
                size,
                flags: 0,
            },
        );
        texture.is_valid()
    })
}

#[cfg(backend_metal)]
#[no_mangle]
pub unsafe extern "C" fn gb_backend_texture_make_metal(
    texture: *mut BackendTexture,
    width: i32,
    height: i32,
    mtl_texture: crate::mtl::Handle,
) -> bool {
    guard(false, || {
        let Some(texture) = texture.as_mut() else {
            return false;
        };
        *texture = BackendTexture::new_metal((width, height), mtl_texture);
        texture.is_valid()
    })
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn gb_context_options_construct(storage: *mut ContextOptions) {
    guard((), || {
        if !storage.is_null() {
            ptr::write(storage, ContextOptions::default());
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn gb_context_options_destruct(options: *mut ContextOptions) {
    guard((), || {
        if !options.is_null() {
            ptr::drop_in_place(options);
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn gb_context_options_set(
    options: *mut ContextOptions,
    require_ordered_recordings: bool,
    max_in_flight_submissions: u32,
) -> bool {
    guard(false, || {
        let Some(options) = options.as_mut() else {
            return false;
        };
        options.require_ordered_recordings = require_ordered_recordings;
        options.max_in_flight_submissions = max_in_flight_submissions;
        true
    })
}

#[no_mangle]
pub unsafe extern "C" fn gb_recorder_options_construct(storage: *mut RecorderOptions) {
    guard((), || {
        if !storage.is_null() {
            ptr::write(storage, RecorderOptions::default());
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn gb_recorder_options_destruct(options: *mut RecorderOptions) {
    guard((), || {
        if !options.is_null() {
            ptr::drop_in_place(options);
        }
    })
}

/// `require_ordered`: negative inherits the context option, 0 = no, 1 = yes.
#[no_mangle]
pub unsafe extern "C" fn gb_recorder_options_set(
    options: *mut RecorderOptions,
    gpu_budget_bytes: u64,
    require_ordered: i32,
) -> bool {
    guard(false, || {
        let Some(options) = options.as_mut() else {
            return false;
        };
        options.gpu_budget_bytes = gpu_budget_bytes;
        options.require_ordered_recordings = match require_ordered {
            v if v < 0 => None,
            0 => Some(false),
            _ => Some(true),
        };
        true
    })
}

// ---------------------------------------------------------------------------
// Software platform objects
// ---------------------------------------------------------------------------

/// Clones the `Arc` behind a raw pointer obtained from `Arc::into_raw`.
unsafe fn borrow_arc<T>(raw: *const T) -> Option<Arc<T>> {
    if raw.is_null() {
        return None;
    }
    Arc::increment_strong_count(raw);
    Some(Arc::from_raw(raw))
}

unsafe fn release_arc<T>(raw: *const T) {
    if !raw.is_null() {
        Arc::decrement_strong_count(raw);
    }
}

/// New software device; returns a +1 reference. `label` may be null.
#[no_mangle]
pub unsafe extern "C" fn gb_soft_device_create(
    label: *const c_char,
    max_texture_dimension: i32,
    execution_delay_us: u64,
) -> *const SoftDevice {
    guard(ptr::null(), || {
        let mut desc = SoftDeviceDesc::default();
        if !label.is_null() {
            desc.label = CStr::from_ptr(label).to_string_lossy().into_owned();
        }
        if max_texture_dimension > 0 {
            desc.max_texture_dimension = max_texture_dimension;
        }
        desc.execution_delay = Duration::from_micros(execution_delay_us);
        Arc::into_raw(SoftDevice::new(desc))
    })
}

/// The process-wide default device; returns a +1 reference.
#[no_mangle]
pub extern "C" fn gb_soft_device_default() -> *const SoftDevice {
    guard(ptr::null(), || Arc::into_raw(software::default_device()))
}

#[no_mangle]
pub unsafe extern "C" fn gb_soft_device_release(device: *const SoftDevice) {
    guard((), || release_arc(device))
}

#[no_mangle]
pub unsafe extern "C" fn gb_soft_device_mark_lost(device: *const SoftDevice) {
    guard((), || {
        if let Some(device) = device.as_ref() {
            device.mark_lost();
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn gb_soft_queue_create(device: *const SoftDevice) -> *const SoftQueue {
    guard(ptr::null(), || {
        let Some(device) = borrow_arc(device) else {
            return ptr::null();
        };
        match device.new_queue() {
            Ok(queue) => Arc::into_raw(queue),
            Err(e) => {
                log::warn!("gb_soft_queue_create: {}", e);
                ptr::null()
            }
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn gb_soft_queue_release(queue: *const SoftQueue) {
    guard((), || release_arc(queue))
}

#[no_mangle]
pub unsafe extern "C" fn gb_soft_texture_create(
    device: *const SoftDevice,
    width: i32,
    height: i32,
    color_type: i32,
) -> *const SoftTexture {
    guard(ptr::null(), || {
        let (Some(device), Some(color_type)) = (device.as_ref(), enum_arg::<ColorType>(color_type))
        else {
            return ptr::null();
        };
        match device.create_texture((width, height), color_type) {
            Ok(texture) => Arc::into_raw(texture),
            Err(e) => {
                log::warn!("gb_soft_texture_create: {}", e);
                ptr::null()
            }
        }
    })
}

/// Copies up to `len` bytes of pixels into `out`; returns the bytes written.
#[no_mangle]
pub unsafe extern "C" fn gb_soft_texture_read_pixels(
    texture: *const SoftTexture,
    out: *mut u8,
    len: usize,
) -> usize {
    guard(0, || {
        let Some(texture) = texture.as_ref() else {
            return 0;
        };
        if out.is_null() {
            return 0;
        }
        let pixels = texture.read_pixels();
        let count = pixels.len().min(len);
        ptr::copy_nonoverlapping(pixels.as_ptr(), out, count);
        count
    })
}

#[no_mangle]
pub unsafe extern "C" fn gb_soft_texture_release(texture: *const SoftTexture) {
    guard((), || release_arc(texture))
}

/// Constructs a software backend context in caller storage, retaining both
/// handles. Returns false (storage untouched, nothing to destruct) if either
/// pointer is null.
#[no_mangle]
pub unsafe extern "C" fn gb_soft_backend_context_construct(
    storage: *mut software::BackendContext,
    device: *const SoftDevice,
    queue: *const SoftQueue,
) -> bool {
    guard(false, || {
        if storage.is_null() {
            return false;
        }
        match software::BackendContext::from_raw(device, queue) {
            Some(context) => {
                ptr::write(storage, context);
                true
            }
            None => false,
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn gb_soft_backend_context_destruct(context: *mut software::BackendContext) {
    guard((), || {
        if !context.is_null() {
            ptr::drop_in_place(context);
        }
    })
}

#[cfg(backend_vulkan)]
#[no_mangle]
pub unsafe extern "C" fn gb_vk_backend_context_construct(
    storage: *mut crate::vk::BackendContext,
    get_instance_proc_addr: Option<ash::vk::PFN_vkGetInstanceProcAddr>,
    instance: u64,
    physical_device: u64,
    device: u64,
    queue: u64,
    queue_family_index: u32,
) -> bool {
    use ash::vk::{self, Handle};

    guard(false, || {
        let Some(get_instance_proc_addr) = get_instance_proc_addr else {
            return false;
        };
        if storage.is_null() {
            return false;
        }
        match crate::vk::BackendContext::from_raw(
            get_instance_proc_addr,
            vk::Instance::from_raw(instance),
            vk::PhysicalDevice::from_raw(physical_device),
            vk::Device::from_raw(device),
            vk::Queue::from_raw(queue),
            queue_family_index,
        ) {
            Some(context) => {
                ptr::write(storage, context);
                true
            }
            None => false,
        }
    })
}

#[cfg(backend_vulkan)]
#[no_mangle]
pub unsafe extern "C" fn gb_vk_backend_context_destruct(context: *mut crate::vk::BackendContext) {
    guard((), || {
        if !context.is_null() {
            ptr::drop_in_place(context);
        }
    })
}

#[cfg(backend_metal)]
#[no_mangle]
pub unsafe extern "C" fn gb_mtl_backend_context_construct(
    storage: *mut crate::mtl::BackendContext,
    device: crate::mtl::Handle,
    queue: crate::mtl::Handle,
) -> bool {
    guard(false, || {
        if storage.is_null() {
            return false;
        }
        match crate::mtl::BackendContext::new(device, queue) {
            Some(context) => {
                ptr::write(storage, context);
                true
            }
            None => false,
        }
    })
}

#[cfg(backend_metal)]
#[no_mangle]
pub unsafe extern "C" fn gb_mtl_backend_context_destruct(context: *mut crate::mtl::BackendContext) {
    guard((), || {
        if !context.is_null() {
            ptr::drop_in_place(context);
        }
    })
}

#[no_mangle]
pub extern "C" fn gb_shutdown_default_device() -> bool {
    guard(false, software::shutdown_default_device)
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// `options` may be null for defaults.
#[no_mangle]
pub unsafe extern "C" fn gb_context_make_default(options: *const ContextOptions) -> *mut Context {
    guard(ptr::null_mut(), || boxed(Context::make_default(options.as_ref())))
}

#[no_mangle]
pub unsafe extern "C" fn gb_context_make_software(
    backend: *const software::BackendContext,
    options: *const ContextOptions,
) -> *mut Context {
    guard(ptr::null_mut(), || {
        let Some(backend) = backend.as_ref() else {
            return ptr::null_mut();
        };
        let defaults = ContextOptions::default();
        boxed(Context::make_software(
            backend,
            options.as_ref().unwrap_or(&defaults),
        ))
    })
}

#[cfg(backend_vulkan)]
#[no_mangle]
pub unsafe extern "C" fn gb_context_make_vulkan(
    backend: *const crate::vk::BackendContext,
    options: *const ContextOptions,
) -> *mut Context {
    guard(ptr::null_mut(), || {
        let Some(backend) = backend.as_ref() else {
            return ptr::null_mut();
        };
        let defaults = ContextOptions::default();
        boxed(Context::make_vulkan(
            backend,
            options.as_ref().unwrap_or(&defaults),
        ))
    })
}

#[cfg(backend_metal)]
#[no_mangle]
pub unsafe extern "C" fn gb_context_make_metal(
    backend: *const crate::mtl::BackendContext,
    options: *const ContextOptions,
) -> *mut Context {
    guard(ptr::null_mut(), || {
        let Some(backend) = backend.as_ref() else {
            return ptr::null_mut();
        };
        let defaults = ContextOptions::default();
        boxed(Context::make_metal(
            backend,
            options.as_ref().unwrap_or(&defaults),
        ))
    })
}

/// Submits pending work synchronously, then releases the context.
#[no_mangle]
pub unsafe extern "C" fn gb_context_destruct(context: *mut Context) {
    guard((), || destroy(context))
}

#[no_mangle]
pub unsafe extern "C" fn gb_context_make_recorder(
    context: *const Context,
    options: *const RecorderOptions,
) -> *mut Recorder {
    guard(ptr::null_mut(), || {
        let Some(context) = context.as_ref() else {
            return ptr::null_mut();
        };
        boxed(context.make_recorder(options.as_ref()))
    })
}

/// Takes ownership of `recording` whatever the outcome.
#[no_mangle]
pub unsafe extern "C" fn gb_context_insert_recording(
    context: *const Context,
    recording: *mut Recording,
) -> bool {
    guard(false, || {
        if recording.is_null() {
            return false;
        }
        let recording = *Box::from_raw(recording);
        match context.as_ref() {
            Some(context) => context.insert_recording(recording),
            None => false,
        }
    })
}

pub type GbFinishedProc = unsafe extern "C" fn(user_data: *mut c_void, success: bool);

struct CallerData(*mut c_void);

// The caller promises the user data may be used from the thread that retires
// the submission.
unsafe impl Send for CallerData {}

/// Like `gb_context_insert_recording`; `finished` is called exactly once with
/// the outcome, possibly before this function returns. If the context pointer
/// is null the recording is released and `finished` is not called.
#[no_mangle]
pub unsafe extern "C" fn gb_context_insert_recording_with_callback(
    context: *const Context,
    recording: *mut Recording,
    finished: Option<GbFinishedProc>,
    user_data: *mut c_void,
) -> bool {
    guard(false, || {
        if recording.is_null() {
            return false;
        }
        let recording = *Box::from_raw(recording);
        let Some(context) = context.as_ref() else {
            return false;
        };
        let mut info = InsertRecordingInfo::new(recording);
        if let Some(finished) = finished {
            let user_data = CallerData(user_data);
            info = info.with_finished(move |result| {
                let user_data = user_data;
                finished(user_data.0, result == CallbackResult::Success)
            });
        }
        context.insert_recording_with(info)
    })
}

/// `sync_to_cpu`: 0 = No, 1 = Yes.
#[no_mangle]
pub unsafe extern "C" fn gb_context_submit(context: *const Context, sync_to_cpu: i32) -> bool {
    guard(false, || {
        let (Some(context), Some(sync)) = (context.as_ref(), enum_arg::<SyncToCpu>(sync_to_cpu))
        else {
            return false;
        };
        context.submit(Some(sync))
    })
}

#[no_mangle]
pub unsafe extern "C" fn gb_context_check_async_work_completion(context: *const Context) {
    guard((), || {
        if let Some(context) = context.as_ref() {
            context.check_async_work_completion();
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn gb_context_has_unfinished_gpu_work(context: *const Context) -> bool {
    guard(false, || {
        context
            .as_ref()
            .is_some_and(Context::has_unfinished_gpu_work)
    })
}

// ---------------------------------------------------------------------------
// Recorder / Recording
// ---------------------------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn gb_recorder_destruct(recorder: *mut Recorder) {
    guard((), || destroy(recorder))
}

/// Null if the device was lost.
#[no_mangle]
pub unsafe extern "C" fn gb_recorder_snap(recorder: *mut Recorder) -> *mut Recording {
    guard(ptr::null_mut(), || match recorder.as_mut() {
        Some(recorder) => boxed(recorder.snap()),
        None => ptr::null_mut(),
    })
}

#[no_mangle]
pub unsafe extern "C" fn gb_recording_destruct(recording: *mut Recording) {
    guard((), || destroy(recording))
}

// ---------------------------------------------------------------------------
// Surfaces
// ---------------------------------------------------------------------------

/// `ImageInfo` with enums as plain integers.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct GbImageInfo {
    pub width: i32,
    pub height: i32,
    pub color_type: i32,
    pub alpha_type: i32,
}

impl GbImageInfo {
    fn to_image_info(self) -> Option<ImageInfo> {
        Some(ImageInfo::new(
            (self.width, self.height),
            enum_arg::<ColorType>(self.color_type)?,
            enum_arg::<AlphaType>(self.alpha_type)?,
        ))
    }
}

#[no_mangle]
pub unsafe extern "C" fn gb_surface_make(
    recorder: *const Recorder,
    info: *const GbImageInfo,
    mipmapped: i32,
    props: *const SurfaceProps,
) -> *mut Surface {
    guard(ptr::null_mut(), || {
        let (Some(recorder), Some(info)) = (recorder.as_ref(), info.as_ref()) else {
            return ptr::null_mut();
        };
        let (Some(info), Some(mipmapped)) = (info.to_image_info(), enum_arg::<Mipmapped>(mipmapped))
        else {
            return ptr::null_mut();
        };
        boxed(surfaces::render_target(
            recorder,
            &info,
            Some(mipmapped),
            props.as_ref(),
        ))
    })
}

/// `color_space`: negative for none.
#[no_mangle]
pub unsafe extern "C" fn gb_surface_make_wrapped(
    recorder: *const Recorder,
    texture: *const BackendTexture,
    color_type: i32,
    color_space: i32,
    props: *const SurfaceProps,
) -> *mut Surface {
    guard(ptr::null_mut(), || {
        let (Some(recorder), Some(texture)) = (recorder.as_ref(), texture.as_ref()) else {
            return ptr::null_mut();
        };
        let Some(color_type) = enum_arg::<ColorType>(color_type) else {
            return ptr::null_mut();
        };
        let color_space = if color_space < 0 {
            None
        } else {
            match enum_arg::<ColorSpace>(color_space) {
                Some(space) => Some(space),
                None => return ptr::null_mut(),
            }
        };
        boxed(surfaces::wrap_backend_texture(
            recorder,
            texture,
            color_type,
            color_space,
            props.as_ref(),
        ))
    })
}

#[no_mangle]
pub unsafe extern "C" fn gb_surface_clear(surface: *mut Surface, color: Color4f) -> bool {
    guard(false, || {
        surface
            .as_mut()
            .is_some_and(|surface| surface.clear(color))
    })
}

/// Writes a non-owning view of the surface's texture into a constructed
/// `BackendTexture`.
#[no_mangle]
pub unsafe extern "C" fn gb_surface_backend_texture(
    surface: *const Surface,
    texture: *mut BackendTexture,
) -> bool {
    guard(false, || {
        let (Some(surface), Some(texture)) = (surface.as_ref(), texture.as_mut()) else {
            return false;
        };
        *texture = surface.backend_texture();
        texture.is_valid()
    })
}

#[no_mangle]
pub unsafe extern "C" fn gb_surface_destruct(surface: *mut Surface) {
    guard((), || destroy(surface))
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Installs the logger once. `level` may be null (then `RUST_LOG` or "info").
/// Returns false if a logger was already installed.
#[no_mangle]
pub unsafe extern "C" fn gb_init_logging(level: *const c_char) -> bool {
    guard(false, || {
        let mut config = crate::config::LoggingConfig::default();
        if !level.is_null() {
            config.level = CStr::from_ptr(level).to_string_lossy().into_owned();
        }
        crate::logging::init_logging(&config)
    })
}
