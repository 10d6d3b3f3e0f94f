// Software backend - a GPU emulated on the CPU
//
// Responsibilities:
// - Device and queue objects with the same retain/release semantics as native
//   handles (`Arc` strong counts play the role of platform reference counts)
// - A GPU timeline: one worker thread per queue executes submissions in order
//   and signals a fence per submission
// - CPU-side textures the executed commands write into
// - The process-wide default device used by `Context::make_default`

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::sync::{CpuFence, SignaledFence, SubmitFence};
use super::{Command, GpuBackend, NativeTarget};
use crate::backend_texture::{BackendTexture, NativeTexture};
use crate::options::ContextOptions;
use crate::types::{BackendApi, Color4f, ColorType, ISize, ImageInfo, Mipmapped};
use crate::{Error, Result};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Creation parameters of an emulated device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoftDeviceDesc {
    pub label: String,
    /// Largest width or height a texture may have.
    pub max_texture_dimension: i32,
    /// Artificial latency added to every submission on the GPU timeline.
    pub execution_delay: Duration,
}

impl Default for SoftDeviceDesc {
    fn default() -> Self {
        Self {
            label: "software".to_string(),
            max_texture_dimension: 16384,
            execution_delay: Duration::ZERO,
        }
    }
}

/// Emulated GPU device.
#[derive(Debug)]
pub struct SoftDevice {
    id: u64,
    desc: SoftDeviceDesc,
    lost: AtomicBool,
}

impl SoftDevice {
    pub fn new(desc: SoftDeviceDesc) -> Arc<Self> {
        let device = Arc::new(Self {
            id: next_id(),
            desc,
            lost: AtomicBool::new(false),
        });
        log::debug!("Created software device {} ({})", device.id, device.desc.label);
        device
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn desc(&self) -> &SoftDeviceDesc {
        &self.desc
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// Simulates a device loss. Pending and future work fails.
    pub fn mark_lost(&self) {
        if !self.lost.swap(true, Ordering::AcqRel) {
            log::warn!("Software device {} ({}) lost", self.id, self.desc.label);
        }
    }

    /// Creates a queue with its own GPU timeline thread.
    pub fn new_queue(self: &Arc<Self>) -> Result<Arc<SoftQueue>> {
        if self.is_lost() {
            return Err(Error::device_unavailable("software device is lost"));
        }

        let (sender, receiver) = flume::unbounded::<Job>();
        let device = Arc::clone(self);
        let worker = thread::Builder::new()
            .name(format!("{}-queue", self.desc.label))
            .spawn(move || run_timeline(device, receiver))
            .map_err(|e| Error::allocation(format!("failed to spawn queue thread: {}", e)))?;

        Ok(Arc::new(SoftQueue {
            id: next_id(),
            device: Arc::clone(self),
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Allocates a zero-filled texture.
    pub fn create_texture(
        &self,
        dimensions: impl Into<ISize>,
        color_type: ColorType,
    ) -> Result<Arc<SoftTexture>> {
        let dimensions = dimensions.into();
        if self.is_lost() {
            return Err(Error::device_unavailable("software device is lost"));
        }
        if dimensions.is_empty() || color_type == ColorType::Unknown {
            return Err(Error::invalid(format!(
                "cannot create {:?} texture of size {:?}",
                color_type, dimensions
            )));
        }
        let max = self.desc.max_texture_dimension;
        if dimensions.width > max || dimensions.height > max {
            return Err(Error::allocation(format!(
                "texture {:?} exceeds max dimension {}",
                dimensions, max
            )));
        }

        let byte_size = dimensions.area() * color_type.bytes_per_pixel();
        Ok(Arc::new(SoftTexture {
            id: next_id(),
            device_id: self.id,
            dimensions,
            color_type,
            pixels: RwLock::new(vec![0; byte_size]),
        }))
    }
}

/// A texture living in CPU memory.
pub struct SoftTexture {
    id: u64,
    device_id: u64,
    dimensions: ISize,
    color_type: ColorType,
    pixels: RwLock<Vec<u8>>,
}

impl SoftTexture {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    pub fn dimensions(&self) -> ISize {
        self.dimensions
    }

    pub fn color_type(&self) -> ColorType {
        self.color_type
    }

    /// Tightly packed copy of the pixels.
    pub fn read_pixels(&self) -> Vec<u8> {
        self.pixels.read().clone()
    }

    /// Bytes of one pixel, `None` outside the texture.
    pub fn pixel(&self, x: i32, y: i32) -> Option<Vec<u8>> {
        if x < 0 || y < 0 || x >= self.dimensions.width || y >= self.dimensions.height {
            return None;
        }
        let bpp = self.color_type.bytes_per_pixel();
        let offset = (y as usize * self.dimensions.width as usize + x as usize) * bpp;
        self.pixels.read().get(offset..offset + bpp).map(<[u8]>::to_vec)
    }

    fn clear(&self, color: Color4f) {
        let encoded = self.color_type.encode(color);
        let mut pixels = self.pixels.write();
        for pixel in pixels.chunks_exact_mut(encoded.len()) {
            pixel.copy_from_slice(&encoded);
        }
    }
}

impl fmt::Debug for SoftTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftTexture")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .field("dimensions", &self.dimensions)
            .field("color_type", &self.color_type)
            .finish()
    }
}

struct Job {
    commands: Vec<Command>,
    fence: Arc<CpuFence>,
}

/// Submission queue of a software device.
pub struct SoftQueue {
    id: u64,
    device: Arc<SoftDevice>,
    sender: Mutex<Option<flume::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SoftQueue {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device(&self) -> &Arc<SoftDevice> {
        &self.device
    }

    fn submit(&self, commands: Vec<Command>) -> Result<Arc<CpuFence>> {
        if self.device.is_lost() {
            return Err(Error::submission("software device is lost"));
        }
        let fence = CpuFence::new();
        let sender = self.sender.lock();
        let sender = sender
            .as_ref()
            .ok_or_else(|| Error::submission("queue is shut down"))?;
        sender
            .send(Job {
                commands,
                fence: Arc::clone(&fence),
            })
            .map_err(|_| Error::submission("queue timeline thread exited"))?;
        Ok(fence)
    }
}

impl fmt::Debug for SoftQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftQueue")
            .field("id", &self.id)
            .field("device", &self.device.id)
            .finish()
    }
}

impl Drop for SoftQueue {
    fn drop(&mut self) {
        // Closing the channel lets the timeline drain and exit.
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                log::error!("Software queue {} timeline thread panicked", self.id);
            }
        }
    }
}

fn run_timeline(device: Arc<SoftDevice>, receiver: flume::Receiver<Job>) {
    log::trace!("Software queue timeline started for device {}", device.id);

    for Job { commands, fence } in receiver.iter() {
        if !device.desc.execution_delay.is_zero() {
            thread::sleep(device.desc.execution_delay);
        }

        if device.is_lost() {
            drop(commands);
            fence.fail("software device lost during execution");
            continue;
        }

        for command in &commands {
            match command {
                Command::Clear { target, color } => match &target.native {
                    NativeTarget::Software(texture) => texture.clear(*color),
                    #[allow(unreachable_patterns)]
                    _ => log::error!("Software queue got a foreign target {}", target.id),
                },
                Command::Marker(label) => log::trace!("marker: {}", label),
            }
        }

        // Targets are released before completion is observable.
        drop(commands);
        fence.signal();
    }

    log::trace!("Software queue timeline stopped for device {}", device.id);
}

/// Platform inputs for a software Context: a device and one of its queues.
///
/// Both are retained while the descriptor lives.
#[derive(Clone, Debug)]
pub struct BackendContext {
    device: Arc<SoftDevice>,
    queue: Arc<SoftQueue>,
}

impl BackendContext {
    pub fn new(device: &Arc<SoftDevice>, queue: &Arc<SoftQueue>) -> Self {
        Self {
            device: Arc::clone(device),
            queue: Arc::clone(queue),
        }
    }

    /// Builds a descriptor from raw handles obtained with `Arc::into_raw`,
    /// retaining both. Returns `None` if either pointer is null.
    ///
    /// # Safety
    /// Non-null pointers must come from `Arc::into_raw` and still be alive.
    pub unsafe fn from_raw(device: *const SoftDevice, queue: *const SoftQueue) -> Option<Self> {
        if device.is_null() || queue.is_null() {
            return None;
        }
        Arc::increment_strong_count(device);
        Arc::increment_strong_count(queue);
        Some(Self {
            device: Arc::from_raw(device),
            queue: Arc::from_raw(queue),
        })
    }

    pub fn device(&self) -> &Arc<SoftDevice> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<SoftQueue> {
        &self.queue
    }
}

struct SoftwareBackend {
    device: Arc<SoftDevice>,
    queue: Arc<SoftQueue>,
}

pub(crate) fn create_backend(
    context: &BackendContext,
    _options: &ContextOptions,
) -> Result<Box<dyn GpuBackend>> {
    if context.device.is_lost() {
        return Err(Error::device_unavailable("software device is lost"));
    }
    if !Arc::ptr_eq(&context.device, &context.queue.device) {
        return Err(Error::invalid("queue does not belong to the device"));
    }
    log::info!(
        "Software backend on device {} ({}), queue {}",
        context.device.id,
        context.device.desc.label,
        context.queue.id
    );
    Ok(Box::new(SoftwareBackend {
        device: Arc::clone(&context.device),
        queue: Arc::clone(&context.queue),
    }))
}

impl GpuBackend for SoftwareBackend {
    fn api(&self) -> BackendApi {
        BackendApi::Software
    }

    fn is_device_lost(&self) -> bool {
        self.device.is_lost()
    }

    fn create_render_target(&self, info: &ImageInfo, _mipmapped: Mipmapped) -> Result<NativeTarget> {
        let texture = self.device.create_texture(info.dimensions, info.color_type)?;
        Ok(NativeTarget::Software(texture))
    }

    fn wrap_backend_texture(&self, texture: &BackendTexture) -> Result<NativeTarget> {
        match texture.native() {
            NativeTexture::Software(soft) if soft.device_id == self.device.id => {
                Ok(NativeTarget::Software(Arc::clone(soft)))
            }
            NativeTexture::Software(_) => Err(Error::invalid(
                "software texture belongs to another device",
            )),
            _ => Err(Error::invalid("not a software texture")),
        }
    }

    fn submit(&self, commands: Vec<Command>) -> Result<Box<dyn SubmitFence>> {
        if commands.is_empty() {
            if self.device.is_lost() {
                return Err(Error::submission("software device is lost"));
            }
            return Ok(Box::new(SignaledFence));
        }
        Ok(Box::new(self.queue.submit(commands)?))
    }
}

static DEFAULT_DEVICE: Mutex<Option<Arc<SoftDevice>>> = parking_lot::const_mutex(None);

/// The process-wide default device, created on first use.
///
/// A lost default device is replaced by a fresh one.
pub fn default_device() -> Arc<SoftDevice> {
    let mut slot = DEFAULT_DEVICE.lock();
    if let Some(device) = slot.as_ref() {
        if !device.is_lost() {
            return Arc::clone(device);
        }
        log::warn!("Default software device was lost, creating a new one");
    }
    let device = SoftDevice::new(SoftDeviceDesc {
        label: "default".to_string(),
        ..SoftDeviceDesc::default()
    });
    *slot = Some(Arc::clone(&device));
    device
}

/// Drops the process-wide reference to the default device. Contexts that
/// still use it keep it alive. Returns whether a device existed.
pub fn shutdown_default_device() -> bool {
    let device = DEFAULT_DEVICE.lock().take();
    if let Some(device) = &device {
        log::debug!("Shutting down default software device {}", device.id);
    }
    device.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Target;

    fn clear_command(texture: &Arc<SoftTexture>, color: Color4f) -> Command {
        Command::Clear {
            target: Target::new(
                texture.dimensions(),
                texture.color_type(),
                NativeTarget::Software(Arc::clone(texture)),
                false,
                None,
            ),
            color,
        }
    }

    #[test]
    fn queue_executes_clears_in_order() {
        let device = SoftDevice::new(SoftDeviceDesc::default());
        let queue = device.new_queue().unwrap();
        let texture = device.create_texture((2, 2), ColorType::RGBA8888).unwrap();

        let first = queue
            .submit(vec![clear_command(&texture, Color4f::WHITE)])
            .unwrap();
        let second = queue
            .submit(vec![clear_command(&texture, Color4f::new(1.0, 0.0, 0.0, 1.0))])
            .unwrap();
        second.wait().unwrap();

        assert!(first.is_signaled().unwrap());
        assert_eq!(texture.pixel(1, 1), Some(vec![255, 0, 0, 255]));
        assert_eq!(Arc::strong_count(&texture), 1);
    }

    #[test]
    fn lost_device_fails_submission() {
        let device = SoftDevice::new(SoftDeviceDesc::default());
        let queue = device.new_queue().unwrap();
        device.mark_lost();
        assert!(queue.submit(vec![Command::Marker("x".into())]).is_err());
        assert!(device.new_queue().is_err());
    }

    #[test]
    fn oversized_textures_are_refused() {
        let device = SoftDevice::new(SoftDeviceDesc {
            max_texture_dimension: 64,
            ..SoftDeviceDesc::default()
        });
        assert!(matches!(
            device.create_texture((65, 1), ColorType::Alpha8),
            Err(Error::AllocationFailure(_))
        ));
    }

    #[test]
    fn raw_descriptor_retains_and_releases() {
        let device = SoftDevice::new(SoftDeviceDesc::default());
        let queue = device.new_queue().unwrap();
        let device_refs = Arc::strong_count(&device);
        let queue_refs = Arc::strong_count(&queue);

        let context =
            unsafe { BackendContext::from_raw(Arc::as_ptr(&device), Arc::as_ptr(&queue)) }.unwrap();
        assert_eq!(Arc::strong_count(&device), device_refs + 1);
        assert_eq!(Arc::strong_count(&queue), queue_refs + 1);

        drop(context);
        assert_eq!(Arc::strong_count(&device), device_refs);
        assert_eq!(Arc::strong_count(&queue), queue_refs);
    }

    #[test]
    fn mismatched_queue_is_rejected() {
        let a = SoftDevice::new(SoftDeviceDesc::default());
        let b = SoftDevice::new(SoftDeviceDesc::default());
        let queue = b.new_queue().unwrap();
        let context = BackendContext::new(&a, &queue);
        assert!(create_backend(&context, &ContextOptions::default()).is_err());
    }
}
