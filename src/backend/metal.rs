// Metal backend - metal-rs bindings over a caller-provided device and queue
//
// Handles are Objective-C objects. Every handle the bridge keeps is retained
// through the `metal` crate's owned types and released when they drop, so the
// caller may release its own references at any time.

use metal::foreign_types::ForeignTypeRef;
use metal::{
    CommandBuffer, CommandQueue, Device, MTLClearColor, MTLCommandBufferStatus, MTLLoadAction,
    MTLPixelFormat, MTLStorageMode, MTLStoreAction, MTLTextureType, MTLTextureUsage,
    RenderPassDescriptor, Texture, TextureDescriptor,
};
use std::ffi::c_void;
use std::fmt;

use super::sync::{SignaledFence, SubmitFence};
use super::{Command, GpuBackend, NativeTarget};
use crate::backend_texture::{BackendTexture, NativeTexture};
use crate::options::ContextOptions;
use crate::types::{BackendApi, ColorType, ISize, ImageInfo, Mipmapped};
use crate::{Error, Result};

/// An untyped Objective-C object pointer (`id<MTLDevice>`, `id<MTLTexture>`...).
pub type Handle = *const c_void;

pub fn pixel_format_for_color_type(color_type: ColorType) -> Option<MTLPixelFormat> {
    match color_type {
        ColorType::RGBA8888 => Some(MTLPixelFormat::RGBA8Unorm),
        ColorType::BGRA8888 => Some(MTLPixelFormat::BGRA8Unorm),
        ColorType::Alpha8 => Some(MTLPixelFormat::A8Unorm),
        ColorType::Gray8 => Some(MTLPixelFormat::R8Unorm),
        ColorType::Unknown => None,
    }
}

/// Metal-specific texture description, read from a live `MTLTexture`.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureInfo {
    pub sample_count: u32,
    pub mipmapped: Mipmapped,
    pub format: MTLPixelFormat,
    pub usage: MTLTextureUsage,
    pub storage_mode: MTLStorageMode,
    pub framebuffer_only: bool,
}

impl TextureInfo {
    /// # Safety
    /// `texture` must be null or a live `id<MTLTexture>`.
    pub(crate) unsafe fn from_handle(texture: Handle) -> Option<Self> {
        let texture = texture_ref(texture)?;
        Some(Self::from_texture(texture))
    }

    fn from_texture(texture: &metal::TextureRef) -> Self {
        Self {
            sample_count: texture.sample_count() as u32,
            mipmapped: if texture.mipmap_level_count() > 1 {
                Mipmapped::Yes
            } else {
                Mipmapped::No
            },
            format: texture.pixel_format(),
            usage: texture.usage(),
            storage_mode: texture.storage_mode(),
            framebuffer_only: texture.framebuffer_only(),
        }
    }

    pub fn is_compatible_with(&self, color_type: ColorType) -> bool {
        pixel_format_for_color_type(color_type) == Some(self.format)
    }
}

unsafe fn texture_ref<'a>(texture: Handle) -> Option<&'a metal::TextureRef> {
    if texture.is_null() {
        None
    } else {
        Some(metal::TextureRef::from_ptr(texture as *mut _))
    }
}

/// Retains `texture`. `None` for null.
///
/// # Safety
/// `texture` must be null or a live `id<MTLTexture>`.
pub(crate) unsafe fn retain_texture(texture: Handle) -> Option<Texture> {
    texture_ref(texture).map(ToOwned::to_owned)
}

/// Platform inputs for a Metal Context. Retains the device and queue.
#[derive(Clone)]
pub struct BackendContext {
    device: Device,
    queue: CommandQueue,
}

impl BackendContext {
    pub fn from_parts(device: Device, queue: CommandQueue) -> Self {
        Self { device, queue }
    }

    /// Retains raw `id<MTLDevice>` and `id<MTLCommandQueue>` handles.
    /// Returns `None` if either is null.
    ///
    /// # Safety
    /// Non-null handles must be live objects of the stated protocols.
    pub unsafe fn new(device: Handle, queue: Handle) -> Option<Self> {
        if device.is_null() || queue.is_null() {
            return None;
        }
        Some(Self {
            device: metal::DeviceRef::from_ptr(device as *mut _).to_owned(),
            queue: metal::CommandQueueRef::from_ptr(queue as *mut _).to_owned(),
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }
}

impl fmt::Debug for BackendContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("mtl::BackendContext")
            .field("device", &self.device.name())
            .finish()
    }
}

pub(crate) struct MetalTarget {
    texture: Texture,
}

impl MetalTarget {
    pub fn backend_texture(&self, dimensions: ISize) -> BackendTexture {
        let handle = metal::foreign_types::ForeignType::as_ptr(&self.texture) as Handle;
        unsafe { BackendTexture::new_metal(dimensions, handle) }
    }
}

struct MetalBackend {
    device: Device,
    queue: CommandQueue,
}

pub(crate) fn create_backend(
    context: &BackendContext,
    _options: &ContextOptions,
) -> Result<Box<dyn GpuBackend>> {
    if context.queue.device().registry_id() != context.device.registry_id() {
        return Err(Error::invalid("command queue does not belong to the device"));
    }
    log::info!("Metal backend on {}", context.device.name());
    Ok(Box::new(MetalBackend {
        device: context.device.clone(),
        queue: context.queue.clone(),
    }))
}

impl GpuBackend for MetalBackend {
    fn api(&self) -> BackendApi {
        BackendApi::Metal
    }

    // Metal exposes no device-loss query; failures surface per command buffer.
    fn is_device_lost(&self) -> bool {
        false
    }

    fn create_render_target(&self, info: &ImageInfo, mipmapped: Mipmapped) -> Result<NativeTarget> {
        let format = pixel_format_for_color_type(info.color_type)
            .ok_or_else(|| Error::invalid(format!("no Metal format for {:?}", info.color_type)))?;
        let levels = match mipmapped {
            Mipmapped::No => 1,
            Mipmapped::Yes => {
                let largest = info.width().max(info.height()).max(1) as u32;
                u64::from(32 - largest.leading_zeros())
            }
        };

        let descriptor = TextureDescriptor::new();
        descriptor.set_texture_type(MTLTextureType::D2);
        descriptor.set_pixel_format(format);
        descriptor.set_width(info.width() as u64);
        descriptor.set_height(info.height() as u64);
        descriptor.set_mipmap_level_count(levels);
        descriptor.set_usage(MTLTextureUsage::RenderTarget | MTLTextureUsage::ShaderRead);
        descriptor.set_storage_mode(MTLStorageMode::Private);

        let texture = self.device.new_texture(&descriptor);
        if metal::foreign_types::ForeignType::as_ptr(&texture).is_null() {
            return Err(Error::allocation(format!(
                "Metal refused a {}x{} {:?} texture",
                info.width(),
                info.height(),
                format
            )));
        }
        Ok(NativeTarget::Metal(MetalTarget { texture }))
    }

    fn wrap_backend_texture(&self, texture: &BackendTexture) -> Result<NativeTarget> {
        let NativeTexture::Metal(texture) = texture.native() else {
            return Err(Error::invalid("not a Metal texture"));
        };
        if texture.device().registry_id() != self.device.registry_id() {
            return Err(Error::invalid("Metal texture belongs to another device"));
        }
        if !texture.usage().contains(MTLTextureUsage::RenderTarget) {
            return Err(Error::invalid("Metal texture lacks RenderTarget usage"));
        }
        Ok(NativeTarget::Metal(MetalTarget {
            texture: texture.clone(),
        }))
    }

    fn submit(&self, commands: Vec<Command>) -> Result<Box<dyn SubmitFence>> {
        if commands.is_empty() {
            return Ok(Box::new(SignaledFence));
        }

        let command_buffer = metal::objc::rc::autoreleasepool(|| -> Result<CommandBuffer> {
            let command_buffer = self.queue.new_command_buffer();
            for command in &commands {
                match command {
                    Command::Clear { target, color } => {
                        let NativeTarget::Metal(metal_target) = &target.native else {
                            return Err(Error::invalid(format!(
                                "render target {} does not belong to the Metal backend",
                                target.id
                            )));
                        };
                        let pass = RenderPassDescriptor::new();
                        let attachment = pass
                            .color_attachments()
                            .object_at(0)
                            .ok_or_else(|| Error::allocation("no color attachment slot"))?;
                        let clear = match target.color_type {
                            ColorType::Gray8 => {
                                let l = f64::from(color.luminance());
                                MTLClearColor::new(l, l, l, f64::from(color.a))
                            }
                            _ => MTLClearColor::new(
                                f64::from(color.r),
                                f64::from(color.g),
                                f64::from(color.b),
                                f64::from(color.a),
                            ),
                        };
                        attachment.set_texture(Some(&metal_target.texture));
                        attachment.set_load_action(MTLLoadAction::Clear);
                        attachment.set_clear_color(clear);
                        attachment.set_store_action(MTLStoreAction::Store);
                        let encoder = command_buffer.new_render_command_encoder(pass);
                        encoder.end_encoding();
                    }
                    Command::Marker(label) => command_buffer.set_label(label),
                }
            }
            command_buffer.commit();
            Ok(command_buffer.to_owned())
        })?;

        Ok(Box::new(MetalFence {
            command_buffer,
            _commands: commands,
        }))
    }
}

/// Completion of one committed command buffer. Keeps its targets alive.
struct MetalFence {
    command_buffer: CommandBuffer,
    _commands: Vec<Command>,
}

impl MetalFence {
    fn status(&self) -> Result<bool> {
        match self.command_buffer.status() {
            MTLCommandBufferStatus::Completed => Ok(true),
            MTLCommandBufferStatus::Error => {
                Err(Error::submission("Metal command buffer reported an error"))
            }
            _ => Ok(false),
        }
    }
}

impl SubmitFence for MetalFence {
    fn is_signaled(&self) -> Result<bool> {
        self.status()
    }

    fn wait(&self) -> Result<()> {
        self.command_buffer.wait_until_completed();
        self.status().map(|_| ())
    }
}

impl Drop for MetalFence {
    fn drop(&mut self) {
        if !matches!(self.status(), Ok(true) | Err(_)) {
            self.command_buffer.wait_until_completed();
        }
    }
}
