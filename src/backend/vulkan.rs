// Vulkan backend - ash bindings over a caller-owned device
//
// Responsibilities:
// - Load instance/device function tables from caller handles
// - Render targets: images with dedicated device-local memory
// - Submission: one primary command buffer + fence per submit
//
// The caller owns the VkInstance, VkDevice and VkQueue. The bridge never
// destroys them and only destroys objects it created itself (command pool,
// command buffers, fences, render-target images and their memory). Access to
// the queue is serialized internally; the caller must not submit to the same
// queue concurrently from outside the bridge.

use ash::vk;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::sync::{SignaledFence, SubmitFence};
use super::{Command, GpuBackend, NativeTarget, Target};
use crate::backend_texture::{BackendTexture, NativeTexture};
use crate::options::ContextOptions;
use crate::texture_info::TextureSpec;
use crate::types::{BackendApi, Color4f, ColorType, ISize, ImageInfo, Mipmapped};
use crate::{Error, Result};

/// Vulkan format a surface of `color_type` renders into.
pub fn format_for_color_type(color_type: ColorType) -> Option<vk::Format> {
    match color_type {
        ColorType::RGBA8888 => Some(vk::Format::R8G8B8A8_UNORM),
        ColorType::BGRA8888 => Some(vk::Format::B8G8R8A8_UNORM),
        ColorType::Alpha8 | ColorType::Gray8 => Some(vk::Format::R8_UNORM),
        ColorType::Unknown => None,
    }
}

/// Sampler YCbCr conversion parameters of a texture. Default means "none".
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct YcbcrConversionInfo {
    pub format: vk::Format,
    pub external_format: u64,
    pub model: vk::SamplerYcbcrModelConversion,
    pub range: vk::SamplerYcbcrRange,
    pub x_chroma_offset: vk::ChromaLocation,
    pub y_chroma_offset: vk::ChromaLocation,
    pub chroma_filter: vk::Filter,
    pub force_explicit_reconstruction: bool,
    pub format_features: vk::FormatFeatureFlags,
}

impl YcbcrConversionInfo {
    pub fn is_valid(&self) -> bool {
        self.format != vk::Format::UNDEFINED || self.external_format != 0
    }
}

/// Vulkan-specific texture description.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureInfo {
    pub sample_count: u32,
    pub mipmapped: Mipmapped,
    pub flags: vk::ImageCreateFlags,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub sharing_mode: vk::SharingMode,
    pub aspect_mask: vk::ImageAspectFlags,
    pub ycbcr_conversion_info: YcbcrConversionInfo,
}

impl Default for TextureInfo {
    fn default() -> Self {
        Self {
            sample_count: 1,
            mipmapped: Mipmapped::No,
            flags: vk::ImageCreateFlags::empty(),
            format: vk::Format::UNDEFINED,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::empty(),
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            aspect_mask: vk::ImageAspectFlags::COLOR,
            ycbcr_conversion_info: YcbcrConversionInfo::default(),
        }
    }
}

impl TextureInfo {
    /// Description of the render targets the bridge allocates itself.
    pub fn render_target(format: vk::Format, mipmapped: Mipmapped) -> Self {
        Self {
            mipmapped,
            format,
            usage: RENDER_TARGET_USAGE,
            ..Self::default()
        }
    }
}

const RENDER_TARGET_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::TRANSFER_SRC.as_raw()
        | vk::ImageUsageFlags::TRANSFER_DST.as_raw()
        | vk::ImageUsageFlags::SAMPLED.as_raw(),
);

/// Memory bound to an image.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Alloc {
    pub memory: vk::DeviceMemory,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub flags: u32,
}

/// Borrowed caller image plus the layout it is in (and must be left in).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ImageHandle {
    pub image: vk::Image,
    pub layout: vk::ImageLayout,
    pub queue_family_index: u32,
    pub alloc: Alloc,
}

/// Platform inputs for a Vulkan Context.
///
/// Holds loaded function tables for a caller-owned instance and device.
/// Nothing is destroyed when the descriptor is dropped.
#[derive(Clone)]
pub struct BackendContext {
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: vk::Queue,
    queue_family_index: u32,
}

impl BackendContext {
    /// # Safety
    /// All handles must be valid, created from `instance`, and outlive every
    /// Context made from this descriptor. `queue` must belong to
    /// `queue_family_index` on `device`.
    pub unsafe fn new(
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue: vk::Queue,
        queue_family_index: u32,
    ) -> Self {
        Self {
            instance,
            physical_device,
            device,
            queue,
            queue_family_index,
        }
    }

    /// Loads function tables through `get_instance_proc_addr` for raw handles
    /// coming from the C boundary. Returns `None` if any handle is null.
    ///
    /// # Safety
    /// Same contract as [`BackendContext::new`]; `get_instance_proc_addr` must
    /// be the loader entry point the instance was created with.
    pub unsafe fn from_raw(
        get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
        instance: vk::Instance,
        physical_device: vk::PhysicalDevice,
        device: vk::Device,
        queue: vk::Queue,
        queue_family_index: u32,
    ) -> Option<Self> {
        if instance == vk::Instance::null()
            || physical_device == vk::PhysicalDevice::null()
            || device == vk::Device::null()
            || queue == vk::Queue::null()
        {
            return None;
        }
        let static_fn = vk::StaticFn {
            get_instance_proc_addr,
        };
        let instance = ash::Instance::load(&static_fn, instance);
        let device = ash::Device::load(instance.fp_v1_0(), device);
        Some(Self::new(
            instance,
            physical_device,
            device,
            queue,
            queue_family_index,
        ))
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }
}

impl fmt::Debug for BackendContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("vk::BackendContext")
            .field("instance", &self.instance.handle())
            .field("physical_device", &self.physical_device)
            .field("device", &self.device.handle())
            .field("queue", &self.queue)
            .field("queue_family_index", &self.queue_family_index)
            .finish()
    }
}

struct VulkanShared {
    device: ash::Device,
    queue: Mutex<vk::Queue>,
    queue_family_index: u32,
    // Pools are externally synchronized
    command_pool: Mutex<vk::CommandPool>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    lost: AtomicBool,
}

impl VulkanShared {
    /// Converts a Vulkan result into an error, latching device loss.
    fn check(&self, result: vk::Result) -> Error {
        if result == vk::Result::ERROR_DEVICE_LOST && !self.lost.swap(true, Ordering::AcqRel) {
            log::error!("Vulkan device lost");
        }
        Error::Vulkan(result)
    }

    fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> Result<u32> {
        let memory = &self.memory_properties;
        (0..memory.memory_type_count)
            .find(|&i| {
                (type_filter & (1 << i)) != 0
                    && memory.memory_types[i as usize]
                        .property_flags
                        .contains(properties)
            })
            .ok_or_else(|| Error::allocation("no suitable memory type"))
    }
}

impl Drop for VulkanShared {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.queue_wait_idle(*self.queue.get_mut());
            self.device
                .destroy_command_pool(*self.command_pool.get_mut(), None);
        }
        log::debug!("Destroyed Vulkan command pool");
    }
}

/// A Vulkan image a surface renders into.
pub(crate) struct VulkanTarget {
    shared: Arc<VulkanShared>,
    image: vk::Image,
    info: TextureInfo,
    /// Layout the image is left in after each submission.
    final_layout: vk::ImageLayout,
    queue_family_index: u32,
    alloc: Alloc,
    owned: bool,
}

impl VulkanTarget {
    pub fn backend_texture(&self, dimensions: ISize) -> BackendTexture {
        unsafe {
            BackendTexture::new_vulkan(
                dimensions,
                &self.info,
                self.final_layout,
                self.queue_family_index,
                self.image,
                self.alloc,
            )
        }
    }

    fn record_clear(&self, cmd: vk::CommandBuffer, color_type: ColorType, color: Color4f) {
        let device = &self.shared.device;
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        };

        // The clear covers every texel, so prior contents can be discarded.
        let to_transfer = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(range)
            .build();

        let to_final = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(self.final_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(range)
            .build();

        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );
            device.cmd_clear_color_image(
                cmd,
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear_value(color_type, color),
                &[range],
            );
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_final],
            );
        }
    }
}

impl Drop for VulkanTarget {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        unsafe {
            self.shared.device.destroy_image(self.image, None);
            self.shared.device.free_memory(self.alloc.memory, None);
        }
    }
}

fn clear_value(color_type: ColorType, color: Color4f) -> vk::ClearColorValue {
    let float32 = match color_type {
        ColorType::Alpha8 => [color.a, 0.0, 0.0, 0.0],
        ColorType::Gray8 => [color.luminance(), 0.0, 0.0, 0.0],
        _ => color.to_array(),
    };
    vk::ClearColorValue { float32 }
}

fn mip_levels(dimensions: ISize, mipmapped: Mipmapped) -> u32 {
    match mipmapped {
        Mipmapped::No => 1,
        Mipmapped::Yes => {
            let largest = dimensions.width.max(dimensions.height).max(1) as u32;
            32 - largest.leading_zeros()
        }
    }
}

struct VulkanBackend {
    shared: Arc<VulkanShared>,
}

pub(crate) fn create_backend(
    context: &BackendContext,
    _options: &ContextOptions,
) -> Result<Box<dyn GpuBackend>> {
    let device = context.device.clone();

    let pool_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(context.queue_family_index)
        // TRANSIENT: one buffer per submission, freed on retire
        .flags(
            vk::CommandPoolCreateFlags::TRANSIENT
                | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        );
    let command_pool = unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
        if e == vk::Result::ERROR_DEVICE_LOST {
            Error::device_unavailable("Vulkan device lost")
        } else {
            Error::Vulkan(e)
        }
    })?;

    let memory_properties = unsafe {
        context
            .instance
            .get_physical_device_memory_properties(context.physical_device)
    };

    log::info!(
        "Vulkan backend on device {:?}, queue family {}",
        device.handle(),
        context.queue_family_index
    );

    Ok(Box::new(VulkanBackend {
        shared: Arc::new(VulkanShared {
            device,
            queue: Mutex::new(context.queue),
            queue_family_index: context.queue_family_index,
            command_pool: Mutex::new(command_pool),
            memory_properties,
            lost: AtomicBool::new(false),
        }),
    }))
}

impl VulkanBackend {
    fn allocate_image(&self, info: &ImageInfo, texture: &TextureInfo) -> Result<(vk::Image, Alloc)> {
        let device = &self.shared.device;
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: info.width() as u32,
                height: info.height() as u32,
                depth: 1,
            })
            .mip_levels(mip_levels(info.dimensions, texture.mipmapped))
            .array_layers(1)
            .format(texture.format)
            .tiling(texture.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(texture.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(texture.sharing_mode);

        let image = unsafe { device.create_image(&image_info, None) }
            .map_err(|e| self.shared.check(e))?;

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let bound = self
            .shared
            .find_memory_type(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
            .and_then(|memory_type_index| {
                let alloc_info = vk::MemoryAllocateInfo::builder()
                    .allocation_size(requirements.size)
                    .memory_type_index(memory_type_index);
                let memory = unsafe { device.allocate_memory(&alloc_info, None) }
                    .map_err(|e| self.shared.check(e))?;
                if let Err(e) = unsafe { device.bind_image_memory(image, memory, 0) } {
                    unsafe { device.free_memory(memory, None) };
                    return Err(self.shared.check(e));
                }
                Ok(memory)
            });

        match bound {
            Ok(memory) => Ok((
                image,
                Alloc {
                    memory,
                    offset: 0,
                    size: requirements.size,
                    flags: 0,
                },
            )),
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                Err(e)
            }
        }
    }
}

impl GpuBackend for VulkanBackend {
    fn api(&self) -> BackendApi {
        BackendApi::Vulkan
    }

    fn is_device_lost(&self) -> bool {
        self.shared.lost.load(Ordering::Acquire)
    }

    fn create_render_target(&self, info: &ImageInfo, mipmapped: Mipmapped) -> Result<NativeTarget> {
        let format = format_for_color_type(info.color_type)
            .ok_or_else(|| Error::invalid(format!("no Vulkan format for {:?}", info.color_type)))?;
        let texture = TextureInfo::render_target(format, mipmapped);
        let (image, alloc) = self.allocate_image(info, &texture)?;
        log::debug!(
            "Allocated Vulkan render target {:?} ({}x{}, {:?}, {} bytes)",
            image,
            info.width(),
            info.height(),
            format,
            alloc.size
        );
        Ok(NativeTarget::Vulkan(VulkanTarget {
            shared: Arc::clone(&self.shared),
            image,
            info: texture,
            final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            queue_family_index: self.shared.queue_family_index,
            alloc,
            owned: true,
        }))
    }

    fn wrap_backend_texture(&self, texture: &BackendTexture) -> Result<NativeTarget> {
        let NativeTexture::Vulkan(handle) = texture.native() else {
            return Err(Error::invalid("not a Vulkan texture"));
        };
        let info = match texture.info().spec() {
            Some(TextureSpec::Vulkan(info)) => info.clone(),
            _ => return Err(Error::invalid("texture info is not a Vulkan info")),
        };
        if !info.usage.contains(vk::ImageUsageFlags::TRANSFER_DST) {
            return Err(Error::invalid("wrapped image lacks TRANSFER_DST usage"));
        }
        // Leave the image in the layout the caller handed it over in.
        let final_layout = match handle.layout {
            vk::ImageLayout::UNDEFINED | vk::ImageLayout::PREINITIALIZED => {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            }
            layout => layout,
        };
        Ok(NativeTarget::Vulkan(VulkanTarget {
            shared: Arc::clone(&self.shared),
            image: handle.image,
            info,
            final_layout,
            queue_family_index: handle.queue_family_index,
            alloc: handle.alloc,
            owned: false,
        }))
    }

    fn submit(&self, commands: Vec<Command>) -> Result<Box<dyn SubmitFence>> {
        if self.is_device_lost() {
            return Err(Error::submission("Vulkan device lost"));
        }
        if commands.is_empty() {
            return Ok(Box::new(SignaledFence));
        }

        let device = &self.shared.device;
        let pool = self.shared.command_pool.lock();
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| self.shared.check(e))?
            .into_iter()
            .next()
            .ok_or_else(|| Error::allocation("no command buffer returned"))?;

        let fence = match self.record_and_submit(cmd, &commands) {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.free_command_buffers(*pool, &[cmd]) };
                return Err(e);
            }
        };
        drop(pool);

        Ok(Box::new(VulkanFence {
            shared: Arc::clone(&self.shared),
            fence,
            cmd,
            commands,
        }))
    }
}

impl VulkanBackend {
    fn record_and_submit(&self, cmd: vk::CommandBuffer, commands: &[Command]) -> Result<vk::Fence> {
        let device = &self.shared.device;
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe { device.begin_command_buffer(cmd, &begin_info) }
            .map_err(|e| self.shared.check(e))?;
        for command in commands {
            match command {
                Command::Clear { target, color } => record_target_clear(cmd, target, *color)?,
                Command::Marker(label) => log::trace!("marker: {}", label),
            }
        }
        unsafe { device.end_command_buffer(cmd) }.map_err(|e| self.shared.check(e))?;

        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
            .map_err(|e| self.shared.check(e))?;

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
        let queue = self.shared.queue.lock();
        if let Err(e) = unsafe { device.queue_submit(*queue, &[submit_info.build()], fence) } {
            unsafe { device.destroy_fence(fence, None) };
            return Err(self.shared.check(e));
        }
        Ok(fence)
    }
}

fn record_target_clear(cmd: vk::CommandBuffer, target: &Target, color: Color4f) -> Result<()> {
    match &target.native {
        NativeTarget::Vulkan(vulkan) => {
            vulkan.record_clear(cmd, target.color_type, color);
            Ok(())
        }
        #[allow(unreachable_patterns)]
        _ => Err(Error::invalid(format!(
            "render target {} does not belong to the Vulkan backend",
            target.id
        ))),
    }
}

/// Fence of one Vulkan submission. Keeps the submitted targets alive and frees
/// the command buffer once the GPU is done with it.
struct VulkanFence {
    shared: Arc<VulkanShared>,
    fence: vk::Fence,
    cmd: vk::CommandBuffer,
    commands: Vec<Command>,
}

impl SubmitFence for VulkanFence {
    fn is_signaled(&self) -> Result<bool> {
        unsafe { self.shared.device.get_fence_status(self.fence) }.map_err(|e| self.shared.check(e))
    }

    fn wait(&self) -> Result<()> {
        unsafe {
            self.shared
                .device
                .wait_for_fences(&[self.fence], true, u64::MAX)
        }
        .map_err(|e| self.shared.check(e))
    }
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        if !matches!(self.is_signaled(), Ok(true)) && !self.shared.lost.load(Ordering::Acquire) {
            let _ = self.wait();
        }
        unsafe {
            let pool = self.shared.command_pool.lock();
            self.shared.device.free_command_buffers(*pool, &[self.cmd]);
            self.shared.device.destroy_fence(self.fence, None);
        }
        log::trace!("Released Vulkan submission ({} commands)", self.commands.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_types_map_to_unorm_formats() {
        assert_eq!(
            format_for_color_type(ColorType::RGBA8888),
            Some(vk::Format::R8G8B8A8_UNORM)
        );
        assert_eq!(
            format_for_color_type(ColorType::BGRA8888),
            Some(vk::Format::B8G8R8A8_UNORM)
        );
        assert_eq!(format_for_color_type(ColorType::Unknown), None);
    }

    #[test]
    fn mip_chain_reaches_one_texel() {
        assert_eq!(mip_levels(ISize::new(256, 17), Mipmapped::Yes), 9);
        assert_eq!(mip_levels(ISize::new(1, 1), Mipmapped::Yes), 1);
        assert_eq!(mip_levels(ISize::new(256, 256), Mipmapped::No), 1);
    }

    #[test]
    fn single_channel_clears_use_the_red_channel() {
        let color = Color4f::new(1.0, 1.0, 1.0, 0.5);
        let alpha = clear_value(ColorType::Alpha8, color);
        assert_eq!(unsafe { alpha.float32 }, [0.5, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn texture_info_validity_follows_format() {
        let mut info = TextureInfo::default();
        assert!(!crate::TextureInfo::new_vulkan(&info).is_valid());
        info.format = vk::Format::R8G8B8A8_UNORM;
        let made = crate::TextureInfo::new_vulkan(&info);
        assert!(made.is_valid());
        assert!(made.is_compatible_with(ColorType::RGBA8888));
        assert!(!made.is_compatible_with(ColorType::BGRA8888));
    }

    #[test]
    fn null_handles_are_rejected() {
        unsafe extern "system" fn no_proc(
            _instance: vk::Instance,
            _name: *const std::os::raw::c_char,
        ) -> vk::PFN_vkVoidFunction {
            None
        }
        let context = unsafe {
            BackendContext::from_raw(
                no_proc,
                vk::Instance::null(),
                vk::PhysicalDevice::null(),
                vk::Device::null(),
                vk::Queue::null(),
                0,
            )
        };
        assert!(context.is_none());
    }
}
