// =============================================================================
// GPU BRIDGE DEMO - drives the bridge end to end
// =============================================================================
//
// FRAME FLOW:
// 1. Record a clear into a render-target surface
// 2. Snap the recorder into a Recording
// 3. Insert the recording (with a finished callback)
// 4. Submit (asynchronously, synchronously on the last frame)
//
// Runs on the software backend by default. With `backend = "vulkan"` in the
// [demo] section it creates a headless Vulkan device instead, falling back to
// software when no Vulkan driver is available.
//
// =============================================================================

use anyhow::{Context as _, Result};
use gpu_bridge::config::Config;
use gpu_bridge::software::{self, SoftDevice};
use gpu_bridge::{
    logging, surfaces, CallbackResult, Color4f, Context, ImageInfo, InsertRecordingInfo,
    SyncToCpu,
};
use std::time::Instant;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from gpu_bridge.toml
    let config = Config::load();

    logging::init_logging(&config.logging);
    log::info!("Starting gpu-bridge demo");
    log::info!(
        "Backend: {}, {} frames of {}x{}",
        config.demo.backend,
        config.demo.frames,
        config.demo.width,
        config.demo.height
    );

    match config.demo.backend.to_lowercase().as_str() {
        #[cfg(backend_vulkan)]
        "vulkan" => match headless::HeadlessVulkan::new(config.demo.validation_layers) {
            Ok(vulkan) => {
                let context = Context::make_vulkan(&vulkan.backend_context(), &config.context)
                    .context("Failed to create Vulkan context")?;
                run_frames(&context, &config)?;
                drop(context);
                return Ok(());
            }
            Err(e) => log::warn!("Headless Vulkan unavailable ({:#}), using software", e),
        },
        "software" => {}
        other => log::warn!("Unknown demo backend '{}', using software", other),
    }

    let device = SoftDevice::new(config.software.device_desc());
    let queue = device
        .new_queue()
        .context("Failed to create software queue")?;
    let backend = software::BackendContext::new(&device, &queue);
    let context = Context::make_software(&backend, &config.context)
        .context("Failed to create software context")?;
    run_frames(&context, &config)
}

fn run_frames(context: &Context, config: &Config) -> Result<()> {
    let mut recorder = context
        .make_recorder(Some(&config.recorder))
        .context("Failed to create recorder")?;

    let info = ImageInfo::new_n32_premul((config.demo.width, config.demo.height));
    let mut surface = surfaces::render_target(&recorder, &info, None, None)
        .context("Failed to create render target")?;

    let started = Instant::now();
    let base = Color4f::from(config.demo.clear_color);

    for frame in 0..config.demo.frames {
        // Fade the clear color over the run so each frame is distinguishable
        let t = (frame + 1) as f32 / config.demo.frames as f32;
        let color = Color4f::new(base.r * t, base.g * t, base.b * t, base.a);

        surface.clear(color);
        recorder.add_marker(format!("frame {}", frame));

        let recording = recorder
            .snap()
            .context("Device lost while recording")?;
        let info = InsertRecordingInfo::new(recording).with_finished(move |result| match result {
            CallbackResult::Success => log::debug!("Frame {} finished", frame),
            CallbackResult::Failed => log::error!("Frame {} failed", frame),
        });
        if !context.insert_recording_with(info) {
            anyhow::bail!("Frame {}: recording was rejected", frame);
        }

        let last = frame + 1 == config.demo.frames;
        let sync = SyncToCpu::from(config.demo.sync_every_frame || last);
        if !context.submit(Some(sync)) {
            anyhow::bail!("Frame {}: submission failed", frame);
        }
    }

    log::info!(
        "Submitted {} frames in {:.2}ms ({} recordings outstanding)",
        config.demo.frames,
        started.elapsed().as_secs_f64() * 1000.0,
        context.outstanding_recordings()
    );

    if let Some(texture) = surface.backend_texture().software_texture() {
        log::info!("Final pixel (0, 0): {:?}", texture.pixel(0, 0));
    }

    Ok(())
}

// =============================================================================
// HEADLESS VULKAN DEVICE
// =============================================================================

#[cfg(backend_vulkan)]
mod headless {
    use anyhow::{Context, Result};
    use ash::{vk, Entry};
    use std::ffi::{CStr, CString};

    /// Instance + device without any surface or swapchain extension.
    ///
    /// Field order matters for Drop: the device goes before the instance.
    pub struct HeadlessVulkan {
        device: ash::Device,
        queue: vk::Queue,
        queue_family: u32,
        physical_device: vk::PhysicalDevice,
        instance: ash::Instance,
        _entry: Entry,
    }

    impl HeadlessVulkan {
        pub fn new(enable_validation: bool) -> Result<Self> {
            // Step 1: Load Vulkan library
            let entry = unsafe { Entry::load() }
                .context("Failed to load Vulkan library. Is Vulkan installed?")?;

            // Step 2: Create instance
            let app_name = CString::new("gpu-bridge-demo")?;
            let app_info = vk::ApplicationInfo::builder()
                .application_name(&app_name)
                .application_version(vk::make_api_version(0, 0, 1, 0))
                .engine_name(&app_name)
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_1);

            let layer_names = if enable_validation {
                vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
            } else {
                vec![]
            };

            let create_info = vk::InstanceCreateInfo::builder()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names);

            let instance = unsafe { entry.create_instance(&create_info, None) }
                .context("Failed to create Vulkan instance")?;

            // Step 3: Pick physical device, create logical device
            let device = Self::pick_physical_device(&instance).and_then(|(physical_device, family)| {
                let queue_priorities = [1.0];
                let queue_create_info = vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build();
                let create_info = vk::DeviceCreateInfo::builder()
                    .queue_create_infos(std::slice::from_ref(&queue_create_info));
                let device = unsafe { instance.create_device(physical_device, &create_info, None) }
                    .context("Failed to create logical device")?;
                Ok((physical_device, family, device))
            });

            let (physical_device, queue_family, device) = match device {
                Ok(parts) => parts,
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            };

            let queue = unsafe { device.get_device_queue(queue_family, 0) };

            let properties = unsafe { instance.get_physical_device_properties(physical_device) };
            log::info!(
                "Selected GPU: {}",
                unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
            );

            Ok(Self {
                device,
                queue,
                queue_family,
                physical_device,
                instance,
                _entry: entry,
            })
        }

        fn pick_physical_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, u32)> {
            let devices = unsafe { instance.enumerate_physical_devices() }?;

            // Score each device (prefer discrete GPU)
            let mut best = None;
            let mut best_score = 0;
            for device in devices {
                let props = unsafe { instance.get_physical_device_properties(device) };
                let families =
                    unsafe { instance.get_physical_device_queue_family_properties(device) };
                let Some(family) = families
                    .iter()
                    .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                else {
                    continue;
                };
                let score = match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                    _ => 1,
                };
                if score > best_score {
                    best_score = score;
                    best = Some((device, family as u32));
                }
            }

            best.ok_or_else(|| anyhow::anyhow!("No Vulkan GPU with a graphics queue found"))
        }

        pub fn backend_context(&self) -> gpu_bridge::vk::BackendContext {
            unsafe {
                gpu_bridge::vk::BackendContext::new(
                    self.instance.clone(),
                    self.physical_device,
                    self.device.clone(),
                    self.queue,
                    self.queue_family,
                )
            }
        }
    }

    impl Drop for HeadlessVulkan {
        fn drop(&mut self) {
            log::info!("Destroying headless Vulkan device...");
            unsafe {
                let _ = self.device.device_wait_idle();
                self.device.destroy_device(None);
                self.instance.destroy_instance(None);
            }
        }
    }
}
