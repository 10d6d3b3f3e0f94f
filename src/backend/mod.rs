// Backend module - per-API device bindings behind one trait
//
// Design: the Context only talks to `GpuBackend`. Which implementations exist
// is decided at build time (`backend_vulkan`, `backend_metal`); the software
// backend is always available and is the default.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend_texture::BackendTexture;
use crate::options::ContextOptions;
use crate::recorder::BudgetCharge;
use crate::types::{BackendApi, Color4f, ColorType, ISize, ImageInfo, Mipmapped};
use crate::Result;

pub mod software;
pub(crate) mod sync;
#[cfg(backend_vulkan)]
pub mod vulkan;
#[cfg(backend_metal)]
pub mod metal;

use sync::SubmitFence;

/// Platform inputs for Context creation, one variant per compiled-in backend.
#[derive(Clone, Copy, Debug)]
pub enum BackendContext<'a> {
    Software(&'a software::BackendContext),
    #[cfg(backend_vulkan)]
    Vulkan(&'a vulkan::BackendContext),
    #[cfg(backend_metal)]
    Metal(&'a metal::BackendContext),
}

impl BackendContext<'_> {
    pub fn api(&self) -> BackendApi {
        match self {
            BackendContext::Software(_) => BackendApi::Software,
            #[cfg(backend_vulkan)]
            BackendContext::Vulkan(_) => BackendApi::Vulkan,
            #[cfg(backend_metal)]
            BackendContext::Metal(_) => BackendApi::Metal,
        }
    }

    pub(crate) fn create_backend(&self, options: &ContextOptions) -> Result<Box<dyn GpuBackend>> {
        match self {
            BackendContext::Software(context) => software::create_backend(context, options),
            #[cfg(backend_vulkan)]
            BackendContext::Vulkan(context) => vulkan::create_backend(context, options),
            #[cfg(backend_metal)]
            BackendContext::Metal(context) => metal::create_backend(context, options),
        }
    }
}

/// The device side of a Context.
pub(crate) trait GpuBackend: Send + Sync {
    fn api(&self) -> BackendApi;

    fn is_device_lost(&self) -> bool;

    /// Allocates a GPU-owned render target.
    fn create_render_target(&self, info: &ImageInfo, mipmapped: Mipmapped) -> Result<NativeTarget>;

    /// Borrows a caller texture as a render target. Never takes ownership.
    fn wrap_backend_texture(&self, texture: &BackendTexture) -> Result<NativeTarget>;

    /// Enqueues `commands` on the device queue. The commands, and the targets
    /// they reference, must stay alive until the returned fence signals.
    fn submit(&self, commands: Vec<Command>) -> Result<Box<dyn SubmitFence>>;
}

/// Recorded work. Drawing proper lives outside the bridge; clears and markers
/// are the only commands it has to carry.
pub(crate) enum Command {
    Clear { target: Arc<Target>, color: Color4f },
    Marker(String),
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Clear { target, color } => f
                .debug_struct("Clear")
                .field("target", &target.id)
                .field("color", color)
                .finish(),
            Command::Marker(label) => f.debug_tuple("Marker").field(label).finish(),
        }
    }
}

pub(crate) enum NativeTarget {
    Software(Arc<software::SoftTexture>),
    #[cfg(backend_vulkan)]
    Vulkan(vulkan::VulkanTarget),
    #[cfg(backend_metal)]
    Metal(metal::MetalTarget),
}

/// A render destination referenced by recorded commands.
pub(crate) struct Target {
    pub id: u64,
    pub dimensions: ISize,
    pub color_type: ColorType,
    pub native: NativeTarget,
    /// False for wrapped caller textures.
    pub owned: bool,
    _charge: Option<BudgetCharge>,
}

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

impl Target {
    pub fn new(
        dimensions: ISize,
        color_type: ColorType,
        native: NativeTarget,
        owned: bool,
        charge: Option<BudgetCharge>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed),
            dimensions,
            color_type,
            native,
            owned,
            _charge: charge,
        })
    }

    /// A non-owning `BackendTexture` view of this target.
    pub fn backend_texture(&self) -> BackendTexture {
        match &self.native {
            NativeTarget::Software(texture) => BackendTexture::new_software(self.dimensions, texture),
            #[cfg(backend_vulkan)]
            NativeTarget::Vulkan(target) => target.backend_texture(self.dimensions),
            #[cfg(backend_metal)]
            NativeTarget::Metal(target) => target.backend_texture(self.dimensions),
        }
    }
}

impl Drop for Target {
    fn drop(&mut self) {
        log::trace!("Releasing render target {} (owned: {})", self.id, self.owned);
    }
}
