// =============================================================================
// GPU BRIDGE - Lifecycle and submission bridge over Vulkan, Metal and software
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  C ABI (ffi)  /  Rust API                                       │
// │    └── Context (device binding + submission queue)              │
// │          └── Recorder ──snap──> Recording ──insert──> submit    │
// │                └── Surfaces (render targets, wrapped textures)  │
// │    └── GpuBackend: software | Vulkan (ash) | Metal (metal-rs)   │
// └─────────────────────────────────────────────────────────────────┘
//
// Which native backends exist is decided at build time by the `vulkan` and
// `metal` features (see build.rs). The software backend is always present and
// backs `Context::make_default`.
//
// =============================================================================

pub mod backend;
pub mod backend_texture;
pub mod config;
pub mod context;
mod error;
pub mod ffi;
pub mod logging;
pub mod options;
pub mod recorder;
pub mod recording;
pub mod surfaces;
pub mod texture_info;
pub mod types;

pub use backend::software;
#[cfg(backend_metal)]
pub use backend::metal as mtl;
#[cfg(backend_vulkan)]
pub use backend::vulkan as vk;
pub use backend::BackendContext;
pub use backend_texture::BackendTexture;
pub use context::{CallbackResult, Context, FinishedCallback, InsertRecordingInfo};
pub use error::{Error, Result};
pub use options::{ContextOptions, RecorderOptions};
pub use recorder::{Recorder, RecorderState};
pub use recording::Recording;
pub use surfaces::Surface;
pub use texture_info::{SoftwareTextureInfo, TextureInfo, TextureSpec};
pub use types::{
    AlphaType, BackendApi, Color4f, ColorSpace, ColorType, ISize, ImageInfo, Mipmapped,
    SurfaceProps, SurfacePropsFlags, SyncToCpu,
};
