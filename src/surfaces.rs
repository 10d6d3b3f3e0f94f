//! Surface binder
//!
//! Binds a renderable surface to a [`Recorder`], either on a fresh GPU-owned
//! render target ([`render_target`]) or on a caller texture
//! ([`wrap_backend_texture`]). A wrapping surface never owns the caller's
//! texture: dropping it leaves the texture alive and valid.

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::backend::{Command, Target};
use crate::backend_texture::BackendTexture;
use crate::recorder::{Recorder, RecorderInner};
use crate::types::{
    AlphaType, Color4f, ColorSpace, ColorType, ISize, ImageInfo, Mipmapped, SurfaceProps,
};
use crate::{Error, Result};

/// A render destination whose drawing is recorded into a Recorder.
pub struct Surface {
    recorder_id: u64,
    sink: Weak<Mutex<RecorderInner>>,
    target: Arc<Target>,
    image_info: ImageInfo,
    props: SurfaceProps,
    color_space: Option<ColorSpace>,
}

/// Allocates a GPU-owned render target described by `image_info`.
///
/// Returns `None` for an invalid `image_info`, when the recorder's GPU budget
/// cannot cover the target, or when the backend fails to allocate it.
pub fn render_target(
    recorder: &Recorder,
    image_info: &ImageInfo,
    mipmapped: Option<Mipmapped>,
    surface_props: Option<&SurfaceProps>,
) -> Option<Surface> {
    try_render_target(recorder, image_info, mipmapped.unwrap_or_default(), surface_props)
        .map_err(|e| log::warn!("Recorder {}: render target failed: {}", recorder.id(), e))
        .ok()
}

fn try_render_target(
    recorder: &Recorder,
    image_info: &ImageInfo,
    mipmapped: Mipmapped,
    surface_props: Option<&SurfaceProps>,
) -> Result<Surface> {
    if !image_info.is_valid() {
        return Err(Error::invalid(format!("image info {:?}", image_info)));
    }
    let bytes = image_info.compute_byte_size() as u64;
    let charge = recorder.charge(bytes).ok_or_else(|| {
        Error::allocation(format!(
            "{} bytes exceed the recorder budget ({} of {} used)",
            bytes,
            recorder.budget_used(),
            recorder.max_budgeted_bytes()
        ))
    })?;
    let native = recorder.gpu().create_render_target(image_info, mipmapped)?;
    let target = Target::new(
        image_info.dimensions,
        image_info.color_type,
        native,
        true,
        Some(charge),
    );
    Ok(Surface::new(
        recorder,
        target,
        *image_info,
        surface_props.copied(),
        None,
    ))
}

/// Wraps a valid caller texture without taking ownership of it.
///
/// Returns `None` if the texture is invalid, belongs to another backend or
/// device, or cannot be rendered as `color_type`.
pub fn wrap_backend_texture(
    recorder: &Recorder,
    backend_texture: &BackendTexture,
    color_type: ColorType,
    color_space: Option<ColorSpace>,
    surface_props: Option<&SurfaceProps>,
) -> Option<Surface> {
    try_wrap_backend_texture(recorder, backend_texture, color_type, color_space, surface_props)
        .map_err(|e| log::warn!("Recorder {}: wrapping texture failed: {}", recorder.id(), e))
        .ok()
}

fn try_wrap_backend_texture(
    recorder: &Recorder,
    backend_texture: &BackendTexture,
    color_type: ColorType,
    color_space: Option<ColorSpace>,
    surface_props: Option<&SurfaceProps>,
) -> Result<Surface> {
    if !backend_texture.is_valid() {
        return Err(Error::invalid("backend texture is not valid"));
    }
    if backend_texture.backend() != Some(recorder.backend()) {
        return Err(Error::invalid(format!(
            "{:?} texture used with a {:?} recorder",
            backend_texture.backend(),
            recorder.backend()
        )));
    }
    if !backend_texture.info().is_compatible_with(color_type) {
        return Err(Error::invalid(format!(
            "color type {:?} does not match the texture format",
            color_type
        )));
    }

    let native = recorder.gpu().wrap_backend_texture(backend_texture)?;
    let dimensions = backend_texture.dimensions();
    let target = Target::new(dimensions, color_type, native, false, None);
    Ok(Surface::new(
        recorder,
        target,
        ImageInfo::new(dimensions, color_type, AlphaType::Premul),
        surface_props.copied(),
        color_space,
    ))
}

impl Surface {
    fn new(
        recorder: &Recorder,
        target: Arc<Target>,
        image_info: ImageInfo,
        props: Option<SurfaceProps>,
        color_space: Option<ColorSpace>,
    ) -> Self {
        log::trace!(
            "Recorder {}: surface on target {} ({}x{}, wrapped: {})",
            recorder.id(),
            target.id,
            image_info.width(),
            image_info.height(),
            !target.owned
        );
        Self {
            recorder_id: recorder.id(),
            sink: recorder.sink(),
            target,
            image_info,
            props: props.unwrap_or_default(),
            color_space,
        }
    }

    pub fn width(&self) -> i32 {
        self.image_info.width()
    }

    pub fn height(&self) -> i32 {
        self.image_info.height()
    }

    pub fn dimensions(&self) -> ISize {
        self.image_info.dimensions
    }

    pub fn image_info(&self) -> ImageInfo {
        self.image_info
    }

    pub fn props(&self) -> &SurfaceProps {
        &self.props
    }

    pub fn color_space(&self) -> Option<ColorSpace> {
        self.color_space
    }

    pub fn recorder_id(&self) -> u64 {
        self.recorder_id
    }

    /// Whether this surface renders into a caller-supplied texture.
    pub fn is_wrapped(&self) -> bool {
        !self.target.owned
    }

    /// Records a full-surface clear. Returns `false` if the recorder this
    /// surface belongs to has been dropped.
    pub fn clear(&mut self, color: impl Into<Color4f>) -> bool {
        let Some(sink) = self.sink.upgrade() else {
            log::warn!(
                "Surface on target {}: recorder {} is gone, clear dropped",
                self.target.id,
                self.recorder_id
            );
            return false;
        };
        sink.lock().record(Command::Clear {
            target: Arc::clone(&self.target),
            color: color.into(),
        });
        true
    }

    /// A `BackendTexture` referring to the surface's texture. It retains
    /// reference-counted handles but never owns a GPU-owned target's memory.
    pub fn backend_texture(&self) -> BackendTexture {
        self.target.backend_texture()
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("recorder", &self.recorder_id)
            .field("target", &self.target.id)
            .field("image_info", &self.image_info)
            .field("wrapped", &self.is_wrapped())
            .finish()
    }
}
