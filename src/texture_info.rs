use crate::types::{BackendApi, ColorType, Mipmapped};

/// Backend-specific texture format descriptor.
///
/// A default-constructed `TextureInfo` is invalid; one of the `new_*` makers
/// (or assignment from one) is required before it describes anything.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextureInfo {
    spec: Option<TextureSpec>,
}

/// The per-backend payload of a valid [`TextureInfo`].
#[derive(Clone, Debug, PartialEq)]
pub enum TextureSpec {
    Software(SoftwareTextureInfo),
    #[cfg(backend_vulkan)]
    Vulkan(crate::vk::TextureInfo),
    #[cfg(backend_metal)]
    Metal(crate::mtl::TextureInfo),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SoftwareTextureInfo {
    pub sample_count: u32,
    pub mipmapped: Mipmapped,
    pub color_type: ColorType,
}

impl TextureInfo {
    /// Software texture description. Returns an invalid info for a zero sample
    /// count or an unknown color type.
    pub fn new_software(sample_count: u32, mipmapped: Mipmapped, color_type: ColorType) -> Self {
        if sample_count == 0 || color_type == ColorType::Unknown {
            log::warn!(
                "Rejected software texture info: sample_count={}, color_type={:?}",
                sample_count,
                color_type
            );
            return Self::default();
        }
        Self::from_spec(TextureSpec::Software(SoftwareTextureInfo {
            sample_count,
            mipmapped,
            color_type,
        }))
    }

    #[cfg(backend_vulkan)]
    pub fn new_vulkan(info: &crate::vk::TextureInfo) -> Self {
        if info.sample_count == 0 || info.format == ash::vk::Format::UNDEFINED {
            log::warn!("Rejected Vulkan texture info: {:?}", info);
            return Self::default();
        }
        Self::from_spec(TextureSpec::Vulkan(info.clone()))
    }

    /// Describes an existing `MTLTexture`.
    ///
    /// # Safety
    /// `texture` must be null or a live `id<MTLTexture>`.
    #[cfg(backend_metal)]
    pub unsafe fn new_metal(texture: crate::mtl::Handle) -> Self {
        match crate::mtl::TextureInfo::from_handle(texture) {
            Some(info) => Self::from_spec(TextureSpec::Metal(info)),
            None => Self::default(),
        }
    }

    pub(crate) fn from_spec(spec: TextureSpec) -> Self {
        Self { spec: Some(spec) }
    }

    pub fn is_valid(&self) -> bool {
        self.spec.is_some()
    }

    pub fn spec(&self) -> Option<&TextureSpec> {
        self.spec.as_ref()
    }

    pub fn backend(&self) -> Option<BackendApi> {
        self.spec.as_ref().map(|spec| match spec {
            TextureSpec::Software(_) => BackendApi::Software,
            #[cfg(backend_vulkan)]
            TextureSpec::Vulkan(_) => BackendApi::Vulkan,
            #[cfg(backend_metal)]
            TextureSpec::Metal(_) => BackendApi::Metal,
        })
    }

    /// Zero for invalid infos.
    pub fn sample_count(&self) -> u32 {
        match &self.spec {
            None => 0,
            Some(TextureSpec::Software(info)) => info.sample_count,
            #[cfg(backend_vulkan)]
            Some(TextureSpec::Vulkan(info)) => info.sample_count,
            #[cfg(backend_metal)]
            Some(TextureSpec::Metal(info)) => info.sample_count,
        }
    }

    pub fn mipmapped(&self) -> Mipmapped {
        match &self.spec {
            None => Mipmapped::No,
            Some(TextureSpec::Software(info)) => info.mipmapped,
            #[cfg(backend_vulkan)]
            Some(TextureSpec::Vulkan(info)) => info.mipmapped,
            #[cfg(backend_metal)]
            Some(TextureSpec::Metal(info)) => info.mipmapped,
        }
    }

    /// Whether a surface of `color_type` can render into a texture of this kind.
    pub fn is_compatible_with(&self, color_type: ColorType) -> bool {
        match &self.spec {
            None => false,
            Some(TextureSpec::Software(info)) => info.color_type == color_type,
            #[cfg(backend_vulkan)]
            Some(TextureSpec::Vulkan(info)) => {
                crate::vk::format_for_color_type(color_type) == Some(info.format)
            }
            #[cfg(backend_metal)]
            Some(TextureSpec::Metal(info)) => info.is_compatible_with(color_type),
        }
    }
}
