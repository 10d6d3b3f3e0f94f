use std::fmt;
use std::sync::Arc;

use crate::backend::software::SoftTexture;
use crate::texture_info::TextureInfo;
use crate::types::{BackendApi, ISize, Mipmapped};

/// A backend texture handle plus its format and pixel dimensions.
///
/// Reference-counted native handles (software textures, `MTLTexture`) are
/// retained for as long as the `BackendTexture` lives; replacing it by
/// assignment releases the previous handle once. Vulkan images are borrowed:
/// the caller keeps them alive.
#[derive(Clone, Default)]
pub struct BackendTexture {
    dimensions: ISize,
    info: TextureInfo,
    handle: NativeTexture,
}

#[derive(Clone, Default)]
pub(crate) enum NativeTexture {
    #[default]
    None,
    Software(Arc<SoftTexture>),
    #[cfg(backend_vulkan)]
    Vulkan(crate::vk::ImageHandle),
    #[cfg(backend_metal)]
    Metal(metal::Texture),
}

impl BackendTexture {
    /// Wraps a software texture. The texture is retained.
    pub fn new_software(dimensions: impl Into<ISize>, texture: &Arc<SoftTexture>) -> Self {
        let dimensions = dimensions.into();
        let bounds = texture.dimensions();
        if dimensions.is_empty()
            || dimensions.width > bounds.width
            || dimensions.height > bounds.height
        {
            log::warn!(
                "Backend texture dimensions {:?} do not fit software texture {:?}",
                dimensions,
                bounds
            );
            return Self::default();
        }
        Self {
            dimensions,
            info: TextureInfo::new_software(1, Mipmapped::No, texture.color_type()),
            handle: NativeTexture::Software(Arc::clone(texture)),
        }
    }

    /// Wraps a caller-owned `VkImage`.
    ///
    /// # Safety
    /// `image` and the memory in `alloc` must stay alive for as long as this
    /// texture, or any surface wrapping it, is used.
    #[cfg(backend_vulkan)]
    pub unsafe fn new_vulkan(
        dimensions: impl Into<ISize>,
        texture_info: &crate::vk::TextureInfo,
        layout: ash::vk::ImageLayout,
        queue_family_index: u32,
        image: ash::vk::Image,
        alloc: crate::vk::Alloc,
    ) -> Self {
        let dimensions = dimensions.into();
        let info = TextureInfo::new_vulkan(texture_info);
        if dimensions.is_empty() || image == ash::vk::Image::null() || !info.is_valid() {
            return Self::default();
        }
        Self {
            dimensions,
            info,
            handle: NativeTexture::Vulkan(crate::vk::ImageHandle {
                image,
                layout,
                queue_family_index,
                alloc,
            }),
        }
    }

    /// Wraps an `MTLTexture`, retaining it.
    ///
    /// # Safety
    /// `texture` must be null or a live `id<MTLTexture>`.
    #[cfg(backend_metal)]
    pub unsafe fn new_metal(dimensions: impl Into<ISize>, texture: crate::mtl::Handle) -> Self {
        let dimensions = dimensions.into();
        let info = TextureInfo::new_metal(texture);
        match crate::mtl::retain_texture(texture) {
            Some(texture) if info.is_valid() && !dimensions.is_empty() => Self {
                dimensions,
                info,
                handle: NativeTexture::Metal(texture),
            },
            _ => Self::default(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.info.is_valid()
            && !self.dimensions.is_empty()
            && !matches!(self.handle, NativeTexture::None)
    }

    pub fn dimensions(&self) -> ISize {
        self.dimensions
    }

    /// A copy of the texture's format descriptor.
    pub fn info(&self) -> TextureInfo {
        self.info.clone()
    }

    pub fn backend(&self) -> Option<BackendApi> {
        if self.is_valid() {
            self.info.backend()
        } else {
            None
        }
    }

    /// The retained software texture, if this wraps one.
    pub fn software_texture(&self) -> Option<&Arc<SoftTexture>> {
        match &self.handle {
            NativeTexture::Software(texture) => Some(texture),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    pub(crate) fn native(&self) -> &NativeTexture {
        &self.handle
    }
}

impl fmt::Debug for BackendTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendTexture")
            .field("dimensions", &self.dimensions)
            .field("info", &self.info)
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::{SoftDevice, SoftDeviceDesc};
    use crate::types::ColorType;

    #[test]
    fn default_is_invalid() {
        let texture = BackendTexture::default();
        assert!(!texture.is_valid());
        assert!(!texture.info().is_valid());
        assert_eq!(texture.backend(), None);
    }

    #[test]
    fn assignment_releases_previous_texture_once() {
        let device = SoftDevice::new(SoftDeviceDesc::default());
        let first = device.create_texture((8, 8), ColorType::RGBA8888).unwrap();
        let second = device.create_texture((4, 4), ColorType::BGRA8888).unwrap();

        let mut texture = BackendTexture::default();
        assert!(!texture.is_valid());
        texture = BackendTexture::new_software((8, 8), &first);
        assert!(texture.is_valid());
        assert_eq!(Arc::strong_count(&first), 2);

        texture = BackendTexture::new_software((4, 4), &second);
        assert_eq!(Arc::strong_count(&first), 1);
        assert_eq!(Arc::strong_count(&second), 2);
        assert_eq!(texture.dimensions(), ISize::new(4, 4));

        drop(texture);
        assert_eq!(Arc::strong_count(&second), 1);
    }

    #[test]
    fn oversized_dimensions_are_rejected() {
        let device = SoftDevice::new(SoftDeviceDesc::default());
        let texture = device.create_texture((8, 8), ColorType::RGBA8888).unwrap();
        assert!(!BackendTexture::new_software((16, 8), &texture).is_valid());
        assert_eq!(Arc::strong_count(&texture), 1);
    }
}
