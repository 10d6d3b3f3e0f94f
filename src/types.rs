// Plain value types shared by every backend
//
// All of these are `#[repr(C)]` or `#[repr(i32)]` so the C boundary can pass
// them by pointer. Enumerations never cross the boundary as Rust enums: the
// `TryFrom<i32>` impls validate integers coming from the caller.

use bitflags::bitflags;

/// Backend family a Context, texture or descriptor belongs to.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[repr(i32)]
pub enum BackendApi {
    Software = 0,
    Vulkan = 1,
    Metal = 2,
}

/// Integer-to-enum conversion for values coming through the C boundary.
macro_rules! c_enum {
    ($ty:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        impl TryFrom<i32> for $ty {
            type Error = crate::Error;

            fn try_from(value: i32) -> crate::Result<Self> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    other => Err(crate::Error::invalid(format!(
                        "{} out of range: {}",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

c_enum!(BackendApi { Software = 0, Vulkan = 1, Metal = 2 });

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[repr(i32)]
pub enum Mipmapped {
    #[default]
    No = 0,
    Yes = 1,
}

c_enum!(Mipmapped { No = 0, Yes = 1 });

/// Whether `submit` blocks until the GPU has finished the submitted work.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[repr(i32)]
pub enum SyncToCpu {
    #[default]
    No = 0,
    Yes = 1,
}

c_enum!(SyncToCpu { No = 0, Yes = 1 });

impl From<bool> for SyncToCpu {
    fn from(sync: bool) -> Self {
        if sync {
            SyncToCpu::Yes
        } else {
            SyncToCpu::No
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[repr(C)]
pub struct ISize {
    pub width: i32,
    pub height: i32,
}

impl ISize {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Pixel count, zero for empty sizes.
    pub fn area(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.width as usize * self.height as usize
        }
    }
}

impl From<(i32, i32)> for ISize {
    fn from((width, height): (i32, i32)) -> Self {
        Self::new(width, height)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[repr(i32)]
pub enum ColorType {
    #[default]
    Unknown = 0,
    RGBA8888 = 1,
    BGRA8888 = 2,
    Alpha8 = 3,
    Gray8 = 4,
}

c_enum!(ColorType {
    Unknown = 0,
    RGBA8888 = 1,
    BGRA8888 = 2,
    Alpha8 = 3,
    Gray8 = 4,
});

impl ColorType {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ColorType::Unknown => 0,
            ColorType::RGBA8888 | ColorType::BGRA8888 => 4,
            ColorType::Alpha8 | ColorType::Gray8 => 1,
        }
    }

    /// Encodes a color into this type's pixel layout.
    pub fn encode(self, color: Color4f) -> Vec<u8> {
        let [r, g, b, a] = color.to_bytes();
        match self {
            ColorType::Unknown => Vec::new(),
            ColorType::RGBA8888 => vec![r, g, b, a],
            ColorType::BGRA8888 => vec![b, g, r, a],
            ColorType::Alpha8 => vec![a],
            ColorType::Gray8 => vec![color.luminance_byte()],
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[repr(i32)]
pub enum AlphaType {
    #[default]
    Unknown = 0,
    Opaque = 1,
    Premul = 2,
    Unpremul = 3,
}

c_enum!(AlphaType {
    Unknown = 0,
    Opaque = 1,
    Premul = 2,
    Unpremul = 3,
});

/// Color space tag carried by wrapped surfaces. Encoding itself is out of scope.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[repr(i32)]
pub enum ColorSpace {
    Srgb = 0,
    SrgbLinear = 1,
    DisplayP3 = 2,
}

c_enum!(ColorSpace {
    Srgb = 0,
    SrgbLinear = 1,
    DisplayP3 = 2,
});

#[derive(Copy, Clone, PartialEq, Debug, Default)]
#[repr(C)]
pub struct Color4f {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color4f {
    pub const TRANSPARENT: Color4f = Color4f::new(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Color4f = Color4f::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color4f = Color4f::new(1.0, 1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn to_bytes(self) -> [u8; 4] {
        self.to_array().map(unit_to_byte)
    }

    /// Rec. 709 luma, used for gray color types.
    pub fn luminance(self) -> f32 {
        0.2126 * self.r + 0.7152 * self.g + 0.0722 * self.b
    }

    fn luminance_byte(self) -> u8 {
        unit_to_byte(self.luminance())
    }
}

impl From<[f32; 4]> for Color4f {
    fn from([r, g, b, a]: [f32; 4]) -> Self {
        Self::new(r, g, b, a)
    }
}

fn unit_to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[repr(C)]
pub struct ImageInfo {
    pub dimensions: ISize,
    pub color_type: ColorType,
    pub alpha_type: AlphaType,
}

impl ImageInfo {
    pub fn new(dimensions: impl Into<ISize>, color_type: ColorType, alpha_type: AlphaType) -> Self {
        Self {
            dimensions: dimensions.into(),
            color_type,
            alpha_type,
        }
    }

    /// RGBA8888, premultiplied.
    pub fn new_n32_premul(dimensions: impl Into<ISize>) -> Self {
        Self::new(dimensions, ColorType::RGBA8888, AlphaType::Premul)
    }

    pub fn width(&self) -> i32 {
        self.dimensions.width
    }

    pub fn height(&self) -> i32 {
        self.dimensions.height
    }

    pub fn is_valid(&self) -> bool {
        !self.dimensions.is_empty()
            && self.color_type != ColorType::Unknown
            && self.alpha_type != AlphaType::Unknown
    }

    pub fn compute_byte_size(&self) -> usize {
        self.dimensions.area() * self.color_type.bytes_per_pixel()
    }
}

bitflags! {
    #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
    pub struct SurfacePropsFlags: u32 {
        const USE_DEVICE_INDEPENDENT_FONTS = 1 << 0;
        const DYNAMIC_MSAA = 1 << 1;
        const ALWAYS_DITHER = 1 << 2;
    }
}

/// Surface properties. Plain integers so C callers can fill them directly.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[repr(C)]
pub struct SurfaceProps {
    pub flags: u32,
    pub pixel_geometry: u32,
}

impl SurfaceProps {
    pub fn new(flags: SurfacePropsFlags, pixel_geometry: u32) -> Self {
        Self {
            flags: flags.bits(),
            pixel_geometry,
        }
    }

    /// Unknown bits are dropped.
    pub fn flags(&self) -> SurfacePropsFlags {
        SurfacePropsFlags::from_bits_truncate(self.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_reject_out_of_range_integers() {
        assert_eq!(ColorType::try_from(2).unwrap(), ColorType::BGRA8888);
        assert!(ColorType::try_from(17).is_err());
        assert!(Mipmapped::try_from(-1).is_err());
        assert_eq!(BackendApi::try_from(1).unwrap(), BackendApi::Vulkan);
        assert_eq!(SyncToCpu::try_from(1).unwrap(), SyncToCpu::Yes);
        assert_eq!(SyncToCpu::try_from(0).unwrap(), SyncToCpu::No);
        assert!(SyncToCpu::try_from(2).is_err());
    }

    #[test]
    fn encode_respects_channel_order() {
        let color = Color4f::new(1.0, 0.0, 0.5, 1.0);
        assert_eq!(ColorType::RGBA8888.encode(color), vec![255, 0, 128, 255]);
        assert_eq!(ColorType::BGRA8888.encode(color), vec![128, 0, 255, 255]);
        assert_eq!(ColorType::Alpha8.encode(color), vec![255]);
        assert_eq!(ColorType::Gray8.encode(Color4f::WHITE), vec![255]);
    }

    #[test]
    fn image_info_validity() {
        assert!(ImageInfo::new_n32_premul((4, 4)).is_valid());
        assert!(!ImageInfo::new_n32_premul((0, 4)).is_valid());
        assert!(!ImageInfo::new((4, 4), ColorType::Unknown, AlphaType::Premul).is_valid());
        assert_eq!(ImageInfo::new_n32_premul((4, 2)).compute_byte_size(), 32);
    }

    #[test]
    fn surface_props_truncate_unknown_bits() {
        let props = SurfaceProps {
            flags: 0b1000_0010,
            pixel_geometry: 0,
        };
        assert_eq!(props.flags(), SurfacePropsFlags::DYNAMIC_MSAA);
    }
}
