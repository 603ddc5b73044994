//! Backend-neutral resource descriptors.
//!
//! Every backend receives these descriptors and maps them onto its own API.
//! The Vulkan mappings live next to the Vulkan resource wrappers.

/// Two-dimensional size in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Extent2d {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Extent2d {
    /// Creates a new extent.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns true if either dimension is zero.
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Buffer usage type.
///
/// Defines the intended use of a device buffer, which affects usage flags and
/// memory placement in each backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Vertex buffer - stores vertex data
    Vertex,
    /// Index buffer - stores index data
    Index,
    /// Storage buffer - read by shaders as structured data
    Storage,
    /// Uniform buffer - small constant blocks
    Uniform,
    /// Staging buffer - host-writable transfer source
    Staging,
}

impl BufferUsage {
    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Storage => "storage",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Staging => "staging",
        }
    }
}

/// Image usage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageUsage {
    /// Sampled by shaders only
    Sampler,
    /// Rendered into, then sampled by a later pass
    Target,
    /// Depth attachment
    Depth,
    /// Read as a storage image by graphics stages
    Storage,
}

impl ImageUsage {
    /// Returns true if shaders may sample the image.
    pub fn is_sampled(self) -> bool {
        matches!(self, ImageUsage::Sampler | ImageUsage::Target)
    }

    /// Returns a human-readable name for the image usage.
    pub fn name(self) -> &'static str {
        match self {
            ImageUsage::Sampler => "sampler",
            ImageUsage::Target => "target",
            ImageUsage::Depth => "depth",
            ImageUsage::Storage => "storage",
        }
    }
}

/// Texel format of a device image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// 8-bit RGBA, normalized
    Rgba8Unorm,
    /// 8-bit RGBA, sRGB encoded
    Rgba8Srgb,
    /// 8-bit BGRA, normalized (common swapchain format)
    Bgra8Unorm,
    /// 8-bit BGRA, sRGB encoded
    Bgra8Srgb,
    /// 32-bit float depth
    D32Float,
}

impl ImageFormat {
    /// Size of one texel in bytes.
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            ImageFormat::Rgba8Unorm
            | ImageFormat::Rgba8Srgb
            | ImageFormat::Bgra8Unorm
            | ImageFormat::Bgra8Srgb
            | ImageFormat::D32Float => 4,
        }
    }

    /// Returns true for depth formats.
    pub fn is_depth(self) -> bool {
        matches!(self, ImageFormat::D32Float)
    }
}

/// Element width of an index buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IndexFormat {
    /// 16-bit indices
    #[default]
    U16,
    /// 32-bit indices
    U32,
}

/// Texture filtering mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Filter {
    /// Nearest-neighbour sampling
    #[default]
    Nearest,
    /// Bilinear sampling
    Linear,
}

/// Texture addressing mode outside [0, 1].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AddressMode {
    /// Clamp to the edge texel
    #[default]
    ClampToEdge,
    /// Repeat the texture
    Repeat,
    /// Repeat with mirroring
    MirroredRepeat,
}

/// Device buffer creation parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc<'a> {
    /// Debug name
    pub name: &'a str,
    /// Intended usage
    pub usage: BufferUsage,
    /// Size in bytes, must be non-zero
    pub size: u64,
}

/// Device image creation parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDesc<'a> {
    /// Debug name
    pub name: &'a str,
    /// Dimensions in pixels
    pub extent: Extent2d,
    /// Texel format
    pub format: ImageFormat,
    /// Intended usage
    pub usage: ImageUsage,
}

/// Sampler creation parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplerDesc {
    /// Minification filter
    pub min_filter: Filter,
    /// Magnification filter
    pub mag_filter: Filter,
    /// Addressing mode for all three axes
    pub address_mode: AddressMode,
}

impl SamplerDesc {
    /// Nearest filtering with clamp-to-edge addressing.
    pub const POINT_CLAMP: Self = Self {
        min_filter: Filter::Nearest,
        mag_filter: Filter::Nearest,
        address_mode: AddressMode::ClampToEdge,
    };
}
