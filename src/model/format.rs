//! Formats & Attributes
//!
//! Backend-neutral element formats and the `(kind, format)` attribute pairs
//! that define an interleaved data layout.

use serde::{Deserialize, Serialize};

/// Element format shared by vertex attributes, index data and texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    R16Float,
    Rgba16Float,
    R32Float,
    Rg32Float,
    Rgb32Float,
    Rgba32Float,
    R16Uint,
    R32Uint,
    Depth32Float,
    Depth24PlusStencil8,
}

impl Format {
    /// Size of one element in bytes.
    #[inline]
    #[must_use]
    pub const fn byte_size(self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::Rg8Unorm | Self::R16Float | Self::R16Uint => 2,
            Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::R32Float
            | Self::R32Uint
            | Self::Depth32Float
            | Self::Depth24PlusStencil8 => 4,
            Self::Rgba16Float | Self::Rg32Float => 8,
            Self::Rgb32Float => 12,
            Self::Rgba32Float => 16,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::Depth32Float | Self::Depth24PlusStencil8)
    }

    /// Whether the format can be used as index data.
    #[inline]
    #[must_use]
    pub const fn is_index(self) -> bool {
        matches!(self, Self::R16Uint | Self::R32Uint)
    }
}

/// Semantic meaning of one attribute in a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeKind {
    Position,
    Normal,
    Tangent,
    Color,
    TexCoord,
    Index,
    Texel,
    Scalar,
    Vector,
    Matrix,
    Raw,
}

/// One `(kind, format)` pair of an interleaved layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    pub kind: AttributeKind,
    pub format: Format,
}

impl Attribute {
    #[inline]
    #[must_use]
    pub const fn new(kind: AttributeKind, format: Format) -> Self {
        Self { kind, format }
    }
}

/// Byte stride of an interleaved attribute list.
#[must_use]
pub fn stride(attributes: &[Attribute]) -> u64 {
    attributes
        .iter()
        .map(|a| u64::from(a.format.byte_size()))
        .sum()
}

/// Byte offset of every attribute inside one interleaved unit.
#[must_use]
pub fn attribute_offsets(attributes: &[Attribute]) -> Vec<u64> {
    let mut offset = 0;
    attributes
        .iter()
        .map(|a| {
            let current = offset;
            offset += u64::from(a.format.byte_size());
            current
        })
        .collect()
}
