//! Data Descriptions
//!
//! A [`Description`] declares one semantic data item of a stage: its tag, its
//! interleaved layout, how many units it holds, who may touch it and how many
//! physical instances it needs. Descriptions are plain data; the resource
//! manager turns them into allocations.

use serde::{Deserialize, Serialize};

use super::format::{Attribute, AttributeKind, Format, stride};
use crate::errors::{PipelineError, Result};

/// Data kind of a description. Also the first key of a stage's description table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataKind {
    Vertex,
    Index,
    Uniform,
    Storage,
    Texture,
    RenderTarget,
    Draw,
}

impl DataKind {
    /// Kinds backed by an image allocation rather than a buffer.
    #[inline]
    #[must_use]
    pub const fn is_image(self) -> bool {
        matches!(self, Self::Texture | Self::RenderTarget)
    }

    /// Kinds that get a stage I/O write endpoint.
    #[inline]
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(
            self,
            Self::Vertex | Self::Index | Self::Uniform | Self::Storage | Self::Texture
        )
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Vertex => "Vertex",
            Self::Index => "Index",
            Self::Uniform => "Uniform",
            Self::Storage => "Storage",
            Self::Texture => "Texture",
            Self::RenderTarget => "RenderTarget",
            Self::Draw => "Draw",
        }
    }
}

/// Who is allowed to read and write a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Access {
    HostOnly,
    DeviceOnly,
    #[default]
    HostToDevice,
    DeviceToHost,
}

impl Access {
    #[inline]
    #[must_use]
    pub const fn host_writable(self) -> bool {
        matches!(self, Self::HostOnly | Self::HostToDevice)
    }

    #[inline]
    #[must_use]
    pub const fn host_readable(self) -> bool {
        matches!(self, Self::HostOnly | Self::DeviceToHost)
    }
}

/// Number of physical instances behind one tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UpdateScheme {
    /// One instance for the pipeline's lifetime.
    #[default]
    Static,
    /// One instance per frame-in-flight slot.
    Dynamic,
}

/// Pixel size of the presentation area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    #[inline]
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

/// Size policy of an image description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageExtent {
    /// Fixed pixel size, independent of the viewport.
    Fixed { width: u32, height: u32 },
    /// Follows the viewport; recreated on resize.
    Viewport,
}

impl ImageExtent {
    #[inline]
    #[must_use]
    pub const fn resolve(self, viewport: Viewport) -> Viewport {
        match self {
            Self::Fixed { width, height } => Viewport::new(width, height),
            Self::Viewport => viewport,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_viewport_sized(self) -> bool {
        matches!(self, Self::Viewport)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AddressMode {
    #[default]
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

/// Sampler requested for a sampled texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SamplerDescription {
    pub filter: FilterMode,
    pub address_mode: AddressMode,
}

/// Declaration of one semantic data item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Description {
    tag: String,
    kind: DataKind,
    attributes: Vec<Attribute>,
    max_units: u64,
    #[serde(default)]
    access: Access,
    #[serde(default)]
    scheme: UpdateScheme,
    #[serde(default)]
    extent: Option<ImageExtent>,
    #[serde(default)]
    sampler: Option<SamplerDescription>,
    #[serde(default)]
    clear_color: Option<[f64; 4]>,
    #[serde(default)]
    presentable: bool,
}

// ─── Constructors ─────────────────────────────────────────────────────────────

impl Description {
    #[must_use]
    pub fn new(kind: DataKind, tag: impl Into<String>) -> Self {
        let extent = match kind {
            DataKind::RenderTarget => Some(ImageExtent::Viewport),
            _ => None,
        };
        Self {
            tag: tag.into(),
            kind,
            attributes: Vec::new(),
            max_units: 0,
            access: Access::default(),
            scheme: UpdateScheme::default(),
            extent,
            sampler: None,
            clear_color: None,
            presentable: false,
        }
    }

    #[must_use]
    pub fn vertex(tag: impl Into<String>) -> Self {
        Self::new(DataKind::Vertex, tag)
    }

    /// Index data; the format must be `R16Uint` or `R32Uint`.
    #[must_use]
    pub fn index(tag: impl Into<String>, format: Format) -> Self {
        Self::new(DataKind::Index, tag).attribute(AttributeKind::Index, format)
    }

    #[must_use]
    pub fn uniform(tag: impl Into<String>) -> Self {
        Self::new(DataKind::Uniform, tag)
    }

    #[must_use]
    pub fn storage(tag: impl Into<String>) -> Self {
        Self::new(DataKind::Storage, tag)
    }

    /// Fixed-size sampled texture with a default linear sampler.
    #[must_use]
    pub fn texture(tag: impl Into<String>, format: Format, width: u32, height: u32) -> Self {
        let mut desc =
            Self::new(DataKind::Texture, tag).attribute(AttributeKind::Texel, format);
        desc.extent = Some(ImageExtent::Fixed { width, height });
        desc.sampler = Some(SamplerDescription::default());
        desc
    }

    /// Viewport-sized render target.
    #[must_use]
    pub fn render_target(tag: impl Into<String>, format: Format) -> Self {
        let mut desc =
            Self::new(DataKind::RenderTarget, tag).attribute(AttributeKind::Texel, format);
        desc.access = Access::DeviceOnly;
        desc
    }
}

// ─── Builder ──────────────────────────────────────────────────────────────────

impl Description {
    #[must_use]
    pub fn attribute(mut self, kind: AttributeKind, format: Format) -> Self {
        self.attributes.push(Attribute::new(kind, format));
        self
    }

    #[must_use]
    pub fn attributes(mut self, attributes: impl IntoIterator<Item = Attribute>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    #[must_use]
    pub fn max_units(mut self, units: u64) -> Self {
        self.max_units = units;
        self
    }

    #[must_use]
    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    #[must_use]
    pub fn scheme(mut self, scheme: UpdateScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Shorthand for `scheme(UpdateScheme::Dynamic)`.
    #[must_use]
    pub fn dynamic(self) -> Self {
        self.scheme(UpdateScheme::Dynamic)
    }

    #[must_use]
    pub fn extent(mut self, extent: ImageExtent) -> Self {
        self.extent = Some(extent);
        self
    }

    #[must_use]
    pub fn sampler(mut self, sampler: Option<SamplerDescription>) -> Self {
        self.sampler = sampler;
        self
    }

    #[must_use]
    pub fn clear_color(mut self, rgba: [f64; 4]) -> Self {
        self.clear_color = Some(rgba);
        self
    }

    /// Marks a render target as the image copied to the swapchain each frame.
    #[must_use]
    pub fn presentable(mut self) -> Self {
        self.presentable = true;
        self
    }
}

// ─── Getters ──────────────────────────────────────────────────────────────────

impl Description {
    #[inline]
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> DataKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn attribute_list(&self) -> &[Attribute] {
        &self.attributes
    }

    #[inline]
    #[must_use]
    pub fn max_unit_count(&self) -> u64 {
        self.max_units
    }

    #[inline]
    #[must_use]
    pub fn access_qualifier(&self) -> Access {
        self.access
    }

    #[inline]
    #[must_use]
    pub fn update_scheme(&self) -> UpdateScheme {
        self.scheme
    }

    #[inline]
    #[must_use]
    pub fn image_extent(&self) -> Option<ImageExtent> {
        self.extent
    }

    #[inline]
    #[must_use]
    pub fn sampler_description(&self) -> Option<SamplerDescription> {
        self.sampler
    }

    /// Clear color set on the description, if any.
    #[inline]
    #[must_use]
    pub fn clear_value(&self) -> Option<[f64; 4]> {
        self.clear_color
    }

    #[inline]
    #[must_use]
    pub fn is_presentable(&self) -> bool {
        self.presentable
    }

    #[inline]
    #[must_use]
    pub fn stride(&self) -> u64 {
        stride(&self.attributes)
    }

    /// Texel format of an image description; the first attribute for buffers.
    #[inline]
    #[must_use]
    pub fn format(&self) -> Option<Format> {
        self.attributes.first().map(|a| a.format)
    }

    /// Whether the allocation depends on the viewport size.
    #[inline]
    #[must_use]
    pub fn is_viewport_sized(&self) -> bool {
        self.kind.is_image() && self.extent.is_some_and(ImageExtent::is_viewport_sized)
    }

    /// Number of units the allocation holds for the given viewport.
    #[must_use]
    pub fn unit_count(&self, viewport: Viewport) -> u64 {
        match (self.kind.is_image(), self.extent) {
            (true, Some(extent)) => {
                let size = extent.resolve(viewport);
                u64::from(size.width) * u64::from(size.height)
            }
            _ => self.max_units,
        }
    }

    /// Allocation size in bytes: `stride × unit_count`.
    #[must_use]
    pub fn byte_size(&self, viewport: Viewport) -> u64 {
        self.stride() * self.unit_count(viewport)
    }

    /// Structural checks performed before a description reaches the resource manager.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| PipelineError::InvalidDescription {
            tag: self.tag.clone(),
            reason: reason.to_string(),
        };

        if self.tag.is_empty() {
            return Err(invalid("empty tag"));
        }
        if self.kind == DataKind::Draw {
            return Err(invalid("draw descriptions are registered with register_draw"));
        }
        if self.attributes.is_empty() {
            return Err(invalid("attribute list is empty"));
        }
        if self.kind.is_image() {
            if self.attributes.len() != 1 {
                return Err(invalid("image descriptions take exactly one texel attribute"));
            }
            if self.extent.is_none() {
                return Err(invalid("image description without extent"));
            }
        } else if self.max_units == 0 {
            return Err(invalid("max unit count is zero"));
        }
        if self.kind == DataKind::Index
            && (self.attributes.len() != 1 || !self.attributes[0].format.is_index())
        {
            return Err(invalid("index data needs a single R16Uint or R32Uint attribute"));
        }
        if self.presentable && self.kind != DataKind::RenderTarget {
            return Err(invalid("only render targets can be presentable"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_target_follows_viewport() {
        let rt = Description::render_target("color", Format::Rgba8Unorm);
        assert!(rt.is_viewport_sized());
        assert_eq!(rt.byte_size(Viewport::new(4, 2)), 4 * 4 * 2);
        assert!(rt.validate().is_ok());
    }

    #[test]
    fn buffer_size_is_stride_times_units() {
        let desc = Description::vertex("mesh")
            .attribute(AttributeKind::Position, Format::Rgb32Float)
            .attribute(AttributeKind::Color, Format::Rgba8Unorm)
            .max_units(10);
        assert_eq!(desc.byte_size(Viewport::default()), 160);
        assert!(!desc.is_viewport_sized());
    }

    #[test]
    fn validate_rejects_empty_layout() {
        let desc = Description::uniform("camera").max_units(1);
        assert!(matches!(
            desc.validate(),
            Err(PipelineError::InvalidDescription { .. })
        ));
    }

    #[test]
    fn validate_rejects_non_index_format() {
        let desc = Description::index("ib", Format::R32Float).max_units(3);
        assert!(desc.validate().is_err());
    }
}
