//! Backend-neutral graphics pipeline description.
//!
//! - [`PipelineDesc`] collects the two shader stages, the vertex input layout
//!   and the color target format of one render pass
//! - [`StageDesc`] pairs stage bytecode with the resource slots it declares

use crate::shader::{ShaderResources, ShaderStage};
use crate::types::ImageFormat;

/// Primitive topology type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PrimitiveTopology {
    /// Triangle list - every 3 vertices form a triangle
    #[default]
    TriangleList,
    /// Triangle strip - each vertex after the first 2 forms a triangle
    TriangleStrip,
    /// Line list - every 2 vertices form a line
    LineList,
    /// Point list - each vertex is a point
    PointList,
}

/// Format of one vertex attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexFormat {
    /// Two 32-bit floats
    Float2,
    /// Three 32-bit floats
    Float3,
    /// Four 32-bit floats
    Float4,
    /// Four normalized bytes
    Unorm8x4,
}

impl VertexFormat {
    /// Size of the attribute in bytes.
    pub fn size(self) -> u32 {
        match self {
            VertexFormat::Float2 => 8,
            VertexFormat::Float3 => 12,
            VertexFormat::Float4 => 16,
            VertexFormat::Unorm8x4 => 4,
        }
    }
}

/// One attribute read from a vertex buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Shader input location
    pub location: u32,
    /// Byte offset inside one vertex
    pub offset: u32,
    /// Attribute format
    pub format: VertexFormat,
}

/// Layout of one bound vertex buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexBufferLayout {
    /// Distance between consecutive vertices in bytes
    pub stride: u32,
    /// Attributes sourced from this buffer
    pub attributes: Vec<VertexAttribute>,
}

/// Compiled bytecode and resource declarations of one shader stage.
#[derive(Clone, Copy, Debug)]
pub struct StageDesc<'a> {
    /// Stage the bytecode was compiled for
    pub stage: ShaderStage,
    /// Device bytecode
    pub code: &'a [u8],
    /// Entry point name
    pub entry_point: &'a str,
    /// Slots the stage declares
    pub resources: ShaderResources,
}

/// Graphics pipeline creation parameters.
#[derive(Clone, Debug)]
pub struct PipelineDesc<'a> {
    /// Debug name
    pub name: &'a str,
    /// Vertex stage
    pub vertex: StageDesc<'a>,
    /// Fragment stage
    pub fragment: StageDesc<'a>,
    /// Vertex buffers consumed by the vertex stage, in binding order
    pub vertex_buffers: &'a [VertexBufferLayout],
    /// Primitive topology
    pub topology: PrimitiveTopology,
    /// Format of the single color target
    pub color_format: ImageFormat,
}

impl PipelineDesc<'_> {
    /// Resource declarations of `stage`.
    pub fn resources(&self, stage: ShaderStage) -> ShaderResources {
        match stage {
            ShaderStage::Vertex => self.vertex.resources,
            ShaderStage::Fragment => self.fragment.resources,
        }
    }

    /// Stages that declared a uniform slot for pushed constants.
    pub fn uniform_stages(&self) -> impl Iterator<Item = ShaderStage> + '_ {
        ShaderStage::ALL
            .into_iter()
            .filter(|stage| self.resources(*stage).uniform_buffers > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(stage: ShaderStage, uniform_buffers: u32) -> StageDesc<'static> {
        StageDesc {
            stage,
            code: &[],
            entry_point: "main",
            resources: ShaderResources {
                uniform_buffers,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_uniform_stages() {
        let desc = PipelineDesc {
            name: "test",
            vertex: stage(ShaderStage::Vertex, 0),
            fragment: stage(ShaderStage::Fragment, 1),
            vertex_buffers: &[],
            topology: PrimitiveTopology::TriangleList,
            color_format: ImageFormat::Rgba8Unorm,
        };
        let stages: Vec<_> = desc.uniform_stages().collect();
        assert_eq!(stages, vec![ShaderStage::Fragment]);
    }

    #[test]
    fn test_vertex_format_size() {
        assert_eq!(VertexFormat::Float2.size(), 8);
        assert_eq!(VertexFormat::Float3.size(), 12);
        assert_eq!(VertexFormat::Float4.size(), 16);
        assert_eq!(VertexFormat::Unorm8x4.size(), 4);
    }
}
