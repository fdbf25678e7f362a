use bitflags::bitflags;

use crate::renderer::Vertex;

bitflags! {
    /// Optional vertex channels a draw reads.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VertexFormat: u8 {
        const LIGHTING = 1 << 0;
        const SECOND_UV = 1 << 1;
        const DIFFUSE = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Opaque,
    Alpha,
    Additive,
    Multiply,
}

impl BlendMode {
    pub fn blend_state(self) -> Option<wgpu::BlendState> {
        match self {
            Self::Opaque => None,
            Self::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
            Self::Additive => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::SrcAlpha,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent::OVER,
            }),
            Self::Multiply => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::Zero,
                    dst_factor: wgpu::BlendFactor::Src,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent::OVER,
            }),
        }
    }
}

/// Parameterised description of one draw path.
///
/// Every combination of vertex channels and texture stages resolves through
/// the same table instead of a hand-written case per combination.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawDescription {
    pub format: VertexFormat,
    pub texture_count: u8,
    pub attributes: Vec<wgpu::VertexAttribute>,
    pub stride: wgpu::BufferAddress,
    pub blend: Option<wgpu::BlendState>,
}

impl DrawDescription {
    pub fn new(format: VertexFormat, texture_count: u8, blend: BlendMode) -> Self {
        let attributes = ATTRIBUTE_TABLE
            .iter()
            .filter(|row| row.wanted(format, texture_count))
            .enumerate()
            .map(|(location, row)| wgpu::VertexAttribute {
                format: row.attribute.format,
                offset: row.attribute.offset,
                shader_location: location as u32,
            })
            .collect();

        Self {
            format,
            texture_count,
            attributes,
            stride: Vertex::layout().array_stride,
            blend: blend.blend_state(),
        }
    }

    pub fn layout(&self) -> wgpu::VertexBufferLayout<'_> {
        wgpu::VertexBufferLayout {
            array_stride: self.stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &self.attributes,
        }
    }
}

enum Requirement {
    Always,
    Format(VertexFormat),
    Textures(u8),
}

struct AttributeRow {
    requirement: Requirement,
    attribute: wgpu::VertexAttribute,
}

impl AttributeRow {
    fn wanted(&self, format: VertexFormat, texture_count: u8) -> bool {
        match self.requirement {
            Requirement::Always => true,
            Requirement::Format(flag) => format.contains(flag),
            Requirement::Textures(min) => texture_count >= min,
        }
    }
}

const ATTRIBUTE_TABLE: [AttributeRow; 5] = [
    AttributeRow {
        requirement: Requirement::Always,
        attribute: Vertex::ATTRS[0],
    },
    AttributeRow {
        requirement: Requirement::Format(VertexFormat::LIGHTING),
        attribute: Vertex::ATTRS[1],
    },
    AttributeRow {
        requirement: Requirement::Format(VertexFormat::DIFFUSE),
        attribute: Vertex::ATTRS[2],
    },
    AttributeRow {
        requirement: Requirement::Textures(1),
        attribute: Vertex::ATTRS[3],
    },
    AttributeRow {
        requirement: Requirement::Format(VertexFormat::SECOND_UV),
        attribute: Vertex::ATTRS[4],
    },
];
