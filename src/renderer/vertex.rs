use bytemuck::{Pod, Zeroable};
use std::mem;

/// Vertex layout shared by every sorted, shadow and decal batch.
///
/// The field order (position, normal, diffuse, two uv pairs) is the contract
/// with sorting buffers: the sorting pool copies these verbatim into its
/// combined scratch buffer.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq, Default)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub diffuse: u32,
    pub uv0: [f32; 2],
    pub uv1: [f32; 2],
}

impl Vertex {
    pub const ATTRS: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Unorm8x4,
        3 => Float32x2,
        4 => Float32x2
    ];

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }

    pub fn z(&self) -> f32 {
        self.position[2]
    }
}

/// Pack an ARGB colour the way the vertex diffuse channel stores it.
#[inline]
pub const fn pack_argb(r: u8, g: u8, b: u8, a: u8) -> u32 {
    ((a as u32) << 24) | ((r as u32) << 16) | ((g as u32) << 8) | (b as u32)
}

/// Inverse of [`pack_argb`], returned as `[r, g, b, a]`.
#[inline]
pub const fn unpack_argb(color: u32) -> [u8; 4] {
    [
        (color >> 16) as u8,
        (color >> 8) as u8,
        color as u8,
        (color >> 24) as u8,
    ]
}

#[inline]
pub fn v(position: [f32; 3], diffuse: u32, uv0: [f32; 2]) -> Vertex {
    Vertex {
        position,
        normal: [0.0, 0.0, 1.0],
        diffuse,
        uv0,
        uv1: [0.0, 0.0],
    }
}
