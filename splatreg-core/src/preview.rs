//! Renderer-facing preview of a Gaussian primitive set

use crate::gaussian::GaussianPrimitiveSet;
use bytemuck::{Pod, Zeroable};

/// One colored preview point, laid out for direct GPU upload
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct PreviewVertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

/// Colored point cloud derived from primitive centers and base colors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewCloud {
    pub vertices: Vec<PreviewVertex>,
}

impl PreviewCloud {
    pub fn from_gaussians(set: &GaussianPrimitiveSet) -> Self {
        let vertices = set
            .positions()
            .iter()
            .zip(set.rgb_colors())
            .map(|(p, rgb)| PreviewVertex {
                position: [p.x, p.y, p.z],
                color: [rgb.x, rgb.y, rgb.z],
            })
            .collect();
        Self { vertices }
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Raw vertex bytes for a vertex buffer
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }
}
