//! Null backend for testing and trace replay

use super::GraphicsBackend;
use crate::lut::LutState;
use crate::rasterizer::{UniformBlockDirty, VertexArrayInfo};
use crate::uniforms::UniformBlocks;
use crate::vertex::HardwareVertex;

/// Backend that renders nothing and counts what it was asked to do
#[derive(Debug, Default, Clone)]
pub struct NullBackend {
    pub draw_calls: u64,
    pub vertices: u64,
    pub vertex_array_bytes: u64,
    pub uniform_uploads: u64,
    pub lut_uploads: u64,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphicsBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn upload_uniforms(&mut self, _blocks: &UniformBlocks, dirty: UniformBlockDirty) {
        if dirty.intersects(UniformBlockDirty::BLOCKS) {
            self.uniform_uploads += 1;
        }
    }

    fn upload_luts(&mut self, _luts: &LutState, lighting: u32, dirty: UniformBlockDirty) {
        if lighting != 0 || dirty.intersects(UniformBlockDirty::LUTS) {
            self.lut_uploads += 1;
        }
    }

    fn draw_triangles(&mut self, vertices: &[HardwareVertex]) {
        self.draw_calls += 1;
        self.vertices += vertices.len() as u64;
    }

    fn draw_vertex_array(&mut self, info: &VertexArrayInfo, data: &[u8], _is_indexed: bool) {
        self.draw_calls += 1;
        self.vertices += info.vertex_count() as u64;
        self.vertex_array_bytes += data.len() as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut backend = NullBackend::new();
        backend.draw_triangles(&[HardwareVertex::default(); 6]);
        backend.upload_uniforms(&UniformBlocks::default(), UniformBlockDirty::FS);
        backend.upload_uniforms(&UniformBlocks::default(), UniformBlockDirty::empty());
        backend.upload_luts(&LutState::new(), 0, UniformBlockDirty::FOG_LUT);
        assert_eq!(backend.draw_calls, 1);
        assert_eq!(backend.vertices, 6);
        assert_eq!(backend.uniform_uploads, 1);
        assert_eq!(backend.lut_uploads, 1);
    }
}
