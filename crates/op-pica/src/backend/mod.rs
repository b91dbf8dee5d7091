//! Host rendering backends

pub mod null;

use crate::lut::LutState;
use crate::rasterizer::{UniformBlockDirty, VertexArrayInfo};
use crate::uniforms::UniformBlocks;
use crate::vertex::HardwareVertex;

pub use null::NullBackend;

/// Graphics backend trait
pub trait GraphicsBackend {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Upload the uniform blocks flagged in `dirty`
    fn upload_uniforms(&mut self, blocks: &UniformBlocks, dirty: UniformBlockDirty);

    /// Upload lookup tables. `lighting` has bit n set for each lighting table
    /// to refresh; `dirty` says which other table groups changed.
    fn upload_luts(&mut self, luts: &LutState, lighting: u32, dirty: UniformBlockDirty);

    /// Draw a batch of triangles, three vertices each
    fn draw_triangles(&mut self, vertices: &[HardwareVertex]);

    /// Draw from a raw attribute array; the vertex shader runs on the host
    fn draw_vertex_array(&mut self, info: &VertexArrayInfo, data: &[u8], is_indexed: bool);
}

/// Create a backend by name. Unknown names fall back to the null backend.
pub fn create_backend(name: &str) -> Box<dyn GraphicsBackend> {
    match name {
        "null" => Box::new(NullBackend::new()),
        other => {
            tracing::warn!("Unknown graphics backend '{}', using the null backend", other);
            Box::new(NullBackend::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_backend() {
        assert_eq!(create_backend("null").name(), "null");
        assert_eq!(create_backend("vulkan").name(), "null");
    }
}
