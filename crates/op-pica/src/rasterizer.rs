//! Backend-independent half of the hardware renderer
//!
//! Converts shader output into host vertices, measures vertex arrays for
//! direct upload and keeps the uniform blocks in step with the registers.

use bitflags::bitflags;

use crate::backend::GraphicsBackend;
use crate::dirty::DirtyRegs;
use crate::loader::LoaderConfig;
use crate::lut::{LutDirty, LutState};
use crate::memory::GuestMemory;
use crate::min_max::find_min_max;
use crate::regs::{self, id, Regs};
use crate::state::PicaState;
use crate::uniforms::UniformBlocks;
use crate::vertex::{are_quaternions_opposite, HardwareVertex, OutputVertex};

bitflags! {
    /// Host-side blocks that need uploading before the next draw
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UniformBlockDirty: u32 {
        const VS_PICA = 1 << 0;
        const VS = 1 << 1;
        const FS = 1 << 2;
        const LIGHTING_LUT = 1 << 3;
        const FOG_LUT = 1 << 4;
        const PROCTEX_LUT = 1 << 5;
    }
}

impl UniformBlockDirty {
    pub const BLOCKS: Self = Self::VS_PICA.union(Self::VS).union(Self::FS);
    pub const LUTS: Self = Self::LIGHTING_LUT
        .union(Self::FOG_LUT)
        .union(Self::PROCTEX_LUT);
}

/// Range of vertices a draw touches and the size of their attribute data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VertexArrayInfo {
    pub vertex_min: u32,
    pub vertex_max: u32,
    /// Bytes of compacted attribute data for the whole range
    pub vs_input_size: u32,
}

impl VertexArrayInfo {
    /// A draw that reads nothing
    pub const EMPTY: Self = Self {
        vertex_min: 1,
        vertex_max: 0,
        vs_input_size: 0,
    };

    pub fn vertex_count(&self) -> u32 {
        if self.vertex_max >= self.vertex_min {
            self.vertex_max - self.vertex_min + 1
        } else {
            0
        }
    }
}

/// Largest vertex count a single draw may cover
pub const MAX_DRAW_VERTICES: u32 = 1 << 20;
/// Largest compacted vertex array a single draw may upload
pub const MAX_VERTEX_ARRAY_SIZE: u64 = 16 << 20;

const fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

pub struct RasterizerAccelerated {
    vertex_batch: Vec<HardwareVertex>,
    blocks: UniformBlocks,
    dirty: UniformBlockDirty,
    /// Lighting tables awaiting upload, one bit per table
    lighting_lut_dirty: u32,
    res_scale: u32,
}

impl Default for RasterizerAccelerated {
    fn default() -> Self {
        Self::new(1)
    }
}

impl RasterizerAccelerated {
    pub fn new(res_scale: u32) -> Self {
        let res_scale = res_scale.max(1);
        let mut blocks = UniformBlocks::default();
        blocks.fs.framebuffer_scale = res_scale as i32;
        Self {
            vertex_batch: Vec::new(),
            blocks,
            dirty: UniformBlockDirty::all(),
            lighting_lut_dirty: 0,
            res_scale,
        }
    }

    pub fn res_scale(&self) -> u32 {
        self.res_scale
    }

    pub fn vertex_batch(&self) -> &[HardwareVertex] {
        &self.vertex_batch
    }

    pub fn uniform_blocks(&self) -> &UniformBlocks {
        &self.blocks
    }

    pub fn dirty(&self) -> UniformBlockDirty {
        self.dirty
    }

    /// Queue a triangle for the next batch.
    ///
    /// Quaternions of `v1` and `v2` are each compared against `v0` alone and
    /// negated when they point away from it.
    pub fn add_triangle(&mut self, v0: &OutputVertex, v1: &OutputVertex, v2: &OutputVertex) {
        self.vertex_batch.push(HardwareVertex::new(v0, false));
        self.vertex_batch.push(HardwareVertex::new(
            v1,
            are_quaternions_opposite(&v0.quat, &v1.quat),
        ));
        self.vertex_batch.push(HardwareVertex::new(
            v2,
            are_quaternions_opposite(&v0.quat, &v2.quat),
        ));
    }

    /// Find the vertex range a draw reads and the size of its attribute data
    pub fn analyze_vertex_array(
        &self,
        regs: &Regs,
        memory: &dyn GuestMemory,
        is_indexed: bool,
        stride_alignment: u32,
    ) -> VertexArrayInfo {
        let num_vertices = regs.num_vertices();
        if num_vertices > MAX_DRAW_VERTICES {
            tracing::error!(
                "Draw of {} vertices exceeds the {} vertex limit, skipping",
                num_vertices,
                MAX_DRAW_VERTICES
            );
            return VertexArrayInfo::EMPTY;
        }

        let (vertex_min, vertex_max) = if is_indexed {
            index_range(regs, memory, num_vertices)
        } else if num_vertices == 0 {
            (1, 0)
        } else {
            let min = regs.vertex_offset();
            (min, min.wrapping_add(num_vertices - 1))
        };

        let mut info = VertexArrayInfo {
            vertex_min,
            vertex_max,
            vs_input_size: 0,
        };
        let vertex_num = info.vertex_count() as u64;
        let mut size: u64 = 0;
        for loader in 0..id::NUM_ATTRIBUTE_LOADERS as usize {
            let config = LoaderConfig::from_regs(regs, loader);
            if config.component_count != 0 {
                let stride = align_up(config.byte_count as u64, stride_alignment as u64);
                size += align_up(stride * vertex_num, 4);
            }
        }

        if size > MAX_VERTEX_ARRAY_SIZE {
            tracing::error!(
                "Vertex array of {} bytes for vertices {}..={} is too large, skipping",
                size,
                vertex_min,
                vertex_max
            );
            return VertexArrayInfo::EMPTY;
        }
        info.vs_input_size = size as u32;
        info
    }

    /// Gather the attribute arrays of `info`'s vertex range into one buffer.
    ///
    /// Each loader's array is copied with its stride rounded up to
    /// `stride_alignment` and padded to four bytes. Unreadable arrays are
    /// zero-filled.
    pub fn setup_vertex_array(
        &self,
        regs: &Regs,
        memory: &dyn GuestMemory,
        info: &VertexArrayInfo,
        stride_alignment: u32,
    ) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(info.vs_input_size as usize);
        let vertex_num = info.vertex_count();
        let base = regs.vertex_attrib_base();

        for loader in 0..id::NUM_ATTRIBUTE_LOADERS as usize {
            let config = LoaderConfig::from_regs(regs, loader);
            if config.component_count == 0 {
                continue;
            }
            let stride = config.byte_count as usize;
            let aligned = align_up(config.byte_count as u64, stride_alignment as u64) as usize;
            let start = buffer.len();
            let end = start + align_up((aligned * vertex_num as usize) as u64, 4) as usize;

            let addr = base
                .wrapping_add(config.data_offset)
                .wrapping_add(info.vertex_min.wrapping_mul(config.byte_count));
            match memory.read(addr, stride * vertex_num as usize) {
                Some(data) if stride == aligned => buffer.extend_from_slice(data),
                Some(data) if stride > 0 => {
                    for vertex in data.chunks_exact(stride) {
                        buffer.extend_from_slice(vertex);
                        buffer.resize(buffer.len() + aligned - stride, 0);
                    }
                }
                Some(_) => {}
                None => tracing::error!(
                    "Vertex array of loader {} at {:#010x} is not readable",
                    loader,
                    addr
                ),
            }
            buffer.resize(end, 0);
        }
        buffer
    }

    /// Bring the uniform blocks up to date with the registers changed since
    /// the last draw, then clear the dirty registers.
    pub fn sync_draw_uniforms(&mut self, state: &mut PicaState) {
        self.sync_fixed_function(&state.regs, Some(&state.dirty_regs));

        if state.vs.uniforms_dirty {
            self.blocks.vs_pica.set_from_regs(&state.regs.vs(), &state.vs);
            state.vs.uniforms_dirty = false;
            self.dirty |= UniformBlockDirty::VS_PICA;
        }

        let (lighting, luts) = state.luts.take_dirty();
        self.mark_luts(lighting, luts);

        state.dirty_regs.reset();
    }

    /// Recompute every block from the registers, regardless of dirty state
    pub fn sync_entire_state(&mut self, state: &PicaState) {
        self.sync_fixed_function(&state.regs, None);
        self.blocks.vs_pica.set_from_regs(&state.regs.vs(), &state.vs);
        self.mark_luts((1 << crate::lut::NUM_LIGHTING_LUTS) - 1, LutDirty::all());
        self.dirty |= UniformBlockDirty::BLOCKS;
    }

    /// Send the dirty blocks and tables to `backend`
    pub fn upload_dirty(&mut self, backend: &mut dyn GraphicsBackend, luts: &LutState) {
        let dirty = std::mem::take(&mut self.dirty);
        if dirty.intersects(UniformBlockDirty::BLOCKS) {
            backend.upload_uniforms(&self.blocks, dirty & UniformBlockDirty::BLOCKS);
        }
        if dirty.intersects(UniformBlockDirty::LUTS) {
            let lighting = std::mem::take(&mut self.lighting_lut_dirty);
            backend.upload_luts(luts, lighting, dirty & UniformBlockDirty::LUTS);
        }
    }

    /// Draw and clear the batch; returns the number of triangles drawn
    pub fn flush_triangles(&mut self, backend: &mut dyn GraphicsBackend) -> usize {
        if self.vertex_batch.is_empty() {
            return 0;
        }
        backend.draw_triangles(&self.vertex_batch);
        let triangles = self.vertex_batch.len() / 3;
        self.vertex_batch.clear();
        triangles
    }

    fn mark_luts(&mut self, lighting: u32, luts: LutDirty) {
        if lighting != 0 {
            self.lighting_lut_dirty |= lighting;
            self.dirty |= UniformBlockDirty::LIGHTING_LUT;
        }
        if luts.contains(LutDirty::FOG) {
            self.dirty |= UniformBlockDirty::FOG_LUT;
        }
        if luts.intersects(LutDirty::PROCTEX) {
            self.dirty |= UniformBlockDirty::PROCTEX_LUT;
        }
    }

    /// Recompute the fixed-function blocks. `None` syncs every group.
    fn sync_fixed_function(&mut self, regs: &Regs, dirty: Option<&DirtyRegs>) {
        let check = |pred: fn(&DirtyRegs) -> bool| dirty.map_or(true, pred);
        let vs_before = self.blocks.vs;
        let fs_before = self.blocks.fs;

        if check(DirtyRegs::check_clipping) {
            self.sync_clip(regs);
        }
        if check(DirtyRegs::check_depth) {
            self.blocks.fs.depth_scale = regs.viewport_depth_range().to_f32();
            self.blocks.fs.depth_offset = regs.viewport_depth_near_plane().to_f32();
        }
        if check(DirtyRegs::check_scissor) {
            self.sync_scissor(regs);
        }
        if check(DirtyRegs::check_blend) {
            self.blocks.fs.blend_color = regs::rgba8(regs.blend_color());
        }
        if check(DirtyRegs::check_alpha_test) {
            self.blocks.fs.alphatest_ref = regs.alpha_test_ref() as i32;
        }
        if check(DirtyRegs::check_tex_units) {
            self.sync_tex_units(regs);
        }
        if check(DirtyRegs::check_tex_env) {
            self.sync_tex_env(regs);
        }
        if check(DirtyRegs::check_lighting_ambient) {
            self.blocks.fs.lighting_global_ambient =
                regs::light_color(regs.get(id::LIGHTING_GLOBAL_AMBIENT));
        }
        for light in 0..self.blocks.fs.light_src.len() {
            if dirty.map_or(true, |d| d.check_light(light)) {
                self.sync_light(regs, light);
            }
        }
        if check(DirtyRegs::check_fog_color) {
            let [r, g, b, _] = regs::rgba8(regs.fog_color());
            self.blocks.fs.fog_color = [r, g, b];
        }
        if check(DirtyRegs::check_proctex) {
            self.sync_proctex(regs);
        }
        if check(DirtyRegs::check_shadow) {
            let (constant, linear) = regs.shadow_bias();
            self.blocks.fs.shadow_bias_constant = constant.to_f32();
            self.blocks.fs.shadow_bias_linear = linear.to_f32();
            self.blocks.fs.shadow_texture_bias = regs.shadow_texture_bias() as i32;
        }

        if bytemuck::bytes_of(&vs_before) != bytemuck::bytes_of(&self.blocks.vs) {
            self.dirty |= UniformBlockDirty::VS;
        }
        if bytemuck::bytes_of(&fs_before) != bytemuck::bytes_of(&self.blocks.fs) {
            self.dirty |= UniformBlockDirty::FS;
        }
    }

    fn sync_clip(&mut self, regs: &Regs) {
        self.blocks.vs.enable_clip1 = regs.clip_enable() as u32;
        self.blocks.vs.clip_coef = regs.clip_coef().map(|c| c.to_f32());
    }

    fn sync_scissor(&mut self, regs: &Regs) {
        let scissor = regs.scissor();
        let scale = self.res_scale as i32;
        let fs = &mut self.blocks.fs;
        fs.scissor_x1 = scissor.x1 as i32 * scale;
        fs.scissor_y1 = scissor.y1 as i32 * scale;
        fs.scissor_x2 = (scissor.x2 as i32 + 1) * scale;
        fs.scissor_y2 = (scissor.y2 as i32 + 1) * scale;
    }

    fn sync_tex_units(&mut self, regs: &Regs) {
        let fs = &mut self.blocks.fs;
        for unit in 0..fs.tex_lod_bias.len() {
            fs.tex_lod_bias[unit] = regs.texture_lod_bias(unit);
            fs.tex_border_color[unit] = regs::rgba8(regs.texture_border_color(unit));
        }
        fs.shadow_texture_bias = regs.shadow_texture_bias() as i32;
    }

    fn sync_tex_env(&mut self, regs: &Regs) {
        let fs = &mut self.blocks.fs;
        for (stage, color) in fs.const_color.iter_mut().enumerate() {
            *color = regs::rgba8(regs.tev_const_color(stage));
        }
        fs.tev_combiner_buffer_color = regs::rgba8(regs.tev_combiner_buffer_color());
    }

    fn sync_light(&mut self, regs: &Regs, light: usize) {
        let src = &mut self.blocks.fs.light_src[light];
        src.specular_0 = regs::light_color(regs.light(light, id::LIGHT_SPECULAR0));
        src.specular_1 = regs::light_color(regs.light(light, id::LIGHT_SPECULAR1));
        src.diffuse = regs::light_color(regs.light(light, id::LIGHT_DIFFUSE));
        src.ambient = regs::light_color(regs.light(light, id::LIGHT_AMBIENT));
        src.position = regs.light_position(light).map(|c| c.to_f32());
        src.spot_direction = regs.light_spot_direction(light);
        let (bias, scale) = regs.light_dist_atten(light);
        src.dist_atten_bias = bias.to_f32();
        src.dist_atten_scale = scale.to_f32();
    }

    fn sync_proctex(&mut self, regs: &Regs) {
        let fs = &mut self.blocks.fs;
        fs.proctex_noise_a = regs.proctex_noise_amplitude();
        fs.proctex_noise_f = regs.proctex_noise_frequency().map(|c| c.to_f32());
        fs.proctex_noise_p = regs.proctex_noise_phase().map(|c| c.to_f32());
        fs.proctex_bias = regs.proctex_bias().to_f32();
        fs.proctex_lut_offset = regs.proctex_lut_offset() as i32;
    }
}

/// Min and max index of an indexed draw; an empty range when the index
/// buffer is empty or unreadable
fn index_range(regs: &Regs, memory: &dyn GuestMemory, count: u32) -> (u32, u32) {
    let index_array = regs.index_array();
    let addr = regs.vertex_attrib_base().wrapping_add(index_array.offset);
    let element = if index_array.u16_indices { 2 } else { 1 };

    let Some(bytes) = memory.read(addr, count as usize * element) else {
        tracing::error!(
            "Index buffer at {:#010x} ({} indices) is not readable",
            addr,
            count
        );
        return (1, 0);
    };
    if count == 0 {
        return (1, 0);
    }

    if index_array.u16_indices {
        let (min, max) = match bytemuck::try_cast_slice::<u8, u16>(bytes) {
            Ok(indices) if cfg!(target_endian = "little") => find_min_max(indices),
            _ => {
                let indices: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]))
                    .collect();
                find_min_max(&indices)
            }
        };
        (min as u32, max as u32)
    } else {
        let (min, max) = find_min_max(bytes);
        (min as u32, max as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;
    use crate::memory::FlatMemory;
    use op_core::Float24;

    fn vertex_with_quat(q: [f32; 4]) -> OutputVertex {
        OutputVertex {
            quat: q.map(Float24::from_f32),
            ..Default::default()
        }
    }

    fn loader(regs: &mut Regs, n: u32, offset: u32, stride: u32, components: u32) {
        let base = id::ATTRIBUTE_LOADER0 + n * id::ATTRIBUTE_LOADER_STRIDE;
        regs.set(base, offset);
        regs.set(base + 1, 0);
        regs.set(base + 2, (components << 28) | (stride << 16));
    }

    #[test]
    fn test_quaternion_flip_relative_to_v0() {
        let mut rasterizer = RasterizerAccelerated::new(1);
        let v0 = vertex_with_quat([1.0, 0.0, 0.0, 0.0]);
        let v1 = vertex_with_quat([-1.0, 0.0, 0.0, 0.0]);
        let v2 = vertex_with_quat([1.0, 0.0, 0.0, 0.0]);
        rasterizer.add_triangle(&v0, &v1, &v2);

        let batch = rasterizer.vertex_batch();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].normquat, [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(batch[1].normquat[0], 1.0);
        assert_eq!(batch[2].normquat[0], 1.0);
    }

    #[test]
    fn test_flip_is_not_chained() {
        // v2 agrees with v0 but not with v1: only v1 flips
        let mut rasterizer = RasterizerAccelerated::new(1);
        let v0 = vertex_with_quat([1.0, 0.0, 0.0, 0.0]);
        let v1 = vertex_with_quat([-0.5, 1.0, 0.0, 0.0]);
        let v2 = vertex_with_quat([1.0, -1.0, 0.0, 0.0]);
        rasterizer.add_triangle(&v0, &v1, &v2);

        let batch = rasterizer.vertex_batch();
        assert_eq!(batch[1].normquat, [0.5, -1.0, -0.0, -0.0]);
        assert_eq!(batch[2].normquat, [1.0, -1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_analyze_non_indexed() {
        let mut regs = Regs::new();
        regs.set(id::VERTEX_OFFSET, 5);
        regs.set(id::NUM_VERTICES, 10);
        let memory = FlatMemory::new(0, 0);

        let info = RasterizerAccelerated::new(1).analyze_vertex_array(&regs, &memory, false, 1);
        assert_eq!(info.vertex_min, 5);
        assert_eq!(info.vertex_max, 14);
        assert_eq!(info.vertex_count(), 10);
        assert_eq!(info.vs_input_size, 0);
    }

    #[test]
    fn test_analyze_indexed() {
        let mut regs = Regs::new();
        regs.set(id::VERTEX_ATTRIB_BASE, 0x1000 >> 3);
        regs.set(id::INDEX_ARRAY, 0x100 | (1 << 31));
        regs.set(id::NUM_VERTICES, 4);
        // 6-byte stride, aligned to 8 for the host, 3 vertices: 24 bytes
        loader(&mut regs, 0, 0, 6, 1);
        // 3-byte stride, also aligned to 8: 24 bytes
        loader(&mut regs, 1, 0x40, 3, 1);

        let mut memory = FlatMemory::new(0x1000, 0x200);
        let indices: [u16; 4] = [7, 9, 8, 7];
        memory.write(0x1100, bytemuck::cast_slice(&indices)).unwrap();

        let rasterizer = RasterizerAccelerated::new(1);
        let info = rasterizer.analyze_vertex_array(&regs, &memory, true, 8);
        assert_eq!((info.vertex_min, info.vertex_max), (7, 9));
        assert_eq!(info.vs_input_size, 24 + 24);

        // Unaligned strides: 18 and 9 bytes, each padded to 4
        let info = rasterizer.analyze_vertex_array(&regs, &memory, true, 1);
        assert_eq!(info.vs_input_size, 20 + 12);
    }

    #[test]
    fn test_analyze_u8_indices_and_empty_draws() {
        let mut regs = Regs::new();
        regs.set(id::NUM_VERTICES, 3);
        let mut memory = FlatMemory::new(0, 0x10);
        memory.write(0, &[4, 2, 3]).unwrap();

        let rasterizer = RasterizerAccelerated::new(1);
        let info = rasterizer.analyze_vertex_array(&regs, &memory, true, 1);
        assert_eq!((info.vertex_min, info.vertex_max), (2, 4));

        regs.set(id::NUM_VERTICES, 0);
        assert_eq!(rasterizer.analyze_vertex_array(&regs, &memory, true, 1).vertex_count(), 0);
        assert_eq!(rasterizer.analyze_vertex_array(&regs, &memory, false, 1).vertex_count(), 0);
    }

    #[test]
    fn test_analyze_rejects_oversized_draws() {
        let mut regs = Regs::new();
        loader(&mut regs, 0, 0, 16, 4);
        let memory = FlatMemory::new(0, 0);
        let rasterizer = RasterizerAccelerated::new(1);

        regs.set(id::NUM_VERTICES, 0x4000_0000);
        let info = rasterizer.analyze_vertex_array(&regs, &memory, false, 1);
        assert_eq!(info, VertexArrayInfo::EMPTY);

        // Within the vertex limit but 32 MiB of attribute data
        regs.set(id::NUM_VERTICES, MAX_DRAW_VERTICES);
        loader(&mut regs, 0, 0, 32, 4);
        let info = rasterizer.analyze_vertex_array(&regs, &memory, false, 1);
        assert_eq!(info, VertexArrayInfo::EMPTY);
        assert!(rasterizer.setup_vertex_array(&regs, &memory, &info, 1).is_empty());

        regs.set(id::NUM_VERTICES, 0x1000);
        let info = rasterizer.analyze_vertex_array(&regs, &memory, false, 1);
        assert_eq!(info.vertex_count(), 0x1000);
        assert_eq!(info.vs_input_size, 32 * 0x1000);
    }

    #[test]
    fn test_setup_vertex_array() {
        let mut regs = Regs::new();
        regs.set(id::VERTEX_OFFSET, 1);
        regs.set(id::NUM_VERTICES, 2);
        loader(&mut regs, 0, 0, 3, 1);

        let mut memory = FlatMemory::new(0, 0x10);
        memory.write(0, &[0, 0, 0, 1, 2, 3, 4, 5, 6]).unwrap();

        let rasterizer = RasterizerAccelerated::new(1);
        let info = rasterizer.analyze_vertex_array(&regs, &memory, false, 4);
        let data = rasterizer.setup_vertex_array(&regs, &memory, &info, 4);
        assert_eq!(data.len(), info.vs_input_size as usize);
        assert_eq!(data, vec![1, 2, 3, 0, 4, 5, 6, 0]);
    }

    #[test]
    fn test_sync_draw_uniforms() {
        let mut state = PicaState::new();
        state.vs.uniforms_dirty = false;
        let mut rasterizer = RasterizerAccelerated::new(2);
        rasterizer.dirty = UniformBlockDirty::empty();

        // Scaled by 2; the bottom-right corner is inclusive on the guest
        state.regs.set(id::SCISSOR_TEST_TOP_LEFT, 10 | (20 << 16));
        state.regs.set(id::SCISSOR_TEST_BOTTOM_RIGHT, 99 | (199 << 16));
        state.dirty_regs.set(id::SCISSOR_TEST_BOTTOM_RIGHT);
        state.regs.set(id::BLEND_COLOR, 0xFF00_00FF);
        state.dirty_regs.set(id::BLEND_COLOR);
        state.regs.set(id::LIGHT0 + 3 * id::LIGHT_STRIDE, 255 << 20);
        state.dirty_regs.set(id::LIGHT0 + 3 * id::LIGHT_STRIDE);
        // Written but not marked dirty: must be ignored
        state.regs.set(id::ALPHA_TEST, 0x80 << 8);

        rasterizer.sync_draw_uniforms(&mut state);
        let fs = &rasterizer.uniform_blocks().fs;
        assert_eq!((fs.scissor_x1, fs.scissor_y1), (20, 40));
        assert_eq!((fs.scissor_x2, fs.scissor_y2), (200, 400));
        assert_eq!(fs.blend_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(fs.light_src[3].specular_0, [1.0, 0.0, 0.0]);
        assert_eq!(fs.alphatest_ref, 0);
        assert!(!state.dirty_regs.any());
        assert_eq!(rasterizer.dirty(), UniformBlockDirty::FS);

        rasterizer.sync_entire_state(&state);
        assert_eq!(rasterizer.uniform_blocks().fs.alphatest_ref, 0x80);
    }

    #[test]
    fn test_sync_vs_uniforms_and_luts() {
        let mut state = PicaState::new();
        let mut rasterizer = RasterizerAccelerated::new(1);
        rasterizer.dirty = UniformBlockDirty::empty();

        state.vs.write_uniform_bool_reg(1);
        let regs = &mut state.regs;
        state.luts.write_fog(regs, 0x1234);

        rasterizer.sync_draw_uniforms(&mut state);
        assert!(!state.vs.uniforms_dirty);
        assert_eq!(rasterizer.uniform_blocks().vs_pica.bools[0], [1, 0, 0, 0]);
        assert_eq!(
            rasterizer.dirty(),
            UniformBlockDirty::VS_PICA | UniformBlockDirty::FOG_LUT
        );

        let mut backend = NullBackend::new();
        rasterizer.upload_dirty(&mut backend, &state.luts);
        assert_eq!(backend.uniform_uploads, 1);
        assert_eq!(backend.lut_uploads, 1);
        assert!(rasterizer.dirty().is_empty());
    }

    #[test]
    fn test_flush_triangles() {
        let mut rasterizer = RasterizerAccelerated::new(1);
        let mut backend = NullBackend::new();
        assert_eq!(rasterizer.flush_triangles(&mut backend), 0);

        let v = OutputVertex::default();
        rasterizer.add_triangle(&v, &v, &v);
        rasterizer.add_triangle(&v, &v, &v);
        assert_eq!(rasterizer.flush_triangles(&mut backend), 2);
        assert!(rasterizer.vertex_batch().is_empty());
        assert_eq!(backend.vertices, 6);
    }
}
