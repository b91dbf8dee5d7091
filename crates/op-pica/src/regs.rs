//! PICA register file
//!
//! 0x300 32-bit registers addressed by the ids in [`id`]. The ids are the
//! hardware register map and must not be renumbered. Accessors decode the
//! fields the rest of the GPU core needs; everything else is reachable
//! through [`Regs::get`].

use op_core::{Float16, Float20, Float24};
use op_shader::regs::{offset, SHADER_REG_COUNT};
use op_shader::ShaderRegs;

/// Number of registers in the register file
pub const NUM_REGS: usize = 0x300;

/// Register ids
pub mod id {
    pub const FINALIZE: u32 = 0x010;

    // Rasterizer
    pub const CULL_MODE: u32 = 0x040;
    pub const VIEWPORT_SIZE_X: u32 = 0x041;
    pub const VIEWPORT_SIZE_Y: u32 = 0x043;
    pub const CLIP_ENABLE: u32 = 0x047;
    pub const CLIP_COEF_X: u32 = 0x048;
    pub const CLIP_COEF_Y: u32 = 0x049;
    pub const CLIP_COEF_Z: u32 = 0x04A;
    pub const CLIP_COEF_W: u32 = 0x04B;
    pub const VIEWPORT_DEPTH_RANGE: u32 = 0x04D;
    pub const VIEWPORT_DEPTH_NEAR_PLANE: u32 = 0x04E;
    pub const VS_OUTPUT_TOTAL: u32 = 0x04F;
    pub const VS_OUTPUT_ATTRIBUTES: u32 = 0x050;
    pub const VS_OUTPUT_ATTRIBUTES_COUNT: u32 = 7;
    pub const SCISSOR_TEST_MODE: u32 = 0x065;
    pub const SCISSOR_TEST_TOP_LEFT: u32 = 0x066;
    pub const SCISSOR_TEST_BOTTOM_RIGHT: u32 = 0x067;
    pub const VIEWPORT_CORNER: u32 = 0x068;
    pub const DEPTHMAP_ENABLE: u32 = 0x06D;

    // Texturing
    pub const TEXTURING_MAIN_CONFIG: u32 = 0x080;
    pub const TEXTURE0_BORDER_COLOR: u32 = 0x081;
    pub const TEXTURE0_LOD: u32 = 0x084;
    pub const TEXTURE_SHADOW: u32 = 0x08B;
    pub const TEXTURE1_BORDER_COLOR: u32 = 0x091;
    pub const TEXTURE1_LOD: u32 = 0x094;
    pub const TEXTURE2_BORDER_COLOR: u32 = 0x099;
    pub const TEXTURE2_LOD: u32 = 0x09C;
    pub const PROCTEX_CONFIG: u32 = 0x0A8;
    pub const PROCTEX_NOISE_U: u32 = 0x0A9;
    pub const PROCTEX_NOISE_V: u32 = 0x0AA;
    pub const PROCTEX_NOISE_FREQUENCY: u32 = 0x0AB;
    pub const PROCTEX_LUT: u32 = 0x0AC;
    pub const PROCTEX_LUT_OFFSET: u32 = 0x0AD;
    pub const PROCTEX_LUT_CONFIG: u32 = 0x0AF;
    pub const PROCTEX_LUT_DATA: u32 = 0x0B0;
    pub const PROCTEX_LUT_DATA_END: u32 = 0x0B7;

    // Texture environment
    pub const TEV_STAGE0: u32 = 0x0C0;
    pub const TEV_STAGE1: u32 = 0x0C8;
    pub const TEV_STAGE2: u32 = 0x0D0;
    pub const TEV_STAGE3: u32 = 0x0D8;
    pub const TEV_STAGE4: u32 = 0x0F0;
    pub const TEV_STAGE5: u32 = 0x0F8;
    /// Offset of the constant color inside a TEV stage
    pub const TEV_CONST_COLOR: u32 = 3;
    pub const TEXENV_UPDATE_BUFFER: u32 = 0x0E0;
    pub const FOG_COLOR: u32 = 0x0E1;
    pub const FOG_LUT_OFFSET: u32 = 0x0E6;
    pub const FOG_LUT_DATA: u32 = 0x0E8;
    pub const FOG_LUT_DATA_END: u32 = 0x0EF;
    pub const TEV_COMBINER_BUFFER_COLOR: u32 = 0x0FD;

    // Framebuffer
    pub const COLOR_OPERATION: u32 = 0x100;
    pub const BLEND_FUNC: u32 = 0x101;
    pub const LOGIC_OP: u32 = 0x102;
    pub const BLEND_COLOR: u32 = 0x103;
    pub const ALPHA_TEST: u32 = 0x104;
    pub const STENCIL_TEST: u32 = 0x105;
    pub const DEPTH_COLOR_MASK: u32 = 0x106;
    pub const SHADOW: u32 = 0x130;

    // Lighting
    pub const LIGHT0: u32 = 0x140;
    pub const LIGHT_STRIDE: u32 = 0x10;
    pub const LIGHT_SPECULAR0: u32 = 0x0;
    pub const LIGHT_SPECULAR1: u32 = 0x1;
    pub const LIGHT_DIFFUSE: u32 = 0x2;
    pub const LIGHT_AMBIENT: u32 = 0x3;
    pub const LIGHT_POSITION_XY: u32 = 0x4;
    pub const LIGHT_POSITION_Z: u32 = 0x5;
    pub const LIGHT_SPOT_XY: u32 = 0x6;
    pub const LIGHT_SPOT_Z: u32 = 0x7;
    pub const LIGHT_CONFIG: u32 = 0x9;
    pub const LIGHT_DIST_ATTEN_BIAS: u32 = 0xA;
    pub const LIGHT_DIST_ATTEN_SCALE: u32 = 0xB;
    pub const LIGHTING_GLOBAL_AMBIENT: u32 = 0x1C0;
    pub const LIGHTING_NUM_LIGHTS: u32 = 0x1C2;
    pub const LIGHTING_CONFIG0: u32 = 0x1C3;
    pub const LIGHTING_CONFIG1: u32 = 0x1C4;
    pub const LIGHTING_LUT_CONFIG: u32 = 0x1C5;
    pub const LIGHTING_LUT_DATA: u32 = 0x1C8;
    pub const LIGHTING_LUT_DATA_END: u32 = 0x1CF;
    pub const LIGHTING_LUT_INPUT_ABS: u32 = 0x1D0;
    pub const LIGHTING_LUT_INPUT_SELECT: u32 = 0x1D1;
    pub const LIGHTING_LUT_SCALE: u32 = 0x1D2;
    pub const LIGHTING_LIGHT_PERMUTATION: u32 = 0x1D9;

    // Geometry pipeline
    pub const VERTEX_ATTRIB_BASE: u32 = 0x200;
    pub const VERTEX_ATTRIB_FORMAT_LOW: u32 = 0x201;
    pub const VERTEX_ATTRIB_FORMAT_HIGH: u32 = 0x202;
    pub const ATTRIBUTE_LOADER0: u32 = 0x203;
    pub const ATTRIBUTE_LOADER_STRIDE: u32 = 3;
    pub const NUM_ATTRIBUTE_LOADERS: u32 = 12;
    pub const INDEX_ARRAY: u32 = 0x227;
    pub const NUM_VERTICES: u32 = 0x228;
    pub const PIPELINE_CONFIG: u32 = 0x229;
    pub const VERTEX_OFFSET: u32 = 0x22A;
    pub const TRIGGER_DRAW: u32 = 0x22E;
    pub const TRIGGER_DRAW_INDEXED: u32 = 0x22F;
    pub const DEFAULT_ATTRIB_INDEX: u32 = 0x232;
    pub const DEFAULT_ATTRIB_DATA: u32 = 0x233;
    pub const DEFAULT_ATTRIB_DATA_END: u32 = 0x235;
    pub const TRIANGLE_TOPOLOGY: u32 = 0x25E;
    pub const RESTART_PRIMITIVE: u32 = 0x25F;

    // Shader units
    pub const GS_BASE: u32 = 0x280;
    pub const VS_BASE: u32 = 0x2B0;
}

/// Expand the 4-bit byte-enable mask of a register write into a bit mask
pub const fn expand_byte_mask(mask: u32) -> u32 {
    let mut out = 0;
    let mut byte = 0;
    while byte < 4 {
        if mask & (1 << byte) != 0 {
            out |= 0xFF << (byte * 8);
        }
        byte += 1;
    }
    out
}

/// Registers that act as write ports rather than state.
///
/// Writing the same value twice still has an effect, so they are marked
/// dirty on every write.
pub fn is_data_port(reg: u32) -> bool {
    let in_shader_ports = |base: u32| {
        let rel = reg.wrapping_sub(base) as usize;
        (offset::UNIFORM_DATA..=offset::UNIFORM_DATA_END).contains(&rel)
            || (offset::PROGRAM_DATA..=offset::PROGRAM_DATA_END).contains(&rel)
            || (offset::SWIZZLE_DATA..=offset::SWIZZLE_DATA_END).contains(&rel)
    };

    matches!(
        reg,
        id::PROCTEX_LUT_DATA..=id::PROCTEX_LUT_DATA_END
            | id::FOG_LUT_DATA..=id::FOG_LUT_DATA_END
            | id::LIGHTING_LUT_DATA..=id::LIGHTING_LUT_DATA_END
            | id::DEFAULT_ATTRIB_DATA..=id::DEFAULT_ATTRIB_DATA_END
            | id::TRIGGER_DRAW
            | id::TRIGGER_DRAW_INDEXED
    ) || in_shader_ports(id::VS_BASE)
        || in_shader_ports(id::GS_BASE)
}

/// Primitive topology of the vertex stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriangleTopology {
    #[default]
    List,
    Strip,
    Fan,
    /// Triangles produced by the geometry shader
    Shader,
}

impl TriangleTopology {
    pub fn from_raw(raw: u32) -> Self {
        match raw & 3 {
            0 => Self::List,
            1 => Self::Strip,
            2 => Self::Fan,
            _ => Self::Shader,
        }
    }
}

/// Scissor rectangle in framebuffer pixels (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Scissor {
    pub mode: u32,
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

/// Index buffer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexArray {
    /// Offset from the attribute base address
    pub offset: u32,
    pub u16_indices: bool,
}

/// The GPU register file
#[derive(Clone)]
pub struct Regs {
    raw: Box<[u32; NUM_REGS]>,
}

impl Default for Regs {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Regs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nonzero = self.raw.iter().filter(|&&v| v != 0).count();
        f.debug_struct("Regs").field("nonzero", &nonzero).finish()
    }
}

impl Regs {
    pub fn new() -> Self {
        Self {
            raw: Box::new([0; NUM_REGS]),
        }
    }

    /// Raw register value; ids outside the file read as zero
    #[inline]
    pub fn get(&self, reg: u32) -> u32 {
        self.raw.get(reg as usize).copied().unwrap_or(0)
    }

    /// Overwrite a register. Returns the previous value.
    pub fn set(&mut self, reg: u32, value: u32) -> Option<u32> {
        let slot = self.raw.get_mut(reg as usize)?;
        Some(std::mem::replace(slot, value))
    }

    /// Merge `value` into a register under a 4-bit byte-enable mask.
    ///
    /// Returns `(old, new)` or `None` for ids outside the register file.
    pub fn write_masked(&mut self, reg: u32, value: u32, mask: u32) -> Option<(u32, u32)> {
        let slot = self.raw.get_mut(reg as usize)?;
        let bits = expand_byte_mask(mask);
        let old = *slot;
        *slot = (old & !bits) | (value & bits);
        Some((old, *slot))
    }

    pub fn raw(&self) -> &[u32; NUM_REGS] {
        &self.raw
    }

    fn shader_block(&self, base: u32) -> &[u32; SHADER_REG_COUNT] {
        let Some(block) = self.raw[base as usize..].first_chunk::<SHADER_REG_COUNT>() else {
            unreachable!("shader block 0x{base:03x} outside the register file");
        };
        block
    }

    /// Vertex shader unit registers
    pub fn vs(&self) -> ShaderRegs<'_> {
        ShaderRegs::new(self.shader_block(id::VS_BASE))
    }

    /// Geometry shader unit registers
    pub fn gs(&self) -> ShaderRegs<'_> {
        ShaderRegs::new(self.shader_block(id::GS_BASE))
    }

    // Rasterizer

    pub fn clip_enable(&self) -> bool {
        self.get(id::CLIP_ENABLE) & 1 != 0
    }

    pub fn clip_coef(&self) -> [Float24; 4] {
        [
            Float24::from_raw(self.get(id::CLIP_COEF_X)),
            Float24::from_raw(self.get(id::CLIP_COEF_Y)),
            Float24::from_raw(self.get(id::CLIP_COEF_Z)),
            Float24::from_raw(self.get(id::CLIP_COEF_W)),
        ]
    }

    pub fn viewport_depth_range(&self) -> Float24 {
        Float24::from_raw(self.get(id::VIEWPORT_DEPTH_RANGE))
    }

    pub fn viewport_depth_near_plane(&self) -> Float24 {
        Float24::from_raw(self.get(id::VIEWPORT_DEPTH_NEAR_PLANE))
    }

    /// Number of shader output registers mapped to vertex semantics
    pub fn vs_output_total(&self) -> usize {
        (self.get(id::VS_OUTPUT_TOTAL) & 7) as usize
    }

    /// Semantic slots of each component of output register `index`
    pub fn vs_output_map(&self, index: usize) -> [u32; 4] {
        let raw = self.get(id::VS_OUTPUT_ATTRIBUTES + index as u32);
        [raw & 0x1F, (raw >> 8) & 0x1F, (raw >> 16) & 0x1F, (raw >> 24) & 0x1F]
    }

    pub fn scissor(&self) -> Scissor {
        let top_left = self.get(id::SCISSOR_TEST_TOP_LEFT);
        let bottom_right = self.get(id::SCISSOR_TEST_BOTTOM_RIGHT);
        Scissor {
            mode: self.get(id::SCISSOR_TEST_MODE) & 3,
            x1: top_left & 0x3FF,
            y1: (top_left >> 16) & 0x3FF,
            x2: bottom_right & 0x3FF,
            y2: (bottom_right >> 16) & 0x3FF,
        }
    }

    // Texturing

    /// Border color of texture unit `unit` (0..3)
    pub fn texture_border_color(&self, unit: usize) -> u32 {
        const IDS: [u32; 3] = [
            id::TEXTURE0_BORDER_COLOR,
            id::TEXTURE1_BORDER_COLOR,
            id::TEXTURE2_BORDER_COLOR,
        ];
        self.get(IDS[unit])
    }

    /// LOD bias of texture unit `unit` in levels (signed 1.4.8 fixed point)
    pub fn texture_lod_bias(&self, unit: usize) -> f32 {
        const IDS: [u32; 3] = [id::TEXTURE0_LOD, id::TEXTURE1_LOD, id::TEXTURE2_LOD];
        sign_extend(self.get(IDS[unit]) & 0x1FFF, 13) as f32 / 256.0
    }

    /// Shadow texture depth bias, bits 1..24 of the shadow texture register
    pub fn shadow_texture_bias(&self) -> u32 {
        self.get(id::TEXTURE_SHADOW) & 0x00FF_FFFE
    }

    /// Procedural texture noise amplitudes (u, v), signed and scaled by 1/4095
    pub fn proctex_noise_amplitude(&self) -> [f32; 2] {
        let amp = |raw: u32| sign_extend(raw & 0xFFFF, 16) as f32 / 4095.0;
        [amp(self.get(id::PROCTEX_NOISE_U)), amp(self.get(id::PROCTEX_NOISE_V))]
    }

    pub fn proctex_noise_phase(&self) -> [Float16; 2] {
        [
            Float16::from_raw(self.get(id::PROCTEX_NOISE_U) >> 16),
            Float16::from_raw(self.get(id::PROCTEX_NOISE_V) >> 16),
        ]
    }

    pub fn proctex_noise_frequency(&self) -> [Float16; 2] {
        let raw = self.get(id::PROCTEX_NOISE_FREQUENCY);
        [Float16::from_raw(raw & 0xFFFF), Float16::from_raw(raw >> 16)]
    }

    /// LUT bias, split between the config register (low byte) and the LUT
    /// register (high byte)
    pub fn proctex_bias(&self) -> Float16 {
        let low = (self.get(id::PROCTEX_CONFIG) >> 20) & 0xFF;
        let high = (self.get(id::PROCTEX_LUT) >> 19) & 0xFF;
        Float16::from_raw(low | (high << 8))
    }

    pub fn proctex_lut_offset(&self) -> u32 {
        self.get(id::PROCTEX_LUT_OFFSET) & 0xFF
    }

    // Texture environment

    /// Constant color of TEV stage `stage` (0..6)
    pub fn tev_const_color(&self, stage: usize) -> u32 {
        self.get(TEV_STAGES[stage] + id::TEV_CONST_COLOR)
    }

    pub fn tev_combiner_buffer_color(&self) -> u32 {
        self.get(id::TEV_COMBINER_BUFFER_COLOR)
    }

    pub fn fog_color(&self) -> u32 {
        self.get(id::FOG_COLOR)
    }

    // Framebuffer

    pub fn blend_color(&self) -> u32 {
        self.get(id::BLEND_COLOR)
    }

    pub fn alpha_test_ref(&self) -> u32 {
        (self.get(id::ALPHA_TEST) >> 8) & 0xFF
    }

    /// Shadow constant and linear biases
    pub fn shadow_bias(&self) -> (Float16, Float16) {
        let raw = self.get(id::SHADOW);
        (Float16::from_raw(raw & 0xFFFF), Float16::from_raw(raw >> 16))
    }

    // Lighting

    /// Raw register `field` of light `light`
    pub fn light(&self, light: usize, field: u32) -> u32 {
        self.get(id::LIGHT0 + light as u32 * id::LIGHT_STRIDE + field)
    }

    pub fn light_position(&self, light: usize) -> [Float16; 3] {
        let xy = self.light(light, id::LIGHT_POSITION_XY);
        let z = self.light(light, id::LIGHT_POSITION_Z);
        [
            Float16::from_raw(xy & 0xFFFF),
            Float16::from_raw(xy >> 16),
            Float16::from_raw(z & 0xFFFF),
        ]
    }

    /// Spot direction as signed 1.1.11 fixed point
    pub fn light_spot_direction(&self, light: usize) -> [f32; 3] {
        let xy = self.light(light, id::LIGHT_SPOT_XY);
        let z = self.light(light, id::LIGHT_SPOT_Z);
        let fixed = |raw: u32| sign_extend(raw & 0x1FFF, 13) as f32 / 2047.0;
        [fixed(xy), fixed(xy >> 16), fixed(z)]
    }

    pub fn light_dist_atten(&self, light: usize) -> (Float20, Float20) {
        (
            Float20::from_raw(self.light(light, id::LIGHT_DIST_ATTEN_BIAS) & 0xF_FFFF),
            Float20::from_raw(self.light(light, id::LIGHT_DIST_ATTEN_SCALE) & 0xF_FFFF),
        )
    }

    // Geometry pipeline

    /// Physical base address of the vertex attribute arrays
    pub fn vertex_attrib_base(&self) -> u32 {
        (self.get(id::VERTEX_ATTRIB_BASE) & 0x1FFF_FFFE) << 3
    }

    pub fn index_array(&self) -> IndexArray {
        let raw = self.get(id::INDEX_ARRAY);
        IndexArray {
            offset: raw & 0x7FFF_FFFF,
            u16_indices: raw >> 31 != 0,
        }
    }

    pub fn num_vertices(&self) -> u32 {
        self.get(id::NUM_VERTICES)
    }

    pub fn vertex_offset(&self) -> u32 {
        self.get(id::VERTEX_OFFSET)
    }

    /// Whether draws run through the geometry shader
    pub fn use_gs(&self) -> bool {
        self.get(id::PIPELINE_CONFIG) & 3 == 2
    }

    pub fn triangle_topology(&self) -> TriangleTopology {
        TriangleTopology::from_raw(self.get(id::TRIANGLE_TOPOLOGY) >> 8)
    }

    /// Target of the default attribute data port
    pub fn default_attrib_index(&self) -> u32 {
        self.get(id::DEFAULT_ATTRIB_INDEX) & 0xF
    }
}

/// Register ids of the six TEV stages
pub const TEV_STAGES: [u32; 6] = [
    id::TEV_STAGE0,
    id::TEV_STAGE1,
    id::TEV_STAGE2,
    id::TEV_STAGE3,
    id::TEV_STAGE4,
    id::TEV_STAGE5,
];

fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// RGBA8 register as normalized floats
pub fn rgba8(raw: u32) -> [f32; 4] {
    raw.to_le_bytes().map(|c| c as f32 / 255.0)
}

/// Light color register (three 10-bit fields holding 8-bit values)
pub fn light_color(raw: u32) -> [f32; 3] {
    let channel = |shift: u32| ((raw >> shift) & 0xFF) as f32 / 255.0;
    [channel(20), channel(10), channel(0)]
}
