//! Uniform blocks uploaded to the host shaders
//!
//! Layouts follow std140: vec3/vec4 members start on 16-byte boundaries and
//! array elements are padded to 16 bytes. Padding is explicit so the blocks
//! can be uploaded as plain bytes.

use bytemuck::{Pod, Zeroable};
use op_shader::setup::{NUM_BOOL_UNIFORMS, NUM_FLOAT_UNIFORMS, NUM_INT_UNIFORMS};
use op_shader::{ShaderRegs, ShaderSetup};

/// PICA shader uniforms in host layout, consumed by hardware vertex shaders
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct VSPicaUniformData {
    /// One bool per 16-byte slot
    pub bools: [[u32; 4]; NUM_BOOL_UNIFORMS],
    pub i: [[u32; 4]; NUM_INT_UNIFORMS],
    pub f: [[f32; 4]; NUM_FLOAT_UNIFORMS],
}

impl Default for VSPicaUniformData {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl VSPicaUniformData {
    /// Flatten the uniform banks of a shader unit.
    ///
    /// Integer uniforms come from the unit registers, which mirror what was
    /// last written to the setup.
    pub fn set_from_regs(&mut self, regs: &ShaderRegs<'_>, setup: &ShaderSetup) {
        for (dst, &b) in self.bools.iter_mut().zip(&setup.uniforms.b) {
            *dst = [b as u32, 0, 0, 0];
        }
        for (n, dst) in self.i.iter_mut().enumerate() {
            *dst = regs.int_uniform(n).map(u32::from);
        }
        for (dst, src) in self.f.iter_mut().zip(&setup.uniforms.f) {
            *dst = src.map(|c| c.to_f32());
        }
    }
}

/// Fixed-function vertex uniforms
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct VSUniformData {
    pub enable_clip1: u32,
    pub _pad0: [u32; 3],
    pub clip_coef: [f32; 4],
}

/// One light source in the fragment uniform block
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct LightSrc {
    pub specular_0: [f32; 3],
    pub _pad0: u32,
    pub specular_1: [f32; 3],
    pub _pad1: u32,
    pub diffuse: [f32; 3],
    pub _pad2: u32,
    pub ambient: [f32; 3],
    pub _pad3: u32,
    pub position: [f32; 3],
    pub _pad4: u32,
    pub spot_direction: [f32; 3],
    pub dist_atten_bias: f32,
    pub dist_atten_scale: f32,
    pub _pad5: [u32; 3],
}

/// Fragment uniforms derived from fixed-function registers
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct FSUniformData {
    pub framebuffer_scale: i32,
    pub alphatest_ref: i32,
    pub depth_scale: f32,
    pub depth_offset: f32,
    pub shadow_bias_constant: f32,
    pub shadow_bias_linear: f32,
    pub scissor_x1: i32,
    pub scissor_y1: i32,
    pub scissor_x2: i32,
    pub scissor_y2: i32,
    pub proctex_lut_offset: i32,
    pub proctex_bias: f32,
    pub shadow_texture_bias: i32,
    pub _pad0: [u32; 3],
    pub fog_color: [f32; 3],
    pub _pad1: u32,
    pub proctex_noise_f: [f32; 2],
    pub proctex_noise_a: [f32; 2],
    pub proctex_noise_p: [f32; 2],
    pub _pad2: [u32; 2],
    pub lighting_global_ambient: [f32; 3],
    pub _pad3: u32,
    pub light_src: [LightSrc; 8],
    pub const_color: [[f32; 4]; 6],
    pub tev_combiner_buffer_color: [f32; 4],
    pub tex_lod_bias: [f32; 3],
    pub _pad4: u32,
    pub tex_border_color: [[f32; 4]; 3],
    pub blend_color: [f32; 4],
}

impl Default for FSUniformData {
    fn default() -> Self {
        Self {
            framebuffer_scale: 1,
            ..Self::zeroed()
        }
    }
}

/// All uniform blocks staged for the backend
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UniformBlocks {
    pub vs_pica: VSPicaUniformData,
    pub vs: VSUniformData,
    pub fs: FSUniformData,
}

#[cfg(test)]
mod tests {
    use super::*;
    use op_core::Float24;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_block_sizes() {
        assert_eq!(size_of::<VSPicaUniformData>(), 16 * 16 + 4 * 16 + 96 * 16);
        assert_eq!(size_of::<VSUniformData>(), 32);
        assert_eq!(size_of::<LightSrc>(), 112);
        assert_eq!(size_of::<FSUniformData>(), 1216);
        assert_eq!(size_of::<FSUniformData>() % 16, 0);
    }

    #[test]
    fn test_std140_offsets() {
        assert_eq!(offset_of!(LightSrc, spot_direction), 80);
        assert_eq!(offset_of!(LightSrc, dist_atten_bias), 92);
        assert_eq!(offset_of!(FSUniformData, fog_color), 64);
        assert_eq!(offset_of!(FSUniformData, proctex_noise_f), 80);
        assert_eq!(offset_of!(FSUniformData, lighting_global_ambient), 112);
        assert_eq!(offset_of!(FSUniformData, light_src), 128);
        assert_eq!(offset_of!(FSUniformData, const_color), 1024);
        assert_eq!(offset_of!(FSUniformData, tex_lod_bias), 1136);
        assert_eq!(offset_of!(FSUniformData, blend_color), 1200);
        assert_eq!(offset_of!(VSPicaUniformData, f), 320);
    }

    #[test]
    fn test_set_from_regs() {
        let mut setup = ShaderSetup::new();
        setup.write_uniform_bool_reg(0b101);
        setup.uniforms.f[95] = [Float24::from_f32(1.5), Float24::ZERO, Float24::ONE, Float24::from_f32(-2.0)];

        let mut raw = [0u32; op_shader::regs::SHADER_REG_COUNT];
        raw[op_shader::regs::offset::INT_UNIFORMS + 2] = u32::from_le_bytes([1, 2, 3, 255]);
        let regs = ShaderRegs::new(&raw);

        let mut data = VSPicaUniformData::default();
        data.set_from_regs(&regs, &setup);
        assert_eq!(data.bools[0], [1, 0, 0, 0]);
        assert_eq!(data.bools[1], [0, 0, 0, 0]);
        assert_eq!(data.bools[2], [1, 0, 0, 0]);
        assert_eq!(data.i[2], [1, 2, 3, 255]);
        assert_eq!(data.f[95], [1.5, 0.0, 1.0, -2.0]);

        let bytes: &[u8] = bytemuck::bytes_of(&data);
        assert_eq!(bytes.len(), size_of::<VSPicaUniformData>());
    }
}
