//! Shader unit register block
//!
//! The vertex and geometry shader units each own a block of 0x30 registers
//! (VS at 0x2B0, GS at 0x280). The layout is identical for both, so the
//! register file hands out a [`ShaderRegs`] view over either block.

/// Number of registers in a shader unit block
pub const SHADER_REG_COUNT: usize = 0x30;

/// Register offsets inside a shader block
pub mod offset {
    pub const BOOL_UNIFORMS: usize = 0x00;
    pub const INT_UNIFORMS: usize = 0x01;
    pub const INPUT_BUFFER_CONFIG: usize = 0x09;
    pub const MAIN_OFFSET: usize = 0x0A;
    pub const INPUT_REGISTER_MAP_LOW: usize = 0x0B;
    pub const INPUT_REGISTER_MAP_HIGH: usize = 0x0C;
    pub const OUTPUT_MASK: usize = 0x0D;
    pub const UNIFORM_SETUP: usize = 0x10;
    pub const UNIFORM_DATA: usize = 0x11;
    pub const UNIFORM_DATA_END: usize = 0x18;
    pub const PROGRAM_OFFSET: usize = 0x1B;
    pub const PROGRAM_DATA: usize = 0x1C;
    pub const PROGRAM_DATA_END: usize = 0x23;
    pub const SWIZZLE_OFFSET: usize = 0x25;
    pub const SWIZZLE_DATA: usize = 0x26;
    pub const SWIZZLE_DATA_END: usize = 0x2D;
}

/// Decoded `uniform_setup` register
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UniformSetup {
    /// Target float uniform, auto-incremented after each complete vector
    pub index: u32,
    /// Data words are IEEE floats rather than packed float24
    pub float32: bool,
}

impl UniformSetup {
    pub fn from_raw(raw: u32) -> Self {
        Self {
            index: raw & 0xFF,
            float32: raw & (1 << 31) != 0,
        }
    }

    pub fn to_raw(self) -> u32 {
        (self.index & 0xFF) | ((self.float32 as u32) << 31)
    }
}

/// Read-only view of one shader unit register block
#[derive(Debug, Clone, Copy)]
pub struct ShaderRegs<'a> {
    raw: &'a [u32; SHADER_REG_COUNT],
}

impl<'a> ShaderRegs<'a> {
    pub fn new(raw: &'a [u32; SHADER_REG_COUNT]) -> Self {
        Self { raw }
    }

    /// Raw register at `offset` inside the block
    #[inline]
    pub fn get(&self, offset: usize) -> u32 {
        self.raw[offset]
    }

    /// Packed boolean uniforms (16 bits)
    pub fn bool_uniforms(&self) -> u32 {
        self.raw[offset::BOOL_UNIFORMS] & 0xFFFF
    }

    /// Integer uniform `index` as (x, y, z, w)
    pub fn int_uniform(&self, index: usize) -> [u8; 4] {
        self.raw[offset::INT_UNIFORMS + index].to_le_bytes()
    }

    /// Number of vertex attributes fed to the shader
    pub fn num_input_attributes(&self) -> usize {
        (self.raw[offset::INPUT_BUFFER_CONFIG] & 0xF) as usize + 1
    }

    /// Program entry point
    pub fn main_offset(&self) -> u32 {
        self.raw[offset::MAIN_OFFSET] & 0xFFFF
    }

    /// Input register that receives vertex attribute `attribute`
    pub fn register_for_attribute(&self, attribute: usize) -> usize {
        let fields = ((self.raw[offset::INPUT_REGISTER_MAP_HIGH] as u64) << 32)
            | self.raw[offset::INPUT_REGISTER_MAP_LOW] as u64;
        ((fields >> (4 * attribute)) & 0xF) as usize
    }

    /// Output registers written back to the vertex (bit n = o_n)
    pub fn output_mask(&self) -> u32 {
        self.raw[offset::OUTPUT_MASK] & 0xFFFF
    }

    pub fn uniform_setup(&self) -> UniformSetup {
        UniformSetup::from_raw(self.raw[offset::UNIFORM_SETUP])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_setup_round_trip() {
        let setup = UniformSetup::from_raw(0x8000_0012);
        assert_eq!(setup.index, 0x12);
        assert!(setup.float32);
        assert_eq!(setup.to_raw(), 0x8000_0012);
    }

    #[test]
    fn test_register_map() {
        let mut raw = [0u32; SHADER_REG_COUNT];
        raw[offset::INPUT_REGISTER_MAP_LOW] = 0x7654_3210;
        raw[offset::INPUT_REGISTER_MAP_HIGH] = 0x0000_00BA;
        raw[offset::INPUT_BUFFER_CONFIG] = 2;
        let regs = ShaderRegs::new(&raw);
        assert_eq!(regs.register_for_attribute(0), 0);
        assert_eq!(regs.register_for_attribute(7), 7);
        assert_eq!(regs.register_for_attribute(8), 0xA);
        assert_eq!(regs.register_for_attribute(9), 0xB);
        assert_eq!(regs.num_input_attributes(), 3);
    }
}
