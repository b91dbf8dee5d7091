//! Shader setup: uniform banks, program code and swizzle data
//!
//! One [`ShaderSetup`] exists per shader unit. Guest register writes stream
//! into it; the shader engines read from it. Program and swizzle memories are
//! content-hashed so compiled shaders can be cached, and the hash of the
//! program also drives the fixup table lookup.

use std::fmt;
use std::sync::Arc;

use op_core::Float24;
use xxhash_rust::xxh3::xxh3_64;

use crate::bytecode::{MAX_PROGRAM_CODE_LENGTH, MAX_SWIZZLE_DATA_LENGTH};
use crate::fixup::{ProgramFixupTable, END_INSTRUCTION, NO_FIXUPS};
use crate::regs::UniformSetup;

/// Number of float uniforms
pub const NUM_FLOAT_UNIFORMS: usize = 96;
/// Number of boolean uniforms
pub const NUM_BOOL_UNIFORMS: usize = 16;
/// Number of integer uniforms
pub const NUM_INT_UNIFORMS: usize = 4;

/// Uniform banks, laid out for direct access from generated code
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Uniforms {
    pub f: [[Float24; 4]; NUM_FLOAT_UNIFORMS],
    pub b: [bool; NUM_BOOL_UNIFORMS],
    pub i: [[u8; 4]; NUM_INT_UNIFORMS],
}

impl Default for Uniforms {
    fn default() -> Self {
        Self {
            f: [[Float24::ZERO; 4]; NUM_FLOAT_UNIFORMS],
            b: [false; NUM_BOOL_UNIFORMS],
            i: [[0; 4]; NUM_INT_UNIFORMS],
        }
    }
}

/// Accumulates float uniform data words until a vector is complete
#[derive(Debug, Clone, Default)]
struct UniformQueue {
    words: [u32; 4],
    len: usize,
}

impl UniformQueue {
    /// Push a word; returns true once `capacity` words are buffered
    fn enqueue(&mut self, value: u32, capacity: usize) -> bool {
        self.words[self.len] = value;
        self.len += 1;
        if self.len >= capacity {
            self.len = 0;
            true
        } else {
            false
        }
    }
}

/// Uniform store and program memory of one shader unit
pub struct ShaderSetup {
    pub uniforms: Uniforms,
    /// Set when any uniform value changed since the last upload
    pub uniforms_dirty: bool,

    program_code: Box<[u32; MAX_PROGRAM_CODE_LENGTH]>,
    swizzle_data: Box<[u32; MAX_SWIZZLE_DATA_LENGTH]>,
    program_code_fixup: Box<[u32; MAX_PROGRAM_CODE_LENGTH]>,

    biggest_program_size: usize,
    biggest_swizzle_size: usize,

    program_code_hash: u64,
    program_code_hash_dirty: bool,
    swizzle_data_hash: u64,
    swizzle_data_hash_dirty: bool,

    program_code_pending_fixup: bool,
    has_fixup: bool,

    uniform_queue: UniformQueue,
    fixups: Arc<ProgramFixupTable>,
}

impl fmt::Debug for ShaderSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderSetup")
            .field("uniforms_dirty", &self.uniforms_dirty)
            .field("biggest_program_size", &self.biggest_program_size)
            .field("biggest_swizzle_size", &self.biggest_swizzle_size)
            .field("program_code_hash", &self.program_code_hash)
            .field("swizzle_data_hash", &self.swizzle_data_hash)
            .field("has_fixup", &self.has_fixup)
            .finish_non_exhaustive()
    }
}

impl Default for ShaderSetup {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderSetup {
    /// Create a setup that patches no programs
    pub fn new() -> Self {
        Self::with_fixups(Arc::clone(&NO_FIXUPS))
    }

    /// Create a setup with a custom fixup table
    pub fn with_fixups(fixups: Arc<ProgramFixupTable>) -> Self {
        Self {
            uniforms: Uniforms::default(),
            uniforms_dirty: true,
            program_code: Box::new([0; MAX_PROGRAM_CODE_LENGTH]),
            swizzle_data: Box::new([0; MAX_SWIZZLE_DATA_LENGTH]),
            program_code_fixup: Box::new([0; MAX_PROGRAM_CODE_LENGTH]),
            biggest_program_size: 0,
            biggest_swizzle_size: 0,
            program_code_hash: 0,
            program_code_hash_dirty: true,
            swizzle_data_hash: 0,
            swizzle_data_hash_dirty: true,
            program_code_pending_fixup: false,
            has_fixup: false,
            uniform_queue: UniformQueue::default(),
            fixups,
        }
    }

    /// Unpack the 16 boolean uniforms
    pub fn write_uniform_bool_reg(&mut self, value: u32) {
        let old = self.uniforms.b;
        for (i, b) in self.uniforms.b.iter_mut().enumerate() {
            *b = value & (1 << i) != 0;
        }
        self.uniforms_dirty |= old != self.uniforms.b;
    }

    /// Write integer uniform `index` as (x, y, z, w)
    pub fn write_uniform_int_reg(&mut self, index: usize, values: [u8; 4]) {
        assert!(
            index < NUM_INT_UNIFORMS,
            "integer uniform index {} out of range",
            index
        );
        self.uniforms_dirty |= self.uniforms.i[index] != values;
        self.uniforms.i[index] = values;
    }

    /// Stream one float uniform data word.
    ///
    /// Returns the index of the committed uniform once a full vector has been
    /// received (four words in float32 mode, three in float24 mode).
    pub fn write_uniform_float_reg(&mut self, setup: &mut UniformSetup, value: u32) -> Option<usize> {
        let capacity = if setup.float32 { 4 } else { 3 };
        if !self.uniform_queue.enqueue(value, capacity) {
            return None;
        }

        let index = setup.index as usize;
        if index >= NUM_FLOAT_UNIFORMS {
            tracing::error!("Invalid float uniform index {}", index);
            return None;
        }

        let words = self.uniform_queue.words;
        let uniform = if setup.float32 {
            // The first word carries w
            [
                Float24::from_f32(f32::from_bits(words[3])),
                Float24::from_f32(f32::from_bits(words[2])),
                Float24::from_f32(f32::from_bits(words[1])),
                Float24::from_f32(f32::from_bits(words[0])),
            ]
        } else {
            [
                Float24::from_raw(words[2] & 0xFF_FFFF),
                Float24::from_raw(((words[1] & 0xFFFF) << 8) | (words[2] >> 24)),
                Float24::from_raw(((words[0] & 0xFF) << 16) | (words[1] >> 16)),
                Float24::from_raw(words[0] >> 8),
            ]
        };

        let old = self.uniforms.f[index];
        if old.iter().zip(&uniform).any(|(a, b)| a.to_f32().to_bits() != b.to_f32().to_bits()) {
            self.uniforms_dirty = true;
        }
        self.uniforms.f[index] = uniform;

        tracing::trace!(
            "Set float uniform c{} to ({} {} {} {})",
            index,
            uniform[0].to_f32(),
            uniform[1].to_f32(),
            uniform[2].to_f32(),
            uniform[3].to_f32()
        );

        setup.index += 1;
        Some(index)
    }

    /// Drop any partially received float uniform vector
    pub fn reset_uniform_queue(&mut self) {
        self.uniform_queue.len = 0;
    }

    /// Write one word of program code
    pub fn update_program_code(&mut self, offset: usize, value: u32) {
        if offset >= MAX_PROGRAM_CODE_LENGTH {
            tracing::error!("Program code offset 0x{:x} out of range", offset);
            return;
        }
        if offset >= self.biggest_program_size {
            self.biggest_program_size = offset + 1;
            self.program_code_hash_dirty = true;
        }
        if self.program_code[offset] == value {
            return;
        }
        self.program_code[offset] = value;
        self.program_code_hash_dirty = true;
        self.program_code_pending_fixup = true;
        self.has_fixup = false;
    }

    /// Write one word of swizzle data
    pub fn update_swizzle_data(&mut self, offset: usize, value: u32) {
        if offset >= MAX_SWIZZLE_DATA_LENGTH {
            tracing::error!("Swizzle data offset 0x{:x} out of range", offset);
            return;
        }
        if offset >= self.biggest_swizzle_size {
            self.biggest_swizzle_size = offset + 1;
            self.swizzle_data_hash_dirty = true;
        }
        if self.swizzle_data[offset] == value {
            return;
        }
        self.swizzle_data[offset] = value;
        self.swizzle_data_hash_dirty = true;
    }

    /// Content hash of the written program code
    pub fn program_code_hash(&mut self) -> u64 {
        if self.program_code_hash_dirty {
            self.program_code_hash =
                xxh3_64(bytemuck::cast_slice(&self.program_code[..self.biggest_program_size]));
            self.program_code_hash_dirty = false;
        }
        self.program_code_hash
    }

    /// Content hash of the written swizzle data
    pub fn swizzle_data_hash(&mut self) -> u64 {
        if self.swizzle_data_hash_dirty {
            self.swizzle_data_hash =
                xxh3_64(bytemuck::cast_slice(&self.swizzle_data[..self.biggest_swizzle_size]));
            self.swizzle_data_hash_dirty = false;
        }
        self.swizzle_data_hash
    }

    /// Apply the fixup table once after program code changed
    pub fn do_program_code_fixup(&mut self) {
        if !self.program_code_pending_fixup {
            return;
        }
        self.program_code_pending_fixup = false;
        self.has_fixup = false;

        let hash = self.program_code_hash();
        let Some(fixup) = self.fixups.lookup(hash).copied() else {
            return;
        };
        if fixup.offset + 1 >= MAX_PROGRAM_CODE_LENGTH {
            tracing::error!("Program fixup offset 0x{:x} out of range", fixup.offset);
            return;
        }

        tracing::info!(
            "Applying program fixup for shader {:016x} at 0x{:03x}",
            hash,
            fixup.offset
        );
        self.program_code_fixup.copy_from_slice(&self.program_code[..]);
        self.program_code_fixup[fixup.offset] = fixup.patch;
        self.program_code_fixup[fixup.offset + 1] = END_INSTRUCTION;

        let size = fixup.offset + 2;
        if size > self.biggest_program_size {
            self.biggest_program_size = size;
            self.program_code_hash_dirty = true;
        }
        self.has_fixup = true;
    }

    /// Program code the engines should execute
    pub fn program_code(&self) -> &[u32; MAX_PROGRAM_CODE_LENGTH] {
        if self.has_fixup {
            &self.program_code_fixup
        } else {
            &self.program_code
        }
    }

    /// Unpatched program code as written by the guest
    pub fn base_program_code(&self) -> &[u32; MAX_PROGRAM_CODE_LENGTH] {
        &self.program_code
    }

    pub fn swizzle_data(&self) -> &[u32; MAX_SWIZZLE_DATA_LENGTH] {
        &self.swizzle_data
    }

    pub fn has_fixup(&self) -> bool {
        self.has_fixup
    }

    pub fn biggest_program_size(&self) -> usize {
        self.biggest_program_size
    }

    pub fn biggest_swizzle_size(&self) -> usize {
        self.biggest_swizzle_size
    }

    /// Load a whole program and swizzle table starting at offset zero
    pub fn load_program(&mut self, code: &[u32], swizzle: &[u32]) {
        for (offset, &word) in code.iter().enumerate() {
            self.update_program_code(offset, word);
        }
        for (offset, &word) in swizzle.iter().enumerate() {
            self.update_swizzle_data(offset, word);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixup::ProgramFixup;
    use proptest::prelude::*;

    fn float24_raw(value: f32) -> u32 {
        // Only exact for values representable with 16 mantissa bits
        let bits = value.to_bits();
        let sign = bits >> 31;
        let exponent = ((bits >> 23) & 0xFF) as i32 - 64;
        let mantissa = (bits >> 7) & 0xFFFF;
        if value == 0.0 {
            sign << 23
        } else {
            (sign << 23) | ((exponent as u32) << 16) | mantissa
        }
    }

    #[test]
    fn test_float32_uniform_round_trip() {
        let mut setup = ShaderSetup::new();
        let mut config = UniformSetup {
            index: 5,
            float32: true,
        };
        let values = [4.0f32, 3.0, 2.0, 1.0];
        assert_eq!(setup.write_uniform_float_reg(&mut config, values[0].to_bits()), None);
        assert_eq!(setup.write_uniform_float_reg(&mut config, values[1].to_bits()), None);
        assert_eq!(setup.write_uniform_float_reg(&mut config, values[2].to_bits()), None);
        assert_eq!(
            setup.write_uniform_float_reg(&mut config, values[3].to_bits()),
            Some(5)
        );
        assert_eq!(config.index, 6);

        let uniform = setup.uniforms.f[5].map(Float24::to_f32);
        assert_eq!(uniform, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_float24_uniform_packing() {
        let mut setup = ShaderSetup::new();
        let mut config = UniformSetup::default();
        let (x, y, z, w) = (
            float24_raw(1.0),
            float24_raw(-2.0),
            float24_raw(0.5),
            float24_raw(8.0),
        );
        let word0 = (w << 8) | (z >> 16);
        let word1 = ((z & 0xFFFF) << 16) | (y >> 8);
        let word2 = ((y & 0xFF) << 24) | x;
        assert_eq!(setup.write_uniform_float_reg(&mut config, word0), None);
        assert_eq!(setup.write_uniform_float_reg(&mut config, word1), None);
        assert_eq!(setup.write_uniform_float_reg(&mut config, word2), Some(0));
        assert_eq!(config.index, 1);

        let uniform = setup.uniforms.f[0].map(Float24::to_f32);
        assert_eq!(uniform, [1.0, -2.0, 0.5, 8.0]);
    }

    #[test]
    fn test_float_uniform_out_of_range() {
        let mut setup = ShaderSetup::new();
        let mut config = UniformSetup {
            index: 96,
            float32: true,
        };
        for _ in 0..4 {
            assert_eq!(setup.write_uniform_float_reg(&mut config, 0), None);
        }
        assert_eq!(config.index, 96);

        // The queue was drained, the next vector starts clean
        config.index = 0;
        for i in 0..4 {
            let result = setup.write_uniform_float_reg(&mut config, 1.0f32.to_bits());
            assert_eq!(result.is_some(), i == 3);
        }
    }

    #[test]
    fn test_bool_uniforms_dirty_only_on_change() {
        let mut setup = ShaderSetup::new();
        setup.uniforms_dirty = false;
        setup.write_uniform_bool_reg(0);
        assert!(!setup.uniforms_dirty);

        setup.write_uniform_bool_reg(0b1000_0000_0000_0101);
        assert!(setup.uniforms_dirty);
        assert!(setup.uniforms.b[0]);
        assert!(!setup.uniforms.b[1]);
        assert!(setup.uniforms.b[2]);
        assert!(setup.uniforms.b[15]);

        setup.uniforms_dirty = false;
        setup.write_uniform_bool_reg(0b1000_0000_0000_0101);
        assert!(!setup.uniforms_dirty);
    }

    #[test]
    fn test_int_uniform() {
        let mut setup = ShaderSetup::new();
        setup.uniforms_dirty = false;
        setup.write_uniform_int_reg(2, [3, 0, 1, 0]);
        assert!(setup.uniforms_dirty);
        assert_eq!(setup.uniforms.i[2], [3, 0, 1, 0]);
    }

    #[test]
    #[should_panic]
    fn test_int_uniform_out_of_range() {
        let mut setup = ShaderSetup::new();
        setup.write_uniform_int_reg(4, [0; 4]);
    }

    #[test]
    fn test_program_hash() {
        let mut setup = ShaderSetup::new();
        setup.load_program(&[0x4c00_0000, 0x8800_0000], &[0xF]);
        let hash = setup.program_code_hash();
        assert_eq!(setup.program_code_hash(), hash);
        assert_eq!(setup.biggest_program_size(), 2);

        // Same value keeps the hash
        setup.update_program_code(1, 0x8800_0000);
        assert_eq!(setup.program_code_hash(), hash);

        setup.update_program_code(0, 0x0000_0000);
        let changed = setup.program_code_hash();
        assert_ne!(changed, hash);

        // Restoring the word restores the hash
        setup.update_program_code(0, 0x4c00_0000);
        assert_eq!(setup.program_code_hash(), hash);
    }

    #[test]
    fn test_hash_ignores_unwritten_words() {
        let mut a = ShaderSetup::new();
        let mut b = ShaderSetup::new();
        a.load_program(&[1, 2, 3], &[]);
        b.load_program(&[1, 2, 3], &[]);
        assert_eq!(a.program_code_hash(), b.program_code_hash());
        assert_eq!(a.swizzle_data_hash(), b.swizzle_data_hash());
    }

    #[test]
    fn test_fixup_applied() {
        let code = [0x4c00_0000, 0x4c20_1000, 0x4c40_2000];
        let mut unpatched = ShaderSetup::with_fixups(Arc::new(ProgramFixupTable::default()));
        unpatched.load_program(&code, &[]);
        let hash = unpatched.program_code_hash();

        let table = ProgramFixupTable::new(vec![ProgramFixup {
            hash,
            offset: 3,
            patch: 0x4c00_0f80,
        }]);
        let mut setup = ShaderSetup::with_fixups(Arc::new(table));
        setup.load_program(&code, &[]);
        setup.do_program_code_fixup();

        assert!(setup.has_fixup());
        assert_eq!(setup.biggest_program_size(), 5);
        assert_eq!(setup.program_code()[3], 0x4c00_0f80);
        assert_eq!(setup.program_code()[4], END_INSTRUCTION);
        assert_eq!(setup.base_program_code()[3], 0);

        // A later program write invalidates the patched copy
        setup.update_program_code(0, 0x0000_0000);
        assert!(!setup.has_fixup());
        assert_eq!(setup.program_code()[3], 0);
    }

    #[test]
    fn test_fixup_not_matched() {
        let mut setup = ShaderSetup::new();
        setup.load_program(&[0x4c00_0000, 0x8800_0000], &[]);
        setup.do_program_code_fixup();
        assert!(!setup.has_fixup());
        assert_eq!(setup.biggest_program_size(), 2);
        assert_eq!(&setup.program_code()[..3], &[0x4c00_0000, 0x8800_0000, 0]);
    }

    #[test]
    fn test_program_offset_out_of_range() {
        let mut setup = ShaderSetup::new();
        setup.update_program_code(MAX_PROGRAM_CODE_LENGTH, 1);
        setup.update_swizzle_data(MAX_SWIZZLE_DATA_LENGTH, 1);
        assert_eq!(setup.biggest_program_size(), 0);
        assert_eq!(setup.biggest_swizzle_size(), 0);
    }

    #[test]
    fn test_debug_omits_program_memory() {
        let mut setup = ShaderSetup::new();
        setup.update_program_code(0, 0x1234_5678);
        let text = format!("{:?}", setup);
        assert!(text.starts_with("ShaderSetup {"));
        assert!(text.contains("biggest_program_size: 1"));
        assert!(text.ends_with(".. }"));
        assert!(text.len() < 256);
    }

    proptest! {
        #[test]
        fn prop_program_hash_tracks_contents(
            code in proptest::collection::vec(any::<u32>(), 1..64),
            index in any::<proptest::sample::Index>(),
            value in any::<u32>(),
        ) {
            let mut setup = ShaderSetup::new();
            setup.load_program(&code, &[]);
            let before = setup.program_code_hash();
            prop_assert_eq!(setup.program_code_hash(), before);

            let offset = index.index(code.len());
            setup.update_program_code(offset, value);
            let after = setup.program_code_hash();
            if value == code[offset] {
                prop_assert_eq!(after, before);
            } else {
                prop_assert_ne!(after, before);
            }
        }
    }
}
