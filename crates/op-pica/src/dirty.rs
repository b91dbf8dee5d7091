//! Dirty register tracking
//!
//! One bit per register id. Register writes set bits, the rasterizer tests
//! whole groups of them once per draw and then clears everything.

use crate::regs::{id, NUM_REGS};

/// Number of 64-bit words in the bit set
pub const NUM_WORDS: usize = NUM_REGS / 64;

/// Word holding each register region
pub mod word {
    pub const MISC: usize = 0;
    pub const RASTERIZER: usize = 1;
    pub const TEX_UNITS: usize = 2;
    pub const TEXENV: usize = 3;
    pub const FRAMEBUFFER: usize = 4;
    /// Lights 0-3; lights 4-7 live in the next word
    pub const LIGHTS: usize = 5;
    pub const LIGHT_LUT: usize = 7;
    pub const GEO_PIPELINE: usize = 8;
    pub const SHADER: usize = 10;
}

const fn bit(reg: u32) -> u64 {
    1 << (reg % 64)
}

const fn bits(regs: &[u32]) -> u64 {
    let mut mask = 0;
    let mut i = 0;
    while i < regs.len() {
        mask |= bit(regs[i]);
        i += 1;
    }
    mask
}

const fn bit_range(first: u32, last: u32) -> u64 {
    let mut mask = 0;
    let mut reg = first;
    while reg <= last {
        mask |= bit(reg);
        reg += 1;
    }
    mask
}

const CLIPPING_MASK: u64 = bit_range(id::CLIP_ENABLE, id::CLIP_COEF_W);
const DEPTH_MASK: u64 = bits(&[id::VIEWPORT_DEPTH_RANGE, id::VIEWPORT_DEPTH_NEAR_PLANE]);
const SCISSOR_MASK: u64 = bit_range(id::SCISSOR_TEST_MODE, id::SCISSOR_TEST_BOTTOM_RIGHT);
const BLEND_MASK: u64 = bit(id::BLEND_COLOR);
const ALPHA_TEST_MASK: u64 = bit(id::ALPHA_TEST);
const TEX_UNITS_MASK: u64 = bits(&[
    id::TEXTURE0_BORDER_COLOR,
    id::TEXTURE0_LOD,
    id::TEXTURE_SHADOW,
    id::TEXTURE1_BORDER_COLOR,
    id::TEXTURE1_LOD,
    id::TEXTURE2_BORDER_COLOR,
    id::TEXTURE2_LOD,
]);
const TEX_ENV_MASK: u64 = bits(&[
    id::TEV_STAGE0 + id::TEV_CONST_COLOR,
    id::TEV_STAGE1 + id::TEV_CONST_COLOR,
    id::TEV_STAGE2 + id::TEV_CONST_COLOR,
    id::TEV_STAGE3 + id::TEV_CONST_COLOR,
    id::TEV_STAGE4 + id::TEV_CONST_COLOR,
    id::TEV_STAGE5 + id::TEV_CONST_COLOR,
    id::TEV_COMBINER_BUFFER_COLOR,
]);
const FOG_COLOR_MASK: u64 = bit(id::FOG_COLOR);
const PROCTEX_MASK: u64 = bit_range(id::PROCTEX_CONFIG, id::PROCTEX_LUT_OFFSET);
const SHADOW_MASK: u64 = bit(id::SHADOW);
const SHADOW_TEXTURE_MASK: u64 = bit(id::TEXTURE_SHADOW);
const LIGHTING_AMBIENT_MASK: u64 = bit(id::LIGHTING_GLOBAL_AMBIENT);
const LIGHTING_LUT_MASK: u64 = bit_range(id::LIGHTING_LUT_CONFIG, id::LIGHTING_LUT_SCALE);

/// Registers of one light that feed uniforms: colors, position, spot
/// direction, config and distance attenuation
const LIGHT_MASK: u64 = 0x0EFF;

/// Changed-register bit set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyRegs {
    words: [u64; NUM_WORDS],
}

impl DirtyRegs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark register `reg` as changed
    #[inline]
    pub fn set(&mut self, reg: u32) {
        if reg as usize >= NUM_REGS {
            tracing::error!("Dirty register id 0x{:x} out of range", reg);
            return;
        }
        self.words[reg as usize / 64] |= bit(reg);
    }

    pub fn reset(&mut self) {
        self.words = [0; NUM_WORDS];
    }

    pub fn is_set(&self, reg: u32) -> bool {
        (reg as usize) < NUM_REGS && self.words[reg as usize / 64] & bit(reg) != 0
    }

    pub fn any(&self) -> bool {
        self.words.iter().any(|&w| w != 0)
    }

    pub fn word(&self, index: usize) -> u64 {
        self.words[index]
    }

    #[inline]
    fn check(&self, word: usize, mask: u64) -> bool {
        self.words[word] & mask != 0
    }

    pub fn check_clipping(&self) -> bool {
        self.check(word::RASTERIZER, CLIPPING_MASK)
    }

    pub fn check_depth(&self) -> bool {
        self.check(word::RASTERIZER, DEPTH_MASK)
    }

    pub fn check_scissor(&self) -> bool {
        self.check(word::RASTERIZER, SCISSOR_MASK)
    }

    pub fn check_blend(&self) -> bool {
        self.check(word::FRAMEBUFFER, BLEND_MASK)
    }

    pub fn check_alpha_test(&self) -> bool {
        self.check(word::FRAMEBUFFER, ALPHA_TEST_MASK)
    }

    pub fn check_tex_units(&self) -> bool {
        self.check(word::TEX_UNITS, TEX_UNITS_MASK)
    }

    pub fn check_tex_env(&self) -> bool {
        self.check(word::TEXENV, TEX_ENV_MASK)
    }

    pub fn check_lighting_ambient(&self) -> bool {
        self.check(word::LIGHT_LUT, LIGHTING_AMBIENT_MASK)
    }

    /// Any uniform-relevant register of light `light` (0..8)
    pub fn check_light(&self, light: usize) -> bool {
        debug_assert!(light < 8, "light index {} out of range", light);
        self.check(word::LIGHTS + light / 4, LIGHT_MASK << ((light % 4) * 16))
    }

    pub fn check_lighting_lut(&self) -> bool {
        self.check(word::LIGHT_LUT, LIGHTING_LUT_MASK)
    }

    pub fn check_fog_color(&self) -> bool {
        self.check(word::TEXENV, FOG_COLOR_MASK)
    }

    pub fn check_proctex(&self) -> bool {
        self.check(word::TEX_UNITS, PROCTEX_MASK)
    }

    /// Shadow bias, or the shadow texture register that shares its uniform
    pub fn check_shadow(&self) -> bool {
        self.check(word::FRAMEBUFFER, SHADOW_MASK) || self.check(word::TEX_UNITS, SHADOW_TEXTURE_MASK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    type Predicate = fn(&DirtyRegs) -> bool;

    /// Every predicate with the register ids it covers
    fn predicates() -> Vec<(&'static str, Predicate, Vec<u32>)> {
        let mut out: Vec<(&'static str, Predicate, Vec<u32>)> = vec![
            ("clipping", DirtyRegs::check_clipping as Predicate, (0x47..=0x4B).collect()),
            ("depth", DirtyRegs::check_depth as Predicate, vec![0x4D, 0x4E]),
            ("scissor", DirtyRegs::check_scissor as Predicate, (0x65..=0x67).collect()),
            ("blend", DirtyRegs::check_blend as Predicate, vec![0x103]),
            ("alpha_test", DirtyRegs::check_alpha_test as Predicate, vec![0x104]),
            (
                "tex_units",
                DirtyRegs::check_tex_units as Predicate,
                vec![0x81, 0x84, 0x8B, 0x91, 0x94, 0x99, 0x9C],
            ),
            (
                "tex_env",
                DirtyRegs::check_tex_env as Predicate,
                vec![0xC3, 0xCB, 0xD3, 0xDB, 0xF3, 0xFB, 0xFD],
            ),
            ("lighting_ambient", DirtyRegs::check_lighting_ambient as Predicate, vec![0x1C0]),
            ("lighting_lut", DirtyRegs::check_lighting_lut as Predicate, (0x1C5..=0x1D2).collect()),
            ("fog_color", DirtyRegs::check_fog_color as Predicate, vec![0xE1]),
            ("proctex", DirtyRegs::check_proctex as Predicate, (0xA8..=0xAD).collect()),
            ("shadow", DirtyRegs::check_shadow as Predicate, vec![0x130, 0x8B]),
        ];
        let lights: [Predicate; 8] = [
            |d| d.check_light(0),
            |d| d.check_light(1),
            |d| d.check_light(2),
            |d| d.check_light(3),
            |d| d.check_light(4),
            |d| d.check_light(5),
            |d| d.check_light(6),
            |d| d.check_light(7),
        ];
        for (light, predicate) in lights.into_iter().enumerate() {
            let base = 0x140 + 0x10 * light as u32;
            let regs = (0..8).chain(9..12).map(|field| base + field).collect();
            out.push(("light", predicate, regs));
        }
        out
    }

    #[test]
    fn test_set_and_reset() {
        let mut dirty = DirtyRegs::new();
        assert!(!dirty.any());
        dirty.set(id::BLEND_COLOR);
        dirty.set(id::BLEND_COLOR);
        assert!(dirty.is_set(id::BLEND_COLOR));
        assert!(dirty.check_blend());
        assert!(!dirty.check_alpha_test());
        dirty.reset();
        assert!(!dirty.any());
        assert!(!dirty.check_blend());
    }

    #[test]
    fn test_out_of_range_ignored() {
        let mut dirty = DirtyRegs::new();
        dirty.set(0x300);
        assert!(!dirty.any());
        assert!(!dirty.is_set(0x300));
    }

    #[test]
    fn test_light_partitions() {
        let mut dirty = DirtyRegs::new();
        // Light 5 diffuse
        dirty.set(0x140 + 0x50 + 2);
        assert!(dirty.check_light(5));
        assert!((0..8).filter(|&i| i != 5).all(|i| !dirty.check_light(i)));

        // The unused slot between spot z and config does not count
        dirty.reset();
        dirty.set(0x140 + 0x8);
        assert!(!dirty.check_light(0));
    }

    #[test]
    fn test_predicate_exact_bits() {
        for (name, predicate, regs) in predicates() {
            for reg in regs {
                let mut dirty = DirtyRegs::new();
                dirty.set(reg);
                assert!(predicate(&dirty), "{} misses 0x{:03x}", name, reg);
            }
        }
    }

    proptest! {
        #[test]
        fn prop_predicates_match_coverage(ids in proptest::collection::vec(0u32..0x300, 0..24)) {
            let mut dirty = DirtyRegs::new();
            for &reg in &ids {
                dirty.set(reg);
            }
            for (name, predicate, regs) in predicates() {
                let expected = ids.iter().any(|reg| regs.contains(reg));
                prop_assert_eq!(predicate(&dirty), expected, "{}", name);
            }
            dirty.reset();
            for (_, predicate, _) in predicates() {
                prop_assert!(!predicate(&dirty));
            }
        }
    }
}
