//! Lookup tables streamed through register data ports
//!
//! Lighting, fog and procedural texture tables are not memory mapped; the
//! guest selects a table and start index through a config register and then
//! pushes entries through a data port that auto-increments the index.

use bitflags::bitflags;

use crate::regs::{id, Regs};

pub const NUM_LIGHTING_LUTS: usize = 24;
pub const LIGHTING_LUT_SIZE: usize = 256;
pub const FOG_LUT_SIZE: usize = 128;
pub const PROCTEX_NOISE_LUT_SIZE: usize = 128;
pub const PROCTEX_MAP_LUT_SIZE: usize = 128;
pub const PROCTEX_COLOR_LUT_SIZE: usize = 256;

bitflags! {
    /// Tables written since the last upload
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LutDirty: u32 {
        const FOG = 1 << 0;
        const PROCTEX_NOISE = 1 << 1;
        const PROCTEX_COLOR_MAP = 1 << 2;
        const PROCTEX_ALPHA_MAP = 1 << 3;
        const PROCTEX_COLOR = 1 << 4;
        const PROCTEX_COLOR_DIFF = 1 << 5;
    }
}

impl LutDirty {
    pub const PROCTEX: Self = Self::PROCTEX_NOISE
        .union(Self::PROCTEX_COLOR_MAP)
        .union(Self::PROCTEX_ALPHA_MAP)
        .union(Self::PROCTEX_COLOR)
        .union(Self::PROCTEX_COLOR_DIFF);
}

/// Procedural texture table selected by `proctex_lut_config`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcTexTable {
    Noise,
    ColorMap,
    AlphaMap,
    Color,
    ColorDiff,
}

impl ProcTexTable {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Noise),
            2 => Some(Self::ColorMap),
            3 => Some(Self::AlphaMap),
            4 => Some(Self::Color),
            5 => Some(Self::ColorDiff),
            _ => None,
        }
    }
}

/// All streamed tables. Entries are kept in their raw register encoding;
/// the host backend decodes them when uploading.
#[derive(Debug, Clone)]
pub struct LutState {
    pub lighting: Box<[[u32; LIGHTING_LUT_SIZE]; NUM_LIGHTING_LUTS]>,
    pub fog: [u32; FOG_LUT_SIZE],
    pub proctex_noise: [u32; PROCTEX_NOISE_LUT_SIZE],
    pub proctex_color_map: [u32; PROCTEX_MAP_LUT_SIZE],
    pub proctex_alpha_map: [u32; PROCTEX_MAP_LUT_SIZE],
    pub proctex_color: [u32; PROCTEX_COLOR_LUT_SIZE],
    pub proctex_color_diff: [u32; PROCTEX_COLOR_LUT_SIZE],
    /// Bit n set when lighting table n was written
    pub lighting_dirty: u32,
    pub dirty: LutDirty,
}

impl Default for LutState {
    fn default() -> Self {
        Self {
            lighting: Box::new([[0; LIGHTING_LUT_SIZE]; NUM_LIGHTING_LUTS]),
            fog: [0; FOG_LUT_SIZE],
            proctex_noise: [0; PROCTEX_NOISE_LUT_SIZE],
            proctex_color_map: [0; PROCTEX_MAP_LUT_SIZE],
            proctex_alpha_map: [0; PROCTEX_MAP_LUT_SIZE],
            proctex_color: [0; PROCTEX_COLOR_LUT_SIZE],
            proctex_color_diff: [0; PROCTEX_COLOR_LUT_SIZE],
            lighting_dirty: 0,
            dirty: LutDirty::empty(),
        }
    }
}

impl LutState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push one lighting LUT entry and advance `lut_config.index`
    pub fn write_lighting(&mut self, regs: &mut Regs, value: u32) {
        let config = regs.get(id::LIGHTING_LUT_CONFIG);
        let index = (config & 0xFF) as usize;
        let table = ((config >> 8) & 0x1F) as usize;

        if table >= NUM_LIGHTING_LUTS {
            tracing::error!("Invalid lighting LUT {}", table);
            return;
        }
        self.lighting[table][index] = value;
        self.lighting_dirty |= 1 << table;

        let next = (config & !0xFF) | ((index as u32 + 1) & 0xFF);
        regs.set(id::LIGHTING_LUT_CONFIG, next);
    }

    /// Push one fog LUT entry and advance `fog_lut_offset`
    pub fn write_fog(&mut self, regs: &mut Regs, value: u32) {
        let offset = regs.get(id::FOG_LUT_OFFSET);
        self.fog[(offset & 0xFF) as usize % FOG_LUT_SIZE] = value;
        self.dirty |= LutDirty::FOG;
        regs.set(id::FOG_LUT_OFFSET, (offset & !0xFF) | (offset.wrapping_add(1) & 0xFF));
    }

    /// Push one procedural texture LUT entry and advance its index
    pub fn write_proctex(&mut self, regs: &mut Regs, value: u32) {
        let config = regs.get(id::PROCTEX_LUT_CONFIG);
        let index = (config & 0xFF) as usize;

        match ProcTexTable::from_raw((config >> 8) & 0xF) {
            Some(ProcTexTable::Noise) => {
                self.proctex_noise[index % PROCTEX_NOISE_LUT_SIZE] = value;
                self.dirty |= LutDirty::PROCTEX_NOISE;
            }
            Some(ProcTexTable::ColorMap) => {
                self.proctex_color_map[index % PROCTEX_MAP_LUT_SIZE] = value;
                self.dirty |= LutDirty::PROCTEX_COLOR_MAP;
            }
            Some(ProcTexTable::AlphaMap) => {
                self.proctex_alpha_map[index % PROCTEX_MAP_LUT_SIZE] = value;
                self.dirty |= LutDirty::PROCTEX_ALPHA_MAP;
            }
            Some(ProcTexTable::Color) => {
                self.proctex_color[index % PROCTEX_COLOR_LUT_SIZE] = value;
                self.dirty |= LutDirty::PROCTEX_COLOR;
            }
            Some(ProcTexTable::ColorDiff) => {
                self.proctex_color_diff[index % PROCTEX_COLOR_LUT_SIZE] = value;
                self.dirty |= LutDirty::PROCTEX_COLOR_DIFF;
            }
            None => {
                tracing::error!("Invalid procedural texture LUT {}", (config >> 8) & 0xF);
                return;
            }
        }

        regs.set(id::PROCTEX_LUT_CONFIG, (config & !0xFF) | ((index as u32 + 1) & 0xFF));
    }

    /// Mark every table as needing an upload
    pub fn invalidate(&mut self) {
        self.lighting_dirty = (1 << NUM_LIGHTING_LUTS) - 1;
        self.dirty = LutDirty::all();
    }

    /// Take and clear the dirty state
    pub fn take_dirty(&mut self) -> (u32, LutDirty) {
        let out = (self.lighting_dirty, self.dirty);
        self.lighting_dirty = 0;
        self.dirty = LutDirty::empty();
        out
    }
}
