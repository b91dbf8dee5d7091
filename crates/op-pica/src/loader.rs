//! Vertex attribute fetch
//!
//! Up to 12 attribute loaders each read an interleaved array from guest
//! memory. A loader lists the attributes it carries, in memory order, with
//! optional padding slots between them. Attributes no loader provides can
//! take a fixed default value set through the default attribute port.

use std::sync::Once;

use op_core::Float24;
use op_shader::AttributeBuffer;

use crate::memory::GuestMemory;
use crate::regs::{id, Regs};

/// Attributes addressable by the loaders
pub const NUM_LOADER_ATTRIBUTES: usize = 12;
/// Attributes fed to the vertex shader
pub const MAX_ATTRIBUTES: usize = 16;

static IMMEDIATE_MODE_WARNING: Once = Once::new();

/// Component type of a vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributeFormat {
    #[default]
    Byte,
    UByte,
    Short,
    Float,
}

impl AttributeFormat {
    pub fn from_raw(raw: u32) -> Self {
        match raw & 3 {
            0 => Self::Byte,
            1 => Self::UByte,
            2 => Self::Short,
            _ => Self::Float,
        }
    }

    pub fn element_size(self) -> u32 {
        match self {
            Self::Byte | Self::UByte => 1,
            Self::Short => 2,
            Self::Float => 4,
        }
    }

    fn decode(self, bytes: &[u8]) -> f32 {
        match self {
            Self::Byte => bytes[0] as i8 as f32,
            Self::UByte => bytes[0] as f32,
            Self::Short => i16::from_le_bytes([bytes[0], bytes[1]]) as f32,
            Self::Float => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }
}

/// Decoded configuration of one attribute loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoaderConfig {
    /// Offset of the array from the attribute base address
    pub data_offset: u32,
    /// Attribute id of each slot; 12..15 are 4/8/12/16 byte padding
    pub components: [u32; 12],
    pub component_count: u32,
    /// Stride of the array in bytes
    pub byte_count: u32,
}

impl LoaderConfig {
    pub fn from_regs(regs: &Regs, loader: usize) -> Self {
        let base = id::ATTRIBUTE_LOADER0 + loader as u32 * id::ATTRIBUTE_LOADER_STRIDE;
        let low = regs.get(base + 1) as u64;
        let high = regs.get(base + 2);
        let packed = low | ((high as u64 & 0xFFFF) << 32);
        Self {
            data_offset: regs.get(base) & 0x0FFF_FFFF,
            components: std::array::from_fn(|i| ((packed >> (4 * i)) & 0xF) as u32),
            component_count: high >> 28,
            byte_count: (high >> 16) & 0xFF,
        }
    }
}

/// Per-draw attribute fetch state
#[derive(Debug, Clone)]
pub struct VertexLoader {
    num_total_attributes: usize,
    sources: [u32; MAX_ATTRIBUTES],
    strides: [u32; MAX_ATTRIBUTES],
    formats: [AttributeFormat; MAX_ATTRIBUTES],
    elements: [u32; MAX_ATTRIBUTES],
    is_default: [bool; MAX_ATTRIBUTES],
}

impl VertexLoader {
    pub fn new(regs: &Regs) -> Self {
        let format = regs.get(id::VERTEX_ATTRIB_FORMAT_LOW) as u64
            | ((regs.get(id::VERTEX_ATTRIB_FORMAT_HIGH) as u64) << 32);
        let attr_format = |i: usize| AttributeFormat::from_raw((format >> (4 * i)) as u32);
        let attr_elements = |i: usize| ((format >> (4 * i + 2)) & 3) as u32 + 1;
        let fixed_mask = (format >> 48) & 0xFFF;

        let mut loader = Self {
            num_total_attributes: (format >> 60) as usize + 1,
            sources: [0; MAX_ATTRIBUTES],
            strides: [0; MAX_ATTRIBUTES],
            formats: [AttributeFormat::default(); MAX_ATTRIBUTES],
            elements: [0; MAX_ATTRIBUTES],
            is_default: std::array::from_fn(|i| i >= NUM_LOADER_ATTRIBUTES || fixed_mask & (1 << i) != 0),
        };

        for n in 0..id::NUM_ATTRIBUTE_LOADERS as usize {
            let config = LoaderConfig::from_regs(regs, n);
            let mut offset = 0;

            for &attr in config.components.iter().take(config.component_count as usize) {
                let attr = attr as usize;
                if attr < NUM_LOADER_ATTRIBUTES {
                    let fmt = attr_format(attr);
                    offset = align_up(offset, fmt.element_size());
                    loader.sources[attr] = config.data_offset + offset;
                    loader.strides[attr] = config.byte_count;
                    loader.formats[attr] = fmt;
                    loader.elements[attr] = attr_elements(attr);
                    offset += attr_elements(attr) * fmt.element_size();
                } else {
                    // Padding slots
                    offset = align_up(offset, 4) + (attr as u32 - 11) * 4;
                }
            }
        }

        loader
    }

    pub fn num_total_attributes(&self) -> usize {
        self.num_total_attributes
    }

    /// Fetch all attributes of `vertex` into `input`
    pub fn load_vertex(
        &self,
        memory: &dyn GuestMemory,
        base_address: u32,
        vertex: u32,
        input: &mut AttributeBuffer,
        defaults: &AttributeBuffer,
    ) {
        for i in 0..self.num_total_attributes.min(MAX_ATTRIBUTES) {
            let elements = self.elements[i];
            if elements != 0 {
                let fmt = self.formats[i];
                let size = fmt.element_size() as usize;
                let addr = base_address
                    .wrapping_add(self.sources[i])
                    .wrapping_add(self.strides[i].wrapping_mul(vertex));

                let loaded = match memory.read(addr, size * elements as usize) {
                    Some(bytes) => {
                        for (comp, chunk) in bytes.chunks_exact(size).enumerate() {
                            input.attr[i][comp] = Float24::from_f32(fmt.decode(chunk));
                        }
                        elements as usize
                    }
                    None => {
                        tracing::error!("Vertex attribute {} unreadable at 0x{:08x}", i, addr);
                        0
                    }
                };

                // Missing components are (0, 0, 0, 1), not the default attribute
                for comp in loaded..4 {
                    input.attr[i][comp] = if comp == 3 { Float24::ONE } else { Float24::ZERO };
                }
            } else if self.is_default[i] {
                input.attr[i] = defaults.attr[i];
            }
            // Otherwise the input keeps whatever it held before
        }
    }
}

fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

/// Fixed attribute values written through the default attribute port
#[derive(Debug, Clone, Default)]
pub struct DefaultAttributes {
    pub attrs: AttributeBuffer,
    queue: [u32; 3],
    queued: usize,
}

impl DefaultAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a partially written attribute (the index register was written)
    pub fn reset_queue(&mut self) {
        self.queued = 0;
    }

    /// Queue one data word. After three words the attribute selected by the
    /// index register is committed and the index advances. Returns the
    /// committed attribute index.
    pub fn write(&mut self, regs: &mut Regs, value: u32) -> Option<usize> {
        self.queue[self.queued] = value;
        self.queued += 1;
        if self.queued < self.queue.len() {
            return None;
        }
        self.queued = 0;

        let [a, b, c] = self.queue;
        // Packed like float24 uniforms, w first
        let attribute = [
            Float24::from_raw(c & 0xFF_FFFF),
            Float24::from_raw(((b & 0xFFFF) << 8) | (c >> 24)),
            Float24::from_raw(((a & 0xFF) << 16) | (b >> 16)),
            Float24::from_raw(a >> 8),
        ];

        let index = regs.default_attrib_index() as usize;
        if index == 15 {
            IMMEDIATE_MODE_WARNING.call_once(|| {
                tracing::warn!("Immediate-mode vertex submission is not supported, ignoring");
            });
            return None;
        }

        self.attrs.attr[index] = attribute;
        let raw = regs.get(id::DEFAULT_ATTRIB_INDEX);
        regs.set(id::DEFAULT_ATTRIB_INDEX, (raw & !0xF) | (index as u32 + 1));
        tracing::trace!(
            "Default attribute {} = ({} {} {} {})",
            index,
            attribute[0].to_f32(),
            attribute[1].to_f32(),
            attribute[2].to_f32(),
            attribute[3].to_f32()
        );
        Some(index)
    }
}
