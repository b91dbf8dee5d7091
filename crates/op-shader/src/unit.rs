//! Shader unit execution state

use op_core::Float24;

use crate::regs::ShaderRegs;

/// Number of registers in each register bank
pub const NUM_REGISTERS: usize = 16;

pub type Vec4 = [Float24; 4];

const ZERO_VEC: Vec4 = [Float24::ZERO; 4];

/// Vertex attributes or compacted shader outputs
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct AttributeBuffer {
    pub attr: [Vec4; NUM_REGISTERS],
}

impl Default for AttributeBuffer {
    fn default() -> Self {
        Self {
            attr: [ZERO_VEC; NUM_REGISTERS],
        }
    }
}

/// Input, temporary and output register banks
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Registers {
    pub input: [Vec4; NUM_REGISTERS],
    pub temporary: [Vec4; NUM_REGISTERS],
    pub output: [Vec4; NUM_REGISTERS],
}

/// State of one shader unit while running a program
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct UnitState {
    pub registers: Registers,
    /// a0.x, a0.y and the loop counter aL
    pub address_registers: [i32; 3],
    pub conditional_code: [bool; 2],
}

impl Default for UnitState {
    fn default() -> Self {
        Self {
            registers: Registers {
                input: [ZERO_VEC; NUM_REGISTERS],
                temporary: [ZERO_VEC; NUM_REGISTERS],
                output: [ZERO_VEC; NUM_REGISTERS],
            },
            address_registers: [0; 3],
            conditional_code: [false; 2],
        }
    }
}

impl UnitState {
    /// Map vertex attributes to input registers
    pub fn load_input(&mut self, config: &ShaderRegs<'_>, input: &AttributeBuffer) {
        for attr in 0..config.num_input_attributes() {
            let reg = config.register_for_attribute(attr);
            self.registers.input[reg] = input.attr[attr];
        }
    }

    /// Compact the enabled output registers into `output`
    pub fn write_output(&self, config: &ShaderRegs<'_>, output: &mut AttributeBuffer) {
        write_masked_outputs(&self.registers.output, config.output_mask(), &mut output.attr);
    }
}

fn write_masked_outputs(registers: &[Vec4; NUM_REGISTERS], mask: u32, out: &mut [Vec4; NUM_REGISTERS]) {
    let enabled = (0..NUM_REGISTERS).filter(|reg| mask & (1 << reg) != 0);
    for (slot, reg) in enabled.enumerate() {
        out[slot] = registers[reg];
    }
}

/// Primitive emitted by a geometry shader
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedPrimitive {
    pub vertices: [AttributeBuffer; 3],
    /// Reverse the winding of this primitive
    pub winding: bool,
}

/// Vertex emission state of the geometry shader unit
#[derive(Debug, Clone, Default)]
pub struct GsEmitter {
    buffer: [AttributeBuffer; 3],
    pub vertex_id: u32,
    pub prim_emit: bool,
    pub winding: bool,
    pub output_mask: u32,
    pub primitives: Vec<EmittedPrimitive>,
}

impl GsEmitter {
    pub fn new(output_mask: u32) -> Self {
        Self {
            output_mask,
            ..Default::default()
        }
    }

    /// SETEMIT: select the vertex slot and primitive flags for the next EMIT
    pub fn set_emit(&mut self, vertex_id: u32, prim_emit: bool, winding: bool) {
        self.vertex_id = vertex_id;
        self.prim_emit = prim_emit;
        self.winding = winding;
    }

    /// EMIT: store the current outputs and complete a primitive if requested
    pub fn emit(&mut self, output: &[Vec4; NUM_REGISTERS]) {
        let slot = self.vertex_id as usize;
        if slot >= self.buffer.len() {
            tracing::error!("Geometry shader emitted to invalid vertex slot {}", slot);
            return;
        }
        write_masked_outputs(output, self.output_mask, &mut self.buffer[slot].attr);

        if self.prim_emit {
            self.primitives.push(EmittedPrimitive {
                vertices: self.buffer,
                winding: self.winding,
            });
            self.winding = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::{offset, SHADER_REG_COUNT};

    fn vec(x: f32) -> Vec4 {
        [Float24::from_f32(x); 4]
    }

    #[test]
    fn test_load_input() {
        let mut raw = [0u32; SHADER_REG_COUNT];
        raw[offset::INPUT_BUFFER_CONFIG] = 1;
        raw[offset::INPUT_REGISTER_MAP_LOW] = 0x0000_0035;
        let regs = ShaderRegs::new(&raw);

        let mut input = AttributeBuffer::default();
        input.attr[0] = vec(1.0);
        input.attr[1] = vec(2.0);
        input.attr[2] = vec(9.0);

        let mut state = UnitState::default();
        state.load_input(&regs, &input);
        assert_eq!(state.registers.input[5], vec(1.0));
        assert_eq!(state.registers.input[3], vec(2.0));
        assert_eq!(state.registers.input[2], vec(0.0));
    }

    #[test]
    fn test_write_output_compacts() {
        let mut raw = [0u32; SHADER_REG_COUNT];
        raw[offset::OUTPUT_MASK] = 0b1010;
        let regs = ShaderRegs::new(&raw);

        let mut state = UnitState::default();
        state.registers.output[1] = vec(1.0);
        state.registers.output[3] = vec(3.0);

        let mut out = AttributeBuffer::default();
        state.write_output(&regs, &mut out);
        assert_eq!(out.attr[0], vec(1.0));
        assert_eq!(out.attr[1], vec(3.0));
        assert_eq!(out.attr[2], vec(0.0));
    }

    #[test]
    fn test_emitter_primitive() {
        let mut emitter = GsEmitter::new(0b1);
        let mut out = [ZERO_VEC; NUM_REGISTERS];
        for id in 0..3 {
            out[0] = vec(id as f32);
            emitter.set_emit(id, id == 2, id == 2);
            emitter.emit(&out);
        }
        assert_eq!(emitter.primitives.len(), 1);
        let prim = &emitter.primitives[0];
        assert!(prim.winding);
        assert_eq!(prim.vertices[1].attr[0], vec(1.0));
        assert!(!emitter.winding);
    }

    #[test]
    fn test_emitter_invalid_slot() {
        let mut emitter = GsEmitter::new(0b1);
        emitter.set_emit(3, true, false);
        emitter.emit(&[ZERO_VEC; NUM_REGISTERS]);
        assert!(emitter.primitives.is_empty());
    }
}
