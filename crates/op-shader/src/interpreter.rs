//! Reference shader interpreter
//!
//! Executes PICA bytecode directly. This is the behavioural reference for the
//! JIT and the fallback whenever a program cannot be compiled.

use std::sync::Once;

use op_core::float::pica_mul;
use op_core::Float24;

use crate::bytecode::{
    ConditionOp, DestRegister, Instruction, OpCode, SourceRegister, SwizzlePattern,
    MAX_PROGRAM_CODE_LENGTH,
};
use crate::setup::{ShaderSetup, Uniforms, NUM_FLOAT_UNIFORMS};
use crate::unit::{GsEmitter, UnitState, Vec4};

/// Maximum nesting of calls, conditionals and loops
pub const MAX_CONTROL_DEPTH: usize = 16;

/// Value read by relative uniform accesses that fall outside the bank
pub const OUT_OF_RANGE_UNIFORM: Vec4 = [Float24::ONE; 4];

static LITP_WARNING: Once = Once::new();

/// LITP is not emulated; report it once per process
pub(crate) fn warn_unsupported_litp() {
    LITP_WARNING.call_once(|| {
        tracing::warn!("Shader uses unsupported instruction LITP, ignoring");
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Call,
    Conditional,
    Loop,
}

#[derive(Debug, Clone, Copy)]
struct ControlFrame {
    kind: FrameKind,
    final_address: u32,
    return_address: u32,
    repeat_counter: u8,
    loop_increment: u8,
    loop_address: u32,
}

/// Interpreter for the PICA shader instruction set
#[derive(Debug, Clone)]
pub struct Interpreter {
    step_limit: u32,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(1 << 20)
    }
}

/// Read a source register, applying a relative offset to float uniforms
#[inline]
pub(crate) fn read_source(
    state: &UnitState,
    uniforms: &Uniforms,
    reg: SourceRegister,
    offset: i32,
) -> Vec4 {
    match reg {
        SourceRegister::Input(i) => state.registers.input[i as usize],
        SourceRegister::Temporary(i) => state.registers.temporary[i as usize],
        SourceRegister::FloatUniform(i) => {
            let index = i as i32 + offset;
            if (0..NUM_FLOAT_UNIFORMS as i32).contains(&index) {
                uniforms.f[index as usize]
            } else {
                OUT_OF_RANGE_UNIFORM
            }
        }
    }
}

#[inline]
fn swizzle(value: Vec4, pattern: SwizzlePattern, src: usize) -> Vec4 {
    let selectors = pattern.selectors(src);
    let mut out = selectors.map(|s| value[s]);
    if pattern.negate(src) {
        out = out.map(|c| -c);
    }
    out
}

#[inline]
fn write_dest(state: &mut UnitState, dest: DestRegister, pattern: SwizzlePattern, result: Vec4) {
    let target = match dest {
        DestRegister::Output(i) => &mut state.registers.output[i as usize],
        DestRegister::Temporary(i) => &mut state.registers.temporary[i as usize],
    };
    for (i, component) in target.iter_mut().enumerate() {
        if pattern.dest_component_enabled(i) {
            *component = result[i];
        }
    }
}

#[inline]
fn dot(a: &Vec4, b: &Vec4, components: usize) -> Float24 {
    let mut sum = 0.0f32;
    for i in 0..components {
        sum += pica_mul(a[i].to_f32(), b[i].to_f32());
    }
    Float24::from_f32(sum)
}

#[inline]
fn bool_to_float(value: bool) -> Float24 {
    if value {
        Float24::ONE
    } else {
        Float24::ZERO
    }
}

#[inline]
fn evaluate_condition(state: &UnitState, instr: Instruction) -> bool {
    let op: ConditionOp = instr.condition_op();
    op.evaluate(instr.refx(), instr.refy(), state.conditional_code)
}

impl Interpreter {
    /// Create an interpreter that stops after `step_limit` control transfers
    /// per run.
    ///
    /// Taken jumps, taken calls, loop repeats and any other backward branch
    /// each cost one step. Straight-line code and forward branches are free,
    /// so both engines abort a program at the same point.
    pub fn new(step_limit: u32) -> Self {
        Self { step_limit }
    }

    /// Charge one control transfer; false once the budget is spent
    fn take_step(&self, steps: &mut u32, pc: u32) -> bool {
        if *steps >= self.step_limit {
            tracing::warn!(
                "Shader exceeded {} steps, aborting at pc 0x{:03x}",
                self.step_limit,
                pc
            );
            return false;
        }
        *steps += 1;
        true
    }

    /// Run the program in `setup` from `entry_point`
    pub fn run(
        &self,
        setup: &ShaderSetup,
        state: &mut UnitState,
        entry_point: u32,
        mut emitter: Option<&mut GsEmitter>,
    ) {
        let program = setup.program_code();
        let swizzle_data = setup.swizzle_data();
        let uniforms = &setup.uniforms;

        let mut stack: Vec<ControlFrame> = Vec::with_capacity(MAX_CONTROL_DEPTH);
        let mut pc = entry_point;
        let mut steps = 0u32;

        loop {
            if let Some(top) = stack.last_mut() {
                if pc == top.final_address {
                    state.address_registers[2] =
                        state.address_registers[2].wrapping_add(top.loop_increment as i32);
                    let target = if top.repeat_counter == 0 {
                        let frame = *top;
                        stack.pop();
                        // Returns are paid for by their call
                        if frame.kind == FrameKind::Conditional
                            && frame.return_address < pc
                            && !self.take_step(&mut steps, pc)
                        {
                            return;
                        }
                        frame.return_address
                    } else {
                        top.repeat_counter -= 1;
                        let target = top.loop_address;
                        if !self.take_step(&mut steps, pc) {
                            return;
                        }
                        target
                    };
                    pc = target;
                    continue;
                }
            }

            if pc as usize >= MAX_PROGRAM_CODE_LENGTH {
                tracing::error!("Shader program counter 0x{:x} out of range", pc);
                return;
            }

            let instr = Instruction(program[pc as usize]);
            let opcode = instr.opcode();
            let pattern = SwizzlePattern(swizzle_data[instr.operand_desc_id()]);

            let call = |stack: &mut Vec<ControlFrame>,
                            kind: FrameKind,
                            offset: u32,
                            num: u32,
                            return_address: u32,
                            repeat: u8,
                            increment: u8|
             -> Option<u32> {
                if stack.len() >= MAX_CONTROL_DEPTH {
                    tracing::error!("Shader control stack overflow at pc 0x{:03x}", pc);
                    return None;
                }
                stack.push(ControlFrame {
                    kind,
                    final_address: offset + num,
                    return_address,
                    repeat_counter: repeat,
                    loop_increment: increment,
                    loop_address: offset,
                });
                Some(offset)
            };

            let mut next_pc = pc + 1;

            match opcode {
                OpCode::Add
                | OpCode::Dp3
                | OpCode::Dp4
                | OpCode::Dph
                | OpCode::Dphi
                | OpCode::Dst
                | OpCode::Dsti
                | OpCode::Ex2
                | OpCode::Lg2
                | OpCode::Mul
                | OpCode::Sge
                | OpCode::Sgei
                | OpCode::Slt
                | OpCode::Slti
                | OpCode::Flr
                | OpCode::Max
                | OpCode::Min
                | OpCode::Rcp
                | OpCode::Rsq
                | OpCode::Mova
                | OpCode::Mov
                | OpCode::Cmp => {
                    self.execute_arithmetic(state, uniforms, instr, opcode, pattern);
                }
                OpCode::Mad | OpCode::Madi => {
                    let inverted = opcode == OpCode::Madi;
                    let offset = address_offset(state, instr.address_register_index());
                    let src1 = swizzle(
                        read_source(state, uniforms, instr.mad_src1(), 0),
                        pattern,
                        1,
                    );
                    let src2 = swizzle(
                        read_source(
                            state,
                            uniforms,
                            instr.mad_src2(inverted),
                            if inverted { 0 } else { offset },
                        ),
                        pattern,
                        2,
                    );
                    let src3 = swizzle(
                        read_source(
                            state,
                            uniforms,
                            instr.mad_src3(inverted),
                            if inverted { offset } else { 0 },
                        ),
                        pattern,
                        3,
                    );
                    let mut result = [Float24::ZERO; 4];
                    for i in 0..4 {
                        result[i] = src1[i] * src2[i] + src3[i];
                    }
                    write_dest(state, instr.mad_dest(), pattern, result);
                }
                OpCode::Litp => warn_unsupported_litp(),
                OpCode::Nop => {}
                OpCode::End => return,
                OpCode::Break | OpCode::Breakc => {
                    let taken = opcode == OpCode::Break || evaluate_condition(state, instr);
                    if taken {
                        match stack.iter().rposition(|f| f.kind == FrameKind::Loop) {
                            Some(index) => {
                                next_pc = stack[index].return_address;
                                stack.truncate(index);
                            }
                            None => {
                                tracing::error!("BREAK outside of a loop at pc 0x{:03x}", pc)
                            }
                        }
                    }
                }
                OpCode::Jmpc | OpCode::Jmpu => {
                    let taken = if opcode == OpCode::Jmpc {
                        evaluate_condition(state, instr)
                    } else {
                        let expected = instr.num_instructions() & 1 == 0;
                        uniforms.b[instr.bool_uniform_id()] == expected
                    };
                    if taken {
                        if !self.take_step(&mut steps, pc) {
                            return;
                        }
                        next_pc = instr.dest_offset();
                    }
                }
                OpCode::Call | OpCode::Callc | OpCode::Callu => {
                    let taken = match opcode {
                        OpCode::Call => true,
                        OpCode::Callc => evaluate_condition(state, instr),
                        _ => uniforms.b[instr.bool_uniform_id()],
                    };
                    if taken {
                        match call(
                            &mut stack,
                            FrameKind::Call,
                            instr.dest_offset(),
                            instr.num_instructions(),
                            pc + 1,
                            0,
                            0,
                        ) {
                            Some(target) => next_pc = target,
                            None => return,
                        }
                        if !self.take_step(&mut steps, pc) {
                            return;
                        }
                    }
                }
                OpCode::Ifu | OpCode::Ifc => {
                    let condition = if opcode == OpCode::Ifu {
                        uniforms.b[instr.bool_uniform_id()]
                    } else {
                        evaluate_condition(state, instr)
                    };
                    let dest = instr.dest_offset();
                    let num = instr.num_instructions();
                    let pushed = if condition {
                        call(
                            &mut stack,
                            FrameKind::Conditional,
                            pc + 1,
                            dest.wrapping_sub(pc + 1),
                            dest + num,
                            0,
                            0,
                        )
                    } else {
                        call(&mut stack, FrameKind::Conditional, dest, num, dest + num, 0, 0)
                    };
                    match pushed {
                        Some(target) => next_pc = target,
                        None => return,
                    }
                    if next_pc <= pc && !self.take_step(&mut steps, pc) {
                        return;
                    }
                }
                OpCode::Loop => {
                    let [x, y, z, _] = uniforms.i[instr.int_uniform_id()];
                    state.address_registers[2] = y as i32;
                    let dest = instr.dest_offset();
                    match call(
                        &mut stack,
                        FrameKind::Loop,
                        pc + 1,
                        dest.wrapping_sub(pc),
                        dest + 1,
                        x,
                        z,
                    ) {
                        Some(target) => next_pc = target,
                        None => return,
                    }
                }
                OpCode::Emit => match emitter.as_deref_mut() {
                    Some(emitter) => emitter.emit(&state.registers.output),
                    None => tracing::error!("EMIT executed outside of a geometry shader"),
                },
                OpCode::SetEmit => match emitter.as_deref_mut() {
                    Some(emitter) => emitter.set_emit(
                        instr.emit_vertex_id(),
                        instr.emit_prim(),
                        instr.emit_winding(),
                    ),
                    None => tracing::error!("SETEMIT executed outside of a geometry shader"),
                },
                OpCode::Unknown(op) => {
                    tracing::error!("Unhandled shader opcode 0x{:02x} at pc 0x{:03x}", op, pc);
                }
            }

            pc = next_pc;
        }
    }

    fn execute_arithmetic(
        &self,
        state: &mut UnitState,
        uniforms: &Uniforms,
        instr: Instruction,
        opcode: OpCode,
        pattern: SwizzlePattern,
    ) {
        let inverted = opcode.is_inverted();
        let offset = address_offset(state, instr.address_register_index());
        let src1 = swizzle(
            read_source(
                state,
                uniforms,
                instr.src1(inverted),
                if inverted { 0 } else { offset },
            ),
            pattern,
            1,
        );
        let src2 = swizzle(
            read_source(
                state,
                uniforms,
                instr.src2(inverted),
                if inverted { offset } else { 0 },
            ),
            pattern,
            2,
        );

        let mut result = [Float24::ZERO; 4];
        match opcode {
            OpCode::Add => {
                for i in 0..4 {
                    result[i] = src1[i] + src2[i];
                }
            }
            OpCode::Mul => {
                for i in 0..4 {
                    result[i] = src1[i] * src2[i];
                }
            }
            OpCode::Flr => {
                result = src1.map(|c| Float24::from_f32(c.to_f32().floor()));
            }
            OpCode::Max => {
                for i in 0..4 {
                    result[i] = if src1[i] > src2[i] { src1[i] } else { src2[i] };
                }
            }
            OpCode::Min => {
                for i in 0..4 {
                    result[i] = if src1[i] < src2[i] { src1[i] } else { src2[i] };
                }
            }
            OpCode::Dp3 => result = [dot(&src1, &src2, 3); 4],
            OpCode::Dp4 => result = [dot(&src1, &src2, 4); 4],
            OpCode::Dph | OpCode::Dphi => {
                let mut src1 = src1;
                src1[3] = Float24::ONE;
                result = [dot(&src1, &src2, 4); 4];
            }
            OpCode::Dst | OpCode::Dsti => {
                result = [Float24::ONE, src1[1] * src2[1], src1[2], src2[3]];
            }
            OpCode::Rcp => result = [Float24::from_f32(1.0 / src1[0].to_f32()); 4],
            OpCode::Rsq => {
                result = [Float24::from_f32(1.0 / src1[0].to_f32().sqrt()); 4];
            }
            OpCode::Ex2 => result = [Float24::from_f32(src1[0].to_f32().exp2()); 4],
            OpCode::Lg2 => result = [Float24::from_f32(src1[0].to_f32().log2()); 4],
            OpCode::Sge | OpCode::Sgei => {
                for i in 0..4 {
                    result[i] = bool_to_float(src1[i] >= src2[i]);
                }
            }
            OpCode::Slt | OpCode::Slti => {
                for i in 0..4 {
                    result[i] = bool_to_float(src1[i] < src2[i]);
                }
            }
            OpCode::Mov => result = src1,
            OpCode::Mova => {
                for i in 0..2 {
                    if pattern.dest_component_enabled(i) {
                        state.address_registers[i] = src1[i].to_f32() as i32;
                    }
                }
                return;
            }
            OpCode::Cmp => {
                state.conditional_code[0] = instr.compare_x().evaluate(src1[0].to_f32(), src2[0].to_f32());
                state.conditional_code[1] = instr.compare_y().evaluate(src1[1].to_f32(), src2[1].to_f32());
                return;
            }
            _ => unreachable!("not an arithmetic opcode: {:?}", opcode),
        }
        write_dest(state, instr.dest(), pattern, result);
    }
}

#[inline]
fn address_offset(state: &UnitState, index: usize) -> i32 {
    if index == 0 {
        0
    } else {
        state.address_registers[index - 1]
    }
}
