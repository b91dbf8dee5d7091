//! PICA bytecode to Cranelift IR translation
//!
//! Every instruction gets its own block so that jumps, calls and the entry
//! dispatch can target any program counter. Conditionals and loops are
//! compiled structurally by recursing over their regions; calls push
//! `(return offset, call site)` onto the frame's call stack and every return
//! offset starts with a check that pops the stack and dispatches back to the
//! instruction following the call site.

use std::collections::{BTreeSet, HashMap};
use std::mem::offset_of;

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{
    types, AbiParam, Block, FuncRef, InstBuilder, JumpTableData, MemFlags, Type, Value,
};
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::JITModule;
use cranelift_module::Module;

use op_core::ShaderError;

use super::{Helpers, JitFrame};
use crate::bytecode::{
    CompareOp, ConditionOp, DestRegister, Instruction, OpCode, SourceRegister, SwizzlePattern,
};
use crate::interpreter::{warn_unsupported_litp, MAX_CONTROL_DEPTH};
use crate::setup::{Uniforms, NUM_FLOAT_UNIFORMS};
use crate::unit::{Registers, UnitState};

/// Maximum number of LOOP instructions in one program
pub const MAX_LOOPS: usize = 32;

const VEC4_SIZE: i32 = 16;

const STATE_INPUT: i32 = (offset_of!(UnitState, registers) + offset_of!(Registers, input)) as i32;
const STATE_TEMPORARY: i32 =
    (offset_of!(UnitState, registers) + offset_of!(Registers, temporary)) as i32;
const STATE_OUTPUT: i32 = (offset_of!(UnitState, registers) + offset_of!(Registers, output)) as i32;
const STATE_ADDRESS: i32 = offset_of!(UnitState, address_registers) as i32;
const STATE_CONDITION: i32 = offset_of!(UnitState, conditional_code) as i32;

const UNIFORM_F: i32 = offset_of!(Uniforms, f) as i32;
const UNIFORM_B: i32 = offset_of!(Uniforms, b) as i32;
const UNIFORM_I: i32 = offset_of!(Uniforms, i) as i32;

const FRAME_DEPTH: i32 = offset_of!(JitFrame, call_depth) as i32;
const FRAME_CONTROL_DEPTH: i32 = offset_of!(JitFrame, control_depth) as i32;
const FRAME_STEPS: i32 = offset_of!(JitFrame, steps_remaining) as i32;
const FRAME_STACK: i32 = offset_of!(JitFrame, call_stack) as i32;
const FRAME_LOOPS: i32 = offset_of!(JitFrame, loop_counters) as i32;
const FRAME_LOOP_DEPTHS: i32 = offset_of!(JitFrame, loop_depths) as i32;

const STATUS_OK: i64 = 0;
const STATUS_CONTROL_OVERFLOW: i64 = 1;
const STATUS_BAD_ENTRY: i64 = 2;
const STATUS_STEP_LIMIT: i64 = 3;

#[derive(Debug, Clone, Copy)]
struct CallSite {
    pc: u32,
    return_offset: u32,
}

/// Flow-control facts gathered before code generation
#[derive(Debug, Default)]
struct Analysis {
    call_sites: Vec<CallSite>,
    site_of_pc: HashMap<u32, usize>,
    return_offsets: BTreeSet<u32>,
    loop_of_pc: HashMap<u32, usize>,
}

fn analyze(code: &[u32]) -> Result<Analysis, ShaderError> {
    let len = code.len() as u32;
    let mut analysis = Analysis::default();

    for (pc, &word) in code.iter().enumerate() {
        let pc = pc as u32;
        let instr = Instruction(word);
        let dest = instr.dest_offset();
        let num = instr.num_instructions();
        let invalid = |reason: &str| ShaderError::InvalidFlowControl {
            pc,
            reason: reason.to_string(),
        };

        match instr.opcode() {
            OpCode::Call | OpCode::Callc | OpCode::Callu => {
                if dest >= len || dest + num > len {
                    return Err(invalid("call target outside the program"));
                }
                let return_offset = dest + num;
                analysis.site_of_pc.insert(pc, analysis.call_sites.len());
                analysis.call_sites.push(CallSite { pc, return_offset });
                analysis.return_offsets.insert(return_offset);
            }
            OpCode::Jmpc | OpCode::Jmpu => {
                if dest > len {
                    return Err(invalid("jump target outside the program"));
                }
            }
            OpCode::Ifu | OpCode::Ifc => {
                if dest <= pc || dest + num > len {
                    return Err(invalid("conditional region outside the program"));
                }
            }
            OpCode::Loop => {
                if dest < pc || dest >= len {
                    return Err(invalid("loop body outside the program"));
                }
                if analysis.loop_of_pc.len() >= MAX_LOOPS {
                    return Err(invalid("too many loops"));
                }
                let index = analysis.loop_of_pc.len();
                analysis.loop_of_pc.insert(pc, index);
            }
            _ => {}
        }
    }

    Ok(analysis)
}

#[derive(Debug, Clone, Copy)]
struct ImportedHelpers {
    exp2: FuncRef,
    log2: FuncRef,
    emit: FuncRef,
    set_emit: FuncRef,
}

/// Build the IR for `code` into `ctx.func`
pub(super) fn translate(
    module: &mut JITModule,
    ctx: &mut Context,
    builder_context: &mut FunctionBuilderContext,
    helpers: Helpers,
    code: &[u32],
    swizzle: &[u32],
) -> Result<(), ShaderError> {
    let analysis = analyze(code)?;
    let ptr = module.target_config().pointer_type();

    let signature = &mut ctx.func.signature;
    signature.params.clear();
    signature.returns.clear();
    signature
        .params
        .extend([ptr, ptr, ptr, types::I32].map(AbiParam::new));
    signature.returns.push(AbiParam::new(types::I32));

    let imported = ImportedHelpers {
        exp2: module.declare_func_in_func(helpers.exp2, &mut ctx.func),
        log2: module.declare_func_in_func(helpers.log2, &mut ctx.func),
        emit: module.declare_func_in_func(helpers.emit, &mut ctx.func),
        set_emit: module.declare_func_in_func(helpers.set_emit, &mut ctx.func),
    };

    let mut builder = FunctionBuilder::new(&mut ctx.func, builder_context);
    let entry = builder.create_block();
    builder.append_block_params_for_function_params(entry);
    builder.switch_to_block(entry);
    let params = builder.block_params(entry).to_vec();

    let labels: Vec<Block> = (0..=code.len()).map(|_| builder.create_block()).collect();
    let bad_entry = builder.create_block();
    let control_overflow = builder.create_block();
    let step_limit = builder.create_block();

    let default = builder.func.dfg.block_call(bad_entry, &[]);
    let targets: Vec<_> = labels[..code.len()]
        .iter()
        .map(|&label| builder.func.dfg.block_call(label, &[]))
        .collect();
    let table = builder.create_jump_table(JumpTableData::new(default, &targets));
    builder.ins().br_table(params[3], table);

    let mut translator = Translator {
        builder,
        code,
        swizzle,
        analysis,
        labels,
        pc: 0,
        terminated: true,
        loop_exits: Vec::new(),
        state: params[0],
        uniforms: params[1],
        frame: params[2],
        ptr,
        flags: MemFlags::trusted(),
        control_overflow,
        step_limit,
        helpers: imported,
    };

    translator.compile_block(code.len() as u32)?;
    translator.bind_label(code.len() as u32);
    translator.return_status(STATUS_OK);

    translator.status_block(bad_entry, STATUS_BAD_ENTRY);
    translator.status_block(control_overflow, STATUS_CONTROL_OVERFLOW);
    translator.status_block(step_limit, STATUS_STEP_LIMIT);

    let mut builder = translator.builder;
    builder.seal_all_blocks();
    builder.finalize();
    Ok(())
}

struct Translator<'f, 'p> {
    builder: FunctionBuilder<'f>,
    code: &'p [u32],
    swizzle: &'p [u32],
    analysis: Analysis,
    labels: Vec<Block>,
    pc: u32,
    /// The current block already ends in a terminator
    terminated: bool,
    loop_exits: Vec<Block>,
    state: Value,
    uniforms: Value,
    frame: Value,
    ptr: Type,
    flags: MemFlags,
    control_overflow: Block,
    step_limit: Block,
    helpers: ImportedHelpers,
}

impl Translator<'_, '_> {
    fn compile_block(&mut self, end: u32) -> Result<(), ShaderError> {
        while self.pc < end {
            let pc = self.pc;
            self.bind_label(pc);
            self.pc += 1;
            self.compile_instruction(pc, Instruction(self.code[pc as usize]))?;
        }
        if self.pc != end {
            return Err(ShaderError::InvalidFlowControl {
                pc: end,
                reason: "overlapping control flow regions".to_string(),
            });
        }
        Ok(())
    }

    /// Start the block for `pc`, falling through from the current one
    fn bind_label(&mut self, pc: u32) {
        let label = self.labels[pc as usize];
        if !self.terminated {
            self.builder.ins().jump(label, &[]);
        }
        self.builder.switch_to_block(label);
        self.terminated = false;
        if self.analysis.return_offsets.contains(&pc) {
            self.return_check(pc);
        }
    }

    fn return_check(&mut self, offset: u32) {
        let check_top = self.builder.create_block();
        let pop = self.builder.create_block();
        let cont = self.builder.create_block();

        let depth = self.load_i32(self.frame, FRAME_DEPTH);
        self.builder.ins().brif(depth, check_top, &[], cont, &[]);

        self.builder.switch_to_block(check_top);
        let top = self.builder.ins().iadd_imm(depth, -1);
        let entry = self.call_stack_entry(top);
        let return_offset = self.load_i32(entry, FRAME_STACK);
        let matches = self
            .builder
            .ins()
            .icmp_imm(IntCC::Equal, return_offset, offset as i64);
        self.builder.ins().brif(matches, pop, &[], cont, &[]);

        self.builder.switch_to_block(pop);
        self.builder
            .ins()
            .store(self.flags, top, self.frame, FRAME_DEPTH);
        self.pop_control();
        let site = self.load_i32(entry, FRAME_STACK + 4);
        let default = self.builder.func.dfg.block_call(cont, &[]);
        let targets: Vec<_> = self
            .analysis
            .call_sites
            .iter()
            .map(|site| {
                let label = self.labels[site.pc as usize + 1];
                self.builder.func.dfg.block_call(label, &[])
            })
            .collect();
        let table = self
            .builder
            .create_jump_table(JumpTableData::new(default, &targets));
        self.builder.ins().br_table(site, table);

        self.builder.switch_to_block(cont);
    }

    fn compile_instruction(&mut self, pc: u32, instr: Instruction) -> Result<(), ShaderError> {
        let opcode = instr.opcode();
        let pattern = SwizzlePattern(self.swizzle[instr.operand_desc_id()]);

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
            | OpCode::Cmp => self.compile_arithmetic(instr, opcode, pattern),
            OpCode::Mad | OpCode::Madi => self.compile_mad(instr, opcode == OpCode::Madi, pattern),
            OpCode::Litp => warn_unsupported_litp(),
            OpCode::Nop => {}
            OpCode::End => {
                self.return_status(STATUS_OK);
            }
            OpCode::Break | OpCode::Breakc => {
                let exit = *self
                    .loop_exits
                    .last()
                    .ok_or_else(|| ShaderError::InvalidFlowControl {
                        pc,
                        reason: "BREAK outside of a loop".to_string(),
                    })?;
                if opcode == OpCode::Break {
                    self.builder.ins().jump(exit, &[]);
                    self.terminated = true;
                } else {
                    let condition = self.condition(instr);
                    self.branch_if(condition, exit);
                }
            }
            OpCode::Jmpc | OpCode::Jmpu => {
                let condition = if opcode == OpCode::Jmpc {
                    self.condition(instr)
                } else {
                    let expected = instr.num_instructions() & 1 == 0;
                    self.bool_uniform(instr.bool_uniform_id(), expected)
                };
                let taken = self.builder.create_block();
                let next = self.builder.create_block();
                self.builder.ins().brif(condition, taken, &[], next, &[]);

                self.builder.switch_to_block(taken);
                self.step_check();
                let target = self.labels[instr.dest_offset() as usize];
                self.builder.ins().jump(target, &[]);

                self.builder.switch_to_block(next);
            }
            OpCode::Call | OpCode::Callc | OpCode::Callu => {
                let condition = match opcode {
                    OpCode::Call => None,
                    OpCode::Callc => Some(self.condition(instr)),
                    _ => Some(self.bool_uniform(instr.bool_uniform_id(), true)),
                };
                self.compile_call(pc, instr, condition)?;
            }
            OpCode::Ifu | OpCode::Ifc => {
                let condition = if opcode == OpCode::Ifu {
                    self.bool_uniform(instr.bool_uniform_id(), true)
                } else {
                    self.condition(instr)
                };
                self.compile_if(instr, condition)?;
            }
            OpCode::Loop => self.compile_loop(pc, instr)?,
            OpCode::Emit => {
                self.builder
                    .ins()
                    .call(self.helpers.emit, &[self.frame, self.state]);
            }
            OpCode::SetEmit => {
                let vertex_id = self.builder.ins().iconst(types::I32, instr.emit_vertex_id() as i64);
                let prim = self.builder.ins().iconst(types::I32, instr.emit_prim() as i64);
                let winding = self.builder.ins().iconst(types::I32, instr.emit_winding() as i64);
                self.builder.ins().call(
                    self.helpers.set_emit,
                    &[self.frame, vertex_id, prim, winding],
                );
            }
            OpCode::Unknown(op) => {
                tracing::warn!("Compiling unknown shader opcode 0x{:02x} at pc 0x{:03x} as NOP", op, pc);
            }
        }
        Ok(())
    }

    fn compile_call(
        &mut self,
        pc: u32,
        instr: Instruction,
        condition: Option<Value>,
    ) -> Result<(), ShaderError> {
        let site = *self
            .analysis
            .site_of_pc
            .get(&pc)
            .ok_or_else(|| ShaderError::Backend(format!("no call site recorded at 0x{pc:03x}")))?;
        let return_offset = self.analysis.call_sites[site].return_offset;

        if let Some(condition) = condition {
            let call = self.builder.create_block();
            let next = self.labels[pc as usize + 1];
            self.builder.ins().brif(condition, call, &[], next, &[]);
            self.builder.switch_to_block(call);
        }

        self.push_control();
        let depth = self.load_i32(self.frame, FRAME_DEPTH);
        let full = self.builder.ins().icmp_imm(
            IntCC::UnsignedGreaterThanOrEqual,
            depth,
            MAX_CONTROL_DEPTH as i64,
        );
        let push = self.builder.create_block();
        self.builder
            .ins()
            .brif(full, self.control_overflow, &[], push, &[]);

        self.builder.switch_to_block(push);
        let entry = self.call_stack_entry(depth);
        let return_offset = self.builder.ins().iconst(types::I32, return_offset as i64);
        let site = self.builder.ins().iconst(types::I32, site as i64);
        self.builder
            .ins()
            .store(self.flags, return_offset, entry, FRAME_STACK);
        self.builder
            .ins()
            .store(self.flags, site, entry, FRAME_STACK + 4);
        let depth = self.builder.ins().iadd_imm(depth, 1);
        self.builder
            .ins()
            .store(self.flags, depth, self.frame, FRAME_DEPTH);

        self.step_check();
        let target = self.labels[instr.dest_offset() as usize];
        self.builder.ins().jump(target, &[]);
        self.terminated = true;
        Ok(())
    }

    fn compile_if(&mut self, instr: Instruction, condition: Value) -> Result<(), ShaderError> {
        let dest = instr.dest_offset();
        let num = instr.num_instructions();

        let then_block = self.builder.create_block();
        let end_block = self.builder.create_block();
        let else_block = if num > 0 {
            Some(self.builder.create_block())
        } else {
            None
        };

        self.push_control();
        self.builder.ins().brif(
            condition,
            then_block,
            &[],
            else_block.unwrap_or(end_block),
            &[],
        );

        self.builder.switch_to_block(then_block);
        self.terminated = false;
        self.compile_block(dest)?;

        if let Some(else_block) = else_block {
            if !self.terminated {
                self.builder.ins().jump(end_block, &[]);
            }
            self.builder.switch_to_block(else_block);
            self.terminated = false;
            self.compile_block(dest + num)?;
        }

        if !self.terminated {
            self.builder.ins().jump(end_block, &[]);
        }
        self.builder.switch_to_block(end_block);
        self.terminated = false;
        self.pop_control();
        Ok(())
    }

    fn compile_loop(&mut self, pc: u32, instr: Instruction) -> Result<(), ShaderError> {
        let index = *self
            .analysis
            .loop_of_pc
            .get(&pc)
            .ok_or_else(|| ShaderError::Backend(format!("no loop recorded at 0x{pc:03x}")))?;
        let counter_offset = FRAME_LOOPS + index as i32 * 4;
        let uniform = UNIFORM_I + instr.int_uniform_id() as i32 * 4;

        let start = self.load_u8(self.uniforms, uniform + 1);
        self.builder
            .ins()
            .store(self.flags, start, self.state, STATE_ADDRESS + 8);
        let count = self.load_u8(self.uniforms, uniform);
        self.builder
            .ins()
            .store(self.flags, count, self.frame, counter_offset);
        let depth_offset = FRAME_LOOP_DEPTHS + index as i32 * 4;
        let depth = self.load_i32(self.frame, FRAME_CONTROL_DEPTH);
        self.builder
            .ins()
            .store(self.flags, depth, self.frame, depth_offset);
        self.push_control();

        let body = self.builder.create_block();
        let exit = self.builder.create_block();
        self.builder.ins().jump(body, &[]);
        self.builder.switch_to_block(body);
        self.terminated = false;

        self.loop_exits.push(exit);
        let result = self.compile_block(instr.dest_offset() + 1);
        self.loop_exits.pop();
        result?;

        if !self.terminated {
            let increment = self.load_u8(self.uniforms, uniform + 2);
            let al = self.load_i32(self.state, STATE_ADDRESS + 8);
            let al = self.builder.ins().iadd(al, increment);
            self.builder
                .ins()
                .store(self.flags, al, self.state, STATE_ADDRESS + 8);

            let counter = self.load_i32(self.frame, counter_offset);
            let again = self.builder.create_block();
            self.builder.ins().brif(counter, again, &[], exit, &[]);

            self.builder.switch_to_block(again);
            let counter = self.builder.ins().iadd_imm(counter, -1);
            self.builder
                .ins()
                .store(self.flags, counter, self.frame, counter_offset);
            self.step_check();
            self.builder.ins().jump(body, &[]);
        }

        self.builder.switch_to_block(exit);
        self.terminated = false;
        let depth = self.load_i32(self.frame, depth_offset);
        self.builder
            .ins()
            .store(self.flags, depth, self.frame, FRAME_CONTROL_DEPTH);
        Ok(())
    }

    fn compile_arithmetic(&mut self, instr: Instruction, opcode: OpCode, pattern: SwizzlePattern) {
        let inverted = opcode.is_inverted();
        let relative = instr.address_register_index();
        let src1 = self.load_source(instr.src1(inverted), if inverted { 0 } else { relative }, pattern, 1);
        let src2 = self.load_source(instr.src2(inverted), if inverted { relative } else { 0 }, pattern, 2);

        let result = match opcode {
            OpCode::Add => std::array::from_fn(|i| self.builder.ins().fadd(src1[i], src2[i])),
            OpCode::Mul => std::array::from_fn(|i| self.mul(src1[i], src2[i])),
            OpCode::Flr => src1.map(|c| self.builder.ins().floor(c)),
            OpCode::Max => std::array::from_fn(|i| self.select_cmp(FloatCC::GreaterThan, src1[i], src2[i])),
            OpCode::Min => std::array::from_fn(|i| self.select_cmp(FloatCC::LessThan, src1[i], src2[i])),
            OpCode::Dp3 => [self.dot(&src1, &src2, 3); 4],
            OpCode::Dp4 => [self.dot(&src1, &src2, 4); 4],
            OpCode::Dph | OpCode::Dphi => {
                let mut src1 = src1;
                src1[3] = self.builder.ins().f32const(1.0);
                [self.dot(&src1, &src2, 4); 4]
            }
            OpCode::Dst | OpCode::Dsti => {
                let one = self.builder.ins().f32const(1.0);
                let y = self.mul(src1[1], src2[1]);
                [one, y, src1[2], src2[3]]
            }
            OpCode::Rcp => {
                let one = self.builder.ins().f32const(1.0);
                [self.builder.ins().fdiv(one, src1[0]); 4]
            }
            OpCode::Rsq => {
                let one = self.builder.ins().f32const(1.0);
                let root = self.builder.ins().sqrt(src1[0]);
                [self.builder.ins().fdiv(one, root); 4]
            }
            OpCode::Ex2 => [self.call_unary(self.helpers.exp2, src1[0]); 4],
            OpCode::Lg2 => [self.call_unary(self.helpers.log2, src1[0]); 4],
            OpCode::Sge | OpCode::Sgei => {
                std::array::from_fn(|i| self.set_if(FloatCC::GreaterThanOrEqual, src1[i], src2[i]))
            }
            OpCode::Slt | OpCode::Slti => {
                std::array::from_fn(|i| self.set_if(FloatCC::LessThan, src1[i], src2[i]))
            }
            OpCode::Mov => src1,
            OpCode::Mova => {
                for (i, &component) in src1.iter().take(2).enumerate() {
                    if pattern.dest_component_enabled(i) {
                        let value = self.builder.ins().fcvt_to_sint_sat(types::I32, component);
                        self.builder.ins().store(
                            self.flags,
                            value,
                            self.state,
                            STATE_ADDRESS + i as i32 * 4,
                        );
                    }
                }
                return;
            }
            OpCode::Cmp => {
                for (i, op) in [instr.compare_x(), instr.compare_y()].into_iter().enumerate() {
                    let flag = match float_cc(op) {
                        Some(cc) => self.builder.ins().fcmp(cc, src1[i], src2[i]),
                        None => self.builder.ins().iconst(types::I8, 0),
                    };
                    self.builder
                        .ins()
                        .store(self.flags, flag, self.state, STATE_CONDITION + i as i32);
                }
                return;
            }
            _ => return,
        };

        self.store_dest(instr.dest(), pattern, result);
    }

    fn compile_mad(&mut self, instr: Instruction, inverted: bool, pattern: SwizzlePattern) {
        let relative = instr.address_register_index();
        let src1 = self.load_source(instr.mad_src1(), 0, pattern, 1);
        let src2 = self.load_source(
            instr.mad_src2(inverted),
            if inverted { 0 } else { relative },
            pattern,
            2,
        );
        let src3 = self.load_source(
            instr.mad_src3(inverted),
            if inverted { relative } else { 0 },
            pattern,
            3,
        );
        let result = std::array::from_fn(|i| {
            let product = self.mul(src1[i], src2[i]);
            self.builder.ins().fadd(product, src3[i])
        });
        self.store_dest(instr.mad_dest(), pattern, result);
    }

    fn load_source(
        &mut self,
        reg: SourceRegister,
        address_register: usize,
        pattern: SwizzlePattern,
        src: usize,
    ) -> [Value; 4] {
        let raw = match reg {
            SourceRegister::Input(i) => self.load_vec4(self.state, STATE_INPUT + i as i32 * VEC4_SIZE),
            SourceRegister::Temporary(i) => {
                self.load_vec4(self.state, STATE_TEMPORARY + i as i32 * VEC4_SIZE)
            }
            SourceRegister::FloatUniform(i) if address_register == 0 => {
                self.load_vec4(self.uniforms, UNIFORM_F + i as i32 * VEC4_SIZE)
            }
            SourceRegister::FloatUniform(i) => self.load_relative_uniform(i, address_register),
        };

        let selected = pattern.selectors(src).map(|s| raw[s]);
        if pattern.negate(src) {
            selected.map(|c| self.builder.ins().fneg(c))
        } else {
            selected
        }
    }

    fn load_relative_uniform(&mut self, base: u8, address_register: usize) -> [Value; 4] {
        let offset = self.load_i32(self.state, STATE_ADDRESS + (address_register as i32 - 1) * 4);
        let index = self.builder.ins().iadd_imm(offset, base as i64);
        let in_range =
            self.builder
                .ins()
                .icmp_imm(IntCC::UnsignedLessThan, index, NUM_FLOAT_UNIFORMS as i64);
        let zero = self.builder.ins().iconst(types::I32, 0);
        let clamped = self.builder.ins().select(in_range, index, zero);
        let byte_offset = self.builder.ins().imul_imm(clamped, VEC4_SIZE as i64);
        let byte_offset = self.to_pointer(byte_offset);
        let address = self.builder.ins().iadd(self.uniforms, byte_offset);

        let values = self.load_vec4(address, UNIFORM_F);
        let one = self.builder.ins().f32const(1.0);
        values.map(|v| self.builder.ins().select(in_range, v, one))
    }

    fn store_dest(&mut self, dest: DestRegister, pattern: SwizzlePattern, result: [Value; 4]) {
        let base = match dest {
            DestRegister::Output(i) => STATE_OUTPUT + i as i32 * VEC4_SIZE,
            DestRegister::Temporary(i) => STATE_TEMPORARY + i as i32 * VEC4_SIZE,
        };
        for (i, &value) in result.iter().enumerate() {
            if pattern.dest_component_enabled(i) {
                self.builder
                    .ins()
                    .store(self.flags, value, self.state, base + i as i32 * 4);
            }
        }
    }

    /// `a * b`, where a NaN produced from non-NaN inputs becomes zero
    fn mul(&mut self, a: Value, b: Value) -> Value {
        let product = self.builder.ins().fmul(a, b);
        let product_nan = self.builder.ins().fcmp(FloatCC::Unordered, product, product);
        let a_ok = self.builder.ins().fcmp(FloatCC::Ordered, a, a);
        let b_ok = self.builder.ins().fcmp(FloatCC::Ordered, b, b);
        let inputs_ok = self.builder.ins().band(a_ok, b_ok);
        let flush = self.builder.ins().band(product_nan, inputs_ok);
        let zero = self.builder.ins().f32const(0.0);
        self.builder.ins().select(flush, zero, product)
    }

    fn dot(&mut self, a: &[Value; 4], b: &[Value; 4], components: usize) -> Value {
        let mut sum = self.builder.ins().f32const(0.0);
        for i in 0..components {
            let product = self.mul(a[i], b[i]);
            sum = self.builder.ins().fadd(sum, product);
        }
        sum
    }

    fn select_cmp(&mut self, cc: FloatCC, a: Value, b: Value) -> Value {
        let condition = self.builder.ins().fcmp(cc, a, b);
        self.builder.ins().select(condition, a, b)
    }

    fn set_if(&mut self, cc: FloatCC, a: Value, b: Value) -> Value {
        let condition = self.builder.ins().fcmp(cc, a, b);
        let one = self.builder.ins().f32const(1.0);
        let zero = self.builder.ins().f32const(0.0);
        self.builder.ins().select(condition, one, zero)
    }

    fn call_unary(&mut self, func: FuncRef, x: Value) -> Value {
        let call = self.builder.ins().call(func, &[x]);
        self.builder.inst_results(call)[0]
    }

    fn condition(&mut self, instr: Instruction) -> Value {
        let cc_x = self.load_u8(self.state, STATE_CONDITION);
        let cc_y = self.load_u8(self.state, STATE_CONDITION + 1);
        let x = self
            .builder
            .ins()
            .icmp_imm(IntCC::Equal, cc_x, instr.refx() as i64);
        let y = self
            .builder
            .ins()
            .icmp_imm(IntCC::Equal, cc_y, instr.refy() as i64);
        match instr.condition_op() {
            ConditionOp::Or => self.builder.ins().bor(x, y),
            ConditionOp::And => self.builder.ins().band(x, y),
            ConditionOp::JustX => x,
            ConditionOp::JustY => y,
        }
    }

    fn bool_uniform(&mut self, id: usize, expected: bool) -> Value {
        let value = self.load_u8(self.uniforms, UNIFORM_B + id as i32);
        let cc = if expected { IntCC::NotEqual } else { IntCC::Equal };
        self.builder.ins().icmp_imm(cc, value, 0)
    }

    /// Continue in a fresh block when `condition` is false
    fn branch_if(&mut self, condition: Value, taken: Block) {
        let next = self.builder.create_block();
        self.builder.ins().brif(condition, taken, &[], next, &[]);
        self.builder.switch_to_block(next);
    }

    /// Open a call, conditional or loop, leaving through the overflow exit
    /// when the control stack is full
    fn push_control(&mut self) {
        let depth = self.load_i32(self.frame, FRAME_CONTROL_DEPTH);
        let full = self.builder.ins().icmp_imm(
            IntCC::UnsignedGreaterThanOrEqual,
            depth,
            MAX_CONTROL_DEPTH as i64,
        );
        let push = self.builder.create_block();
        self.builder
            .ins()
            .brif(full, self.control_overflow, &[], push, &[]);
        self.builder.switch_to_block(push);
        let depth = self.builder.ins().iadd_imm(depth, 1);
        self.builder
            .ins()
            .store(self.flags, depth, self.frame, FRAME_CONTROL_DEPTH);
    }

    /// Close the innermost region. Saturates for code entered mid-region.
    fn pop_control(&mut self) {
        let depth = self.load_i32(self.frame, FRAME_CONTROL_DEPTH);
        let lowered = self.builder.ins().iadd_imm(depth, -1);
        let empty = self.builder.ins().icmp_imm(IntCC::Equal, depth, 0);
        let depth = self.builder.ins().select(empty, depth, lowered);
        self.builder
            .ins()
            .store(self.flags, depth, self.frame, FRAME_CONTROL_DEPTH);
    }

    fn step_check(&mut self) {
        let steps = self.load_i32(self.frame, FRAME_STEPS);
        let ok = self.builder.create_block();
        self.builder.ins().brif(steps, ok, &[], self.step_limit, &[]);
        self.builder.switch_to_block(ok);
        let steps = self.builder.ins().iadd_imm(steps, -1);
        self.builder
            .ins()
            .store(self.flags, steps, self.frame, FRAME_STEPS);
    }

    fn call_stack_entry(&mut self, depth: Value) -> Value {
        let offset = self.builder.ins().imul_imm(depth, 8);
        let offset = self.to_pointer(offset);
        self.builder.ins().iadd(self.frame, offset)
    }

    fn to_pointer(&mut self, value: Value) -> Value {
        if self.ptr == types::I32 {
            value
        } else {
            self.builder.ins().uextend(self.ptr, value)
        }
    }

    fn load_vec4(&mut self, base: Value, offset: i32) -> [Value; 4] {
        std::array::from_fn(|c| {
            self.builder
                .ins()
                .load(types::F32, self.flags, base, offset + c as i32 * 4)
        })
    }

    fn load_i32(&mut self, base: Value, offset: i32) -> Value {
        self.builder.ins().load(types::I32, self.flags, base, offset)
    }

    fn load_u8(&mut self, base: Value, offset: i32) -> Value {
        self.builder.ins().uload8(types::I32, self.flags, base, offset)
    }

    fn return_status(&mut self, status: i64) {
        let value = self.builder.ins().iconst(types::I32, status);
        self.builder.ins().return_(&[value]);
        self.terminated = true;
    }

    fn status_block(&mut self, block: Block, status: i64) {
        self.builder.switch_to_block(block);
        self.return_status(status);
    }
}

fn float_cc(op: CompareOp) -> Option<FloatCC> {
    match op {
        CompareOp::Equal => Some(FloatCC::Equal),
        CompareOp::NotEqual => Some(FloatCC::NotEqual),
        CompareOp::LessThan => Some(FloatCC::LessThan),
        CompareOp::LessEqual => Some(FloatCC::LessThanOrEqual),
        CompareOp::GreaterThan => Some(FloatCC::GreaterThan),
        CompareOp::GreaterEqual => Some(FloatCC::GreaterThanOrEqual),
        CompareOp::Unknown(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::ShaderBuilder;

    #[test]
    fn test_analyze_call_sites() {
        let mut b = ShaderBuilder::new();
        let call = b.call_placeholder();
        b.end();
        b.nop();
        b.nop();
        b.patch_call(call, 2, 2);
        let program = b.finish().unwrap();

        let analysis = analyze(&program.code).unwrap();
        assert_eq!(analysis.call_sites.len(), 1);
        assert_eq!(analysis.site_of_pc[&0], 0);
        assert!(analysis.return_offsets.contains(&4));
    }

    #[test]
    fn test_analyze_rejects_call_outside_program() {
        let mut b = ShaderBuilder::new();
        let call = b.call_placeholder();
        b.end();
        b.patch_call(call, 1, 8);
        let program = b.finish().unwrap();

        let err = analyze(&program.code).unwrap_err();
        assert!(matches!(err, ShaderError::InvalidFlowControl { pc: 0, .. }));
    }

    #[test]
    fn test_analyze_numbers_loops() {
        let mut b = ShaderBuilder::new();
        let outer = b.loop_start(0);
        let inner = b.loop_start(1);
        b.nop();
        b.loop_end(inner);
        b.loop_end(outer);
        b.end();
        let program = b.finish().unwrap();

        let analysis = analyze(&program.code).unwrap();
        assert_eq!(analysis.loop_of_pc.len(), 2);
        assert_eq!(analysis.loop_of_pc[&0], 0);
        assert_eq!(analysis.loop_of_pc[&1], 1);
    }
}
