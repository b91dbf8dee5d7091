//! Offline shader assembler
//!
//! Builds encoded PICA programs from typed operands. Swizzle patterns are
//! interned into the operand descriptor table, which holds at most 128
//! entries (32 for descriptors used by MAD).

use op_core::ShaderError;

use crate::bytecode::{
    CompareOp, ConditionOp, DestRegister, OpCode, SourceRegister, MAX_PROGRAM_CODE_LENGTH,
};
use crate::fixup::END_INSTRUCTION;
use crate::setup::ShaderSetup;

/// Capacity of the operand descriptor table addressable by common instructions
pub const SWIZZLE_TABLE_CAPACITY: usize = 128;
/// Capacity addressable by MAD/MADI
pub const MAD_SWIZZLE_TABLE_CAPACITY: usize = 32;

fn parse_selector(text: &str) -> u32 {
    let mut selector = 0u32;
    let mut last = 0u32;
    for i in 0..4 {
        let component = match text.as_bytes().get(i) {
            Some(b'x') => 0,
            Some(b'y') => 1,
            Some(b'z') => 2,
            Some(b'w') => 3,
            // Short swizzles repeat their last component
            _ => last,
        };
        last = component;
        selector |= component << (6 - 2 * i as u32);
    }
    selector
}

fn parse_mask(text: &str) -> u32 {
    text.bytes().fold(0, |mask, c| match c {
        b'x' => mask | 0x8,
        b'y' => mask | 0x4,
        b'z' => mask | 0x2,
        b'w' => mask | 0x1,
        _ => mask,
    })
}

/// Source operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Src {
    pub reg: SourceRegister,
    pub selector: u32,
    pub negate: bool,
    /// Address register: 1 a0.x, 2 a0.y, 3 aL
    pub relative: u32,
}

impl Src {
    fn new(reg: SourceRegister) -> Self {
        Self {
            reg,
            selector: 0b00_01_10_11,
            negate: false,
            relative: 0,
        }
    }

    pub fn input(index: u8) -> Self {
        Self::new(SourceRegister::Input(index))
    }

    pub fn temp(index: u8) -> Self {
        Self::new(SourceRegister::Temporary(index))
    }

    pub fn uniform(index: u8) -> Self {
        Self::new(SourceRegister::FloatUniform(index))
    }

    /// Component selection, e.g. "wzyx" or "x"
    pub fn swizzle(mut self, components: &str) -> Self {
        self.selector = parse_selector(components);
        self
    }

    pub fn negate(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    /// Offset the register index by an address register
    pub fn relative(mut self, address_register: u32) -> Self {
        self.relative = address_register & 3;
        self
    }

    fn is_narrow(&self) -> bool {
        !matches!(self.reg, SourceRegister::FloatUniform(_)) && self.relative == 0
    }
}

/// Destination operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dst {
    pub reg: DestRegister,
    pub mask: u32,
}

impl Dst {
    pub fn output(index: u8) -> Self {
        Self {
            reg: DestRegister::Output(index),
            mask: 0xF,
        }
    }

    pub fn temp(index: u8) -> Self {
        Self {
            reg: DestRegister::Temporary(index),
            mask: 0xF,
        }
    }

    /// Write mask, e.g. "xy"
    pub fn mask(mut self, components: &str) -> Self {
        self.mask = parse_mask(components);
        self
    }
}

/// Assembled program
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderProgram {
    pub code: Vec<u32>,
    pub swizzle: Vec<u32>,
}

impl ShaderProgram {
    /// Write the program and swizzle table into a shader setup
    pub fn load_into(&self, setup: &mut ShaderSetup) {
        setup.load_program(&self.code, &self.swizzle);
    }
}

/// Open IF block
#[derive(Debug, Clone, Copy)]
pub struct IfLabel {
    at: usize,
    else_start: Option<u32>,
}

/// Open LOOP block
#[derive(Debug, Clone, Copy)]
pub struct LoopLabel {
    at: usize,
}

/// Instruction stream builder
#[derive(Debug, Default)]
pub struct ShaderBuilder {
    code: Vec<u32>,
    swizzle: Vec<u32>,
}

impl ShaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the next instruction
    pub fn position(&self) -> u32 {
        self.code.len() as u32
    }

    fn push(&mut self, word: u32) -> usize {
        self.code.push(word);
        self.code.len() - 1
    }

    fn intern(&mut self, pattern: u32, limit: usize) -> Result<u32, ShaderError> {
        if let Some(index) = self.swizzle[..self.swizzle.len().min(limit)]
            .iter()
            .position(|&p| p == pattern)
        {
            return Ok(index as u32);
        }
        if self.swizzle.len() >= limit {
            return Err(ShaderError::SwizzleTableFull { capacity: limit });
        }
        self.swizzle.push(pattern);
        Ok(self.swizzle.len() as u32 - 1)
    }

    fn pattern(dst_mask: u32, srcs: [Option<&Src>; 3]) -> u32 {
        let mut pattern = dst_mask & 0xF;
        let shifts = [(4, 5), (13, 14), (22, 23)];
        for (src, (neg_shift, sel_shift)) in srcs.iter().zip(shifts) {
            if let Some(src) = src {
                pattern |= (src.negate as u32) << neg_shift;
                pattern |= src.selector << sel_shift;
            } else {
                pattern |= 0b00_01_10_11 << sel_shift;
            }
        }
        pattern
    }

    fn common(
        &mut self,
        opcode: OpCode,
        dst: Dst,
        src1: Src,
        src2: Src,
    ) -> Result<(), ShaderError> {
        let inverted_op = match opcode {
            OpCode::Dph => Some(OpCode::Dphi),
            OpCode::Dst => Some(OpCode::Dsti),
            OpCode::Sge => Some(OpCode::Sgei),
            OpCode::Slt => Some(OpCode::Slti),
            _ => None,
        };

        let (opcode, inverted) = if src2.is_narrow() {
            (opcode, false)
        } else if let (Some(inv), true) = (inverted_op, src1.is_narrow()) {
            (inv, true)
        } else {
            return Err(ShaderError::InvalidOperand(format!(
                "{} cannot take {} as second operand",
                opcode.mnemonic(),
                src2.reg
            )));
        };

        let wide = if inverted { &src2 } else { &src1 };
        let narrow = if inverted { &src1 } else { &src2 };
        if !narrow.is_narrow() {
            return Err(ShaderError::InvalidOperand(format!(
                "{} operands cannot both be uniforms",
                opcode.mnemonic()
            )));
        }

        let desc = self.intern(
            Self::pattern(dst.mask, [Some(&src1), Some(&src2), None]),
            SWIZZLE_TABLE_CAPACITY,
        )?;
        let mut word = (opcode.encoding() << 26)
            | (dst.reg.to_raw() << 21)
            | (wide.relative << 19)
            | desc;
        if inverted {
            word |= (narrow.reg.to_raw() << 14) | (wide.reg.to_raw() << 7);
        } else {
            word |= (wide.reg.to_raw() << 12) | (narrow.reg.to_raw() << 7);
        }
        self.push(word);
        Ok(())
    }

    fn unary(&mut self, opcode: OpCode, dst: Dst, src: Src) -> Result<(), ShaderError> {
        self.common(opcode, dst, src, Src::temp(0))
    }

    pub fn add(&mut self, dst: Dst, src1: Src, src2: Src) -> Result<(), ShaderError> {
        self.common(OpCode::Add, dst, src1, src2)
    }

    pub fn mul(&mut self, dst: Dst, src1: Src, src2: Src) -> Result<(), ShaderError> {
        self.common(OpCode::Mul, dst, src1, src2)
    }

    pub fn dp3(&mut self, dst: Dst, src1: Src, src2: Src) -> Result<(), ShaderError> {
        self.common(OpCode::Dp3, dst, src1, src2)
    }

    pub fn dp4(&mut self, dst: Dst, src1: Src, src2: Src) -> Result<(), ShaderError> {
        self.common(OpCode::Dp4, dst, src1, src2)
    }

    pub fn dph(&mut self, dst: Dst, src1: Src, src2: Src) -> Result<(), ShaderError> {
        self.common(OpCode::Dph, dst, src1, src2)
    }

    pub fn dst(&mut self, dst: Dst, src1: Src, src2: Src) -> Result<(), ShaderError> {
        self.common(OpCode::Dst, dst, src1, src2)
    }

    pub fn max(&mut self, dst: Dst, src1: Src, src2: Src) -> Result<(), ShaderError> {
        self.common(OpCode::Max, dst, src1, src2)
    }

    pub fn min(&mut self, dst: Dst, src1: Src, src2: Src) -> Result<(), ShaderError> {
        self.common(OpCode::Min, dst, src1, src2)
    }

    pub fn sge(&mut self, dst: Dst, src1: Src, src2: Src) -> Result<(), ShaderError> {
        self.common(OpCode::Sge, dst, src1, src2)
    }

    pub fn slt(&mut self, dst: Dst, src1: Src, src2: Src) -> Result<(), ShaderError> {
        self.common(OpCode::Slt, dst, src1, src2)
    }

    pub fn mov(&mut self, dst: Dst, src: Src) -> Result<(), ShaderError> {
        self.unary(OpCode::Mov, dst, src)
    }

    /// Load a0.x / a0.y from the components enabled in the mask
    pub fn mova(&mut self, dst: Dst, src: Src) -> Result<(), ShaderError> {
        self.unary(OpCode::Mova, dst, src)
    }

    pub fn flr(&mut self, dst: Dst, src: Src) -> Result<(), ShaderError> {
        self.unary(OpCode::Flr, dst, src)
    }

    pub fn rcp(&mut self, dst: Dst, src: Src) -> Result<(), ShaderError> {
        self.unary(OpCode::Rcp, dst, src)
    }

    pub fn rsq(&mut self, dst: Dst, src: Src) -> Result<(), ShaderError> {
        self.unary(OpCode::Rsq, dst, src)
    }

    pub fn ex2(&mut self, dst: Dst, src: Src) -> Result<(), ShaderError> {
        self.unary(OpCode::Ex2, dst, src)
    }

    pub fn lg2(&mut self, dst: Dst, src: Src) -> Result<(), ShaderError> {
        self.unary(OpCode::Lg2, dst, src)
    }

    /// `dst = src1 * src2 + src3`; either src2 or src3 may be a uniform
    pub fn mad(&mut self, dst: Dst, src1: Src, src2: Src, src3: Src) -> Result<(), ShaderError> {
        if !src1.is_narrow() {
            return Err(ShaderError::InvalidOperand(
                "mad first operand must be an input or temporary".to_string(),
            ));
        }
        let (opcode, wide, inverted) = if src3.is_narrow() {
            (OpCode::Mad, &src2, false)
        } else if src2.is_narrow() {
            (OpCode::Madi, &src3, true)
        } else {
            return Err(ShaderError::InvalidOperand(
                "mad operands cannot both be uniforms".to_string(),
            ));
        };

        let desc = self.intern(
            Self::pattern(dst.mask, [Some(&src1), Some(&src2), Some(&src3)]),
            MAD_SWIZZLE_TABLE_CAPACITY,
        )?;
        let mut word = (opcode.encoding() << 26)
            | (dst.reg.to_raw() << 24)
            | (wide.relative << 22)
            | (src1.reg.to_raw() << 17)
            | desc;
        if inverted {
            word |= (src2.reg.to_raw() << 12) | (src3.reg.to_raw() << 5);
        } else {
            word |= (src2.reg.to_raw() << 10) | (src3.reg.to_raw() << 5);
        }
        self.push(word);
        Ok(())
    }

    /// Set the conditional code from two component comparisons
    pub fn cmp(
        &mut self,
        src1: Src,
        x: CompareOp,
        y: CompareOp,
        src2: Src,
    ) -> Result<(), ShaderError> {
        if !src2.is_narrow() {
            return Err(ShaderError::InvalidOperand(
                "cmp second operand must be an input or temporary".to_string(),
            ));
        }
        let desc = self.intern(
            Self::pattern(0, [Some(&src1), Some(&src2), None]),
            SWIZZLE_TABLE_CAPACITY,
        )?;
        let word = (OpCode::Cmp.encoding() << 26)
            | (x.to_raw() << 24)
            | (y.to_raw() << 21)
            | (src1.relative << 19)
            | (src1.reg.to_raw() << 12)
            | (src2.reg.to_raw() << 7)
            | desc;
        self.push(word);
        Ok(())
    }

    pub fn nop(&mut self) {
        self.push(OpCode::Nop.encoding() << 26);
    }

    pub fn end(&mut self) {
        self.push(END_INSTRUCTION);
    }

    pub fn emit(&mut self) {
        self.push(OpCode::Emit.encoding() << 26);
    }

    pub fn setemit(&mut self, vertex_id: u32, prim_emit: bool, winding: bool) {
        self.push(
            (OpCode::SetEmit.encoding() << 26)
                | ((vertex_id & 3) << 24)
                | ((prim_emit as u32) << 23)
                | ((winding as u32) << 22),
        );
    }

    fn condition_bits(op: ConditionOp, refx: bool, refy: bool) -> u32 {
        let op = match op {
            ConditionOp::Or => 0,
            ConditionOp::And => 1,
            ConditionOp::JustX => 2,
            ConditionOp::JustY => 3,
        };
        (op << 22) | ((refy as u32) << 24) | ((refx as u32) << 25)
    }

    fn flow(opcode: OpCode, dest: u32, num: u32) -> u32 {
        (opcode.encoding() << 26) | ((dest & 0xFFF) << 10) | (num & 0xFF)
    }

    /// Leave the innermost loop
    pub fn brk(&mut self) {
        self.push(OpCode::Break.encoding() << 26);
    }

    /// Leave the innermost loop if the condition holds
    pub fn breakc(&mut self, op: ConditionOp, refx: bool, refy: bool) {
        self.push(Self::flow(OpCode::Breakc, 0, 0) | Self::condition_bits(op, refx, refy));
    }

    /// Begin a loop over integer uniform `int_id`
    pub fn loop_start(&mut self, int_id: u32) -> LoopLabel {
        let at = self.push(Self::flow(OpCode::Loop, 0, 0) | ((int_id & 3) << 22));
        LoopLabel { at }
    }

    /// Close a loop; the last emitted instruction ends the body
    pub fn loop_end(&mut self, label: LoopLabel) {
        let last = self.position().saturating_sub(1);
        self.code[label.at] |= (last & 0xFFF) << 10;
    }

    /// Begin a block conditional on boolean uniform `bool_id`
    pub fn ifu(&mut self, bool_id: u32) -> IfLabel {
        let at = self.push(Self::flow(OpCode::Ifu, 0, 0) | ((bool_id & 0xF) << 22));
        IfLabel {
            at,
            else_start: None,
        }
    }

    /// Begin a block conditional on the conditional code
    pub fn ifc(&mut self, op: ConditionOp, refx: bool, refy: bool) -> IfLabel {
        let at = self.push(Self::flow(OpCode::Ifc, 0, 0) | Self::condition_bits(op, refx, refy));
        IfLabel {
            at,
            else_start: None,
        }
    }

    /// Switch to the else branch
    pub fn else_(&mut self, label: IfLabel) -> IfLabel {
        IfLabel {
            at: label.at,
            else_start: Some(self.position()),
        }
    }

    /// Close an IF block
    pub fn end_if(&mut self, label: IfLabel) {
        let end = self.position();
        let (dest, num) = match label.else_start {
            Some(start) => (start, end - start),
            None => (end, 0),
        };
        self.code[label.at] |= ((dest & 0xFFF) << 10) | (num & 0xFF);
    }

    /// CALL with target filled in later by [`Self::patch_call`]
    pub fn call_placeholder(&mut self) -> usize {
        self.push(Self::flow(OpCode::Call, 0, 0))
    }

    /// CALLU taken when boolean uniform `bool_id` is set
    pub fn callu_placeholder(&mut self, bool_id: u32) -> usize {
        self.push(Self::flow(OpCode::Callu, 0, 0) | ((bool_id & 0xF) << 22))
    }

    /// CALLC taken when the condition holds
    pub fn callc_placeholder(&mut self, op: ConditionOp, refx: bool, refy: bool) -> usize {
        self.push(Self::flow(OpCode::Callc, 0, 0) | Self::condition_bits(op, refx, refy))
    }

    /// Point a call at `target`, returning after `num` instructions
    pub fn patch_call(&mut self, at: usize, target: u32, num: u32) {
        self.code[at] |= ((target & 0xFFF) << 10) | (num & 0xFF);
    }

    /// JMPC with target filled in later by [`Self::patch_jump`]
    pub fn jmpc_placeholder(&mut self, op: ConditionOp, refx: bool, refy: bool) -> usize {
        self.push(Self::flow(OpCode::Jmpc, 0, 0) | Self::condition_bits(op, refx, refy))
    }

    /// JMPU taken when boolean uniform `bool_id` equals `when`
    pub fn jmpu_placeholder(&mut self, bool_id: u32, when: bool) -> usize {
        self.push(Self::flow(OpCode::Jmpu, 0, (!when) as u32) | ((bool_id & 0xF) << 22))
    }

    pub fn patch_jump(&mut self, at: usize, target: u32) {
        self.code[at] |= (target & 0xFFF) << 10;
    }

    /// Produce the encoded program
    pub fn finish(self) -> Result<ShaderProgram, ShaderError> {
        if self.code.len() > MAX_PROGRAM_CODE_LENGTH {
            return Err(ShaderError::ProgramTooLarge(self.code.len()));
        }
        Ok(ShaderProgram {
            code: self.code,
            swizzle: self.swizzle,
        })
    }
}
