//! PICA shader bytecode decoding
//!
//! Instructions are 32-bit words. The opcode lives in the top six bits,
//! except for CMP (five bits) and MAD/MADI (three bits), whose remaining
//! opcode bits are reused as operand fields.

use std::fmt;

/// Number of words in the program code and swizzle data memories
pub const MAX_PROGRAM_CODE_LENGTH: usize = 4096;
pub const MAX_SWIZZLE_DATA_LENGTH: usize = 4096;

/// PICA shader opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Add,
    Dp3,
    Dp4,
    Dph,
    Dst,
    Ex2,
    Lg2,
    Litp,
    Mul,
    Sge,
    Slt,
    Flr,
    Max,
    Min,
    Rcp,
    Rsq,
    Mova,
    Mov,
    Dphi,
    Dsti,
    Sgei,
    Slti,
    Break,
    Nop,
    End,
    Breakc,
    Call,
    Callc,
    Callu,
    Ifu,
    Ifc,
    Loop,
    Emit,
    SetEmit,
    Jmpc,
    Jmpu,
    Cmp,
    Madi,
    Mad,
    Unknown(u32),
}

/// Instruction layout family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCodeType {
    /// Two-source arithmetic, one destination
    Arithmetic,
    /// Three-source multiply-add
    MultiplyAdd,
    /// Compare into the conditional code register
    Conditional,
    /// Branches, calls and loops
    FlowControl,
    /// Geometry shader vertex emission
    Emit,
    /// No operands
    Trivial,
    Unknown,
}

impl OpCode {
    /// Decode the opcode of an instruction word
    pub fn decode(word: u32) -> Self {
        let op = word >> 26;
        match op {
            0x00 => Self::Add,
            0x01 => Self::Dp3,
            0x02 => Self::Dp4,
            0x03 => Self::Dph,
            0x04 => Self::Dst,
            0x05 => Self::Ex2,
            0x06 => Self::Lg2,
            0x07 => Self::Litp,
            0x08 => Self::Mul,
            0x09 => Self::Sge,
            0x0A => Self::Slt,
            0x0B => Self::Flr,
            0x0C => Self::Max,
            0x0D => Self::Min,
            0x0E => Self::Rcp,
            0x0F => Self::Rsq,
            0x12 => Self::Mova,
            0x13 => Self::Mov,
            0x18 => Self::Dphi,
            0x19 => Self::Dsti,
            0x1A => Self::Sgei,
            0x1B => Self::Slti,
            0x20 => Self::Break,
            0x21 => Self::Nop,
            0x22 => Self::End,
            0x23 => Self::Breakc,
            0x24 => Self::Call,
            0x25 => Self::Callc,
            0x26 => Self::Callu,
            0x27 => Self::Ifu,
            0x28 => Self::Ifc,
            0x29 => Self::Loop,
            0x2A => Self::Emit,
            0x2B => Self::SetEmit,
            0x2C => Self::Jmpc,
            0x2D => Self::Jmpu,
            0x2E | 0x2F => Self::Cmp,
            0x30..=0x37 => Self::Madi,
            0x38..=0x3F => Self::Mad,
            _ => Self::Unknown(op),
        }
    }

    /// Six-bit encoding (the base value for CMP/MAD/MADI)
    pub fn encoding(self) -> u32 {
        match self {
            Self::Add => 0x00,
            Self::Dp3 => 0x01,
            Self::Dp4 => 0x02,
            Self::Dph => 0x03,
            Self::Dst => 0x04,
            Self::Ex2 => 0x05,
            Self::Lg2 => 0x06,
            Self::Litp => 0x07,
            Self::Mul => 0x08,
            Self::Sge => 0x09,
            Self::Slt => 0x0A,
            Self::Flr => 0x0B,
            Self::Max => 0x0C,
            Self::Min => 0x0D,
            Self::Rcp => 0x0E,
            Self::Rsq => 0x0F,
            Self::Mova => 0x12,
            Self::Mov => 0x13,
            Self::Dphi => 0x18,
            Self::Dsti => 0x19,
            Self::Sgei => 0x1A,
            Self::Slti => 0x1B,
            Self::Break => 0x20,
            Self::Nop => 0x21,
            Self::End => 0x22,
            Self::Breakc => 0x23,
            Self::Call => 0x24,
            Self::Callc => 0x25,
            Self::Callu => 0x26,
            Self::Ifu => 0x27,
            Self::Ifc => 0x28,
            Self::Loop => 0x29,
            Self::Emit => 0x2A,
            Self::SetEmit => 0x2B,
            Self::Jmpc => 0x2C,
            Self::Jmpu => 0x2D,
            Self::Cmp => 0x2E,
            Self::Madi => 0x30,
            Self::Mad => 0x38,
            Self::Unknown(op) => op,
        }
    }

    /// Layout family of the opcode
    pub fn kind(self) -> OpCodeType {
        match self {
            Self::Add
            | Self::Dp3
            | Self::Dp4
            | Self::Dph
            | Self::Dst
            | Self::Ex2
            | Self::Lg2
            | Self::Litp
            | Self::Mul
            | Self::Sge
            | Self::Slt
            | Self::Flr
            | Self::Max
            | Self::Min
            | Self::Rcp
            | Self::Rsq
            | Self::Mova
            | Self::Mov
            | Self::Dphi
            | Self::Dsti
            | Self::Sgei
            | Self::Slti => OpCodeType::Arithmetic,
            Self::Mad | Self::Madi => OpCodeType::MultiplyAdd,
            Self::Cmp => OpCodeType::Conditional,
            Self::Breakc
            | Self::Call
            | Self::Callc
            | Self::Callu
            | Self::Ifu
            | Self::Ifc
            | Self::Loop
            | Self::Jmpc
            | Self::Jmpu => OpCodeType::FlowControl,
            Self::Emit | Self::SetEmit => OpCodeType::Emit,
            Self::Break | Self::Nop | Self::End => OpCodeType::Trivial,
            Self::Unknown(_) => OpCodeType::Unknown,
        }
    }

    /// Whether the 7-bit (address-offsettable) source is the second operand
    pub fn is_inverted(self) -> bool {
        matches!(
            self,
            Self::Dphi | Self::Dsti | Self::Sgei | Self::Slti | Self::Madi
        )
    }

    /// Mnemonic used by the disassembler
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Dp3 => "dp3",
            Self::Dp4 => "dp4",
            Self::Dph => "dph",
            Self::Dst => "dst",
            Self::Ex2 => "ex2",
            Self::Lg2 => "lg2",
            Self::Litp => "litp",
            Self::Mul => "mul",
            Self::Sge => "sge",
            Self::Slt => "slt",
            Self::Flr => "flr",
            Self::Max => "max",
            Self::Min => "min",
            Self::Rcp => "rcp",
            Self::Rsq => "rsq",
            Self::Mova => "mova",
            Self::Mov => "mov",
            Self::Dphi => "dphi",
            Self::Dsti => "dsti",
            Self::Sgei => "sgei",
            Self::Slti => "slti",
            Self::Break => "break",
            Self::Nop => "nop",
            Self::End => "end",
            Self::Breakc => "breakc",
            Self::Call => "call",
            Self::Callc => "callc",
            Self::Callu => "callu",
            Self::Ifu => "ifu",
            Self::Ifc => "ifc",
            Self::Loop => "loop",
            Self::Emit => "emit",
            Self::SetEmit => "setemit",
            Self::Jmpc => "jmpc",
            Self::Jmpu => "jmpu",
            Self::Cmp => "cmp",
            Self::Madi => "madi",
            Self::Mad => "mad",
            Self::Unknown(_) => "???",
        }
    }
}

/// Shader source operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRegister {
    /// Vertex attribute input v0-v15
    Input(u8),
    /// Temporary r0-r15
    Temporary(u8),
    /// Float uniform c0-c95
    FloatUniform(u8),
}

impl SourceRegister {
    /// Decode a 5- or 7-bit source field
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x00..=0x0F => Self::Input(raw as u8),
            0x10..=0x1F => Self::Temporary((raw - 0x10) as u8),
            _ => Self::FloatUniform((raw - 0x20) as u8),
        }
    }

    /// Encoded field value
    pub fn to_raw(self) -> u32 {
        match self {
            Self::Input(i) => i as u32,
            Self::Temporary(i) => 0x10 + i as u32,
            Self::FloatUniform(i) => 0x20 + i as u32,
        }
    }
}

impl fmt::Display for SourceRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input(i) => write!(f, "v{}", i),
            Self::Temporary(i) => write!(f, "r{}", i),
            Self::FloatUniform(i) => write!(f, "c{}", i),
        }
    }
}

/// Shader destination operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestRegister {
    /// Output o0-o15
    Output(u8),
    /// Temporary r0-r15
    Temporary(u8),
}

impl DestRegister {
    /// Decode a 5-bit destination field
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        if raw < 0x10 {
            Self::Output(raw as u8)
        } else {
            Self::Temporary((raw & 0xF) as u8)
        }
    }

    /// Encoded field value
    pub fn to_raw(self) -> u32 {
        match self {
            Self::Output(i) => i as u32,
            Self::Temporary(i) => 0x10 + i as u32,
        }
    }
}

impl fmt::Display for DestRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output(i) => write!(f, "o{}", i),
            Self::Temporary(i) => write!(f, "r{}", i),
        }
    }
}

/// Comparison performed by CMP for one component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Unknown(u32),
}

impl CompareOp {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Equal,
            1 => Self::NotEqual,
            2 => Self::LessThan,
            3 => Self::LessEqual,
            4 => Self::GreaterThan,
            5 => Self::GreaterEqual,
            other => Self::Unknown(other),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::Equal => 0,
            Self::NotEqual => 1,
            Self::LessThan => 2,
            Self::LessEqual => 3,
            Self::GreaterThan => 4,
            Self::GreaterEqual => 5,
            Self::Unknown(raw) => raw,
        }
    }

    /// Evaluate the comparison on host floats
    #[inline]
    pub fn evaluate(self, a: f32, b: f32) -> bool {
        match self {
            Self::Equal => a == b,
            Self::NotEqual => a != b,
            Self::LessThan => a < b,
            Self::LessEqual => a <= b,
            Self::GreaterThan => a > b,
            Self::GreaterEqual => a >= b,
            Self::Unknown(_) => false,
        }
    }
}

/// How flow control combines the two conditional code flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOp {
    Or,
    And,
    JustX,
    JustY,
}

impl ConditionOp {
    pub fn from_raw(raw: u32) -> Self {
        match raw & 3 {
            0 => Self::Or,
            1 => Self::And,
            2 => Self::JustX,
            _ => Self::JustY,
        }
    }

    /// Evaluate against the conditional code register
    #[inline]
    pub fn evaluate(self, refx: bool, refy: bool, cc: [bool; 2]) -> bool {
        let x = refx == cc[0];
        let y = refy == cc[1];
        match self {
            Self::Or => x || y,
            Self::And => x && y,
            Self::JustX => x,
            Self::JustY => y,
        }
    }
}

#[inline]
fn bits(word: u32, start: u32, count: u32) -> u32 {
    (word >> start) & ((1 << count) - 1)
}

/// A single encoded shader instruction
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Instruction(pub u32);

impl Instruction {
    #[inline]
    pub fn opcode(self) -> OpCode {
        OpCode::decode(self.0)
    }

    /// Operand descriptor (swizzle table) index
    #[inline]
    pub fn operand_desc_id(self) -> usize {
        match self.opcode() {
            OpCode::Mad | OpCode::Madi => bits(self.0, 0, 5) as usize,
            _ => bits(self.0, 0, 7) as usize,
        }
    }

    /// Address register selector: 0 none, 1 a0.x, 2 a0.y, 3 aL
    #[inline]
    pub fn address_register_index(self) -> usize {
        match self.opcode() {
            OpCode::Mad | OpCode::Madi => bits(self.0, 22, 2) as usize,
            _ => bits(self.0, 19, 2) as usize,
        }
    }

    /// First source of the common layout
    #[inline]
    pub fn src1(self, inverted: bool) -> SourceRegister {
        if inverted {
            SourceRegister::from_raw(bits(self.0, 14, 5))
        } else {
            SourceRegister::from_raw(bits(self.0, 12, 7))
        }
    }

    /// Second source of the common layout
    #[inline]
    pub fn src2(self, inverted: bool) -> SourceRegister {
        if inverted {
            SourceRegister::from_raw(bits(self.0, 7, 7))
        } else {
            SourceRegister::from_raw(bits(self.0, 7, 5))
        }
    }

    /// Destination of the common layout
    #[inline]
    pub fn dest(self) -> DestRegister {
        DestRegister::from_raw(bits(self.0, 21, 5))
    }

    /// CMP comparison for the x component
    #[inline]
    pub fn compare_x(self) -> CompareOp {
        CompareOp::from_raw(bits(self.0, 24, 3))
    }

    /// CMP comparison for the y component
    #[inline]
    pub fn compare_y(self) -> CompareOp {
        CompareOp::from_raw(bits(self.0, 21, 3))
    }

    #[inline]
    pub fn mad_src1(self) -> SourceRegister {
        SourceRegister::from_raw(bits(self.0, 17, 5))
    }

    #[inline]
    pub fn mad_src2(self, inverted: bool) -> SourceRegister {
        if inverted {
            SourceRegister::from_raw(bits(self.0, 12, 5))
        } else {
            SourceRegister::from_raw(bits(self.0, 10, 7))
        }
    }

    #[inline]
    pub fn mad_src3(self, inverted: bool) -> SourceRegister {
        if inverted {
            SourceRegister::from_raw(bits(self.0, 5, 7))
        } else {
            SourceRegister::from_raw(bits(self.0, 5, 5))
        }
    }

    #[inline]
    pub fn mad_dest(self) -> DestRegister {
        DestRegister::from_raw(bits(self.0, 24, 5))
    }

    /// Flow control target
    #[inline]
    pub fn dest_offset(self) -> u32 {
        bits(self.0, 10, 12)
    }

    /// Flow control instruction count
    #[inline]
    pub fn num_instructions(self) -> u32 {
        bits(self.0, 0, 8)
    }

    #[inline]
    pub fn condition_op(self) -> ConditionOp {
        ConditionOp::from_raw(bits(self.0, 22, 2))
    }

    #[inline]
    pub fn refx(self) -> bool {
        bits(self.0, 25, 1) != 0
    }

    #[inline]
    pub fn refy(self) -> bool {
        bits(self.0, 24, 1) != 0
    }

    #[inline]
    pub fn bool_uniform_id(self) -> usize {
        bits(self.0, 22, 4) as usize
    }

    #[inline]
    pub fn int_uniform_id(self) -> usize {
        bits(self.0, 22, 2) as usize
    }

    /// SETEMIT vertex slot
    #[inline]
    pub fn emit_vertex_id(self) -> u32 {
        bits(self.0, 24, 2)
    }

    #[inline]
    pub fn emit_prim(self) -> bool {
        bits(self.0, 23, 1) != 0
    }

    #[inline]
    pub fn emit_winding(self) -> bool {
        bits(self.0, 22, 1) != 0
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instruction({:08x} {})", self.0, self.opcode().mnemonic())
    }
}

/// Component selector of a swizzle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    X = 0,
    Y = 1,
    Z = 2,
    W = 3,
}

impl Selector {
    pub fn from_raw(raw: u32) -> Self {
        match raw & 3 {
            0 => Self::X,
            1 => Self::Y,
            2 => Self::Z,
            _ => Self::W,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::X => 'x',
            Self::Y => 'y',
            Self::Z => 'z',
            Self::W => 'w',
        }
    }
}

/// Operand descriptor: destination write mask and per-source swizzles
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SwizzlePattern(pub u32);

impl SwizzlePattern {
    /// Write mask bits, bit 3 is x
    #[inline]
    pub fn dest_mask(self) -> u32 {
        bits(self.0, 0, 4)
    }

    #[inline]
    pub fn dest_component_enabled(self, component: usize) -> bool {
        self.dest_mask() & (0x8 >> component) != 0
    }

    #[inline]
    pub fn negate_src1(self) -> bool {
        bits(self.0, 4, 1) != 0
    }

    #[inline]
    pub fn negate_src2(self) -> bool {
        bits(self.0, 13, 1) != 0
    }

    #[inline]
    pub fn negate_src3(self) -> bool {
        bits(self.0, 22, 1) != 0
    }

    /// Raw 8-bit selector of source `src` (1-3)
    #[inline]
    pub fn selector_bits(self, src: usize) -> u32 {
        match src {
            1 => bits(self.0, 5, 8),
            2 => bits(self.0, 14, 8),
            _ => bits(self.0, 23, 8),
        }
    }

    /// Which input component feeds `component` of source `src` (1-3)
    #[inline]
    pub fn selector(self, src: usize, component: usize) -> Selector {
        Selector::from_raw(self.selector_bits(src) >> (6 - 2 * component))
    }

    /// Component indices for source `src`
    #[inline]
    pub fn selectors(self, src: usize) -> [usize; 4] {
        [0, 1, 2, 3].map(|c| self.selector(src, c) as usize)
    }

    #[inline]
    pub fn negate(self, src: usize) -> bool {
        match src {
            1 => self.negate_src1(),
            2 => self.negate_src2(),
            _ => self.negate_src3(),
        }
    }

    fn format_selector(self, src: usize) -> String {
        self.selectors(src)
            .iter()
            .map(|&s| Selector::from_raw(s as u32).as_char())
            .collect()
    }

    fn format_mask(self) -> String {
        (0..4)
            .filter(|&c| self.dest_component_enabled(c))
            .map(|c| Selector::from_raw(c as u32).as_char())
            .collect()
    }
}

impl fmt::Debug for SwizzlePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SwizzlePattern(.{} {}{} {}{} {}{})",
            self.format_mask(),
            if self.negate_src1() { "-" } else { "" },
            self.format_selector(1),
            if self.negate_src2() { "-" } else { "" },
            self.format_selector(2),
            if self.negate_src3() { "-" } else { "" },
            self.format_selector(3),
        )
    }
}

/// Render a program as text, one instruction per line
pub fn disassemble(code: &[u32], swizzle: &[u32]) -> String {
    let mut out = String::new();
    for (pc, &word) in code.iter().enumerate() {
        let instr = Instruction(word);
        let op = instr.opcode();
        let pattern = SwizzlePattern(
            swizzle
                .get(instr.operand_desc_id())
                .copied()
                .unwrap_or_default(),
        );
        let operands = match op.kind() {
            OpCodeType::Arithmetic => {
                let inv = op.is_inverted();
                format!(
                    "{}.{}, {}{}.{}, {}{}.{}",
                    instr.dest(),
                    pattern.format_mask(),
                    if pattern.negate_src1() { "-" } else { "" },
                    instr.src1(inv),
                    pattern.format_selector(1),
                    if pattern.negate_src2() { "-" } else { "" },
                    instr.src2(inv),
                    pattern.format_selector(2),
                )
            }
            OpCodeType::MultiplyAdd => {
                let inv = op.is_inverted();
                format!(
                    "{}.{}, {}.{}, {}.{}, {}.{}",
                    instr.mad_dest(),
                    pattern.format_mask(),
                    instr.mad_src1(),
                    pattern.format_selector(1),
                    instr.mad_src2(inv),
                    pattern.format_selector(2),
                    instr.mad_src3(inv),
                    pattern.format_selector(3),
                )
            }
            OpCodeType::Conditional => format!(
                "{}.{}, {:?}, {:?}, {}.{}",
                instr.src1(false),
                pattern.format_selector(1),
                instr.compare_x(),
                instr.compare_y(),
                instr.src2(false),
                pattern.format_selector(2),
            ),
            OpCodeType::FlowControl => format!(
                "0x{:03x}, {}",
                instr.dest_offset(),
                instr.num_instructions()
            ),
            OpCodeType::Emit if op == OpCode::SetEmit => format!(
                "{}, prim={}, inv={}",
                instr.emit_vertex_id(),
                instr.emit_prim(),
                instr.emit_winding()
            ),
            _ => String::new(),
        };
        out.push_str(&format!("{:03x}: {:08x} {:<8}{}\n", pc, word, op.mnemonic(), operands));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_opcodes() {
        assert_eq!(OpCode::decode(0x0000_0000), OpCode::Add);
        assert_eq!(OpCode::decode(0x4C00_0000), OpCode::Mov);
        assert_eq!(OpCode::decode(0x8800_0000), OpCode::End);
        assert_eq!(OpCode::decode(0xB800_0000), OpCode::Cmp);
        assert_eq!(OpCode::decode(0xBC00_0000), OpCode::Cmp);
        assert_eq!(OpCode::decode(0xC000_0000), OpCode::Madi);
        assert_eq!(OpCode::decode(0xE000_0000), OpCode::Mad);
        assert_eq!(OpCode::decode(0xFC00_0000), OpCode::Mad);
        assert_eq!(OpCode::decode(0x4000_0000), OpCode::Unknown(0x10));
    }

    #[test]
    fn test_encoding_round_trip() {
        for op in 0..0x40u32 {
            let decoded = OpCode::decode(op << 26);
            if let OpCode::Unknown(_) = decoded {
                continue;
            }
            assert_eq!(OpCode::decode(decoded.encoding() << 26), decoded);
        }
    }

    #[test]
    fn test_source_registers() {
        assert_eq!(SourceRegister::from_raw(0x05), SourceRegister::Input(5));
        assert_eq!(SourceRegister::from_raw(0x13), SourceRegister::Temporary(3));
        assert_eq!(SourceRegister::from_raw(0x7F), SourceRegister::FloatUniform(95));
        assert_eq!(SourceRegister::FloatUniform(10).to_raw(), 0x2A);
    }

    #[test]
    fn test_common_fields() {
        // mov r1.xyzw, c2 with desc 3 and a0.x offset
        let word = (0x13 << 26) | (0x11 << 21) | (1 << 19) | (0x22 << 12) | 3;
        let instr = Instruction(word);
        assert_eq!(instr.opcode(), OpCode::Mov);
        assert_eq!(instr.dest(), DestRegister::Temporary(1));
        assert_eq!(instr.src1(false), SourceRegister::FloatUniform(2));
        assert_eq!(instr.address_register_index(), 1);
        assert_eq!(instr.operand_desc_id(), 3);
    }

    #[test]
    fn test_inverted_fields() {
        // sgei: src1i (5 bits at 14) = r2, src2i (7 bits at 7) = c1
        let word = (0x1A << 26) | (0x12 << 14) | (0x21 << 7);
        let instr = Instruction(word);
        assert!(instr.opcode().is_inverted());
        assert_eq!(instr.src1(true), SourceRegister::Temporary(2));
        assert_eq!(instr.src2(true), SourceRegister::FloatUniform(1));
    }

    #[test]
    fn test_mad_fields() {
        let word = (0x38 << 26) | (0x03 << 24) | (0x04 << 17) | (0x25 << 10) | (0x11 << 5) | 7;
        let instr = Instruction(word);
        assert_eq!(instr.opcode(), OpCode::Mad);
        assert_eq!(instr.mad_dest(), DestRegister::Output(3));
        assert_eq!(instr.mad_src1(), SourceRegister::Input(4));
        assert_eq!(instr.mad_src2(false), SourceRegister::FloatUniform(5));
        assert_eq!(instr.mad_src3(false), SourceRegister::Temporary(1));
        assert_eq!(instr.operand_desc_id(), 7);
    }

    #[test]
    fn test_swizzle_pattern() {
        // mask xyzw, src1 = wzyx negated, src2 = xxxx
        let sel1 = 0b11_10_01_00;
        let pattern = SwizzlePattern(0xF | (1 << 4) | (sel1 << 5));
        assert!(pattern.dest_component_enabled(0));
        assert!(pattern.dest_component_enabled(3));
        assert!(pattern.negate_src1());
        assert!(!pattern.negate_src2());
        assert_eq!(pattern.selectors(1), [3, 2, 1, 0]);
        assert_eq!(pattern.selectors(2), [0, 0, 0, 0]);

        let only_x = SwizzlePattern(0x8);
        assert!(only_x.dest_component_enabled(0));
        assert!(!only_x.dest_component_enabled(1));
    }

    #[test]
    fn test_condition_op() {
        let cc = [true, false];
        assert!(ConditionOp::Or.evaluate(true, true, cc));
        assert!(!ConditionOp::And.evaluate(true, true, cc));
        assert!(ConditionOp::JustX.evaluate(true, false, cc));
        assert!(ConditionOp::JustY.evaluate(false, false, cc));
    }

    #[test]
    fn test_disassemble() {
        let text = disassemble(&[0x8800_0000], &[]);
        assert!(text.contains("end"));
    }
}
