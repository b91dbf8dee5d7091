//! Error types for the oxidized-pica GPU core

use thiserror::Error;

/// Main error type for the emulator
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Shader error: {0}")]
    Shader(#[from] ShaderError),

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}

/// Shader unit errors (JIT compilation, assembler tooling)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShaderError {
    #[error("Unsupported opcode 0x{opcode:02x} at pc 0x{pc:03x}")]
    UnsupportedOpcode { pc: u32, opcode: u32 },

    #[error("Invalid flow control at pc 0x{pc:03x}: {reason}")]
    InvalidFlowControl { pc: u32, reason: String },

    #[error("Entry point 0x{0:03x} is outside the program")]
    EntryPointOutOfRange(u32),

    #[error("Call stack overflow")]
    CallStackOverflow,

    #[error("Invalid operand: {0}")]
    InvalidOperand(String),

    #[error("Swizzle table full ({capacity} patterns)")]
    SwizzleTableFull { capacity: usize },

    #[error("Program too large: {0} words")]
    ProgramTooLarge(usize),

    #[error("Code generation backend error: {0}")]
    Backend(String),
}

/// PICA register file and command stream errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    #[error("Invalid register: 0x{0:03x}")]
    InvalidRegister(u32),

    #[error("Memory read failed at 0x{addr:08x} ({len} bytes)")]
    MemoryRead { addr: u32, len: usize },

    #[error("Memory write failed at 0x{addr:08x} ({len} bytes)")]
    MemoryWrite { addr: u32, len: usize },

    #[error("Invalid trace: {0}")]
    InvalidTrace(String),
}

/// Result type alias for emulator operations
pub type Result<T> = std::result::Result<T, EmulatorError>;
