//! PICA shader unit for oxidized-pica
//!
//! Uniform and program storage, the reference interpreter, a Cranelift JIT
//! and a small assembler used by tests and tooling.

pub mod assembler;
pub mod bytecode;
pub mod cache;
pub mod engine;
pub mod fixup;
pub mod interpreter;
pub mod jit;
pub mod regs;
pub mod setup;
pub mod unit;

pub use engine::{create_engine, InterpreterEngine, JitEngine, ShaderEngine};
pub use regs::{ShaderRegs, UniformSetup};
pub use setup::{ShaderSetup, Uniforms};
pub use unit::{AttributeBuffer, GsEmitter, UnitState};
