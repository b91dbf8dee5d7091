//! Shader engines
//!
//! An engine prepares a batch for the current program once per draw and then
//! runs it for every vertex of the batch.

use std::sync::Arc;

use op_core::ShaderError;

use crate::cache::{CacheStats, ShaderCache, ShaderKey};
use crate::interpreter::Interpreter;
use crate::jit::{CompiledShader, JitCompiler, JitStatus};
use crate::setup::ShaderSetup;
use crate::unit::{GsEmitter, UnitState};

/// Runs shader programs for a shader unit
pub trait ShaderEngine {
    /// Engine name for logging
    fn name(&self) -> &'static str;

    /// Prepare the program in `setup` for a batch of runs starting at `entry_point`
    fn setup_batch(&mut self, setup: &mut ShaderSetup, entry_point: u32);

    /// Run the prepared program for one vertex
    fn run(&self, setup: &ShaderSetup, state: &mut UnitState, emitter: Option<&mut GsEmitter>);
}

/// Engine that interprets the bytecode directly
#[derive(Debug, Default)]
pub struct InterpreterEngine {
    interpreter: Interpreter,
    entry_point: u32,
}

impl InterpreterEngine {
    pub fn new(step_limit: u32) -> Self {
        Self {
            interpreter: Interpreter::new(step_limit),
            entry_point: 0,
        }
    }
}

impl ShaderEngine for InterpreterEngine {
    fn name(&self) -> &'static str {
        "interpreter"
    }

    fn setup_batch(&mut self, setup: &mut ShaderSetup, entry_point: u32) {
        setup.do_program_code_fixup();
        self.entry_point = entry_point;
    }

    fn run(&self, setup: &ShaderSetup, state: &mut UnitState, emitter: Option<&mut GsEmitter>) {
        self.interpreter.run(setup, state, self.entry_point, emitter);
    }
}

/// Engine that compiles programs to native code, keyed by content hash
pub struct JitEngine {
    cache: ShaderCache<CompiledShader>,
    compiler: JitCompiler,
    current: Option<Arc<CompiledShader>>,
    fallback: Interpreter,
    entry_point: u32,
    step_limit: u32,
}

impl JitEngine {
    pub fn new(step_limit: u32) -> Result<Self, ShaderError> {
        Ok(Self {
            cache: ShaderCache::new(),
            compiler: JitCompiler::new()?,
            current: None,
            fallback: Interpreter::new(step_limit),
            entry_point: 0,
            step_limit,
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Whether the current batch runs natively
    pub fn is_compiled(&self) -> bool {
        self.current.is_some()
    }
}

impl ShaderEngine for JitEngine {
    fn name(&self) -> &'static str {
        "jit"
    }

    fn setup_batch(&mut self, setup: &mut ShaderSetup, entry_point: u32) {
        setup.do_program_code_fixup();
        self.entry_point = entry_point;

        let key = ShaderKey::new(setup.program_code_hash(), setup.swizzle_data_hash());
        let failures = self.cache.stats().failures;
        let compiler = &mut self.compiler;
        let setup = &*setup;

        match self.cache.get_or_compile(key, || compiler.compile(setup)) {
            Ok(shader) => self.current = Some(shader),
            Err(e) => {
                if self.cache.stats().failures > failures {
                    tracing::warn!(
                        "Failed to compile shader {:016x}, falling back to the interpreter: {}",
                        key.program_hash,
                        e
                    );
                }
                self.current = None;
            }
        }
    }

    fn run(&self, setup: &ShaderSetup, state: &mut UnitState, emitter: Option<&mut GsEmitter>) {
        let shader = match &self.current {
            Some(shader) if (self.entry_point as usize) < shader.program_len() => shader,
            _ => return self.fallback.run(setup, state, self.entry_point, emitter),
        };

        match shader.run(&setup.uniforms, state, self.entry_point, emitter, self.step_limit) {
            JitStatus::Completed => {}
            JitStatus::ControlStackOverflow => {
                tracing::error!("Shader control stack overflow, vertex aborted");
            }
            JitStatus::InvalidEntryPoint => {
                tracing::error!("Shader entry point 0x{:03x} out of range", self.entry_point);
            }
            JitStatus::StepLimitExceeded => {
                tracing::warn!("Shader exceeded {} steps, aborting", self.step_limit);
            }
        }
    }
}

/// Create a shader engine by name
///
/// Unknown names, or a JIT that cannot target the host, fall back to the
/// interpreter.
pub fn create_engine(name: &str, step_limit: u32) -> Box<dyn ShaderEngine> {
    match name {
        "interpreter" => Box::new(InterpreterEngine::new(step_limit)),
        "jit" => match JitEngine::new(step_limit) {
            Ok(engine) => Box::new(engine),
            Err(e) => {
                tracing::warn!("JIT unavailable ({}), using the interpreter", e);
                Box::new(InterpreterEngine::new(step_limit))
            }
        },
        other => {
            tracing::warn!("Unknown shader engine '{}', using the interpreter", other);
            Box::new(InterpreterEngine::new(step_limit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{Dst, ShaderBuilder, Src};
    use op_core::Float24;

    fn program(setup: &mut ShaderSetup) {
        setup.uniforms.f[0] = [Float24::from_f32(3.0); 4];
        let mut b = ShaderBuilder::new();
        b.add(Dst::output(0), Src::uniform(0), Src::input(0)).unwrap();
        b.end();
        b.finish().unwrap().load_into(setup);
    }

    #[test]
    fn test_create_engine_by_name() {
        assert_eq!(create_engine("interpreter", 100).name(), "interpreter");
        assert_eq!(create_engine("jit", 100).name(), "jit");
        assert_eq!(create_engine("vulkan", 100).name(), "interpreter");
    }

    #[test]
    fn test_engines_agree() {
        let mut setup = ShaderSetup::new();
        program(&mut setup);

        let mut results = Vec::new();
        for name in ["interpreter", "jit"] {
            let mut engine = create_engine(name, 1000);
            engine.setup_batch(&mut setup, 0);
            let mut state = UnitState::default();
            state.registers.input[0] = [Float24::from_f32(1.0); 4];
            engine.run(&setup, &mut state, None);
            results.push(state.registers.output[0]);
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[0], [Float24::from_f32(4.0); 4]);
    }

    #[test]
    fn test_jit_engine_caches_by_hash() {
        let mut setup = ShaderSetup::new();
        program(&mut setup);

        let mut engine = JitEngine::new(1000).unwrap();
        engine.setup_batch(&mut setup, 0);
        engine.setup_batch(&mut setup, 0);
        assert!(engine.is_compiled());
        let stats = engine.cache_stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);

        setup.update_program_code(0, 0x8800_0000);
        engine.setup_batch(&mut setup, 0);
        assert_eq!(engine.cache_stats().misses, 2);
    }

    #[test]
    fn test_jit_engine_falls_back_on_bad_program() {
        let mut setup = ShaderSetup::new();
        let mut b = ShaderBuilder::new();
        b.brk();
        b.mov(Dst::output(0), Src::input(0)).unwrap();
        b.end();
        b.finish().unwrap().load_into(&mut setup);

        let mut engine = JitEngine::new(1000).unwrap();
        engine.setup_batch(&mut setup, 0);
        assert!(!engine.is_compiled());
        assert_eq!(engine.cache_stats().failures, 1);

        let mut state = UnitState::default();
        state.registers.input[0] = [Float24::from_f32(2.0); 4];
        engine.run(&setup, &mut state, None);
        assert_eq!(state.registers.output[0], [Float24::from_f32(2.0); 4]);
    }
}
