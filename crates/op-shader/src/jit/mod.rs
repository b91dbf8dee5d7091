//! Cranelift vertex shader JIT
//!
//! Translates a whole PICA program into one native function. The function
//! can be entered at any instruction; calls, loops and conditionals are
//! lowered to native control flow with a small in-memory call stack kept in
//! [`JitFrame`].

mod compiler;

use cranelift_codegen::settings::{self, Configurable};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{default_libcall_names, FuncId, Linkage, Module};

use op_core::ShaderError;

use crate::interpreter::MAX_CONTROL_DEPTH;
use crate::setup::{ShaderSetup, Uniforms};
use crate::unit::{GsEmitter, UnitState};

pub use compiler::MAX_LOOPS;

/// Runtime state shared between generated code and its helpers
#[derive(Debug)]
#[repr(C)]
pub struct JitFrame {
    pub emitter: *mut GsEmitter,
    pub call_depth: u32,
    /// Open calls, conditionals and loops together
    pub control_depth: u32,
    pub steps_remaining: u32,
    /// (return offset, call site) pairs
    pub call_stack: [[u32; 2]; MAX_CONTROL_DEPTH],
    pub loop_counters: [u32; MAX_LOOPS],
    /// `control_depth` when each loop was entered
    pub loop_depths: [u32; MAX_LOOPS],
}

impl JitFrame {
    fn new(emitter: Option<&mut GsEmitter>, step_limit: u32) -> Self {
        Self {
            emitter: emitter.map_or(std::ptr::null_mut(), |e| e as *mut GsEmitter),
            call_depth: 0,
            control_depth: 0,
            steps_remaining: step_limit,
            call_stack: [[0; 2]; MAX_CONTROL_DEPTH],
            loop_counters: [0; MAX_LOOPS],
            loop_depths: [0; MAX_LOOPS],
        }
    }
}

/// Exit status of a compiled shader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitStatus {
    Completed,
    ControlStackOverflow,
    InvalidEntryPoint,
    StepLimitExceeded,
}

impl JitStatus {
    fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Completed,
            1 => Self::ControlStackOverflow,
            2 => Self::InvalidEntryPoint,
            _ => Self::StepLimitExceeded,
        }
    }
}

type ShaderFn = unsafe extern "C" fn(*mut UnitState, *const Uniforms, *mut JitFrame, u32) -> u32;

/// A natively compiled shader program
pub struct CompiledShader {
    entry: ShaderFn,
    program_len: usize,
}

// SAFETY: the code pointed to is immutable once finalized and is kept alive by
// the owning `JitCompiler`, which outlives every cache entry it produced.
unsafe impl Send for CompiledShader {}
// SAFETY: see above; calling the function does not mutate shared state.
unsafe impl Sync for CompiledShader {}

impl std::fmt::Debug for CompiledShader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledShader")
            .field("program_len", &self.program_len)
            .finish()
    }
}

impl CompiledShader {
    /// Number of program words covered by the native code
    pub fn program_len(&self) -> usize {
        self.program_len
    }

    /// Execute from `entry_point`
    pub fn run(
        &self,
        uniforms: &Uniforms,
        state: &mut UnitState,
        entry_point: u32,
        emitter: Option<&mut GsEmitter>,
        step_limit: u32,
    ) -> JitStatus {
        let mut frame = JitFrame::new(emitter, step_limit);
        // SAFETY: the function was generated for exactly this signature and the
        // pointers are valid for the duration of the call.
        let raw = unsafe {
            (self.entry)(
                state as *mut UnitState,
                uniforms as *const Uniforms,
                &mut frame as *mut JitFrame,
                entry_point,
            )
        };
        JitStatus::from_raw(raw)
    }
}

extern "C" fn pica_exp2(x: f32) -> f32 {
    x.exp2()
}

extern "C" fn pica_log2(x: f32) -> f32 {
    x.log2()
}

unsafe extern "C" fn pica_emit(frame: *mut JitFrame, state: *const UnitState) {
    // SAFETY: called only from generated code with the frame and state passed
    // to `CompiledShader::run`.
    let (frame, state) = unsafe { (&mut *frame, &*state) };
    // SAFETY: the emitter pointer is either null or borrowed for the whole run.
    match unsafe { frame.emitter.as_mut() } {
        Some(emitter) => emitter.emit(&state.registers.output),
        None => tracing::error!("EMIT executed outside of a geometry shader"),
    }
}

unsafe extern "C" fn pica_set_emit(frame: *mut JitFrame, vertex_id: u32, prim_emit: u32, winding: u32) {
    // SAFETY: as for `pica_emit`.
    let frame = unsafe { &mut *frame };
    match unsafe { frame.emitter.as_mut() } {
        Some(emitter) => emitter.set_emit(vertex_id, prim_emit != 0, winding != 0),
        None => tracing::error!("SETEMIT executed outside of a geometry shader"),
    }
}

/// Runtime helpers callable from generated code
#[derive(Debug, Clone, Copy)]
pub(crate) struct Helpers {
    pub exp2: FuncId,
    pub log2: FuncId,
    pub emit: FuncId,
    pub set_emit: FuncId,
}

/// Owns the JIT module and all code compiled into it
pub struct JitCompiler {
    module: JITModule,
    context: cranelift_codegen::Context,
    builder_context: cranelift_frontend::FunctionBuilderContext,
    helpers: Helpers,
    next_symbol_id: u64,
}

impl JitCompiler {
    pub fn new() -> Result<Self, ShaderError> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", "speed")
            .map_err(|e| ShaderError::Backend(format!("set opt_level: {e}")))?;
        let flags = settings::Flags::new(flag_builder);

        let isa_builder = cranelift_native::builder()
            .map_err(|e| ShaderError::Backend(format!("host ISA: {e}")))?;
        let isa = isa_builder
            .finish(flags)
            .map_err(|e| ShaderError::Backend(format!("finish ISA: {e}")))?;

        let mut jit_builder = JITBuilder::with_isa(isa, default_libcall_names());
        jit_builder.symbol("pica_exp2", pica_exp2 as *const u8);
        jit_builder.symbol("pica_log2", pica_log2 as *const u8);
        jit_builder.symbol("pica_emit", pica_emit as *const u8);
        jit_builder.symbol("pica_set_emit", pica_set_emit as *const u8);

        let mut module = JITModule::new(jit_builder);
        let helpers = declare_helpers(&mut module)?;
        let context = module.make_context();

        Ok(Self {
            module,
            context,
            builder_context: cranelift_frontend::FunctionBuilderContext::new(),
            helpers,
            next_symbol_id: 0,
        })
    }

    /// Compile the current program of `setup` (after fixups)
    pub fn compile(&mut self, setup: &ShaderSetup) -> Result<CompiledShader, ShaderError> {
        let program_len = setup.biggest_program_size();
        let code = &setup.program_code()[..program_len];
        let swizzle = &setup.swizzle_data()[..];

        self.module.clear_context(&mut self.context);
        if let Err(e) = compiler::translate(
            &mut self.module,
            &mut self.context,
            &mut self.builder_context,
            self.helpers,
            code,
            swizzle,
        ) {
            // A half-built function leaves the builder context in use
            self.builder_context = cranelift_frontend::FunctionBuilderContext::new();
            self.module.clear_context(&mut self.context);
            return Err(e);
        }

        let symbol = format!("pica_shader_{}", self.next_symbol_id);
        self.next_symbol_id += 1;

        let func_id = self
            .module
            .declare_function(&symbol, Linkage::Local, &self.context.func.signature)
            .map_err(|e| ShaderError::Backend(format!("declare_function: {e}")))?;
        self.module
            .define_function(func_id, &mut self.context)
            .map_err(|e| ShaderError::Backend(format!("define_function: {e}")))?;
        self.module.clear_context(&mut self.context);
        self.module
            .finalize_definitions()
            .map_err(|e| ShaderError::Backend(format!("finalize_definitions: {e}")))?;

        let code_ptr = self.module.get_finalized_function(func_id);
        // SAFETY: the function was built with the `ShaderFn` signature.
        let entry = unsafe { std::mem::transmute::<*const u8, ShaderFn>(code_ptr) };

        tracing::debug!("Compiled shader {} ({} words)", symbol, program_len);
        Ok(CompiledShader { entry, program_len })
    }
}

fn declare_helpers(module: &mut JITModule) -> Result<Helpers, ShaderError> {
    use cranelift_codegen::ir::{types, AbiParam};

    let ptr = module.target_config().pointer_type();
    let mut declare = |name: &str, params: &[cranelift_codegen::ir::Type], ret: Option<cranelift_codegen::ir::Type>| {
        let mut sig = module.make_signature();
        sig.params.extend(params.iter().map(|&t| AbiParam::new(t)));
        sig.returns.extend(ret.map(AbiParam::new));
        module
            .declare_function(name, Linkage::Import, &sig)
            .map_err(|e| ShaderError::Backend(format!("declare {name}: {e}")))
    };

    Ok(Helpers {
        exp2: declare("pica_exp2", &[types::F32], Some(types::F32))?,
        log2: declare("pica_log2", &[types::F32], Some(types::F32))?,
        emit: declare("pica_emit", &[ptr, ptr], None)?,
        set_emit: declare("pica_set_emit", &[ptr, types::I32, types::I32, types::I32], None)?,
    })
}
