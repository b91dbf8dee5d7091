//! Register-derived GPU state owned by a GPU context

use std::sync::Arc;

use op_shader::fixup::ProgramFixupTable;
use op_shader::ShaderSetup;

use crate::dirty::DirtyRegs;
use crate::loader::DefaultAttributes;
use crate::lut::LutState;
use crate::regs::Regs;

/// Everything the guest configures through register writes
#[derive(Debug)]
pub struct PicaState {
    pub regs: Regs,
    pub dirty_regs: DirtyRegs,
    /// Vertex shader unit
    pub vs: ShaderSetup,
    /// Geometry shader unit
    pub gs: ShaderSetup,
    pub luts: LutState,
    pub default_attributes: DefaultAttributes,
}

impl Default for PicaState {
    fn default() -> Self {
        Self::new()
    }
}

impl PicaState {
    pub fn new() -> Self {
        Self {
            regs: Regs::new(),
            dirty_regs: DirtyRegs::new(),
            vs: ShaderSetup::new(),
            gs: ShaderSetup::new(),
            luts: LutState::new(),
            default_attributes: DefaultAttributes::new(),
        }
    }

    /// State whose shader units patch programs listed in `fixups`
    pub fn with_fixups(fixups: Arc<ProgramFixupTable>) -> Self {
        Self {
            vs: ShaderSetup::with_fixups(Arc::clone(&fixups)),
            gs: ShaderSetup::with_fixups(fixups),
            ..Self::new()
        }
    }
}
