//! PICA200 GPU for oxidized-pica
//!
//! Register file and command lists, dirty tracking, vertex fetch and the
//! host-independent half of the hardware renderer.

pub mod backend;
pub mod command;
pub mod context;
pub mod dirty;
pub mod loader;
pub mod lut;
pub mod memory;
pub mod min_max;
pub mod primitive;
pub mod rasterizer;
pub mod regs;
pub mod state;
pub mod uniforms;
pub mod vertex;

pub use backend::{GraphicsBackend, NullBackend};
pub use context::{DrawStats, GpuContext};
pub use dirty::DirtyRegs;
pub use memory::{FlatMemory, GuestMemory};
pub use rasterizer::{RasterizerAccelerated, UniformBlockDirty, VertexArrayInfo};
pub use regs::Regs;
pub use state::PicaState;
