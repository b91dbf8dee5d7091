//! Core types for the oxidized-pica GPU core
//!
//! This crate provides the foundational types, error handling,
//! configuration, and logging infrastructure shared by the shader
//! unit and the PICA register/rasterizer crates.

pub mod config;
pub mod error;
pub mod float;
pub mod logging;

pub use config::{Config, ShaderFixup};
pub use error::{EmulatorError, GpuError, Result, ShaderError};
pub use float::{Float16, Float20, Float24};
