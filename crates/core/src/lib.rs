//! jitlens-core
//!
//! Core library for inspecting the machine code a managed runtime's JIT
//! produced for a function.
//!
//! This crate decodes compiled code ranges, classifies control-transfer
//! operands, reverse-engineers the runtime's indirection stubs, resolves
//! targets to readable names, and walks the resulting call graph up to a
//! bounded depth.
//!
//! All substantive logic lives here so it is fully testable and reusable
//! from multiple frontends (CLI, bindings, etc.).

pub mod config;
pub mod error;
pub mod format;
pub mod model;
pub mod services;
pub mod snapshot;

pub use config::DisassemblySettings;
pub use error::{DisassemblyError, Result};
pub use services::disassembler::Disassembler;
pub use services::provider::{CodeProvider, SourceLocator};

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
