pub mod disassemble;
pub mod functions;
pub mod stubs;

pub use disassemble::*;
pub use functions::*;
pub use stubs::*;
