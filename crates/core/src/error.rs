use thiserror::Error;

/// Errors that abort a whole disassembly run.
///
/// Per-function problems (not compiled, short reads) are recorded on the
/// function's result instead and never surface here.
#[derive(Debug, Error)]
pub enum DisassemblyError {
    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Short read at 0x{address:X}: expected {expected} bytes, got {actual}")]
    ShortRead { address: u64, expected: usize, actual: usize },
    #[error("Decoder error: {0}")]
    Decoder(String),
    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

pub type Result<T> = std::result::Result<T, DisassemblyError>;
