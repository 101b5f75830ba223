use tracing::warn;

use crate::error::{DisassemblyError, Result};
use crate::model::{CodeRange, TargetOs};
use crate::services::provider::CodeProvider;

/// Upper bound on a single code read.
const READ_CHUNK: usize = 64 * 1024;

/// Pulls compiled code and pointer-sized values out of the inspected process.
pub struct CodeReader<'p> {
    provider: &'p dyn CodeProvider,
    pointer_size: u32,
    coherent: bool,
}

impl<'p> CodeReader<'p> {
    pub fn new(provider: &'p dyn CodeProvider) -> Self {
        let pointer_size = provider.architecture().pointer_size();
        // Windows reads go straight to the live process; elsewhere the view is cached.
        let coherent = provider.target_os() == TargetOs::Windows;
        Self { provider, pointer_size, coherent }
    }

    pub fn pointer_size(&self) -> u32 {
        self.pointer_size
    }

    /// Read a whole code range, retrying partial reads until the buffer is
    /// full or an iteration makes no progress.
    ///
    /// The buffer grows with the bytes actually read, so a bogus range
    /// length costs at most one chunk before the short read is reported.
    pub fn read_range(&self, range: &CodeRange) -> Result<Vec<u8>> {
        let expected = range.length as usize;
        let mut code = Vec::with_capacity(expected.min(READ_CHUNK));
        let mut chunk = vec![0u8; expected.min(READ_CHUNK)];
        while code.len() < expected {
            let want = (expected - code.len()).min(READ_CHUNK);
            let read = self
                .provider
                .read_memory(range.start_address.wrapping_add(code.len() as u64), &mut chunk[..want]);
            if read == 0 {
                warn!(
                    "short read of code range at 0x{:X}: expected {expected} bytes, got {}",
                    range.start_address,
                    code.len()
                );
                return Err(DisassemblyError::ShortRead {
                    address: range.start_address,
                    expected,
                    actual: code.len(),
                });
            }
            code.extend_from_slice(&chunk[..read.min(want)]);
        }
        Ok(code)
    }

    /// Read a fixed-size window, flushing a stale cache once if the first
    /// attempt comes back empty. Returns `None` unless the window is complete.
    pub fn read_window(&self, address: u64, len: usize) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut read = self.provider.read_memory(address, &mut buf);
        if read == 0 && !self.coherent {
            // The runtime may have emitted new stubs since the view was cached.
            self.provider.flush_cached_data();
            read = self.provider.read_memory(address, &mut buf);
        }
        (read == len).then_some(buf)
    }

    /// Read a fixed-size window without touching the provider's cache.
    pub fn read_exact(&self, address: u64, len: usize) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; len];
        (self.provider.read_memory(address, &mut buf) == len).then_some(buf)
    }

    /// Read one little-endian pointer.
    pub fn read_pointer(&self, address: u64) -> Option<u64> {
        let size = self.pointer_size as usize;
        let mut buf = [0u8; 8];
        if self.provider.read_memory(address, &mut buf[..size]) != size {
            return None;
        }
        Some(u64::from_le_bytes(buf))
    }
}
