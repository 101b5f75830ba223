//! Capabilities consumed from the outside world.
//!
//! Attaching to a process and walking the runtime's metadata is somebody
//! else's job; the engine only talks to these traits.

use crate::model::{Architecture, CodeRange, FunctionHandle, RuntimeVersion, SourceLine, TargetOs};

/// Access to an inspected runtime: its memory, its compiled functions, and
/// the names of its internal structures.
pub trait CodeProvider {
    fn architecture(&self) -> Architecture;

    fn target_os(&self) -> TargetOs;

    fn runtime_version(&self) -> RuntimeVersion;

    /// System page size of the inspected process.
    fn page_size(&self) -> u64 {
        4096
    }

    /// Compiled code ranges (hot and cold) of a function, in any order.
    fn list_code_ranges(&self, function: &FunctionHandle) -> Vec<CodeRange> {
        function.code_ranges.clone()
    }

    /// Read up to `buf.len()` bytes at `address`; returns how many were read.
    ///
    /// Partial and zero-length reads are legal.
    fn read_memory(&self, address: u64, buf: &mut [u8]) -> usize;

    /// Drop any cached view of the target's memory. No-op when the view is
    /// always coherent.
    fn flush_cached_data(&self) {}

    fn lookup_helper_name(&self, address: u64) -> Option<String>;

    /// Function whose compiled code contains `address`.
    fn lookup_function_by_address(&self, address: u64) -> Option<FunctionHandle>;

    /// Function whose method descriptor lives at `address`.
    fn lookup_function_descriptor(&self, address: u64) -> Option<FunctionHandle>;

    fn lookup_method_table_name(&self, address: u64) -> Option<String>;

    /// Every function the runtime knows about; used for filter-driven runs.
    fn enumerate_functions(&self) -> Vec<FunctionHandle> {
        Vec::new()
    }
}

/// Maps compiled code back to the source lines it came from.
pub trait SourceLocator {
    fn source_lines_for(&self, function: &FunctionHandle) -> Vec<SourceLine>;
}
