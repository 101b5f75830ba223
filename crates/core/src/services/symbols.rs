use tracing::debug;

use crate::model::{AddressNameMap, CodeRange, FunctionHandle};
use crate::services::provider::CodeProvider;
use crate::services::reader::CodeReader;
use crate::services::traversal::Scheduler;

/// The function currently being disassembled, as seen by the resolver.
#[derive(Debug, Clone, Copy)]
pub struct CurrentFunction<'a> {
    pub handle: &'a FunctionHandle,
    pub ranges: &'a [CodeRange],
    /// Lowest start address among `ranges`; local labels are relative to it.
    pub label_base: u64,
    pub depth: u32,
}

impl<'a> CurrentFunction<'a> {
    pub fn new(handle: &'a FunctionHandle, ranges: &'a [CodeRange], depth: u32) -> Self {
        let label_base =
            ranges.iter().map(|r| r.start_address).min().unwrap_or(handle.native_code);
        Self { handle, ranges, label_base, depth }
    }

    pub fn contains(&self, address: u64) -> bool {
        self.ranges.iter().any(|r| r.contains(address))
    }
}

/// `L` label for a target inside the current function.
pub fn local_label(offset: u64) -> String {
    format!("L{offset:04x}")
}

/// Turns target addresses into display names, discovering callees on the way.
pub struct SymbolResolver<'r, 'p> {
    provider: &'p dyn CodeProvider,
    reader: &'r CodeReader<'p>,
    min_valid_address: u64,
}

impl<'r, 'p> SymbolResolver<'r, 'p> {
    pub fn new(
        provider: &'p dyn CodeProvider,
        reader: &'r CodeReader<'p>,
        min_valid_address: u64,
    ) -> Self {
        Self { provider, reader, min_valid_address }
    }

    /// Addresses outside this window are never handed to the runtime.
    pub fn is_valid_address(&self, address: u64) -> bool {
        address != 0 && address != u64::MAX && address >= self.min_valid_address
    }

    /// Name for `address`, first match wins:
    /// local label, already-known name, helper, compiled function (directly
    /// or through one pointer cell), method descriptor, method table.
    ///
    /// Newly seen compiled functions are queued one level deeper than the
    /// current function.
    pub fn resolve(
        &self,
        address: u64,
        is_precode: bool,
        current: &CurrentFunction<'_>,
        names: &mut AddressNameMap,
        scheduler: &mut Scheduler,
    ) -> Option<String> {
        if current.contains(address) {
            return Some(local_label(address - current.label_base));
        }
        if let Some(known) = names.get(address) {
            return Some(known.to_string());
        }
        if !self.is_valid_address(address) {
            return None;
        }

        if let Some(helper) = self.provider.lookup_helper_name(address).filter(|n| !n.is_empty()) {
            names.insert(address, helper.clone());
            return Some(helper);
        }

        let Some(function) = self.function_at(address) else {
            return self.name_runtime_structure(address, is_precode, names);
        };

        if function.identity() == current.handle.identity() {
            return None;
        }
        if !scheduler.is_seen(function.identity()) {
            scheduler.enqueue(function.clone(), current.depth.saturating_add(1));
        }
        let name = function.display_name();
        names.insert(address, name.clone());
        Some(name)
    }

    /// Compiled function containing `address`, or containing the value of
    /// the pointer cell at `address` when it is pointer aligned.
    fn function_at(&self, address: u64) -> Option<FunctionHandle> {
        if let Some(function) = self.provider.lookup_function_by_address(address) {
            return Some(function);
        }
        let align = self.reader.pointer_size() as u64;
        if address % align != 0 {
            return None;
        }
        let target = self.reader.read_pointer(address).filter(|a| self.is_valid_address(*a))?;
        debug!("0x{address:X} is a pointer cell for 0x{target:X}");
        self.provider.lookup_function_by_address(target)
    }

    fn name_runtime_structure(
        &self,
        address: u64,
        is_precode: bool,
        names: &mut AddressNameMap,
    ) -> Option<String> {
        if let Some(descriptor) = self.provider.lookup_function_descriptor(address) {
            let name = if is_precode {
                format!("Precode of {}", descriptor.signature)
            } else {
                format!("MD_{}", descriptor.signature)
            };
            names.insert(address, name.clone());
            return Some(name);
        }
        let table = self.provider.lookup_method_table_name(address).filter(|n| !n.is_empty())?;
        let name = format!("MT_{table}");
        names.insert(address, name.clone());
        Some(name)
    }
}
