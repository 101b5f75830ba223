#![allow(dead_code)]

use jitlens_core::model::{
    Architecture, CodeRange, CompilationState, FunctionHandle, RuntimeVersion, TargetOs,
};
use jitlens_core::snapshot::{MemoryRegion, NamedAddress, Snapshot, SnapshotProvider};

pub const A: u64 = 0x10_0000;
pub const B: u64 = 0x20_0000;
pub const C: u64 = 0x28_0000;
pub const CELL: u64 = 0x30_0000;
pub const STUB: u64 = 0x40_0000;

pub fn jitted(signature: &str, native_code: u64, length: u32) -> FunctionHandle {
    FunctionHandle {
        signature: signature.to_string(),
        type_name: "App.Program".to_string(),
        native_code,
        method_descriptor: native_code + 0x8000_0000,
        compilation: CompilationState::Jitted,
        is_pinvoke: false,
        has_il: true,
        code_ranges: vec![CodeRange::new(native_code, length)],
    }
}

pub fn snapshot(architecture: Architecture, version: &str) -> Snapshot {
    Snapshot::new(architecture, TargetOs::Linux, version.parse::<RuntimeVersion>().expect("version"))
}

/// Register a compiled function and the bytes of its single code range.
pub fn add_function(snapshot: &mut Snapshot, signature: &str, address: u64, code: Vec<u8>) -> FunctionHandle {
    let handle = jitted(signature, address, code.len() as u32);
    snapshot.functions.push(handle.clone());
    snapshot.memory.push(MemoryRegion::new(address, code));
    handle
}

pub fn add_helper(snapshot: &mut Snapshot, address: u64, name: &str) {
    snapshot.helpers.push(NamedAddress { address, name: name.to_string() });
}

pub fn add_pointer(snapshot: &mut Snapshot, cell: u64, value: u64) {
    let size = snapshot.architecture.pointer_size();
    snapshot.memory.push(MemoryRegion::pointer(cell, value, size));
}

pub fn provider(snapshot: Snapshot) -> SnapshotProvider {
    SnapshotProvider::new(snapshot).expect("valid snapshot")
}

/// `call rel32` located at `from`.
pub fn call_rel32(from: u64, to: u64) -> Vec<u8> {
    let rel = to.wrapping_sub(from + 5) as u32;
    let mut bytes = vec![0xe8];
    bytes.extend(rel.to_le_bytes());
    bytes
}

/// `call qword ptr [rip + disp]` located at `from`, reading the cell at `cell`.
pub fn call_rip_indirect(from: u64, cell: u64) -> Vec<u8> {
    let disp = cell.wrapping_sub(from + 6) as u32;
    let mut bytes = vec![0xff, 0x15];
    bytes.extend(disp.to_le_bytes());
    bytes
}

pub const RET: u8 = 0xc3;
pub const NOP: u8 = 0x90;

pub fn arm64_words(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// `bl <to>` located at `from`.
pub fn arm64_bl(from: u64, to: u64) -> u32 {
    let imm26 = ((to.wrapping_sub(from) as i64) / 4) as u32 & 0x03FF_FFFF;
    0x9400_0000 | imm26
}

pub const ARM64_RET: u32 = 0xD65F_03C0;
pub const ARM64_NOP: u32 = 0xD503_201F;
