//! File-backed stand-in for a live runtime.
//!
//! A snapshot captures everything the engine asks a code provider for:
//! target shape, compiled functions, named runtime structures, and the raw
//! memory regions holding code, pointer cells and stub pages. It loads from
//! JSON or YAML and is what the CLI and the integration tests drive the
//! engine with.

pub mod source;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result as AnyResult};
use serde::{Deserialize, Serialize};

use crate::config::is_yaml_path;
use crate::error::{DisassemblyError, Result};
use crate::model::{
    Architecture, CompilationState, FunctionHandle, RuntimeVersion, SourceLine, TargetOs,
};
use crate::services::provider::{CodeProvider, SourceLocator};

pub use source::{smart_pointer, SourceMapping, SourceTable};

fn default_page_size() -> u64 {
    4096
}

/// A named address (helper routine or method table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedAddress {
    pub address: u64,
    pub name: String,
}

/// Bytes of target memory starting at `address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub address: u64,
    #[serde(with = "hex_bytes")]
    pub bytes: Vec<u8>,
}

impl MemoryRegion {
    pub fn new(address: u64, bytes: impl Into<Vec<u8>>) -> Self {
        Self { address, bytes: bytes.into() }
    }

    /// A pointer-sized little-endian cell holding `value`.
    pub fn pointer(address: u64, value: u64, pointer_size: u32) -> Self {
        let bytes = value.to_le_bytes()[..pointer_size as usize].to_vec();
        Self { address, bytes }
    }

    pub fn end(&self) -> u64 {
        self.address.saturating_add(self.bytes.len() as u64)
    }
}

/// Serialized description of an inspected runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub architecture: Architecture,
    #[serde(default)]
    pub os: TargetOs,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    pub runtime_version: RuntimeVersion,
    #[serde(default)]
    pub functions: Vec<FunctionHandle>,
    #[serde(default)]
    pub helpers: Vec<NamedAddress>,
    #[serde(default)]
    pub method_tables: Vec<NamedAddress>,
    #[serde(default)]
    pub memory: Vec<MemoryRegion>,
    #[serde(default)]
    pub sources: Vec<SourceMapping>,
}

impl Snapshot {
    pub fn new(architecture: Architecture, os: TargetOs, runtime_version: RuntimeVersion) -> Self {
        Self {
            architecture,
            os,
            page_size: default_page_size(),
            runtime_version,
            functions: Vec::new(),
            helpers: Vec::new(),
            method_tables: Vec::new(),
            memory: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// Look a function up by exact signature, display name, or `0x` code address.
    pub fn find_function(&self, key: &str) -> Option<&FunctionHandle> {
        let key = key.trim();
        if let Some(hex) = key.strip_prefix("0x").or_else(|| key.strip_prefix("0X")) {
            let address = u64::from_str_radix(hex, 16).ok()?;
            return self.functions.iter().find(|f| f.native_code == address);
        }
        self.functions.iter().find(|f| f.signature == key || f.display_name() == key)
    }
}

/// Load a snapshot from disk; `.yaml`/`.yml` files are YAML, everything else JSON.
pub fn load_snapshot(path: &Path) -> AnyResult<Snapshot> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot at {}", path.display()))?;
    let snapshot = if is_yaml_path(path) {
        serde_yaml::from_str(&body)
            .with_context(|| format!("Failed to parse snapshot YAML at {}", path.display()))?
    } else {
        serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse snapshot JSON at {}", path.display()))?
    };
    Ok(snapshot)
}

/// [`CodeProvider`] and [`SourceLocator`] over a [`Snapshot`].
#[derive(Debug)]
pub struct SnapshotProvider {
    snapshot: Snapshot,
    /// Memory regions sorted by start address.
    regions: Vec<MemoryRegion>,
    helpers: HashMap<u64, String>,
    method_tables: HashMap<u64, String>,
    sources: SourceTable,
}

impl SnapshotProvider {
    /// Index a snapshot. Overlapping memory regions are rejected.
    pub fn new(snapshot: Snapshot) -> Result<Self> {
        let mut regions = snapshot.memory.clone();
        regions.sort_by_key(|r| r.address);
        for pair in regions.windows(2) {
            if pair[1].address < pair[0].end() {
                return Err(DisassemblyError::Snapshot(format!(
                    "memory regions at 0x{:X} and 0x{:X} overlap",
                    pair[0].address, pair[1].address
                )));
            }
        }
        for mapping in &snapshot.sources {
            if !snapshot.functions.iter().any(|f| f.native_code == mapping.native_code) {
                return Err(DisassemblyError::Snapshot(format!(
                    "source mapping refers to unknown function at 0x{:X}",
                    mapping.native_code
                )));
            }
        }
        let helpers = snapshot.helpers.iter().map(|h| (h.address, h.name.clone())).collect();
        let method_tables =
            snapshot.method_tables.iter().map(|m| (m.address, m.name.clone())).collect();
        let sources = SourceTable::new(snapshot.sources.clone());
        Ok(Self { snapshot, regions, helpers, method_tables, sources })
    }

    /// Resolve relative source file paths against `root`.
    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sources = self.sources.with_root(root);
        self
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    fn region_at(&self, address: u64) -> Option<&MemoryRegion> {
        let idx = self.regions.partition_point(|r| r.address <= address);
        let region = self.regions.get(idx.checked_sub(1)?)?;
        (address < region.end()).then_some(region)
    }
}

impl CodeProvider for SnapshotProvider {
    fn architecture(&self) -> Architecture {
        self.snapshot.architecture.clone()
    }

    fn target_os(&self) -> TargetOs {
        self.snapshot.os
    }

    fn runtime_version(&self) -> RuntimeVersion {
        self.snapshot.runtime_version
    }

    fn page_size(&self) -> u64 {
        self.snapshot.page_size
    }

    fn read_memory(&self, address: u64, buf: &mut [u8]) -> usize {
        let Some(region) = self.region_at(address) else {
            return 0;
        };
        let offset = (address - region.address) as usize;
        let available = &region.bytes[offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        n
    }

    fn lookup_helper_name(&self, address: u64) -> Option<String> {
        self.helpers.get(&address).cloned()
    }

    fn lookup_function_by_address(&self, address: u64) -> Option<FunctionHandle> {
        self.snapshot
            .functions
            .iter()
            .find(|f| f.compilation != CompilationState::None && f.contains(address))
            .cloned()
    }

    fn lookup_function_descriptor(&self, address: u64) -> Option<FunctionHandle> {
        if address == 0 {
            return None;
        }
        self.snapshot.functions.iter().find(|f| f.method_descriptor == address).cloned()
    }

    fn lookup_method_table_name(&self, address: u64) -> Option<String> {
        self.method_tables.get(&address).cloned()
    }

    fn enumerate_functions(&self) -> Vec<FunctionHandle> {
        self.snapshot.functions.clone()
    }
}

impl SourceLocator for SnapshotProvider {
    fn source_lines_for(&self, function: &FunctionHandle) -> Vec<SourceLine> {
        self.sources.lines_for(function.native_code)
    }
}

/// Hex text encoding for byte buffers; whitespace between digits is ignored.
mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let text = bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ");
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        decode(&text).map_err(de::Error::custom)
    }

    pub fn decode(text: &str) -> Result<Vec<u8>, String> {
        let digits: Vec<u8> = text.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
        if digits.len() % 2 != 0 {
            return Err(format!("odd number of hex digits in '{text}'"));
        }
        digits
            .chunks(2)
            .map(|pair| {
                let s = std::str::from_utf8(pair).map_err(|e| e.to_string())?;
                u8::from_str_radix(s, 16).map_err(|_| format!("invalid hex byte '{s}'"))
            })
            .collect()
    }
}
