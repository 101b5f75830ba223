//! Core data model for compiled code, decoded instructions, and run results.
//!
//! These types are shared by the decoder backends, the symbol resolver, the
//! traversal scheduler, and the formatting layer. Everything here is plain
//! data and serde-friendly so results can be exported as JSON.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DisassemblyError;

/// A contiguous block of compiled machine code for one function version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeRange {
    pub start_address: u64,
    pub length: u32,
}

impl CodeRange {
    pub fn new(start_address: u64, length: u32) -> Self {
        Self { start_address, length }
    }

    /// Exclusive end address.
    pub fn end(&self) -> u64 {
        self.start_address.saturating_add(self.length as u64)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start_address && address < self.end()
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Instruction-set family reported by the inspected runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Architecture {
    X86,
    X64,
    Arm64,
    Arm,
    Other(String),
}

impl Architecture {
    /// Pointer width in bytes for the architecture.
    pub fn pointer_size(&self) -> u32 {
        match self {
            Architecture::X86 | Architecture::Arm => 4,
            _ => 8,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Architecture::X86 => "x86",
            Architecture::X64 => "x64",
            Architecture::Arm64 => "arm64",
            Architecture::Arm => "arm",
            Architecture::Other(name) => name.as_str(),
        }
    }
}

impl FromStr for Architecture {
    type Err = DisassemblyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Ok(match lowered.as_str() {
            "x86" | "i386" | "i686" => Architecture::X86,
            "x64" | "x86_64" | "amd64" => Architecture::X64,
            "arm64" | "aarch64" => Architecture::Arm64,
            "arm" | "armv7" => Architecture::Arm,
            "" => {
                return Err(DisassemblyError::InvalidConfiguration(
                    "architecture must not be empty".into(),
                ))
            }
            _ => Architecture::Other(lowered),
        })
    }
}

impl TryFrom<String> for Architecture {
    type Error = DisassemblyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Architecture> for String {
    fn from(value: Architecture) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating system of the inspected process; drives the address guard value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOs {
    Windows,
    #[default]
    Linux,
    #[serde(rename = "macos")]
    MacOs,
    Other,
}

/// Version of the managed runtime, used to select stub templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RuntimeVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl RuntimeVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl FromStr for RuntimeVersion {
    type Err = DisassemblyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('v');
        // Pre-release suffixes ("8.0.0-rc.1") do not affect stub layout.
        let core = trimmed.split(['-', '+']).next().unwrap_or_default();
        let mut parts = core.split('.');
        let mut next = |label: &str, required: bool| -> Result<u32, DisassemblyError> {
            match parts.next() {
                Some(p) => p.parse::<u32>().map_err(|_| {
                    DisassemblyError::InvalidConfiguration(format!(
                        "invalid {label} component in runtime version '{s}'"
                    ))
                }),
                None if required => Err(DisassemblyError::InvalidConfiguration(format!(
                    "runtime version '{s}' is missing its {label} component"
                ))),
                None => Ok(0),
            }
        };
        let major = next("major", true)?;
        let minor = next("minor", false)?;
        let patch = next("patch", false)?;
        Ok(Self { major, minor, patch })
    }
}

impl TryFrom<String> for RuntimeVersion {
    type Error = DisassemblyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RuntimeVersion> for String {
    fn from(value: RuntimeVersion) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Whether the runtime has produced machine code for a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilationState {
    #[default]
    None,
    Jitted,
    ReadyToRun,
}

/// Runtime metadata for one function, as handed out by a code provider.
///
/// Identity is the native code start address, never the display name:
/// overloads can share a signature prefix and generic instantiations can
/// share a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionHandle {
    pub signature: String,
    #[serde(default)]
    pub type_name: String,
    pub native_code: u64,
    #[serde(default)]
    pub method_descriptor: u64,
    #[serde(default)]
    pub compilation: CompilationState,
    #[serde(default)]
    pub is_pinvoke: bool,
    #[serde(default = "default_true")]
    pub has_il: bool,
    #[serde(default)]
    pub code_ranges: Vec<CodeRange>,
}

fn default_true() -> bool {
    true
}

impl FunctionHandle {
    pub fn identity(&self) -> u64 {
        self.native_code
    }

    /// Signature qualified with the declaring type when the runtime only
    /// reported the bare method name.
    pub fn display_name(&self) -> String {
        if self.signature.contains('.') || self.type_name.is_empty() {
            self.signature.clone()
        } else {
            format!("{}.{}", self.type_name, self.signature)
        }
    }

    pub fn contains(&self, address: u64) -> bool {
        self.code_ranges.iter().any(|r| r.contains(address))
    }
}

/// Decoder verdict for one slice of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionKind {
    Valid,
    Invalid,
}

/// One machine instruction in program order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInstruction {
    pub instruction_pointer: u64,
    pub length: u32,
    pub kind: InstructionKind,
    pub bytes: Vec<u8>,
    pub mnemonic: String,
    pub operands: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_address: Option<u64>,
    #[serde(default)]
    pub is_referenced_address_indirect: bool,
    /// Name resolved for `referenced_address`, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

impl DecodedInstruction {
    /// Marker for bytes the decoder could not make sense of.
    pub fn invalid(instruction_pointer: u64, bytes: &[u8]) -> Self {
        Self {
            instruction_pointer,
            length: bytes.len() as u32,
            kind: InstructionKind::Invalid,
            bytes: bytes.to_vec(),
            mnemonic: "(bad)".into(),
            operands: String::new(),
            referenced_address: None,
            is_referenced_address_indirect: false,
            symbol: None,
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.kind == InstructionKind::Invalid
    }
}

/// Unit of traversal work: a function and its call distance from the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub function: FunctionHandle,
    pub depth: u32,
}

impl WorkItem {
    pub fn new(function: FunctionHandle, depth: u32) -> Self {
        Self { function, depth }
    }
}

/// One line of source text associated with an instruction pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLine {
    pub instruction_pointer: u64,
    pub file_path: String,
    pub line_number: u32,
    pub text: String,
}

/// Entry in an instruction map: interleaved source text or assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CodeEntry {
    Source(SourceLine),
    Asm(DecodedInstruction),
}

/// Group of entries printed together (one group per instruction pointer when
/// source interleaving is enabled, a single group otherwise).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstructionMap {
    pub entries: Vec<CodeEntry>,
}

/// Final per-function outcome: either a full annotated listing or a problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisassembledFunction {
    pub name: String,
    pub native_code_address: u64,
    pub instruction_maps: Vec<InstructionMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
}

impl DisassembledFunction {
    pub fn with_problem(name: impl Into<String>, native_code_address: u64, problem: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            native_code_address,
            instruction_maps: Vec::new(),
            problem: Some(problem.into()),
        }
    }

    /// All decoded instructions across maps, in output order.
    pub fn instructions(&self) -> impl Iterator<Item = &DecodedInstruction> {
        self.instruction_maps.iter().flat_map(|m| m.entries.iter()).filter_map(|e| match e {
            CodeEntry::Asm(a) => Some(a),
            CodeEntry::Source(_) => None,
        })
    }

    /// Lowest code address, used as the base for local `L` labels.
    pub fn label_base(&self) -> u64 {
        self.instructions().map(|i| i.instruction_pointer).min().unwrap_or(self.native_code_address)
    }
}

/// Resolved address to display name, shared across one run.
///
/// Append-only: the first name recorded for an address wins.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressNameMap {
    names: BTreeMap<u64, String>,
}

impl AddressNameMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a name; returns false (and keeps the old name) if already mapped.
    pub fn insert(&mut self, address: u64, name: impl Into<String>) -> bool {
        if self.names.contains_key(&address) {
            return false;
        }
        self.names.insert(address, name.into());
        true
    }

    pub fn get(&self, address: u64) -> Option<&str> {
        self.names.get(&address).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> {
        self.names.iter().map(|(a, n)| (*a, n.as_str()))
    }
}

/// Everything a run produces, ready for text or JSON export.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisassemblyResult {
    pub functions: Vec<DisassembledFunction>,
    pub address_names: AddressNameMap,
    #[serde(default)]
    pub errors: Vec<String>,
    pub pointer_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_version_parses_partial_and_prerelease() {
        assert_eq!("8".parse::<RuntimeVersion>().unwrap(), RuntimeVersion::new(8, 0, 0));
        assert_eq!("7.0.14".parse::<RuntimeVersion>().unwrap(), RuntimeVersion::new(7, 0, 14));
        assert_eq!("9.0.0-rc.2".parse::<RuntimeVersion>().unwrap(), RuntimeVersion::new(9, 0, 0));
        assert!("eight".parse::<RuntimeVersion>().is_err());
    }

    #[test]
    fn architecture_aliases_and_pointer_size() {
        assert_eq!("amd64".parse::<Architecture>().unwrap(), Architecture::X64);
        assert_eq!("AArch64".parse::<Architecture>().unwrap(), Architecture::Arm64);
        assert_eq!(Architecture::X86.pointer_size(), 4);
        assert_eq!(Architecture::Arm64.pointer_size(), 8);
        assert_eq!("mips".parse::<Architecture>().unwrap(), Architecture::Other("mips".into()));
    }

    #[test]
    fn address_name_map_keeps_first_writer() {
        let mut map = AddressNameMap::new();
        assert!(map.insert(0x10000, "First"));
        assert!(!map.insert(0x10000, "Second"));
        assert_eq!(map.get(0x10000), Some("First"));
    }

    #[test]
    fn display_name_qualifies_bare_signatures() {
        let f = FunctionHandle {
            signature: "Run()".into(),
            type_name: "App.Program".into(),
            native_code: 0x1000,
            method_descriptor: 0,
            compilation: CompilationState::Jitted,
            is_pinvoke: false,
            has_il: true,
            code_ranges: vec![],
        };
        assert_eq!(f.display_name(), "App.Program.Run()");
    }
}
