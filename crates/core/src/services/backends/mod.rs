//! Instruction decoding and operand target extraction per instruction set.
//!
//! Two families are supported:
//! - x86 / x64 (variable-length, decoded with Capstone in 32- or 64-bit mode)
//! - Arm64 (fixed 4-byte instructions, decoded with Capstone)
//!
//! A backend is selected once per run from the architecture the code
//! provider reports; every other component talks to the trait.

pub mod arm64;
pub mod x86;

use capstone::{Capstone, Insn, InsnGroupId, InsnGroupType};

use crate::error::{DisassemblyError, Result};
use crate::model::{Architecture, DecodedInstruction, InstructionKind};
use crate::services::stubs::StubTemplateSet;

pub use arm64::Arm64Backend;
pub use x86::X86Backend;

/// Capability interface implemented once per instruction-set family.
pub trait ArchitectureBackend {
    fn architecture(&self) -> Architecture;

    fn pointer_size(&self) -> u32;

    /// Shortest valid instruction; also the width of an invalid marker.
    fn min_instruction_len(&self) -> usize;

    /// Lazily decode `bytes` located at `base`. Candidates at or below
    /// `reference_threshold` are dropped as small immediates.
    fn decode<'a>(
        &'a self,
        bytes: &'a [u8],
        base: u64,
        reference_threshold: u64,
    ) -> Box<dyn Iterator<Item = DecodedInstruction> + 'a>;

    /// Known stub byte templates, highest priority first.
    fn stub_templates(&self, page_stride: u64) -> StubTemplateSet;
}

/// Pick the backend for the target's reported architecture.
pub fn backend_for(architecture: &Architecture) -> Result<Box<dyn ArchitectureBackend>> {
    match architecture {
        Architecture::X64 => Ok(Box::new(X86Backend::new(64)?)),
        Architecture::X86 => Ok(Box::new(X86Backend::new(32)?)),
        Architecture::Arm64 => Ok(Box::new(Arm64Backend::new()?)),
        other => Err(DisassemblyError::UnsupportedArchitecture(other.to_string())),
    }
}

/// Target address candidate pulled out of one instruction's operands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperandTarget {
    pub address: Option<u64>,
    pub is_indirect: bool,
}

/// Per-family operand inspection, fed instructions in program order.
pub(crate) trait TargetExtractor {
    fn extract(&mut self, cs: &Capstone, insn: &Insn) -> OperandTarget;
}

/// Lazy, finite, non-restartable sequence of decoded instructions.
pub(crate) struct InstructionStream<'a, E> {
    cs: &'a Capstone,
    bytes: &'a [u8],
    base: u64,
    offset: usize,
    min_len: usize,
    threshold: u64,
    extractor: E,
}

impl<'a, E: TargetExtractor> InstructionStream<'a, E> {
    pub(crate) fn new(
        cs: &'a Capstone,
        bytes: &'a [u8],
        base: u64,
        min_len: usize,
        threshold: u64,
        extractor: E,
    ) -> Self {
        Self { cs, bytes, base, offset: 0, min_len: min_len.max(1), threshold, extractor }
    }
}

impl<'a, E: TargetExtractor> Iterator for InstructionStream<'a, E> {
    type Item = DecodedInstruction;

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = self.bytes;
        let remaining = &bytes[self.offset..];
        if remaining.len() < self.min_len {
            return None;
        }
        let ip = self.base.wrapping_add(self.offset as u64);
        let cs = self.cs;
        let threshold = self.threshold;
        let extractor = &mut self.extractor;

        let decoded = match cs.disasm_count(remaining, ip, 1) {
            Ok(insns) => insns.iter().next().map(|insn| {
                let target = extractor.extract(cs, &insn);
                DecodedInstruction {
                    instruction_pointer: ip,
                    length: insn.bytes().len() as u32,
                    kind: InstructionKind::Valid,
                    bytes: insn.bytes().to_vec(),
                    mnemonic: insn.mnemonic().unwrap_or("").to_string(),
                    operands: insn.op_str().unwrap_or("").to_string(),
                    referenced_address: target.address.filter(|a| *a > threshold),
                    is_referenced_address_indirect: target.is_indirect,
                    symbol: None,
                }
            }),
            Err(_) => None,
        };

        let instruction = match decoded {
            Some(insn) if insn.length > 0 => insn,
            _ => DecodedInstruction::invalid(ip, &remaining[..self.min_len]),
        };
        self.offset += instruction.length as usize;
        Some(instruction)
    }
}

fn has_group(cs: &Capstone, insn: &Insn, group: u8) -> bool {
    cs.insn_detail(insn)
        .map(|detail| detail.groups().iter().any(|g| *g == InsnGroupId(group)))
        .unwrap_or(false)
}

pub(crate) fn is_call_or_jump(cs: &Capstone, insn: &Insn) -> bool {
    has_group(cs, insn, InsnGroupType::CS_GRP_CALL as u8)
        || has_group(cs, insn, InsnGroupType::CS_GRP_JUMP as u8)
}

pub(crate) fn capstone_error(e: capstone::Error) -> DisassemblyError {
    DisassemblyError::Decoder(format!("capstone init failed: {e}"))
}
