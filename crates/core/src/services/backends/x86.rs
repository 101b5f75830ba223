use capstone::arch::x86::{X86Operand, X86OperandType, X86Reg};
use capstone::{arch, prelude::*, Capstone, Insn};

use crate::error::{DisassemblyError, Result};
use crate::model::{Architecture, DecodedInstruction};
use crate::services::backends::{
    capstone_error, is_call_or_jump, ArchitectureBackend, InstructionStream, OperandTarget,
    TargetExtractor,
};
use crate::services::stubs::{x64_templates, StubTemplateSet};

/// Capstone-backed decoder for 32- and 64-bit x86.
pub struct X86Backend {
    cs: Capstone,
    bitness: u32,
}

impl X86Backend {
    pub fn new(bitness: u32) -> Result<Self> {
        let mode = match bitness {
            64 => arch::x86::ArchMode::Mode64,
            32 => arch::x86::ArchMode::Mode32,
            other => {
                return Err(DisassemblyError::UnsupportedArchitecture(format!(
                    "x86 with {other}-bit addressing"
                )))
            }
        };
        let cs = Capstone::new().x86().mode(mode).detail(true).build().map_err(capstone_error)?;
        Ok(Self { cs, bitness })
    }
}

impl ArchitectureBackend for X86Backend {
    fn architecture(&self) -> Architecture {
        if self.bitness == 64 {
            Architecture::X64
        } else {
            Architecture::X86
        }
    }

    fn pointer_size(&self) -> u32 {
        self.bitness / 8
    }

    fn min_instruction_len(&self) -> usize {
        1
    }

    fn decode<'a>(
        &'a self,
        bytes: &'a [u8],
        base: u64,
        reference_threshold: u64,
    ) -> Box<dyn Iterator<Item = DecodedInstruction> + 'a> {
        let extractor = X86Extractor { pointer_size: self.pointer_size() };
        Box::new(InstructionStream::new(
            &self.cs,
            bytes,
            base,
            self.min_instruction_len(),
            reference_threshold,
            extractor,
        ))
    }

    fn stub_templates(&self, page_stride: u64) -> StubTemplateSet {
        if self.bitness == 64 {
            x64_templates(page_stride)
        } else {
            StubTemplateSet::empty()
        }
    }
}

struct X86Extractor {
    pointer_size: u32,
}

impl X86Extractor {
    fn truncate(&self, value: u64) -> u64 {
        if self.pointer_size == 4 {
            value & 0xFFFF_FFFF
        } else {
            value
        }
    }

    /// Address denoted by one operand, if the operand kind can denote one.
    fn operand_address(&self, op: &X86Operand, branch: bool, next_ip: u64) -> Option<u64> {
        match &op.op_type {
            X86OperandType::Imm(imm) => {
                if branch {
                    return Some(self.truncate(*imm as u64));
                }
                match op.size {
                    1 => None,
                    // A plain 32-bit immediate cannot hold a 64-bit address.
                    4 if self.pointer_size == 8 => None,
                    _ => Some(self.truncate(*imm as u64)),
                }
            }
            X86OperandType::Mem(mem) => {
                if mem.base().0 == X86Reg::X86_REG_RIP as u16 {
                    Some(next_ip.wrapping_add(mem.disp() as u64))
                } else if mem.base().0 == 0 && mem.index().0 == 0 {
                    Some(self.truncate(mem.disp() as u64))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

impl TargetExtractor for X86Extractor {
    fn extract(&mut self, cs: &Capstone, insn: &Insn) -> OperandTarget {
        let Ok(detail) = cs.insn_detail(insn) else {
            return OperandTarget::default();
        };
        let arch_detail = detail.arch_detail();
        let Some(x86) = arch_detail.x86() else {
            return OperandTarget::default();
        };
        let operands: Vec<X86Operand> = x86.operands().collect();
        let branch = is_call_or_jump(cs, insn);
        let is_indirect = branch
            && operands
                .iter()
                .any(|op| matches!(op.op_type, X86OperandType::Reg(_) | X86OperandType::Mem(_)));
        let next_ip = insn.address().wrapping_add(insn.bytes().len() as u64);
        let address = operands.iter().find_map(|op| self.operand_address(op, branch, next_ip));
        OperandTarget { address, is_indirect }
    }
}
