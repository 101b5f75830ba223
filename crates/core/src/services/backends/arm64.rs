use std::collections::HashMap;

use capstone::arch::arm64::Arm64OperandType;
use capstone::{arch, prelude::*, Capstone, Insn, RegId};

use crate::error::Result;
use crate::model::{Architecture, DecodedInstruction};
use crate::services::backends::{
    capstone_error, ArchitectureBackend, InstructionStream, OperandTarget, TargetExtractor,
};
use crate::services::stubs::{arm64_templates, StubTemplateSet};

/// Capstone-backed decoder for Arm64.
///
/// Arm64 never encodes a full address in one instruction, so the extractor
/// follows the usual address-forming sequences (`adrp`/`add`, `movz`/`movk`,
/// `ldr` from a literal or a computed cell) across instructions.
pub struct Arm64Backend {
    cs: Capstone,
}

impl Arm64Backend {
    pub fn new() -> Result<Self> {
        let cs = Capstone::new()
            .arm64()
            .mode(arch::arm64::ArchMode::Arm)
            .detail(true)
            .build()
            .map_err(capstone_error)?;
        Ok(Self { cs })
    }
}

impl ArchitectureBackend for Arm64Backend {
    fn architecture(&self) -> Architecture {
        Architecture::Arm64
    }

    fn pointer_size(&self) -> u32 {
        8
    }

    fn min_instruction_len(&self) -> usize {
        4
    }

    fn decode<'a>(
        &'a self,
        bytes: &'a [u8],
        base: u64,
        reference_threshold: u64,
    ) -> Box<dyn Iterator<Item = DecodedInstruction> + 'a> {
        Box::new(InstructionStream::new(
            &self.cs,
            bytes,
            base,
            self.min_instruction_len(),
            reference_threshold,
            Arm64Extractor::default(),
        ))
    }

    fn stub_templates(&self, page_stride: u64) -> StubTemplateSet {
        arm64_templates(page_stride)
    }
}

/// Tracks what is statically known about general-purpose registers.
#[derive(Default)]
struct Arm64Extractor {
    /// Registers holding a computed constant or address.
    values: HashMap<String, u64>,
    /// Registers loaded from a known pointer cell (cell address kept).
    cells: HashMap<String, u64>,
}

impl Arm64Extractor {
    fn forget(&mut self, reg: &str) {
        self.values.remove(reg);
        self.cells.remove(reg);
    }

    fn set_value(&mut self, reg: String, value: u64) {
        self.cells.remove(&reg);
        self.values.insert(reg, value);
    }

    fn set_cell(&mut self, reg: String, cell: u64) {
        self.values.remove(&reg);
        self.cells.insert(reg, cell);
    }
}

fn direct(address: u64) -> OperandTarget {
    OperandTarget { address: Some(address), is_indirect: false }
}

/// `w7` and `x7` name the same register.
fn canonical_register(name: &str) -> String {
    match name.strip_prefix('w') {
        Some(rest) if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) => {
            format!("x{rest}")
        }
        _ => name.to_string(),
    }
}

/// Amount of an `lsl #n` modifier in the operand text, or 0.
fn shift_amount(op_str: &str) -> u32 {
    let Some(idx) = op_str.find("lsl #") else {
        return 0;
    };
    let digits = op_str[idx + 5..].trim();
    let digits = digits.split(|c: char| c == ',' || c.is_whitespace()).next().unwrap_or("");
    match digits.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).unwrap_or(0),
        None => digits.parse().unwrap_or(0),
    }
}

fn is_non_writing(mnemonic: &str) -> bool {
    mnemonic.starts_with("st")
        || mnemonic.starts_with("b.")
        || matches!(
            mnemonic,
            "b" | "bl"
                | "br"
                | "blr"
                | "cbz"
                | "cbnz"
                | "tbz"
                | "tbnz"
                | "cmp"
                | "cmn"
                | "tst"
                | "ccmp"
                | "ccmn"
                | "nop"
                | "dmb"
                | "dsb"
                | "isb"
                | "prfm"
        )
}

impl TargetExtractor for Arm64Extractor {
    fn extract(&mut self, cs: &Capstone, insn: &Insn) -> OperandTarget {
        let mnemonic = insn.mnemonic().unwrap_or("");
        let op_str = insn.op_str().unwrap_or("");
        let Ok(detail) = cs.insn_detail(insn) else {
            return OperandTarget::default();
        };
        let arch_detail = detail.arch_detail();
        let Some(arm64) = arch_detail.arm64() else {
            return OperandTarget::default();
        };
        let ops: Vec<Arm64OperandType> = arm64.operands().map(|op| op.op_type).collect();
        let reg_name = |reg: &RegId| cs.reg_name(*reg).map(|n| canonical_register(&n));
        let dest = match ops.first() {
            Some(Arm64OperandType::Reg(r)) => reg_name(r),
            _ => None,
        };

        match mnemonic {
            "bl" | "b" => ops.iter().find_map(|op| match op {
                Arm64OperandType::Imm(imm) => Some(direct(*imm as u64)),
                _ => None,
            }),
            m if m.starts_with("b.") || matches!(m, "cbz" | "cbnz" | "tbz" | "tbnz") => {
                ops.iter().rev().find_map(|op| match op {
                    Arm64OperandType::Imm(imm) => Some(direct(*imm as u64)),
                    _ => None,
                })
            }
            "br" | "blr" => {
                let target = dest.as_deref().and_then(|r| {
                    if let Some(cell) = self.cells.get(r) {
                        Some(OperandTarget { address: Some(*cell), is_indirect: true })
                    } else {
                        self.values.get(r).map(|v| direct(*v))
                    }
                });
                if mnemonic == "br" {
                    self.values.clear();
                    self.cells.clear();
                }
                // Register branches are indirect transfers even when untracked.
                Some(target.unwrap_or(OperandTarget { address: None, is_indirect: true }))
            }
            "ret" => {
                self.values.clear();
                self.cells.clear();
                None
            }
            "adr" | "adrp" => match (dest, ops.get(1)) {
                (Some(d), Some(Arm64OperandType::Imm(imm))) => {
                    let value = *imm as u64;
                    self.set_value(d, value);
                    (mnemonic == "adr").then(|| direct(value))
                }
                (Some(d), _) => {
                    self.forget(&d);
                    None
                }
                _ => None,
            },
            "add" => match (dest, ops.get(1), ops.get(2)) {
                (Some(d), Some(Arm64OperandType::Reg(src)), Some(Arm64OperandType::Imm(imm))) => {
                    let known = reg_name(src).and_then(|s| self.values.get(&s).copied());
                    match known {
                        Some(base) => {
                            let value = base.wrapping_add((*imm as u64) << shift_amount(op_str));
                            self.set_value(d, value);
                            Some(direct(value))
                        }
                        None => {
                            self.forget(&d);
                            None
                        }
                    }
                }
                (Some(d), _, _) => {
                    self.forget(&d);
                    None
                }
                _ => None,
            },
            "mov" | "movz" => match (dest, ops.get(1)) {
                (Some(d), Some(Arm64OperandType::Imm(imm))) => {
                    let value = (*imm as u64) << shift_amount(op_str);
                    self.set_value(d, value);
                    Some(direct(value))
                }
                (Some(d), Some(Arm64OperandType::Reg(src))) => {
                    let src = reg_name(src);
                    let value = src.as_ref().and_then(|s| self.values.get(s).copied());
                    let cell = src.as_ref().and_then(|s| self.cells.get(s).copied());
                    self.forget(&d);
                    if let Some(v) = value {
                        self.set_value(d, v);
                    } else if let Some(c) = cell {
                        self.set_cell(d, c);
                    }
                    None
                }
                (Some(d), _) => {
                    self.forget(&d);
                    None
                }
                _ => None,
            },
            "movk" => match (dest, ops.get(1)) {
                (Some(d), Some(Arm64OperandType::Imm(imm))) => {
                    let shift = shift_amount(op_str);
                    match self.values.get(&d).copied() {
                        Some(old) => {
                            let mask = 0xFFFFu64 << shift;
                            let value = (old & !mask) | (((*imm as u64) << shift) & mask);
                            self.set_value(d, value);
                            Some(direct(value))
                        }
                        None => {
                            self.forget(&d);
                            None
                        }
                    }
                }
                (Some(d), _) => {
                    self.forget(&d);
                    None
                }
                _ => None,
            },
            "ldr" => match (dest, ops.get(1)) {
                (Some(d), Some(Arm64OperandType::Imm(literal))) => {
                    let cell = *literal as u64;
                    self.set_cell(d, cell);
                    Some(direct(cell))
                }
                (Some(d), Some(Arm64OperandType::Mem(mem))) => {
                    let base = reg_name(&mem.base()).and_then(|b| self.values.get(&b).copied());
                    match base {
                        Some(base) if mem.index().0 == 0 => {
                            let cell = base.wrapping_add(mem.disp() as i64 as u64);
                            self.set_cell(d, cell);
                            Some(direct(cell))
                        }
                        _ => {
                            self.forget(&d);
                            None
                        }
                    }
                }
                (Some(d), _) => {
                    self.forget(&d);
                    None
                }
                _ => None,
            },
            m => {
                if !is_non_writing(m) {
                    if let Some(d) = dest {
                        self.forget(&d);
                    }
                }
                None
            }
        }
        .unwrap_or_default()
    }
}
