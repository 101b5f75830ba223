//! Text rendering of disassembly results.
//!
//! The engine hands out structured [`DisassemblyResult`]s; everything about
//! how a line looks lives here, behind [`InstructionFormatter`].

use std::fmt::Write as _;

use crate::model::{AddressNameMap, CodeEntry, DecodedInstruction, DisassemblyResult};

/// Turns one decoded instruction into one printable line.
pub trait InstructionFormatter {
    /// `label_base` is the function's lowest code address; `names` is the
    /// run's address map.
    fn format(&self, insn: &DecodedInstruction, label_base: u64, names: &AddressNameMap) -> String;
}

/// `L0012: call 0x7ff61234; App.Program.Run()` style output.
#[derive(Debug, Clone, Copy)]
pub struct TextFormatter {
    pub print_addresses: bool,
    pub pointer_size: u32,
}

impl TextFormatter {
    pub fn new(print_addresses: bool, pointer_size: u32) -> Self {
        Self { print_addresses, pointer_size }
    }
}

impl Default for TextFormatter {
    fn default() -> Self {
        Self::new(false, 8)
    }
}

impl InstructionFormatter for TextFormatter {
    fn format(&self, insn: &DecodedInstruction, label_base: u64, names: &AddressNameMap) -> String {
        let mut line = String::new();
        if self.print_addresses {
            let width = if self.pointer_size == 4 { 8 } else { 16 };
            let _ = write!(line, "{:0width$X} ", insn.instruction_pointer, width = width);
        }
        let offset = insn.instruction_pointer.wrapping_sub(label_base);
        let _ = write!(line, "L{offset:04x}: ");

        if insn.is_invalid() {
            line.push_str("(bad)");
            return line;
        }

        line.push_str(&insn.mnemonic);
        let name = insn.referenced_address.and_then(|address| {
            insn.symbol.as_deref().or_else(|| names.get(address)).map(|n| (address, n))
        });

        let mut operands = insn.operands.clone();
        let mut trailer = None;
        if let Some((address, name)) = name {
            let literal = format!("0x{address:x}");
            if !insn.is_referenced_address_indirect && operands.contains(&literal) {
                operands = operands.replace(&literal, name);
            } else {
                trailer = Some(name);
            }
        }
        if !operands.is_empty() {
            line.push(' ');
            line.push_str(&operands);
        }
        if let Some(name) = trailer {
            let _ = write!(line, "; {name}");
        }
        line
    }
}

/// Plain-text report: one `; <name>` header per function, source lines as
/// comments, instructions indented beneath.
pub fn render_text_report(result: &DisassemblyResult, formatter: &dyn InstructionFormatter) -> String {
    let mut out = String::new();
    for function in &result.functions {
        let _ = writeln!(out, "; {}", function.name);
        if let Some(problem) = &function.problem {
            let _ = writeln!(out, "    ; {problem}");
            out.push('\n');
            continue;
        }
        let base = function.label_base();
        for map in &function.instruction_maps {
            for entry in &map.entries {
                match entry {
                    CodeEntry::Source(source) => {
                        for text in source.text.lines() {
                            let _ = writeln!(out, "    ; {text}");
                        }
                    }
                    CodeEntry::Asm(insn) => {
                        let _ = writeln!(
                            out,
                            "    {}",
                            formatter.format(insn, base, &result.address_names)
                        );
                    }
                }
            }
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InstructionKind;

    fn insn(ip: u64, mnemonic: &str, operands: &str) -> DecodedInstruction {
        DecodedInstruction {
            instruction_pointer: ip,
            length: 4,
            kind: InstructionKind::Valid,
            bytes: vec![0; 4],
            mnemonic: mnemonic.into(),
            operands: operands.into(),
            referenced_address: None,
            is_referenced_address_indirect: false,
            symbol: None,
        }
    }

    #[test]
    fn direct_reference_is_replaced_inline() {
        let mut call = insn(0x10010, "bl", "#0x20000");
        call.referenced_address = Some(0x20000);
        let mut names = AddressNameMap::new();
        names.insert(0x20000, "App.Program.Run()");
        let line = TextFormatter::default().format(&call, 0x10000, &names);
        assert_eq!(line, "L0010: bl #App.Program.Run()");
    }

    #[test]
    fn indirect_reference_gets_trailing_comment() {
        let mut call = insn(0x10004, "call", "qword ptr [rip + 0x1234]");
        call.referenced_address = Some(0x7fff_0000);
        call.is_referenced_address_indirect = true;
        call.symbol = Some("App.Program.Run()".into());
        let line = TextFormatter::default().format(&call, 0x10000, &AddressNameMap::new());
        assert_eq!(line, "L0004: call qword ptr [rip + 0x1234]; App.Program.Run()");
    }

    #[test]
    fn addresses_are_padded_to_pointer_width() {
        let ret = insn(0x401000, "ret", "");
        let line = TextFormatter::new(true, 4).format(&ret, 0x401000, &AddressNameMap::new());
        assert_eq!(line, "00401000 L0000: ret");
    }

    #[test]
    fn invalid_instruction_renders_bad() {
        let bad = DecodedInstruction::invalid(0x10002, &[0x06]);
        let line = TextFormatter::default().format(&bad, 0x10000, &AddressNameMap::new());
        assert_eq!(line, "L0002: (bad)");
    }
}
