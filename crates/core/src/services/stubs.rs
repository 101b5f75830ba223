//! Recognition of runtime-generated indirection stubs.
//!
//! Since stub re-use was introduced, the runtime emits call-counting and
//! precode trampolines into interleaved code/data pages: the code of a stub
//! sits on one page and its data slots sit exactly one stub page higher.
//! Matching a stub's code bytes against a template tells us which data slot
//! holds the real target.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::config::{DisassemblySettings, LARGE_STUB_PAGE_SIZE};
use crate::model::{Architecture, RuntimeVersion};
use crate::services::reader::CodeReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StubKind {
    CallCounting,
    StubPrecode,
    FixupPrecode,
}

impl StubKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StubKind::CallCounting => "call_counting",
            StubKind::StubPrecode => "stub_precode",
            StubKind::FixupPrecode => "fixup_precode",
        }
    }
}

impl fmt::Display for StubKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact code bytes of one stub flavor, laid out for a given stub page size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StubTemplate {
    pub kind: StubKind,
    pub pattern: Vec<u8>,
    /// Offset of the interesting slot within the stub's data page.
    pub data_slot_offset: u64,
    pub page_stride: u64,
}

impl StubTemplate {
    pub fn byte_len(&self) -> usize {
        self.pattern.len()
    }

    /// Precode slots hold a method descriptor rather than compiled code.
    pub fn is_precode(&self) -> bool {
        matches!(self.kind, StubKind::StubPrecode | StubKind::FixupPrecode)
    }

    pub fn matches(&self, window: &[u8]) -> bool {
        window == self.pattern.as_slice()
    }

    pub fn data_slot_address(&self, stub_address: u64) -> u64 {
        stub_address.wrapping_add(self.page_stride).wrapping_add(self.data_slot_offset)
    }

    pub fn pattern_hex(&self) -> String {
        self.pattern.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ")
    }
}

/// Templates in match priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StubTemplateSet {
    templates: Vec<StubTemplate>,
}

impl StubTemplateSet {
    pub fn new(templates: Vec<StubTemplate>) -> Self {
        Self { templates }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StubTemplate> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// RIP-relative displacement from the end of an instruction at
/// `insn_end` to `slot` bytes into the data page.
fn rip_disp(page_stride: u64, slot: u64, insn_end: u64) -> [u8; 4] {
    let disp = page_stride.wrapping_add(slot).wrapping_sub(insn_end) as u32;
    disp.to_le_bytes()
}

/// x64 stub templates (see the runtime's amd64 thunk templates).
pub fn x64_templates(page_stride: u64) -> StubTemplateSet {
    // mov rax, [rip + RemainingCallCountCell]; dec word ptr [rax]
    let mut call_counting = vec![0x48, 0x8b, 0x05];
    call_counting.extend(rip_disp(page_stride, 0, 7));
    call_counting.extend([0x66, 0xff, 0x08]);

    // mov r10, [rip + MethodDesc]; jmp [rip + Target]
    let mut stub_precode = vec![0x4c, 0x8b, 0x15];
    stub_precode.extend(rip_disp(page_stride, 0, 7));
    stub_precode.extend([0xff, 0x25]);
    stub_precode.extend(rip_disp(page_stride, 8, 13));

    // jmp [rip + Target]; mov r10, [rip + MethodDesc]; jmp [rip + PrecodeFixupThunk]
    let mut fixup_precode = vec![0xff, 0x25];
    fixup_precode.extend(rip_disp(page_stride, 0, 6));
    fixup_precode.extend([0x4c, 0x8b, 0x15]);
    fixup_precode.extend(rip_disp(page_stride, 8, 13));
    fixup_precode.extend([0xff, 0x25]);
    fixup_precode.extend(rip_disp(page_stride, 16, 19));

    StubTemplateSet::new(vec![
        StubTemplate {
            kind: StubKind::CallCounting,
            pattern: call_counting,
            data_slot_offset: 8,
            page_stride,
        },
        StubTemplate { kind: StubKind::StubPrecode, pattern: stub_precode, data_slot_offset: 0, page_stride },
        StubTemplate {
            kind: StubKind::FixupPrecode,
            pattern: fixup_precode,
            data_slot_offset: 8,
            page_stride,
        },
    ])
}

/// `ldr x<rt>, <pc + offset>` (64-bit literal load).
fn ldr_literal(rt: u32, offset: u64) -> u32 {
    let imm19 = ((offset / 4) as u32) & 0x7_FFFF;
    0x5800_0000 | (imm19 << 5) | (rt & 0x1F)
}

fn words(insns: &[u32]) -> Vec<u8> {
    insns.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Arm64 stub templates (see the runtime's arm64 thunk templates).
pub fn arm64_templates(page_stride: u64) -> StubTemplateSet {
    const LDRH_W10_X9: u32 = 0x7940_012A;
    const SUBS_W10_W10_1: u32 = 0x7100_054A;
    const BR_X10: u32 = 0xD61F_0140;
    const BR_X11: u32 = 0xD61F_0160;

    // ldr x9, RemainingCallCountCell; ldrh w10, [x9]; subs w10, w10, #1
    let call_counting = words(&[ldr_literal(9, page_stride), LDRH_W10_X9, SUBS_W10_W10_1]);
    // ldr x10, Target; ldr x12, MethodDesc; br x10
    let stub_precode = words(&[
        ldr_literal(10, page_stride + 8),
        ldr_literal(12, page_stride - 4),
        BR_X10,
    ]);
    // ldr x11, Target; br x11; ldr x12, MethodDesc
    let fixup_precode = words(&[ldr_literal(11, page_stride), BR_X11, ldr_literal(12, page_stride)]);

    StubTemplateSet::new(vec![
        StubTemplate {
            kind: StubKind::CallCounting,
            pattern: call_counting,
            data_slot_offset: 8,
            page_stride,
        },
        StubTemplate { kind: StubKind::StubPrecode, pattern: stub_precode, data_slot_offset: 0, page_stride },
        StubTemplate {
            kind: StubKind::FixupPrecode,
            pattern: fixup_precode,
            data_slot_offset: 8,
            page_stride,
        },
    ])
}

/// Stub page size in effect for a runtime version.
pub fn page_stride_for(version: RuntimeVersion, page_size: u64, settings: &DisassemblySettings) -> u64 {
    if version.major >= settings.large_stub_page_major {
        LARGE_STUB_PAGE_SIZE
    } else {
        page_size
    }
}

/// Whether stubs can be matched at all for this runtime version.
pub fn stub_reuse_enabled(version: RuntimeVersion, settings: &DisassemblySettings) -> bool {
    version.major >= settings.stub_reuse_major
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    architecture: Architecture,
    version: RuntimeVersion,
    page_size: u64,
}

/// Lazily built template sets, one per observed target configuration.
#[derive(Debug, Default)]
pub struct StubTemplateCache {
    entries: HashMap<CacheKey, StubTemplateSet>,
}

impl StubTemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(
        &mut self,
        architecture: &Architecture,
        version: RuntimeVersion,
        page_size: u64,
        build: impl FnOnce() -> StubTemplateSet,
    ) -> &StubTemplateSet {
        let key = CacheKey { architecture: architecture.clone(), version, page_size };
        self.entries.entry(key).or_insert_with(build)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Follow an indirect transfer through its pointer cell and, if the
/// pointee is a known stub, through the stub's data slot.
///
/// Returns the resolved address and whether it came out of a precode slot.
/// `None` when a pointer along the way could not be read.
pub fn resolve_indirect(
    reader: &CodeReader<'_>,
    cell: u64,
    templates: &StubTemplateSet,
    reuse_enabled: bool,
) -> Option<(u64, bool)> {
    let candidate = reader.read_pointer(cell)?;
    if !reuse_enabled {
        return Some((candidate, false));
    }
    // The cache is refreshed at most once per call site.
    for (i, template) in templates.iter().enumerate() {
        let window = if i == 0 {
            reader.read_window(candidate, template.byte_len())
        } else {
            reader.read_exact(candidate, template.byte_len())
        };
        let Some(window) = window else {
            continue;
        };
        if !template.matches(&window) {
            continue;
        }
        let slot = template.data_slot_address(candidate);
        debug!("matched {} stub at 0x{candidate:X}, data slot 0x{slot:X}", template.kind);
        return reader.read_pointer(slot).map(|target| (target, template.is_precode()));
    }
    Some((candidate, false))
}
