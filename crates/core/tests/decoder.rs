mod common;

use common::*;
use jitlens_core::config::DEFAULT_REFERENCE_THRESHOLD;
use jitlens_core::model::{Architecture, DecodedInstruction};
use jitlens_core::services::backends::{backend_for, Arm64Backend, ArchitectureBackend, X86Backend};
use jitlens_core::DisassemblyError;

fn decode(backend: &dyn ArchitectureBackend, bytes: &[u8], base: u64) -> Vec<DecodedInstruction> {
    backend.decode(bytes, base, DEFAULT_REFERENCE_THRESHOLD).collect()
}

#[test]
fn x64_instruction_pointers_follow_cumulative_lengths() {
    let backend = X86Backend::new(64).expect("x64 backend");
    // push rbp; mov rbp, rsp; nop; pop rbp; ret
    let code = [0x55, 0x48, 0x89, 0xe5, NOP, 0x5d, RET];
    let insns = decode(&backend, &code, A);
    let ips: Vec<u64> = insns.iter().map(|i| i.instruction_pointer).collect();
    assert_eq!(ips, vec![A, A + 1, A + 4, A + 5, A + 6]);
    assert_eq!(insns[1].mnemonic, "mov");
    assert!(insns.iter().all(|i| i.referenced_address.is_none()));
}

#[test]
fn x64_direct_call_target_is_taken_verbatim() {
    let backend = X86Backend::new(64).expect("x64 backend");
    let mut code = call_rel32(A, B);
    code.push(RET);
    let insns = decode(&backend, &code, A);
    assert_eq!(insns[0].referenced_address, Some(B));
    assert!(!insns[0].is_referenced_address_indirect);
}

#[test]
fn x64_rip_relative_call_is_indirect_and_resolved_to_the_cell() {
    let backend = X86Backend::new(64).expect("x64 backend");
    let code = call_rip_indirect(A, CELL);
    let insns = decode(&backend, &code, A);
    assert_eq!(insns.len(), 1);
    assert_eq!(insns[0].referenced_address, Some(CELL));
    assert!(insns[0].is_referenced_address_indirect);
}

#[test]
fn x64_small_and_32_bit_immediates_are_not_addresses() {
    let backend = X86Backend::new(64).expect("x64 backend");
    // mov eax, 0x12345678; mov rax, 0x123456789a
    let code = [
        0xb8, 0x78, 0x56, 0x34, 0x12, 0x48, 0xb8, 0x9a, 0x78, 0x56, 0x34, 0x12, 0x00, 0x00, 0x00,
    ];
    let insns = decode(&backend, &code, A);
    assert_eq!(insns.len(), 2);
    assert_eq!(insns[0].referenced_address, None);
    assert_eq!(insns[1].referenced_address, Some(0x12_3456_789a));
}

#[test]
fn x64_targets_below_threshold_are_dropped() {
    let backend = X86Backend::new(64).expect("x64 backend");
    let code = call_rel32(0x1000, 0x2000);
    let insns = decode(&backend, &code, 0x1000);
    assert_eq!(insns[0].referenced_address, None);
}

#[test]
fn x64_invalid_byte_becomes_one_byte_marker_and_decoding_resumes() {
    let backend = X86Backend::new(64).expect("x64 backend");
    // 0x06 (push es) does not exist in 64-bit mode.
    let insns = decode(&backend, &[0x06, RET], A);
    assert_eq!(insns.len(), 2);
    assert!(insns[0].is_invalid());
    assert_eq!(insns[0].length, 1);
    assert_eq!(insns[1].mnemonic, "ret");
    assert_eq!(insns[1].instruction_pointer, A + 1);
}

#[test]
fn x86_32_bit_immediates_and_absolute_memory_are_addresses() {
    let backend = X86Backend::new(32).expect("x86 backend");
    // push 0x401234; call dword ptr [0x402000]
    let code = [0x68, 0x34, 0x12, 0x40, 0x00, 0xff, 0x15, 0x00, 0x20, 0x40, 0x00];
    let insns = decode(&backend, &code, 0x40_1000);
    assert_eq!(insns.len(), 2);
    assert_eq!(insns[0].referenced_address, Some(0x40_1234));
    assert!(!insns[0].is_referenced_address_indirect);
    assert_eq!(insns[1].referenced_address, Some(0x40_2000));
    assert!(insns[1].is_referenced_address_indirect);
    assert_eq!(backend.pointer_size(), 4);
    assert!(backend.stub_templates(4096).is_empty());
}

#[test]
fn arm64_branch_with_link_targets_are_absolute() {
    let backend = Arm64Backend::new().expect("arm64 backend");
    let code = arm64_words(&[arm64_bl(A, A + 0x10_0000), ARM64_NOP, ARM64_RET]);
    let insns = decode(&backend, &code, A);
    assert_eq!(insns.len(), 3);
    assert_eq!(insns[0].mnemonic, "bl");
    assert_eq!(insns[0].referenced_address, Some(A + 0x10_0000));
    assert!(!insns[0].is_referenced_address_indirect);
    assert!(insns.iter().all(|i| i.length == 4));
}

#[test]
fn arm64_adrp_ldr_blr_sequence_is_an_indirect_call_through_the_cell() {
    let backend = Arm64Backend::new().expect("arm64 backend");
    let code = arm64_words(&[
        0x9000_0810, // adrp x16, 0x200000
        0xF940_0610, // ldr x16, [x16, #8]
        0xD63F_0200, // blr x16
        ARM64_RET,
    ]);
    let insns = decode(&backend, &code, A);
    assert_eq!(insns.len(), 4);
    assert_eq!(insns[0].referenced_address, None);
    assert_eq!(insns[1].referenced_address, Some(B + 8));
    assert!(!insns[1].is_referenced_address_indirect);
    assert_eq!(insns[2].referenced_address, Some(B + 8));
    assert!(insns[2].is_referenced_address_indirect);
}

#[test]
fn arm64_ret_forgets_tracked_registers() {
    let backend = Arm64Backend::new().expect("arm64 backend");
    let code = arm64_words(&[
        0x9000_0810, // adrp x16, 0x200000
        ARM64_RET,
        0xD63F_0200, // blr x16
    ]);
    let insns = decode(&backend, &code, A);
    assert_eq!(insns[2].referenced_address, None);
    assert!(insns[2].is_referenced_address_indirect);
}

#[test]
fn unsupported_architecture_is_rejected() {
    let err = backend_for(&Architecture::Arm).err().expect("arm is unsupported");
    assert!(matches!(err, DisassemblyError::UnsupportedArchitecture(_)));
    assert!(backend_for(&Architecture::X64).is_ok());
    assert!(backend_for(&Architecture::Arm64).is_ok());
}
