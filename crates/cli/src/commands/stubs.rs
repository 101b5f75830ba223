use anyhow::{Context, Result};

use jitlens_core::config::DisassemblySettings;
use jitlens_core::model::{Architecture, RuntimeVersion};
use jitlens_core::services::backends::backend_for;
use jitlens_core::services::stubs::{page_stride_for, stub_reuse_enabled};

/// Print the stub templates matched for a target configuration.
pub fn stub_templates_command(arch: &str, runtime_version: &str, page_size: u64, json: bool) -> Result<()> {
    let architecture: Architecture = arch.parse().context("Invalid architecture")?;
    let version: RuntimeVersion = runtime_version.parse().context("Invalid runtime version")?;
    let settings = DisassemblySettings::default();
    let backend = backend_for(&architecture)?;
    let stride = page_stride_for(version, page_size, &settings);
    let templates = backend.stub_templates(stride);

    if json {
        println!("{}", serde_json::to_string_pretty(&templates)?);
        return Ok(());
    }

    println!("Stub templates for {architecture} runtime {version} (stub page 0x{stride:X}):");
    if !stub_reuse_enabled(version, &settings) {
        println!("  note: runtime {version} predates stub reuse; templates are not consulted");
    }
    if templates.is_empty() {
        println!("  (none)");
    }
    for template in templates.iter() {
        println!(
            "  {:<14} len={:<2} slot=+{} {}",
            template.kind,
            template.byte_len(),
            template.data_slot_offset,
            template.pattern_hex()
        );
    }
    Ok(())
}
