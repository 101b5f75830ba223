use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use jitlens_core::config::{load_settings, DisassemblySettings};
use jitlens_core::format::{render_text_report, TextFormatter};
use jitlens_core::model::DisassemblyResult;
use jitlens_core::snapshot::{load_snapshot, SnapshotProvider};
use jitlens_core::Disassembler;

use crate::{canonicalize_or_current, sha256_file};

/// Options of the `disassemble` command, after clap parsing.
#[derive(Debug, Clone, Default)]
pub struct DisassembleArgs {
    pub snapshot: String,
    pub entry: Option<String>,
    pub filters: Vec<String>,
    pub max_depth: Option<i64>,
    pub print_source: bool,
    pub print_addresses: bool,
    pub config: Option<PathBuf>,
    pub json: bool,
    pub output: Option<PathBuf>,
}

/// JSON form of a report: provenance plus the full result.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub tool_version: &'a str,
    pub snapshot: String,
    pub snapshot_sha256: String,
    pub generated_at: String,
    pub settings: &'a DisassemblySettings,
    pub result: &'a DisassemblyResult,
}

/// Settings from `--config` (or defaults) with command-line flags applied on top.
pub fn effective_settings(args: &DisassembleArgs) -> Result<DisassemblySettings> {
    let mut settings = match &args.config {
        Some(path) => load_settings(path)?,
        None => DisassemblySettings::default(),
    };
    if let Some(depth) = args.max_depth {
        settings.max_depth = DisassemblySettings::max_depth_from_signed(depth)?;
    }
    if args.print_source {
        settings.print_source = true;
    }
    if args.print_addresses {
        settings.print_instruction_addresses = true;
    }
    if !args.filters.is_empty() {
        settings.filters = args.filters.clone();
    }
    settings.validate()?;
    Ok(settings)
}

/// Text report with a provenance header.
pub fn render_text(report: &Report<'_>) -> String {
    let formatter = TextFormatter::new(
        report.settings.print_instruction_addresses,
        report.result.pointer_size,
    );
    let mut out = String::new();
    out.push_str(&format!("; jitlens v{}\n", report.tool_version));
    out.push_str(&format!("; snapshot: {} (sha256 {})\n", report.snapshot, report.snapshot_sha256));
    out.push_str(&format!("; generated: {}\n\n", report.generated_at));
    out.push_str(&render_text_report(report.result, &formatter));
    for error in &report.result.errors {
        out.push_str(&format!("; error: {error}\n"));
    }
    out
}

/// Disassemble an entry function (or every filter match) from a snapshot.
pub fn disassemble_command(args: &DisassembleArgs) -> Result<()> {
    let settings = effective_settings(args)?;
    let snapshot_path = canonicalize_or_current(&args.snapshot)?;
    let snapshot = load_snapshot(&snapshot_path)?;
    let digest = sha256_file(&snapshot_path)?;

    let entry = match &args.entry {
        Some(key) => Some(
            snapshot
                .find_function(key)
                .cloned()
                .ok_or_else(|| anyhow!("No function matching '{key}' in snapshot"))?,
        ),
        None => None,
    };
    if entry.is_none() && settings.filters.is_empty() {
        bail!("Either --entry or at least one --filter is required");
    }

    let source_root = snapshot_path.parent().map(Path::to_path_buf).unwrap_or_default();
    let provider = SnapshotProvider::new(snapshot)
        .with_context(|| format!("Invalid snapshot: {}", snapshot_path.display()))?
        .with_source_root(source_root);

    let mut disassembler = Disassembler::new(settings.clone())?;
    let result = match &entry {
        Some(function) => disassembler.run(&provider, function, Some(&provider))?,
        None => disassembler.run_filtered(&provider, Some(&provider))?,
    };

    let report = Report {
        tool_version: jitlens_core::version(),
        snapshot: snapshot_path.display().to_string(),
        snapshot_sha256: digest,
        generated_at: Utc::now().to_rfc3339(),
        settings: &settings,
        result: &result,
    };
    let rendered = if args.json {
        serde_json::to_string_pretty(&report)?
    } else {
        render_text(&report)
    };

    match &args.output {
        Some(path) => {
            fs::write(path, &rendered)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            info!("report written to {}", path.display());
            println!("Wrote {} functions to {}", result.functions.len(), path.display());
        }
        None => {
            print!("{rendered}");
            if args.json {
                println!();
            }
        }
    }

    Ok(())
}
