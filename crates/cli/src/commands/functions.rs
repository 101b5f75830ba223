use anyhow::Result;
use serde::Serialize;

use jitlens_core::model::{CompilationState, FunctionHandle};
use jitlens_core::snapshot::load_snapshot;

use crate::canonicalize_or_current;

#[derive(Debug, Serialize)]
struct FunctionRow {
    name: String,
    native_code: String,
    state: &'static str,
    ranges: usize,
}

fn state_label(function: &FunctionHandle) -> &'static str {
    if function.is_pinvoke {
        "pinvoke"
    } else if !function.has_il {
        "extern"
    } else {
        match function.compilation {
            CompilationState::None => "not-jitted",
            CompilationState::Jitted => "jitted",
            CompilationState::ReadyToRun => "ready-to-run",
        }
    }
}

/// List the functions a snapshot knows about.
pub fn list_functions_command(snapshot: &str, json: bool) -> Result<()> {
    let path = canonicalize_or_current(snapshot)?;
    let snapshot = load_snapshot(&path)?;
    let rows: Vec<FunctionRow> = snapshot
        .functions
        .iter()
        .map(|f| FunctionRow {
            name: f.display_name(),
            native_code: format!("0x{:X}", f.native_code),
            state: state_label(f),
            ranges: f.code_ranges.len(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Functions ({}):", rows.len());
    for row in rows {
        println!("  {:>18}  {:<12}  {}", row.native_code, row.state, row.name);
    }
    Ok(())
}
