use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use jitlens::commands::{
    disassemble_command, list_functions_command, stub_templates_command, DisassembleArgs,
};
use jitlens::init_tracing;

/// Disassembler for JIT-compiled code captured from a managed runtime.
///
/// This CLI is a thin wrapper around `jitlens-core` (exposed in code as
/// `jitlens_core`). Snapshots of runtime metadata and code memory are loaded
/// from JSON or YAML files and fed to the engine as its code provider.
#[derive(Parser, Debug)]
#[command(
    name = "jitlens",
    version,
    about = "Disassemble JIT-compiled functions and their callees",
    long_about = None
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Disassemble a function and everything it calls, up to `--max-depth`.
    ///
    /// With `--filter` instead of `--entry`, every function whose signature
    /// matches one of the glob patterns is printed without expanding callees.
    Disassemble {
        /// Snapshot file (.json, or .yaml/.yml).
        #[arg(long)]
        snapshot: String,

        /// Entry function: signature, display name, or 0x-prefixed code address.
        #[arg(long, conflicts_with = "filter")]
        entry: Option<String>,

        /// Glob pattern over signatures (`*` and `?`, case-insensitive). Repeatable.
        #[arg(long)]
        filter: Vec<String>,

        /// How many call levels to follow from the entry.
        #[arg(long, allow_negative_numbers = true)]
        max_depth: Option<i64>,

        /// Interleave source lines when the snapshot maps them.
        #[arg(long)]
        print_source: bool,

        /// Prefix each instruction with its absolute address.
        #[arg(long)]
        print_addresses: bool,

        /// Settings file (JSON or YAML); flags override its values.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Emit the report as JSON instead of text.
        #[arg(long)]
        json: bool,

        /// Write the report to a file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List the functions recorded in a snapshot.
    ListFunctions {
        /// Snapshot file (.json, or .yaml/.yml).
        #[arg(long)]
        snapshot: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },

    /// Show the stub byte templates used for a target configuration.
    StubTemplates {
        /// Target architecture (x64, x86, arm64).
        #[arg(long)]
        arch: String,

        /// Runtime version, e.g. 8.0.1.
        #[arg(long)]
        runtime_version: String,

        /// System page size of the target process.
        #[arg(long, default_value_t = 4096)]
        page_size: u64,

        /// Emit JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Disassemble {
            snapshot,
            entry,
            filter,
            max_depth,
            print_source,
            print_addresses,
            config,
            json,
            output,
        } => disassemble_command(&DisassembleArgs {
            snapshot,
            entry,
            filters: filter,
            max_depth,
            print_source,
            print_addresses,
            config,
            json,
            output,
        })?,
        Command::ListFunctions { snapshot, json } => list_functions_command(&snapshot, json)?,
        Command::StubTemplates { arch, runtime_version, page_size, json } => {
            stub_templates_command(&arch, &runtime_version, page_size, json)?
        }
    }

    Ok(())
}
