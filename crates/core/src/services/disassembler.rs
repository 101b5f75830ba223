use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};

use crate::config::{DisassemblySettings, ENTRY_WRAPPER_NAME};
use crate::error::{DisassemblyError, Result};
use crate::model::{
    AddressNameMap, CodeEntry, CodeRange, CompilationState, DecodedInstruction,
    DisassembledFunction, DisassemblyResult, FunctionHandle, InstructionMap, SourceLine, WorkItem,
};
use crate::services::backends::{backend_for, ArchitectureBackend};
use crate::services::filter::GlobFilter;
use crate::services::provider::{CodeProvider, SourceLocator};
use crate::services::reader::CodeReader;
use crate::services::stubs::{
    page_stride_for, resolve_indirect, stub_reuse_enabled, StubTemplateCache, StubTemplateSet,
};
use crate::services::symbols::{CurrentFunction, SymbolResolver};
use crate::services::traversal::Scheduler;

/// Mutable state of one run: the worklist and the names found so far.
#[derive(Debug)]
pub struct RunState {
    pub scheduler: Scheduler,
    pub names: AddressNameMap,
    pub errors: Vec<String>,
}

impl RunState {
    pub fn new(max_depth: u32) -> Self {
        Self { scheduler: Scheduler::new(max_depth), names: AddressNameMap::new(), errors: Vec::new() }
    }
}

/// Everything about the target that stays fixed for one run.
pub struct RunContext<'p> {
    provider: &'p dyn CodeProvider,
    locator: Option<&'p dyn SourceLocator>,
    reader: CodeReader<'p>,
    backend: Box<dyn ArchitectureBackend>,
    templates: StubTemplateSet,
    reuse_enabled: bool,
    min_valid_address: u64,
}

/// Drives the decode → resolve → schedule loop over a code provider.
#[derive(Debug)]
pub struct Disassembler {
    settings: DisassemblySettings,
    stub_cache: StubTemplateCache,
}

fn is_entry_wrapper(signature: &str) -> bool {
    signature.contains(ENTRY_WRAPPER_NAME)
}

/// Why a function has no code to show, if it has none.
fn unavailable_reason(function: &FunctionHandle) -> Option<&'static str> {
    if function.is_pinvoke {
        Some("PInvoke method")
    } else if !function.has_il {
        Some("Extern method")
    } else if function.compilation == CompilationState::None {
        Some("Method was not JITted yet.")
    } else if function.native_code == 0 {
        // Identity is the code address; without one the function cannot be tracked.
        Some("No valid code ranges")
    } else {
        None
    }
}

impl Disassembler {
    pub fn new(settings: DisassemblySettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings, stub_cache: StubTemplateCache::new() })
    }

    pub fn settings(&self) -> &DisassemblySettings {
        &self.settings
    }

    pub fn stub_cache(&self) -> &StubTemplateCache {
        &self.stub_cache
    }

    /// Select the backend and stub templates for the provider's target.
    ///
    /// Fails only when the architecture cannot be decoded at all.
    pub fn context<'p>(
        &mut self,
        provider: &'p dyn CodeProvider,
        locator: Option<&'p dyn SourceLocator>,
    ) -> Result<RunContext<'p>> {
        let architecture = provider.architecture();
        let backend = backend_for(&architecture)?;
        let version = provider.runtime_version();
        let page_size = provider.page_size();
        let stride = page_stride_for(version, page_size, &self.settings);
        let templates = self
            .stub_cache
            .get_or_build(&architecture, version, page_size, || backend.stub_templates(stride))
            .clone();
        let min_valid_address =
            self.settings.min_valid_address_for(provider.target_os(), &architecture, page_size);
        Ok(RunContext {
            provider,
            locator,
            reader: CodeReader::new(provider),
            backend,
            templates,
            reuse_enabled: stub_reuse_enabled(version, &self.settings),
            min_valid_address,
        })
    }

    /// Disassemble `entry` and everything it reaches within `max_depth` calls.
    pub fn run<'p>(
        &mut self,
        provider: &'p dyn CodeProvider,
        entry: &FunctionHandle,
        locator: Option<&'p dyn SourceLocator>,
    ) -> Result<DisassemblyResult> {
        let ctx = self.context(provider, locator)?;
        let wrapper = is_entry_wrapper(&entry.signature);
        // The wrapper only exists to call the real entry, so it does not count as a level.
        let max_depth = if wrapper {
            self.settings.max_depth.saturating_add(1)
        } else {
            self.settings.max_depth
        };
        info!(
            "disassembling {} on {} (runtime {}, max depth {max_depth})",
            entry.signature,
            ctx.backend.architecture(),
            provider.runtime_version()
        );

        let mut state = RunState::new(max_depth);
        state.scheduler.enqueue(entry.clone(), 0);
        let mut functions = self.drain(&ctx, &mut state);
        if functions.len() > 1 {
            functions.retain(|f| !is_entry_wrapper(&f.name));
        }
        Ok(self.finish(&ctx, functions, state))
    }

    /// Disassemble every function whose signature matches a configured filter.
    ///
    /// Matches are printed but not expanded into their callees.
    pub fn run_filtered<'p>(
        &mut self,
        provider: &'p dyn CodeProvider,
        locator: Option<&'p dyn SourceLocator>,
    ) -> Result<DisassemblyResult> {
        if self.settings.filters.is_empty() {
            return Err(DisassemblyError::InvalidConfiguration(
                "filter mode needs at least one pattern".into(),
            ));
        }
        let filter = GlobFilter::new(self.settings.filters.iter().cloned());
        let ctx = self.context(provider, locator)?;
        let max_depth = self.settings.max_depth;
        let mut state = RunState::new(max_depth);

        for function in provider.enumerate_functions() {
            if function.native_code != 0 {
                state.names.insert(function.native_code, function.display_name());
            }
            let selected =
                filter.matches(&function.signature) || filter.matches(&function.display_name());
            if selected && unavailable_reason(&function).is_none() {
                state.scheduler.enqueue(function, max_depth);
            }
        }
        info!("filter selected {} functions", state.scheduler.pending());

        let functions = self.drain(&ctx, &mut state);
        Ok(self.finish(&ctx, functions, state))
    }

    fn drain(&self, ctx: &RunContext<'_>, state: &mut RunState) -> Vec<DisassembledFunction> {
        let mut functions = Vec::new();
        while let Some(item) = state.scheduler.next() {
            functions.push(self.disassemble_function(ctx, state, &item));
        }
        functions
    }

    fn finish(
        &self,
        ctx: &RunContext<'_>,
        functions: Vec<DisassembledFunction>,
        state: RunState,
    ) -> DisassemblyResult {
        info!(
            "disassembled {} functions, {} named addresses",
            functions.len(),
            state.names.len()
        );
        DisassemblyResult {
            functions,
            address_names: state.names,
            errors: state.errors,
            pointer_size: ctx.backend.pointer_size(),
        }
    }

    /// Produce the complete listing of one function, or its problem.
    ///
    /// All of the function's code is read before anything is decoded, so a
    /// failed read never leaves a partial listing behind.
    pub fn disassemble_function(
        &self,
        ctx: &RunContext<'_>,
        state: &mut RunState,
        item: &WorkItem,
    ) -> DisassembledFunction {
        let function = &item.function;
        let name = function.display_name();
        if let Some(reason) = unavailable_reason(function) {
            debug!("{name}: {reason}");
            return DisassembledFunction::with_problem(name, function.native_code, reason);
        }

        let mut ranges: Vec<CodeRange> = ctx
            .provider
            .list_code_ranges(function)
            .into_iter()
            .filter(|r| !r.is_empty())
            .collect();
        ranges.sort_by_key(|r| r.start_address);
        ranges.dedup();
        if ranges.is_empty() {
            return DisassembledFunction::with_problem(
                name,
                function.native_code,
                "No valid code ranges",
            );
        }

        let mut code = Vec::with_capacity(ranges.len());
        for range in &ranges {
            match ctx.reader.read_range(range) {
                Ok(bytes) => code.push(bytes),
                Err(err) => {
                    let problem = match err {
                        DisassemblyError::ShortRead { expected, actual, .. } => {
                            format!("Tried to read {expected} bytes for {name}, got only {actual}")
                        }
                        other => other.to_string(),
                    };
                    state.errors.push(problem.clone());
                    return DisassembledFunction::with_problem(name, function.native_code, problem);
                }
            }
        }

        let current = CurrentFunction::new(function, &ranges, item.depth);
        let resolver = SymbolResolver::new(ctx.provider, &ctx.reader, ctx.min_valid_address);
        let mut instructions = Vec::new();
        for (range, bytes) in ranges.iter().zip(&code) {
            for insn in
                ctx.backend.decode(bytes, range.start_address, self.settings.reference_threshold)
            {
                instructions.push(self.annotate(ctx, state, &resolver, &current, insn));
            }
        }

        let source = match (self.settings.print_source, ctx.locator) {
            (true, Some(locator)) => locator.source_lines_for(function),
            _ => Vec::new(),
        };
        DisassembledFunction {
            name,
            native_code_address: function.native_code,
            instruction_maps: build_maps(instructions, source),
            problem: None,
        }
    }

    /// Resolve the instruction's target (through stubs for indirect
    /// transfers) and attach its name.
    fn annotate(
        &self,
        ctx: &RunContext<'_>,
        state: &mut RunState,
        resolver: &SymbolResolver<'_, '_>,
        current: &CurrentFunction<'_>,
        mut insn: DecodedInstruction,
    ) -> DecodedInstruction {
        let Some(candidate) = insn.referenced_address else {
            return insn;
        };
        let resolved = if insn.is_referenced_address_indirect {
            let resolved =
                resolve_indirect(&ctx.reader, candidate, &ctx.templates, ctx.reuse_enabled);
            if resolved.is_none() {
                warn!("unreadable pointer cell 0x{candidate:X} at 0x{:X}", insn.instruction_pointer);
            }
            resolved
        } else {
            Some((candidate, false))
        };
        let Some((address, is_precode)) =
            resolved.filter(|(a, _)| *a > self.settings.reference_threshold)
        else {
            insn.referenced_address = None;
            return insn;
        };
        insn.referenced_address = Some(address);
        insn.symbol =
            resolver.resolve(address, is_precode, current, &mut state.names, &mut state.scheduler);
        insn
    }
}

/// Group instructions (and any source lines) into printable maps.
///
/// Without source there is a single map. With source, there is one map per
/// instruction pointer, source lines first.
fn build_maps(instructions: Vec<DecodedInstruction>, source: Vec<SourceLine>) -> Vec<InstructionMap> {
    if source.is_empty() {
        let entries = instructions.into_iter().map(CodeEntry::Asm).collect();
        return vec![InstructionMap { entries }];
    }

    let mut groups: BTreeMap<u64, InstructionMap> = BTreeMap::new();
    let mut seen_lines: HashSet<(String, u32)> = HashSet::new();
    for line in source {
        if seen_lines.insert((line.file_path.clone(), line.line_number)) {
            groups.entry(line.instruction_pointer).or_default().entries.push(CodeEntry::Source(line));
        }
    }
    for insn in instructions {
        groups.entry(insn.instruction_pointer).or_default().entries.push(CodeEntry::Asm(insn));
    }
    groups.into_values().collect()
}
