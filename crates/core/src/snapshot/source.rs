use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::SourceLine;

/// Source span that produced the code at one instruction pointer.
///
/// Columns are 1-based; a missing end line means the span is one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMapping {
    pub native_code: u64,
    pub instruction_pointer: u64,
    pub file_path: String,
    pub line_start: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_end: Option<u32>,
}

/// Caret line marking `[start, end)` of `line`; tabs before the caret are kept
/// so the carets line up under the text.
pub fn smart_pointer(line: &str, start: Option<usize>, end: Option<usize>) -> String {
    let chars: Vec<char> = line.chars().collect();
    let end = end.unwrap_or(chars.len()).min(chars.len());
    let start = start.unwrap_or(0).min(end);
    let mut out = String::with_capacity(end);
    for (i, c) in chars.iter().take(end).enumerate() {
        if i < start {
            out.push(if *c == '\t' { '\t' } else { ' ' });
        } else {
            out.push('^');
        }
    }
    out
}

/// Source mappings plus a cache of the files they point at.
#[derive(Debug, Default)]
pub struct SourceTable {
    mappings: Vec<SourceMapping>,
    root: Option<PathBuf>,
    files: RefCell<HashMap<PathBuf, Option<Vec<String>>>>,
}

impl SourceTable {
    pub fn new(mappings: Vec<SourceMapping>) -> Self {
        Self { mappings, root: None, files: RefCell::new(HashMap::new()) }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self.files.borrow_mut().clear();
        self
    }

    fn resolve_path(&self, file_path: &str) -> PathBuf {
        let path = Path::new(file_path);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn read_line(&self, path: &Path, line_number: u32) -> Option<String> {
        let mut files = self.files.borrow_mut();
        let contents = files.entry(path.to_path_buf()).or_insert_with(|| {
            match std::fs::read_to_string(path) {
                Ok(text) => Some(text.lines().map(str::to_string).collect()),
                Err(err) => {
                    debug!("source file {} unavailable: {err}", path.display());
                    None
                }
            }
        });
        // Line numbers past the end belong to compiler-generated code.
        contents.as_ref()?.get(line_number.checked_sub(1)? as usize).cloned()
    }

    /// Source lines for a function, deduplicated by file and line, in
    /// instruction-pointer order.
    pub fn lines_for(&self, native_code: u64) -> Vec<SourceLine> {
        let mut mappings: Vec<&SourceMapping> =
            self.mappings.iter().filter(|m| m.native_code == native_code).collect();
        mappings.sort_by_key(|m| m.instruction_pointer);

        let mut emitted: BTreeSet<(String, u32)> = BTreeSet::new();
        let mut lines = Vec::new();
        for mapping in mappings {
            let path = self.resolve_path(&mapping.file_path);
            let last = mapping.line_end.unwrap_or(mapping.line_start).max(mapping.line_start);
            for line_number in mapping.line_start..=last {
                if !emitted.insert((mapping.file_path.clone(), line_number)) {
                    continue;
                }
                let Some(text) = self.read_line(&path, line_number) else {
                    continue;
                };
                let start = (line_number == mapping.line_start)
                    .then(|| mapping.column_start.map(|c| c.saturating_sub(1) as usize))
                    .flatten();
                let end = (line_number == last)
                    .then(|| mapping.column_end.map(|c| c.saturating_sub(1) as usize))
                    .flatten();
                let pointer = smart_pointer(&text, start, end);
                lines.push(SourceLine {
                    instruction_pointer: mapping.instruction_pointer,
                    file_path: path.to_string_lossy().to_string(),
                    line_number,
                    text: format!("{text}\n{pointer}"),
                });
            }
        }
        lines
    }
}
