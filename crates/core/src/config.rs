use std::path::Path;

use anyhow::{Context, Result as AnyResult};
use serde::{Deserialize, Serialize};

use crate::error::{DisassemblyError, Result};
use crate::model::{Architecture, TargetOs};

/// Values below this are treated as small immediates rather than addresses.
pub const DEFAULT_REFERENCE_THRESHOLD: u64 = 0xFFFF;
/// First runtime major version that shares stubs through interleaved code/data pages.
pub const DEFAULT_STUB_REUSE_MAJOR: u32 = 7;
/// First runtime major version whose stub pages are 16 KiB.
pub const DEFAULT_LARGE_STUB_PAGE_MAJOR: u32 = 8;
pub const LARGE_STUB_PAGE_SIZE: u64 = 16 * 1024;

/// Name fragment of the synthetic zero-argument wrapper used to force
/// compilation of generic entry points.
pub const ENTRY_WRAPPER_NAME: &str = "__ForDisassemblyDiagnoser__";

/// Serializable settings for one disassembly run.
///
/// Every field has a default so partial JSON config files are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisassemblySettings {
    /// How many call levels below the entry function are expanded.
    pub max_depth: u32,
    /// Interleave source lines with instructions when a locator is available.
    pub print_source: bool,
    /// Prefix each line with the absolute instruction address.
    pub print_instruction_addresses: bool,
    /// Glob patterns selecting entry functions by signature.
    pub filters: Vec<String>,
    pub reference_threshold: u64,
    /// Overrides the per-OS guard below which addresses are never queried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_valid_address: Option<u64>,
    pub stub_reuse_major: u32,
    pub large_stub_page_major: u32,
}

impl Default for DisassemblySettings {
    fn default() -> Self {
        Self {
            max_depth: 0,
            print_source: false,
            print_instruction_addresses: false,
            filters: Vec::new(),
            reference_threshold: DEFAULT_REFERENCE_THRESHOLD,
            min_valid_address: None,
            stub_reuse_major: DEFAULT_STUB_REUSE_MAJOR,
            large_stub_page_major: DEFAULT_LARGE_STUB_PAGE_MAJOR,
        }
    }
}

impl DisassemblySettings {
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Convert a signed depth (as typed by a user) into a valid setting.
    pub fn max_depth_from_signed(depth: i64) -> Result<u32> {
        if depth < 0 {
            return Err(DisassemblyError::InvalidConfiguration(format!(
                "max depth must be non-negative, got {depth}"
            )));
        }
        u32::try_from(depth).map_err(|_| {
            DisassemblyError::InvalidConfiguration(format!("max depth {depth} is too large"))
        })
    }

    /// Reject settings that would make a run meaningless before it starts.
    pub fn validate(&self) -> Result<()> {
        if self.reference_threshold == 0 {
            return Err(DisassemblyError::InvalidConfiguration(
                "reference threshold must be greater than zero".into(),
            ));
        }
        if self.min_valid_address == Some(0) {
            return Err(DisassemblyError::InvalidConfiguration(
                "minimum valid address must be greater than zero".into(),
            ));
        }
        if self.filters.iter().any(|f| f.trim().is_empty()) {
            return Err(DisassemblyError::InvalidConfiguration(
                "filter patterns must not be blank".into(),
            ));
        }
        if self.large_stub_page_major < self.stub_reuse_major {
            return Err(DisassemblyError::InvalidConfiguration(format!(
                "large stub page version {} precedes stub reuse version {}",
                self.large_stub_page_major, self.stub_reuse_major
            )));
        }
        Ok(())
    }

    /// Guard address for the target, honoring an explicit override.
    pub fn min_valid_address_for(&self, os: TargetOs, arch: &Architecture, page_size: u64) -> u64 {
        self.min_valid_address.unwrap_or_else(|| default_min_valid_address(os, arch, page_size))
    }
}

/// Lowest address that may be dereferenced in the inspected process.
///
/// Querying below it can crash older runtimes.
pub fn default_min_valid_address(os: TargetOs, arch: &Architecture, page_size: u64) -> u64 {
    match os {
        TargetOs::Windows => u16::MAX as u64 + 1,
        TargetOs::Linux | TargetOs::Other => page_size.max(1),
        TargetOs::MacOs => match arch {
            Architecture::Arm64 => 0x1_0000_0000,
            _ => 4096,
        },
    }
}

/// True for `.yaml`/`.yml` paths; everything else is read as JSON.
pub fn is_yaml_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
        Some("yaml" | "yml")
    )
}

/// Load settings from a JSON or YAML file on disk.
pub fn load_settings(path: &Path) -> AnyResult<DisassemblySettings> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings at {}", path.display()))?;
    let settings: DisassemblySettings = if is_yaml_path(path) {
        serde_yaml::from_str(&body)
            .with_context(|| format!("Failed to parse settings YAML at {}", path.display()))?
    } else {
        serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse settings JSON at {}", path.display()))?
    };
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        DisassemblySettings::default().validate().expect("defaults are valid");
    }

    #[test]
    fn negative_depth_is_rejected() {
        let err = DisassemblySettings::max_depth_from_signed(-1).unwrap_err();
        assert!(matches!(err, DisassemblyError::InvalidConfiguration(_)));
        assert_eq!(DisassemblySettings::max_depth_from_signed(3).unwrap(), 3);
    }

    #[test]
    fn blank_filter_is_rejected() {
        let settings =
            DisassemblySettings { filters: vec!["  ".into()], ..DisassemblySettings::default() };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn min_valid_address_depends_on_os() {
        let s = DisassemblySettings::default();
        assert_eq!(s.min_valid_address_for(TargetOs::Windows, &Architecture::X64, 4096), 0x10000);
        assert_eq!(s.min_valid_address_for(TargetOs::Linux, &Architecture::X64, 4096), 4096);
        assert_eq!(
            s.min_valid_address_for(TargetOs::MacOs, &Architecture::Arm64, 16384),
            0x1_0000_0000
        );
        let overridden = DisassemblySettings { min_valid_address: Some(0x20), ..s };
        assert_eq!(overridden.min_valid_address_for(TargetOs::Windows, &Architecture::X64, 4096), 0x20);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let s: DisassemblySettings = serde_json::from_str(r#"{"max_depth": 2}"#).unwrap();
        assert_eq!(s.max_depth, 2);
        assert_eq!(s.reference_threshold, DEFAULT_REFERENCE_THRESHOLD);
    }
}
