#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// x64 target: `Main` calls `Helper` with a rel32 call, `Helper` returns.
pub const X64_SNAPSHOT: &str = r#"{
  "architecture": "x64",
  "os": "linux",
  "runtime_version": "8.0.4",
  "functions": [
    {
      "signature": "Main()",
      "type_name": "App.Program",
      "native_code": 1048576,
      "compilation": "jitted",
      "code_ranges": [{ "start_address": 1048576, "length": 6 }]
    },
    {
      "signature": "App.Program.Helper()",
      "native_code": 2097152,
      "compilation": "jitted",
      "code_ranges": [{ "start_address": 2097152, "length": 1 }]
    },
    {
      "signature": "Interop.Native.Beep()",
      "native_code": 0,
      "is_pinvoke": true
    }
  ],
  "memory": [
    { "address": 1048576, "bytes": "e8 fb ff 0f 00 c3" },
    { "address": 2097152, "bytes": "c3" }
  ]
}"#;

pub fn write_snapshot(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("write snapshot");
    path
}
