//! Shared fixture builders for integration tests.

#![allow(dead_code)]

use kodegen_bundler_universal::merger::asar::{PackOptions, create_package};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const CPU_TYPE_X86_64: u32 = 0x0100_0007;
pub const CPU_TYPE_ARM64: u32 = 0x0100_000c;

pub const INFO_PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>CFBundleExecutable</key>
	<string>Demo</string>
	<key>CFBundleIdentifier</key>
	<string>com.example.demo</string>
	<key>CFBundleName</key>
	<string>Demo</string>
</dict>
</plist>
"#;

/// Minimal little-endian 64-bit Mach-O executable header plus `payload`.
pub fn thin_macho(cputype: u32, payload: &[u8]) -> Vec<u8> {
    let cpusubtype: u32 = if cputype == CPU_TYPE_ARM64 { 0 } else { 3 };
    let mut bytes = Vec::new();
    for field in [0xfeed_facf_u32, cputype, cpusubtype, 2, 0, 0, 0, 0] {
        bytes.extend_from_slice(&field.to_le_bytes());
    }
    bytes.extend_from_slice(payload);
    bytes
}

/// Java class file header (fat magic, version 52.0) followed by `body`.
pub fn java_class(body: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0xca, 0xfe, 0xba, 0xbe, 0x00, 0x00, 0x00, 0x34];
    bytes.extend_from_slice(body);
    bytes
}

pub fn write(root: &Path, rel: &str, bytes: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

/// Bundle skeleton with an `Info.plist` and a shared icon.
pub fn bare_app(root: &Path, name: &str) -> PathBuf {
    let app = root.join(name);
    write(&app, "Contents/Info.plist", INFO_PLIST.as_bytes());
    write(&app, "Contents/Resources/icon.icns", b"icon");
    app
}

/// Bundle with a loose `Contents/Resources/app` folder.
pub fn loose_app(root: &Path, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
    let app = bare_app(root, name);
    for (rel, bytes) in files {
        write(&app, &format!("Contents/Resources/app/{}", rel), bytes);
    }
    app
}

/// Bundle with `Contents/Resources/app.asar` packed from `files`.
pub async fn asar_app(root: &Path, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
    let app = bare_app(root, name);
    let src = TempDir::new().unwrap();
    for (rel, bytes) in files {
        write(src.path(), rel, bytes);
    }
    create_package(
        src.path(),
        &app.join("Contents/Resources/app.asar"),
        &PackOptions::default(),
    )
    .await
    .unwrap();
    app
}

/// Entries of `dir` whose name starts with the scratch workspace prefix.
pub fn leftover_workspaces(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(".kodegen-universal-"))
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}
