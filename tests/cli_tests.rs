//! CLI integration tests against the built binary

mod common;

use assert_cmd::Command;
use common::*;
use predicates::prelude::*;
use tempfile::TempDir;

#[allow(deprecated)]
fn universal_cmd() -> Command {
    let mut cmd = Command::cargo_bin("kodegen_bundler_universal").unwrap();
    for var in [
        "UNIVERSAL_FORCE",
        "UNIVERSAL_MERGE_ASARS",
        "UNIVERSAL_SINGLE_ARCH_FILES",
        "UNIVERSAL_X64_ARCH_FILES",
        "UNIVERSAL_INFO_PLISTS_TO_IGNORE",
        "UNIVERSAL_JSON",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_help_output() {
    universal_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--x64-app"))
        .stdout(predicate::str::contains("--arm64-app"))
        .stdout(predicate::str::contains("--merge-asars"));
}

#[test]
fn test_missing_paths_are_usage_errors() {
    universal_cmd()
        .args(["--x64-app", "/tmp/x64/Demo.app"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--arm64-app"));
}

#[test]
fn test_output_equal_to_input_is_rejected() {
    universal_cmd()
        .args([
            "--x64-app",
            "/tmp/x64/Demo.app",
            "--arm64-app",
            "/tmp/arm64/Demo.app",
            "--out-app",
            "/tmp/x64/Demo.app",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must differ"));
}

#[test]
fn test_existing_output_without_force() {
    let temp = TempDir::new().unwrap();
    let x64 = loose_app(&temp.path().join("x64"), "Demo.app", &[("main.js", b"1")]);
    let arm64 = loose_app(&temp.path().join("arm64"), "Demo.app", &[("main.js", b"1")]);
    let out = temp.path().join("out/Demo.app");
    write(&out, "marker", b"previous");

    universal_cmd()
        .arg("--x64-app")
        .arg(&x64)
        .arg("--arm64-app")
        .arg(&arm64)
        .arg("--out-app")
        .arg(&out)
        .args(["--fuser", "builtin", "--inspector", "magic"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already exists"))
        .stderr(predicate::str::contains("--force"));

    assert_eq!(std::fs::read(out.join("marker")).unwrap(), b"previous");
}

#[test]
fn test_merge_with_json_report() {
    let temp = TempDir::new().unwrap();
    let x64 = loose_app(&temp.path().join("x64"), "Demo.app", &[("main.js", b"1")]);
    let arm64 = loose_app(&temp.path().join("arm64"), "Demo.app", &[("main.js", b"1")]);
    write(&x64, "Contents/MacOS/Demo", &thin_macho(CPU_TYPE_X86_64, b"intel"));
    write(&arm64, "Contents/MacOS/Demo", &thin_macho(CPU_TYPE_ARM64, b"apple"));
    let out = temp.path().join("out/Demo.app");

    let output = universal_cmd()
        .arg("--x64-app")
        .arg(&x64)
        .arg("--arm64-app")
        .arg(&arm64)
        .arg("--out-app")
        .arg(&out)
        .args(["--fuser", "builtin", "--inspector", "magic", "--json"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["asar_mode"], "NoAsar");
    assert_eq!(report["shim"], serde_json::Value::Null);
    assert_eq!(report["fused"][0], "Contents/MacOS/Demo");
    assert!(out.join("Contents/MacOS/Demo").exists());
}
