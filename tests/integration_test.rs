//! End-to-end tests of the `ccf` binary against a real C toolchain.
//!
//! Skipped when gcc, g++ or ar are not installed.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn have_toolchain() -> bool {
    ["gcc", "g++", "ar"].iter().all(|tool| {
        Command::new(tool)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    })
}

fn ccf(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ccf"))
        .args(args)
        .current_dir(dir)
        .env_remove("CC")
        .env_remove("CXX")
        .env_remove("AR")
        .output()
        .expect("failed to run ccf")
}

fn write(path: &Path, text: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

const MANIFEST: &str = r#"
[build]
toolchain = "gcc"
jobs = 2

[[project]]
name = "core"
dir = "core"
type = "static"

[[project]]
name = "app"
dir = "app"
depends = ["core"]
"#;

fn workspace() -> TempDir {
    let tmp = TempDir::new().unwrap();
    write(&tmp.path().join("ccf.toml"), MANIFEST);
    write(
        &tmp.path().join("core/core.c"),
        "int core_value(void) { return 42; }\n",
    );
    write(
        &tmp.path().join("core/extra.c"),
        "int core_extra(void) { return 1; }\n",
    );
    write(
        &tmp.path().join("app/main.c"),
        "int core_value(void);\nint main(void) { return core_value() == 42 ? 0 : 1; }\n",
    );
    tmp
}

fn app_binary(root: &Path) -> Option<PathBuf> {
    let out = root.join("app/out/debug");
    let arch = fs::read_dir(&out).ok()?.filter_map(|e| e.ok()).next()?;
    let exe = arch.path().join(if cfg!(windows) { "app.exe" } else { "app" });
    exe.exists().then_some(exe)
}

#[test]
fn test_build_links_application_against_library() {
    if !have_toolchain() {
        eprintln!("skipping: no gcc toolchain");
        return;
    }
    let ws = workspace();
    let out = ccf(ws.path(), &["build"]);
    assert!(
        out.status.success(),
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    let exe = app_binary(ws.path()).expect("app was not linked");
    let status = Command::new(exe).status().unwrap();
    assert!(status.success());
}

#[test]
fn test_compile_error_exits_with_one() {
    if !have_toolchain() {
        eprintln!("skipping: no gcc toolchain");
        return;
    }
    let ws = workspace();
    write(&ws.path().join("core/core.c"), "int core_value(void) { return }\n");
    let out = ccf(ws.path(), &["build"]);
    assert_eq!(out.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Incomplete projects"), "{}", stdout);
    assert!(app_binary(ws.path()).is_none());
}

#[test]
fn test_order_and_clean() {
    if !have_toolchain() {
        eprintln!("skipping: no gcc toolchain");
        return;
    }
    let ws = workspace();
    let out = ccf(ws.path(), &["order"]);
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    let core = text.find("core@").unwrap();
    let app = text.find("app@").unwrap();
    assert!(core < app, "{}", text);

    assert!(ccf(ws.path(), &["build", "--compile-commands"]).status.success());
    assert!(ws.path().join("compile_commands.json").exists());
    assert!(ws.path().join("core/.ccf").exists());
    assert!(ccf(ws.path(), &["clean"]).status.success());
    assert!(app_binary(ws.path()).is_none());
    let objects = walkdir::WalkDir::new(ws.path())
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "o"))
        .count();
    assert_eq!(objects, 0);
}

#[test]
fn test_missing_manifest_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let out = ccf(tmp.path(), &["build"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("manifest not found"));
}

#[test]
fn test_completion_script() {
    let tmp = TempDir::new().unwrap();
    let out = ccf(tmp.path(), &["completion", "bash"]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("ccf"));
}
