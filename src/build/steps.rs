//! User build steps (`pre_build`, `pre_link`, `post_build`).

use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

/// Run a build step in `project_dir` and return what it printed.
///
/// A `.rhai` file that exists runs in the embedded script engine; anything
/// else is handed to the platform shell.
pub fn run_step(script: &str, project_dir: &Path) -> Result<String> {
    if script.ends_with(".rhai") {
        let script_path = project_dir.join(script);
        if script_path.exists() {
            tracing::info!("running rhai script {}", script_path.display());
            let printed = Arc::new(Mutex::new(String::new()));
            let sink = Arc::clone(&printed);
            let mut engine = rhai::Engine::new();
            engine.on_print(move |line| {
                let mut out = sink.lock();
                out.push_str(line);
                out.push('\n');
            });
            engine
                .run_file(script_path)
                .map_err(|e| anyhow::anyhow!("Rhai script '{}' failed: {}", script, e))?;
            let text = printed.lock().clone();
            return Ok(text);
        }
    }

    tracing::info!("running step '{}' in {}", script, project_dir.display());
    let output = if cfg!(target_os = "windows") {
        Command::new("cmd")
            .args(["/C", script])
            .current_dir(project_dir)
            .output()
    } else {
        Command::new("sh")
            .args(["-c", script])
            .current_dir(project_dir)
            .output()
    }
    .with_context(|| format!("Failed to start step '{}'", script))?;

    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    if !output.status.success() {
        bail!("Step '{}' failed ({})\n{}", script, output.status, text.trim_end());
    }
    Ok(text)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_shell_step_runs_in_project_dir() {
        let tmp = TempDir::new().unwrap();
        let out = run_step("echo hi > marker && echo done", tmp.path()).unwrap();
        assert!(tmp.path().join("marker").exists());
        assert_eq!(out.trim(), "done");
    }

    #[test]
    fn test_failing_step() {
        let tmp = TempDir::new().unwrap();
        let err = run_step("echo broken >&2; exit 3", tmp.path()).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_rhai_step_output_is_captured() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("gen.rhai"), "let x = 40 + 2; print(`answer ${x}`);").unwrap();
        let out = run_step("gen.rhai", tmp.path()).unwrap();
        assert_eq!(out, "answer 42\n");
    }

    #[test]
    fn test_rhai_error_is_reported() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("bad.rhai"), "throw \"nope\";").unwrap();
        assert!(run_step("bad.rhai", tmp.path()).is_err());
    }
}
