//! Build artifact cleanup.
//!
//! Removes the object directory (which holds the hash store, chunk record
//! and generated sources) and the output of each selected project.

use crate::project::Project;
use anyhow::{Context, Result};
use colored::*;
use std::fs;
use std::path::Path;

fn remove(path: &Path) -> Result<bool> {
    if path.is_dir() {
        fs::remove_dir_all(path).with_context(|| format!("Failed to remove {}", path.display()))?;
        Ok(true)
    } else if path.exists() {
        fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Returns how many directories and files were removed.
pub fn clean(projects: &[Project]) -> Result<usize> {
    let mut removed = 0;
    for project in projects {
        let mut any = false;
        for path in [project.obj_dir.as_path(), project.output_path().as_path()] {
            if remove(path)? {
                any = true;
                removed += 1;
            }
        }
        if any {
            println!("{} Cleaned {}", "✓".green(), project.key.to_string().bold());
        }
    }
    if removed == 0 {
        println!("{} Nothing to clean", "!".yellow());
    }
    Ok(removed)
}
