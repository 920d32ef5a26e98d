//! `format` — canonical formatting, pre-commit style exit code.

use std::path::{Path, PathBuf};

use colored::Colorize;
use jac_compiler::format_source;

pub fn format(path: &Path) -> Result<(), String> {
    let targets = collect_targets(path)?;
    if targets.is_empty() {
        return Err(format!("no .jac files under '{}'", path.display()));
    }

    let mut changed = 0usize;
    let mut failed = 0usize;
    for target in targets {
        let source = std::fs::read_to_string(&target)
            .map_err(|e| format!("cannot read '{}': {e}", target.display()))?;
        match format_source(&source, &target) {
            Some(formatted) => {
                if formatted != source {
                    std::fs::write(&target, &formatted)
                        .map_err(|e| format!("cannot write '{}': {e}", target.display()))?;
                    println!("{} {}", "formatted".green(), target.display());
                    changed += 1;
                }
            }
            None => {
                eprintln!("{} {} has syntax errors", "skipped".red(), target.display());
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(format!("{failed} file(s) could not be formatted"));
    }
    if changed > 0 {
        // Pre-commit convention: nonzero when anything was rewritten.
        return Err(String::new());
    }
    Ok(())
}

fn collect_targets(path: &Path) -> Result<Vec<PathBuf>, String> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(format!("'{}' does not exist", path.display()));
    }
    let mut out = Vec::new();
    walk(path, &mut out);
    out.sort();
    Ok(out)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, out);
        } else if path.extension().and_then(|e| e.to_str()) == Some("jac") {
            out.push(path);
        }
    }
}
