//! `test` — discover and run `.test.jac` annexes and named test blocks.
//!
//! Every named `with entry:case { … }` block in a test file is one case. A
//! case passes when it runs to completion without a runtime error.

use std::path::{Path, PathBuf};

use colored::Colorize;
use jac_runtime::context::ExecutionContext;
use jac_runtime::interp::Interpreter;
use jac_runtime::machine::JacMachine;

pub fn run_tests(
    test_name: Option<&str>,
    filter: Option<&str>,
    directory: Option<&Path>,
    fail_fast: bool,
) -> Result<(), String> {
    let root = directory
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut files = Vec::new();
    discover(&root, &mut files);
    if let Some(filter) = filter {
        files.retain(|f| f.to_string_lossy().contains(filter));
    }
    if files.is_empty() {
        return Err(format!("no test files under '{}'", root.display()));
    }

    let mut passed = 0usize;
    let mut failed = 0usize;
    for file in files {
        let base = file.parent().unwrap_or(Path::new(".")).to_path_buf();
        let machine = JacMachine::new(&base);
        // A distinct registry name keeps the test module from shadowing the
        // base module it imports.
        let module = match machine.import_file(&file, Some("__test__")) {
            Ok(module) => module,
            Err(err) => {
                eprintln!("{} {}: {err}", "FAIL".red().bold(), file.display());
                failed += 1;
                if fail_fast {
                    break;
                }
                continue;
            }
        };

        let cases: Vec<String> = module
            .image
            .entries
            .iter()
            .filter_map(|entry| entry.name.clone())
            .filter(|name| test_name.is_none_or(|wanted| wanted == name))
            .collect();

        for case in cases {
            let ctx = match ExecutionContext::create_ephemeral() {
                Ok(ctx) => ctx,
                Err(err) => return Err(err.to_string()),
            };
            let _guard = ctx.enter();
            let mut interp = Interpreter::new(&machine, ctx.clone(), module.clone());
            match interp.run_entries(Some(&case)) {
                Ok(()) => {
                    println!("{} {case}", "PASS".green().bold());
                    passed += 1;
                }
                Err(err) => {
                    eprintln!("{} {case}: {err}", "FAIL".red().bold());
                    failed += 1;
                    if fail_fast {
                        break;
                    }
                }
            }
        }
        if fail_fast && failed > 0 {
            break;
        }
    }

    println!("\n{passed} passed, {failed} failed");
    if failed > 0 {
        Err(String::new())
    } else {
        Ok(())
    }
}

fn discover(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            discover(&path, out);
        } else if path.to_string_lossy().ends_with(".test.jac") {
            out.push(path);
        }
    }
    out.sort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passing_and_failing_cases_are_counted() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("math.test.jac"),
            "with entry:adds { report 1 + 1; }\nwith entry:breaks { report 1 / 0; }\n",
        )
        .unwrap();

        let result = run_tests(None, None, Some(tmp.path()), false);
        assert!(result.is_err());

        let only_good = run_tests(Some("adds"), None, Some(tmp.path()), false);
        assert!(only_good.is_ok());
    }

    #[test]
    fn missing_directory_has_no_tests() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(run_tests(None, None, Some(tmp.path()), false).is_err());
    }
}
