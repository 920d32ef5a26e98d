//! Annex discovery and attachment.
//!
//! For a base module `foo.jac`, annexes come from:
//! - same directory: `foo.impl.jac`, `foo.cl.jac`, `foo.test.jac`
//! - sibling folders: `foo.impl/`, `foo.cl/`, `foo.test/` (recursive)
//! - the shared `impl/` folder, entries named `foo.*`
//!
//! Each annex compiles in minimal mode with codegen off and is appended to
//! the base module (`impl_mods` for impl + client, `test_mods` for test).
//! Annex modules themselves are never annexed, which also breaks any cycle
//! a stray self-referencing layout could produce.

use std::path::{Path, PathBuf};

use jac_core::diag::{Diagnostic, DiagnosticKind};

use crate::ast::Module;
use crate::passes::{Pass, PassContext, PassOptions};

pub struct AnnexPass;

impl Pass for AnnexPass {
    fn name(&self) -> &'static str {
        "annex"
    }

    fn run(&self, mut module: Module, ctx: &mut PassContext<'_>) -> Module {
        if module.stub_only || module.kind.is_annex() || !module.path.ends_with(".jac") {
            return module;
        }

        let mod_path = PathBuf::from(&module.path);
        let base_path = module.path.trim_end_matches(".jac").to_string();
        let directory = mod_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let base_name = Path::new(&base_path)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        for path in find_annex_paths(&base_path, &directory) {
            if path.to_string_lossy() == module.path {
                continue;
            }
            let text = path.to_string_lossy().into_owned();
            let is_impl_like = (text.ends_with(".impl.jac")
                && (text.starts_with(&format!("{base_path}."))
                    || path.parent() == Some(Path::new(&format!("{base_path}.impl")))
                    || (path.parent() == Some(directory.join("impl").as_path())
                        && path
                            .file_name()
                            .is_some_and(|f| f.to_string_lossy().starts_with(&format!("{base_name}.")))) ))
                || (text.ends_with(".cl.jac")
                    && (text.starts_with(&format!("{base_path}."))
                        || path.parent() == Some(Path::new(&format!("{base_path}.cl")))));
            let is_test = text.ends_with(".test.jac")
                && (text.starts_with(&format!("{base_path}."))
                    || path.parent() == Some(Path::new(&format!("{base_path}.test"))));

            if !is_impl_like && !is_test {
                continue;
            }

            let annex_opts = PassOptions {
                minimal: true,
                no_cgen: true,
            };
            match ctx.program.compile_with(&path, annex_opts) {
                Some(annex) => {
                    if is_test {
                        module.test_mods.push(annex.ast.clone());
                    } else {
                        module.impl_mods.push(annex.ast.clone());
                    }
                }
                None => {
                    ctx.program.diagnostics.push(Diagnostic::error(
                        DiagnosticKind::AnnexConflict,
                        format!("failed to compile annex '{}'", path.display()),
                        Some(module.span.clone()),
                    ));
                }
            }
        }

        module
    }
}

/// All candidate files near the base module, in deterministic order.
fn find_annex_paths(base_path: &str, directory: &Path) -> Vec<PathBuf> {
    let mut paths = list_dir(directory);
    for folder in [
        PathBuf::from(format!("{base_path}.impl")),
        PathBuf::from(format!("{base_path}.test")),
        PathBuf::from(format!("{base_path}.cl")),
        directory.join("impl"),
    ] {
        if folder.is_dir() {
            paths.extend(walk_files(&folder));
        }
    }
    paths.sort();
    paths
}

fn list_dir(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect()
}

fn walk_files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            out.extend(walk_files(&path));
        } else {
            out.push(path);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn sibling_impl_and_test_are_attached() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("tasks.jac");
        write(&base, "walker W { can go with `root entry; }");
        write(
            &tmp.path().join("tasks.impl.jac"),
            "impl W.go { report 1; }",
        );
        write(
            &tmp.path().join("tasks.test.jac"),
            "with entry:smoke { report 2; }",
        );

        let mut program = Program::new(tmp.path());
        let compiled = program.compile(&base, false, false).unwrap();
        assert_eq!(compiled.ast.impl_mods.len(), 1);
        assert_eq!(compiled.ast.test_mods.len(), 1);
    }

    #[test]
    fn impl_folder_files_are_attached_recursively() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("tasks.jac");
        write(&base, "walker W { can go with `root entry; }");
        write(
            &tmp.path().join("tasks.impl").join("nested").join("go.impl.jac"),
            "impl W.go { report 1; }",
        );

        let mut program = Program::new(tmp.path());
        let compiled = program.compile(&base, false, false).unwrap();
        assert_eq!(compiled.ast.impl_mods.len(), 1);
    }

    #[test]
    fn shared_impl_folder_requires_basename_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("tasks.jac");
        write(&base, "walker W { can go with `root entry; }");
        write(
            &tmp.path().join("impl").join("tasks.core.impl.jac"),
            "impl W.go { report 1; }",
        );
        write(
            &tmp.path().join("impl").join("other.core.impl.jac"),
            "impl X.go { report 9; }",
        );

        let mut program = Program::new(tmp.path());
        let compiled = program.compile(&base, false, false).unwrap();
        assert_eq!(compiled.ast.impl_mods.len(), 1);
        assert!(compiled.ast.impl_mods[0].path.contains("tasks.core.impl.jac"));
    }

    #[test]
    fn annex_modules_are_not_annexed_themselves() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("tasks.jac");
        write(&base, "walker W { can go with `root entry; }");
        write(&tmp.path().join("tasks.impl.jac"), "impl W.go { report 1; }");

        let mut program = Program::new(tmp.path());
        let compiled = program.compile(&base, false, false).unwrap();
        assert!(compiled.ast.impl_mods[0].impl_mods.is_empty());
    }

    #[test]
    fn client_annex_lands_in_impl_mods() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("app.jac");
        write(&base, "def f() { return 1; }");
        write(
            &tmp.path().join("app.cl.jac"),
            "client page Home { \"hello\"; }",
        );

        let mut program = Program::new(tmp.path());
        let compiled = program.compile(&base, false, false).unwrap();
        assert_eq!(compiled.ast.impl_mods.len(), 1);
    }
}
