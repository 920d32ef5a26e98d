//! Import resolution.
//!
//! Resolves `import` statements against the program's source resolver,
//! records the module's dependency set, and reports missing modules and
//! import cycles. The actual loading of dependencies happens at runtime in
//! the module machine; this pass only validates and annotates.

use std::path::Path;

use jac_core::diag::{Diagnostic, DiagnosticKind};

use crate::ast::Module;
use crate::passes::{Pass, PassContext};

pub struct ImportPass;

impl Pass for ImportPass {
    fn name(&self) -> &'static str {
        "import"
    }

    fn run(&self, mut module: Module, ctx: &mut PassContext<'_>) -> Module {
        let parent = Path::new(&module.path).parent().map(Path::to_path_buf);
        let mut dep_set = std::mem::take(&mut module.dep_set);

        for import in module.imports() {
            dep_set.insert(import.module.clone());

            match ctx
                .program
                .resolver
                .resolve(&import.module, parent.as_deref(), false)
            {
                Ok(resolved) => {
                    let resolved_text = resolved.path.to_string_lossy().into_owned();
                    if resolved_text == module.path {
                        ctx.program.diagnostics.push(Diagnostic::error(
                            DiagnosticKind::AnnexConflict,
                            format!("module '{}' imports itself", module.name),
                            Some(import.span.clone()),
                        ));
                    } else if !module.kind.is_annex() && ctx.program.is_in_progress(&resolved.path) {
                        // Annexes legitimately import their base module while
                        // it is still compiling; only true module-to-module
                        // cycles are errors.
                        ctx.program.diagnostics.push(Diagnostic::error(
                            DiagnosticKind::AnnexConflict,
                            format!(
                                "import cycle detected through '{}'",
                                import.module
                            ),
                            Some(import.span.clone()),
                        ));
                    }
                }
                Err(missing) => {
                    // Plugin-prefixed names are resolved (or stubbed) by the
                    // runtime machine; everything else must exist now.
                    if !ctx.program.is_plugin_module(&import.module) {
                        ctx.program.diagnostics.push(Diagnostic::error(
                            DiagnosticKind::ModuleNotFound,
                            missing.to_string(),
                            Some(import.span.clone()),
                        ));
                    }
                }
            }
        }

        module.dep_set = dep_set;
        module
    }
}

#[cfg(test)]
mod tests {
    use crate::program::Program;
    use jac_core::diag::DiagnosticKind;
    use std::path::Path;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn dep_set_records_imports() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("util.jac"), "def helper() { return 1; }");
        let base = tmp.path().join("app.jac");
        write(&base, "import from util { helper }\ndef f() { return helper(); }");

        let mut program = Program::new(tmp.path());
        let compiled = program.compile(&base, false, false).unwrap();
        assert!(compiled.ast.dep_set.contains("util"));
        assert!(!program.diagnostics.has_errors());
    }

    #[test]
    fn missing_import_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("app.jac");
        write(&base, "import from ghost { thing }\n");

        let mut program = Program::new(tmp.path());
        program.compile(&base, false, false);
        assert!(program
            .diagnostics
            .errors()
            .any(|d| d.kind == DiagnosticKind::ModuleNotFound));
    }

    #[test]
    fn plugin_prefixed_import_is_tolerated() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("app.jac");
        write(&base, "import from byllm { Model }\n");

        let mut program = Program::new(tmp.path());
        program.compile(&base, false, false);
        assert!(!program.diagnostics.has_errors());
    }

    #[test]
    fn self_import_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("app.jac");
        write(&base, "import app;\n");

        let mut program = Program::new(tmp.path());
        program.compile(&base, false, false);
        assert!(program
            .diagnostics
            .errors()
            .any(|d| d.kind == DiagnosticKind::AnnexConflict));
    }
}
