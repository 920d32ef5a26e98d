//! The module machine: the runtime's import system.
//!
//! Owns the compiler [`Program`] and the loaded-modules table. Importing a
//! dotted name resolves it through the source resolver, fetches bytecode via
//! `Program::get_bytecode` (minimal for bootstrap-critical names), decodes
//! the module image, and registers it so walkers and functions become
//! reachable for dispatch. Imports under an uninstalled plugin prefix load a
//! passthrough fallback module instead of failing, so optional plugin code
//! degrades gracefully.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use jac_compiler::ir::ModuleImage;
use jac_compiler::program::{is_bootstrap_minimal, Program};
use jac_compiler::resolve::ResolvedKind;
use jac_core::error::RuntimeError;

/// A module registered in the machine.
pub struct LoadedModule {
    pub name: String,
    pub path: Option<PathBuf>,
    pub image: ModuleImage,
    /// True for plugin fallback modules: every attribute is a passthrough.
    pub fallback: bool,
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("name", &self.name)
            .field("fallback", &self.fallback)
            .finish()
    }
}

pub struct JacMachine {
    program: Mutex<Program>,
    modules: DashMap<String, Arc<LoadedModule>>,
    base_path: PathBuf,
}

impl JacMachine {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        Self {
            program: Mutex::new(Program::new(&base_path)),
            modules: DashMap::new(),
            base_path,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn program(&self) -> MutexGuard<'_, Program> {
        self.program
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Swap in a freshly built program (hot reload).
    pub fn attach_program(&self, program: Program) {
        self.program().attach_program(program);
    }

    /// The loaded module registered under `name`, if any.
    pub fn module(&self, name: &str) -> Option<Arc<LoadedModule>> {
        self.modules.get(name).map(|entry| entry.clone())
    }

    pub fn loaded_module_names(&self) -> Vec<String> {
        self.modules.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Register a module, replacing any previous one atomically. This is
    /// the swap point hot reload uses; in-flight requests keep the module
    /// they already resolved.
    pub fn register(&self, module: LoadedModule) -> Arc<LoadedModule> {
        let module = Arc::new(module);
        self.modules.insert(module.name.clone(), module.clone());
        module
    }

    /// Import a dotted name, compiling on demand. Idempotent.
    pub fn import_module(&self, dotted: &str) -> Result<Arc<LoadedModule>, RuntimeError> {
        if let Some(existing) = self.module(dotted) {
            return Ok(existing);
        }

        if self.wants_plugin_fallback(dotted) {
            tracing::warn!(module = dotted, "plugin not installed, loading passthrough fallback");
            return Ok(self.register(fallback_module(dotted)));
        }

        let minimal = is_bootstrap_minimal(dotted);
        let (path, kind) = {
            let program = self.program();
            let resolved = program
                .resolver
                .resolve(dotted, None, minimal)
                .map_err(|missing| RuntimeError::NotFound(missing.to_string()))?;
            (resolved.path, resolved.kind)
        };

        let bytes = match kind {
            // Prebuilt host modules carry the image directly.
            ResolvedKind::HostModule => std::fs::read(&path)
                .map_err(|e| RuntimeError::NotFound(format!("host module '{dotted}': {e}")))?,
            _ => {
                let bytes = self.program().get_bytecode(&path, minimal);
                bytes.ok_or_else(|| self.compile_failure(dotted))?
            }
        };

        let image = ModuleImage::from_bytes(&bytes)
            .ok_or_else(|| RuntimeError::UserError(format!("corrupt bytecode for '{dotted}'")))?;

        // Register before chasing imports so dependency cycles terminate.
        let module = self.register(LoadedModule {
            name: dotted.to_string(),
            path: Some(path),
            image,
            fallback: false,
        });

        for import in module.image.imports.clone() {
            let _ = self.import_module(&import.module);
        }
        Ok(module)
    }

    /// Import a module by file path under a chosen registry name (CLI entry
    /// points register as `__main__`).
    pub fn import_file(
        &self,
        file_path: &Path,
        override_name: Option<&str>,
    ) -> Result<Arc<LoadedModule>, RuntimeError> {
        let bytes = {
            let mut program = self.program();
            program.get_bytecode(file_path, false)
        };
        let bytes =
            bytes.ok_or_else(|| self.compile_failure(&file_path.display().to_string()))?;
        let image = ModuleImage::from_bytes(&bytes).ok_or_else(|| {
            RuntimeError::UserError(format!("corrupt bytecode for '{}'", file_path.display()))
        })?;

        let name = override_name
            .map(str::to_string)
            .unwrap_or_else(|| image.name.clone());
        let module = self.register(LoadedModule {
            name,
            path: Some(file_path.to_path_buf()),
            image,
            fallback: false,
        });
        for import in module.image.imports.clone() {
            let _ = self.import_module(&import.module);
        }
        Ok(module)
    }

    /// Raw image bytes for `-m name` style launchers.
    pub fn get_code(&self, dotted: &str) -> Option<Vec<u8>> {
        let minimal = is_bootstrap_minimal(dotted);
        let path = {
            let program = self.program();
            program.resolver.resolve(dotted, None, minimal).ok()?.path
        };
        self.program().get_bytecode(&path, minimal)
    }

    /// Find which loaded module declares an archetype, searching `preferred`
    /// first. Used by walker dispatch for cross-module spawns.
    pub fn find_archetype(
        &self,
        name: &str,
        preferred: Option<&str>,
    ) -> Option<(Arc<LoadedModule>, String)> {
        if let Some(preferred) = preferred {
            if let Some(module) = self.module(preferred) {
                if module.image.archetype(name).is_some() {
                    return Some((module, name.to_string()));
                }
            }
        }
        for entry in self.modules.iter() {
            if entry.value().image.archetype(name).is_some() {
                return Some((entry.value().clone(), name.to_string()));
            }
        }
        None
    }

    fn wants_plugin_fallback(&self, dotted: &str) -> bool {
        // JAC_DISABLE_PLUGINS turns plugins off in-process;
        // JAC_DISABLED_PLUGINS=* is its subprocess-propagated form.
        if std::env::var("JAC_DISABLE_PLUGINS").is_ok_and(|v| v == "1")
            || std::env::var("JAC_DISABLED_PLUGINS").is_ok_and(|v| v == "*")
        {
            return false;
        }
        self.program().is_plugin_module(dotted)
    }

    fn compile_failure(&self, what: &str) -> RuntimeError {
        let program = self.program();
        let details: Vec<String> = program.diagnostics.errors().map(|d| d.to_string()).collect();
        if details.is_empty() {
            RuntimeError::NotFound(format!("no bytecode for '{what}'"))
        } else {
            RuntimeError::UserError(format!(
                "compilation of '{what}' failed:\n{}",
                details.join("\n")
            ))
        }
    }
}

/// An empty image whose attribute access the interpreter resolves to
/// passthrough values.
fn fallback_module(name: &str) -> LoadedModule {
    LoadedModule {
        name: name.to_string(),
        path: None,
        image: ModuleImage {
            ir_version: jac_compiler::ir::IR_VERSION,
            name: name.to_string(),
            path: String::new(),
            minimal: false,
            archetypes: Vec::new(),
            functions: Vec::new(),
            client_pages: Vec::new(),
            entries: Vec::new(),
            imports: Vec::new(),
        },
        fallback: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn import_compiles_and_registers() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("tasks.jac"), "def f() { return 1; }");

        let machine = JacMachine::new(tmp.path());
        let module = machine.import_module("tasks").unwrap();
        assert_eq!(module.name, "tasks");
        assert!(module.image.function("f").is_some());
        assert!(machine.module("tasks").is_some());
    }

    #[test]
    fn import_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("tasks.jac"), "def f() { return 1; }");

        let machine = JacMachine::new(tmp.path());
        let first = machine.import_module("tasks").unwrap();
        let second = machine.import_module("tasks").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_module_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let machine = JacMachine::new(tmp.path());
        match machine.import_module("ghost") {
            Err(RuntimeError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn plugin_prefix_gets_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        let machine = JacMachine::new(tmp.path());
        let module = machine.import_module("byllm.models").unwrap();
        assert!(module.fallback);
    }

    #[test]
    fn import_chases_dependencies() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("util.jac"), "def helper() { return 2; }");
        write(
            &tmp.path().join("app.jac"),
            "import from util { helper }\ndef f() { return helper(); }",
        );

        let machine = JacMachine::new(tmp.path());
        machine.import_module("app").unwrap();
        assert!(machine.module("util").is_some());
    }

    #[test]
    fn import_file_honors_override_name() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("entry.jac");
        write(&path, "def f() { return 1; }");

        let machine = JacMachine::new(tmp.path());
        machine.import_file(&path, Some("__main__")).unwrap();
        assert!(machine.module("__main__").is_some());
    }

    #[test]
    fn register_replaces_atomically() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("m.jac"), "def f() { return 1; }");
        let machine = JacMachine::new(tmp.path());
        let original = machine.import_module("m").unwrap();

        machine.register(fallback_module("m"));
        let swapped = machine.module("m").unwrap();
        assert!(!Arc::ptr_eq(&original, &swapped));
        // The old Arc stays valid for in-flight users.
        assert_eq!(original.name, "m");
    }
}
