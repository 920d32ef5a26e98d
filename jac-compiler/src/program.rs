//! The program: owns compiled modules, the bytecode cache, and the shared
//! diagnostic buffer, and orchestrates pipeline runs.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use jac_core::diag::DiagnosticBuffer;

use crate::ast;
use crate::cache::{BytecodeStore, CacheKey, DiskBytecodeCache};
use crate::ir::ModuleImage;
use crate::parser;
use crate::passes::codegen::{CodegenBackend, ImageBackend};
use crate::passes::{self, Artifact, PassContext, PassOptions, SymbolTable};
use crate::resolve::SourceResolver;

/// Module names that must compile in minimal mode: they are needed while
/// the compiler itself is being assembled, so the full schedule would
/// recurse into them.
pub const BOOTSTRAP_MINIMAL_MODULES: &[&str] = &[
    "std.builtin",
    "std.utils",
    "std.server",
    "std.client_bundle",
];

/// Known optional plugin namespaces. When uninstalled, imports under these
/// prefixes load passthrough fallback modules instead of failing.
pub const PLUGIN_PREFIXES: &[&str] = &["byllm"];

pub fn is_bootstrap_minimal(name: &str) -> bool {
    BOOTSTRAP_MINIMAL_MODULES.contains(&name)
}

/// One fully processed source unit.
pub struct CompiledModule {
    pub ast: ast::Module,
    pub symbols: SymbolTable,
    pub image: Option<ModuleImage>,
    pub artifacts: Vec<Artifact>,
    pub options: PassOptions,
}

pub struct Program {
    pub resolver: SourceResolver,
    pub cache: DiskBytecodeCache,
    pub diagnostics: DiagnosticBuffer,
    pub backend: Box<dyn CodegenBackend>,
    modules: HashMap<(PathBuf, PassOptions), Arc<CompiledModule>>,
    in_progress: HashSet<PathBuf>,
}

impl Program {
    /// A program rooted at a workspace directory; the directory is both the
    /// first Jac search root and the cache location.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        Self {
            resolver: SourceResolver::new(vec![base_path.clone()]),
            cache: DiskBytecodeCache::new(&base_path),
            diagnostics: DiagnosticBuffer::new(),
            backend: Box::new(ImageBackend),
            modules: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    pub fn with_backend(mut self, backend: Box<dyn CodegenBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Replace this program wholesale. Hot reload builds a fresh program and
    /// swaps it in so stale per-path state cannot survive a reload.
    pub fn attach_program(&mut self, other: Program) {
        *self = other;
    }

    /// Compile one file. Idempotent per `(path, options)` within a session.
    pub fn compile(
        &mut self,
        file_path: &Path,
        no_cgen: bool,
        minimal: bool,
    ) -> Option<Arc<CompiledModule>> {
        self.compile_with(file_path, PassOptions { minimal, no_cgen })
    }

    pub fn compile_with(
        &mut self,
        file_path: &Path,
        options: PassOptions,
    ) -> Option<Arc<CompiledModule>> {
        let path = file_path
            .canonicalize()
            .unwrap_or_else(|_| file_path.to_path_buf());
        let key = (path.clone(), options);
        if let Some(existing) = self.modules.get(&key) {
            return Some(existing.clone());
        }
        if self.in_progress.contains(&path) {
            // Cycle through annex or import recursion; the import pass
            // reports it with a proper span.
            return None;
        }

        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "cannot read source");
                return None;
            }
        };

        self.in_progress.insert(path.clone());
        let parse = parser::parse_module(&source, &path);
        self.diagnostics.extend(parse.diagnostics);

        let compiled = if parse.fatal {
            None
        } else {
            let mut ctx = PassContext::new(self, options);
            ctx.fatal = false;
            let module = passes::run_schedule(parse.module, &mut ctx);
            let compiled = CompiledModule {
                ast: module,
                symbols: std::mem::take(&mut ctx.symbols),
                image: ctx.image.take(),
                artifacts: std::mem::take(&mut ctx.artifacts),
                options,
            };
            Some(Arc::new(compiled))
        };
        self.in_progress.remove(&path);

        if let Some(compiled) = &compiled {
            self.modules.insert(key, compiled.clone());
        }
        compiled
    }

    /// Bytecode for the meta-importer: consult the cache, compile on miss,
    /// write back. Returns `None` when the module cannot be compiled.
    pub fn get_bytecode(&mut self, full_target: &Path, minimal: bool) -> Option<Vec<u8>> {
        let key = CacheKey::for_source(full_target, minimal);
        if let Some(bytes) = self.cache.get(&key) {
            if ModuleImage::from_bytes(&bytes).is_some() {
                tracing::debug!(path = %full_target.display(), minimal, "bytecode cache hit");
                return Some(bytes);
            }
        }

        let before_errors = self.diagnostics.errors().count();
        let compiled = self.compile(full_target, false, minimal)?;
        if self.diagnostics.errors().count() > before_errors {
            return None;
        }
        let image = compiled.image.as_ref()?;
        let bytes = image.to_bytes();
        self.cache.put(&key, &bytes);
        Some(bytes)
    }

    /// A previously compiled module by path, any mode.
    pub fn module_for_path(&self, path: &Path) -> Option<Arc<CompiledModule>> {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.modules
            .iter()
            .find(|((p, _), _)| p == &path)
            .map(|(_, m)| m.clone())
    }

    /// Drop the in-session compile result for a path (hot reload).
    pub fn evict_path(&mut self, path: &Path) {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.modules.retain(|(p, _), _| p != &path);
        self.cache.evict(&path);
    }

    pub fn is_in_progress(&self, path: &Path) -> bool {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.in_progress.contains(&path)
    }

    /// Whether a dotted name falls under a plugin namespace (and plugins are
    /// not disabled via `JAC_DISABLE_PLUGINS`).
    pub fn is_plugin_module(&self, dotted: &str) -> bool {
        PLUGIN_PREFIXES
            .iter()
            .any(|prefix| dotted == *prefix || dotted.starts_with(&format!("{prefix}.")))
    }
}
