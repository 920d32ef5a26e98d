//! The pass pipeline.
//!
//! Every pass is a transform `(module, context) -> module` over the shared
//! AST, accumulating diagnostics in the owning program. The pipeline runs
//! every scheduled pass unless a pass marks the run fatal (unrecoverable
//! parse, missing module source).
//!
//! Schedules:
//! - full: annex → import → symbols → check → codegen
//! - minimal (bootstrap): annex → import → symbols → codegen
//! - `no_cgen` additionally drops codegen (used for annex compiles)

pub mod annex;
pub mod check;
pub mod codegen;
pub mod imports;
pub mod symbols;

use crate::ast::Module;
use crate::ir::ModuleImage;
use crate::program::Program;

pub use symbols::{Symbol, SymbolKind, SymbolTable};

/// Compilation mode flags, fixed for one pipeline run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PassOptions {
    /// Bootstrap mode: skip the semantic check pass.
    pub minimal: bool,
    /// Skip codegen entirely (annex compiles).
    pub no_cgen: bool,
}

/// Mutable state threaded through one pipeline run.
pub struct PassContext<'a> {
    pub program: &'a mut Program,
    pub options: PassOptions,
    /// Set by a pass that cannot be recovered from; later passes are skipped.
    pub fatal: bool,
    /// Output of the symbol pass.
    pub symbols: SymbolTable,
    /// Output of codegen.
    pub image: Option<ModuleImage>,
    pub artifacts: Vec<Artifact>,
}

impl<'a> PassContext<'a> {
    pub fn new(program: &'a mut Program, options: PassOptions) -> Self {
        Self {
            program,
            options,
            fatal: false,
            symbols: SymbolTable::default(),
            image: None,
            artifacts: Vec::new(),
        }
    }
}

/// Artifacts emitted beside the bytecode (client JS chunks).
#[derive(Clone, Debug)]
pub struct Artifact {
    pub name: String,
    pub kind: ArtifactKind,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    ClientJs,
}

pub trait Pass {
    fn name(&self) -> &'static str;
    fn run(&self, module: Module, ctx: &mut PassContext<'_>) -> Module;
}

/// The ordered schedule for the given options.
pub fn schedule(options: PassOptions) -> Vec<Box<dyn Pass>> {
    let mut passes: Vec<Box<dyn Pass>> = vec![
        Box::new(annex::AnnexPass),
        Box::new(imports::ImportPass),
        Box::new(symbols::SymbolPass),
    ];
    if !options.minimal {
        passes.push(Box::new(check::CheckPass));
    }
    if !options.no_cgen {
        passes.push(Box::new(codegen::CodegenPass));
    }
    passes
}

/// Run the schedule over a parsed module.
pub fn run_schedule(mut module: Module, ctx: &mut PassContext<'_>) -> Module {
    for pass in schedule(ctx.options) {
        if ctx.fatal {
            break;
        }
        tracing::trace!(pass = pass.name(), module = %module.name, "running pass");
        module = pass.run(module, ctx);
    }
    module
}
