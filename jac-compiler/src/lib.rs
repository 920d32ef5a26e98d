pub mod ast;
pub mod cache;
pub mod ir;
pub mod parser;
pub mod passes;
pub mod program;
pub mod resolve;
pub mod token;
pub mod unparse;

pub use cache::{BytecodeStore, CacheKey, DiskBytecodeCache, CACHE_DIR};
pub use ir::{ModuleImage, IR_VERSION};
pub use parser::{parse_module, ParseResult};
pub use passes::codegen::{CodegenBackend, ImageBackend};
pub use passes::{Artifact, ArtifactKind, PassOptions, SymbolTable};
pub use program::{
    is_bootstrap_minimal, CompiledModule, Program, BOOTSTRAP_MINIMAL_MODULES, PLUGIN_PREFIXES,
};
pub use resolve::{ModuleNotFound, Resolved, ResolvedKind, SourceResolver};
pub use unparse::{format_source, unparse};
