//! Facade crate: one import for the whole Jac toolchain.

pub use jac_compiler as compiler;
pub use jac_core as core;
pub use jac_runtime as runtime;
pub use jac_server as server;

pub mod prelude {
    pub use jac_compiler::{Program, SourceResolver};
    pub use jac_core::{JacConfig, RuntimeError, StorageError, Value};
    pub use jac_runtime::{ExecutionContext, Interpreter, JacMachine, UserManager};
    pub use jac_server::JacApiServer;
}
