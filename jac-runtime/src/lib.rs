pub mod anchor;
pub mod context;
pub mod interp;
pub mod machine;
pub mod memory;
pub mod plugin;
pub mod users;
pub mod walker;

pub use anchor::{Access, Anchor, AnchorKind, EdgeEndpoints};
pub use context::{ContextGuard, ExecutionContext};
pub use interp::{Env, Flow, Interpreter};
pub use machine::{JacMachine, LoadedModule};
pub use memory::{EdgeSide, GraphMemory, SESSION_DB};
pub use plugin::{Capability, PluginRegistry, Provider};
pub use users::{UserError, UserManager, UserRecord};
pub use walker::{TraversalResult, WalkerFrame};
