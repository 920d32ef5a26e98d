pub mod config;
pub mod diag;
pub mod envelope;
pub mod error;
pub mod loc;
pub mod value;

pub use config::{ConfigError, EnvironmentsConfig, JacConfig, ProjectConfig, ServeConfig};
pub use diag::{Diagnostic, DiagnosticBuffer, DiagnosticKind, Severity};
pub use envelope::{ErrorBody, Transport};
pub use error::{RuntimeError, StorageError};
pub use loc::SourceSpan;
pub use value::Value;
