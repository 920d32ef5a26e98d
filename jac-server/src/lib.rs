pub mod auth;
pub mod client;
pub mod envelope;
pub mod hmr;
pub mod openapi;
pub mod routes;
pub mod server;
pub mod sse;
pub mod state;

pub use client::{BundleArtifact, ClientBundleBuilder, InlineBundleBuilder};
pub use hmr::{HotReloader, JacFileWatcher};
pub use routes::build_router;
pub use server::{JacApiServer, ServerError};
pub use state::{AppState, Endpoint, EndpointKind};
