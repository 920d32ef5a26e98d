//! Server assembly: load the module, wire the state, serve.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use axum::Router;
use jac_core::config::JacConfig;
use jac_core::error::RuntimeError;
use jac_runtime::context::ExecutionContext;
use jac_runtime::interp::Interpreter;
use jac_runtime::machine::JacMachine;
use jac_runtime::users::UserManager;

use crate::client::{rebuild_bundle, InlineBundleBuilder};
use crate::hmr::{HotReloader, JacFileWatcher, DEFAULT_DEBOUNCE};
use crate::routes::build_router;
use crate::state::{AppState, EndpointKind};

#[derive(Debug)]
pub enum ServerError {
    Init(String),
    Bind(String),
    Runtime(RuntimeError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Init(msg) => write!(f, "server init error: {msg}"),
            ServerError::Bind(msg) => write!(f, "server bind error: {msg}"),
            ServerError::Runtime(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ServerError {}

pub struct JacApiServer {
    pub state: AppState,
}

impl JacApiServer {
    /// Wire up state for serving `module_path` with persistence rooted at
    /// `base_path`.
    pub fn new(
        module_path: &Path,
        base_path: &Path,
        config: JacConfig,
    ) -> Result<Self, ServerError> {
        let machine = Arc::new(JacMachine::new(base_path));
        let users = UserManager::open(base_path).map_err(|e| ServerError::Init(e.to_string()))?;

        Ok(Self {
            state: AppState {
                machine,
                users: Arc::new(Mutex::new(users)),
                module_name: "__main__".to_string(),
                module_path: module_path.to_path_buf(),
                base_path: base_path.to_path_buf(),
                config: Arc::new(config),
                bundler: Arc::new(InlineBundleBuilder),
                bundle: Arc::new(RwLock::new(None)),
            },
        })
    }

    /// Compile and register the served module, run its entry blocks, and
    /// build the first client bundle.
    pub fn load_module(&self) -> Result<(), ServerError> {
        let module = self
            .state
            .machine
            .import_file(&self.state.module_path, Some(&self.state.module_name))
            .map_err(ServerError::Runtime)?;

        let ctx = ExecutionContext::create(&self.state.base_path, None)
            .map_err(|e| ServerError::Init(e.to_string()))?;
        let _guard = ctx.enter();
        let mut interp = Interpreter::new(&self.state.machine, ctx.clone(), module);
        interp.run_entries(None).map_err(ServerError::Runtime)?;
        ctx.close().map_err(|e| ServerError::Init(e.to_string()))?;

        if let Err(err) = rebuild_bundle(&self.state) {
            tracing::warn!(error = %err, "initial client bundle build failed");
        }
        Ok(())
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Bind and serve. `watch` starts the hot-reload worker over the base
    /// path's source tree.
    pub async fn serve(&self, port: u16, watch: bool) -> Result<(), ServerError> {
        if watch {
            let watcher = JacFileWatcher::new(
                &[self.state.base_path.clone()],
                DEFAULT_DEBOUNCE.max(Duration::from_millis(50)),
            )
            .map_err(|e| ServerError::Init(e.to_string()))?;
            HotReloader::spawn(self.state.clone(), watcher);
        }

        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;
        tracing::info!(port, module = %self.state.module_path.display(), "serving");
        axum::serve(listener, self.router())
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))
    }

    /// The endpoint catalog as printable documentation (`start --faux`).
    pub fn endpoint_docs(&self) -> String {
        let mut out = String::new();
        out.push_str("Unauthenticated:\n");
        out.push_str("  POST /user/register        {username, password}\n");
        out.push_str("  POST /user/login           {username, password}\n");
        out.push_str("  POST /user/refresh-token   {token}\n");
        out.push_str("\nAuthenticated (Bearer token):\n");
        for endpoint in self.state.catalog() {
            let prefix = match endpoint.kind {
                EndpointKind::Function => "function",
                EndpointKind::Walker => "walker",
            };
            let params: Vec<String> = endpoint
                .params
                .iter()
                .map(|p| p.name.clone())
                .collect();
            out.push_str(&format!(
                "  POST /{prefix}/{:<24} {{{}}}{}\n",
                endpoint.name,
                params.join(", "),
                if endpoint.streaming { "  [streaming]" } else { "" },
            ));
        }
        for page in self.state.client_pages() {
            out.push_str(&format!(
                "  GET  /{}/{page}\n",
                self.state.config.serve.cl_route_prefix
            ));
        }
        out
    }
}
