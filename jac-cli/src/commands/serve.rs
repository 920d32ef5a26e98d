//! `start` and `serve` — the API server entry points.

use std::path::Path;

use jac_core::config::JacConfig;
use jac_server::JacApiServer;

use super::require_jac_file;

pub fn start(
    file: &Path,
    port: u16,
    watch: bool,
    no_client: bool,
    faux: bool,
) -> Result<(), String> {
    require_jac_file(file)?;
    let base = file.parent().unwrap_or(Path::new(".")).to_path_buf();
    let config = JacConfig::discover(&base).map_err(|e| e.to_string())?;
    let port = config.serve.port.unwrap_or(port);

    let server = JacApiServer::new(file, &base, config).map_err(|e| e.to_string())?;
    server.load_module().map_err(|e| e.to_string())?;

    if faux {
        print!("{}", server.endpoint_docs());
        return Ok(());
    }
    if no_client {
        // API-only mode: drop the built bundle so /static/client.js answers 503.
        if let Ok(mut bundle) = server.state.bundle.write() {
            *bundle = None;
        }
    }

    serve_blocking(server, port, watch)
}

pub fn serve(file: &Path, session: Option<&Path>, port: u16) -> Result<(), String> {
    require_jac_file(file)?;
    let base = session
        .map(Path::to_path_buf)
        .unwrap_or_else(|| file.parent().unwrap_or(Path::new(".")).to_path_buf());
    let config = JacConfig::discover(&base).map_err(|e| e.to_string())?;
    let port = config.serve.port.unwrap_or(port);

    let server = JacApiServer::new(file, &base, config).map_err(|e| e.to_string())?;
    server.load_module().map_err(|e| e.to_string())?;
    serve_blocking(server, port, false)
}

fn serve_blocking(server: JacApiServer, port: u16, watch: bool) -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| e.to_string())?;
    runtime
        .block_on(server.serve(port, watch))
        .map_err(|e| e.to_string())
}
