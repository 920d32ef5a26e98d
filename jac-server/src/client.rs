//! Client pages, the JS bundle, and static assets.
//!
//! The bundle builder is a seam: the production Vite-based builder plugs in
//! through [`ClientBundleBuilder`]; the built-in one stitches the lowered
//! page chunks onto a small mount runtime. Until a first build completes,
//! bundle requests answer 503.

use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use chrono::{DateTime, Utc};
use jac_runtime::machine::LoadedModule;

use crate::envelope;
use crate::state::AppState;

/// File extensions the static route is willing to serve.
const ASSET_EXTENSIONS: &[&str] = &["js", "css", "map", "png", "svg", "ico", "woff2", "json"];

#[derive(Clone, Debug)]
pub struct BundleArtifact {
    pub js: String,
    pub built_at: DateTime<Utc>,
}

/// Opaque transformer from a server module to a JS bundle.
pub trait ClientBundleBuilder: Send + Sync {
    fn build(&self, module: &LoadedModule) -> Result<BundleArtifact, String>;
}

/// Concatenates the mount runtime with every lowered page chunk.
pub struct InlineBundleBuilder;

const CLIENT_RUNTIME: &str = r#"var JacClient = (function () {
  var pages = {};
  return {
    register: function (name, render) { pages[name] = render; },
    h: function (tag, children) {
      return "<" + tag + ">" + children.join("") + "</" + tag + ">";
    },
    mount: function (name) {
      var render = pages[name];
      var rootEl = document.getElementById("root");
      if (render && rootEl) { rootEl.innerHTML = render(); }
    }
  };
})();
"#;

impl ClientBundleBuilder for InlineBundleBuilder {
    fn build(&self, module: &LoadedModule) -> Result<BundleArtifact, String> {
        let mut js = String::from(CLIENT_RUNTIME);
        for page in &module.image.client_pages {
            js.push_str(&page.js);
        }
        Ok(BundleArtifact {
            js,
            built_at: Utc::now(),
        })
    }
}

/// Build (or rebuild) the bundle and stash it in shared state.
pub fn rebuild_bundle(state: &AppState) -> Result<(), String> {
    let module = state
        .machine
        .module(&state.module_name)
        .ok_or_else(|| "served module is not loaded".to_string())?;
    let artifact = state.bundler.build(&module)?;
    if let Ok(mut slot) = state.bundle.write() {
        *slot = Some(artifact);
    }
    Ok(())
}

/// `GET /{cl_prefix}/{name}` — the HTML shell that mounts a client page.
pub fn render_page(state: &AppState, name: &str) -> Response {
    if !state.client_pages().iter().any(|page| page == name) {
        return envelope::not_found(format!("no client page '{name}'"));
    }
    Html(page_shell(name)).into_response()
}

pub fn page_shell(name: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{name}</title></head>\n\
         <body>\n<div id=\"root\"></div>\n\
         <script src=\"/static/client.js\"></script>\n\
         <script>JacClient.mount({mount});</script>\n\
         </body>\n</html>\n",
        mount = serde_json::json!(name),
    )
}

/// `GET /static/client.js`.
pub fn serve_bundle(state: &AppState) -> Response {
    let Ok(slot) = state.bundle.read() else {
        return envelope::service_unavailable("bundle state unavailable");
    };
    match slot.as_ref() {
        Some(artifact) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/javascript")],
            artifact.js.clone(),
        )
            .into_response(),
        None => envelope::service_unavailable("client bundle not built yet"),
    }
}

/// `GET /static/{path}` — extension-filtered files under the project's
/// `static/` directory. Traversal segments are rejected outright.
pub fn serve_asset(state: &AppState, rel: &str) -> Response {
    if rel.split('/').any(|seg| seg == ".." || seg.is_empty()) {
        return envelope::not_found("no such asset");
    }
    let allowed = rel
        .rsplit('.')
        .next()
        .is_some_and(|ext| ASSET_EXTENSIONS.contains(&ext));
    if !allowed {
        return envelope::not_found("no such asset");
    }

    let path = state.base_path.join("static").join(rel);
    match std::fs::read(&path) {
        Ok(bytes) => {
            let mime = match path.extension().and_then(|e| e.to_str()) {
                Some("js") => "application/javascript",
                Some("css") => "text/css",
                Some("json" | "map") => "application/json",
                Some("png") => "image/png",
                Some("svg") => "image/svg+xml",
                Some("ico") => "image/x-icon",
                Some("woff2") => "font/woff2",
                _ => "application/octet-stream",
            };
            (StatusCode::OK, [(header::CONTENT_TYPE, mime)], bytes).into_response()
        }
        Err(_) => envelope::not_found("no such asset"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jac_compiler::ir::{ClientPageImage, ModuleImage, IR_VERSION};

    fn module_with_page() -> LoadedModule {
        LoadedModule {
            name: "app".into(),
            path: None,
            image: ModuleImage {
                ir_version: IR_VERSION,
                name: "app".into(),
                path: String::new(),
                minimal: false,
                archetypes: Vec::new(),
                functions: Vec::new(),
                client_pages: vec![ClientPageImage {
                    name: "Home".into(),
                    body: Vec::new(),
                    js: "JacClient.register(\"Home\", function () { return \"hi\"; });\n".into(),
                }],
                entries: Vec::new(),
                imports: Vec::new(),
            },
            fallback: false,
        }
    }

    #[test]
    fn inline_builder_includes_runtime_and_pages() {
        let artifact = InlineBundleBuilder.build(&module_with_page()).unwrap();
        assert!(artifact.js.contains("var JacClient"));
        assert!(artifact.js.contains("JacClient.register(\"Home\""));
    }

    #[test]
    fn shell_mounts_the_requested_page() {
        let html = page_shell("Home");
        assert!(html.contains("JacClient.mount(\"Home\")"));
        assert!(html.contains("/static/client.js"));
    }
}
