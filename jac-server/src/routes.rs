//! Route table and request handlers.
//!
//! Every declared function maps to `POST /function/{name}`, every walker to
//! `POST /walker/{name}[/{start}]`, client pages to `GET /{cl_prefix}/{name}`.
//! Request bodies accept both the flat `{a: 1}` shape and the nested
//! `{"args": {...}}` / `{"fields": {...}}` shapes. Invocation happens on a
//! blocking worker: the graph store is synchronous and the context stack is
//! thread-local.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use jac_compiler::ir::AccessImage;
use jac_core::error::RuntimeError;
use jac_core::value::Value;
use jac_runtime::context::ExecutionContext;
use jac_runtime::interp::Interpreter;
use jac_runtime::users::UserError;
use tower_http::set_header::SetResponseHeaderLayer;
use uuid::Uuid;

use crate::auth::{self, Principal};
use crate::client;
use crate::envelope;
use crate::openapi;
use crate::sse;
use crate::state::{AppState, Endpoint, EndpointKind};

const REQUEST_DEADLINE: Duration = Duration::from_secs(30);

pub fn build_router(state: AppState) -> Router {
    let cl_prefix = state.config.serve.cl_route_prefix.clone();
    let response_headers = state.config.environments.response.headers.clone();

    let mut router = Router::new()
        .route("/", get(index))
        .route("/openapi.json", get(openapi_doc))
        .route("/user/register", post(register))
        .route("/user/login", post(login))
        .route("/user/refresh-token", post(refresh_token))
        .route("/functions", get(list_functions))
        .route("/walkers", get(list_walkers))
        .route("/function/{name}", get(function_info).post(call_function))
        .route("/walker/{name}", get(walker_info).post(spawn_walker))
        .route("/walker/{name}/{start}", post(spawn_walker_at))
        .route("/static/client.js", get(bundle_js))
        .route("/static/{*path}", get(static_asset))
        .route(&format!("/{cl_prefix}/{{name}}"), get(client_page))
        .fallback(fallback)
        .with_state(state);

    // `[environments.response.headers]` merge into every response.
    for (name, value) in response_headers {
        let (Ok(name), Ok(value)) = (
            name.parse::<axum::http::HeaderName>(),
            value.parse::<axum::http::HeaderValue>(),
        ) else {
            tracing::warn!(header = %name, "ignoring unparsable response header");
            continue;
        };
        router = router.layer(SetResponseHeaderLayer::overriding(name, value));
    }
    router
}

// ── User endpoints ──────────────────────────────────────────────────────────

fn body_json(bytes: &Bytes) -> Result<serde_json::Value, Response> {
    if bytes.is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| envelope::validation(format!("invalid JSON body: {e}")))
}

fn credentials(body: &serde_json::Value) -> Result<(String, String), Response> {
    let username = body.get("username").and_then(|v| v.as_str());
    let password = body.get("password").and_then(|v| v.as_str());
    match (username, password) {
        (Some(username), Some(password)) if !username.is_empty() => {
            Ok((username.to_string(), password.to_string()))
        }
        _ => Err(envelope::error(
            StatusCode::BAD_REQUEST,
            "VALIDATION",
            "'username' and 'password' are required",
        )),
    }
}

async fn register(State(state): State<AppState>, bytes: Bytes) -> Response {
    let body = match body_json(&bytes) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let (username, password) = match credentials(&body) {
        Ok(creds) => creds,
        Err(response) => return response,
    };

    let result = {
        let users = match state.users.lock() {
            Ok(users) => users,
            Err(_) => return envelope::service_unavailable("user store unavailable"),
        };
        users.register(&username, &password)
    };
    match result {
        Ok(record) => envelope::created(
            "user",
            serde_json::json!({
                "username": record.username,
                "token": record.token,
                "root_id": record.root_id.to_string(),
            }),
        ),
        Err(UserError::UserExists(name)) => envelope::error(
            StatusCode::BAD_REQUEST,
            "USER_EXISTS",
            format!("user '{name}' already exists"),
        ),
        Err(err) => envelope::service_unavailable(err.to_string()),
    }
}

async fn login(State(state): State<AppState>, bytes: Bytes) -> Response {
    let body = match body_json(&bytes) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let (username, password) = match credentials(&body) {
        Ok(creds) => creds,
        Err(response) => return response,
    };

    let result = {
        let users = match state.users.lock() {
            Ok(users) => users,
            Err(_) => return envelope::service_unavailable("user store unavailable"),
        };
        users.authenticate(&username, &password)
    };
    match result {
        Ok(Some(record)) => envelope::ok(
            "user",
            serde_json::json!({
                "username": record.username,
                "token": record.token,
                "root_id": record.root_id.to_string(),
            }),
        ),
        Ok(None) => envelope::error(
            StatusCode::UNAUTHORIZED,
            "INVALID_CREDENTIALS",
            "invalid username or password",
        ),
        Err(err) => envelope::service_unavailable(err.to_string()),
    }
}

async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    let body = match body_json(&bytes) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let token = body
        .get("token")
        .and_then(|v| v.as_str())
        .map(|raw| raw.strip_prefix("Bearer ").unwrap_or(raw).to_string())
        .or_else(|| auth::bearer_token(&headers));
    let Some(token) = token else {
        return envelope::unauthorized();
    };

    let result = {
        let users = match state.users.lock() {
            Ok(users) => users,
            Err(_) => return envelope::service_unavailable("user store unavailable"),
        };
        users.refresh(&token)
    };
    match result {
        Ok(Some(record)) => envelope::ok(
            "user",
            serde_json::json!({
                "username": record.username,
                "token": record.token,
                "root_id": record.root_id.to_string(),
            }),
        ),
        Ok(None) => envelope::error(
            StatusCode::UNAUTHORIZED,
            "INVALID_TOKEN",
            "token is invalid or outside the refresh window",
        ),
        Err(err) => envelope::service_unavailable(err.to_string()),
    }
}

// ── Catalog endpoints ───────────────────────────────────────────────────────

async fn list_functions(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if auth::principal(&state, &headers).is_none() {
        return envelope::unauthorized();
    }
    let names: Vec<String> = state
        .catalog()
        .into_iter()
        .filter(|e| e.kind == EndpointKind::Function)
        .map(|e| e.name)
        .collect();
    envelope::ok("functions", serde_json::json!({ "functions": names }))
}

async fn list_walkers(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if auth::principal(&state, &headers).is_none() {
        return envelope::unauthorized();
    }
    let names: Vec<String> = state
        .catalog()
        .into_iter()
        .filter(|e| e.kind == EndpointKind::Walker)
        .map(|e| e.name)
        .collect();
    envelope::ok("walkers", serde_json::json!({ "walkers": names }))
}

fn endpoint_info(endpoint: &Endpoint) -> serde_json::Value {
    let params: Vec<serde_json::Value> = endpoint
        .params
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.name,
                "type": p.ty,
                "required": p.default.is_none(),
            })
        })
        .collect();
    serde_json::json!({
        "name": endpoint.name,
        "kind": match endpoint.kind {
            EndpointKind::Function => "function",
            EndpointKind::Walker => "walker",
        },
        "access": match endpoint.access {
            AccessImage::Public => "public",
            AccessImage::Protected => "protected",
            AccessImage::Private => "private",
        },
        "streaming": endpoint.streaming,
        "params": params,
        "imported_from": endpoint.imported_from,
    })
}

async fn function_info(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    info_response(&state, EndpointKind::Function, &name, &headers)
}

async fn walker_info(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    info_response(&state, EndpointKind::Walker, &name, &headers)
}

fn info_response(
    state: &AppState,
    kind: EndpointKind,
    name: &str,
    headers: &HeaderMap,
) -> Response {
    let Some(endpoint) = state.endpoint(kind, name) else {
        return envelope::unknown_callable(name);
    };
    if endpoint.access != AccessImage::Public && auth::principal(state, headers).is_none() {
        return envelope::unauthorized();
    }
    let kind_name = match kind {
        EndpointKind::Function => "function",
        EndpointKind::Walker => "walker",
    };
    envelope::ok(kind_name, endpoint_info(&endpoint))
}

// ── Invocation ──────────────────────────────────────────────────────────────

async fn call_function(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    invoke(state, EndpointKind::Function, name, None, headers, bytes).await
}

async fn spawn_walker(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    invoke(state, EndpointKind::Walker, name, None, headers, bytes).await
}

async fn spawn_walker_at(
    State(state): State<AppState>,
    Path((name, start)): Path<(String, String)>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    let Ok(start) = Uuid::parse_str(&start) else {
        return envelope::error(
            StatusCode::BAD_REQUEST,
            "INVALID_ARGUMENT",
            "start node id is not a valid uuid",
        );
    };
    invoke(state, EndpointKind::Walker, name, Some(start), headers, bytes).await
}

/// Outcome of a blocking invocation, before envelope shaping.
struct InvokeOutcome {
    data: serde_json::Value,
    frames: Vec<serde_json::Value>,
}

enum InvokeFailure {
    Runtime(RuntimeError),
    Forbidden,
    Unavailable(String),
}

async fn invoke(
    state: AppState,
    kind: EndpointKind,
    name: String,
    start: Option<Uuid>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    let Some(endpoint) = state.endpoint(kind, &name) else {
        return envelope::unknown_callable(&name);
    };

    let principal = auth::principal(&state, &headers);
    if endpoint.access != AccessImage::Public && principal.is_none() {
        return envelope::unauthorized();
    }

    let body = match body_json(&bytes) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let kwargs = match parse_call_args(&body) {
        Ok(kwargs) => kwargs,
        Err(message) => return envelope::validation(message),
    };

    let streaming = endpoint.streaming;
    let kind_name = match kind {
        EndpointKind::Function => "function",
        EndpointKind::Walker => "walker",
    };

    let result = tokio::task::spawn_blocking(move || {
        run_invocation(&state, &endpoint, principal, kwargs, start)
    })
    .await;

    match result {
        Ok(Ok(outcome)) => {
            if streaming {
                sse::stream_response(outcome.frames)
            } else {
                envelope::ok(kind_name, outcome.data)
            }
        }
        Ok(Err(InvokeFailure::Forbidden)) => {
            envelope::forbidden("caller does not own the start node")
        }
        Ok(Err(InvokeFailure::Runtime(err))) => envelope::runtime_error(err),
        Ok(Err(InvokeFailure::Unavailable(message))) => envelope::service_unavailable(message),
        Err(_) => envelope::service_unavailable("invocation worker failed"),
    }
}

/// Runs on a blocking worker thread: opens the context, enters it, and
/// dispatches the callable.
fn run_invocation(
    state: &AppState,
    endpoint: &Endpoint,
    principal: Option<Principal>,
    kwargs: BTreeMap<String, Value>,
    start: Option<Uuid>,
) -> Result<InvokeOutcome, InvokeFailure> {
    let ctx = ExecutionContext::create(&state.base_path, principal.as_ref().map(|p| p.root_id))
        .map_err(|e| InvokeFailure::Unavailable(e.to_string()))?;
    let _guard = ctx.enter();

    let module = state
        .machine
        .module(&state.module_name)
        .ok_or_else(|| InvokeFailure::Unavailable("served module not loaded".to_string()))?;

    let mut interp = Interpreter::new(&state.machine, ctx.clone(), module);
    interp.deadline = Some(Instant::now() + REQUEST_DEADLINE);

    let outcome = match endpoint.kind {
        EndpointKind::Function => {
            let result = interp
                .call_named(&endpoint.name, Vec::new(), kwargs)
                .map_err(InvokeFailure::Runtime)?;
            let frames = interp
                .yields
                .iter()
                .map(|v| interp.value_to_public_json(v))
                .collect();
            InvokeOutcome {
                data: serde_json::json!({ "result": interp.value_to_public_json(&result) }),
                frames,
            }
        }
        EndpointKind::Walker => {
            let start_node = start.unwrap_or_else(|| ctx.root());

            // Private walkers may only start on anchors the caller owns.
            if endpoint.access == AccessImage::Private {
                if let Some(start) = start {
                    let anchor = ctx
                        .memory()
                        .get(start)
                        .map_err(|e| InvokeFailure::Runtime(e.into()))?
                        .ok_or_else(|| {
                            InvokeFailure::Runtime(RuntimeError::NotFound(format!(
                                "anchor {start}"
                            )))
                        })?;
                    if anchor.owner_root_id != ctx.root() {
                        return Err(InvokeFailure::Forbidden);
                    }
                }
            }

            let instance = interp
                .call_named(&endpoint.name, Vec::new(), kwargs)
                .map_err(InvokeFailure::Runtime)?;
            let result = interp
                .spawn_value(instance, start_node)
                .map_err(InvokeFailure::Runtime)?;

            let reports: Vec<serde_json::Value> = result
                .reports
                .iter()
                .map(|v| interp.value_to_public_json(v))
                .collect();
            InvokeOutcome {
                data: serde_json::json!({
                    "anchor_id": result.anchor_id.to_string(),
                    "reports": reports,
                    "disengaged": result.disengaged,
                }),
                frames: reports,
            }
        }
    };

    ctx.close()
        .map_err(|e| InvokeFailure::Unavailable(e.to_string()))?;
    Ok(outcome)
}

/// Accept `{a: 1}`, `{"args": {...}}`, and `{"fields": {...}}` bodies.
fn parse_call_args(body: &serde_json::Value) -> Result<BTreeMap<String, Value>, String> {
    let object = match body {
        serde_json::Value::Null => return Ok(BTreeMap::new()),
        serde_json::Value::Object(object) => object,
        other => {
            return Err(format!(
                "request body must be a JSON object, got {other}"
            ))
        }
    };

    for nested_key in ["args", "fields"] {
        if let Some(nested) = object.get(nested_key) {
            let serde_json::Value::Object(nested) = nested else {
                return Err(format!("'{nested_key}' must be a JSON object"));
            };
            return Ok(nested
                .iter()
                .map(|(k, v)| (k.clone(), Value::from_json(v)))
                .collect());
        }
    }

    Ok(object
        .iter()
        .map(|(k, v)| (k.clone(), Value::from_json(v)))
        .collect())
}

// ── Pages, assets, metadata ─────────────────────────────────────────────────

async fn client_page(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    client::render_page(&state, &name)
}

async fn bundle_js(State(state): State<AppState>) -> Response {
    client::serve_bundle(&state)
}

async fn static_asset(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    client::serve_asset(&state, &path)
}

async fn openapi_doc(State(state): State<AppState>) -> Response {
    Json(openapi::document(&state)).into_response()
}

async fn index(State(state): State<AppState>) -> Response {
    if let Some(page) = &state.config.serve.base_route_app {
        return client::render_page(&state, page);
    }

    let mut endpoints = vec![
        "POST /user/register".to_string(),
        "POST /user/login".to_string(),
        "POST /user/refresh-token".to_string(),
        "GET /functions".to_string(),
        "GET /walkers".to_string(),
        "GET /openapi.json".to_string(),
    ];
    for endpoint in state.catalog() {
        let prefix = match endpoint.kind {
            EndpointKind::Function => "function",
            EndpointKind::Walker => "walker",
        };
        endpoints.push(format!("POST /{prefix}/{}", endpoint.name));
    }
    for page in state.client_pages() {
        endpoints.push(format!(
            "GET /{}/{page}",
            state.config.serve.cl_route_prefix
        ));
    }
    envelope::ok("api", serde_json::json!({ "endpoints": endpoints }))
}

async fn fallback() -> Response {
    envelope::not_found("unknown route")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_and_nested_bodies_parse_alike() {
        let flat = serde_json::json!({"title": "T", "priority": 2});
        let nested = serde_json::json!({"args": {"title": "T", "priority": 2}});
        let fields = serde_json::json!({"fields": {"title": "T", "priority": 2}});
        let a = parse_call_args(&flat).unwrap();
        let b = parse_call_args(&nested).unwrap();
        let c = parse_call_args(&fields).unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.get("title"), Some(&Value::Str("T".into())));
    }

    #[test]
    fn null_body_is_empty_args() {
        assert!(parse_call_args(&serde_json::Value::Null).unwrap().is_empty());
    }

    #[test]
    fn array_body_is_rejected() {
        assert!(parse_call_args(&serde_json::json!([1, 2])).is_err());
    }
}
