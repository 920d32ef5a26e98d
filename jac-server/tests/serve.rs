//! End-to-end API tests over the in-process router.

use std::path::Path;

use jac_core::config::JacConfig;
use jac_server::hmr::HotReloader;
use jac_server::JacApiServer;
use jac_test::TestApp;
use serde_json::json;

const TASKS_APP: &str = r#"
node Task {
    has title: str;
    has priority: int = 0;
}

walker CreateTask {
    has title: str;
    has priority: int = 0;

    can build with `root entry {
        report here ++> Task(title=self.title, priority=self.priority);
    }
}

walker ListTasks {
    can collect with `root entry {
        visit [-->];
    }
    can gather with Task entry {
        report {"title": here.title, "priority": here.priority};
    }
}

@private
walker PrivateCreateTask {
    has title: str = "p";
    can build with `root entry {
        report here ++> Task(title=self.title);
    }
}

@public
def public_greet(name: str = "world") {
    return "hello " + name;
}

def add_numbers(a: int, b: int) {
    return a + b;
}

@streaming
walker StreamReporter {
    has count: int = 1;
    can go with `root entry {
        let i = 0;
        while i < self.count {
            report {"n": i};
            i = i + 1;
        }
    }
}

client page Home {
    "<h1>tasks</h1>";
}
"#;

fn write_app(dir: &Path, source: &str) {
    std::fs::write(dir.join("app.jac"), source).unwrap();
}

fn boot(dir: &Path) -> TestApp {
    boot_with_config(dir, JacConfig::default())
}

fn boot_with_config(dir: &Path, config: JacConfig) -> TestApp {
    let server = JacApiServer::new(&dir.join("app.jac"), dir, config).unwrap();
    server.load_module().unwrap();
    TestApp::new(server.router())
}

async fn register(app: &TestApp, username: &str, password: &str) -> (String, String) {
    let response = app
        .post_json(
            "/user/register",
            &json!({"username": username, "password": password}),
        )
        .await;
    assert_eq!(response.status, 201, "register failed: {}", response.text());
    let body = response.json_value();
    assert_eq!(body["ok"], true);
    (
        body["data"]["token"].as_str().unwrap().to_string(),
        body["data"]["root_id"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn register_login_walker_read_back() {
    let tmp = tempfile::tempdir().unwrap();
    write_app(tmp.path(), TASKS_APP);
    let app = boot(tmp.path());

    let (token, root_id) = register(&app, "alice", "s").await;
    assert!(!root_id.is_empty());

    let created = app
        .post_json_authenticated(
            "/walker/CreateTask",
            &json!({"title": "T", "priority": 2}),
            &token,
        )
        .await
        .assert_status(http::StatusCode::OK)
        .json_value();
    assert_eq!(created["ok"], true);
    assert_eq!(created["data"]["reports"].as_array().unwrap().len(), 1);

    let listed = app
        .post_json_authenticated("/walker/ListTasks", &json!({}), &token)
        .await
        .assert_status(http::StatusCode::OK)
        .json_value();
    let reports = listed["data"]["reports"].as_array().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["title"], "T");
    assert_eq!(reports[0]["priority"], 2);
}

#[tokio::test]
async fn login_returns_same_root() {
    let tmp = tempfile::tempdir().unwrap();
    write_app(tmp.path(), TASKS_APP);
    let app = boot(tmp.path());

    let (_, root_id) = register(&app, "bob", "pw").await;
    let login = app
        .post_json("/user/login", &json!({"username": "bob", "password": "pw"}))
        .await
        .assert_status(http::StatusCode::OK)
        .json_value();
    assert_eq!(login["data"]["root_id"], root_id.as_str());

    let bad = app
        .post_json("/user/login", &json!({"username": "bob", "password": "no"}))
        .await;
    assert_eq!(bad.status, 401);
}

#[tokio::test]
async fn refresh_chain_preserves_subject() {
    let tmp = tempfile::tempdir().unwrap();
    write_app(tmp.path(), TASKS_APP);
    let app = boot(tmp.path());

    let (token1, root_id) = register(&app, "carol", "s").await;

    let second = app
        .post_json("/user/refresh-token", &json!({"token": token1}))
        .await
        .assert_status(http::StatusCode::OK)
        .json_value();
    let token2 = second["data"]["token"].as_str().unwrap().to_string();
    assert_ne!(token2, token1);

    let third = app
        .post_json("/user/refresh-token", &json!({"token": format!("Bearer {token2}")}))
        .await
        .assert_status(http::StatusCode::OK)
        .json_value();
    let token3 = third["data"]["token"].as_str().unwrap().to_string();
    assert_ne!(token3, token2);
    assert_eq!(third["data"]["username"], "carol");
    assert_eq!(third["data"]["root_id"], root_id.as_str());

    // The newest token is live.
    let listed = app
        .post_json_authenticated("/walker/ListTasks", &json!({}), &token3)
        .await;
    assert_eq!(listed.status, 200);
}

#[tokio::test]
async fn protected_walker_requires_token() {
    let tmp = tempfile::tempdir().unwrap();
    write_app(tmp.path(), TASKS_APP);
    let app = boot(tmp.path());

    let anonymous = app
        .post_json("/walker/PrivateCreateTask", &json!({}))
        .await;
    assert_eq!(anonymous.status, 401);
    let body = anonymous.json_value();
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let (token, _) = register(&app, "dave", "s").await;
    let allowed = app
        .post_json_authenticated("/walker/PrivateCreateTask", &json!({}), &token)
        .await;
    assert_eq!(allowed.status, 200);
}

#[tokio::test]
async fn users_are_isolated() {
    let tmp = tempfile::tempdir().unwrap();
    write_app(tmp.path(), TASKS_APP);
    let app = boot(tmp.path());

    let (token1, _) = register(&app, "u1", "s").await;
    let (token2, _) = register(&app, "u2", "s").await;

    app.post_json_authenticated("/walker/CreateTask", &json!({"title": "one"}), &token1)
        .await
        .assert_status(http::StatusCode::OK);
    app.post_json_authenticated("/walker/CreateTask", &json!({"title": "two"}), &token2)
        .await
        .assert_status(http::StatusCode::OK);

    let list1 = app
        .post_json_authenticated("/walker/ListTasks", &json!({}), &token1)
        .await
        .json_value();
    let reports1 = list1["data"]["reports"].as_array().unwrap();
    assert_eq!(reports1.len(), 1);
    assert_eq!(reports1[0]["title"], "one");

    let list2 = app
        .post_json_authenticated("/walker/ListTasks", &json!({}), &token2)
        .await
        .json_value();
    let reports2 = list2["data"]["reports"].as_array().unwrap();
    assert_eq!(reports2.len(), 1);
    assert_eq!(reports2[0]["title"], "two");
}

#[tokio::test]
async fn streaming_walker_emits_sse_frames() {
    let tmp = tempfile::tempdir().unwrap();
    write_app(tmp.path(), TASKS_APP);
    let app = boot(tmp.path());

    let (token, _) = register(&app, "erin", "s").await;
    let response = app
        .post_json_authenticated("/walker/StreamReporter", &json!({"count": 3}), &token)
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(
        response.headers.get("content-type").unwrap(),
        "text/event-stream"
    );
    let text = response.text();
    let frames: Vec<&str> = text
        .split("\n\n")
        .filter(|chunk| !chunk.is_empty())
        .collect();
    assert_eq!(frames.len(), 3);
    for (i, frame) in frames.iter().enumerate() {
        assert!(frame.starts_with("data: "), "bad frame: {frame}");
        let payload: serde_json::Value = serde_json::from_str(&frame[6..]).unwrap();
        assert_eq!(payload["n"], i as i64);
    }
}

#[tokio::test]
async fn public_function_without_token() {
    let tmp = tempfile::tempdir().unwrap();
    write_app(tmp.path(), TASKS_APP);
    let app = boot(tmp.path());

    let response = app
        .post_json("/function/public_greet", &json!({"args": {"name": "jac"}}))
        .await
        .assert_status(http::StatusCode::OK)
        .json_value();
    assert_eq!(response["data"]["result"], "hello jac");

    // Info for a public callable is also open.
    let info = app.get("/function/public_greet").await;
    assert_eq!(info.status, 200);
}

#[tokio::test]
async fn function_call_with_args_shapes() {
    let tmp = tempfile::tempdir().unwrap();
    write_app(tmp.path(), TASKS_APP);
    let app = boot(tmp.path());
    let (token, _) = register(&app, "frank", "s").await;

    let nested = app
        .post_json_authenticated("/function/add_numbers", &json!({"args": {"a": 10, "b": 25}}), &token)
        .await
        .assert_status(http::StatusCode::OK)
        .json_value();
    assert_eq!(nested["data"]["result"], 35);

    let flat = app
        .post_json_authenticated("/function/add_numbers", &json!({"a": 1, "b": 2}), &token)
        .await
        .json_value();
    assert_eq!(flat["data"]["result"], 3);

    let missing = app
        .post_json_authenticated("/function/add_numbers", &json!({"a": 1}), &token)
        .await;
    assert_eq!(missing.status, 400);
}

#[tokio::test]
async fn unknown_callable_is_405_unknown_route_404() {
    let tmp = tempfile::tempdir().unwrap();
    write_app(tmp.path(), TASKS_APP);
    let app = boot(tmp.path());
    let (token, _) = register(&app, "gina", "s").await;

    let unknown = app
        .post_json_authenticated("/function/nonexistent", &json!({}), &token)
        .await;
    assert_eq!(unknown.status, 405);
    assert_eq!(unknown.json_value()["error"]["code"], "UNKNOWN_CALLABLE");

    let missing_route = app.get("/no/such/route").await;
    assert_eq!(missing_route.status, 404);
    assert_eq!(missing_route.json_value()["ok"], false);
}

#[tokio::test]
async fn catalog_endpoints_require_token() {
    let tmp = tempfile::tempdir().unwrap();
    write_app(tmp.path(), TASKS_APP);
    let app = boot(tmp.path());

    assert_eq!(app.get("/functions").await.status, 401);

    let (token, _) = register(&app, "hank", "s").await;
    let functions = app
        .get_authenticated("/functions", &token)
        .await
        .assert_status(http::StatusCode::OK)
        .json_value();
    let names = functions["data"]["functions"].as_array().unwrap();
    assert!(names.iter().any(|n| n == "add_numbers"));

    let walkers = app
        .get_authenticated("/walkers", &token)
        .await
        .json_value();
    let names = walkers["data"]["walkers"].as_array().unwrap();
    assert!(names.iter().any(|n| n == "CreateTask"));
    assert!(names.iter().any(|n| n == "ListTasks"));
}

#[tokio::test]
async fn root_index_lists_endpoints() {
    let tmp = tempfile::tempdir().unwrap();
    write_app(tmp.path(), TASKS_APP);
    let app = boot(tmp.path());

    let index = app
        .get("/")
        .await
        .assert_status(http::StatusCode::OK)
        .json_value();
    let endpoints = index["data"]["endpoints"].as_array().unwrap();
    let listed: Vec<&str> = endpoints.iter().filter_map(|e| e.as_str()).collect();
    assert!(listed.contains(&"POST /user/register"));
    assert!(listed.contains(&"POST /walker/CreateTask"));
    assert!(listed.contains(&"GET /cl/Home"));
}

#[tokio::test]
async fn client_page_and_bundle() {
    let tmp = tempfile::tempdir().unwrap();
    write_app(tmp.path(), TASKS_APP);
    let app = boot(tmp.path());

    let page = app.get("/cl/Home").await.assert_status(http::StatusCode::OK);
    let html = page.text();
    assert!(html.contains("JacClient.mount(\"Home\")"));
    assert!(html.contains("/static/client.js"));

    let bundle = app
        .get("/static/client.js")
        .await
        .assert_status(http::StatusCode::OK);
    let js = bundle.text();
    assert!(js.contains("var JacClient"));
    assert!(js.contains("JacClient.register(\"Home\""));

    let missing = app.get("/cl/Nope").await;
    assert_eq!(missing.status, 404);
}

#[tokio::test]
async fn openapi_document_covers_callables() {
    let tmp = tempfile::tempdir().unwrap();
    write_app(tmp.path(), TASKS_APP);
    let app = boot(tmp.path());

    let doc = app
        .get("/openapi.json")
        .await
        .assert_status(http::StatusCode::OK)
        .json_value();
    assert_eq!(doc["openapi"], "3.0.0");
    assert!(doc["paths"].get("/walker/CreateTask").is_some());
    assert!(doc["paths"].get("/function/add_numbers").is_some());
    assert!(doc["paths"].get("/user/register").is_some());
}

#[tokio::test]
async fn configured_response_headers_are_merged() {
    let tmp = tempfile::tempdir().unwrap();
    write_app(tmp.path(), TASKS_APP);
    std::fs::write(
        tmp.path().join("jac.toml"),
        "[environments.response.headers]\nx-frame-options = \"DENY\"\n",
    )
    .unwrap();
    let config = JacConfig::discover(tmp.path()).unwrap();
    let app = boot_with_config(tmp.path(), config);

    let response = app.get("/").await;
    assert_eq!(response.headers.get("x-frame-options").unwrap(), "DENY");
}

#[tokio::test]
async fn hmr_swaps_walker_and_keeps_sessions() {
    let tmp = tempfile::tempdir().unwrap();
    let source_v1 = r#"
walker get_value {
    can enter with `root entry {
        report {"value": 1};
    }
}
"#;
    let source_v2 = r#"
walker get_value {
    can enter with `root entry {
        report {"value": 2};
    }
}
"#;
    write_app(tmp.path(), source_v1);
    let server = JacApiServer::new(&tmp.path().join("app.jac"), tmp.path(), JacConfig::default())
        .unwrap();
    server.load_module().unwrap();
    let state = server.state.clone();
    let app = TestApp::new(server.router());

    let (token, _) = register(&app, "hmr", "s").await;
    let before = app
        .post_json_authenticated("/walker/get_value", &json!({}), &token)
        .await
        .json_value();
    assert_eq!(before["data"]["reports"][0]["value"], 1);

    write_app(tmp.path(), source_v2);
    let app_path = tmp.path().join("app.jac");
    let swapped =
        tokio::task::spawn_blocking(move || HotReloader::new(state).reload(&app_path))
            .await
            .unwrap();
    assert!(swapped);

    // Same token, same router: only the walker body changed.
    let after = app
        .post_json_authenticated("/walker/get_value", &json!({}), &token)
        .await
        .json_value();
    assert_eq!(after["data"]["reports"][0]["value"], 2);
}

#[tokio::test]
async fn data_persists_across_server_restarts() {
    let tmp = tempfile::tempdir().unwrap();
    write_app(tmp.path(), TASKS_APP);

    let (token, root_before) = {
        let app = boot(tmp.path());
        let (token, root_id) = register(&app, "keep", "s").await;
        app.post_json_authenticated("/walker/CreateTask", &json!({"title": "stays"}), &token)
            .await
            .assert_status(http::StatusCode::OK);
        (token, root_id)
    };

    // A fresh server over the same base path sees the same user and data.
    let app = boot(tmp.path());
    let login = app
        .post_json("/user/login", &json!({"username": "keep", "password": "s"}))
        .await
        .assert_status(http::StatusCode::OK)
        .json_value();
    assert_eq!(login["data"]["root_id"], root_before.as_str());

    let listed = app
        .post_json_authenticated("/walker/ListTasks", &json!({}), &token)
        .await
        .assert_status(http::StatusCode::OK)
        .json_value();
    let reports = listed["data"]["reports"].as_array().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["title"], "stays");
}

#[tokio::test]
async fn malformed_json_body_is_422() {
    let tmp = tempfile::tempdir().unwrap();
    write_app(tmp.path(), TASKS_APP);
    let app = boot(tmp.path());
    let (token, _) = register(&app, "mal", "s").await;

    let request = http::Request::builder()
        .method(http::Method::POST)
        .uri("/walker/CreateTask")
        .header(http::header::CONTENT_TYPE, "application/json")
        .header(http::header::AUTHORIZATION, format!("Bearer {token}"))
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status, 422);
    assert_eq!(response.json_value()["error"]["code"], "VALIDATION");
}
