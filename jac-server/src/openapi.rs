//! OpenAPI-style metadata for the exposed endpoints.

use jac_compiler::ir::AccessImage;

use crate::state::{AppState, EndpointKind};

pub fn document(state: &AppState) -> serde_json::Value {
    let mut paths = serde_json::Map::new();

    paths.insert(
        "/user/register".to_string(),
        post_op("Register a new user", false, &["username", "password"]),
    );
    paths.insert(
        "/user/login".to_string(),
        post_op("Log in and receive a token", false, &["username", "password"]),
    );
    paths.insert(
        "/user/refresh-token".to_string(),
        post_op("Refresh a token inside the refresh window", false, &["token"]),
    );

    for endpoint in state.catalog() {
        let prefix = match endpoint.kind {
            EndpointKind::Function => "/function",
            EndpointKind::Walker => "/walker",
        };
        let params: Vec<&str> = endpoint.params.iter().map(|p| p.name.as_str()).collect();
        let secured = endpoint.access != AccessImage::Public;
        let summary = match endpoint.kind {
            EndpointKind::Function => format!("Call function {}", endpoint.name),
            EndpointKind::Walker => format!("Spawn walker {}", endpoint.name),
        };
        paths.insert(
            format!("{prefix}/{}", endpoint.name),
            post_op(&summary, secured, &params),
        );
    }

    let info_title = state
        .config
        .project
        .name
        .clone()
        .unwrap_or_else(|| "jac-api".to_string());
    let info_version = state
        .config
        .project
        .version
        .clone()
        .unwrap_or_else(|| "0.0.0".to_string());

    serde_json::json!({
        "openapi": "3.0.0",
        "info": { "title": info_title, "version": info_version },
        "paths": paths,
        "components": {
            "securitySchemes": {
                "bearerAuth": { "type": "http", "scheme": "bearer", "bearerFormat": "JWT" }
            }
        },
    })
}

fn post_op(summary: &str, secured: bool, params: &[&str]) -> serde_json::Value {
    let properties: serde_json::Map<String, serde_json::Value> = params
        .iter()
        .map(|name| (name.to_string(), serde_json::json!({})))
        .collect();
    let mut op = serde_json::json!({
        "post": {
            "summary": summary,
            "requestBody": {
                "content": {
                    "application/json": {
                        "schema": { "type": "object", "properties": properties }
                    }
                }
            },
            "responses": { "200": { "description": "envelope response" } }
        }
    });
    if secured {
        op["post"]["security"] = serde_json::json!([{ "bearerAuth": [] }]);
    }
    op
}
