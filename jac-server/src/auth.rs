//! Bearer-token extraction and the per-request principal.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use jac_runtime::users::UserRecord;
use uuid::Uuid;

use crate::state::AppState;

/// The authenticated caller of one request.
#[derive(Clone, Debug)]
pub struct Principal {
    pub username: String,
    pub root_id: Uuid,
}

impl From<UserRecord> for Principal {
    fn from(record: UserRecord) -> Self {
        Self {
            username: record.username,
            root_id: record.root_id,
        }
    }
}

/// Pull the token out of `Authorization: Bearer <token>`. The `Bearer`
/// prefix is optional, matching the refresh-body convention.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Resolve the request's principal from its headers, if any.
pub fn principal(state: &AppState, headers: &HeaderMap) -> Option<Principal> {
    let token = bearer_token(headers)?;
    let users = state.users.lock().ok()?;
    users
        .record_for_token(&token)
        .ok()
        .flatten()
        .map(Principal::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn extracts_bearer_token() {
        assert_eq!(
            bearer_token(&headers_with("Bearer abc.def.ghi")).as_deref(),
            Some("abc.def.ghi")
        );
    }

    #[test]
    fn prefix_is_optional() {
        assert_eq!(bearer_token(&headers_with("abc.def.ghi")).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn empty_header_is_none() {
        assert!(bearer_token(&headers_with("Bearer ")).is_none());
        assert!(bearer_token(&HeaderMap::new()).is_none());
    }
}
