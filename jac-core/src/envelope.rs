//! The `{ok, type, data, error}` transport envelope every HTTP response
//! conforms to.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transport {
    pub ok: bool,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Transport {
    pub fn success(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            ok: true,
            kind: kind.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(kind: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            kind: kind.into(),
            data: None,
            error: Some(ErrorBody {
                code: code.into(),
                message: message.into(),
                details: None,
            }),
        }
    }

    pub fn failure_with_details(
        kind: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            ok: false,
            kind: kind.into(),
            data: None,
            error: Some(ErrorBody {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_shape() {
        let env = Transport::success("walker", serde_json::json!({"reports": [1]}));
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["type"], "walker");
        assert_eq!(json["data"]["reports"][0], 1);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn failure_envelope_shape() {
        let env = Transport::failure("error", "UNAUTHORIZED", "missing token");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["code"], "UNAUTHORIZED");
        assert_eq!(json["error"]["message"], "missing token");
        assert!(json.get("data").is_none());
        assert!(json["error"].get("details").is_none());
    }
}
