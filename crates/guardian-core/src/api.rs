//! HTTP-shaped handlers for the gateway's management surface.
//!
//! The host owns the sockets and the router; the gateway only provides
//! typed request → response functions. Contract: JSON bodies throughout,
//! 405 on method mismatch, 400 on a missing or invalid body.
//!
//! | Endpoint | Method | Handler |
//! |----------|--------|---------|
//! | `/api/guardian/status` | GET | [`Guardian::handle_status`] |
//! | `/api/guardian/toggle` | POST | [`Guardian::handle_toggle`] |
//! | `/api/guardian/stats` | GET | [`Guardian::handle_stats`] |
//! | `/api/guardian/validate` | POST | [`Guardian::handle_validate`] |

use crate::guardian::Guardian;
use serde_json::{json, Value};

/// HTTP method, as far as this surface cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Status plus JSON body, ready for the host to serialise.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({ "error": message }),
        }
    }

    fn method_not_allowed() -> Self {
        Self::error(405, "method not allowed")
    }
}

impl Guardian {
    /// Routes a request under `/api/guardian/`.
    pub async fn handle_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> ApiResponse {
        match path {
            "/api/guardian/status" => self.handle_status(method),
            "/api/guardian/toggle" => self.handle_toggle(method, body),
            "/api/guardian/stats" => self.handle_stats(method),
            "/api/guardian/validate" => self.handle_validate(method, body).await,
            _ => ApiResponse::error(404, "not found"),
        }
    }

    /// `GET /api/guardian/status`
    pub fn handle_status(&self, method: Method) -> ApiResponse {
        if method != Method::Get {
            return ApiResponse::method_not_allowed();
        }
        let (patterns, categories) = self
            .store()
            .read()
            .map(|s| (s.total_patterns(), s.categories().len()))
            .unwrap_or((0, 0));
        ApiResponse::ok(json!({
            "enabled": self.is_enabled(),
            "totalPatterns": patterns,
            "categories": categories,
            "chainLength": self.chain_length(),
            "peers": self.peer_count(),
        }))
    }

    /// `POST /api/guardian/toggle {"enabled": bool}`
    pub fn handle_toggle(&self, method: Method, body: Option<&Value>) -> ApiResponse {
        if method != Method::Post {
            return ApiResponse::method_not_allowed();
        }
        let Some(enabled) = body.and_then(|b| b.get("enabled")).and_then(Value::as_bool) else {
            return ApiResponse::error(400, "body must be {\"enabled\": bool}");
        };
        self.toggle(enabled);
        ApiResponse::ok(json!({ "enabled": enabled }))
    }

    /// `GET /api/guardian/stats`
    pub fn handle_stats(&self, method: Method) -> ApiResponse {
        if method != Method::Get {
            return ApiResponse::method_not_allowed();
        }
        let mut body = self.stats().snapshot();
        if let Value::Object(map) = &mut body {
            let (patterns, version) = self
                .store()
                .read()
                .map(|s| (s.total_patterns(), s.version().to_string()))
                .unwrap_or((0, String::new()));
            map.insert("totalPatterns".to_string(), json!(patterns));
            map.insert("storeVersion".to_string(), json!(version));
            map.insert("chainLength".to_string(), json!(self.chain_length()));
            map.insert("peers".to_string(), json!(self.peer_count()));
        }
        ApiResponse::ok(body)
    }

    /// `POST /api/guardian/validate {"text": string}`
    pub async fn handle_validate(&self, method: Method, body: Option<&Value>) -> ApiResponse {
        if method != Method::Post {
            return ApiResponse::method_not_allowed();
        }
        let Some(text) = body.and_then(|b| b.get("text")).and_then(Value::as_str) else {
            return ApiResponse::error(400, "body must be {\"text\": string}");
        };
        let verdict = self.validate(text).await;
        match serde_json::to_value(&verdict) {
            Ok(body) => ApiResponse::ok(body),
            Err(e) => ApiResponse::error(500, &e.to_string()),
        }
    }
}
