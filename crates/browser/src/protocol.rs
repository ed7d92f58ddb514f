//! CDP wire messages and event payloads

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outgoing CDP command.
#[derive(Debug, Serialize)]
pub struct CdpRequest {
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Incoming CDP frame: either a command response (has `id`) or an event
/// (has `method`).
#[derive(Debug, Deserialize)]
pub struct CdpFrame {
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<CdpErrorPayload>,
    pub method: Option<String>,
    pub params: Option<Value>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CdpErrorPayload {
    pub code: i64,
    pub message: String,
}

/// A page-scoped CDP event routed to the owning [`Page`](crate::Page).
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

/// Browser version info from `GET /json/version`.
///
/// Chrome returns PascalCase names on this endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserVersion {
    #[serde(rename = "Browser")]
    pub browser: String,
    #[serde(rename = "Protocol-Version")]
    pub protocol_version: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

/// Target descriptor from `GET /json/list` / `PUT /json/new`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

/// Quads come back as flat `[x0,y0,x1,y1,x2,y2,x3,y3]` arrays.
pub fn quad_center(quad: &[f64]) -> Option<(f64, f64)> {
    if quad.len() < 8 {
        return None;
    }
    let x = (quad[0] + quad[2] + quad[4] + quad[6]) / 4.0;
    let y = (quad[1] + quad[3] + quad[5] + quad[7]) / 4.0;
    Some((x, y))
}

/// Join the arguments of a `Runtime.consoleAPICalled` event into one line,
/// preferring primitive values over remote-object descriptions.
pub fn console_text(args: &[Value]) -> String {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        let text = match arg.get("value") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => arg
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("<object>")
                .to_string(),
            Some(other) => other.to_string(),
        };
        parts.push(text);
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_omits_absent_fields() {
        let req = CdpRequest {
            id: 7,
            method: "Page.enable".to_string(),
            params: None,
            session_id: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"id":7,"method":"Page.enable"}"#);
    }

    #[test]
    fn frame_distinguishes_response_from_event() {
        let response: CdpFrame =
            serde_json::from_str(r#"{"id":3,"result":{"frameId":"F"}}"#).unwrap();
        assert_eq!(response.id, Some(3));
        assert!(response.method.is_none());

        let event: CdpFrame = serde_json::from_str(
            r#"{"method":"Runtime.consoleAPICalled","params":{"type":"log"},"sessionId":"S1"}"#,
        )
        .unwrap();
        assert!(event.id.is_none());
        assert_eq!(event.method.as_deref(), Some("Runtime.consoleAPICalled"));
        assert_eq!(event.session_id.as_deref(), Some("S1"));
    }

    #[test]
    fn quad_center_averages_corners() {
        let quad = [0.0, 0.0, 100.0, 0.0, 100.0, 50.0, 0.0, 50.0];
        assert_eq!(quad_center(&quad), Some((50.0, 25.0)));
        assert_eq!(quad_center(&[1.0, 2.0]), None);
    }

    #[test]
    fn console_text_prefers_primitive_values() {
        let args = vec![
            json!({"type": "string", "value": "capacity:"}),
            json!({"type": "number", "value": 42}),
            json!({"type": "object", "description": "Object"}),
        ];
        assert_eq!(console_text(&args), "capacity: 42 Object");
    }

    #[test]
    fn version_parses_chrome_field_names() {
        let v: BrowserVersion = serde_json::from_str(
            r#"{"Browser":"Chrome/120.0","Protocol-Version":"1.3","webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/browser/x"}"#,
        )
        .unwrap();
        assert!(v.browser.starts_with("Chrome"));
        assert!(v.web_socket_debugger_url.starts_with("ws://"));
    }
}
