//! Page driver for a single browser tab
//!
//! Wraps one CDP target session: navigation, DOM queries, trusted input,
//! screenshots, and cookie access. Every page also pumps its CDP events into
//! a typed [`PageEvent`] stream that evidence collection subscribes to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::client::Transport;
use crate::error::{CdpError, CdpResult};
use crate::protocol::{console_text, quad_center, CdpEvent};

/// Typed page-scoped event, as consumed by evidence collection.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    /// `Runtime.consoleAPICalled`
    Console { level: String, text: String },
    /// `Runtime.exceptionThrown`
    Exception {
        text: String,
        url: Option<String>,
        line: Option<u64>,
    },
    /// `Network.responseReceived` with status >= 400
    FailedResponse {
        status: u16,
        method: String,
        url: String,
    },
    /// `Network.loadingFailed`
    RequestFailed {
        method: String,
        url: String,
        error: String,
    },
}

/// Cookie shape shared by `Network.getCookies` and `Network.setCookies`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpCookie {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<PageEvent>>>>;

/// A driver attached to one page/tab.
pub struct Page {
    target_id: String,
    session_id: String,
    /// Set when the page owns a dedicated (isolated-cookie) context.
    browser_context_id: Option<String>,
    transport: Arc<Transport>,
    subscribers: Subscribers,
    load_timeout: Duration,
    pump_task: tokio::task::JoinHandle<()>,
}

impl Page {
    pub(crate) async fn attach(
        target_id: String,
        session_id: String,
        transport: Arc<Transport>,
        event_rx: mpsc::UnboundedReceiver<CdpEvent>,
    ) -> CdpResult<Self> {
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));
        let pump_task = tokio::spawn(pump_events(event_rx, subscribers.clone()));

        let page = Self {
            target_id,
            session_id,
            browser_context_id: None,
            transport,
            subscribers,
            load_timeout: Duration::from_secs(30),
            pump_task,
        };

        // Domains the driver and the event pump rely on.
        page.call("Page.enable", None).await?;
        page.call("DOM.enable", None).await?;
        page.call("Runtime.enable", None).await?;
        page.call("Network.enable", None).await?;

        debug!("Attached page session {}", page.session_id);
        Ok(page)
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn browser_context(&self) -> Option<&str> {
        self.browser_context_id.as_deref()
    }

    pub(crate) fn set_browser_context(&mut self, context_id: String) {
        self.browser_context_id = Some(context_id);
    }

    /// Subscribe to this page's event stream.
    ///
    /// Events observed after this call are delivered in arrival order; the
    /// subscription ends when the receiver is dropped.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PageEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Send a command scoped to this page session.
    pub async fn call(&self, method: &str, params: Option<Value>) -> CdpResult<Value> {
        self.transport
            .call(method, params, Some(&self.session_id))
            .await
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    /// Navigate and wait for the document to load.
    pub async fn navigate(&self, url: &str) -> CdpResult<()> {
        let result = self
            .call("Page.navigate", Some(json!({ "url": url })))
            .await?;

        if let Some(error) = result.get("errorText").and_then(Value::as_str) {
            if !error.is_empty() {
                return Err(CdpError::NavigationFailed(format!("{}: {}", url, error)));
            }
        }

        self.wait_for_load().await?;
        trace!("Navigated to {}", url);
        Ok(())
    }

    /// Reload and wait for the document to load.
    pub async fn reload(&self) -> CdpResult<()> {
        self.call("Page.reload", None).await?;
        self.wait_for_load().await
    }

    /// Poll `document.readyState` until the page settles.
    pub async fn wait_for_load(&self) -> CdpResult<()> {
        let start = std::time::Instant::now();
        loop {
            // The execution context is briefly gone while documents swap.
            let state = match self.evaluate("document.readyState").await {
                Ok(state) => state,
                Err(CdpError::JavaScript(_)) => Value::Null,
                Err(e) => return Err(e),
            };
            if matches!(state.as_str(), Some("complete") | Some("interactive")) {
                return Ok(());
            }
            if start.elapsed() > self.load_timeout {
                return Err(CdpError::ActionTimeout("page load".to_string()));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Current `window.location.href`.
    pub async fn current_url(&self) -> CdpResult<String> {
        let value = self.evaluate("window.location.href").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    // ------------------------------------------------------------------
    // Scripting and DOM queries
    // ------------------------------------------------------------------

    /// Evaluate a JavaScript expression, returning its JSON value.
    pub async fn evaluate(&self, expression: &str) -> CdpResult<Value> {
        let result = self
            .call(
                "Runtime.evaluate",
                Some(json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                })),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            let text = exception["exception"]["description"]
                .as_str()
                .or_else(|| exception["text"].as_str())
                .unwrap_or("unknown exception");
            return Err(CdpError::JavaScript(text.to_string()));
        }

        Ok(result["result"]["value"].clone())
    }

    /// Resolve a selector to a DOM node id, if present.
    pub async fn query_selector(&self, selector: &str) -> CdpResult<Option<i64>> {
        let doc = self
            .call("DOM.getDocument", Some(json!({ "depth": 0 })))
            .await?;
        let root_id = doc["root"]["nodeId"]
            .as_i64()
            .ok_or_else(|| CdpError::InvalidResponse("missing document root".to_string()))?;

        let result = self
            .call(
                "DOM.querySelector",
                Some(json!({ "nodeId": root_id, "selector": selector })),
            )
            .await?;

        match result["nodeId"].as_i64() {
            Some(0) | None => Ok(None),
            Some(id) => Ok(Some(id)),
        }
    }

    /// Text content of the first matching element.
    pub async fn element_text(&self, selector: &str) -> CdpResult<Option<String>> {
        let expr = format!(
            "(() => {{ const el = document.querySelector({}); return el ? el.textContent.trim() : null; }})()",
            js_string(selector)
        );
        let value = self.evaluate(&expr).await?;
        Ok(value.as_str().map(str::to_string))
    }

    /// Number of elements matching the selector.
    pub async fn element_count(&self, selector: &str) -> CdpResult<u64> {
        let expr = format!(
            "document.querySelectorAll({}).length",
            js_string(selector)
        );
        let value = self.evaluate(&expr).await?;
        Ok(value.as_u64().unwrap_or(0))
    }

    /// Whether the first matching element is rendered with nonzero extent.
    pub async fn is_visible(&self, selector: &str) -> CdpResult<bool> {
        let expr = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; \
             const r = el.getBoundingClientRect(); \
             return r.width > 0 && r.height > 0 && getComputedStyle(el).visibility !== 'hidden'; }})()",
            js_string(selector)
        );
        let value = self.evaluate(&expr).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    /// Click the center of the first matching element with trusted input.
    pub async fn click_selector(&self, selector: &str) -> CdpResult<()> {
        let node_id = self
            .query_selector(selector)
            .await?
            .ok_or_else(|| CdpError::ElementNotFound(selector.to_string()))?;

        let result = self
            .call("DOM.getBoxModel", Some(json!({ "nodeId": node_id })))
            .await
            .map_err(|e| match e {
                CdpError::Protocol { .. } => {
                    CdpError::ElementNotFound(format!("{} (no layout)", selector))
                }
                other => other,
            })?;

        let quad: Vec<f64> = result["model"]["content"]
            .as_array()
            .map(|a| a.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();
        let (x, y) = quad_center(&quad)
            .ok_or_else(|| CdpError::ElementNotFound(format!("{} (not visible)", selector)))?;

        for kind in ["mousePressed", "mouseReleased"] {
            self.call(
                "Input.dispatchMouseEvent",
                Some(json!({
                    "type": kind,
                    "x": x,
                    "y": y,
                    "button": "left",
                    "clickCount": 1,
                })),
            )
            .await?;
        }

        trace!("Clicked {} at ({:.0}, {:.0})", selector, x, y);
        Ok(())
    }

    /// Replace the value of the first matching input with trusted keystrokes.
    pub async fn fill(&self, selector: &str, value: &str) -> CdpResult<()> {
        let node_id = self
            .query_selector(selector)
            .await?
            .ok_or_else(|| CdpError::ElementNotFound(selector.to_string()))?;

        self.call("DOM.focus", Some(json!({ "nodeId": node_id })))
            .await?;
        // Clear any existing value before typing
        self.key_event("keyDown", "a", Some(2)).await?;
        self.key_event("keyUp", "a", Some(2)).await?;
        self.call("Input.insertText", Some(json!({ "text": value })))
            .await?;
        Ok(())
    }

    /// Press and release a single key.
    pub async fn press_key(&self, key: &str) -> CdpResult<()> {
        self.key_event("keyDown", key, None).await?;
        self.key_event("keyUp", key, None).await
    }

    async fn key_event(&self, kind: &str, key: &str, modifiers: Option<i32>) -> CdpResult<()> {
        let mut params = json!({ "type": kind, "key": key });
        if let Some(m) = modifiers {
            params["modifiers"] = json!(m);
        }
        self.call("Input.dispatchKeyEvent", Some(params)).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Capture and cookies
    // ------------------------------------------------------------------

    /// Capture a PNG screenshot, decoded from the CDP base64 payload.
    pub async fn screenshot(&self, full_page: bool) -> CdpResult<Vec<u8>> {
        let result = self
            .call(
                "Page.captureScreenshot",
                Some(json!({
                    "format": "png",
                    "captureBeyondViewport": full_page,
                })),
            )
            .await?;

        let data = result["data"]
            .as_str()
            .ok_or_else(|| CdpError::InvalidResponse("missing screenshot data".to_string()))?;

        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| CdpError::InvalidResponse(format!("screenshot payload: {}", e)))
    }

    /// Cookies visible to the current page.
    pub async fn cookies(&self) -> CdpResult<Vec<CdpCookie>> {
        let result = self.call("Network.getCookies", None).await?;
        let cookies: Vec<CdpCookie> = serde_json::from_value(result["cookies"].clone())?;
        Ok(cookies)
    }

    /// Install cookies into this page's browser context.
    pub async fn set_cookies(&self, cookies: &[CdpCookie]) -> CdpResult<()> {
        self.call(
            "Network.setCookies",
            Some(json!({ "cookies": cookies })),
        )
        .await?;
        Ok(())
    }

    /// Remove all cookies visible to this page.
    pub async fn clear_cookies(&self) -> CdpResult<()> {
        self.call("Network.clearBrowserCookies", None).await?;
        Ok(())
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        self.pump_task.abort();
    }
}

/// Drain raw CDP events into typed page events for all subscribers.
async fn pump_events(mut rx: mpsc::UnboundedReceiver<CdpEvent>, subscribers: Subscribers) {
    // requestId -> (method, url), populated by requestWillBeSent
    let mut inflight: HashMap<String, (String, String)> = HashMap::new();

    while let Some(event) = rx.recv().await {
        let Some(translated) = translate_event(&event, &mut inflight) else {
            continue;
        };
        subscribers
            .lock()
            .retain(|tx| tx.send(translated.clone()).is_ok());
    }
}

/// Map one raw CDP event to a `PageEvent`, tracking in-flight requests so
/// failed responses carry their HTTP method.
fn translate_event(
    event: &CdpEvent,
    inflight: &mut HashMap<String, (String, String)>,
) -> Option<PageEvent> {
    let p = &event.params;
    match event.method.as_str() {
        "Runtime.consoleAPICalled" => {
            let level = p["type"].as_str().unwrap_or("log").to_string();
            let args: Vec<Value> = p["args"].as_array().cloned().unwrap_or_default();
            Some(PageEvent::Console {
                level,
                text: console_text(&args),
            })
        }
        "Runtime.exceptionThrown" => {
            let details = &p["exceptionDetails"];
            let text = details["exception"]["description"]
                .as_str()
                .or_else(|| details["text"].as_str())
                .unwrap_or("uncaught exception")
                .to_string();
            Some(PageEvent::Exception {
                text,
                url: details["url"].as_str().map(str::to_string),
                line: details["lineNumber"].as_u64(),
            })
        }
        "Network.requestWillBeSent" => {
            if let (Some(id), Some(method), Some(url)) = (
                p["requestId"].as_str(),
                p["request"]["method"].as_str(),
                p["request"]["url"].as_str(),
            ) {
                inflight.insert(id.to_string(), (method.to_string(), url.to_string()));
            }
            None
        }
        "Network.responseReceived" => {
            let id = p["requestId"].as_str()?;
            let (method, fallback_url) = inflight
                .remove(id)
                .unwrap_or_else(|| ("GET".to_string(), String::new()));
            let status = p["response"]["status"].as_u64().unwrap_or(0) as u16;
            if status < 400 {
                return None;
            }
            let url = p["response"]["url"]
                .as_str()
                .map(str::to_string)
                .unwrap_or(fallback_url);
            Some(PageEvent::FailedResponse {
                status,
                method,
                url,
            })
        }
        "Network.loadingFailed" => {
            let id = p["requestId"].as_str()?;
            let (method, url) = inflight.remove(id)?;
            Some(PageEvent::RequestFailed {
                method,
                url,
                error: p["errorText"].as_str().unwrap_or("unknown").to_string(),
            })
        }
        _ => None,
    }
}

/// Encode a string as a JavaScript string literal.
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cdp(method: &str, params: Value) -> CdpEvent {
        CdpEvent {
            method: method.to_string(),
            params,
        }
    }

    #[test]
    fn js_string_escapes_quotes() {
        assert_eq!(js_string("a'b\"c"), r#""a'b\"c""#);
    }

    #[test]
    fn console_event_translates_level_and_text() {
        let mut inflight = HashMap::new();
        let event = cdp(
            "Runtime.consoleAPICalled",
            json!({
                "type": "error",
                "args": [{"type": "string", "value": "load failed"}],
            }),
        );
        assert_eq!(
            translate_event(&event, &mut inflight),
            Some(PageEvent::Console {
                level: "error".to_string(),
                text: "load failed".to_string(),
            })
        );
    }

    #[test]
    fn successful_responses_are_not_reported() {
        let mut inflight = HashMap::new();
        let sent = cdp(
            "Network.requestWillBeSent",
            json!({
                "requestId": "r1",
                "request": {"method": "GET", "url": "http://t/api/ok"},
            }),
        );
        assert_eq!(translate_event(&sent, &mut inflight), None);

        let received = cdp(
            "Network.responseReceived",
            json!({
                "requestId": "r1",
                "response": {"status": 200, "url": "http://t/api/ok"},
            }),
        );
        assert_eq!(translate_event(&received, &mut inflight), None);
        assert!(inflight.is_empty());
    }

    #[test]
    fn failed_response_carries_method_from_request() {
        let mut inflight = HashMap::new();
        let sent = cdp(
            "Network.requestWillBeSent",
            json!({
                "requestId": "r2",
                "request": {"method": "POST", "url": "http://t/api/rsvp"},
            }),
        );
        translate_event(&sent, &mut inflight);

        let received = cdp(
            "Network.responseReceived",
            json!({
                "requestId": "r2",
                "response": {"status": 500, "url": "http://t/api/rsvp"},
            }),
        );
        assert_eq!(
            translate_event(&received, &mut inflight),
            Some(PageEvent::FailedResponse {
                status: 500,
                method: "POST".to_string(),
                url: "http://t/api/rsvp".to_string(),
            })
        );
    }

    #[test]
    fn loading_failure_maps_to_request_failed() {
        let mut inflight = HashMap::new();
        translate_event(
            &cdp(
                "Network.requestWillBeSent",
                json!({
                    "requestId": "r3",
                    "request": {"method": "GET", "url": "http://t/img.png"},
                }),
            ),
            &mut inflight,
        );

        let failed = cdp(
            "Network.loadingFailed",
            json!({ "requestId": "r3", "errorText": "net::ERR_CONNECTION_REFUSED" }),
        );
        assert_eq!(
            translate_event(&failed, &mut inflight),
            Some(PageEvent::RequestFailed {
                method: "GET".to_string(),
                url: "http://t/img.png".to_string(),
                error: "net::ERR_CONNECTION_REFUSED".to_string(),
            })
        );
    }

    #[test]
    fn exception_prefers_full_description() {
        let mut inflight = HashMap::new();
        let event = cdp(
            "Runtime.exceptionThrown",
            json!({
                "exceptionDetails": {
                    "text": "Uncaught",
                    "lineNumber": 12,
                    "url": "http://t/app.js",
                    "exception": {"description": "TypeError: x is undefined"},
                }
            }),
        );
        assert_eq!(
            translate_event(&event, &mut inflight),
            Some(PageEvent::Exception {
                text: "TypeError: x is undefined".to_string(),
                url: Some("http://t/app.js".to_string()),
                line: Some(12),
            })
        );
    }

    #[test]
    fn cookie_round_trips_camel_case() {
        let raw = json!({
            "name": "session",
            "value": "abc",
            "domain": "localhost",
            "path": "/",
            "httpOnly": true,
            "secure": false,
        });
        let cookie: CdpCookie = serde_json::from_value(raw).unwrap();
        assert_eq!(cookie.http_only, Some(true));

        let back = serde_json::to_value(&cookie).unwrap();
        assert_eq!(back["httpOnly"], json!(true));
        assert!(back.get("sameSite").is_none());
    }
}
