//! CDP WebSocket client
//!
//! One WebSocket connection to the browser endpoint carries every command and
//! event, multiplexed by request id and session id. Command responses are
//! routed to oneshot channels; page-scoped events fan out to the [`Page`]
//! that owns the session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::error::{CdpError, CdpResult};
use crate::page::Page;
use crate::protocol::{BrowserVersion, CdpEvent, CdpFrame, CdpRequest, TargetDescriptor};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<CdpResult<Value>>>>>;
type EventRoutes = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<CdpEvent>>>>;

/// Command channel shared between the client and its pages.
///
/// Owns request-id allocation and response correlation so pages issue
/// commands without going back through the client.
pub(crate) struct Transport {
    ws_tx: tokio::sync::Mutex<WsSink>,
    pending: Pending,
    next_id: AtomicU64,
    action_timeout: Duration,
}

impl Transport {
    /// Send one command and await its correlated response.
    pub(crate) async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        session_id: Option<&str>,
    ) -> CdpResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = CdpRequest {
            id,
            method: method.to_string(),
            params,
            session_id: session_id.map(str::to_string),
        };

        let payload = serde_json::to_string(&request)?;
        trace!("CDP send: {}", payload);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        {
            let mut ws = self.ws_tx.lock().await;
            ws.send(Message::Text(payload)).await?;
        }

        match tokio::time::timeout(self.action_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CdpError::SessionClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(CdpError::ActionTimeout(method.to_string()))
            }
        }
    }
}

/// CDP client bound to one browser debugging endpoint.
pub struct CdpClient {
    http_endpoint: String,
    transport: Arc<Transport>,
    routes: EventRoutes,
    recv_task: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a browser debugging endpoint, e.g. `http://127.0.0.1:9222`.
    pub async fn connect(endpoint: &str) -> CdpResult<Self> {
        Self::connect_with_timeout(endpoint, Duration::from_secs(30)).await
    }

    /// Connect with an explicit per-command timeout.
    pub async fn connect_with_timeout(
        endpoint: &str,
        action_timeout: Duration,
    ) -> CdpResult<Self> {
        let http_endpoint = endpoint.trim_end_matches('/').to_string();
        let version_url = format!("{}/json/version", http_endpoint);

        let version: BrowserVersion = reqwest::get(&version_url)
            .await
            .map_err(|_| CdpError::EndpointUnavailable(http_endpoint.clone()))?
            .json()
            .await
            .map_err(|_| CdpError::EndpointUnavailable(http_endpoint.clone()))?;

        debug!("Attaching to {}", version.browser);

        let (ws_stream, _) =
            tokio_tungstenite::connect_async(&version.web_socket_debugger_url).await?;
        let (ws_sink, ws_source) = ws_stream.split();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let routes: EventRoutes = Arc::new(Mutex::new(HashMap::new()));

        let recv_task = tokio::spawn(Self::receive_loop(
            ws_source,
            pending.clone(),
            routes.clone(),
        ));

        Ok(Self {
            http_endpoint,
            transport: Arc::new(Transport {
                ws_tx: tokio::sync::Mutex::new(ws_sink),
                pending,
                next_id: AtomicU64::new(1),
                action_timeout,
            }),
            routes,
            recv_task,
        })
    }

    /// Route incoming frames: responses to pending calls, events to pages.
    async fn receive_loop(mut source: WsSource, pending: Pending, routes: EventRoutes) {
        while let Some(msg) = source.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => {
                    debug!("CDP socket closed");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!("CDP socket error: {}", e);
                    break;
                }
            };

            let frame: CdpFrame = match serde_json::from_str(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Unparseable CDP frame: {}", e);
                    continue;
                }
            };

            if let Some(id) = frame.id {
                if let Some(tx) = pending.lock().remove(&id) {
                    let result = match frame.error {
                        Some(err) => Err(CdpError::Protocol {
                            code: err.code,
                            message: err.message,
                        }),
                        None => Ok(frame.result.unwrap_or(Value::Null)),
                    };
                    let _ = tx.send(result);
                }
            } else if let Some(method) = frame.method {
                let session = frame.session_id.unwrap_or_default();
                let event = CdpEvent {
                    method,
                    params: frame.params.unwrap_or(Value::Null),
                };
                if let Some(tx) = routes.lock().get(&session) {
                    let _ = tx.send(event);
                }
            }
        }

        // Connection gone: fail any callers still waiting.
        let stranded: Vec<_> = pending.lock().drain().collect();
        for (_, tx) in stranded {
            let _ = tx.send(Err(CdpError::SessionClosed));
        }
    }

    /// Open a page in a fresh browser context.
    ///
    /// Each context has its own cookie jar, so concurrent pages never share
    /// authentication state.
    pub async fn open_page(&self, url: Option<&str>) -> CdpResult<Page> {
        let context = self
            .transport
            .call(
                "Target.createBrowserContext",
                Some(json!({ "disposeOnDetach": true })),
                None,
            )
            .await?;
        let context_id = context["browserContextId"]
            .as_str()
            .ok_or_else(|| CdpError::InvalidResponse("missing browserContextId".to_string()))?
            .to_string();

        let target = self
            .transport
            .call(
                "Target.createTarget",
                Some(json!({
                    "url": url.unwrap_or("about:blank"),
                    "browserContextId": context_id,
                })),
                None,
            )
            .await?;
        let target_id = target["targetId"]
            .as_str()
            .ok_or_else(|| CdpError::InvalidResponse("missing targetId".to_string()))?
            .to_string();
        debug!("Created page target {} in context {}", target_id, context_id);

        let mut page = self.attach(&target_id).await?;
        page.set_browser_context(context_id);
        Ok(page)
    }

    /// Attach to an existing page target.
    pub async fn attach(&self, target_id: &str) -> CdpResult<Page> {
        let result = self
            .transport
            .call(
                "Target.attachToTarget",
                Some(json!({ "targetId": target_id, "flatten": true })),
                None,
            )
            .await?;

        let session_id = result["sessionId"]
            .as_str()
            .ok_or_else(|| CdpError::InvalidResponse("missing sessionId".to_string()))?
            .to_string();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.routes.lock().insert(session_id.clone(), event_tx);

        let page = Page::attach(
            target_id.to_string(),
            session_id,
            self.transport.clone(),
            event_rx,
        )
        .await?;

        Ok(page)
    }

    /// Close a page target, its event route, and its browser context.
    pub async fn close_page(&self, page: Page) -> CdpResult<()> {
        let target_id = page.target_id().to_string();
        let session_id = page.session_id().to_string();
        let context_id = page.browser_context().map(str::to_string);
        drop(page);

        self.routes.lock().remove(&session_id);
        self.transport
            .call(
                "Target.closeTarget",
                Some(json!({ "targetId": target_id })),
                None,
            )
            .await?;

        if let Some(context_id) = context_id {
            self.transport
                .call(
                    "Target.disposeBrowserContext",
                    Some(json!({ "browserContextId": context_id })),
                    None,
                )
                .await?;
        }
        Ok(())
    }

    /// List open page targets.
    pub async fn list_pages(&self) -> CdpResult<Vec<TargetDescriptor>> {
        let url = format!("{}/json/list", self.http_endpoint);
        let targets: Vec<TargetDescriptor> = reqwest::get(&url).await?.json().await?;
        Ok(targets
            .into_iter()
            .filter(|t| t.target_type == "page")
            .collect())
    }

    /// Browser version banner, used by the reachability check.
    pub async fn version(endpoint: &str) -> CdpResult<BrowserVersion> {
        let url = format!("{}/json/version", endpoint.trim_end_matches('/'));
        let version: BrowserVersion = reqwest::get(&url)
            .await
            .map_err(|_| CdpError::EndpointUnavailable(endpoint.to_string()))?
            .json()
            .await
            .map_err(|_| CdpError::EndpointUnavailable(endpoint.to_string()))?;
        Ok(version)
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_monotonic() {
        let next = AtomicU64::new(1);
        assert_eq!(next.fetch_add(1, Ordering::Relaxed), 1);
        assert_eq!(next.fetch_add(1, Ordering::Relaxed), 2);
    }
}
