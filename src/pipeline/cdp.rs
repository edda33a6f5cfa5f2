//! Minimal Chrome DevTools Protocol client.
//!
//! Only what the renderer needs: send a command, wait for the response with
//! the same id, and skip every event in between. Commands are issued one at
//! a time, so there is no background reader task and no response routing
//! table; a single `&mut` connection is the whole state.
//!
//! Flattened sessions are used for page targets: the page-level commands
//! travel over the browser connection with a `sessionId` field.

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Errors raised by the protocol layer; the renderer maps them to
/// [`crate::error::Web2CsvError::RenderFailed`].
#[derive(Debug, thiserror::Error)]
pub enum CdpError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("{method} failed: {message} (code {code})")]
    Protocol {
        method: String,
        code: i64,
        message: String,
    },

    #[error("{method} timed out after {secs}s")]
    Timeout { method: String, secs: u64 },

    #[error("connection closed while waiting for {method}")]
    Closed { method: String },

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("endpoint discovery failed: {0}")]
    Discovery(String),
}

/// An open DevTools WebSocket.
pub struct CdpConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
    timeout: Duration,
}

impl CdpConnection {
    /// Connect to a browser-level DevTools endpoint (`ws://…/devtools/browser/…`).
    ///
    /// Frame and message size limits are lifted: a full-page capture arrives
    /// as one base64 text frame, tens of MiB for a tall page.
    pub async fn connect(ws_url: &str, timeout: Duration) -> Result<Self, CdpError> {
        let connecting = connect_async_with_config(ws_url, Some(ws_config()), false);
        let (ws, _response) = tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| CdpError::Timeout {
                method: "connect".into(),
                secs: timeout.as_secs(),
            })?
            .map_err(|e| CdpError::WebSocket(e.to_string()))?;
        debug!("CDP connected: {}", ws_url);
        Ok(Self {
            ws,
            next_id: 0,
            timeout,
        })
    }

    /// Send `method` and return its `result` object.
    pub async fn call(
        &mut self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, CdpError> {
        self.next_id += 1;
        let id = self.next_id;

        let mut request = json!({ "id": id, "method": method, "params": params });
        if let Some(sid) = session_id {
            request["sessionId"] = Value::String(sid.to_string());
        }

        debug!("CDP → {} (id {})", method, id);
        self.ws
            .send(Message::Text(request.to_string()))
            .await
            .map_err(|e| CdpError::WebSocket(e.to_string()))?;

        let secs = self.timeout.as_secs();
        tokio::time::timeout(self.timeout, self.read_response(id, method))
            .await
            .map_err(|_| CdpError::Timeout {
                method: method.to_string(),
                secs,
            })?
    }

    async fn read_response(&mut self, id: u64, method: &str) -> Result<Value, CdpError> {
        while let Some(frame) = self.ws.next().await {
            let frame = frame.map_err(|e| CdpError::WebSocket(e.to_string()))?;
            let text = match frame {
                Message::Text(t) => t,
                Message::Close(_) => break,
                _ => continue,
            };
            let msg: Value =
                serde_json::from_str(&text).map_err(|e| CdpError::Malformed(e.to_string()))?;
            if msg.get("id").and_then(Value::as_u64) != Some(id) {
                // Event or a stale response: not ours.
                continue;
            }
            return parse_response(method, msg);
        }
        Err(CdpError::Closed {
            method: method.to_string(),
        })
    }

    /// Close the WebSocket; errors are irrelevant at this point.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

fn ws_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_frame_size = None;
    config.max_message_size = None;
    config
}

/// Split a response into its `result` or a protocol error.
fn parse_response(method: &str, mut msg: Value) -> Result<Value, CdpError> {
    if let Some(err) = msg.get("error") {
        return Err(CdpError::Protocol {
            method: method.to_string(),
            code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        });
    }
    Ok(msg
        .get_mut("result")
        .map(Value::take)
        .unwrap_or(Value::Null))
}

/// `/json/version` response subset.
#[derive(Debug, Deserialize)]
pub struct CdpVersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
    #[serde(rename = "Browser")]
    pub browser: Option<String>,
}

/// Resolve the browser WebSocket URL of a browser listening on `port`.
pub async fn discover_endpoint(port: u16, timeout: Duration) -> Result<CdpVersionInfo, CdpError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CdpError::Discovery(e.to_string()))?;
    let mut last_error = "no response".to_string();

    for url in [
        format!("http://127.0.0.1:{}/json/version", port),
        format!("http://localhost:{}/json/version", port),
    ] {
        let response = match client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                last_error = e.to_string();
                continue;
            }
        };
        if !response.status().is_success() {
            last_error = format!("unexpected status {}", response.status());
            continue;
        }
        return response
            .json::<CdpVersionInfo>()
            .await
            .map_err(|e| CdpError::Discovery(format!("bad /json/version body: {e}")));
    }

    Err(CdpError::Discovery(format!(
        "no DevTools endpoint on port {port}: {last_error}"
    )))
}

/// Extract the DevTools URL from a Chrome stderr line.
///
/// Chrome prints `DevTools listening on ws://127.0.0.1:PORT/devtools/browser/UUID`
/// once the debugging server is up.
pub fn parse_devtools_line(line: &str) -> Option<&str> {
    const MARKER: &str = "DevTools listening on ";
    line.find(MARKER)
        .map(|i| line[i + MARKER.len()..].trim())
        .filter(|url| url.starts_with("ws://") || url.starts_with("wss://"))
}
