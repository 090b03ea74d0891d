//! WebSocket transport for the DevTools protocol.
//!
//! One writer task drains an unbounded queue into the socket, one reader task
//! routes replies to the caller waiting on them and fans events out over a
//! broadcast channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};

use crate::ExportError;

// A command that gets no reply in this window is treated as lost.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
const EVENT_CAPACITY: usize = 1024;

// Reduce type complexity for Clippy
type CallResult = Result<Value, ExportError>;
type PendingMap = HashMap<u64, oneshot::Sender<CallResult>>;
type Pending = Arc<Mutex<PendingMap>>;

#[derive(Debug, Serialize)]
struct CdpRequest<'a> {
    id: u64,
    method: &'a str,
    params: Value,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CdpErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CdpIncoming {
    Response {
        id: u64,
        result: Option<Value>,
        error: Option<CdpErrorBody>,
    },
    Event {
        method: String,
        #[serde(default)]
        params: Value,
        #[serde(rename = "sessionId")]
        session_id: Option<String>,
    },
}

/// A protocol event, tagged with the target session it came from.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
    /// `None` for browser-level events.
    pub session_id: Option<String>,
}

pub struct CdpConnection {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    events: broadcast::Sender<CdpEvent>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl CdpConnection {
    pub async fn connect(ws_url: &str) -> Result<Self, ExportError> {
        let (ws_stream, _response) = connect_async(ws_url).await?;
        debug!(%ws_url, "Connected to DevTools");
        let (mut sink, stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    warn!("DevTools send error: {}", e);
                    break;
                }
            }
        });

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let reader = tokio::spawn(read_loop(stream, pending.clone(), events.clone()));

        Ok(Self {
            outgoing: tx,
            pending,
            events,
            next_id: AtomicU64::new(1),
            reader,
            writer,
        })
    }

    /// Send a command and wait for its reply. `session_id` targets an attached
    /// page; `None` addresses the browser itself.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, ExportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::to_string(&CdpRequest {
            id,
            method,
            params,
            session_id,
        })?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        trace!(id, method, "DevTools command");

        if self.outgoing.send(Message::Text(payload)).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ExportError::Protocol(format!(
                "connection closed before {method} could be sent"
            )));
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(result)) => result.map_err(|e| match e {
                ExportError::Protocol(msg) => ExportError::Protocol(format!("{method}: {msg}")),
                other => other,
            }),
            Ok(Err(_)) => Err(ExportError::Protocol(format!(
                "connection closed while waiting for {method}"
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ExportError::Timeout(format!(
                    "{method} got no reply within {COMMAND_TIMEOUT:?}"
                )))
            }
        }
    }

    /// Receive every event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    pub fn is_open(&self) -> bool {
        !self.reader.is_finished() && !self.writer.is_finished()
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn read_loop<S>(mut stream: S, pending: Pending, events: broadcast::Sender<CdpEvent>)
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("DevTools socket error: {}", e);
                break;
            }
        };
        dispatch(&text, &pending, &events).await;
    }

    debug!("DevTools connection closed");
    let mut waiting = pending.lock().await;
    for (_, tx) in waiting.drain() {
        let _ = tx.send(Err(ExportError::Protocol(
            "browser connection closed".to_string(),
        )));
    }
}

async fn dispatch(text: &str, pending: &Pending, events: &broadcast::Sender<CdpEvent>) {
    match serde_json::from_str::<CdpIncoming>(text) {
        Ok(CdpIncoming::Response { id, result, error }) => {
            let Some(tx) = pending.lock().await.remove(&id) else {
                trace!(id, "Reply for a command nobody is waiting on");
                return;
            };
            let outcome = match error {
                Some(err) => Err(ExportError::Protocol(format!(
                    "{} (code {})",
                    err.message, err.code
                ))),
                None => Ok(result.unwrap_or(Value::Null)),
            };
            let _ = tx.send(outcome);
        }
        Ok(CdpIncoming::Event {
            method,
            params,
            session_id,
        }) => {
            trace!(%method, "DevTools event");
            // No subscribers is fine
            let _ = events.send(CdpEvent {
                method,
                params,
                session_id,
            });
        }
        Err(e) => warn!("Unrecognised DevTools message: {}", e),
    }
}
