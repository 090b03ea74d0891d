//! In-process DevTools endpoint that answers commands with canned replies and
//! pushes whatever events a test hands it.

use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Debug, Clone)]
pub struct Command {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

pub struct FakeDevTools {
    url: String,
    log: Arc<Mutex<Vec<Command>>>,
    events: mpsc::UnboundedSender<Value>,
    task: JoinHandle<()>,
}

impl FakeDevTools {
    /// `after_click` is sent right after a left-button release is acknowledged.
    pub async fn start(after_click: Vec<Value>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (events, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(serve(listener, log.clone(), rx, after_click));
        Self {
            url: format!("ws://{addr}/devtools/browser/fake"),
            log,
            events,
            task,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn emit(&self, method: &str, params: Value, session_id: Option<&str>) {
        let _ = self.events.send(event(method, params, session_id));
    }

    pub fn calls(&self, method: &str) -> Vec<Command> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }
}

impl Drop for FakeDevTools {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn event(method: &str, params: Value, session_id: Option<&str>) -> Value {
    let mut event = json!({ "method": method, "params": params });
    if let Some(id) = session_id {
        event["sessionId"] = json!(id);
    }
    event
}

async fn serve(
    listener: TcpListener,
    log: Arc<Mutex<Vec<Command>>>,
    mut events: mpsc::UnboundedReceiver<Value>,
    after_click: Vec<Value>,
) {
    let Ok((stream, _)) = listener.accept().await else {
        return;
    };
    let Ok(socket) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = socket.split();
    let mut contexts = 0u32;

    loop {
        tokio::select! {
            frame = source.next() => {
                let Some(Ok(Message::Text(text))) = frame else {
                    return;
                };
                let request: Value = serde_json::from_str(&text).unwrap();
                let method = request["method"].as_str().unwrap_or_default().to_string();
                let params = request["params"].clone();
                log.lock().unwrap().push(Command {
                    method: method.clone(),
                    params: params.clone(),
                    session_id: request["sessionId"].as_str().map(str::to_string),
                });

                let reply = json!({ "id": request["id"], "result": reply_for(&method, &params, &mut contexts) });
                if sink.send(Message::Text(reply.to_string())).await.is_err() {
                    return;
                }
                if method == "Input.dispatchMouseEvent" && params["type"] == "mouseReleased" {
                    for event in &after_click {
                        if sink.send(Message::Text(event.to_string())).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Some(event) = events.recv() => {
                if sink.send(Message::Text(event.to_string())).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn reply_for(method: &str, params: &Value, contexts: &mut u32) -> Value {
    match method {
        "Target.createBrowserContext" => {
            *contexts += 1;
            json!({ "browserContextId": format!("CTX{contexts}") })
        }
        "Target.createTarget" => json!({ "targetId": format!("T{contexts}") }),
        "Target.attachToTarget" => json!({ "sessionId": format!("S{contexts}") }),
        "Page.navigate" => json!({ "frameId": format!("T{contexts}"), "loaderId": "L1" }),
        "Runtime.evaluate" if params["returnByValue"] == true => {
            json!({ "result": { "type": "string", "value": "about:blank" } })
        }
        "Runtime.evaluate" => json!({ "result": { "type": "object", "objectId": "node-1" } }),
        "Runtime.callFunctionOn" => {
            json!({ "result": { "type": "object", "value": { "x": 40.0, "y": 12.5 } } })
        }
        _ => json!({}),
    }
}
