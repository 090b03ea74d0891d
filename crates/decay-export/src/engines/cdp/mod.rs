//! Browser engine speaking the Chrome DevTools Protocol.
//!
//! Every session starts its own browser with a throwaway profile, then opens a
//! separate browser context inside it, so nothing carries over between dates.
//! Downloads are routed into a per-session staging directory and only surface
//! once the browser reports them complete.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::config::BrowserConfig;
use crate::engines::{BrowserEngine, BrowserSession};
use crate::page::{Download, WaitUntil};
use crate::{ExportError, Selector};

mod connection;
mod dom;
mod launcher;
#[cfg(test)]
mod fake_devtools;

pub use connection::{CdpConnection, CdpEvent};
pub use launcher::BrowserProcess;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Quiet period that counts as network idle.
const NETWORK_IDLE: Duration = Duration::from_millis(500);
/// How long an action gets to start a navigation before we assume it did not.
const NAVIGATION_GRACE: Duration = Duration::from_secs(5);

/// Launches a fresh Chromium-family browser for every session.
#[derive(Debug, Clone, Default)]
pub struct CdpEngine {
    config: BrowserConfig,
}

impl CdpEngine {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl BrowserEngine for CdpEngine {
    async fn new_session(&self) -> Result<Box<dyn BrowserSession>, ExportError> {
        let process = launcher::launch(&self.config).await?;
        let connected = CdpConnection::connect(process.websocket_url()).await;
        let connection = match connected {
            Ok(c) => c,
            Err(e) => {
                process.shutdown().await;
                return Err(ExportError::BrowserLaunch(format!(
                    "cannot attach to DevTools: {e}"
                )));
            }
        };
        let session = CdpSession::open(Arc::new(connection), Some(process)).await?;
        Ok(Box::new(session))
    }
}

/// One page in its own browser context.
pub struct CdpSession {
    connection: Arc<CdpConnection>,
    process: Mutex<Option<BrowserProcess>>,
    browser_context_id: String,
    /// Also the id of the page's main frame.
    target_id: String,
    session_id: String,
    events: Mutex<broadcast::Receiver<CdpEvent>>,
    staging: TempDir,
    closed: AtomicBool,
}

impl CdpSession {
    /// Create the context and page on an established connection. `process` is
    /// the browser behind it, shut down on close. Failures here are treated
    /// like a failed launch.
    async fn open(
        connection: Arc<CdpConnection>,
        process: Option<BrowserProcess>,
    ) -> Result<Self, ExportError> {
        let events = connection.subscribe();
        let setup = async {
            let staging = tempfile::Builder::new()
                .prefix("decay-export-downloads-")
                .tempdir()?;

            let context = connection
                .call(
                    "Target.createBrowserContext",
                    json!({ "disposeOnDetach": true }),
                    None,
                )
                .await?;
            let browser_context_id = string_field(&context, "browserContextId")?;

            connection
                .call(
                    "Browser.setDownloadBehavior",
                    json!({
                        "behavior": "allowAndName",
                        "browserContextId": browser_context_id,
                        "downloadPath": staging.path().to_string_lossy(),
                        "eventsEnabled": true,
                    }),
                    None,
                )
                .await?;

            let target = connection
                .call(
                    "Target.createTarget",
                    json!({ "url": "about:blank", "browserContextId": browser_context_id }),
                    None,
                )
                .await?;
            let target_id = string_field(&target, "targetId")?;

            let attached = connection
                .call(
                    "Target.attachToTarget",
                    json!({ "targetId": target_id, "flatten": true }),
                    None,
                )
                .await?;
            let session_id = string_field(&attached, "sessionId")?;

            for domain in ["Page.enable", "Runtime.enable", "Network.enable"] {
                connection
                    .call(domain, json!({}), Some(session_id.as_str()))
                    .await?;
            }
            Ok::<_, ExportError>((staging, browser_context_id, target_id, session_id))
        };

        match setup.await {
            Ok((staging, browser_context_id, target_id, session_id)) => {
                debug!(%browser_context_id, %target_id, "Browser context ready");
                Ok(Self {
                    connection,
                    process: Mutex::new(process),
                    browser_context_id,
                    target_id,
                    session_id,
                    events: Mutex::new(events),
                    staging,
                    closed: AtomicBool::new(false),
                })
            }
            Err(e) => {
                if let Some(process) = process {
                    process.shutdown().await;
                }
                Err(ExportError::BrowserLaunch(format!(
                    "cannot open browser context: {e}"
                )))
            }
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ExportError> {
        self.connection
            .call(method, params, Some(self.session_id.as_str()))
            .await
    }

    /// Poll until `selector` resolves to a visible element; returns its remote object id.
    async fn find(&self, selector: &Selector, timeout: Duration) -> Result<String, ExportError> {
        let expression = dom::find_expression(selector)?;
        let deadline = Instant::now() + timeout;

        loop {
            match self
                .call(
                    "Runtime.evaluate",
                    json!({ "expression": expression, "returnByValue": false }),
                )
                .await
            {
                Ok(reply) => {
                    if let Some(details) = reply.get("exceptionDetails") {
                        return Err(ExportError::InvalidSelector(format!(
                            "{selector}: {}",
                            exception_text(details)
                        )));
                    }
                    if let Some(object_id) = reply["result"]["objectId"].as_str() {
                        return Ok(object_id.to_string());
                    }
                }
                // The page may be mid-navigation; the context comes back on its own.
                Err(ExportError::Protocol(msg)) => debug!("Element lookup retry: {}", msg),
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                return Err(ExportError::ElementNotFound(selector.to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn call_on(
        &self,
        object_id: &str,
        function: &str,
        args: Vec<Value>,
    ) -> Result<Value, ExportError> {
        let arguments: Vec<Value> = args.into_iter().map(|v| json!({ "value": v })).collect();
        let reply = self
            .call(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": object_id,
                    "functionDeclaration": function,
                    "arguments": arguments,
                    "returnByValue": true,
                }),
            )
            .await?;
        if let Some(details) = reply.get("exceptionDetails") {
            return Err(ExportError::Protocol(exception_text(details)));
        }
        Ok(reply["result"]["value"].clone())
    }

    async fn focus(&self, selector: &Selector, timeout: Duration) -> Result<(), ExportError> {
        let object_id = self.find(selector, timeout).await?;
        self.call_on(&object_id, dom::FOCUS_FN, vec![]).await?;
        Ok(())
    }

    /// Drop events left over from earlier actions.
    async fn drain_events(&self) {
        let mut events = self.events.lock().await;
        while events.try_recv().is_ok() {}
    }

    /// Consume page events until the requested load state is reached.
    ///
    /// Network idle is measured from the moment the page has loaded and the
    /// last request finished; unrelated events do not restart the quiet period.
    /// With `require_start` the wait gives up quietly if no main-frame
    /// navigation begins within [`NAVIGATION_GRACE`].
    async fn wait_for_state(
        &self,
        wait: WaitUntil,
        timeout: Duration,
        require_start: bool,
    ) -> Result<(), ExportError> {
        let mut events = self.events.lock().await;
        let deadline = Instant::now() + timeout;
        let grace_deadline = Instant::now() + NAVIGATION_GRACE;
        let mut started = !require_start;
        let mut loaded = false;
        let mut idle_since: Option<Instant> = None;
        let mut inflight: HashSet<String> = HashSet::new();

        loop {
            let now = Instant::now();
            if loaded && wait == WaitUntil::Load {
                return Ok(());
            }
            if idle_since.is_some_and(|since| now >= since + NETWORK_IDLE) {
                return Ok(());
            }
            if now >= deadline {
                return Err(ExportError::Timeout(format!(
                    "page did not reach {wait:?} within {timeout:?} ({} requests in flight)",
                    inflight.len()
                )));
            }

            let until = match idle_since {
                Some(since) => since + NETWORK_IDLE,
                None if !started => grace_deadline,
                None => deadline,
            }
            .min(deadline);

            let window = until.saturating_duration_since(now);
            let event = match tokio::time::timeout(window, events.recv()).await {
                Err(_) if idle_since.is_none() && !started => {
                    debug!("No navigation started, nothing to wait for");
                    return Ok(());
                }
                Err(_) => continue,
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!(skipped, "Missed page events while waiting for load");
                    continue;
                }
                Ok(Err(RecvError::Closed)) => {
                    return Err(ExportError::Protocol("browser connection closed".to_string()))
                }
                Ok(Ok(event)) => event,
            };

            if event.session_id.as_deref() != Some(self.session_id.as_str()) {
                continue;
            }
            match event.method.as_str() {
                "Page.frameStartedLoading" | "Page.frameStartedNavigating"
                    if event.params["frameId"] == self.target_id.as_str() =>
                {
                    started = true;
                    loaded = false;
                    idle_since = None;
                }
                "Page.loadEventFired" => {
                    started = true;
                    loaded = true;
                }
                "Network.requestWillBeSent" => {
                    if let Some(id) = event.params["requestId"].as_str() {
                        inflight.insert(id.to_string());
                        idle_since = None;
                    }
                }
                "Network.loadingFinished" | "Network.loadingFailed" => {
                    if let Some(id) = event.params["requestId"].as_str() {
                        inflight.remove(id);
                    }
                }
                _ => {}
            }
            if loaded && inflight.is_empty() && idle_since.is_none() {
                idle_since = Some(Instant::now());
            }
        }
    }
}

#[async_trait::async_trait]
impl BrowserSession for CdpSession {
    #[instrument(level = "debug", skip(self, timeout))]
    async fn goto(
        &self,
        url: &str,
        wait: WaitUntil,
        timeout: Duration,
    ) -> Result<(), ExportError> {
        self.drain_events().await;
        let reply = self.call("Page.navigate", json!({ "url": url })).await?;
        if let Some(error_text) = reply["errorText"].as_str().filter(|t| !t.is_empty()) {
            return Err(ExportError::Navigation(format!("{url}: {error_text}")));
        }
        self.wait_for_state(wait, timeout, false).await
    }

    async fn wait_for_load(&self, wait: WaitUntil, timeout: Duration) -> Result<(), ExportError> {
        self.wait_for_state(wait, timeout, true).await
    }

    async fn current_url(&self) -> Result<String, ExportError> {
        let reply = self
            .call(
                "Runtime.evaluate",
                json!({ "expression": "window.location.href", "returnByValue": true }),
            )
            .await?;
        reply["result"]["value"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ExportError::Protocol("location.href was not a string".to_string()))
    }

    async fn click(&self, selector: &Selector, timeout: Duration) -> Result<(), ExportError> {
        let object_id = self.find(selector, timeout).await?;
        let point = self.call_on(&object_id, dom::CLICK_POINT_FN, vec![]).await?;
        let (x, y) = match (point["x"].as_f64(), point["y"].as_f64()) {
            (Some(x), Some(y)) => (x, y),
            _ => {
                return Err(ExportError::Protocol(format!(
                    "no click point for {selector}: {point}"
                )))
            }
        };

        self.call(
            "Input.dispatchMouseEvent",
            json!({ "type": "mouseMoved", "x": x, "y": y }),
        )
        .await?;
        for kind in ["mousePressed", "mouseReleased"] {
            self.call(
                "Input.dispatchMouseEvent",
                json!({ "type": kind, "x": x, "y": y, "button": "left", "clickCount": 1 }),
            )
            .await?;
        }
        Ok(())
    }

    async fn fill(
        &self,
        selector: &Selector,
        value: &str,
        timeout: Duration,
    ) -> Result<(), ExportError> {
        let object_id = self.find(selector, timeout).await?;
        self.call_on(&object_id, dom::FILL_FN, vec![json!(value)])
            .await?;
        Ok(())
    }

    async fn type_text(
        &self,
        selector: &Selector,
        text: &str,
        delay: Duration,
        timeout: Duration,
    ) -> Result<(), ExportError> {
        self.focus(selector, timeout).await?;
        for ch in text.chars() {
            for key_event in dom::key_events(ch) {
                self.call("Input.dispatchKeyEvent", key_event).await?;
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(())
    }

    async fn expect_download(
        &self,
        trigger: &Selector,
        timeout: Duration,
    ) -> Result<Download, ExportError> {
        // Subscribe before clicking so the first download event cannot be missed.
        let mut events = self.connection.subscribe();
        self.click(trigger, timeout).await?;

        let deadline = Instant::now() + timeout;
        let mut started: Option<(String, String)> = None;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = match tokio::time::timeout(remaining, events.recv()).await {
                Err(_) => {
                    let what = if started.is_some() {
                        "finish"
                    } else {
                        "start"
                    };
                    return Err(ExportError::Timeout(format!(
                        "download did not {what} within {timeout:?}"
                    )));
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!(skipped, "Missed events while waiting for download");
                    continue;
                }
                Ok(Err(RecvError::Closed)) => {
                    return Err(ExportError::Protocol("browser connection closed".to_string()))
                }
                Ok(Ok(event)) => event,
            };

            match event.method.as_str() {
                "Browser.downloadWillBegin" if started.is_none() => {
                    let guid = event.params["guid"].as_str().unwrap_or_default().to_string();
                    let name = event.params["suggestedFilename"]
                        .as_str()
                        .unwrap_or("download")
                        .to_string();
                    info!(file = %name, "Download started");
                    started = Some((guid, name));
                }
                "Browser.downloadProgress" => {
                    let Some((guid, name)) = &started else {
                        continue;
                    };
                    if event.params["guid"] != guid.as_str() {
                        continue;
                    }
                    match event.params["state"].as_str() {
                        Some("completed") => {
                            return Ok(Download::new(self.staging.path().join(guid), name.clone()))
                        }
                        Some("canceled") => {
                            return Err(ExportError::Download(format!("{name} was canceled")))
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
    }

    async fn close(&self) -> Result<(), ExportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut result = Ok(());
        if self.connection.is_open() {
            if let Err(e) = self
                .connection
                .call(
                    "Target.disposeBrowserContext",
                    json!({ "browserContextId": self.browser_context_id }),
                    None,
                )
                .await
            {
                result = Err(e);
            }
            if let Err(e) = self.connection.call("Browser.close", json!({}), None).await {
                // The socket usually drops before the reply arrives
                debug!("Browser.close: {}", e);
            }
        }

        if let Some(process) = self.process.lock().await.take() {
            process.shutdown().await;
        }
        result
    }
}

fn string_field(value: &Value, field: &str) -> Result<String, ExportError> {
    value[field]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ExportError::Protocol(format!("reply is missing \"{field}\": {value}")))
}

fn exception_text(details: &Value) -> String {
    details["exception"]["description"]
        .as_str()
        .or_else(|| details["text"].as_str())
        .unwrap_or("script threw")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::fake_devtools::{event, FakeDevTools};
    use super::*;

    async fn open_session(fake: &FakeDevTools) -> CdpSession {
        let connection = CdpConnection::connect(fake.url()).await.unwrap();
        CdpSession::open(Arc::new(connection), None).await.unwrap()
    }

    fn export_link() -> Selector {
        Selector::from("link|Export Report")
    }

    #[tokio::test]
    async fn network_idle_ignores_unrelated_chatter() {
        let fake = FakeDevTools::start(vec![]).await;
        let session = open_session(&fake).await;

        fake.emit("Page.loadEventFired", json!({ "timestamp": 1.0 }), Some("S1"));
        // A request on some other page never finishes; it must not count here.
        fake.emit(
            "Network.requestWillBeSent",
            json!({ "requestId": "other-1" }),
            Some("S9"),
        );

        let started = Instant::now();
        let wait = async {
            let result = session
                .wait_for_state(WaitUntil::NetworkIdle, Duration::from_secs(5), false)
                .await;
            (result, started.elapsed())
        };
        let chatter = async {
            for _ in 0..20 {
                fake.emit("Runtime.consoleAPICalled", json!({ "type": "log" }), Some("S1"));
                fake.emit("Network.webSocketFrameReceived", json!({}), Some("S1"));
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        let ((result, elapsed), ()) = tokio::join!(wait, chatter);

        assert!(result.is_ok(), "{result:?}");
        assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn network_idle_waits_for_requests_in_flight() {
        let fake = FakeDevTools::start(vec![]).await;
        let session = open_session(&fake).await;

        fake.emit("Page.loadEventFired", json!({ "timestamp": 1.0 }), Some("S1"));
        fake.emit(
            "Network.requestWillBeSent",
            json!({ "requestId": "r-1" }),
            Some("S1"),
        );

        let started = Instant::now();
        let wait = async {
            let result = session
                .wait_for_state(WaitUntil::NetworkIdle, Duration::from_secs(5), false)
                .await;
            (result, started.elapsed())
        };
        let finish = async {
            tokio::time::sleep(Duration::from_millis(800)).await;
            fake.emit("Network.loadingFinished", json!({ "requestId": "r-1" }), Some("S1"));
        };
        let ((result, elapsed), ()) = tokio::join!(wait, finish);

        assert!(result.is_ok(), "{result:?}");
        assert!(elapsed >= Duration::from_millis(1200), "took {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn unfinished_request_times_out() {
        let fake = FakeDevTools::start(vec![]).await;
        let session = open_session(&fake).await;

        fake.emit("Page.loadEventFired", json!({}), Some("S1"));
        fake.emit(
            "Network.requestWillBeSent",
            json!({ "requestId": "r-1" }),
            Some("S1"),
        );

        let err = session
            .wait_for_state(WaitUntil::NetworkIdle, Duration::from_millis(700), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Timeout(_)));
    }

    #[tokio::test]
    async fn every_session_gets_its_own_context_and_download_dir() {
        let fake = FakeDevTools::start(vec![]).await;
        let connection = Arc::new(CdpConnection::connect(fake.url()).await.unwrap());
        let first = CdpSession::open(connection.clone(), None).await.unwrap();
        let second = CdpSession::open(connection.clone(), None).await.unwrap();

        assert_eq!(first.browser_context_id, "CTX1");
        assert_eq!(second.browser_context_id, "CTX2");
        assert_ne!(first.staging.path(), second.staging.path());

        let behaviours = fake.calls("Browser.setDownloadBehavior");
        assert_eq!(behaviours.len(), 2);
        for (call, session) in behaviours.iter().zip([&first, &second]) {
            assert_eq!(call.params["behavior"], "allowAndName");
            assert_eq!(
                call.params["browserContextId"],
                session.browser_context_id.as_str()
            );
            assert_eq!(
                call.params["downloadPath"],
                session.staging.path().to_string_lossy().to_string()
            );
            assert!(call.session_id.is_none());
        }
        let targets = fake.calls("Target.createTarget");
        assert_eq!(targets[0].params["browserContextId"], "CTX1");
        assert_eq!(targets[1].params["browserContextId"], "CTX2");

        first.close().await.unwrap();
        first.close().await.unwrap();
        second.close().await.unwrap();

        let disposed: Vec<Value> = fake
            .calls("Target.disposeBrowserContext")
            .into_iter()
            .map(|c| c.params["browserContextId"].clone())
            .collect();
        assert_eq!(disposed, [json!("CTX1"), json!("CTX2")]);
        assert_eq!(fake.calls("Target.createBrowserContext").len(), 2);
        assert_eq!(fake.calls("Browser.close").len(), 2);
    }

    #[tokio::test]
    async fn download_completes_only_for_its_own_guid() {
        let fake = FakeDevTools::start(vec![
            event(
                "Browser.downloadWillBegin",
                json!({ "guid": "g-1", "suggestedFilename": "report.csv" }),
                None,
            ),
            event(
                "Browser.downloadProgress",
                json!({ "guid": "g-other", "state": "canceled" }),
                None,
            ),
            event(
                "Browser.downloadProgress",
                json!({ "guid": "g-other", "state": "completed" }),
                None,
            ),
            event(
                "Browser.downloadProgress",
                json!({ "guid": "g-1", "state": "inProgress", "receivedBytes": 10 }),
                None,
            ),
            event(
                "Browser.downloadProgress",
                json!({ "guid": "g-1", "state": "completed" }),
                None,
            ),
        ])
        .await;
        let session = open_session(&fake).await;

        let download = session
            .expect_download(&export_link(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(download.path(), session.staging.path().join("g-1"));
        assert_eq!(download.suggested_filename(), "report.csv");

        let mouse = fake.calls("Input.dispatchMouseEvent");
        let kinds: Vec<&str> = mouse
            .iter()
            .filter_map(|c| c.params["type"].as_str())
            .collect();
        assert_eq!(kinds, ["mouseMoved", "mousePressed", "mouseReleased"]);
        assert_eq!(mouse[2].params["x"], 40.0);
        assert_eq!(mouse[2].params["y"], 12.5);
    }

    #[tokio::test]
    async fn canceled_download_is_an_error() {
        let fake = FakeDevTools::start(vec![
            event(
                "Browser.downloadWillBegin",
                json!({ "guid": "g-1", "suggestedFilename": "report.csv" }),
                None,
            ),
            event(
                "Browser.downloadProgress",
                json!({ "guid": "g-1", "state": "canceled" }),
                None,
            ),
        ])
        .await;
        let session = open_session(&fake).await;

        let err = session
            .expect_download(&export_link(), Duration::from_secs(5))
            .await
            .unwrap_err();

        match err {
            ExportError::Download(msg) => assert!(msg.contains("report.csv"), "{msg}"),
            other => panic!("Expected Download error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn download_that_never_starts_times_out() {
        let fake = FakeDevTools::start(vec![]).await;
        let session = open_session(&fake).await;

        let err = session
            .expect_download(&export_link(), Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Timeout(msg) if msg.contains("start")));
    }

    #[test]
    fn exception_text_prefers_description() {
        let details = json!({
            "text": "Uncaught",
            "exception": { "description": "SyntaxError: '##' is not a valid selector" }
        });
        assert_eq!(
            exception_text(&details),
            "SyntaxError: '##' is not a valid selector"
        );
        assert_eq!(exception_text(&json!({ "text": "Uncaught" })), "Uncaught");
    }

    #[test]
    fn string_field_reports_missing_keys() {
        let reply = json!({ "targetId": "T1" });
        assert_eq!(string_field(&reply, "targetId").unwrap(), "T1");
        assert!(matches!(
            string_field(&reply, "sessionId"),
            Err(ExportError::Protocol(_))
        ));
    }
}
