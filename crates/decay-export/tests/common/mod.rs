//! In-memory browser engine that records every action instead of driving a browser.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use decay_export::{
    BrowserEngine, BrowserSession, Credentials, Download, ExportError, ExporterConfig, Selector,
    WaitUntil,
};
use tempfile::TempDir;

pub const BASE_URL: &str = "https://dash.example.test";

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Open(usize),
    Goto(usize, String, WaitUntil),
    WaitForLoad(usize),
    Click(usize, Selector),
    Fill(usize, Selector, String),
    Type(usize, Selector, String, Duration),
    Download(usize, Selector),
    Close(usize),
}

impl Action {
    pub fn session(&self) -> usize {
        match self {
            Action::Open(i)
            | Action::Goto(i, ..)
            | Action::WaitForLoad(i)
            | Action::Click(i, _)
            | Action::Fill(i, ..)
            | Action::Type(i, ..)
            | Action::Download(i, _)
            | Action::Close(i) => *i,
        }
    }
}

/// What the fake dashboard should do. Session indexes are 0-based.
#[derive(Debug, Clone)]
pub struct Script {
    pub fail_on: Vec<(usize, Selector)>,
    pub reject_login: bool,
    pub launch_fails_at: Option<usize>,
    pub cancel_download_at: Vec<usize>,
    pub download_body: Vec<u8>,
    /// URL reads after clicking Login that still report the login page.
    pub login_redirect_polls: usize,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            fail_on: Vec::new(),
            reject_login: false,
            launch_fails_at: None,
            cancel_download_at: Vec::new(),
            download_body: b"Item,Card Type,Transaction Day Of Week,Card Bin Number,Ship State\n"
                .to_vec(),
            login_redirect_polls: 0,
        }
    }
}

struct Shared {
    script: Script,
    log: Mutex<Vec<Action>>,
    open_now: AtomicUsize,
    max_open: AtomicUsize,
    staging: TempDir,
}

impl Shared {
    fn record(&self, action: Action) {
        self.log.lock().unwrap().push(action);
    }

    fn should_fail(&self, index: usize, selector: &Selector) -> bool {
        self.script
            .fail_on
            .iter()
            .any(|(i, s)| *i == index && s == selector)
    }
}

pub struct ScriptedEngine {
    shared: Arc<Shared>,
    next_session: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(script: Script) -> Self {
        Self {
            shared: Arc::new(Shared {
                script,
                log: Mutex::new(Vec::new()),
                open_now: AtomicUsize::new(0),
                max_open: AtomicUsize::new(0),
                staging: tempfile::tempdir().unwrap(),
            }),
            next_session: AtomicUsize::new(0),
        }
    }

    pub fn actions(&self) -> Vec<Action> {
        self.shared.log.lock().unwrap().clone()
    }

    pub fn actions_for(&self, session: usize) -> Vec<Action> {
        self.actions()
            .into_iter()
            .filter(|a| a.session() == session)
            .collect()
    }

    pub fn max_concurrent_sessions(&self) -> usize {
        self.shared.max_open.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.next_session.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BrowserEngine for ScriptedEngine {
    async fn new_session(&self) -> Result<Box<dyn BrowserSession>, ExportError> {
        let index = self.next_session.fetch_add(1, Ordering::SeqCst);
        if self.shared.script.launch_fails_at == Some(index) {
            return Err(ExportError::BrowserLaunch("scripted launch failure".into()));
        }
        let open = self.shared.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_open.fetch_max(open, Ordering::SeqCst);
        self.shared.record(Action::Open(index));

        Ok(Box::new(ScriptedSession {
            index,
            shared: self.shared.clone(),
            url: Mutex::new("about:blank".to_string()),
            pending_redirect: Mutex::new(None),
            closed: Mutex::new(false),
        }))
    }
}

struct ScriptedSession {
    index: usize,
    shared: Arc<Shared>,
    url: Mutex<String>,
    pending_redirect: Mutex<Option<usize>>,
    closed: Mutex<bool>,
}

impl ScriptedSession {
    fn check(&self, selector: &Selector) -> Result<(), ExportError> {
        if self.shared.should_fail(self.index, selector) {
            return Err(ExportError::ElementNotFound(selector.to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl BrowserSession for ScriptedSession {
    async fn goto(
        &self,
        url: &str,
        wait: WaitUntil,
        _timeout: Duration,
    ) -> Result<(), ExportError> {
        self.shared
            .record(Action::Goto(self.index, url.to_string(), wait));
        *self.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn wait_for_load(&self, _wait: WaitUntil, _timeout: Duration) -> Result<(), ExportError> {
        self.shared.record(Action::WaitForLoad(self.index));
        Ok(())
    }

    async fn current_url(&self) -> Result<String, ExportError> {
        let mut pending = self.pending_redirect.lock().unwrap();
        match *pending {
            Some(0) => {
                *self.url.lock().unwrap() = format!("{BASE_URL}/dashboard");
                *pending = None;
            }
            Some(remaining) => *pending = Some(remaining - 1),
            None => {}
        }
        Ok(self.url.lock().unwrap().clone())
    }

    async fn click(&self, selector: &Selector, _timeout: Duration) -> Result<(), ExportError> {
        self.check(selector)?;
        self.shared.record(Action::Click(self.index, selector.clone()));
        if *selector == Selector::from("button|Login") && !self.shared.script.reject_login {
            *self.pending_redirect.lock().unwrap() = Some(self.shared.script.login_redirect_polls);
        }
        Ok(())
    }

    async fn fill(
        &self,
        selector: &Selector,
        value: &str,
        _timeout: Duration,
    ) -> Result<(), ExportError> {
        self.check(selector)?;
        self.shared
            .record(Action::Fill(self.index, selector.clone(), value.to_string()));
        Ok(())
    }

    async fn type_text(
        &self,
        selector: &Selector,
        text: &str,
        delay: Duration,
        _timeout: Duration,
    ) -> Result<(), ExportError> {
        self.check(selector)?;
        self.shared.record(Action::Type(
            self.index,
            selector.clone(),
            text.to_string(),
            delay,
        ));
        Ok(())
    }

    async fn expect_download(
        &self,
        trigger: &Selector,
        _timeout: Duration,
    ) -> Result<Download, ExportError> {
        self.check(trigger)?;
        self.shared
            .record(Action::Download(self.index, trigger.clone()));
        if self.shared.script.cancel_download_at.contains(&self.index) {
            return Err(ExportError::Download("report.csv was canceled".into()));
        }
        let path = self.shared.staging.path().join(format!("guid-{}", self.index));
        std::fs::write(&path, &self.shared.script.download_body)?;
        Ok(Download::new(path, "report.csv"))
    }

    async fn close(&self) -> Result<(), ExportError> {
        let mut closed = self.closed.lock().unwrap();
        if !*closed {
            *closed = true;
            self.shared.open_now.fetch_sub(1, Ordering::SeqCst);
            self.shared.record(Action::Close(self.index));
        }
        Ok(())
    }
}

pub fn test_config(output_dir: &std::path::Path) -> ExporterConfig {
    let mut config = ExporterConfig::new(
        Credentials::new("ops@example.test", "hunter2!"),
        output_dir,
    );
    config.site.base_url = BASE_URL.to_string();
    config.typing_delay = Duration::ZERO;
    config
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("decay_export=debug")
        .with_test_writer()
        .try_init();
}
