use std::time::Duration;

use crate::page::{Download, WaitUntil};
use crate::{ExportError, Selector};

pub mod cdp;

pub use cdp::CdpEngine;

/// Something that can hand out isolated browser sessions.
#[async_trait::async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Open a fresh browsing context: no cookies, storage or page state
    /// shared with any earlier session.
    async fn new_session(&self) -> Result<Box<dyn BrowserSession>, ExportError>;
}

/// The capabilities the export workflow needs from one browsing context.
///
/// Element operations wait up to `timeout` for the selector to resolve to a
/// visible element and return `ElementNotFound` when it never does.
#[async_trait::async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate and wait for the given load state.
    async fn goto(&self, url: &str, wait: WaitUntil, timeout: Duration)
        -> Result<(), ExportError>;

    /// Wait for a navigation started by an earlier action to settle.
    async fn wait_for_load(&self, wait: WaitUntil, timeout: Duration) -> Result<(), ExportError>;

    async fn current_url(&self) -> Result<String, ExportError>;

    async fn click(&self, selector: &Selector, timeout: Duration) -> Result<(), ExportError>;

    /// Replace the element's value in one step.
    async fn fill(
        &self,
        selector: &Selector,
        value: &str,
        timeout: Duration,
    ) -> Result<(), ExportError>;

    /// Send one key event per character, pausing `delay` between them.
    async fn type_text(
        &self,
        selector: &Selector,
        text: &str,
        delay: Duration,
        timeout: Duration,
    ) -> Result<(), ExportError>;

    /// Click `trigger` and wait until the download it starts has completed.
    async fn expect_download(
        &self,
        trigger: &Selector,
        timeout: Duration,
    ) -> Result<Download, ExportError>;

    /// Tear down the browsing context and anything launched for it.
    async fn close(&self) -> Result<(), ExportError>;
}
