use tracing::{debug, instrument};

use crate::engines::BrowserSession;
use crate::errors::ExportError;
use crate::selector::Selector;
use std::sync::Arc;
use std::time::Duration;

// Default timeout if none is specified on the locator itself
const DEFAULT_LOCATOR_TIMEOUT: Duration = Duration::from_secs(30);

/// A high-level handle for interacting with one element of the page
///
/// For maximum precision, prefer role|name selectors (e.g., "button|Apply")
/// over bare roles that could match several elements.
#[derive(Clone)]
pub struct Locator {
    session: Arc<dyn BrowserSession>,
    selector: Selector,
    timeout: Duration,
}

impl Locator {
    pub(crate) fn new(session: Arc<dyn BrowserSession>, selector: Selector) -> Self {
        Self {
            session,
            selector,
            timeout: DEFAULT_LOCATOR_TIMEOUT,
        }
    }

    /// Set the timeout used by every action on this locator.
    pub fn set_default_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[instrument(level = "debug", skip(self), fields(selector = %self.selector))]
    pub async fn click(&self) -> Result<(), ExportError> {
        self.ensure_valid()?;
        let result = self.session.click(&self.selector, self.timeout).await;
        self.map_not_found(result)
    }

    #[instrument(level = "debug", skip(self, value), fields(selector = %self.selector))]
    pub async fn fill(&self, value: &str) -> Result<(), ExportError> {
        self.ensure_valid()?;
        let result = self.session.fill(&self.selector, value, self.timeout).await;
        self.map_not_found(result)
    }

    /// Type `text` key by key, waiting `delay` between keystrokes.
    #[instrument(level = "debug", skip(self), fields(selector = %self.selector))]
    pub async fn type_text(&self, text: &str, delay: Duration) -> Result<(), ExportError> {
        self.ensure_valid()?;
        debug!(chars = text.chars().count(), ?delay, "Typing into element");
        let result = self
            .session
            .type_text(&self.selector, text, delay, self.timeout)
            .await;
        self.map_not_found(result)
    }

    pub(crate) fn ensure_valid(&self) -> Result<(), ExportError> {
        match &self.selector {
            Selector::Invalid(reason) => Err(ExportError::InvalidSelector(reason.clone())),
            _ => Ok(()),
        }
    }

    // The engine returns ElementNotFound once its wait runs out. Report it as a
    // timeout naming the selector and the wait.
    fn map_not_found<T>(&self, result: Result<T, ExportError>) -> Result<T, ExportError> {
        result.map_err(|e| match e {
            ExportError::ElementNotFound(inner_msg) => ExportError::Timeout(format!(
                "Timed out after {:?} waiting for element {}. Original error: {inner_msg}",
                self.timeout, self.selector
            )),
            other => other,
        })
    }
}
