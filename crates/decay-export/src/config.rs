use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;

use crate::dimensions::{default_dimensions, DimensionMode, DimensionSpec};
use crate::errors::ExportError;
use crate::planner::{check_lookback, DatePlan, DEFAULT_LOOKBACK_MONTHS};

pub const DEFAULT_BASE_URL: &str = "https://goldie.vrio.app";
pub const DEFAULT_LOGIN_PATH: &str = "/auth/login";
pub const DEFAULT_REPORT_PATH: &str = "/report/run/109/14";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_TYPING_DELAY: Duration = Duration::from_millis(50);

/// Dashboard login. The password never shows up in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where the dashboard lives.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub base_url: String,
    pub login_path: String,
    pub report_path: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            report_path: DEFAULT_REPORT_PATH.to_string(),
        }
    }
}

impl SiteConfig {
    pub fn login_url(&self) -> String {
        self.join(&self.login_path)
    }

    pub fn report_url(&self) -> String {
        self.join(&self.report_path)
    }

    fn join(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Chromium launch settings for the DevTools engine.
#[derive(Debug, Clone, Default)]
pub struct BrowserConfig {
    /// Explicit executable; discovered when `None`.
    pub executable: Option<PathBuf>,
    pub headless: bool,
    /// Extra command-line flags, e.g. `--no-sandbox` in containers.
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub credentials: Credentials,
    pub site: SiteConfig,
    pub browser: BrowserConfig,
    pub output_dir: PathBuf,
    /// Months before the reference date the plan starts; see [`ExporterConfig::plan`].
    pub lookback_months: u32,
    pub dimensions: Vec<DimensionSpec>,
    pub dimension_mode: DimensionMode,
    /// Per-element wait.
    pub timeout: Duration,
    /// Pause between keystrokes when typing the date range.
    pub typing_delay: Duration,
}

impl ExporterConfig {
    pub fn new(credentials: Credentials, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            credentials,
            site: SiteConfig::default(),
            browser: BrowserConfig::default(),
            output_dir: output_dir.into(),
            lookback_months: DEFAULT_LOOKBACK_MONTHS,
            dimensions: default_dimensions(),
            dimension_mode: DimensionMode::default(),
            timeout: DEFAULT_TIMEOUT,
            typing_delay: DEFAULT_TYPING_DELAY,
        }
    }

    /// Checks that need to pass before any browser is started.
    pub fn validate(&self) -> Result<(), ExportError> {
        if self.credentials.email.trim().is_empty() {
            return Err(ExportError::Config("email is empty".to_string()));
        }
        if self.credentials.password().is_empty() {
            return Err(ExportError::Config("password is empty".to_string()));
        }
        if !self.site.base_url.starts_with("http://") && !self.site.base_url.starts_with("https://")
        {
            return Err(ExportError::Config(format!(
                "base URL must start with http:// or https://, got \"{}\"",
                self.site.base_url
            )));
        }
        check_lookback(self.lookback_months)?;
        if self.dimensions.is_empty() {
            return Err(ExportError::Config(
                "at least one dimension is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Every day from `lookback_months` before `reference` through `reference`.
    pub fn plan(&self, reference: NaiveDate) -> Result<DatePlan, ExportError> {
        DatePlan::try_new(reference, self.lookback_months)
    }
}
