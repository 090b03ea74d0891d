//! The scripted walk through the dashboard for one day.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument};

use crate::config::ExporterConfig;
use crate::dimensions::{DimensionMode, DimensionSpec};
use crate::exporter::Artifact;
use crate::page::{Download, Page, WaitUntil};
use crate::planner::PlannedDate;
use crate::{ExportError, Selector};

// Elements of the dashboard the workflow relies on.
const EMAIL_PLACEHOLDER: &str = "email";
const PASSWORD_PLACEHOLDER: &str = "password";
const LOGIN_BUTTON: &str = "button|Login";
const DATE_RANGE_FIELD: &str = "#rb_date_range";
const APPLY_BUTTON: &str = "button|Apply";
const ADD_DIMENSION_LINK: &str = "link|Add Dimension";
const DIMENSION_PICKER: &str = "textbox|Select Next Dimension";
const DIMENSION_SEARCH: &str = "searchbox";
const MORE_OPTIONS_BUTTON: &str = "button|More Options";
const EXPORT_REPORT_LINK: &str = "link|Export Report";

const LOGIN_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct ReportWorkflow<'a> {
    config: &'a ExporterConfig,
}

impl<'a> ReportWorkflow<'a> {
    pub fn new(config: &'a ExporterConfig) -> Self {
        Self { config }
    }

    /// Login, configure, export and save the report for `day`.
    ///
    /// Any error leaves no file under the artifact name.
    #[instrument(skip(self, page, day), fields(ordinal = day.ordinal, date = %day.formatted()))]
    pub async fn run(&self, page: &Page, day: &PlannedDate) -> Result<Artifact, ExportError> {
        self.login(page).await?;
        self.open_report(page).await?;
        self.apply_date_range(page, &day.date_range()).await?;
        for dimension in &self.config.dimensions {
            self.add_dimension(page, dimension).await?;
        }
        let download = self.export(page).await?;
        self.persist(&download, day).await
    }

    /// Submit the credentials and wait to leave the login page.
    ///
    /// The login is reported as rejected only if the URL still contains the
    /// login path once the page timeout has elapsed, so a client-side redirect
    /// that lands late is still accepted.
    pub async fn login(&self, page: &Page) -> Result<(), ExportError> {
        let site = &self.config.site;
        let credentials = &self.config.credentials;
        page.goto(&site.login_url(), WaitUntil::Load).await?;

        let email = page.locator(Selector::placeholder(EMAIL_PLACEHOLDER));
        email.click().await?;
        email.fill(&credentials.email).await?;

        let password = page.locator(Selector::placeholder(PASSWORD_PLACEHOLDER));
        password.click().await?;
        password.fill(credentials.password()).await?;

        page.locator(LOGIN_BUTTON).click().await?;
        page.wait_for_load(WaitUntil::Load).await?;

        let landed = self.leave_login_page(page).await?;
        debug!(%landed, "Logged in");
        Ok(())
    }

    async fn leave_login_page(&self, page: &Page) -> Result<String, ExportError> {
        let login_path = self.config.site.login_path.as_str();
        let deadline = Instant::now() + page.timeout();
        loop {
            match page.url().await {
                Ok(url) if !url.contains(login_path) => return Ok(url),
                Ok(url) if Instant::now() >= deadline => {
                    return Err(ExportError::AuthenticationFailed(format!(
                        "still on the login page ({url}) {:?} after submitting credentials for {}",
                        page.timeout(),
                        self.config.credentials.email
                    )));
                }
                Ok(_) => {}
                // The page can be between documents while the redirect runs.
                Err(ExportError::Protocol(msg)) if Instant::now() < deadline => {
                    debug!("Reading location while navigating: {}", msg);
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(LOGIN_POLL_INTERVAL).await;
        }
    }

    pub async fn open_report(&self, page: &Page) -> Result<(), ExportError> {
        page.goto(&self.config.site.report_url(), WaitUntil::NetworkIdle)
            .await
    }

    /// The range field only accepts input after being cleared and typed into
    /// key by key, so a plain fill is not enough.
    pub async fn apply_date_range(&self, page: &Page, range: &str) -> Result<(), ExportError> {
        info!("Setting date range to: {}", range);
        let field = page.locator(DATE_RANGE_FIELD);
        field.click().await?;
        field.click().await?;
        field.fill("").await?;
        field.click().await?;
        field.type_text(range, self.config.typing_delay).await?;
        page.locator(APPLY_BUTTON).click().await
    }

    pub async fn add_dimension(
        &self,
        page: &Page,
        dimension: &DimensionSpec,
    ) -> Result<(), ExportError> {
        debug!(dimension = %dimension.name, "Adding dimension");
        self.open_dimension_picker(page).await?;

        if let Some(term) = dimension.search_term(self.config.dimension_mode) {
            page.locator(DIMENSION_SEARCH).fill(&term).await?;
        }

        let mut option = Selector::role("option", dimension.name.as_str());
        if dimension.exact {
            option = option.exact();
        }
        page.locator(option).click().await
    }

    pub async fn export(&self, page: &Page) -> Result<Download, ExportError> {
        // The dashboard only exposes the options menu once the picker has been opened again.
        if self.config.dimension_mode == DimensionMode::Parity {
            self.open_dimension_picker(page).await?;
        }
        page.locator(MORE_OPTIONS_BUTTON).click().await?;
        page.expect_download(&page.locator(EXPORT_REPORT_LINK))
            .await
    }

    async fn open_dimension_picker(&self, page: &Page) -> Result<(), ExportError> {
        page.locator(ADD_DIMENSION_LINK).click().await?;
        page.locator(DIMENSION_PICKER).click().await
    }

    async fn persist(
        &self,
        download: &Download,
        day: &PlannedDate,
    ) -> Result<Artifact, ExportError> {
        let path: PathBuf = self.config.output_dir.join(day.artifact_name());
        let bytes = download.save_as(&path).await?;
        info!(
            "Downloaded and saved: {} for date {}",
            day.artifact_name(),
            day.formatted()
        );
        Ok(Artifact {
            ordinal: day.ordinal,
            date: day.date,
            path,
            bytes,
        })
    }
}
