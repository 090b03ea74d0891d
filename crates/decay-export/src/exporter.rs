//! Runs the workflow once per planned day, strictly one session at a time.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::config::ExporterConfig;
use crate::engines::BrowserEngine;
use crate::page::Page;
use crate::planner::{DatePlan, PlannedDate};
use crate::workflow::ReportWorkflow;
use crate::ExportError;

/// A report saved to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub ordinal: u32,
    pub date: NaiveDate,
    pub path: PathBuf,
    pub bytes: u64,
}

/// A day whose export did not produce a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDate {
    pub ordinal: u32,
    pub date: NaiveDate,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub planned: usize,
    pub artifacts: Vec<Artifact>,
    pub failed: Vec<FailedDate>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Exporter {
    engine: Arc<dyn BrowserEngine>,
    config: ExporterConfig,
}

impl Exporter {
    pub fn new(engine: Arc<dyn BrowserEngine>, config: ExporterConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }

    /// Export every day of the configured window ending at `reference`.
    pub async fn run_through(&self, reference: NaiveDate) -> Result<RunSummary, ExportError> {
        let plan = self.config.plan(reference)?;
        self.run(&plan).await
    }

    /// Export every day of `plan` in order.
    ///
    /// A failing day is logged and recorded in the summary; only fatal errors
    /// (browser cannot start, bad configuration, unusable output directory)
    /// stop the run.
    pub async fn run(&self, plan: &DatePlan) -> Result<RunSummary, ExportError> {
        self.config.validate()?;
        self.prepare_output_dir().await?;

        info!(
            "Starting download from {} to {}",
            plan.first().formatted(),
            plan.last().formatted()
        );

        let mut summary = RunSummary {
            planned: plan.len(),
            ..RunSummary::default()
        };

        for day in plan.iter() {
            info!("Processing day {}: {}", day.ordinal, day.formatted());
            match self.export_day(&day).await {
                Ok(artifact) => summary.artifacts.push(artifact),
                Err(e) if e.is_fatal() => {
                    error!(
                        ordinal = day.ordinal,
                        date = %day.formatted(),
                        "Aborting run: {}", e
                    );
                    return Err(e);
                }
                Err(e) => {
                    error!(
                        ordinal = day.ordinal,
                        "Error processing date {}: {}",
                        day.formatted(),
                        e
                    );
                    summary.failed.push(FailedDate {
                        ordinal: day.ordinal,
                        date: day.date,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            succeeded = summary.succeeded(),
            failed = summary.failed.len(),
            "Completed! Downloaded {} of {} daily reports.",
            summary.succeeded(),
            summary.planned
        );
        Ok(summary)
    }

    /// One isolated session for one day. The session is closed whatever the outcome.
    pub async fn export_day(&self, day: &PlannedDate) -> Result<Artifact, ExportError> {
        let session = self.engine.new_session().await?;
        let page = Page::new(session, self.config.timeout);
        let result = ReportWorkflow::new(&self.config).run(&page, day).await;
        page.close().await;
        result
    }

    async fn prepare_output_dir(&self) -> Result<(), ExportError> {
        let dir = &self.config.output_dir;
        let unusable = |e: std::io::Error| {
            ExportError::Config(format!(
                "output directory {} is not writable: {e}",
                dir.display()
            ))
        };

        tokio::fs::create_dir_all(dir).await.map_err(unusable)?;
        let probe = dir.join(".decay-export-write-test");
        tokio::fs::write(&probe, b"").await.map_err(unusable)?;
        if let Err(e) = tokio::fs::remove_file(&probe).await {
            warn!("Could not remove {}: {}", probe.display(), e);
        }
        Ok(())
    }
}
