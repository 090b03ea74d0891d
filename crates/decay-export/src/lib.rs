//! Daily report export through browser automation
//!
//! Logs into the reporting dashboard once per calendar day of a trailing
//! window, runs the report for that single day with a fixed set of dimensions,
//! and saves the exported file as `db_decay_<N>.csv`. Browser access goes
//! through the [`BrowserEngine`]/[`BrowserSession`] traits; [`CdpEngine`] is
//! the Chrome DevTools implementation.

pub mod config;
pub mod dimensions;
pub mod engines;
pub mod errors;
pub mod exporter;
pub mod locator;
pub mod page;
pub mod planner;
pub mod selector;
pub mod workflow;

pub use config::{BrowserConfig, Credentials, ExporterConfig, SiteConfig};
pub use dimensions::{default_dimensions, DimensionMode, DimensionSpec};
pub use engines::{BrowserEngine, BrowserSession, CdpEngine};
pub use errors::ExportError;
pub use exporter::{Artifact, Exporter, FailedDate, RunSummary};
pub use locator::Locator;
pub use page::{Download, Page, WaitUntil};
pub use planner::{
    artifact_name, DatePlan, PlannedDate, DEFAULT_LOOKBACK_MONTHS, MAX_LOOKBACK_MONTHS,
};
pub use selector::Selector;
pub use workflow::ReportWorkflow;
