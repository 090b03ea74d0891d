use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use colored::Colorize;
use decay_export::{
    default_dimensions, BrowserConfig, CdpEngine, Credentials, DatePlan, DimensionMode,
    DimensionSpec, Exporter, ExporterConfig, RunSummary, SiteConfig, DEFAULT_LOOKBACK_MONTHS,
};
use tracing::info;

mod duration_parser;

use duration_parser::parse_duration;

#[derive(Parser, Debug)]
#[command(
    name = "decay-export",
    author,
    version,
    about = "Download one dashboard report per day for a trailing window of months"
)]
struct Cli {
    /// Dashboard login email
    #[arg(long, env = "DECAY_EXPORT_EMAIL")]
    email: Option<String>,

    /// Dashboard login password
    #[arg(long, env = "DECAY_EXPORT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Dashboard origin
    #[arg(long, env = "DECAY_EXPORT_BASE_URL", default_value = decay_export::config::DEFAULT_BASE_URL)]
    base_url: String,

    /// Path of the report to run, relative to the base URL
    #[arg(long, default_value = decay_export::config::DEFAULT_REPORT_PATH)]
    report_path: String,

    /// Directory the db_decay_<N>.csv files are written to
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// How many months before the reference date the window starts
    #[arg(long, default_value_t = DEFAULT_LOOKBACK_MONTHS)]
    lookback_months: u32,

    /// Reference date (YYYY-MM-DD); defaults to today in local time
    #[arg(long, value_name = "YYYY-MM-DD")]
    today: Option<NaiveDate>,

    /// Dimension to add, in order. Repeat for several; `=Name` matches the label exactly
    #[arg(long = "dimension", value_name = "NAME[:SEARCH]")]
    dimensions: Vec<DimensionSpec>,

    /// Type search text into the dimension picker for every dimension
    #[arg(long)]
    uniform_dimensions: bool,

    /// Chrome/Chromium executable (otherwise CHROME_PATH, PATH and common install locations)
    #[arg(long, env = "CHROME_PATH")]
    browser_path: Option<PathBuf>,

    /// Extra argument passed to the browser. Repeatable
    #[arg(long = "browser-arg", value_name = "ARG", allow_hyphen_values = true)]
    browser_args: Vec<String>,

    /// Run the browser without a window
    #[arg(long)]
    headless: bool,

    /// Per-step timeout, e.g. "30s"
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    timeout: Duration,

    /// Delay between typed characters in the date field, e.g. "50ms"
    #[arg(long, default_value = "50ms", value_parser = parse_duration)]
    typing_delay: Duration,

    /// Print the planned dates and file names, then exit without opening a browser
    #[arg(long)]
    plan_only: bool,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, env = "DECAY_EXPORT_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn reference_date(&self) -> NaiveDate {
        self.today
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    fn into_config(self) -> Result<ExporterConfig> {
        let email = self
            .email
            .context("No login email. Pass --email or set DECAY_EXPORT_EMAIL")?;
        let password = self
            .password
            .context("No login password. Pass --password or set DECAY_EXPORT_PASSWORD")?;

        let mut config = ExporterConfig::new(Credentials::new(email, password), self.output_dir);
        config.site = SiteConfig {
            base_url: self.base_url,
            report_path: self.report_path,
            ..SiteConfig::default()
        };
        config.browser = BrowserConfig {
            executable: self.browser_path,
            headless: self.headless,
            args: self.browser_args,
        };
        config.lookback_months = self.lookback_months;
        config.dimensions = if self.dimensions.is_empty() {
            default_dimensions()
        } else {
            self.dimensions
        };
        config.dimension_mode = if self.uniform_dimensions {
            DimensionMode::Uniform
        } else {
            DimensionMode::Parity
        };
        config.timeout = self.timeout;
        config.typing_delay = self.typing_delay;
        Ok(config)
    }
}

fn init_logging(log_dir: Option<&Path>) -> Result<()> {
    use tracing_appender::rolling;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let file_appender = rolling::daily(dir, "decay-export.log");
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file_appender)
                    .with_ansi(false)
                    .with_target(true)
                    .with_line_number(true),
            )
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(
            // Respect RUST_LOG if provided, else default to info
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();
    Ok(())
}

fn print_plan(plan: &DatePlan) {
    println!(
        "{} {} day(s), {} to {}",
        "Plan:".bold(),
        plan.len(),
        plan.first().formatted(),
        plan.last().formatted()
    );
    for day in plan {
        println!("  {:>4}  {}  {}", day.ordinal, day.formatted(), day.artifact_name());
    }
}

fn print_summary(summary: &RunSummary) {
    let line = format!(
        "Completed! Downloaded {} of {} daily reports.",
        summary.succeeded(),
        summary.planned
    );
    if summary.is_complete() {
        println!("{}", line.green().bold());
        return;
    }

    println!("{}", line.yellow().bold());
    println!("{}", "Failed dates:".red());
    for failed in &summary.failed {
        println!(
            "  {:>4}  {}  {}",
            failed.ordinal,
            failed.date.format("%m/%d/%Y"),
            failed.error.dimmed()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_dir.as_deref())?;

    let reference = cli.reference_date();
    if cli.plan_only {
        let plan = DatePlan::try_new(reference, cli.lookback_months)?;
        print_plan(&plan);
        return Ok(());
    }

    let config = cli.into_config()?;
    info!(
        email = %config.credentials.email,
        output_dir = %config.output_dir.display(),
        lookback_months = config.lookback_months,
        %reference,
        "Exporting daily reports"
    );

    let engine = Arc::new(CdpEngine::new(config.browser.clone()));
    let exporter = Exporter::new(engine, config);
    let summary = exporter
        .run_through(reference)
        .await
        .context("Export run aborted")?;

    print_summary(&summary);
    Ok(())
}
