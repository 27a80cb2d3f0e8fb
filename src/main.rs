use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use alert_audit::config::{Config, ConfigOverrides};
use alert_audit::graphql::http::HttpTransport;
use alert_audit::output::render_json;
use alert_audit::output::table::{render_alert_rows_table, render_summary_table};
use alert_audit::pipeline::{run_report, LogProgress, ReportOutput, ReportRequest};
use alert_audit::report::{resolve_date_range, uses_default_window, DateRange};
use alert_audit::server::run_server;
use alert_audit::types::Credentials;
use anyhow::{anyhow, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "alert-audit",
    about = "Report recently changed New Relic alert conditions and alert audit events"
)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// GraphQL endpoint override.
    #[arg(long)]
    graphql_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, filter and write the alert and audit CSV reports.
    Report {
        /// Start of the date range (YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,
        /// End of the date range (YYYY-MM-DD).
        #[arg(long)]
        end: Option<String>,
        #[arg(long, env = "NEW_RELIC_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        #[arg(long, env = "NEW_RELIC_ACCOUNT_ID")]
        account_id: Option<String>,
        #[arg(long)]
        output_dir: Option<String>,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Serve the job API.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

#[derive(Debug, Serialize)]
struct ReportSummary<'a> {
    range: &'a DateRange,
    #[serde(flatten)]
    output: &'a ReportOutput,
    alerts_file: Option<String>,
    audit_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(Some(&config_path))?;
    config.apply_overrides(ConfigOverrides {
        graphql_url: cli.graphql_url.clone(),
        ..ConfigOverrides::default()
    });

    match cli.command {
        Commands::Config { init, show } => handle_config_command(init, show, &config, &config_path),
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let bind = format!("{host}:{port}");
            let addr: SocketAddr = bind
                .parse()
                .map_err(|e| anyhow!("invalid bind address {bind}: {e}"))?;
            run_server(config, addr).await
        }
        Commands::Report {
            start,
            end,
            api_key,
            account_id,
            output_dir,
            format,
        } => {
            config.apply_overrides(ConfigOverrides {
                output_dir,
                ..ConfigOverrides::default()
            });
            let range = resolve_date_range(
                start.as_deref(),
                end.as_deref(),
                Local::now().date_naive(),
                config.report.lookback_days,
            )?;
            if uses_default_window(start.as_deref(), end.as_deref()) {
                info!(
                    "no date range specified; defaulting to the last {} days",
                    config.report.lookback_days
                );
            }
            let credentials = config.credentials(api_key.as_deref(), account_id.as_deref())?;
            run_report_command(&config, &credentials, range, format).await
        }
    }
}

async fn run_report_command(
    config: &Config,
    credentials: &Credentials,
    range: DateRange,
    format: OutputFormat,
) -> Result<()> {
    let transport = HttpTransport::new(
        config.newrelic.graphql_url.clone(),
        credentials.api_key.clone(),
        config.connect_timeout(),
    )?;
    let request = ReportRequest {
        account_id: credentials.account_id,
        range,
    };
    let output = run_report(&transport, &config.fetch_settings(), &request, &LogProgress).await?;

    let output_dir = config.resolved_output_dir();
    let alerts_file = match &output.alerts_csv {
        Some(csv) => Some(write_report(&output_dir, &config.report.alerts_file, csv)?),
        None => {
            info!("No conditions found to write after filtering.");
            None
        }
    };
    let audit_file = match (&output.audit_csv, &output.audit_error) {
        (Some(csv), _) => Some(write_report(&output_dir, &config.report.audit_file, csv)?),
        (None, Some(error)) => {
            warn!("Audit events unavailable, no audit report written: {error}");
            None
        }
        (None, None) => {
            info!("No audit events found to write.");
            None
        }
    };

    match format {
        OutputFormat::Table => {
            println!(
                "{}",
                render_summary_table(
                    &request.range,
                    &output.counts,
                    output.audit_events,
                    output.audit_error.as_deref(),
                )
            );
            if !output.rows.is_empty() {
                println!("{}", render_alert_rows_table(&output.rows));
            }
        }
        OutputFormat::Json => {
            let summary = ReportSummary {
                range: &request.range,
                output: &output,
                alerts_file: alerts_file.as_ref().map(|p| p.display().to_string()),
                audit_file: audit_file.as_ref().map(|p| p.display().to_string()),
            };
            println!("{}", render_json(&summary)?);
        }
    }
    Ok(())
}

fn write_report(dir: &Path, file_name: &str, contents: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed creating output directory: {}", dir.display()))?;
    let path = dir.join(file_name);
    fs::write(&path, contents)
        .with_context(|| format!("failed writing report: {}", path.display()))?;
    info!("wrote {}", path.display());
    Ok(path)
}

fn handle_config_command(init: bool, show: bool, config: &Config, config_path: &Path) -> Result<()> {
    if init {
        if config_path.exists() {
            warn!("config already exists at {}, leaving it untouched", config_path.display());
        } else {
            Config::write_template(config_path)?;
            println!("Wrote config template to {}", config_path.display());
        }
    }
    if show || !init {
        println!("{}", render_json(config)?);
    }
    Ok(())
}
