//! Provisions CloudWatch alarms for every Amazon MWAA (managed Airflow)
//! environment of an account.
//!
//! Each invocation lists the account's environments and upserts three alarms
//! per environment, see [`templates::AlarmKind`]. Alarms are keyed by name,
//! so repeated invocations update alarms in place. Nothing is persisted and
//! alarms of deleted environments are left alone.
mod alarm;
pub mod backend;
pub mod directory;
pub mod handler;
pub mod logging;
pub mod metrics;
pub mod provision;
pub mod templates;

pub use alarm::{
    AlarmSpec, Comparison, Dimension, Expression, InvalidSpec, MetricDefinition, MetricQuery,
    MetricStat, MissingData, QuerySource, Statistic, Tag,
};
pub use backend::{AlarmBackend, Backend};
pub use directory::{EnvironmentDirectory, MwaaDirectory};
pub use handler::{Handler, Instrumented, InvocationContext};
pub use metrics::{Metrics, MetricsArgs};
pub use provision::{Provisioner, Report};

/// Provision MWAA environment alarms, either as an AWS Lambda function or once from the command line.
#[derive(Debug, clap::Parser)]
#[clap(version, about)]
pub struct Cli {
    #[clap(subcommand)]
    command: Option<Command>,
    #[clap(flatten)]
    pub log: logging::LogArgs,
    #[clap(flatten)]
    metrics: MetricsArgs,
    /// AWS region of the MWAA and CloudWatch clients.
    /// Defaults to the region of the SDK's provider chain.
    #[clap(long, global = true)]
    region: Option<String>,
    /// Follow pagination of the environment listing.
    /// Otherwise, only environments of the first page are provisioned.
    #[clap(long, env = "MWAA_LIST_ALL_PAGES", global = true)]
    all_pages: bool,
    /// Log rendered alarms instead of creating them.
    #[clap(long, env = "DRY_RUN", global = true)]
    dry_run: bool,
    #[clap(flatten)]
    settings: templates::Settings,
}

#[derive(Debug, clap::Subcommand)]
#[clap(rename_all = "kebab-case")]
pub enum Command {
    /// Serve invocations of the AWS Lambda runtime API. This is the default.
    Serve,
    /// Provision alarms once and print the report as JSON.
    Run(RunArgs),
}

#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// Event of the invocation, as JSON. It's logged and otherwise unused.
    #[clap(long, default_value = "{}")]
    event: serde_json::Value,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let Cli {
            command,
            log: _,
            metrics,
            region,
            all_pages,
            dry_run,
            settings,
        } = self;

        tracing::debug!(?settings, ?metrics, %all_pages, %dry_run, "starting");
        settings.validate()?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let sdk_config = loader.load().await;

        let directory = MwaaDirectory::new(aws_sdk_mwaa::Client::new(&sdk_config), all_pages);
        let backend = if dry_run {
            Backend::DryRun
        } else {
            Backend::cloudwatch(aws_sdk_cloudwatch::Client::new(&sdk_config))
        };
        let provisioner = Provisioner::new(directory, backend, settings);

        match command.unwrap_or(Command::Serve) {
            Command::Serve => {
                handler::serve(Instrumented::new(provisioner, Metrics::stdout(metrics))).await
            }
            Command::Run(RunArgs { event }) => {
                // Keep stdout for the report.
                let metrics = Metrics::to_writer(metrics, std::io::stderr());
                let report = Instrumented::new(provisioner, metrics)
                    .handle(event, &InvocationContext::local())
                    .await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "mwaa-alarms",
            "run",
            "--event",
            r#"{"source": "aws.events"}"#,
            "--dry-run",
            "--parse-time-environment",
            "shared",
        ])
        .unwrap();

        let Some(Command::Run(RunArgs { event })) = &cli.command else {
            panic!("expected the run command, got {:?}", cli.command);
        };
        assert_eq!(event["source"], "aws.events");
        assert!(cli.dry_run);
        assert_eq!(cli.settings.parse_time_environment, "shared");
        assert_eq!(cli.settings.unhealthy_worker_period, 900);

        let cli =
            Cli::try_parse_from(["mwaa-alarms", "--metrics.namespace", "Platform"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.metrics.namespace, "Platform");
        assert_eq!(cli.metrics.service, metrics::DEFAULT_SERVICE);
    }

    #[test]
    fn test_cli_defaults_match_settings_default() {
        let cli = Cli::try_parse_from(["mwaa-alarms"]).unwrap();
        assert_eq!(cli.settings, templates::Settings::default());
        assert_eq!(cli.metrics, MetricsArgs::default());
    }
}
