use anyhow::Context;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line, as expected by CloudWatch Logs Insights.
    Json,
    /// Compact, human-readable lines.
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, clap::Args)]
pub struct LogArgs {
    /// Default log level. `RUST_LOG` directives take precedence.
    #[clap(
        long = "log.level",
        env = "LOG_LEVEL",
        value_enum,
        default_value = "info",
        global = true
    )]
    pub level: LogLevel,
    /// Format of log lines written to stderr.
    /// Defaults to json within AWS Lambda, and text otherwise.
    #[clap(long = "log.format", env = "LOG_FORMAT", value_enum, global = true)]
    pub format: Option<LogFormat>,
}

impl LogArgs {
    pub fn resolved_format(&self) -> LogFormat {
        match self.format {
            Some(format) => format,
            None if std::env::var_os("AWS_LAMBDA_RUNTIME_API").is_some() => LogFormat::Json,
            None => LogFormat::Text,
        }
    }
}

/// Install the global tracing subscriber.
pub fn init_logging(args: &LogArgs) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(args.level).into())
        .from_env_lossy();

    let builder = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match args.resolved_format() {
        LogFormat::Json => tracing::subscriber::set_global_default(
            builder
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .finish(),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            builder.compact().with_target(false).finish(),
        ),
    }
    .context("setting tracing default failed")
}
