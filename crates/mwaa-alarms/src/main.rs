#![recursion_limit = "256"]

use clap::Parser;
use mwaa_alarms::Cli;

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    mwaa_alarms::logging::init_logging(&cli.log)?;

    // Provisioning is strictly sequential, so a single thread suffices.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(async move { cli.run().await });

    if let Err(error) = &result {
        tracing::error!(error = %format!("{error:#}"), "execution failed");
    }
    // We must call `shutdown_background()` because otherwise an incomplete spawned future
    // could block indefinitely.
    runtime.shutdown_background();
    result
}
