// Entrypoint for the CLI application.
// - Keeps `main` small: parse flags, build an API client and run.
// - Usage errors exit with 2 before anything touches the network.

use squidle_dl::api::ApiClient;
use squidle_dl::app;
use squidle_dl::cli::Cli;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match try_main(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn try_main(cli: Cli) -> anyhow::Result<bool> {
    let settings = cli.into_settings()?;
    let api = ApiClient::new(&settings.url, settings.token.as_deref())?
        .with_results_per_page(settings.results_per_page);

    let summary = app::run(&api, &settings)?;
    if !summary.campaigns_failed.is_empty() {
        error!(campaigns = ?summary.campaigns_failed, "some campaigns could not be resolved");
    }
    Ok(summary.is_success())
}
