// SPDX-License-Identifier: Apache-2.0

use std::process::ExitCode;

use clap::Parser;
use loadctl_lib::cli::Cli;
use loadctl_lib::common::HttpJsonFetcher;
use loadctl_lib::config::Config;
use loadctl_lib::{observability, resolve_config, BootstrapResult, ControlPlane};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

async fn run(cli: Cli) -> BootstrapResult<()> {
    // The log settings live in the document itself, so read it once unresolved.
    let raw = Config::from_file(&cli.config)?;
    let _guard = observability::init_tracing(&raw.app)?;

    if !cli.check {
        let fetcher = HttpJsonFetcher::new()?;
        let config = resolve_config(&cli.config, &fetcher).await?;
        println!("{}", config);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let plane = ControlPlane::open(&cli.config, cancel).await?;
    let version = plane.server_version().await?;
    info!(version = %version, "cluster reachable");
    println!("{}", plane.config());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "loadctl failed");
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}
