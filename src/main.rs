//! promfwd - scrape Prometheus endpoints and forward each sample to Logstash.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use promfwd::config::{Args, Config};
use promfwd::format::EventFormatter;
use promfwd::host::HostInfo;
use promfwd::logging;
use promfwd::scheduler::Scheduler;
use promfwd::sink::HttpSink;
use promfwd::source::local::LocalStatsSource;
use promfwd::source::remote::RemoteScrapeSource;
use promfwd::source::Source;
use promfwd::status;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Exits with status 2, same as any other usage error
    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(e) => Args::command().error(ErrorKind::ValueValidation, e).exit(),
    };

    logging::init(config.log_level)?;

    let host = HostInfo::detect();
    info!(
        hostname = %host.hostname,
        remote_url = %config.remote_url,
        sink_url = %config.sink_url,
        "promfwd {} starting",
        env!("CARGO_PKG_VERSION")
    );

    let remote = RemoteScrapeSource::new(config.remote_url.clone(), config.targets.clone(), config.timeout)?;
    let local: Option<Box<dyn Source>> = if config.enable_local_stats {
        Some(Box::new(LocalStatsSource::new()))
    } else {
        None
    };
    let sink = HttpSink::new(config.sink_url.clone(), config.timeout)?;

    // Bind before the loop starts so a taken port is a start-up failure
    let listener = match config.status_addr {
        Some(addr) => Some(
            TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind status endpoint on {}", addr))?,
        ),
        None => None,
    };

    let scheduler = Scheduler::new(config, Box::new(remote), local, EventFormatter::new(host), Box::new(sink));

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let status_task = listener.map(|listener| {
        tokio::spawn(status::serve(listener, scheduler.subscribe(), shutdown.clone()))
    });

    scheduler.run(shutdown.clone()).await;

    if let Some(task) = status_task {
        shutdown.cancel();
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Status endpoint stopped with an error"),
            Err(e) => warn!(error = %e, "Status endpoint task failed"),
        }
    }

    Ok(())
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM
async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}
