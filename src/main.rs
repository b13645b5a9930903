//! clearway daemon entry point
//!
//! # Usage
//!
//! ```bash
//! # Run with a configuration file
//! clearway -c /etc/clearway/config.json
//!
//! # Validate configuration and exit
//! clearway -c /etc/clearway/config.json --check
//! ```
//!
//! `SIGINT` and `SIGTERM` trigger a graceful shutdown with a one minute
//! deadline: the probe queue drains, every announced route is withdrawn
//! and the process exits zero. Startup validation failures exit non-zero.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use clearway::config::load_config_with_env;
use clearway::dns::{DnsProxy, UpstreamExchanger};
use clearway::governor::SiteGovernor;
use clearway::route::{RibSpeaker, RouteSpeaker};
use clearway::HttpProber;

/// Deadline for the signal-triggered graceful shutdown
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(60);

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/clearway/config.json");
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("clearway v{}", clearway::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("unknown argument: {other}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r"clearway v{}

DNS-observing censorship-circumvention router.

USAGE:
    clearway [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Configuration file path [default: /etc/clearway/config.json]
    --check                Validate configuration and exit
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Standard tracing filter, overrides the config level
    CLEARWAY_LOG_LEVEL     Override the log level
    CLEARWAY_UPSTREAM      Override the DNS upstream URI
",
        clearway::VERSION
    );
}

fn init_logging(level: &str) {
    let level: Level = level.parse().unwrap_or(Level::INFO);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("clearway={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config_with_env(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("unable to load config: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config.log.level);

    if args.check_config {
        println!("configuration ok");
        return;
    }

    if let Err(e) = serve(config).await {
        error!(error = %e, "startup failed");
        std::process::exit(1);
    }
}

async fn serve(config: clearway::Config) -> anyhow::Result<()> {
    info!(version = clearway::VERSION, "starting clearway");

    let speaker = Arc::new(RibSpeaker::new(config.route_config()));
    let prober =
        Arc::new(HttpProber::new(config.probe_config()).context("unable to create prober")?);

    let route_speaker: Arc<dyn RouteSpeaker> = speaker.clone() as Arc<dyn RouteSpeaker>;
    let governor = SiteGovernor::new(
        config.governor_config().context("unable to load domain lists")?,
        route_speaker,
        prober,
    );

    let sink: Arc<dyn clearway::dns::ObservationSink> =
        governor.clone() as Arc<dyn clearway::dns::ObservationSink>;
    let proxy = DnsProxy::new(
        config.server_config().context("invalid DNS server configuration")?,
        UpstreamExchanger::new(
            config.client_config().context("invalid DNS client configuration")?,
        ),
        config.observe_filters(),
        sink,
    );

    let cancel = CancellationToken::new();
    let governor_task = tokio::spawn(Arc::clone(&governor).run());

    let speaker_cancel = cancel.child_token();
    let speaker_run = Arc::clone(&speaker);
    let speaker_task = tokio::spawn(async move { speaker_run.run(speaker_cancel).await });

    let proxy_cancel = cancel.child_token();
    let mut proxy_task = tokio::spawn(async move { proxy.run(proxy_cancel).await });

    let mut sigint = signal(SignalKind::interrupt()).context("unable to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("unable to install SIGTERM handler")?;

    tokio::select! {
        _ = sigint.recv() => info!("shutting down gracefully on SIGINT"),
        _ = sigterm.recv() => info!("shutting down gracefully on SIGTERM"),
        result = &mut proxy_task => {
            match result {
                Ok(Ok(())) => anyhow::bail!("DNS proxy exited unexpectedly"),
                Ok(Err(e)) => return Err(e).context("DNS proxy failed"),
                Err(e) => return Err(e).context("DNS proxy task panicked"),
            }
        }
    }

    cancel.cancel();
    if let Err(e) = governor.shutdown(SHUTDOWN_DEADLINE).await {
        error!(error = %e, "governor shutdown incomplete");
    }

    let _ = tokio::time::timeout(Duration::from_secs(5), proxy_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), speaker_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), governor_task).await;

    info!("bye");
    Ok(())
}
