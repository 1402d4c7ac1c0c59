// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `pinbridge` daemon.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pinbridge::{Bridge, CommandHandler, Config, MemoryDriver, MqttBroker, PinDriver};

#[derive(Parser, Debug)]
#[command(author, version, about = "Mirror GPIO pins to an MQTT broker")]
struct Args {
    /// Configuration file.
    #[arg(short, long, env = "PINBRIDGE_CONFIG", default_value = "pinbridge.toml")]
    config: PathBuf,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long)]
    verbose: bool,

    /// Broker password, overriding the configuration file.
    #[arg(long, env = "PINBRIDGE_MQTT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Simulate the pins in memory instead of claiming hardware.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config = Config::load(&args.config);
    init_logging(args.verbose || config.as_ref().is_ok_and(|config| config.verbose));

    let result = match config {
        Ok(config) => run(args, config).await,
        Err(e) => Err(e.into()),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "pinbridge stopped");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(args: Args, mut config: Config) -> pinbridge::Result<()> {
    if let Some(password) = args.password {
        config.broker.password = Some(password);
        config.validate()?;
    }

    let (handler, commands) = config.command_handler();
    let broker = build_broker(&config, handler)?;
    let driver = open_driver(args.dry_run)?;
    let mut bridge = Bridge::new(&config, driver, broker, commands)?;

    tracing::info!(
        host = %config.broker.host,
        port = config.broker.port,
        "Starting pinbridge"
    );

    bridge.run_until(shutdown_signal()).await;
    bridge.shutdown().await;
    Ok(())
}

/// Resolves on ctrl-c, or on SIGTERM where available.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Listening for ctrl-c failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Listening for SIGTERM failed");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("Shutting down");
}

fn build_broker(config: &Config, handler: CommandHandler) -> pinbridge::Result<MqttBroker> {
    let settings = &config.broker;
    let mut builder = MqttBroker::builder(handler)
        .host(settings.host.as_str())
        .port(settings.port)
        .keep_alive(Duration::from_secs(settings.keep_alive_secs));

    if let Some(client_id) = &settings.client_id {
        builder = builder.client_id(client_id.as_str());
    }
    if let Some(username) = &settings.username {
        builder = builder.credentials(
            username.as_str(),
            settings.password.as_deref().unwrap_or_default(),
        );
    }
    if let Some(tls) = &settings.tls {
        builder = builder.tls(tls.load()?);
    }

    Ok(builder.build()?)
}

fn open_driver(dry_run: bool) -> pinbridge::Result<Arc<dyn PinDriver>> {
    if dry_run {
        tracing::warn!("Dry run, pins are simulated in memory");
        return Ok(Arc::new(MemoryDriver::new()));
    }

    #[cfg(feature = "rppal")]
    {
        Ok(Arc::new(pinbridge::gpio::RppalDriver::new()?))
    }
    #[cfg(not(feature = "rppal"))]
    {
        tracing::warn!("Built without GPIO support, pins are simulated in memory");
        Ok(Arc::new(MemoryDriver::new()))
    }
}
