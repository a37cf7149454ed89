//! Gateway process entry point (A4): parses CLI/config, acquires the
//! single-instance lock, connects to the broker, binds the client listener,
//! and runs [`tradegate::gateway::GatewayCore`] until a shutdown signal.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{oneshot, watch};
use tracing::{error, info};

use tradegate::broker::BrokerClient;
use tradegate::config;
use tradegate::error::InitError;
use tradegate::gateway::{GatewayCore, ShutdownReason, Signals};
use tradegate::gateway::lock::LockGuard;

/// Gateway process CLI.
#[derive(Debug, Parser)]
struct Cli {
    /// Optional `KEY=VALUE` configuration file, merged under the process
    /// environment (environment variables take precedence).
    #[arg(long)]
    config_file: Option<PathBuf>,
    /// Path to the single-instance advisory lock file.
    #[arg(long, default_value = "/var/run/tradegate-gateway.lock")]
    lock_file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let _lock = match LockGuard::acquire(&cli.lock_file) {
        Ok(lock) => lock,
        Err(err) => {
            error!(error = %err, "failed to acquire single-instance lock");
            return ExitCode::FAILURE;
        }
    };

    let cfg = match config::load_gateway_config(cli.config_file.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load gateway configuration");
            return ExitCode::FAILURE;
        }
    };

    let broker = match BrokerClient::new(&cfg.broker) {
        Ok(broker) => broker,
        Err(err) => {
            error!(error = %err, "failed to construct broker client");
            return ExitCode::FAILURE;
        }
    };

    let (consumer_stop_tx, consumer_stop_rx) = watch::channel(false);
    let (broker_rx, consumer_handle) = match broker.spawn_consumer(
        &cfg.broker.order_to_gateway_topic,
        &cfg.consumer_group_id,
        consumer_stop_rx,
    ) {
        Ok(parts) => parts,
        Err(err) => {
            error!(error = %err, "failed to start order->gateway consumer");
            return ExitCode::FAILURE;
        }
    };

    let bind_addr = format!("{}:{}", cfg.server_ip, cfg.server_port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            let err = InitError::BindFailure(err);
            error!(error = %err, %bind_addr, "failed to bind client listener");
            return ExitCode::FAILURE;
        }
    };
    info!(%bind_addr, "gateway listening");

    let signals = install_signals();
    let core = GatewayCore::new(broker, cfg, cli.config_file);
    core.run(listener, broker_rx, signals).await;

    let _ = consumer_stop_tx.send(true);
    if let Err(err) = consumer_handle.await {
        error!(error = %err, "order->gateway consumer task panicked");
    }

    ExitCode::SUCCESS
}

fn install_signals() -> Signals {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let (reload_tx, reload_rx) = watch::channel(());
    tokio::spawn(async move {
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut usr1 = signal(SignalKind::user_defined1()).expect("failed to install SIGUSR1 handler");
        let mut usr2 = signal(SignalKind::user_defined2()).expect("failed to install SIGUSR2 handler");
        let mut shutdown_tx = Some(shutdown_tx);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    if let Some(tx) = shutdown_tx.take() {
                        let _ = tx.send(ShutdownReason::Terminate);
                    }
                    break;
                }
                _ = term.recv() => {
                    if let Some(tx) = shutdown_tx.take() {
                        let _ = tx.send(ShutdownReason::Terminate);
                    }
                    break;
                }
                _ = usr2.recv() => {
                    if let Some(tx) = shutdown_tx.take() {
                        let _ = tx.send(ShutdownReason::UserShutdown);
                    }
                    break;
                }
                _ = usr1.recv() => {
                    let _ = reload_tx.send(());
                }
            }
        }
    });
    Signals {
        shutdown: shutdown_rx,
        reload: reload_rx,
    }
}
