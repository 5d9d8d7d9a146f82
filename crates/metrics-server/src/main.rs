// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::Arc;

use metricstore::manager::Manager;
use metricstore::signal::wait_for_shutdown_signal;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use metrics_server::{config::Config, server, storage};

#[tokio::main]
pub async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid collector configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = format!("hyper=off,sqlx=warn,{}", config.log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let storage = match storage::open(&config).await {
        Ok(storage) => storage,
        Err(e) => {
            error!("Failed to open storage: {e}");
            std::process::exit(1);
        }
    };

    let listener = match config.socket_addr() {
        Ok(addr) => match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind {addr}: {e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let manager = Arc::new(Manager::with_lock_ttl(Arc::clone(&storage), config.lock_ttl));
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            shutdown.cancel();
        });
    }

    if let Err(e) = server::serve(listener, manager, shutdown).await {
        error!("Collector failed: {e}");
    }

    match storage.close().await {
        Ok(()) => info!("Storage closed"),
        Err(e) => error!("Failed to close storage: {e}"),
    }
}
