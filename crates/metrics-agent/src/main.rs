// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::Arc;

use metricstore::signal::wait_for_shutdown_signal;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use metrics_agent::{
    collector::CollectorSet, config::Config, pipeline::Agent, transport::HttpTransport,
};

#[tokio::main]
pub async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid agent configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = format!("h2=off,hyper=off,reqwest=warn,rustls=off,{}", config.log_level);

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

    let transport = match HttpTransport::new(&config.address, config.send_timeout) {
        Ok(transport) => transport,
        Err(e) => {
            error!("Failed to create transport: {e}");
            return;
        }
    };
    info!("Pushing metrics to {}", transport.url());

    let agent = Agent::new(&config, CollectorSet::with_defaults(), Arc::new(transport));
    let handle = agent.handle();

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        handle.shutdown();
    });

    agent.run().await;
}
