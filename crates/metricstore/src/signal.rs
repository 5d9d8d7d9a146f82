// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process termination signals shared by the agent and collector binaries.

use tracing::{error, info};

/// Listeners for SIGHUP, SIGINT, SIGTERM and SIGQUIT, installed together.
///
/// Once installed, these signals no longer terminate the process.
#[cfg(unix)]
pub struct ShutdownSignals {
    streams: Vec<(&'static str, tokio::signal::unix::Signal)>,
}

#[cfg(unix)]
impl ShutdownSignals {
    pub fn install() -> Self {
        use tokio::signal::unix::{signal, SignalKind};

        let kinds = [
            ("SIGHUP", SignalKind::hangup()),
            ("SIGINT", SignalKind::interrupt()),
            ("SIGTERM", SignalKind::terminate()),
            ("SIGQUIT", SignalKind::quit()),
        ];
        let mut streams = Vec::with_capacity(kinds.len());
        for (name, kind) in kinds {
            match signal(kind) {
                Ok(stream) => streams.push((name, stream)),
                Err(e) => error!("Failed to listen for {name}: {e}"),
            }
        }
        Self { streams }
    }

    /// Waits for the first signal and returns its name.
    pub async fn recv(mut self) -> &'static str {
        if self.streams.is_empty() {
            error!("No signal handlers installed, falling back to Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
        let (received, _, _) =
            futures::future::select_all(self.streams.iter_mut().map(|(name, stream)| {
                Box::pin(async move {
                    stream.recv().await;
                    *name
                })
            }))
            .await;
        received
    }
}

/// Resolves once the process is asked to terminate.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() {
    let received = ShutdownSignals::install().recv().await;
    info!("Received {received}, initiating shutdown");
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating shutdown"),
        Err(e) => error!("Failed to listen for Ctrl+C: {e}"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_hangup_is_reported() {
        let signals = ShutdownSignals::install();
        let status = std::process::Command::new("kill")
            .args(["-HUP", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let received = tokio::time::timeout(Duration::from_secs(5), signals.recv())
            .await
            .expect("no signal observed");
        assert_eq!(received, "SIGHUP");
    }
}
