// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent orchestration: collection and delivery loops over one queue, then a bounded
//! drain on shutdown.
//!
//! ```text
//!  Running ──(shutdown)──> Draining ──(queue empty or timeout)──> Terminated
//! ```
//!
//! Two tokens drive the lifecycle. The shutdown token stops both loops and any pusher
//! blocked on a full queue. The delivery token governs in-flight deliveries and their
//! retries; it only fires when the drain deadline passes, so batches already in flight
//! get the whole drain window to finish.

use std::sync::Arc;
use std::time::Duration;

use metricstore::metric::Metric;
use metricstore::wire::MetricPayload;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collector::CollectorSet;
use crate::config::Config;
use crate::errors::DeliveryError;
use crate::queue::{BoundedQueue, PushMode};
use crate::retry::{retry, RetryOptions};
use crate::semaphore::Semaphore;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Running,
    Draining,
    Terminated,
}

/// Handle to a running agent, used for sending shutdown signals
#[derive(Clone)]
pub struct AgentHandle {
    shutdown_token: CancellationToken,
}

impl AgentHandle {
    /// Request a graceful shutdown of the agent
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }
}

/// Sends one batch with a per-attempt timeout and retries.
#[derive(Clone)]
struct Deliverer {
    transport: Arc<dyn Transport>,
    retry: RetryOptions,
    send_timeout: Duration,
}

impl Deliverer {
    async fn deliver(&self, batch: &[Metric], cancel: &CancellationToken) -> Result<(), DeliveryError> {
        let payloads: Vec<MetricPayload> = batch.iter().map(MetricPayload::from).collect();
        let payloads = payloads.as_slice();
        let transport = &self.transport;
        let send_timeout = self.send_timeout;

        retry(
            &self.retry,
            cancel,
            move || async move {
                match tokio::time::timeout(send_timeout, transport.send(payloads)).await {
                    Ok(result) => result,
                    Err(_) => Err(DeliveryError::Timeout(send_timeout)),
                }
            },
            Some(&DeliveryError::is_retryable),
        )
        .await
    }
}

pub struct Agent {
    collectors: CollectorSet,
    queue: Arc<BoundedQueue<Metric>>,
    semaphore: Semaphore,
    deliverer: Deliverer,
    poll_interval: Duration,
    report_interval: Duration,
    batch_size: usize,
    shutdown_timeout: Duration,
    state: watch::Sender<AgentState>,
    shutdown_token: CancellationToken,
    delivery_token: CancellationToken,
}

impl Agent {
    pub fn new(config: &Config, collectors: CollectorSet, transport: Arc<dyn Transport>) -> Self {
        let (state, _) = watch::channel(AgentState::Running);
        Self {
            collectors,
            queue: Arc::new(BoundedQueue::new(config.queue_capacity, PushMode::Wait)),
            semaphore: Semaphore::new(config.rate_limit),
            deliverer: Deliverer {
                transport,
                retry: config.retry_options(),
                send_timeout: config.send_timeout,
            },
            poll_interval: config.poll_interval,
            report_interval: config.report_interval,
            batch_size: config.batch_size,
            shutdown_timeout: config.shutdown_timeout,
            state,
            shutdown_token: CancellationToken::new(),
            delivery_token: CancellationToken::new(),
        }
    }

    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            shutdown_token: self.shutdown_token.clone(),
        }
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Receiver notified on every state transition.
    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    pub fn queue(&self) -> &Arc<BoundedQueue<Metric>> {
        &self.queue
    }

    /// Runs until shutdown is requested, then drains the queue and returns once the drain
    /// completes or the shutdown timeout elapses.
    pub async fn run(&self) {
        info!(
            "Agent started: {} collectors, poll every {:?}, report every {:?}",
            self.collectors.len(),
            self.poll_interval,
            self.report_interval
        );

        let mut tasks = JoinSet::new();
        tokio::join!(self.collection_loop(), self.delivery_loop(&mut tasks));

        self.transition(AgentState::Draining);
        self.drain(tasks).await;
        self.transition(AgentState::Terminated);
        info!("Agent stopped");
    }

    fn transition(&self, next: AgentState) {
        let previous = self.state.send_replace(next);
        debug!("Agent state {previous:?} -> {next:?}");
    }

    async fn collection_loop(&self) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.tick().await; // discard first tick, which is instantaneous
        loop {
            tokio::select! {
                _ = interval.tick() => self.collect_once().await,
                () = self.shutdown_token.cancelled() => {
                    debug!("Collection loop stopped");
                    break;
                }
            }
        }
    }

    async fn collect_once(&self) {
        let round = self.collectors.collect().await;
        if let Some(e) = &round.error {
            warn!("{} collectors failed this round, first error: {e}", round.failed);
        }
        if round.metrics.is_empty() {
            return;
        }
        if let Err(e) = self
            .queue
            .push_batch(&round.metrics, &self.shutdown_token)
            .await
        {
            warn!("Failed to enqueue collected metrics: {e}");
        }
    }

    async fn delivery_loop(&self, tasks: &mut JoinSet<()>) {
        let mut interval = tokio::time::interval(self.report_interval);
        interval.tick().await; // discard first tick, which is instantaneous
        loop {
            tokio::select! {
                _ = interval.tick() => self.dispatch(tasks, &self.shutdown_token).await,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
                () = self.shutdown_token.cancelled() => {
                    debug!("Delivery loop stopped");
                    break;
                }
            }
        }
    }

    /// Spawns delivery tasks until the queue is empty. Each task holds a semaphore permit
    /// until it finishes, so at most `rate_limit` deliveries run at once.
    async fn dispatch(&self, tasks: &mut JoinSet<()>, acquire_token: &CancellationToken) {
        while self.queue.count() > 0 {
            let Ok(permit) = self.semaphore.acquire(acquire_token).await else {
                debug!("Stopped dispatching, acquire cancelled");
                return;
            };
            let batch = self.queue.pop_batch(self.batch_size);
            if batch.is_empty() {
                break;
            }

            let deliverer = self.deliverer.clone();
            let cancel = self.delivery_token.clone();
            tasks.spawn(async move {
                let _permit = permit;
                match deliverer.deliver(&batch, &cancel).await {
                    Ok(()) => debug!("Delivered batch of {} metrics", batch.len()),
                    Err(e) => error!("Dropping batch of {} metrics: {e}", batch.len()),
                }
            });
        }
    }

    async fn drain(&self, mut tasks: JoinSet<()>) {
        let queued = self.queue.count();
        info!(
            "Draining {queued} queued metrics and {} in-flight deliveries",
            tasks.len()
        );

        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            self.dispatch(&mut tasks, &self.delivery_token).await;
            while let Some(joined) = tasks.join_next().await {
                log_join(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "Shutdown timeout of {:?} elapsed, abandoning {} queued metrics and {} deliveries",
                self.shutdown_timeout,
                self.queue.count(),
                tasks.len()
            );
            self.delivery_token.cancel();
            tasks.shutdown().await;
        } else {
            debug!("Drain complete");
        }
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!("Delivery task failed: {e}");
    }
}
