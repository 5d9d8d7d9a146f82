// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity buffer between collection and delivery.
//!
//! A full queue suspends (or fails, in [`PushMode::Deadline`]) the pusher; popping never
//! waits.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use crate::errors::{Cancelled, QueueError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMode {
    /// Wait for free capacity until cancelled.
    Wait,
    /// Give up with [`QueueError::Timeout`] if the queue stays full this long.
    Deadline(Duration),
}

#[derive(Debug)]
pub struct BoundedQueue<T> {
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
    mode: PushMode,
}

impl<T: Clone + Send> BoundedQueue<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize, mode: PushMode) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            mode,
        }
    }

    pub async fn push(&self, item: T, cancel: &CancellationToken) -> Result<(), QueueError> {
        let send = self.tx.send(item);
        match self.mode {
            PushMode::Wait => tokio::select! {
                biased;
                sent = send => sent.map_err(|_| QueueError::Closed),
                () = cancel.cancelled() => Err(Cancelled.into()),
            },
            PushMode::Deadline(deadline) => tokio::select! {
                biased;
                sent = tokio::time::timeout(deadline, send) => match sent {
                    Ok(sent) => sent.map_err(|_| QueueError::Closed),
                    Err(_) => Err(QueueError::Timeout(deadline)),
                },
                () = cancel.cancelled() => Err(Cancelled.into()),
            },
        }
    }

    /// Enqueues a copy of each item in order, stopping at the first failure.
    pub async fn push_batch(&self, items: &[T], cancel: &CancellationToken) -> Result<(), QueueError> {
        for item in items {
            self.push(item.clone(), cancel).await?;
        }
        Ok(())
    }

    /// Takes up to `max` items without waiting for more to arrive.
    pub fn pop_batch(&self, max: usize) -> Vec<T> {
        #[allow(clippy::expect_used)]
        let mut rx = self.rx.lock().expect("lock poisoned");
        let mut batch = Vec::with_capacity(max.min(self.len_hint()));
        while batch.len() < max {
            match rx.try_recv() {
                Ok(item) => batch.push(item),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        batch
    }

    /// Approximate number of queued items. Pushes that are mid-flight may already be
    /// counted.
    pub fn count(&self) -> usize {
        self.len_hint()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    fn len_hint(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}
