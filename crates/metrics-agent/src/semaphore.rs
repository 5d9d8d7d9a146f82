// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

use crate::errors::Cancelled;

/// Caps the number of concurrently guarded sections at `max`.
#[derive(Debug, Clone)]
pub struct Semaphore {
    inner: Arc<tokio::sync::Semaphore>,
}

/// Held for the duration of a guarded section. Dropping it returns the permit, on every
/// exit path.
#[derive(Debug)]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
}

impl Semaphore {
    pub fn new(max: u32) -> Self {
        Self {
            inner: Arc::new(tokio::sync::Semaphore::new(max as usize)),
        }
    }

    /// Waits for one permit. A cancelled token wins over a free permit, so no permit is
    /// taken once `cancel` has fired.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Permit, Cancelled> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Cancelled),
            permit = Arc::clone(&self.inner).acquire_owned() => permit
                .map(|permit| Permit { _permit: permit })
                .map_err(|_| Cancelled),
        }
    }
}
