// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Push agent: samples metrics on a fixed period, buffers them in a bounded queue and
//! delivers them in batches to a collector with bounded concurrency and retries.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod collector;
pub mod config;
pub mod errors;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod semaphore;
pub mod transport;
