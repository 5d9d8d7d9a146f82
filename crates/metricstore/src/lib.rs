// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric data model, merge rules and storage engine for the collector side of the
//! push pipeline.
//!
//! The crate is split along the data flow:
//! - [`metric`]: typed samples, text/wire factory and the merge rule
//! - [`wire`]: request and error payload shapes shared with the agent
//! - [`storage`]: the kind-agnostic storage contract and its backends
//! - [`manager`]: applies Counter accumulation on top of a storage backend
//! - [`named_mutex`]: per-key locks with idle eviction
//! - [`signal`]: termination signals for the binaries

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod errors;
pub mod manager;
pub mod metric;
pub mod named_mutex;
pub mod signal;
pub mod storage;
pub mod wire;
