// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Relays records from a continuously appended, cursor-addressable log source to a remote sink.
//!
//! The pipeline is made of three cooperating loops, wired together with channels and a single
//! shared cancellation token:
//!
//! ```text
//!   LogSource ──> Tailer ──(records)──> Publisher ──> RingBuffer ──> Sink
//!                                           │
//!                                       (cursors)
//!                                           v
//!                                  CheckpointPersister ──> cursor file
//! ```
//!
//! Delivery is at-least-once: the checkpoint only ever advances past records the sink has
//! acknowledged, and a restart resumes from the last durable checkpoint.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod constants;
pub mod errors;
pub mod forwarder;
pub mod publisher;
pub mod record;
pub mod ring;
pub mod sink;
pub mod source;
pub mod tailer;

pub use forwarder::{Forwarder, ForwarderHandle};
pub use record::Record;
