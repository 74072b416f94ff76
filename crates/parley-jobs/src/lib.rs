// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Asynchronous job subsystem.
//!
//! A job wraps one synchronous turn: `pending -> running -> {succeeded,
//! failed}`, with the terminal result written exactly once. Results are
//! available by polling and, when requested, pushed to a signed callback.

pub mod callback;
pub mod service;
pub mod worker;

pub use callback::{CallbackNotifier, Delivery};
pub use service::JobService;
pub use worker::{TurnRunner, WorkerPool};
