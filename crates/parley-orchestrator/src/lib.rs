// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turn orchestration for Parley.
//!
//! The [`Orchestrator`] composes the pieces of one inbound turn:
//! - the [`IdempotencyGuard`] deduplicates `(project_id, message_id)`
//! - the conversation is loaded (or created) and routed to a domain
//! - the flow engine runs on a copy and the result is committed by
//!   compare-and-swap, retrying the whole turn on a lost race
//!
//! [`Runtime`] assembles everything from configuration and
//! [`shutdown`] coordinates signal-driven draining.

pub mod guard;
pub mod runtime;
pub mod shutdown;
pub mod turn;

pub use guard::{Admission, IdempotencyGuard};
pub use runtime::{Adapters, Runtime};
pub use turn::Orchestrator;
