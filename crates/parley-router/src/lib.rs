// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain routing for the Parley orchestration engine.
//!
//! This crate provides:
//! - [`DomainClassifier`]: keyword and regex scoring per domain (zero-cost, zero-latency)
//! - [`DomainRouter`]: activation codes, control phrases, active-domain
//!   stickiness and an optional LLM fallback
//!
//! The router runs before any flow logic and never drops a turn: when no
//! domain can be determined it routes to clarification.

pub mod classifier;
pub mod router;

pub use classifier::{ClassificationResult, DomainClassifier};
pub use router::{RouteDecision, RouteSource, RouteTarget, DomainRouter, parse_llm_domain};
