// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process domain tools.
//!
//! These are always available; hook-backed tools are added only when a hook
//! endpoint is configured.

pub mod bookings;
pub mod claims;
pub mod notes;

pub use bookings::{
    Booking, BookingDesk, BookingStatus, CancelBookingTool, CreateBookingTool, FindBookingTool,
};
pub use claims::{Claim, ClaimDesk, OpenClaimTool};
pub use notes::{RecallNotesTool, RememberNoteTool};

use std::sync::Arc;

use parley_core::ParleyError;
use parley_memory::CustomerMemory;

use crate::ToolRegistry;

/// Registers every in-process tool into `registry`.
pub fn register_builtins(
    registry: &mut ToolRegistry,
    bookings: &Arc<BookingDesk>,
    claims: &Arc<ClaimDesk>,
    memory: &Arc<CustomerMemory>,
    booking_services: Vec<String>,
) -> Result<(), ParleyError> {
    registry.register(Arc::new(CreateBookingTool::new(
        Arc::clone(bookings),
        booking_services,
    )))?;
    registry.register(Arc::new(CancelBookingTool::new(Arc::clone(bookings))))?;
    registry.register(Arc::new(FindBookingTool::new(Arc::clone(bookings))))?;
    registry.register(Arc::new(OpenClaimTool::new(Arc::clone(claims))))?;
    registry.register(Arc::new(RememberNoteTool::new(Arc::clone(memory))))?;
    registry.register(Arc::new(RecallNotesTool::new(Arc::clone(memory))))?;
    Ok(())
}
