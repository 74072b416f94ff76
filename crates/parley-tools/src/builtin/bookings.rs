// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process booking service and its tools.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use parley_core::ParleyError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::tool::{Tool, ToolContext, ToolOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: String,
    pub project_id: String,
    pub customer_id: String,
    pub service: String,
    /// `YYYY-MM-DD`.
    pub date: String,
    /// `HH:MM`.
    pub time: String,
    pub status: BookingStatus,
    pub request_key: String,
}

#[derive(Default)]
struct Ledger {
    next_id: u64,
    bookings: BTreeMap<String, Booking>,
    by_request: HashMap<String, String>,
}

/// Deterministic appointment book.
///
/// Ids are `BK-1`, `BK-2`, ... in creation order. A confirmed booking holds its
/// service/date/time slot within a project until cancelled.
#[derive(Default)]
pub struct BookingDesk {
    ledger: Mutex<Ledger>,
}

/// Fields of a booking to create.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub service: String,
    pub date: String,
    pub time: String,
}

impl BookingDesk {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates a booking, or returns the one already created under `request_key`.
    ///
    /// Fails with a user-facing reason when the slot is taken.
    pub fn create(&self, ctx: &ToolContext, request: BookingRequest) -> Result<Booking, String> {
        let mut ledger = self.ledger();
        if let Some(existing) = ledger
            .by_request
            .get(&ctx.request_key)
            .and_then(|id| ledger.bookings.get(id))
        {
            return Ok(existing.clone());
        }
        let taken = ledger.bookings.values().any(|b| {
            b.status == BookingStatus::Confirmed
                && b.project_id == ctx.project_id
                && b.service == request.service
                && b.date == request.date
                && b.time == request.time
        });
        if taken {
            return Err(format!(
                "{} on {} at {} is already booked",
                request.service, request.date, request.time
            ));
        }

        ledger.next_id += 1;
        let booking = Booking {
            booking_id: format!("BK-{}", ledger.next_id),
            project_id: ctx.project_id.clone(),
            customer_id: ctx.customer_id.clone(),
            service: request.service,
            date: request.date,
            time: request.time,
            status: BookingStatus::Confirmed,
            request_key: ctx.request_key.clone(),
        };
        ledger
            .by_request
            .insert(booking.request_key.clone(), booking.booking_id.clone());
        ledger
            .bookings
            .insert(booking.booking_id.clone(), booking.clone());
        info!(booking_id = %booking.booking_id, customer_id = %booking.customer_id, "booking created");
        Ok(booking)
    }

    /// Cancels one of the calling customer's confirmed bookings.
    pub fn cancel(&self, ctx: &ToolContext, booking_id: &str) -> Result<Booking, String> {
        let mut ledger = self.ledger();
        let booking = ledger
            .bookings
            .get_mut(booking_id)
            .filter(|b| b.project_id == ctx.project_id && b.customer_id == ctx.customer_id)
            .ok_or_else(|| format!("no booking {booking_id} found for you"))?;
        if booking.status == BookingStatus::Cancelled {
            return Err(format!("booking {booking_id} is already cancelled"));
        }
        booking.status = BookingStatus::Cancelled;
        info!(booking_id, "booking cancelled");
        Ok(booking.clone())
    }

    pub fn find_by_request(&self, request_key: &str) -> Option<Booking> {
        let ledger = self.ledger();
        ledger
            .by_request
            .get(request_key)
            .and_then(|id| ledger.bookings.get(id))
            .cloned()
    }

    pub fn get(&self, booking_id: &str) -> Option<Booking> {
        self.ledger().bookings.get(booking_id).cloned()
    }
}

fn booking_json(booking: &Booking) -> Result<Value, ParleyError> {
    serde_json::to_value(booking)
        .map_err(|e| ParleyError::Internal(format!("booking encoding: {e}")))
}

/// `create_booking`: not idempotent on its own; checked with `find_booking`.
pub struct CreateBookingTool {
    desk: Arc<BookingDesk>,
    services: Vec<String>,
}

impl CreateBookingTool {
    pub fn new(desk: Arc<BookingDesk>, services: Vec<String>) -> Self {
        Self { desk, services }
    }
}

#[async_trait]
impl Tool for CreateBookingTool {
    fn name(&self) -> &str {
        "create_booking"
    }

    fn description(&self) -> &str {
        "Book a service at a date and time"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "service": { "type": "string", "enum": self.services },
                "date": { "type": "string", "pattern": "^[0-9]{4}-[0-9]{2}-[0-9]{2}$" },
                "time": { "type": "string", "pattern": "^[0-9]{2}:[0-9]{2}$" }
            },
            "required": ["service", "date", "time"]
        })
    }

    fn is_idempotent(&self) -> bool {
        false
    }

    fn lookup_tool(&self) -> Option<&str> {
        Some("find_booking")
    }

    async fn invoke(&self, ctx: &ToolContext, args: Value) -> Result<ToolOutput, ParleyError> {
        let request: BookingRequest = serde_json::from_value(args).map_err(|e| {
            ParleyError::Validation {
                message: format!("create_booking arguments: {e}"),
            }
        })?;
        match self.desk.create(ctx, request) {
            Ok(booking) => Ok(ToolOutput::ok(json!({ "booking": booking_json(&booking)? }))),
            Err(reason) => Ok(ToolOutput::error(reason)),
        }
    }
}

pub struct CancelBookingTool {
    desk: Arc<BookingDesk>,
}

impl CancelBookingTool {
    pub fn new(desk: Arc<BookingDesk>) -> Self {
        Self { desk }
    }
}

#[async_trait]
impl Tool for CancelBookingTool {
    fn name(&self) -> &str {
        "cancel_booking"
    }

    fn description(&self) -> &str {
        "Cancel one of the customer's bookings"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "booking_id": { "type": "string", "pattern": "^BK-[0-9]+$" }
            },
            "required": ["booking_id"]
        })
    }

    async fn invoke(&self, ctx: &ToolContext, args: Value) -> Result<ToolOutput, ParleyError> {
        let booking_id = args["booking_id"].as_str().unwrap_or_default();
        match self.desk.cancel(ctx, booking_id) {
            Ok(booking) => Ok(ToolOutput::ok(json!({ "booking": booking_json(&booking)? }))),
            Err(reason) => Ok(ToolOutput::error(reason)),
        }
    }
}

/// `find_booking`: answers `{found, booking?}` by request key or booking id.
pub struct FindBookingTool {
    desk: Arc<BookingDesk>,
}

impl FindBookingTool {
    pub fn new(desk: Arc<BookingDesk>) -> Self {
        Self { desk }
    }
}

#[async_trait]
impl Tool for FindBookingTool {
    fn name(&self) -> &str {
        "find_booking"
    }

    fn description(&self) -> &str {
        "Find a booking by the request that created it or by its id"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "request_key": { "type": "string", "minLength": 1 },
                "booking_id": { "type": "string", "pattern": "^BK-[0-9]+$" }
            },
            "minProperties": 1,
            "maxProperties": 1
        })
    }

    async fn invoke(&self, ctx: &ToolContext, args: Value) -> Result<ToolOutput, ParleyError> {
        let found = match (args["request_key"].as_str(), args["booking_id"].as_str()) {
            (Some(key), _) => self.desk.find_by_request(key),
            (_, Some(id)) => self.desk.get(id),
            _ => None,
        }
        .filter(|b| b.project_id == ctx.project_id && b.customer_id == ctx.customer_id);
        Ok(ToolOutput::ok(match found {
            Some(booking) => json!({ "found": true, "booking": booking_json(&booking)? }),
            None => json!({ "found": false }),
        }))
    }
}
