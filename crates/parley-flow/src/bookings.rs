// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bookings flow: service, date, time, confirmation, then `create_booking`.
//!
//! "cancel booking BK-n" is understood at any stage and calls
//! `cancel_booking` instead.
//!
//! The confirmation stage keeps the request key of the turn that entered it.
//! Every "yes" to the same confirmation creates under that key, so a booking
//! that took effect behind a timeout is found again instead of made twice.

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveTime};
use parley_core::{Domain, ParleyError, ToolCall};
use parley_tools::{ToolContext, ToolGateway, ToolOutcome};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::transition::{Created, Transition, create_with_recheck};

static CANCEL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bcancel\b.*?\b(BK-\d+)\b").expect("literal cancel pattern")
});

static TIME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{2}:\d{2}$").expect("literal time pattern"));

/// Persisted position in the bookings flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum BookingStage {
    Service,
    Date {
        service: String,
    },
    Time {
        service: String,
        date: NaiveDate,
    },
    Confirm {
        service: String,
        date: NaiveDate,
        time: NaiveTime,
        #[serde(default)]
        request_key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingEffect {
    Create {
        service: String,
        date: NaiveDate,
        time: NaiveTime,
        request_key: String,
    },
    Cancel {
        booking_id: String,
    },
}

pub fn initial_stage() -> BookingStage {
    BookingStage::Service
}

fn service_prompt(services: &[String]) -> String {
    format!("Which service would you like to book? We offer: {}.", services.join(", "))
}

fn match_service(input: &str, services: &[String]) -> Option<String> {
    let lowered = input.to_lowercase();
    services
        .iter()
        .find(|s| lowered.contains(&s.to_lowercase()))
        .cloned()
}

fn is_yes(input: &str) -> bool {
    matches!(
        input.trim().to_lowercase().as_str(),
        "yes" | "y" | "yeah" | "yep" | "confirm" | "ok" | "okay"
    )
}

fn is_no(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "no" | "n" | "nope")
}

/// Pure stage transition.
///
/// `fresh` is set when the flow was entered on this turn, so an input that
/// does not answer the first stage gets a greeting rather than a correction.
/// `request_key` is the current turn's key; it is pinned on entering
/// [`BookingStage::Confirm`].
pub fn transition(
    stage: &BookingStage,
    input: &str,
    fresh: bool,
    today: NaiveDate,
    services: &[String],
    request_key: &str,
) -> Transition<BookingStage, BookingEffect> {
    let input = input.trim();
    if let Some(caps) = CANCEL_PATTERN.captures(input) {
        return Transition::Effect(BookingEffect::Cancel {
            booking_id: caps[1].to_uppercase(),
        });
    }

    match stage {
        BookingStage::Service => match match_service(input, services) {
            Some(service) => Transition::stay(
                BookingStage::Date {
                    service: service.clone(),
                },
                format!("Great, {service}. Which date? Please use YYYY-MM-DD."),
            ),
            None if fresh || input.is_empty() => {
                Transition::stay(BookingStage::Service, service_prompt(services))
            }
            None => Transition::stay(
                BookingStage::Service,
                format!("Sorry, we don't offer that. {}", service_prompt(services)),
            ),
        },
        BookingStage::Date { service } => match NaiveDate::parse_from_str(input, "%Y-%m-%d") {
            Ok(date) if date < today => Transition::stay(
                stage.clone(),
                format!("{date} is in the past. Please pick a date from {today} on (YYYY-MM-DD)."),
            ),
            Ok(date) => Transition::stay(
                BookingStage::Time {
                    service: service.clone(),
                    date,
                },
                format!("And what time on {date}? Please use HH:MM, for example 14:30."),
            ),
            Err(_) => Transition::stay(
                stage.clone(),
                "Please send the date as YYYY-MM-DD, for example 2025-01-16.",
            ),
        },
        BookingStage::Time { service, date } => {
            let time = TIME_PATTERN
                .is_match(input)
                .then(|| NaiveTime::parse_from_str(input, "%H:%M").ok())
                .flatten();
            match time {
                Some(time) => Transition::stay(
                    BookingStage::Confirm {
                        service: service.clone(),
                        date: *date,
                        time,
                        request_key: request_key.to_string(),
                    },
                    format!(
                        "Book {service} on {date} at {}? Reply yes or no.",
                        time.format("%H:%M")
                    ),
                ),
                None => Transition::stay(
                    stage.clone(),
                    "Please send the time as HH:MM, for example 09:30.",
                ),
            }
        }
        BookingStage::Confirm {
            service,
            date,
            time,
            request_key: pinned,
        } => {
            if is_yes(input) {
                let request_key = if pinned.is_empty() { request_key } else { pinned };
                Transition::Effect(BookingEffect::Create {
                    service: service.clone(),
                    date: *date,
                    time: *time,
                    request_key: request_key.to_string(),
                })
            } else if is_no(input) {
                Transition::stay(
                    BookingStage::Service,
                    format!("No problem, let's start over. {}", service_prompt(services)),
                )
            } else {
                Transition::stay(stage.clone(), "Please reply yes to confirm or no to start over.")
            }
        }
    }
}

/// Runs a booking side effect and decides the next stage from its outcome.
pub async fn apply_effect(
    gateway: &ToolGateway,
    ctx: &ToolContext,
    stage: &BookingStage,
    effect: BookingEffect,
) -> Result<(Option<BookingStage>, String), ParleyError> {
    match effect {
        BookingEffect::Create {
            service,
            date,
            time,
            request_key,
        } => {
            let ctx = ToolContext {
                request_key,
                ..ctx.clone()
            };
            let call = ToolCall::new(
                "create_booking",
                json!({
                    "service": service,
                    "date": date.format("%Y-%m-%d").to_string(),
                    "time": time.format("%H:%M").to_string(),
                }),
            );
            match create_with_recheck(gateway, Domain::Bookings, &call, &ctx).await? {
                Created::Done(result) => Ok((None, confirmation(&result))),
                Created::Refused(reason) => Ok((
                    Some(BookingStage::Time { service, date }),
                    format!("Sorry, {reason}. Please pick another time (HH:MM)."),
                )),
                Created::Unknown => Ok((
                    Some(stage.clone()),
                    "I couldn't confirm your booking just now. Reply yes to check again.".into(),
                )),
            }
        }
        BookingEffect::Cancel { booking_id } => {
            let call = ToolCall::new("cancel_booking", json!({ "booking_id": booking_id }));
            match gateway.execute(Domain::Bookings, &call, ctx).await? {
                ToolOutcome::Success(_) => {
                    Ok((None, format!("Booking {booking_id} has been cancelled.")))
                }
                ToolOutcome::Failed(reason) => Ok((Some(stage.clone()), format!("Sorry, {reason}."))),
                ToolOutcome::Uncertain { .. } => Ok((
                    Some(stage.clone()),
                    format!("I couldn't confirm the cancellation of {booking_id}. Please try again."),
                )),
            }
        }
    }
}

fn confirmation(result: &Value) -> String {
    let booking = &result["booking"];
    format!(
        "You're booked: {} on {} at {}. Your booking id is {}.",
        booking["service"].as_str().unwrap_or("your appointment"),
        booking["date"].as_str().unwrap_or("the chosen date"),
        booking["time"].as_str().unwrap_or("the chosen time"),
        booking["booking_id"].as_str().unwrap_or("pending"),
    )
}
