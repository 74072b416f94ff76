// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed replies for control commands and unroutable turns.

use parley_config::model::RouterConfig;
use parley_core::Domain;

/// Reply sent when an adapter stayed unavailable through its retries.
pub const TRY_AGAIN: &str =
    "Sorry, one of our services is not responding right now. Please try again in a moment.";

pub const GOODBYE: &str =
    "Okay, we're done here. Send a message any time if you need anything else.";

/// Menu and clarification texts, built once from the router's activation codes.
#[derive(Debug, Clone)]
pub struct Replies {
    menu: String,
}

impl Replies {
    pub fn from_router(config: &RouterConfig) -> Self {
        let mut menu = String::from("How can I help? Reply with one of:");
        for (domain, routing) in [
            (Domain::Bookings, &config.bookings),
            (Domain::Purchases, &config.purchases),
            (Domain::Claims, &config.claims),
        ] {
            match &routing.activation_code {
                Some(code) => menu.push_str(&format!("\n- {code}: {}", domain.label())),
                None => menu.push_str(&format!("\n- {}", domain.label())),
            }
        }
        if let Some(phrase) = config.menu_phrases.first() {
            menu.push_str(&format!("\nSend \"{phrase}\" at any time to come back here."));
        }
        Self { menu }
    }

    pub fn menu(&self) -> &str {
        &self.menu
    }

    pub fn clarify(&self) -> String {
        format!("Sorry, I didn't catch what you need. {}", self.menu)
    }

    pub fn goodbye(&self) -> &str {
        GOODBYE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_lists_activation_codes() {
        let replies = Replies::from_router(&RouterConfig::default());
        assert!(replies.menu().contains("- BOOK: Bookings"));
        assert!(replies.menu().contains("- SHOP: Purchases"));
        assert!(replies.menu().contains("- CLAIM: Claims"));
        assert!(replies.menu().contains("\"menu\""));
        assert!(replies.clarify().starts_with("Sorry"));
    }
}
