// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules for each logical table.

pub mod conversations;
pub mod events;
pub mod jobs;
pub mod memory;
