// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Customer memory records: named slots and embedded vector entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one customer's memory within a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerKey {
    pub project_id: String,
    pub customer_id: String,
}

impl CustomerKey {
    pub fn new(project_id: impl Into<String>, customer_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            customer_id: customer_id.into(),
        }
    }
}

/// A named slot value with its write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub key: String,
    pub value: String,
    pub written_at: DateTime<Utc>,
}

/// An embedded text snippet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub id: String,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Counts removed by a memory wipe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryCleared {
    pub slots: usize,
    pub vectors: usize,
}
