// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock embedding adapter with hand-picked vectors.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use parley_core::types::{AdapterType, EmbeddingInput, EmbeddingOutput, HealthStatus};
use parley_core::{EmbeddingAdapter, ParleyError, PluginAdapter};

/// An embedder that maps known texts to fixed vectors.
///
/// Unknown texts embed to the zero vector, which is dissimilar to everything.
#[derive(Clone)]
pub struct MockEmbedder {
    dimensions: usize,
    vectors: Arc<HashMap<String, Vec<f32>>>,
    calls: Arc<AtomicUsize>,
}

impl MockEmbedder {
    pub fn new<I, S>(dimensions: usize, vectors: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        Self {
            dimensions,
            vectors: Arc::new(
                vectors
                    .into_iter()
                    .map(|(text, mut v)| {
                        v.resize(dimensions, 0.0);
                        (text.into(), v)
                    })
                    .collect(),
            ),
            calls: Arc::default(),
        }
    }

    /// Number of `embed` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PluginAdapter for MockEmbedder {
    fn name(&self) -> &str {
        "mock-embedder"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Embedding
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl EmbeddingAdapter for MockEmbedder {
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, ParleyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let embeddings = input
            .texts
            .iter()
            .map(|text| {
                self.vectors
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0; self.dimensions])
            })
            .collect();
        Ok(EmbeddingOutput {
            embeddings,
            dimensions: self.dimensions,
        })
    }
}
