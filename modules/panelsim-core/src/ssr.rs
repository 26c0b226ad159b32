//! Semantic Similarity Rating (SSR) engine.
//!
//! Maps a free-text survey answer to a 5-point Likert probability
//! distribution by comparing its embedding against curated anchor
//! statements, instead of asking the model to self-rate.
//!
//! Per reference set: cosine similarity to each of the five anchors, shift
//! by the minimum similarity, add a small epsilon, optionally sharpen by
//! 1/T, then normalize. The per-set PMFs from all six reference sets are
//! averaged element-wise for robustness against anchor wording.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use panelsim_common::{PanelsimError, ANCHORS_PER_SET};

use crate::llm::LlmService;

/// Guard against a degenerate all-equal similarity vector normalizing a
/// zero vector.
const EPSILON: f64 = 1e-10;

/// How adjusted similarities become probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PmfNormalization {
    /// Probability is linear in adjusted similarity: doubling one anchor's
    /// adjusted similarity doubles its relative mass. The methodology's
    /// published formula.
    #[default]
    DirectProportional,
    /// Exponential (softmax) over temperature-scaled similarities.
    Softmax,
}

// ---------------------------------------------------------------------------
// Anchor embedding cache
// ---------------------------------------------------------------------------

/// Bounded LRU cache of anchor-set embeddings, keyed by the exact ordered
/// tuple of anchor strings. Anchor sets recur across personas and
/// questions, so this saves one embedding call per (persona, question,
/// reference set) after the first.
///
/// Safe under concurrent tasks: embeddings are computed outside the lock
/// and inserted if absent; the same key always maps to the same value, so
/// a race costs a redundant upstream call, never a wrong result.
pub struct AnchorCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    map: HashMap<Vec<String>, Vec<Vec<f32>>>,
    order: VecDeque<Vec<String>>,
}

impl AnchorCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub async fn get(&self, key: &[String]) -> Option<Vec<Vec<f32>>> {
        let mut inner = self.inner.lock().await;
        let value = inner.map.get(key).cloned()?;
        inner.order.retain(|k| k.as_slice() != key);
        inner.order.push_back(key.to_vec());
        Some(value)
    }

    /// Insert if absent, evicting the least recently used entry past
    /// capacity. A concurrent duplicate insert is ignored.
    pub async fn insert(&self, key: Vec<String>, value: Vec<Vec<f32>>) {
        let mut inner = self.inner.lock().await;
        if inner.map.contains_key(&key) {
            return;
        }
        inner.map.insert(key.clone(), value);
        inner.order.push_back(key);
        while inner.map.len() > self.capacity {
            let Some(evicted) = inner.order.pop_front() else {
                break;
            };
            inner.map.remove(&evicted);
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for AnchorCache {
    fn default() -> Self {
        Self::new(256)
    }
}

// ---------------------------------------------------------------------------
// SSR engine
// ---------------------------------------------------------------------------

pub struct SsrEngine {
    llm: Arc<LlmService>,
    /// Sharpening temperature: p(r,T) is proportional to p(r)^(1/T).
    /// T=1 is the identity; lower T concentrates mass on the best anchor.
    temperature: f64,
    normalization: PmfNormalization,
    anchor_cache: Arc<AnchorCache>,
}

impl SsrEngine {
    pub fn new(llm: Arc<LlmService>, temperature: f64, anchor_cache: Arc<AnchorCache>) -> Self {
        Self {
            llm,
            temperature,
            normalization: PmfNormalization::default(),
            anchor_cache,
        }
    }

    pub fn with_normalization(mut self, normalization: PmfNormalization) -> Self {
        self.normalization = normalization;
        self
    }

    /// Map a free-text response to a Likert PMF and its expected value.
    pub async fn map_response_to_likert(
        &self,
        response_text: &str,
        reference_sets: &[Vec<String>],
    ) -> Result<(Vec<f64>, f64), PanelsimError> {
        // Responses are unique per call; embed fresh every time.
        let response_embedding = self.llm.get_embedding(response_text).await?;

        let mut pmfs = Vec::with_capacity(reference_sets.len());
        for reference_set in reference_sets {
            let anchors = self.anchor_embeddings(reference_set).await?;
            pmfs.push(self.pmf_for_set(&response_embedding, &anchors));
        }

        let mut pmf = vec![0.0; ANCHORS_PER_SET];
        for set_pmf in &pmfs {
            for (slot, p) in pmf.iter_mut().zip(set_pmf) {
                *slot += p;
            }
        }
        for slot in pmf.iter_mut() {
            *slot /= pmfs.len() as f64;
        }

        let mean = expected_value(&pmf);

        Ok((pmf, mean))
    }

    async fn anchor_embeddings(
        &self,
        reference_set: &[String],
    ) -> Result<Vec<Vec<f32>>, PanelsimError> {
        if let Some(cached) = self.anchor_cache.get(reference_set).await {
            return Ok(cached);
        }

        debug!(anchors = reference_set.len(), "Anchor cache miss, embedding reference set");
        let embeddings = self.llm.get_embeddings(reference_set).await?;
        self.anchor_cache
            .insert(reference_set.to_vec(), embeddings.clone())
            .await;
        Ok(embeddings)
    }

    fn pmf_for_set(&self, response_embedding: &[f32], anchors: &[Vec<f32>]) -> Vec<f64> {
        let similarities: Vec<f64> = anchors
            .iter()
            .map(|anchor| cosine_similarity(response_embedding, anchor))
            .collect();

        let min_sim = similarities.iter().copied().fold(f64::INFINITY, f64::min);
        let adjusted: Vec<f64> = similarities
            .iter()
            .map(|s| s - min_sim + EPSILON)
            .collect();

        let weighted: Vec<f64> = match self.normalization {
            PmfNormalization::DirectProportional => {
                if self.temperature != 1.0 {
                    adjusted
                        .iter()
                        .map(|a| a.powf(1.0 / self.temperature))
                        .collect()
                } else {
                    adjusted
                }
            }
            PmfNormalization::Softmax => {
                let scaled: Vec<f64> =
                    adjusted.iter().map(|a| a / self.temperature).collect();
                let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                scaled.iter().map(|s| (s - max).exp()).collect()
            }
        };

        let total: f64 = weighted.iter().sum();
        weighted.iter().map(|w| w / total).collect()
    }
}

/// Cosine similarity between two vectors. A zero-norm vector has
/// similarity 0 against everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Expected Likert value of a PMF over the 1..5 scale.
pub fn expected_value(pmf: &[f64]) -> f64 {
    pmf.iter()
        .enumerate()
        .map(|(i, p)| (i + 1) as f64 * p)
        .sum()
}
