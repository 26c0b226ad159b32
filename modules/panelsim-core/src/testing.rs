//! Test mocks for the evaluation pipeline.
//!
//! One mock per capability boundary:
//! - MockGenerator (GenerateAgent) — scripted text, call counting, and
//!   instantaneous in-flight tracking for concurrency assertions
//! - MockVision (VisionAgent) / MockVideo (VideoAgent) — call counters
//! - FixedEmbedder (EmbedAgent) — registered text→vector mappings with a
//!   deterministic hash-based fallback
//!
//! Plus helpers for assembling an `LlmService` from mocks and building
//! request fixtures.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use ai_client::{EmbedAgent, GenerateAgent, ImageData, VideoAgent, VideoSource, VisionAgent};
use panelsim_common::{
    AttrValue, Concept, Config, ContentItem, ContentType, Options, Persona, Question,
    ResolvedOptions, SurveyConfig, TestConceptRequest, REFERENCE_SET_COUNT,
};

use crate::llm::LlmService;
use crate::video::VideoResolver;

/// Standard embedding dimension for test vectors.
pub const TEST_EMBEDDING_DIM: usize = 16;

// ---------------------------------------------------------------------------
// MockGenerator
// ---------------------------------------------------------------------------

/// Scripted text generator. Tracks total calls and the peak number of
/// concurrently in-flight calls.
pub struct MockGenerator {
    response: String,
    delay: Option<Duration>,
    fail: bool,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockGenerator {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            delay: None,
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Hold each call open for `millis` so overlapping calls overlap.
    pub fn with_delay(mut self, millis: u64) -> Self {
        self.delay = Some(Duration::from_millis(millis));
        self
    }

    /// Fail every call with a provider-style error.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn max_in_flight(&self) -> Arc<AtomicUsize> {
        self.max_in_flight.clone()
    }
}

#[async_trait]
impl GenerateAgent for MockGenerator {
    async fn generate(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _temperature: f32,
    ) -> Result<String> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail {
            bail!("mock upstream generation failure");
        }
        Ok(self.response.clone())
    }
}

// ---------------------------------------------------------------------------
// MockVision / MockVideo
// ---------------------------------------------------------------------------

pub struct MockVision {
    response: String,
    calls: Arc<AtomicUsize>,
}

impl MockVision {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl VisionAgent for MockVision {
    async fn generate_with_images(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _images: &[ImageData],
        _temperature: f32,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

pub struct MockVideo {
    response: String,
    calls: Arc<AtomicUsize>,
}

impl MockVideo {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl VideoAgent for MockVideo {
    async fn generate_with_video(
        &self,
        _prompt: &str,
        _source: &VideoSource,
        _temperature: f32,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

// ---------------------------------------------------------------------------
// FixedEmbedder
// ---------------------------------------------------------------------------

/// Deterministic embedder. Registered texts get exact vectors; unmatched
/// texts get a unique hash-based unit vector.
pub struct FixedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    dimension: usize,
    batch_calls: Arc<AtomicUsize>,
    single_calls: Arc<AtomicUsize>,
}

impl FixedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            vectors: HashMap::new(),
            dimension,
            batch_calls: Arc::new(AtomicUsize::new(0)),
            single_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Register a text→vector mapping for controlled similarity.
    pub fn on_text(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub fn batch_calls(&self) -> Arc<AtomicUsize> {
        self.batch_calls.clone()
    }

    pub fn single_calls(&self) -> Arc<AtomicUsize> {
        self.single_calls.clone()
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(vector) = self.vectors.get(text) {
            return vector.clone();
        }
        self.hash_vector(text)
    }

    /// Generate a deterministic hash-based vector for unmatched text.
    fn hash_vector(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();

        let mut vec = vec![0.0f32; self.dimension];
        let mut state = seed;
        for v in vec.iter_mut() {
            // Simple LCG PRNG
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            *v = ((state >> 33) as f32 / u32::MAX as f32) * 2.0 - 1.0;
        }
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vec.iter_mut() {
                *v /= norm;
            }
        }
        vec
    }
}

#[async_trait]
impl EmbedAgent for FixedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector_for(text))
    }
}

// ---------------------------------------------------------------------------
// Service assembly helpers
// ---------------------------------------------------------------------------

pub fn default_options() -> ResolvedOptions {
    Options::default().resolve(&Config::default())
}

/// LLM service with a scripted generator and the given embedder.
pub fn service_with_embedder(embedder: FixedEmbedder) -> LlmService {
    LlmService::from_parts(
        Arc::new(MockGenerator::new("a generated response")),
        None,
        None,
        Arc::new(embedder),
        Arc::new(VideoResolver::new()),
        default_options(),
    )
}

/// Fully mocked LLM service for orchestrator tests.
pub fn mock_service(
    generation: Arc<dyn GenerateAgent>,
    vision: Option<Arc<dyn VisionAgent>>,
    video: Option<Arc<dyn VideoAgent>>,
) -> Arc<LlmService> {
    Arc::new(LlmService::from_parts(
        generation,
        vision,
        video,
        Arc::new(FixedEmbedder::new(TEST_EMBEDDING_DIM)),
        Arc::new(VideoResolver::new()),
        default_options(),
    ))
}

// ---------------------------------------------------------------------------
// Fixture builders
// ---------------------------------------------------------------------------

pub fn persona(id: &str, pairs: &[(&str, AttrValue)]) -> Persona {
    let mut attributes = BTreeMap::new();
    attributes.insert("persona_id".to_string(), AttrValue::String(id.to_string()));
    for (key, value) in pairs {
        attributes.insert(key.to_string(), value.clone());
    }
    Persona { attributes }
}

pub fn question(id: &str, weight: f64) -> Question {
    let anchors: Vec<String> = [
        "I would definitely not buy this",
        "I would probably not buy this",
        "I might or might not buy this",
        "I would probably buy this",
        "I would definitely buy this",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    Question {
        id: id.to_string(),
        text: "How likely are you to buy this product?".to_string(),
        weight,
        ssr_reference_sets: vec![anchors; REFERENCE_SET_COUNT],
    }
}

pub fn text_concept() -> Concept {
    Concept {
        name: "Solar Backpack".to_string(),
        content: vec![ContentItem {
            content_type: ContentType::Text,
            data: "A backpack with an integrated solar charging panel.".to_string(),
            label: None,
        }],
    }
}

pub fn request(personas: Vec<Persona>, questions: Vec<Question>) -> TestConceptRequest {
    TestConceptRequest {
        personas,
        concept: text_concept(),
        survey_config: SurveyConfig { questions },
        threshold: 0.0,
        filters: vec![],
        verbose: true,
        output_dataset: false,
        include_report: false,
        options: Options::default(),
    }
}
