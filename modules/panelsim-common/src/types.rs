use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::PanelsimError;

// ---------------------------------------------------------------------------
// Personas
// ---------------------------------------------------------------------------

/// A single persona attribute value. Personas are open, schema-less maps;
/// this is the closed set of primitives an attribute may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl AttrValue {
    /// Numeric view of the value. Strings parse if they look like numbers;
    /// booleans coerce to 1.0/0.0.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            AttrValue::String(s) => s.trim().parse().ok(),
            AttrValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::String(s) => write!(f, "{s}"),
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
        }
    }
}

/// A synthetic consumer profile: an open attribute map with one required
/// key, `persona_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Persona {
    pub attributes: BTreeMap<String, AttrValue>,
}

impl Persona {
    pub fn get(&self, field: &str) -> Option<&AttrValue> {
        self.attributes.get(field)
    }

    /// The persona's id in display form, if present.
    pub fn id(&self) -> Option<String> {
        self.attributes.get("persona_id").map(|v| v.to_string())
    }
}

// ---------------------------------------------------------------------------
// Concept
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    Video,
}

/// One content item of a product concept: text copy, a base64 image, or a
/// video reference (URL, storage URI, or inline base64).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// The product concept being evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    pub name: String,
    pub content: Vec<ContentItem>,
}

impl Concept {
    pub fn validate(&self) -> Result<(), PanelsimError> {
        if self.content.is_empty() {
            return Err(PanelsimError::validation(
                "Concept requires at least one content item",
            ));
        }
        Ok(())
    }

    pub fn has_images(&self) -> bool {
        self.content
            .iter()
            .any(|c| c.content_type == ContentType::Image)
    }

    pub fn has_video(&self) -> bool {
        self.content
            .iter()
            .any(|c| c.content_type == ContentType::Video)
    }
}

// ---------------------------------------------------------------------------
// Survey
// ---------------------------------------------------------------------------

pub const REFERENCE_SET_COUNT: usize = 6;
pub const ANCHORS_PER_SET: usize = 5;

/// A survey question with its SSR anchor statements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub weight: f64,
    /// Six sets of five anchor statements, one anchor per Likert point 1..5.
    pub ssr_reference_sets: Vec<Vec<String>>,
}

impl Question {
    pub fn validate(&self) -> Result<(), PanelsimError> {
        if !(0.0..=1.0).contains(&self.weight) {
            return Err(PanelsimError::validation(format!(
                "Question {}: weight must be between 0 and 1",
                self.id
            )));
        }
        if self.ssr_reference_sets.len() != REFERENCE_SET_COUNT {
            return Err(PanelsimError::validation(format!(
                "Question {}: must have exactly {} reference sets",
                self.id, REFERENCE_SET_COUNT
            )));
        }
        for (i, set) in self.ssr_reference_sets.iter().enumerate() {
            if set.len() != ANCHORS_PER_SET {
                return Err(PanelsimError::validation(format!(
                    "Question {}: reference set {} must have exactly {} anchors",
                    self.id, i, ANCHORS_PER_SET
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyConfig {
    pub questions: Vec<Question>,
}

impl SurveyConfig {
    pub fn validate(&self) -> Result<(), PanelsimError> {
        if self.questions.is_empty() {
            return Err(PanelsimError::validation(
                "At least one question is required",
            ));
        }
        for question in &self.questions {
            question.validate()?;
        }
        let total_weight: f64 = self.questions.iter().map(|q| q.weight).sum();
        if !(0.99..=1.01).contains(&total_weight) {
            return Err(PanelsimError::validation(format!(
                "Question weights must sum to 1.0, got {total_weight}"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// One persona's answer to one question: the raw generated text plus its
/// SSR-derived Likert distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub raw_text: String,
    pub pmf: Vec<f64>,
    pub mean: f64,
}

/// All answers for one persona, keyed by question id. Created once during
/// the generation phase, immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaResponse {
    pub persona_id: String,
    pub responses: BTreeMap<String, QuestionAnswer>,
}

// ---------------------------------------------------------------------------
// Metrics and scoring
// ---------------------------------------------------------------------------

/// Statistical metrics for a single question over the scored personas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionMetrics {
    pub n: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub top_2_box: f64,
    pub bottom_2_box: f64,
    /// Count of rounded-and-clamped Likert values, keyed "1".."5".
    pub distribution: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriteriaBreakdown {
    pub question_id: String,
    pub weight: f64,
    pub raw_mean: f64,
    pub normalized: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub passed: bool,
    pub composite_score: f64,
    pub threshold: f64,
    pub margin: f64,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Provider options
// ---------------------------------------------------------------------------

/// Per-request provider/model selections. Unset fields fall back to the
/// configured defaults at resolution time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub generation_provider: Option<String>,
    pub generation_model: Option<String>,
    pub generation_temperature: Option<f32>,
    pub embedding_provider: Option<String>,
    pub embedding_model: Option<String>,
    pub vision_provider: Option<String>,
    pub vision_model: Option<String>,
    pub video_provider: Option<String>,
    pub video_model: Option<String>,
}

/// Options with every field resolved against the config defaults.
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub generation_provider: String,
    pub generation_model: String,
    pub generation_temperature: f32,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub vision_provider: String,
    pub vision_model: String,
    pub video_provider: String,
    pub video_model: String,
}

impl Options {
    pub fn resolve(&self, config: &Config) -> ResolvedOptions {
        ResolvedOptions {
            generation_provider: self
                .generation_provider
                .clone()
                .unwrap_or_else(|| config.default_generation_provider.clone()),
            generation_model: self
                .generation_model
                .clone()
                .unwrap_or_else(|| config.default_generation_model.clone()),
            generation_temperature: self
                .generation_temperature
                .unwrap_or(config.default_temperature),
            embedding_provider: self
                .embedding_provider
                .clone()
                .unwrap_or_else(|| config.default_embedding_provider.clone()),
            embedding_model: self
                .embedding_model
                .clone()
                .unwrap_or_else(|| config.default_embedding_model.clone()),
            vision_provider: self
                .vision_provider
                .clone()
                .unwrap_or_else(|| config.default_vision_provider.clone()),
            vision_model: self
                .vision_model
                .clone()
                .unwrap_or_else(|| config.default_vision_model.clone()),
            video_provider: self
                .video_provider
                .clone()
                .unwrap_or_else(|| config.default_video_provider.clone()),
            video_model: self
                .video_model
                .clone()
                .unwrap_or_else(|| config.default_video_model.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response envelopes
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConceptRequest {
    pub personas: Vec<Persona>,
    pub concept: Concept,
    pub survey_config: SurveyConfig,
    pub threshold: f64,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default = "default_true")]
    pub verbose: bool,
    #[serde(default)]
    pub output_dataset: bool,
    #[serde(default)]
    pub include_report: bool,
    #[serde(default)]
    pub options: Options,
}

impl TestConceptRequest {
    /// Structural validation of everything except filter syntax (the filter
    /// engine owns that) and provider configuration (checked at setup).
    pub fn validate(&self) -> Result<(), PanelsimError> {
        if self.personas.is_empty() {
            return Err(PanelsimError::validation(
                "At least one persona is required",
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for persona in &self.personas {
            let id = persona
                .id()
                .ok_or_else(|| PanelsimError::validation("All personas must have a persona_id"))?;
            if !seen.insert(id.clone()) {
                return Err(PanelsimError::validation(format!(
                    "Duplicate persona_id: {id}"
                )));
            }
        }
        self.concept.validate()?;
        self.survey_config.validate()?;
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(PanelsimError::validation(
                "Threshold must be between 0 and 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub generation: String,
    pub embedding: String,
    pub vision: String,
    pub video: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub request_id: String,
    pub concept_name: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub providers: Option<ProviderInfo>,
}

/// A flattened per-persona dataset row: persona attributes, the filter
/// match flag, and per-question response columns.
pub type DatasetRow = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize)]
pub struct MinimalResponse {
    pub passed: bool,
    pub composite_score: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FullResponse {
    pub result: ResultSummary,
    pub filters_applied: Vec<String>,
    pub personas_total: usize,
    pub personas_matched: usize,
    pub criteria_breakdown: Vec<CriteriaBreakdown>,
    pub metrics: BTreeMap<String, QuestionMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<Vec<DatasetRow>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    pub meta: Meta,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TestResponse {
    Full(Box<FullResponse>),
    Minimal(MinimalResponse),
}
