use anyhow::Result;
use async_trait::async_trait;

// =============================================================================
// Payload Types
// =============================================================================

/// A base64-encoded image plus its media type.
#[derive(Debug, Clone)]
pub struct ImageData {
    pub media_type: String,
    pub data: String,
}

/// A normalized video payload: either an inline base64 body or a remote URL
/// the provider fetches itself (e.g. YouTube links for Gemini-family models).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

impl VideoSource {
    /// The URL the provider should be handed: a data URL for inline bodies,
    /// the remote URL otherwise.
    pub fn provider_url(&self) -> String {
        match self {
            VideoSource::Base64 { media_type, data } => {
                format!("data:{media_type};base64,{data}")
            }
            VideoSource::Url { url } => url.clone(),
        }
    }
}

// =============================================================================
// Capability Traits
// =============================================================================

#[async_trait]
pub trait GenerateAgent: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String>;
}

#[async_trait]
pub trait VisionAgent: Send + Sync {
    async fn generate_with_images(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        images: &[ImageData],
        temperature: f32,
    ) -> Result<String>;
}

#[async_trait]
pub trait VideoAgent: Send + Sync {
    /// Video models take a single combined prompt rather than a
    /// system/user split.
    async fn generate_with_video(
        &self,
        prompt: &str,
        source: &VideoSource,
        temperature: f32,
    ) -> Result<String>;
}

#[async_trait]
pub trait EmbedAgent: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    async fn embed_single(&self, text: &str) -> Result<Vec<f32>>;
}
