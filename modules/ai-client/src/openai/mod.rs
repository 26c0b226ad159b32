mod client;
pub(crate) mod types;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::traits::{EmbedAgent, GenerateAgent, ImageData, VisionAgent};

use client::OpenAiClient;
use types::*;

// =============================================================================
// OpenAi Agent
// =============================================================================

#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    model: String,
    embedding_model: String,
    max_tokens: u32,
    base_url: Option<String>,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            embedding_model: "text-embedding-3-small".to_string(),
            max_tokens: 500,
            base_url: None,
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> OpenAiClient {
        let client = OpenAiClient::new(&self.api_key);
        if let Some(ref url) = self.base_url {
            client.with_base_url(url)
        } else {
            client
        }
    }
}

// =============================================================================
// Capability Implementations
// =============================================================================

#[async_trait]
impl GenerateAgent for OpenAi {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String> {
        let request = ChatRequest::new(&self.model)
            .message(WireMessage::system(system_prompt))
            .message(WireMessage::user(user_prompt))
            .temperature(temperature)
            .max_tokens(self.max_tokens);

        let response = self.client().chat(&request).await?;

        response
            .text()
            .ok_or_else(|| anyhow!("No response from OpenAI"))
    }
}

#[async_trait]
impl VisionAgent for OpenAi {
    async fn generate_with_images(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        images: &[ImageData],
        temperature: f32,
    ) -> Result<String> {
        // Images first, then the text prompt.
        let mut parts: Vec<ContentPart> = images
            .iter()
            .map(|img| ContentPart::ImageUrl {
                image_url: UrlRef {
                    url: format!("data:{};base64,{}", img.media_type, img.data),
                },
            })
            .collect();
        parts.push(ContentPart::Text {
            text: user_prompt.to_string(),
        });

        let request = ChatRequest::new(&self.model)
            .message(WireMessage::system(system_prompt))
            .message(WireMessage::user_parts(parts))
            .temperature(temperature)
            .max_tokens(self.max_tokens);

        let response = self.client().chat(&request).await?;

        response
            .text()
            .ok_or_else(|| anyhow!("No response from OpenAI vision"))
    }
}

#[async_trait]
impl EmbedAgent for OpenAi {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.client()
            .embed_batch(&self.embedding_model, texts)
            .await
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        self.client().embed(&self.embedding_model, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_new() {
        let ai = OpenAi::new("sk-test", "gpt-4o");
        assert_eq!(ai.model, "gpt-4o");
        assert_eq!(ai.api_key, "sk-test");
        assert_eq!(ai.embedding_model, "text-embedding-3-small");
        assert_eq!(ai.max_tokens, 500);
    }

    #[test]
    fn test_openai_with_embedding_model() {
        let ai = OpenAi::new("sk-test", "gpt-4o").with_embedding_model("text-embedding-3-large");
        assert_eq!(ai.embedding_model, "text-embedding-3-large");
    }

    #[test]
    fn test_openai_with_base_url() {
        let ai = OpenAi::new("sk-test", "gpt-4o").with_base_url("https://custom.api.com");
        assert_eq!(ai.base_url, Some("https://custom.api.com".to_string()));
    }
}
