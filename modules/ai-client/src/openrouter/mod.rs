mod client;
pub(crate) mod types;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::traits::{VideoAgent, VideoSource};

use client::OpenRouterClient;
use types::*;

// =============================================================================
// OpenRouter Agent
// =============================================================================

/// OpenRouter-backed agent, used for video-capable models (Gemini family)
/// behind the OpenAI-style chat format.
#[derive(Clone)]
pub struct OpenRouter {
    api_key: String,
    model: String,
    max_tokens: u32,
    app_name: Option<String>,
    site_url: Option<String>,
}

impl OpenRouter {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 500,
            app_name: None,
            site_url: None,
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| anyhow!("OPENROUTER_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    pub fn with_site_url(mut self, url: impl Into<String>) -> Self {
        self.site_url = Some(url.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> OpenRouterClient {
        let mut client = OpenRouterClient::new(&self.api_key);
        if let Some(ref name) = self.app_name {
            client = client.with_app_name(name);
        }
        if let Some(ref url) = self.site_url {
            client = client.with_site_url(url);
        }
        client
    }
}

// =============================================================================
// Capability Implementation
// =============================================================================

#[async_trait]
impl VideoAgent for OpenRouter {
    async fn generate_with_video(
        &self,
        prompt: &str,
        source: &VideoSource,
        temperature: f32,
    ) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![WireMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: prompt.to_string(),
                    },
                    ContentPart::VideoUrl {
                        video_url: UrlRef {
                            url: source.provider_url(),
                        },
                    },
                ],
            }],
            temperature: Some(temperature),
            max_tokens: Some(self.max_tokens),
        };

        let response = self.client().chat(&request).await?;

        response
            .text()
            .ok_or_else(|| anyhow!("No response from OpenRouter video model"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openrouter_new() {
        let ai = OpenRouter::new("sk-or-test", "google/gemini-2.5-flash");
        assert_eq!(ai.model, "google/gemini-2.5-flash");
        assert_eq!(ai.max_tokens, 500);
    }

    #[test]
    fn test_openrouter_builders() {
        let ai = OpenRouter::new("sk-or-test", "google/gemini-2.5-flash")
            .with_app_name("panelsim")
            .with_site_url("https://example.com");
        assert_eq!(ai.app_name, Some("panelsim".to_string()));
        assert_eq!(ai.site_url, Some("https://example.com".to_string()));
    }
}
