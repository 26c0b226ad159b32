//! Unified LLM service: picks the provider and modality for each
//! generation call and builds the persona/concept prompts.

use std::sync::Arc;

use tracing::debug;

use ai_client::util::detect_image_media_type;
use ai_client::{
    Claude, EmbedAgent, GenerateAgent, ImageData, OpenAi, OpenRouter, VideoAgent, VisionAgent,
};
use panelsim_common::models::{check_supported, Capability};
use panelsim_common::{
    Concept, Config, ContentType, PanelsimError, Persona, ProviderInfo, Question, ResolvedOptions,
};

use crate::video::VideoResolver;

pub struct LlmService {
    generation: Arc<dyn GenerateAgent>,
    vision: Option<Arc<dyn VisionAgent>>,
    video: Option<Arc<dyn VideoAgent>>,
    embedding: Arc<dyn EmbedAgent>,
    video_resolver: Arc<VideoResolver>,
    options: ResolvedOptions,
}

impl LlmService {
    /// Build a service for one request. Only the capabilities the concept
    /// can exercise are constructed and checked against the model catalog,
    /// so a request without images never trips over vision configuration.
    pub fn from_options(
        options: ResolvedOptions,
        config: &Config,
        concept: &Concept,
        video_resolver: Arc<VideoResolver>,
    ) -> Result<Self, PanelsimError> {
        if !(0.0..=2.0).contains(&options.generation_temperature) {
            return Err(PanelsimError::validation(
                "Temperature must be between 0 and 2",
            ));
        }

        check_supported(
            &options.generation_provider,
            Capability::Generation,
            &options.generation_model,
        )?;
        check_supported(
            &options.embedding_provider,
            Capability::Embedding,
            &options.embedding_model,
        )?;

        let generation = build_generation_agent(
            &options.generation_provider,
            &options.generation_model,
            config,
        )?;
        let embedding = build_embedding_agent(
            &options.embedding_provider,
            &options.embedding_model,
            config,
        )?;

        // Video takes priority over images when both are present.
        let video = if concept.has_video() {
            check_supported(
                &options.video_provider,
                Capability::Video,
                &options.video_model,
            )?;
            Some(build_video_agent(
                &options.video_provider,
                &options.video_model,
                config,
            )?)
        } else {
            None
        };

        let vision = if concept.has_images() && video.is_none() {
            check_supported(
                &options.vision_provider,
                Capability::Vision,
                &options.vision_model,
            )?;
            Some(build_vision_agent(
                &options.vision_provider,
                &options.vision_model,
                config,
            )?)
        } else {
            None
        };

        Ok(Self {
            generation,
            vision,
            video,
            embedding,
            video_resolver,
            options,
        })
    }

    /// Assemble a service from pre-built capabilities. Used by tests to
    /// inject mocks.
    pub fn from_parts(
        generation: Arc<dyn GenerateAgent>,
        vision: Option<Arc<dyn VisionAgent>>,
        video: Option<Arc<dyn VideoAgent>>,
        embedding: Arc<dyn EmbedAgent>,
        video_resolver: Arc<VideoResolver>,
        options: ResolvedOptions,
    ) -> Self {
        Self {
            generation,
            vision,
            video,
            embedding,
            video_resolver,
            options,
        }
    }

    pub fn options(&self) -> &ResolvedOptions {
        &self.options
    }

    pub fn provider_info(&self) -> ProviderInfo {
        ProviderInfo {
            generation: format!(
                "{}/{}",
                self.options.generation_provider, self.options.generation_model
            ),
            embedding: format!(
                "{}/{}",
                self.options.embedding_provider, self.options.embedding_model
            ),
            vision: format!(
                "{}/{}",
                self.options.vision_provider, self.options.vision_model
            ),
            video: format!(
                "{}/{}",
                self.options.video_provider, self.options.video_model
            ),
        }
    }

    /// Generate one persona's answer to one question, routing by the
    /// concept's content: video > images > text.
    pub async fn generate_response(
        &self,
        persona: &Persona,
        concept: &Concept,
        question: &Question,
    ) -> Result<String, PanelsimError> {
        let system_prompt = build_system_prompt(persona);
        let user_prompt = build_user_prompt(concept, question);
        let temperature = self.options.generation_temperature;

        let video_reference = concept
            .content
            .iter()
            .find(|c| c.content_type == ContentType::Video)
            .map(|c| c.data.as_str());

        if let (Some(video_agent), Some(reference)) = (&self.video, video_reference) {
            let source = self.video_resolver.resolve(reference).await?;

            debug!(model = %self.options.video_model, "Generating via video modality");
            // Video models take one combined prompt.
            let prompt = format!("{system_prompt}\n\n{user_prompt}");
            return video_agent
                .generate_with_video(&prompt, &source, temperature)
                .await
                .map_err(|e| PanelsimError::provider(&self.options.video_provider, e));
        }

        if let Some(vision_agent) = &self.vision {
            let images: Vec<ImageData> = concept
                .content
                .iter()
                .filter(|c| c.content_type == ContentType::Image)
                .map(|c| ImageData {
                    media_type: detect_image_media_type(&c.data).to_string(),
                    data: c.data.clone(),
                })
                .collect();

            debug!(model = %self.options.vision_model, images = images.len(), "Generating via vision modality");
            return vision_agent
                .generate_with_images(&system_prompt, &user_prompt, &images, temperature)
                .await
                .map_err(|e| PanelsimError::provider(&self.options.vision_provider, e));
        }

        debug!(model = %self.options.generation_model, "Generating via text modality");
        self.generation
            .generate(&system_prompt, &user_prompt, temperature)
            .await
            .map_err(|e| PanelsimError::provider(&self.options.generation_provider, e))
    }

    pub async fn get_embedding(&self, text: &str) -> Result<Vec<f32>, PanelsimError> {
        self.embedding
            .embed_single(text)
            .await
            .map_err(|e| PanelsimError::provider(&self.options.embedding_provider, e))
    }

    pub async fn get_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PanelsimError> {
        self.embedding
            .embed(texts)
            .await
            .map_err(|e| PanelsimError::provider(&self.options.embedding_provider, e))
    }
}

// ---------------------------------------------------------------------------
// Provider factory
// ---------------------------------------------------------------------------

fn api_key_for<'a>(provider: &str, config: &'a Config) -> Result<&'a str, PanelsimError> {
    let (key, env_name) = match provider {
        "openai" => (&config.openai_api_key, "OPENAI_API_KEY"),
        "anthropic" => (&config.anthropic_api_key, "ANTHROPIC_API_KEY"),
        "openrouter" => (&config.openrouter_api_key, "OPENROUTER_API_KEY"),
        _ => return Err(PanelsimError::config(format!("Unknown provider: {provider}"))),
    };
    if key.is_empty() {
        return Err(PanelsimError::config(format!(
            "{env_name} is not configured"
        )));
    }
    Ok(key)
}

fn build_generation_agent(
    provider: &str,
    model: &str,
    config: &Config,
) -> Result<Arc<dyn GenerateAgent>, PanelsimError> {
    let api_key = api_key_for(provider, config)?;
    Ok(match provider {
        "openai" => Arc::new(OpenAi::new(api_key, model).with_max_tokens(config.max_tokens)),
        "anthropic" => Arc::new(Claude::new(api_key, model).with_max_tokens(config.max_tokens)),
        _ => {
            return Err(PanelsimError::config(format!(
                "Unknown generation provider: {provider}"
            )))
        }
    })
}

fn build_vision_agent(
    provider: &str,
    model: &str,
    config: &Config,
) -> Result<Arc<dyn VisionAgent>, PanelsimError> {
    let api_key = api_key_for(provider, config)?;
    Ok(match provider {
        "openai" => Arc::new(OpenAi::new(api_key, model).with_max_tokens(config.max_tokens)),
        "anthropic" => Arc::new(Claude::new(api_key, model).with_max_tokens(config.max_tokens)),
        _ => {
            return Err(PanelsimError::config(format!(
                "Unknown vision provider: {provider}"
            )))
        }
    })
}

fn build_video_agent(
    provider: &str,
    model: &str,
    config: &Config,
) -> Result<Arc<dyn VideoAgent>, PanelsimError> {
    let api_key = api_key_for(provider, config)?;
    Ok(match provider {
        "openrouter" => Arc::new(
            OpenRouter::new(api_key, model)
                .with_max_tokens(config.max_tokens)
                .with_app_name("panelsim"),
        ),
        _ => {
            return Err(PanelsimError::config(format!(
                "Unknown video provider: {provider}"
            )))
        }
    })
}

fn build_embedding_agent(
    provider: &str,
    model: &str,
    config: &Config,
) -> Result<Arc<dyn EmbedAgent>, PanelsimError> {
    let api_key = api_key_for(provider, config)?;
    Ok(match provider {
        "openai" => Arc::new(OpenAi::new(api_key, model).with_embedding_model(model)),
        _ => {
            return Err(PanelsimError::config(format!(
                "Unknown embedding provider: {provider}"
            )))
        }
    })
}

// ---------------------------------------------------------------------------
// Prompt construction
// ---------------------------------------------------------------------------

/// System prompt putting the model in character as the persona.
pub fn build_system_prompt(persona: &Persona) -> String {
    let persona_desc = format_persona(persona);
    format!(
        "You are role-playing as a consumer with the following characteristics:\n\n\
         {persona_desc}\n\n\
         Respond naturally and authentically as this person would. Your responses \
         should reflect your demographics, lifestyle, and perspective. Be genuine - \
         if something doesn't appeal to you, say so honestly. Reply briefly to any \
         questions posed to you."
    )
}

/// User prompt presenting the concept's text content and the question.
pub fn build_user_prompt(concept: &Concept, question: &Question) -> String {
    let text_content: Vec<&str> = concept
        .content
        .iter()
        .filter(|c| c.content_type == ContentType::Text)
        .map(|c| c.data.as_str())
        .collect();

    let mut prompt = format!("Here is a product concept for \"{}\":\n\n", concept.name);

    if !text_content.is_empty() {
        prompt.push_str(&text_content.join("\n"));
        prompt.push_str("\n\n");
    }

    prompt.push_str(&format!(
        "Please respond to this question in 2-3 sentences, speaking as yourself:\n\n\
         {}\n\n\
         Give your honest reaction as this consumer would.",
        question.text
    ));

    prompt
}

fn format_persona(persona: &Persona) -> String {
    persona
        .attributes
        .iter()
        .filter(|(key, _)| key.as_str() != "persona_id")
        .map(|(key, value)| format!("- {}: {}", format_attr_key(key), value))
        .collect::<Vec<_>>()
        .join("\n")
}

/// "purchase_frequency" -> "Purchase Frequency"
fn format_attr_key(key: &str) -> String {
    key.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use panelsim_common::{AttrValue, ContentItem, REFERENCE_SET_COUNT};

    fn persona() -> Persona {
        let mut attributes = BTreeMap::new();
        attributes.insert("persona_id".to_string(), AttrValue::String("p1".into()));
        attributes.insert("age".to_string(), AttrValue::Number(34.0));
        attributes.insert(
            "purchase_frequency".to_string(),
            AttrValue::String("weekly".into()),
        );
        Persona { attributes }
    }

    fn question() -> Question {
        Question {
            id: "q1".to_string(),
            text: "Would you buy this?".to_string(),
            weight: 1.0,
            ssr_reference_sets: vec![vec![String::new(); 5]; REFERENCE_SET_COUNT],
        }
    }

    #[test]
    fn system_prompt_lists_attributes_without_id() {
        let prompt = build_system_prompt(&persona());
        assert!(prompt.contains("- Age: 34"));
        assert!(prompt.contains("- Purchase Frequency: weekly"));
        assert!(!prompt.contains("persona_id"));
        assert!(!prompt.contains("p1"));
    }

    #[test]
    fn user_prompt_includes_concept_text_and_question() {
        let concept = Concept {
            name: "Solar Backpack".to_string(),
            content: vec![
                ContentItem {
                    content_type: ContentType::Text,
                    data: "Charges your phone while you hike.".to_string(),
                    label: None,
                },
                ContentItem {
                    content_type: ContentType::Image,
                    data: "iVBOR...".to_string(),
                    label: None,
                },
            ],
        };
        let prompt = build_user_prompt(&concept, &question());
        assert!(prompt.contains("\"Solar Backpack\""));
        assert!(prompt.contains("Charges your phone while you hike."));
        assert!(prompt.contains("Would you buy this?"));
        assert!(!prompt.contains("iVBOR"));
    }

    #[test]
    fn attr_key_formatting() {
        assert_eq!(format_attr_key("age"), "Age");
        assert_eq!(format_attr_key("purchase_frequency"), "Purchase Frequency");
    }

    #[test]
    fn missing_credentials_is_config_error() {
        let config = Config::default();
        let err = build_generation_agent("openai", "gpt-4o", &config).err().unwrap();
        assert!(matches!(err, PanelsimError::Config(_)));
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn unknown_provider_is_config_error() {
        let mut config = Config::default();
        config.openai_api_key = "sk-test".to_string();
        assert!(build_generation_agent("mistral", "large", &config).is_err());
    }
}
