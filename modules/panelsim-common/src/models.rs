//! Supported model catalog, checked at setup before any generation work.

use std::fmt;

use crate::error::PanelsimError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Generation,
    Embedding,
    Vision,
    Video,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Generation => "generation",
            Capability::Embedding => "embedding",
            Capability::Vision => "vision",
            Capability::Video => "video",
        };
        write!(f, "{name}")
    }
}

pub const PROVIDERS: &[&str] = &["openai", "anthropic", "openrouter"];

const OPENAI_GENERATION: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-4-turbo", "gpt-4", "gpt-3.5-turbo"];
const OPENAI_EMBEDDING: &[&str] = &[
    "text-embedding-3-small",
    "text-embedding-3-large",
    "text-embedding-ada-002",
];
const OPENAI_VISION: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-4-turbo"];

const ANTHROPIC_GENERATION: &[&str] = &[
    "claude-sonnet-4-20250514",
    "claude-3-7-sonnet-20250219",
    "claude-3-5-sonnet-20240620",
    "claude-3-5-haiku-20241022",
    "claude-3-haiku-20240307",
];
const ANTHROPIC_VISION: &[&str] = ANTHROPIC_GENERATION;

const OPENROUTER_VIDEO: &[&str] = &[
    "google/gemini-2.5-flash",
    "google/gemini-2.5-pro",
    "google/gemini-2.0-flash-001",
];

/// Supported models for a provider/capability pair. `None` means the
/// provider itself is unknown; an empty slice means the provider offers
/// nothing for that capability.
pub fn supported_models(provider: &str, capability: Capability) -> Option<&'static [&'static str]> {
    match provider {
        "openai" => Some(match capability {
            Capability::Generation => OPENAI_GENERATION,
            Capability::Embedding => OPENAI_EMBEDDING,
            Capability::Vision => OPENAI_VISION,
            Capability::Video => &[],
        }),
        "anthropic" => Some(match capability {
            Capability::Generation => ANTHROPIC_GENERATION,
            Capability::Vision => ANTHROPIC_VISION,
            Capability::Embedding | Capability::Video => &[],
        }),
        "openrouter" => Some(match capability {
            Capability::Video => OPENROUTER_VIDEO,
            _ => &[],
        }),
        _ => None,
    }
}

pub fn is_supported(provider: &str, capability: Capability, model: &str) -> bool {
    supported_models(provider, capability)
        .map(|models| models.contains(&model))
        .unwrap_or(false)
}

/// Validate a provider/capability/model triple, surfacing a configuration
/// error naming the offending combination.
pub fn check_supported(
    provider: &str,
    capability: Capability,
    model: &str,
) -> Result<(), PanelsimError> {
    let models = supported_models(provider, capability).ok_or_else(|| {
        PanelsimError::config(format!("Unknown {capability} provider: {provider}"))
    })?;
    if !models.contains(&model) {
        return Err(PanelsimError::config(format!(
            "Model {model} is not supported for {capability} on {provider}"
        )));
    }
    Ok(())
}

/// The full catalog as JSON, served by the HTTP boundary.
pub fn catalog_json() -> serde_json::Value {
    let mut catalog = serde_json::Map::new();
    for provider in PROVIDERS {
        let mut caps = serde_json::Map::new();
        for capability in [
            Capability::Generation,
            Capability::Embedding,
            Capability::Vision,
            Capability::Video,
        ] {
            let models = supported_models(provider, capability).unwrap_or(&[]);
            caps.insert(
                capability.to_string(),
                serde_json::Value::Array(
                    models
                        .iter()
                        .map(|m| serde_json::Value::String(m.to_string()))
                        .collect(),
                ),
            );
        }
        catalog.insert(provider.to_string(), serde_json::Value::Object(caps));
    }
    serde_json::Value::Object(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_models_pass() {
        assert!(is_supported("openai", Capability::Generation, "gpt-4o"));
        assert!(is_supported(
            "openai",
            Capability::Embedding,
            "text-embedding-3-small"
        ));
        assert!(is_supported(
            "anthropic",
            Capability::Vision,
            "claude-sonnet-4-20250514"
        ));
        assert!(is_supported(
            "openrouter",
            Capability::Video,
            "google/gemini-2.5-flash"
        ));
    }

    #[test]
    fn unknown_provider_is_config_error() {
        let err = check_supported("cohere", Capability::Generation, "command-r").unwrap_err();
        assert!(err.to_string().contains("Unknown generation provider"));
    }

    #[test]
    fn unsupported_model_is_config_error() {
        let err = check_supported("openai", Capability::Generation, "gpt-2").unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn capability_gaps_are_empty_not_missing() {
        assert_eq!(
            supported_models("anthropic", Capability::Embedding),
            Some(&[][..])
        );
        assert!(!is_supported("anthropic", Capability::Embedding, "any"));
    }

    #[test]
    fn catalog_lists_all_providers() {
        let catalog = catalog_json();
        for provider in PROVIDERS {
            assert!(catalog.get(provider).is_some());
        }
    }
}
