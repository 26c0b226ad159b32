use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Provider credentials. Empty means the provider is unavailable;
    // checked when a request actually selects it.
    pub openai_api_key: String,
    pub anthropic_api_key: String,
    pub openrouter_api_key: String,

    // Web server
    pub api_host: String,
    pub api_port: u16,
    pub cors_origins: Vec<String>,

    // Authentication (both empty = auth disabled)
    pub api_keys: String,
    pub api_keys_file: String,

    // Default provider/model selections
    pub default_generation_provider: String,
    pub default_generation_model: String,
    pub default_embedding_provider: String,
    pub default_embedding_model: String,
    pub default_vision_provider: String,
    pub default_vision_model: String,
    pub default_video_provider: String,
    pub default_video_model: String,
    pub default_temperature: f32,

    // SSR temperature for PMF sharpening: p(r,T) is proportional to p(r)^(1/T).
    // T=1 leaves the distribution untouched; lower T sharpens it.
    pub ssr_temperature: f64,

    // Max concurrent outstanding provider calls across the whole request.
    pub concurrency_limit: usize,

    // Max tokens for generated survey answers.
    pub max_tokens: u32,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for everything except credentials.
    pub fn from_env() -> Self {
        Self {
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            openrouter_api_key: env::var("OPENROUTER_API_KEY").unwrap_or_default(),
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .expect("API_PORT must be a number"),
            cors_origins: env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000,http://localhost:8000".to_string())
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            api_keys: env::var("PANELSIM_API_KEYS").unwrap_or_default(),
            api_keys_file: env::var("PANELSIM_API_KEYS_FILE").unwrap_or_default(),
            default_generation_provider: env::var("DEFAULT_GENERATION_PROVIDER")
                .unwrap_or_else(|_| "openai".to_string()),
            default_generation_model: env::var("DEFAULT_GENERATION_MODEL")
                .unwrap_or_else(|_| "gpt-4o".to_string()),
            default_embedding_provider: env::var("DEFAULT_EMBEDDING_PROVIDER")
                .unwrap_or_else(|_| "openai".to_string()),
            default_embedding_model: env::var("DEFAULT_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            default_vision_provider: env::var("DEFAULT_VISION_PROVIDER")
                .unwrap_or_else(|_| "openai".to_string()),
            default_vision_model: env::var("DEFAULT_VISION_MODEL")
                .unwrap_or_else(|_| "gpt-4o".to_string()),
            default_video_provider: env::var("DEFAULT_VIDEO_PROVIDER")
                .unwrap_or_else(|_| "openrouter".to_string()),
            default_video_model: env::var("DEFAULT_VIDEO_MODEL")
                .unwrap_or_else(|_| "google/gemini-2.5-flash".to_string()),
            default_temperature: env::var("DEFAULT_TEMPERATURE")
                .unwrap_or_else(|_| "0.7".to_string())
                .parse()
                .expect("DEFAULT_TEMPERATURE must be a number"),
            ssr_temperature: env::var("SSR_TEMPERATURE")
                .unwrap_or_else(|_| "1.0".to_string())
                .parse()
                .expect("SSR_TEMPERATURE must be a number"),
            concurrency_limit: env::var("CONCURRENCY_LIMIT")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .expect("CONCURRENCY_LIMIT must be a number"),
            max_tokens: 500,
        }
    }
}

impl Default for Config {
    /// Built-in defaults with no environment lookups. Used by tests.
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            anthropic_api_key: String::new(),
            openrouter_api_key: String::new(),
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:8000".to_string(),
            ],
            api_keys: String::new(),
            api_keys_file: String::new(),
            default_generation_provider: "openai".to_string(),
            default_generation_model: "gpt-4o".to_string(),
            default_embedding_provider: "openai".to_string(),
            default_embedding_model: "text-embedding-3-small".to_string(),
            default_vision_provider: "openai".to_string(),
            default_vision_model: "gpt-4o".to_string(),
            default_video_provider: "openrouter".to_string(),
            default_video_model: "google/gemini-2.5-flash".to_string(),
            default_temperature: 0.7,
            ssr_temperature: 1.0,
            concurrency_limit: 20,
            max_tokens: 500,
        }
    }
}
