pub mod claude;
pub mod openai;
pub mod openrouter;
pub mod traits;
pub mod util;

pub use claude::Claude;
pub use openai::OpenAi;
pub use openrouter::OpenRouter;
pub use traits::{EmbedAgent, GenerateAgent, ImageData, VideoAgent, VideoSource, VisionAgent};
