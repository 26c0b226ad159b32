pub mod config;
pub mod error;
pub mod models;
pub mod types;

pub use config::Config;
pub use error::PanelsimError;
pub use types::*;
