pub mod config;
pub mod error;
pub mod providers;
pub mod smoke;
pub mod types;

pub use error::LLMError;
pub use providers::LLMProvider;
pub use smoke::{SmokeOptions, SmokeOutcome, SmokeTest, Status};
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, MessageRole, TokenUsage};
