//! Completion provider implementations
//!
//! Concrete `CompletionProvider`s for hosted LLM services.

pub mod anthropic;
mod http;
pub mod openai;

pub use anthropic::{AnthropicClient, AnthropicCompletionProvider};
pub use http::{RateLimitedHttp, DEFAULT_TIMEOUT_SECS};
pub use openai::{OpenAIClient, OpenAICompletionProvider};
