mod error;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::OpenAiChatProvider;

// Re-exported so the `openai_compatible` flavor (xAI Grok, OpenRouter, Together, Azure...) can
// reuse the Chat Completions codec instead of duplicating it.
pub(crate) use error::parse_openai_error;
pub(crate) use request::build_openai_body;
pub(crate) use response::map_response;
pub(crate) use stream::{collect_stream_text, create_stream};
