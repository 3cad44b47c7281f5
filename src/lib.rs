//! LLM 多后端统一调用库

pub mod cache;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod provider;
pub mod registry;
pub mod stream;
pub mod types;
pub mod usage;

pub use cache::ResponseCache;
pub use client::LLMClient;
pub use engine::GenerationEngine;
pub use error::LLMError;
pub use provider::{ChatStream, LLMProvider};
pub use registry::{ModelId, ModelRegistry};
pub use types::*;
pub use usage::UsageTracker;
