mod provider;

pub use provider::OpenAiCompatibleProvider;
