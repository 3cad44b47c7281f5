use serde::Deserialize;
use serde_json::Value;

use crate::error::LLMError;

/// Parses error responses returned by the Anthropic Messages API.
pub(crate) fn parse_anthropic_error(status: u16, body: &str) -> LLMError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<InnerError>,
    }

    #[derive(Deserialize)]
    struct InnerError {
        message: Option<String>,
        #[allow(dead_code)]
        r#type: Option<String>,
        code: Option<Value>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(error) = parsed.error {
            let mut message = error.message.unwrap_or_else(|| "unknown error".to_string());
            if let Some(code) = error.code {
                message = format!("{message} ({code})");
            }

            return match status {
                401 | 403 => LLMError::Auth { message },
                429 => LLMError::RateLimit {
                    message,
                    retry_after: None,
                },
                400 => LLMError::Validation { message },
                code if (500..600).contains(&code) => LLMError::Provider {
                    provider: "anthropic_messages",
                    message,
                },
                _ => LLMError::Provider {
                    provider: "anthropic_messages",
                    message,
                },
            };
        }
    }

    // Fallback: if the payload cannot be parsed, surface the raw body.
    LLMError::Provider {
        provider: "anthropic_messages",
        message: format!("status {status}: {body}"),
    }
}
