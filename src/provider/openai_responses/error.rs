use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{LLMError, extract_model_identifier, looks_like_token_limit_error};

/// Parses error responses returned by the OpenAI Responses API.
pub(crate) fn parse_openai_responses_error(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> LLMError {
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
            let code_string = error
                .code
                .as_ref()
                .and_then(|value| value.as_str().map(|s| s.to_string()))
                .or_else(|| error.code.clone().map(|value| value.to_string()));
            if let Some(code) = &code_string {
                message = format!("{message} ({code})");
            }
            let code_hint = code_string.as_deref();

            if looks_like_token_limit_error(code_hint, &message) {
                return LLMError::TokenLimitExceeded {
                    message,
                    estimated: None,
                    limit: None,
                };
            }

            if status == 404 || matches!(code_hint, Some(code) if code == "model_not_found") {
                return LLMError::ModelNotFound {
                    model: extract_model_identifier(&message),
                    message,
                };
            }

            return match status {
                401 | 403 => LLMError::Auth { message },
                429 => LLMError::RateLimit {
                    message,
                    retry_after,
                },
                400 => LLMError::Validation { message },
                404 => LLMError::Provider {
                    provider: "openai_responses",
                    message,
                },
                _ => LLMError::Provider {
                    provider: "openai_responses",
                    message,
                },
            };
        }
    }

    LLMError::Provider {
        provider: "openai_responses",
        message: format!("status {status}: {body}"),
    }
}
