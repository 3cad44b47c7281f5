use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::{AuthStyle, RequestPatch};
use crate::error::LLMError;
use crate::http::{DynHttpTransport, HttpRequest, HttpResponse, HttpStreamResponse};
use crate::provider::openai_chat::{
    build_openai_body, collect_stream_text, create_stream, map_response, parse_openai_error,
};
use crate::provider::{ChatStream, LLMProvider};
use crate::types::{CapabilityDescriptor, ChatRequest, ChatResponse};

/// Generic adapter for any gateway that speaks the OpenAI Chat Completions wire format:
/// xAI Grok, OpenRouter, Together, Groq, self-hosted proxies, and (via [`RequestPatch`])
/// Azure OpenAI.
///
/// Rather than forking the Chat Completions codec, this provider reuses
/// [`crate::provider::openai_chat`]'s request/response/stream conversion and only
/// parameterizes what actually differs between gateways: base URL and auth header shape.
pub struct OpenAiCompatibleProvider {
    transport: DynHttpTransport,
    /// Short identifier used for logging and [`ProviderMetadata`](crate::types::ProviderMetadata),
    /// e.g. `"grok"`, `"openrouter"`, `"together"`.
    flavor: String,
    base_url: String,
    auth: AuthStyle,
    secret: String,
    default_model: Option<String>,
    request_patch: Option<RequestPatch>,
}

impl OpenAiCompatibleProvider {
    /// Creates an adapter for an OpenAI-compatible gateway.
    ///
    /// # Examples
    ///
    /// ```
    /// # use kotoba_llm::provider::openai_compatible::OpenAiCompatibleProvider;
    /// # use kotoba_llm::provider::LLMProvider;
    /// # use kotoba_llm::config::AuthStyle;
    /// # use kotoba_llm::http::reqwest::default_dyn_transport;
    /// let transport = default_dyn_transport().expect("transport");
    /// let provider = OpenAiCompatibleProvider::new(
    ///     transport,
    ///     "grok",
    ///     "https://api.x.ai",
    ///     AuthStyle::Bearer,
    ///     "xai-key",
    /// );
    /// assert_eq!(provider.name(), "openai_compatible");
    /// ```
    pub fn new(
        transport: DynHttpTransport,
        flavor: impl Into<String>,
        base_url: impl Into<String>,
        auth: AuthStyle,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            flavor: flavor.into(),
            base_url: base_url.into(),
            auth,
            secret: secret.into(),
            default_model: None,
            request_patch: None,
        }
    }

    /// Convenience constructor for xAI Grok, which speaks Chat Completions with Bearer auth.
    pub fn grok(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self::new(
            transport,
            "grok",
            "https://api.x.ai",
            AuthStyle::Bearer,
            api_key,
        )
    }

    /// Convenience constructor for OpenRouter.
    pub fn openrouter(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self::new(
            transport,
            "openrouter",
            "https://openrouter.ai/api",
            AuthStyle::Bearer,
            api_key,
        )
    }

    /// Sets a default model used when a request doesn't specify one.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Attaches a [`RequestPatch`], e.g. to express Azure OpenAI's templated URL and
    /// `api-version` query parameter.
    pub fn with_request_patch(mut self, patch: RequestPatch) -> Self {
        self.request_patch = Some(patch);
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        match &self.auth {
            AuthStyle::Bearer => {
                headers.insert("Authorization".to_string(), format!("Bearer {}", self.secret));
            }
            AuthStyle::ApiKeyHeader { name } => {
                headers.insert(name.clone(), self.secret.clone());
            }
        }
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());
        headers
    }

    fn resolve_model(&self, request: &ChatRequest) -> Result<String, LLMError> {
        request
            .options
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| LLMError::Validation {
                message: format!("model is required for openai_compatible:{}", self.flavor),
            })
    }

    fn apply_patch(&self, url: &mut String, headers: &mut HashMap<String, String>, body: &mut Value) {
        if let Some(patch) = &self.request_patch {
            patch.apply(url, headers, body);
        }
    }

    async fn send_request(&self, body: Value) -> Result<HttpResponse, LLMError> {
        let mut url = self.endpoint();
        let mut headers = self.build_headers();
        let mut body = body;
        self.apply_patch(&mut url, &mut headers, &mut body);
        let payload = serde_json::to_vec(&body).map_err(|err| LLMError::Validation {
            message: format!("failed to serialize request: {err}"),
        })?;
        let mut request = HttpRequest::post_json(url, payload);
        request.headers = headers;
        self.transport.send(request).await
    }

    async fn send_stream_request(&self, body: Value) -> Result<HttpStreamResponse, LLMError> {
        let mut url = self.endpoint();
        let mut headers = self.build_headers();
        let mut body = body;
        self.apply_patch(&mut url, &mut headers, &mut body);
        let payload = serde_json::to_vec(&body).map_err(|err| LLMError::Validation {
            message: format!("failed to serialize request: {err}"),
        })?;
        let mut request = HttpRequest::post_json(url, payload);
        request.headers = headers;
        self.transport.send_stream(request).await
    }

    fn ensure_success(&self, response: HttpResponse) -> Result<String, LLMError> {
        let status = response.status;
        let text = response.into_string()?;
        if (200..300).contains(&status) {
            Ok(text)
        } else {
            Err(parse_openai_error(status, &text))
        }
    }

    fn try_parse<T: DeserializeOwned>(&self, text: &str) -> Result<T, LLMError> {
        serde_json::from_str(text).map_err(|err| LLMError::Provider {
            provider: self.name(),
            message: format!("failed to parse {} response: {err}", self.flavor),
        })
    }
}

#[async_trait]
impl LLMProvider for OpenAiCompatibleProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_openai_body(&request, &model, false)?;
        let response = self.send_request(body).await?;
        let text = self.ensure_success(response)?;
        let parsed = self.try_parse(&text)?;
        map_response(parsed, self.name(), self.endpoint())
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_openai_body(&request, &model, true)?;
        let response = self.send_stream_request(body).await?;
        if !(200..300).contains(&response.status) {
            let text = collect_stream_text(response.body, self.name()).await?;
            return Err(parse_openai_error(response.status, &text));
        }
        Ok(create_stream(response.body, self.name(), self.endpoint()))
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            supports_stream: true,
            supports_image_input: true,
            supports_audio_input: false,
            supports_video_input: false,
            supports_tools: true,
            supports_structured_output: true,
            supports_parallel_tool_calls: true,
        }
    }

    fn name(&self) -> &'static str {
        "openai_compatible"
    }
}
