//! 多步工具调用生成引擎
//!
//! `GenerationEngine` 在单次 `LLMProvider::chat`/`stream_chat` 调用之上，驱动完整的
//! "调用 -> 检查工具调用 -> 执行工具 -> 把结果喂回历史 -> 再次调用" 循环，直到模型不再
//! 请求工具或达到 `max_steps`。引擎本身不持有会话状态：每次调用都接收完整的消息历史，
//! 调用方负责在多轮对话之间保存并传回这段历史，因此多个并发调用之间不存在需要合并的
//! 共享可变状态。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::{stream, StreamExt};
use serde_json::Value;

use crate::cache::{CacheKey, CachePriority, ResponseCache};
use crate::error::LLMError;
use crate::provider::{ChatStream, DynProvider, RetryConfig, RetryableLLMProvider};
use crate::types::{
    CapabilityDescriptor, ChatEvent, ChatOptions, ChatRequest, ChatResponse, ContentDelta,
    ContentPart, FinishReason, Message, MessageDelta, OutputItem, ResponseFormat, Role, ToolCall,
    ToolCallDelta, ToolCallKind, ToolChoice, ToolDefinition, ToolResult,
};
use crate::usage::UsageTracker;

/// 缓存命中为零时，引擎回退使用的默认 TTL。
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// 调用方实现的工具执行器，类比 [`crate::provider::LLMProvider`] 的形状：一个
/// `async_trait`、`Send + Sync` 的窄接口，供引擎在多步循环里反复调用。
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// 执行一次工具调用并返回结果。返回的 `Err` 会直接终止整个生成循环。
    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, LLMError>;
}

/// 控制一次 `generate_text`/`stream_text` 调用行为的设置。
///
/// 刻意包裹 [`ChatOptions`] 而不是重复其字段——`ChatOptions` 已经携带 temperature/
/// top_p/reasoning 等采样参数，引擎只需要在其上附加多步循环特有的设置。
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    /// 透传给每一步 `ChatRequest` 的采样/生成选项。
    pub options: ChatOptions,
    /// 允许的最大 provider 调用次数（而不是工具调用次数）。
    pub max_steps: u32,
    /// 是否在开始前查询响应缓存、结束后写入响应缓存。
    pub use_cache: bool,
    /// 写入缓存时使用的 TTL；为 `None` 时使用 [`DEFAULT_CACHE_TTL`]。
    pub cache_ttl: Option<Duration>,
    /// 单步 provider 调用失败时使用的重试策略。
    pub retry: RetryConfig,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            options: ChatOptions::default(),
            max_steps: 4,
            use_cache: false,
            cache_ttl: None,
            retry: RetryConfig::default(),
        }
    }
}

/// 驱动多步工具调用循环的引擎。无状态、`Send + Sync`，可以自由克隆与跨任务共享。
#[derive(Clone)]
pub struct GenerationEngine {
    handle: String,
    provider: DynProvider,
    cache: Option<Arc<ResponseCache>>,
    usage: Option<Arc<UsageTracker>>,
}

impl GenerationEngine {
    /// 为给定 handle 与 provider 创建一个不带缓存/用量统计的引擎。
    pub fn new(handle: impl Into<String>, provider: DynProvider) -> Self {
        Self {
            handle: handle.into(),
            provider,
            cache: None,
            usage: None,
        }
    }

    /// 为引擎附加一个响应缓存。
    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// 为引擎附加一个用量统计器。
    pub fn with_usage_tracker(mut self, usage: Arc<UsageTracker>) -> Self {
        self.usage = Some(usage);
        self
    }

    /// 驱动完整的多步工具调用循环并返回最终响应。
    ///
    /// # Errors
    ///
    /// 传播 provider 调用或 [`ToolExecutor::execute`] 产生的任何 [`LLMError`]，以及
    /// `max_steps == 0` 时的 [`LLMError::Validation`]。
    #[allow(clippy::too_many_arguments)]
    pub async fn generate_text(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        tool_choice: Option<ToolChoice>,
        response_format: Option<ResponseFormat>,
        executor: &dyn ToolExecutor,
        settings: &GenerationSettings,
        session: Option<&str>,
    ) -> Result<ChatResponse, LLMError> {
        validate_capabilities(&messages, &tools, &self.provider.capabilities())?;
        if settings.max_steps == 0 {
            return Err(LLMError::Validation {
                message: "GenerationSettings.max_steps must be at least 1".to_string(),
            });
        }

        let initial_request = build_request(
            &messages,
            &tools,
            &tool_choice,
            &response_format,
            &settings.options,
        );
        let cache_key = CacheKey::fingerprint(&self.handle, &initial_request);

        if settings.use_cache {
            if let Some(cache) = &self.cache {
                if let Some(cached) = cache.get(&cache_key).await {
                    tracing::debug!(handle = %self.handle, "generation cache hit");
                    return Ok(cached);
                }
            }
        }

        let mut history = messages;
        let mut final_response = None;

        for step in 0..settings.max_steps {
            let request = build_request(
                &history,
                &tools,
                &tool_choice,
                &response_format,
                &settings.options,
            );

            tracing::debug!(handle = %self.handle, step, "generation engine step start");
            let response = self.provider.chat_with_retry(request, settings.retry).await?;

            if let (Some(tracker), Some(usage)) = (&self.usage, &response.usage) {
                tracker.record(&self.handle, session, usage).await;
            }

            let tool_calls = extract_tool_calls(&response);
            if tool_calls.is_empty() {
                final_response = Some(response);
                break;
            }

            if step + 1 == settings.max_steps {
                let mut response = response;
                response.finish_reason = Some(FinishReason::Other("max_steps_reached".to_string()));
                final_response = Some(response);
                break;
            }

            history.push(assistant_tool_call_message(&tool_calls));
            let results = join_all(tool_calls.iter().map(|call| executor.execute(call))).await;
            for result in results {
                history.push(tool_result_message(result?));
            }
        }

        let response = final_response.expect("loop always sets final_response before exiting");

        if settings.use_cache {
            if let Some(cache) = &self.cache {
                let ttl = settings.cache_ttl.unwrap_or(DEFAULT_CACHE_TTL);
                cache
                    .put(cache_key, response.clone(), ttl, CachePriority::Normal)
                    .await;
            }
        }

        Ok(response)
    }

    /// 驱动多步工具调用循环，但以流式方式产出每一步的 [`crate::types::ChatChunk`]，
    /// 并在每一步前后插入合成的 `ChatEvent::Custom` 步骤标记事件，方便流式调用方
    /// 在不引入新的线上事件类型的前提下观察到步骤边界。
    #[allow(clippy::too_many_arguments)]
    pub async fn stream_text(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        tool_choice: Option<ToolChoice>,
        response_format: Option<ResponseFormat>,
        executor: Arc<dyn ToolExecutor>,
        settings: GenerationSettings,
        session: Option<String>,
    ) -> Result<ChatStream, LLMError> {
        validate_capabilities(&messages, &tools, &self.provider.capabilities())?;
        if settings.max_steps == 0 {
            return Err(LLMError::Validation {
                message: "GenerationSettings.max_steps must be at least 1".to_string(),
            });
        }

        // Cache lookups are supported for streaming calls, but the streamed result is not
        // written back: reconstituting a full ChatResponse from a stream the caller consumes
        // incrementally (and may abandon midway) isn't attempted here.
        if settings.use_cache {
            if let Some(cache) = &self.cache {
                let cache_request = build_request(
                    &messages,
                    &tools,
                    &tool_choice,
                    &response_format,
                    &settings.options,
                );
                let cache_key = CacheKey::fingerprint(&self.handle, &cache_request);
                if let Some(cached) = cache.get(&cache_key).await {
                    tracing::debug!(handle = %self.handle, "generation cache hit (stream)");
                    let chunk = response_to_replay_chunk(&cached);
                    return Ok(Box::pin(stream::once(async move { Ok::<_, LLMError>(chunk) })));
                }
            }
        }

        let request = build_request(
            &messages,
            &tools,
            &tool_choice,
            &response_format,
            &settings.options,
        );
        let inner = self.provider.stream_chat(request).await?;

        let state = StepState {
            engine: self.clone(),
            tools,
            tool_choice,
            response_format,
            executor,
            settings,
            session,
            step: 0,
            history: messages,
            phase: StepPhase::Started,
            inner,
            tool_acc: BTreeMap::new(),
        };

        Ok(Box::pin(stream::unfold(Some(state), advance)))
    }
}

/// 单步流式状态机所处的阶段。
enum StepPhase {
    /// 本步尚未发出起始标记。
    Started,
    /// 正在透传 provider 的底层流。
    Draining,
    /// 本步已结束，正在根据累积的工具调用决定是否继续。
    Finished,
}

struct StepState {
    engine: GenerationEngine,
    tools: Vec<ToolDefinition>,
    tool_choice: Option<ToolChoice>,
    response_format: Option<ResponseFormat>,
    executor: Arc<dyn ToolExecutor>,
    settings: GenerationSettings,
    session: Option<String>,
    step: u32,
    history: Vec<Message>,
    phase: StepPhase,
    inner: ChatStream,
    tool_acc: BTreeMap<usize, AccumulatingToolCall>,
}

#[derive(Default)]
struct AccumulatingToolCall {
    id: Option<String>,
    name: Option<String>,
    kind: Option<ToolCallKind>,
    arguments: String,
}

type UnfoldItem = Result<crate::types::ChatChunk, LLMError>;

async fn advance(state: Option<StepState>) -> Option<(UnfoldItem, Option<StepState>)> {
    let mut state = state?;

    match state.phase {
        StepPhase::Started => {
            state.phase = StepPhase::Draining;
            let marker = step_marker_chunk(state.step, "step_start");
            Some((Ok(marker), Some(state)))
        }
        StepPhase::Draining => match state.inner.next().await {
            Some(Ok(chunk)) => {
                accumulate_tool_calls(&chunk.events, &mut state.tool_acc);
                if let (Some(tracker), Some(usage)) = (&state.engine.usage, &chunk.usage) {
                    tracker.record(&state.engine.handle, state.session.as_deref(), usage).await;
                }
                Some((Ok(chunk), Some(state)))
            }
            Some(Err(err)) => Some((Err(err), None)),
            None => {
                state.phase = StepPhase::Finished;
                let marker = step_marker_chunk(state.step, "step_end");
                Some((Ok(marker), Some(state)))
            }
        },
        StepPhase::Finished => {
            let completed: Vec<ToolCall> = state
                .tool_acc
                .values()
                .filter_map(AccumulatingToolCall::finish)
                .collect();

            if completed.is_empty() || state.step + 1 >= state.settings.max_steps {
                return None;
            }

            state.history.push(assistant_tool_call_message(&completed));
            let results = join_all(completed.iter().map(|call| state.executor.execute(call))).await;
            for result in results {
                match result {
                    Ok(result) => state.history.push(tool_result_message(result)),
                    Err(err) => return Some((Err(err), None)),
                }
            }

            let request = build_request(
                &state.history,
                &state.tools,
                &state.tool_choice,
                &state.response_format,
                &state.settings.options,
            );
            let next_stream = match state.engine.provider.stream_chat(request).await {
                Ok(stream) => stream,
                Err(err) => return Some((Err(err), None)),
            };

            state.step += 1;
            state.inner = next_stream;
            state.tool_acc.clear();
            // Emit the next step's start marker directly rather than recursing into
            // `advance` again (an async fn cannot call itself without boxing the future).
            state.phase = StepPhase::Draining;
            let marker = step_marker_chunk(state.step, "step_start");
            Some((Ok(marker), Some(state)))
        }
    }
}

impl AccumulatingToolCall {
    fn finish(&self) -> Option<ToolCall> {
        let name = self.name.clone()?;
        let arguments: Value =
            serde_json::from_str(&self.arguments).unwrap_or_else(|_| Value::String(self.arguments.clone()));
        Some(ToolCall {
            id: self.id.clone(),
            name,
            arguments,
            kind: self.kind.clone().unwrap_or(ToolCallKind::Function),
        })
    }
}

fn accumulate_tool_calls(events: &[ChatEvent], acc: &mut BTreeMap<usize, AccumulatingToolCall>) {
    for event in events {
        let delta = match event {
            ChatEvent::ToolCallDelta(delta) => Some(delta),
            ChatEvent::MessageDelta(MessageDelta { content, .. }) => {
                content.iter().find_map(|part| match part {
                    ContentDelta::ToolCall { delta } => Some(delta),
                    _ => None,
                })
            }
            _ => None,
        };

        let Some(delta) = delta else { continue };
        let entry = acc.entry(delta.index).or_default();
        if let Some(id) = &delta.id {
            entry.id = Some(id.clone());
        }
        if let Some(name) = &delta.name {
            entry.name = Some(name.clone());
        }
        if let Some(kind) = &delta.kind {
            entry.kind = Some(kind.clone());
        }
        if let Some(fragment) = &delta.arguments_delta {
            entry.arguments.push_str(fragment);
        }
    }
}

fn step_marker_chunk(step: u32, kind: &str) -> crate::types::ChatChunk {
    crate::types::ChatChunk {
        events: vec![ChatEvent::Custom {
            data: serde_json::json!({ "step": step, "kind": kind }),
        }],
        usage: None,
        is_terminal: false,
        provider: Default::default(),
    }
}

/// 把一个完整的缓存命中响应回放成单个终止 chunk，供 `stream_text` 在缓存命中时
/// 不必真正发起新的流式请求。
fn response_to_replay_chunk(response: &ChatResponse) -> crate::types::ChatChunk {
    let mut events = Vec::new();
    for output in &response.outputs {
        match output {
            OutputItem::Message { message, index } => {
                let content = message
                    .content
                    .iter()
                    .filter_map(|part| match part {
                        ContentPart::Text(text) => Some(ContentDelta::Text {
                            text: text.text.clone(),
                        }),
                        _ => None,
                    })
                    .collect();
                events.push(ChatEvent::MessageDelta(MessageDelta {
                    index: *index,
                    role: Some(message.role.clone()),
                    content,
                    finish_reason: response.finish_reason.clone(),
                }));
            }
            OutputItem::ToolCall { call, index } => {
                events.push(ChatEvent::ToolCallDelta(ToolCallDelta {
                    index: *index,
                    id: call.id.clone(),
                    name: Some(call.name.clone()),
                    arguments_delta: Some(call.arguments.to_string()),
                    kind: Some(call.kind.clone()),
                    is_finished: true,
                }));
            }
            _ => {}
        }
    }

    crate::types::ChatChunk {
        events,
        usage: response.usage.clone(),
        is_terminal: true,
        provider: response.provider.clone(),
    }
}

fn extract_tool_calls(response: &ChatResponse) -> Vec<ToolCall> {
    response
        .outputs
        .iter()
        .filter_map(|output| match output {
            OutputItem::ToolCall { call, .. } => Some(call.clone()),
            _ => None,
        })
        .collect()
}

fn assistant_tool_call_message(calls: &[ToolCall]) -> Message {
    Message {
        role: Role::assistant(),
        name: None,
        content: calls.iter().cloned().map(ContentPart::ToolCall).collect(),
        metadata: None,
    }
}

fn tool_result_message(result: ToolResult) -> Message {
    Message {
        role: Role("tool".to_string()),
        name: None,
        content: vec![ContentPart::ToolResult(result)],
        metadata: None,
    }
}

/// Pre-flight capability check, run before any HTTP attempt.
///
/// Compares the request's content (images/audio/video, tool definitions) against what the
/// resolved provider declares in its [`CapabilityDescriptor`], failing synchronously with
/// [`LLMError::UnsupportedFeature`] rather than letting the vendor reject the call over the
/// wire.
fn validate_capabilities(
    messages: &[Message],
    tools: &[ToolDefinition],
    caps: &CapabilityDescriptor,
) -> Result<(), LLMError> {
    let has_part = |predicate: fn(&ContentPart) -> bool| {
        messages
            .iter()
            .any(|message| message.content.iter().any(predicate))
    };

    if !caps.supports_image_input && has_part(|part| matches!(part, ContentPart::Image(_))) {
        return Err(LLMError::UnsupportedFeature {
            feature: "image_input",
        });
    }
    if !caps.supports_audio_input && has_part(|part| matches!(part, ContentPart::Audio(_))) {
        return Err(LLMError::UnsupportedFeature {
            feature: "audio_input",
        });
    }
    if !caps.supports_video_input && has_part(|part| matches!(part, ContentPart::Video(_))) {
        return Err(LLMError::UnsupportedFeature {
            feature: "video_input",
        });
    }
    if !caps.supports_tools && !tools.is_empty() {
        return Err(LLMError::UnsupportedFeature { feature: "tools" });
    }

    Ok(())
}

fn build_request(
    messages: &[Message],
    tools: &[ToolDefinition],
    tool_choice: &Option<ToolChoice>,
    response_format: &Option<ResponseFormat>,
    options: &ChatOptions,
) -> ChatRequest {
    ChatRequest {
        messages: messages.to_vec(),
        options: options.clone(),
        tools: tools.to_vec(),
        tool_choice: tool_choice.clone(),
        response_format: response_format.clone(),
        metadata: None,
    }
}
