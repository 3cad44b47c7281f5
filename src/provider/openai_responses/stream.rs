use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use serde_json::json;

use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::provider::ChatStream;
use crate::types::{
    ChatChunk, ChatEvent, ContentDelta, MessageDelta, ProviderMetadata, Role, ToolCallDelta,
    ToolCallKind,
};

use super::response::convert_usage;
use super::types::OpenAiResponsesStreamEvent;

pub(crate) fn create_stream(
    body: HttpBodyStream,
    provider: &'static str,
    endpoint: String,
) -> ChatStream {
    Box::pin(OpenAiResponsesSseStream::new(body, provider, endpoint))
}

/// 当流式请求返回非 2xx 状态码时收集 body 用于错误信息
pub(crate) async fn collect_stream_text(
    mut body: HttpBodyStream,
    provider: &'static str,
) -> Result<String, LLMError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    String::from_utf8(bytes).map_err(|err| LLMError::Provider {
        provider,
        message: format!("failed to decode stream error body: {err}"),
    })
}

struct OpenAiResponsesSseStream {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    data_lines: Vec<Vec<u8>>,
    pending: VecDeque<Result<ChatChunk, LLMError>>,
    provider: &'static str,
    endpoint: String,
    stream_closed: bool,
    done_received: bool,
}

impl OpenAiResponsesSseStream {
    fn new(body: HttpBodyStream, provider: &'static str, endpoint: String) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            data_lines: Vec::new(),
            pending: VecDeque::new(),
            provider,
            endpoint,
            stream_closed: false,
            done_received: false,
        }
    }

    fn handle_line(&mut self, line: Vec<u8>) {
        if line.starts_with(b"data:") {
            let mut data = line[5..].to_vec();
            if let Some(first) = data.first() {
                if *first == b' ' {
                    data.remove(0);
                }
            }
            self.data_lines.push(data);
        }
    }

    fn flush_event(&mut self) -> Result<(), LLMError> {
        if self.data_lines.is_empty() {
            return Ok(());
        }
        let mut joined = Vec::new();
        for (idx, mut segment) in self.data_lines.drain(..).enumerate() {
            if idx > 0 {
                joined.push(b'\n');
            }
            joined.append(&mut segment);
        }
        if joined.is_empty() {
            return Ok(());
        }
        let data = String::from_utf8(joined).map_err(|err| LLMError::Provider {
            provider: self.provider,
            message: format!("invalid UTF-8 in stream chunk: {err}"),
        })?;
        if data.trim() == "[DONE]" {
            // 如果已经收到 completed 事件，则忽略额外的 [DONE]
            if !self.done_received {
                let chunk = ChatChunk {
                    events: Vec::new(),
                    usage: None,
                    is_terminal: true,
                    provider: ProviderMetadata {
                        provider: self.provider.to_string(),
                        request_id: None,
                        endpoint: Some(self.endpoint.clone()),
                        raw: Some(json!({"event": "[DONE]"})),
                    },
                };
                self.pending.push_back(Ok(chunk));
                self.done_received = true;
            }
        } else {
            let event: OpenAiResponsesStreamEvent =
                serde_json::from_str(&data).map_err(|err| LLMError::Provider {
                    provider: self.provider,
                    message: format!("failed to parse Responses stream event: {err}"),
                })?;
            if let Some(chunk) = convert_stream_event(event, self.provider, &self.endpoint)? {
                if chunk.is_terminal {
                    self.done_received = true;
                }
                self.pending.push_back(Ok(chunk));
            }
        }
        Ok(())
    }
}

impl Stream for OpenAiResponsesSseStream {
    type Item = Result<ChatChunk, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(item) = this.pending.pop_front() {
            return Poll::Ready(Some(item));
        }
        loop {
            if this.stream_closed {
                if !this.buffer.is_empty() {
                    let line = this.buffer.drain(..).collect::<Vec<_>>();
                    this.handle_line(line);
                    if let Err(err) = this.flush_event() {
                        return Poll::Ready(Some(Err(err)));
                    }
                    if let Some(item) = this.pending.pop_front() {
                        return Poll::Ready(Some(item));
                    }
                }
                return Poll::Ready(None);
            }
            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(chunk_result)) => match chunk_result {
                    Ok(bytes) => {
                        this.buffer.extend_from_slice(&bytes);
                        while let Some(pos) = find_newline(&this.buffer) {
                            let mut line: Vec<u8> = this.buffer.drain(..=pos).collect();
                            if line.last() == Some(&b'\n') {
                                line.pop();
                            }
                            if line.last() == Some(&b'\r') {
                                line.pop();
                            }
                            if line.is_empty() {
                                if let Err(err) = this.flush_event() {
                                    return Poll::Ready(Some(Err(err)));
                                }
                                if let Some(item) = this.pending.pop_front() {
                                    return Poll::Ready(Some(item));
                                }
                            } else {
                                this.handle_line(line);
                            }
                        }
                        if let Some(item) = this.pending.pop_front() {
                            return Poll::Ready(Some(item));
                        }
                    }
                    Err(err) => return Poll::Ready(Some(Err(err))),
                },
                Poll::Ready(None) => {
                    this.stream_closed = true;
                    if let Err(err) = this.flush_event() {
                        return Poll::Ready(Some(Err(err)));
                    }
                    return this
                        .pending
                        .pop_front()
                        .map_or(Poll::Ready(None), |item| Poll::Ready(Some(item)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

fn find_newline(buffer: &[u8]) -> Option<usize> {
    buffer.iter().position(|b| *b == b'\n')
}

fn convert_stream_event(
    event: OpenAiResponsesStreamEvent,
    provider: &'static str,
    endpoint: &str,
) -> Result<Option<ChatChunk>, LLMError> {
    match event.event_type.as_str() {
        "response.output_text.delta" => {
            let index = event.output_index.unwrap_or(0);
            let delta = event.delta.as_deref().unwrap_or("").to_string();
            if delta.is_empty() {
                return Ok(None);
            }
            let message_delta = MessageDelta {
                index,
                // Responses 流式文本默认来自 assistant 角色
                role: Some(Role::assistant()),
                content: vec![ContentDelta::Text { text: delta }],
                finish_reason: None,
            };
            let raw = serde_json::to_value(event).ok();
            Ok(Some(ChatChunk {
                events: vec![ChatEvent::MessageDelta(message_delta)],
                usage: None,
                is_terminal: false,
                provider: ProviderMetadata {
                    provider: provider.to_string(),
                    request_id: None,
                    endpoint: Some(endpoint.to_string()),
                    raw,
                },
            }))
        }
        "response.completed" => {
            let response = event.response.ok_or_else(|| LLMError::Provider {
                provider,
                message: "response.completed event missing response".to_string(),
            })?;
            let raw = serde_json::to_value(&response).ok();
            let usage = response.usage.map(convert_usage);
            Ok(Some(ChatChunk {
                events: Vec::new(),
                usage,
                is_terminal: true,
                provider: ProviderMetadata {
                    provider: provider.to_string(),
                    request_id: None,
                    endpoint: Some(endpoint.to_string()),
                    raw,
                },
            }))
        }
        "response.output_item.added" => {
            let item = event.item.unwrap_or(serde_json::Value::Null);
            if item.get("type").and_then(|v| v.as_str()) != Some("function_call") {
                return Ok(None);
            }
            let index = event.output_index.unwrap_or(0);
            let id = item
                .get("call_id")
                .and_then(|v| v.as_str())
                .or_else(|| item.get("id").and_then(|v| v.as_str()))
                .map(str::to_string)
                .or(event.item_id.clone());
            let name = item
                .get("name")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let tool_delta = ToolCallDelta {
                index,
                id,
                name,
                arguments_delta: None,
                kind: Some(ToolCallKind::Function),
                is_finished: false,
            };
            let message_delta = MessageDelta {
                index,
                role: Some(Role::assistant()),
                content: vec![ContentDelta::ToolCall { delta: tool_delta }],
                finish_reason: None,
            };
            Ok(Some(ChatChunk {
                events: vec![ChatEvent::MessageDelta(message_delta)],
                usage: None,
                is_terminal: false,
                provider: ProviderMetadata {
                    provider: provider.to_string(),
                    request_id: None,
                    endpoint: Some(endpoint.to_string()),
                    raw: None,
                },
            }))
        }
        "response.function_call_arguments.delta" => {
            let index = event.output_index.unwrap_or(0);
            let delta = event.delta.unwrap_or_default();
            if delta.is_empty() {
                return Ok(None);
            }
            let tool_delta = ToolCallDelta {
                index,
                id: event.item_id.clone(),
                name: None,
                arguments_delta: Some(delta),
                kind: Some(ToolCallKind::Function),
                is_finished: false,
            };
            let message_delta = MessageDelta {
                index,
                role: Some(Role::assistant()),
                content: vec![ContentDelta::ToolCall { delta: tool_delta }],
                finish_reason: None,
            };
            Ok(Some(ChatChunk {
                events: vec![ChatEvent::MessageDelta(message_delta)],
                usage: None,
                is_terminal: false,
                provider: ProviderMetadata {
                    provider: provider.to_string(),
                    request_id: None,
                    endpoint: Some(endpoint.to_string()),
                    raw: None,
                },
            }))
        }
        "response.function_call_arguments.done" => {
            let index = event.output_index.unwrap_or(0);
            let tool_delta = ToolCallDelta {
                index,
                id: event.item_id.clone(),
                name: None,
                arguments_delta: None,
                kind: Some(ToolCallKind::Function),
                is_finished: true,
            };
            let message_delta = MessageDelta {
                index,
                role: Some(Role::assistant()),
                content: vec![ContentDelta::ToolCall { delta: tool_delta }],
                finish_reason: None,
            };
            Ok(Some(ChatChunk {
                events: vec![ChatEvent::MessageDelta(message_delta)],
                usage: None,
                is_terminal: false,
                provider: ProviderMetadata {
                    provider: provider.to_string(),
                    request_id: None,
                    endpoint: Some(endpoint.to_string()),
                    raw: None,
                },
            }))
        }
        // 其他事件先忽略（response.created / response.in_progress 等），必要时扩展为 Custom 事件
        _ => Ok(None),
    }
}
