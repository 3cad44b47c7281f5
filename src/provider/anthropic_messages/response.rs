use std::collections::HashMap;

use serde_json::json;

use crate::error::LLMError;
use crate::types::{
    ChatResponse, ContentPart, FinishReason, ImageContent, ImageSource, Message, OutputItem,
    ProviderMetadata, Role, TextContent, TokenUsage, ToolCall, ToolCallKind,
};

use super::types::{
    AnthropicContentBlock, AnthropicImageSource, AnthropicMessageResponse, AnthropicUsage,
};

pub(crate) fn map_response(
    resp: AnthropicMessageResponse,
    provider: &'static str,
    endpoint: String,
) -> Result<ChatResponse, LLMError> {
    let raw = serde_json::to_value(&resp).ok();

    let mut outputs = Vec::new();
    let mut message_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in &resp.content {
        match convert_content_block(block)? {
            ConvertedBlock::MessagePart(part) => message_parts.push(part),
            ConvertedBlock::ToolCall(call) => tool_calls.push(call),
            ConvertedBlock::Ignored => {}
        }
    }

    // 如果有非工具内容，则构造一条完整的 assistant 消息
    if !message_parts.is_empty() {
        outputs.push(OutputItem::Message {
            message: Message {
                role: Role::assistant(),
                name: None,
                content: message_parts,
                metadata: None,
            },
            index: 0,
        });
    }

    for call in tool_calls {
        outputs.push(OutputItem::ToolCall { call, index: 0 });
    }

    let finish_reason = resp.stop_reason.as_deref().map(convert_finish_reason);
    let usage = resp.usage.as_ref().map(convert_usage);

    Ok(ChatResponse {
        outputs,
        usage,
        finish_reason,
        model: Some(resp.model),
        provider: ProviderMetadata {
            provider: provider.to_string(),
            request_id: resp.id,
            endpoint: Some(endpoint),
            raw,
        },
    })
}

enum ConvertedBlock {
    MessagePart(ContentPart),
    ToolCall(ToolCall),
    Ignored,
}

fn convert_content_block(block: &AnthropicContentBlock) -> Result<ConvertedBlock, LLMError> {
    match block.kind.as_str() {
        "text" => Ok(ConvertedBlock::MessagePart(ContentPart::Text(
            TextContent {
                text: block.text.clone().unwrap_or_default(),
            },
        ))),
        "image" => {
            if let Some(source) = &block.source {
                Ok(ConvertedBlock::MessagePart(ContentPart::Image(
                    convert_image_source(source),
                )))
            } else {
                // 缺少 source 时当作原始数据透传
                let value = serde_json::to_value(block).unwrap_or_else(|_| json!({}));
                Ok(ConvertedBlock::MessagePart(ContentPart::Data {
                    data: value,
                }))
            }
        }
        "tool_use" => {
            let id = block.id.clone();
            let name = block.name.clone().unwrap_or_default();
            let input = block.input.clone().unwrap_or_else(|| json!({}));
            Ok(ConvertedBlock::ToolCall(ToolCall {
                id,
                name,
                arguments: input,
                // Anthropic 工具调用本质上也是函数调用，这里统一视为 Function
                kind: ToolCallKind::Function,
            }))
        }
        // 工具结果和文档等暂时作为 Data 透传，便于上层按需解析
        "tool_result" | "document" => {
            let value = serde_json::to_value(block).unwrap_or_else(|_| json!({}));
            Ok(ConvertedBlock::MessagePart(ContentPart::Data {
                data: value,
            }))
        }
        _ => {
            let value = serde_json::to_value(block).unwrap_or_else(|_| json!({}));
            Ok(ConvertedBlock::MessagePart(ContentPart::Data {
                data: value,
            }))
        }
    }
}

fn convert_image_source(source: &AnthropicImageSource) -> ImageContent {
    ImageContent {
        source: ImageSource::Base64 {
            data: source.data.clone(),
            mime_type: Some(source.media_type.clone()),
        },
        // Anthropic 当前未公开 detail 选项，这里保守置为 None
        detail: None,
        metadata: None,
    }
}

pub(crate) fn convert_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        "stop_sequence" => FinishReason::Stop,
        other => FinishReason::Other(other.to_string()),
    }
}

pub(crate) fn convert_usage(usage: &AnthropicUsage) -> TokenUsage {
    let mut details = HashMap::new();
    if let Some(v) = usage.cache_creation_input_tokens {
        details.insert("cache_creation_input_tokens".to_string(), json!(v));
    }
    if let Some(v) = usage.cache_read_input_tokens {
        details.insert("cache_read_input_tokens".to_string(), json!(v));
    }

    TokenUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        reasoning_tokens: None,
        total_tokens: usage
            .input_tokens
            .zip(usage.output_tokens)
            .map(|(i, o)| i + o),
        details: if details.is_empty() {
            None
        } else {
            Some(details)
        },
    }
}
