use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::types::{
    AudioContent, ChatRequest, ContentPart, FileContent, ImageContent, ImageDetail, ImageSource,
    MediaSource, Message, ReasoningEffort, ResponseFormat, TextContent, ToolCall, ToolChoice,
    ToolDefinition, ToolKind, ToolResult, VideoContent,
};

/// Builds the request body expected by the OpenAI Responses API.
pub(crate) fn build_openai_responses_body(
    request: &ChatRequest,
    model: &str,
    stream: bool,
) -> Result<Value, LLMError> {
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));

    // Fold system/developer messages into `instructions` and treat the rest as `input`.
    let mut instructions_parts = Vec::new();
    let mut input_messages = Vec::new();
    for message in &request.messages {
        match message.role.0.as_str() {
            "system" | "developer" => {
                if let Some(text) = extract_text_from_message(message) {
                    instructions_parts.push(text);
                }
            }
            _ => {
                input_messages.extend(convert_input_message(message)?);
            }
        }
    }

    if !input_messages.is_empty() {
        body.insert("input".to_string(), Value::Array(input_messages));
    }

    if !instructions_parts.is_empty() {
        let instructions = instructions_parts.join("\n\n");
        body.insert("instructions".to_string(), Value::String(instructions));
    }

    // Sampling and control parameters.
    if let Some(temperature) = request.options.temperature {
        body.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = request.options.top_p {
        body.insert("top_p".to_string(), Value::from(top_p));
    }
    if let Some(max_tokens) = request.options.max_output_tokens {
        body.insert("max_output_tokens".to_string(), Value::from(max_tokens));
    }
    if let Some(parallel) = request.options.parallel_tool_calls {
        body.insert("parallel_tool_calls".to_string(), Value::from(parallel));
    }

    // Map reasoning options; Responses officially documents effort plus a few extras.
    if let Some(reasoning) = &request.options.reasoning {
        let mut reasoning_obj = Map::new();
        if let Some(effort) = &reasoning.effort {
            reasoning_obj.insert(
                "effort".to_string(),
                Value::String(format_reasoning_effort(effort)),
            );
        }
        // Forward remaining fields verbatim so callers can control them.
        for (k, v) in &reasoning.extra {
            reasoning_obj.insert(k.clone(), v.clone());
        }
        if !reasoning_obj.is_empty() {
            body.insert("reasoning".to_string(), Value::Object(reasoning_obj));
        }
    }

    // tools & tool_choice
    if !request.tools.is_empty() {
        body.insert(
            "tools".to_string(),
            Value::Array(convert_tools(&request.tools)?),
        );
    }
    if let Some(choice) = &request.tool_choice {
        if let Some(value) = convert_tool_choice(choice)? {
            body.insert("tool_choice".to_string(), value);
        }
    }

    // Response format maps to `text.format`.
    if let Some(format) = &request.response_format {
        // If callers already set `text` via `extra`, honor that configuration first.
        if !body.contains_key("text") {
            body.insert("text".to_string(), convert_text_config(format));
        }
    }

    // Metadata is mapped directly.
    if let Some(metadata) = &request.metadata {
        let meta: Map<String, Value> = metadata.clone().into_iter().collect();
        body.insert("metadata".to_string(), Value::Object(meta));
    }

    // Extra provider settings (include, service_tier, user, previous_response_id, etc.).
    for (k, v) in &request.options.extra {
        body.insert(k.clone(), v.clone());
    }

    body.insert("stream".to_string(), Value::Bool(stream));

    Ok(Value::Object(body))
}

fn extract_text_from_message(message: &Message) -> Option<String> {
    let mut buffer = String::new();
    for part in &message.content {
        if let ContentPart::Text(TextContent { text }) = part {
            if !buffer.is_empty() {
                buffer.push('\n');
            }
            buffer.push_str(text);
        }
    }
    if buffer.is_empty() {
        None
    } else {
        Some(buffer)
    }
}

/// Converts one unified [`Message`] into zero or more Responses API input items.
///
/// `function_call` / `function_call_output` are distinct top-level item types in this API
/// (unlike Chat Completions, which embeds tool calls inside a message); a message containing
/// a mix of text and tool parts is split into a `message` item plus one item per tool part,
/// preserving their relative order.
fn convert_input_message(message: &Message) -> Result<Vec<Value>, LLMError> {
    let mut items = Vec::new();
    let mut content_items = Vec::new();

    let flush_message = |content_items: &mut Vec<Value>, items: &mut Vec<Value>| {
        if !content_items.is_empty() {
            let mut obj = Map::new();
            obj.insert("type".to_string(), Value::String("message".to_string()));
            obj.insert("role".to_string(), Value::String(message.role.0.clone()));
            obj.insert(
                "content".to_string(),
                Value::Array(std::mem::take(content_items)),
            );
            items.push(Value::Object(obj));
        }
    };

    for part in &message.content {
        match part {
            ContentPart::ToolCall(ToolCall {
                id, name, arguments, ..
            }) => {
                flush_message(&mut content_items, &mut items);
                let call_id = id.clone().ok_or_else(|| LLMError::Validation {
                    message: "tool_call content requires an id (mapped to function_call.call_id)"
                        .to_string(),
                })?;
                items.push(json!({
                    "type": "function_call",
                    "call_id": call_id,
                    "name": name,
                    "arguments": arguments.to_string(),
                }));
            }
            ContentPart::ToolResult(ToolResult {
                call_id, output, ..
            }) => {
                flush_message(&mut content_items, &mut items);
                let call_id = call_id.clone().ok_or_else(|| LLMError::Validation {
                    message: "tool_result content requires call_id (mapped to function_call_output.call_id)"
                        .to_string(),
                })?;
                let output_text = match output {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                items.push(json!({
                    "type": "function_call_output",
                    "call_id": call_id,
                    "output": output_text,
                }));
            }
            _ => {
                content_items.push(convert_content_part(part)?);
            }
        }
    }
    flush_message(&mut content_items, &mut items);

    Ok(items)
}

fn convert_content_part(part: &ContentPart) -> Result<Value, LLMError> {
    match part {
        ContentPart::Text(TextContent { text }) => {
            Ok(json!({ "type": "input_text", "text": text }))
        }
        ContentPart::Image(ImageContent { source, detail, .. }) => {
            let detail = detail.as_ref().map(format_image_detail).unwrap_or("auto");
            match source {
                ImageSource::Url { url } => Ok(json!({
                    "type": "input_image",
                    "image_url": url,
                    "detail": detail
                })),
                ImageSource::Base64 { data, mime_type } => {
                    // Match the Chat API by constructing `data:` URLs for inline content.
                    let mime = mime_type.as_deref().unwrap_or("application/octet-stream");
                    Ok(json!({
                        "type": "input_image",
                        "image_url": format!("data:{mime};base64,{data}"),
                        "detail": detail
                    }))
                }
                ImageSource::FileId { file_id } => Ok(json!({
                    "type": "input_image",
                    "file_id": file_id,
                    "detail": detail
                })),
            }
        }
        ContentPart::Audio(AudioContent {
            source, mime_type, ..
        }) => Ok(json!({
            "type": "input_audio",
            "input_audio": {
                "data": match source {
                    MediaSource::Inline { data } => data.clone(),
                    MediaSource::FileId { file_id } => file_id.clone(),
                    MediaSource::Url { url } => url.clone(),
                },
                "format": mime_type.clone().unwrap_or_else(|| "wav".to_string())
            }
        })),
        ContentPart::Video(VideoContent {
            source, mime_type, ..
        }) => Ok(json!({
            "type": "input_video",
            "input_video": {
                "source": match source {
                    MediaSource::Inline { data } => json!({"data": data}),
                    MediaSource::FileId { file_id } => json!({"file_id": file_id}),
                    MediaSource::Url { url } => json!({"url": url}),
                },
                "format": mime_type
            }
        })),
        ContentPart::File(FileContent { file_id, .. }) => Ok(json!({
            "type": "input_file",
            "file_id": file_id
        })),
        ContentPart::Data { data } => Ok(data.clone()),
        ContentPart::ToolCall(_) | ContentPart::ToolResult(_) => Err(LLMError::Validation {
            message: "tool content must use dedicated structs".to_string(),
        }),
    }
}

fn convert_tools(tools: &[ToolDefinition]) -> Result<Vec<Value>, LLMError> {
    tools
        .iter()
        .map(|tool| match &tool.kind {
            ToolKind::Function => {
                let mut obj = Map::new();
                obj.insert("type".to_string(), Value::String("function".to_string()));
                obj.insert("name".to_string(), Value::String(tool.name.clone()));
                if let Some(description) = &tool.description {
                    obj.insert(
                        "description".to_string(),
                        Value::String(description.clone()),
                    );
                }
                if let Some(schema) = &tool.input_schema {
                    obj.insert("parameters".to_string(), schema.clone());
                }
                // Responses sets function tools to strict=true by default; metadata can override when necessary.
                obj.insert("strict".to_string(), Value::Bool(true));
                if let Some(meta) = &tool.metadata {
                    for (k, v) in meta {
                        if k == "type" || k == "name" || k == "parameters" {
                            continue;
                        }
                        obj.insert(k.clone(), v.clone());
                    }
                }
                Ok(Value::Object(obj))
            }
            ToolKind::FileSearch | ToolKind::WebSearch | ToolKind::ComputerUse => {
                let mut obj: Map<String, Value> = tool
                    .metadata
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .collect();
                let default_type = match tool.kind {
                    ToolKind::FileSearch => "file_search",
                    ToolKind::WebSearch => "web_search_preview",
                    ToolKind::ComputerUse => "computer_use_preview",
                    ToolKind::Function | ToolKind::Custom { .. } => unreachable!(),
                };
                obj.entry("type".to_string())
                    .or_insert_with(|| Value::String(default_type.to_string()));
                Ok(Value::Object(obj))
            }
            ToolKind::Custom { name, config } => {
                if let Some(config) = config {
                    Ok(config.clone())
                } else {
                    Ok(json!({ "type": name, "name": tool.name }))
                }
            }
        })
        .collect()
}

fn convert_tool_choice(choice: &ToolChoice) -> Result<Option<Value>, LLMError> {
    match choice {
        ToolChoice::Auto => Ok(Some(Value::String("auto".to_string()))),
        ToolChoice::Any => Ok(Some(Value::String("required".to_string()))),
        ToolChoice::None => Ok(Some(Value::String("none".to_string()))),
        ToolChoice::Tool { name } => Ok(Some(json!({
            "type": "function",
            "function": { "name": name }
        }))),
        ToolChoice::Custom(value) => Ok(Some(value.clone())),
    }
}

fn convert_text_config(format: &ResponseFormat) -> Value {
    match format {
        ResponseFormat::Text => json!({
            "format": { "type": "text" }
        }),
        ResponseFormat::JsonObject => json!({
            "format": { "type": "json_object" }
        }),
        ResponseFormat::JsonSchema { schema } => json!({
            "format": {
                "type": "json_schema",
                // Use a fixed name for simplicity; callers can fully customize via the Custom variant.
                "name": "response",
                "schema": schema
            }
        }),
        // Treat Custom as the full `text` object so callers can set `format` or extra fields.
        ResponseFormat::Custom(value) => value.clone(),
    }
}

fn format_reasoning_effort(effort: &ReasoningEffort) -> String {
    match effort {
        ReasoningEffort::Low => "low".to_string(),
        ReasoningEffort::Medium => "medium".to_string(),
        ReasoningEffort::High => "high".to_string(),
        ReasoningEffort::Custom(value) => value.clone(),
    }
}

fn format_image_detail(detail: &ImageDetail) -> &'static str {
    match detail {
        ImageDetail::Low => "low",
        ImageDetail::High => "high",
        ImageDetail::Auto => "auto",
    }
}
