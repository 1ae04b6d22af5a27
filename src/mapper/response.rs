//! Non-streaming response mapping: Anthropic message -> OpenAI chat completion.

use serde::Deserialize;
use serde_json::Value;

use crate::proxy::types::{
    ChatCompletionResponse, Choice, FunctionCall, PromptTokensDetails, ResponseMessage, ToolCall,
    Usage,
};

use super::MapError;

#[derive(Debug, Deserialize)]
struct AnthropicMessage {
    id: String,
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

/// Map an Anthropic stop reason onto the OpenAI finish_reason enum.
pub fn map_stop_reason(reason: Option<&str>) -> &'static str {
    match reason {
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        // end_turn, stop_sequence, and anything unrecognized.
        _ => "stop",
    }
}

/// Translate a complete Anthropic response body into the caller's format.
pub fn anthropic_to_openai(body: &Value) -> Result<Value, MapError> {
    let message: AnthropicMessage = serde_json::from_value(body.clone())
        .map_err(|e| MapError::InvalidResponse(e.to_string()))?;

    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in &message.content {
        match block {
            ContentBlock::Text { text: t } => text.push_str(t),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall {
                    id: id.clone(),
                    kind: "function".to_string(),
                    function: FunctionCall {
                        name: name.clone(),
                        arguments: serde_json::to_string(input)
                            .map_err(|e| MapError::InvalidResponse(e.to_string()))?,
                    },
                });
            }
            ContentBlock::Other => {}
        }
    }

    let usage = message.usage.as_ref().map(|u| Usage {
        prompt_tokens: u.input_tokens,
        completion_tokens: u.output_tokens,
        total_tokens: u.input_tokens + u.output_tokens,
        prompt_tokens_details: (u.cache_read_input_tokens > 0).then(|| PromptTokensDetails {
            cached_tokens: u.cache_read_input_tokens,
        }),
    });

    let response = ChatCompletionResponse {
        id: message.id,
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: message.model,
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content: (!text.is_empty()).then_some(text),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: Some(map_stop_reason(message.stop_reason.as_deref()).to_string()),
        }],
        usage,
    };

    serde_json::to_value(response).map_err(|e| MapError::InvalidResponse(e.to_string()))
}
