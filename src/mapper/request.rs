//! Request shaping: OpenAI chat-completion body -> Anthropic messages body.

use serde_json::{json, Value};

use crate::proxy::types::{
    ChatCompletionRequest, ChatMessage, ContentPart, MessageContent, ToolCall,
};
use crate::router::{Plugin, WEB_SEARCH_PLUGIN};

use super::MapError;

/// Anthropic requires max_tokens; used when the caller sets no limit.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Translate an OpenAI-format request body for an Anthropic-native endpoint.
///
/// Legacy constructs with no Anthropic equivalent (`function_call`,
/// `logit_bias`) are rejected outright rather than silently dropped.
pub fn to_anthropic_body(
    body: &Value,
    provider_model_id: &str,
    plugins: &[Plugin],
) -> Result<Value, MapError> {
    let request: ChatCompletionRequest = serde_json::from_value(body.clone())
        .map_err(|e| MapError::InvalidMessage(e.to_string()))?;

    if request.function_call.is_some() {
        return Err(MapError::Unsupported("function_call"));
    }
    if request.logit_bias.is_some() {
        return Err(MapError::Unsupported("logit_bias"));
    }

    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<Value> = Vec::new();

    for message in &request.messages {
        match message {
            ChatMessage::System { content, .. } => {
                system_parts.push(content.text());
            }
            ChatMessage::User { content, .. } => {
                messages.push(json!({
                    "role": "user",
                    "content": map_content(content)?,
                }));
            }
            ChatMessage::Assistant {
                content,
                tool_calls,
                ..
            } => {
                messages.push(map_assistant(content.as_ref(), tool_calls.as_deref())?);
            }
            ChatMessage::Tool {
                content,
                tool_call_id,
            } => {
                // Tool results ride on a user turn in the Anthropic format.
                messages.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": tool_call_id,
                        "content": content.text(),
                    }],
                }));
            }
        }
    }

    let max_tokens = request
        .max_tokens
        .or(request.max_completion_tokens)
        .unwrap_or(DEFAULT_MAX_TOKENS);

    let mut out = json!({
        "model": provider_model_id,
        "max_tokens": max_tokens,
        "messages": messages,
    });
    let object = out.as_object_mut().expect("out is an object");

    if !system_parts.is_empty() {
        object.insert("system".to_string(), json!(system_parts.join("\n")));
    }
    if let Some(temperature) = request.temperature {
        object.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(top_p) = request.top_p {
        object.insert("top_p".to_string(), json!(top_p));
    }
    if let Some(stop) = request.stop {
        object.insert("stop_sequences".to_string(), json!(stop.into_vec()));
    }
    if let Some(stream) = request.stream {
        object.insert("stream".to_string(), json!(stream));
    }

    let mut tools: Vec<Value> = request
        .tools
        .unwrap_or_default()
        .into_iter()
        .map(|tool| {
            let mut mapped = json!({
                "name": tool.function.name,
                "input_schema": tool.function.parameters.unwrap_or(json!({"type": "object"})),
            });
            if let Some(description) = tool.function.description {
                mapped["description"] = json!(description);
            }
            mapped
        })
        .collect();
    for plugin in plugins {
        if plugin.id == WEB_SEARCH_PLUGIN {
            let mut tool = json!({
                "type": "web_search_20250305",
                "name": "web_search",
            });
            if let Some(max_uses) = plugin
                .config
                .as_ref()
                .and_then(|c| c.get("max_uses"))
                .and_then(|v| v.as_u64())
            {
                tool.as_object_mut()
                    .expect("tool is an object")
                    .insert("max_uses".to_string(), json!(max_uses));
            }
            tools.push(tool);
        }
    }
    if !tools.is_empty() {
        object.insert("tools".to_string(), json!(tools));
    }

    Ok(out)
}

fn map_content(content: &MessageContent) -> Result<Value, MapError> {
    match content {
        MessageContent::Text(text) => Ok(json!(text)),
        MessageContent::Parts(parts) => {
            let blocks: Vec<Value> = parts.iter().map(map_part).collect::<Result<_, _>>()?;
            Ok(json!(blocks))
        }
    }
}

fn map_part(part: &ContentPart) -> Result<Value, MapError> {
    match part {
        ContentPart::Text { text } => Ok(json!({"type": "text", "text": text})),
        ContentPart::ImageUrl { image_url } => {
            // A data URI carries inline base64; anything else is a plain URL.
            if let Some(rest) = image_url.url.strip_prefix("data:") {
                let (media_type, data) = rest
                    .split_once(";base64,")
                    .ok_or_else(|| MapError::InvalidMessage("malformed data URI".to_string()))?;
                Ok(json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": media_type,
                        "data": data,
                    },
                }))
            } else {
                Ok(json!({
                    "type": "image",
                    "source": {"type": "url", "url": image_url.url},
                }))
            }
        }
    }
}

fn map_assistant(
    content: Option<&MessageContent>,
    tool_calls: Option<&[ToolCall]>,
) -> Result<Value, MapError> {
    let mut blocks: Vec<Value> = Vec::new();

    if let Some(content) = content {
        let text = content.text();
        if !text.is_empty() {
            blocks.push(json!({"type": "text", "text": text}));
        }
    }

    for call in tool_calls.unwrap_or_default() {
        let input: Value = serde_json::from_str(&call.function.arguments).map_err(|_| {
            MapError::InvalidMessage(format!(
                "tool call '{}' has non-JSON arguments",
                call.function.name
            ))
        })?;
        blocks.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.function.name,
            "input": input,
        }));
    }

    Ok(json!({"role": "assistant", "content": blocks}))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_body() -> Value {
        json!({
            "model": "claude-3-5-sonnet-20241022/anthropic",
            "messages": [
                {"role": "system", "content": "be helpful"},
                {"role": "user", "content": "hello"}
            ]
        })
    }

    #[test]
    fn system_message_extracted_to_top_level() {
        let out = to_anthropic_body(&base_body(), "claude-3-5-sonnet-20241022", &[]).unwrap();
        assert_eq!(out["system"], "be helpful");
        assert_eq!(out["messages"].as_array().unwrap().len(), 1);
        assert_eq!(out["messages"][0]["role"], "user");
        assert_eq!(out["model"], "claude-3-5-sonnet-20241022");
        assert_eq!(out["max_tokens"], 4096);
    }

    #[test]
    fn tool_calls_become_tool_use_blocks() {
        let body = json!({
            "model": "m",
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "tool_calls": [
                    {"id": "call_abc", "type": "function",
                     "function": {"name": "get_weather", "arguments": "{\"city\":\"Oslo\"}"}}
                ]},
                {"role": "tool", "content": "snow", "tool_call_id": "call_abc"}
            ]
        });
        let out = to_anthropic_body(&body, "m", &[]).unwrap();
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);

        let tool_use = &messages[1]["content"][0];
        assert_eq!(tool_use["type"], "tool_use");
        assert_eq!(tool_use["id"], "call_abc");
        assert_eq!(tool_use["input"]["city"], "Oslo");

        let tool_result = &messages[2]["content"][0];
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(tool_result["type"], "tool_result");
        assert_eq!(tool_result["tool_use_id"], "call_abc");
        assert_eq!(tool_result["content"], "snow");
    }

    #[test]
    fn data_uri_image_maps_to_base64_source() {
        let body = json!({
            "model": "m",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "what is this"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,aWJt"}}
            ]}]
        });
        let out = to_anthropic_body(&body, "m", &[]).unwrap();
        let image = &out["messages"][0]["content"][1];
        assert_eq!(image["source"]["type"], "base64");
        assert_eq!(image["source"]["media_type"], "image/png");
        assert_eq!(image["source"]["data"], "aWJt");
    }

    #[test]
    fn bare_url_image_maps_to_url_source() {
        let body = json!({
            "model": "m",
            "messages": [{"role": "user", "content": [
                {"type": "image_url", "image_url": {"url": "https://x.test/cat.png"}}
            ]}]
        });
        let out = to_anthropic_body(&body, "m", &[]).unwrap();
        assert_eq!(
            out["messages"][0]["content"][0]["source"]["type"],
            "url"
        );
    }

    #[test]
    fn function_call_rejected() {
        let mut body = base_body();
        body["function_call"] = json!({"name": "legacy"});
        let error = to_anthropic_body(&body, "m", &[]).unwrap_err();
        assert!(matches!(error, MapError::Unsupported("function_call")));
    }

    #[test]
    fn logit_bias_rejected() {
        let mut body = base_body();
        body["logit_bias"] = json!({"50256": -100});
        let error = to_anthropic_body(&body, "m", &[]).unwrap_err();
        assert!(matches!(error, MapError::Unsupported("logit_bias")));
    }

    #[test]
    fn web_search_plugin_appends_server_tool() {
        let plugins = vec![Plugin {
            id: "web".to_string(),
            config: Some(json!({"max_uses": 2})),
        }];
        let out = to_anthropic_body(&base_body(), "m", &plugins).unwrap();
        let tools = out["tools"].as_array().unwrap();
        assert_eq!(tools[0]["type"], "web_search_20250305");
        assert_eq!(tools[0]["max_uses"], 2);
    }

    #[test]
    fn stop_sequences_and_sampling_mapped() {
        let mut body = base_body();
        body["stop"] = json!("END");
        body["temperature"] = json!(0.2);
        body["stream"] = json!(true);
        let out = to_anthropic_body(&body, "m", &[]).unwrap();
        assert_eq!(out["stop_sequences"], json!(["END"]));
        assert_eq!(out["temperature"], 0.2);
        assert_eq!(out["stream"], true);
    }
}
