//! Anthropic messages API 线协议（claude-haiku / claude-sonnet）。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{errors::RouterError, state::TokenUsage};

use super::llm_openai::{ChatCall, estimate_usage};

const ANTHROPIC_VERSION: &str = "2023-06-01";

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

// ── Call ──────────────────────────────────────────────────────────────────────

pub(crate) async fn chat(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    call: &ChatCall<'_>,
    provider: &'static str,
    timeout: Duration,
) -> Result<(String, TokenUsage), RouterError> {
    let body = ApiRequest {
        model: call.model,
        max_tokens: call.max_tokens,
        temperature: call.temperature,
        system: call.system,
        messages: vec![ApiMessage {
            role: "user",
            content: call.prompt,
        }],
    };

    let resp = client
        .post(format!("{base_url}/v1/messages"))
        .timeout(timeout)
        .header("x-api-key", api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .json(&body)
        .send()
        .await
        .map_err(|e| RouterError::from_reqwest(provider, timeout, e))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(RouterError::from_status(provider, status, &text));
    }

    let parsed: ApiResponse = resp.json().await.map_err(|e| RouterError::Malformed {
        provider,
        message: format!("response decode failed: {e}"),
    })?;

    let text: String = parsed
        .content
        .iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text.as_deref())
        .collect::<Vec<_>>()
        .join("");
    if text.trim().is_empty() {
        return Err(RouterError::Malformed {
            provider,
            message: "empty content".to_string(),
        });
    }

    let usage = parsed
        .usage
        .map(|u| TokenUsage::new(u.input_tokens.unwrap_or(0), u.output_tokens.unwrap_or(0)))
        .unwrap_or_else(|| estimate_usage(call, &text));
    Ok((text, usage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_is_top_level_not_a_message() {
        let body = ApiRequest {
            model: "claude-haiku",
            max_tokens: 32,
            temperature: 0.1,
            system: Some("terse"),
            messages: vec![ApiMessage {
                role: "user",
                content: "hi",
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["system"], "terse");
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn text_blocks_are_concatenated() {
        let raw = r#"{"content":[{"type":"text","text":"a"},{"type":"tool_use"},{"type":"text","text":"b"}],"usage":{"input_tokens":5,"output_tokens":2}}"#;
        let parsed: ApiResponse = serde_json::from_str(raw).unwrap();
        let text: String = parsed
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text.as_deref())
            .collect();
        assert_eq!(text, "ab");
    }
}
