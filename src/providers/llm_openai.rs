//! OpenAI 兼容 chat completions 线协议（DeepSeek / OpenAI / 本地 Ollama 通用）。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{errors::RouterError, state::TokenUsage};

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Deserialize)]
struct ApiChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

// ── Call ──────────────────────────────────────────────────────────────────────

pub(crate) struct ChatCall<'a> {
    pub model: &'a str,
    pub system: Option<&'a str>,
    pub prompt: &'a str,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// 一次非流式 chat 调用。用量缺失时按 len/4 估算 token 数。
pub(crate) async fn chat(
    client: &reqwest::Client,
    base_url: &str,
    api_key: Option<&str>,
    call: &ChatCall<'_>,
    provider: &'static str,
    timeout: Duration,
) -> Result<(String, TokenUsage), RouterError> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = call.system {
        messages.push(ApiMessage {
            role: "system",
            content: system,
        });
    }
    messages.push(ApiMessage {
        role: "user",
        content: call.prompt,
    });
    let body = ApiRequest {
        model: call.model,
        messages,
        max_tokens: call.max_tokens,
        temperature: call.temperature,
    };

    let mut request = client
        .post(format!("{base_url}/chat/completions"))
        .timeout(timeout)
        .json(&body);
    if let Some(key) = api_key {
        request = request.header("Authorization", format!("Bearer {key}"));
    }

    let resp = request
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

    let usage = parsed
        .usage
        .map(|u| TokenUsage::new(u.prompt_tokens.unwrap_or(0), u.completion_tokens.unwrap_or(0)));
    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(RouterError::Malformed {
            provider,
            message: "empty content".to_string(),
        });
    }

    let usage = usage.unwrap_or_else(|| estimate_usage(call, &text));
    Ok((text, usage))
}

/// provider 未返回用量时的粗略估计（1 token ≈ 4 字符）。
pub(crate) fn estimate_usage(call: &ChatCall<'_>, output: &str) -> TokenUsage {
    let input_chars = call.prompt.len() + call.system.map(str::len).unwrap_or(0);
    TokenUsage::new((input_chars / 4) as u64, (output.len() / 4) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_system_before_user() {
        let body = ApiRequest {
            model: "deepseek-chat",
            messages: vec![
                ApiMessage {
                    role: "system",
                    content: "be terse",
                },
                ApiMessage {
                    role: "user",
                    content: "hi",
                },
            ],
            max_tokens: 64,
            temperature: 0.2,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains(r#""role":"system""#));
        assert!(json.find("system").unwrap() < json.find("user").unwrap());
    }

    #[test]
    fn response_parses_content_and_usage() {
        let raw = r#"{"choices":[{"message":{"content":"ok"}}],"usage":{"prompt_tokens":12,"completion_tokens":3}}"#;
        let parsed: ApiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("ok"));
        assert_eq!(parsed.usage.as_ref().unwrap().prompt_tokens, Some(12));
    }

    #[test]
    fn usage_estimate_counts_both_sides() {
        let call = ChatCall {
            model: "m",
            system: Some("abcdefgh"),
            prompt: "abcd",
            max_tokens: 10,
            temperature: 0.0,
        };
        let usage = estimate_usage(&call, "12345678");
        assert_eq!(usage.input, 3);
        assert_eq!(usage.output, 2);
    }
}
