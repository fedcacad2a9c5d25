use serde::{Deserialize, Serialize};

use crate::config::UpstreamConfig;

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    #[serde(default)]
    pub role: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub ai_temperature: Option<f64>,
    #[serde(default)]
    pub ai_max_tokens: Option<u32>,
}

/// Request body sent to `{base_url}/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
    pub stream: bool,
    pub n: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl UpstreamPayload {
    /// Shape a streaming completion request from a relay request.
    ///
    /// Sampling parameters the client omits fall back to `defaults`.
    #[must_use]
    pub fn build(
        request: &RelayRequest,
        system_prompt: &str,
        defaults: &UpstreamConfig,
        history_limit: usize,
        user: Option<&str>,
    ) -> Self {
        Self {
            model: defaults.model.clone(),
            messages: build_upstream_messages(system_prompt, &request.messages, history_limit),
            temperature: request.ai_temperature.unwrap_or(defaults.temperature),
            max_tokens: request.ai_max_tokens.unwrap_or(defaults.max_tokens),
            top_p: defaults.top_p,
            frequency_penalty: defaults.frequency_penalty,
            presence_penalty: defaults.presence_penalty,
            stream: true,
            n: 1,
            user: user.map(str::to_string),
        }
    }
}

/// The resolved system message followed by the last `history_limit`
/// non-system messages of `history`, in order.
#[must_use]
pub fn build_upstream_messages(
    system_prompt: &str,
    history: &[ChatMessage],
    history_limit: usize,
) -> Vec<ChatMessage> {
    let kept: Vec<&ChatMessage> = history
        .iter()
        .filter(|message| message.role != Role::System)
        .collect();
    let skip = kept.len().saturating_sub(history_limit);

    let mut messages = Vec::with_capacity(1 + kept.len() - skip);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend(kept.into_iter().skip(skip).cloned());
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_relay_request_parses_camel_case() {
        let request: RelayRequest = serde_json::from_value(json!({
            "role": "programmer",
            "messages": [{"role": "user", "content": "hi"}],
            "aiTemperature": 0.2,
            "aiMaxTokens": 64
        }))
        .unwrap();
        assert_eq!(request.role.as_deref(), Some("programmer"));
        assert_eq!(request.messages, vec![ChatMessage::user("hi")]);
        assert_eq!(request.ai_temperature, Some(0.2));
        assert_eq!(request.ai_max_tokens, Some(64));
    }

    #[test]
    fn test_relay_request_rejects_unknown_message_role() {
        let parsed = serde_json::from_value::<RelayRequest>(json!({
            "messages": [{"role": "tool", "content": "x"}]
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_system_message_is_first_and_unique() {
        let history = vec![
            ChatMessage::system("client system"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
            ChatMessage::system("another"),
            ChatMessage::user("bye"),
        ];
        let messages = build_upstream_messages("server prompt", &history, 10);
        assert_eq!(messages[0], ChatMessage::system("server prompt"));
        assert_eq!(
            messages.iter().filter(|m| m.role == Role::System).count(),
            1
        );
        assert_eq!(messages.len(), 4);
    }

    #[test]
    fn test_history_keeps_last_messages() {
        let history: Vec<ChatMessage> = (0..15).map(|i| ChatMessage::user(i.to_string())).collect();
        let messages = build_upstream_messages("p", &history, 10);
        assert_eq!(messages.len(), 11);
        assert_eq!(messages[1].content, "5");
        assert_eq!(messages[10].content, "14");
    }

    #[test]
    fn test_payload_defaults_and_overrides() {
        let defaults = UpstreamConfig::default();
        let mut request = RelayRequest {
            role: None,
            messages: vec![ChatMessage::user("hi")],
            ai_temperature: None,
            ai_max_tokens: None,
        };
        let payload = UpstreamPayload::build(&request, "p", &defaults, 10, None);
        let body = serde_json::to_value(&payload).unwrap();
        assert_eq!(body["model"], "gpt-3.5-turbo");
        assert_eq!(body["temperature"], 0.6);
        assert_eq!(body["max_tokens"], 128);
        assert_eq!(body["top_p"], 1.0);
        assert_eq!(body["stream"], true);
        assert_eq!(body["n"], 1);
        assert!(body.get("user").is_none());
        assert_eq!(body["messages"][0]["role"], "system");

        request.ai_temperature = Some(1.1);
        request.ai_max_tokens = Some(512);
        let payload = UpstreamPayload::build(&request, "p", &defaults, 10, Some("u-7"));
        assert_eq!(payload.temperature, 1.1);
        assert_eq!(payload.max_tokens, 512);
        assert_eq!(payload.user.as_deref(), Some("u-7"));
    }
}
