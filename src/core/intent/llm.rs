use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{ChatTurn, Inference, IntentContext, IntentExtractor};
use crate::core::services::descriptor;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmWireFormat {
    OpenAi,
    Gemini,
}

impl LlmWireFormat {
    pub fn default_base_url(self) -> &'static str {
        match self {
            LlmWireFormat::OpenAi => OPENAI_BASE_URL,
            LlmWireFormat::Gemini => GEMINI_BASE_URL,
        }
    }
}

// ── OpenAI-compatible request/response ──

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessageOwned,
}

#[derive(Deserialize)]
struct OpenAiMessageOwned {
    #[serde(default)]
    content: Option<String>,
}

// ── Gemini request/response ──

#[derive(Serialize)]
struct GeminiRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiResContent,
}

#[derive(Deserialize)]
struct GeminiResContent {
    #[serde(default)]
    parts: Vec<GeminiResPart>,
}

#[derive(Deserialize)]
struct GeminiResPart {
    #[serde(default)]
    text: String,
}

/// Intent extraction backed by a hosted chat model.
pub struct LlmIntentExtractor {
    format: LlmWireFormat,
    model: String,
    api_key: String,
    base_url: String,
    client: Client,
}

impl LlmIntentExtractor {
    pub fn new(
        format: LlmWireFormat,
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            format,
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url
                .unwrap_or_else(|| format.default_base_url().to_string())
                .trim_end_matches('/')
                .to_string(),
            client,
        })
    }

    async fn generate_openai(&self, system: &str, turns: &[ChatTurn]) -> Result<String> {
        let mut messages = vec![OpenAiMessage {
            role: "system",
            content: system,
        }];
        messages.extend(turns.iter().map(|t| OpenAiMessage {
            role: &t.role,
            content: &t.content,
        }));
        let req = OpenAiRequest {
            model: &self.model,
            messages,
            temperature: 0.1,
        };

        let res = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "OpenAI API error {}: {}",
                res.status().as_u16(),
                res.text().await.unwrap_or_default()
            ));
        }
        let parsed: OpenAiResponse = res.json().await?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn generate_gemini(&self, system: &str, turns: &[ChatTurn]) -> Result<String> {
        let mut contents: Vec<GeminiContent> = Vec::new();
        for turn in turns {
            let role = if turn.role == "assistant" {
                "model"
            } else {
                "user"
            };
            // Gemini requires alternating roles.
            if let Some(last) = contents.last_mut()
                && last.role == role
                && let Some(part) = last.parts.first_mut()
            {
                part.text.push('\n');
                part.text.push_str(&turn.content);
                continue;
            }
            contents.push(GeminiContent {
                role: role.to_string(),
                parts: vec![GeminiPart {
                    text: turn.content.clone(),
                }],
            });
        }
        let req = GeminiRequest {
            system_instruction: GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: system.to_string(),
                }],
            },
            contents,
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url,
            urlencoding::encode(&self.model)
        );
        let res = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&req)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "Gemini API error {}: {}",
                res.status().as_u16(),
                res.text().await.unwrap_or_default()
            ));
        }
        let parsed: GeminiResponse = res.json().await?;
        Ok(parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl IntentExtractor for LlmIntentExtractor {
    fn name(&self) -> &'static str {
        match self.format {
            LlmWireFormat::OpenAi => "openai",
            LlmWireFormat::Gemini => "gemini",
        }
    }

    async fn infer(&self, utterance: &str, ctx: &IntentContext) -> Result<Inference> {
        let system = system_prompt(ctx);
        let mut turns = ctx.history.clone();
        turns.push(ChatTurn::user(utterance));

        let text = match self.format {
            LlmWireFormat::OpenAi => self.generate_openai(&system, &turns).await?,
            LlmWireFormat::Gemini => self.generate_gemini(&system, &turns).await?,
        };
        debug!(extractor = self.name(), chars = text.len(), "Model replied");
        parse_reply(&text)
    }
}

fn system_prompt(ctx: &IntentContext) -> String {
    let mut prompt = String::from(
        "You turn developer requests into actions against connected services.\n\
         Reply with a single JSON object and nothing else:\n\
         {\"reply\": \"<short answer for the user>\", \"title\": \"<workflow title or null>\", \
         \"steps\": [{\"service_type\": \"<service>\", \"action\": \"<action>\", \"parameters\": {}}]}\n\
         Use \"steps\": null when the message is conversation and needs no action.\n\
         Only use the services and actions listed below. Keep steps in the order they must run.\n",
    );

    if ctx.connected_services.is_empty() {
        prompt.push_str(
            "\nThe user has no connected services. Explain that they must connect one first.\n",
        );
        return prompt;
    }

    prompt.push_str("\nConnected services:\n");
    for service in &ctx.connected_services {
        let desc = descriptor(*service);
        prompt.push_str(&format!("- {} ({}):\n", service, desc.display_name));
        for action in desc.actions {
            let mut params: Vec<String> =
                action.required.iter().map(|p| p.to_string()).collect();
            params.extend(action.optional.iter().map(|p| format!("{}?", p)));
            prompt.push_str(&format!("    {}({})\n", action.name, params.join(", ")));
        }
    }
    prompt
}

/// The first JSON value in `text`: a fenced ```json block if present,
/// otherwise from the first `{` or `[` to its last matching closer.
fn extract_json_block(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let body = &text[start + "```json".len()..];
        let end = body.find("```").unwrap_or(body.len());
        return Some(body[..end].trim());
    }

    let start = text.find(['{', '['])?;
    let closer = if text[start..].starts_with('{') {
        '}'
    } else {
        ']'
    };
    let end = text.rfind(closer)?;
    (end > start).then(|| &text[start..=end])
}

fn parse_reply(text: &str) -> Result<Inference> {
    let Some(block) = extract_json_block(text) else {
        return Ok(Inference {
            reply: Some(text.trim().to_string()),
            ..Default::default()
        });
    };

    let value: Value = serde_json::from_str(block)
        .map_err(|e| anyhow!("model returned malformed JSON: {}", e))?;
    match value {
        Value::Array(_) => Ok(Inference {
            steps: value,
            ..Default::default()
        }),
        Value::Object(_) => Ok(serde_json::from_value(value)?),
        other => Err(anyhow!("model returned unexpected JSON: {}", other)),
    }
}
