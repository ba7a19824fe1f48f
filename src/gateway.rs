//! Normalized LLM gateway.
//!
//! The [`Gateway`] owns a registry of [`ChatBackend`] trait objects keyed by
//! provider id. For each turn it builds the final prompt (system
//! instructions, context block, prior history, question), dispatches one
//! completion to the selected backend, and enforces the response-mode word
//! budget by truncating at a sentence boundary.
//!
//! Built-in backends cover Groq and OpenAI (both speak the OpenAI chat
//! completions format) and Google Gemini. [`Gateway::from_env`] registers
//! each one whose API-key environment variable is set; anything else can be
//! registered through [`Gateway::register`] by implementing the trait.
//!
//! Backends classify failures into the two recoverable provider errors:
//! rate/quota responses become [`Error::ProviderQuotaExceeded`], everything
//! else (bad credentials, transport failures, malformed responses) becomes
//! [`Error::ProviderUnavailable`]. Backends never retry on their own.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::models::{ConversationTurn, ResponseMode, Role};

const GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const GEMINI_URL_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// One message of the normalized sequence every backend receives.
/// Roles are `system`, `user`, or `assistant`.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Fully-built request handed to a backend.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Everything a turn's prompt is assembled from.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub question: &'a str,
    /// Assembled context text; empty means no support was retrieved.
    pub context: &'a str,
    /// Turns before the current question, oldest first.
    pub history: &'a [ConversationTurn],
    pub mode: ResponseMode,
}

/// Capability set a chat backend must provide. Implementing this is all it
/// takes to plug in another provider.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Registry key, e.g. `"groq"`.
    fn id(&self) -> &str;

    /// Model identifier requests are issued against.
    fn model(&self) -> &str;

    /// Produce one completion for the normalized request.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Provider registry plus prompt construction and output budgeting.
pub struct Gateway {
    config: GatewayConfig,
    backends: HashMap<String, Box<dyn ChatBackend>>,
}

impl Gateway {
    /// An empty registry; useful when callers register their own backends.
    pub fn new(config: GatewayConfig) -> Self {
        Gateway {
            config,
            backends: HashMap::new(),
        }
    }

    /// Register every built-in backend whose API key is present in the
    /// environment: `GROQ_API_KEY`, `OPENAI_API_KEY`, `GOOGLE_API_KEY`.
    pub fn from_env(config: GatewayConfig) -> Result<Gateway> {
        let mut gateway = Gateway::new(config);
        if let Some(key) = env_key("GROQ_API_KEY") {
            let backend = OpenAiCompatBackend::new(
                "groq",
                GROQ_URL,
                gateway.config.groq_model.clone(),
                key,
                gateway.config.timeout_secs,
            )?;
            gateway.register(Box::new(backend));
        }
        if let Some(key) = env_key("OPENAI_API_KEY") {
            let backend = OpenAiCompatBackend::new(
                "openai",
                OPENAI_URL,
                gateway.config.openai_model.clone(),
                key,
                gateway.config.timeout_secs,
            )?;
            gateway.register(Box::new(backend));
        }
        if let Some(key) = env_key("GOOGLE_API_KEY") {
            let backend = GeminiBackend::new(
                gateway.config.gemini_model.clone(),
                key,
                gateway.config.timeout_secs,
            )?;
            gateway.register(Box::new(backend));
        }
        Ok(gateway)
    }

    /// Add a backend under its own id, replacing any previous registration.
    pub fn register(&mut self, backend: Box<dyn ChatBackend>) {
        self.backends.insert(backend.id().to_string(), backend);
    }

    /// Registered provider ids, sorted for stable display.
    pub fn available(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn has(&self, provider_id: &str) -> bool {
        self.backends.contains_key(provider_id)
    }

    /// The configured default backend id.
    pub fn default_provider(&self) -> &str {
        &self.config.provider
    }

    pub fn word_budget(&self, mode: ResponseMode) -> usize {
        match mode {
            ResponseMode::Concise => self.config.concise_max_words,
            ResponseMode::Detailed => self.config.detailed_max_words,
        }
    }

    /// Build the prompt, run one completion on `provider_id`, and enforce
    /// the mode's word budget on the result.
    pub async fn complete(&self, provider_id: &str, inputs: PromptInputs<'_>) -> Result<String> {
        let backend = self.backends.get(provider_id).ok_or_else(|| {
            Error::ProviderUnavailable {
                provider: provider_id.to_string(),
                reason: "not registered (is its API key set?)".to_string(),
            }
        })?;
        let max_words = self.word_budget(inputs.mode);
        let request = CompletionRequest {
            messages: build_messages(&self.config.system_prompt, inputs, max_words),
            temperature: self.config.temperature,
            // Token allowance, not the word budget: ~0.75 words per token,
            // so double it and let enforce_word_budget do the trimming.
            max_tokens: max_words.saturating_mul(2),
        };
        tracing::debug!(
            provider = provider_id,
            model = backend.model(),
            messages = request.messages.len(),
            mode = inputs.mode.as_str(),
            "dispatching completion"
        );
        let raw = backend.complete(&request).await?;
        Ok(enforce_word_budget(&raw, max_words))
    }
}

fn env_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|k| !k.trim().is_empty())
}

/// Assemble the normalized message sequence: enhanced system prompt first,
/// then prior history in order, then the question.
fn build_messages(
    system_prompt: &str,
    inputs: PromptInputs<'_>,
    max_words: usize,
) -> Vec<ChatMessage> {
    let mut system = system_prompt.to_string();
    system.push_str(&mode_instruction(inputs.mode, max_words));
    if inputs.context.is_empty() {
        system.push_str(
            "\n\nNo supporting context was retrieved for this question. \
             Answer from general knowledge, say plainly when something is \
             not known, and do not invent sources.",
        );
    } else {
        system.push_str(&format!(
            "\n\nUse the following context to answer the user's question:\n{}",
            inputs.context
        ));
    }

    let mut messages = Vec::with_capacity(inputs.history.len() + 2);
    messages.push(ChatMessage {
        role: "system".to_string(),
        content: system,
    });
    for turn in inputs.history {
        messages.push(ChatMessage {
            role: match turn.role {
                Role::User => "user".to_string(),
                Role::Assistant => "assistant".to_string(),
            },
            content: turn.text.clone(),
        });
    }
    messages.push(ChatMessage {
        role: "user".to_string(),
        content: inputs.question.to_string(),
    });
    messages
}

fn mode_instruction(mode: ResponseMode, max_words: usize) -> String {
    match mode {
        ResponseMode::Concise => format!(
            "\n\nIMPORTANT: Provide a CONCISE response (maximum {max_words} words). \
             Be brief and to the point."
        ),
        ResponseMode::Detailed => format!(
            "\n\nIMPORTANT: Provide a DETAILED response (maximum {max_words} words). \
             Include comprehensive information, explanations, and relevant details."
        ),
    }
}

/// Truncate `text` at the last sentence boundary within the first
/// `max_words` words. Text already inside the budget passes through; a
/// prefix with no sentence terminator falls back to a word-boundary cut.
pub fn enforce_word_budget(text: &str, max_words: usize) -> String {
    let trimmed = text.trim();
    if trimmed.split_whitespace().count() <= max_words {
        return trimmed.to_string();
    }

    let mut words_seen = 0usize;
    let mut in_word = false;
    let mut prefix_end = trimmed.len();
    for (i, c) in trimmed.char_indices() {
        if c.is_whitespace() {
            if in_word {
                words_seen += 1;
                in_word = false;
                if words_seen == max_words {
                    prefix_end = i;
                    break;
                }
            }
        } else {
            in_word = true;
        }
    }

    let prefix = &trimmed[..prefix_end];
    let cut = prefix
        .rfind(|c| matches!(c, '.' | '!' | '?'))
        .map(|i| i + 1)
        .unwrap_or(prefix.len());
    trimmed[..cut].trim_end().to_string()
}

// ============ OpenAI-compatible backends (Groq, OpenAI) ============

/// Backend for any endpoint speaking the OpenAI chat completions format.
/// Groq and OpenAI differ only in URL, model, and credential.
pub struct OpenAiCompatBackend {
    id: String,
    url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    pub fn new(
        id: &str,
        url: &str,
        model: String,
        api_key: String,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::ProviderUnavailable {
                provider: id.to_string(),
                reason: format!("http client: {e}"),
            })?;
        Ok(Self {
            id: id.to_string(),
            url: url.to_string(),
            model,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|_| Error::ProviderUnavailable {
                provider: self.id.clone(),
                reason: "API key contains invalid header characters".to_string(),
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let body = OaChatRequest {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: request
                .messages
                .iter()
                .map(|m| OaMessage {
                    role: &m.role,
                    content: &m.content,
                })
                .collect(),
        };
        let response = self
            .client
            .post(&self.url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable {
                provider: self.id.clone(),
                reason: format!("request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_failure(&self.id, status, &text));
        }
        let parsed: OaChatResponse =
            response.json().await.map_err(|e| Error::ProviderUnavailable {
                provider: self.id.clone(),
                reason: format!("response decode: {e}"),
            })?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| Error::ProviderUnavailable {
                provider: self.id.clone(),
                reason: "response contained no choices".to_string(),
            })
    }
}

#[derive(Serialize)]
struct OaChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<OaMessage<'a>>,
}

#[derive(Serialize)]
struct OaMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OaChatResponse {
    choices: Vec<OaChoice>,
}

#[derive(Debug, Deserialize)]
struct OaChoice {
    message: OaAssistantMessage,
}

#[derive(Debug, Deserialize)]
struct OaAssistantMessage {
    content: String,
}

// ============ Gemini backend ============

/// Backend for the Google Gemini `generateContent` API. System instructions
/// travel in a dedicated field and history roles map to `user` / `model`.
pub struct GeminiBackend {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(model: String, api_key: String, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::ProviderUnavailable {
                provider: "gemini".to_string(),
                reason: format!("http client: {e}"),
            })?;
        Ok(Self {
            model,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl ChatBackend for GeminiBackend {
    fn id(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut system_instruction = None;
        let mut contents = Vec::new();
        for message in &request.messages {
            match message.role.as_str() {
                "system" => {
                    system_instruction = Some(GeminiContent {
                        role: None,
                        parts: vec![GeminiPart {
                            text: &message.content,
                        }],
                    });
                }
                role => {
                    contents.push(GeminiContent {
                        role: Some(if role == "assistant" { "model" } else { "user" }),
                        parts: vec![GeminiPart {
                            text: &message.content,
                        }],
                    });
                }
            }
        }

        let body = GeminiRequest {
            system_instruction,
            contents,
            generation_config: GeminiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        };
        let url = format!(
            "{GEMINI_URL_BASE}/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable {
                provider: "gemini".to_string(),
                reason: format!("request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_failure("gemini", status, &text));
        }
        let parsed: GeminiResponse =
            response.json().await.map_err(|e| Error::ProviderUnavailable {
                provider: "gemini".to_string(),
                reason: format!("response decode: {e}"),
            })?;
        let answer: String = parsed
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
            .unwrap_or_default();
        if answer.is_empty() {
            return Err(Error::ProviderUnavailable {
                provider: "gemini".to_string(),
                reason: "response contained no candidates".to_string(),
            });
        }
        Ok(answer)
    }
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent<'a>>,
    contents: Vec<GeminiContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiResponseContent,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: String,
}

/// Quota-flavored failures become `ProviderQuotaExceeded`; everything else,
/// including bad credentials, is `ProviderUnavailable`.
fn classify_failure(provider: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let quota = status.as_u16() == 429
        || body.contains("insufficient_quota")
        || body.contains("RESOURCE_EXHAUSTED");
    if quota {
        Error::ProviderQuotaExceeded {
            provider: provider.to_string(),
            reason: format!("{status}: {body}"),
        }
    } else {
        Error::ProviderUnavailable {
            provider: provider.to_string(),
            reason: format!("{status}: {body}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct CannedBackend {
        reply: String,
    }

    #[async_trait]
    impl ChatBackend for CannedBackend {
        fn id(&self) -> &str {
            "canned"
        }
        fn model(&self) -> &str {
            "canned-model"
        }
        async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
            Ok(self.reply.clone())
        }
    }

    struct RecordingBackend {
        seen: Arc<Mutex<Vec<CompletionRequest>>>,
    }

    #[async_trait]
    impl ChatBackend for RecordingBackend {
        fn id(&self) -> &str {
            "recorder"
        }
        fn model(&self) -> &str {
            "recorder-model"
        }
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.seen.lock().unwrap().push(request.clone());
            Ok("ok.".to_string())
        }
    }

    fn gateway_with(reply: &str) -> Gateway {
        let mut config = GatewayConfig::default();
        config.provider = "canned".to_string();
        let mut gateway = Gateway::new(config);
        gateway.register(Box::new(CannedBackend {
            reply: reply.to_string(),
        }));
        gateway
    }

    #[test]
    fn test_budget_passthrough_when_short_enough() {
        let text = "Rest and fluids help most colds.";
        assert_eq!(enforce_word_budget(text, 150), text);
    }

    #[test]
    fn test_budget_cuts_at_sentence_boundary() {
        let text = "Colds are viral. They usually resolve in a week. \
                    Antibiotics do not help because they target bacteria not viruses at all.";
        let out = enforce_word_budget(text, 10);
        assert_eq!(out, "Colds are viral. They usually resolve in a week.");
    }

    #[test]
    fn test_budget_falls_back_to_word_cut_without_terminator() {
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let out = enforce_word_budget(text, 5);
        assert_eq!(out, "one two three four five");
    }

    #[test]
    fn test_system_message_includes_context_block() {
        let inputs = PromptInputs {
            question: "What helps a cold?",
            context: "=== Knowledge Base Context ===\n[Source 1]\nRest helps.",
            history: &[],
            mode: ResponseMode::Concise,
        };
        let messages = build_messages("Base prompt.", inputs, 150);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.starts_with("Base prompt."));
        assert!(messages[0].content.contains("CONCISE response (maximum 150 words)"));
        assert!(messages[0]
            .content
            .contains("Use the following context to answer the user's question:"));
        assert!(messages[0].content.contains("[Source 1]"));
        assert_eq!(messages.last().unwrap().role, "user");
        assert_eq!(messages.last().unwrap().content, "What helps a cold?");
    }

    #[test]
    fn test_empty_context_states_absence_instead_of_inventing() {
        let inputs = PromptInputs {
            question: "What helps a cold?",
            context: "",
            history: &[],
            mode: ResponseMode::Detailed,
        };
        let messages = build_messages("Base prompt.", inputs, 500);
        assert!(messages[0]
            .content
            .contains("No supporting context was retrieved"));
        assert!(!messages[0].content.contains("Use the following context"));
        assert!(messages[0].content.contains("DETAILED response (maximum 500 words)"));
    }

    #[test]
    fn test_history_precedes_question_in_order() {
        let history = vec![
            ConversationTurn {
                role: Role::User,
                text: "Hi".to_string(),
            },
            ConversationTurn {
                role: Role::Assistant,
                text: "Hello!".to_string(),
            },
        ];
        let inputs = PromptInputs {
            question: "Next question",
            context: "",
            history: &history,
            mode: ResponseMode::Concise,
        };
        let messages = build_messages("p", inputs, 150);
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[1].content, "Hi");
        assert_eq!(messages[2].content, "Hello!");
    }

    #[tokio::test]
    async fn test_unknown_provider_is_unavailable() {
        let gateway = gateway_with("unused");
        let err = gateway
            .complete(
                "nonexistent",
                PromptInputs {
                    question: "q",
                    context: "",
                    history: &[],
                    mode: ResponseMode::Concise,
                },
            )
            .await
            .unwrap_err();
        match err {
            Error::ProviderUnavailable { provider, .. } => assert_eq!(provider, "nonexistent"),
            other => panic!("expected ProviderUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_complete_applies_word_budget() {
        let long_reply = "First sentence here. ".repeat(120);
        let gateway = gateway_with(&long_reply);
        let answer = gateway
            .complete(
                "canned",
                PromptInputs {
                    question: "q",
                    context: "",
                    history: &[],
                    mode: ResponseMode::Concise,
                },
            )
            .await
            .unwrap();
        assert!(answer.split_whitespace().count() <= 150);
        assert!(answer.ends_with('.'));
    }

    #[tokio::test]
    async fn test_token_allowance_doubles_the_word_budget() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut config = GatewayConfig::default();
        config.provider = "recorder".to_string();
        let mut gateway = Gateway::new(config);
        gateway.register(Box::new(RecordingBackend { seen: seen.clone() }));

        for mode in [ResponseMode::Concise, ResponseMode::Detailed] {
            gateway
                .complete(
                    "recorder",
                    PromptInputs {
                        question: "q",
                        context: "",
                        history: &[],
                        mode,
                    },
                )
                .await
                .unwrap();
        }

        let requests = seen.lock().unwrap();
        assert_eq!(requests[0].max_tokens, 300);
        assert_eq!(requests[1].max_tokens, 1000);
    }

    #[test]
    fn test_quota_classification() {
        let err = classify_failure("groq", reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(err, Error::ProviderQuotaExceeded { .. }));
        let err = classify_failure("groq", reqwest::StatusCode::UNAUTHORIZED, "bad key");
        assert!(matches!(err, Error::ProviderUnavailable { .. }));
        let err = classify_failure(
            "openai",
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error":{"code":"insufficient_quota"}}"#,
        );
        assert!(matches!(err, Error::ProviderQuotaExceeded { .. }));
    }

    #[test]
    fn test_available_lists_registered_ids_sorted() {
        let gateway = gateway_with("x");
        assert_eq!(gateway.available(), vec!["canned"]);
        assert!(gateway.has("canned"));
        assert!(!gateway.has("groq"));
    }
}
