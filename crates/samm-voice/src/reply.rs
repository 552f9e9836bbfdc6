//! Reply generation: user text plus recent history in, assistant text out.

use crate::api::{ApiClient, Service};
use crate::config::{ServiceSettings, VoiceConfig};
use crate::error::{VoiceError, VoiceResult};
use crate::history::ConversationTurn;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Produces the assistant's answer. `history` is oldest first and excludes `text`.
pub trait ReplyGenerator: Send + Sync {
    fn generate(&self, text: &str, history: &[ConversationTurn]) -> VoiceResult<String>;
}

// OpenAI-compatible request/response
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

/// `/chat/completions` client: system prompt, capped history, then the user's text.
#[derive(Debug, Clone)]
pub struct ChatCompletionsReply {
    api: ApiClient,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionsReply {
    pub fn new(api: ApiClient, services: &ServiceSettings) -> Self {
        Self {
            api,
            model: services.reply_model.clone(),
            system_prompt: services.system_prompt.clone(),
            temperature: services.temperature,
            max_tokens: services.max_tokens,
        }
    }

    pub fn from_config(config: &VoiceConfig) -> VoiceResult<Self> {
        let api = ApiClient::from_settings(Service::Reply, &config.services)?;
        Ok(Self::new(api, &config.services))
    }

    fn messages(&self, text: &str, history: &[ConversationTurn]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: self.system_prompt.clone(),
        });
        messages.extend(history.iter().map(|t| ChatMessage {
            role: t.role.as_str().to_string(),
            content: t.text.clone(),
        }));
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: text.to_string(),
        });
        messages
    }
}

impl ReplyGenerator for ChatCompletionsReply {
    fn generate(&self, text: &str, history: &[ConversationTurn]) -> VoiceResult<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: self.messages(text, history),
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        };
        let res = self.api.send(self.api.post("chat/completions").json(&request))?;
        let parsed: ChatResponse = res
            .json()
            .map_err(|e| self.api.error(format!("bad chat body: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| self.api.error("no content in chat response"))
    }
}

/// Rule-based replies for running without a model.
#[derive(Debug, Clone, Default)]
pub struct KeywordReply;

impl KeywordReply {
    pub fn new() -> Self {
        Self
    }
}

impl ReplyGenerator for KeywordReply {
    fn generate(&self, text: &str, _history: &[ConversationTurn]) -> VoiceResult<String> {
        let lower = text.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        let reply = if has(&["السلام", "مرحبا", "هلا"]) {
            "هلا والله، كيف أقدر أخدمك في أبشر؟"
        } else if has(&["جديد", "عندي"]) {
            "ما عندك تنبيهات جديدة حالياً. تبي أراجع لك مواعيد انتهاء وثائقك؟"
        } else if has(&["محفظة", "رصيد"]) {
            "تقدر تشوف رصيد محفظتك العائلية من أبشر، قسم المدفوعات."
        } else if has(&["تجديد", "جدد"]) {
            "التجديد يتم إلكترونياً من أبشر بعد سداد الرسوم. وش الوثيقة اللي تبي تجددها؟"
        } else if has(&["ذكرني", "تذكير", "موعد"]) {
            "أبشر، بذكرك قبل الموعد إن شاء الله."
        } else {
            "تمام، كيف أقدر أساعدك في خدمات أبشر؟"
        };
        Ok(reply.to_string())
    }
}

/// Canned replies for tests. Records every request it receives.
#[derive(Debug, Default)]
pub struct ScriptedReply {
    script: Mutex<VecDeque<Result<String, String>>>,
    fallback: String,
    calls: Mutex<Vec<(String, Vec<ConversationTurn>)>>,
}

impl ScriptedReply {
    /// Replies with `fallback` once the script is exhausted.
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            fallback: fallback.into(),
            ..Self::default()
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut q) = self.script.lock() {
            q.push_back(Ok(reply.into()));
        }
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        if let Ok(mut q) = self.script.lock() {
            q.push_back(Err(message.into()));
        }
    }

    /// `(text, history)` of every call, in order.
    pub fn calls(&self) -> Vec<(String, Vec<ConversationTurn>)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl ReplyGenerator for ScriptedReply {
    fn generate(&self, text: &str, history: &[ConversationTurn]) -> VoiceResult<String> {
        if let Ok(mut c) = self.calls.lock() {
            c.push((text.to_string(), history.to_vec()));
        }
        match self.script.lock().ok().and_then(|mut q| q.pop_front()) {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(msg)) => Err(VoiceError::Reply(msg)),
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Pick the chat model when an API key is configured, keyword replies otherwise.
pub fn create_best_reply(config: &VoiceConfig) -> Box<dyn ReplyGenerator> {
    match ChatCompletionsReply::from_config(config) {
        Ok(r) => {
            info!("💬 Replies: {}", r.model);
            Box::new(r)
        }
        Err(e) => {
            warn!("No chat model ({}); using keyword replies", e);
            Box::new(KeywordReply::new())
        }
    }
}

/// Generate a reply, or the fixed apology on failure or an empty answer.
pub fn reply_or_apology(
    generator: &dyn ReplyGenerator,
    text: &str,
    history: &[ConversationTurn],
    apology: &str,
) -> String {
    match generator.generate(text, history) {
        Ok(reply) if !reply.trim().is_empty() => {
            debug!("Reply: {}", reply);
            reply.trim().to_string()
        }
        Ok(_) => {
            warn!("Empty reply, apologising");
            apology.to_string()
        }
        Err(e) => {
            warn!("Reply generation failed, apologising: {}", e);
            apology.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_routes() {
        let r = KeywordReply::new();
        assert!(r.generate("السلام عليكم", &[]).unwrap().contains("هلا والله"));
        assert!(r.generate("كم رصيد المحفظة", &[]).unwrap().contains("محفظتك"));
        assert!(r.generate("أبي تجديد الجواز", &[]).unwrap().contains("التجديد"));
        assert_eq!(
            r.generate("something else", &[]).unwrap(),
            "تمام، كيف أقدر أساعدك في خدمات أبشر؟"
        );
    }

    #[test]
    fn failure_and_empty_become_apology() {
        let r = ScriptedReply::new("");
        r.push_failure("timeout");
        assert_eq!(reply_or_apology(&r, "hi", &[], "sorry"), "sorry");
        assert_eq!(reply_or_apology(&r, "hi", &[], "sorry"), "sorry");
        assert_eq!(r.calls().len(), 2);
    }

    #[test]
    fn chat_messages_wrap_history() {
        let mut config = VoiceConfig::default();
        config.services.system_prompt = "sys".to_string();
        let api = ApiClient::new(
            Service::Reply,
            config.services.base_url.clone(),
            "k",
            config.services.timeout(),
        )
        .unwrap();
        let reply = ChatCompletionsReply::new(api, &config.services);
        let history = vec![ConversationTurn::user("a"), ConversationTurn::assistant("b")];
        let msgs = reply.messages("c", &history);
        let roles: Vec<_> = msgs.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(msgs[3].content, "c");
    }
}
