//! Reply generation and intent handling for one turn
//!
//! Two chat completions run concurrently: the persona reply (with history)
//! and a classification of the new user text (without history). Both must
//! succeed. A classified intent that is registered runs its action, and the
//! action text is appended to the reply.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::OrchestrationError;
use crate::history::ChatTurn;
use crate::intent::{self, ActionRegistry};
use crate::llm::{ChatBackend, ChatMessage};
use crate::retry::{RetryPolicy, retry};

/// Persona instruction for the direct reply
pub const SYSTEM_PROMPT: &str = "تو دستیار هوشمند شرکت رابین هستی، با نام رابین، و به نرم‌افزار هوشمند رابین دسترسی داری. \
می‌تونی در بررسی فروش، مشتریان و همکاران کمک کنی و توسط احمدرضا آوندی توسعه داده شدی. \
همچنین قادر به انجام فعالیت‌های خاصی مثل پیگیری وظایف همکاران، پیگیری درخواست‌های مشتریان و مشاوره به همکاران و مشتریان هستی و همیشه آماده کمک هستی. \
همیشه به زبان فارسی پاسخ بده، مودب و کمک‌کننده باش. پاسخ‌ها رو کوتاه و شخصی نگه دار. هیستوری رو در نظر بگیر. \
اگر قصد کاربر تشخیص داده شد، نتیجه اکشن رو ادغام کن (مثل \"گزارش آماده است: [جزئیات]\"). \
فقط در پیام اول سلام کن، نه در همه پیام‌ها. خیلی خوب میشه اگر رسمی صحبت نکنی";

/// Build the classification instruction for the closed intent catalog
#[must_use]
pub fn intent_prompt() -> String {
    format!(
        "از متن زیر، قصد کاربر رو دقیقاً تشخیص بده. اگر متن با هیچکدام از دستورات زیر مطابقت نداشت، حتماً \"{}\" برگردان.\nلیست دستورات: {}.\nمتن کاربر:",
        intent::NO_MATCH,
        intent::catalog()
    )
}

/// Outcome of one orchestrated turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnReply {
    /// Reply to speak, with any action text appended
    #[serde(rename = "response")]
    pub reply_text: String,
    /// Raw classifier output
    #[serde(rename = "intent", default)]
    pub intent_label: String,
    #[serde(rename = "actionExecuted", default)]
    pub action_executed: bool,
}

/// Turns user text into a reply
#[async_trait]
pub trait TurnProcessor: Send + Sync {
    async fn process(
        &self,
        user_text: &str,
        history: &[ChatTurn],
    ) -> Result<TurnReply, OrchestrationError>;
}

/// In-process orchestrator over a chat backend
pub struct IntentOrchestrator {
    backend: Arc<dyn ChatBackend>,
    registry: ActionRegistry,
    retry: RetryPolicy,
    intent_prompt: String,
}

impl IntentOrchestrator {
    #[must_use]
    pub fn new(backend: Arc<dyn ChatBackend>, registry: ActionRegistry, retry: RetryPolicy) -> Self {
        Self {
            backend,
            registry,
            retry,
            intent_prompt: intent_prompt(),
        }
    }

    /// Messages for the direct reply: persona, prior turns, new user text
    #[must_use]
    pub fn reply_messages(user_text: &str, history: &[ChatTurn]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() * 2 + 2);
        messages.push(ChatMessage::system(SYSTEM_PROMPT));
        for turn in history {
            messages.push(ChatMessage::user(turn.user_text.clone()));
            messages.push(ChatMessage::assistant(turn.reply_text.clone()));
        }
        messages.push(ChatMessage::user(user_text));
        messages
    }

    /// Message for the classifier: one system message, no history
    #[must_use]
    pub fn classification_messages(&self, user_text: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::system(format!("{} {user_text}", self.intent_prompt))]
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, OrchestrationError> {
        retry(&self.retry, OrchestrationError::is_retryable, |_| {
            self.backend.complete(messages)
        })
        .await
    }
}

#[async_trait]
impl TurnProcessor for IntentOrchestrator {
    async fn process(
        &self,
        user_text: &str,
        history: &[ChatTurn],
    ) -> Result<TurnReply, OrchestrationError> {
        let reply_messages = Self::reply_messages(user_text, history);
        let classify_messages = self.classification_messages(user_text);

        let (reply, label) = tokio::try_join!(
            self.complete(&reply_messages),
            self.complete(&classify_messages),
        )?;

        tracing::info!(intent = %label.trim(), "intent classified");

        let action = self
            .registry
            .resolve(&label)
            .map(|intent| self.registry.execute(intent));

        Ok(TurnReply {
            reply_text: intent::merge_reply(&reply, action),
            intent_label: label,
            action_executed: action.is_some(),
        })
    }
}
