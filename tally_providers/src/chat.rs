use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use crate::backoff::{Backoff, retry};

/// Request attempts per completion, spaced by [`Backoff::default`].
const COMPLETION_ATTEMPTS: u32 = 4;

/// Low-level chat-completions client shared by every LLM collaborator.
///
/// Speaks the OpenAI-style `/chat/completions` JSON dialect; vision and
/// file payloads ride along as data-URL content parts.
pub struct ChatModel {
    client: Client,
    api_key: String,
    base_url: String,
}

impl ChatModel {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: "https://open.bigmodel.cn/api/paas/v4".to_string(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// A plain-text content part.
    #[must_use]
    pub fn text_part(text: &str) -> Value {
        json!({"type": "text", "text": text})
    }

    /// An inline image content part for vision models.
    #[must_use]
    pub fn image_part(mime: &str, payload: &[u8]) -> Value {
        let data_url = format!("data:{mime};base64,{}", BASE64_STANDARD.encode(payload));
        json!({"type": "image_url", "image_url": {"url": data_url}})
    }

    /// An inline document content part (PDF and friends).
    #[must_use]
    pub fn file_part(file_name: &str, mime: &str, payload: &[u8]) -> Value {
        let data_url = format!("data:{mime};base64,{}", BASE64_STANDARD.encode(payload));
        json!({"type": "file", "file": {"filename": file_name, "file_data": data_url}})
    }

    /// Send one system + user exchange and return the assistant's reply
    /// text. `user_content` is either a plain string or an array of
    /// content parts.
    pub async fn complete(
        &self,
        model: &str,
        system: &str,
        user_content: Value,
    ) -> anyhow::Result<String> {
        let request = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user_content},
            ],
        });

        debug!(model, "sending chat-completions request");
        let reply = retry(
            || self.try_send(&request),
            COMPLETION_ATTEMPTS,
            Backoff::default(),
        )
        .await?;
        debug!(model, chars = reply.len(), "received model reply");
        Ok(reply)
    }

    async fn try_send(&self, request: &Value) -> anyhow::Result<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid response format: missing content"))?
            .to_string();

        Ok(content)
    }
}
