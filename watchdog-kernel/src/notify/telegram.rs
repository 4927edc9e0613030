use super::{Notifier, NotifyError};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Client "sendMessage" vers un groupe, optionnellement dans un topic.
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_url: String,
    bot_token: String,
    chat_id: i64,
    topic_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_thread_id: Option<i64>,
}

impl TelegramNotifier {
    pub fn new(api_url: &str, bot_token: &str, chat_id: i64, topic_id: Option<i64>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            chat_id,
            topic_id,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.bot_token)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let payload = SendMessage {
            chat_id: self.chat_id,
            text,
            parse_mode: "Markdown",
            message_thread_id: self.topic_id,
        };

        let response = self.client.post(self.endpoint()).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status { code: status.as_u16(), body });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_omits_missing_topic() {
        let payload = SendMessage { chat_id: -100, text: "hi", parse_mode: "Markdown", message_thread_id: None };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!({"chat_id": -100, "text": "hi", "parse_mode": "Markdown"}));

        let payload = SendMessage { message_thread_id: Some(7), ..payload };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["message_thread_id"], 7);
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let notifier = TelegramNotifier::new("http://127.0.0.1:9/", "123:abc", 1, None).unwrap();
        assert_eq!(notifier.endpoint(), "http://127.0.0.1:9/bot123:abc/sendMessage");
    }

    #[tokio::test]
    async fn test_transport_error_hides_bot_token() {
        // port 1 : connexion refusée
        let notifier = TelegramNotifier::new("http://127.0.0.1:1", "123456:SECRETTOKEN", 1, None).unwrap();
        let err = notifier.send("hi").await.unwrap_err();
        assert!(matches!(err, NotifyError::Http(_)));
        assert!(!err.to_string().contains("SECRETTOKEN"), "{err}");
        assert!(!format!("{err:?}").contains("SECRETTOKEN"), "{err:?}");
    }
}
