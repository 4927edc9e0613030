/*!
API de chat factice

Enregistre chaque appel `POST /bot{token}/sendMessage` et peut simuler des
échecs pour les N prochains appels.
*/

use crate::spawn_server;
use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct SentMessage {
    /// Segment de chemin complet, `bot{token}`.
    pub bot: String,
    pub body: Value,
}

impl SentMessage {
    pub fn text(&self) -> &str {
        self.body["text"].as_str().unwrap_or_default()
    }
}

#[derive(Default)]
struct Inbox {
    messages: Vec<SentMessage>,
    failures_left: u32,
}

type Shared = Arc<Mutex<Inbox>>;

pub struct FakeTelegram {
    base_url: String,
    inbox: Shared,
    handle: JoinHandle<()>,
}

impl FakeTelegram {
    pub async fn start() -> Result<Self> {
        let inbox: Shared = Arc::new(Mutex::new(Inbox::default()));
        let router = Router::new()
            .route("/{bot}/sendMessage", post(send_message))
            .with_state(inbox.clone());
        let (base_url, handle) = spawn_server(router).await?;
        tracing::debug!(%base_url, "fake chat API listening");
        Ok(Self { base_url, inbox, handle })
    }

    pub fn api_url(&self) -> &str {
        &self.base_url
    }

    /// Les `n` prochains appels répondent 500 (et ne sont pas enregistrés).
    pub fn fail_next(&self, n: u32) {
        self.inbox.lock().failures_left = n;
    }

    pub fn messages(&self) -> Vec<SentMessage> {
        self.inbox.lock().messages.clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.inbox.lock().messages.iter().map(|m| m.text().to_string()).collect()
    }
}

impl Drop for FakeTelegram {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn send_message(State(inbox): State<Shared>, Path(bot): Path<String>, Json(body): Json<Value>) -> Response {
    let mut inbox = inbox.lock();
    if inbox.failures_left > 0 {
        inbox.failures_left -= 1;
        return (StatusCode::INTERNAL_SERVER_ERROR, "flood control").into_response();
    }
    inbox.messages.push(SentMessage { bot, body });
    Json(json!({ "ok": true })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_messages_and_simulates_failures() {
        let chat = FakeTelegram::start().await.unwrap();
        chat.fail_next(1);
        let client = reqwest::Client::new();
        let url = format!("{}/bot123:abc/sendMessage", chat.api_url());

        let res = client.post(&url).json(&json!({ "chat_id": 1, "text": "a" })).send().await.unwrap();
        assert_eq!(res.status(), 500);
        let res = client.post(&url).json(&json!({ "chat_id": 1, "text": "b" })).send().await.unwrap();
        assert_eq!(res.status(), 200);

        let messages = chat.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].bot, "bot123:abc");
        assert_eq!(messages[0].text(), "b");
    }
}
