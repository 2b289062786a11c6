//! Telegram Bot API sender — text via `sendMessage`, media uploads via
//! multipart `sendPhoto` / `sendVideo` / `sendAnimation`.

use async_trait::async_trait;
use castbot_core::config::TelegramConfig;
use castbot_core::{CastError, Destination, MediaKind, MessageSender, Result};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;

pub struct TelegramSender {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramSender {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    /// Get bot info; used at startup to check the token.
    pub async fn get_me(&self) -> Result<TelegramUser> {
        let response = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| CastError::Transport(format!("getMe failed: {e}")))?;
        let body: TelegramApiResponse<TelegramUser> = response
            .json()
            .await
            .map_err(|e| CastError::Transport(format!("Invalid getMe response: {e}")))?;
        body.into_result("getMe")?
            .ok_or_else(|| CastError::Transport("No bot info".into()))
    }

    async fn upload(&self, chat_id: i64, kind: MediaKind, file_path: &Path, caption: &str) -> Result<()> {
        let (method, field) = media_method(kind);
        let bytes = tokio::fs::read(file_path).await?;
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| field.to_string());

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part(field, Part::bytes(bytes).file_name(file_name));
        if !caption.is_empty() {
            form = form.text("caption", caption.to_string());
        }

        let response = self
            .client
            .post(self.api_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| CastError::Transport(format!("{method} failed: {e}")))?;
        let result: TelegramApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| CastError::Transport(format!("Invalid {method} response: {e}")))?;
        result.into_result(method)?;
        Ok(())
    }
}

fn media_method(kind: MediaKind) -> (&'static str, &'static str) {
    match kind {
        MediaKind::Photo => ("sendPhoto", "photo"),
        MediaKind::Video => ("sendVideo", "video"),
        MediaKind::Gif => ("sendAnimation", "animation"),
    }
}

#[async_trait]
impl MessageSender for TelegramSender {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_text(&self, destination_id: i64, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": destination_id,
            "text": text,
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| CastError::Transport(format!("sendMessage failed: {e}")))?;

        let result: TelegramApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| CastError::Transport(format!("Invalid send response: {e}")))?;
        result.into_result("sendMessage")?;
        Ok(())
    }

    async fn send_media(&self, destination_id: i64, kind: MediaKind, file_path: &Path, caption: &str) -> Result<()> {
        self.upload(destination_id, kind, file_path, caption).await
    }

    async fn resolve_destination(&self, destination_id: i64) -> Result<Destination> {
        let response = self
            .client
            .get(self.api_url("getChat"))
            .query(&[("chat_id", destination_id.to_string())])
            .send()
            .await
            .map_err(|e| CastError::Transport(format!("getChat failed: {e}")))?;
        let body: TelegramApiResponse<TelegramChat> = response
            .json()
            .await
            .map_err(|e| CastError::Transport(format!("Invalid getChat response: {e}")))?;
        let chat = body
            .into_result("getChat")?
            .ok_or_else(|| CastError::Transport(format!("getChat returned no chat for {destination_id}")))?;
        Ok(Destination::new(chat.id, chat.display_name()))
    }
}

// --- Telegram API Types ---

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

impl<T> TelegramApiResponse<T> {
    fn into_result(self, method: &str) -> Result<Option<T>> {
        if !self.ok {
            return Err(CastError::Transport(format!(
                "{method} rejected: {}",
                self.description.unwrap_or_default()
            )));
        }
        Ok(self.result)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    pub title: Option<String>,
    pub first_name: Option<String>,
    pub username: Option<String>,
}

impl TelegramChat {
    /// Group title, else the person's name, else `ID <id>`.
    fn display_name(&self) -> String {
        self.title
            .clone()
            .or_else(|| self.first_name.clone())
            .or_else(|| self.username.as_ref().map(|u| format!("@{u}")))
            .unwrap_or_else(|| format!("ID {}", self.id))
    }
}
