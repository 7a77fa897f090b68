//! `reqwest`-backed implementation of [`RemoteClient`] against the
//! Telegram Bot API.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;

use crate::model::RemoteUser;

use super::{
    ChatMember, ChatMemberStatus, MyChatMemberUpdate, RemoteChat, RemoteClient, RemoteStatus,
    Update,
};

const API_BASE: &str = "https://api.telegram.org";

/// Thin wrapper over one shared `reqwest::Client`. Bot tokens live in
/// the `bots` table and are passed per-call; the client itself holds no
/// per-bot state.
pub struct HttpRemoteClient {
    client: reqwest::Client,
}

impl HttpRemoteClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn method_url(token: &str, method: &str) -> String {
        format!("{API_BASE}/bot{token}/{method}")
    }

    /// Issue a GET call with query parameters and classify the result.
    async fn call_get<T: for<'de> Deserialize<'de>>(
        &self,
        token: &str,
        method: &str,
        query: &[(&str, String)],
    ) -> (Option<T>, RemoteStatus) {
        let response = match self
            .client
            .get(Self::method_url(token, method))
            .query(query)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(method, error = %error, "telegram request failed");
                return (None, RemoteStatus::TransportError);
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST {
            return (None, RemoteStatus::NotFound400);
        }
        if status == reqwest::StatusCode::FORBIDDEN {
            return (None, RemoteStatus::Forbidden403);
        }
        if !status.is_success() {
            tracing::warn!(method, %status, "telegram call returned non-success status");
            return (None, RemoteStatus::TransportError);
        }

        match response.json::<ApiResponse<T>>().await {
            Ok(ApiResponse { ok: true, result: Some(result), .. }) => (Some(result), RemoteStatus::Ok),
            Ok(ApiResponse { ok: false, error_code: Some(400), .. }) => (None, RemoteStatus::NotFound400),
            Ok(ApiResponse { ok: false, error_code: Some(403), .. }) => (None, RemoteStatus::Forbidden403),
            Ok(_) => (None, RemoteStatus::TransportError),
            Err(error) => {
                tracing::warn!(method, error = %error, "failed to decode telegram response");
                (None, RemoteStatus::TransportError)
            }
        }
    }

    async fn call_post_json<T: for<'de> Deserialize<'de>>(
        &self,
        token: &str,
        method: &str,
        body: &serde_json::Value,
    ) -> (Option<T>, RemoteStatus) {
        let response = match self
            .client
            .post(Self::method_url(token, method))
            .json(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(method, error = %error, "telegram request failed");
                return (None, RemoteStatus::TransportError);
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            return (None, RemoteStatus::Forbidden403);
        }
        if status == reqwest::StatusCode::BAD_REQUEST {
            // kick_chat_member inspects the description itself, so hand
            // back the decoded body rather than short-circuiting here.
            return match response.json::<ApiResponse<T>>().await {
                Ok(parsed) => (None, classify_error(&parsed)),
                Err(_) => (None, RemoteStatus::NotFound400),
            };
        }
        if !status.is_success() {
            return (None, RemoteStatus::TransportError);
        }

        match response.json::<ApiResponse<T>>().await {
            Ok(ApiResponse { ok: true, result: Some(result), .. }) => (Some(result), RemoteStatus::Ok),
            Ok(parsed) => (None, classify_error(&parsed)),
            Err(error) => {
                tracing::warn!(method, error = %error, "failed to decode telegram response");
                (None, RemoteStatus::TransportError)
            }
        }
    }
}

impl Default for HttpRemoteClient {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_error<T>(response: &ApiResponse<T>) -> RemoteStatus {
    let description = response.description.as_deref().unwrap_or("").to_lowercase();
    if description.contains("not found") || description.contains("user_not_participant") {
        return RemoteStatus::Ok;
    }
    match response.error_code {
        Some(400) => RemoteStatus::NotFound400,
        Some(403) => RemoteStatus::Forbidden403,
        _ => RemoteStatus::TransportError,
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn get_chat(&self, token: &str, telegram_chat_id: i64) -> (Option<RemoteChat>, RemoteStatus) {
        let (wire, status) = self
            .call_get::<WireChat>(token, "getChat", &[("chat_id", telegram_chat_id.to_string())])
            .await;
        (wire.map(WireChat::into_domain), status)
    }

    async fn get_chat_administrators(
        &self,
        token: &str,
        telegram_chat_id: i64,
    ) -> (Vec<ChatMember>, RemoteStatus) {
        let (wire, status) = self
            .call_get::<Vec<WireChatMember>>(
                token,
                "getChatAdministrators",
                &[("chat_id", telegram_chat_id.to_string())],
            )
            .await;
        let members = wire
            .unwrap_or_default()
            .into_iter()
            .map(WireChatMember::into_domain)
            .collect();
        (members, status)
    }

    async fn get_chat_members_count(&self, token: &str, telegram_chat_id: i64) -> Option<i64> {
        let (count, status) = self
            .call_get::<i64>(
                token,
                "getChatMembersCount",
                &[("chat_id", telegram_chat_id.to_string())],
            )
            .await;
        if status == RemoteStatus::Ok { count } else { None }
    }

    async fn get_chat_member(
        &self,
        token: &str,
        telegram_chat_id: i64,
        telegram_user_id: i64,
    ) -> Option<ChatMember> {
        let (wire, status) = self
            .call_get::<WireChatMember>(
                token,
                "getChatMember",
                &[
                    ("chat_id", telegram_chat_id.to_string()),
                    ("user_id", telegram_user_id.to_string()),
                ],
            )
            .await;
        if status == RemoteStatus::Ok {
            wire.map(WireChatMember::into_domain)
        } else {
            None
        }
    }

    async fn get_updates(&self, token: &str, offset: Option<i64>) -> Vec<Update> {
        let mut query = vec![("timeout", "0".to_string())];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }
        let (wire, status) = self
            .call_get::<Vec<WireUpdate>>(token, "getUpdates", &query)
            .await;
        if status != RemoteStatus::Ok {
            return Vec::new();
        }
        wire.unwrap_or_default()
            .into_iter()
            .map(WireUpdate::into_domain)
            .collect()
    }

    async fn send_message(&self, token: &str, telegram_chat_id: i64, text: &str) -> bool {
        let body = serde_json::json!({ "chat_id": telegram_chat_id, "text": text });
        let (_, status) = self.call_post_json::<serde_json::Value>(token, "sendMessage", &body).await;
        status == RemoteStatus::Ok
    }

    async fn kick_chat_member(&self, token: &str, telegram_chat_id: i64, telegram_user_id: i64) -> bool {
        let body = serde_json::json!({ "chat_id": telegram_chat_id, "user_id": telegram_user_id });
        let (_, status) = self
            .call_post_json::<serde_json::Value>(token, "kickChatMember", &body)
            .await;
        status == RemoteStatus::Ok
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChat {
    id: i64,
    title: Option<String>,
}

impl WireChat {
    fn into_domain(self) -> RemoteChat {
        RemoteChat { id: self.id, title: self.title }
    }
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: i64,
    first_name: Option<String>,
    last_name: Option<String>,
    username: Option<String>,
    #[serde(default)]
    is_bot: bool,
}

impl WireUser {
    fn into_domain(self) -> RemoteUser {
        RemoteUser {
            id: self.id,
            first_name: self.first_name,
            last_name: self.last_name,
            username: self.username,
            is_bot: self.is_bot,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireChatMember {
    user: WireUser,
    status: String,
}

impl WireChatMember {
    fn into_domain(self) -> ChatMember {
        ChatMember {
            user: self.user.into_domain(),
            status: parse_member_status(&self.status),
        }
    }
}

fn parse_member_status(raw: &str) -> ChatMemberStatus {
    match raw {
        "creator" => ChatMemberStatus::Creator,
        "administrator" => ChatMemberStatus::Administrator,
        "restricted" => ChatMemberStatus::Restricted,
        "left" => ChatMemberStatus::Left,
        "kicked" => ChatMemberStatus::Kicked,
        _ => ChatMemberStatus::Member,
    }
}

#[derive(Debug, Deserialize)]
struct WireMyChatMember {
    chat: WireChat,
    old_chat_member: WireChatMember,
    new_chat_member: WireChatMember,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    chat: WireChat,
    #[serde(default)]
    date: Option<i64>,
    #[serde(default)]
    from: Option<WireUser>,
    #[serde(default)]
    new_chat_members: Vec<WireUser>,
    #[serde(default)]
    left_chat_member: Option<WireUser>,
}

#[derive(Debug, Deserialize)]
struct WireUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    my_chat_member: Option<WireMyChatMember>,
}

impl WireUpdate {
    fn into_domain(self) -> Update {
        let message = self.message;
        let chat_id = message
            .as_ref()
            .map(|m| m.chat.id)
            .or_else(|| self.my_chat_member.as_ref().map(|t| t.chat.id));
        let chat_title = message
            .as_ref()
            .and_then(|m| m.chat.title.clone())
            .or_else(|| self.my_chat_member.as_ref().and_then(|t| t.chat.title.clone()));
        let date = message
            .as_ref()
            .and_then(|m| m.date)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        Update {
            update_id: self.update_id,
            chat_id,
            chat_title,
            date,
            from: message.as_ref().and_then(|m| m.from.clone().map(WireUser::into_domain)),
            new_chat_members: message
                .as_ref()
                .map(|m| m.new_chat_members.iter().cloned().map(WireUser::into_domain).collect())
                .unwrap_or_default(),
            left_chat_member: message
                .as_ref()
                .and_then(|m| m.left_chat_member.clone())
                .map(WireUser::into_domain),
            my_chat_member: self.my_chat_member.map(|transition| MyChatMemberUpdate {
                old_status: parse_member_status(&transition.old_chat_member.status),
                new_status: parse_member_status(&transition.new_chat_member.status),
            }),
        }
    }
}

// WireUser/WireMessage need Clone for the `Option::clone` calls above.
impl Clone for WireUser {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            username: self.username.clone(),
            is_bot: self.is_bot,
        }
    }
}
