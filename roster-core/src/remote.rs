//! Remote messaging API port (spec §4.2, §6).
//!
//! A thin, stateless wrapper over the external Bot API. Every call
//! surfaces HTTP status distinctly so the engine can make policy
//! decisions (access-lost vs. transient transport failure) without the
//! client hiding that information behind a generic error.

pub mod http;
pub mod mock;

pub use http::HttpRemoteClient;
pub use mock::MockRemoteClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::RemoteUser;

/// The outcome of one remote call, independent of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteStatus {
    #[default]
    Ok,
    NotFound400,
    Forbidden403,
    TransportError,
}

/// Minimal chat metadata returned by `getChat`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteChat {
    pub id: i64,
    pub title: Option<String>,
}

/// A chat membership record as returned by `getChatAdministrators` /
/// `getChatMember`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMember {
    pub user: RemoteUser,
    pub status: ChatMemberStatus,
}

/// The subset of Bot API member statuses the engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

/// One item from `getUpdates`, already flattened to the shapes the
/// engine's preprocessor (`crate::events`) understands.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub update_id: i64,
    pub chat_id: Option<i64>,
    pub chat_title: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub from: Option<RemoteUser>,
    pub new_chat_members: Vec<RemoteUser>,
    pub left_chat_member: Option<RemoteUser>,
    pub my_chat_member: Option<MyChatMemberUpdate>,
}

/// The `my_chat_member` update payload: the bot's own status changed.
#[derive(Debug, Clone, PartialEq)]
pub struct MyChatMemberUpdate {
    pub old_status: ChatMemberStatus,
    pub new_status: ChatMemberStatus,
}

/// Port over the external messaging HTTP API.
///
/// `token` is passed per-call rather than bound to the client, since a
/// single [`HttpRemoteClient`] instance is shared across every bot
/// credential in every owner's scope (spec §5: the connection is the
/// only shared mutable resource of consequence, and reusing one
/// `reqwest::Client` lets it pool its own connections).
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn get_chat(&self, token: &str, telegram_chat_id: i64) -> (Option<RemoteChat>, RemoteStatus);

    async fn get_chat_administrators(
        &self,
        token: &str,
        telegram_chat_id: i64,
    ) -> (Vec<ChatMember>, RemoteStatus);

    async fn get_chat_members_count(&self, token: &str, telegram_chat_id: i64) -> Option<i64>;

    async fn get_chat_member(
        &self,
        token: &str,
        telegram_chat_id: i64,
        telegram_user_id: i64,
    ) -> Option<ChatMember>;

    /// `offset = None` polls without acknowledging (used only to
    /// discover the initial cursor — spec §4.3).
    async fn get_updates(&self, token: &str, offset: Option<i64>) -> Vec<Update>;

    async fn send_message(&self, token: &str, telegram_chat_id: i64, text: &str) -> bool;

    /// Treats a 400 whose description contains "not found" or
    /// "user_not_participant" as success (spec §4.2).
    async fn kick_chat_member(&self, token: &str, telegram_chat_id: i64, telegram_user_id: i64) -> bool;
}
