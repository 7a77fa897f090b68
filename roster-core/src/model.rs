//! Domain types for the reconciliation engine.
//!
//! These are plain data structs that mirror the relational schema
//! (`migrations/0001_init.sql`); the `Store` trait is the only thing
//! that knows how to turn them into rows and back.

use chrono::{DateTime, Utc};

/// A tenant account. The engine only reads `user_id`/`is_active` from
/// this table — owner CRUD lives outside the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Owner {
    pub user_id: i64,
    pub login: String,
    pub is_active: bool,
}

/// A credentialled bot identity belonging to exactly one owner.
#[derive(Debug, Clone, PartialEq)]
pub struct Bot {
    pub bot_id: i64,
    pub user_id: i64,
    pub bot_token: String,
    pub telegram_user_id: Option<i64>,
    pub bot_name: String,
    pub is_active: bool,
}

/// Per-`type_id` classification of a chat, driving [`crate::policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ChatType {
    External = 1,
    Internal = 2,
    ObserveOnly = 3,
    New = 4,
    Removed = 5,
    Blocked = 6,
}

impl TryFrom<i32> for ChatType {
    type Error = ModelError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ChatType::External),
            2 => Ok(ChatType::Internal),
            3 => Ok(ChatType::ObserveOnly),
            4 => Ok(ChatType::New),
            5 => Ok(ChatType::Removed),
            6 => Ok(ChatType::Blocked),
            other => Err(ModelError::InvalidTypeId(other)),
        }
    }
}

impl From<ChatType> for i32 {
    fn from(value: ChatType) -> Self {
        value as i32
    }
}

/// Bot-presence status within a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ChatStatus {
    Active = 1,
    NotAdmin = 2,
    NoAccess = 3,
}

impl TryFrom<i32> for ChatStatus {
    type Error = ModelError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ChatStatus::Active),
            2 => Ok(ChatStatus::NotAdmin),
            3 => Ok(ChatStatus::NoAccess),
            other => Err(ModelError::InvalidStatusId(other)),
        }
    }
}

impl From<ChatStatus> for i32 {
    fn from(value: ChatStatus) -> Self {
        value as i32
    }
}

/// Raised when a stored `type_id`/`status_id` does not map to a known
/// variant — indicates store/schema drift, not a recoverable condition.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("unknown chat type_id: {0}")]
    InvalidTypeId(i32),
    #[error("unknown chat status_id: {0}")]
    InvalidStatusId(i32),
}

/// A remote conversation as seen by one bot. `(bot_id, telegram_chat_id)`
/// is the engine's working key.
#[derive(Debug, Clone, PartialEq)]
pub struct Chat {
    pub chat_id: i64,
    pub bot_id: i64,
    pub user_id: i64,
    pub telegram_chat_id: i64,
    pub type_id: ChatType,
    pub status_id: ChatStatus,
    /// Ordered sequence of historical titles; element 0 is current.
    pub title: Vec<String>,
    pub user_num: i64,
    pub unknown_user: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn current_title(&self) -> Option<&str> {
        self.title.first().map(String::as_str)
    }
}

/// Fields needed to insert a brand-new chat row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChat {
    pub bot_id: i64,
    pub user_id: i64,
    pub telegram_chat_id: i64,
    pub type_id: ChatType,
    pub status_id: ChatStatus,
    pub title: Vec<String>,
    pub user_num: i64,
    pub unknown_user: i64,
}

/// The natural key the engine addresses a chat by when mutating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatKey {
    pub chat_id: i64,
    pub bot_id: i64,
    pub user_id: i64,
}

/// A person (or bot) observed within one owner's scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Employee {
    pub employee_id: i64,
    pub user_id: i64,
    pub telegram_user_id: Option<i64>,
    pub telegram_username: Option<String>,
    pub full_name: String,
    pub is_active: bool,
    pub is_external: bool,
    pub is_bot: bool,
}

/// Fields needed to insert a brand-new employee row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEmployee {
    pub user_id: i64,
    pub telegram_user_id: Option<i64>,
    pub telegram_username: Option<String>,
    pub full_name: String,
    pub is_active: bool,
    pub is_external: bool,
    pub is_bot: bool,
}

/// A partial update staged by the identity resolver or enforcement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmployeePatch {
    pub full_name: Option<String>,
    pub telegram_username: Option<Option<String>>,
    pub telegram_user_id: Option<Option<i64>>,
    pub is_active: Option<bool>,
}

impl EmployeePatch {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.telegram_username.is_none()
            && self.telegram_user_id.is_none()
            && self.is_active.is_none()
    }
}

/// A membership link between an [`Employee`] and a [`Chat`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEmployee {
    pub chat_id: i64,
    pub employee_id: i64,
    pub user_id: i64,
    pub is_active: bool,
    pub is_admin: bool,
}

/// Fields needed to upsert a chat/employee link on its natural key
/// `(chat_id, employee_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChatEmployee {
    pub chat_id: i64,
    pub employee_id: i64,
    pub user_id: i64,
    pub is_active: bool,
    pub is_admin: bool,
}

/// A remote user payload as returned by the messaging API, flattened to
/// the fields the engine cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteUser {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub is_bot: bool,
}

impl RemoteUser {
    /// `first_name last_name`, falling back to `username`, falling back
    /// to the bare numeric id — mirrors how the original source built a
    /// display name for newly observed employees.
    pub fn display_name(&self) -> String {
        let joined = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if !joined.is_empty() {
            joined
        } else if let Some(username) = &self.username {
            username.clone()
        } else {
            self.id.to_string()
        }
    }
}
