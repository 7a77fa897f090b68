//! Storage abstraction for the reconciliation engine (spec §4.1).
//!
//! Provides the [`Store`] trait as a port, plus the Postgres adapter and
//! an in-memory test double.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Chat, ChatKey, ChatStatus, ChatType, Employee, NewChat, NewChatEmployee, NewEmployee, Owner};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("migration error: {0}")]
    Migration(String),

    /// A write was rejected by a referential/uniqueness check (spec
    /// §7's "data-model integrity violation" — logged and the record is
    /// skipped, not fatal to the cycle).
    #[error("integrity violation: {0}")]
    Integrity(String),
}

/// The per-owner read the engine performs once at the start of each
/// owner's pass (mirrors `get_all_data(user_id)` in the source system).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnerSnapshot {
    pub bots: Vec<crate::model::Bot>,
    pub chats: Vec<Chat>,
    pub employees: Vec<Employee>,
    pub chat_employees: Vec<crate::model::ChatEmployee>,
}

/// Port for the relational store backing the engine.
///
/// All mutators are idempotent on the natural key and stamp
/// `updated_at = now()`. Implementations are not required to wrap a
/// chat's writes in a single transaction — the engine tolerates torn
/// writes because the next cycle re-converges (spec §4.1).
#[async_trait]
pub trait Store: Send + Sync {
    /// All owners eligible for reconciliation (`is_active = true`).
    async fn active_owners(&self) -> Result<Vec<Owner>, StoreError>;

    /// Bots/chats/employees/chat_employees scoped to one owner.
    async fn snapshot(&self, owner_id: i64) -> Result<OwnerSnapshot, StoreError>;

    /// Insert a brand-new chat, returning its assigned `chat_id`.
    async fn insert_chat(&self, chat: &NewChat) -> Result<i64, StoreError>;

    async fn set_chat_type(&self, key: ChatKey, type_id: ChatType) -> Result<(), StoreError>;

    async fn set_chat_status(&self, key: ChatKey, status_id: ChatStatus) -> Result<(), StoreError>;

    /// Prepend `title` as the current title if it differs from the
    /// stored element 0; otherwise a no-op (spec §6: element 0 is
    /// current, historical titles are kept).
    async fn push_chat_title(&self, key: ChatKey, title: &str) -> Result<(), StoreError>;

    async fn update_chat_counts(&self, key: ChatKey, user_num: i64, unknown_user: i64) -> Result<(), StoreError>;

    async fn find_employee_by_telegram_id(
        &self,
        owner_id: i64,
        telegram_user_id: i64,
    ) -> Result<Option<Employee>, StoreError>;

    /// Case-insensitive username lookup (spec §4.4 step 2).
    async fn find_employee_by_username(
        &self,
        owner_id: i64,
        telegram_username: &str,
    ) -> Result<Option<Employee>, StoreError>;

    /// Insert a brand-new employee, returning its assigned
    /// `employee_id`.
    async fn insert_employee(&self, employee: &NewEmployee) -> Result<i64, StoreError>;

    async fn update_employee(
        &self,
        employee_id: i64,
        owner_id: i64,
        patch: &crate::model::EmployeePatch,
    ) -> Result<(), StoreError>;

    /// Idempotent upsert on `(chat_id, employee_id)` (spec §9: this is
    /// the natural key globally, `user_id` is denormalised for query
    /// filtering only).
    async fn upsert_chat_employee(&self, link: &NewChatEmployee) -> Result<(), StoreError>;

    async fn deactivate_chat_employee(&self, chat_id: i64, employee_id: i64) -> Result<(), StoreError>;

    async fn delete_chat_employee(&self, chat_id: i64, employee_id: i64) -> Result<(), StoreError>;
}
