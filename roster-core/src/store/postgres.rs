//! Postgres adapter for [`Store`].

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Row, postgres::PgPool};
use std::time::Duration;

use crate::model::{
    Bot, Chat, ChatEmployee, ChatKey, ChatStatus, ChatType, Employee, EmployeePatch, NewChat,
    NewChatEmployee, NewEmployee, Owner,
};

use super::{OwnerSnapshot, Store, StoreError};

/// Connection-pool sizing from spec §4.1: target 5, overflow 10 (cap
/// 15), pre-ping, 30-minute recycle.
const POOL_BASE_SIZE: u32 = 5;
const POOL_OVERFLOW: u32 = 10;
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(30 * 60);
const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and run pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the pool cannot be
    /// established, or [`StoreError::Migration`] if a migration fails.
    /// Per spec §7, pool initialisation failure is the one error that is
    /// fatal to the process.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(POOL_BASE_SIZE + POOL_OVERFLOW)
            .min_connections(POOL_BASE_SIZE)
            .test_before_acquire(true)
            .max_lifetime(POOL_MAX_LIFETIME)
            .acquire_timeout(POOL_ACQUIRE_TIMEOUT)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Wrap an already-established pool (used in integration tests
    /// against a Postgres instance provided via `TEST_DATABASE_URL`).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_chat(row: PgRow) -> Result<Chat, StoreError> {
    let type_id: i32 = row.try_get("type_id").map_err(db_err)?;
    let status_id: i32 = row.try_get("status_id").map_err(db_err)?;
    Ok(Chat {
        chat_id: row.try_get("chat_id").map_err(db_err)?,
        bot_id: row.try_get("bot_id").map_err(db_err)?,
        user_id: row.try_get("user_id").map_err(db_err)?,
        telegram_chat_id: row.try_get("telegram_chat_id").map_err(db_err)?,
        type_id: ChatType::try_from(type_id).map_err(|e| StoreError::Integrity(e.to_string()))?,
        status_id: ChatStatus::try_from(status_id).map_err(|e| StoreError::Integrity(e.to_string()))?,
        title: row.try_get::<Vec<String>, _>("title").map_err(db_err)?,
        user_num: row.try_get("user_num").map_err(db_err)?,
        unknown_user: row.try_get("unknown_user").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn row_to_employee(row: PgRow) -> Result<Employee, StoreError> {
    Ok(Employee {
        employee_id: row.try_get("employee_id").map_err(db_err)?,
        user_id: row.try_get("user_id").map_err(db_err)?,
        telegram_user_id: row.try_get("telegram_user_id").map_err(db_err)?,
        telegram_username: row.try_get("telegram_username").map_err(db_err)?,
        full_name: row.try_get("full_name").map_err(db_err)?,
        is_active: row.try_get("is_active").map_err(db_err)?,
        is_external: row.try_get("is_external").map_err(db_err)?,
        is_bot: row.try_get("is_bot").map_err(db_err)?,
    })
}

fn row_to_bot(row: PgRow) -> Result<Bot, StoreError> {
    Ok(Bot {
        bot_id: row.try_get("bot_id").map_err(db_err)?,
        user_id: row.try_get("user_id").map_err(db_err)?,
        bot_token: row.try_get("bot_token").map_err(db_err)?,
        telegram_user_id: row.try_get("telegram_user_id").map_err(db_err)?,
        bot_name: row.try_get("bot_name").map_err(db_err)?,
        is_active: row.try_get("is_active").map_err(db_err)?,
    })
}

fn row_to_chat_employee(row: PgRow) -> Result<ChatEmployee, StoreError> {
    Ok(ChatEmployee {
        chat_id: row.try_get("chat_id").map_err(db_err)?,
        employee_id: row.try_get("employee_id").map_err(db_err)?,
        user_id: row.try_get("user_id").map_err(db_err)?,
        is_active: row.try_get("is_active").map_err(db_err)?,
        is_admin: row.try_get("is_admin").map_err(db_err)?,
    })
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

/// True if `error` is a unique-constraint violation on `constraint`.
fn is_unique_violation(error: &sqlx::Error, constraint: &str) -> bool {
    match error {
        sqlx::Error::Database(db_error) => db_error.constraint() == Some(constraint),
        _ => false,
    }
}

#[async_trait]
impl Store for PgStore {
    async fn active_owners(&self) -> Result<Vec<Owner>, StoreError> {
        let rows = sqlx::query("SELECT user_id, login, is_active FROM users WHERE is_active = true")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter()
            .map(|row| {
                Ok(Owner {
                    user_id: row.try_get("user_id").map_err(db_err)?,
                    login: row.try_get("login").map_err(db_err)?,
                    is_active: row.try_get("is_active").map_err(db_err)?,
                })
            })
            .collect()
    }

    async fn snapshot(&self, owner_id: i64) -> Result<OwnerSnapshot, StoreError> {
        let bot_rows = sqlx::query(
            "SELECT bot_id, user_id, bot_token, telegram_user_id, bot_name, is_active \
             FROM bots WHERE user_id = $1 AND is_active = true",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let bots = bot_rows.into_iter().map(row_to_bot).collect::<Result<Vec<_>, _>>()?;

        let chat_rows = sqlx::query(
            "SELECT chat_id, bot_id, user_id, telegram_chat_id, type_id, status_id, title, \
             user_num, unknown_user, created_at, updated_at FROM chats WHERE user_id = $1",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let chats = chat_rows.into_iter().map(row_to_chat).collect::<Result<Vec<_>, _>>()?;

        let employee_rows = sqlx::query(
            "SELECT employee_id, user_id, telegram_user_id, telegram_username, full_name, \
             is_active, is_external, is_bot FROM employees WHERE user_id = $1 AND is_active = true",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let employees = employee_rows
            .into_iter()
            .map(row_to_employee)
            .collect::<Result<Vec<_>, _>>()?;

        let link_rows = sqlx::query(
            "SELECT chat_id, employee_id, user_id, is_active, is_admin \
             FROM chat_employees WHERE user_id = $1 AND is_active = true",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let chat_employees = link_rows
            .into_iter()
            .map(row_to_chat_employee)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OwnerSnapshot { bots, chats, employees, chat_employees })
    }

    async fn insert_chat(&self, chat: &NewChat) -> Result<i64, StoreError> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO chats (bot_id, user_id, telegram_chat_id, type_id, status_id, title, \
             user_num, unknown_user, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
             RETURNING chat_id",
        )
        .bind(chat.bot_id)
        .bind(chat.user_id)
        .bind(chat.telegram_chat_id)
        .bind(i32::from(chat.type_id))
        .bind(i32::from(chat.status_id))
        .bind(&chat.title)
        .bind(chat.user_num)
        .bind(chat.unknown_user)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        row.try_get("chat_id").map_err(db_err)
    }

    async fn set_chat_type(&self, key: ChatKey, type_id: ChatType) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE chats SET type_id = $1, updated_at = $2 \
             WHERE chat_id = $3 AND bot_id = $4 AND user_id = $5",
        )
        .bind(i32::from(type_id))
        .bind(Utc::now())
        .bind(key.chat_id)
        .bind(key.bot_id)
        .bind(key.user_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_chat_status(&self, key: ChatKey, status_id: ChatStatus) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE chats SET status_id = $1, updated_at = $2 \
             WHERE chat_id = $3 AND bot_id = $4 AND user_id = $5 \
             AND status_id IS DISTINCT FROM $1",
        )
        .bind(i32::from(status_id))
        .bind(Utc::now())
        .bind(key.chat_id)
        .bind(key.bot_id)
        .bind(key.user_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn push_chat_title(&self, key: ChatKey, title: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE chats SET title = array_prepend($1, title), updated_at = $2 \
             WHERE chat_id = $3 AND bot_id = $4 AND user_id = $5 \
             AND (title IS NULL OR title[1] IS DISTINCT FROM $1)",
        )
        .bind(title)
        .bind(Utc::now())
        .bind(key.chat_id)
        .bind(key.bot_id)
        .bind(key.user_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_chat_counts(&self, key: ChatKey, user_num: i64, unknown_user: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE chats SET user_num = $1, unknown_user = $2, updated_at = $3 \
             WHERE chat_id = $4 AND bot_id = $5 AND user_id = $6 \
             AND (user_num IS DISTINCT FROM $1 OR unknown_user IS DISTINCT FROM $2)",
        )
        .bind(user_num)
        .bind(unknown_user)
        .bind(Utc::now())
        .bind(key.chat_id)
        .bind(key.bot_id)
        .bind(key.user_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_employee_by_telegram_id(
        &self,
        owner_id: i64,
        telegram_user_id: i64,
    ) -> Result<Option<Employee>, StoreError> {
        let row = sqlx::query(
            "SELECT employee_id, user_id, telegram_user_id, telegram_username, full_name, \
             is_active, is_external, is_bot FROM employees WHERE user_id = $1 AND telegram_user_id = $2",
        )
        .bind(owner_id)
        .bind(telegram_user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(row_to_employee).transpose()
    }

    async fn find_employee_by_username(
        &self,
        owner_id: i64,
        telegram_username: &str,
    ) -> Result<Option<Employee>, StoreError> {
        let row = sqlx::query(
            "SELECT employee_id, user_id, telegram_user_id, telegram_username, full_name, \
             is_active, is_external, is_bot FROM employees \
             WHERE user_id = $1 AND lower(telegram_username) = lower($2)",
        )
        .bind(owner_id)
        .bind(telegram_username)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(row_to_employee).transpose()
    }

    async fn insert_employee(&self, employee: &NewEmployee) -> Result<i64, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO employees (user_id, telegram_user_id, telegram_username, full_name, \
             is_active, is_external, is_bot, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) \
             RETURNING employee_id",
        )
        .bind(employee.user_id)
        .bind(employee.telegram_user_id)
        .bind(&employee.telegram_username)
        .bind(&employee.full_name)
        .bind(employee.is_active)
        .bind(employee.is_external)
        .bind(employee.is_bot)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => row.try_get("employee_id").map_err(db_err),
            Err(e) if is_unique_violation(&e, "employees_user_id_telegram_user_id_key") => {
                Err(StoreError::Integrity(format!(
                    "employee with telegram_user_id {:?} already exists for owner {}",
                    employee.telegram_user_id, employee.user_id,
                )))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn update_employee(
        &self,
        employee_id: i64,
        owner_id: i64,
        patch: &EmployeePatch,
    ) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE employees SET \
             full_name = COALESCE($1, full_name), \
             telegram_username = CASE WHEN $2 THEN $3 ELSE telegram_username END, \
             telegram_user_id = CASE WHEN $4 THEN $5 ELSE telegram_user_id END, \
             is_active = COALESCE($6, is_active), \
             updated_at = $7 \
             WHERE employee_id = $8 AND user_id = $9",
        )
        .bind(&patch.full_name)
        .bind(patch.telegram_username.is_some())
        .bind(patch.telegram_username.clone().flatten())
        .bind(patch.telegram_user_id.is_some())
        .bind(patch.telegram_user_id.flatten())
        .bind(patch.is_active)
        .bind(Utc::now())
        .bind(employee_id)
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_chat_employee(&self, link: &NewChatEmployee) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO chat_employees (chat_id, employee_id, user_id, is_active, is_admin, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6) \
             ON CONFLICT (chat_id, employee_id) DO UPDATE SET \
             is_active = EXCLUDED.is_active, is_admin = EXCLUDED.is_admin, updated_at = EXCLUDED.updated_at",
        )
        .bind(link.chat_id)
        .bind(link.employee_id)
        .bind(link.user_id)
        .bind(link.is_active)
        .bind(link.is_admin)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn deactivate_chat_employee(&self, chat_id: i64, employee_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE chat_employees SET is_active = false, updated_at = $1 \
             WHERE chat_id = $2 AND employee_id = $3",
        )
        .bind(Utc::now())
        .bind(chat_id)
        .bind(employee_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_chat_employee(&self, chat_id: i64, employee_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM chat_employees WHERE chat_id = $1 AND employee_id = $2")
            .bind(chat_id)
            .bind(employee_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
