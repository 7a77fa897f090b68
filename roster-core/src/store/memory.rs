//! In-memory [`Store`] implementation for engine unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::model::{
    Bot, Chat, ChatEmployee, ChatKey, ChatStatus, ChatType, Employee, EmployeePatch, NewChat,
    NewChatEmployee, NewEmployee, Owner,
};

use super::{OwnerSnapshot, Store, StoreError};

#[derive(Debug, Default)]
struct State {
    owners: Vec<Owner>,
    bots: Vec<Bot>,
    chats: Vec<Chat>,
    employees: Vec<Employee>,
    links: Vec<ChatEmployee>,
    next_chat_id: i64,
    next_employee_id: i64,
}

/// A fully in-process [`Store`], used by engine tests so the seven-step
/// per-chat procedure can be exercised without a database.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_owner(self, owner: Owner) -> Self {
        self.state.lock().unwrap().owners.push(owner);
        self
    }

    #[must_use]
    pub fn with_bot(self, bot: Bot) -> Self {
        self.state.lock().unwrap().bots.push(bot);
        self
    }

    #[must_use]
    pub fn with_chat(self, chat: Chat) -> Self {
        let mut state = self.state.lock().unwrap();
        state.next_chat_id = state.next_chat_id.max(chat.chat_id + 1);
        state.chats.push(chat);
        drop(state);
        self
    }

    #[must_use]
    pub fn with_employee(self, employee: Employee) -> Self {
        let mut state = self.state.lock().unwrap();
        state.next_employee_id = state.next_employee_id.max(employee.employee_id + 1);
        state.employees.push(employee);
        drop(state);
        self
    }

    #[must_use]
    pub fn with_link(self, link: ChatEmployee) -> Self {
        self.state.lock().unwrap().links.push(link);
        self
    }

    /// Snapshot of every chat regardless of owner, for assertions in
    /// tests (`Store::snapshot` only returns one owner's rows).
    pub fn all_chats(&self) -> Vec<Chat> {
        self.state.lock().unwrap().chats.clone()
    }

    pub fn all_employees(&self) -> Vec<Employee> {
        self.state.lock().unwrap().employees.clone()
    }

    pub fn all_links(&self) -> Vec<ChatEmployee> {
        self.state.lock().unwrap().links.clone()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn active_owners(&self) -> Result<Vec<Owner>, StoreError> {
        Ok(self.state.lock().unwrap().owners.iter().filter(|o| o.is_active).cloned().collect())
    }

    async fn snapshot(&self, owner_id: i64) -> Result<OwnerSnapshot, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(OwnerSnapshot {
            bots: state.bots.iter().filter(|b| b.user_id == owner_id && b.is_active).cloned().collect(),
            chats: state.chats.iter().filter(|c| c.user_id == owner_id).cloned().collect(),
            employees: state
                .employees
                .iter()
                .filter(|e| e.user_id == owner_id && e.is_active)
                .cloned()
                .collect(),
            chat_employees: state
                .links
                .iter()
                .filter(|l| l.user_id == owner_id && l.is_active)
                .cloned()
                .collect(),
        })
    }

    async fn insert_chat(&self, chat: &NewChat) -> Result<i64, StoreError> {
        let mut state = self.state.lock().unwrap();
        let chat_id = state.next_chat_id;
        state.next_chat_id += 1;
        let now = Utc::now();
        state.chats.push(Chat {
            chat_id,
            bot_id: chat.bot_id,
            user_id: chat.user_id,
            telegram_chat_id: chat.telegram_chat_id,
            type_id: chat.type_id,
            status_id: chat.status_id,
            title: chat.title.clone(),
            user_num: chat.user_num,
            unknown_user: chat.unknown_user,
            created_at: now,
            updated_at: now,
        });
        Ok(chat_id)
    }

    async fn set_chat_type(&self, key: ChatKey, type_id: ChatType) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(chat) = find_chat_mut(&mut state.chats, key) {
            chat.type_id = type_id;
            chat.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_chat_status(&self, key: ChatKey, status_id: ChatStatus) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(chat) = find_chat_mut(&mut state.chats, key) {
            if chat.status_id != status_id {
                chat.status_id = status_id;
                chat.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn push_chat_title(&self, key: ChatKey, title: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(chat) = find_chat_mut(&mut state.chats, key) {
            if chat.title.first().map(String::as_str) != Some(title) {
                chat.title.insert(0, title.to_string());
                chat.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn update_chat_counts(&self, key: ChatKey, user_num: i64, unknown_user: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(chat) = find_chat_mut(&mut state.chats, key) {
            if chat.user_num != user_num || chat.unknown_user != unknown_user {
                chat.user_num = user_num;
                chat.unknown_user = unknown_user;
                chat.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn find_employee_by_telegram_id(
        &self,
        owner_id: i64,
        telegram_user_id: i64,
    ) -> Result<Option<Employee>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .employees
            .iter()
            .find(|e| e.user_id == owner_id && e.telegram_user_id == Some(telegram_user_id))
            .cloned())
    }

    async fn find_employee_by_username(
        &self,
        owner_id: i64,
        telegram_username: &str,
    ) -> Result<Option<Employee>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .employees
            .iter()
            .find(|e| {
                e.user_id == owner_id
                    && e.telegram_username
                        .as_deref()
                        .is_some_and(|u| u.eq_ignore_ascii_case(telegram_username))
            })
            .cloned())
    }

    async fn insert_employee(&self, employee: &NewEmployee) -> Result<i64, StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(tg_id) = employee.telegram_user_id {
            let conflict = state
                .employees
                .iter()
                .any(|e| e.user_id == employee.user_id && e.telegram_user_id == Some(tg_id));
            if conflict {
                return Err(StoreError::Integrity(format!(
                    "employee with telegram_user_id {tg_id} already exists for owner {}",
                    employee.user_id
                )));
            }
        }
        let employee_id = state.next_employee_id;
        state.next_employee_id += 1;
        state.employees.push(Employee {
            employee_id,
            user_id: employee.user_id,
            telegram_user_id: employee.telegram_user_id,
            telegram_username: employee.telegram_username.clone(),
            full_name: employee.full_name.clone(),
            is_active: employee.is_active,
            is_external: employee.is_external,
            is_bot: employee.is_bot,
        });
        Ok(employee_id)
    }

    async fn update_employee(
        &self,
        employee_id: i64,
        owner_id: i64,
        patch: &EmployeePatch,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(employee) = state
            .employees
            .iter_mut()
            .find(|e| e.employee_id == employee_id && e.user_id == owner_id)
        {
            if let Some(full_name) = &patch.full_name {
                employee.full_name = full_name.clone();
            }
            if let Some(username) = &patch.telegram_username {
                employee.telegram_username = username.clone();
            }
            if let Some(tg_id) = &patch.telegram_user_id {
                employee.telegram_user_id = *tg_id;
            }
            if let Some(active) = patch.is_active {
                employee.is_active = active;
            }
        }
        Ok(())
    }

    async fn upsert_chat_employee(&self, link: &NewChatEmployee) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .links
            .iter_mut()
            .find(|l| l.chat_id == link.chat_id && l.employee_id == link.employee_id)
        {
            existing.is_active = link.is_active;
            existing.is_admin = link.is_admin;
        } else {
            state.links.push(ChatEmployee {
                chat_id: link.chat_id,
                employee_id: link.employee_id,
                user_id: link.user_id,
                is_active: link.is_active,
                is_admin: link.is_admin,
            });
        }
        Ok(())
    }

    async fn deactivate_chat_employee(&self, chat_id: i64, employee_id: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(link) = state
            .links
            .iter_mut()
            .find(|l| l.chat_id == chat_id && l.employee_id == employee_id)
        {
            link.is_active = false;
        }
        Ok(())
    }

    async fn delete_chat_employee(&self, chat_id: i64, employee_id: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.links.retain(|l| !(l.chat_id == chat_id && l.employee_id == employee_id));
        Ok(())
    }
}

fn find_chat_mut(chats: &mut [Chat], key: ChatKey) -> Option<&mut Chat> {
    chats
        .iter_mut()
        .find(|c| c.chat_id == key.chat_id && c.bot_id == key.bot_id && c.user_id == key.user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Owner {
        Owner { user_id: 1, login: "owner".to_string(), is_active: true }
    }

    #[tokio::test]
    async fn test_active_owners_filters_inactive() {
        let store = InMemoryStore::new()
            .with_owner(owner())
            .with_owner(Owner { user_id: 2, login: "inactive".to_string(), is_active: false });

        let owners = store.active_owners().await.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].user_id, 1);
    }

    #[tokio::test]
    async fn test_insert_chat_assigns_incrementing_ids() {
        let store = InMemoryStore::new();
        let new_chat = NewChat {
            bot_id: 1,
            user_id: 1,
            telegram_chat_id: -100,
            type_id: ChatType::New,
            status_id: ChatStatus::Active,
            title: vec!["Team".to_string()],
            user_num: 0,
            unknown_user: 0,
        };
        let first = store.insert_chat(&new_chat).await.unwrap();
        let second = store.insert_chat(&new_chat).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_upsert_chat_employee_updates_in_place() {
        let store = InMemoryStore::new();
        let link = NewChatEmployee { chat_id: 1, employee_id: 1, user_id: 1, is_active: true, is_admin: false };
        store.upsert_chat_employee(&link).await.unwrap();
        store
            .upsert_chat_employee(&NewChatEmployee { is_admin: true, ..link })
            .await
            .unwrap();

        let links = store.all_links();
        assert_eq!(links.len(), 1);
        assert!(links[0].is_admin);
    }

    #[tokio::test]
    async fn test_insert_employee_rejects_duplicate_telegram_id() {
        let store = InMemoryStore::new();
        let employee = NewEmployee {
            user_id: 1,
            telegram_user_id: Some(7),
            telegram_username: Some("alice".to_string()),
            full_name: "Alice".to_string(),
            is_active: true,
            is_external: true,
            is_bot: false,
        };
        store.insert_employee(&employee).await.unwrap();
        let err = store.insert_employee(&employee).await.unwrap_err();
        assert!(matches!(err, StoreError::Integrity(_)));
    }

    #[tokio::test]
    async fn test_find_employee_by_username_is_case_insensitive() {
        let store = InMemoryStore::new().with_employee(Employee {
            employee_id: 1,
            user_id: 1,
            telegram_user_id: None,
            telegram_username: Some("Bob".to_string()),
            full_name: "Bob".to_string(),
            is_active: true,
            is_external: true,
            is_bot: false,
        });

        let found = store.find_employee_by_username(1, "bob").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_push_chat_title_dedupes_unchanged_current() {
        let key = ChatKey { chat_id: 1, bot_id: 1, user_id: 1 };
        let store = InMemoryStore::new().with_chat(Chat {
            chat_id: 1,
            bot_id: 1,
            user_id: 1,
            telegram_chat_id: -100,
            type_id: ChatType::New,
            status_id: ChatStatus::Active,
            title: vec!["Team".to_string()],
            user_num: 0,
            unknown_user: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });

        store.push_chat_title(key, "Team").await.unwrap();
        assert_eq!(store.all_chats()[0].title, vec!["Team".to_string()]);

        store.push_chat_title(key, "Renamed Team").await.unwrap();
        assert_eq!(
            store.all_chats()[0].title,
            vec!["Renamed Team".to_string(), "Team".to_string()]
        );
    }

    #[tokio::test]
    async fn test_delete_chat_employee_removes_link() {
        let store = InMemoryStore::new().with_link(ChatEmployee {
            chat_id: 1,
            employee_id: 1,
            user_id: 1,
            is_active: true,
            is_admin: false,
        });
        store.delete_chat_employee(1, 1).await.unwrap();
        assert!(store.all_links().is_empty());
    }
}
