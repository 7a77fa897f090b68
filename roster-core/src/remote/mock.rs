//! Mock [`RemoteClient`] for engine tests.
//!
//! Returns configurable canned responses keyed by `telegram_chat_id`, so
//! tests can drive the engine through the scenarios in spec §8 without
//! any network access.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ChatMember, ChatMemberStatus, RemoteChat, RemoteClient, RemoteStatus, Update};

#[derive(Debug, Default)]
struct ChatFixture {
    chat: (Option<RemoteChat>, RemoteStatus),
    administrators: (Vec<ChatMember>, RemoteStatus),
    members_count: Option<i64>,
    members: HashMap<i64, ChatMember>,
}

/// A configurable, in-memory stand-in for [`HttpRemoteClient`][super::HttpRemoteClient].
#[derive(Debug, Default)]
pub struct MockRemoteClient {
    fixtures: Mutex<HashMap<i64, ChatFixture>>,
    updates: Mutex<Vec<Update>>,
    sent_messages: Mutex<Vec<(i64, String)>>,
    kicked: Mutex<Vec<(i64, i64)>>,
    kick_should_succeed: Mutex<bool>,
}

impl MockRemoteClient {
    pub fn new() -> Self {
        Self {
            kick_should_succeed: Mutex::new(true),
            ..Default::default()
        }
    }

    fn lock_fixture<'a>(
        fixtures: &'a Mutex<HashMap<i64, ChatFixture>>,
        telegram_chat_id: i64,
    ) -> std::sync::MutexGuard<'a, HashMap<i64, ChatFixture>> {
        let mut guard = fixtures.lock().unwrap();
        guard.entry(telegram_chat_id).or_default();
        guard
    }

    #[must_use]
    pub fn with_chat(self, telegram_chat_id: i64, chat: RemoteChat, status: RemoteStatus) -> Self {
        let mut guard = Self::lock_fixture(&self.fixtures, telegram_chat_id);
        guard.get_mut(&telegram_chat_id).unwrap().chat = (Some(chat), status);
        drop(guard);
        self
    }

    #[must_use]
    pub fn with_chat_status(self, telegram_chat_id: i64, status: RemoteStatus) -> Self {
        let mut guard = Self::lock_fixture(&self.fixtures, telegram_chat_id);
        guard.get_mut(&telegram_chat_id).unwrap().chat.1 = status;
        drop(guard);
        self
    }

    #[must_use]
    pub fn with_administrators(
        self,
        telegram_chat_id: i64,
        admins: Vec<ChatMember>,
        status: RemoteStatus,
    ) -> Self {
        let mut guard = Self::lock_fixture(&self.fixtures, telegram_chat_id);
        guard.get_mut(&telegram_chat_id).unwrap().administrators = (admins, status);
        drop(guard);
        self
    }

    #[must_use]
    pub fn with_members_count(self, telegram_chat_id: i64, count: i64) -> Self {
        let mut guard = Self::lock_fixture(&self.fixtures, telegram_chat_id);
        guard.get_mut(&telegram_chat_id).unwrap().members_count = Some(count);
        drop(guard);
        self
    }

    #[must_use]
    pub fn with_member(self, telegram_chat_id: i64, telegram_user_id: i64, member: ChatMember) -> Self {
        let mut guard = Self::lock_fixture(&self.fixtures, telegram_chat_id);
        guard.get_mut(&telegram_chat_id).unwrap().members.insert(telegram_user_id, member);
        drop(guard);
        self
    }

    #[must_use]
    pub fn with_updates(self, updates: Vec<Update>) -> Self {
        *self.updates.lock().unwrap() = updates;
        self
    }

    #[must_use]
    pub fn with_kick_failing(self) -> Self {
        *self.kick_should_succeed.lock().unwrap() = false;
        self
    }

    pub fn sent_messages(&self) -> Vec<(i64, String)> {
        self.sent_messages.lock().unwrap().clone()
    }

    pub fn kicked(&self) -> Vec<(i64, i64)> {
        self.kicked.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteClient for MockRemoteClient {
    async fn get_chat(&self, _token: &str, telegram_chat_id: i64) -> (Option<RemoteChat>, RemoteStatus) {
        let guard = self.fixtures.lock().unwrap();
        guard
            .get(&telegram_chat_id)
            .map(|fixture| fixture.chat.clone())
            .unwrap_or((None, RemoteStatus::NotFound400))
    }

    async fn get_chat_administrators(
        &self,
        _token: &str,
        telegram_chat_id: i64,
    ) -> (Vec<ChatMember>, RemoteStatus) {
        let guard = self.fixtures.lock().unwrap();
        guard
            .get(&telegram_chat_id)
            .map(|fixture| fixture.administrators.clone())
            .unwrap_or((Vec::new(), RemoteStatus::Forbidden403))
    }

    async fn get_chat_members_count(&self, _token: &str, telegram_chat_id: i64) -> Option<i64> {
        let guard = self.fixtures.lock().unwrap();
        guard.get(&telegram_chat_id).and_then(|fixture| fixture.members_count)
    }

    async fn get_chat_member(
        &self,
        _token: &str,
        telegram_chat_id: i64,
        telegram_user_id: i64,
    ) -> Option<ChatMember> {
        let guard = self.fixtures.lock().unwrap();
        guard
            .get(&telegram_chat_id)
            .and_then(|fixture| fixture.members.get(&telegram_user_id).cloned())
    }

    async fn get_updates(&self, _token: &str, offset: Option<i64>) -> Vec<Update> {
        let updates = self.updates.lock().unwrap();
        match offset {
            None => updates.clone(),
            Some(offset) => updates.iter().filter(|u| u.update_id >= offset).cloned().collect(),
        }
    }

    async fn send_message(&self, _token: &str, telegram_chat_id: i64, text: &str) -> bool {
        self.sent_messages.lock().unwrap().push((telegram_chat_id, text.to_string()));
        true
    }

    async fn kick_chat_member(&self, _token: &str, telegram_chat_id: i64, telegram_user_id: i64) -> bool {
        let succeed = *self.kick_should_succeed.lock().unwrap();
        if succeed {
            self.kicked.lock().unwrap().push((telegram_chat_id, telegram_user_id));
        }
        succeed
    }
}

impl Clone for ChatFixture {
    fn clone(&self) -> Self {
        Self {
            chat: self.chat.clone(),
            administrators: self.administrators.clone(),
            members_count: self.members_count,
            members: self.members.clone(),
        }
    }
}
