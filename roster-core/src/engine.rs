//! The reconciliation engine (spec §4.5) — the top-level cycle loop.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;

use chrono::{Duration as ChronoDuration, Utc};
use thiserror::Error;

use crate::config::Config;
use crate::cursor::UpdateCursor;
use crate::events::{self, UpdateEvent};
use crate::identity::{self, Resolution};
use crate::model::{
    Bot, Chat, ChatKey, ChatStatus, ChatType, Employee, NewChat, NewChatEmployee, NewEmployee,
};
use crate::policy::ChatPolicy;
use crate::remote::{ChatMemberStatus, RemoteClient, RemoteStatus};
use crate::store::{OwnerSnapshot, Store, StoreError};

/// Raised only for conditions that make the cycle impossible to run at
/// all. Per-entity failures within a cycle are logged and skipped, not
/// propagated (spec §7).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("could not list active owners: {0}")]
    Store(#[from] StoreError),
}

/// Owns the per-bot update cursors across cycles (in-memory only —
/// never persisted, per spec §4.3).
pub struct Engine {
    store: Arc<dyn Store>,
    remote: Arc<dyn RemoteClient>,
    config: Config,
    cursors: Mutex<HashMap<i64, UpdateCursor>>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, remote: Arc<dyn RemoteClient>, config: Config) -> Self {
        Self { store, remote, config, cursors: Mutex::new(HashMap::new()) }
    }

    /// Run one full sweep: every active owner × bot × chat.
    pub async fn run_cycle(&self) -> Result<(), EngineError> {
        let owners = self.store.active_owners().await?;
        for owner in owners {
            let snapshot = match self.store.snapshot(owner.user_id).await {
                Ok(snapshot) => snapshot,
                Err(error) => {
                    tracing::error!(owner_id = owner.user_id, %error, "failed to load owner snapshot, skipping");
                    continue;
                }
            };
            for bot in snapshot.bots.clone() {
                self.process_bot(owner.user_id, &bot, &snapshot).await;
            }
        }
        Ok(())
    }

    fn cursor_for(&self, bot_id: i64) -> UpdateCursor {
        self.cursors.lock().unwrap().get(&bot_id).copied().unwrap_or_default()
    }

    fn store_cursor(&self, bot_id: i64, cursor: UpdateCursor) {
        self.cursors.lock().unwrap().insert(bot_id, cursor);
    }

    async fn process_bot(&self, owner_id: i64, bot: &Bot, snapshot: &OwnerSnapshot) {
        let span = tracing::info_span!("process_bot", owner_id, bot_id = bot.bot_id);
        let _enter = span.enter();

        let previous = self.cursor_for(bot.bot_id);
        let was_bootstrapping = previous.is_bootstrapping();
        let raw_updates = self.remote.get_updates(&bot.bot_token, previous.offset()).await;

        let mut cursor = previous;
        cursor.advance(raw_updates.iter().map(|u| u.update_id));
        self.store_cursor(bot.bot_id, cursor);

        if was_bootstrapping {
            tracing::info!("bootstrapped update cursor, discarding backlog batch");
        }

        let lookback = ChronoDuration::hours(self.config.updates_lookback_hours);
        let now = Utc::now();
        let events: Vec<UpdateEvent> = if was_bootstrapping {
            Vec::new()
        } else {
            raw_updates.iter().flat_map(|u| events::flatten(u, lookback, now)).collect()
        };

        let known_chats: Vec<Chat> = snapshot.chats.iter().filter(|c| c.bot_id == bot.bot_id).cloned().collect();
        let known_telegram_ids: HashSet<i64> = known_chats.iter().map(|c| c.telegram_chat_id).collect();

        let mut discovered_ids: Vec<i64> = events
            .iter()
            .filter_map(|event| event_chat_id(event))
            .filter(|telegram_chat_id| !known_telegram_ids.contains(telegram_chat_id))
            .collect();
        discovered_ids.sort_unstable();
        discovered_ids.dedup();

        let mut chats = known_chats;
        for telegram_chat_id in discovered_ids {
            let title = raw_updates.iter().find(|u| u.chat_id == Some(telegram_chat_id)).and_then(|u| u.chat_title.clone());
            match self.create_new_chat(owner_id, bot, telegram_chat_id, title).await {
                Ok(chat) => chats.push(chat),
                Err(error) => {
                    tracing::error!(telegram_chat_id, %error, "failed to create newly discovered chat");
                }
            }
        }

        for chat in &chats {
            self.reconcile_chat(owner_id, bot, chat, snapshot).await;
        }

        self.drain_updates(owner_id, bot, &events, &chats).await;
    }

    /// First-time chat creation (spec §4.5): insert with `type_id = 4`,
    /// register the bot as an employee, and send the welcome message.
    async fn create_new_chat(
        &self,
        owner_id: i64,
        bot: &Bot,
        telegram_chat_id: i64,
        title: Option<String>,
    ) -> Result<Chat, StoreError> {
        let new_chat = NewChat {
            bot_id: bot.bot_id,
            user_id: owner_id,
            telegram_chat_id,
            type_id: ChatType::New,
            status_id: ChatStatus::Active,
            title: title.into_iter().collect(),
            user_num: 0,
            unknown_user: 0,
        };
        let chat_id = self.store.insert_chat(&new_chat).await?;

        if let Some(telegram_user_id) = bot.telegram_user_id {
            let bot_employee = NewEmployee {
                user_id: owner_id,
                telegram_user_id: Some(telegram_user_id),
                telegram_username: None,
                full_name: bot.bot_name.clone(),
                is_active: true,
                is_external: false,
                is_bot: true,
            };
            match self.store.find_employee_by_telegram_id(owner_id, telegram_user_id).await? {
                Some(existing) => {
                    self.store
                        .upsert_chat_employee(&NewChatEmployee {
                            chat_id,
                            employee_id: existing.employee_id,
                            user_id: owner_id,
                            is_active: true,
                            is_admin: true,
                        })
                        .await?;
                }
                None => {
                    let employee_id = self.store.insert_employee(&bot_employee).await?;
                    self.store
                        .upsert_chat_employee(&NewChatEmployee {
                            chat_id,
                            employee_id,
                            user_id: owner_id,
                            is_active: true,
                            is_admin: true,
                        })
                        .await?;
                }
            }
        }

        let now = Utc::now();
        if !self.remote.send_message(&bot.bot_token, telegram_chat_id, &self.config.welcome_message).await {
            tracing::warn!(telegram_chat_id, "welcome message delivery failed, not retried");
        }

        Ok(Chat {
            chat_id,
            bot_id: bot.bot_id,
            user_id: owner_id,
            telegram_chat_id,
            type_id: ChatType::New,
            status_id: ChatStatus::Active,
            title: new_chat.title,
            user_num: 0,
            unknown_user: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// The per-chat procedure, steps 1-6 of spec §4.5.
    async fn reconcile_chat(&self, owner_id: i64, bot: &Bot, chat: &Chat, snapshot: &OwnerSnapshot) {
        // Blocked is the only type that never reconciles at all — it is a
        // manual operator override, not a transient access loss. Removed
        // chats still run step 1 below so they can be revived.
        if chat.type_id == ChatType::Blocked {
            return;
        }

        let key = ChatKey { chat_id: chat.chat_id, bot_id: bot.bot_id, user_id: owner_id };
        let span = tracing::info_span!("reconcile_chat", chat_id = chat.chat_id, telegram_chat_id = chat.telegram_chat_id);
        let _enter = span.enter();

        // Step 1: getChat.
        let (remote_chat, status) = self.remote.get_chat(&bot.bot_token, chat.telegram_chat_id).await;
        let mut effective_type = chat.type_id;
        match status {
            RemoteStatus::NotFound400 => {
                tracing::warn!("chat not found (400), marking removed");
                let _ = self.store.set_chat_type(key, ChatType::Removed).await;
                return;
            }
            RemoteStatus::Forbidden403 => {
                tracing::warn!("access forbidden (403), marking removed");
                let _ = self.store.set_chat_status(key, ChatStatus::NoAccess).await;
                let _ = self.store.set_chat_type(key, ChatType::Removed).await;
                return;
            }
            RemoteStatus::TransportError => {
                tracing::warn!("transport error on getChat, skipping this cycle");
                return;
            }
            RemoteStatus::Ok => {
                if chat.type_id == ChatType::Removed {
                    tracing::info!("access regained, reviving chat");
                    let _ = self.store.set_chat_type(key, ChatType::New).await;
                    effective_type = ChatType::New;
                }
                if let Some(title) = remote_chat.and_then(|c| c.title) {
                    let _ = self.store.push_chat_title(key, &title).await;
                }
            }
        }

        let policy = ChatPolicy::for_type(effective_type);
        if !policy.reconcile {
            return;
        }

        // Step 2: getChatAdministrators.
        let (administrators, admin_status) =
            self.remote.get_chat_administrators(&bot.bot_token, chat.telegram_chat_id).await;
        match admin_status {
            RemoteStatus::Forbidden403 => {
                tracing::warn!("access forbidden (403) on getChatAdministrators, marking removed");
                let _ = self.store.set_chat_status(key, ChatStatus::NoAccess).await;
                let _ = self.store.set_chat_type(key, ChatType::Removed).await;
                return;
            }
            RemoteStatus::TransportError => {
                tracing::warn!("transport error on getChatAdministrators, skipping rest of cycle");
                return;
            }
            _ => {}
        }
        let bot_is_admin = bot
            .telegram_user_id
            .is_some_and(|tg_id| administrators.iter().any(|admin| admin.user.id == tg_id));
        let _ = self
            .store
            .set_chat_status(key, if bot_is_admin { ChatStatus::Active } else { ChatStatus::NotAdmin })
            .await;

        // Step 3: admin ingest.
        let mut linked_employee_ids: HashSet<i64> = HashSet::new();
        for admin in &administrators {
            if admin.user.is_bot {
                continue;
            }
            match self.resolve_employee(owner_id, &admin.user, snapshot).await {
                Ok(employee_id) => {
                    linked_employee_ids.insert(employee_id);
                    let _ = self
                        .store
                        .upsert_chat_employee(&NewChatEmployee {
                            chat_id: chat.chat_id,
                            employee_id,
                            user_id: owner_id,
                            is_active: true,
                            is_admin: true,
                        })
                        .await;
                }
                Err(error) => tracing::error!(%error, "failed to resolve chat administrator"),
            }
        }

        // Step 4: existing links.
        let existing_links: Vec<_> = snapshot
            .chat_employees
            .iter()
            .filter(|link| link.chat_id == chat.chat_id)
            .cloned()
            .collect();
        let employees_by_id: HashMap<i64, &Employee> =
            snapshot.employees.iter().map(|e| (e.employee_id, e)).collect();

        for link in &existing_links {
            let Some(employee) = employees_by_id.get(&link.employee_id) else { continue };
            let member = match employee.telegram_user_id {
                Some(telegram_user_id) => {
                    self.remote.get_chat_member(&bot.bot_token, chat.telegram_chat_id, telegram_user_id).await
                }
                None => None,
            };
            // Never enforce against the bot's own link (spec §4.5 rows 1-2).
            let should_remove = !employee.is_bot
                && (!link.is_active
                    || !employee.is_active
                    || member.is_none()
                    || (policy.kick_external && employee.is_external));

            if should_remove {
                if policy.enforces() {
                    let kicked = match employee.telegram_user_id {
                        Some(telegram_user_id) => {
                            self.remote.kick_chat_member(&bot.bot_token, chat.telegram_chat_id, telegram_user_id).await
                        }
                        None => true,
                    };
                    if kicked {
                        let _ = self.store.delete_chat_employee(chat.chat_id, employee.employee_id).await;
                        if self.remote.send_message(&bot.bot_token, chat.telegram_chat_id, &self.config.removed_message).await {
                            tracing::info!(employee_id = employee.employee_id, "kicked and notified");
                        }
                    } else {
                        tracing::warn!(employee_id = employee.employee_id, "kick failed, leaving link inactive for retry");
                        let _ = self.store.deactivate_chat_employee(chat.chat_id, employee.employee_id).await;
                    }
                } else {
                    let _ = self.store.deactivate_chat_employee(chat.chat_id, employee.employee_id).await;
                }
            } else if let Some(member) = &member {
                linked_employee_ids.insert(employee.employee_id);
                let patch = identity::resolve(owner_id, &member.user, Some(employee), None);
                if let Resolution::Matched { patch, .. } = patch {
                    if !patch.is_empty() {
                        let _ = self.store.update_employee(employee.employee_id, owner_id, &patch).await;
                    }
                }
            }
        }

        // Step 5: probe unlinked active employees.
        for employee in &snapshot.employees {
            if linked_employee_ids.contains(&employee.employee_id) {
                continue;
            }
            if existing_links.iter().any(|l| l.employee_id == employee.employee_id) {
                continue;
            }

            let found = if let Some(telegram_user_id) = employee.telegram_user_id {
                self.remote.get_chat_member(&bot.bot_token, chat.telegram_chat_id, telegram_user_id).await
            } else if let Some(username) = &employee.telegram_username {
                administrators
                    .iter()
                    .find(|admin| {
                        admin
                            .user
                            .username
                            .as_deref()
                            .is_some_and(|u| u.eq_ignore_ascii_case(username))
                    })
                    .cloned()
            } else {
                None
            };

            if let Some(member) = found {
                linked_employee_ids.insert(employee.employee_id);
                let _ = self
                    .store
                    .upsert_chat_employee(&NewChatEmployee {
                        chat_id: chat.chat_id,
                        employee_id: employee.employee_id,
                        user_id: owner_id,
                        is_active: true,
                        is_admin: false,
                    })
                    .await;
                if member.user.username != employee.telegram_username {
                    let _ = self
                        .store
                        .update_employee(
                            employee.employee_id,
                            owner_id,
                            &crate::model::EmployeePatch {
                                telegram_username: Some(member.user.username.clone()),
                                ..Default::default()
                            },
                        )
                        .await;
                }
            }
        }

        // Step 6: recount.
        if policy.count {
            if let Some(count) = self.remote.get_chat_members_count(&bot.bot_token, chat.telegram_chat_id).await {
                let known = linked_employee_ids.len() as i64;
                let unknown = (count - known).max(0);
                let _ = self.store.update_chat_counts(key, count, unknown).await;
            }
        }
    }

    /// Resolve a remote user into a stored employee, applying
    /// identity-resolver writes along the way (spec §4.4).
    async fn resolve_employee(
        &self,
        owner_id: i64,
        remote_user: &crate::model::RemoteUser,
        snapshot: &OwnerSnapshot,
    ) -> Result<i64, StoreError> {
        let by_telegram_id = snapshot.employees.iter().find(|e| e.telegram_user_id == Some(remote_user.id)).cloned();
        let by_username = if by_telegram_id.is_none() {
            remote_user.username.as_deref().and_then(|username| {
                snapshot
                    .employees
                    .iter()
                    .find(|e| e.telegram_username.as_deref().is_some_and(|u| u.eq_ignore_ascii_case(username)))
                    .cloned()
            })
        } else {
            None
        };

        match identity::resolve(owner_id, remote_user, by_telegram_id.as_ref(), by_username.as_ref()) {
            Resolution::Matched { employee_id, patch } => {
                if !patch.is_empty() {
                    self.store.update_employee(employee_id, owner_id, &patch).await?;
                }
                Ok(employee_id)
            }
            Resolution::Collision { collided_employee_id, collided_patch } => {
                tracing::warn!(collided_employee_id, "identity collision, deactivating stale username match");
                self.store.update_employee(collided_employee_id, owner_id, &collided_patch).await?;
                let new_employee = NewEmployee {
                    user_id: owner_id,
                    telegram_user_id: Some(remote_user.id),
                    telegram_username: remote_user.username.clone(),
                    full_name: remote_user.display_name(),
                    is_active: true,
                    is_external: true,
                    is_bot: false,
                };
                self.store.insert_employee(&new_employee).await
            }
            Resolution::Create(new_employee) => self.store.insert_employee(&new_employee).await,
        }
    }

    /// Step 7: apply the flattened update-event batch (spec §4.5, §9).
    async fn drain_updates(&self, owner_id: i64, bot: &Bot, events: &[UpdateEvent], chats: &[Chat]) {
        let chat_keys: HashMap<i64, (i64, &Chat)> =
            chats.iter().map(|c| (c.telegram_chat_id, (c.chat_id, c))).collect();

        for event in events {
            match event {
                UpdateEvent::UserJoined { chat_id, user } => {
                    let Some(&(local_chat_id, _)) = chat_keys.get(chat_id) else { continue };
                    let snapshot = match self.store.snapshot(owner_id).await {
                        Ok(snapshot) => snapshot,
                        Err(error) => {
                            tracing::error!(%error, "failed to refresh snapshot for update drain");
                            continue;
                        }
                    };
                    match self.resolve_employee(owner_id, user, &snapshot).await {
                        Ok(employee_id) => {
                            let _ = self
                                .store
                                .upsert_chat_employee(&NewChatEmployee {
                                    chat_id: local_chat_id,
                                    employee_id,
                                    user_id: owner_id,
                                    is_active: true,
                                    is_admin: false,
                                })
                                .await;
                        }
                        Err(error) => tracing::error!(%error, "failed to resolve joining user"),
                    }
                }
                UpdateEvent::UserLeft { chat_id, user } => {
                    let Some(&(local_chat_id, _)) = chat_keys.get(chat_id) else { continue };
                    if let Ok(Some(employee)) = self.store.find_employee_by_telegram_id(owner_id, user.id).await {
                        let _ = self.store.deactivate_chat_employee(local_chat_id, employee.employee_id).await;
                    }
                }
                UpdateEvent::BotStatusChanged { chat_id, new, .. } => {
                    let Some(&(local_chat_id, local_chat)) = chat_keys.get(chat_id) else { continue };
                    let key = ChatKey { chat_id: local_chat_id, bot_id: bot.bot_id, user_id: owner_id };
                    match new {
                        ChatMemberStatus::Kicked | ChatMemberStatus::Left => {
                            tracing::warn!(chat_id = *chat_id, "bot lost membership, marking removed");
                            let _ = self.store.set_chat_status(key, ChatStatus::NoAccess).await;
                            let _ = self.store.set_chat_type(key, ChatType::Removed).await;
                        }
                        ChatMemberStatus::Administrator | ChatMemberStatus::Creator => {
                            let _ = self.store.set_chat_status(key, ChatStatus::Active).await;
                        }
                        ChatMemberStatus::Member | ChatMemberStatus::Restricted => {
                            let _ = self.store.set_chat_status(key, ChatStatus::NotAdmin).await;
                        }
                    }
                    let _ = local_chat;
                }
                UpdateEvent::MessageFrom { chat_id, user, .. } => {
                    if !chat_keys.contains_key(chat_id) {
                        continue;
                    }
                    let snapshot = match self.store.snapshot(owner_id).await {
                        Ok(snapshot) => snapshot,
                        Err(error) => {
                            tracing::error!(%error, "failed to refresh snapshot for update drain");
                            continue;
                        }
                    };
                    if let Err(error) = self.resolve_employee(owner_id, user, &snapshot).await {
                        tracing::error!(%error, "failed to resolve message sender");
                    }
                }
            }
        }
    }
}

fn event_chat_id(event: &UpdateEvent) -> Option<i64> {
    match event {
        UpdateEvent::UserJoined { chat_id, .. }
        | UpdateEvent::UserLeft { chat_id, .. }
        | UpdateEvent::BotStatusChanged { chat_id, .. }
        | UpdateEvent::MessageFrom { chat_id, .. } => Some(*chat_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChatEmployee, Owner, RemoteUser};
    use crate::remote::{ChatMember, MockRemoteClient, RemoteChat};
    use crate::store::InMemoryStore;

    fn config() -> Config {
        Config {
            database_url: "postgres://unused".to_string(),
            service_interval: std::time::Duration::from_secs(30),
            updates_lookback_hours: 24,
            welcome_message: "welcome".to_string(),
            removed_message: "removed".to_string(),
            concurrency: 1,
            log_dir: None,
            log_rotation: "daily".to_string(),
        }
    }

    fn owner() -> Owner {
        Owner { user_id: 1, login: "owner".to_string(), is_active: true }
    }

    fn bot() -> Bot {
        Bot { bot_id: 1, user_id: 1, bot_token: "tok".to_string(), telegram_user_id: Some(999), bot_name: "Bot".to_string(), is_active: true }
    }

    fn remote_user(id: i64, username: &str) -> RemoteUser {
        RemoteUser { id, first_name: Some("A".to_string()), last_name: None, username: Some(username.to_string()), is_bot: false }
    }

    #[tokio::test]
    async fn test_bootstrap_discards_backlog_and_advances_cursor() {
        let store = Arc::new(InMemoryStore::new().with_owner(owner()).with_bot(bot()));
        let remote = Arc::new(MockRemoteClient::new().with_updates(vec![
            crate::remote::Update { update_id: 10, chat_id: None, chat_title: None, date: None, from: None, new_chat_members: vec![], left_chat_member: None, my_chat_member: None },
            crate::remote::Update { update_id: 11, chat_id: None, chat_title: None, date: None, from: None, new_chat_members: vec![], left_chat_member: None, my_chat_member: None },
            crate::remote::Update { update_id: 12, chat_id: None, chat_title: None, date: None, from: None, new_chat_members: vec![], left_chat_member: None, my_chat_member: None },
        ]));
        let engine = Engine::new(store.clone(), remote, config());

        engine.run_cycle().await.unwrap();

        assert!(store.all_chats().is_empty());
        assert_eq!(engine.cursor_for(1).offset(), Some(13));

        // Second cycle replays the same 3 updates; bootstrap already
        // happened so get_updates is called with the cursor this time
        // and the mock simply returns nothing new for ids < offset.
        engine.run_cycle().await.unwrap();
        assert_eq!(engine.cursor_for(1).offset(), Some(13));
    }

    #[tokio::test]
    async fn test_new_external_group_creates_chat_employee_and_sends_welcome() {
        let store = Arc::new(InMemoryStore::new().with_owner(owner()).with_bot(bot()));
        // First cycle bootstraps the cursor (offset becomes Some(1) after seeing update_id 0... )
        // so we pre-seed the cursor to simulate a bot that has already bootstrapped.
        let remote = Arc::new(
            MockRemoteClient::new()
                .with_updates(vec![crate::remote::Update {
                    update_id: 1,
                    chat_id: Some(-10042),
                    chat_title: Some("Team".to_string()),
                    date: Some(Utc::now()),
                    from: Some(remote_user(7, "alice")),
                    new_chat_members: vec![],
                    left_chat_member: None,
                    my_chat_member: None,
                }])
                .with_chat(-10042, RemoteChat { id: -10042, title: Some("Team".to_string()) }, RemoteStatus::Ok)
                .with_administrators(-10042, vec![], RemoteStatus::Ok)
                .with_members_count(-10042, 1),
        );
        let engine = Engine::new(store.clone(), remote.clone(), config());
        engine.store_cursor(1, {
            let mut c = UpdateCursor::new();
            c.advance([0]);
            c
        });

        engine.run_cycle().await.unwrap();

        let chats = store.all_chats();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].type_id, ChatType::New);
        assert_eq!(chats[0].current_title(), Some("Team"));

        let employees = store.all_employees();
        assert!(employees.iter().any(|e| e.telegram_user_id == Some(7) && e.is_external && e.is_active && !e.is_bot));

        assert_eq!(remote.sent_messages().len(), 1);
        assert_eq!(remote.sent_messages()[0].1, "welcome");
    }

    #[tokio::test]
    async fn test_internal_policy_kicks_external_employee() {
        let mut chat = sample_chat(ChatType::Internal);
        let employee = Employee {
            employee_id: 1,
            user_id: 1,
            telegram_user_id: Some(7),
            telegram_username: Some("alice".to_string()),
            full_name: "A".to_string(),
            is_active: true,
            is_external: true,
            is_bot: false,
        };
        let link = ChatEmployee { chat_id: chat.chat_id, employee_id: 1, user_id: 1, is_active: true, is_admin: false };
        chat.chat_id = 1;

        let store = Arc::new(
            InMemoryStore::new()
                .with_owner(owner())
                .with_bot(bot())
                .with_chat(chat.clone())
                .with_employee(employee.clone())
                .with_link(link),
        );
        let remote = Arc::new(
            MockRemoteClient::new()
                .with_chat(chat.telegram_chat_id, RemoteChat { id: chat.telegram_chat_id, title: Some("Team".to_string()) }, RemoteStatus::Ok)
                .with_administrators(chat.telegram_chat_id, vec![], RemoteStatus::Ok)
                .with_member(
                    chat.telegram_chat_id,
                    7,
                    ChatMember { user: employee_as_remote_user(&employee), status: ChatMemberStatus::Member },
                )
                .with_members_count(chat.telegram_chat_id, 1),
        );
        let engine = Engine::new(store.clone(), remote.clone(), config());
        engine.store_cursor(1, {
            let mut c = UpdateCursor::new();
            c.advance([0]);
            c
        });

        engine.run_cycle().await.unwrap();

        assert_eq!(remote.kicked(), vec![(chat.telegram_chat_id, 7)]);
        assert!(store.all_links().is_empty());
    }

    #[tokio::test]
    async fn test_access_loss_and_revival() {
        let mut chat = sample_chat(ChatType::External);
        chat.chat_id = 1;
        let store = Arc::new(InMemoryStore::new().with_owner(owner()).with_bot(bot()).with_chat(chat.clone()));
        let remote = Arc::new(MockRemoteClient::new().with_chat_status(chat.telegram_chat_id, RemoteStatus::NotFound400));
        let engine = Engine::new(store.clone(), remote.clone(), config());
        engine.store_cursor(1, {
            let mut c = UpdateCursor::new();
            c.advance([0]);
            c
        });

        engine.run_cycle().await.unwrap();
        assert_eq!(store.all_chats()[0].type_id, ChatType::Removed);

        // Cycle N+1: access regained.
        let remote_recovered = Arc::new(
            MockRemoteClient::new()
                .with_chat(chat.telegram_chat_id, RemoteChat { id: chat.telegram_chat_id, title: None }, RemoteStatus::Ok)
                .with_administrators(chat.telegram_chat_id, vec![], RemoteStatus::Ok)
                .with_members_count(chat.telegram_chat_id, 0),
        );
        let engine2 = Engine::new(store.clone(), remote_recovered, config());
        engine2.store_cursor(1, {
            let mut c = UpdateCursor::new();
            c.advance([0]);
            c
        });
        engine2.run_cycle().await.unwrap();
        assert_eq!(store.all_chats()[0].type_id, ChatType::New);
    }

    fn sample_chat(chat_type: ChatType) -> Chat {
        Chat {
            chat_id: 1,
            bot_id: 1,
            user_id: 1,
            telegram_chat_id: -100,
            type_id: chat_type,
            status_id: ChatStatus::Active,
            title: vec!["Team".to_string()],
            user_num: 1,
            unknown_user: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn employee_as_remote_user(employee: &Employee) -> RemoteUser {
        RemoteUser {
            id: employee.telegram_user_id.unwrap(),
            first_name: Some(employee.full_name.clone()),
            last_name: None,
            username: employee.telegram_username.clone(),
            is_bot: false,
        }
    }
}
