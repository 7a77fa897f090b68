//! End-to-end engine scenarios exercising the per-chat procedure against
//! the in-memory store and mock remote client, without a database.

use std::sync::Arc;

use chrono::Utc;
use roster_core::config::Config;
use roster_core::engine::Engine;
use roster_core::model::{Chat, ChatEmployee, ChatStatus, ChatType, Employee, Owner, RemoteUser};
use roster_core::remote::{ChatMember, ChatMemberStatus, MockRemoteClient, RemoteChat, RemoteStatus};
use roster_core::store::InMemoryStore;

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

fn bot() -> roster_core::model::Bot {
    roster_core::model::Bot {
        bot_id: 1,
        user_id: 1,
        bot_token: "tok".to_string(),
        telegram_user_id: Some(999),
        bot_name: "Bot".to_string(),
        is_active: true,
    }
}

fn remote_user(id: i64, username: &str, is_bot: bool) -> RemoteUser {
    RemoteUser { id, first_name: Some("A".to_string()), last_name: None, username: Some(username.to_string()), is_bot }
}

fn chat_member(user: RemoteUser) -> ChatMember {
    ChatMember { user, status: ChatMemberStatus::Administrator }
}

fn sample_chat(chat_type: ChatType, telegram_chat_id: i64) -> Chat {
    Chat {
        chat_id: 1,
        bot_id: 1,
        user_id: 1,
        telegram_chat_id,
        type_id: chat_type,
        status_id: ChatStatus::Active,
        title: vec!["Team".to_string()],
        user_num: 0,
        unknown_user: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_admin_ingest_skips_bots_and_links_human_administrators() {
    let chat = sample_chat(ChatType::ObserveOnly, -200);
    let store = Arc::new(InMemoryStore::new().with_owner(owner()).with_bot(bot()).with_chat(chat.clone()));
    let remote = Arc::new(
        MockRemoteClient::new()
            .with_chat(chat.telegram_chat_id, RemoteChat { id: chat.telegram_chat_id, title: Some("Team".to_string()) }, RemoteStatus::Ok)
            .with_administrators(
                chat.telegram_chat_id,
                vec![chat_member(remote_user(555, "groupbot", true)), chat_member(remote_user(42, "carol", false))],
                RemoteStatus::Ok,
            )
            .with_members_count(chat.telegram_chat_id, 2),
    );
    let engine = Engine::new(store.clone(), remote, config());

    engine.run_cycle().await.unwrap();

    let employees = store.all_employees();
    assert!(employees.iter().all(|e| e.telegram_user_id != Some(555)), "bot administrators must never become employees");
    let carol = employees.iter().find(|e| e.telegram_user_id == Some(42)).expect("human administrator should be resolved");
    assert!(!carol.is_bot);

    let links = store.all_links();
    assert!(links.iter().any(|l| l.employee_id == carol.employee_id && l.is_admin));
    assert!(links.iter().all(|l| employees.iter().find(|e| e.employee_id == l.employee_id).map(|e| e.telegram_user_id) != Some(Some(555))));
}

#[tokio::test]
async fn test_username_collision_deactivates_stale_record_and_links_new_one() {
    let chat = sample_chat(ChatType::ObserveOnly, -300);
    let stale = Employee {
        employee_id: 9,
        user_id: 1,
        telegram_user_id: Some(100),
        telegram_username: Some("bob".to_string()),
        full_name: "Old Bob".to_string(),
        is_active: true,
        is_external: true,
        is_bot: false,
    };
    let store = Arc::new(
        InMemoryStore::new().with_owner(owner()).with_bot(bot()).with_chat(chat.clone()).with_employee(stale),
    );
    let remote = Arc::new(
        MockRemoteClient::new()
            .with_chat(chat.telegram_chat_id, RemoteChat { id: chat.telegram_chat_id, title: Some("Team".to_string()) }, RemoteStatus::Ok)
            .with_administrators(chat.telegram_chat_id, vec![chat_member(remote_user(200, "bob", false))], RemoteStatus::Ok)
            .with_members_count(chat.telegram_chat_id, 1),
    );
    let engine = Engine::new(store.clone(), remote, config());

    engine.run_cycle().await.unwrap();

    let employees = store.all_employees();
    let old = employees.iter().find(|e| e.employee_id == 9).unwrap();
    assert!(!old.is_active, "the stale username match must be deactivated, not overwritten in place");

    let new_employee = employees
        .iter()
        .find(|e| e.telegram_user_id == Some(200))
        .expect("the remote user should resolve to a freshly created employee");
    assert_eq!(new_employee.telegram_username.as_deref(), Some("bob"));
    assert!(new_employee.is_active);

    let links = store.all_links();
    assert!(links.iter().any(|l| l.employee_id == new_employee.employee_id && l.is_admin));
}

#[tokio::test]
async fn test_steady_state_chat_is_idempotent_across_cycles() {
    let chat = sample_chat(ChatType::External, -400);
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
            .with_member(chat.telegram_chat_id, 7, ChatMember { user: remote_user(7, "alice", false), status: ChatMemberStatus::Member })
            .with_members_count(chat.telegram_chat_id, 1),
    );
    let engine = Engine::new(store.clone(), remote, config());

    engine.run_cycle().await.unwrap();
    let links_after_first = store.all_links();
    let employees_after_first = store.all_employees();
    let updated_at_after_first = store.all_chats()[0].updated_at;

    engine.run_cycle().await.unwrap();
    let links_after_second = store.all_links();
    let employees_after_second = store.all_employees();
    let updated_at_after_second = store.all_chats()[0].updated_at;

    assert_eq!(links_after_first.len(), 1);
    assert_eq!(employees_after_first.len(), 1);
    assert_eq!(links_after_second, links_after_first, "a settled chat must not accumulate or drop links on replay");
    assert_eq!(employees_after_second, employees_after_first, "a settled chat must not mutate employees on replay");
    assert_eq!(
        updated_at_after_second, updated_at_after_first,
        "a settled chat must not rewrite updated_at on a no-op replay"
    );

    let chats = store.all_chats();
    assert_eq!(chats[0].user_num, 1);
    assert_eq!(chats[0].unknown_user, 0);
}

#[tokio::test]
async fn test_blocked_chat_never_calls_remote() {
    let chat = sample_chat(ChatType::Blocked, -500);
    let store = Arc::new(InMemoryStore::new().with_owner(owner()).with_bot(bot()).with_chat(chat.clone()));
    // No fixtures at all: if the engine touched the remote client for this
    // chat, get_chat's default-missing branch would mark it removed.
    let remote = Arc::new(MockRemoteClient::new());
    let engine = Engine::new(store.clone(), remote, config());

    engine.run_cycle().await.unwrap();

    assert_eq!(store.all_chats()[0].type_id, ChatType::Blocked);
}

#[tokio::test]
async fn test_unlinked_probe_never_considers_inactive_employees() {
    // An employee deactivated on a prior cycle must not be re-probed for
    // membership even if they are still actually present in the chat —
    // the unlinked-employee step only walks the owner snapshot, and the
    // snapshot already excludes inactive rows.
    let chat = sample_chat(ChatType::ObserveOnly, -600);
    let inactive = Employee {
        employee_id: 3,
        user_id: 1,
        telegram_user_id: Some(55),
        telegram_username: Some("dormant".to_string()),
        full_name: "Dormant".to_string(),
        is_active: false,
        is_external: true,
        is_bot: false,
    };
    let store = Arc::new(
        InMemoryStore::new().with_owner(owner()).with_bot(bot()).with_chat(chat.clone()).with_employee(inactive),
    );
    let remote = Arc::new(
        MockRemoteClient::new()
            .with_chat(chat.telegram_chat_id, RemoteChat { id: chat.telegram_chat_id, title: Some("Team".to_string()) }, RemoteStatus::Ok)
            .with_administrators(chat.telegram_chat_id, vec![], RemoteStatus::Ok)
            .with_member(chat.telegram_chat_id, 55, ChatMember { user: remote_user(55, "dormant", false), status: ChatMemberStatus::Member })
            .with_members_count(chat.telegram_chat_id, 1),
    );
    let engine = Engine::new(store.clone(), remote, config());

    engine.run_cycle().await.unwrap();

    assert!(store.all_links().is_empty(), "an inactive employee must not be linked even if still present remotely");
}
