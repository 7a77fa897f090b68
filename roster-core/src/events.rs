//! Update-event preprocessor (spec §9 "Dynamic payload shapes").
//!
//! The remote API returns heterogeneous message shapes
//! (`new_chat_member` vs. `new_chat_members` vs.
//! `my_chat_member.{old,new}_chat_member`). [`flatten`] is the single
//! place that normalises an [`Update`] into this crate's tagged-variant
//! set before the engine dispatches on it.

use chrono::{DateTime, Duration, Utc};

use crate::model::RemoteUser;
use crate::remote::{ChatMemberStatus, Update};

/// A normalised update, independent of the wire shape it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    UserJoined { chat_id: i64, user: RemoteUser },
    UserLeft { chat_id: i64, user: RemoteUser },
    BotStatusChanged { chat_id: i64, old: ChatMemberStatus, new: ChatMemberStatus },
    MessageFrom { chat_id: i64, title: Option<String>, user: RemoteUser, date: DateTime<Utc> },
}

/// Flatten one [`Update`] into zero or more [`UpdateEvent`]s, dropping
/// anything outside the configured look-back window (spec §4.5 step 7).
///
/// A single update can carry several facts at once (e.g. a message with
/// both a `from` user and `new_chat_members`), so this returns a `Vec`
/// rather than an `Option`.
pub fn flatten(update: &Update, lookback: Duration, now: DateTime<Utc>) -> Vec<UpdateEvent> {
    let mut events = Vec::new();

    if let Some(transition) = &update.my_chat_member {
        if let Some(chat_id) = update.chat_id {
            events.push(UpdateEvent::BotStatusChanged {
                chat_id,
                old: transition.old_status,
                new: transition.new_status,
            });
        }
    }

    let Some(chat_id) = update.chat_id else {
        return events;
    };

    let in_window = update
        .date
        .map(|date| now.signed_duration_since(date) <= lookback)
        .unwrap_or(true);
    if !in_window {
        return events;
    }

    for user in &update.new_chat_members {
        events.push(UpdateEvent::UserJoined { chat_id, user: user.clone() });
    }

    if let Some(user) = &update.left_chat_member {
        events.push(UpdateEvent::UserLeft { chat_id, user: user.clone() });
    }

    if let (Some(user), Some(date)) = (&update.from, update.date) {
        events.push(UpdateEvent::MessageFrom {
            chat_id,
            title: update.chat_title.clone(),
            user: user.clone(),
            date,
        });
    }

    events
}
