//! Identity resolution (spec §4.4).
//!
//! The only place where remote-user-to-employee matching policy lives;
//! callers must not reimplement these rules. Pure functions — the
//! caller (the engine) is responsible for looking up the candidate
//! employees and for applying the resulting writes.

use crate::model::{Employee, EmployeePatch, NewEmployee, RemoteUser};

/// Outcome of resolving a [`RemoteUser`] against an owner's employees.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Matched an existing employee by `telegram_user_id`. `patch` is
    /// empty if nothing needs to change.
    Matched { employee_id: i64, patch: EmployeePatch },
    /// Matched by username, but the candidate's `telegram_user_id`
    /// already points elsewhere — a collision (spec §7, §8 scenario 6).
    /// `collided_employee_id` must be patched inactive; the remote user
    /// still needs to be created or matched by id on the next pass.
    Collision {
        collided_employee_id: i64,
        collided_patch: EmployeePatch,
    },
    /// No existing employee matched; create one.
    Create(NewEmployee),
}

/// Resolve a remote user payload against known candidates.
///
/// `by_telegram_id` and `by_username` are the results of the two lookups
/// the caller performs before calling this function (step 1 and step 2
/// of spec §4.4, respectively); `by_username` should use a
/// case-insensitive match.
pub fn resolve(
    owner_id: i64,
    remote_user: &RemoteUser,
    by_telegram_id: Option<&Employee>,
    by_username: Option<&Employee>,
) -> Resolution {
    if let Some(existing) = by_telegram_id {
        let mut patch = EmployeePatch::default();
        let remote_username = remote_user.username.as_deref();
        if existing.telegram_username.as_deref() != remote_username {
            patch.telegram_username = Some(remote_user.username.clone());
        }
        let display_name = remote_user.display_name();
        if existing.full_name != display_name {
            patch.full_name = Some(display_name);
        }
        if !existing.is_active {
            patch.is_active = Some(true);
        }
        return Resolution::Matched {
            employee_id: existing.employee_id,
            patch,
        };
    }

    if let Some(existing) = by_username {
        match existing.telegram_user_id {
            None => {
                let mut patch = EmployeePatch {
                    full_name: Some(remote_user.display_name()),
                    telegram_user_id: Some(Some(remote_user.id)),
                    is_active: Some(true),
                    ..Default::default()
                };
                if existing.full_name == remote_user.display_name() {
                    patch.full_name = None;
                }
                return Resolution::Matched {
                    employee_id: existing.employee_id,
                    patch,
                };
            }
            Some(existing_tg_id) if existing_tg_id != remote_user.id => {
                return Resolution::Collision {
                    collided_employee_id: existing.employee_id,
                    collided_patch: EmployeePatch {
                        full_name: Some(remote_user.display_name()),
                        is_active: Some(false),
                        ..Default::default()
                    },
                };
            }
            Some(_) => {
                // telegram_user_id matches the remote user's own id; the
                // by_telegram_id lookup above should already have caught
                // this. Fall through to create/match-by-id defensively.
            }
        }
    }

    Resolution::Create(NewEmployee {
        user_id: owner_id,
        telegram_user_id: Some(remote_user.id),
        telegram_username: remote_user.username.clone(),
        full_name: remote_user.display_name(),
        is_active: true,
        is_external: true,
        is_bot: false,
    })
}
