//! Resolves a user's effective permission on a task from its owner and share
//! grants — a pure function, callable without a live DB round trip once the
//! task and its shares have been loaded by a single Store query.

use rv_core::types::{SharePermission, Task, TaskShare, User, UserRole};
use uuid::Uuid;

/// The effective permission an acting user holds over a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    None,
    ReadOnly,
    FeedbackOnly,
    FullAccess,
}

impl Permission {
    pub fn can_view(self) -> bool {
        !matches!(self, Permission::None)
    }

    pub fn can_download(self) -> bool {
        matches!(self, Permission::FullAccess)
    }

    pub fn can_submit_feedback(self) -> bool {
        matches!(self, Permission::FeedbackOnly | Permission::FullAccess)
    }

    pub fn can_manage(self) -> bool {
        matches!(self, Permission::FullAccess)
    }
}

impl From<SharePermission> for Permission {
    fn from(p: SharePermission) -> Self {
        match p {
            SharePermission::ReadOnly => Permission::ReadOnly,
            SharePermission::FeedbackOnly => Permission::FeedbackOnly,
            SharePermission::FullAccess => Permission::FullAccess,
        }
    }
}

/// Resolve `user`'s permission on `task`, given all of the task's shares.
pub fn resolve_permission(user: &User, task: &Task, shares: &[TaskShare]) -> Permission {
    if user.role == UserRole::SystemAdmin {
        return Permission::FullAccess;
    }
    if user.id == task.owner_id {
        return Permission::FullAccess;
    }
    shares
        .iter()
        .find(|s| s.task_id == task.id && s.shared_with == user.id && s.active)
        .map(|s| Permission::from(s.permission))
        .unwrap_or(Permission::None)
}

/// True if `user_id` owns `task` or holds an admin role — the bar for
/// deletion and share management, which no share grant can confer.
pub fn is_owner_or_admin(user: &User, task: &Task) -> bool {
    user.role == UserRole::SystemAdmin || user.id == task.owner_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(role: UserRole) -> User {
        User {
            id: Uuid::new_v4(),
            external_uid: "ext-1".into(),
            display_name: "u".into(),
            email: "u@example.com".into(),
            role,
            max_concurrent_tasks: 10,
            created_at: Utc::now(),
        }
    }

    fn task_for(owner_id: Uuid) -> Task {
        Task {
            id: Uuid::new_v4(),
            owner_id,
            file_info_id: Uuid::new_v4(),
            ai_model_id: Uuid::new_v4(),
            title: "doc".into(),
            status: rv_core::types::TaskStatus::Queued,
            progress: 0,
            current_stage: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            retry_count: 0,
        }
    }

    #[test]
    fn owner_gets_full_access_without_a_share_row() {
        let owner = user(UserRole::User);
        let task = task_for(owner.id);
        assert_eq!(resolve_permission(&owner, &task, &[]), Permission::FullAccess);
    }

    #[test]
    fn admin_gets_full_access_to_others_tasks() {
        let admin = user(UserRole::SystemAdmin);
        let task = task_for(Uuid::new_v4());
        assert_eq!(resolve_permission(&admin, &task, &[]), Permission::FullAccess);
    }

    #[test]
    fn stranger_with_no_share_gets_none() {
        let stranger = user(UserRole::User);
        let task = task_for(Uuid::new_v4());
        assert_eq!(resolve_permission(&stranger, &task, &[]), Permission::None);
    }

    #[test]
    fn active_share_grants_its_permission() {
        let viewer = user(UserRole::User);
        let task = task_for(Uuid::new_v4());
        let share = TaskShare {
            id: Uuid::new_v4(),
            task_id: task.id,
            shared_by: task.owner_id,
            shared_with: viewer.id,
            permission: SharePermission::FeedbackOnly,
            active: true,
            comment: None,
            created_at: Utc::now(),
            revoked_at: None,
        };
        assert_eq!(
            resolve_permission(&viewer, &task, &[share]),
            Permission::FeedbackOnly
        );
    }

    #[test]
    fn inactive_share_grants_nothing() {
        let viewer = user(UserRole::User);
        let task = task_for(Uuid::new_v4());
        let share = TaskShare {
            id: Uuid::new_v4(),
            task_id: task.id,
            shared_by: task.owner_id,
            shared_with: viewer.id,
            permission: SharePermission::FullAccess,
            active: false,
            comment: None,
            created_at: Utc::now(),
            revoked_at: None,
        };
        assert_eq!(resolve_permission(&viewer, &task, &[share]), Permission::None);
    }

    #[test]
    fn feedback_only_cannot_download_or_manage() {
        let p = Permission::FeedbackOnly;
        assert!(p.can_view());
        assert!(p.can_submit_feedback());
        assert!(!p.can_download());
        assert!(!p.can_manage());
    }
}
