use dashmap::DashMap;
use ulid::Ulid;

use crate::model::{EntityKind, Ms, Notification};

/// Oldest notifications are dropped past this many per user.
const MAX_PER_USER: usize = 1_000;

/// Notification sink: a bounded per-user inbox, read back through queries.
/// Delivery is fire-and-forget; nothing here can fail the caller.
pub struct NotifyHub {
    inboxes: DashMap<Ulid, Vec<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            inboxes: DashMap::new(),
        }
    }

    pub fn notify(&self, user_id: Ulid, entity_kind: EntityKind, entity_id: Ulid, message: String, at: Ms) {
        let notification = Notification {
            id: Ulid::new(),
            user_id,
            entity_kind,
            entity_id,
            message,
            is_read: false,
            created_at: at,
        };
        tracing::debug!(
            "notify {user_id}: {} {entity_id}: {}",
            entity_kind.as_str(),
            notification.message
        );
        let mut inbox = self.inboxes.entry(user_id).or_default();
        if inbox.len() >= MAX_PER_USER {
            inbox.remove(0);
        }
        inbox.push(notification);
    }

    /// A user's notifications, oldest first.
    pub fn list(&self, user_id: &Ulid) -> Vec<Notification> {
        self.inboxes
            .get(user_id)
            .map(|inbox| inbox.value().clone())
            .unwrap_or_default()
    }

    /// Mark one of the user's notifications read. False if the user has no such notification.
    pub fn mark_read(&self, user_id: &Ulid, notification_id: &Ulid) -> bool {
        let Some(mut inbox) = self.inboxes.get_mut(user_id) else {
            return false;
        };
        match inbox.iter_mut().find(|n| n.id == *notification_id) {
            Some(n) => {
                n.is_read = true;
                true
            }
            None => false,
        }
    }
}
