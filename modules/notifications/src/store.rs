//! Local notification log, sole writer: this module.

use crate::models::Notification;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct NotificationStore {
    notifications: Mutex<Vec<Notification>>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, notification: Notification) {
        let mut notifications = self
            .notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        notifications.push(notification);
    }

    pub fn get_by_order(&self, order_id: i64) -> Option<Notification> {
        let notifications = self
            .notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        notifications.iter().find(|n| n.order_id == order_id).cloned()
    }

    pub fn count(&self) -> usize {
        let notifications = self
            .notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        notifications.len()
    }
}
