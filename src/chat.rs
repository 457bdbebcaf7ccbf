//! In-process group layer for chat sockets.
//!
//! Every connected socket joins the group of its user and receives whatever
//! is sent to that group. Groups only live while they have members.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Name of the group every socket of `user` joins.
pub fn user_group(user: Uuid) -> String {
    format!("user_chatroom_{}", user)
}

#[derive(Debug, Clone)]
pub struct ChatRooms {
    groups: Arc<RwLock<HashMap<String, broadcast::Sender<String>>>>,
    capacity: usize,
}

impl ChatRooms {
    pub fn new(capacity: usize) -> ChatRooms {
        ChatRooms {
            groups: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub async fn join(&self, group: &str) -> broadcast::Receiver<String> {
        let mut groups = self.groups.write().await;
        match groups.get(group) {
            Some(sender) => sender.subscribe(),
            None => {
                let (sender, receiver) = broadcast::channel(self.capacity);
                groups.insert(group.to_string(), sender);
                tracing::debug!("opened chat group {}", group);
                receiver
            }
        }
    }

    /// Delivers `message` to every member of `group`, returning how many got it.
    pub async fn send(&self, group: &str, message: String) -> usize {
        let groups = self.groups.read().await;
        match groups.get(group) {
            Some(sender) => sender.send(message).unwrap_or(0),
            None => 0,
        }
    }

    pub async fn leave(&self, group: &str, receiver: broadcast::Receiver<String>) {
        drop(receiver);

        let mut groups = self.groups.write().await;
        if let Some(sender) = groups.get(group) {
            if sender.receiver_count() == 0 {
                groups.remove(group);
                tracing::debug!("closed chat group {}", group);
            }
        }
    }

    pub async fn members(&self, group: &str) -> usize {
        let groups = self.groups.read().await;
        groups.get(group).map(|it| it.receiver_count()).unwrap_or(0)
    }

    pub async fn group_count(&self) -> usize {
        self.groups.read().await.len()
    }
}

impl Default for ChatRooms {
    fn default() -> Self {
        ChatRooms::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_names() {
        let user = Uuid::nil();
        assert_eq!(
            user_group(user),
            "user_chatroom_00000000-0000-0000-0000-000000000000"
        );
    }

    #[tokio::test]
    async fn members_receive_group_messages() {
        let rooms = ChatRooms::new(8);
        let mut first = rooms.join("room").await;
        let mut second = rooms.join("room").await;
        let mut other = rooms.join("other").await;

        assert_eq!(rooms.send("room", "hello".to_string()).await, 2);
        assert_eq!(first.recv().await.expect("message"), "hello");
        assert_eq!(second.recv().await.expect("message"), "hello");
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn sending_to_empty_group_is_noop() {
        let rooms = ChatRooms::default();
        assert_eq!(rooms.send("nobody", "hello".to_string()).await, 0);
        assert_eq!(rooms.group_count().await, 0);
    }

    #[tokio::test]
    async fn empty_groups_are_dropped() {
        let rooms = ChatRooms::new(8);
        let first = rooms.join("room").await;
        let second = rooms.join("room").await;
        assert_eq!(rooms.members("room").await, 2);

        rooms.leave("room", first).await;
        assert_eq!(rooms.members("room").await, 1);
        assert_eq!(rooms.group_count().await, 1);

        rooms.leave("room", second).await;
        assert_eq!(rooms.group_count().await, 0);
        assert_eq!(rooms.send("room", "late".to_string()).await, 0);
    }
}
