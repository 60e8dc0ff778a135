//! Chat history across peers

use tether_core::{Message, MessageStore, PeerInfo};

use crate::error::SessionResult;

/// A peer with stored history and its newest message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub peer: PeerInfo,
    pub last_message: Option<Message>,
}

impl Conversation {
    fn last_activity(&self) -> i64 {
        self.last_message
            .as_ref()
            .map_or(i64::MIN, |m| m.timestamp_millis)
    }
}

/// Every conversation in `store`, most recently active first
pub(crate) async fn conversations(store: &dyn MessageStore) -> SessionResult<Vec<Conversation>> {
    let peers = store.list_distinct_peers().await?;
    let mut conversations = Vec::with_capacity(peers.len());
    for peer in peers {
        let last_message = store.latest_message_for_peer(&peer.address).await?;
        conversations.push(Conversation { peer, last_message });
    }
    conversations.sort_by_key(|c| std::cmp::Reverse(c.last_activity()));
    Ok(conversations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::MemoryMessageStore;

    #[tokio::test]
    async fn test_conversations_newest_first() {
        let store = MemoryMessageStore::new();
        let alice = PeerInfo::named("AA:AA:AA:AA:AA:AA", "Alice");
        let bob = PeerInfo::named("BB:BB:BB:BB:BB:BB", "Bob");

        store.append(&Message::remote("old", &alice).at(100)).await.unwrap();
        store.append(&Message::remote("hey", &bob).at(200)).await.unwrap();
        store.append(&Message::local("You", "newest", Some(&alice)).at(300)).await.unwrap();

        let list = conversations(&store).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].peer.address, alice.address);
        assert_eq!(list[0].last_message.as_ref().unwrap().text, "newest");
        assert_eq!(list[1].peer.display_name(), "Bob");
    }

    #[tokio::test]
    async fn test_empty_store_has_no_conversations() {
        let store = MemoryMessageStore::new();
        assert!(conversations(&store).await.unwrap().is_empty());
    }
}
