//! Message persistence
//!
//! [`MessageStore`] is the durable history consumed by the session layer:
//! append, query by peer (timestamp ascending), delete by peer, and a listing
//! of every peer with history. [`MemoryMessageStore`] keeps everything in
//! process memory and is suitable for tests and short-lived sessions; see
//! [`FileMessageStore`](crate::file_store::FileMessageStore) for an on-disk
//! implementation.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::identity::{PeerAddress, PeerInfo};
use crate::message::Message;

/// Durable message history keyed by peer address
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one message
    async fn append(&self, message: &Message) -> Result<(), StoreError>;

    /// All messages for `peer`, oldest first
    async fn query_by_peer(&self, peer: &PeerAddress) -> Result<Vec<Message>, StoreError>;

    /// Remove every message for `peer`
    async fn delete_by_peer(&self, peer: &PeerAddress) -> Result<(), StoreError>;

    /// Every peer that has history, with the most recent name recorded for it
    async fn list_distinct_peers(&self) -> Result<Vec<PeerInfo>, StoreError>;

    /// Newest message for `peer`, if any
    async fn latest_message_for_peer(
        &self,
        peer: &PeerAddress,
    ) -> Result<Option<Message>, StoreError> {
        Ok(self.query_by_peer(peer).await?.pop())
    }
}

/// Order by timestamp, keeping insertion order for equal timestamps
pub(crate) fn sort_chronological(messages: &mut [Message]) {
    messages.sort_by_key(|m| m.timestamp_millis);
}

/// Collapse messages into one entry per peer address, in first-seen order.
///
/// A later non-empty name replaces an earlier one.
pub(crate) fn distinct_peers<'a>(messages: impl IntoIterator<Item = &'a Message>) -> Vec<PeerInfo> {
    let mut peers: Vec<PeerInfo> = Vec::new();
    for message in messages {
        let Some(address) = &message.peer_address else {
            continue;
        };
        match peers.iter_mut().find(|p| &p.address == address) {
            Some(existing) => {
                if message.peer_name.is_some() {
                    existing.name = message.peer_name.clone();
                }
            }
            None => peers.push(PeerInfo::new(address.clone(), message.peer_name.clone())),
        }
    }
    peers
}

/// In-memory message store
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: RwLock<Vec<Message>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored messages across all peers
    pub fn len(&self) -> usize {
        self.messages.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every stored message in append order
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.read().map(|m| m.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, message: &Message) -> Result<(), StoreError> {
        let mut messages = self.messages.write().map_err(|_| StoreError::LockPoisoned)?;
        messages.push(message.clone());
        Ok(())
    }

    async fn query_by_peer(&self, peer: &PeerAddress) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut found: Vec<Message> = messages
            .iter()
            .filter(|m| m.belongs_to(peer))
            .cloned()
            .collect();
        sort_chronological(&mut found);
        Ok(found)
    }

    async fn delete_by_peer(&self, peer: &PeerAddress) -> Result<(), StoreError> {
        let mut messages = self.messages.write().map_err(|_| StoreError::LockPoisoned)?;
        messages.retain(|m| !m.belongs_to(peer));
        Ok(())
    }

    async fn list_distinct_peers(&self) -> Result<Vec<PeerInfo>, StoreError> {
        let messages = self.messages.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(distinct_peers(messages.iter()))
    }
}
