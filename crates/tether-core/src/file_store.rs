//! JSON-lines message store
//!
//! One serialized [`Message`] per line. The whole file is read at open and
//! kept in memory; appends go to the end of the file, deletes rewrite it via
//! a temporary file and rename.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::identity::{PeerAddress, PeerInfo};
use crate::message::Message;
use crate::store::{MessageStore, distinct_peers, sort_chronological};

/// File-backed message store
pub struct FileMessageStore {
    path: PathBuf,
    messages: Mutex<Vec<Message>>,
}

impl FileMessageStore {
    /// Open (or create) the store at `path`
    ///
    /// Lines that fail to parse are skipped with a warning.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let messages = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => parse_lines(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), count = messages.len(), "Opened message store");

        Ok(Self {
            path,
            messages: Mutex::new(messages),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn rewrite(&self, messages: &[Message]) -> Result<(), StoreError> {
        let mut contents = String::new();
        for message in messages {
            contents.push_str(&serde_json::to_string(message)?);
            contents.push('\n');
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn parse_lines(contents: &str) -> Vec<Message> {
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<Message>(line) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable message record");
                None
            }
        })
        .collect()
}

#[async_trait]
impl MessageStore for FileMessageStore {
    async fn append(&self, message: &Message) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let mut messages = self.messages.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        messages.push(message.clone());
        Ok(())
    }

    async fn query_by_peer(&self, peer: &PeerAddress) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.lock().await;
        let mut found: Vec<Message> = messages
            .iter()
            .filter(|m| m.belongs_to(peer))
            .cloned()
            .collect();
        sort_chronological(&mut found);
        Ok(found)
    }

    async fn delete_by_peer(&self, peer: &PeerAddress) -> Result<(), StoreError> {
        let mut messages = self.messages.lock().await;
        let kept: Vec<Message> = messages
            .iter()
            .filter(|m| !m.belongs_to(peer))
            .cloned()
            .collect();
        self.rewrite(&kept).await?;
        debug!(peer = %peer, removed = messages.len() - kept.len(), "Deleted peer history");
        *messages = kept;
        Ok(())
    }

    async fn list_distinct_peers(&self) -> Result<Vec<PeerInfo>, StoreError> {
        let messages = self.messages.lock().await;
        Ok(distinct_peers(messages.iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history").join("messages.jsonl");
        let peer = PeerInfo::named("AA:AA:AA:AA:AA:AA", "A");

        {
            let store = FileMessageStore::open(&path).await.unwrap();
            assert_ok!(store.append(&Message::remote("one", &peer).at(1)).await);
            assert_ok!(store.append(&Message::local("You", "two", Some(&peer)).at(2)).await);
        }

        let reopened = FileMessageStore::open(&path).await.unwrap();
        let history = reopened.query_by_peer(&peer.address).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text, "one");
        assert!(history[1].is_local);
    }

    #[tokio::test]
    async fn test_delete_rewrites_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("messages.jsonl");
        let a = PeerInfo::named("AA:AA:AA:AA:AA:AA", "A");
        let b = PeerInfo::named("BB:BB:BB:BB:BB:BB", "B");

        let store = FileMessageStore::open(&path).await.unwrap();
        store.append(&Message::remote("a", &a)).await.unwrap();
        store.append(&Message::remote("b", &b)).await.unwrap();
        store.delete_by_peer(&a.address).await.unwrap();

        let reopened = FileMessageStore::open(&path).await.unwrap();
        assert!(reopened.query_by_peer(&a.address).await.unwrap().is_empty());
        let peers = reopened.list_distinct_peers().await.unwrap();
        assert_eq!(peers, vec![b]);
    }

    #[tokio::test]
    async fn test_corrupt_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("messages.jsonl");
        let peer = PeerInfo::named("AA:AA:AA:AA:AA:AA", "A");
        let good = serde_json::to_string(&Message::remote("ok", &peer)).unwrap();
        tokio::fs::write(&path, format!("{{not json\n{}\n\n", good))
            .await
            .unwrap();

        let store = FileMessageStore::open(&path).await.unwrap();
        assert_eq!(store.query_by_peer(&peer.address).await.unwrap().len(), 1);
    }
}
