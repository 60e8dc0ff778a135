//! Read loop: bytes off the link become inbound messages
//!
//! There is no framing. Each read of up to `read_chunk_size` bytes is
//! decoded, trimmed, and recorded as one message, so two writes that land
//! in one read show up as one message and a long write can be split in two.
//!
//! Whether a read still counts is decided under the session lock, by epoch.

use std::sync::Weak;

use tokio::io::AsyncReadExt;
use tracing::debug;

use tether_core::{LinkReader, PeerInfo, TransportError};

use crate::state::SessionInner;

pub(crate) async fn run(
    inner: Weak<SessionInner>,
    mut reader: LinkReader,
    peer: PeerInfo,
    epoch: u64,
    chunk_size: usize,
) {
    let mut buf = vec![0u8; chunk_size.max(1)];
    debug!(peer = %peer.address, epoch, "Read loop started");

    loop {
        let read = reader.read(&mut buf).await;
        let Some(inner) = inner.upgrade() else {
            break;
        };

        match read {
            Ok(0) => {
                inner.on_stream_end(epoch, None).await;
                break;
            }
            Ok(n) => {
                let decoded = String::from_utf8_lossy(&buf[..n]);
                let text = decoded.trim();
                if text.is_empty() {
                    continue;
                }
                if !inner.accept_inbound(epoch, &peer, text).await {
                    break;
                }
            }
            Err(e) => {
                inner
                    .on_stream_end(epoch, Some(TransportError::from(e)))
                    .await;
                break;
            }
        }
    }

    debug!(peer = %peer.address, epoch, "Read loop finished");
}
