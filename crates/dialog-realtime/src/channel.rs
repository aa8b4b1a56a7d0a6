//! An in-process transport backed by channels.
//!
//! Useful for running a [`DialogClient`](crate::DialogClient) against a
//! scripted peer, e.g. a fake dialogue service.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{DialogError, DialogResult};
use crate::transport::DialogTransport;

/// The client end of a channel pair.
pub struct ChannelTransport {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: bool,
}

/// The peer end: reads what the client sent and feeds it frames.
pub struct ChannelPeer {
    pub sent: mpsc::UnboundedReceiver<Vec<u8>>,
    pub replies: mpsc::UnboundedSender<Vec<u8>>,
}

pub fn channel_transport() -> (ChannelTransport, ChannelPeer) {
    let (outgoing, sent) = mpsc::unbounded_channel();
    let (replies, incoming) = mpsc::unbounded_channel();
    (
        ChannelTransport {
            outgoing,
            incoming,
            closed: false,
        },
        ChannelPeer { sent, replies },
    )
}

#[async_trait]
impl DialogTransport for ChannelTransport {
    async fn send(&mut self, frame: Vec<u8>) -> DialogResult<()> {
        if self.closed {
            return Err(DialogError::TransportClosed);
        }
        self.outgoing
            .send(frame)
            .map_err(|_| DialogError::TransportClosed)
    }

    async fn recv(&mut self) -> DialogResult<Vec<u8>> {
        self.incoming.recv().await.ok_or(DialogError::TransportClosed)
    }

    async fn close(&mut self) -> DialogResult<()> {
        self.closed = true;
        self.incoming.close();
        Ok(())
    }
}
