//! Outbound packet transport.
//!
//! Sends are best-effort: a failed send is reported to the caller, which
//! logs it and moves on. The next visibility pass repairs whatever the lost
//! packet left inconsistent.

use crate::error::{DisplayError, Result};
use crate::protocol::{Envelope, Packet};
use crate::types::ClientId;
use bytes::Bytes;
use log::warn;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

pub trait Transport: Send + Sync {
    fn send(&self, client: &ClientId, packet: &Packet) -> Result<()>;

    /// Send to each client in turn; failures are logged and skipped.
    fn send_many(&self, clients: &[ClientId], packet: &Packet) {
        for client in clients {
            if let Err(e) = self.send(client, packet) {
                warn!(
                    "Failed to send {} to {}: {}",
                    packet.subject(),
                    client,
                    e
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Channel transport
// ---------------------------------------------------------------------------

/// A serialised frame ready for the wire.
#[derive(Debug, Clone)]
pub struct Frame {
    pub client: ClientId,
    pub subject: &'static str,
    pub payload: Bytes,
}

/// Serialises every packet to JSON and hands it to an mpsc channel. The
/// receiving end belongs to whatever actually talks to clients.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Frame>,
    frame: AtomicU64,
}

impl ChannelTransport {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                frame: AtomicU64::new(0),
            },
            rx,
        )
    }
}

impl Transport for ChannelTransport {
    fn send(&self, client: &ClientId, packet: &Packet) -> Result<()> {
        let frame = self.frame.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::to_vec(&Envelope::new(frame, client.clone(), packet))?;
        self.tx
            .send(Frame {
                client: client.clone(),
                subject: packet.subject(),
                payload: Bytes::from(payload),
            })
            .map_err(|_| DisplayError::Transport("frame channel closed".into()))
    }
}

// ---------------------------------------------------------------------------
// Recording transport
// ---------------------------------------------------------------------------

/// Keeps every packet in memory. Sends to clients marked unreachable fail.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(ClientId, Packet)>>,
    unreachable: Mutex<HashSet<ClientId>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(ClientId, Packet)> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, client: &ClientId) -> Vec<Packet> {
        self.sent
            .lock()
            .iter()
            .filter(|(c, _)| c == client)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Drain and return everything recorded so far.
    pub fn take(&self) -> Vec<(ClientId, Packet)> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    pub fn set_unreachable(&self, client: ClientId, unreachable: bool) {
        let mut set = self.unreachable.lock();
        if unreachable {
            set.insert(client);
        } else {
            set.remove(&client);
        }
    }
}

impl Transport for RecordingTransport {
    fn send(&self, client: &ClientId, packet: &Packet) -> Result<()> {
        if self.unreachable.lock().contains(client) {
            return Err(DisplayError::Transport(format!("{} unreachable", client)));
        }
        self.sent.lock().push((client.clone(), packet.clone()));
        Ok(())
    }
}
