use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use voicelink_core::error::SendError;
use voicelink_core::events::{InboundEvent, OutboundEvent};

/// How long `send` may wait for room in the outbound queue.
pub const SEND_QUEUE_TIMEOUT: Duration = Duration::from_secs(3);
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Cloneable outbound handle. Control events and audio travel on separate
/// queues so the transport can drain control first.
#[derive(Clone)]
pub struct AgentSender {
    ctrl: mpsc::Sender<OutboundEvent>,
    audio: mpsc::Sender<OutboundEvent>,
}

impl AgentSender {
    pub fn new(ctrl: mpsc::Sender<OutboundEvent>, audio: mpsc::Sender<OutboundEvent>) -> Self {
        Self { ctrl, audio }
    }

    pub async fn send(&self, event: OutboundEvent) -> Result<(), SendError> {
        let event_type = event.event_type();
        let tx = if event.is_audio() {
            &self.audio
        } else {
            &self.ctrl
        };
        match tokio::time::timeout(SEND_QUEUE_TIMEOUT, tx.send(event)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Closed),
            Err(_) => Err(SendError::Timeout { event_type }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.ctrl.is_closed()
    }
}

/// A configured, live session with the agent.
///
/// Only returned once the handshake has completed. Not restartable: after the
/// event stream ends a new channel must be connected.
pub struct AgentChannel {
    sender: AgentSender,
    events: mpsc::Receiver<InboundEvent>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl AgentChannel {
    pub fn from_parts(
        sender: AgentSender,
        events: mpsc::Receiver<InboundEvent>,
        shutdown: watch::Sender<bool>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            sender,
            events,
            shutdown,
            tasks,
        }
    }

    /// An in-process channel with no transport behind it.
    pub fn pair(capacity: usize) -> (Self, ChannelPeer) {
        let capacity = capacity.max(1);
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (evt_tx, evt_rx) = mpsc::channel(capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let channel = Self::from_parts(
            AgentSender::new(out_tx.clone(), out_tx),
            evt_rx,
            shutdown,
            Vec::new(),
        );
        let peer = ChannelPeer {
            events: evt_tx,
            outbound: out_rx,
            shutdown: shutdown_rx,
        };
        (channel, peer)
    }

    pub fn sender(&self) -> AgentSender {
        self.sender.clone()
    }

    pub async fn send(&self, event: OutboundEvent) -> Result<(), SendError> {
        self.sender.send(event).await
    }

    /// Next inbound event; `None` once the agent side has closed.
    pub async fn next_event(&mut self) -> Option<InboundEvent> {
        self.events.recv().await
    }

    pub async fn close(mut self) {
        let _ = self.shutdown.send(true);
        self.events.close();
        for task in self.tasks.drain(..) {
            if tokio::time::timeout(CLOSE_GRACE, task).await.is_err() {
                log::warn!("Agent connection task did not stop in time");
            }
        }
        log::info!("Agent connection closed");
    }
}

/// The far end of [`AgentChannel::pair`].
pub struct ChannelPeer {
    pub events: mpsc::Sender<InboundEvent>,
    pub outbound: mpsc::Receiver<OutboundEvent>,
    shutdown: watch::Receiver<bool>,
}

impl ChannelPeer {
    pub fn is_closed_by_client(&self) -> bool {
        *self.shutdown.borrow()
    }
}
