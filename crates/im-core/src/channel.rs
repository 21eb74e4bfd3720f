use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::{
    error::TransportError,
    types::{ConversationId, SessionState},
};

/// Broadcast stream of session-level events.
pub type EventStream = broadcast::Receiver<SessionEvent>;

/// Inbound notification from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected { error: Option<TransportError> },
    CommandReply(Vec<u8>),
    PushEvent(Vec<u8>),
    ClosedByServer { code: i32, reason: String },
}

/// Session-level event published to stream subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Every lifecycle state the session enters, including silent ones.
    StateChanged { state: SessionState },
    /// A conversation was seen for the first time in this session.
    ConversationActivated { conversation_id: ConversationId },
}

/// Errors returned by channel operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The session driver is gone.
    #[error("transport event channel is closed")]
    TransportChannelClosed,
}

/// Handle given to a transport for reporting inbound events.
#[derive(Clone, Debug)]
pub struct TransportEventSender {
    tx: mpsc::Sender<TransportEvent>,
}

impl TransportEventSender {
    pub async fn send(&self, event: TransportEvent) -> Result<(), ChannelError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| ChannelError::TransportChannelClosed)
    }

    pub async fn on_connected(&self) -> Result<(), ChannelError> {
        self.send(TransportEvent::Connected).await
    }

    pub async fn on_disconnected(&self, error: Option<TransportError>) -> Result<(), ChannelError> {
        self.send(TransportEvent::Disconnected { error }).await
    }

    pub async fn on_command_reply(&self, frame: Vec<u8>) -> Result<(), ChannelError> {
        self.send(TransportEvent::CommandReply(frame)).await
    }

    pub async fn on_push_event(&self, frame: Vec<u8>) -> Result<(), ChannelError> {
        self.send(TransportEvent::PushEvent(frame)).await
    }

    pub async fn on_closed_by_server(
        &self,
        code: i32,
        reason: impl Into<String>,
    ) -> Result<(), ChannelError> {
        self.send(TransportEvent::ClosedByServer {
            code,
            reason: reason.into(),
        })
        .await
    }
}

/// Transport-event / session-event channel pair owned by one session.
#[derive(Clone, Debug)]
pub struct SessionChannels {
    transport_tx: mpsc::Sender<TransportEvent>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionChannels {
    /// Create a new channel set and return it with the transport event receiver.
    pub fn new(
        transport_buffer: usize,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (transport_tx, transport_rx) = mpsc::channel(transport_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                transport_tx,
                event_tx,
            },
            transport_rx,
        )
    }

    pub fn transport_sender(&self) -> TransportEventSender {
        TransportEventSender {
            tx: self.transport_tx.clone(),
        }
    }

    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Publish to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}
