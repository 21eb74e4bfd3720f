use async_trait::async_trait;

use crate::error::TransportError;

/// Outbound half of the connection owned by the session.
///
/// Implementations report connectivity, replies and pushes back through a
/// [`crate::channel::TransportEventSender`]; reconnect backoff is theirs too.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one encoded command frame.
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Close the underlying connection. Must be idempotent.
    async fn close(&self);
}
