//! Core IM session contract shared by the runtime and transport implementations.
//!
//! This crate defines the command envelope, the lifecycle state machine, the
//! pending-command table, the observer event taxonomy, and the codec,
//! transport and signing seams. It performs no I/O.

/// Transport-event and session-event channel primitives.
pub mod channel;
/// Command codec seam and the JSON codec.
pub mod codec;
/// Pending-command table and correlation keys.
pub mod correlation;
/// Session error taxonomy.
pub mod error;
/// Observer-facing event kinds and capability sets.
pub mod events;
/// Reply, push and close-code normalization.
pub mod normalization;
/// Reconnect backoff used by transports.
pub mod retry;
/// Signing seam and pre-send augmentation.
pub mod signature;
/// Session lifecycle state machine.
pub mod state_machine;
/// Outbound transport seam.
pub mod transport;
/// Wire envelope and identity types.
pub mod types;

pub use channel::{
    ChannelError, EventStream, SessionChannels, SessionEvent, TransportEvent, TransportEventSender,
};
pub use codec::{CommandCodec, JsonCommandCodec};
pub use correlation::{CommandResult, CorrelationKey, PendingCommand, PendingTable};
pub use error::{CodecError, ErrorCategory, ImError, SignatureError, TransportError};
pub use events::{
    Capabilities, ConversationEvent, EventKind, LifecycleEvent, Message, PropertyUpdate,
};
pub use normalization::{
    CloseDisposition, classify_close_code, normalize_push, normalize_reply,
};
pub use retry::ReconnectPolicy;
pub use signature::{SignatureAction, SignatureProvider, SignatureRequest, augment};
pub use state_machine::{SendGate, SessionStateMachine, Step};
pub use transport::Transport;
pub use types::{
    CommandType, ConversationId, GenericCommand, MemberRole, MessagePayload, OpType,
    ServerFault, SessionState, SignatureMaterials, UnreadEntry,
};
