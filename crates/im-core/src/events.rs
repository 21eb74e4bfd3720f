//! Observer-facing event taxonomy.
//!
//! Every notification the session can deliver has exactly one [`EventKind`].
//! Observers declare the kinds they handle as [`Capabilities`]; the dispatcher
//! checks the declaration before invoking anything.

use serde::{Deserialize, Serialize};

use crate::{
    error::ImError,
    types::{MemberRole, MessagePayload},
};

/// Content key marking a typed (rich) message.
pub const TYPED_MESSAGE_KEY: &str = "_lctype";

/// Received message, either plain text or a typed rich message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Message {
    Plain(MessagePayload),
    Typed {
        /// Application-defined type code from the content's `_lctype` field.
        type_code: i64,
        /// Parsed JSON content.
        body: serde_json::Value,
        payload: MessagePayload,
    },
}

impl Message {
    /// Classify a payload as typed when its content is a JSON object carrying
    /// an integer type code.
    pub fn from_payload(payload: MessagePayload) -> Self {
        let typed = serde_json::from_str::<serde_json::Value>(&payload.content)
            .ok()
            .filter(serde_json::Value::is_object)
            .and_then(|body| {
                let type_code = body.get(TYPED_MESSAGE_KEY)?.as_i64()?;
                Some((type_code, body))
            });

        match typed {
            Some((type_code, body)) => Self::Typed {
                type_code,
                body,
                payload,
            },
            None => Self::Plain(payload),
        }
    }

    pub fn payload(&self) -> &MessagePayload {
        match self {
            Self::Plain(payload) | Self::Typed { payload, .. } => payload,
        }
    }
}

/// Conversation property whose value changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PropertyUpdate {
    UnreadMessages { count: u32, mentioned: bool },
    LastMessage(Message),
    LastDeliveredAt { timestamp_ms: i64 },
    LastReadAt { timestamp_ms: i64 },
}

/// Server-pushed event scoped to one conversation.
///
/// Batch membership, block and mute events may be redelivered with overlapping
/// member lists after a resync. Consumers should apply them as set unions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ConversationEvent {
    MessageReceived(Message),
    MessageDelivered {
        message_id: String,
        delivered_at_ms: Option<i64>,
    },
    MessageUpdated(Message),
    MembersAdded {
        member_ids: Vec<String>,
        by: Option<String>,
    },
    MembersRemoved {
        member_ids: Vec<String>,
        by: Option<String>,
    },
    Invited {
        by: Option<String>,
    },
    Kicked {
        by: Option<String>,
    },
    PropertyUpdated(PropertyUpdate),
    AttributesUpdated {
        updated_at_ms: Option<i64>,
        by: Option<String>,
        data: Option<serde_json::Value>,
    },
    MemberRoleUpdated {
        by: Option<String>,
        member_id: Option<String>,
        role: MemberRole,
    },
    Blocked {
        by: Option<String>,
    },
    Unblocked {
        by: Option<String>,
    },
    MembersBlocked {
        by: Option<String>,
        member_ids: Vec<String>,
    },
    MembersUnblocked {
        by: Option<String>,
        member_ids: Vec<String>,
    },
    Muted {
        by: Option<String>,
    },
    Unmuted {
        by: Option<String>,
    },
    MembersMuted {
        by: Option<String>,
        member_ids: Vec<String>,
    },
    MembersUnmuted {
        by: Option<String>,
        member_ids: Vec<String>,
    },
    /// Deprecated unread counter, delivered alongside `PropertyUpdated`.
    LegacyUnread { count: u32 },
}

impl ConversationEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::MessageReceived(Message::Plain(_)) => EventKind::MessageReceived,
            Self::MessageReceived(Message::Typed { .. }) => EventKind::TypedMessageReceived,
            Self::MessageDelivered { .. } => EventKind::MessageDelivered,
            Self::MessageUpdated(_) => EventKind::MessageUpdated,
            Self::MembersAdded { .. } => EventKind::MembersAdded,
            Self::MembersRemoved { .. } => EventKind::MembersRemoved,
            Self::Invited { .. } => EventKind::Invited,
            Self::Kicked { .. } => EventKind::Kicked,
            Self::PropertyUpdated(_) => EventKind::PropertyUpdated,
            Self::AttributesUpdated { .. } => EventKind::AttributesUpdated,
            Self::MemberRoleUpdated { .. } => EventKind::MemberRoleUpdated,
            Self::Blocked { .. } => EventKind::Blocked,
            Self::Unblocked { .. } => EventKind::Unblocked,
            Self::MembersBlocked { .. } => EventKind::MembersBlocked,
            Self::MembersUnblocked { .. } => EventKind::MembersUnblocked,
            Self::Muted { .. } => EventKind::Muted,
            Self::Unmuted { .. } => EventKind::Unmuted,
            Self::MembersMuted { .. } => EventKind::MembersMuted,
            Self::MembersUnmuted { .. } => EventKind::MembersUnmuted,
            Self::LegacyUnread { .. } => EventKind::LegacyUnread,
        }
    }

    /// Deprecated event delivered right after this one, if any.
    pub fn legacy_alias(&self) -> Option<Self> {
        match self {
            Self::PropertyUpdated(PropertyUpdate::UnreadMessages { count, .. }) => {
                Some(Self::LegacyUnread { count: *count })
            }
            _ => None,
        }
    }
}

/// Session lifecycle notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LifecycleEvent {
    Paused { error: Option<ImError> },
    Resuming,
    Resumed,
    Closed { error: Option<ImError> },
    /// Deprecated pause notification without an error, delivered alongside `Paused`.
    LegacyPaused,
    /// Deprecated offline notification, delivered alongside `Closed`.
    LegacyOffline { error: Option<ImError> },
}

impl LifecycleEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Paused { .. } => EventKind::Paused,
            Self::Resuming => EventKind::Resuming,
            Self::Resumed => EventKind::Resumed,
            Self::Closed { .. } => EventKind::Closed,
            Self::LegacyPaused => EventKind::LegacyPaused,
            Self::LegacyOffline { .. } => EventKind::LegacyOffline,
        }
    }

    pub fn legacy_alias(&self) -> Option<Self> {
        match self {
            Self::Paused { .. } => Some(Self::LegacyPaused),
            Self::Closed { error } => Some(Self::LegacyOffline {
                error: error.clone(),
            }),
            _ => None,
        }
    }
}

/// Closed set of notification kinds an observer may declare.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventKind {
    Paused,
    Resuming,
    Resumed,
    Closed,
    MessageReceived,
    TypedMessageReceived,
    MessageDelivered,
    MessageUpdated,
    MembersAdded,
    MembersRemoved,
    Invited,
    Kicked,
    PropertyUpdated,
    AttributesUpdated,
    MemberRoleUpdated,
    Blocked,
    Unblocked,
    MembersBlocked,
    MembersUnblocked,
    Muted,
    Unmuted,
    MembersMuted,
    MembersUnmuted,
    LegacyUnread,
    LegacyPaused,
    LegacyOffline,
}

impl EventKind {
    pub const ALL: [EventKind; 26] = [
        Self::Paused,
        Self::Resuming,
        Self::Resumed,
        Self::Closed,
        Self::MessageReceived,
        Self::TypedMessageReceived,
        Self::MessageDelivered,
        Self::MessageUpdated,
        Self::MembersAdded,
        Self::MembersRemoved,
        Self::Invited,
        Self::Kicked,
        Self::PropertyUpdated,
        Self::AttributesUpdated,
        Self::MemberRoleUpdated,
        Self::Blocked,
        Self::Unblocked,
        Self::MembersBlocked,
        Self::MembersUnblocked,
        Self::Muted,
        Self::Unmuted,
        Self::MembersMuted,
        Self::MembersUnmuted,
        Self::LegacyUnread,
        Self::LegacyPaused,
        Self::LegacyOffline,
    ];

    pub fn is_legacy(self) -> bool {
        matches!(
            self,
            Self::LegacyUnread | Self::LegacyPaused | Self::LegacyOffline
        )
    }

    const fn bit(self) -> u32 {
        1 << self as u32
    }
}

/// Set of event kinds an observer handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// The four current lifecycle callbacks.
    pub const fn lifecycle() -> Self {
        Self::empty()
            .with(EventKind::Paused)
            .with(EventKind::Resuming)
            .with(EventKind::Resumed)
            .with(EventKind::Closed)
    }

    /// Every non-deprecated kind.
    pub fn current() -> Self {
        EventKind::ALL
            .into_iter()
            .filter(|kind| !kind.is_legacy())
            .collect()
    }

    pub fn all() -> Self {
        EventKind::ALL.into_iter().collect()
    }

    pub const fn with(self, kind: EventKind) -> Self {
        Self(self.0 | kind.bit())
    }

    pub const fn without(self, kind: EventKind) -> Self {
        Self(self.0 & !kind.bit())
    }

    pub const fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<EventKind> for Capabilities {
    fn from_iter<T: IntoIterator<Item = EventKind>>(iter: T) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}
