use serde::{Deserialize, Serialize};

use crate::{
    correlation::CommandResult,
    error::ImError,
    events::{ConversationEvent, Message, PropertyUpdate},
    types::{CommandType, ConversationId, GenericCommand, MemberRole, OpType},
};

/// Close code sent when the same client ID opened a session elsewhere.
pub const CLOSE_SESSION_CONFLICT: i32 = 4111;
/// Close code sent when the application server kicked the client.
pub const CLOSE_KICKED_BY_APP: i32 = 4115;

/// What a server-initiated close means for the session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CloseDisposition {
    /// Session must close and never reconnect.
    Terminal,
    /// Forced disconnect the transport may recover from.
    Recoverable,
}

/// Map a server close code to its disposition.
pub fn classify_close_code(code: i32) -> CloseDisposition {
    match code {
        CLOSE_SESSION_CONFLICT | CLOSE_KICKED_BY_APP => CloseDisposition::Terminal,
        _ => CloseDisposition::Recoverable,
    }
}

/// Convert a correlated reply into the submitter's result.
///
/// Error replies surface the backend's code and reason verbatim.
pub fn normalize_reply(reply: GenericCommand) -> CommandResult {
    if let Some(fault) = &reply.error {
        return Err(ImError::ServerError {
            code: fault.code,
            reason: fault.reason.clone(),
            app_code: fault.app_code,
        });
    }
    if reply.cmd == CommandType::Error {
        return Err(ImError::server(0, "unspecified server error"));
    }
    Ok(reply)
}

/// Translate a decoded push frame into routed conversation events.
///
/// Returns an empty list for frames that carry no observer-facing event.
pub fn normalize_push(push: &GenericCommand) -> Vec<(ConversationId, ConversationEvent)> {
    if push.cmd == CommandType::Unread {
        return unread_events(push);
    }

    let Some(conversation_id) = push.conversation_id.clone() else {
        return Vec::new();
    };

    conversation_events(push)
        .into_iter()
        .map(|event| (conversation_id.clone(), event))
        .collect()
}

fn conversation_events(push: &GenericCommand) -> Vec<ConversationEvent> {
    let by = push.initiator.clone();
    let members = || push.member_ids.clone();

    match (push.cmd, push.op) {
        (CommandType::Direct, _) => push
            .message
            .clone()
            .map(|payload| ConversationEvent::MessageReceived(Message::from_payload(payload)))
            .into_iter()
            .collect(),
        (CommandType::Rcp, _) => {
            let Some(payload) = &push.message else {
                return Vec::new();
            };
            if push.read {
                return payload
                    .timestamp_ms
                    .map(|timestamp_ms| {
                        ConversationEvent::PropertyUpdated(PropertyUpdate::LastReadAt {
                            timestamp_ms,
                        })
                    })
                    .into_iter()
                    .collect();
            }
            let mut events = Vec::new();
            if let Some(message_id) = payload.id.clone() {
                events.push(ConversationEvent::MessageDelivered {
                    message_id,
                    delivered_at_ms: payload.timestamp_ms,
                });
            }
            if let Some(timestamp_ms) = payload.timestamp_ms {
                events.push(ConversationEvent::PropertyUpdated(
                    PropertyUpdate::LastDeliveredAt { timestamp_ms },
                ));
            }
            events
        }
        (CommandType::Patch, Some(OpType::Modify | OpType::Modified)) => push
            .message
            .clone()
            .map(|payload| ConversationEvent::MessageUpdated(Message::from_payload(payload)))
            .into_iter()
            .collect(),
        (CommandType::Conv, Some(op)) => conv_event(op, push, by, members)
            .into_iter()
            .collect(),
        _ => Vec::new(),
    }
}

fn conv_event(
    op: OpType,
    push: &GenericCommand,
    by: Option<String>,
    members: impl Fn() -> Vec<String>,
) -> Option<ConversationEvent> {
    let event = match op {
        OpType::MembersJoined => ConversationEvent::MembersAdded {
            member_ids: members(),
            by,
        },
        OpType::MembersLeft => ConversationEvent::MembersRemoved {
            member_ids: members(),
            by,
        },
        OpType::Joined => ConversationEvent::Invited { by },
        OpType::Left => ConversationEvent::Kicked { by },
        OpType::Updated => ConversationEvent::AttributesUpdated {
            updated_at_ms: push.updated_at_ms,
            by,
            data: push.attributes.clone(),
        },
        OpType::MemberInfoChanged => ConversationEvent::MemberRoleUpdated {
            by,
            member_id: push.member_ids.first().cloned(),
            role: push.role.unwrap_or(MemberRole::Member),
        },
        OpType::Blocked => ConversationEvent::Blocked { by },
        OpType::Unblocked => ConversationEvent::Unblocked { by },
        OpType::MembersBlocked => ConversationEvent::MembersBlocked {
            by,
            member_ids: members(),
        },
        OpType::MembersUnblocked => ConversationEvent::MembersUnblocked {
            by,
            member_ids: members(),
        },
        OpType::Shutuped => ConversationEvent::Muted { by },
        OpType::Unshutuped => ConversationEvent::Unmuted { by },
        OpType::MembersShutuped => ConversationEvent::MembersMuted {
            by,
            member_ids: members(),
        },
        OpType::MembersUnshutuped => ConversationEvent::MembersUnmuted {
            by,
            member_ids: members(),
        },
        _ => return None,
    };
    Some(event)
}

fn unread_events(push: &GenericCommand) -> Vec<(ConversationId, ConversationEvent)> {
    let mut events = Vec::new();
    for entry in &push.unread {
        events.push((
            entry.conversation_id.clone(),
            ConversationEvent::PropertyUpdated(PropertyUpdate::UnreadMessages {
                count: entry.count,
                mentioned: entry.mentioned,
            }),
        ));
        if let Some(last_message) = entry.last_message.clone() {
            events.push((
                entry.conversation_id.clone(),
                ConversationEvent::PropertyUpdated(PropertyUpdate::LastMessage(
                    Message::from_payload(last_message),
                )),
            ));
        }
    }
    events
}
