use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the single logical connection owned by a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Initial handshake has not completed yet.
    Connecting,
    /// Connection is live; commands are sent immediately.
    Resumed,
    /// Connection was lost and recovery has not started yet.
    Paused,
    /// Transport is actively retrying the connection.
    Resuming,
    /// Session is terminated and will never reconnect.
    Closed,
}

/// Opaque conversation identity used only as a routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ConversationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Top-level command family of the wire envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Session,
    Conv,
    Direct,
    Ack,
    Rcp,
    Unread,
    Patch,
    Blacklist,
    Error,
}

impl CommandType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Conv => "conv",
            Self::Direct => "direct",
            Self::Ack => "ack",
            Self::Rcp => "rcp",
            Self::Unread => "unread",
            Self::Patch => "patch",
            Self::Blacklist => "blacklist",
            Self::Error => "error",
        }
    }
}

/// Operation within a command family.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    Open,
    Opened,
    Close,
    Closed,
    Start,
    Started,
    Add,
    Added,
    Remove,
    Removed,
    Joined,
    Left,
    MembersJoined,
    MembersLeft,
    Update,
    Updated,
    MemberInfoUpdate,
    MemberInfoChanged,
    Block,
    Blocked,
    Unblock,
    Unblocked,
    MembersBlocked,
    MembersUnblocked,
    AddShutup,
    RemoveShutup,
    Shutuped,
    Unshutuped,
    MembersShutuped,
    MembersUnshutuped,
    Modify,
    Modified,
}

impl OpType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Opened => "opened",
            Self::Close => "close",
            Self::Closed => "closed",
            Self::Start => "start",
            Self::Started => "started",
            Self::Add => "add",
            Self::Added => "added",
            Self::Remove => "remove",
            Self::Removed => "removed",
            Self::Joined => "joined",
            Self::Left => "left",
            Self::MembersJoined => "members_joined",
            Self::MembersLeft => "members_left",
            Self::Update => "update",
            Self::Updated => "updated",
            Self::MemberInfoUpdate => "member_info_update",
            Self::MemberInfoChanged => "member_info_changed",
            Self::Block => "block",
            Self::Blocked => "blocked",
            Self::Unblock => "unblock",
            Self::Unblocked => "unblocked",
            Self::MembersBlocked => "members_blocked",
            Self::MembersUnblocked => "members_unblocked",
            Self::AddShutup => "add_shutup",
            Self::RemoveShutup => "remove_shutup",
            Self::Shutuped => "shutuped",
            Self::Unshutuped => "unshutuped",
            Self::MembersShutuped => "members_shutuped",
            Self::MembersUnshutuped => "members_unshutuped",
            Self::Modify => "modify",
            Self::Modified => "modified",
        }
    }
}

/// Role of a member inside a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Member,
    Manager,
    Owner,
}

/// Message body carried by `direct`, `patch` and `unread` commands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MessagePayload {
    /// Server-assigned message ID, absent on outgoing messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Raw message content; typed messages carry a JSON object here.
    pub content: String,
    /// Server timestamp in milliseconds since Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<i64>,
    /// Sender client ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// Authentication materials attached to signed commands (`s`, `t`, `n`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureMaterials {
    #[serde(rename = "s")]
    pub signature: String,
    #[serde(rename = "t")]
    pub timestamp: i64,
    #[serde(rename = "n")]
    pub nonce: String,
}

/// Error details reported by the backend inside a reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerFault {
    pub code: i32,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_code: Option<i32>,
}

/// Per-conversation unread summary pushed by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnreadEntry {
    #[serde(rename = "cid")]
    pub conversation_id: ConversationId,
    pub count: u32,
    #[serde(default)]
    pub mentioned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessagePayload>,
}

/// Generic command envelope exchanged with the backend.
///
/// Field names follow the compact wire keys (`i`, `cid`, `m`) so that codecs
/// can serialize the struct directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenericCommand {
    pub cmd: CommandType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<OpType>,
    /// Client ID of the session that owns the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    /// Client-assigned serial used to correlate replies.
    #[serde(rename = "i", default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<u32>,
    #[serde(rename = "cid", default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(rename = "m", default, skip_serializing_if = "Vec::is_empty")]
    pub member_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<String>,
    #[serde(rename = "msg", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessagePayload>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub transient: bool,
    #[serde(flatten)]
    pub signature: Option<SignatureMaterials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MemberRole>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unread: Vec<UnreadEntry>,
    #[serde(rename = "attr", default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at_ms: Option<i64>,
    /// Marks an `rcp` receipt as a read receipt rather than a delivery one.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ServerFault>,
}

impl GenericCommand {
    pub fn new(cmd: CommandType) -> Self {
        Self {
            cmd,
            op: None,
            peer_id: None,
            serial: None,
            conversation_id: None,
            member_ids: Vec::new(),
            initiator: None,
            message: None,
            transient: false,
            signature: None,
            role: None,
            unread: Vec::new(),
            attributes: None,
            updated_at_ms: None,
            read: false,
            error: None,
        }
    }

    pub fn with_op(mut self, op: OpType) -> Self {
        self.op = Some(op);
        self
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<ConversationId>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_members<I, S>(mut self, member_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.member_ids = member_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_serial(mut self, serial: u32) -> Self {
        self.serial = Some(serial);
        self
    }

    pub fn with_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = Some(initiator.into());
        self
    }

    pub fn with_message(mut self, message: MessagePayload) -> Self {
        self.message = Some(message);
        self
    }

    /// `session/open` sent once the transport handshake completes.
    pub fn session_open() -> Self {
        Self::new(CommandType::Session).with_op(OpType::Open)
    }

    /// `session/close` sent on logout.
    pub fn session_close() -> Self {
        Self::new(CommandType::Session).with_op(OpType::Close)
    }

    /// `conv/start` creating a conversation with the given members.
    pub fn start_conversation<I, S>(member_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(CommandType::Conv)
            .with_op(OpType::Start)
            .with_members(member_ids)
    }

    /// `direct` message addressed to a conversation.
    ///
    /// Transient messages are neither stored nor receipted by the backend.
    pub fn direct_message(
        conversation_id: impl Into<ConversationId>,
        content: impl Into<String>,
        transient: bool,
    ) -> Self {
        let mut command = Self::new(CommandType::Direct)
            .with_conversation(conversation_id)
            .with_message(MessagePayload {
                content: content.into(),
                ..MessagePayload::default()
            });
        command.transient = transient;
        command
    }

    /// Short `cmd/op` label used in logs.
    pub fn label(&self) -> String {
        match self.op {
            Some(op) => format!("{}/{}", self.cmd.as_str(), op.as_str()),
            None => self.cmd.as_str().to_owned(),
        }
    }
}

impl fmt::Display for GenericCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())?;
        if let Some(serial) = self.serial {
            write!(f, " i={serial}")?;
        }
        if let Some(conversation_id) = &self.conversation_id {
            write!(f, " cid={conversation_id}")?;
        }
        if !self.member_ids.is_empty() {
            write!(f, " m={}", self.member_ids.len())?;
        }
        if self.transient {
            f.write_str(" transient")?;
        }
        if self.signature.is_some() {
            f.write_str(" signed")?;
        }
        if let Some(fault) = &self.error {
            write!(f, " error={}", fault.code)?;
        }
        Ok(())
    }
}
