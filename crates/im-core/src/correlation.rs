//! Pending-command bookkeeping.
//!
//! Each command that expects a reply is registered under a [`CorrelationKey`]
//! derived from its client-assigned serial. Removing an entry from the table
//! is the only way to obtain its completion, so whoever removes it resolves
//! it, and a completion can be used at most once.

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{sync::oneshot, time::Instant};

use crate::{error::ImError, types::GenericCommand};

/// Result delivered to the submitter of a command.
pub type CommandResult = Result<GenericCommand, ImError>;

/// Identity matching a reply to the command that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationKey(u32);

impl CorrelationKey {
    pub fn new(serial: u32) -> Self {
        Self(serial)
    }

    pub fn from_command(command: &GenericCommand) -> Option<Self> {
        command.serial.map(Self)
    }

    pub fn serial(self) -> u32 {
        self.0
    }
}

/// One in-flight request awaiting resolution.
#[derive(Debug)]
pub struct PendingCommand {
    key: CorrelationKey,
    label: String,
    created_at: Instant,
    deadline: Option<Instant>,
    dispatched: bool,
    completion: oneshot::Sender<CommandResult>,
}

impl PendingCommand {
    /// Create an entry plus the receiver its submitter awaits.
    pub fn new(
        key: CorrelationKey,
        label: impl Into<String>,
        timeout: Option<Duration>,
    ) -> (Self, oneshot::Receiver<CommandResult>) {
        let (completion, receiver) = oneshot::channel();
        let created_at = Instant::now();
        (
            Self {
                key,
                label: label.into(),
                created_at,
                deadline: timeout.and_then(|timeout| created_at.checked_add(timeout)),
                dispatched: false,
                completion,
            },
            receiver,
        )
    }

    pub fn key(&self) -> CorrelationKey {
        self.key
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the frame has been handed to the transport.
    pub fn is_dispatched(&self) -> bool {
        self.dispatched
    }

    /// Deliver the result. Returns `false` when the submitter is gone.
    pub fn resolve(self, result: CommandResult) -> bool {
        self.completion.send(result).is_ok()
    }
}

/// Table of pending commands plus the serial allocator.
#[derive(Debug)]
pub struct PendingTable {
    entries: HashMap<CorrelationKey, PendingCommand>,
    next_serial: u32,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_serial: 1,
        }
    }
}

impl PendingTable {
    /// Allocate a serial that no pending command currently uses.
    pub fn next_key(&mut self) -> CorrelationKey {
        loop {
            let serial = self.next_serial;
            self.next_serial = self.next_serial.checked_add(1).unwrap_or(1);
            let key = CorrelationKey(serial);
            if !self.entries.contains_key(&key) {
                return key;
            }
        }
    }

    pub fn register(&mut self, pending: PendingCommand) -> Result<(), ImError> {
        if self.entries.contains_key(&pending.key) {
            return Err(ImError::Internal(format!(
                "duplicate correlation serial {}",
                pending.key.serial()
            )));
        }
        self.entries.insert(pending.key, pending);
        Ok(())
    }

    pub fn take(&mut self, key: CorrelationKey) -> Option<PendingCommand> {
        self.entries.remove(&key)
    }

    /// Mark an entry as handed to the transport. Returns `false` when the
    /// entry was already resolved.
    pub fn mark_dispatched(&mut self, key: CorrelationKey) -> bool {
        match self.entries.get_mut(&key) {
            Some(pending) => {
                pending.dispatched = true;
                true
            }
            None => false,
        }
    }

    /// Remove entries whose frames went out over a connection that is now gone.
    pub fn drain_dispatched(&mut self) -> Vec<PendingCommand> {
        let keys: Vec<_> = self
            .entries
            .values()
            .filter(|pending| pending.dispatched)
            .map(|pending| pending.key)
            .collect();
        keys.into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .collect()
    }

    pub fn drain_all(&mut self) -> Vec<PendingCommand> {
        self.entries.drain().map(|(_, pending)| pending).collect()
    }

    pub fn contains(&self, key: CorrelationKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
