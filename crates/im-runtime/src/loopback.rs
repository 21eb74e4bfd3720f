//! In-memory transport for tests and demos.
//!
//! Plays the server side of a session: it records every outgoing command,
//! optionally answers through a responder, and lets the caller inject
//! connectivity changes, pushes and server closes.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use im_core::{
    ChannelError, CommandCodec, GenericCommand, JsonCommandCodec, Transport, TransportError,
    TransportEventSender,
};
use tokio::sync::Notify;
use tracing::{debug, trace};

type Responder = Box<dyn Fn(&GenericCommand) -> Option<GenericCommand> + Send + Sync>;

#[derive(Debug, Default)]
struct LoopbackState {
    connected: bool,
    closed: bool,
    fail_sends: bool,
    sent: Vec<GenericCommand>,
}

pub struct LoopbackTransport {
    events: TransportEventSender,
    codec: JsonCommandCodec,
    state: Mutex<LoopbackState>,
    responder: Mutex<Option<Responder>>,
    sent_notify: Notify,
}

impl LoopbackTransport {
    pub fn new(events: TransportEventSender) -> Self {
        Self {
            events,
            codec: JsonCommandCodec,
            state: Mutex::new(LoopbackState::default()),
            responder: Mutex::new(None),
            sent_notify: Notify::new(),
        }
    }

    /// Answer every sent command for which `responder` returns a reply.
    ///
    /// Replies inherit the command's serial unless they set one.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&GenericCommand) -> Option<GenericCommand> + Send + Sync + 'static,
    {
        *self
            .responder
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(responder));
    }

    pub fn clear_responder(&self) {
        *self
            .responder
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Make subsequent sends fail with `Unreachable`.
    pub fn set_fail_sends(&self, fail: bool) {
        self.lock_state().fail_sends = fail;
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    pub fn sent_commands(&self) -> Vec<GenericCommand> {
        self.lock_state().sent.clone()
    }

    /// Wait until at least `count` commands went out, then return them all.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<GenericCommand> {
        loop {
            let notified = self.sent_notify.notified();
            {
                let state = self.lock_state();
                if state.sent.len() >= count {
                    return state.sent.clone();
                }
            }
            notified.await;
        }
    }

    pub async fn connect(&self) -> Result<(), ChannelError> {
        self.lock_state().connected = true;
        self.events.on_connected().await
    }

    pub async fn drop_connection(&self, error: Option<TransportError>) -> Result<(), ChannelError> {
        self.lock_state().connected = false;
        self.events.on_disconnected(error).await
    }

    pub async fn push(&self, command: &GenericCommand) -> Result<(), ChannelError> {
        let frame = self.encode(command);
        self.events.on_push_event(frame).await
    }

    /// Deliver a reply frame as-is, without any serial fix-up.
    pub async fn reply(&self, command: &GenericCommand) -> Result<(), ChannelError> {
        let frame = self.encode(command);
        self.events.on_command_reply(frame).await
    }

    /// Deliver a raw frame that may not decode.
    pub async fn reply_raw(&self, frame: Vec<u8>) -> Result<(), ChannelError> {
        self.events.on_command_reply(frame).await
    }

    pub async fn close_by_server(
        &self,
        code: i32,
        reason: impl Into<String>,
    ) -> Result<(), ChannelError> {
        self.lock_state().connected = false;
        self.events.on_closed_by_server(code, reason).await
    }

    fn lock_state(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn encode(&self, command: &GenericCommand) -> Vec<u8> {
        // The JSON codec only fails on non-string map keys, which commands never carry.
        self.codec.encode(command).unwrap_or_default()
    }

    fn respond_to(&self, command: &GenericCommand) -> Option<GenericCommand> {
        let responder = self.responder.lock().unwrap_or_else(PoisonError::into_inner);
        let respond = responder.as_ref()?;
        let mut reply = respond(command)?;
        if reply.serial.is_none() {
            reply.serial = command.serial;
        }
        Some(reply)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let command = self
            .codec
            .decode(&frame)
            .map_err(|err| TransportError::Io(err.to_string()))?;

        {
            let mut state = self.lock_state();
            if state.closed {
                return Err(TransportError::Closed);
            }
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            if state.fail_sends {
                return Err(TransportError::Unreachable("loopback send failure".to_owned()));
            }
            trace!(%command, "loopback received command");
            state.sent.push(command.clone());
        }
        self.sent_notify.notify_waiters();

        if let Some(reply) = self.respond_to(&command) {
            let frame = self.encode(&reply);
            let events = self.events.clone();
            tokio::spawn(async move {
                if let Err(err) = events.on_command_reply(frame).await {
                    debug!(%err, "loopback reply dropped");
                }
            });
        }
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.lock_state();
        state.closed = true;
        state.connected = false;
    }
}
