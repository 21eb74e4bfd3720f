//! Driver task that applies transport events to a session.
//!
//! Every lifecycle transition runs on this task, so observers see lifecycle
//! notifications in the order the transitions happened.

use std::sync::Weak;

use im_core::{
    CloseDisposition, ConversationEvent, CorrelationKey, ImError, SendGate, SessionState,
    TransportEvent, classify_close_code, normalize_push, normalize_reply,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::session::SessionInner;

/// Logout request handled on the driver task.
pub(crate) struct CloseRequest {
    pub(crate) reply: oneshot::Sender<Result<(), ImError>>,
}

pub(crate) struct SessionDriver {
    inner: Weak<SessionInner>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    close_rx: mpsc::Receiver<CloseRequest>,
    shutdown: CancellationToken,
}

impl SessionDriver {
    pub(crate) fn new(
        inner: Weak<SessionInner>,
        transport_rx: mpsc::Receiver<TransportEvent>,
        close_rx: mpsc::Receiver<CloseRequest>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner,
            transport_rx,
            close_rx,
            shutdown,
        }
    }

    /// Runs until the session closes or every handle is dropped.
    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                request = self.close_rx.recv() => {
                    let Some(request) = request else { break };
                    let Some(inner) = self.inner.upgrade() else { break };
                    let result = inner.close_with(None);
                    let _ = request.reply.send(result);
                }
                event = self.transport_rx.recv() => {
                    let Some(event) = event else { break };
                    let Some(inner) = self.inner.upgrade() else { break };
                    inner.handle_transport_event(event).await;
                }
            }
        }
        debug!("session driver stopped");
    }
}

impl SessionInner {
    async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.handle_connected().await,
            TransportEvent::Disconnected { error } => {
                self.handle_disconnected(error.map(ImError::from));
            }
            TransportEvent::CommandReply(frame) => self.handle_reply(&frame),
            TransportEvent::PushEvent(frame) => self.handle_push(&frame),
            TransportEvent::ClosedByServer { code, reason } => {
                self.handle_server_close(code, reason).await;
            }
        }
    }

    async fn handle_connected(&self) {
        let (steps, flush) = {
            let mut core = self.lock_core();
            let steps = match core.machine.on_connected() {
                Ok(steps) => steps,
                Err(err) => {
                    debug!(%err, "ignoring connect notification");
                    return;
                }
            };
            let flush = if core.machine.send_gate() == SendGate::Open {
                core.take_flushable()
            } else {
                Vec::new()
            };
            (steps, flush)
        };

        self.publish(steps);
        if !flush.is_empty() {
            debug!(count = flush.len(), "flushing offline queue");
            self.send_frames(flush).await;
        }
    }

    fn handle_disconnected(&self, error: Option<ImError>) {
        let (steps, orphaned) = {
            let mut core = self.lock_core();
            let steps = match core.machine.on_disconnected(error) {
                Ok(steps) => steps,
                Err(err) => {
                    debug!(%err, "ignoring disconnect notification");
                    return;
                }
            };
            (steps, core.pending.drain_dispatched())
        };

        for pending in orphaned {
            debug!(
                serial = pending.key().serial(),
                command = pending.label(),
                "connection lost before reply"
            );
            pending.resolve(Err(ImError::NotConnected));
        }
        self.publish(steps);
    }

    fn handle_reply(&self, frame: &[u8]) {
        let reply = match self.codec.decode(frame) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(%err, "dropping undecodable reply");
                return;
            }
        };
        let Some(key) = CorrelationKey::from_command(&reply) else {
            warn!(command = %reply, "dropping reply without serial");
            return;
        };

        let (pending, activated) = {
            let mut core = self.lock_core();
            let pending = core.pending.take(key);
            let activated = match &reply.conversation_id {
                Some(conversation_id) if pending.is_some() && core.track(conversation_id) => {
                    vec![conversation_id.clone()]
                }
                _ => Vec::new(),
            };
            (pending, activated)
        };

        let Some(pending) = pending else {
            debug!(serial = key.serial(), "reply for unknown or already resolved command");
            return;
        };
        self.announce_conversations(activated);
        trace!(serial = key.serial(), command = pending.label(), "resolving command");
        pending.resolve(normalize_reply(reply));
    }

    fn handle_push(&self, frame: &[u8]) {
        let push = match self.codec.decode(frame) {
            Ok(push) => push,
            Err(err) => {
                warn!(%err, "dropping undecodable push");
                return;
            }
        };

        let (events, activated) = {
            let mut core = self.lock_core();
            if !core.machine.accepts_push() {
                warn!(
                    command = %push,
                    state = ?core.machine.state(),
                    "dropping push outside a live connection"
                );
                return;
            }
            let events = normalize_push(&push);
            let mut activated = Vec::new();
            for (conversation_id, event) in &events {
                if matches!(event, ConversationEvent::Kicked { .. }) {
                    core.conversations.remove(conversation_id);
                } else if core.track(conversation_id) {
                    activated.push(conversation_id.clone());
                }
            }
            (events, activated)
        };

        if events.is_empty() {
            debug!(command = %push, "push carries no observer event");
            return;
        }
        self.announce_conversations(activated);
        for (conversation_id, event) in &events {
            self.observers.dispatch_conversation(conversation_id, event);
        }
    }

    async fn handle_server_close(&self, code: i32, reason: String) {
        let error = ImError::server(code, reason);
        let connecting = self.lock_core().machine.state() == SessionState::Connecting;

        match classify_close_code(code) {
            CloseDisposition::Recoverable if !connecting => {
                debug!(code, "server forced a recoverable disconnect");
                self.handle_disconnected(Some(error));
            }
            CloseDisposition::Recoverable | CloseDisposition::Terminal => {
                warn!(code, %error, "server terminated the session");
                if self.close_with(Some(error)).is_ok() {
                    self.transport.close().await;
                }
            }
        }
    }

    /// Enter `Closed`, resolve everything outstanding, then notify.
    pub(crate) fn close_with(&self, error: Option<ImError>) -> Result<(), ImError> {
        let (steps, pending) = {
            let mut core = self.lock_core();
            let steps = core.machine.on_closed(error)?;
            core.queue.clear();
            (steps, core.pending.drain_all())
        };

        for entry in pending {
            entry.resolve(Err(ImError::SessionClosed));
        }
        self.publish(steps);
        self.shutdown.cancel();
        Ok(())
    }
}
