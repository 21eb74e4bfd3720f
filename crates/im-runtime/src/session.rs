//! The live session handle and its submission path.

use std::{
    collections::{BTreeSet, VecDeque},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use im_core::{
    CommandCodec, CorrelationKey, ConversationId, EventStream, GenericCommand, ImError,
    JsonCommandCodec, PendingCommand, PendingTable, SendGate, SessionChannels, SessionEvent,
    SessionState, SessionStateMachine, SignatureProvider, Step, Transport, TransportEvent,
    TransportEventSender, augment,
};
use tokio::{
    sync::{mpsc, oneshot},
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::{OfflinePolicy, SessionConfig},
    driver::{CloseRequest, SessionDriver},
    observer::{ObserverId, ObserverRegistry, SessionObserver},
};

/// How a submitted command left the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Handed to the transport; no reply was requested.
    Sent,
    /// Held in the offline queue until the session resumes.
    Queued,
    /// The correlated reply.
    Reply(GenericCommand),
}

impl SubmitOutcome {
    pub fn into_reply(self) -> Option<GenericCommand> {
        match self {
            Self::Reply(reply) => Some(reply),
            Self::Sent | Self::Queued => None,
        }
    }
}

/// Per-submission options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    pub requires_response: bool,
    /// Overrides [`SessionConfig::command_timeout`].
    pub timeout: Option<Duration>,
}

impl SubmitOptions {
    pub fn fire_and_forget() -> Self {
        Self::default()
    }

    pub fn with_response() -> Self {
        Self {
            requires_response: true,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug)]
pub(crate) struct QueuedFrame {
    pub(crate) key: Option<CorrelationKey>,
    pub(crate) label: String,
    pub(crate) bytes: Vec<u8>,
}

/// State guarded by the session lock.
#[derive(Debug, Default)]
pub(crate) struct SessionCore {
    pub(crate) machine: SessionStateMachine,
    pub(crate) pending: PendingTable,
    pub(crate) queue: VecDeque<QueuedFrame>,
    pub(crate) conversations: BTreeSet<ConversationId>,
}

impl SessionCore {
    /// Drain the offline queue, dropping frames whose submitter already gave up.
    pub(crate) fn take_flushable(&mut self) -> Vec<QueuedFrame> {
        let queued: Vec<_> = self.queue.drain(..).collect();
        queued
            .into_iter()
            .filter(|frame| match frame.key {
                Some(key) => self.pending.mark_dispatched(key),
                None => true,
            })
            .collect()
    }

    /// Forget a command whose submitter stopped waiting, including its
    /// queued frame, so it no longer counts against the queue cap.
    pub(crate) fn abandon(&mut self, key: CorrelationKey) -> Option<PendingCommand> {
        self.queue.retain(|frame| frame.key != Some(key));
        self.pending.take(key)
    }

    /// Returns `true` when the conversation was not tracked yet.
    pub(crate) fn track(&mut self, conversation_id: &ConversationId) -> bool {
        self.conversations.insert(conversation_id.clone())
    }
}

pub(crate) struct SessionInner {
    pub(crate) client_id: String,
    pub(crate) config: SessionConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) codec: Arc<dyn CommandCodec>,
    pub(crate) signer: Option<Arc<dyn SignatureProvider>>,
    pub(crate) core: Mutex<SessionCore>,
    pub(crate) observers: ObserverRegistry,
    pub(crate) channels: SessionChannels,
    pub(crate) close_tx: mpsc::Sender<CloseRequest>,
    pub(crate) shutdown: CancellationToken,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl SessionInner {
    pub(crate) fn lock_core(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Announce state changes on the stream and notify observers.
    ///
    /// Must be called without the core lock held.
    pub(crate) fn publish(&self, steps: Vec<Step>) {
        for step in steps {
            info!(client_id = %self.client_id, state = ?step.state, "session state changed");
            self.channels
                .emit(SessionEvent::StateChanged { state: step.state });
            if let Some(notification) = step.notification {
                self.observers.dispatch_lifecycle(&notification);
            }
        }
    }

    pub(crate) fn announce_conversations(&self, activated: Vec<ConversationId>) {
        for conversation_id in activated {
            debug!(%conversation_id, "conversation activated");
            self.channels
                .emit(SessionEvent::ConversationActivated { conversation_id });
        }
    }

    /// Send frames in order; a failed frame resolves its pending command.
    pub(crate) async fn send_frames(&self, frames: Vec<QueuedFrame>) {
        for frame in frames {
            debug!(command = %frame.label, "sending queued command");
            let Err(err) = self.transport.send(frame.bytes).await else {
                continue;
            };
            warn!(command = %frame.label, %err, "queued command could not be sent");
            let Some(key) = frame.key else {
                continue;
            };
            let failed = self.lock_core().pending.take(key);
            if let Some(pending) = failed {
                pending.resolve(Err(err.into()));
            }
        }
    }

    /// Reject early when the gate rules out both sending and queueing.
    fn precheck(&self) -> Result<(), ImError> {
        match self.lock_core().machine.send_gate() {
            SendGate::Open => Ok(()),
            SendGate::Closed => Err(ImError::SessionClosed),
            SendGate::Deferred => match self.config.offline_policy {
                OfflinePolicy::Queue => Ok(()),
                OfflinePolicy::FailFast => Err(ImError::NotConnected),
            },
        }
    }
}

/// Removes the pending entry if the submitter goes away before resolution.
struct PendingGuard<'a> {
    inner: &'a SessionInner,
    key: CorrelationKey,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.inner.lock_core().abandon(self.key).is_some() {
            debug!(serial = self.key.serial(), "submitter dropped before resolution");
        }
    }
}

/// Cheaply cloneable handle to one IM session.
///
/// All clones share the same lifecycle, pending table and observers. A driver
/// task consumes transport events until the session closes.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.inner.client_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn builder(client_id: impl Into<String>, config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(client_id.into(), config)
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock_core().machine.state()
    }

    /// Error that terminated the session, if it closed with one.
    pub fn close_reason(&self) -> Option<ImError> {
        self.inner.lock_core().machine.close_reason().cloned()
    }

    /// Conversations seen in replies or pushes, in ID order.
    pub fn active_conversations(&self) -> Vec<ConversationId> {
        self.inner
            .lock_core()
            .conversations
            .iter()
            .cloned()
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock_core().pending.len()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.lock_core().queue.len()
    }

    pub fn subscribe(&self) -> EventStream {
        self.inner.channels.subscribe()
    }

    pub fn register_observer<O>(&self, observer: &Arc<O>) -> ObserverId
    where
        O: SessionObserver + 'static,
    {
        self.inner.observers.register(observer)
    }

    pub fn deregister_observer(&self, id: ObserverId) -> bool {
        self.inner.observers.deregister(id)
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.inner.observers
    }

    pub async fn submit(
        &self,
        command: GenericCommand,
        requires_response: bool,
    ) -> Result<SubmitOutcome, ImError> {
        self.submit_with(
            command,
            SubmitOptions {
                requires_response,
                timeout: None,
            },
        )
        .await
    }

    /// Augment, correlate and send a command.
    ///
    /// With `requires_response` the call resolves exactly once with the reply,
    /// a server error, `Timeout`, `NotConnected` or `SessionClosed`. Without it
    /// the command is considered resolved once sent or queued.
    pub async fn submit_with(
        &self,
        mut command: GenericCommand,
        options: SubmitOptions,
    ) -> Result<SubmitOutcome, ImError> {
        let inner = self.inner.as_ref();
        inner.precheck()?;

        augment(&mut command, &inner.client_id, inner.signer.as_deref())
            .await
            .inspect_err(|err| {
                warn!(command = %command.label(), %err, "command augmentation failed");
            })?;

        let timeout = options.timeout.unwrap_or(inner.config.command_timeout);
        // A timeout too large to represent never expires.
        let deadline = time::Instant::now().checked_add(timeout);
        let label = command.label();

        let (key, outgoing, receiver) = {
            let mut core = inner.lock_core();
            let send_now = match core.machine.send_gate() {
                SendGate::Open => true,
                SendGate::Closed => return Err(ImError::SessionClosed),
                SendGate::Deferred => {
                    if inner.config.offline_policy == OfflinePolicy::FailFast {
                        return Err(ImError::NotConnected);
                    }
                    if core.queue.len() >= inner.config.max_queued_commands {
                        warn!(command = %label, queued = core.queue.len(), "offline queue is full");
                        return Err(ImError::NotConnected);
                    }
                    false
                }
            };

            let key = options.requires_response.then(|| core.pending.next_key());
            command.serial = key.map(CorrelationKey::serial);
            let bytes = inner.codec.encode(&command)?;

            let receiver = match key {
                Some(key) => {
                    let (pending, rx) = PendingCommand::new(key, label.clone(), Some(timeout));
                    core.pending.register(pending)?;
                    if send_now {
                        core.pending.mark_dispatched(key);
                    }
                    Some(rx)
                }
                None => None,
            };

            let outgoing = if send_now {
                Some(bytes)
            } else {
                core.queue.push_back(QueuedFrame {
                    key,
                    label: label.clone(),
                    bytes,
                });
                None
            };
            (key, outgoing, receiver)
        };

        let _guard = key.map(|key| PendingGuard { inner, key });
        let queued = outgoing.is_none();

        match outgoing {
            Some(bytes) => {
                debug!(%command, "sending command");
                if let Err(err) = inner.transport.send(bytes).await {
                    warn!(command = %label, %err, "transport rejected command");
                    let Some(key) = key else {
                        return Err(err.into());
                    };
                    let failed = inner.lock_core().pending.take(key);
                    if let Some(pending) = failed {
                        pending.resolve(Err(err.into()));
                    }
                }
            }
            None => debug!(%command, "command queued while offline"),
        }

        let (Some(key), Some(mut receiver)) = (key, receiver) else {
            return Ok(if queued {
                SubmitOutcome::Queued
            } else {
                SubmitOutcome::Sent
            });
        };

        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let waited = match deadline {
            Some(deadline) => time::timeout_at(deadline, &mut receiver).await.ok(),
            None => Some((&mut receiver).await),
        };
        let result = match waited {
            Some(result) => result,
            None => {
                let expired = inner.lock_core().abandon(key);
                if let Some(pending) = expired {
                    warn!(command = %label, timeout_ms, "command timed out");
                    pending.resolve(Err(ImError::Timeout { timeout_ms }));
                }
                receiver.await
            }
        };

        result
            .map_err(|_| ImError::SessionClosed)?
            .map(SubmitOutcome::Reply)
    }

    /// Send a message to a conversation without waiting for the server ack.
    pub async fn send_message(
        &self,
        conversation_id: impl Into<ConversationId>,
        content: impl Into<String>,
        transient: bool,
    ) -> Result<SubmitOutcome, ImError> {
        self.submit(
            GenericCommand::direct_message(conversation_id, content, transient),
            false,
        )
        .await
    }

    /// Create a conversation and return the ID assigned by the backend.
    pub async fn start_conversation<I, S>(&self, member_ids: I) -> Result<ConversationId, ImError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let reply = self
            .submit(GenericCommand::start_conversation(member_ids), true)
            .await?
            .into_reply()
            .and_then(|reply| reply.conversation_id);
        reply.ok_or_else(|| ImError::Codec("conv/started reply without cid".to_owned()))
    }

    /// End the session.
    ///
    /// Sends a best-effort `session/close` when connected, closes the session
    /// (resolving every pending command with `SessionClosed`), then closes the
    /// transport. Fails with `SessionClosed` if the session already ended.
    pub async fn logout(&self) -> Result<(), ImError> {
        match self.state() {
            SessionState::Closed => return Err(ImError::SessionClosed),
            SessionState::Resumed => {
                if let Err(err) = self.submit(GenericCommand::session_close(), false).await {
                    debug!(%err, "session close notice was not sent");
                }
            }
            SessionState::Connecting | SessionState::Paused | SessionState::Resuming => {}
        }

        let (reply, done) = oneshot::channel();
        self.inner
            .close_tx
            .send(CloseRequest { reply })
            .await
            .map_err(|_| ImError::SessionClosed)?;
        let closed = done.await.map_err(|_| ImError::SessionClosed)?;

        self.inner.transport.close().await;
        info!(client_id = %self.inner.client_id, "logged out");
        closed
    }
}

/// Collects the seams of a session before its driver starts.
pub struct SessionBuilder {
    client_id: String,
    config: SessionConfig,
    codec: Arc<dyn CommandCodec>,
    signer: Option<Arc<dyn SignatureProvider>>,
    channels: SessionChannels,
    transport_rx: mpsc::Receiver<TransportEvent>,
}

impl SessionBuilder {
    fn new(client_id: String, config: SessionConfig) -> Self {
        let (channels, transport_rx) =
            SessionChannels::new(config.transport_event_buffer, config.session_event_buffer);
        Self {
            client_id,
            config,
            codec: Arc::new(JsonCommandCodec),
            signer: None,
            channels,
            transport_rx,
        }
    }

    /// Handle the transport uses to report inbound events.
    pub fn transport_events(&self) -> TransportEventSender {
        self.channels.transport_sender()
    }

    pub fn codec(mut self, codec: Arc<dyn CommandCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn signer(mut self, signer: Arc<dyn SignatureProvider>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Start the driver task and return the session handle.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(self, transport: Arc<dyn Transport>) -> Session {
        let (close_tx, close_rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let inner = Arc::new(SessionInner {
            client_id: self.client_id,
            config: self.config,
            transport,
            codec: self.codec,
            signer: self.signer,
            core: Mutex::new(SessionCore::default()),
            observers: ObserverRegistry::default(),
            channels: self.channels,
            close_tx,
            shutdown: shutdown.clone(),
        });

        let driver = SessionDriver::new(
            Arc::downgrade(&inner),
            self.transport_rx,
            close_rx,
            shutdown,
        );
        tokio::spawn(driver.run());
        debug!(client_id = %inner.client_id, "session driver spawned");

        Session { inner }
    }
}
