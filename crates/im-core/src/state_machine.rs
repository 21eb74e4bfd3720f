use crate::{
    error::ImError,
    events::LifecycleEvent,
    types::SessionState,
};

/// One state change produced by a transition, with the observer notification
/// it carries (if any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub state: SessionState,
    pub notification: Option<LifecycleEvent>,
}

impl Step {
    fn silent(state: SessionState) -> Self {
        Self {
            state,
            notification: None,
        }
    }

    fn notify(state: SessionState, notification: LifecycleEvent) -> Self {
        Self {
            state,
            notification: Some(notification),
        }
    }
}

/// Whether outgoing commands may go to the transport right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendGate {
    Open,
    /// Not connected; queue or fail fast depending on policy.
    Deferred,
    Closed,
}

/// Pure lifecycle state machine for one session.
///
/// Recovery is started by the machine itself: a connectivity loss from
/// `Resumed` yields `Paused` immediately followed by `Resuming`. Backoff
/// between attempts belongs to the transport.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionState,
    close_reason: Option<ImError>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            state: SessionState::Connecting,
            close_reason: None,
        }
    }
}

impl SessionStateMachine {
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Error that terminated the session, once `Closed`.
    pub fn close_reason(&self) -> Option<&ImError> {
        self.close_reason.as_ref()
    }

    pub fn send_gate(&self) -> SendGate {
        match self.state {
            SessionState::Resumed => SendGate::Open,
            SessionState::Connecting | SessionState::Paused | SessionState::Resuming => {
                SendGate::Deferred
            }
            SessionState::Closed => SendGate::Closed,
        }
    }

    /// Push events only arrive over a live connection.
    pub fn accepts_push(&self) -> bool {
        self.state == SessionState::Resumed
    }

    /// Transport handshake (or reconnect) succeeded.
    ///
    /// The initial handshake is silent for observers; recovery ends with a
    /// `Resumed` notification. A duplicate connect while `Resumed` is a no-op.
    pub fn on_connected(&mut self) -> Result<Vec<Step>, ImError> {
        match self.state {
            SessionState::Connecting => Ok(vec![self.enter(SessionState::Resumed, None)]),
            SessionState::Paused | SessionState::Resuming => Ok(vec![self.enter(
                SessionState::Resumed,
                Some(LifecycleEvent::Resumed),
            )]),
            SessionState::Resumed => Ok(Vec::new()),
            SessionState::Closed => Err(ImError::invalid_state(self.state, "on_connected")),
        }
    }

    /// Transport lost connectivity.
    ///
    /// From `Resumed` observers see `Paused(error)` then `Resuming`. A failed
    /// retry while `Resuming` passes through `Paused` silently and starts the
    /// next attempt. While `Connecting` the transport still owns the handshake
    /// and nothing changes.
    pub fn on_disconnected(&mut self, error: Option<ImError>) -> Result<Vec<Step>, ImError> {
        match self.state {
            SessionState::Connecting => Ok(Vec::new()),
            SessionState::Resumed => Ok(vec![
                self.enter(
                    SessionState::Paused,
                    Some(LifecycleEvent::Paused { error }),
                ),
                self.enter(SessionState::Resuming, Some(LifecycleEvent::Resuming)),
            ]),
            SessionState::Resuming => Ok(vec![
                self.enter(SessionState::Paused, None),
                self.enter(SessionState::Resuming, Some(LifecycleEvent::Resuming)),
            ]),
            SessionState::Paused => Ok(vec![self.enter(
                SessionState::Resuming,
                Some(LifecycleEvent::Resuming),
            )]),
            SessionState::Closed => Err(ImError::invalid_state(self.state, "on_disconnected")),
        }
    }

    /// Terminate the session. Succeeds exactly once.
    pub fn on_closed(&mut self, error: Option<ImError>) -> Result<Vec<Step>, ImError> {
        if self.state == SessionState::Closed {
            return Err(ImError::SessionClosed);
        }

        self.close_reason = error.clone();
        Ok(vec![self.enter(
            SessionState::Closed,
            Some(LifecycleEvent::Closed { error }),
        )])
    }

    fn enter(&mut self, next: SessionState, notification: Option<LifecycleEvent>) -> Step {
        self.state = next;
        match notification {
            Some(notification) => Step::notify(next, notification),
            None => Step::silent(next),
        }
    }
}
