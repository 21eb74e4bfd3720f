#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use im_core::{
    Capabilities, ConversationEvent, ConversationId, EventStream, LifecycleEvent, SessionEvent,
    SessionState, SignatureError, SignatureMaterials, SignatureProvider, SignatureRequest,
};
use im_runtime::{LoopbackTransport, Session, SessionConfig, SessionObserver};
use tokio::{sync::Notify, time};

pub const CLIENT_ID: &str = "alice";
pub const WAIT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub session: Session,
    pub transport: Arc<LoopbackTransport>,
    pub events: EventStream,
}

pub fn harness(config: SessionConfig) -> Harness {
    build(config, None)
}

pub fn harness_with_signer(config: SessionConfig, signer: Arc<dyn SignatureProvider>) -> Harness {
    build(config, Some(signer))
}

fn build(config: SessionConfig, signer: Option<Arc<dyn SignatureProvider>>) -> Harness {
    let mut builder = Session::builder(CLIENT_ID, config);
    if let Some(signer) = signer {
        builder = builder.signer(signer);
    }
    let transport = Arc::new(LoopbackTransport::new(builder.transport_events()));
    let session = builder.spawn(transport.clone());
    let events = session.subscribe();
    Harness {
        session,
        transport,
        events,
    }
}

/// A harness whose session already reached `Resumed`.
pub async fn connected(config: SessionConfig) -> Harness {
    let mut harness = harness(config);
    harness.connect().await;
    harness
}

impl Harness {
    pub async fn connect(&mut self) {
        self.transport.connect().await.expect("connect should enqueue");
        self.wait_for_state(SessionState::Resumed).await;
    }

    /// Consume stream events until `state` is entered.
    pub async fn wait_for_state(&mut self, state: SessionState) {
        time::timeout(WAIT, async {
            loop {
                match self.events.recv().await {
                    Ok(SessionEvent::StateChanged { state: entered }) if entered == state => {
                        return;
                    }
                    Ok(_) => {}
                    Err(err) => panic!("session event stream failed: {err}"),
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("session never entered {state:?}"));
    }

    /// Collect every state the stream reports until `last` is entered.
    pub async fn states_until(&mut self, last: SessionState) -> Vec<SessionState> {
        let mut states = Vec::new();
        let finished = time::timeout(WAIT, async {
            loop {
                if let Ok(SessionEvent::StateChanged { state }) = self.events.recv().await {
                    states.push(state);
                    if state == last {
                        return;
                    }
                }
            }
        })
        .await
        .is_ok();
        assert!(finished, "session never entered {last:?}, saw {states:?}");
        states
    }
}

/// Wait until `condition` holds, yielding to the driver in between.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    time::timeout(WAIT, async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition should eventually hold");
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Lifecycle(LifecycleEvent),
    Conversation(ConversationId, ConversationEvent),
}

/// Observer that records everything it is given.
pub struct RecordingObserver {
    capabilities: Capabilities,
    records: Mutex<Vec<Record>>,
    notify: Notify,
}

impl RecordingObserver {
    pub fn new(capabilities: Capabilities) -> Arc<Self> {
        Arc::new(Self {
            capabilities,
            records: Mutex::new(Vec::new()),
            notify: Notify::new(),
        })
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().expect("records lock").clone()
    }

    pub fn lifecycle(&self) -> Vec<LifecycleEvent> {
        self.records()
            .into_iter()
            .filter_map(|record| match record {
                Record::Lifecycle(event) => Some(event),
                Record::Conversation(..) => None,
            })
            .collect()
    }

    pub fn conversation(&self) -> Vec<(ConversationId, ConversationEvent)> {
        self.records()
            .into_iter()
            .filter_map(|record| match record {
                Record::Conversation(id, event) => Some((id, event)),
                Record::Lifecycle(_) => None,
            })
            .collect()
    }

    /// Wait until at least `count` records arrived, then return them all.
    pub async fn wait_for(&self, count: usize) -> Vec<Record> {
        time::timeout(WAIT, async {
            loop {
                let notified = self.notify.notified();
                let records = self.records();
                if records.len() >= count {
                    return records;
                }
                notified.await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {count} records, got {:?}", self.records()))
    }

    fn record(&self, record: Record) {
        self.records.lock().expect("records lock").push(record);
        self.notify.notify_waiters();
    }
}

impl SessionObserver for RecordingObserver {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn on_lifecycle(&self, event: &LifecycleEvent) {
        self.record(Record::Lifecycle(event.clone()));
    }

    fn on_conversation_event(&self, conversation_id: &ConversationId, event: &ConversationEvent) {
        self.record(Record::Conversation(conversation_id.clone(), event.clone()));
    }
}

/// Signer that counts requests and returns fixed materials.
#[derive(Default)]
pub struct StaticSigner {
    pub requests: Mutex<Vec<SignatureRequest>>,
}

#[async_trait]
impl SignatureProvider for StaticSigner {
    async fn sign(&self, request: &SignatureRequest) -> Result<SignatureMaterials, SignatureError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        Ok(SignatureMaterials {
            signature: "signed".into(),
            timestamp: 1_700_000_000,
            nonce: "n-1".into(),
        })
    }
}

pub struct FailingSigner;

#[async_trait]
impl SignatureProvider for FailingSigner {
    async fn sign(&self, _request: &SignatureRequest) -> Result<SignatureMaterials, SignatureError> {
        Err(SignatureError::Unavailable("auth server down".into()))
    }
}
