//! Scripted end-to-end run of a session against the loopback transport.

mod logging;

use std::{
    env,
    error::Error,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use im_core::{
    Capabilities, CommandType, ConversationEvent, ConversationId, GenericCommand, LifecycleEvent,
    MessagePayload, OpType, ReconnectPolicy, SessionEvent, SessionState, SignatureError,
    SignatureMaterials, SignatureProvider, SignatureRequest, TransportError,
};
use im_runtime::{LoopbackTransport, Session, SessionConfig, SessionObserver};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Signs locally with a random nonce; stands in for an app-server signing endpoint.
struct DemoSigner;

#[async_trait]
impl SignatureProvider for DemoSigner {
    async fn sign(&self, request: &SignatureRequest) -> Result<SignatureMaterials, SignatureError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| SignatureError::Unavailable(err.to_string()))?
            .as_secs();
        let nonce = Uuid::new_v4().simple().to_string();
        debug!(action = ?request.action, %nonce, "signing request");
        Ok(SignatureMaterials {
            signature: format!("{}:{:?}:{nonce}", request.client_id, request.action),
            timestamp: i64::try_from(timestamp).unwrap_or(i64::MAX),
            nonce,
        })
    }
}

struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn capabilities(&self) -> Capabilities {
        Capabilities::current()
    }

    fn on_lifecycle(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Paused { error } => {
                warn!(error = ?error, "session paused");
            }
            other => info!(event = ?other, "session lifecycle"),
        }
    }

    fn on_conversation_event(&self, conversation_id: &ConversationId, event: &ConversationEvent) {
        info!(%conversation_id, kind = ?event.kind(), "conversation event");
    }
}

/// Plays a cooperative backend.
fn respond(command: &GenericCommand) -> Option<GenericCommand> {
    match (command.cmd, command.op?) {
        (CommandType::Session, OpType::Open) => {
            Some(GenericCommand::new(CommandType::Session).with_op(OpType::Opened))
        }
        (CommandType::Conv, OpType::Start) => Some(
            GenericCommand::new(CommandType::Conv)
                .with_op(OpType::Started)
                .with_conversation(Uuid::new_v4().to_string()),
        ),
        _ => None,
    }
}

fn incoming(conversation_id: &ConversationId, from: &str, content: String) -> GenericCommand {
    GenericCommand::new(CommandType::Direct)
        .with_conversation(conversation_id.clone())
        .with_message(MessagePayload {
            id: Some(Uuid::new_v4().to_string()),
            content,
            timestamp_ms: None,
            from: Some(from.to_owned()),
        })
}

async fn wait_for_state(
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    target: SessionState,
) -> Result<(), Box<dyn Error>> {
    loop {
        if let SessionEvent::StateChanged { state } = events.recv().await?
            && state == target
        {
            return Ok(());
        }
    }
}

async fn run(client_id: String, config: SessionConfig) -> Result<(), Box<dyn Error>> {
    let builder = Session::builder(client_id, config).signer(Arc::new(DemoSigner));
    let transport = Arc::new(LoopbackTransport::new(builder.transport_events()));
    transport.set_responder(respond);
    let session = builder.spawn(transport.clone());
    let mut events = session.subscribe();

    let observer = Arc::new(LoggingObserver);
    session.register_observer(&observer);

    let opener = {
        let session = session.clone();
        tokio::spawn(async move { session.submit(GenericCommand::session_open(), true).await })
    };
    transport.connect().await?;
    wait_for_state(&mut events, SessionState::Resumed).await?;
    opener.await??;
    info!(client_id = session.client_id(), "session opened");

    let conversation_id = session.start_conversation(["bob", "carol"]).await?;
    session
        .send_message(conversation_id.clone(), "hello from the smoke run", false)
        .await?;

    transport
        .push(&incoming(&conversation_id, "bob", "hi alice".to_owned()))
        .await?;
    let typed = serde_json::json!({ "_lctype": -1, "_lctext": "typed hello" });
    transport
        .push(&incoming(&conversation_id, "carol", typed.to_string()))
        .await?;

    transport
        .drop_connection(Some(TransportError::Unreachable("simulated outage".into())))
        .await?;
    wait_for_state(&mut events, SessionState::Resuming).await?;

    let outcome = session
        .send_message(conversation_id.clone(), "sent while offline", false)
        .await?;
    info!(?outcome, queued = session.queued_count(), "submitted during outage");

    let policy = ReconnectPolicy::new(50, 400).with_max_attempts(5);
    let mut attempt = 0;
    while let Some(delay) = policy.delay_for_attempt(attempt, None) {
        tokio::time::sleep(delay).await;
        if attempt < 2 {
            debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnect attempt failed");
            transport.drop_connection(None).await?;
        } else {
            debug!(attempt, "reconnect attempt succeeded");
            transport.connect().await?;
            break;
        }
        attempt += 1;
    }
    wait_for_state(&mut events, SessionState::Resumed).await?;

    let sent = transport.wait_for_sent(4).await;
    info!(
        sent = sent.len(),
        conversations = session.active_conversations().len(),
        "traffic summary"
    );

    session.logout().await?;
    info!(state = ?session.state(), "smoke run finished");
    Ok(())
}

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SessionConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(2);
        }
    };
    let client_id = env::var("IM_SMOKE_CLIENT_ID").unwrap_or_else(|_| "smoke-alice".to_owned());

    if let Err(err) = run(client_id, config).await {
        error!(%err, "smoke run failed");
        std::process::exit(1);
    }
}
