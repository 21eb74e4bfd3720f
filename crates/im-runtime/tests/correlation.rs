mod common;

use std::{sync::Arc, time::Duration};

use im_core::{
    CommandType, ConversationId, GenericCommand, ImError, OpType, ServerFault, SessionState,
    SignatureAction,
};
use im_runtime::{OfflinePolicy, SessionConfig, SubmitOptions, SubmitOutcome};

use common::{FailingSigner, StaticSigner, connected, eventually, harness, harness_with_signer};

fn started(conversation_id: &str) -> GenericCommand {
    GenericCommand::new(CommandType::Conv)
        .with_op(OpType::Started)
        .with_conversation(conversation_id)
}

#[tokio::test(start_paused = true)]
async fn reply_resolves_once_and_never_times_out_afterwards() {
    let harness = connected(SessionConfig::default()).await;
    harness.transport.set_responder(|command| {
        (command.op == Some(OpType::Start)).then(|| started("conv-1"))
    });

    let conversation_id = harness
        .session
        .start_conversation(["bob"])
        .await
        .expect("start should succeed");
    assert_eq!(conversation_id, ConversationId::new("conv-1"));
    assert_eq!(harness.session.pending_count(), 0);
    assert_eq!(
        harness.session.active_conversations(),
        vec![ConversationId::new("conv-1")]
    );

    // A duplicate reply for the same serial finds nothing to resolve.
    let serial = harness.transport.sent_commands()[0].serial;
    let mut duplicate = started("conv-1");
    duplicate.serial = serial;
    harness
        .transport
        .reply(&duplicate)
        .await
        .expect("reply should enqueue");

    tokio::time::advance(Duration::from_secs(60)).await;
    assert_eq!(harness.session.pending_count(), 0);
    assert_eq!(harness.session.state(), SessionState::Resumed);
}

#[tokio::test(start_paused = true)]
async fn unanswered_command_times_out_exactly_once() {
    let config = SessionConfig::default().with_command_timeout(Duration::from_secs(5));
    let harness = connected(config).await;

    let result = harness
        .session
        .submit(GenericCommand::start_conversation(["bob"]), true)
        .await;
    assert_eq!(result, Err(ImError::Timeout { timeout_ms: 5_000 }));
    assert_eq!(harness.session.pending_count(), 0);

    // The late reply is dropped instead of resolving a second time.
    let serial = harness.transport.sent_commands()[0].serial;
    let mut late = started("conv-1");
    late.serial = serial;
    harness
        .transport
        .reply(&late)
        .await
        .expect("reply should enqueue");
    eventually(|| harness.session.pending_count() == 0).await;
    assert!(harness.session.active_conversations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn per_command_timeout_overrides_the_default() {
    let harness = connected(SessionConfig::default()).await;

    let result = harness
        .session
        .submit_with(
            GenericCommand::start_conversation(["bob"]),
            SubmitOptions::with_response().with_timeout(Duration::from_millis(250)),
        )
        .await;
    assert_eq!(result, Err(ImError::Timeout { timeout_ms: 250 }));
}

#[tokio::test]
async fn error_reply_surfaces_server_code_and_reason() {
    let harness = connected(SessionConfig::default()).await;
    harness.transport.set_responder(|_| {
        let mut reply = GenericCommand::new(CommandType::Error);
        reply.error = Some(ServerFault {
            code: 4401,
            reason: "INVALID_MEMBER".into(),
            app_code: Some(12),
        });
        Some(reply)
    });

    let result = harness
        .session
        .submit(GenericCommand::start_conversation(["ghost"]), true)
        .await;

    assert_eq!(
        result,
        Err(ImError::ServerError {
            code: 4401,
            reason: "INVALID_MEMBER".into(),
            app_code: Some(12),
        })
    );
    assert_eq!(harness.session.pending_count(), 0);
}

#[tokio::test]
async fn connection_loss_fails_sent_commands_and_keeps_queued_ones() {
    let mut harness = connected(SessionConfig::default()).await;

    let session = harness.session.clone();
    let in_flight = tokio::spawn(async move {
        session
            .submit(GenericCommand::start_conversation(["bob"]), true)
            .await
    });
    harness.transport.wait_for_sent(1).await;

    harness
        .transport
        .drop_connection(None)
        .await
        .expect("disconnect should enqueue");
    let result = in_flight.await.expect("submitter task should finish");
    assert_eq!(result, Err(ImError::NotConnected));
    harness.wait_for_state(SessionState::Resuming).await;

    let session = harness.session.clone();
    let queued = tokio::spawn(async move {
        session
            .submit(GenericCommand::start_conversation(["carol"]), true)
            .await
    });
    eventually(|| harness.session.queued_count() == 1).await;
    assert_eq!(harness.session.pending_count(), 1);

    harness.transport.set_responder(|command| {
        (command.op == Some(OpType::Start)).then(|| started("conv-2"))
    });
    harness.connect().await;

    let reply = queued
        .await
        .expect("submitter task should finish")
        .expect("queued command should be answered")
        .into_reply()
        .expect("reply expected");
    assert_eq!(reply.conversation_id, Some(ConversationId::new("conv-2")));
    assert_eq!(harness.session.queued_count(), 0);
}

#[tokio::test]
async fn offline_queue_is_bounded() {
    let harness = harness(SessionConfig::default().with_max_queued_commands(1));

    let first = harness
        .session
        .send_message("conv-1", "one", false)
        .await
        .expect("first message should queue");
    assert_eq!(first, SubmitOutcome::Queued);

    let second = harness.session.send_message("conv-1", "two", false).await;
    assert_eq!(second, Err(ImError::NotConnected));
    assert_eq!(harness.session.queued_count(), 1);
}

#[tokio::test]
async fn fail_fast_policy_rejects_before_connecting() {
    let harness = harness(SessionConfig::default().with_offline_policy(OfflinePolicy::FailFast));

    let result = harness.session.send_message("conv-1", "hi", false).await;
    assert_eq!(result, Err(ImError::NotConnected));
    assert_eq!(harness.session.queued_count(), 0);
}

#[tokio::test]
async fn transport_send_failure_resolves_with_transport_error() {
    let harness = connected(SessionConfig::default()).await;
    harness.transport.set_fail_sends(true);

    let result = harness
        .session
        .submit(GenericCommand::start_conversation(["bob"]), true)
        .await;

    assert_eq!(
        result,
        Err(ImError::Transport(
            "network unreachable: loopback send failure".into()
        ))
    );
    assert_eq!(harness.session.pending_count(), 0);
}

#[tokio::test]
async fn dropping_the_submitter_removes_its_pending_entry() {
    let harness = connected(SessionConfig::default()).await;

    let session = harness.session.clone();
    let submitter = tokio::spawn(async move {
        session
            .submit(GenericCommand::start_conversation(["bob"]), true)
            .await
    });
    harness.transport.wait_for_sent(1).await;
    assert_eq!(harness.session.pending_count(), 1);

    submitter.abort();
    eventually(|| harness.session.pending_count() == 0).await;
}

#[tokio::test]
async fn signing_failure_sends_nothing_and_registers_nothing() {
    let mut harness = harness_with_signer(SessionConfig::default(), Arc::new(FailingSigner));
    harness.connect().await;

    let result = harness
        .session
        .submit(GenericCommand::start_conversation(["bob"]), true)
        .await;

    assert!(matches!(result, Err(ImError::SigningFailed(_))));
    assert_eq!(harness.session.pending_count(), 0);
    assert!(harness.transport.sent_commands().is_empty());

    // Commands that mutate nothing never reach the signer.
    harness
        .session
        .send_message("conv-1", "hi", false)
        .await
        .expect("plain message should send");
    assert_eq!(harness.transport.sent_commands().len(), 1);
}

#[tokio::test]
async fn signed_commands_carry_materials_and_client_id() {
    let signer = Arc::new(StaticSigner::default());
    let mut harness = harness_with_signer(SessionConfig::default(), signer.clone());
    harness.connect().await;

    harness
        .session
        .submit(GenericCommand::session_open(), false)
        .await
        .expect("open should send");

    let sent = harness.transport.wait_for_sent(1).await;
    let materials = sent[0]
        .signature
        .as_ref()
        .expect("session open should be signed");
    assert_eq!(materials.signature, "signed");
    assert_eq!(materials.nonce, "n-1");
    assert_eq!(sent[0].serial, None);

    let requests = signer.requests.lock().expect("requests lock");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].action, SignatureAction::OpenSession);
    assert_eq!(requests[0].client_id, common::CLIENT_ID);
}

#[tokio::test]
async fn undecodable_replies_leave_pending_commands_untouched() {
    let harness = connected(SessionConfig::default()).await;
    harness
        .transport
        .set_responder(|_| Some(started("conv-ignored")));
    harness.transport.clear_responder();

    let session = harness.session.clone();
    let submitter = tokio::spawn(async move {
        session
            .submit(GenericCommand::start_conversation(["bob"]), true)
            .await
    });
    let sent = harness.transport.wait_for_sent(1).await;

    harness
        .transport
        .reply_raw(b"{not json".to_vec())
        .await
        .expect("raw reply should enqueue");
    let mut reply = started("conv-7");
    reply.serial = sent[0].serial;
    harness
        .transport
        .reply(&reply)
        .await
        .expect("reply should enqueue");

    let reply = submitter
        .await
        .expect("submitter task should finish")
        .expect("command should be answered")
        .into_reply()
        .expect("reply expected");
    assert_eq!(reply.conversation_id, Some(ConversationId::new("conv-7")));
    assert_eq!(harness.session.pending_count(), 0);
}

#[tokio::test]
async fn oversized_timeout_waits_for_the_reply() {
    let harness = connected(SessionConfig::default().with_command_timeout(Duration::MAX)).await;
    harness.transport.set_responder(|command| {
        (command.op == Some(OpType::Start)).then(|| started("conv-3"))
    });

    let conversation_id = harness
        .session
        .start_conversation(["bob"])
        .await
        .expect("start should succeed");
    assert_eq!(conversation_id, ConversationId::new("conv-3"));

    let reply = harness
        .session
        .submit_with(
            GenericCommand::start_conversation(["carol"]),
            SubmitOptions::with_response().with_timeout(Duration::MAX),
        )
        .await
        .expect("command should be answered");
    assert!(reply.into_reply().is_some());
    assert_eq!(harness.session.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn timed_out_queued_command_frees_its_queue_slot() {
    let harness = harness(SessionConfig::default().with_max_queued_commands(1));

    let result = harness
        .session
        .submit_with(
            GenericCommand::start_conversation(["bob"]),
            SubmitOptions::with_response().with_timeout(Duration::from_millis(10)),
        )
        .await;
    assert_eq!(result, Err(ImError::Timeout { timeout_ms: 10 }));
    assert_eq!(harness.session.pending_count(), 0);
    assert_eq!(harness.session.queued_count(), 0);

    let next = harness
        .session
        .send_message("conv-1", "still room", false)
        .await
        .expect("queue slot should be free");
    assert_eq!(next, SubmitOutcome::Queued);
    assert_eq!(harness.session.queued_count(), 1);
}

#[tokio::test]
async fn aborted_queued_submitter_frees_its_queue_slot() {
    let harness = harness(SessionConfig::default().with_max_queued_commands(1));

    let session = harness.session.clone();
    let submitter = tokio::spawn(async move {
        session
            .submit(GenericCommand::start_conversation(["bob"]), true)
            .await
    });
    eventually(|| harness.session.queued_count() == 1).await;

    submitter.abort();
    eventually(|| harness.session.queued_count() == 0).await;
    assert_eq!(harness.session.pending_count(), 0);
}
