//! Signing and pre-send augmentation of outgoing commands.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ImError, SignatureError},
    types::{CommandType, ConversationId, GenericCommand, OpType, SignatureMaterials},
};

/// Operation that requires signing materials before it may be sent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SignatureAction {
    OpenSession,
    StartConversation,
    Invite,
    Kick,
    Block,
    Unblock,
}

impl SignatureAction {
    /// Action required by a command, if it mutates session or membership state.
    pub fn for_command(command: &GenericCommand) -> Option<Self> {
        match (command.cmd, command.op?) {
            (CommandType::Session, OpType::Open) => Some(Self::OpenSession),
            (CommandType::Conv, OpType::Start) => Some(Self::StartConversation),
            (CommandType::Conv, OpType::Add) => Some(Self::Invite),
            (CommandType::Conv, OpType::Remove) => Some(Self::Kick),
            (CommandType::Blacklist, OpType::Block) => Some(Self::Block),
            (CommandType::Blacklist, OpType::Unblock) => Some(Self::Unblock),
            _ => None,
        }
    }
}

/// Input handed to a [`SignatureProvider`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureRequest {
    pub action: SignatureAction,
    pub client_id: String,
    pub conversation_id: Option<ConversationId>,
    pub member_ids: Vec<String>,
}

/// Source of signing materials, typically backed by the application server.
#[async_trait]
pub trait SignatureProvider: Send + Sync {
    async fn sign(&self, request: &SignatureRequest) -> Result<SignatureMaterials, SignatureError>;
}

/// Fill the fields the session controls before a command is correlated.
///
/// Stamps the owning client ID and, when the command needs it and a provider
/// is configured, attaches signing materials. On failure the command is left
/// untouched apart from the client ID and must not be sent.
pub async fn augment(
    command: &mut GenericCommand,
    client_id: &str,
    provider: Option<&dyn SignatureProvider>,
) -> Result<(), ImError> {
    command.peer_id = Some(client_id.to_owned());

    let (Some(action), Some(provider)) = (SignatureAction::for_command(command), provider) else {
        return Ok(());
    };

    let request = SignatureRequest {
        action,
        client_id: client_id.to_owned(),
        conversation_id: command.conversation_id.clone(),
        member_ids: command.member_ids.clone(),
    };
    let materials = provider.sign(&request).await?;
    command.signature = Some(materials);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingSigner {
        requests: Mutex<Vec<SignatureRequest>>,
    }

    #[async_trait]
    impl SignatureProvider for RecordingSigner {
        async fn sign(
            &self,
            request: &SignatureRequest,
        ) -> Result<SignatureMaterials, SignatureError> {
            self.requests
                .lock()
                .expect("requests lock")
                .push(request.clone());
            Ok(SignatureMaterials {
                signature: format!("sig-{:?}", request.action),
                timestamp: 1_700_000_000,
                nonce: "nonce-1".into(),
            })
        }
    }

    struct FailingSigner;

    #[async_trait]
    impl SignatureProvider for FailingSigner {
        async fn sign(
            &self,
            _request: &SignatureRequest,
        ) -> Result<SignatureMaterials, SignatureError> {
            Err(SignatureError::Rejected("mock outage".into()))
        }
    }

    #[test]
    fn only_mutating_commands_need_signatures() {
        assert_eq!(
            SignatureAction::for_command(&GenericCommand::session_open()),
            Some(SignatureAction::OpenSession)
        );
        assert_eq!(
            SignatureAction::for_command(&GenericCommand::start_conversation(["a"])),
            Some(SignatureAction::StartConversation)
        );
        assert_eq!(
            SignatureAction::for_command(&GenericCommand::direct_message("c", "hi", false)),
            None
        );
        assert_eq!(
            SignatureAction::for_command(&GenericCommand::session_close()),
            None
        );
    }

    #[tokio::test]
    async fn attaches_materials_for_signed_commands() {
        let signer = RecordingSigner::default();
        let mut command = GenericCommand::start_conversation(["bob"]);

        augment(&mut command, "alice", Some(&signer))
            .await
            .expect("augment should work");

        assert_eq!(command.peer_id.as_deref(), Some("alice"));
        let materials = command.signature.expect("signature should be attached");
        assert_eq!(materials.signature, "sig-StartConversation");
        assert_eq!(materials.nonce, "nonce-1");

        let requests = signer.requests.lock().expect("requests lock");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].client_id, "alice");
        assert_eq!(requests[0].member_ids, vec!["bob".to_owned()]);
    }

    #[tokio::test]
    async fn skips_signing_for_plain_commands_and_missing_provider() {
        let signer = RecordingSigner::default();
        let mut message = GenericCommand::direct_message("conv-1", "hi", false);
        augment(&mut message, "alice", Some(&signer))
            .await
            .expect("augment should work");
        assert!(message.signature.is_none());
        assert!(signer.requests.lock().expect("requests lock").is_empty());

        let mut open = GenericCommand::session_open();
        augment(&mut open, "alice", None)
            .await
            .expect("augment without provider should work");
        assert!(open.signature.is_none());
    }

    #[tokio::test]
    async fn provider_failure_becomes_signing_failed() {
        let mut command = GenericCommand::session_open();
        let err = augment(&mut command, "alice", Some(&FailingSigner))
            .await
            .expect_err("augment must fail");

        assert!(matches!(err, ImError::SigningFailed(_)));
        assert!(command.signature.is_none());
    }
}
