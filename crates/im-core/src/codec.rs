use crate::{error::CodecError, types::GenericCommand};

/// Serializer for the generic command envelope.
///
/// The wire format belongs to the codec; the session only moves opaque frames.
pub trait CommandCodec: Send + Sync {
    fn encode(&self, command: &GenericCommand) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, frame: &[u8]) -> Result<GenericCommand, CodecError>;
}

/// JSON codec, used by the loopback transport and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCommandCodec;

impl CommandCodec for JsonCommandCodec {
    fn encode(&self, command: &GenericCommand) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(command).map_err(|err| CodecError::Encode(err.to_string()))
    }

    fn decode(&self, frame: &[u8]) -> Result<GenericCommand, CodecError> {
        serde_json::from_slice(frame).map_err(|err| CodecError::Decode(err.to_string()))
    }
}
