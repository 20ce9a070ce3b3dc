use thiserror::Error;

use crate::handler::Tag;

/// Failure taxonomy for the Synergy side of the bridge.
///
/// Everything here is fatal to the connection: the server is either gone or
/// we can no longer trust our position in its byte stream. Recoverable
/// conditions (unknown tags, skipped clipboard payloads, serial hiccups) are
/// logged where they happen and never surface as an error.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("server closed the connection")]
    Disconnected,

    #[error("{len} byte payload exceeds the protocol limit")]
    Oversize { len: usize },

    #[error("malformed greeting: {0}")]
    BadGreeting(&'static str),

    #[error("{tag}: payload length does not match the message")]
    Malformed { tag: Tag },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
