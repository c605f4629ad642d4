use thiserror::Error;

use crate::core::{
    error::PipelineError,
    message::{HttpContent, PipelineMessage},
};

/// Failure writing to the client connection.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// The client went away before the write.
    #[error("connection closed")]
    ConnectionClosed,

    /// The response head was already sent for this exchange.
    #[error("response already committed")]
    AlreadyCommitted,

    /// The last body chunk was already written.
    #[error("response body already finished")]
    BodyFinished,

    /// The transport cannot carry this kind of message.
    #[error("unsupported message: {0}")]
    Unsupported(&'static str),
}

/// Transport defines the port (interface) through which the final stage of
/// the pipeline hands messages and body chunks back to the client connection.
///
/// Implementations are bound to one exchange and live on its event loop.
pub trait Transport {
    /// Whether the client connection can still accept writes.
    fn is_active(&self) -> bool;

    /// Write a whole message (head plus any buffered body).
    fn write_message(&self, message: PipelineMessage) -> Result<(), TransportError>;

    /// Write one body chunk of a message already started.
    fn write_chunk(&self, chunk: HttpContent) -> Result<(), TransportError>;

    /// Report a failure that escaped the filter pipeline.
    fn exception_caught(&self, error: PipelineError);
}
