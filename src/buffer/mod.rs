//! Zero-copy message framing.
//!
//! The read side accumulates arbitrary transport chunks into logical
//! protocol frames without copying message payloads, the write side
//! emits length-prefixed frames into one reusable scratch buffer.
//!
//! - [`WriteBuffer`]
//! - [`WriteMessageBuffer`]
//! - [`ReadMessageBuffer`]
//! - [`ReadBuffer`]
mod read;
mod write;

pub use read::{ReadBuffer, ReadMessageBuffer, RING_CAPACITY};
pub use write::{WriteBuffer, WriteMessageBuffer};

/// An error in message framing or buffer cursor handling.
///
/// Any of these is fatal to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// A read primitive requested more bytes than the current frame holds.
    #[error("attempt to read past the end of the buffer")]
    Overread,
    /// A frame declared a length smaller than the length field itself.
    #[error("malformed frame length")]
    InvalidFrame,
    /// Operation requires no message in progress.
    #[error("a message is already started")]
    MessageStarted,
    /// A typed write arrived with no open message.
    #[error("no message was started")]
    NoMessage,
    /// The pending message was not consumed to its end.
    #[error("the current message is not fully read")]
    MessageUnfinished,
    /// Cursor operation requires a fully buffered message.
    #[error("no message is currently pending")]
    NoPendingMessage,
}
