/// Interfaces to the message log.
///
/// The proxy must store messages while the user is disconnected; this
/// module defines the traits a storage backend implements. Within a
/// channel, replay order equals append order; no ordering is required
/// across channels, and no durability is promised. Implementations need
/// not be thread-safe — the store is only ever touched from the proxy's
/// event loop.
use crate::irc::message::Message;

pub mod memory;

/// A storage backend failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Backend-specific failure that is not a plain I/O error.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A data store for logged messages.
pub trait Store: Send {
    /// Get the log for the named channel, creating it if absent.
    fn channel(&mut self, name: &str) -> Result<&mut dyn ChannelLog, StoreError>;
}

/// A sequential log for a particular channel.
pub trait ChannelLog: Send {
    /// Append a message to the end of the log.
    fn append(&mut self, msg: &Message) -> Result<(), StoreError>;

    /// Replay the log. Returns a cursor pointing at the first message.
    fn replay(&mut self) -> Result<Box<dyn LogCursor>, StoreError>;

    /// Delete all of the messages in the log.
    fn clear(&mut self) -> Result<(), StoreError>;
}

/// A cursor into a channel log. Resources are released on drop.
pub trait LogCursor: Send {
    /// The message under the cursor, or `Ok(None)` once past the end.
    fn get(&mut self) -> Result<Option<Message>, StoreError>;

    /// Advance the cursor to the next message.
    fn next(&mut self);
}

/// A cursor over nothing: `get` always reports end-of-log.
pub struct EmptyCursor;

impl LogCursor for EmptyCursor {
    fn get(&mut self) -> Result<Option<Message>, StoreError> {
        Ok(None)
    }

    fn next(&mut self) {}
}
