/// An in-memory [`Store`] — the default backend, and the one the test
/// suite runs against. Logs live exactly as long as the process.
use std::collections::HashMap;

use super::{ChannelLog, EmptyCursor, LogCursor, Store, StoreError};
use crate::irc::message::Message;

#[derive(Debug, Default)]
pub struct MemoryStore {
    channels: HashMap<String, MemoryLog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn channel(&mut self, name: &str) -> Result<&mut dyn ChannelLog, StoreError> {
        Ok(self.channels.entry(name.to_owned()).or_default())
    }
}

#[derive(Debug, Default)]
struct MemoryLog {
    messages: Vec<Message>,
}

impl ChannelLog for MemoryLog {
    fn append(&mut self, msg: &Message) -> Result<(), StoreError> {
        self.messages.push(msg.clone());
        Ok(())
    }

    fn replay(&mut self) -> Result<Box<dyn LogCursor>, StoreError> {
        if self.messages.is_empty() {
            return Ok(Box::new(EmptyCursor));
        }
        // The cursor owns a snapshot, so appends and clears that happen
        // while a replay is in flight leave the cursor's view intact.
        Ok(Box::new(MemoryCursor {
            messages: self.messages.clone(),
            pos: 0,
        }))
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.messages.clear();
        Ok(())
    }
}

struct MemoryCursor {
    messages: Vec<Message>,
    pos: usize,
}

impl LogCursor for MemoryCursor {
    fn get(&mut self) -> Result<Option<Message>, StoreError> {
        Ok(self.messages.get(self.pos).cloned())
    }

    fn next(&mut self) {
        self.pos += 1;
    }
}
