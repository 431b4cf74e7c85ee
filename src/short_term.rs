use crate::message::Message;

/// Working buffer for the current conversation. Messages are never silently
/// evicted — `max_size` is an emergency cap and `is_full()` an advisory
/// signal for the compression policy; appends past the cap still succeed.
#[derive(Debug)]
pub struct ShortTermBuffer {
    max_size: usize,
    messages: Vec<Message>,
}

impl ShortTermBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            messages: Vec::new(),
        }
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Ordered view, oldest to newest.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Drop and return the first `count` messages (oldest). Used after
    /// compression to remove exactly the snapshot that was summarized.
    pub fn remove_first(&mut self, count: usize) -> Vec<Message> {
        let count = count.min(self.messages.len());
        self.messages.drain(..count).collect()
    }

    /// Drop the last `count` messages (newest). Used for rollback only.
    pub fn remove_last(&mut self, count: usize) {
        let count = count.min(self.messages.len());
        self.messages.truncate(self.messages.len() - count);
    }

    /// Empty the buffer and return everything it held.
    pub fn clear(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.messages)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// True at or above the emergency cap.
    pub fn is_full(&self) -> bool {
        self.messages.len() >= self.max_size
    }
}
