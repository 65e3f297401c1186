//! Outbound command queue.
//!
//! FIFO buffer for commands issued while the link is not open. Drained
//! front-to-back on reconnect. Capped: when full, the oldest entry is
//! dropped and returned so the caller can log it - unbounded growth during
//! a long outage would otherwise eat memory.

use std::collections::VecDeque;

use crate::protocol::ClientCommand;

#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<ClientCommand>,
    cap: usize,
}

impl OutboundQueue {
    pub fn new(cap: usize) -> Self {
        Self {
            items: VecDeque::new(),
            cap,
        }
    }

    /// Appends a command. Returns the dropped oldest entry if the queue was
    /// at capacity.
    pub fn push(&mut self, command: ClientCommand) -> Option<ClientCommand> {
        let dropped = if self.cap > 0 && self.items.len() >= self.cap {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(command);
        dropped
    }

    pub fn front(&self) -> Option<&ClientCommand> {
        self.items.front()
    }

    pub fn pop_front(&mut self) -> Option<ClientCommand> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
