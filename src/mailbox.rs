use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::messages::Message;

/// FIFO inbox of application messages.
///
/// Written by the coordinator's receive handler, read by the application.
#[derive(Debug, Default)]
pub struct Mailbox {
    messages: Mutex<VecDeque<Message>>,
    arrived: Notify,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    /// Pop the oldest message, if any
    pub fn take_message(&self) -> Option<Message> {
        self.queue().pop_front()
    }

    /// Wait until a message is available and pop it
    pub async fn recv(&self) -> Message {
        loop {
            let arrived = self.arrived.notified();
            if let Some(message) = self.take_message() {
                return message;
            }
            arrived.await;
        }
    }

    pub(crate) fn add_message(&self, message: Message) {
        self.queue().push_back(message);
        self.arrived.notify_waiters();
    }
}
