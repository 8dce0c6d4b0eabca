//! Shared key buffer.

use crate::input::types::KeyEvent;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::VecDeque;

/// Maximum number of presses held in the channel and in the buffer.
const CAPACITY: usize = 1_024;

/// Producer handle for the key buffer.
#[derive(Debug, Clone)]
pub struct KeySender {
    sender: Sender<KeyEvent>,
}

impl KeySender {
    /// Deliver a press. Returns `false` when the buffer is full or gone.
    pub fn send(&self, event: KeyEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("key buffer full, dropping key press");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Deliver a press of `key` captured now.
    pub fn press(&self, key: &str) -> bool {
        self.send(KeyEvent::new(key))
    }
}

/// Buffer of key presses not yet consumed.
///
/// Reading by key list removes and returns only matching presses; other
/// presses stay buffered for later readers.
#[derive(Debug)]
pub struct Keyboard {
    sender: Sender<KeyEvent>,
    receiver: Receiver<KeyEvent>,
    pending: VecDeque<KeyEvent>,
}

impl Keyboard {
    pub fn new() -> Self {
        // Bounded so a stuck reader cannot grow memory without limit
        let (sender, receiver) = bounded(CAPACITY);
        Self {
            sender,
            receiver,
            pending: VecDeque::new(),
        }
    }

    /// A new producer handle for this buffer.
    pub fn sender(&self) -> KeySender {
        KeySender {
            sender: self.sender.clone(),
        }
    }

    fn drain_channel(&mut self) {
        while let Ok(event) = self.receiver.try_recv() {
            if self.pending.len() == CAPACITY {
                self.pending.pop_front();
            }
            self.pending.push_back(event);
        }
    }

    /// Remove and return buffered presses whose key is in `keys`, oldest first.
    pub fn get_keys<S: AsRef<str>>(&mut self, keys: &[S]) -> Vec<KeyEvent> {
        self.drain_channel();
        let mut matched = Vec::new();
        self.pending.retain(|event| {
            if event.matches(keys) {
                matched.push(event.clone());
                false
            } else {
                true
            }
        });
        matched
    }

    /// Remove and return the oldest buffered press whose key is in `keys`.
    pub fn take_first<S: AsRef<str>>(&mut self, keys: &[S]) -> Option<KeyEvent> {
        self.drain_channel();
        let pos = self.pending.iter().position(|event| event.matches(keys))?;
        self.pending.remove(pos)
    }

    /// Remove and return every buffered press.
    pub fn get_all(&mut self) -> Vec<KeyEvent> {
        self.drain_channel();
        self.pending.drain(..).collect()
    }

    /// Whether a press of any of `keys` is waiting, without consuming it.
    pub fn has_key<S: AsRef<str>>(&mut self, keys: &[S]) -> bool {
        self.drain_channel();
        self.pending.iter().any(|event| event.matches(keys))
    }

    /// Drop every buffered press.
    pub fn clear(&mut self) {
        self.drain_channel();
        self.pending.clear();
    }

    pub fn len(&mut self) -> usize {
        self.drain_channel();
        self.pending.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }
}

impl Default for Keyboard {
    fn default() -> Self {
        Self::new()
    }
}
