use std::{collections::HashSet, collections::VecDeque, hash::Hash};

use anyhow::{Result, bail};
use tokio::sync::mpsc::{UnboundedReceiver, error::TryRecvError};

/// A receiver that drops pending messages which are superseded by a later message with the same
/// key.
#[derive(Debug)]
pub struct CoalescingReceiver<T: CoalescingKey> {
    receiver: UnboundedReceiver<T>,
    pending: VecDeque<T>,
}

pub trait CoalescingKey {
    type Key: Eq + Hash;

    /// `None` marks a message that is never dropped.
    fn coalescing_key(&self) -> Option<Self::Key>;
}

impl<T: CoalescingKey> From<UnboundedReceiver<T>> for CoalescingReceiver<T> {
    fn from(receiver: UnboundedReceiver<T>) -> Self {
        Self::new(receiver)
    }
}

impl<T: CoalescingKey> CoalescingReceiver<T> {
    pub fn new(receiver: UnboundedReceiver<T>) -> Self {
        Self {
            receiver,
            pending: VecDeque::new(),
        }
    }

    /// Receives a message and returns an error when the sender disconnects.
    ///
    /// Messages that are already queued when the sender disconnects are still delivered.
    pub async fn recv(&mut self) -> Result<T> {
        loop {
            // Pull in every message we can get.
            let mut disconnected = false;
            loop {
                match self.receiver.try_recv() {
                    Ok(message) => self.pending.push_back(message),
                    Err(TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                    Err(TryRecvError::Empty) => {
                        break;
                    }
                }
            }

            // Robustness: Going from VecDeque to Vec and back is a mess.
            {
                let messages: Vec<T> =
                    keep_last_per_key(self.pending.drain(..).collect(), |m| m.coalescing_key());
                self.pending = messages.into();
            }

            if let Some(pending) = self.pending.pop_front() {
                return Ok(pending);
            }

            if disconnected {
                bail!("Sender disconnected");
            }

            // Nothing there yet, now we wait.
            if let Some(message) = self.receiver.recv().await {
                self.pending.push_back(message);
            } else {
                bail!("Sender disconnected");
            }
        }
    }
}

/// Keeps only the latest message per key, preserving the original order of the remaining
/// messages.
pub fn keep_last_per_key<Msg, Key: Eq + Hash>(
    messages: Vec<Msg>,
    mut get_key: impl FnMut(&Msg) -> Option<Key>,
) -> Vec<Msg> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(messages.len());
    for msg in messages.into_iter().rev() {
        match get_key(&msg) {
            Some(key) => {
                if seen.insert(key) {
                    out.push(msg);
                }
            }
            None => out.push(msg),
        }
    }
    out.reverse(); // restore original order
    out
}
