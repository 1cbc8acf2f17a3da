//! Replaying fan-out channel for one active discovery period
//!
//! Every item published during the period is kept so that outputs attached
//! later receive the full sequence before anything new. The channel itself
//! is not synchronised; the session mutates it under its own lock, which is
//! what makes attach-and-replay atomic with respect to publishing.

use crate::error::{DiscoveryError, Result};
use tokio::sync::mpsc::UnboundedSender;

/// Sender half of one subscriber's output
pub(crate) type Output<T> = UnboundedSender<Result<T>>;

#[derive(Debug)]
pub(crate) struct ReplayChannel<T> {
    history: Vec<T>,
    outputs: Vec<(u64, Output<T>)>,
}

impl<T: Clone> ReplayChannel<T> {
    pub(crate) fn new() -> Self {
        Self {
            history: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Register an output and replay the history into it
    pub(crate) fn subscribe(&mut self, id: u64, output: Output<T>) {
        for item in &self.history {
            if output.send(Ok(item.clone())).is_err() {
                return;
            }
        }
        self.outputs.push((id, output));
    }

    /// Remove an output; returns whether it was still registered
    pub(crate) fn unsubscribe(&mut self, id: u64) -> bool {
        let before = self.outputs.len();
        self.outputs.retain(|(output_id, _)| *output_id != id);
        self.outputs.len() != before
    }

    /// Append an item to the history and send it to every live output
    pub(crate) fn publish(&mut self, item: T) {
        self.outputs
            .retain(|(_, output)| output.send(Ok(item.clone())).is_ok());
        self.history.push(item);
    }

    /// Deliver `error` to every output and close them all
    pub(crate) fn fail(self, error: DiscoveryError) {
        for (_, output) in self.outputs {
            let _ = output.send(Err(error.clone()));
        }
    }

    /// Close every output without an error
    pub(crate) fn complete(self) {}

    pub(crate) fn history_len(&self) -> usize {
        self.history.len()
    }

    pub(crate) fn output_count(&self) -> usize {
        self.outputs.len()
    }
}
