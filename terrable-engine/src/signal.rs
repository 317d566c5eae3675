//! Completion signaling
//!
//! Every execution context owns one single-fire completion channel. The
//! `complete()` function injected into the context holds the sending half;
//! the engine polls the receiving half after each JavaScript turn and, once
//! it fired, prints the completion marker and rotates the context.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use terrable_core::COMPLETION_MARKER;
use tokio::sync::oneshot;
use tracing::debug;

use crate::output::{Output, Stream};

/// Sending half, bound to one context generation
#[derive(Debug, Clone)]
pub struct CompletionTrigger {
    generation: u64,
    sender: Rc<RefCell<Option<oneshot::Sender<u64>>>>,
}

/// Receiving half, owned by the context
#[derive(Debug)]
pub struct CompletionSignal {
    generation: u64,
    receiver: oneshot::Receiver<u64>,
    fired: bool,
}

/// Create the completion channel for one context
pub fn completion_channel(generation: u64) -> (CompletionTrigger, CompletionSignal) {
    let (sender, receiver) = oneshot::channel();
    (
        CompletionTrigger {
            generation,
            sender: Rc::new(RefCell::new(Some(sender))),
        },
        CompletionSignal {
            generation,
            receiver,
            fired: false,
        },
    )
}

impl CompletionTrigger {
    /// Fire the trigger. Returns `false` for repeated calls and for triggers
    /// whose context has already been discarded.
    pub fn fire(&self) -> bool {
        let Some(sender) = self.sender.borrow_mut().take() else {
            debug!(generation = self.generation, "Ignoring repeated completion");
            return false;
        };

        if sender.send(self.generation).is_err() {
            debug!(generation = self.generation, "Ignoring completion from discarded context");
            return false;
        }

        true
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl CompletionSignal {
    /// Whether this context's trigger has fired
    pub fn has_fired(&mut self) -> bool {
        if !self.fired {
            if let Ok(generation) = self.receiver.try_recv() {
                self.fired = generation == self.generation;
            }
        }
        self.fired
    }
}

/// Print the completion marker on its own control line
pub fn emit_completion(output: &Output) -> io::Result<()> {
    output.line(Stream::Control, COMPLETION_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::SharedBuffer;

    #[test]
    fn test_trigger_fires_once() {
        let (trigger, mut signal) = completion_channel(7);
        assert!(!signal.has_fired());

        assert!(trigger.fire());
        assert!(!trigger.fire());
        assert!(!trigger.clone().fire());

        assert!(signal.has_fired());
        // stays fired after the channel is drained
        assert!(signal.has_fired());
    }

    #[test]
    fn test_stale_trigger_is_ignored() {
        let (stale, signal) = completion_channel(1);
        drop(signal);

        let (_fresh, mut current) = completion_channel(2);
        assert!(!stale.fire());
        assert!(!current.has_fired());
        assert_eq!(stale.generation(), 1);
    }

    #[test]
    fn test_emit_completion() {
        let control = SharedBuffer::new();
        let output = Output::new(control.clone(), SharedBuffer::new());

        emit_completion(&output).unwrap();
        assert_eq!(control.contents(), "CODE_EXECUTION_COMPLETE\n");
    }
}
