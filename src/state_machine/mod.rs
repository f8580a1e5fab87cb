//! The user state machine driven by the apply loop.
//!
//! Raft only decides the order of commands; what they mean is up to the
//! application. Implementations must be deterministic: applying the same
//! commands in the same order must produce the same state on every node.

use std::sync::{Arc, Mutex};

use crate::log::Command;

/// Application state machine fed by the apply loop.
pub trait StateMachine: Send {
    /// Apply a batch of committed commands in order.
    ///
    /// Returns how many of them were applied; a count short of
    /// `commands.len()` indicates partial progress and the remainder is
    /// retried on the next pass. Errors are logged by the apply loop and
    /// the whole batch retried later.
    fn apply(&mut self, commands: &[Command]) -> Result<usize, String>;
}

/// Shared record of applied commands for inspection in tests.
pub type AppliedCommands = Arc<Mutex<Vec<Command>>>;

/// Test state machine that records every applied command to a shared vec.
pub struct TestStateMachine {
    applied: AppliedCommands,
}

impl TestStateMachine {
    pub fn new() -> Self {
        TestStateMachine {
            applied: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create with a shared vec so tests can inspect applies from outside.
    pub fn new_shared(applied: AppliedCommands) -> Self {
        TestStateMachine { applied }
    }
}

impl Default for TestStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine for TestStateMachine {
    fn apply(&mut self, commands: &[Command]) -> Result<usize, String> {
        self.applied.lock().unwrap().extend(commands.iter().cloned());
        Ok(commands.len())
    }
}
