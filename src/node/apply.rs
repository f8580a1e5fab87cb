//! The apply loop: drives committed entries into the user state machine.

use crate::log::Command;
use crate::node::RaftNode;
use crate::transport::Transport;

impl<T: Transport + 'static> RaftNode<T> {
    /// Single worker advancing `last_applied` toward `commit_index`,
    /// invoking the user state machine with committed commands in strict
    /// index order, each at most once.
    ///
    /// Waits on the commit notification; both indexes are re-read from
    /// shared state on every pass, so running a pass with no new commits is
    /// a no-op. Apply errors are logged and the batch retried on the next
    /// signal.
    pub(crate) async fn apply_loop(self) {
        loop {
            self.apply_committed().await;
            tokio::select! {
                _ = self.done() => return,
                _ = self.inner.apply_notify.notified() => {}
            }
        }
    }

    async fn apply_committed(&self) {
        loop {
            let (commands, applied_through) = {
                let st = self.inner.state.lock().await;
                if st.last_applied >= st.commit_index {
                    return;
                }
                let entries = match st.log.range_get(st.last_applied, st.commit_index) {
                    Ok(entries) => entries,
                    Err(err) => {
                        tracing::warn!(id = %self.inner.id, %err, "apply: reading committed entries failed");
                        return;
                    }
                };
                if entries.is_empty() {
                    return;
                }
                let commands: Vec<Command> =
                    entries.into_iter().map(|entry| entry.command).collect();
                (commands, st.last_applied)
            };

            // The consensus lock is not held across the user callback.
            let applied = {
                let mut machine = self.inner.state_machine.lock().await;
                match machine.apply(&commands) {
                    Ok(applied) => applied.min(commands.len()),
                    Err(err) => {
                        tracing::warn!(id = %self.inner.id, %err, "state machine apply failed");
                        return;
                    }
                }
            };
            if applied == 0 {
                return;
            }

            // Only this task writes last_applied.
            let mut st = self.inner.state.lock().await;
            st.last_applied = applied_through + applied as u64;
            tracing::debug!(
                id = %self.inner.id,
                last_applied = st.last_applied,
                "applied committed entries"
            );
        }
    }
}
