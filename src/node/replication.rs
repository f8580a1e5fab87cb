//! Leader-side replication: per-peer AppendEntries rounds and commit-index
//! advancement.

use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::time::{sleep_until, Instant};

use crate::error::RaftError;
use crate::node::state::{NodeState, Role};
use crate::node::RaftNode;
use crate::rpc::AppendEntriesArgs;
use crate::transport::Transport;
use crate::NodeId;

/// Outcome of one peer's replication attempt within a round.
enum PeerRound {
    /// The peer acknowledged entries up to the leader's last index at send
    /// time.
    Acked,
    /// Transport failure or lost leadership; the peer is given up for this
    /// round and retried on the next tick.
    Aborted,
    /// The peer reported a term above ours; we adopted it and stepped down.
    SteppedDown,
    /// Store or log failure that the role loop must surface.
    Fatal(RaftError),
}

impl<T: Transport + 'static> RaftNode<T> {
    /// Run one replication round against every peer, bounded by `timeout`.
    ///
    /// Returns `Ok` once strictly more than half of the cluster (counting
    /// ourselves) has acknowledged, `CommitTimeout` at the deadline, and
    /// `NotLeader` if a response demoted us mid-round.
    pub(crate) async fn broadcast_append(&self, timeout: Duration) -> Result<(), RaftError> {
        let deadline = Instant::now() + timeout;
        {
            let mut st = self.inner.state.lock().await;
            if st.role != Role::Leader {
                return Err(RaftError::NotLeader {
                    leader_hint: st.leader_hint.clone(),
                });
            }
            // Our own log counts toward the majority; in particular this is
            // what commits entries in a single-node cluster.
            self.advance_commit_index(&mut st)?;
        }

        let majority = self.majority();
        let mut acks = 1usize;
        if acks >= majority {
            return Ok(());
        }

        let mut rounds: FuturesUnordered<_> = self
            .inner
            .peers
            .iter()
            .map(|peer| self.replicate_to(peer.clone(), deadline))
            .collect();

        loop {
            tokio::select! {
                _ = self.done() => return Err(RaftError::Stopped),
                _ = sleep_until(deadline) => return Err(RaftError::CommitTimeout),
                outcome = rounds.next() => match outcome {
                    Some(PeerRound::Acked) => {
                        acks += 1;
                        if acks >= majority {
                            return Ok(());
                        }
                    }
                    Some(PeerRound::SteppedDown) => {
                        let st = self.inner.state.lock().await;
                        return Err(RaftError::NotLeader {
                            leader_hint: st.leader_hint.clone(),
                        });
                    }
                    Some(PeerRound::Fatal(err)) => return Err(err),
                    Some(PeerRound::Aborted) => {}
                    // Every peer gave up below a majority; no point waiting
                    // out the deadline.
                    None => return Err(RaftError::CommitTimeout),
                }
            }
        }
    }

    /// Replicate to a single peer, retrying consistency rejections with a
    /// decremented `next_index` until acknowledged or out of time.
    async fn replicate_to(&self, peer: NodeId, deadline: Instant) -> PeerRound {
        loop {
            if Instant::now() >= deadline {
                return PeerRound::Aborted;
            }

            let (args, sent_up_to) = {
                let st = self.inner.state.lock().await;
                if st.role != Role::Leader {
                    return PeerRound::Aborted;
                }
                let Some(leader) = st.leader.as_ref() else {
                    return PeerRound::Aborted;
                };

                let next_index = leader.next_index.get(&peer).copied().unwrap_or(1);
                let prev_log_index = next_index - 1;
                let prev_log_term = match st.log.get(prev_log_index) {
                    Ok(Some(term)) => term,
                    Ok(None) => {
                        tracing::warn!(
                            id = %self.inner.id,
                            peer = %peer,
                            prev_log_index,
                            "next_index points past our log"
                        );
                        return PeerRound::Aborted;
                    }
                    Err(err) => return PeerRound::Fatal(err.into()),
                };

                let (last_index, last_term) = match st.log.last() {
                    Ok(last) => last,
                    Err(err) => return PeerRound::Fatal(err.into()),
                };

                // Entries from earlier terms are never replicated for
                // counting (Figure 8); the round degrades to a heartbeat
                // until a current-term entry exists.
                let entries = if last_term == st.current_term && last_index >= next_index {
                    match st.log.range_get(next_index - 1, last_index) {
                        Ok(entries) => entries,
                        Err(err) => return PeerRound::Fatal(err.into()),
                    }
                } else {
                    Vec::new()
                };

                let sent_up_to = prev_log_index + entries.len() as u64;
                let args = AppendEntriesArgs {
                    term: st.current_term,
                    leader_id: self.inner.id.clone(),
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit: st.commit_index,
                };
                (args, sent_up_to)
            };

            let result = match self.inner.transport.append_entries(&peer, args).await {
                Ok(result) => result,
                Err(err) => {
                    tracing::debug!(id = %self.inner.id, peer = %peer, %err, "append entries call failed");
                    return PeerRound::Aborted;
                }
            };

            let mut st = self.inner.state.lock().await;
            if result.term > st.current_term {
                tracing::info!(
                    id = %self.inner.id,
                    peer = %peer,
                    term = result.term,
                    "stepped down: append entries response carries higher term"
                );
                if let Err(err) = st.adopt_term(result.term) {
                    return PeerRound::Fatal(err.into());
                }
                self.nudge_step_down(result.term);
                return PeerRound::SteppedDown;
            }
            if st.role != Role::Leader {
                return PeerRound::Aborted;
            }

            if result.success {
                if let Some(leader) = st.leader.as_mut() {
                    leader.match_index.insert(peer.clone(), sent_up_to);
                    leader.next_index.insert(peer.clone(), sent_up_to + 1);
                }
                if let Err(err) = self.advance_commit_index(&mut st) {
                    return PeerRound::Fatal(err);
                }
                return PeerRound::Acked;
            }

            // Consistency rejection: back next_index off one entry (floor
            // 1) and retry within the round's deadline.
            if let Some(leader) = st.leader.as_mut() {
                let next_index = leader.next_index.get(&peer).copied().unwrap_or(1);
                leader
                    .next_index
                    .insert(peer.clone(), next_index.saturating_sub(1).max(1));
            }
        }
    }

    /// Advance `commit_index` to the largest index replicated on a
    /// majority, if that entry belongs to the current term.
    ///
    /// Entries from previous terms are never committed by counting
    /// replicas; they commit indirectly once a current-term entry does.
    pub(crate) fn advance_commit_index(&self, st: &mut NodeState) -> Result<(), RaftError> {
        let Some(leader) = st.leader.as_ref() else {
            return Ok(());
        };

        let (last_index, last_term) = st.log.last()?;
        if last_term != st.current_term {
            return Ok(());
        }

        let mut matched: Vec<u64> = leader.match_index.values().copied().collect();
        matched.push(last_index);
        matched.sort_unstable();
        // Largest index replicated on a strict majority of the cluster.
        let candidate = matched[(matched.len() - 1) / 2];

        if candidate <= st.commit_index {
            return Ok(());
        }
        if st.log.get(candidate)? != Some(st.current_term) {
            return Ok(());
        }

        tracing::debug!(
            id = %self.inner.id,
            term = st.current_term,
            commit_index = candidate,
            "commit index advanced"
        );
        st.commit_index = candidate;
        self.inner.apply_notify.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::config::RaftConfig;
    use crate::log::{LogEntry, MemoryLog};
    use crate::node::RaftNode;
    use crate::state_machine::TestStateMachine;
    use crate::store::MemoryStore;
    use crate::transport::inmemory::InMemoryTransport;
    use crate::NodeId;

    fn test_node(id: &str, peers: &[&str]) -> RaftNode<InMemoryTransport> {
        RaftNode::new(
            NodeId::from(id),
            peers.iter().map(|p| NodeId::from(*p)).collect(),
            Box::new(MemoryLog::new()),
            Box::new(MemoryStore::new()),
            Box::new(TestStateMachine::new()),
            InMemoryTransport::new(HashMap::new()),
            RaftConfig::default(),
        )
        .unwrap()
    }

    fn entry(term: u64, command: &str) -> LogEntry {
        LogEntry::new(term, command.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn never_commits_prior_term_entries_by_counting() {
        let node = test_node("l", &["a", "b"]);
        let peers = [NodeId::from("a"), NodeId::from("b")];
        let mut st = node.inner.state.lock().await;

        st.log.append(vec![entry(1, "old")]).unwrap();
        st.set_current_term(2).unwrap();
        st.become_leader(&NodeId::from("l"), &peers).unwrap();

        // The term-1 entry sits on every node, yet must not commit.
        let leader = st.leader.as_mut().unwrap();
        leader.match_index.insert(NodeId::from("a"), 1);
        leader.match_index.insert(NodeId::from("b"), 1);
        node.advance_commit_index(&mut st).unwrap();
        assert_eq!(st.commit_index, 0);

        // A replicated current-term entry commits, and the old one with it.
        st.log.append(vec![entry(2, "new")]).unwrap();
        st.leader
            .as_mut()
            .unwrap()
            .match_index
            .insert(NodeId::from("a"), 2);
        node.advance_commit_index(&mut st).unwrap();
        assert_eq!(st.commit_index, 2);
    }

    #[tokio::test]
    async fn commit_is_the_majority_median() {
        let node = test_node("l", &["a", "b", "c", "d"]);
        let peers: Vec<NodeId> = ["a", "b", "c", "d"].iter().map(|p| NodeId::from(*p)).collect();
        let mut st = node.inner.state.lock().await;

        st.set_current_term(1).unwrap();
        st.log
            .append(vec![entry(1, "1"), entry(1, "2"), entry(1, "3"), entry(1, "4")])
            .unwrap();
        st.become_leader(&NodeId::from("l"), &peers).unwrap();

        // match: a=4, b=3, c=0, d=0; own last = 4 -> three of five hold 3.
        let leader = st.leader.as_mut().unwrap();
        leader.match_index.insert(NodeId::from("a"), 4);
        leader.match_index.insert(NodeId::from("b"), 3);
        node.advance_commit_index(&mut st).unwrap();
        assert_eq!(st.commit_index, 3);
    }

    #[tokio::test]
    async fn commit_index_is_monotonic_under_recalculation() {
        let node = test_node("l", &["a", "b"]);
        let peers = [NodeId::from("a"), NodeId::from("b")];
        let mut st = node.inner.state.lock().await;

        st.set_current_term(1).unwrap();
        st.log.append(vec![entry(1, "1"), entry(1, "2")]).unwrap();
        st.become_leader(&NodeId::from("l"), &peers).unwrap();
        let leader = st.leader.as_mut().unwrap();
        leader.match_index.insert(NodeId::from("a"), 2);
        leader.match_index.insert(NodeId::from("b"), 2);
        node.advance_commit_index(&mut st).unwrap();
        assert_eq!(st.commit_index, 2);

        // A stale recalculation with lower match values changes nothing.
        let leader = st.leader.as_mut().unwrap();
        leader.match_index.insert(NodeId::from("a"), 1);
        leader.match_index.insert(NodeId::from("b"), 1);
        node.advance_commit_index(&mut st).unwrap();
        assert_eq!(st.commit_index, 2);
    }

    #[tokio::test]
    async fn commit_times_out_without_a_majority() {
        use crate::error::RaftError;

        // Peers the transport has no route to: every round aborts.
        let node = test_node("l", &["a", "b"]);
        {
            let mut st = node.inner.state.lock().await;
            st.set_current_term(1).unwrap();
            st.become_leader(&NodeId::from("l"), &[NodeId::from("a"), NodeId::from("b")])
                .unwrap();
            st.log.append(vec![entry(1, "lonely")]).unwrap();
        }

        let err = node
            .broadcast_append(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, RaftError::CommitTimeout);
        assert_eq!(node.commit_index().await, 0);
    }

    #[tokio::test]
    async fn single_node_cluster_commits_on_its_own() {
        let node = test_node("solo", &[]);
        {
            let mut st = node.inner.state.lock().await;
            st.set_current_term(1).unwrap();
            st.become_leader(&NodeId::from("solo"), &[]).unwrap();
            st.log.append(vec![entry(1, "only")]).unwrap();
        }

        node.broadcast_append(Duration::from_millis(10)).await.unwrap();
        assert_eq!(node.commit_index().await, 1);
    }
}
