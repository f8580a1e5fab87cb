//! Server side of the two Raft RPCs.
//!
//! Both handlers apply the term-adoption rule first: any request carrying a
//! term above ours moves us to follower of that term before the
//! request-specific checks run. State that a reply depends on is persisted
//! before the reply is returned.

use tokio::time::Instant;

use crate::error::RaftError;
use crate::node::state::Role;
use crate::node::RaftNode;
use crate::rpc::{AppendEntriesArgs, AppendEntriesResult, RequestVoteArgs, RequestVoteResult};
use crate::transport::Transport;

impl<T: Transport + 'static> RaftNode<T> {
    /// Handle an incoming RequestVote RPC.
    pub async fn request_vote(
        &self,
        args: RequestVoteArgs,
    ) -> Result<RequestVoteResult, RaftError> {
        let mut st = self.inner.state.lock().await;

        if args.term < st.current_term {
            return Ok(RequestVoteResult {
                term: st.current_term,
                vote_granted: false,
            });
        }

        if args.term > st.current_term {
            let was = st.role;
            st.adopt_term(args.term)?;
            if was != Role::Follower {
                tracing::info!(
                    id = %self.inner.id,
                    term = args.term,
                    was = %was,
                    "stepped down: vote request carries higher term"
                );
                self.nudge_step_down(args.term);
            }
        }

        // One grant per term: free, or already granted to this candidate.
        let available = match &st.voted_for {
            None => true,
            Some(candidate) => *candidate == args.candidate_id,
        };

        // Candidate's log must be at least as up-to-date as ours, compared
        // by (last term, last index).
        let (last_index, last_term) = st.log.last()?;
        let up_to_date = (args.last_log_term, args.last_log_index) >= (last_term, last_index);

        let vote_granted = available && up_to_date;
        if vote_granted {
            st.set_voted_for(Some(args.candidate_id.clone()))?;
            st.last_heartbeat = Instant::now();
            tracing::debug!(
                id = %self.inner.id,
                term = st.current_term,
                candidate = %args.candidate_id,
                "vote granted"
            );
        }

        Ok(RequestVoteResult {
            term: st.current_term,
            vote_granted,
        })
    }

    /// Handle an incoming AppendEntries RPC (replication or heartbeat).
    pub async fn append_entries(
        &self,
        args: AppendEntriesArgs,
    ) -> Result<AppendEntriesResult, RaftError> {
        let mut st = self.inner.state.lock().await;

        if args.term < st.current_term {
            return Ok(AppendEntriesResult {
                term: st.current_term,
                success: false,
            });
        }

        if args.term > st.current_term {
            let was = st.role;
            st.adopt_term(args.term)?;
            if was != Role::Follower {
                tracing::info!(
                    id = %self.inner.id,
                    term = args.term,
                    was = %was,
                    leader = %args.leader_id,
                    "stepped down: append entries carries higher term"
                );
                self.nudge_step_down(args.term);
            }
        }

        // Election Safety makes a same-term rival leader impossible; never
        // let anything truncate our log while we are the one leading.
        if st.role == Role::Leader {
            return Ok(AppendEntriesResult {
                term: st.current_term,
                success: false,
            });
        }

        // A candidate that hears from the elected leader of its term
        // abandons the election.
        if st.role == Role::Candidate {
            st.step_down();
            self.nudge_step_down(args.term);
        }

        st.leader_hint = Some(args.leader_id.clone());
        st.last_heartbeat = Instant::now();

        // Log consistency: we must hold the entry the new ones hang off.
        if !st.log.matches(args.prev_log_index, args.prev_log_term)? {
            tracing::debug!(
                id = %self.inner.id,
                term = st.current_term,
                prev_log_index = args.prev_log_index,
                prev_log_term = args.prev_log_term,
                "append entries rejected: log mismatch"
            );
            return Ok(AppendEntriesResult {
                term: st.current_term,
                success: false,
            });
        }

        // Truncate any conflicting suffix and append the new entries.
        st.log.append_at(args.prev_log_index, args.entries)?;

        if args.leader_commit > st.commit_index {
            let (last_index, _) = st.log.last()?;
            st.commit_index = args.leader_commit.min(last_index);
            self.inner.apply_notify.notify_one();
        }

        Ok(AppendEntriesResult {
            term: st.current_term,
            success: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::config::RaftConfig;
    use crate::error::RaftError;
    use crate::log::{LogEntry, MemoryLog};
    use crate::node::RaftNode;
    use crate::rpc::{AppendEntriesArgs, RequestVoteArgs};
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

    fn entry(index: u64, term: u64, command: &str) -> LogEntry {
        LogEntry {
            index,
            ..LogEntry::new(term, command.as_bytes().to_vec())
        }
    }

    fn vote_args(term: u64, candidate: &str, last_index: u64, last_term: u64) -> RequestVoteArgs {
        RequestVoteArgs {
            term,
            candidate_id: NodeId::from(candidate),
            last_log_index: last_index,
            last_log_term: last_term,
        }
    }

    fn append_args(
        term: u64,
        leader: &str,
        prev_index: u64,
        prev_term: u64,
        entries: Vec<LogEntry>,
        commit: u64,
    ) -> AppendEntriesArgs {
        AppendEntriesArgs {
            term,
            leader_id: NodeId::from(leader),
            prev_log_index: prev_index,
            prev_log_term: prev_term,
            entries,
            leader_commit: commit,
        }
    }

    #[tokio::test]
    async fn grants_vote_and_persists_it() {
        let node = test_node("a", &["b", "c"]);

        let result = node.request_vote(vote_args(1, "b", 0, 0)).await.unwrap();
        assert!(result.vote_granted);
        assert_eq!(result.term, 1);
        assert_eq!(node.voted_for().await, Some(NodeId::from("b")));
        assert_eq!(node.current_term().await, 1);
    }

    #[tokio::test]
    async fn rejects_vote_from_stale_term() {
        let node = test_node("a", &["b", "c"]);
        node.append_entries(append_args(3, "b", 0, 0, vec![], 0))
            .await
            .unwrap();

        let result = node.request_vote(vote_args(2, "c", 0, 0)).await.unwrap();
        assert!(!result.vote_granted);
        assert_eq!(result.term, 3);
    }

    #[tokio::test]
    async fn one_grant_per_term() {
        let node = test_node("a", &["b", "c"]);

        assert!(node.request_vote(vote_args(1, "b", 0, 0)).await.unwrap().vote_granted);
        // A rival in the same term is refused...
        assert!(!node.request_vote(vote_args(1, "c", 0, 0)).await.unwrap().vote_granted);
        // ...but the original grantee may ask again.
        assert!(node.request_vote(vote_args(1, "b", 0, 0)).await.unwrap().vote_granted);
    }

    #[tokio::test]
    async fn higher_term_clears_previous_vote() {
        let node = test_node("a", &["b", "c"]);
        assert!(node.request_vote(vote_args(1, "b", 0, 0)).await.unwrap().vote_granted);

        // Term 2 starts fresh: the grant to "b" does not bind it.
        assert!(node.request_vote(vote_args(2, "c", 0, 0)).await.unwrap().vote_granted);
        assert_eq!(node.voted_for().await, Some(NodeId::from("c")));
        assert_eq!(node.current_term().await, 2);
    }

    #[tokio::test]
    async fn rejects_vote_from_out_of_date_log() {
        let node = test_node("a", &["b", "c"]);
        node.append_entries(append_args(
            2,
            "b",
            0,
            0,
            vec![entry(1, 1, "x"), entry(2, 2, "y")],
            0,
        ))
        .await
        .unwrap();

        // Lower last term.
        assert!(!node.request_vote(vote_args(3, "c", 5, 1)).await.unwrap().vote_granted);
        // Equal last term, shorter log.
        assert!(!node.request_vote(vote_args(3, "c", 1, 2)).await.unwrap().vote_granted);
        // At least as up-to-date.
        assert!(node.request_vote(vote_args(3, "c", 2, 2)).await.unwrap().vote_granted);
    }

    #[tokio::test]
    async fn append_rejects_stale_term() {
        let node = test_node("a", &["b", "c"]);
        node.append_entries(append_args(2, "b", 0, 0, vec![], 0))
            .await
            .unwrap();

        let result = node
            .append_entries(append_args(1, "c", 0, 0, vec![], 0))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.term, 2);
    }

    #[tokio::test]
    async fn append_records_leader_for_redirects() {
        let node = test_node("a", &["b", "c"]);
        node.append_entries(append_args(1, "b", 0, 0, vec![], 0))
            .await
            .unwrap();

        let err = node.handle(vec![b"cmd".to_vec()]).await.unwrap_err();
        assert_eq!(
            err,
            RaftError::NotLeader {
                leader_hint: Some(NodeId::from("b"))
            }
        );
    }

    #[tokio::test]
    async fn append_rejects_log_mismatch() {
        let node = test_node("a", &["b", "c"]);

        // Empty log has nothing at index 1.
        let result = node
            .append_entries(append_args(1, "b", 1, 1, vec![entry(2, 1, "y")], 0))
            .await
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn append_truncates_conflicting_suffix() {
        let node = test_node("a", &["b", "c"]);
        node.append_entries(append_args(
            1,
            "b",
            0,
            0,
            vec![entry(1, 1, "x"), entry(2, 1, "y")],
            0,
        ))
        .await
        .unwrap();

        // A new leader overwrites the unreplicated tail.
        let result = node
            .append_entries(append_args(2, "c", 1, 1, vec![entry(2, 2, "z")], 0))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(node.last_log().await.unwrap(), (2, 2));

        let entries = node.log_entries(1, 2).await.unwrap();
        assert_eq!(entries[0].command, b"z".to_vec());
    }

    #[tokio::test]
    async fn append_duplicate_delivery_is_idempotent() {
        let node = test_node("a", &["b", "c"]);
        let args = append_args(1, "b", 0, 0, vec![entry(1, 1, "x"), entry(2, 1, "y")], 0);

        assert!(node.append_entries(args.clone()).await.unwrap().success);
        assert!(node.append_entries(args).await.unwrap().success);
        assert_eq!(node.last_log().await.unwrap(), (2, 1));
    }

    #[tokio::test]
    async fn commit_index_follows_leader_capped_at_log_end() {
        let node = test_node("a", &["b", "c"]);
        node.append_entries(append_args(
            1,
            "b",
            0,
            0,
            vec![entry(1, 1, "x"), entry(2, 1, "y")],
            5,
        ))
        .await
        .unwrap();

        // min(leaderCommit, last new entry)
        assert_eq!(node.commit_index().await, 2);
    }

    #[tokio::test]
    async fn commit_index_never_regresses() {
        let node = test_node("a", &["b", "c"]);
        node.append_entries(append_args(
            1,
            "b",
            0,
            0,
            vec![entry(1, 1, "x"), entry(2, 1, "y")],
            2,
        ))
        .await
        .unwrap();
        assert_eq!(node.commit_index().await, 2);

        node.append_entries(append_args(1, "b", 2, 1, vec![], 1))
            .await
            .unwrap();
        assert_eq!(node.commit_index().await, 2);
    }

    #[tokio::test]
    async fn leader_never_truncates_its_own_log() {
        let node = test_node("l", &["b", "c"]);
        let peers = [NodeId::from("b"), NodeId::from("c")];
        {
            let mut st = node.inner.state.lock().await;
            st.set_current_term(2).unwrap();
            st.log
                .append(vec![LogEntry::new(2, b"mine".to_vec())])
                .unwrap();
            st.become_leader(&NodeId::from("l"), &peers).unwrap();
        }

        // A same-term rival cannot exist (Election Safety); if such a
        // request shows up anyway it must not touch our log.
        let result = node
            .append_entries(append_args(2, "b", 0, 0, vec![], 0))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(node.last_log().await.unwrap(), (1, 2));
        assert_eq!(node.role().await, crate::node::Role::Leader);
    }

    #[tokio::test]
    async fn terms_are_monotonic_across_handlers() {
        let node = test_node("a", &["b", "c"]);
        let mut seen = 0;
        for term in [1, 3, 2, 5, 4] {
            node.append_entries(append_args(term, "b", 0, 0, vec![], 0))
                .await
                .unwrap();
            let current = node.current_term().await;
            assert!(current >= seen);
            seen = current;
        }
        assert_eq!(seen, 5);
    }
}
