//! The three role run loops.
//!
//! Each loop blocks on its timer, the step-down fan-in and the stop signal,
//! and returns the next role to install. The supervisor
//! (`RaftNode::role_loop`) loops installing whatever comes back.

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};

use crate::error::RaftError;
use crate::node::state::Role;
use crate::node::RaftNode;
use crate::rpc::RequestVoteArgs;
use crate::transport::Transport;

impl<T: Transport + 'static> RaftNode<T> {
    /// Follower: wait for leader contact; on election timeout, stand for
    /// election.
    ///
    /// Handlers refresh `last_heartbeat` on valid leader contact and vote
    /// grants; the loop just sleeps until the deadline computed from it and
    /// re-checks on wake, so a refresh that happened mid-sleep is not an
    /// expiry.
    pub(crate) async fn run_follower(
        &self,
        step_down: &mut mpsc::Receiver<u64>,
    ) -> Result<Role, RaftError> {
        {
            let mut st = self.inner.state.lock().await;
            st.step_down();
            st.last_heartbeat = Instant::now();
        }

        loop {
            // A fresh draw per reset keeps rival followers from timing out
            // in lockstep.
            let timeout = self.inner.config.random_election_timeout();
            let deadline = { self.inner.state.lock().await.last_heartbeat + timeout };
            tokio::select! {
                _ = self.done() => return Err(RaftError::Stopped),
                Some(_) = step_down.recv() => {
                    // Already a follower; the handler adopted the term.
                }
                _ = sleep_until(deadline) => {
                    let st = self.inner.state.lock().await;
                    if st.last_heartbeat + timeout <= Instant::now() {
                        tracing::info!(
                            id = %self.inner.id,
                            term = st.current_term,
                            "election timeout, converting to candidate"
                        );
                        return Ok(Role::Candidate);
                    }
                }
            }
        }
    }

    /// Candidate: start an election per timeout round until one of us wins
    /// or a leader emerges.
    pub(crate) async fn run_candidate(
        &self,
        step_down: &mut mpsc::Receiver<u64>,
    ) -> Result<Role, RaftError> {
        loop {
            // On conversion (and on every re-election): increment the term,
            // vote for ourselves, reset the election timer.
            let args = {
                let mut st = self.inner.state.lock().await;
                if st.role == Role::Follower {
                    return Ok(Role::Follower);
                }
                let term = st.current_term + 1;
                st.set_current_term(term)?;
                st.set_voted_for(Some(self.inner.id.clone()))?;
                st.role = Role::Candidate;
                st.leader = None;
                st.leader_hint = None;
                st.last_heartbeat = Instant::now();
                let (last_log_index, last_log_term) = st.log.last()?;
                RequestVoteArgs {
                    term,
                    candidate_id: self.inner.id.clone(),
                    last_log_index,
                    last_log_term,
                }
            };
            let term = args.term;
            tracing::info!(id = %self.inner.id, term, "starting election");

            let deadline = Instant::now() + self.inner.config.random_election_timeout();
            let majority = self.majority();
            let mut votes = 1usize; // our own

            if votes >= majority {
                let mut st = self.inner.state.lock().await;
                st.become_leader(&self.inner.id, &self.inner.peers)?;
                return Ok(Role::Leader);
            }

            let mut ballots: FuturesUnordered<_> = self
                .inner
                .peers
                .iter()
                .map(|peer| {
                    let args = args.clone();
                    async move { self.inner.transport.request_vote(peer, args).await }
                })
                .collect();

            loop {
                tokio::select! {
                    _ = self.done() => return Err(RaftError::Stopped),
                    Some(_) = step_down.recv() => {
                        if self.inner.state.lock().await.role == Role::Follower {
                            return Ok(Role::Follower);
                        }
                    }
                    _ = sleep_until(deadline) => break, // re-elect with the next term
                    ballot = ballots.next(), if !ballots.is_empty() => {
                        let Some(ballot) = ballot else { continue };
                        let result = match ballot {
                            Ok(result) => result,
                            Err(err) => {
                                tracing::debug!(id = %self.inner.id, term, %err, "vote request failed");
                                continue;
                            }
                        };

                        let mut st = self.inner.state.lock().await;
                        if result.term > st.current_term {
                            tracing::info!(
                                id = %self.inner.id,
                                term = result.term,
                                "stepped down: vote response carries higher term"
                            );
                            st.adopt_term(result.term)?;
                            return Ok(Role::Follower);
                        }
                        if st.role == Role::Follower {
                            return Ok(Role::Follower);
                        }
                        // Responses from a previous round are ignored.
                        if st.current_term == term && result.vote_granted {
                            votes += 1;
                            if votes >= majority {
                                tracing::info!(
                                    id = %self.inner.id,
                                    term,
                                    votes,
                                    "won election"
                                );
                                st.become_leader(&self.inner.id, &self.inner.peers)?;
                                return Ok(Role::Leader);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Leader: heartbeat rounds on a fixed ticker until a higher term
    /// appears.
    ///
    /// The ticker is created once per transition; unlike the other roles,
    /// incoming RPCs never reset a leader's timer. It yields only to a
    /// higher term.
    pub(crate) async fn run_leader(
        &self,
        step_down: &mut mpsc::Receiver<u64>,
    ) -> Result<Role, RaftError> {
        let heartbeat = self.inner.config.heartbeat_interval;
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately: the initial empty AppendEntries
        // announcing this leadership.

        loop {
            tokio::select! {
                _ = self.done() => return Err(RaftError::Stopped),
                Some(_) = step_down.recv() => {
                    if self.inner.state.lock().await.role == Role::Follower {
                        return Ok(Role::Follower);
                    }
                }
                _ = ticker.tick() => {
                    match self.broadcast_append(heartbeat / 2).await {
                        // A slow or partitioned majority is retried on the
                        // next tick.
                        Ok(()) | Err(RaftError::CommitTimeout) => {}
                        Err(RaftError::NotLeader { .. }) => return Ok(Role::Follower),
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }
}
