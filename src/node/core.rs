//! The event loop that owns and drives a node.
//!
//! All protocol state lives on one long-lived task. Every state has its
//! own loop iteration function that multiplexes exactly five sources:
//! inbound messages, membership events, the timeout timer, the periodic
//! ticker and the shutdown channel. Handlers and transitions all execute
//! on this task, strictly serialized; accessors observe the node through a
//! small shared mirror that only this task writes.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, Sleep};
use tracing::{debug, error, info, warn};

use crate::config::{self, Config, MAX_MISSED_PREVOTE_CYCLES, MAX_SUB_QUORUM_CYCLES, TICKER_INTERVAL_MS};
use crate::error::{RaftifyError, Result};
use crate::membership::{MemberEvent, Membership};
use crate::message::{
    Heartbeat, HeartbeatResponse, Message, MessageType, NewQuorum, PreVoteRequest,
    PreVoteResponse, VoteRequest, VoteResponse,
};
use crate::snapshot;

use super::lists::{HeartbeatIdList, VoteList};
use super::state::NodeState;
use super::timer;

/// How often a bootstrapping node retries joining via its peer list.
const BOOTSTRAP_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Reply channel handed to the loop by a `Node::shutdown` call.
pub(super) type ShutdownReply = oneshot::Sender<Result<()>>;

const BOOTSTRAP_MESSAGES: &[MessageType] = &[];
const REJOIN_MESSAGES: &[MessageType] = &[];
const FOLLOWER_MESSAGES: &[MessageType] = &[
    MessageType::Heartbeat,
    MessageType::PreVoteRequest,
    MessageType::VoteRequest,
    MessageType::NewQuorum,
];
const PRE_CANDIDATE_MESSAGES: &[MessageType] = &[
    MessageType::Heartbeat,
    MessageType::PreVoteRequest,
    MessageType::PreVoteResponse,
    MessageType::VoteRequest,
    MessageType::NewQuorum,
];
const CANDIDATE_MESSAGES: &[MessageType] = &[
    MessageType::Heartbeat,
    MessageType::PreVoteRequest,
    MessageType::VoteRequest,
    MessageType::VoteResponse,
    MessageType::NewQuorum,
];
const LEADER_MESSAGES: &[MessageType] = &[
    MessageType::Heartbeat,
    MessageType::HeartbeatResponse,
    MessageType::PreVoteRequest,
    MessageType::VoteRequest,
    MessageType::NewQuorum,
];

/// State mirror read by the public accessors. Written only by the event
/// loop.
pub(super) struct SharedState {
    state: AtomicU8,
    term: AtomicU64,
    fatal: Mutex<Option<RaftifyError>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(NodeState::Bootstrap.as_u8()),
            term: AtomicU64::new(0),
            fatal: Mutex::new(None),
        }
    }

    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn term(&self) -> u64 {
        self.term.load(Ordering::Acquire)
    }

    pub fn take_fatal(&self) -> Option<RaftifyError> {
        self.fatal.lock().unwrap().take()
    }

    fn set_state(&self, state: NodeState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn set_term(&self, term: u64) {
        self.term.store(term, Ordering::Release);
    }

    fn store_fatal(&self, error: RaftifyError) {
        *self.fatal.lock().unwrap() = Some(error);
    }
}

/// Core attributes every node has regardless of its state, owned by the
/// event-loop task.
pub(super) struct RaftCore {
    pub(super) config: Config,
    pub(super) working_dir: PathBuf,
    pub(super) membership: Membership,

    pub(super) state: NodeState,
    pub(super) current_term: u64,
    pub(super) voted_for: String,
    pub(super) quorum: u64,
    pub(super) rejoin: bool,

    pub(super) msg_rx: mpsc::Receiver<Vec<u8>>,
    pub(super) event_rx: mpsc::Receiver<MemberEvent>,
    pub(super) shutdown_rx: mpsc::Receiver<ShutdownReply>,
    pub(super) bootstrap_tx: Option<oneshot::Sender<()>>,
    pub(super) shutdown_reply: Option<ShutdownReply>,

    pub(super) timeout: Pin<Box<Sleep>>,
    pub(super) timeout_armed: bool,
    pub(super) ticker: Interval,
    pub(super) ticker_active: bool,

    pub(super) heartbeat_ids: HeartbeatIdList,
    pub(super) prevotes: VoteList,
    pub(super) votes: VoteList,
    pub(super) pending_quorum: Option<NewQuorum>,

    pub(super) shared: Arc<SharedState>,
    pub(super) fatal: Option<RaftifyError>,
}

impl RaftCore {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        config: Config,
        working_dir: PathBuf,
        membership: Membership,
        msg_rx: mpsc::Receiver<Vec<u8>>,
        event_rx: mpsc::Receiver<MemberEvent>,
        shutdown_rx: mpsc::Receiver<ShutdownReply>,
        bootstrap_tx: oneshot::Sender<()>,
        shared: Arc<SharedState>,
        rejoin: bool,
    ) -> Self {
        let quorum = (config.expect as u64) / 2 + 1;
        Self {
            config,
            working_dir,
            membership,
            state: NodeState::Bootstrap,
            current_term: 0,
            voted_for: String::new(),
            quorum,
            rejoin,
            msg_rx,
            event_rx,
            shutdown_rx,
            bootstrap_tx: Some(bootstrap_tx),
            shutdown_reply: None,
            timeout: Box::pin(tokio::time::sleep(Duration::from_secs(1))),
            timeout_armed: false,
            ticker: timer::message_ticker(1),
            ticker_active: false,
            heartbeat_ids: HeartbeatIdList::default(),
            prevotes: VoteList::default(),
            votes: VoteList::default(),
            pending_quorum: None,
            shared,
            fatal: None,
        }
    }

    /// Runs the per-state loop until the node has shut down.
    pub(super) async fn run(mut self) {
        if self.rejoin {
            self.to_follower(0);
        } else {
            self.to_bootstrap().await;
        }

        loop {
            match self.state {
                NodeState::Bootstrap => self.run_bootstrap().await,
                NodeState::Rejoin => self.run_rejoin().await,
                NodeState::Follower => self.run_follower().await,
                NodeState::PreCandidate => self.run_pre_candidate().await,
                NodeState::Candidate => self.run_candidate().await,
                NodeState::Leader => self.run_leader().await,
                NodeState::PreShutdown => self.run_pre_shutdown().await,
                NodeState::Shutdown => {
                    self.run_shutdown().await;
                    return;
                }
            }
        }
    }

    // ---- per-state loop iterations ------------------------------------

    async fn run_bootstrap(&mut self) {
        tokio::select! {
            Some(raw) = self.msg_rx.recv() => self.dispatch(raw, BOOTSTRAP_MESSAGES).await,
            Some(_) = self.event_rx.recv() => {
                self.save_snapshot();
                let members = self.membership.num_members();
                debug!(members, expect = self.config.expect, "collecting nodes for bootstrap");
                if members >= self.config.expect {
                    debug!("cluster successfully bootstrapped");
                    self.to_follower(0);
                    self.release_gate();
                }
            }
            _ = tokio::time::sleep(BOOTSTRAP_RETRY_INTERVAL) => {
                if let Err(e) = self.try_join().await {
                    error!(error = %e, "failed to join cluster, retrying");
                }
            }
            Some(reply) = self.shutdown_rx.recv() => self.begin_shutdown(reply),
        }
    }

    async fn run_follower(&mut self) {
        tokio::select! {
            Some(raw) = self.msg_rx.recv() => self.dispatch(raw, FOLLOWER_MESSAGES).await,
            Some(event) = self.event_rx.recv() => self.on_member_event(event).await,
            _ = &mut self.timeout, if self.timeout_armed => {
                debug!("heartbeat timeout elapsed");
                if self.rejoin {
                    match self.try_join().await {
                        Ok(_) => {
                            self.rejoin = false;
                            info!("successfully rejoined the cluster");
                            self.release_gate();
                            self.reset_timeout();
                        }
                        Err(e) => {
                            error!(error = %e, "could not rejoin cluster");
                            self.reset_timeout();
                        }
                    }
                } else {
                    self.to_pre_candidate().await;
                }
            }
            Some(reply) = self.shutdown_rx.recv() => self.begin_shutdown(reply),
        }
    }

    async fn run_pre_candidate(&mut self) {
        tokio::select! {
            Some(raw) = self.msg_rx.recv() => self.dispatch(raw, PRE_CANDIDATE_MESSAGES).await,
            Some(event) = self.event_rx.recv() => self.on_member_event(event).await,
            _ = &mut self.timeout, if self.timeout_armed => {
                debug!("election timeout elapsed");

                // Quorum checks normally run on reply receipt; a node that
                // is its own quorum never gets one.
                if self.quorum_reached(self.prevotes.received) {
                    info!("precandidate reached quorum by itself");
                    self.to_candidate().await;
                    return;
                }

                self.to_pre_candidate().await;
                self.prevotes.missed_prevote_cycles += 1;

                if self.prevotes.missed_prevote_cycles >= MAX_MISSED_PREVOTE_CYCLES {
                    debug!(
                        cycles = self.prevotes.missed_prevote_cycles,
                        "prevote cycles passed without any response, preparing rejoin"
                    );
                    self.prevotes.missed_prevote_cycles = 0;
                    self.to_rejoin();
                }
            }
            Some(reply) = self.shutdown_rx.recv() => self.begin_shutdown(reply),
        }
    }

    async fn run_candidate(&mut self) {
        tokio::select! {
            Some(raw) = self.msg_rx.recv() => self.dispatch(raw, CANDIDATE_MESSAGES).await,
            Some(event) = self.event_rx.recv() => self.on_member_event(event).await,
            _ = self.ticker.tick(), if self.ticker_active => {
                self.send_vote_request_to_pending().await;
            }
            _ = &mut self.timeout, if self.timeout_armed => {
                debug!("election timeout elapsed");
                if self.quorum_reached(self.votes.received) {
                    info!("candidate reached quorum by itself");
                    self.to_leader().await;
                    return;
                }
                self.to_candidate().await;
            }
            Some(reply) = self.shutdown_rx.recv() => self.begin_shutdown(reply),
        }
    }

    async fn run_leader(&mut self) {
        tokio::select! {
            Some(raw) = self.msg_rx.recv() => self.dispatch(raw, LEADER_MESSAGES).await,
            Some(event) = self.event_rx.recv() => self.on_member_event(event).await,
            _ = self.ticker.tick(), if self.ticker_active => {
                if !self.quorum_reached(self.heartbeat_ids.received) {
                    self.heartbeat_ids.sub_quorum_cycles += 1;
                    debug!(
                        cycles = self.heartbeat_ids.sub_quorum_cycles,
                        "not enough heartbeat responses"
                    );

                    if self.heartbeat_ids.sub_quorum_cycles >= MAX_SUB_QUORUM_CYCLES {
                        debug!("too many cycles without leader quorum, stepping down");

                        // Without a response majority the leader must
                        // assume it was partitioned into a minority. It
                        // steps down and rejoins to pick up whatever
                        // changed in the majority cluster meanwhile.
                        self.rejoin = true;
                        self.heartbeat_ids.current_heartbeat_id = 0;
                        self.heartbeat_ids.sub_quorum_cycles = 0;

                        if let Err(e) = self.reload_config() {
                            error!(error = %e, "config reload failed, keeping current peer list");
                        }
                        self.to_follower(self.current_term);
                        return;
                    }
                } else {
                    self.heartbeat_ids.sub_quorum_cycles = 0;
                }
                self.send_heartbeat_to_all().await;
            }
            Some(reply) = self.shutdown_rx.recv() => self.begin_shutdown(reply),
        }
    }

    async fn run_rejoin(&mut self) {
        tokio::select! {
            Some(raw) = self.msg_rx.recv() => self.dispatch(raw, REJOIN_MESSAGES).await,
            Some(event) = self.event_rx.recv() => self.on_member_event(event).await,
            _ = &mut self.timeout, if self.timeout_armed => {
                match self.try_join().await {
                    Ok(_) => {
                        info!("successfully rejoined the cluster");
                        self.to_follower(self.current_term);
                    }
                    Err(e) => {
                        error!(error = %e, "failed to rejoin cluster");
                        self.reset_timeout();
                    }
                }
            }
            Some(reply) = self.shutdown_rx.recv() => self.begin_shutdown(reply),
        }
    }

    /// Announces the post-departure quorum and keeps retrying until enough
    /// members confirmed it. Failure detection shrinks the member list, so
    /// the loop converges even when peers are gone.
    async fn run_pre_shutdown(&mut self) {
        let members = self.membership.num_members() as u64;
        let new_quorum = members.saturating_sub(1) / 2 + 1;
        let reached = self.send_new_quorum_to_all(new_quorum).await;

        if reached >= new_quorum || members == 1 {
            self.to_shutdown();
            return;
        }

        debug!(reached, needed = new_quorum, "not enough members confirmed the new quorum, retrying");
        tokio::time::sleep(Duration::from_millis(TICKER_INTERVAL_MS)).await;
    }

    async fn run_shutdown(&mut self) {
        self.stop_timeout();
        self.stop_ticker();

        let mut errs: Vec<String> = Vec::new();
        let fatal = self.fatal.take();

        if fatal.is_none() {
            // Only a voluntary departure forgets the cluster. A fatal
            // teardown keeps the snapshot so a restart can rejoin.
            match snapshot::delete(&self.working_dir) {
                Ok(()) => debug!("deleted membership snapshot"),
                Err(e) => errs.push(e.to_string()),
            }
        }

        if let Err(e) = self.membership.leave().await {
            errs.push(e.to_string());
        }
        self.membership.shutdown();

        let result = match fatal {
            Some(e) => Err(e),
            None if errs.is_empty() => Ok(()),
            None => Err(RaftifyError::ShutdownErrors(errs.join("\n"))),
        };

        match self.shutdown_reply.take() {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                if let Err(e) = result {
                    self.shared.store_fatal(e);
                }
            }
        }
        info!(node = %self.config.id, "shutdown complete");
    }

    // ---- transitions --------------------------------------------------

    async fn to_bootstrap(&mut self) {
        debug!(
            members = self.membership.num_members(),
            expect = self.config.expect,
            "collecting nodes for bootstrap"
        );
        self.set_state(NodeState::Bootstrap);

        if self.config.expect == 1 {
            if self.config.peer_list.is_empty() {
                debug!("single-node cluster bootstrapped");
                self.save_snapshot();
                self.to_leader().await;
                self.release_gate();
                return;
            }

            // A single expected node with peers configured joins the
            // existing cluster through the normal follower cycle; it must
            // not declare itself leader without an election.
            if let Err(e) = self.try_join().await {
                error!(error = %e, "failed to join cluster, continuing as follower");
            }
            self.to_follower(0);
            self.release_gate();
            return;
        }

        if let Err(e) = self.try_join().await {
            error!(error = %e, "failed to join cluster, retrying");
        }
    }

    pub(super) fn to_follower(&mut self, term: u64) {
        info!(term, "entering follower state");
        self.reset_timeout();
        self.stop_ticker();
        self.set_term(term);
        self.voted_for.clear();
        self.set_state(NodeState::Follower);
    }

    pub(super) async fn to_pre_candidate(&mut self) {
        debug!(term = self.current_term + 1, "entering precandidate state");
        self.reset_timeout();
        let pending = self.remote_member_names();
        self.prevotes.reset(pending);
        self.set_state(NodeState::PreCandidate);
        self.send_prevote_request_to_all().await;
    }

    pub(super) async fn to_candidate(&mut self) {
        if matches!(self.state, NodeState::Leader | NodeState::Follower) {
            warn!(state = %self.state, "leader and follower nodes cannot directly switch to candidate");
            return;
        }

        info!(term = self.current_term + 1, "entering candidate state");
        self.reset_timeout();
        let term = self.current_term + 1;
        self.set_term(term);
        self.voted_for = self.config.id.clone();
        let pending = self.remote_member_names();
        self.votes.reset(pending);
        self.set_state(NodeState::Candidate);
        self.start_ticker();
        self.send_vote_request_to_pending().await;
    }

    pub(super) async fn to_leader(&mut self) {
        if self.state == NodeState::Follower {
            warn!("follower nodes cannot directly switch to leader");
            return;
        }
        info!(term = self.current_term, "entering leader state");
        self.enter_leader();
        self.send_heartbeat_to_all().await;
    }

    /// Installs the leader role. Shared by `to_leader` and the sanctioned
    /// guard bypass when a voluntary leave leaves this node alone with a
    /// quorum of one.
    pub(super) fn enter_leader(&mut self) {
        self.stop_timeout();
        self.start_ticker();
        self.heartbeat_ids.reset();
        self.voted_for.clear();
        self.set_state(NodeState::Leader);
    }

    pub(super) fn to_rejoin(&mut self) {
        info!("entering rejoin state");
        self.reset_timeout();
        self.stop_ticker();
        self.set_state(NodeState::Rejoin);
    }

    fn to_pre_shutdown(&mut self) {
        info!("preparing shutdown");
        self.stop_timeout();
        self.stop_ticker();
        self.set_state(NodeState::PreShutdown);
    }

    pub(super) fn to_shutdown(&mut self) {
        info!(node = %self.config.id, "shutting down");
        self.set_state(NodeState::Shutdown);
    }

    // ---- shared plumbing ----------------------------------------------

    async fn dispatch(&mut self, raw: Vec<u8>, allowed: &[MessageType]) {
        let message = match Message::decode(&raw) {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "dropping undecodable message");
                return;
            }
        };

        let message_type = message.message_type();
        if !allowed.contains(&message_type) {
            warn!(state = %self.state, message = %message_type, "discarding message not handled in this state");
            return;
        }

        match message {
            Message::Heartbeat(m) => self.handle_heartbeat(m).await,
            Message::HeartbeatResponse(m) => self.handle_heartbeat_response(m),
            Message::PreVoteRequest(m) => self.handle_prevote_request(m).await,
            Message::PreVoteResponse(m) => self.handle_prevote_response(m).await,
            Message::VoteRequest(m) => self.handle_vote_request(m).await,
            Message::VoteResponse(m) => self.handle_vote_response(m).await,
            Message::NewQuorum(m) => self.handle_new_quorum(m),
        }
    }

    async fn on_member_event(&mut self, event: MemberEvent) {
        self.save_snapshot();
        if let MemberEvent::Left(member) = event {
            self.apply_pending_quorum(&member.name);
        }
    }

    /// Installs a previously announced quorum once the announcing node's
    /// leave event has arrived.
    pub(super) fn apply_pending_quorum(&mut self, left: &str) {
        let matches = self
            .pending_quorum
            .as_ref()
            .is_some_and(|pending| pending.leaving_id == left);
        if !matches {
            return;
        }

        let pending = self.pending_quorum.take().unwrap();
        debug!(from = self.quorum, to = pending.new_quorum, "installing new quorum after voluntary leave");
        self.quorum = pending.new_quorum;

        if pending.new_quorum == 1 && self.membership.num_members() == 1 {
            // No election is possible with one node; this is the only
            // sanctioned bypass of the candidate-only leader guard.
            info!(term = self.current_term, "only node left in the cluster, entering leader state");
            self.enter_leader();
        }
    }

    fn begin_shutdown(&mut self, reply: ShutdownReply) {
        self.shutdown_reply = Some(reply);
        self.to_pre_shutdown();
    }

    async fn try_join(&self) -> Result<usize> {
        debug!("trying to join existing cluster via peers");
        let members = self.membership.join(&self.config.peer_list).await?;
        debug!(members, "join attempt succeeded");
        Ok(members)
    }

    fn release_gate(&mut self) {
        if let Some(gate) = self.bootstrap_tx.take() {
            let _ = gate.send(());
        }
    }

    pub(super) fn save_snapshot(&self) {
        if let Err(e) = snapshot::save(&self.working_dir, &self.membership.members()) {
            error!(error = %e, "could not persist membership snapshot");
        } else {
            debug!("persisted membership snapshot");
        }
    }

    /// Reloads `raftify.json`, rewriting the peer list from the snapshot
    /// when a rejoin is pending.
    fn reload_config(&mut self) -> Result<()> {
        let mut config = config::load(&self.working_dir)?;
        if self.rejoin {
            let members = snapshot::load(&self.working_dir)?;
            config.rewrite_peer_list(&members);
        }
        config.remove_local_peer();
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Checks the given response count against the current quorum. The
    /// first time the count satisfies it, a new quorum is installed from
    /// the current cluster size: a partition-shrunk member set must first
    /// satisfy the old quorum, so no two partitions can both elect. A node
    /// that is the only member left is exempt from the old-quorum gate.
    pub(super) fn quorum_reached(&mut self, votes: u64) -> bool {
        let members = self.membership.num_members() as u64;
        if votes < self.quorum && members > 1 {
            debug!(state = %self.state, votes, quorum = self.quorum, "quorum not reached");
            return false;
        }

        debug!(state = %self.state, votes, quorum = self.quorum, "quorum reached");
        self.quorum = members / 2 + 1;
        true
    }

    pub(super) fn remote_member_names(&self) -> Vec<String> {
        self.membership
            .members()
            .into_iter()
            .filter(|member| member.name != self.config.id)
            .map(|member| member.name)
            .collect()
    }

    // ---- timers -------------------------------------------------------

    pub(super) fn reset_timeout(&mut self) {
        let timeout = timer::random_timeout(self.config.performance);
        self.timeout.as_mut().reset(Instant::now() + timeout);
        self.timeout_armed = true;
    }

    pub(super) fn stop_timeout(&mut self) {
        self.timeout_armed = false;
    }

    pub(super) fn start_ticker(&mut self) {
        self.ticker = timer::message_ticker(self.config.performance);
        self.ticker_active = true;
    }

    pub(super) fn stop_ticker(&mut self) {
        self.ticker_active = false;
    }

    fn set_state(&mut self, state: NodeState) {
        self.state = state;
        self.shared.set_state(state);
    }

    fn set_term(&mut self, term: u64) {
        self.current_term = term;
        self.shared.set_term(term);
    }

    // ---- outbound messages --------------------------------------------

    pub(super) async fn send_heartbeat_to_all(&mut self) {
        self.heartbeat_ids.reset();

        for name in self.remote_member_names() {
            let heartbeat_id = self.heartbeat_ids.current_heartbeat_id;
            let message = Message::Heartbeat(Heartbeat {
                term: self.current_term,
                quorum: self.quorum,
                heartbeat_id,
                leader_id: self.config.id.clone(),
            });
            let bytes = match message.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(error = %e, "could not encode heartbeat");
                    return;
                }
            };

            if let Err(e) = self.membership.send_best_effort(&name, bytes).await {
                error!(peer = %name, error = %e, "could not send heartbeat");
                continue;
            }
            self.heartbeat_ids.add(heartbeat_id);
            self.heartbeat_ids.current_heartbeat_id += 1;
            debug!(peer = %name, heartbeat_id, "sent heartbeat");
        }
    }

    pub(super) async fn send_heartbeat_response(&mut self, leader_id: &str, heartbeat_id: u64) {
        let message = Message::HeartbeatResponse(HeartbeatResponse {
            term: self.current_term,
            heartbeat_id,
            follower_id: self.config.id.clone(),
        });
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "could not encode heartbeat response");
                return;
            }
        };

        if let Err(e) = self.membership.send_best_effort(leader_id, bytes).await {
            error!(peer = %leader_id, error = %e, "could not send heartbeat response");
            return;
        }
        debug!(peer = %leader_id, "sent heartbeat response");
    }

    pub(super) async fn send_prevote_request_to_all(&mut self) {
        let message = Message::PreVoteRequest(PreVoteRequest {
            next_term: self.current_term + 1,
            pre_candidate_id: self.config.id.clone(),
        });
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "could not encode prevote request");
                return;
            }
        };

        for name in self.prevotes.pending.clone() {
            if let Err(e) = self.membership.send_best_effort(&name, bytes.clone()).await {
                error!(peer = %name, error = %e, "could not send prevote request");
                continue;
            }
            debug!(peer = %name, "sent prevote request");
        }
    }

    pub(super) async fn send_prevote_response(&mut self, pre_candidate_id: &str, granted: bool) {
        let message = Message::PreVoteResponse(PreVoteResponse {
            term: self.current_term,
            follower_id: self.config.id.clone(),
            pre_vote_granted: granted,
        });
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "could not encode prevote response");
                return;
            }
        };

        if let Err(e) = self.membership.send_best_effort(pre_candidate_id, bytes).await {
            error!(peer = %pre_candidate_id, error = %e, "could not send prevote response");
            return;
        }
        debug!(peer = %pre_candidate_id, granted, "sent prevote response");
    }

    /// Sends vote requests to every member that has not voted yet. Called
    /// on entry into the candidate state and again on every ticker cycle.
    pub(super) async fn send_vote_request_to_pending(&mut self) {
        let message = Message::VoteRequest(VoteRequest {
            term: self.current_term,
            candidate_id: self.config.id.clone(),
        });
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "could not encode vote request");
                return;
            }
        };

        for name in self.votes.pending.clone() {
            if let Err(e) = self.membership.send_best_effort(&name, bytes.clone()).await {
                error!(peer = %name, error = %e, "could not send vote request");
                continue;
            }
            debug!(peer = %name, "sent vote request");
        }
    }

    pub(super) async fn send_vote_response(&mut self, candidate_id: &str, granted: bool) {
        let message = Message::VoteResponse(VoteResponse {
            term: self.current_term,
            follower_id: self.config.id.clone(),
            vote_granted: granted,
        });
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "could not encode vote response");
                return;
            }
        };

        if let Err(e) = self.membership.send_best_effort(candidate_id, bytes).await {
            error!(peer = %candidate_id, error = %e, "could not send vote response");
            return;
        }
        debug!(peer = %candidate_id, granted, "sent vote response");
    }

    /// Reliably announces the post-departure quorum to every other member.
    /// Returns how many members confirmed delivery.
    pub(super) async fn send_new_quorum_to_all(&mut self, new_quorum: u64) -> u64 {
        let message = Message::NewQuorum(NewQuorum {
            new_quorum,
            leaving_id: self.config.id.clone(),
        });
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "could not encode new quorum");
                return 0;
            }
        };

        let mut reached = 0;
        for name in self.remote_member_names() {
            match self.membership.send_reliable(&name, bytes.clone()).await {
                Ok(()) => reached += 1,
                Err(e) => error!(peer = %name, error = %e, "could not send new quorum"),
            }
        }
        reached
    }
}
