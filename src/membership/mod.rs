//! Gossip-based cluster membership.
//!
//! The node protocol only ever talks to the narrow [`Membership`] facade:
//! join and leave the cluster, read the live member set, send best-effort
//! or acked unicast payloads, and consume the member event stream. Behind
//! the facade a single background task runs a SWIM-style protocol over UDP:
//! periodic probes with ack deadlines, removal after consecutive failures,
//! full state transfer on join and periodic anti-entropy pushes.

mod frame;
mod gossip;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{RaftifyError, Result};
use frame::Frame;

/// Deadline for a blocking join attempt.
const JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Per-attempt ack deadline for reliable unicast.
const RELIABLE_ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// Number of transmissions before a reliable unicast is reported failed.
const RELIABLE_ATTEMPTS: u32 = 4;

/// Number of times a voluntary leave announcement is repeated. Failure
/// detection removes the node anyway if every copy is lost.
const LEAVE_REPEATS: u32 = 3;

/// Capacity of the inbound application message channel. Producers block
/// when it is full; payloads are never dropped.
const MESSAGE_CHANNEL_CAPACITY: usize = 1024;

/// A cluster member as seen by the gossip layer and as persisted in the
/// membership snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub address: String,
}

impl Member {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Membership change notifications. For any one node a `Joined` event is
/// always delivered before its `Left` event. No events are emitted for the
/// local node.
#[derive(Debug, Clone)]
pub enum MemberEvent {
    Joined(Member),
    Left(Member),
}

/// Settings for [`Membership::create`].
#[derive(Debug, Clone)]
pub struct MembershipConfig {
    /// Unique name of the local node.
    pub name: String,
    /// Address to bind the gossip socket to.
    pub bind_addr: String,
    /// Port to bind the gossip socket to. 0 binds an ephemeral port.
    pub bind_port: u16,
    /// Pre-shared key authenticating every gossip frame, or `None`.
    pub secret_key: Option<Vec<u8>>,
    /// Capacity of the member event channel, sized to the maximum cluster
    /// size so the initial join burst never blocks the gossip task.
    pub event_capacity: usize,
}

struct MemberRecord {
    member: Member,
    failures: u32,
}

pub(crate) struct Inner {
    name: String,
    advertise: String,
    socket: UdpSocket,
    key: Option<Vec<u8>>,
    members: RwLock<HashMap<String, MemberRecord>>,
    blocked: RwLock<HashSet<String>>,
    tombstones: Mutex<HashMap<String, Instant>>,
    health: AtomicI32,
    seq: AtomicU64,
    pending_acks: Mutex<HashMap<u64, oneshot::Sender<()>>>,
    join_waiters: Mutex<Vec<oneshot::Sender<()>>>,
    seen_deliveries: Mutex<HashSet<(String, u64)>>,
    event_tx: mpsc::Sender<MemberEvent>,
    msg_tx: mpsc::Sender<Vec<u8>>,
}

impl Inner {
    fn local(&self) -> Member {
        Member::new(self.name.clone(), self.advertise.clone())
    }

    fn member_list(&self) -> Vec<Member> {
        let members = self.members.read().unwrap();
        let mut list: Vec<Member> = members.values().map(|r| r.member.clone()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    fn address_of(&self, name: &str) -> Option<String> {
        self.members
            .read()
            .unwrap()
            .get(name)
            .map(|r| r.member.address.clone())
    }

    fn is_blocked(&self, name: &str) -> bool {
        self.blocked.read().unwrap().contains(name)
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn register_ack(&self, seq: u64) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.pending_acks.lock().unwrap().insert(seq, tx);
        rx
    }

    fn resolve_ack(&self, seq: u64) {
        if let Some(tx) = self.pending_acks.lock().unwrap().remove(&seq) {
            let _ = tx.send(());
        }
    }

    fn drop_ack(&self, seq: u64) {
        self.pending_acks.lock().unwrap().remove(&seq);
    }

    fn notify_join_waiters(&self) {
        for waiter in self.join_waiters.lock().unwrap().drain(..) {
            let _ = waiter.send(());
        }
    }

    async fn emit(&self, event: MemberEvent) {
        let _ = self.event_tx.send(event).await;
    }

    async fn send_frame_to_addr(&self, addr: &str, frame: &Frame) -> Result<()> {
        let bytes = frame::encode(frame, self.key.as_deref())?;
        self.socket
            .send_to(&bytes, addr)
            .await
            .map_err(|e| RaftifyError::SendFailed {
                peer: addr.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Sends a frame to a named member. Frames to blocked peers are
    /// silently dropped, which models a partition at the unicast layer.
    async fn send_frame(&self, name: &str, frame: &Frame) -> Result<()> {
        if self.is_blocked(name) {
            return Ok(());
        }
        let addr = self
            .address_of(name)
            .ok_or_else(|| RaftifyError::UnknownMember(name.to_string()))?;
        self.send_frame_to_addr(&addr, frame).await
    }
}

/// Handle to the local membership service. Cheap to clone.
#[derive(Clone)]
pub struct Membership {
    inner: Arc<Inner>,
    cancel: CancellationToken,
}

impl Membership {
    /// Binds the gossip socket, spawns the gossip task and returns the
    /// facade together with the inbound application message stream and the
    /// member event stream.
    pub async fn create(
        config: MembershipConfig,
    ) -> Result<(Membership, mpsc::Receiver<Vec<u8>>, mpsc::Receiver<MemberEvent>)> {
        let socket = UdpSocket::bind((config.bind_addr.as_str(), config.bind_port)).await?;
        let port = socket.local_addr()?.port();

        // A wildcard bind address is not routable for peers; advertise
        // loopback in its place.
        let advertise_host = if config.bind_addr == "0.0.0.0" {
            "127.0.0.1".to_string()
        } else {
            config.bind_addr.clone()
        };
        let advertise = format!("{advertise_host}:{port}");

        let (msg_tx, msg_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));

        let mut members = HashMap::new();
        members.insert(
            config.name.clone(),
            MemberRecord {
                member: Member::new(config.name.clone(), advertise.clone()),
                failures: 0,
            },
        );

        let inner = Arc::new(Inner {
            name: config.name,
            advertise,
            socket,
            key: config.secret_key,
            members: RwLock::new(members),
            blocked: RwLock::new(HashSet::new()),
            tombstones: Mutex::new(HashMap::new()),
            health: AtomicI32::new(0),
            seq: AtomicU64::new(0),
            pending_acks: Mutex::new(HashMap::new()),
            join_waiters: Mutex::new(Vec::new()),
            seen_deliveries: Mutex::new(HashSet::new()),
            event_tx,
            msg_tx,
        });

        let cancel = CancellationToken::new();
        tokio::spawn(gossip::run(inner.clone(), cancel.clone()));

        Ok((Membership { inner, cancel }, msg_rx, event_rx))
    }

    /// Attempts to join an existing cluster via the given peers. Blocks
    /// until at least one peer answers with a state transfer or the
    /// 3-second deadline elapses. Returns the number of members known
    /// after the join.
    pub async fn join(&self, peers: &[String]) -> Result<usize> {
        if peers.is_empty() {
            return Err(RaftifyError::NoPeersReached);
        }

        let (tx, rx) = oneshot::channel();
        self.inner.join_waiters.lock().unwrap().push(tx);

        let join = Frame::Join {
            from: self.inner.local(),
        };
        for peer in peers {
            if let Err(e) = self.inner.send_frame_to_addr(peer, &join).await {
                tracing::debug!(peer, error = %e, "join request could not be sent");
            }
        }

        match tokio::time::timeout(JOIN_TIMEOUT, rx).await {
            Ok(Ok(())) => Ok(self.num_members()),
            _ => Err(RaftifyError::NoPeersReached),
        }
    }

    /// Announces a voluntary departure to every other member. The
    /// announcement is repeated a few times; peers that miss every copy
    /// remove the node through failure detection instead.
    pub async fn leave(&self) -> Result<()> {
        let frame = Frame::Leave {
            from: self.inner.name.clone(),
        };
        let peers: Vec<String> = self
            .inner
            .member_list()
            .into_iter()
            .filter(|m| m.name != self.inner.name)
            .map(|m| m.name)
            .collect();

        let mut errs = Vec::new();
        for _ in 0..LEAVE_REPEATS {
            for peer in &peers {
                if let Err(e) = self.inner.send_frame(peer, &frame).await {
                    errs.push(format!("{peer}: {e}"));
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(RaftifyError::ShutdownErrors(errs.join("\n")))
        }
    }

    /// Stops the gossip task. The socket closes once the last handle is
    /// dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// The current member list, local node included, sorted by name.
    pub fn members(&self) -> Vec<Member> {
        self.inner.member_list()
    }

    /// Number of currently known members, local node included.
    pub fn num_members(&self) -> usize {
        self.inner.members.read().unwrap().len()
    }

    /// Local node health. 0 is healthy; the score rises with failed
    /// probes and decays with successful ones.
    pub fn health_score(&self) -> i32 {
        self.inner.health.load(Ordering::Relaxed).max(0)
    }

    /// Sends an application payload to a member as a single datagram.
    pub async fn send_best_effort(&self, name: &str, payload: Vec<u8>) -> Result<()> {
        let frame = Frame::Message {
            from: self.inner.name.clone(),
            payload,
        };
        self.inner.send_frame(name, &frame).await
    }

    /// Sends an application payload to a member with acknowledgement and
    /// retransmission. Fails when no ack arrives within the deadline.
    pub async fn send_reliable(&self, name: &str, payload: Vec<u8>) -> Result<()> {
        let seq = self.inner.next_seq();
        let frame = Frame::Delivery {
            seq,
            from: self.inner.name.clone(),
            payload,
        };

        for _ in 0..RELIABLE_ATTEMPTS {
            let rx = self.inner.register_ack(seq);
            self.inner.send_frame(name, &frame).await?;
            match tokio::time::timeout(RELIABLE_ACK_TIMEOUT, rx).await {
                Ok(Ok(())) => return Ok(()),
                _ => self.inner.drop_ack(seq),
            }
        }

        Err(RaftifyError::SendFailed {
            peer: name.to_string(),
            reason: "no delivery acknowledgement".to_string(),
        })
    }

    /// Drops all unicast to and from the named peer until [`unblock`].
    /// Used by tests to simulate network partitions.
    ///
    /// [`unblock`]: Membership::unblock
    pub fn block(&self, name: &str) {
        self.inner.blocked.write().unwrap().insert(name.to_string());
    }

    /// Reverses [`block`].
    ///
    /// [`block`]: Membership::block
    pub fn unblock(&self, name: &str) {
        self.inner.blocked.write().unwrap().remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn spawn_member(name: &str) -> (Membership, mpsc::Receiver<Vec<u8>>, mpsc::Receiver<MemberEvent>) {
        Membership::create(MembershipConfig {
            name: name.to_string(),
            bind_addr: "127.0.0.1".to_string(),
            bind_port: 0,
            secret_key: None,
            event_capacity: 8,
        })
        .await
        .unwrap()
    }

    fn address(membership: &Membership) -> String {
        membership.inner.advertise.clone()
    }

    #[tokio::test]
    async fn starts_with_only_itself_and_zero_health() {
        let (a, _msgs, _events) = spawn_member("a").await;
        let members = a.members();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "a");
        assert_eq!(a.health_score(), 0);
        a.shutdown();
    }

    #[tokio::test]
    async fn join_transfers_full_state_and_fires_events() {
        let (a, _a_msgs, mut a_events) = spawn_member("a").await;
        let (b, _b_msgs, mut b_events) = spawn_member("b").await;

        let joined = b.join(&[address(&a)]).await.unwrap();
        assert_eq!(joined, 2);
        assert_eq!(a.num_members(), 2);
        assert_eq!(b.num_members(), 2);

        match a_events.recv().await.unwrap() {
            MemberEvent::Joined(member) => assert_eq!(member.name, "b"),
            other => panic!("unexpected event {other:?}"),
        }
        match b_events.recv().await.unwrap() {
            MemberEvent::Joined(member) => assert_eq!(member.name, "a"),
            other => panic!("unexpected event {other:?}"),
        }

        a.shutdown();
        b.shutdown();
    }

    #[tokio::test]
    async fn join_fails_when_no_peer_answers() {
        let (a, _msgs, _events) = spawn_member("a").await;
        let err = a.join(&["127.0.0.1:1".to_string()]).await.unwrap_err();
        assert!(matches!(err, RaftifyError::NoPeersReached));
        a.shutdown();
    }

    #[tokio::test]
    async fn best_effort_payload_is_delivered() {
        let (a, _a_msgs, _a_events) = spawn_member("a").await;
        let (b, mut b_msgs, _b_events) = spawn_member("b").await;
        b.join(&[address(&a)]).await.unwrap();

        a.send_best_effort("b", b"ping-payload".to_vec()).await.unwrap();
        let payload = tokio::time::timeout(Duration::from_secs(1), b_msgs.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, b"ping-payload");

        a.shutdown();
        b.shutdown();
    }

    #[tokio::test]
    async fn reliable_payload_is_delivered_and_acked() {
        let (a, _a_msgs, _a_events) = spawn_member("a").await;
        let (b, mut b_msgs, _b_events) = spawn_member("b").await;
        b.join(&[address(&a)]).await.unwrap();

        a.send_reliable("b", b"handoff".to_vec()).await.unwrap();
        let payload = tokio::time::timeout(Duration::from_secs(1), b_msgs.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, b"handoff");

        a.shutdown();
        b.shutdown();
    }

    #[tokio::test]
    async fn reliable_send_to_blocked_peer_fails() {
        let (a, _a_msgs, _a_events) = spawn_member("a").await;
        let (b, _b_msgs, _b_events) = spawn_member("b").await;
        b.join(&[address(&a)]).await.unwrap();

        a.block("b");
        let err = a.send_reliable("b", b"lost".to_vec()).await.unwrap_err();
        assert!(matches!(err, RaftifyError::SendFailed { .. }));

        a.shutdown();
        b.shutdown();
    }

    #[tokio::test]
    async fn sending_to_unknown_member_fails() {
        let (a, _msgs, _events) = spawn_member("a").await;
        let err = a.send_best_effort("ghost", Vec::new()).await.unwrap_err();
        assert!(matches!(err, RaftifyError::UnknownMember(_)));
        a.shutdown();
    }

    #[tokio::test]
    async fn voluntary_leave_fires_left_event() {
        let (a, _a_msgs, mut a_events) = spawn_member("a").await;
        let (b, _b_msgs, _b_events) = spawn_member("b").await;
        b.join(&[address(&a)]).await.unwrap();

        // Drain the join event first.
        match a_events.recv().await.unwrap() {
            MemberEvent::Joined(member) => assert_eq!(member.name, "b"),
            other => panic!("unexpected event {other:?}"),
        }

        b.leave().await.unwrap();
        b.shutdown();

        match tokio::time::timeout(Duration::from_secs(1), a_events.recv())
            .await
            .unwrap()
            .unwrap()
        {
            MemberEvent::Left(member) => assert_eq!(member.name, "b"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(a.num_members(), 1);

        a.shutdown();
    }

    #[tokio::test]
    async fn authenticated_members_converge_and_reject_unkeyed_peers() {
        let key = vec![0x42_u8; 32];
        let make = |name: &str, key: Option<Vec<u8>>| {
            let name = name.to_string();
            async move {
                Membership::create(MembershipConfig {
                    name,
                    bind_addr: "127.0.0.1".to_string(),
                    bind_port: 0,
                    secret_key: key,
                    event_capacity: 8,
                })
                .await
                .unwrap()
            }
        };

        let (a, _a_msgs, _a_events) = make("a", Some(key.clone())).await;
        let (b, _b_msgs, _b_events) = make("b", Some(key.clone())).await;
        let (intruder, _i_msgs, _i_events) = make("intruder", None).await;

        b.join(&[address(&a)]).await.unwrap();
        assert_eq!(a.num_members(), 2);

        // The unkeyed node's frames fail authentication and are dropped.
        assert!(intruder.join(&[address(&a)]).await.is_err());
        assert_eq!(a.num_members(), 2);

        a.shutdown();
        b.shutdown();
        intruder.shutdown();
    }
}
