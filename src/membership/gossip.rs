//! The gossip task: failure detection and state dissemination.
//!
//! One background task per node multiplexes the UDP socket with a protocol
//! period ticker. Each period it probes one random member and, every other
//! period, pushes its full alive list to one random member as anti-entropy.
//! A member that fails several consecutive probes is removed and a `Left`
//! event is emitted.
//!
//! Removal through failure detection is deliberately slower than the node
//! protocol's own partition detection (`MaxMissedPrevoteCycles` worth of
//! election timeouts): a partitioned node must reach the Rejoin state
//! before its local member list shrinks enough to let it elect itself.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::frame::{self, Frame};
use super::{Inner, Member, MemberEvent, MemberRecord};

/// Protocol period between probe rounds.
const PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Ack deadline for a single probe.
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Consecutive failed probes after which a member is declared dead.
const SUSPICION_CYCLES: u32 = 8;

/// Anti-entropy push every this many probe rounds.
const SYNC_EVERY: u32 = 2;

/// How long a departed member stays tombstoned so stale anti-entropy
/// pushes cannot resurrect it. A fresh Join clears the tombstone.
const TOMBSTONE_TTL: Duration = Duration::from_secs(10);

const MAX_DATAGRAM: usize = 65_535;

pub(super) async fn run(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(PROBE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut rounds = 0u32;
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                rounds = rounds.wrapping_add(1);
                purge_tombstones(&inner);
                probe(&inner).await;
                if rounds % SYNC_EVERY == 0 {
                    anti_entropy(&inner).await;
                }
            }
            received = inner.socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, src)) => handle_datagram(&inner, &buf[..len], src).await,
                    Err(e) => warn!(error = %e, "gossip socket receive failed"),
                }
            }
        }
    }
    debug!(node = %inner.name, "gossip task stopped");
}

async fn handle_datagram(inner: &Arc<Inner>, buf: &[u8], src: std::net::SocketAddr) {
    let frame = match frame::decode(buf, inner.key.as_deref()) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(%src, error = %e, "dropping undecodable gossip frame");
            return;
        }
    };
    if inner.is_blocked(frame.from()) {
        return;
    }

    match frame {
        Frame::Ping { seq, .. } => {
            let ack = Frame::Ack {
                seq,
                from: inner.name.clone(),
            };
            if let Err(e) = inner.send_frame_to_addr(&src.to_string(), &ack).await {
                debug!(%src, error = %e, "could not answer probe");
            }
        }
        Frame::Ack { seq, from } => {
            inner.resolve_ack(seq);
            let _ = inner
                .health
                .fetch_update(std::sync::atomic::Ordering::Relaxed, std::sync::atomic::Ordering::Relaxed, |v| {
                    Some((v - 1).max(0))
                });
            if let Some(record) = inner.members.write().unwrap().get_mut(&from) {
                record.failures = 0;
            }
        }
        Frame::Join { from } => {
            inner.tombstones.lock().unwrap().remove(&from.name);
            let is_new = insert_member(inner, from.clone());

            let join_ack = Frame::JoinAck {
                from: inner.name.clone(),
                members: inner.member_list(),
            };
            if let Err(e) = inner.send_frame_to_addr(&src.to_string(), &join_ack).await {
                debug!(%src, error = %e, "could not answer join");
            }

            if is_new {
                info!(node = %from.name, address = %from.address, "member joined the cluster");
                inner.emit(MemberEvent::Joined(from.clone())).await;

                // Push the grown membership to everyone else right away so
                // a bootstrap burst converges without waiting for
                // anti-entropy.
                let sync = Frame::Sync {
                    from: inner.name.clone(),
                    members: inner.member_list(),
                };
                let others: Vec<String> = inner
                    .member_list()
                    .into_iter()
                    .filter(|m| m.name != inner.name && m.name != from.name)
                    .map(|m| m.name)
                    .collect();
                for name in others {
                    if let Err(e) = inner.send_frame(&name, &sync).await {
                        debug!(peer = %name, error = %e, "could not propagate join");
                    }
                }
            }
        }
        Frame::JoinAck { members, .. } => {
            merge(inner, members).await;
            inner.notify_join_waiters();
        }
        Frame::Sync { members, .. } => {
            merge(inner, members).await;
        }
        Frame::Leave { from } => {
            inner
                .tombstones
                .lock()
                .unwrap()
                .insert(from.clone(), Instant::now());
            remove_member(inner, &from, "left the cluster").await;
        }
        Frame::Message { payload, .. } => {
            let _ = inner.msg_tx.send(payload).await;
        }
        Frame::Delivery { seq, from, payload } => {
            let ack = Frame::DeliveryAck {
                seq,
                from: inner.name.clone(),
            };
            if let Err(e) = inner.send_frame_to_addr(&src.to_string(), &ack).await {
                debug!(%src, error = %e, "could not acknowledge delivery");
            }
            let fresh = inner.seen_deliveries.lock().unwrap().insert((from, seq));
            if fresh {
                let _ = inner.msg_tx.send(payload).await;
            }
        }
        Frame::DeliveryAck { seq, .. } => {
            inner.resolve_ack(seq);
        }
    }
}

/// Probes one random remote member. The ack is awaited off the gossip
/// task; consecutive failures mark the member dead.
async fn probe(inner: &Arc<Inner>) {
    let target = {
        let members = inner.members.read().unwrap();
        let remote: Vec<Member> = members
            .values()
            .filter(|r| r.member.name != inner.name)
            .map(|r| r.member.clone())
            .collect();
        match remote.choose(&mut rand::thread_rng()) {
            Some(member) => member.clone(),
            None => return,
        }
    };

    let seq = inner.next_seq();
    let rx = inner.register_ack(seq);
    let ping = Frame::Ping {
        seq,
        from: inner.name.clone(),
    };
    if let Err(e) = inner.send_frame(&target.name, &ping).await {
        debug!(peer = %target.name, error = %e, "could not send probe");
    }

    let inner = inner.clone();
    tokio::spawn(async move {
        let acked = matches!(tokio::time::timeout(PROBE_TIMEOUT, rx).await, Ok(Ok(())));
        inner.drop_ack(seq);
        if acked {
            return;
        }

        inner
            .health
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let dead = {
            let mut members = inner.members.write().unwrap();
            match members.get_mut(&target.name) {
                Some(record) => {
                    record.failures += 1;
                    record.failures >= SUSPICION_CYCLES
                }
                None => false,
            }
        };
        if dead {
            remove_member(&inner, &target.name, "failed too many probes").await;
        }
    });
}

/// Pushes the full alive list to one random member.
async fn anti_entropy(inner: &Arc<Inner>) {
    let list = inner.member_list();
    let targets: Vec<&Member> = list.iter().filter(|m| m.name != inner.name).collect();
    let Some(target) = targets.choose(&mut rand::thread_rng()) else {
        return;
    };

    let sync = Frame::Sync {
        from: inner.name.clone(),
        members: list.clone(),
    };
    if let Err(e) = inner.send_frame(&target.name, &sync).await {
        debug!(peer = %target.name, error = %e, "could not send anti-entropy push");
    }
}

/// Adds every previously unknown member from a state transfer, emitting a
/// `Joined` event per addition. Tombstoned members are not resurrected.
async fn merge(inner: &Arc<Inner>, list: Vec<Member>) {
    let mut added = Vec::new();
    {
        let tombstones = inner.tombstones.lock().unwrap();
        let mut members = inner.members.write().unwrap();
        for member in list {
            if member.name == inner.name || tombstones.contains_key(&member.name) {
                continue;
            }
            members.entry(member.name.clone()).or_insert_with(|| {
                added.push(member.clone());
                MemberRecord {
                    member,
                    failures: 0,
                }
            });
        }
    }
    for member in added {
        info!(node = %member.name, address = %member.address, "member joined the cluster");
        inner.emit(MemberEvent::Joined(member)).await;
    }
}

fn insert_member(inner: &Arc<Inner>, member: Member) -> bool {
    let mut members = inner.members.write().unwrap();
    if members.contains_key(&member.name) {
        false
    } else {
        members.insert(
            member.name.clone(),
            MemberRecord {
                member,
                failures: 0,
            },
        );
        true
    }
}

async fn remove_member(inner: &Arc<Inner>, name: &str, reason: &str) {
    let record = inner.members.write().unwrap().remove(name);
    if let Some(record) = record {
        info!(node = %name, reason, "member removed from the cluster");
        inner.emit(MemberEvent::Left(record.member)).await;
    }
}

fn purge_tombstones(inner: &Arc<Inner>) {
    inner
        .tombstones
        .lock()
        .unwrap()
        .retain(|_, since| since.elapsed() < TOMBSTONE_TTL);
}
