//! Membership view and its merge rules.
//!
//! A record with a higher incarnation always wins. At equal incarnation the
//! more severe status wins (`Alive < Suspect < Leaving < Failed < Left`).
//! A member that misses a probe is suspected first and only declared failed
//! once its suspicion deadline passes without any sign of life. Direct contact
//! revives it. A member that hears itself suspected or declared failed refutes
//! by bumping its own incarnation.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Liveness of a mesh member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberStatus {
    /// Answering probes.
    Alive,
    /// Missed a probe; failed unless it answers before the suspicion deadline.
    Suspect,
    /// Announced its departure and is shutting down.
    Leaving,
    /// Stayed silent past its suspicion deadline.
    Failed,
    /// Left gracefully.
    Left,
}

impl MemberStatus {
    fn precedence(self) -> u8 {
        match self {
            MemberStatus::Alive => 0,
            MemberStatus::Suspect => 1,
            MemberStatus::Leaving => 2,
            MemberStatus::Failed => 3,
            MemberStatus::Left => 4,
        }
    }

    /// Whether the member still takes part in dissemination.
    pub fn is_alive(self) -> bool {
        matches!(self, MemberStatus::Alive | MemberStatus::Suspect)
    }
}

/// One member as disseminated on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    /// Unique member name.
    pub name: String,
    /// Gossip address of the member.
    pub addr: SocketAddr,
    /// Last known status.
    pub status: MemberStatus,
    /// Incarnation number owned by the member itself.
    pub incarnation: u64,
}

impl MemberRecord {
    /// An alive record at incarnation zero.
    pub fn alive(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            status: MemberStatus::Alive,
            incarnation: 0,
        }
    }
}

/// Kind of membership change surfaced to the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberEventKind {
    /// A member was seen for the first time.
    Join,
    /// A member came back or changed address or incarnation.
    Update,
    /// A member missed a probe and is under suspicion.
    Suspect,
    /// A suspected member never answered.
    Failed,
    /// A member left gracefully.
    Leave,
    /// A failed or departed member was forgotten.
    Reap,
}

/// A membership change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEvent {
    /// What happened.
    pub kind: MemberEventKind,
    /// The member after the change.
    pub member: MemberRecord,
}

#[derive(Debug)]
struct Entry {
    record: MemberRecord,
    changed_at: Instant,
    suspect_deadline: Option<Instant>,
}

impl Entry {
    fn new(record: MemberRecord, now: Instant, suspicion: Duration) -> Self {
        let mut entry = Self {
            record,
            changed_at: now,
            suspect_deadline: None,
        };
        entry.touch(now, suspicion);
        entry
    }

    fn touch(&mut self, now: Instant, suspicion: Duration) {
        self.changed_at = now;
        self.suspect_deadline =
            (self.record.status == MemberStatus::Suspect).then(|| now + suspicion);
    }
}

#[derive(Debug)]
struct View {
    local: MemberRecord,
    peers: HashMap<String, Entry>,
}

/// The local member plus every peer this node knows about.
#[derive(Debug)]
pub struct Membership {
    view: Mutex<View>,
    suspicion: Duration,
}

impl Membership {
    /// A view containing only the local member. Suspected peers are declared
    /// failed after `suspicion`.
    pub fn new(local: MemberRecord, suspicion: Duration) -> Self {
        Self {
            view: Mutex::new(View {
                local,
                peers: HashMap::new(),
            }),
            suspicion,
        }
    }

    fn lock(&self) -> MutexGuard<'_, View> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current record of the local member.
    pub fn local(&self) -> MemberRecord {
        self.lock().local.clone()
    }

    /// Replaces the address announced for the local member.
    pub fn set_local_addr(&self, addr: SocketAddr) {
        self.lock().local.addr = addr;
    }

    /// Sets the local status and bumps the incarnation so peers accept it.
    pub fn set_local_status(&self, status: MemberStatus) -> MemberRecord {
        let mut view = self.lock();
        view.local.status = status;
        view.local.incarnation += 1;
        view.local.clone()
    }

    /// Records direct contact with `record.name` at `record.addr`.
    ///
    /// Unlike [`Membership::merge`], a suspected or failed member is revived
    /// at its current incarnation: the packet proves it is reachable.
    pub fn observe_alive(&self, record: MemberRecord, now: Instant) -> Option<MemberEvent> {
        let mut guard = self.lock();
        let view = &mut *guard;
        if record.name == view.local.name {
            return None;
        }
        match view.peers.get_mut(&record.name) {
            None => {
                view.peers.insert(
                    record.name.clone(),
                    Entry::new(record.clone(), now, self.suspicion),
                );
                Some(MemberEvent {
                    kind: MemberEventKind::Join,
                    member: record,
                })
            }
            Some(entry) => {
                if record.status != MemberStatus::Alive
                    || entry.record.status == MemberStatus::Left
                        && record.incarnation <= entry.record.incarnation
                {
                    return None;
                }
                let revived = !entry.record.status.is_alive();
                let changed = entry.record.status != MemberStatus::Alive
                    || entry.record.addr != record.addr
                    || entry.record.incarnation < record.incarnation;
                if !changed {
                    return None;
                }
                entry.record.addr = record.addr;
                entry.record.status = MemberStatus::Alive;
                entry.record.incarnation = entry.record.incarnation.max(record.incarnation);
                entry.touch(now, self.suspicion);
                Some(MemberEvent {
                    kind: if revived {
                        MemberEventKind::Join
                    } else {
                        MemberEventKind::Update
                    },
                    member: entry.record.clone(),
                })
            }
        }
    }

    /// Applies a rumor. Returns the resulting change, if any.
    ///
    /// A rumor about the local member that marks it anything but alive is
    /// refuted; the refutation is returned as an `Update` of the local record.
    pub fn merge(&self, record: MemberRecord, now: Instant) -> Option<MemberEvent> {
        let mut guard = self.lock();
        let view = &mut *guard;
        if record.name == view.local.name {
            let local = &mut view.local;
            if local.status == MemberStatus::Alive
                && record.status != MemberStatus::Alive
                && record.incarnation >= local.incarnation
            {
                local.incarnation = record.incarnation + 1;
                return Some(MemberEvent {
                    kind: MemberEventKind::Update,
                    member: local.clone(),
                });
            }
            return None;
        }

        let kind = |status: MemberStatus| match status {
            MemberStatus::Alive => MemberEventKind::Join,
            MemberStatus::Suspect => MemberEventKind::Suspect,
            MemberStatus::Failed => MemberEventKind::Failed,
            MemberStatus::Leaving | MemberStatus::Left => MemberEventKind::Leave,
        };

        match view.peers.get_mut(&record.name) {
            None => {
                if record.status == MemberStatus::Left {
                    return None;
                }
                view.peers.insert(
                    record.name.clone(),
                    Entry::new(record.clone(), now, self.suspicion),
                );
                Some(MemberEvent {
                    kind: kind(record.status),
                    member: record,
                })
            }
            Some(entry) => {
                let current = &entry.record;
                let newer = record.incarnation > current.incarnation
                    || record.incarnation == current.incarnation
                        && record.status.precedence() > current.status.precedence();
                if !newer {
                    return None;
                }
                let event_kind = if record.status == current.status {
                    MemberEventKind::Update
                } else {
                    kind(record.status)
                };
                let keep_deadline = record.status == MemberStatus::Suspect
                    && current.status == MemberStatus::Suspect;
                entry.record = record;
                if keep_deadline {
                    entry.changed_at = now;
                } else {
                    entry.touch(now, self.suspicion);
                }
                Some(MemberEvent {
                    kind: event_kind,
                    member: entry.record.clone(),
                })
            }
        }
    }

    /// Suspects an alive peer after neither it nor any relay acknowledged a probe.
    pub fn mark_suspect(&self, name: &str, now: Instant) -> Option<MemberEvent> {
        let mut view = self.lock();
        let entry = view.peers.get_mut(name)?;
        if entry.record.status != MemberStatus::Alive {
            return None;
        }
        entry.record.status = MemberStatus::Suspect;
        entry.touch(now, self.suspicion);
        Some(MemberEvent {
            kind: MemberEventKind::Suspect,
            member: entry.record.clone(),
        })
    }

    /// Declares failed every suspect whose deadline has passed.
    pub fn expire_suspects(&self, now: Instant) -> Vec<MemberEvent> {
        let mut view = self.lock();
        let expired = view
            .peers
            .values_mut()
            .filter(|e| {
                e.record.status == MemberStatus::Suspect
                    && e.suspect_deadline.is_some_and(|deadline| deadline <= now)
            })
            .map(|e| {
                e.record.status = MemberStatus::Failed;
                e.touch(now, Duration::ZERO);
                MemberEvent {
                    kind: MemberEventKind::Failed,
                    member: e.record.clone(),
                }
            })
            .collect();
        expired
    }

    /// Marks a peer as departed.
    pub fn mark_left(&self, record: MemberRecord, now: Instant) -> Option<MemberEvent> {
        self.merge(
            MemberRecord {
                status: MemberStatus::Left,
                incarnation: record.incarnation,
                ..record
            },
            now,
        )
    }

    /// Forgets failed and departed peers whose status is older than `after`.
    pub fn reap(&self, now: Instant, after: Duration) -> Vec<MemberEvent> {
        let mut guard = self.lock();
        let view = &mut *guard;
        let expired: Vec<String> = view
            .peers
            .iter()
            .filter(|(_, e)| {
                matches!(e.record.status, MemberStatus::Failed | MemberStatus::Left)
                    && now.saturating_duration_since(e.changed_at) >= after
            })
            .map(|(name, _)| name.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|name| view.peers.remove(&name))
            .map(|e| MemberEvent {
                kind: MemberEventKind::Reap,
                member: e.record,
            })
            .collect()
    }

    /// Alive and suspected members, the local one included when it is alive.
    pub fn alive(&self) -> Vec<MemberRecord> {
        let view = self.lock();
        let mut members: Vec<MemberRecord> = view
            .peers
            .values()
            .filter(|e| e.record.status.is_alive())
            .map(|e| e.record.clone())
            .collect();
        if view.local.status.is_alive() {
            members.push(view.local.clone());
        }
        members.sort_by(|a, b| a.name.cmp(&b.name));
        members
    }

    /// Peers worth probing: alive, suspected, and failed ones that may come back.
    pub fn probe_candidates(&self) -> Vec<MemberRecord> {
        self.lock()
            .peers
            .values()
            .filter(|e| {
                matches!(
                    e.record.status,
                    MemberStatus::Alive | MemberStatus::Suspect | MemberStatus::Failed
                )
            })
            .map(|e| e.record.clone())
            .collect()
    }

    /// Up to `n` random alive or suspected peers whose name is not in `exclude`.
    pub fn random_alive_peers(&self, n: usize, exclude: &[&str]) -> Vec<MemberRecord> {
        let mut peers: Vec<MemberRecord> = self
            .lock()
            .peers
            .values()
            .filter(|e| e.record.status.is_alive())
            .filter(|e| !exclude.contains(&e.record.name.as_str()))
            .map(|e| e.record.clone())
            .collect();
        peers.shuffle(&mut rand::thread_rng());
        peers.truncate(n);
        peers
    }

    /// Every known record including the local one.
    pub fn records(&self) -> Vec<MemberRecord> {
        let view = self.lock();
        let mut records: Vec<MemberRecord> =
            view.peers.values().map(|e| e.record.clone()).collect();
        records.push(view.local.clone());
        records
    }

    /// The local record plus the `limit - 1` most recently changed peers.
    pub fn recent_rumors(&self, limit: usize) -> Vec<MemberRecord> {
        let view = self.lock();
        let mut entries: Vec<&Entry> = view.peers.values().collect();
        entries.sort_by(|a, b| b.changed_at.cmp(&a.changed_at));
        std::iter::once(view.local.clone())
            .chain(entries.into_iter().map(|e| e.record.clone()))
            .take(limit.max(1))
            .collect()
    }

    /// Status of a peer, if known.
    pub fn status_of(&self, name: &str) -> Option<MemberStatus> {
        self.lock().peers.get(name).map(|e| e.record.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], 7946))
    }

    const SUSPICION: Duration = Duration::from_secs(5);

    fn membership() -> Membership {
        Membership::new(MemberRecord::alive("local", addr(1)), SUSPICION)
    }

    #[test]
    fn test_new_peer_joins() {
        let m = membership();
        let event = m
            .merge(MemberRecord::alive("b", addr(2)), Instant::now())
            .unwrap();
        assert_eq!(event.kind, MemberEventKind::Join);
        assert_eq!(m.alive().len(), 2);
    }

    #[test]
    fn test_higher_incarnation_wins() {
        let m = membership();
        let now = Instant::now();
        m.merge(MemberRecord::alive("b", addr(2)), now);
        let failed = MemberRecord {
            status: MemberStatus::Failed,
            ..MemberRecord::alive("b", addr(2))
        };
        assert_eq!(m.merge(failed, now).unwrap().kind, MemberEventKind::Failed);

        let stale_alive = MemberRecord::alive("b", addr(2));
        assert!(m.merge(stale_alive, now).is_none());

        let refuted = MemberRecord {
            incarnation: 1,
            ..MemberRecord::alive("b", addr(2))
        };
        assert_eq!(m.merge(refuted, now).unwrap().kind, MemberEventKind::Join);
        assert_eq!(m.status_of("b"), Some(MemberStatus::Alive));
    }

    #[test]
    fn test_local_refutes_failure_rumor() {
        let m = membership();
        let rumor = MemberRecord {
            status: MemberStatus::Failed,
            ..MemberRecord::alive("local", addr(1))
        };
        let event = m.merge(rumor, Instant::now()).unwrap();
        assert_eq!(event.kind, MemberEventKind::Update);
        assert_eq!(event.member.incarnation, 1);
        assert_eq!(m.local().status, MemberStatus::Alive);
    }

    #[test]
    fn test_direct_contact_revives_failed_peer() {
        let m = membership();
        let now = Instant::now();
        m.observe_alive(MemberRecord::alive("b", addr(2)), now);
        m.mark_suspect("b", now).unwrap();
        assert_eq!(m.expire_suspects(now + SUSPICION).len(), 1);
        assert_eq!(m.status_of("b"), Some(MemberStatus::Failed));
        assert!(m.mark_suspect("b", now).is_none());
        let event = m
            .observe_alive(MemberRecord::alive("b", addr(2)), now + SUSPICION)
            .unwrap();
        assert_eq!(event.kind, MemberEventKind::Join);
        assert_eq!(m.status_of("b"), Some(MemberStatus::Alive));
    }

    #[test]
    fn test_missed_ping_suspects_before_failing() {
        let m = membership();
        let start = Instant::now();
        m.observe_alive(MemberRecord::alive("b", addr(2)), start);

        let event = m.mark_suspect("b", start).unwrap();
        assert_eq!(event.kind, MemberEventKind::Suspect);
        assert!(m.mark_suspect("b", start).is_none());
        assert_eq!(m.alive().len(), 2);
        assert_eq!(m.random_alive_peers(10, &[]).len(), 1);

        assert!(m.expire_suspects(start + Duration::from_secs(4)).is_empty());
        assert_eq!(m.status_of("b"), Some(MemberStatus::Suspect));

        let expired = m.expire_suspects(start + SUSPICION);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].kind, MemberEventKind::Failed);
        assert_eq!(m.alive().len(), 1);
        assert!(m.expire_suspects(start + SUSPICION * 2).is_empty());
    }

    #[test]
    fn test_contact_clears_suspicion() {
        let m = membership();
        let start = Instant::now();
        m.observe_alive(MemberRecord::alive("b", addr(2)), start);
        m.mark_suspect("b", start);

        let event = m
            .observe_alive(MemberRecord::alive("b", addr(2)), start + Duration::from_secs(1))
            .unwrap();
        assert_eq!(event.kind, MemberEventKind::Update);
        assert_eq!(m.status_of("b"), Some(MemberStatus::Alive));
        assert!(m.expire_suspects(start + SUSPICION * 2).is_empty());
    }

    #[test]
    fn test_suspect_rumor_expires_locally() {
        let m = membership();
        let start = Instant::now();
        m.observe_alive(MemberRecord::alive("b", addr(2)), start);
        let rumor = MemberRecord {
            status: MemberStatus::Suspect,
            ..MemberRecord::alive("b", addr(2))
        };
        assert_eq!(m.merge(rumor.clone(), start).unwrap().kind, MemberEventKind::Suspect);
        assert!(m.merge(rumor, start + Duration::from_secs(3)).is_none());
        assert_eq!(m.expire_suspects(start + SUSPICION).len(), 1);
        assert_eq!(m.status_of("b"), Some(MemberStatus::Failed));
    }

    #[test]
    fn test_local_refutes_suspicion() {
        let m = membership();
        let rumor = MemberRecord {
            status: MemberStatus::Suspect,
            incarnation: 2,
            ..MemberRecord::alive("local", addr(1))
        };
        let event = m.merge(rumor, Instant::now()).unwrap();
        assert_eq!(event.member.incarnation, 3);
        assert_eq!(event.member.status, MemberStatus::Alive);
    }

    #[test]
    fn test_left_peer_is_not_revived_by_stale_packet() {
        let m = membership();
        let now = Instant::now();
        m.observe_alive(MemberRecord::alive("b", addr(2)), now);
        m.mark_left(MemberRecord::alive("b", addr(2)), now).unwrap();
        assert!(m
            .observe_alive(MemberRecord::alive("b", addr(2)), now)
            .is_none());
        assert!(m.alive().iter().all(|r| r.name != "b"));
    }

    #[test]
    fn test_reap_forgets_failed_after_timeout() {
        let m = membership();
        let start = Instant::now();
        m.observe_alive(MemberRecord::alive("b", addr(2)), start);
        m.observe_alive(MemberRecord::alive("c", addr(3)), start);
        m.mark_suspect("b", start);
        m.expire_suspects(start + SUSPICION);

        assert!(m.reap(start, Duration::from_secs(30)).is_empty());
        let reaped = m.reap(start + Duration::from_secs(31), Duration::from_secs(30));
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].member.name, "b");
        assert_eq!(m.status_of("b"), None);
        assert_eq!(m.status_of("c"), Some(MemberStatus::Alive));
    }

    #[test]
    fn test_random_alive_peers_excludes() {
        let m = membership();
        let now = Instant::now();
        for (i, name) in ["b", "c", "d"].iter().enumerate() {
            m.observe_alive(MemberRecord::alive(*name, addr(i as u8 + 2)), now);
        }
        let peers = m.random_alive_peers(10, &["c"]);
        assert_eq!(peers.len(), 2);
        assert!(peers.iter().all(|p| p.name != "c"));
        assert_eq!(m.random_alive_peers(1, &[]).len(), 1);
    }

    #[test]
    fn test_recent_rumors_lead_with_local() {
        let m = membership();
        m.observe_alive(MemberRecord::alive("b", addr(2)), Instant::now());
        let rumors = m.recent_rumors(8);
        assert_eq!(rumors[0].name, "local");
        assert_eq!(rumors.len(), 2);
    }

    #[test]
    fn test_leaving_local_is_not_alive() {
        let m = membership();
        let record = m.set_local_status(MemberStatus::Leaving);
        assert_eq!(record.incarnation, 1);
        assert!(m.alive().is_empty());
    }
}
