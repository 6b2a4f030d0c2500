//! Wire messages exchanged between mesh members.

use crate::member::MemberRecord;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// A named event disseminated to every member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEvent {
    /// Name of the member that emitted the event.
    pub origin: String,
    /// Lamport time of the origin when the event was emitted.
    pub ltime: u64,
    /// Event name, used to select handlers.
    pub name: String,
    /// Opaque payload, framed by the receiver.
    pub payload: Vec<u8>,
    /// Broadcast flag passed through from the sender.
    pub broadcast: bool,
}

/// Messages of the gossip protocol. Each one travels in a single UDP datagram.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    /// Request to join sent to a seed.
    Join {
        /// Sender record.
        from: MemberRecord,
        /// Correlates the `JoinAck`.
        seq: u64,
    },
    /// Seed answer carrying its full member list.
    JoinAck {
        /// Sender record.
        from: MemberRecord,
        /// Echo of the `Join` sequence number.
        seq: u64,
        /// Source address the seed saw the `Join` come from.
        observed: SocketAddr,
        /// Every member the seed knows about.
        members: Vec<MemberRecord>,
    },
    /// Failure detection probe.
    Ping {
        /// Sender record.
        from: MemberRecord,
        /// Correlates the `Ack`.
        seq: u64,
        /// Piggy-backed member updates.
        rumors: Vec<MemberRecord>,
    },
    /// Probe answer.
    Ack {
        /// Sender record.
        from: MemberRecord,
        /// Echo of the `Ping` sequence number.
        seq: u64,
        /// Piggy-backed member updates.
        rumors: Vec<MemberRecord>,
    },
    /// User event.
    Event(UserEvent),
    /// Query, disseminated like an event and surfaced separately.
    Query(UserEvent),
    /// Graceful departure.
    Leave {
        /// Sender record with its final incarnation.
        from: MemberRecord,
    },
    /// Asks a relay to probe `target` after a direct probe went unanswered.
    PingReq {
        /// Requester record.
        from: MemberRecord,
        /// Correlates the `IndirectAck`.
        seq: u64,
        /// Member to probe.
        target: MemberRecord,
    },
    /// Relay answer: `target` acknowledged the relay's probe.
    IndirectAck {
        /// Relay record.
        from: MemberRecord,
        /// Echo of the `PingReq` sequence number.
        seq: u64,
        /// The member that answered.
        target: MemberRecord,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_survives_bincode() {
        let message = GossipMessage::Event(UserEvent {
            origin: "node-a".to_string(),
            ltime: 42,
            name: "backup".to_string(),
            payload: vec![0x61, 0x1f, 0x2a],
            broadcast: true,
        });
        let bytes = bincode::serialize(&message).unwrap();
        match bincode::deserialize::<GossipMessage>(&bytes).unwrap() {
            GossipMessage::Event(event) => {
                assert_eq!(event.ltime, 42);
                assert_eq!(event.payload, vec![0x61, 0x1f, 0x2a]);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_ping_req_carries_target() {
        let target = MemberRecord::alive("node-b", "127.0.0.1:7947".parse().unwrap());
        let message = GossipMessage::PingReq {
            from: MemberRecord::alive("node-a", "127.0.0.1:7946".parse().unwrap()),
            seq: 9,
            target: target.clone(),
        };
        let bytes = bincode::serialize(&message).unwrap();
        match bincode::deserialize::<GossipMessage>(&bytes).unwrap() {
            GossipMessage::PingReq { seq, target: t, .. } => {
                assert_eq!(seq, 9);
                assert_eq!(t, target);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(bincode::deserialize::<GossipMessage>(&[0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
    }
}
