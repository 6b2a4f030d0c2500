#![warn(missing_docs)]

//! snapmesh gossip subsystem: SWIM-style membership, user event dissemination over UDP, named event handlers

pub mod config;
pub mod error;
pub mod gossiper;
pub mod handler;
pub mod member;
pub mod message;
pub mod snapshot;
pub mod transport;

pub use config::GossipConfig;
pub use error::GossipError;
pub use gossiper::{EventMesh, EventPayload, Gossiper, MeshEvent, MeshState};
pub use handler::{DispatchReport, EventHandler, Flow, HandlerRegistry};
pub use member::{MemberRecord, MemberStatus};
pub use message::UserEvent;
