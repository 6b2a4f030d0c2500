#![warn(missing_docs)]

//! snapmesh agent: event payloads, quantum scheduling, snapshot orchestration, HTTP control plane, CLI

pub mod agent;
pub mod api;
pub mod cli;
pub mod config;
pub mod orchestrator;
pub mod payload;
pub mod schedule;

#[cfg(test)]
mod testing;

pub use agent::{Agent, AgentError, RetryPolicy};
pub use api::{AgentApi, BackupAccepted};
pub use config::AgentConfig;
pub use orchestrator::{Orchestrator, SnapshotError, SnapshotResult};
pub use payload::{BackupPayload, EmptyPayload, PayloadError};
pub use schedule::{next_quantum, ScheduleError};
