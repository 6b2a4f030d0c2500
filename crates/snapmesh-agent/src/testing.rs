//! Test double for the event mesh.

use async_trait::async_trait;
use snapmesh_gossip::error::Result;
use snapmesh_gossip::{
    DispatchReport, EventHandler, EventMesh, EventPayload, GossipError, HandlerRegistry, UserEvent,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Records every call instead of talking to peers.
#[derive(Default)]
pub struct RecordingMesh {
    alive: Mutex<Vec<String>>,
    sent: Mutex<Vec<(String, Vec<u8>)>>,
    seeds: Mutex<Vec<Vec<String>>>,
    handlers: HandlerRegistry,
    fail_join: Mutex<bool>,
    fail_send: Mutex<bool>,
    loops: AtomicUsize,
}

impl RecordingMesh {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(alive: I) -> Self {
        let mesh = Self::default();
        mesh.set_alive(alive);
        mesh
    }

    pub fn set_alive<I: IntoIterator<Item = S>, S: Into<String>>(&self, alive: I) {
        *self.alive.lock().unwrap() = alive.into_iter().map(Into::into).collect();
    }

    pub fn fail_joins(&self) {
        *self.fail_join.lock().unwrap() = true;
    }

    pub fn fail_sends(&self) {
        *self.fail_send.lock().unwrap() = true;
    }

    pub fn sent_events(&self) -> Vec<(String, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn join_calls(&self) -> Vec<Vec<String>> {
        self.seeds.lock().unwrap().clone()
    }

    pub fn event_loops_started(&self) -> usize {
        self.loops.load(Ordering::SeqCst)
    }

    pub fn handler_count(&self, name: &str) -> usize {
        self.handlers.handlers_for(name).len()
    }

    /// Runs the registered handlers as the event loop would.
    pub async fn deliver(&self, name: &str, payload: Vec<u8>) -> DispatchReport {
        let event = UserEvent {
            origin: "peer".to_string(),
            ltime: 1,
            name: name.to_string(),
            payload,
            broadcast: true,
        };
        self.handlers.dispatch(&event).await
    }
}

#[async_trait]
impl EventMesh for RecordingMesh {
    async fn join(&self, seeds: &[String]) -> Result<usize> {
        self.seeds.lock().unwrap().push(seeds.to_vec());
        if *self.fail_join.lock().unwrap() {
            return Err(GossipError::JoinFailed {
                attempted: seeds.len(),
                last_error: "unreachable".to_string(),
            });
        }
        Ok(seeds.len())
    }

    fn alive_members(&self) -> Vec<String> {
        self.alive.lock().unwrap().clone()
    }

    fn register_event_handler(&self, name: &str, handler: Arc<dyn EventHandler>) {
        self.handlers.register(name, handler);
    }

    async fn send_event(&self, name: &str, payload: &dyn EventPayload) -> Result<()> {
        if *self.fail_send.lock().unwrap() {
            return Err(GossipError::Left);
        }
        self.sent
            .lock()
            .unwrap()
            .push((name.to_string(), payload.encode()));
        Ok(())
    }

    async fn send_query(&self, name: &str, payload: &dyn EventPayload) -> Result<()> {
        self.send_event(name, payload).await
    }

    fn spawn_event_loop(&self) -> Result<JoinHandle<()>> {
        if self.loops.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(GossipError::EventLoopAlreadyRunning);
        }
        Ok(tokio::spawn(async {}))
    }

    async fn leave(&self) -> Result<()> {
        Ok(())
    }
}
