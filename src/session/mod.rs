//! Live output channels keyed by `{instance_id}_{role}`.
//!
//! Each channel keeps a replay buffer and a set of viewers. Every viewer owns a
//! bounded queue; publishing never waits on a viewer, a full queue just loses
//! that message for that viewer.

mod buffer;
mod messages;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

pub use buffer::{HistoryRange, LogEntry, OutputRing, OutputStream};
pub use messages::{Inbound, Outbound};

use crate::error::{AppError, Result};
use crate::validation::parse_session_key;

pub fn session_key(instance_id: &str, role: &str) -> String {
    format!("{}_{}", instance_id, role)
}

/// Receives stdin data routed from viewers.
pub trait InputSink: Send + Sync {
    fn send_input(&self, instance_id: &str, role: &str, data: Vec<u8>) -> Result<()>;
}

struct ChannelState {
    ring: OutputRing,
    viewers: HashMap<Uuid, mpsc::Sender<Outbound>>,
    dropped: u64,
}

struct SessionChannel {
    state: Mutex<ChannelState>,
}

impl SessionChannel {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                ring: OutputRing::new(capacity),
                viewers: HashMap::new(),
                dropped: 0,
            }),
        }
    }
}

/// A registered viewer: replay first, then live messages from `receiver`.
#[derive(Debug)]
pub struct Attachment {
    pub viewer_id: Uuid,
    pub history: Vec<LogEntry>,
    pub receiver: mpsc::Receiver<Outbound>,
}

pub struct Multiplexer {
    sessions: RwLock<HashMap<String, Arc<SessionChannel>>>,
    history_capacity: usize,
    viewer_queue: usize,
}

impl Multiplexer {
    pub fn new(history_capacity: usize, viewer_queue: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            history_capacity,
            viewer_queue: viewer_queue.max(1),
        }
    }

    fn channel(&self, key: &str) -> Option<Arc<SessionChannel>> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(key).map(Arc::clone)
    }

    fn channel_or_create(&self, key: &str) -> Arc<SessionChannel> {
        if let Some(channel) = self.channel(key) {
            return channel;
        }
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let channel = sessions
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(SessionChannel::new(self.history_capacity)));
        Arc::clone(channel)
    }

    pub fn has_session(&self, key: &str) -> bool {
        self.channel(key).is_some()
    }

    /// Register a viewer. The replay snapshot and the registration happen under
    /// the channel lock, so no line is both replayed and delivered live.
    pub fn attach(&self, key: &str, range: &HistoryRange) -> Attachment {
        let channel = self.channel_or_create(key);
        let (tx, receiver) = mpsc::channel(self.viewer_queue);
        let viewer_id = Uuid::new_v4();

        let mut state = channel.state.lock().unwrap_or_else(|e| e.into_inner());
        let history = state.ring.snapshot(range);
        state.viewers.insert(viewer_id, tx);
        let viewers = state.viewers.len();
        drop(state);

        log::info!(
            "Viewer {} attached to {} ({} viewers, {} history lines)",
            viewer_id,
            key,
            viewers,
            history.len()
        );
        Attachment {
            viewer_id,
            history,
            receiver,
        }
    }

    /// Remove one viewer. The channel and its history stay.
    pub fn detach(&self, key: &str, viewer_id: Uuid) {
        let Some(channel) = self.channel(key) else {
            return;
        };
        let mut state = channel.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.viewers.remove(&viewer_id).is_some() {
            log::info!("Viewer {} detached from {}", viewer_id, key);
        }
    }

    /// Append a captured line and fan it out.
    pub fn publish(&self, key: &str, stream: OutputStream, line: String) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            stream,
            line,
        };
        let channel = self.channel_or_create(key);
        let mut state = channel.state.lock().unwrap_or_else(|e| e.into_inner());
        let message = Outbound::from(&entry);
        state.ring.push(entry);
        deliver(key, &mut state, &message);
    }

    /// Send an informational message to current viewers without recording it.
    pub fn publish_status(&self, key: &str, message: impl Into<String>) {
        let Some(channel) = self.channel(key) else {
            return;
        };
        let mut state = channel.state.lock().unwrap_or_else(|e| e.into_inner());
        deliver(key, &mut state, &Outbound::status(message));
    }

    pub fn history(&self, key: &str, range: &HistoryRange) -> Result<Vec<LogEntry>> {
        let channel = self
            .channel(key)
            .ok_or_else(|| AppError::session_not_found(key))?;
        let state = channel.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.ring.snapshot(range))
    }

    #[cfg(test)]
    fn viewer_count(&self, key: &str) -> usize {
        self.channel(key).map_or(0, |channel| {
            let state = channel.state.lock().unwrap_or_else(|e| e.into_inner());
            state.viewers.len()
        })
    }

    /// Route one viewer message. The returned message, if any, goes back to that
    /// viewer only.
    pub fn handle_inbound(&self, key: &str, message: Inbound, sink: &dyn InputSink) -> Option<Outbound> {
        if !self.has_session(key) {
            return Some(Outbound::error(AppError::session_not_found(key).message()));
        }

        match message {
            Inbound::Ping => Some(Outbound::Pong),
            Inbound::Input { data } => {
                let routed = parse_session_key(key)
                    .and_then(|(instance_id, role)| sink.send_input(instance_id, role, data.into_bytes()));
                routed.err().map(|e| Outbound::error(e.message()))
            }
            Inbound::Resize { cols, rows } => {
                let role = parse_session_key(key).map_or("target", |(_, role)| role);
                Some(Outbound::status(format!(
                    "Resize to {}x{} ignored: {} runs without a terminal",
                    cols, rows, role
                )))
            }
            Inbound::RequestHistory { since, until } => {
                match self.history(key, &HistoryRange { since, until }) {
                    Ok(logs) => Some(Outbound::HistoryLogs { logs }),
                    Err(e) => Some(Outbound::error(e.message())),
                }
            }
        }
    }

    /// Drop every session of an instance. Attached viewers see their stream end.
    pub fn remove_instance_sessions(&self, instance_id: &str) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(
            |key, _| !matches!(parse_session_key(key), Ok((owner, _)) if owner == instance_id),
        );
        before - sessions.len()
    }
}

fn deliver(key: &str, state: &mut ChannelState, message: &Outbound) {
    let mut closed = Vec::new();
    let mut dropped = 0;
    for (viewer_id, tx) in &state.viewers {
        match tx.try_send(message.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => dropped += 1,
            Err(TrySendError::Closed(_)) => closed.push(*viewer_id),
        }
    }
    for viewer_id in closed {
        state.viewers.remove(&viewer_id);
        log::info!("Viewer {} on {} went away, detached", viewer_id, key);
    }
    if dropped > 0 {
        state.dropped += dropped;
        log::warn!(
            "Session {}: {} slow viewer(s) missed a message ({} dropped so far)",
            key,
            dropped,
            state.dropped
        );
    }
}
