//! Frame handoff
//!
//! Completed runs are delivered to a [`FrameSink`]. The daemon's sink is
//! [`SessionStore`], a per-flow keyed store that later stages read from.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, info};

use super::frame::Frame;
use crate::state::Flow;

/// Receives the ordered frames of a finished run
pub trait FrameSink: Send + Sync {
    fn deliver(&self, flow: Flow, frames: &[Frame]) -> Result<(), SinkError>;
}

/// Errors raised while handing frames off
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("storage quota exceeded: {needed} bytes needed, {limit} allowed")]
    QuotaExceeded { needed: usize, limit: usize },
}

/// Ephemeral keyed frame storage, scoped to the daemon's lifetime
#[derive(Debug, Default)]
pub struct SessionStore {
    items: RwLock<HashMap<String, Vec<Frame>>>,
    /// Upper bound on stored pixel bytes across all keys
    quota_bytes: Option<usize>,
}

impl SessionStore {
    /// Create an unbounded store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that refuses writes beyond `quota_bytes` of pixel data
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            items: RwLock::default(),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Store frames under `key`, replacing anything already there
    pub fn set_item(&self, key: &str, frames: Vec<Frame>) -> Result<(), SinkError> {
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());

        if let Some(limit) = self.quota_bytes {
            let others: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| byte_len(v))
                .sum();
            let needed = others + byte_len(&frames);
            if needed > limit {
                return Err(SinkError::QuotaExceeded { needed, limit });
            }
        }

        debug!(key, count = frames.len(), "storing frames");
        items.insert(key.to_owned(), frames);
        Ok(())
    }

    /// Frames stored under `key`, if any
    pub fn get_item(&self, key: &str) -> Option<Vec<Frame>> {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());
        items.get(key).cloned()
    }

    /// Remove and return the frames under `key`
    pub fn remove_item(&self, key: &str) -> Option<Vec<Frame>> {
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        items.remove(key)
    }

    /// Drop every stored item
    pub fn clear(&self) {
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        let count = items.len();
        items.clear();
        info!(count, "session store cleared");
    }

    /// Keys currently holding frames, sorted
    pub fn keys(&self) -> Vec<String> {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = items.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl FrameSink for SessionStore {
    fn deliver(&self, flow: Flow, frames: &[Frame]) -> Result<(), SinkError> {
        // Anything developed from the previous run is stale now
        if self.remove_item(flow.developed_key()).is_some() {
            debug!(%flow, "dropped developed frames of the previous run");
        }
        self.set_item(flow.storage_key(), frames.to_vec())
    }
}

fn byte_len(frames: &[Frame]) -> usize {
    frames.iter().map(|f| f.pixels().len()).sum()
}
