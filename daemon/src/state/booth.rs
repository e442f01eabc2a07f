//! One capture session per flow, sharing a frame source and a frame store

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::capture::{FilmFilter, Frame, FrameSource, SessionStore, SinkError};
use crate::events::FlowEvent;

use super::machine::{CaptureSession, RunOutcome, SessionError, SessionStatus, StartOutcome};
use super::options::{Flow, SessionOptions};

/// Registry of the daemon's capture sessions
pub struct Booth {
    sessions: BTreeMap<Flow, CaptureSession>,
    source: Arc<dyn FrameSource>,
    store: Arc<SessionStore>,
}

impl Booth {
    /// Build a session for every flow from `presets`
    pub fn new(
        presets: &BTreeMap<Flow, SessionOptions>,
        source: Arc<dyn FrameSource>,
        store: Arc<SessionStore>,
        event_tx: broadcast::Sender<FlowEvent>,
    ) -> Result<Self, SessionError> {
        let mut sessions = BTreeMap::new();
        for flow in Flow::ALL {
            let options = presets
                .get(&flow)
                .copied()
                .unwrap_or_else(|| flow.default_options());
            let session = CaptureSession::new(flow, options, store.clone(), event_tx.clone())?;
            sessions.insert(flow, session);
        }

        Ok(Self {
            sessions,
            source,
            store,
        })
    }

    /// Session serving `flow`
    pub fn session(&self, flow: Flow) -> Option<&CaptureSession> {
        self.sessions.get(&flow)
    }

    /// Start a run for `flow` in the background
    ///
    /// Returns false if a run was already active.
    pub async fn start(&self, flow: Flow) -> bool {
        let Some(session) = self.session(flow) else {
            return false;
        };

        match session.start(self.source.clone()).await {
            StartOutcome::Started(handle) => {
                tokio::spawn(async move {
                    match handle.await {
                        Ok(Ok(RunOutcome::Completed(frames))) => {
                            info!(%flow, count = frames.len(), "run finished")
                        }
                        Ok(Ok(outcome)) => debug!(%flow, ?outcome, "run ended early"),
                        Ok(Err(e)) => warn!(%flow, error = %e, "run failed"),
                        Err(e) => warn!(%flow, error = %e, "run task panicked"),
                    }
                });
                true
            }
            StartOutcome::Ignored => false,
        }
    }

    /// Drive a run for `flow` to its end on the calling task
    pub async fn run(&self, flow: Flow) -> Result<RunOutcome, SessionError> {
        match self.session(flow) {
            Some(session) => session.run(self.source.clone()).await,
            None => Ok(RunOutcome::Ignored),
        }
    }

    pub async fn reset(&self, flow: Flow) {
        if let Some(session) = self.session(flow) {
            session.reset().await;
        }
    }

    /// Reset every session
    pub async fn reset_all(&self) {
        for session in self.sessions.values() {
            session.reset().await;
        }
    }

    /// Status of every session, in flow order
    pub async fn statuses(&self) -> Vec<SessionStatus> {
        let mut statuses = Vec::with_capacity(self.sessions.len());
        for session in self.sessions.values() {
            statuses.push(session.snapshot().await);
        }
        statuses
    }

    /// True if any session is mid-run
    pub async fn is_capturing(&self) -> bool {
        for session in self.sessions.values() {
            if session.state().await.is_active() {
                return true;
            }
        }
        false
    }

    /// Frames handed off by the last completed run of `flow`
    pub fn stored_frames(&self, flow: Flow) -> Vec<Frame> {
        self.store.get_item(flow.storage_key()).unwrap_or_default()
    }

    /// Frames produced by the last `develop` of `flow`
    #[cfg(test)]
    pub fn developed_frames(&self, flow: Flow) -> Vec<Frame> {
        self.store.get_item(flow.developed_key()).unwrap_or_default()
    }

    /// Apply the film filter to the stored frames of `flow`
    ///
    /// The raw frames are left untouched; the result is stored under the
    /// flow's developed key, so developing again gives the same frames.
    pub fn develop(&self, flow: Flow, filter: &FilmFilter) -> Result<Vec<Frame>, SinkError> {
        let developed: Vec<Frame> = self.stored_frames(flow).iter().map(|f| filter.apply(f)).collect();
        if !developed.is_empty() {
            self.store.set_item(flow.developed_key(), developed.clone())?;
        }
        info!(%flow, count = developed.len(), "frames developed");
        Ok(developed)
    }

    /// Storage keys currently holding frames
    pub fn stored_keys(&self) -> Vec<String> {
        self.store.keys()
    }

    /// Drop every stored frame
    pub fn clear_storage(&self) {
        self.store.clear();
    }
}
