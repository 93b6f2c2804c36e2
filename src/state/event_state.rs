use dashmap::DashMap;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ResolvingDownload,
    DownloadingArchive,
    InspectingArchive,
    AwaitingDecision,
    AdmittingToCache,
    AttachingToProfile,
    ActivatingMods,
    CleaningUp,
    BenchmarkingDisk,
    ResettingData,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventPayload {
    pub event_id: Uuid,
    pub event_type: EventType,
    /// Remote mod id the event concerns, when there is one.
    pub target_id: Option<i64>,
    pub message: String,
    /// Percent in 0..=100 for determinate stages.
    pub progress: Option<f64>,
    pub error: Option<String>,
}

#[derive(Clone)]
struct EventInfo {
    #[allow(dead_code)]
    event_type: EventType,
    #[allow(dead_code)]
    start_time: std::time::SystemTime,
}

pub type EventListener = Box<dyn Fn(&EventPayload) + Send + Sync>;

/// Fan-out point for progress reporting. Front-ends (the CLI, tests)
/// subscribe a callback; the installer, profiler and maintenance paths
/// publish through `emit`.
pub struct EventState {
    listeners: RwLock<Vec<EventListener>>,
    active_events: DashMap<Uuid, EventInfo>,
}

impl EventState {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            active_events: DashMap::new(),
        }
    }

    pub async fn subscribe(&self, listener: EventListener) {
        self.listeners.write().await.push(listener);
    }

    pub async fn emit(&self, payload: EventPayload) {
        if !self.active_events.contains_key(&payload.event_id) {
            self.active_events.insert(
                payload.event_id,
                EventInfo {
                    event_type: payload.event_type.clone(),
                    start_time: std::time::SystemTime::now(),
                },
            );
        }
        if payload.progress.map(|p| p >= 100.0).unwrap_or(false) {
            self.active_events.remove(&payload.event_id);
        }

        debug!(
            "event {:?} target={:?} progress={:?}: {}",
            payload.event_type, payload.target_id, payload.progress, payload.message
        );

        let listeners = self.listeners.read().await;
        for listener in listeners.iter() {
            listener(&payload);
        }
    }

    /// Convenience wrapper for determinate stage progress.
    pub async fn emit_progress(
        &self,
        event_id: Uuid,
        event_type: EventType,
        target_id: Option<i64>,
        message: impl Into<String>,
        progress: Option<f64>,
    ) {
        self.emit(EventPayload {
            event_id,
            event_type,
            target_id,
            message: message.into(),
            progress,
            error: None,
        })
        .await;
    }
}

impl Default for EventState {
    fn default() -> Self {
        Self::new()
    }
}
