use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{session::SessionPhase, telemetry::LatencySample};

/// High-level event bus message kinds moving through the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Lifecycle,
    Detection,
    History,
    Notification,
}

/// Immutable event envelope handed to the UI layer and the telemetry store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Lifecycle(LifecycleEvent),
    Detection(DetectionEvent),
    History(HistoryEvent),
    Notification(NotificationEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub phase: SessionPhase,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub count: usize,
    pub labels: Vec<String>,
    pub latency: Option<LatencySample>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub records: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationLevel {
    Info,
    Error,
}

/// Single user-facing message, the only way errors reach the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
}

impl SystemEvent {
    pub fn new(kind: EventKind, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn lifecycle(phase: SessionPhase, details: impl Into<String>) -> Self {
        Self::new(
            EventKind::Lifecycle,
            EventPayload::Lifecycle(LifecycleEvent {
                phase,
                details: Some(details.into()),
            }),
        )
    }

    pub fn notification(
        level: NotificationLevel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            EventKind::Notification,
            EventPayload::Notification(NotificationEvent {
                level,
                title: title.into(),
                message: message.into(),
            }),
        )
    }
}
