use crate::config::PredictionSinkKind;
use crate::models::RawRecord;
use crate::state::VersionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One served prediction, as handed to the monitoring collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionEvent {
    pub id: Uuid,
    pub record: RawRecord,
    pub predicted_price: f64,
    pub version: VersionId,
    pub bundle_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub feedback: Option<String>,
}

impl PredictionEvent {
    pub fn new(record: RawRecord, predicted_price: f64, version: VersionId, bundle_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            record,
            predicted_price,
            version,
            bundle_id,
            timestamp: Utc::now(),
            feedback: None,
        }
    }
}

/// Fire-and-forget receiver of prediction events. Never blocks the caller
/// and never fails from its point of view.
pub trait PredictionSink: Send + Sync {
    fn record(&self, event: PredictionEvent);
}

/// Emits each event as a structured tracing event
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl PredictionSink for TracingSink {
    fn record(&self, event: PredictionEvent) {
        let record = serde_json::to_string(&event.record).unwrap_or_default();
        tracing::info!(
            target: "prediction_log",
            id = %event.id,
            predicted_price = event.predicted_price,
            version = %event.version,
            bundle_id = %event.bundle_id,
            feedback = ?event.feedback,
            record = %record,
            "Prediction served"
        );
    }
}

/// Forwards events over a bounded channel; drops them when it is full
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<PredictionEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PredictionEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl PredictionSink for ChannelSink {
    fn record(&self, event: PredictionEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(id = %event.id, "Prediction sink full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::warn!(id = %event.id, "Prediction sink closed, dropping event");
            }
        }
    }
}

/// Discards every event
#[derive(Debug, Default, Clone)]
pub struct NullSink;

impl PredictionSink for NullSink {
    fn record(&self, _event: PredictionEvent) {}
}

/// Build the sink selected in configuration
pub fn create_sink(kind: &PredictionSinkKind) -> Arc<dyn PredictionSink> {
    match kind {
        PredictionSinkKind::Tracing => Arc::new(TracingSink),
        PredictionSinkKind::Disabled => Arc::new(NullSink),
    }
}
