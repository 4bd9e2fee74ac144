use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::info;
use ulid::Ulid;

use crate::model::{AppointmentRecord, SlotChange};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Customer-facing messages sent after a booking or cancellation commits.
///
/// Calls are fire-and-forget: the engine logs an `Err` and moves on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_confirmation(&self, record: &AppointmentRecord) -> Result<(), NotifyError>;
    async fn send_cancellation(&self, record: &AppointmentRecord) -> Result<(), NotifyError>;
}

/// Writes the messages to the log instead of a mail gateway.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_confirmation(&self, record: &AppointmentRecord) -> Result<(), NotifyError> {
        info!(
            to = %record.customer_email,
            subject = %format!("Appointment Confirmation - Reference: {}", record.reference),
            "Dear {}, your appointment at {} on {} from {} to {} has been confirmed.",
            record.customer_name,
            record.branch_name,
            record.date,
            record.start_time,
            record.end_time,
        );
        Ok(())
    }

    async fn send_cancellation(&self, record: &AppointmentRecord) -> Result<(), NotifyError> {
        info!(
            to = %record.customer_email,
            subject = %format!("Appointment Cancelled - Reference: {}", record.reference),
            "Dear {}, your appointment at {} on {} at {} has been cancelled.",
            record.customer_name,
            record.branch_name,
            record.date,
            record.start_time,
        );
        Ok(())
    }
}

/// Broadcast hub for slot change subscriptions.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<SlotChange>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to changes of a slot. Creates the channel if needed.
    pub fn subscribe(&self, slot_id: Ulid) -> broadcast::Receiver<SlotChange> {
        let sender = self
            .channels
            .entry(slot_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a change. No-op if nobody is listening.
    pub fn send(&self, change: &SlotChange) {
        if let Some(sender) = self.channels.get(&change.slot_id) {
            let _ = sender.send(change.clone());
        }
    }

    /// Drop channels whose subscribers have all gone away.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
