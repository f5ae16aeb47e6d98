//! Change Broadcast Port
//!
//! Fire-and-forget fan-out of structural-change notifications to peer
//! processes. Delivery is best-effort and unordered; the wire form is the
//! host's concern. Peers react by evicting their own cache slices.

use crate::appid::ApplicationId;
use chrono::{DateTime, Utc};
use crossbeam::channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notification that the structure of a workspace changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Process instance that produced the event, for self-echo
    /// suppression on the receiving side
    pub origin: Uuid,

    /// The workspace that changed
    pub app_id: ApplicationId,

    /// When the change was observed
    pub occurred_at: DateTime<Utc>,
}

/// Broadcast contract. Implementations must never block the mutating
/// thread.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, app_id: &ApplicationId);
}

/// Default broadcaster: records the notification in the log and nothing
/// else. Suitable for single-process deployments.
pub struct LogBroadcaster;

impl Broadcaster for LogBroadcaster {
    fn broadcast(&self, app_id: &ApplicationId) {
        log::debug!("Change notification for {}", app_id);
    }
}

/// Broadcaster feeding a bounded channel drained by the host's transport.
/// A full or disconnected channel drops the event rather than blocking.
pub struct ChannelBroadcaster {
    origin: Uuid,
    tx: Sender<ChangeEvent>,
}

impl ChannelBroadcaster {
    pub fn new(tx: Sender<ChangeEvent>) -> Self {
        Self {
            origin: Uuid::new_v4(),
            tx,
        }
    }

    /// The instance id stamped on outgoing events.
    pub fn origin(&self) -> Uuid {
        self.origin
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn broadcast(&self, app_id: &ApplicationId) {
        let event = ChangeEvent {
            origin: self.origin,
            app_id: app_id.clone(),
            occurred_at: Utc::now(),
        };
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!("Broadcast channel full; dropping notification for {}", app_id);
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("Broadcast channel closed; dropping notification for {}", app_id);
            }
        }
    }
}
