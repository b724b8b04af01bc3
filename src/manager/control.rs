//! Pause and resume of the service loop.

use crate::types::{Event, QueueStatus};

use super::QueueManager;

impl QueueManager {
    /// Stop taking new items without losing queue contents
    ///
    /// In-flight items run to completion. Only a processing manager can be paused; in any
    /// other state this is a no-op. Returns whether the state changed.
    pub fn pause(&self) -> bool {
        let paused = self.status_tx.send_if_modified(|status| {
            if *status == QueueStatus::Processing {
                *status = QueueStatus::Paused;
                true
            } else {
                false
            }
        });

        if paused {
            tracing::info!("Queue processing paused");
            self.emit_event(Event::QueuePaused);
        }
        paused
    }

    /// Resume taking items after [`pause`](Self::pause)
    ///
    /// No-op unless paused. Returns whether the state changed.
    pub fn resume(&self) -> bool {
        let resumed = self.status_tx.send_if_modified(|status| {
            if *status == QueueStatus::Paused {
                *status = QueueStatus::Processing;
                true
            } else {
                false
            }
        });

        if resumed {
            tracing::info!("Queue processing resumed");
            self.emit_event(Event::QueueResumed);
        }
        resumed
    }

    /// Current lifecycle state
    pub fn status(&self) -> QueueStatus {
        *self.status_tx.borrow()
    }
}
