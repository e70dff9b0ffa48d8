//! Action lifecycle observer

use crate::{ActionId, LraStatus};

/// Observer trait for external observability of orchestrated actions
pub trait LraObserver: Send + Sync + 'static {
    fn on_started(&self, id: &ActionId, parent: Option<&ActionId>);
    fn on_enlisted(&self, id: &ActionId, owner: &str, recovery_url: &str);
    fn on_work_failed(&self, id: &ActionId, error: &str);
    fn on_closed(&self, id: &ActionId, status: LraStatus);
    fn on_cancelled(&self, id: &ActionId, status: LraStatus);
    fn on_end_failed(&self, id: &ActionId, error: &str);
}

/// No-op observer
pub struct NoOpObserver;

impl LraObserver for NoOpObserver {
    fn on_started(&self, _id: &ActionId, _parent: Option<&ActionId>) {}
    fn on_enlisted(&self, _id: &ActionId, _owner: &str, _recovery_url: &str) {}
    fn on_work_failed(&self, _id: &ActionId, _error: &str) {}
    fn on_closed(&self, _id: &ActionId, _status: LraStatus) {}
    fn on_cancelled(&self, _id: &ActionId, _status: LraStatus) {}
    fn on_end_failed(&self, _id: &ActionId, _error: &str) {}
}

/// Tracing-based observer
pub struct TracingObserver;

impl LraObserver for TracingObserver {
    fn on_started(&self, id: &ActionId, parent: Option<&ActionId>) {
        match parent {
            Some(parent) => tracing::info!(lra_id = %id, parent_id = %parent, "Nested action started"),
            None => tracing::info!(lra_id = %id, "Action started"),
        }
    }

    fn on_enlisted(&self, id: &ActionId, owner: &str, recovery_url: &str) {
        tracing::debug!(lra_id = %id, owner = %owner, recovery_url = %recovery_url, "Participant enlisted");
    }

    fn on_work_failed(&self, id: &ActionId, error: &str) {
        tracing::warn!(lra_id = %id, error = %error, "Work failed, cancelling action");
    }

    fn on_closed(&self, id: &ActionId, status: LraStatus) {
        tracing::info!(lra_id = %id, status = ?status, "Action closed");
    }

    fn on_cancelled(&self, id: &ActionId, status: LraStatus) {
        tracing::info!(lra_id = %id, status = ?status, "Action cancelled");
    }

    fn on_end_failed(&self, id: &ActionId, error: &str) {
        tracing::error!(lra_id = %id, error = %error, "Coordinator failed to end action");
    }
}
