// Remote asset deletion

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub mod cloudinary_client;

pub use cloudinary_client::*;

use crate::types::{CurrentAsset, DeletionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// The remote asset was deleted
    RemoteDeleted,
    /// No token, so nothing was sent. The remote asset may be orphaned.
    LocalOnly,
    /// Another removal is still in flight
    Skipped,
}

impl RemovalOutcome {
    /// Whether the caller should clear its local value.
    pub fn clears_local(&self) -> bool {
        matches!(self, RemovalOutcome::RemoteDeleted | RemovalOutcome::LocalOnly)
    }
}

/// Token-scoped deletion with a single in-flight request.
///
/// Failures are never retried here; the user retries by removing again.
pub struct DeletionCoordinator {
    transport: Arc<dyn DeletionTransport>,
    busy: AtomicBool,
}

/// Clears the busy flag when the in-flight removal finishes or is dropped.
struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl DeletionCoordinator {
    pub fn new(transport: Arc<dyn DeletionTransport>) -> Self {
        Self {
            transport,
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn remove(&self, current: &CurrentAsset) -> Result<RemovalOutcome, DeletionError> {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            return Ok(RemovalOutcome::Skipped);
        };

        let public_id = current.value.public_id.as_str();

        match &current.token {
            Some(token) => {
                self.transport.delete_by_token(token).await.map_err(|e| {
                    warn!(public_id, error = %e, "Failed to remove asset remotely");
                    e
                })?;
                info!(public_id, "Asset deleted remotely");
                Ok(RemovalOutcome::RemoteDeleted)
            }
            None => {
                warn!(public_id, "No deletion token, clearing locally; remote asset is kept");
                Ok(RemovalOutcome::LocalOnly)
            }
        }
    }
}
