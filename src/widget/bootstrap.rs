//! Widget bootstrap
//!
//! Probes a [`CapabilityProvider`] on a linear backoff schedule and builds the
//! single widget handle a controller owns. The handle lives in a
//! [`WidgetSlot`] that moves `Unacquired -> Acquired -> Released` and never
//! goes back, so re-entering the bootstrap (a late retry, a second call)
//! cannot create a second widget.

use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::options::WidgetOptions;
use super::provider::{CapabilityProvider, UploadCallback, WidgetHandle};
use crate::types::{UploadError, WidgetState};
use crate::utils::retry::{with_retry, LinearBackoff, RetryError};

enum SlotState {
    Unacquired,
    Acquired(Arc<dyn WidgetHandle>),
    Released,
}

/// Exclusive home of one controller's widget handle.
pub struct WidgetSlot {
    state: Mutex<SlotState>,
}

impl WidgetSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Unacquired),
        }
    }

    /// Build the handle with `make` unless one was ever built.
    ///
    /// Returns `true` when a handle has been acquired, whether now or earlier.
    fn acquire_with<F>(&self, make: F) -> bool
    where
        F: FnOnce() -> Option<Box<dyn WidgetHandle>>,
    {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };

        match *state {
            SlotState::Acquired(_) => return true,
            SlotState::Released => return false,
            SlotState::Unacquired => {}
        }

        match make() {
            Some(handle) => {
                *state = SlotState::Acquired(Arc::from(handle));
                true
            }
            None => false,
        }
    }

    /// Open the widget UI. No-op unless a handle is held.
    pub fn open(&self) -> bool {
        let handle = match self.state.lock().as_deref() {
            Ok(SlotState::Acquired(handle)) => Arc::clone(handle),
            _ => return false,
        };
        handle.open();
        true
    }

    /// Drop our reference. The widget itself has no teardown API.
    pub fn release(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = SlotState::Released;
        }
    }
}

impl Default for WidgetSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Ready,
    TimedOut(UploadError),
    Cancelled,
}

pub struct WidgetBootstrapper {
    provider: Arc<dyn CapabilityProvider>,
    options: WidgetOptions,
    policy: LinearBackoff,
    slot: Arc<WidgetSlot>,
    callback: UploadCallback,
    state: watch::Sender<WidgetState>,
}

impl WidgetBootstrapper {
    pub fn new(
        provider: Arc<dyn CapabilityProvider>,
        options: WidgetOptions,
        policy: LinearBackoff,
        slot: Arc<WidgetSlot>,
        callback: UploadCallback,
    ) -> Self {
        let (state, _) = watch::channel(WidgetState::Uninitialized);
        Self {
            provider,
            options,
            policy,
            slot,
            callback,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<WidgetState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> WidgetState {
        self.state.borrow().clone()
    }

    /// Publish a transition. Terminal states are sticky.
    pub(crate) fn publish(&self, next: WidgetState) {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// One probe. Idempotent once a handle exists; never builds after `cancel`.
    pub fn try_initialize(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }

        self.slot.acquire_with(|| {
            let factory = self.provider.try_acquire()?;
            if cancel.is_cancelled() {
                return None;
            }
            debug!(cloud_name = %self.options.cloud_name, "Constructing upload widget");
            Some(factory.create_upload_widget(&self.options, self.callback.clone()))
        })
    }

    /// Probe until ready, exhausted, or cancelled.
    pub async fn run(&self, cancel: &CancellationToken) -> BootstrapOutcome {
        let result = with_retry(&self.policy, cancel, |attempt| {
            self.publish(WidgetState::Probing { attempt });
            self.try_initialize(cancel).then_some(())
        })
        .await;

        match result {
            Ok(()) => {
                self.publish(WidgetState::Ready);
                info!("Upload widget ready");
                BootstrapOutcome::Ready
            }
            Err(RetryError::Exhausted { attempts }) => {
                let error = UploadError::InitializationTimeout { attempts };
                warn!(
                    attempts,
                    waited_ms = self.policy.worst_case().as_millis() as u64,
                    "Upload widget never became available"
                );
                self.publish(WidgetState::Failed(error.to_string()));
                BootstrapOutcome::TimedOut(error)
            }
            Err(RetryError::Cancelled) => {
                debug!("Widget bootstrap cancelled");
                BootstrapOutcome::Cancelled
            }
        }
    }
}
