use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

use super::mapper::CallbackPayload;
use super::options::WidgetOptions;

/// Source of the upload-widget factory.
///
/// The factory usually appears some time after startup (a script finishes
/// loading, a plugin registers); `None` is an expected answer, not an error.
pub trait CapabilityProvider: Send + Sync {
    fn try_acquire(&self) -> Option<Arc<dyn WidgetFactory>>;
}

pub trait WidgetFactory: Send + Sync {
    fn create_upload_widget(
        &self,
        options: &WidgetOptions,
        callback: UploadCallback,
    ) -> Box<dyn WidgetHandle>;
}

/// Opaque handle to a constructed widget. There is no teardown API.
pub trait WidgetHandle: Send + Sync {
    fn open(&self);
}

/// Sink the widget reports into; the controller reads the other end.
#[derive(Debug, Clone)]
pub struct UploadCallback {
    tx: mpsc::UnboundedSender<CallbackPayload>,
}

pub type UploadResults = mpsc::UnboundedReceiver<CallbackPayload>;

impl UploadCallback {
    pub fn channel() -> (Self, UploadResults) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns `false` once the owning controller is gone.
    pub fn deliver(&self, payload: CallbackPayload) -> bool {
        self.tx.send(payload).is_ok()
    }

    /// Deliver a payload in the widget's JSON form.
    pub fn deliver_json(&self, json: &str) -> serde_json::Result<bool> {
        let payload: CallbackPayload = serde_json::from_str(json)?;
        Ok(self.deliver(payload))
    }
}

/// Provider backed by a registration slot, filled whenever the factory shows up.
#[derive(Default)]
pub struct RegisteredCapability {
    factory: RwLock<Option<Arc<dyn WidgetFactory>>>,
}

impl RegisteredCapability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, factory: Arc<dyn WidgetFactory>) {
        if let Ok(mut slot) = self.factory.write() {
            *slot = Some(factory);
        }
    }

    pub fn unregister(&self) {
        if let Ok(mut slot) = self.factory.write() {
            *slot = None;
        }
    }
}

impl CapabilityProvider for RegisteredCapability {
    fn try_acquire(&self) -> Option<Arc<dyn WidgetFactory>> {
        self.factory.read().ok().and_then(|slot| slot.clone())
    }
}
