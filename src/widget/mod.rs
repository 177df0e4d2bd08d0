//! Upload Widget
//!
//! Everything needed to bring up a hosted upload widget and read its results:
//! - `provider`: capability traits the host implements (factory, handle, callback sink)
//! - `options`: widget construction parameters and presets
//! - `bootstrap`: probe-with-backoff and the single-handle slot
//! - `mapper`: callback payload to [`UploadOutcome`]

pub mod bootstrap;
pub mod mapper;
pub mod options;
pub mod provider;

pub use bootstrap::{BootstrapOutcome, WidgetBootstrapper, WidgetSlot};
pub use mapper::{map_callback, CallbackPayload, UploadOutcome, WidgetEvent};
pub use options::WidgetOptions;
pub use provider::{
    CapabilityProvider, RegisteredCapability, UploadCallback, UploadResults, WidgetFactory,
    WidgetHandle,
};
