// Media Upload - hosted upload-widget bootstrap and token-scoped asset deletion

pub mod config;
pub mod types;
pub mod utils;
pub mod widget;     // Capability provider, widget options, bootstrap, result mapping
pub mod storage;    // Remote deletion (delete_by_token) and its coordinator
pub mod controller; // Composition root for one upload field

// Re-exports for convenience
pub use config::Config;
pub use controller::{ControllerSettings, UploadConsumer, UploadController};
pub use types::{AppResult, DeletionError, DeletionToken, UploadError, UploadValue, WidgetState};
