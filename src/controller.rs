//! Upload Controller
//!
//! Composition root for one upload field. Owns the widget bootstrap, the
//! result pump and the deletion coordinator, and exposes the small surface a
//! form needs: current value, `open()`, `remove()`, `error()` and `busy()`.
//!
//! ```text
//!  mount ──▶ bootstrap task ──probe/backoff──▶ WidgetSlot (one handle)
//!                                                   │ open()
//!                                                   ▼
//!  consumer ◀── on_change ◀── result pump ◀── UploadCallback (widget)
//!      ▲
//!      └──── on_change(None) ◀── remove() ──▶ DeletionCoordinator ──▶ API
//! ```
//!
//! Every background task holds the controller's [`CancellationToken`] and
//! checks it before touching local state, so a disposed controller never
//! reports a late upload, timeout or deletion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::storage::{DeletionCoordinator, DeletionTransport, RemovalOutcome};
use crate::types::{CurrentAsset, UploadError, UploadValue, WidgetState};
use crate::utils::retry::LinearBackoff;
use crate::widget::{
    map_callback, BootstrapOutcome, CallbackPayload, CapabilityProvider, UploadCallback,
    UploadOutcome, UploadResults, WidgetBootstrapper, WidgetOptions, WidgetSlot,
};

/// Receiver of controller output, usually a form field binding.
pub trait UploadConsumer: Send + Sync {
    /// Called once per successful upload and once per successful removal.
    fn on_change(&self, value: Option<&UploadValue>);

    fn on_error(&self, _error: &UploadError) {}
}

/// Mount-time settings for one controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub widget: WidgetOptions,
    pub backoff: LinearBackoff,
    pub initial_value: Option<UploadValue>,
    pub disabled: bool,
}

impl ControllerSettings {
    pub fn new(widget: WidgetOptions) -> Self {
        Self {
            widget,
            backoff: LinearBackoff::default(),
            initial_value: None,
            disabled: false,
        }
    }

    /// Form-field widget with the configured retry policy
    pub fn component(config: &Config) -> Self {
        Self::new(WidgetOptions::component(&config.cloudinary)).with_backoff(config.widget.backoff())
    }

    /// Page-level banner widget with the configured retry policy
    pub fn banner(config: &Config) -> Self {
        Self::new(WidgetOptions::banner(&config.cloudinary)).with_backoff(config.widget.backoff())
    }

    pub fn with_backoff(mut self, backoff: LinearBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_initial_value(mut self, value: Option<UploadValue>) -> Self {
        self.initial_value = value;
        self
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }
}

/// Where the controller's value stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    NoValue,
    HasValue,
    Removing,
}

#[derive(Default)]
struct LocalState {
    current: Option<CurrentAsset>,
    error: Option<String>,
}

struct Inner {
    id: Uuid,
    state: Mutex<LocalState>,
    disabled: AtomicBool,
    slot: Arc<WidgetSlot>,
    widget_state: watch::Receiver<WidgetState>,
    coordinator: DeletionCoordinator,
    consumer: Arc<dyn UploadConsumer>,
    cancel: CancellationToken,
}

impl Inner {
    fn local(&self) -> MutexGuard<'_, LocalState> {
        // Never held across an await; a poisoned lock still has consistent data.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn report(&self, error: UploadError) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.local().error = Some(error.user_message());
        self.consumer.on_error(&error);
    }

    fn handle_callback(&self, payload: CallbackPayload) {
        if self.cancel.is_cancelled() {
            return;
        }

        match map_callback(&payload) {
            UploadOutcome::Uploaded { value, token } => {
                info!(controller = %self.id, public_id = %value.public_id, "Upload succeeded");
                {
                    let mut local = self.local();
                    local.current = Some(CurrentAsset::uploaded(value.clone(), token));
                    local.error = None;
                }
                self.consumer.on_change(Some(&value));
            }
            UploadOutcome::Failed(message) => {
                warn!(controller = %self.id, error = %message, "Upload attempt failed");
                self.report(UploadError::UploadCallback(message));
            }
            UploadOutcome::Ignored => {}
        }
    }

    async fn pump(self: Arc<Self>, mut results: UploadResults) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                payload = results.recv() => match payload {
                    Some(payload) => self.handle_callback(payload),
                    None => break,
                },
            }
        }
        debug!(controller = %self.id, "Result pump stopped");
    }

    async fn bootstrap(self: Arc<Self>, bootstrapper: WidgetBootstrapper) {
        match bootstrapper.run(&self.cancel).await {
            BootstrapOutcome::Ready => {
                if !self.cancel.is_cancelled() {
                    self.local().error = None;
                }
            }
            BootstrapOutcome::TimedOut(error) => self.report(error),
            BootstrapOutcome::Cancelled => {}
        }
    }
}

pub struct UploadController {
    inner: Arc<Inner>,
}

impl UploadController {
    /// Mount a controller and start probing for the widget.
    ///
    /// Must be called inside a tokio runtime.
    pub fn mount(
        settings: ControllerSettings,
        provider: Arc<dyn CapabilityProvider>,
        transport: Arc<dyn DeletionTransport>,
        consumer: Arc<dyn UploadConsumer>,
    ) -> Self {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let slot = Arc::new(WidgetSlot::new());
        let (callback, results) = UploadCallback::channel();
        let configured = settings.widget.ensure_configured();

        let bootstrapper = WidgetBootstrapper::new(
            provider,
            settings.widget,
            settings.backoff,
            Arc::clone(&slot),
            callback,
        );

        let inner = Arc::new(Inner {
            id,
            state: Mutex::new(LocalState {
                current: settings.initial_value.map(CurrentAsset::external),
                error: None,
            }),
            disabled: AtomicBool::new(settings.disabled),
            slot,
            widget_state: bootstrapper.subscribe(),
            coordinator: DeletionCoordinator::new(transport),
            consumer,
            cancel,
        });

        info!(controller = %id, "Mounting upload controller");

        match configured {
            Ok(()) => {
                tokio::spawn(Arc::clone(&inner).bootstrap(bootstrapper));
                tokio::spawn(Arc::clone(&inner).pump(results));
            }
            Err(error) => {
                warn!(controller = %id, error = %error, "Upload widget not configured");
                bootstrapper.publish(WidgetState::Failed(error.to_string()));
                inner.report(error);
            }
        }

        Self { inner }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn value(&self) -> Option<UploadValue> {
        self.inner.local().current.as_ref().map(|c| c.value.clone())
    }

    pub fn has_deletion_token(&self) -> bool {
        self.inner
            .local()
            .current
            .as_ref()
            .is_some_and(|c| c.token.is_some())
    }

    pub fn error(&self) -> Option<String> {
        self.inner.local().error.clone()
    }

    pub fn busy(&self) -> bool {
        self.inner.coordinator.is_busy()
    }

    pub fn phase(&self) -> ControllerPhase {
        if self.busy() {
            ControllerPhase::Removing
        } else if self.inner.local().current.is_some() {
            ControllerPhase::HasValue
        } else {
            ControllerPhase::NoValue
        }
    }

    pub fn widget_state(&self) -> WidgetState {
        self.inner.widget_state.borrow().clone()
    }

    pub fn subscribe_widget_state(&self) -> watch::Receiver<WidgetState> {
        self.inner.widget_state.clone()
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.load(Ordering::Acquire)
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.inner.disabled.store(disabled, Ordering::Release);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Open the widget UI. Inert unless the widget is ready and the field is enabled.
    pub fn open(&self) -> bool {
        if self.is_disposed() || self.is_disabled() || !self.widget_state().is_ready() {
            return false;
        }
        self.inner.slot.open()
    }

    /// Apply an externally supplied value (form reset, record load).
    ///
    /// A deletion token survives only if the value is the one this controller
    /// just uploaded; any other value arrives without one.
    pub fn set_value(&self, value: Option<UploadValue>) {
        let mut local = self.inner.local();
        let keeps_token = matches!(
            (&local.current, &value),
            (Some(current), Some(incoming)) if current.value == *incoming
        );
        if !keeps_token {
            local.current = value.map(CurrentAsset::external);
        }
    }

    /// Remove the current asset, remotely when a token allows it.
    ///
    /// Errors are also delivered through `on_error` and `error()`. Local state
    /// changes only on confirmed (or token-less) success.
    pub async fn remove(&self) -> Result<RemovalOutcome, UploadError> {
        if self.is_disposed() || self.is_disabled() {
            return Ok(RemovalOutcome::Skipped);
        }

        let Some(current) = self.inner.local().current.clone() else {
            return Ok(RemovalOutcome::Skipped);
        };

        let result = self.inner.coordinator.remove(&current).await;

        if self.is_disposed() {
            return result.map_err(UploadError::from);
        }

        match result {
            Ok(outcome) if outcome.clears_local() => {
                let cleared = {
                    let mut local = self.inner.local();
                    // A new upload may have landed while the request was in flight.
                    if local.current.as_ref() == Some(&current) {
                        local.current = None;
                        local.error = None;
                        true
                    } else {
                        false
                    }
                };
                if cleared {
                    self.inner.consumer.on_change(None);
                }
                Ok(outcome)
            }
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let error = UploadError::from(e);
                self.inner.report(error.clone());
                Err(error)
            }
        }
    }

    /// Stop all background work and drop the widget handle.
    pub fn dispose(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        self.inner.cancel.cancel();
        self.inner.slot.release();
        debug!(controller = %self.inner.id, "Upload controller disposed");
    }
}

impl Drop for UploadController {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CloudinaryConfig;
    use crate::types::DeletionError;
    use crate::types::DeletionToken;
    use crate::widget::{WidgetFactory, WidgetHandle};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, AtomicUsize};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::Instant;

    // -------------------------------------------------------------------------
    // Fakes
    // -------------------------------------------------------------------------

    #[derive(Default)]
    struct FakeWidget {
        built: AtomicU32,
        opened: Arc<AtomicU32>,
        callback: Mutex<Option<UploadCallback>>,
    }

    impl FakeWidget {
        fn emit(&self, payload: CallbackPayload) {
            let callback = self.callback.lock().unwrap().clone();
            callback.expect("widget constructed").deliver(payload);
        }
    }

    struct FakeHandle {
        opened: Arc<AtomicU32>,
    }

    impl WidgetHandle for FakeHandle {
        fn open(&self) {
            self.opened.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl WidgetFactory for FakeWidget {
        fn create_upload_widget(
            &self,
            _options: &WidgetOptions,
            callback: UploadCallback,
        ) -> Box<dyn WidgetHandle> {
            self.built.fetch_add(1, Ordering::SeqCst);
            *self.callback.lock().unwrap() = Some(callback);
            Box::new(FakeHandle {
                opened: Arc::clone(&self.opened),
            })
        }
    }

    struct FakeProvider {
        widget: Arc<FakeWidget>,
        available: AtomicBool,
        probes: AtomicU32,
    }

    impl FakeProvider {
        fn new(available: bool) -> Arc<Self> {
            Arc::new(Self {
                widget: Arc::new(FakeWidget::default()),
                available: AtomicBool::new(available),
                probes: AtomicU32::new(0),
            })
        }
    }

    impl CapabilityProvider for FakeProvider {
        fn try_acquire(&self) -> Option<Arc<dyn WidgetFactory>> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.available
                .load(Ordering::SeqCst)
                .then(|| Arc::clone(&self.widget) as Arc<dyn WidgetFactory>)
        }
    }

    struct FakeTransport {
        calls: AtomicUsize,
        response: Mutex<Result<(), DeletionError>>,
        gate: Option<Arc<Notify>>,
    }

    impl FakeTransport {
        fn ok() -> Arc<Self> {
            Self::responding(Ok(()))
        }

        fn responding(response: Result<(), DeletionError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                response: Mutex::new(response),
                gate: None,
            })
        }

        fn gated(gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                response: Mutex::new(Ok(())),
                gate: Some(gate),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DeletionTransport for FakeTransport {
        async fn delete_by_token(&self, _token: &DeletionToken) -> Result<(), DeletionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.response.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct RecordingConsumer {
        changes: Mutex<Vec<Option<UploadValue>>>,
        errors: Mutex<Vec<UploadError>>,
    }

    impl RecordingConsumer {
        fn changes(&self) -> Vec<Option<UploadValue>> {
            self.changes.lock().unwrap().clone()
        }

        fn errors(&self) -> Vec<UploadError> {
            self.errors.lock().unwrap().clone()
        }
    }

    impl UploadConsumer for RecordingConsumer {
        fn on_change(&self, value: Option<&UploadValue>) {
            self.changes.lock().unwrap().push(value.cloned());
        }

        fn on_error(&self, error: &UploadError) {
            self.errors.lock().unwrap().push(error.clone());
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn settings() -> ControllerSettings {
        ControllerSettings::new(WidgetOptions::component(&CloudinaryConfig::new("demo", "preset")))
    }

    fn success_payload() -> CallbackPayload {
        serde_json::from_value(json!({
            "error": null,
            "result": {
                "event": "success",
                "info": {
                    "secure_url": "https://x/a.png",
                    "public_id": "a",
                    "delete_token": "tok1"
                }
            }
        }))
        .unwrap()
    }

    fn mount(
        settings: ControllerSettings,
        provider: &Arc<FakeProvider>,
        transport: &Arc<FakeTransport>,
    ) -> (UploadController, Arc<RecordingConsumer>) {
        let consumer = Arc::new(RecordingConsumer::default());
        let controller = UploadController::mount(
            settings,
            provider.clone(),
            transport.clone(),
            consumer.clone(),
        );
        (controller, consumer)
    }

    async fn wait_terminal(controller: &UploadController) -> WidgetState {
        let mut states = controller.subscribe_widget_state();
        let state = states.wait_for(|s| s.is_terminal()).await.unwrap().clone();
        state
    }

    /// Let spawned tasks drain their queues on the current-thread runtime.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    async fn uploaded_controller(
        transport: &Arc<FakeTransport>,
    ) -> (UploadController, Arc<FakeProvider>, Arc<RecordingConsumer>) {
        let provider = FakeProvider::new(true);
        let (controller, consumer) = mount(settings(), &provider, transport);
        assert_eq!(wait_terminal(&controller).await, WidgetState::Ready);
        provider.widget.emit(success_payload());
        settle().await;
        (controller, provider, consumer)
    }

    // -------------------------------------------------------------------------
    // Bootstrap
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reported_exactly_once() {
        let provider = FakeProvider::new(false);
        let transport = FakeTransport::ok();
        let started = Instant::now();
        let (controller, consumer) = mount(settings(), &provider, &transport);

        let state = wait_terminal(&controller).await;
        settle().await;

        assert!(matches!(state, WidgetState::Failed(_)));
        assert!(started.elapsed() >= Duration::from_millis(6300));
        assert!(started.elapsed() < Duration::from_millis(6400));
        assert_eq!(provider.probes.load(Ordering::SeqCst), 8);
        assert_eq!(
            consumer.errors(),
            vec![UploadError::InitializationTimeout { attempts: 8 }]
        );
        assert_eq!(
            controller.error().as_deref(),
            Some("Upload widget failed to load. Please refresh and try again.")
        );

        // Nothing keeps retrying after the budget is spent
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(provider.probes.load(Ordering::SeqCst), 8);
        assert_eq!(consumer.errors().len(), 1);
        assert!(!controller.open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_capability_builds_one_widget() {
        let provider = FakeProvider::new(false);
        let transport = FakeTransport::ok();
        let (controller, consumer) = mount(settings(), &provider, &transport);

        while provider.probes.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        provider.available.store(true, Ordering::SeqCst);

        assert_eq!(wait_terminal(&controller).await, WidgetState::Ready);
        assert_eq!(provider.probes.load(Ordering::SeqCst), 3);
        assert_eq!(provider.widget.built.load(Ordering::SeqCst), 1);

        assert!(controller.open());
        assert!(controller.open());
        assert_eq!(provider.widget.built.load(Ordering::SeqCst), 1);
        assert_eq!(provider.widget.opened.load(Ordering::SeqCst), 2);
        assert!(consumer.errors().is_empty());
        assert!(controller.error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_before_capability_builds_nothing() {
        let provider = FakeProvider::new(false);
        let transport = FakeTransport::ok();
        let (controller, consumer) = mount(settings(), &provider, &transport);

        controller.dispose();
        provider.available.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(provider.widget.built.load(Ordering::SeqCst), 0);
        assert!(!controller.widget_state().is_ready());
        assert!(!controller.open());
        assert!(consumer.changes().is_empty());
        assert!(consumer.errors().is_empty());
    }

    #[tokio::test]
    async fn test_not_configured_fails_without_probing() {
        let provider = FakeProvider::new(true);
        let transport = FakeTransport::ok();
        let settings =
            ControllerSettings::new(WidgetOptions::component(&CloudinaryConfig::new("", "")));
        let (controller, consumer) = mount(settings, &provider, &transport);
        settle().await;

        assert!(matches!(controller.widget_state(), WidgetState::Failed(_)));
        assert_eq!(provider.probes.load(Ordering::SeqCst), 0);
        assert!(matches!(
            consumer.errors().as_slice(),
            [UploadError::NotConfigured(_)]
        ));
        assert_eq!(controller.error().as_deref(), Some("Cloudinary is not configured."));
    }

    // -------------------------------------------------------------------------
    // Upload results
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_success_callback_updates_value_and_token() {
        let transport = FakeTransport::ok();
        let (controller, _provider, consumer) = uploaded_controller(&transport).await;

        let expected = UploadValue::new("https://x/a.png", "a");
        assert_eq!(controller.value(), Some(expected.clone()));
        assert!(controller.has_deletion_token());
        assert_eq!(controller.phase(), ControllerPhase::HasValue);
        assert_eq!(consumer.changes(), vec![Some(expected)]);
    }

    #[tokio::test]
    async fn test_failed_and_progress_callbacks_keep_value() {
        let transport = FakeTransport::ok();
        let (controller, provider, consumer) = uploaded_controller(&transport).await;

        provider.widget.emit(CallbackPayload::event("queues-end"));
        provider.widget.emit(CallbackPayload::failure("File size too large"));
        settle().await;

        assert_eq!(controller.value().map(|v| v.public_id), Some("a".to_string()));
        assert_eq!(consumer.changes().len(), 1);
        assert_eq!(
            consumer.errors(),
            vec![UploadError::UploadCallback("File size too large".to_string())]
        );
        assert_eq!(controller.error().as_deref(), Some("Upload failed. Please try again."));
        assert!(controller.widget_state().is_ready());

        // The next good upload clears the message
        provider.widget.emit(success_payload());
        settle().await;
        assert!(controller.error().is_none());
    }

    #[tokio::test]
    async fn test_callback_after_dispose_is_dropped() {
        let provider = FakeProvider::new(true);
        let transport = FakeTransport::ok();
        let (controller, consumer) = mount(settings(), &provider, &transport);
        assert_eq!(wait_terminal(&controller).await, WidgetState::Ready);

        controller.dispose();
        provider.widget.emit(success_payload());
        settle().await;

        assert!(controller.value().is_none());
        assert!(consumer.changes().is_empty());
    }

    #[tokio::test]
    async fn test_open_respects_disabled() {
        let provider = FakeProvider::new(true);
        let transport = FakeTransport::ok();
        let (controller, _consumer) =
            mount(settings().with_disabled(true), &provider, &transport);
        assert_eq!(wait_terminal(&controller).await, WidgetState::Ready);

        assert!(!controller.open());
        controller.set_disabled(false);
        assert!(controller.open());
        assert_eq!(provider.widget.opened.load(Ordering::SeqCst), 1);
    }

    // -------------------------------------------------------------------------
    // Removal
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_remove_without_token_is_local_only() {
        let provider = FakeProvider::new(true);
        let transport = FakeTransport::ok();
        let initial = UploadValue::new("https://x/saved.png", "saved");
        let (controller, consumer) = mount(
            settings().with_initial_value(Some(initial)),
            &provider,
            &transport,
        );
        assert!(!controller.has_deletion_token());

        let outcome = controller.remove().await;

        assert_eq!(outcome, Ok(RemovalOutcome::LocalOnly));
        assert_eq!(transport.calls(), 0);
        assert!(controller.value().is_none());
        assert_eq!(consumer.changes(), vec![None]);
        assert_eq!(controller.phase(), ControllerPhase::NoValue);
    }

    #[tokio::test]
    async fn test_remove_with_token_deletes_remotely() {
        let transport = FakeTransport::ok();
        let (controller, _provider, consumer) = uploaded_controller(&transport).await;

        assert_eq!(controller.remove().await, Ok(RemovalOutcome::RemoteDeleted));
        assert_eq!(transport.calls(), 1);
        assert!(controller.value().is_none());
        assert!(!controller.has_deletion_token());
        assert_eq!(consumer.changes().last(), Some(&None));

        // Nothing left to remove
        assert_eq!(controller.remove().await, Ok(RemovalOutcome::Skipped));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_deletion_preserves_state() {
        let transport = FakeTransport::responding(Err(DeletionError::Status(500)));
        let (controller, _provider, consumer) = uploaded_controller(&transport).await;

        let outcome = controller.remove().await;

        assert_eq!(
            outcome,
            Err(UploadError::Deletion(DeletionError::Status(500)))
        );
        assert_eq!(controller.value().map(|v| v.public_id), Some("a".to_string()));
        assert!(controller.has_deletion_token());
        assert_eq!(consumer.changes().len(), 1);
        assert_eq!(
            consumer.errors(),
            vec![UploadError::Deletion(DeletionError::Status(500))]
        );
        assert!(!controller.busy());

        // User retries once the service recovers
        *transport.response.lock().unwrap() = Ok(());
        assert_eq!(controller.remove().await, Ok(RemovalOutcome::RemoteDeleted));
        assert!(controller.value().is_none());
        assert!(controller.error().is_none());
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_remove_sends_one_request() {
        let gate = Arc::new(Notify::new());
        let transport = FakeTransport::gated(gate.clone());
        let (controller, _provider, consumer) = uploaded_controller(&transport).await;

        let (first, second) = futures::future::join(controller.remove(), async {
            assert_eq!(controller.phase(), ControllerPhase::Removing);
            assert!(controller.busy());
            let second = controller.remove().await;
            gate.notify_one();
            second
        })
        .await;

        assert_eq!(first, Ok(RemovalOutcome::RemoteDeleted));
        assert_eq!(second, Ok(RemovalOutcome::Skipped));
        assert_eq!(transport.calls(), 1);
        assert_eq!(consumer.changes(), vec![Some(UploadValue::new("https://x/a.png", "a")), None]);
    }

    #[tokio::test]
    async fn test_dispose_during_removal_keeps_state() {
        let gate = Arc::new(Notify::new());
        let transport = FakeTransport::gated(gate.clone());
        let (controller, _provider, consumer) = uploaded_controller(&transport).await;

        let (outcome, ()) = futures::future::join(controller.remove(), async {
            controller.dispose();
            gate.notify_one();
        })
        .await;

        // The request completed, but a disposed controller must not act on it
        assert_eq!(outcome, Ok(RemovalOutcome::RemoteDeleted));
        assert_eq!(transport.calls(), 1);
        assert_eq!(controller.value().map(|v| v.public_id), Some("a".to_string()));
        assert_eq!(consumer.changes().len(), 1);
        assert!(consumer.errors().is_empty());
    }

    #[tokio::test]
    async fn test_upload_during_removal_wins() {
        let gate = Arc::new(Notify::new());
        let transport = FakeTransport::gated(gate.clone());
        let (controller, provider, consumer) = uploaded_controller(&transport).await;

        let (outcome, ()) = futures::future::join(controller.remove(), async {
            provider.widget.emit(CallbackPayload::success(json!({
                "secure_url": "https://x/b.png",
                "public_id": "b",
                "delete_token": "tok2"
            })));
            settle().await;
            gate.notify_one();
        })
        .await;

        let replacement = UploadValue::new("https://x/b.png", "b");
        assert_eq!(outcome, Ok(RemovalOutcome::RemoteDeleted));
        assert_eq!(controller.value(), Some(replacement.clone()));
        assert!(controller.has_deletion_token());
        assert_eq!(
            consumer.changes(),
            vec![Some(UploadValue::new("https://x/a.png", "a")), Some(replacement)]
        );
    }

    #[tokio::test]
    async fn test_remove_inert_while_disabled() {
        let transport = FakeTransport::ok();
        let (controller, _provider, _consumer) = uploaded_controller(&transport).await;

        controller.set_disabled(true);
        assert_eq!(controller.remove().await, Ok(RemovalOutcome::Skipped));
        assert_eq!(transport.calls(), 0);
        assert!(controller.value().is_some());
    }

    // -------------------------------------------------------------------------
    // External value changes
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_external_value_drops_stale_token() {
        let transport = FakeTransport::ok();
        let (controller, _provider, consumer) = uploaded_controller(&transport).await;

        // Echo of our own upload keeps the token
        controller.set_value(Some(UploadValue::new("https://x/a.png", "a")));
        assert!(controller.has_deletion_token());

        // A different value never inherits it
        controller.set_value(Some(UploadValue::new("https://x/b.png", "b")));
        assert!(!controller.has_deletion_token());
        assert_eq!(controller.remove().await, Ok(RemovalOutcome::LocalOnly));
        assert_eq!(transport.calls(), 0);

        controller.set_value(None);
        assert!(controller.value().is_none());

        // set_value is a prop update, not a change notification
        assert_eq!(consumer.changes().len(), 2);
    }
}
