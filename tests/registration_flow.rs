//! End-to-end enable/disable scenarios against the public API, with
//! in-process fakes standing in for the host, the push provider and the
//! backend registry.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use pushbridge::{
    BackgroundReceiver, CoordinatorState, DeliveryHandler, DeliveryToken, DeviceType,
    EnableOutcome, HistoryCache, HostNotifier, HostPermissions, NotificationEntry,
    NotificationRegistry, NotifyError, PermissionGate, PermissionState, PushMessage, PushProvider,
    RegistrationCoordinator, SettingsStore,
};

struct FakeHost {
    current: Mutex<PermissionState>,
    prompt_answer: PermissionState,
    prompts: AtomicUsize,
}

impl FakeHost {
    fn unasked_then(answer: PermissionState) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(PermissionState::Unasked),
            prompt_answer: answer,
            prompts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl HostPermissions for FakeHost {
    fn current(&self) -> PermissionState {
        *self.current.lock().unwrap()
    }

    async fn prompt(&self) -> Result<PermissionState, NotifyError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().unwrap() = self.prompt_answer;
        Ok(self.prompt_answer)
    }
}

struct FakeProvider {
    results: Mutex<VecDeque<Result<DeliveryToken, NotifyError>>>,
}

impl FakeProvider {
    fn scripted(results: Vec<Result<DeliveryToken, NotifyError>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
        })
    }
}

#[async_trait]
impl PushProvider for FakeProvider {
    async fn acquire_token(&self) -> Result<DeliveryToken, NotifyError> {
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(DeliveryToken::new("tok-default")))
    }
}

/// Backend fake enforcing the at-most-one-record-per-token invariant, with
/// one history entry per registered token so cache freshness is observable.
#[derive(Default)]
struct FakeBackend {
    records: Mutex<HashMap<String, DeviceType>>,
    register_calls: AtomicUsize,
    history_fetches: AtomicUsize,
}

impl FakeBackend {
    fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationRegistry for FakeBackend {
    async fn register(
        &self,
        token: &DeliveryToken,
        device_type: DeviceType,
    ) -> Result<(), NotifyError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        // Idempotent upsert: re-registering refreshes, never duplicates.
        self.records
            .lock()
            .unwrap()
            .insert(token.as_str().to_string(), device_type);
        Ok(())
    }

    async fn unregister(&self, token: &DeliveryToken) -> Result<(), NotifyError> {
        // Removing an absent token is a no-op success.
        self.records.lock().unwrap().remove(token.as_str());
        Ok(())
    }

    async fn fetch_history(&self) -> Result<Vec<NotificationEntry>, NotifyError> {
        let fetch = self.history_fetches.fetch_add(1, Ordering::SeqCst);
        let records = self.records.lock().unwrap();
        Ok(records
            .keys()
            .enumerate()
            .map(|(index, token)| NotificationEntry {
                id: format!("n-{token}"),
                title: "Welcome".to_string(),
                body: format!("registered (fetch {fetch})"),
                payload: HashMap::new(),
                received_at: Utc.timestamp_opt(1_000 + index as i64, 0).unwrap(),
            })
            .collect())
    }
}

struct SharedNotifier {
    shown: Arc<Mutex<Vec<PushMessage>>>,
}

impl HostNotifier for SharedNotifier {
    fn display(&self, message: &PushMessage) -> Result<(), NotifyError> {
        self.shown.lock().unwrap().push(message.clone());
        Ok(())
    }
}

fn coordinator_with(
    host: Arc<FakeHost>,
    provider: Arc<FakeProvider>,
    backend: Arc<FakeBackend>,
    history: Arc<HistoryCache>,
) -> RegistrationCoordinator {
    RegistrationCoordinator::new(
        PermissionGate::new(host),
        provider,
        backend,
        history,
        DeviceType::Web,
    )
}

#[tokio::test]
async fn enable_happy_path_registers_and_invalidates_history_once() {
    let host = FakeHost::unasked_then(PermissionState::Granted);
    let provider = FakeProvider::scripted(vec![Ok(DeliveryToken::new("tok-123"))]);
    let backend = Arc::new(FakeBackend::default());
    let history = Arc::new(HistoryCache::new(Duration::from_secs(60)));
    let coordinator = coordinator_with(host.clone(), provider, backend.clone(), history.clone());

    // Populate the cache before enabling; no registrations yet.
    let before = history.fetch(backend.as_ref()).await.unwrap();
    assert!(before.is_empty());
    assert_eq!(backend.history_fetches.load(Ordering::SeqCst), 1);

    let outcome = coordinator.enable().await.unwrap();
    assert_eq!(outcome, EnableOutcome::Registered(DeliveryToken::new("tok-123")));
    assert!(matches!(
        coordinator.state(),
        CoordinatorState::Registered { .. }
    ));
    assert_eq!(host.prompts.load(Ordering::SeqCst), 1);
    assert_eq!(backend.record_count(), 1);

    // Registration invalidated the cache: exactly one more request, and the
    // fresh data reflects the new registration.
    let after = history.fetch(backend.as_ref()).await.unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(backend.history_fetches.load(Ordering::SeqCst), 2);

    // Still fresh, so the next read is served from memory.
    history.fetch(backend.as_ref()).await.unwrap();
    assert_eq!(backend.history_fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn denied_prompt_fails_the_attempt_but_not_future_ones() {
    let host = FakeHost::unasked_then(PermissionState::Denied);
    let provider = FakeProvider::scripted(vec![]);
    let backend = Arc::new(FakeBackend::default());
    let history = Arc::new(HistoryCache::new(Duration::from_secs(60)));
    let coordinator = coordinator_with(host, provider, backend.clone(), history);

    let error = coordinator.enable().await.unwrap_err();
    assert_eq!(error, NotifyError::PermissionDenied);
    assert!(matches!(coordinator.state(), CoordinatorState::Failed { .. }));
    assert_eq!(coordinator.last_failure(), Some(NotifyError::PermissionDenied));
    assert_eq!(backend.record_count(), 0);

    // Failed is retry-from-the-top, not terminal: the next enable runs.
    let error = coordinator.enable().await.unwrap_err();
    assert_eq!(error, NotifyError::PermissionDenied);
}

#[tokio::test]
async fn token_failure_keeps_grant_and_retry_skips_the_prompt() {
    let host = FakeHost::unasked_then(PermissionState::Granted);
    let provider = FakeProvider::scripted(vec![
        Err(NotifyError::TokenUnavailable {
            reason: "provider unreachable".to_string(),
        }),
        Ok(DeliveryToken::new("tok-retry")),
    ]);
    let backend = Arc::new(FakeBackend::default());
    let history = Arc::new(HistoryCache::new(Duration::from_secs(60)));
    let coordinator = coordinator_with(host.clone(), provider, backend.clone(), history);

    let error = coordinator.enable().await.unwrap_err();
    assert!(matches!(error, NotifyError::TokenUnavailable { .. }));
    assert!(matches!(coordinator.state(), CoordinatorState::Failed { .. }));
    // The grant survives the token failure.
    assert_eq!(host.current(), PermissionState::Granted);

    let outcome = coordinator.enable().await.unwrap();
    assert_eq!(
        outcome,
        EnableOutcome::Registered(DeliveryToken::new("tok-retry"))
    );
    // One prompt total: the retry saw Granted and skipped it.
    assert_eq!(host.prompts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repeated_registration_holds_exactly_one_record() {
    let backend = Arc::new(FakeBackend::default());
    let token = DeliveryToken::new("tok-123");

    for _ in 0..3 {
        backend.register(&token, DeviceType::Web).await.unwrap();
    }
    assert_eq!(backend.record_count(), 1);
    assert_eq!(backend.register_calls.load(Ordering::SeqCst), 3);

    backend.unregister(&token).await.unwrap();
    backend.unregister(&token).await.unwrap();
    assert_eq!(backend.record_count(), 0);
}

#[tokio::test]
async fn disable_unregisters_and_invalidates() {
    let host = FakeHost::unasked_then(PermissionState::Granted);
    let provider = FakeProvider::scripted(vec![Ok(DeliveryToken::new("tok-123"))]);
    let backend = Arc::new(FakeBackend::default());
    let history = Arc::new(HistoryCache::new(Duration::from_secs(60)));
    let coordinator = coordinator_with(host, provider, backend.clone(), history.clone());

    coordinator.enable().await.unwrap();
    history.fetch(backend.as_ref()).await.unwrap();
    let fetches_before = backend.history_fetches.load(Ordering::SeqCst);

    coordinator.disable().await.unwrap();
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
    assert_eq!(backend.record_count(), 0);

    // Teardown invalidated the cache too.
    history.fetch(backend.as_ref()).await.unwrap();
    assert_eq!(
        backend.history_fetches.load(Ordering::SeqCst),
        fetches_before + 1
    );

    // Disabling again stays a quiet no-op.
    coordinator.disable().await.unwrap();
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
}

struct AppDeliveryHandler {
    receiver: BackgroundReceiver<SharedNotifier>,
    coordinator: Arc<RegistrationCoordinator>,
}

impl DeliveryHandler for AppDeliveryHandler {
    fn on_payload(&self, raw: &str) {
        self.receiver.on_message(raw);
    }

    fn on_token_rotated(&self, token: DeliveryToken) {
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            let _ = coordinator.handle_token_rotation(token).await;
        });
    }
}

#[tokio::test]
async fn background_payloads_and_rotation_flow_through_the_handler() {
    let host = FakeHost::unasked_then(PermissionState::Granted);
    let provider = FakeProvider::scripted(vec![Ok(DeliveryToken::new("tok-123"))]);
    let backend = Arc::new(FakeBackend::default());
    let history = Arc::new(HistoryCache::new(Duration::from_secs(60)));
    let coordinator = Arc::new(coordinator_with(
        host,
        provider,
        backend.clone(),
        history,
    ));
    coordinator.enable().await.unwrap();

    let shown = Arc::new(Mutex::new(Vec::new()));
    let settings_dir = tempfile::tempdir().unwrap();
    let handler = AppDeliveryHandler {
        receiver: BackgroundReceiver::new(
            SharedNotifier {
                shown: shown.clone(),
            },
            SettingsStore::new(settings_dir.path().join("settings.json")),
        ),
        coordinator: coordinator.clone(),
    };

    // A malformed payload is dropped and must not poison the next one.
    handler.on_payload(r#"{"data":{"orphan":"true"}}"#);
    handler.on_payload(r#"{"notification":{"title":"Meal logged","body":"Nice"},"data":{"route":"/meals"}}"#);
    {
        let shown = shown.lock().unwrap();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].title, "Meal logged");
    }

    // Provider rotation re-registers the fresh token.
    handler.on_token_rotated(DeliveryToken::new("tok-rotated"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        coordinator.registered_token(),
        Some(DeliveryToken::new("tok-rotated"))
    );
    assert!(backend
        .records
        .lock()
        .unwrap()
        .contains_key("tok-rotated"));
}
