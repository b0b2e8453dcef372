use crate::error::AppError;
use crate::signal::api::{push_endpoint, SignalSource};
use crate::signal::connection::{PushChannel, PushConnector, PushEvent, SessionEvent};
use crate::signal::now_unix_ms;
use crate::signal::types::{
    merge_signal_patch, CandleSeries, ConnectionStatus, PushMessage, SignalSnapshot, SyncParams,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const COMMAND_QUEUE_CAPACITY: usize = 64;

/// The single authoritative snapshot/series pair plus connectivity.
#[derive(Debug, Default)]
pub struct SignalStore {
    params: SyncParams,
    generation: u64,
    snapshot: Option<SignalSnapshot>,
    series: CandleSeries,
    connection: Option<ConnectionStatus>,
    push_connected: bool,
    revision: u64,
    last_update_ms: Option<i64>,
    last_error: Option<String>,
}

/// Read-only copy of the store handed to the presentation layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncView {
    pub params: SyncParams,
    pub snapshot: Option<SignalSnapshot>,
    pub series: CandleSeries,
    pub connection: ConnectionStatus,
    pub connected: bool,
    pub revision: u64,
    pub last_update_ms: Option<i64>,
    pub last_error: Option<String>,
}

impl SignalStore {
    pub fn new(params: SyncParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    pub fn view(&self) -> SyncView {
        SyncView {
            params: self.params.clone(),
            snapshot: self.snapshot.clone(),
            series: self.series.clone(),
            connection: self
                .connection
                .clone()
                .unwrap_or_else(ConnectionStatus::idle),
            connected: self.push_connected,
            revision: self.revision,
            last_update_ms: self.last_update_ms,
            last_error: self.last_error.clone(),
        }
    }

    fn bump(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

#[derive(Debug)]
pub struct RefreshResult {
    pub id: u64,
    pub generation: u64,
    pub result: Result<(SignalSnapshot, CandleSeries), AppError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshApplyOutcome {
    Applied,
    Superseded { generation: u64, current: u64 },
    Failed(String),
}

/// Replaces snapshot and series together; a failed fetch leaves both untouched.
pub fn apply_refresh(
    store: &mut SignalStore,
    generation: u64,
    result: &Result<(SignalSnapshot, CandleSeries), AppError>,
    now_ms: i64,
) -> RefreshApplyOutcome {
    if generation != store.generation {
        return RefreshApplyOutcome::Superseded {
            generation,
            current: store.generation,
        };
    }

    match result {
        Ok((snapshot, series)) => {
            store.snapshot = Some(snapshot.clone());
            store.series = series.clone();
            store.last_update_ms = Some(now_ms);
            store.last_error = None;
            store.bump();
            RefreshApplyOutcome::Applied
        }
        Err(error) => {
            let reason = error.to_string();
            store.last_error = Some(reason.clone());
            store.bump();
            RefreshApplyOutcome::Failed(reason)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushApplyOutcome {
    Merged,
    Connected,
    Ignored,
    Rejected(String),
}

pub fn apply_push_message(
    store: &mut SignalStore,
    message: &PushMessage,
    now_ms: i64,
) -> PushApplyOutcome {
    match message {
        PushMessage::SignalUpdate(patch) => {
            match merge_signal_patch(store.snapshot.as_ref(), patch) {
                Ok(merged) => {
                    store.snapshot = Some(merged);
                    store.last_update_ms = Some(now_ms);
                    store.bump();
                    PushApplyOutcome::Merged
                }
                Err(error) => PushApplyOutcome::Rejected(error.to_string()),
            }
        }
        PushMessage::Connected { .. } => {
            store.push_connected = true;
            store.bump();
            PushApplyOutcome::Connected
        }
        PushMessage::ServerError { .. } | PushMessage::Unknown(_) => PushApplyOutcome::Ignored,
    }
}

pub fn apply_connection_status(store: &mut SignalStore, status: ConnectionStatus) {
    if status.exhausted {
        store.last_error = Some(
            AppError::RetriesExhausted {
                attempts: status.retry_count,
            }
            .to_string(),
        );
    }
    store.push_connected = status.is_connected();
    store.connection = Some(status);
    store.bump();
}

/// Installs new parameters. Returns true when the signal identity changed.
pub fn apply_params(store: &mut SignalStore, params: SyncParams) -> bool {
    let identity_changed = !store.params.same_identity(&params);
    store.params = params;
    store.generation = store.generation.wrapping_add(1);
    if identity_changed {
        store.snapshot = None;
        store.series = CandleSeries::default();
        store.last_update_ms = None;
    }
    store.push_connected = false;
    store.connection = None;
    store.last_error = None;
    store.bump();
    identity_changed
}

type Reply<T> = oneshot::Sender<Result<T, AppError>>;

enum SyncCommand {
    Configure { params: SyncParams, reply: Reply<()> },
    RefreshNow { reply: Reply<()> },
    SetRefreshInterval { secs: u64, reply: Reply<()> },
    SetMtf { enabled: bool, reply: Reply<()> },
    ForceReconnect { reply: Reply<()> },
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub ws_base_url: String,
    pub reconnect_base_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl SyncOptions {
    pub fn new(ws_base_url: impl Into<String>) -> Self {
        Self {
            ws_base_url: ws_base_url.into(),
            reconnect_base_delay: crate::signal::connection::RECONNECT_BASE_DELAY,
            max_reconnect_attempts: crate::signal::connection::MAX_RECONNECT_ATTEMPTS,
        }
    }
}

fn refresh_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Actor that serializes every write to the signal store.
pub struct SignalSyncClient {
    source: Arc<dyn SignalSource>,
    push: PushChannel,
    ws_base_url: String,
    store: Arc<Mutex<SignalStore>>,
    revisions: watch::Sender<u64>,
    pending_replies: HashMap<u64, Reply<()>>,
    next_refresh_id: u64,
}

impl SignalSyncClient {
    pub fn spawn(
        source: Arc<dyn SignalSource>,
        connector: Arc<dyn PushConnector>,
        options: SyncOptions,
        initial_params: SyncParams,
    ) -> SyncHandle {
        let (push_sender, push_events) = mpsc::unbounded_channel();
        let (command_sender, commands) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (revisions, revision_receiver) = watch::channel(0_u64);
        let store = Arc::new(Mutex::new(SignalStore::new(initial_params)));
        let cancellation_token = CancellationToken::new();

        let client = Self {
            source,
            push: PushChannel::with_limits(
                connector,
                push_sender,
                options.reconnect_base_delay,
                options.max_reconnect_attempts,
            ),
            ws_base_url: options.ws_base_url,
            store: Arc::clone(&store),
            revisions,
            pending_replies: HashMap::new(),
            next_refresh_id: 0,
        };

        let join_handle = tokio::spawn(client.run(commands, push_events, cancellation_token.clone()));

        SyncHandle {
            commands: command_sender,
            store,
            revisions: revision_receiver,
            cancellation_token,
            join_handle: Some(join_handle),
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SyncCommand>,
        mut push_events: mpsc::UnboundedReceiver<SessionEvent>,
        cancel_token: CancellationToken,
    ) {
        let mut ticker = refresh_ticker(self.store.lock().params.refresh_interval());
        let mut in_flight: JoinSet<RefreshResult> = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                command = commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.handle_command(command, &mut ticker, &mut in_flight).await;
                }
                Some(event) = push_events.recv() => {
                    self.handle_push_event(event);
                }
                _ = ticker.tick() => {
                    tracing::debug!("refresh timer fired");
                    self.spawn_refresh(&mut in_flight, None);
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.finish_refresh(joined);
                }
            }
        }

        self.push.stop().await;
        in_flight.abort_all();
        while in_flight.join_next().await.is_some() {}
        for (_, reply) in self.pending_replies.drain() {
            let _ = reply.send(Err(AppError::ChannelClosed));
        }
        tracing::info!("signal sync client stopped");
    }

    async fn handle_command(
        &mut self,
        command: SyncCommand,
        ticker: &mut Interval,
        in_flight: &mut JoinSet<RefreshResult>,
    ) {
        match command {
            SyncCommand::Configure { params, reply } => {
                let endpoint = match push_endpoint(&self.ws_base_url, &params) {
                    Ok(endpoint) => endpoint,
                    Err(error) => {
                        let _ = reply.send(Err(error));
                        return;
                    }
                };

                let period = params.refresh_interval();
                let identity_changed = {
                    let mut store = self.store.lock();
                    apply_params(&mut store, params)
                };
                self.publish();
                tracing::info!(identity_changed, endpoint = %endpoint, "sync parameters configured");

                *ticker = refresh_ticker(period);
                self.push.start(endpoint).await;
                self.spawn_refresh(in_flight, Some(reply));
            }
            SyncCommand::RefreshNow { reply } => {
                self.spawn_refresh(in_flight, Some(reply));
            }
            SyncCommand::SetRefreshInterval { secs, reply } => {
                if secs == 0 {
                    let _ = reply.send(Err(AppError::Validation(
                        "refresh interval must be a positive number of seconds".to_string(),
                    )));
                    return;
                }
                let period = {
                    let mut store = self.store.lock();
                    store.params.refresh_interval_secs = secs;
                    store.bump();
                    store.params.refresh_interval()
                };
                self.publish();
                *ticker = refresh_ticker(period);
                tracing::info!(secs, "refresh interval rescheduled");
                let _ = reply.send(Ok(()));
            }
            SyncCommand::SetMtf { enabled, reply } => {
                {
                    let mut store = self.store.lock();
                    if store.params.enable_mtf != enabled {
                        store.params.enable_mtf = enabled;
                        store.bump();
                    }
                }
                self.publish();
                tracing::debug!(enabled, "mtf panel toggled");
                let _ = reply.send(Ok(()));
            }
            SyncCommand::ForceReconnect { reply } => {
                let result = match self.push.force_reconnect().await {
                    Some(session) => {
                        tracing::info!(session, "push channel reconnect forced");
                        Ok(())
                    }
                    None => Err(AppError::Validation(
                        "push channel has not been configured yet".to_string(),
                    )),
                };
                let _ = reply.send(result);
            }
        }
    }

    fn spawn_refresh(&mut self, in_flight: &mut JoinSet<RefreshResult>, reply: Option<Reply<()>>) {
        self.next_refresh_id = self.next_refresh_id.wrapping_add(1);
        let id = self.next_refresh_id;
        if let Some(reply) = reply {
            self.pending_replies.insert(id, reply);
        }

        let (params, generation) = {
            let store = self.store.lock();
            (store.params.clone(), store.generation)
        };
        let source = Arc::clone(&self.source);

        in_flight.spawn(async move {
            let result = tokio::try_join!(source.fetch_signal(&params), source.fetch_candles(&params));
            RefreshResult {
                id,
                generation,
                result,
            }
        });
    }

    fn finish_refresh(&mut self, joined: Result<RefreshResult, JoinError>) {
        let refresh = match joined {
            Ok(refresh) => refresh,
            Err(error) => {
                tracing::error!(%error, "refresh task aborted");
                return;
            }
        };

        let outcome = {
            let mut store = self.store.lock();
            apply_refresh(&mut store, refresh.generation, &refresh.result, now_unix_ms())
        };
        let reply = self.pending_replies.remove(&refresh.id);

        match outcome {
            RefreshApplyOutcome::Applied => {
                tracing::debug!(refresh = refresh.id, "snapshot and series replaced");
                self.publish();
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
            RefreshApplyOutcome::Superseded {
                generation,
                current,
            } => {
                tracing::debug!(refresh = refresh.id, generation, current, "discarding superseded refresh");
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
            RefreshApplyOutcome::Failed(reason) => {
                let transient = refresh
                    .result
                    .as_ref()
                    .err()
                    .map(AppError::is_transient)
                    .unwrap_or(false);
                if transient {
                    tracing::warn!(refresh = refresh.id, %reason, "refresh failed, keeping previous snapshot");
                } else {
                    tracing::error!(refresh = refresh.id, %reason, "refresh rejected, keeping previous snapshot");
                }
                self.publish();
                if let (Some(reply), Err(error)) = (reply, refresh.result) {
                    let _ = reply.send(Err(error));
                }
            }
        }
    }

    fn handle_push_event(&mut self, event: SessionEvent) {
        if event.session != self.push.session() {
            tracing::trace!(session = event.session, "ignoring event from a retired push session");
            return;
        }

        match event.event {
            PushEvent::State(status) => {
                {
                    let mut store = self.store.lock();
                    apply_connection_status(&mut store, status);
                }
                self.publish();
            }
            PushEvent::Message(message) => {
                let outcome = {
                    let mut store = self.store.lock();
                    apply_push_message(&mut store, &message, now_unix_ms())
                };
                match outcome {
                    PushApplyOutcome::Merged | PushApplyOutcome::Connected => self.publish(),
                    PushApplyOutcome::Ignored => {
                        if let PushMessage::ServerError { message } = &message {
                            tracing::warn!(message = ?message, "signal backend reported an error");
                        }
                    }
                    PushApplyOutcome::Rejected(reason) => {
                        tracing::warn!(%reason, "rejected signal_update payload");
                    }
                }
            }
        }
    }

    fn publish(&self) {
        let revision = self.store.lock().revision;
        self.revisions.send_replace(revision);
    }
}

/// Caller-side handle of a running [`SignalSyncClient`].
pub struct SyncHandle {
    commands: mpsc::Sender<SyncCommand>,
    store: Arc<Mutex<SignalStore>>,
    revisions: watch::Receiver<u64>,
    cancellation_token: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl SyncHandle {
    async fn request<F>(&self, build: F) -> Result<(), AppError>
    where
        F: FnOnce(Reply<()>) -> SyncCommand,
    {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| AppError::ChannelClosed)?;
        response.await.map_err(|_| AppError::ChannelClosed)?
    }

    /// Replaces the parameters and resolves once the forced refresh has been applied.
    pub async fn configure(&self, params: SyncParams) -> Result<(), AppError> {
        self.request(|reply| SyncCommand::Configure { params, reply })
            .await
    }

    pub async fn refresh_now(&self) -> Result<(), AppError> {
        self.request(|reply| SyncCommand::RefreshNow { reply }).await
    }

    pub async fn set_refresh_interval(&self, secs: u64) -> Result<(), AppError> {
        self.request(|reply| SyncCommand::SetRefreshInterval { secs, reply })
            .await
    }

    /// Updates the MTF flag without touching the refresh schedule or the push session.
    pub async fn set_mtf_enabled(&self, enabled: bool) -> Result<(), AppError> {
        self.request(|reply| SyncCommand::SetMtf { enabled, reply })
            .await
    }

    pub async fn force_reconnect(&self) -> Result<(), AppError> {
        self.request(|reply| SyncCommand::ForceReconnect { reply })
            .await
    }

    pub fn view(&self) -> SyncView {
        self.store.lock().view()
    }

    /// Revision counter that changes on every published store mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revisions.clone()
    }

    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Cancels the timer, the push channel and in-flight fetches, then waits for the actor.
    pub async fn stop(&mut self) {
        self.cancellation_token.cancel();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::connection::PushFrames;
    use crate::signal::types::{ConnectionState, Strategy, Timeframe};
    use futures_util::future::BoxFuture;
    use futures_util::StreamExt;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tokio_tungstenite::tungstenite::Message;
    use url::Url;

    struct FakeSource {
        signal: Mutex<Value>,
        fail_signal: AtomicBool,
        fail_candles: AtomicBool,
        signal_fetches: AtomicU32,
    }

    impl FakeSource {
        fn new(signal: Value) -> Self {
            Self {
                signal: Mutex::new(signal),
                fail_signal: AtomicBool::new(false),
                fail_candles: AtomicBool::new(false),
                signal_fetches: AtomicU32::new(0),
            }
        }

        fn fetches(&self) -> u32 {
            self.signal_fetches.load(Ordering::SeqCst)
        }
    }

    fn refused() -> AppError {
        AppError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "backend down",
        ))
    }

    impl SignalSource for FakeSource {
        fn fetch_signal<'a>(
            &'a self,
            _params: &'a SyncParams,
        ) -> BoxFuture<'a, Result<SignalSnapshot, AppError>> {
            Box::pin(async move {
                self.signal_fetches.fetch_add(1, Ordering::SeqCst);
                if self.fail_signal.load(Ordering::SeqCst) {
                    return Err(refused());
                }
                SignalSnapshot::from_value(self.signal.lock().clone())
            })
        }

        fn fetch_candles<'a>(
            &'a self,
            _params: &'a SyncParams,
        ) -> BoxFuture<'a, Result<CandleSeries, AppError>> {
            Box::pin(async move {
                if self.fail_candles.load(Ordering::SeqCst) {
                    return Err(refused());
                }
                CandleSeries::from_batch(vec![crate::signal::types::Candle {
                    timestamp: 1_000,
                    open: 99.0,
                    high: 101.0,
                    low: 98.0,
                    close: 100.0,
                    volume: 5.0,
                }])
            })
        }
    }

    /// Hands out one live frame stream fed by the test.
    struct ChannelConnector {
        frames: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    }

    impl ChannelConnector {
        fn new() -> (Self, mpsc::UnboundedSender<Message>) {
            let (sender, receiver) = mpsc::unbounded_channel();
            (
                Self {
                    frames: Mutex::new(Some(receiver)),
                },
                sender,
            )
        }
    }

    impl PushConnector for ChannelConnector {
        fn connect<'a>(
            &'a self,
            _endpoint: &'a Url,
        ) -> BoxFuture<'a, Result<PushFrames, AppError>> {
            let frames = self.frames.lock().take();
            Box::pin(async move {
                let receiver = frames.ok_or_else(refused)?;
                let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
                    receiver
                        .recv()
                        .await
                        .map(|message| (Ok(message), receiver))
                });
                let frames: PushFrames = stream.boxed();
                Ok(frames)
            })
        }
    }

    fn params() -> SyncParams {
        SyncParams {
            symbol: "BTC/USDT".to_string(),
            timeframe: Timeframe::M15,
            strategy: Strategy::Technical,
            refresh_interval_secs: 30,
            enable_mtf: true,
        }
    }

    fn spawn_client(source: Arc<FakeSource>, connector: Arc<dyn PushConnector>) -> SyncHandle {
        SignalSyncClient::spawn(
            source,
            connector,
            SyncOptions::new("ws://127.0.0.1:9/ws"),
            params(),
        )
    }

    async fn wait_for<F>(handle: &SyncHandle, mut predicate: F) -> SyncView
    where
        F: FnMut(&SyncView) -> bool,
    {
        let mut revisions = handle.subscribe();
        loop {
            let view = handle.view();
            if predicate(&view) {
                return view;
            }
            revisions
                .changed()
                .await
                .expect("sync client should still be publishing");
        }
    }

    fn snapshot(value: Value) -> SignalSnapshot {
        SignalSnapshot::from_value(value).expect("test snapshot should be valid")
    }

    #[test]
    fn refresh_replaces_snapshot_and_series_together() {
        let mut store = SignalStore::new(params());
        let series = CandleSeries::from_batch(Vec::new()).expect("empty batch is valid");
        let result = Ok((snapshot(json!({"current_price": 100})), series));

        let outcome = apply_refresh(&mut store, 0, &result, 42);
        assert_eq!(outcome, RefreshApplyOutcome::Applied);
        assert_eq!(store.view().last_update_ms, Some(42));
        assert_eq!(
            store.view().snapshot.map(|snapshot| snapshot.current_price),
            Some(100.0)
        );
    }

    #[test]
    fn failed_refresh_keeps_previous_state() {
        let mut store = SignalStore::new(params());
        let ok = Ok((
            snapshot(json!({"current_price": 100, "confidence": 40})),
            CandleSeries::default(),
        ));
        let _ = apply_refresh(&mut store, 0, &ok, 1);
        let before = store.view();

        let failed = Err(refused());
        let outcome = apply_refresh(&mut store, 0, &failed, 2);

        assert!(matches!(outcome, RefreshApplyOutcome::Failed(_)));
        let after = store.view();
        assert_eq!(after.snapshot, before.snapshot);
        assert_eq!(after.series, before.series);
        assert_eq!(after.last_update_ms, Some(1));
        assert!(after.last_error.is_some());
    }

    #[test]
    fn refresh_from_previous_generation_is_discarded() {
        let mut store = SignalStore::new(params());
        let identity_changed = apply_params(
            &mut store,
            SyncParams {
                symbol: "ETH/USDT".to_string(),
                ..params()
            },
        );
        assert!(identity_changed);

        let stale = Ok((snapshot(json!({"current_price": 100})), CandleSeries::default()));
        let outcome = apply_refresh(&mut store, 0, &stale, 5);
        assert_eq!(
            outcome,
            RefreshApplyOutcome::Superseded {
                generation: 0,
                current: 1
            }
        );
        assert!(store.view().snapshot.is_none());
    }

    #[test]
    fn push_update_merges_and_connected_keeps_snapshot() {
        let mut store = SignalStore::new(params());
        let _ = apply_refresh(
            &mut store,
            0,
            &Ok((
                snapshot(json!({"confidence": 40, "current_price": 100})),
                CandleSeries::default(),
            )),
            1,
        );

        let patch = match json!({"confidence": 55}) {
            Value::Object(fields) => fields,
            _ => unreachable!(),
        };
        assert_eq!(
            apply_push_message(&mut store, &PushMessage::SignalUpdate(patch), 2),
            PushApplyOutcome::Merged
        );
        let merged = store.view().snapshot.expect("snapshot should exist");
        assert_eq!(merged.confidence, 55.0);
        assert_eq!(merged.current_price, 100.0);

        let before = store.view().snapshot;
        assert_eq!(
            apply_push_message(&mut store, &PushMessage::Connected { message: None }, 3),
            PushApplyOutcome::Connected
        );
        assert!(store.view().connected);
        assert_eq!(store.view().snapshot, before);
    }

    #[test]
    fn rejected_patch_leaves_snapshot_untouched() {
        let mut store = SignalStore::new(params());
        let _ = apply_refresh(
            &mut store,
            0,
            &Ok((snapshot(json!({"current_price": 100})), CandleSeries::default())),
            1,
        );
        let before = store.view();

        let patch = match json!({"signal": "TO_THE_MOON"}) {
            Value::Object(fields) => fields,
            _ => unreachable!(),
        };
        let outcome = apply_push_message(&mut store, &PushMessage::SignalUpdate(patch), 2);
        assert!(matches!(outcome, PushApplyOutcome::Rejected(_)));
        assert_eq!(store.view().snapshot, before.snapshot);
        assert_eq!(store.view().revision, before.revision);
    }

    #[tokio::test(start_paused = true)]
    async fn configure_fetches_and_publishes() {
        let source = Arc::new(FakeSource::new(
            json!({"current_price": 100, "signal": "LONG", "confidence": 70}),
        ));
        let (connector, _frames) = ChannelConnector::new();
        let mut handle = spawn_client(source.clone(), Arc::new(connector));

        handle
            .configure(params())
            .await
            .expect("initial sync should succeed");

        let view = handle.view();
        assert_eq!(view.series.len(), 1);
        assert_eq!(
            view.snapshot.map(|snapshot| snapshot.confidence),
            Some(70.0)
        );
        assert_eq!(source.fetches(), 1);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn candle_failure_aborts_whole_refresh() {
        let source = Arc::new(FakeSource::new(json!({"current_price": 100, "confidence": 40})));
        let (connector, _frames) = ChannelConnector::new();
        let mut handle = spawn_client(source.clone(), Arc::new(connector));
        handle
            .configure(params())
            .await
            .expect("initial sync should succeed");
        let before = handle.view();

        *source.signal.lock() = json!({"current_price": 120, "confidence": 90});
        source.fail_candles.store(true, Ordering::SeqCst);

        let result = handle.refresh_now().await;
        assert!(result.is_err());

        let after = handle.view();
        assert_eq!(after.snapshot, before.snapshot);
        assert_eq!(after.series, before.series);
        assert!(after.last_error.is_some());

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn push_update_merges_into_fetched_snapshot() {
        let source = Arc::new(FakeSource::new(json!({
            "current_price": 100,
            "confidence": 40,
            "stop_loss": 90
        })));
        let (connector, frames) = ChannelConnector::new();
        let mut handle = spawn_client(source, Arc::new(connector));
        handle
            .configure(params())
            .await
            .expect("initial sync should succeed");

        frames
            .send(Message::Text(r#"{"type":"connected"}"#.to_string()))
            .expect("frame channel open");
        frames
            .send(Message::Text(
                r#"{"type":"signal_update","data":{"confidence":55}}"#.to_string(),
            ))
            .expect("frame channel open");

        let view = wait_for(&handle, |view| {
            view.snapshot
                .as_ref()
                .map(|snapshot| snapshot.confidence == 55.0)
                .unwrap_or(false)
        })
        .await;

        let merged = view.snapshot.expect("snapshot should exist");
        assert_eq!(merged.current_price, 100.0);
        assert_eq!(merged.stop_loss, Some(90.0));
        assert!(view.connected);
        assert_eq!(view.connection.state, ConnectionState::Connected);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timer_keeps_refreshing_after_failures_and_follows_new_interval() {
        let source = Arc::new(FakeSource::new(json!({"current_price": 100})));
        let (connector, _frames) = ChannelConnector::new();
        let mut handle = spawn_client(source.clone(), Arc::new(connector));
        handle
            .configure(params())
            .await
            .expect("initial sync should succeed");
        assert_eq!(source.fetches(), 1);

        source.fail_signal.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(source.fetches(), 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.fetches(), 3);
        assert!(handle.view().snapshot.is_some());

        handle
            .set_refresh_interval(10)
            .await
            .expect("positive interval is accepted");
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(source.fetches(), 4);

        assert!(handle.set_refresh_interval(0).await.is_err());
        assert_eq!(handle.view().params.refresh_interval_secs, 10);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn mtf_toggle_keeps_snapshot_and_schedule() {
        let source = Arc::new(FakeSource::new(json!({"current_price": 100})));
        let (connector, _frames) = ChannelConnector::new();
        let mut handle = spawn_client(source.clone(), Arc::new(connector));
        handle
            .configure(params())
            .await
            .expect("initial sync should succeed");
        let before = handle.view();

        handle
            .set_mtf_enabled(false)
            .await
            .expect("toggle is accepted");

        let after = handle.view();
        assert!(!after.params.enable_mtf);
        assert_eq!(after.params.refresh_interval_secs, 30);
        assert_eq!(after.snapshot, before.snapshot);
        assert!(after.revision > before.revision);
        assert_eq!(source.fetches(), 1);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_leaves_nothing_running() {
        let source = Arc::new(FakeSource::new(json!({"current_price": 100})));
        let (connector, _frames) = ChannelConnector::new();
        let mut handle = spawn_client(source.clone(), Arc::new(connector));
        handle
            .configure(params())
            .await
            .expect("initial sync should succeed");

        handle.stop().await;
        assert!(!handle.is_running());

        let fetches_at_stop = source.fetches();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(source.fetches(), fetches_at_stop);
        assert!(matches!(
            handle.refresh_now().await,
            Err(AppError::ChannelClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn force_reconnect_requires_a_configured_channel() {
        let source = Arc::new(FakeSource::new(json!({"current_price": 100})));
        let (connector, _frames) = ChannelConnector::new();
        let mut handle = spawn_client(source, Arc::new(connector));

        assert!(matches!(
            handle.force_reconnect().await,
            Err(AppError::Validation(_))
        ));

        handle
            .configure(params())
            .await
            .expect("initial sync should succeed");
        handle
            .force_reconnect()
            .await
            .expect("configured channel can be restarted");

        handle.stop().await;
    }
}
