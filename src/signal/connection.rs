use crate::error::AppError;
use crate::signal::api::connect_push_stream;
use crate::signal::types::{parse_push_payload, ConnectionState, ConnectionStatus, PushMessage};
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(5);
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Delay before the Nth automatic retry: `N × base`, no jitter.
pub fn reconnect_delay(base_delay: Duration, attempt: u32) -> Duration {
    base_delay.saturating_mul(attempt)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

/// Connection state machine with a bounded, linearly growing retry budget.
#[derive(Debug, Clone)]
pub struct ConnectionPolicy {
    state: ConnectionState,
    retry_count: u32,
    exhausted: bool,
    base_delay: Duration,
    max_attempts: u32,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self::with_limits(RECONNECT_BASE_DELAY, MAX_RECONNECT_ATTEMPTS)
    }
}

impl ConnectionPolicy {
    pub fn with_limits(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retry_count: 0,
            exhausted: false,
            base_delay,
            max_attempts,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn begin_connect(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub fn on_open(&mut self) {
        self.state = ConnectionState::Connected;
        self.retry_count = 0;
        self.exhausted = false;
    }

    pub fn on_disconnect(&mut self) -> RetryDecision {
        self.state = ConnectionState::Disconnected;
        if self.retry_count >= self.max_attempts {
            self.exhausted = true;
            return RetryDecision::Exhausted {
                attempts: self.retry_count,
            };
        }

        self.retry_count += 1;
        RetryDecision::Retry {
            attempt: self.retry_count,
            delay: reconnect_delay(self.base_delay, self.retry_count),
        }
    }

    pub fn status(&self, next_retry: Option<Duration>, reason: Option<String>) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            retry_count: self.retry_count,
            exhausted: self.exhausted,
            next_retry_in_ms: next_retry.map(|delay| delay.as_millis().min(u64::MAX as u128) as u64),
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    State(ConnectionStatus),
    Message(PushMessage),
}

/// Push event tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session: u64,
    pub event: PushEvent,
}

pub type PushFrames = BoxStream<'static, Result<Message, AppError>>;

/// Opens the underlying push socket.
pub trait PushConnector: Send + Sync + 'static {
    fn connect<'a>(&'a self, endpoint: &'a Url) -> BoxFuture<'a, Result<PushFrames, AppError>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl PushConnector for WebSocketConnector {
    fn connect<'a>(&'a self, endpoint: &'a Url) -> BoxFuture<'a, Result<PushFrames, AppError>> {
        Box::pin(async move {
            let stream = connect_push_stream(endpoint).await?;
            let frames: PushFrames = stream
                .map(|frame| frame.map_err(AppError::from))
                .boxed();
            Ok(frames)
        })
    }
}

enum FrameDirective {
    Continue,
    Closed,
}

struct SessionContext<'a> {
    session: u64,
    events: &'a mpsc::UnboundedSender<SessionEvent>,
}

impl SessionContext<'_> {
    fn emit(&self, event: PushEvent) {
        let _ = self.events.send(SessionEvent {
            session: self.session,
            event,
        });
    }

    fn emit_state(&self, policy: &ConnectionPolicy, next_retry: Option<Duration>, reason: String) {
        self.emit(PushEvent::State(policy.status(next_retry, Some(reason))));
    }
}

fn handle_frame(message: Message, context: &SessionContext<'_>) -> FrameDirective {
    let parsed = match message {
        Message::Text(text_payload) => {
            let mut owned_payload = text_payload.into_bytes();
            parse_push_payload(owned_payload.as_mut_slice())
        }
        Message::Binary(mut binary_payload) => parse_push_payload(binary_payload.as_mut_slice()),
        Message::Close(_) => return FrameDirective::Closed,
        _ => return FrameDirective::Continue,
    };

    match parsed {
        Ok(message) => context.emit(PushEvent::Message(message)),
        Err(error) => {
            tracing::warn!(session = context.session, %error, "dropping malformed push payload");
        }
    }
    FrameDirective::Continue
}

pub async fn run_push_channel(
    connector: Arc<dyn PushConnector>,
    endpoint: Url,
    mut policy: ConnectionPolicy,
    session: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
    cancel_token: CancellationToken,
) {
    let context = SessionContext {
        session,
        events: &events,
    };

    'session: while !cancel_token.is_cancelled() {
        policy.begin_connect();
        let reason = if policy.retry_count() == 0 {
            "opening push channel".to_string()
        } else {
            format!("reconnect attempt {}", policy.retry_count())
        };
        context.emit_state(&policy, None, reason);

        let connect_result = tokio::select! {
            _ = cancel_token.cancelled() => break 'session,
            result = connector.connect(&endpoint) => result,
        };

        let disconnect_reason = match connect_result {
            Ok(mut frames) => {
                policy.on_open();
                tracing::info!(session, endpoint = %endpoint, "push channel connected");
                context.emit_state(&policy, None, "push channel connected".to_string());

                loop {
                    let frame = tokio::select! {
                        _ = cancel_token.cancelled() => break 'session,
                        next_frame = frames.next() => next_frame,
                    };

                    match frame {
                        None => break "push channel closed by server".to_string(),
                        Some(Ok(message)) => match handle_frame(message, &context) {
                            FrameDirective::Continue => {}
                            FrameDirective::Closed => {
                                break "push channel closed by server".to_string()
                            }
                        },
                        Some(Err(error)) => break format!("push frame error: {error}"),
                    }
                }
            }
            Err(error) => format!("push connect error: {error}"),
        };

        match policy.on_disconnect() {
            RetryDecision::Retry { attempt, delay } => {
                tracing::warn!(
                    session,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = %disconnect_reason,
                    "push channel disconnected, retry scheduled"
                );
                context.emit_state(&policy, Some(delay), disconnect_reason);
                tokio::select! {
                    _ = cancel_token.cancelled() => break 'session,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            RetryDecision::Exhausted { attempts } => {
                let error = AppError::RetriesExhausted { attempts };
                tracing::error!(session, %error, reason = %disconnect_reason, "push channel offline");
                context.emit_state(&policy, None, error.to_string());
                return;
            }
        }
    }

    let mut stopped = policy;
    stopped.state = ConnectionState::Disconnected;
    context.emit_state(&stopped, None, "push channel stopped".to_string());
}

struct PushSession {
    cancellation_token: CancellationToken,
    join_handle: JoinHandle<()>,
}

/// Owner of the single live push session.
pub struct PushChannel {
    connector: Arc<dyn PushConnector>,
    events: mpsc::UnboundedSender<SessionEvent>,
    base_delay: Duration,
    max_attempts: u32,
    session: u64,
    endpoint: Option<Url>,
    active: Option<PushSession>,
}

impl PushChannel {
    pub fn new(
        connector: Arc<dyn PushConnector>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self::with_limits(
            connector,
            events,
            RECONNECT_BASE_DELAY,
            MAX_RECONNECT_ATTEMPTS,
        )
    }

    pub fn with_limits(
        connector: Arc<dyn PushConnector>,
        events: mpsc::UnboundedSender<SessionEvent>,
        base_delay: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            connector,
            events,
            base_delay,
            max_attempts,
            session: 0,
            endpoint: None,
            active: None,
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .map(|active| !active.join_handle.is_finished())
            .unwrap_or(false)
    }

    /// Starts a new session against `endpoint`, tearing down any previous one first.
    pub async fn start(&mut self, endpoint: Url) -> u64 {
        self.stop().await;

        self.session = self.session.wrapping_add(1);
        let cancellation_token = CancellationToken::new();
        let join_handle = tokio::spawn(run_push_channel(
            Arc::clone(&self.connector),
            endpoint.clone(),
            ConnectionPolicy::with_limits(self.base_delay, self.max_attempts),
            self.session,
            self.events.clone(),
            cancellation_token.clone(),
        ));

        self.endpoint = Some(endpoint);
        self.active = Some(PushSession {
            cancellation_token,
            join_handle,
        });
        self.session
    }

    pub async fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancellation_token.cancel();
            let _ = active.join_handle.await;
        }
    }

    /// Restarts against the last endpoint with a fresh retry budget.
    pub async fn force_reconnect(&mut self) -> Option<u64> {
        let endpoint = self.endpoint.clone()?;
        Some(self.start(endpoint).await)
    }
}
