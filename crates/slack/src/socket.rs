use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use gohome_core::config::ReconnectConfig;

use crate::events::{
    decode_envelope, default_dispatcher, EventContext, EventDispatcher, HandlerResult,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

/// Connectivity lifecycle of the event subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Raw event-stream transport. Frames are the wire JSON; `next_frame`
/// returning `None` means the transport has shut down for good.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_frame(&self) -> Result<Option<String>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct NoopSocketTransport;

#[async_trait]
impl SocketTransport for NoopSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_frame(&self) -> Result<Option<String>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(&self, _envelope_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub type DispatcherFactory = Box<dyn Fn() -> EventDispatcher + Send + Sync>;

enum PumpEnd {
    TransportFinished,
    ConnectionClosed,
}

/// Supervises the event subscription: connects, pumps envelopes into the
/// dispatcher, and rebuilds the whole registration when the connection
/// drops.
///
/// Handler bindings never survive a connection; every attempt calls the
/// dispatcher factory again, so re-registration is a full rebuild rather
/// than something the transport is trusted to deduplicate. Consecutive
/// connect failures back off exponentially and give up after
/// `max_retries` without crashing the process.
pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    make_dispatcher: DispatcherFactory,
    bot_user_id: Option<String>,
    reconnect_policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
}

impl Default for SocketModeRunner {
    fn default() -> Self {
        Self::new(
            Arc::new(NoopSocketTransport),
            Box::new(default_dispatcher),
            None,
            ReconnectPolicy::default(),
        )
    }
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        make_dispatcher: DispatcherFactory,
        bot_user_id: Option<String>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self { transport, make_dispatcher, bot_user_id, reconnect_policy, state }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(event_name = "socket.state", from = ?previous, to = ?next, "connection state changed");
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            self.transition(ConnectionState::Connecting);
            // Full re-registration on every attempt.
            let dispatcher = (self.make_dispatcher)();

            match self.connect_and_pump(&dispatcher, attempt).await {
                Ok(PumpEnd::TransportFinished) => {
                    self.transition(ConnectionState::Disconnected);
                    info!(event_name = "socket.finished", "transport stream ended; runner stopping");
                    return Ok(());
                }
                Ok(PumpEnd::ConnectionClosed) => {
                    self.transition(ConnectionState::Disconnected);
                    info!(
                        event_name = "socket.reconnecting",
                        "connection closed; rebuilding event registration"
                    );
                    attempt = 0;
                }
                Err(transport_error) => {
                    self.transition(ConnectionState::Disconnected);
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "socket transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "socket retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn connect_and_pump(
        &self,
        dispatcher: &EventDispatcher,
        attempt: u32,
    ) -> Result<PumpEnd, TransportError> {
        info!(attempt, "opening socket transport connection");
        self.transport.connect().await?;
        self.transition(ConnectionState::Connected);
        info!(attempt, "socket transport connected");

        loop {
            let Some(frame) = self.transport.next_frame().await? else {
                self.transport.disconnect().await?;
                return Ok(PumpEnd::TransportFinished);
            };

            let envelope = match decode_envelope(&frame, self.bot_user_id.as_deref()) {
                Ok(envelope) => envelope,
                Err(error) => {
                    warn!(
                        event_name = "ingress.decode_failed",
                        error = %error,
                        "discarding undecodable frame"
                    );
                    continue;
                }
            };

            info!(
                event_name = "ingress.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.envelope_id,
                "received envelope"
            );

            if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
                warn!(
                    event_name = "ingress.ack_failed",
                    envelope_id = %envelope.envelope_id,
                    error = %error,
                    "failed to acknowledge envelope"
                );
            }

            let context = EventContext { correlation_id: envelope.envelope_id.clone() };
            match dispatcher.dispatch(&envelope, &context).await {
                Ok(HandlerResult::Reconnect) => {
                    if let Err(error) = self.transport.disconnect().await {
                        warn!(error = %error, "disconnect after close event failed");
                    }
                    return Ok(PumpEnd::ConnectionClosed);
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(
                        envelope_id = %envelope.envelope_id,
                        error = %error,
                        "event dispatch failed; continuing socket loop"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::{
        ConnectionState, ReconnectPolicy, SocketModeRunner, SocketTransport, TransportError,
    };
    use crate::events::{bot_dispatcher, BotWiring};
    use gohome_core::responses::StdNudgeRng;

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        frames: VecDeque<Result<Option<String>, TransportError>>,
        connect_attempts: usize,
        acknowledgements: Vec<String>,
        disconnect_calls: usize,
    }

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            frames: Vec<Result<Option<String>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    frames: frames.into(),
                    ..ScriptedState::default()
                }),
            }
        }

        async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }

        async fn acknowledgements(&self) -> Vec<String> {
            self.state.lock().await.acknowledgements.clone()
        }

        async fn disconnect_calls(&self) -> usize {
            self.state.lock().await.disconnect_calls
        }
    }

    #[async_trait]
    impl SocketTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_frame(&self) -> Result<Option<String>, TransportError> {
            let mut state = self.state.lock().await;
            state.frames.pop_front().unwrap_or(Ok(None))
        }

        async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.acknowledgements.push(envelope_id.to_owned());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.disconnect_calls += 1;
            Ok(())
        }
    }

    fn counting_factory(counter: Arc<AtomicUsize>) -> super::DispatcherFactory {
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            bot_dispatcher(&BotWiring::default(), Box::new(StdNudgeRng::seeded(1)))
        })
    }

    fn frame(envelope_id: &str, event_type: &str) -> String {
        format!(r#"{{"envelope_id":"{envelope_id}","event":{{"type":"{event_type}"}}}}"#)
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![Ok(Some(frame("env-1", "rtm_open"))), Ok(None)],
        ));

        let runner = SocketModeRunner::new(
            transport.clone(),
            counting_factory(Arc::new(AtomicUsize::new(0))),
            None,
            ReconnectPolicy { max_retries: 2, base_delay_ms: 0, max_delay_ms: 1 },
        );

        runner.start().await.expect("runner should not fail");

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.acknowledgements().await, vec!["env-1"]);
        assert_eq!(runner.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));

        let runner = SocketModeRunner::new(
            transport.clone(),
            counting_factory(Arc::new(AtomicUsize::new(0))),
            None,
            ReconnectPolicy { max_retries: 2, base_delay_ms: 0, max_delay_ms: 1 },
        );

        runner.start().await.expect("runner should degrade gracefully");
        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn close_event_rebuilds_the_registration_and_reconnects() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(()), Ok(())],
            vec![Ok(Some(frame("env-close", "rtm_close"))), Ok(None)],
        ));
        let rebuilds = Arc::new(AtomicUsize::new(0));

        let runner = SocketModeRunner::new(
            transport.clone(),
            counting_factory(rebuilds.clone()),
            None,
            ReconnectPolicy { max_retries: 2, base_delay_ms: 0, max_delay_ms: 1 },
        );

        runner.start().await.expect("runner should not fail");

        assert_eq!(transport.connect_attempts().await, 2, "close event must reconnect");
        assert_eq!(rebuilds.load(Ordering::SeqCst), 2, "each connection gets a fresh dispatcher");
        // One disconnect after the close event, one when the stream ends.
        assert_eq!(transport.disconnect_calls().await, 2);
    }

    #[tokio::test]
    async fn undecodable_frames_are_discarded_without_acknowledgment() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                Ok(Some("not json at all".to_owned())),
                Ok(Some(frame("env-2", "rtm_open"))),
                Ok(None),
            ],
        ));

        let runner = SocketModeRunner::new(
            transport.clone(),
            counting_factory(Arc::new(AtomicUsize::new(0))),
            None,
            ReconnectPolicy { max_retries: 0, base_delay_ms: 0, max_delay_ms: 1 },
        );

        runner.start().await.expect("runner should not fail");
        assert_eq!(transport.acknowledgements().await, vec!["env-2"]);
    }

    #[tokio::test]
    async fn noop_default_runner_starts_and_stops_cleanly() {
        let runner = SocketModeRunner::default();
        runner.start().await.expect("noop runner should finish");
        assert_eq!(runner.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn backoff_grows_exponentially_up_to_the_cap() {
        let policy = ReconnectPolicy { max_retries: 10, base_delay_ms: 100, max_delay_ms: 1_000 };
        assert_eq!(policy.backoff(0).as_millis(), 100);
        assert_eq!(policy.backoff(1).as_millis(), 200);
        assert_eq!(policy.backoff(2).as_millis(), 400);
        assert_eq!(policy.backoff(6).as_millis(), 1_000);
    }
}
