//! Subscriber Connection Manager
//!
//! Keeps one client session attached to a hub. Owns the connection state
//! machine, the reconnect schedule and the listener lists.
//!
//! # Concurrency
//!
//! `start`, `stop` and `dispose` are serialized by a lifecycle lock. After
//! `start`, every transition is made by a single driver task owned by the
//! current run, so transitions never race. `stop` cancels the run's token,
//! which aborts an in-flight handshake or backoff wait immediately, then
//! joins the driver.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::listeners::{ListenerId, ListenerRegistry};
use crate::application::ports::{MarketTransport, TransportError, TransportSession};
use crate::domain::connection::{
    ConnectionState, ConnectionTrigger, ReconnectSchedule, StateChange,
};
use crate::domain::market::MarketEvent;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors surfaced synchronously by [`SubscriberConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscriberError {
    /// `start` was called after `dispose`.
    #[error("subscriber connection already disposed")]
    Disposed,
}

// =============================================================================
// Subscriber Connection
// =============================================================================

/// Client-side session with automatic reconnection.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use trade_pulse::application::services::SubscriberConnection;
/// use trade_pulse::domain::connection::ReconnectSchedule;
/// use trade_pulse::infrastructure::transport::{WebSocketTransport, WebSocketTransportConfig};
///
/// async fn example() -> anyhow::Result<()> {
///     let transport = WebSocketTransport::new(WebSocketTransportConfig::new(
///         "ws://127.0.0.1:5080/markethub",
///     ));
///     let connection = SubscriberConnection::new(Arc::new(transport), ReconnectSchedule::default());
///
///     connection.on_event(|event| {
///         println!("{} {:?}", event.symbol, event.change());
///         Ok(())
///     });
///     connection.start().await?;
///     // ...
///     connection.dispose().await;
///     Ok(())
/// }
/// ```
pub struct SubscriberConnection {
    shared: Arc<Shared>,
    lifecycle: tokio::sync::Mutex<Option<Run>>,
    disposed: AtomicBool,
}

/// A live driver task and the token that stops it.
struct Run {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SubscriberConnection {
    /// Create a stopped connection manager.
    #[must_use]
    pub fn new(transport: Arc<dyn MarketTransport>, schedule: ReconnectSchedule) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                schedule,
                state: RwLock::new(ConnectionState::Disconnected),
                event_listeners: ListenerRegistry::new("market_event"),
                state_listeners: ListenerRegistry::new("state_change"),
            }),
            lifecycle: tokio::sync::Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    /// Register a market event listener.
    ///
    /// Listeners run on the connection's driver task, in registration order.
    pub fn on_event<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&MarketEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.event_listeners.add(listener)
    }

    /// Register a state change listener.
    pub fn on_state_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StateChange) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.state_listeners.add(listener)
    }

    /// Remove a listener registered with either `on_event` or `on_state_change`.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.event_listeners.remove(id) || self.shared.state_listeners.remove(id)
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether events are currently flowing.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Whether `dispose` has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Start connecting.
    ///
    /// No-op while a run is live. A failed handshake is not returned here;
    /// it is reported to the state listeners.
    ///
    /// # Errors
    ///
    /// Returns `SubscriberError::Disposed` after `dispose`.
    pub async fn start(&self) -> Result<(), SubscriberError> {
        if self.is_disposed() {
            return Err(SubscriberError::Disposed);
        }

        let mut lifecycle = self.lifecycle.lock().await;
        if self.is_disposed() {
            return Err(SubscriberError::Disposed);
        }

        if self.shared.state() != ConnectionState::Disconnected {
            tracing::debug!(state = %self.shared.state(), "Subscriber already started");
            return Ok(());
        }

        // A previous run that settled on its own is finishing its last step.
        if let Some(previous) = lifecycle.take() {
            previous.cancel.cancel();
            join(previous.handle).await;
        }

        self.shared.apply(ConnectionTrigger::Start, None);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.shared).drive(cancel.clone()));
        *lifecycle = Some(Run { cancel, handle });
        Ok(())
    }

    /// Stop the session and settle in `Disconnected`.
    ///
    /// Aborts any in-flight handshake or backoff wait. Safe to call from any
    /// state and any number of times.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(run) = lifecycle.take() else {
            return;
        };

        run.cancel.cancel();
        join(run.handle).await;

        // The driver settles the state itself; this only covers a driver that
        // died before it could.
        if self.shared.state() != ConnectionState::Disconnected {
            self.shared.apply(ConnectionTrigger::Stop, None);
        }
        tracing::info!("Subscriber stopped");
    }

    /// Release the connection for good.
    ///
    /// Removes all listeners, stops the session and makes later `start`
    /// calls fail. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shared.event_listeners.clear();
        self.shared.state_listeners.clear();
        self.stop().await;
        tracing::debug!("Subscriber disposed");
    }
}

impl Drop for SubscriberConnection {
    fn drop(&mut self) {
        if let Some(run) = self.lifecycle.get_mut().take() {
            run.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for SubscriberConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberConnection")
            .field("state", &self.state())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

async fn join(handle: JoinHandle<()>) {
    if let Err(e) = handle.await
        && e.is_panic()
    {
        tracing::error!(error = %e, "Subscriber driver panicked");
    }
}

// =============================================================================
// Driver
// =============================================================================

/// State shared between the public handle and the driver task.
struct Shared {
    transport: Arc<dyn MarketTransport>,
    schedule: ReconnectSchedule,
    state: RwLock<ConnectionState>,
    event_listeners: ListenerRegistry<MarketEvent>,
    state_listeners: ListenerRegistry<StateChange>,
}

/// Why the event pump returned.
enum PumpEnd {
    Stopped,
    Dropped(String),
}

/// Result of working through the reconnect schedule.
enum Reconnect {
    Connected(Box<dyn TransportSession>),
    Cancelled,
    Exhausted {
        attempts: usize,
        last_error: Option<TransportError>,
    },
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Apply a trigger and notify state listeners.
    fn apply(&self, trigger: ConnectionTrigger, error: Option<String>) {
        let change = {
            let mut state = self.state.write();
            let previous = *state;
            match previous.on(trigger) {
                Ok(current) => {
                    *state = current;
                    StateChange {
                        previous,
                        current,
                        error,
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Ignoring invalid connection transition");
                    return;
                }
            }
        };

        match &change.error {
            Some(error) => tracing::warn!(
                from = %change.previous,
                to = %change.current,
                error = %error,
                "Subscriber state changed"
            ),
            None => tracing::info!(
                from = %change.previous,
                to = %change.current,
                "Subscriber state changed"
            ),
        }

        self.state_listeners.notify(&change);
    }

    /// Run one session lifetime: handshake, pump, reconnect until stopped or
    /// out of attempts.
    async fn drive(self: Arc<Self>, cancel: CancellationToken) {
        let mut schedule = self.schedule.clone();

        let mut session = match self.connect(&cancel).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                self.apply(ConnectionTrigger::Stop, None);
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to connect to hub");
                self.apply(ConnectionTrigger::HandshakeFailed, Some(e.to_string()));
                return;
            }
        };
        tracing::info!(connection_id = ?session.connection_id(), "Connected to hub");
        self.apply(ConnectionTrigger::HandshakeSucceeded, None);

        loop {
            let reason = match self.pump(&mut session, &cancel).await {
                PumpEnd::Stopped => {
                    session.close().await;
                    self.apply(ConnectionTrigger::Stop, None);
                    return;
                }
                PumpEnd::Dropped(reason) => reason,
            };

            session.close().await;
            tracing::warn!(reason = %reason, "Hub connection lost");
            self.apply(ConnectionTrigger::TransportDropped, Some(reason));

            match self.reconnect(&mut schedule, &cancel).await {
                Reconnect::Connected(next) => {
                    session = next;
                    schedule.reset();
                    tracing::info!(
                        connection_id = ?session.connection_id(),
                        "Reconnected to hub"
                    );
                    self.apply(ConnectionTrigger::ReconnectSucceeded, None);
                }
                Reconnect::Cancelled => {
                    self.apply(ConnectionTrigger::Stop, None);
                    return;
                }
                Reconnect::Exhausted {
                    attempts,
                    last_error,
                } => {
                    let last = last_error.map_or_else(String::new, |e| format!(": {e}"));
                    tracing::error!(attempts, "Giving up on hub connection");
                    self.apply(
                        ConnectionTrigger::ReconnectExhausted,
                        Some(format!(
                            "reconnect failed after {attempts} attempts{last}"
                        )),
                    );
                    return;
                }
            }
        }
    }

    /// One handshake attempt. `Ok(None)` if cancelled first.
    async fn connect(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Box<dyn TransportSession>>, TransportError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Ok(None),
            result = self.transport.connect() => result.map(Some),
        }
    }

    /// Deliver events until the session ends or the run is cancelled.
    async fn pump(
        &self,
        session: &mut Box<dyn TransportSession>,
        cancel: &CancellationToken,
    ) -> PumpEnd {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return PumpEnd::Stopped,
                next = session.next_event() => next,
            };

            match next {
                Ok(Some(event)) => self.dispatch(event),
                Ok(None) => return PumpEnd::Dropped("connection closed by hub".to_string()),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(error = %e, "Skipping malformed message");
                }
                Err(e) => return PumpEnd::Dropped(e.to_string()),
            }
        }
    }

    fn dispatch(&self, event: MarketEvent) {
        let event = event.stamped(Utc::now());
        metrics::record_event_received();

        let failures = self.event_listeners.notify(&event);
        if failures > 0 {
            tracing::warn!(
                symbol = %event.symbol,
                price = ?event.price,
                failures,
                "Error processing market event"
            );
        }
    }

    /// Work through the schedule until a handshake succeeds.
    async fn reconnect(
        &self,
        schedule: &mut ReconnectSchedule,
        cancel: &CancellationToken,
    ) -> Reconnect {
        let mut last_error = None;

        while let Some(delay) = schedule.next_delay() {
            let attempt = schedule.attempt_count();
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting to hub"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!("Subscriber cancelled during reconnect delay");
                    return Reconnect::Cancelled;
                }
                () = tokio::time::sleep(delay) => {}
            }

            metrics::record_reconnect_attempt();
            match self.connect(cancel).await {
                Ok(Some(session)) => return Reconnect::Connected(session),
                Ok(None) => return Reconnect::Cancelled,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Reconnect::Exhausted {
            attempts: schedule.attempt_count(),
            last_error,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use tokio::sync::mpsc;
    use tokio::time::{Instant, timeout};
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::application::ports::MockMarketTransport;

    type Script = mpsc::UnboundedSender<Result<Option<MarketEvent>, TransportError>>;

    /// Session fed by a channel. Stays open while the sender is alive.
    struct ScriptedSession {
        rx: mpsc::UnboundedReceiver<Result<Option<MarketEvent>, TransportError>>,
    }

    #[async_trait]
    impl TransportSession for ScriptedSession {
        fn connection_id(&self) -> Option<&str> {
            Some("test-connection")
        }

        async fn next_event(&mut self) -> Result<Option<MarketEvent>, TransportError> {
            self.rx.recv().await.unwrap_or(Ok(None))
        }

        async fn close(&mut self) {
            self.rx.close();
        }
    }

    fn scripted_session() -> (Script, Box<dyn TransportSession>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Box::new(ScriptedSession { rx }))
    }

    /// Session the hub closes right away.
    fn closed_session() -> Box<dyn TransportSession> {
        let (_, session) = scripted_session();
        session
    }

    /// Transport whose handshake never completes.
    struct HangingTransport;

    #[async_trait]
    impl MarketTransport for HangingTransport {
        async fn connect(&self) -> Result<Box<dyn TransportSession>, TransportError> {
            std::future::pending().await
        }
    }

    fn watch_states(
        connection: &SubscriberConnection,
    ) -> mpsc::UnboundedReceiver<StateChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        connection.on_state_change(move |change| {
            let _ = tx.send(change.clone());
            Ok(())
        });
        rx
    }

    fn watch_events(connection: &SubscriberConnection) -> mpsc::UnboundedReceiver<MarketEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        connection.on_event(move |event| {
            let _ = tx.send(event.clone());
            Ok(())
        });
        rx
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        timeout(Duration::from_secs(120), rx.recv())
            .await
            .expect("timed out waiting for notification")
            .expect("channel closed")
    }

    fn aapl() -> MarketEvent {
        MarketEvent::new("AAPL")
            .with_price(Decimal::from_str("150.00").unwrap())
            .with_previous_price(Decimal::from_str("148.50").unwrap())
    }

    #[tokio::test]
    async fn start_connects_and_delivers_events() {
        let (script, session) = scripted_session();
        let mut transport = MockMarketTransport::new();
        transport.expect_connect().return_once(move || Ok(session));

        let connection = SubscriberConnection::new(Arc::new(transport), ReconnectSchedule::default());
        let mut states = watch_states(&connection);
        let mut events = watch_events(&connection);

        assert_ok!(connection.start().await);
        assert_eq!(next(&mut states).await.current, ConnectionState::Connecting);
        assert_eq!(next(&mut states).await.current, ConnectionState::Connected);
        assert!(connection.is_connected());

        script.send(Ok(Some(aapl()))).unwrap();
        let received = next(&mut events).await;

        assert_eq!(received.symbol, "AAPL");
        assert_eq!(received.change(), Some(Decimal::from_str("1.50").unwrap()));
        // Stamped on receipt since the producer sent no timestamp.
        assert!(received.timestamp.is_some());

        connection.stop().await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn failing_listener_does_not_block_next_event() {
        let (script, session) = scripted_session();
        let mut transport = MockMarketTransport::new();
        transport.expect_connect().return_once(move || Ok(session));

        let connection = SubscriberConnection::new(Arc::new(transport), ReconnectSchedule::default());
        let mut states = watch_states(&connection);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        connection.on_event(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("handler failed on first event");
            }
            Ok(())
        });
        let mut events = watch_events(&connection);

        connection.start().await.unwrap();
        next(&mut states).await;
        next(&mut states).await;

        script.send(Ok(Some(MarketEvent::new("E1")))).unwrap();
        script.send(Ok(Some(MarketEvent::new("E2")))).unwrap();

        assert_eq!(next(&mut events).await.symbol, "E1");
        assert_eq!(next(&mut events).await.symbol, "E2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(connection.is_connected());

        connection.stop().await;
    }

    #[tokio::test]
    async fn malformed_message_keeps_session() {
        let (script, session) = scripted_session();
        let mut transport = MockMarketTransport::new();
        transport.expect_connect().return_once(move || Ok(session));

        let connection = SubscriberConnection::new(Arc::new(transport), ReconnectSchedule::default());
        let mut events = watch_events(&connection);
        connection.start().await.unwrap();

        script
            .send(Err(TransportError::Decode("not json".to_string())))
            .unwrap();
        script.send(Ok(Some(MarketEvent::new("MSFT")))).unwrap();

        assert_eq!(next(&mut events).await.symbol, "MSFT");
        assert!(connection.is_connected());

        connection.stop().await;
    }

    #[tokio::test]
    async fn handshake_failure_settles_disconnected_without_retry() {
        let mut transport = MockMarketTransport::new();
        transport
            .expect_connect()
            .times(1)
            .returning(|| Err(TransportError::Connect("connection refused".to_string())));

        let connection = SubscriberConnection::new(Arc::new(transport), ReconnectSchedule::default());
        let mut states = watch_states(&connection);

        // The failure is not the caller's problem.
        assert_ok!(connection.start().await);

        assert_eq!(next(&mut states).await.current, ConnectionState::Connecting);
        let failed = next(&mut states).await;
        assert_eq!(failed.previous, ConnectionState::Connecting);
        assert_eq!(failed.current, ConnectionState::Disconnected);
        assert!(failed.error.unwrap().contains("connection refused"));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_follows_fixed_schedule_then_gives_up() {
        let attempts = Arc::new(parking_lot::Mutex::new(Vec::<Instant>::new()));
        let recorded = Arc::clone(&attempts);

        let mut transport = MockMarketTransport::new();
        transport.expect_connect().returning(move || {
            let mut calls = recorded.lock();
            calls.push(Instant::now());
            if calls.len() == 1 {
                Ok(closed_session())
            } else {
                Err(TransportError::Connect("hub unavailable".to_string()))
            }
        });

        let connection = SubscriberConnection::new(Arc::new(transport), ReconnectSchedule::default());
        let mut states = watch_states(&connection);
        connection.start().await.unwrap();

        let mut seen = Vec::new();
        loop {
            let change = next(&mut states).await;
            let terminal =
                change.current == ConnectionState::Disconnected && change.error.is_some();
            seen.push(change);
            if terminal {
                break;
            }
        }

        let sequence: Vec<ConnectionState> = seen.iter().map(|c| c.current).collect();
        assert_eq!(
            sequence,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Reconnecting,
                ConnectionState::Disconnected,
            ]
        );
        assert!(seen[3].error.as_deref().unwrap().contains("4 attempts"));

        // Initial connect plus exactly four reconnect attempts.
        let attempts = attempts.lock().clone();
        assert_eq!(attempts.len(), 5);

        let expected = [0, 2, 10, 30];
        for (i, secs) in expected.iter().enumerate() {
            let gap = attempts[i + 1] - attempts[i];
            let want = Duration::from_secs(*secs);
            assert!(
                gap >= want && gap < want + Duration::from_millis(50),
                "attempt {} gap {gap:?}, expected {want:?}",
                i + 1
            );
        }

        // No fifth attempt, however long we wait.
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_backoff_is_immediate() {
        let (attempt_tx, mut attempt_rx) = mpsc::unbounded_channel::<()>();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut transport = MockMarketTransport::new();
        transport.expect_connect().returning(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let _ = attempt_tx.send(());
            if n == 0 {
                Ok(closed_session())
            } else {
                Err(TransportError::Connect("hub unavailable".to_string()))
            }
        });

        let schedule = ReconnectSchedule::new(vec![Duration::ZERO, Duration::from_secs(60)]);
        let connection = SubscriberConnection::new(Arc::new(transport), schedule);
        let mut states = watch_states(&connection);
        connection.start().await.unwrap();

        // Initial connect, then the immediate reconnect attempt fails.
        next(&mut attempt_rx).await;
        next(&mut attempt_rx).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(connection.state(), ConnectionState::Reconnecting);

        let before = Instant::now();
        connection.stop().await;
        assert!(Instant::now() - before < Duration::from_secs(1));
        assert_eq!(connection.state(), ConnectionState::Disconnected);

        let mut last = None;
        while let Ok(change) = states.try_recv() {
            last = Some(change);
        }
        let last = last.unwrap();
        assert_eq!(last.previous, ConnectionState::Reconnecting);
        assert_eq!(last.current, ConnectionState::Disconnected);
        assert!(last.error.is_none());

        // The pending 60s attempt never happens.
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stop_during_handshake_aborts_it() {
        let connection =
            SubscriberConnection::new(Arc::new(HangingTransport), ReconnectSchedule::default());
        let mut states = watch_states(&connection);

        connection.start().await.unwrap();
        assert_eq!(next(&mut states).await.current, ConnectionState::Connecting);

        timeout(Duration::from_secs(5), connection.stop())
            .await
            .expect("stop must not wait for the handshake");

        let stopped = next(&mut states).await;
        assert_eq!(stopped.previous, ConnectionState::Connecting);
        assert_eq!(stopped.current, ConnectionState::Disconnected);

        // Redundant stops are harmless.
        connection.stop().await;
        connection.stop().await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn dropped_transport_reconnects() {
        let (script, live) = scripted_session();
        let mut sessions = vec![live, closed_session()];

        let mut transport = MockMarketTransport::new();
        transport
            .expect_connect()
            .times(2)
            .returning(move || Ok(sessions.pop().unwrap()));

        let connection = SubscriberConnection::new(Arc::new(transport), ReconnectSchedule::default());
        let mut states = watch_states(&connection);
        let mut events = watch_events(&connection);
        connection.start().await.unwrap();

        let sequence = [
            next(&mut states).await,
            next(&mut states).await,
            next(&mut states).await,
            next(&mut states).await,
        ];
        assert_eq!(sequence[0].current, ConnectionState::Connecting);
        assert_eq!(sequence[1].current, ConnectionState::Connected);
        assert_eq!(sequence[2].current, ConnectionState::Reconnecting);
        assert!(sequence[2].error.is_some());
        assert_eq!(sequence[3].current, ConnectionState::Connected);

        script.send(Ok(Some(aapl()))).unwrap();
        assert_eq!(next(&mut events).await.symbol, "AAPL");

        connection.stop().await;
    }

    #[tokio::test]
    async fn start_is_idempotent_while_live() {
        let (_script, session) = scripted_session();
        let mut transport = MockMarketTransport::new();
        transport.expect_connect().times(1).return_once(move || Ok(session));

        let connection = SubscriberConnection::new(Arc::new(transport), ReconnectSchedule::default());
        let mut states = watch_states(&connection);

        connection.start().await.unwrap();
        next(&mut states).await;
        next(&mut states).await;

        assert_ok!(connection.start().await);
        assert_ok!(connection.start().await);
        assert!(connection.is_connected());
        assert!(states.try_recv().is_err());

        connection.stop().await;
    }

    #[tokio::test]
    async fn start_after_settling_starts_a_new_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut transport = MockMarketTransport::new();
        transport.expect_connect().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Connect("refused".to_string()))
        });

        let connection = SubscriberConnection::new(Arc::new(transport), ReconnectSchedule::default());
        let mut states = watch_states(&connection);

        connection.start().await.unwrap();
        next(&mut states).await;
        next(&mut states).await;

        connection.start().await.unwrap();
        next(&mut states).await;
        next(&mut states).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn start_after_dispose_fails() {
        let (_script, session) = scripted_session();
        let mut transport = MockMarketTransport::new();
        transport.expect_connect().return_once(move || Ok(session));

        let connection = SubscriberConnection::new(Arc::new(transport), ReconnectSchedule::default());
        let mut states = watch_states(&connection);
        connection.start().await.unwrap();
        next(&mut states).await;
        next(&mut states).await;

        connection.dispose().await;
        connection.dispose().await;

        assert!(connection.is_disposed());
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        let err = assert_err!(connection.start().await);
        assert_eq!(err, SubscriberError::Disposed);
        assert_eq!(err.to_string(), "subscriber connection already disposed");
    }

    #[tokio::test]
    async fn dispose_unregisters_listeners() {
        let connection =
            SubscriberConnection::new(Arc::new(HangingTransport), ReconnectSchedule::default());
        let mut states = watch_states(&connection);
        let first = connection.on_event(|_| Ok(()));

        assert!(connection.remove_listener(first));
        assert!(!connection.remove_listener(first));

        connection.start().await.unwrap();
        next(&mut states).await;
        connection.dispose().await;

        // Listeners were removed before the final transition.
        assert!(states.try_recv().is_err());
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }
}
