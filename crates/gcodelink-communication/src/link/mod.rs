//! Link manager
//!
//! Owns one transport to a controller. A single read task feeds incoming
//! chunks into the session; a poll task asks for a status packet at a fixed
//! interval whenever no line is outstanding. Callers enqueue batches, stop,
//! resume, and query status through [`LinkManager`].
//!
//! State transitions: Disconnected → Connecting → Idle ⇄ Streaming →
//! Disconnecting → Disconnected. A lost stream goes straight to Disconnected.

pub mod config;
pub mod notifier;
mod session;

pub use config::LinkConfig;
pub use notifier::Notifier;

use crate::communication::{BatchId, ConnectionParams, Connector, TransportReader};
use gcodelink_core::{
    ConnectionError, ControllerError, Error, EventKind, LinkEvent, LinkListener, LinkState,
    OwnerId, ResponseLog, Result, StatusSnapshot, SubscriptionId,
};
use parking_lot::{Mutex, RwLock};
use session::LinkSession;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Granularity of [`LinkManager::wait_for_completion`]
const COMPLETION_POLL: Duration = Duration::from_millis(10);

/// Session plus listeners, shared with the background tasks
struct LinkShared {
    session: Mutex<LinkSession>,
    notifier: Notifier,
    /// Events in the order the session raised them
    pending: Mutex<VecDeque<(OwnerId, LinkEvent)>>,
    /// Set while one thread is draining `pending`
    delivering: AtomicBool,
}

impl LinkShared {
    fn new(session: LinkSession) -> Self {
        Self {
            session: Mutex::new(session),
            notifier: Notifier::new(),
            pending: Mutex::new(VecDeque::new()),
            delivering: AtomicBool::new(false),
        }
    }

    /// Run `f` under the session lock, then deliver the events it raised
    ///
    /// Events are queued before the session lock is released, so the queue
    /// order is the order the session changed in. Listeners run with no
    /// lock held and may call back into the link.
    fn apply<R>(&self, f: impl FnOnce(&mut LinkSession) -> R) -> R {
        let result = {
            let mut session = self.session.lock();
            let result = f(&mut session);
            let events = session.take_events();
            if !events.is_empty() {
                self.pending.lock().extend(events);
            }
            result
        };
        self.deliver();
        result
    }

    /// Drain queued events one at a time
    ///
    /// Only one thread drains at once; a caller that finds another thread
    /// draining leaves its events to that thread.
    fn deliver(&self) {
        loop {
            if self
                .delivering
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            {
                let _guard = DeliveryGuard(&self.delivering);
                loop {
                    let next = self.pending.lock().pop_front();
                    match next {
                        Some((owner, event)) => self.notifier.notify(&owner, &event),
                        None => break,
                    }
                }
            }
            // Pick up events queued between the last pop and the flag clearing.
            if self.pending.lock().is_empty() {
                return;
            }
        }
    }
}

/// Clears the delivering flag, even if a listener panics
struct DeliveryGuard<'a>(&'a AtomicBool);

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Background tasks of an open link
struct IoTasks {
    reader: JoinHandle<()>,
    poller: Option<JoinHandle<()>>,
    shutdown: mpsc::Sender<()>,
}

/// Drives a line-oriented motion controller over one transport
pub struct LinkManager {
    connector: Arc<dyn Connector>,
    config: LinkConfig,
    shared: Arc<LinkShared>,
    tasks: RwLock<Option<IoTasks>>,
}

impl LinkManager {
    /// Create a manager that opens transports through `connector`
    pub fn new(connector: Arc<dyn Connector>, config: LinkConfig) -> Self {
        let session = LinkSession::new(&config);
        Self {
            connector,
            config,
            shared: Arc::new(LinkShared::new(session)),
            tasks: RwLock::new(None),
        }
    }

    /// Record traffic and surfaced errors in `log`
    pub fn with_response_log(self, log: Arc<dyn ResponseLog>) -> Self {
        self.shared.session.lock().set_log(log);
        self
    }

    /// Link tuning in use
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Open the transport and wait for the controller to report status
    ///
    /// Fails with [`ConnectionError::NotResponding`] when no status packet
    /// arrives within the handshake window. The transport is then left open
    /// in the `Connecting` state so traffic can still be inspected; call
    /// [`disconnect`](Self::disconnect) to release it.
    pub async fn connect(&self, params: &ConnectionParams, owner: OwnerId) -> Result<()> {
        let state = self.shared.apply(|s| {
            let state = s.state();
            if state == LinkState::Disconnected {
                s.begin_connect(owner);
            }
            state
        });
        if state != LinkState::Disconnected {
            return Err(ConnectionError::AlreadyConnected.into());
        }

        // A previous stream may have ended on its own and left its tasks behind.
        if let Some(stale) = self.tasks.write().take() {
            stale.abort();
        }

        tracing::info!("Connecting to {} at {} baud", params.port, params.baud_rate);
        let connector = self.connector.clone();
        let open_params = params.clone();
        let opened = tokio::task::spawn_blocking(move || connector.open(&open_params))
            .await
            .map_err(|e| Error::other(format!("Open task failed: {}", e)))
            .and_then(|r| r);

        let (reader, writer) = match opened {
            Ok(halves) => halves,
            Err(e) => {
                tracing::error!("Failed to open {}: {}", params.port, e);
                self.shared.apply(|s| s.fail_connect(&e));
                return Err(e);
            }
        };

        self.shared.apply(|s| s.attach(writer));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let reader = tokio::spawn(read_loop(self.shared.clone(), reader, shutdown_rx));
        *self.tasks.write() = Some(IoTasks {
            reader,
            poller: None,
            shutdown: shutdown_tx,
        });

        if let Err(e) = self.shared.apply(|s| s.request_status()) {
            self.disconnect().await?;
            return Err(e);
        }

        let attempts = self.config.handshake_attempts;
        for attempt in 1..=attempts {
            tokio::time::sleep(self.config.handshake_interval).await;
            let (state, packets) = {
                let session = self.shared.session.lock();
                (session.state(), session.status_packets())
            };
            if state != LinkState::Connecting {
                return Err(ConnectionError::ConnectionLost {
                    reason: "stream ended during handshake".to_string(),
                }
                .into());
            }
            if packets > 0 {
                break;
            }
            if attempt == attempts {
                self.shared.apply(|s| s.not_responding(attempts));
                return Err(ConnectionError::NotResponding { attempts }.into());
            }
            tracing::debug!("Waiting for status report ({}/{})", attempt, attempts);
            if let Err(e) = self.shared.apply(|s| s.request_status()) {
                tracing::debug!("Status request failed: {}", e);
            }
        }

        self.shared.apply(|s| s.mark_connected());
        let poller = tokio::spawn(poll_loop(
            self.shared.clone(),
            self.config.status_poll_interval,
        ));
        if let Some(tasks) = self.tasks.write().as_mut() {
            tasks.poller = Some(poller);
        }
        tracing::info!("Connected to {}", params.port);
        Ok(())
    }

    /// Stop polling and reading, then release the transport
    ///
    /// Each step tolerates failure of the previous one.
    pub async fn disconnect(&self) -> Result<()> {
        let tasks = self.tasks.write().take();
        self.shared.apply(|s| s.begin_disconnect());

        if let Some(tasks) = tasks {
            if let Some(poller) = tasks.poller {
                poller.abort();
            }
            if tasks.shutdown.try_send(()).is_err() {
                tracing::debug!("Read task already stopped");
            }
            drop(tasks.shutdown);

            let mut reader = tasks.reader;
            match tokio::time::timeout(self.config.shutdown_timeout, &mut reader).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => tracing::warn!("Read task failed: {}", e),
                Err(_) => {
                    tracing::warn!("Read task did not stop, aborting");
                    reader.abort();
                }
            }
        }

        self.shared.apply(|s| s.detach());
        tracing::info!("Disconnected");
        Ok(())
    }

    /// Replace the running batch with `lines` and start streaming
    pub fn start(&self, lines: Vec<String>, owner: OwnerId) -> Result<BatchId> {
        self.shared.apply(|s| s.start(owner, lines))
    }

    /// Send one line as its own batch
    pub fn send_command(&self, line: impl Into<String>, owner: OwnerId) -> Result<BatchId> {
        self.start(vec![line.into()], owner)
    }

    /// Send lines as one batch
    pub fn send_commands<I, S>(&self, lines: I, owner: OwnerId) -> Result<BatchId>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.start(lines.into_iter().map(Into::into).collect(), owner)
    }

    /// Hold the controller and drop the running batch
    pub fn stop(&self, owner: OwnerId) -> Result<()> {
        self.shared.apply(|s| s.stop(owner))
    }

    /// Release controller and host holds; the batch is left untouched
    pub fn resume(&self) -> Result<()> {
        self.shared.apply(|s| s.resume())
    }

    /// Wait until a batch finishes
    ///
    /// Returns the reply to the batch's last line.
    pub async fn wait_for_completion(&self, batch: BatchId, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(result) = self.shared.session.lock().outcome(batch) {
                return result;
            }
            if Instant::now() >= deadline {
                return Err(timeout_error(timeout));
            }
            tokio::time::sleep(COMPLETION_POLL).await;
        }
    }

    /// Current snapshot
    pub fn get_status(&self) -> StatusSnapshot {
        self.shared.session.lock().snapshot()
    }

    /// Snapshot taken after a fresh status packet
    ///
    /// While a line is outstanding no request is written; the next packet
    /// the controller sends on its own is awaited instead.
    pub async fn get_position(&self, owner: OwnerId) -> Result<StatusSnapshot> {
        let seen = self.shared.apply(|s| {
            s.set_owner(owner);
            if !s.state().is_connected() {
                return Err(Error::from(ConnectionError::NotConnected));
            }
            let seen = s.status_packets();
            s.request_status()?;
            Ok(seen)
        })?;

        for _ in 0..self.config.query_attempts {
            tokio::time::sleep(self.config.query_interval).await;
            let session = self.shared.session.lock();
            if session.status_packets() > seen {
                return Ok(session.snapshot());
            }
            if !session.state().is_connected() {
                return Err(ConnectionError::NotConnected.into());
            }
        }
        Err(timeout_error(self.config.query_timeout()))
    }

    /// Query the coordinate system and tool offset table
    ///
    /// Returns the raw text the controller sent before acknowledging.
    pub async fn get_tool_offsets(&self, owner: OwnerId) -> Result<String> {
        let batch = self.send_command(crate::firmware::grbl::OFFSETS_QUERY, owner)?;
        for _ in 0..self.config.query_attempts {
            tokio::time::sleep(self.config.query_interval).await;
            if let Some(result) = self.shared.session.lock().outcome(batch) {
                return result;
            }
        }
        Err(timeout_error(self.config.query_timeout()))
    }

    /// Listen for status changes raised while `owner` owns the link
    pub fn subscribe_status<L>(&self, owner: OwnerId, listener: L) -> SubscriptionId
    where
        L: LinkListener + 'static,
    {
        self.shared
            .notifier
            .subscribe(owner, EventKind::StatusChanged, Arc::new(listener))
    }

    /// Listen for lines written while `owner` owns the link
    pub fn subscribe_current_line<L>(&self, owner: OwnerId, listener: L) -> SubscriptionId
    where
        L: LinkListener + 'static,
    {
        self.shared
            .notifier
            .subscribe(owner, EventKind::CurrentLineChanged, Arc::new(listener))
    }

    /// Remove a listener; returns false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.notifier.unsubscribe(id)
    }

    /// Lifecycle state
    pub fn link_state(&self) -> LinkState {
        self.shared.session.lock().state()
    }

    /// Check if a responsive controller is attached
    pub fn is_connected(&self) -> bool {
        self.link_state().is_connected()
    }

    /// Current owner, if any caller has used the link
    pub fn owner(&self) -> Option<OwnerId> {
        self.shared.session.lock().owner().cloned()
    }

    /// Check if a resume would release a hold
    pub fn can_resume(&self) -> bool {
        self.shared.session.lock().can_resume()
    }

    /// Reason attached to the controller hold
    pub fn pause_reason(&self) -> Option<String> {
        self.shared.session.lock().pause_reason()
    }

    /// Check if a line is awaiting its answer
    pub fn awaiting_ack(&self) -> bool {
        self.shared.session.lock().awaiting_ack()
    }

    /// Forget the last surfaced error
    pub fn clear_error(&self) {
        self.shared.apply(|s| s.clear_error());
    }
}

impl Drop for LinkManager {
    fn drop(&mut self) {
        if let Some(tasks) = self.tasks.get_mut().take() {
            tasks.abort();
        }
    }
}

impl IoTasks {
    fn abort(self) {
        if let Some(poller) = self.poller {
            poller.abort();
        }
        self.reader.abort();
    }
}

fn timeout_error(timeout: Duration) -> Error {
    ControllerError::Timeout {
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
    .into()
}

async fn read_loop(
    shared: Arc<LinkShared>,
    mut reader: Box<dyn TransportReader>,
    mut shutdown: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("Read task stopping");
                break;
            }
            chunk = reader.read_chunk() => match chunk {
                Ok(Some(data)) => shared.apply(|s| s.on_chunk(&data)),
                Ok(None) => {
                    shared.apply(|s| s.connection_lost("stream closed"));
                    break;
                }
                Err(e) => {
                    shared.apply(|s| s.connection_lost(&e.to_string()));
                    break;
                }
            }
        }
    }

    if let Err(e) = reader.close() {
        tracing::warn!("Failed to close reader: {}", e);
    }
}

async fn poll_loop(shared: Arc<LinkShared>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if !shared.apply(|s| s.poll_tick(Instant::now())) {
            tracing::debug!("Status poll stopping");
            break;
        }
    }
}
