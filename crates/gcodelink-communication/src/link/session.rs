//! Link session state
//!
//! All mutable state of one link lives here and is only touched under the
//! manager's lock: by the read task as chunks arrive, by the poll task on
//! each tick, and by callers issuing commands. Every method runs to
//! completion without awaiting. Events raised while the lock is held are
//! queued and delivered by the manager once it is released.

use super::config::LinkConfig;
use crate::communication::{
    AckOutcome, BatchId, FlowController, Frame, FrameDemux, LineWriter, PauseTracker, Pump,
    TransportWriter,
};
use crate::firmware::grbl::{
    Response, StatusModel, CYCLE_START, FEED_HOLD, LINE_TERMINATOR, STATUS_REQUEST,
};
use gcodelink_core::{
    Condition, ConnectionError, ControllerError, Error, LinkEvent, LinkState, LogEntry, LogLevel,
    OwnerId, ResponseLog, Result, StatusSnapshot,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of finished batches whose outcome is remembered
const OUTCOME_HISTORY: usize = 32;

/// How a batch ended
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BatchOutcome {
    /// Every line acknowledged; `response` is the reply to the last line
    Completed { response: String },
    /// The controller rejected a line
    Rejected(ControllerError),
    /// The link failed underneath the batch
    Aborted(ConnectionError),
    /// Stopped or replaced
    Cancelled,
}

impl BatchOutcome {
    fn into_result(self, batch: BatchId) -> Result<String> {
        match self {
            Self::Completed { response } => Ok(response),
            Self::Rejected(e) => Err(e.into()),
            Self::Aborted(e) => Err(e.into()),
            Self::Cancelled => Err(ControllerError::Cancelled { batch }.into()),
        }
    }
}

/// Writes prepared lines to the transport with their terminator
struct TransportLines<'a>(&'a mut Option<Box<dyn TransportWriter>>);

impl LineWriter for TransportLines<'_> {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let writer = self.0.as_mut().ok_or(ConnectionError::NotConnected)?;
        let mut data = Vec::with_capacity(line.len() + LINE_TERMINATOR.len());
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(LINE_TERMINATOR.as_bytes());
        writer.write(&data)
    }
}

pub(crate) struct LinkSession {
    state: LinkState,
    status: StatusModel,
    demux: FrameDemux,
    flow: FlowController,
    pause: PauseTracker,
    writer: Option<Box<dyn TransportWriter>>,
    owner: Option<OwnerId>,
    last_error: Option<String>,
    last_response: Option<String>,
    current_line: Option<String>,
    ack_response: String,
    outcomes: VecDeque<(BatchId, BatchOutcome)>,
    events: Vec<(OwnerId, LinkEvent)>,
    log: Option<Arc<dyn ResponseLog>>,
    status_after_ack: bool,
    orphan_ack_timeout: Duration,
}

impl LinkSession {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            state: LinkState::Disconnected,
            status: StatusModel::new(),
            demux: FrameDemux::new(),
            flow: FlowController::new(config.comment_marker),
            pause: PauseTracker::new(&config.pause_commands, config.comment_marker),
            writer: None,
            owner: None,
            last_error: None,
            last_response: None,
            current_line: None,
            ack_response: String::new(),
            outcomes: VecDeque::new(),
            events: Vec::new(),
            log: None,
            status_after_ack: config.status_after_ack,
            orphan_ack_timeout: config.orphan_ack_timeout,
        }
    }

    pub fn set_log(&mut self, log: Arc<dyn ResponseLog>) {
        self.log = Some(log);
    }

    pub fn set_owner(&mut self, owner: OwnerId) {
        if self.owner.as_ref() != Some(&owner) {
            tracing::debug!("Link owner is now {}", owner);
            self.owner = Some(owner);
        }
    }

    pub fn owner(&self) -> Option<&OwnerId> {
        self.owner.as_ref()
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn status_packets(&self) -> u64 {
        self.status.packets
    }

    pub fn can_resume(&self) -> bool {
        self.pause.can_resume()
    }

    pub fn pause_reason(&self) -> Option<String> {
        self.pause.reason().map(str::to_string)
    }

    pub fn awaiting_ack(&self) -> bool {
        self.flow.awaiting_ack()
    }

    pub fn take_events(&mut self) -> Vec<(OwnerId, LinkEvent)> {
        std::mem::take(&mut self.events)
    }

    /// Outcome of a finished batch; `None` while it is still running
    pub fn outcome(&self, batch: BatchId) -> Option<Result<String>> {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == batch)
            .map(|(_, outcome)| outcome.clone().into_result(batch))
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let reporting = self.state != LinkState::Disconnected && self.status.packets > 0;
        StatusSnapshot {
            connected: self.state.is_connected(),
            condition: if reporting {
                self.status.condition
            } else {
                Condition::Disconnected
            },
            machine_state: self.status.machine_state.clone(),
            link_state: self.state,
            last_error: self.last_error.clone(),
            progress: self.flow.progress(),
            current_line: self.current_line.clone(),
            work_position: self.status.work_position,
            machine_position: self.status.machine_position,
            steppers: self.status.steppers,
            feed_rate: self.status.feed_rate,
            spindle_speed: self.status.spindle_speed,
            version: self.status.version.clone(),
            last_response: self.last_response.clone(),
            streaming: self.flow.is_active(),
            can_resume: self.pause.can_resume(),
            pause_reason: self.pause_reason(),
        }
    }

    // Lifecycle

    pub fn begin_connect(&mut self, owner: OwnerId) {
        self.set_owner(owner);
        self.reset_stream();
        self.status.reset();
        self.last_error = None;
        self.state = LinkState::Connecting;
        self.broadcast_status();
    }

    pub fn attach(&mut self, writer: Box<dyn TransportWriter>) {
        self.writer = Some(writer);
    }

    pub fn fail_connect(&mut self, error: &Error) {
        self.close_writer();
        self.state = LinkState::Disconnected;
        self.surface_error(error.to_string());
    }

    pub fn not_responding(&mut self, attempts: u32) {
        tracing::warn!("No status report after {} attempts", attempts);
        self.surface_error(ConnectionError::NotResponding { attempts }.to_string());
    }

    pub fn mark_connected(&mut self) {
        self.state = LinkState::Idle;
        self.last_error = None;
        self.append_log(LogLevel::Info, "Connected");
        self.broadcast_status();
    }

    pub fn begin_disconnect(&mut self) {
        if self.state != LinkState::Disconnected {
            self.state = LinkState::Disconnecting;
            self.broadcast_status();
        }
    }

    pub fn detach(&mut self) {
        self.close_writer();
        self.cancel_batch();
        self.reset_stream();
        self.status.reset();
        self.current_line = None;
        self.state = LinkState::Disconnected;
        self.append_log(LogLevel::Info, "Disconnected");
        self.broadcast_status();
    }

    /// Stream ended or failed underneath the link
    pub fn connection_lost(&mut self, reason: &str) {
        if matches!(
            self.state,
            LinkState::Disconnected | LinkState::Disconnecting
        ) {
            return;
        }
        tracing::error!("Connection lost: {}", reason);

        let error = ConnectionError::ConnectionLost {
            reason: reason.to_string(),
        };
        self.close_writer();
        if let Some(id) = self.flow.reset() {
            self.record(id, BatchOutcome::Aborted(error.clone()));
        }
        self.reset_stream();
        self.state = LinkState::Disconnected;
        self.surface_error(error.to_string());
    }

    fn reset_stream(&mut self) {
        self.demux.reset();
        self.flow.reset();
        self.pause.resume();
        self.ack_response.clear();
    }

    fn close_writer(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.close() {
                tracing::warn!("Failed to close writer: {}", e);
            }
        }
    }

    // Inbound

    pub fn on_chunk(&mut self, chunk: &[u8]) {
        for frame in self.demux.push(chunk) {
            match frame {
                Frame::Status(payload) => self.on_status(&payload),
                Frame::Line(line) => self.on_line(&line),
            }
        }
    }

    fn on_status(&mut self, payload: &str) {
        tracing::trace!("Status <{}>", payload);
        if self.status.apply(payload) {
            self.broadcast_status();
        }
    }

    fn on_line(&mut self, line: &str) {
        tracing::debug!("<< {}", line);
        self.append_log(LogLevel::Received, line);
        self.last_response = Some(line.to_string());

        match Response::classify(line) {
            Response::Ok => self.on_ack(),
            response @ Response::Error { .. } => self.on_error(line, &response),
            response @ Response::Alarm { .. } => {
                self.flow.push_response(line);
                self.surface_error(response.describe());
            }
            Response::Message(_) => {
                self.flow.push_response(line);
            }
        }
    }

    fn on_ack(&mut self) {
        match self.flow.acknowledge() {
            AckOutcome::Advanced { response } => {
                self.pause.on_ack();
                self.ack_response = response;
                self.broadcast_status();
                if self.status_after_ack {
                    self.write_silent(STATUS_REQUEST);
                }
            }
            AckOutcome::Orphan => tracing::debug!("Consumed answer to a replaced line"),
            AckOutcome::Unexpected => tracing::debug!("Acknowledgment with nothing outstanding"),
            AckOutcome::Rejected { .. } => {}
        }
        self.dispatch();
    }

    fn on_error(&mut self, line: &str, response: &Response) {
        let described = response.describe();
        match self.flow.reject(line) {
            AckOutcome::Rejected {
                batch,
                line,
                response,
            } => {
                tracing::warn!("Line rejected: {} ({})", line, described);
                let message = match response.rsplit_once('\n') {
                    Some((before, _)) => format!("{}\n{}", before, described),
                    None => described,
                };
                self.pause.cancel_pending();
                self.record(
                    batch,
                    BatchOutcome::Rejected(ControllerError::CommandRejected { line, response }),
                );
                self.settle();
                self.surface_error(message);
            }
            AckOutcome::Orphan => {
                tracing::debug!("Replaced line was rejected: {}", described);
                self.dispatch();
            }
            AckOutcome::Unexpected | AckOutcome::Advanced { .. } => {
                tracing::warn!("Unsolicited error: {}", described);
                self.surface_error(described);
            }
        }
    }

    // Outbound

    /// Write lines of the active batch until one is outstanding or none remain
    fn dispatch(&mut self) {
        let pumped = self
            .flow
            .pump(&mut TransportLines(&mut self.writer), &mut self.pause);

        match pumped {
            Ok(Pump::Written { index, line }) => {
                tracing::debug!(">> [{}] {}", index, line);
                self.append_log(LogLevel::Sent, &line);
                self.current_line = Some(line.clone());
                self.state = LinkState::Streaming;
                self.push_event(LinkEvent::CurrentLineChanged(line));
            }
            Ok(Pump::Exhausted) => {
                if let Some(batch) = self.flow.finish() {
                    tracing::info!("Batch {} complete ({} lines)", batch.id(), batch.len());
                    let response = std::mem::take(&mut self.ack_response);
                    self.record(batch.id(), BatchOutcome::Completed { response });
                    self.last_error = None;
                }
                self.settle();
                self.broadcast_status();
            }
            Ok(Pump::Blocked | Pump::Idle) => {}
            Err(e) => {
                let error = write_failure(e);
                if let Some(id) = self.flow.clear() {
                    self.record(id, BatchOutcome::Aborted(error.clone()));
                }
                self.pause.cancel_pending();
                self.settle();
                self.surface_error(error.to_string());
            }
        }
    }

    /// Replace the active batch and start writing it
    pub fn start(&mut self, owner: OwnerId, lines: Vec<String>) -> Result<BatchId> {
        self.set_owner(owner);
        if !self.state.is_connected() {
            return Err(ConnectionError::NotConnected.into());
        }

        self.cancel_batch();
        let id = self.flow.replace(lines);
        self.pause.resume();
        self.ack_response.clear();
        tracing::info!(
            "Batch {} queued ({} lines)",
            id,
            self.flow.batch().map_or(0, |b| b.len())
        );

        if let Err(e) = self.write_realtime(CYCLE_START) {
            if let Some(id) = self.flow.clear() {
                self.record(id, BatchOutcome::Cancelled);
            }
            self.settle();
            return Err(e);
        }

        self.state = LinkState::Streaming;
        self.dispatch();
        Ok(id)
    }

    /// Hold the controller and drop the batch
    pub fn stop(&mut self, owner: OwnerId) -> Result<()> {
        self.set_owner(owner);
        if !self.state.is_connected() {
            return Err(ConnectionError::NotConnected.into());
        }

        let written = self.write_realtime(FEED_HOLD);
        self.pause.hold_by_host();
        if self.cancel_batch().is_some() {
            self.append_log(LogLevel::Info, "Stopped");
        }
        self.settle();
        self.broadcast_status();
        written
    }

    /// Release both holds and send the resume signal
    pub fn resume(&mut self) -> Result<()> {
        if !self.state.is_connected() {
            return Err(ConnectionError::NotConnected.into());
        }
        self.pause.resume();
        let written = self.write_realtime(CYCLE_START);
        self.broadcast_status();
        written
    }

    /// Ask for a status packet unless a line is outstanding; true if asked
    pub fn request_status(&mut self) -> Result<bool> {
        if self.flow.awaiting_ack() {
            return Ok(false);
        }
        self.write_realtime(STATUS_REQUEST).map(|_| true)
    }

    /// Periodic poll; returns false once the poll should stop
    pub fn poll_tick(&mut self, now: Instant) -> bool {
        match self.state {
            LinkState::Disconnected | LinkState::Disconnecting => return false,
            LinkState::Connecting => return true,
            LinkState::Idle | LinkState::Streaming => {}
        }

        if self.flow.expire_orphan(now, self.orphan_ack_timeout) {
            self.dispatch();
        }
        if self.flow.awaiting_ack() {
            tracing::trace!("Poll skipped, line outstanding");
            return true;
        }
        self.write_silent(STATUS_REQUEST);
        true
    }

    pub fn clear_error(&mut self) {
        if self.last_error.take().is_some() {
            self.broadcast_status();
        }
    }

    /// Drop the active batch, remembering it as cancelled
    fn cancel_batch(&mut self) -> Option<BatchId> {
        let id = self.flow.clear()?;
        tracing::info!("Batch {} cancelled", id);
        self.record(id, BatchOutcome::Cancelled);
        Some(id)
    }

    fn settle(&mut self) {
        if self.state == LinkState::Streaming && !self.flow.is_active() {
            self.state = LinkState::Idle;
        }
    }

    fn write_realtime(&mut self, byte: u8) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(ConnectionError::NotConnected)?;
        if let Err(e) = writer.write(&[byte]) {
            let error = write_failure(e);
            self.surface_error(error.to_string());
            return Err(error.into());
        }
        Ok(())
    }

    /// Write a status request; failures are only logged
    fn write_silent(&mut self, byte: u8) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.write(&[byte]) {
                tracing::debug!("Status request failed: {}", e);
            }
        }
    }

    // Reporting

    fn record(&mut self, batch: BatchId, outcome: BatchOutcome) {
        if self.outcomes.len() >= OUTCOME_HISTORY {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back((batch, outcome));
    }

    fn surface_error(&mut self, message: String) {
        self.append_log(LogLevel::Error, &message);
        self.last_error = Some(message);
        self.broadcast_status();
    }

    fn broadcast_status(&mut self) {
        let snapshot = self.snapshot();
        self.push_event(LinkEvent::StatusChanged(snapshot));
    }

    fn push_event(&mut self, event: LinkEvent) {
        if let Some(owner) = &self.owner {
            self.events.push((owner.clone(), event));
        }
    }

    fn append_log(&self, level: LogLevel, text: &str) {
        if let Some(log) = &self.log {
            log.append(LogEntry::new(level, text));
        }
    }
}

/// Normalise a failed write into [`ConnectionError::WriteFailed`]
fn write_failure(error: Error) -> ConnectionError {
    match error {
        Error::Connection(e @ ConnectionError::WriteFailed { .. }) => e,
        Error::Connection(e @ ConnectionError::NotConnected) => e,
        other => ConnectionError::WriteFailed {
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct SharedWriter {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        fail: Arc<Mutex<bool>>,
    }

    impl TransportWriter for SharedWriter {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            if *self.fail.lock() {
                return Err(ConnectionError::WriteFailed {
                    reason: "broken pipe".to_string(),
                }
                .into());
            }
            self.writes.lock().push(data.to_vec());
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    impl SharedWriter {
        fn lines(&self) -> Vec<String> {
            self.writes
                .lock()
                .iter()
                .filter(|w| w.ends_with(b"\n"))
                .map(|w| String::from_utf8_lossy(w).trim().to_string())
                .collect()
        }

        fn polls(&self) -> usize {
            self.writes.lock().iter().filter(|w| w.as_slice() == b"?").count()
        }
    }

    fn connected(config: &LinkConfig) -> (LinkSession, SharedWriter) {
        let writer = SharedWriter::default();
        let mut session = LinkSession::new(config);
        session.begin_connect(OwnerId::from("test"));
        session.attach(Box::new(writer.clone()));
        session.on_chunk(b"<Idle|WPos:0,0,0>");
        session.mark_connected();
        session.take_events();
        (session, writer)
    }

    fn owner() -> OwnerId {
        OwnerId::from("test")
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_batch_runs_to_completion() {
        let (mut session, writer) = connected(&LinkConfig::default());
        let id = session
            .start(owner(), strings(&["G91", "G1 X5 F200", "G90"]))
            .unwrap();
        assert_eq!(session.state(), LinkState::Streaming);

        session.on_chunk(b"ok\n");
        session.on_chunk(b"ok\n");
        session.on_chunk(b"ok\n");

        assert_eq!(writer.lines(), vec!["G91", "G1 X5 F200", "G90"]);
        assert_eq!(session.outcome(id).unwrap().unwrap(), "");
        assert_eq!(session.state(), LinkState::Idle);
        assert!(!session.snapshot().streaming);
    }

    #[test]
    fn test_error_aborts_and_surfaces() {
        let (mut session, writer) = connected(&LinkConfig::default());
        let id = session.start(owner(), strings(&["G0 X1", "G7", "G0 X2"])).unwrap();
        session.on_chunk(b"ok\nerror:20\n");

        assert_eq!(writer.lines(), vec!["G0 X1", "G7"]);
        let snapshot = session.snapshot();
        assert_eq!(
            snapshot.last_error.as_deref(),
            Some("error:20 - Unsupported or invalid g-code command found in block.")
        );
        assert_eq!(snapshot.progress, 0.0);
        assert!(session.outcome(id).unwrap().unwrap_err().is_protocol_error());
    }

    #[test]
    fn test_poll_suppressed_while_line_outstanding() {
        let config = LinkConfig {
            status_after_ack: false,
            ..LinkConfig::default()
        };
        let (mut session, writer) = connected(&config);
        session.start(owner(), strings(&["G4 P1", "G4 P1"])).unwrap();

        for _ in 0..5 {
            assert!(session.poll_tick(Instant::now()));
        }
        session.on_chunk(b"ok\n");
        assert!(session.poll_tick(Instant::now()));
        assert_eq!(writer.polls(), 0);

        session.on_chunk(b"ok\n");
        session.poll_tick(Instant::now());
        assert_eq!(writer.polls(), 1);
    }

    #[test]
    fn test_status_request_follows_each_ack() {
        let (mut session, writer) = connected(&LinkConfig::default());
        session.start(owner(), strings(&["G4 P1", "G4 P1"])).unwrap();

        session.poll_tick(Instant::now());
        assert_eq!(writer.polls(), 0);

        session.on_chunk(b"ok\n");
        assert_eq!(writer.polls(), 1);
        session.poll_tick(Instant::now());
        assert_eq!(writer.polls(), 1);

        session.on_chunk(b"ok\n");
        assert_eq!(writer.polls(), 2);
        assert_eq!(writer.lines(), vec!["G4 P1", "G4 P1"]);
    }

    #[test]
    fn test_silent_poll_failure() {
        let (mut session, writer) = connected(&LinkConfig::default());
        *writer.fail.lock() = true;
        assert!(session.poll_tick(Instant::now()));
        assert_eq!(session.snapshot().last_error, None);
    }

    #[test]
    fn test_write_failure_aborts_batch() {
        let (mut session, writer) = connected(&LinkConfig::default());
        session.start(owner(), strings(&["G0 X1", "G0 X2"])).unwrap();
        *writer.fail.lock() = true;
        session.on_chunk(b"ok\n");

        let snapshot = session.snapshot();
        assert_eq!(
            snapshot.last_error.as_deref(),
            Some("Write failed: broken pipe")
        );
        assert!(!snapshot.streaming);
        assert_eq!(session.state(), LinkState::Idle);
    }

    #[test]
    fn test_stop_orphans_outstanding_line() {
        let (mut session, writer) = connected(&LinkConfig::default());
        let first = session.start(owner(), strings(&["G0 X10"])).unwrap();
        session.stop(owner()).unwrap();
        assert!(session.can_resume());
        assert!(matches!(
            session.outcome(first),
            Some(Err(Error::Controller(ControllerError::Cancelled { .. })))
        ));

        let second = session.start(owner(), strings(&["G0 Y10"])).unwrap();
        assert_eq!(writer.lines(), vec!["G0 X10"]);

        session.on_chunk(b"ok\n");
        assert_eq!(writer.lines(), vec!["G0 X10", "G0 Y10"]);
        session.on_chunk(b"ok\n");
        assert!(session.outcome(second).unwrap().is_ok());
    }

    #[test]
    fn test_events_go_to_current_owner() {
        let (mut session, _writer) = connected(&LinkConfig::default());
        session.start(OwnerId::from("jog"), strings(&["G0 X1"])).unwrap();
        let events = session.take_events();
        assert!(!events.is_empty());
        assert!(events.iter().all(|(o, _)| o.as_str() == "jog"));
        assert!(events
            .iter()
            .any(|(_, e)| *e == LinkEvent::CurrentLineChanged("G0 X1".to_string())));
    }

    #[test]
    fn test_connection_lost() {
        let (mut session, _writer) = connected(&LinkConfig::default());
        let id = session.start(owner(), strings(&["G0 X1"])).unwrap();
        session.connection_lost("stream closed");

        assert_eq!(session.state(), LinkState::Disconnected);
        assert!(!session.poll_tick(Instant::now()));
        assert!(session
            .outcome(id)
            .unwrap()
            .unwrap_err()
            .is_connection_error());
        assert!(session.snapshot().last_error.is_some());
    }
}
