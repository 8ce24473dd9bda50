//! Command queue and flow control
//!
//! Streams a batch of lines to the controller one at a time. A line is only
//! written once the previous one has been answered with `ok`; an `error:`
//! answer aborts the rest of the batch.
//!
//! A new batch always replaces the current one. If the replaced batch still
//! had a line awaiting its answer, that answer is treated as an orphan: it is
//! consumed when it arrives and the new batch is held back until then, so the
//! controller never has more than one line outstanding.

use super::pause::PauseTracker;
use gcodelink_core::Result;
use std::time::{Duration, Instant};

/// Identifies one batch for the lifetime of a link
pub type BatchId = u64;

/// Sink for complete command lines
pub trait LineWriter {
    /// Write one prepared line; the terminator is added by the writer
    fn write_line(&mut self, line: &str) -> Result<()>;
}

/// An ordered set of lines and the position reached in it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBatch {
    id: BatchId,
    lines: Vec<String>,
    cursor: usize,
    awaiting_ack: bool,
}

impl CommandBatch {
    fn new(id: BatchId, lines: Vec<String>) -> Self {
        Self {
            id,
            lines,
            cursor: 0,
            awaiting_ack: false,
        }
    }

    /// Batch identifier
    pub fn id(&self) -> BatchId {
        self.id
    }

    /// Lines as queued
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Number of queued lines
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Check if the batch has no lines
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Index of the next line to send, or of the line awaiting its answer
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Check if a written line is awaiting its answer
    pub fn is_awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }

    /// Check if every line has been sent and answered
    pub fn is_exhausted(&self) -> bool {
        !self.awaiting_ack && self.cursor >= self.lines.len()
    }

    /// Line at the cursor, as queued
    pub fn current_line(&self) -> Option<&str> {
        self.lines.get(self.cursor).map(String::as_str)
    }
}

/// Result of trying to write the next line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pump {
    /// A line was written and now awaits its answer
    Written {
        /// Index of the line in the batch
        index: usize,
        /// Line as written
        line: String,
    },
    /// Every line has been answered
    Exhausted,
    /// A line is outstanding
    Blocked,
    /// No batch
    Idle,
}

/// Result of feeding a terminating answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Answer belonged to a line of a replaced batch
    Orphan,
    /// Nothing was outstanding
    Unexpected,
    /// The outstanding line was accepted
    Advanced {
        /// Text received between the write and the `ok`
        response: String,
    },
    /// The outstanding line was rejected and the batch dropped
    Rejected {
        /// The dropped batch
        batch: BatchId,
        /// Rejected line, as queued
        line: String,
        /// Accumulated response, ending with the error line
        response: String,
    },
}

/// Owns the active batch and the one-line-outstanding gate
#[derive(Debug)]
pub struct FlowController {
    batch: Option<CommandBatch>,
    orphan_since: Option<Instant>,
    response: Vec<String>,
    next_id: BatchId,
    comment_marker: char,
}

impl FlowController {
    /// Create a controller stripping comments introduced by `comment_marker`
    pub fn new(comment_marker: char) -> Self {
        Self {
            batch: None,
            orphan_since: None,
            response: Vec::new(),
            next_id: 1,
            comment_marker,
        }
    }

    /// Strip the trailing comment and surrounding whitespace
    pub fn prepare_line(&self, raw: &str) -> String {
        let code = match raw.split_once(self.comment_marker) {
            Some((code, _)) => code,
            None => raw,
        };
        code.trim().to_string()
    }

    /// Install a new batch, replacing any current one
    pub fn replace(&mut self, lines: Vec<String>) -> BatchId {
        self.drop_batch();
        let id = self.next_id;
        self.next_id += 1;
        self.batch = Some(CommandBatch::new(id, lines));
        id
    }

    /// Drop the current batch; returns its id
    pub fn clear(&mut self) -> Option<BatchId> {
        self.drop_batch().map(|b| b.id)
    }

    /// Forget the batch and any orphaned answer, as after losing the link
    pub fn reset(&mut self) -> Option<BatchId> {
        let id = self.batch.take().map(|b| b.id);
        self.orphan_since = None;
        self.response.clear();
        id
    }

    /// Remove an exhausted batch
    pub fn finish(&mut self) -> Option<CommandBatch> {
        if self.batch.as_ref().is_some_and(CommandBatch::is_exhausted) {
            self.batch.take()
        } else {
            None
        }
    }

    fn drop_batch(&mut self) -> Option<CommandBatch> {
        let batch = self.batch.take()?;
        if batch.awaiting_ack && self.orphan_since.is_none() {
            tracing::debug!(
                "Batch {} replaced with line {} outstanding",
                batch.id,
                batch.cursor
            );
            self.orphan_since = Some(Instant::now());
        }
        self.response.clear();
        Some(batch)
    }

    /// Write the next non-empty line if none is outstanding
    ///
    /// Lines that are empty once their comment is stripped are skipped
    /// without waiting for an answer. A write error leaves the gate closed
    /// and is returned to the caller.
    pub fn pump(&mut self, writer: &mut dyn LineWriter, pause: &mut PauseTracker) -> Result<Pump> {
        let blocked_by_orphan = self.orphan_since.is_some();
        let Some(batch) = self.batch.as_mut() else {
            return Ok(Pump::Idle);
        };
        if blocked_by_orphan || batch.awaiting_ack {
            return Ok(Pump::Blocked);
        }

        while let Some(raw) = batch.lines.get(batch.cursor) {
            let prepared = match raw.split_once(self.comment_marker) {
                Some((code, _)) => code.trim(),
                None => raw.trim(),
            };
            if prepared.is_empty() {
                batch.cursor += 1;
                continue;
            }

            writer.write_line(prepared)?;
            batch.awaiting_ack = true;
            pause.on_line_written(raw, prepared);
            return Ok(Pump::Written {
                index: batch.cursor,
                line: prepared.to_string(),
            });
        }

        Ok(Pump::Exhausted)
    }

    /// Feed an `ok`
    pub fn acknowledge(&mut self) -> AckOutcome {
        if self.orphan_since.take().is_some() {
            self.response.clear();
            return AckOutcome::Orphan;
        }
        match self.batch.as_mut() {
            Some(batch) if batch.awaiting_ack => {
                batch.awaiting_ack = false;
                batch.cursor += 1;
                AckOutcome::Advanced {
                    response: std::mem::take(&mut self.response).join("\n"),
                }
            }
            _ => AckOutcome::Unexpected,
        }
    }

    /// Feed an `error:` line
    pub fn reject(&mut self, error_line: &str) -> AckOutcome {
        if self.orphan_since.take().is_some() {
            self.response.clear();
            return AckOutcome::Orphan;
        }
        if !self.batch.as_ref().is_some_and(|b| b.awaiting_ack) {
            return AckOutcome::Unexpected;
        }

        self.response.push(error_line.to_string());
        let response = std::mem::take(&mut self.response).join("\n");
        match self.batch.take() {
            Some(batch) => AckOutcome::Rejected {
                batch: batch.id,
                line: batch.current_line().unwrap_or_default().to_string(),
                response,
            },
            None => AckOutcome::Unexpected,
        }
    }

    /// Accumulate a non-terminating text line; returns false if nothing is outstanding
    pub fn push_response(&mut self, line: &str) -> bool {
        if !self.awaiting_ack() {
            return false;
        }
        self.response.push(line.to_string());
        true
    }

    /// Give up on an orphaned answer older than `timeout`; returns true if dropped
    pub fn expire_orphan(&mut self, now: Instant, timeout: Duration) -> bool {
        match self.orphan_since {
            Some(since) if now.saturating_duration_since(since) >= timeout => {
                tracing::warn!("No answer for replaced line after {:?}, continuing", timeout);
                self.orphan_since = None;
                self.response.clear();
                true
            }
            _ => false,
        }
    }

    /// Check if an answer is outstanding, for the current batch or a replaced one
    pub fn awaiting_ack(&self) -> bool {
        self.orphan_since.is_some() || self.batch.as_ref().is_some_and(|b| b.awaiting_ack)
    }

    /// Check if an orphaned answer is outstanding
    pub fn has_orphan(&self) -> bool {
        self.orphan_since.is_some()
    }

    /// Ratio of answered lines to queued lines; 0 without a batch
    pub fn progress(&self) -> f64 {
        match &self.batch {
            Some(batch) if !batch.lines.is_empty() => {
                batch.cursor.min(batch.lines.len()) as f64 / batch.lines.len() as f64
            }
            _ => 0.0,
        }
    }

    /// Active batch
    pub fn batch(&self) -> Option<&CommandBatch> {
        self.batch.as_ref()
    }

    /// Check if a batch is active
    pub fn is_active(&self) -> bool {
        self.batch.is_some()
    }
}

impl Default for FlowController {
    fn default() -> Self {
        Self::new(';')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcodelink_core::ConnectionError;

    #[derive(Default)]
    struct RecordingWriter {
        lines: Vec<String>,
        fail: bool,
    }

    impl LineWriter for RecordingWriter {
        fn write_line(&mut self, line: &str) -> Result<()> {
            if self.fail {
                return Err(ConnectionError::WriteFailed {
                    reason: "closed".to_string(),
                }
                .into());
            }
            self.lines.push(line.to_string());
            Ok(())
        }
    }

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_one_line_at_a_time() {
        let mut flow = FlowController::default();
        let mut pause = PauseTracker::default();
        let mut writer = RecordingWriter::default();
        flow.replace(lines(&["G91", "G1 X5 F200", "G90"]));

        assert!(matches!(
            flow.pump(&mut writer, &mut pause).unwrap(),
            Pump::Written { index: 0, .. }
        ));
        assert_eq!(flow.pump(&mut writer, &mut pause).unwrap(), Pump::Blocked);
        assert_eq!(writer.lines, vec!["G91"]);

        assert!(matches!(flow.acknowledge(), AckOutcome::Advanced { .. }));
        flow.pump(&mut writer, &mut pause).unwrap();
        flow.acknowledge();
        flow.pump(&mut writer, &mut pause).unwrap();
        flow.acknowledge();
        assert!((flow.progress() - 1.0).abs() < f64::EPSILON);
        assert_eq!(flow.pump(&mut writer, &mut pause).unwrap(), Pump::Exhausted);

        let batch = flow.finish().unwrap();
        assert_eq!(batch.cursor(), 3);
        assert!(!batch.is_awaiting_ack());
        assert_eq!(writer.lines, vec!["G91", "G1 X5 F200", "G90"]);
        assert_eq!(flow.progress(), 0.0);
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let mut flow = FlowController::default();
        let mut pause = PauseTracker::default();
        let mut writer = RecordingWriter::default();
        flow.replace(lines(&["; header", "", "G0 X1 ; rapid", "   "]));

        assert_eq!(
            flow.pump(&mut writer, &mut pause).unwrap(),
            Pump::Written {
                index: 2,
                line: "G0 X1".to_string()
            }
        );
        flow.acknowledge();
        assert_eq!(flow.pump(&mut writer, &mut pause).unwrap(), Pump::Exhausted);
        assert_eq!(writer.lines.len(), 1);
    }

    #[test]
    fn test_error_aborts_batch() {
        let mut flow = FlowController::default();
        let mut pause = PauseTracker::default();
        let mut writer = RecordingWriter::default();
        let id = flow.replace(lines(&["G0 X0", "G5 X1", "G0 X2"]));

        flow.pump(&mut writer, &mut pause).unwrap();
        flow.acknowledge();
        flow.pump(&mut writer, &mut pause).unwrap();
        assert!(flow.push_response("[MSG:bad]"));
        match flow.reject("error:20") {
            AckOutcome::Rejected {
                batch,
                line,
                response,
            } => {
                assert_eq!(batch, id);
                assert_eq!(line, "G5 X1");
                assert_eq!(response, "[MSG:bad]\nerror:20");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(flow.batch().is_none());
        assert!(!flow.awaiting_ack());
        assert_eq!(flow.pump(&mut writer, &mut pause).unwrap(), Pump::Idle);
        assert_eq!(writer.lines.len(), 2);
    }

    #[test]
    fn test_replaced_batch_orphans_outstanding_answer() {
        let mut flow = FlowController::default();
        let mut pause = PauseTracker::default();
        let mut writer = RecordingWriter::default();
        flow.replace(lines(&["G0 X10"]));
        flow.pump(&mut writer, &mut pause).unwrap();

        flow.replace(lines(&["G0 Y10"]));
        assert!(flow.has_orphan());
        assert_eq!(flow.pump(&mut writer, &mut pause).unwrap(), Pump::Blocked);

        assert_eq!(flow.acknowledge(), AckOutcome::Orphan);
        assert!(matches!(
            flow.pump(&mut writer, &mut pause).unwrap(),
            Pump::Written { index: 0, .. }
        ));
        assert_eq!(writer.lines, vec!["G0 X10", "G0 Y10"]);
    }

    #[test]
    fn test_orphan_expires() {
        let mut flow = FlowController::default();
        let mut pause = PauseTracker::default();
        let mut writer = RecordingWriter::default();
        flow.replace(lines(&["G4 P10"]));
        flow.pump(&mut writer, &mut pause).unwrap();
        flow.clear();
        assert!(flow.awaiting_ack());

        let now = Instant::now();
        assert!(!flow.expire_orphan(now, Duration::from_secs(60)));
        assert!(flow.expire_orphan(now + Duration::from_secs(61), Duration::from_secs(60)));
        assert!(!flow.awaiting_ack());
        assert_eq!(flow.acknowledge(), AckOutcome::Unexpected);
    }

    #[test]
    fn test_reset_drops_orphan() {
        let mut flow = FlowController::default();
        let mut pause = PauseTracker::default();
        let mut writer = RecordingWriter::default();
        let id = flow.replace(lines(&["G0 X1"]));
        flow.pump(&mut writer, &mut pause).unwrap();
        flow.replace(lines(&["G0 X2"]));
        assert_eq!(flow.reset(), Some(id + 1));
        assert!(!flow.awaiting_ack());
        assert_eq!(flow.pump(&mut writer, &mut pause).unwrap(), Pump::Idle);
    }

    #[test]
    fn test_write_failure_keeps_gate_closed() {
        let mut flow = FlowController::default();
        let mut pause = PauseTracker::default();
        let mut writer = RecordingWriter {
            fail: true,
            ..Default::default()
        };
        flow.replace(lines(&["G0 X0"]));
        assert!(flow.pump(&mut writer, &mut pause).is_err());
        assert!(!flow.awaiting_ack());
        assert_eq!(flow.batch().map(CommandBatch::cursor), Some(0));
    }

    #[test]
    fn test_pause_command_tracked_on_write() {
        let mut flow = FlowController::default();
        let mut pause = PauseTracker::default();
        let mut writer = RecordingWriter::default();
        flow.replace(lines(&["M0 ; change tool"]));
        flow.pump(&mut writer, &mut pause).unwrap();
        assert_eq!(writer.lines, vec!["M0"]);
        assert_eq!(pause.reason(), Some("change tool"));
        assert!(!pause.can_resume());
    }

    #[test]
    fn test_unsolicited_text_not_accumulated() {
        let mut flow = FlowController::default();
        assert!(!flow.push_response("Grbl 1.1h ['$' for help]"));
        assert_eq!(flow.acknowledge(), AckOutcome::Unexpected);
        assert_eq!(flow.reject("error:9"), AckOutcome::Unexpected);
    }
}
