//! In-memory transport
//!
//! A duplex channel standing in for a serial port. The connector side is
//! handed to the link manager; the [`ChannelController`] side plays the
//! controller: it injects bytes, inspects what was written, breaks the
//! stream, and can answer writes through a responder callback.

use super::transport::{Connector, TransportReader, TransportWriter};
use super::ConnectionParams;
use async_trait::async_trait;
use gcodelink_core::{ConnectionError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Callback producing the controller's reply to one write
pub type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

#[derive(Default)]
struct ChannelShared {
    inbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    written: Vec<Vec<u8>>,
    fail_writes: bool,
    fail_open: Option<String>,
    opens: usize,
    writer_closed: bool,
    responder: Option<Responder>,
}

impl ChannelShared {
    fn deliver(&self, data: Vec<u8>) -> bool {
        match &self.inbound {
            Some(tx) => tx.send(data).is_ok(),
            None => false,
        }
    }
}

/// Opens in-memory transports
pub struct ChannelConnector {
    shared: Arc<Mutex<ChannelShared>>,
}

impl ChannelConnector {
    /// Create a connector and the controller end that drives it
    pub fn new() -> (Self, ChannelController) {
        let shared = Arc::new(Mutex::new(ChannelShared::default()));
        (
            Self {
                shared: shared.clone(),
            },
            ChannelController { shared },
        )
    }
}

impl Connector for ChannelConnector {
    fn open(
        &self,
        params: &ConnectionParams,
    ) -> Result<(Box<dyn TransportReader>, Box<dyn TransportWriter>)> {
        let mut shared = self.shared.lock();
        if let Some(reason) = shared.fail_open.clone() {
            return Err(ConnectionError::FailedToOpen {
                port: params.port.clone(),
                reason,
            }
            .into());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        shared.inbound = Some(tx);
        shared.writer_closed = false;
        shared.opens += 1;

        let reader: Box<dyn TransportReader> = Box::new(ChannelReader { rx });
        let writer: Box<dyn TransportWriter> = Box::new(ChannelWriter {
            shared: self.shared.clone(),
        });
        Ok((reader, writer))
    }
}

struct ChannelReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl TransportReader for ChannelReader {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.rx.recv().await)
    }

    fn close(&mut self) -> Result<()> {
        self.rx.close();
        Ok(())
    }
}

struct ChannelWriter {
    shared: Arc<Mutex<ChannelShared>>,
}

impl TransportWriter for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut shared = self.shared.lock();
        if shared.writer_closed {
            return Err(ConnectionError::NotConnected.into());
        }
        if shared.fail_writes {
            return Err(ConnectionError::WriteFailed {
                reason: "sink not writable".to_string(),
            }
            .into());
        }

        shared.written.push(data.to_vec());
        let reply = shared.responder.as_mut().and_then(|respond| respond(data));
        if let Some(reply) = reply {
            shared.deliver(reply);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.shared.lock().writer_closed = true;
        Ok(())
    }
}

/// Controller end of an in-memory transport
#[derive(Clone)]
pub struct ChannelController {
    shared: Arc<Mutex<ChannelShared>>,
}

impl ChannelController {
    /// Send bytes to the host; returns false when no stream is open
    pub fn push(&self, data: impl AsRef<[u8]>) -> bool {
        self.shared.lock().deliver(data.as_ref().to_vec())
    }

    /// Every write, in order
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.shared.lock().written.clone()
    }

    /// Newline-terminated writes, without the terminator
    pub fn written_lines(&self) -> Vec<String> {
        self.shared
            .lock()
            .written
            .iter()
            .filter(|w| w.ends_with(b"\n"))
            .map(|w| String::from_utf8_lossy(w).trim_end().to_string())
            .collect()
    }

    /// Number of single-byte real-time writes of `byte`
    pub fn realtime_count(&self, byte: u8) -> usize {
        self.shared
            .lock()
            .written
            .iter()
            .filter(|w| w.as_slice() == [byte])
            .count()
    }

    /// Forget recorded writes
    pub fn clear_written(&self) {
        self.shared.lock().written.clear();
    }

    /// End the stream as seen by the host's reader
    pub fn close_stream(&self) {
        self.shared.lock().inbound = None;
    }

    /// Make subsequent writes fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.lock().fail_writes = fail;
    }

    /// Make subsequent opens fail with `reason`
    pub fn set_fail_open(&self, reason: Option<String>) {
        self.shared.lock().fail_open = reason;
    }

    /// Answer each write with the bytes the callback returns
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        self.shared.lock().responder = Some(Box::new(responder));
    }

    /// Stop answering writes
    pub fn clear_responder(&self) {
        self.shared.lock().responder = None;
    }

    /// Number of successful opens
    pub fn open_count(&self) -> usize {
        self.shared.lock().opens
    }

    /// Check if the host closed its writer
    pub fn is_writer_closed(&self) -> bool {
        self.shared.lock().writer_closed
    }
}
