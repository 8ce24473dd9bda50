//! Transport boundary
//!
//! A transport is a duplex byte stream split into two halves. The reader half
//! is owned by the link's read task; the writer half is owned by the link
//! session and written synchronously, fire-and-forget.

use super::ConnectionParams;
use async_trait::async_trait;
use gcodelink_core::Result;

/// Readable half of a transport
#[async_trait]
pub trait TransportReader: Send {
    /// Wait for the next chunk of bytes
    ///
    /// Chunks may be of any size and split frames anywhere.
    /// Returns `Ok(None)` once the stream has ended.
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>>;

    /// Release the reader; must tolerate an already-broken stream
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writable half of a transport
pub trait TransportWriter: Send {
    /// Write all bytes
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Release the writer; must tolerate an already-broken stream
    fn close(&mut self) -> Result<()>;
}

/// Opens transports
pub trait Connector: Send + Sync {
    /// Open a transport and split it into reader and writer halves
    fn open(
        &self,
        params: &ConnectionParams,
    ) -> Result<(Box<dyn TransportReader>, Box<dyn TransportWriter>)>;
}
