//! Frame demultiplexer
//!
//! The controller interleaves two sub-protocols on one stream: bracketed
//! status packets (`<Idle|WPos:0,0,0>`) that may arrive at any moment, and
//! newline-terminated text responses. Chunks can split either kind anywhere,
//! so partial frames are carried over between calls to [`FrameDemux::push`].

/// Longest status packet payload accepted before the fragment is dropped
pub const MAX_PACKET_LEN: usize = 256;

/// Longest partial text line kept before the buffer is discarded
pub const MAX_LINE_LEN: usize = 8192;

/// A complete frame taken from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Payload of a status packet, without the brackets
    Status(String),
    /// A non-empty text line, trimmed
    Line(String),
}

/// Parser state between chunks
#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum DemuxState {
    /// Nothing carried over
    #[default]
    Empty,
    /// Part of a text line
    Text(Vec<u8>),
    /// Inside a status packet; `text` holds the line it interrupted
    Packet { packet: Vec<u8>, text: Vec<u8> },
}

/// Splits a chunked byte stream into status packets and text lines
#[derive(Debug, Default)]
pub struct FrameDemux {
    state: DemuxState,
}

impl FrameDemux {
    /// Create a demultiplexer with no carried-over data
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk
    ///
    /// Every status packet completed by this chunk is returned ahead of every
    /// text line completed by it. Within each kind, frames keep stream order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut statuses = Vec::new();
        let mut lines = Vec::new();

        let (mut packet, mut text) = match std::mem::take(&mut self.state) {
            DemuxState::Empty => (None, Vec::new()),
            DemuxState::Text(text) => (None, text),
            DemuxState::Packet { packet, text } => (Some(packet), text),
        };

        for &byte in chunk {
            if let Some(buf) = packet.as_mut() {
                match byte {
                    b'>' => {
                        let payload = String::from_utf8_lossy(buf).into_owned();
                        statuses.push(Frame::Status(payload));
                        packet = None;
                    }
                    b'<' => {
                        tracing::trace!("Status packet restarted, dropping {} bytes", buf.len());
                        buf.clear();
                    }
                    b'\n' => {
                        tracing::trace!("Unterminated status packet dropped");
                        packet = None;
                    }
                    _ if buf.len() >= MAX_PACKET_LEN => {
                        tracing::debug!("Oversized status packet dropped");
                        packet = None;
                    }
                    _ => buf.push(byte),
                }
                continue;
            }

            match byte {
                b'<' => packet = Some(Vec::new()),
                b'\n' => {
                    if let Some(line) = take_line(&mut text) {
                        lines.push(Frame::Line(line));
                    }
                }
                _ => {
                    if text.len() >= MAX_LINE_LEN {
                        tracing::warn!("Discarding {} bytes of unterminated text", text.len());
                        text.clear();
                    }
                    text.push(byte);
                }
            }
        }

        self.state = match packet {
            Some(packet) => DemuxState::Packet { packet, text },
            None if text.is_empty() => DemuxState::Empty,
            None => DemuxState::Text(text),
        };

        statuses.extend(lines);
        statuses
    }

    /// Check if a partial frame is carried over
    pub fn has_partial(&self) -> bool {
        self.state != DemuxState::Empty
    }

    /// Drop any carried-over data
    pub fn reset(&mut self) {
        self.state = DemuxState::Empty;
    }
}

fn take_line(text: &mut Vec<u8>) -> Option<String> {
    let line = String::from_utf8_lossy(text).trim().to_string();
    text.clear();
    (!line.is_empty()).then_some(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(s: &str) -> Frame {
        Frame::Status(s.to_string())
    }

    fn line(s: &str) -> Frame {
        Frame::Line(s.to_string())
    }

    #[test]
    fn test_single_chunk() {
        let mut demux = FrameDemux::new();
        let frames = demux.push(b"<Idle|WPos:0,0,0>ok\r\n");
        assert_eq!(frames, vec![status("Idle|WPos:0,0,0"), line("ok")]);
        assert!(!demux.has_partial());
    }

    #[test]
    fn test_packet_split_across_chunks() {
        let mut demux = FrameDemux::new();
        assert!(demux.push(b"<Run|WPo").is_empty());
        assert!(demux.has_partial());
        assert_eq!(demux.push(b"s:1,2,3>"), vec![status("Run|WPos:1,2,3")]);
    }

    #[test]
    fn test_packet_inside_text_line() {
        let mut demux = FrameDemux::new();
        let frames = demux.push(b"o<Idle>k\n");
        assert_eq!(frames, vec![status("Idle"), line("ok")]);
    }

    #[test]
    fn test_statuses_come_before_lines() {
        let mut demux = FrameDemux::new();
        let frames = demux.push(b"ok\n<Idle>error:2\n<Run>");
        assert_eq!(
            frames,
            vec![status("Idle"), status("Run"), line("ok"), line("error:2")]
        );
    }

    #[test]
    fn test_blank_lines_ignored() {
        let mut demux = FrameDemux::new();
        assert!(demux.push(b"\r\n\n   \n").is_empty());
        assert!(!demux.has_partial());
    }

    #[test]
    fn test_restarted_packet_drops_fragment() {
        let mut demux = FrameDemux::new();
        let frames = demux.push(b"<Idl<Run|FS:0,0>");
        assert_eq!(frames, vec![status("Run|FS:0,0")]);
    }

    #[test]
    fn test_oversized_packet_dropped() {
        let mut demux = FrameDemux::new();
        let mut data = vec![b'<'];
        data.extend(std::iter::repeat(b'x').take(MAX_PACKET_LEN + 10));
        data.extend_from_slice(b">\n<Idle>");
        let frames = demux.push(&data);
        assert!(frames.contains(&status("Idle")));
        assert!(frames
            .iter()
            .all(|f| !matches!(f, Frame::Status(s) if s.starts_with('x'))));
    }

    #[test]
    fn test_unterminated_noise_is_bounded() {
        let mut demux = FrameDemux::new();
        for _ in 0..4 {
            demux.push(&[b'z'; MAX_LINE_LEN]);
        }
        let frames = demux.push(b"\n");
        match frames.as_slice() {
            [Frame::Line(l)] => assert!(l.len() <= MAX_LINE_LEN),
            other => panic!("unexpected frames: {:?}", other),
        }
    }

    #[test]
    fn test_reset() {
        let mut demux = FrameDemux::new();
        demux.push(b"<Idle|WP");
        demux.reset();
        assert_eq!(demux.push(b"os:1,1,1>ok\n"), vec![line("os:1,1,1>ok")]);
    }
}
