//! GRBL protocol
//!
//! Wire constants, status packet parsing, and response classification for
//! GRBL 1.1 and compatible controllers.

pub mod error_decoder;
pub mod response_parser;
pub mod status_parser;

pub use error_decoder::{decode_alarm, decode_error, format_alarm, format_error};
pub use response_parser::Response;
pub use status_parser::{StatusModel, IDLE_TOKEN};

/// Real-time status request
pub const STATUS_REQUEST: u8 = b'?';

/// Real-time feed hold
pub const FEED_HOLD: u8 = b'!';

/// Real-time cycle start / resume
pub const CYCLE_START: u8 = b'~';

/// Acknowledgment token
pub const ACK_TOKEN: &str = "ok";

/// Line terminator appended to every command line
pub const LINE_TERMINATOR: &str = "\n";

/// Command that dumps coordinate system and tool offsets
pub const OFFSETS_QUERY: &str = "$#";
