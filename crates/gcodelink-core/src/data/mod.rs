//! Data models for GCodeLink
//!
//! Value types describing the controller as seen from the host:
//! positions, stepper enable flags, the coarse run condition,
//! the link lifecycle, and the point-in-time [`StatusSnapshot`].

use serde::{Deserialize, Serialize};

/// Three-axis position in controller units
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X-axis position
    pub x: f64,
    /// Y-axis position
    pub y: f64,
    /// Z-axis position
    pub z: f64,
}

impl Position {
    /// Create a new position with X, Y, Z coordinates
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Get an axis by index (0 = X, 1 = Y, 2 = Z)
    pub fn axis(&self, index: usize) -> Option<f64> {
        match index {
            0 => Some(self.x),
            1 => Some(self.y),
            2 => Some(self.z),
            _ => None,
        }
    }

    /// Set an axis by index; out-of-range indices are ignored
    pub fn set_axis(&mut self, index: usize, value: f64) {
        match index {
            0 => self.x = value,
            1 => self.y = value,
            2 => self.z = value,
            _ => {}
        }
    }

    /// Component-wise difference
    pub fn minus(&self, other: &Position) -> Position {
        Position::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    /// Component-wise sum
    pub fn plus(&self, other: &Position) -> Position {
        Position::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "X{:.3} Y{:.3} Z{:.3}", self.x, self.y, self.z)
    }
}

/// Per-axis stepper driver enable flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepperFlags {
    /// X driver enabled
    pub x: bool,
    /// Y driver enabled
    pub y: bool,
    /// Z driver enabled
    pub z: bool,
}

impl StepperFlags {
    /// Set an axis flag by index; out-of-range indices are ignored
    pub fn set_axis(&mut self, index: usize, enabled: bool) {
        match index {
            0 => self.x = enabled,
            1 => self.y = enabled,
            2 => self.z = enabled,
            _ => {}
        }
    }
}

/// Coarse controller condition
///
/// Anything the controller reports other than its idle token counts as
/// [`Condition::Run`]; the raw token is kept separately on the snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    /// No controller attached
    #[default]
    Disconnected,
    /// Connected and idle
    Idle,
    /// Executing, holding, alarmed, or otherwise not idle
    Run,
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Idle => write!(f, "idle"),
            Self::Run => write!(f, "run"),
        }
    }
}

/// Lifecycle state of the link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// No transport open
    #[default]
    Disconnected,
    /// Transport open, waiting for the first status packet
    Connecting,
    /// Connected with no batch in flight
    Idle,
    /// Connected with a batch in flight
    Streaming,
    /// Tearing down the transport
    Disconnecting,
}

impl LinkState {
    /// Check if this state has a responsive controller attached
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Idle | LinkState::Streaming)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Idle => write!(f, "Idle"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Point-in-time view of the link and the controller
///
/// Produced on demand from live state; it has no lifecycle of its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// A responsive controller is attached
    pub connected: bool,
    /// Coarse condition derived from the last status packet
    pub condition: Condition,
    /// Raw condition token from the last status packet (e.g. `Hold:0`)
    pub machine_state: String,
    /// Link lifecycle state
    pub link_state: LinkState,
    /// Last surfaced error, kept until cleared
    pub last_error: Option<String>,
    /// Acknowledged lines over batch length, 0 when no batch
    pub progress: f64,
    /// Line most recently written to the controller
    pub current_line: Option<String>,
    /// Work (absolute) position
    pub work_position: Position,
    /// Machine position
    pub machine_position: Position,
    /// Stepper driver enable flags
    pub steppers: StepperFlags,
    /// Current feed rate
    pub feed_rate: f64,
    /// Current spindle speed (RPM)
    pub spindle_speed: f64,
    /// Firmware/version identifier
    pub version: Option<String>,
    /// Last complete text response
    pub last_response: Option<String>,
    /// A batch is in flight
    pub streaming: bool,
    /// A hold is active that a resume would release
    pub can_resume: bool,
    /// Reason attached to the active controller hold
    pub pause_reason: Option<String>,
}

impl StatusSnapshot {
    /// Create a snapshot describing a detached link
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the controller reported idle and nothing is in flight
    pub fn is_idle(&self) -> bool {
        self.connected && self.condition == Condition::Idle && !self.streaming
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_axes() {
        let mut pos = Position::new(1.0, 2.0, 3.0);
        assert_eq!(pos.axis(1), Some(2.0));
        assert_eq!(pos.axis(3), None);

        pos.set_axis(2, -4.5);
        pos.set_axis(7, 99.0);
        assert_eq!(pos, Position::new(1.0, 2.0, -4.5));
        assert_eq!(pos.to_string(), "X1.000 Y2.000 Z-4.500");
    }

    #[test]
    fn test_position_arithmetic() {
        let mpos = Position::new(10.0, 5.0, 0.0);
        let wco = Position::new(2.0, 1.0, -3.0);
        assert_eq!(mpos.minus(&wco), Position::new(8.0, 4.0, 3.0));
        assert_eq!(mpos.minus(&wco).plus(&wco), mpos);
    }

    #[test]
    fn test_link_state_connected() {
        assert!(!LinkState::Disconnected.is_connected());
        assert!(!LinkState::Connecting.is_connected());
        assert!(LinkState::Idle.is_connected());
        assert!(LinkState::Streaming.is_connected());
        assert!(!LinkState::Disconnecting.is_connected());
    }

    #[test]
    fn test_snapshot_defaults() {
        let snapshot = StatusSnapshot::new();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.condition, Condition::Disconnected);
        assert_eq!(snapshot.progress, 0.0);
        assert!(!snapshot.is_idle());
    }

    #[test]
    fn test_snapshot_serializes_condition_lowercase() {
        let snapshot = StatusSnapshot {
            condition: Condition::Idle,
            ..Default::default()
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"condition\":\"idle\""));
    }
}
