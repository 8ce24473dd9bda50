//! GRBL status packet parsing
//!
//! Folds the payload of a `<...>` packet into the live controller state.
//! Fields after the condition token are unordered and each is optional;
//! unknown fields are ignored and values that fail to parse leave the
//! previous value in place, since controllers omit what has not changed.

use gcodelink_core::{Condition, Position, StepperFlags};
use serde::{Deserialize, Serialize};

/// Condition token reported by an idle controller
pub const IDLE_TOKEN: &str = "Idle";

/// Live controller state assembled from status packets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusModel {
    /// Raw condition token (e.g. `Idle`, `Hold:0`)
    pub machine_state: String,
    /// Coarse condition
    pub condition: Condition,
    /// Work position
    pub work_position: Position,
    /// Machine position
    pub machine_position: Position,
    /// Work coordinate offset, `MPos - WPos`
    pub work_offset: Position,
    /// Stepper enable flags
    pub steppers: StepperFlags,
    /// Feed rate
    pub feed_rate: f64,
    /// Spindle speed (RPM)
    pub spindle_speed: f64,
    /// Firmware identifier
    pub version: Option<String>,
    /// Number of packets applied
    pub packets: u64,
}

impl StatusModel {
    /// Create a model describing a detached controller
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one packet payload; returns false if it had no condition token
    pub fn apply(&mut self, payload: &str) -> bool {
        let mut fields = payload.trim().split('|');
        let condition = match fields.next().map(str::trim) {
            Some(token) if !token.is_empty() => token,
            _ => return false,
        };

        self.machine_state = condition.to_string();
        self.condition = if condition.starts_with(IDLE_TOKEN) {
            Condition::Idle
        } else {
            Condition::Run
        };

        let mut saw_wpos = false;
        let mut saw_mpos = false;
        for field in fields {
            let Some((name, value)) = field.split_once(':') else {
                continue;
            };
            match name.trim() {
                "WPos" => saw_wpos |= apply_axes(&mut self.work_position, value),
                "MPos" => saw_mpos |= apply_axes(&mut self.machine_position, value),
                "WCO" => {
                    apply_axes(&mut self.work_offset, value);
                }
                "Steppers" => {
                    for (i, flag) in value.split(',').take(3).enumerate() {
                        match flag.trim() {
                            "1" => self.steppers.set_axis(i, true),
                            "0" => self.steppers.set_axis(i, false),
                            _ => {}
                        }
                    }
                }
                "FS" => {
                    let mut parts = value.split(',');
                    if let Some(feed) = parts.next().and_then(parse_number) {
                        self.feed_rate = feed;
                    }
                    if let Some(rpm) = parts.next().and_then(parse_number) {
                        self.spindle_speed = rpm;
                    }
                }
                "F" => {
                    if let Some(feed) = parse_number(value) {
                        self.feed_rate = feed;
                    }
                }
                "Id" => {
                    let id = value.trim();
                    if !id.is_empty() {
                        self.version = Some(id.to_string());
                    }
                }
                other => tracing::trace!("Ignoring status field {}", other),
            }
        }

        // Controllers report one coordinate space; derive the other.
        if saw_mpos && !saw_wpos {
            self.work_position = self.machine_position.minus(&self.work_offset);
        } else if saw_wpos && !saw_mpos {
            self.machine_position = self.work_position.plus(&self.work_offset);
        }

        self.packets += 1;
        true
    }

    /// Forget everything, as on disconnect
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Update the axes present in a comma-separated list; true if any parsed
fn apply_axes(target: &mut Position, value: &str) -> bool {
    let mut any = false;
    for (i, part) in value.split(',').take(3).enumerate() {
        if let Some(v) = parse_number(part) {
            target.set_axis(i, v);
            any = true;
        }
    }
    any
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_packet() {
        let mut model = StatusModel::new();
        assert!(model.apply("Idle|WPos:1.000,0,-2.500|Steppers:1,1,0|FS:500,1200|Id:ABC123"));

        assert_eq!(model.condition, Condition::Idle);
        assert_eq!(model.work_position, Position::new(1.0, 0.0, -2.5));
        assert!(model.steppers.x && model.steppers.y && !model.steppers.z);
        assert_eq!(model.feed_rate, 500.0);
        assert_eq!(model.spindle_speed, 1200.0);
        assert_eq!(model.version.as_deref(), Some("ABC123"));
        assert_eq!(model.packets, 1);
    }

    #[test]
    fn test_missing_values_keep_previous() {
        let mut model = StatusModel::new();
        model.apply("Idle|WPos:1,2,3|FS:100,0");
        model.apply("Run|WPos:,5,|FS:,");

        assert_eq!(model.condition, Condition::Run);
        assert_eq!(model.work_position, Position::new(1.0, 5.0, 3.0));
        assert_eq!(model.feed_rate, 100.0);
    }

    #[test]
    fn test_non_idle_tokens_are_run() {
        let mut model = StatusModel::new();
        for token in ["Run", "Hold:0", "Jog", "Alarm", "Door:1"] {
            model.apply(token);
            assert_eq!(model.condition, Condition::Run, "{}", token);
            assert_eq!(model.machine_state, token);
        }
        model.apply("Idle");
        assert_eq!(model.condition, Condition::Idle);
    }

    #[test]
    fn test_work_position_derived_from_machine_position() {
        let mut model = StatusModel::new();
        model.apply("Idle|MPos:10,20,30|WCO:1,2,3");
        assert_eq!(model.work_position, Position::new(9.0, 18.0, 27.0));

        model.apply("Idle|WPos:0,0,0");
        assert_eq!(model.machine_position, Position::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_unknown_and_malformed_fields_ignored() {
        let mut model = StatusModel::new();
        assert!(model.apply("Idle|Bf:15,128|Ov:100,100,100|junk|Pn:XYZ|WPos:1,1,1"));
        assert_eq!(model.work_position, Position::new(1.0, 1.0, 1.0));
        assert!(!model.apply(""));
        assert!(!model.apply("|WPos:2,2,2"));
        assert_eq!(model.packets, 1);
    }
}
