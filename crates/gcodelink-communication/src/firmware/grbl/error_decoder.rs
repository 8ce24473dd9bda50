//! GRBL error and alarm codes
//!
//! Maps the numeric codes of `error:n` and `ALARM:n` responses to readable
//! text (GRBL 1.1 code set).

/// Describe an `error:` code
pub fn decode_error(code: u16) -> Option<&'static str> {
    let text = match code {
        1 => "Expected a command letter; G-code words are a letter followed by a value.",
        2 => "Missing or malformed numeric value.",
        3 => "Unrecognised or unsupported '$' system command.",
        4 => "Negative value given where a positive one is required.",
        5 => "Homing cycle is disabled in settings.",
        6 => "Step pulse time must be at least 3 microseconds.",
        7 => "Settings read failed; defaults were restored.",
        8 => "'$' command is only accepted while idle.",
        9 => "G-code is locked out while in alarm or jog state.",
        10 => "Soft limits require homing to be enabled.",
        11 => "Line exceeds the maximum length and was discarded.",
        12 => "Setting value exceeds the maximum step rate.",
        13 => "Safety door opened; door state entered.",
        14 => "Build info or startup line is too long to store.",
        15 => "Jog target is beyond machine travel; jog ignored.",
        16 => "Jog command lacks '=' or contains forbidden G-code.",
        17 => "Laser mode requires a PWM spindle output.",
        20 => "Unsupported or invalid g-code command found in block.",
        21 => "Block contains more than one command from the same modal group.",
        22 => "Feed rate has not been set.",
        23 => "Command requires an integer value.",
        24 => "Block contains more than one command using axis words.",
        25 => "A word is repeated in the block.",
        26 => "Command requires axis words but none were given.",
        27 => "Line number is out of range (1 to 9,999,999).",
        28 => "Command is missing a required P or L word.",
        29 => "Only work coordinate systems G54 to G59 are supported.",
        30 => "G53 requires G0 or G1 motion mode.",
        31 => "Axis words given while G80 motion cancel is active.",
        32 => "Arc has no axis words in the selected plane.",
        33 => "Motion target is invalid.",
        34 => "Arc radius definition produced an impossible geometry.",
        35 => "Arc offset definition is missing the offset word for the selected plane.",
        36 => "Block contains unused words.",
        37 => "Tool length offset applied to an axis other than the configured one.",
        38 => "Tool number exceeds the supported maximum.",
        _ => return None,
    };
    Some(text)
}

/// Describe an `ALARM:` code
pub fn decode_alarm(code: u16) -> Option<&'static str> {
    let text = match code {
        1 => "Hard limit triggered; position is likely lost, re-home the machine.",
        2 => "Soft limit: target exceeds machine travel; position retained.",
        3 => "Reset during motion; position may be lost, re-home the machine.",
        4 => "Probe fail: probe not in the expected initial state.",
        5 => "Probe fail: no contact within the programmed travel.",
        6 => "Homing fail: reset during the homing cycle.",
        7 => "Homing fail: safety door opened during homing.",
        8 => "Homing fail: could not clear the limit switch on pull-off.",
        9 => "Homing fail: limit switch not found within search distance.",
        _ => return None,
    };
    Some(text)
}

/// Format an error code with its description
pub fn format_error(code: u16) -> String {
    match decode_error(code) {
        Some(text) => format!("error:{} - {}", code, text),
        None => format!("error:{} - Unknown error code", code),
    }
}

/// Format an alarm code with its description
pub fn format_alarm(code: u16) -> String {
    match decode_alarm(code) {
        Some(text) => format!("ALARM:{} - {}", code, text),
        None => format!("ALARM:{} - Unknown alarm code", code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error() {
        assert_eq!(
            decode_error(20),
            Some("Unsupported or invalid g-code command found in block.")
        );
        assert!(decode_error(9).is_some_and(|t| t.contains("alarm")));
        assert_eq!(decode_error(200), None);
    }

    #[test]
    fn test_format() {
        assert_eq!(
            format_error(20),
            "error:20 - Unsupported or invalid g-code command found in block."
        );
        assert!(format_error(99).ends_with("Unknown error code"));
        assert!(format_alarm(1).starts_with("ALARM:1 - Hard limit"));
        assert!(format_alarm(42).contains("Unknown alarm code"));
    }
}
