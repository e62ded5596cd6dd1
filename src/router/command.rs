//! Bus address and payload parsing
//!
//! Inbound:  `fpga/command/<device>/<name>` with a boolean payload
//! Outbound: `fpga/status/<device>/<name>` with `true` / `false`

use crate::error::ParseError;
use crate::state::Output;

/// Root segment shared by every address
pub const TOPIC_ROOT: &str = "fpga";

/// Subscription covering every command address
pub const COMMAND_FILTER: &str = "fpga/command/+/+";

/// Raw command as read off the bus; names are not validated yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCommand {
    pub device: String,
    pub name: String,
    pub logical_on: bool,
}

impl InboundCommand {
    /// Split a command address and normalize its payload
    pub fn parse(topic: &str, payload: &[u8]) -> Result<Self, ParseError> {
        let (device, name) = parse_command_topic(topic)?;
        let logical_on = parse_payload(payload)?;

        Ok(Self {
            device: device.to_string(),
            name: name.to_string(),
            logical_on,
        })
    }
}

fn parse_command_topic(topic: &str) -> Result<(&str, &str), ParseError> {
    let parts: Vec<&str> = topic.split('/').collect();
    match parts.as_slice() {
        [TOPIC_ROOT, "command", device, name] if !device.is_empty() && !name.is_empty() => {
            Ok((*device, *name))
        }
        _ => Err(ParseError::UnexpectedTopic(topic.to_string())),
    }
}

/// Normalize a payload to a logical state
///
/// Case-insensitive, surrounding whitespace ignored:
/// `true` / `1` / `on` -> on, `false` / `0` / `off` -> off.
pub fn parse_payload(payload: &[u8]) -> Result<bool, ParseError> {
    let text = std::str::from_utf8(payload).map_err(|_| ParseError::NonUtf8Payload)?;
    let trimmed = text.trim();

    match trimmed.to_ascii_lowercase().as_str() {
        "true" | "1" | "on" => Ok(true),
        "false" | "0" | "off" => Ok(false),
        _ => Err(ParseError::InvalidPayload(trimmed.to_string())),
    }
}

/// Wire payload for a logical state
pub fn format_payload(logical_on: bool) -> &'static str {
    if logical_on {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
pub(crate) fn command_topic(output: Output) -> String {
    format!("{}/command/{}/{}", TOPIC_ROOT, output.device, output.name)
}

pub fn status_topic(output: Output) -> String {
    format!("{}/status/{}/{}", TOPIC_ROOT, output.device, output.name)
}

pub fn error_topic(output: Output) -> String {
    format!("{}/error/{}/{}", TOPIC_ROOT, output.device, output.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DeviceId, OutputName};
    use proptest::prelude::*;

    #[test]
    fn test_parse_command() {
        let cmd = InboundCommand::parse("fpga/command/fpga1/dan", b"true").unwrap();
        assert_eq!(cmd.device, "fpga1");
        assert_eq!(cmd.name, "dan");
        assert!(cmd.logical_on);

        // Unknown names are left for the registry to reject
        let cmd = InboundCommand::parse("fpga/command/fpga9/dan", b"false").unwrap();
        assert_eq!(cmd.device, "fpga9");
        assert!(!cmd.logical_on);
    }

    #[test]
    fn test_rejects_malformed_topics() {
        for topic in [
            "fpga/status/fpga1/dan",
            "fpga/command/fpga1",
            "fpga/command/fpga1/dan/extra",
            "fpga/command//dan",
            "other/command/fpga1/dan",
            "",
        ] {
            let err = InboundCommand::parse(topic, b"true").unwrap_err();
            assert_eq!(err, ParseError::UnexpectedTopic(topic.to_string()));
        }
    }

    #[test]
    fn test_payload_normalization() {
        for on in ["true", "TRUE", "True", "1", "on", "ON", " true\n"] {
            assert_eq!(parse_payload(on.as_bytes()), Ok(true), "{on:?}");
        }
        for off in ["false", "FALSE", "0", "off", "Off", "\tfalse "] {
            assert_eq!(parse_payload(off.as_bytes()), Ok(false), "{off:?}");
        }

        assert_eq!(
            parse_payload(b"maybe"),
            Err(ParseError::InvalidPayload("maybe".to_string()))
        );
        assert!(parse_payload(b"").is_err());
        assert!(parse_payload(b"yes").is_err());
        assert_eq!(parse_payload(&[0xff, 0xfe]), Err(ParseError::NonUtf8Payload));
    }

    #[test]
    fn test_topics() {
        let output = Output::new(DeviceId::Fpga2, OutputName::Loaded);
        assert_eq!(command_topic(output), "fpga/command/fpga2/loaded");
        assert_eq!(status_topic(output), "fpga/status/fpga2/loaded");
        assert_eq!(error_topic(output), "fpga/error/fpga2/loaded");
        assert_eq!(format_payload(true), "true");
        assert_eq!(format_payload(false), "false");
    }

    #[test]
    fn test_command_topics_round_trip() {
        for output in Output::all() {
            let cmd = InboundCommand::parse(&command_topic(output), b"on").unwrap();
            assert_eq!(cmd.device, output.device.as_str());
            assert_eq!(cmd.name, output.name.as_str());
        }
    }

    proptest! {
        #[test]
        fn prop_only_known_words_parse(payload in "[a-zA-Z0-9 ]{0,8}") {
            let normalized = payload.trim().to_ascii_lowercase();
            let known = ["true", "1", "on", "false", "0", "off"].contains(&normalized.as_str());
            prop_assert_eq!(parse_payload(payload.as_bytes()).is_ok(), known);
        }
    }
}
